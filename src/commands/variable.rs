use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::SearchPath;
use crate::parser::ast::{SetStatement, ShowStatement};
use crate::plpgsql::diagnostics::Severity;
use crate::tcop::engine::{EngineError, QueryResult, ScalarValue};

/// `plpgsql.case_not_found`: behavior of a CASE statement with no matching
/// WHEN and no ELSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseNotFoundPolicy {
    #[default]
    Error,
    Ignore,
}

/// `plpgsql.select_into_multiple_rows`: what a non-STRICT SELECT INTO does
/// with more than one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipleRowsPolicy {
    #[default]
    FirstRow,
    Error,
}

/// `plpgsql.uninitialized_variables`: initial value of a variable declared
/// without a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UninitializedPolicy {
    #[default]
    TypeDefault,
    Null,
}

/// Session configuration. Owned by the session and read by every invocation
/// it starts; nothing here is process-global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client_min_messages: Severity,
    #[serde(rename = "plpgsql.case_not_found")]
    pub case_not_found: CaseNotFoundPolicy,
    #[serde(rename = "plpgsql.select_into_multiple_rows")]
    pub select_into_multiple_rows: MultipleRowsPolicy,
    #[serde(rename = "plpgsql.uninitialized_variables")]
    pub uninitialized_variables: UninitializedPolicy,
    pub max_stack_depth: usize,
    pub search_path: String,
    /// Placeholder and client parameters stored verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut extra = BTreeMap::new();
        extra.insert("server_version".to_string(), "16.0".to_string());
        extra.insert("client_encoding".to_string(), "UTF8".to_string());
        extra.insert("application_name".to_string(), String::new());
        Self {
            client_min_messages: Severity::Debug,
            case_not_found: CaseNotFoundPolicy::Error,
            select_into_multiple_rows: MultipleRowsPolicy::FirstRow,
            uninitialized_variables: UninitializedPolicy::TypeDefault,
            max_stack_depth: 64,
            search_path: "public".to_string(),
            extra,
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|err| {
            EngineError::new("22023", format!("invalid settings document: {err}"))
        })
    }

    pub fn search_path(&self) -> SearchPath {
        SearchPath::parse(&self.search_path)
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        let key = name.trim().to_ascii_lowercase();
        let value = value.trim();
        let invalid = || {
            EngineError::new(
                "22023",
                format!("invalid value for parameter \"{key}\": \"{value}\""),
            )
        };
        match key.as_str() {
            "client_min_messages" => {
                self.client_min_messages = Severity::parse_min_level(value).ok_or_else(invalid)?;
            }
            "plpgsql.case_not_found" => {
                self.case_not_found = match value.to_ascii_lowercase().as_str() {
                    "error" => CaseNotFoundPolicy::Error,
                    "ignore" => CaseNotFoundPolicy::Ignore,
                    _ => return Err(invalid()),
                };
            }
            "plpgsql.select_into_multiple_rows" => {
                self.select_into_multiple_rows = match value.to_ascii_lowercase().as_str() {
                    "first_row" => MultipleRowsPolicy::FirstRow,
                    "error" => MultipleRowsPolicy::Error,
                    _ => return Err(invalid()),
                };
            }
            "plpgsql.uninitialized_variables" => {
                self.uninitialized_variables = match value.to_ascii_lowercase().as_str() {
                    "type_default" => UninitializedPolicy::TypeDefault,
                    "null" => UninitializedPolicy::Null,
                    _ => return Err(invalid()),
                };
            }
            "max_stack_depth" => {
                let depth: usize = value.parse().map_err(|_| invalid())?;
                if depth == 0 {
                    return Err(invalid());
                }
                self.max_stack_depth = depth;
            }
            "search_path" => self.search_path = value.to_string(),
            _ => {
                self.extra.insert(key, value.to_string());
            }
        }
        Ok(())
    }

    pub fn show(&self, name: &str) -> Result<String, EngineError> {
        let key = name.trim().to_ascii_lowercase();
        let value = match key.as_str() {
            "client_min_messages" => self.client_min_messages.as_str().to_ascii_lowercase(),
            "plpgsql.case_not_found" => match self.case_not_found {
                CaseNotFoundPolicy::Error => "error".to_string(),
                CaseNotFoundPolicy::Ignore => "ignore".to_string(),
            },
            "plpgsql.select_into_multiple_rows" => match self.select_into_multiple_rows {
                MultipleRowsPolicy::FirstRow => "first_row".to_string(),
                MultipleRowsPolicy::Error => "error".to_string(),
            },
            "plpgsql.uninitialized_variables" => match self.uninitialized_variables {
                UninitializedPolicy::TypeDefault => "type_default".to_string(),
                UninitializedPolicy::Null => "null".to_string(),
            },
            "max_stack_depth" => self.max_stack_depth.to_string(),
            "search_path" => self.search_path.clone(),
            _ => self.extra.get(&key).cloned().ok_or_else(|| {
                EngineError::new(
                    "42704",
                    format!("unrecognized configuration parameter \"{key}\""),
                )
            })?,
        };
        Ok(value)
    }
}

pub fn execute_set(
    settings: &mut Settings,
    set_stmt: &SetStatement,
) -> Result<QueryResult, EngineError> {
    settings.set(&set_stmt.name, &set_stmt.value)?;
    Ok(QueryResult::command("SET", 0))
}

pub fn execute_show(
    settings: &Settings,
    show_stmt: &ShowStatement,
) -> Result<QueryResult, EngineError> {
    let value = settings.show(&show_stmt.name)?;
    let mut result = QueryResult::with_rows(
        vec![(show_stmt.name.to_ascii_lowercase(), crate::catalog::types::SqlType::Text)],
        vec![vec![ScalarValue::Text(value)]],
    );
    result.command_tag = "SHOW".to_string();
    Ok(result)
}
