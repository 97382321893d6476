//! RAISE handling: message formatting, condition names and the per-invocation
//! notice list.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::plpgsql::error::PlPgSqlError;
use crate::plpgsql::types::{PlPgSqlRaiseLevel, PlPgSqlRaiseOptionType};
use crate::storage::tuple::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Log,
    Info,
    Notice,
    Warning,
    Exception,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Log => "LOG",
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warning => "WARNING",
            Self::Exception => "EXCEPTION",
        }
    }

    /// Parses a `client_min_messages` value. `debug1`..`debug5` collapse
    /// into `debug`; `error` keeps only exceptions.
    pub fn parse_min_level(value: &str) -> Option<Self> {
        let lowered = value.trim().to_ascii_lowercase();
        let level = match lowered.as_str() {
            "debug" | "debug1" | "debug2" | "debug3" | "debug4" | "debug5" => Self::Debug,
            "log" => Self::Log,
            "info" => Self::Info,
            "notice" => Self::Notice,
            "warning" => Self::Warning,
            "error" | "exception" => Self::Exception,
            _ => return None,
        };
        Some(level)
    }

    fn default_sqlstate(self) -> &'static str {
        match self {
            Self::Exception => "P0001",
            Self::Warning => "01000",
            _ => "00000",
        }
    }

    /// Rank in client_min_messages order, where LOG sits below NOTICE and
    /// INFO is always delivered.
    fn client_rank(self) -> u8 {
        match self {
            Self::Debug => 0,
            Self::Log => 1,
            Self::Info | Self::Notice => 2,
            Self::Warning => 3,
            Self::Exception => 4,
        }
    }
}

impl From<PlPgSqlRaiseLevel> for Severity {
    fn from(level: PlPgSqlRaiseLevel) -> Self {
        match level {
            PlPgSqlRaiseLevel::Debug => Self::Debug,
            PlPgSqlRaiseLevel::Log => Self::Log,
            PlPgSqlRaiseLevel::Info => Self::Info,
            PlPgSqlRaiseLevel::Notice => Self::Notice,
            PlPgSqlRaiseLevel::Warning => Self::Warning,
            PlPgSqlRaiseLevel::Exception => Self::Exception,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message produced by RAISE, in the shape a client notice carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedNotice {
    pub severity: Severity,
    pub message: String,
    pub sqlstate: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub constraint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub datatype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub schema: Option<String>,
}

impl RaisedNotice {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            sqlstate: severity.default_sqlstate().to_string(),
            detail: None,
            hint: None,
            column: None,
            constraint: None,
            datatype: None,
            table: None,
            schema: None,
        }
    }

    pub fn is_exception(&self) -> bool {
        self.severity == Severity::Exception
    }

    /// The error an EXCEPTION-level notice aborts the invocation with.
    pub fn to_error(&self) -> PlPgSqlError {
        PlPgSqlError::Raised {
            sqlstate: self.sqlstate.clone(),
            message: self.message.clone(),
            detail: self.detail.clone(),
            hint: self.hint.clone(),
        }
    }
}

impl fmt::Display for RaisedNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Substitutes `%` placeholders left to right; `%%` is a literal percent
/// sign. NULL parameters render as `<NULL>`.
pub fn format_raise_message(
    template: &str,
    params: &[ScalarValue],
) -> Result<String, PlPgSqlError> {
    let mut out = String::with_capacity(template.len() + params.len() * 8);
    let mut params = params.iter();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let value = params.next().ok_or(PlPgSqlError::RaiseTooFewParameters)?;
        if value.is_null() {
            out.push_str("<NULL>");
        } else {
            out.push_str(&value.render());
        }
    }

    if params.next().is_some() {
        return Err(PlPgSqlError::RaiseTooManyParameters);
    }
    Ok(out)
}

const CONDITIONS: &[(&str, &str)] = &[
    ("successful_completion", "00000"),
    ("warning", "01000"),
    ("no_data", "02000"),
    ("feature_not_supported", "0A000"),
    ("case_not_found", "20000"),
    ("data_exception", "22000"),
    ("numeric_value_out_of_range", "22003"),
    ("null_value_not_allowed", "22004"),
    ("invalid_parameter_value", "22023"),
    ("division_by_zero", "22012"),
    ("invalid_text_representation", "22P02"),
    ("integrity_constraint_violation", "23000"),
    ("not_null_violation", "23502"),
    ("foreign_key_violation", "23503"),
    ("unique_violation", "23505"),
    ("check_violation", "23514"),
    ("invalid_transaction_state", "25000"),
    ("insufficient_privilege", "42501"),
    ("syntax_error", "42601"),
    ("undefined_column", "42703"),
    ("undefined_function", "42883"),
    ("undefined_table", "42P01"),
    ("undefined_object", "42704"),
    ("duplicate_object", "42710"),
    ("query_canceled", "57014"),
    ("internal_error", "XX000"),
    ("plpgsql_error", "P0000"),
    ("raise_exception", "P0001"),
    ("no_data_found", "P0002"),
    ("too_many_rows", "P0003"),
    ("assert_failure", "P0004"),
];

/// Maps a condition name (`division_by_zero`) or an explicit code
/// (`SQLSTATE '22012'` or `22012`) to its SQLSTATE.
pub fn condition_sqlstate(condition: &str) -> Result<String, PlPgSqlError> {
    let trimmed = condition.trim();
    if let Some(code) = strip_sqlstate_prefix(trimmed) {
        return validate_sqlstate(code);
    }
    let lowered = trimmed.to_ascii_lowercase();
    if let Some((_, code)) = CONDITIONS.iter().find(|(name, _)| *name == lowered) {
        return Ok((*code).to_string());
    }
    if trimmed.len() == 5 && trimmed.chars().any(|c| c.is_ascii_digit()) {
        return validate_sqlstate(trimmed);
    }
    Err(PlPgSqlError::UnknownCondition {
        name: trimmed.to_string(),
    })
}

fn strip_sqlstate_prefix(text: &str) -> Option<&str> {
    let head = text.get(..8)?;
    if !head.eq_ignore_ascii_case("sqlstate") {
        return None;
    }
    let rest = text[8..].trim();
    Some(rest.trim_matches('\''))
}

fn validate_sqlstate(code: &str) -> Result<String, PlPgSqlError> {
    let valid = code.len() == 5
        && code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase());
    if valid {
        Ok(code.to_string())
    } else {
        Err(PlPgSqlError::InvalidSqlstate {
            code: code.to_string(),
        })
    }
}

/// Assembles the notice for one RAISE statement from its evaluated parts.
/// `options` holds the rendered `USING` option values in source order.
pub fn build_notice(
    level: PlPgSqlRaiseLevel,
    condname: Option<&str>,
    formatted: Option<String>,
    options: &[(PlPgSqlRaiseOptionType, String)],
) -> Result<RaisedNotice, PlPgSqlError> {
    let severity = Severity::from(level);
    let mut notice = RaisedNotice::new(severity, String::new());
    let mut message = formatted;
    let mut errcode = condname.map(condition_sqlstate).transpose()?;
    let mut seen: Vec<PlPgSqlRaiseOptionType> = Vec::new();

    for (opt_type, value) in options {
        if seen.contains(opt_type) {
            return Err(PlPgSqlError::RaiseDuplicateOption {
                option: option_keyword(*opt_type),
            });
        }
        seen.push(*opt_type);
        match opt_type {
            PlPgSqlRaiseOptionType::Errcode => {
                if errcode.is_some() {
                    return Err(PlPgSqlError::RaiseDuplicateOption { option: "ERRCODE" });
                }
                errcode = Some(condition_sqlstate(value)?);
            }
            PlPgSqlRaiseOptionType::Message => message = Some(value.clone()),
            PlPgSqlRaiseOptionType::Detail => notice.detail = Some(value.clone()),
            PlPgSqlRaiseOptionType::Hint => notice.hint = Some(value.clone()),
            PlPgSqlRaiseOptionType::Column => notice.column = Some(value.clone()),
            PlPgSqlRaiseOptionType::Constraint => notice.constraint = Some(value.clone()),
            PlPgSqlRaiseOptionType::Datatype => notice.datatype = Some(value.clone()),
            PlPgSqlRaiseOptionType::Table => notice.table = Some(value.clone()),
            PlPgSqlRaiseOptionType::Schema => notice.schema = Some(value.clone()),
        }
    }

    if let Some(code) = errcode {
        notice.sqlstate = code;
    }
    notice.message = match message {
        Some(message) => message,
        None => match condname {
            Some(name) if strip_sqlstate_prefix(name.trim()).is_none() => {
                name.trim().to_ascii_lowercase()
            }
            _ => notice.sqlstate.clone(),
        },
    };
    Ok(notice)
}

fn option_keyword(opt_type: PlPgSqlRaiseOptionType) -> &'static str {
    match opt_type {
        PlPgSqlRaiseOptionType::Errcode => "ERRCODE",
        PlPgSqlRaiseOptionType::Message => "MESSAGE",
        PlPgSqlRaiseOptionType::Detail => "DETAIL",
        PlPgSqlRaiseOptionType::Hint => "HINT",
        PlPgSqlRaiseOptionType::Column => "COLUMN",
        PlPgSqlRaiseOptionType::Constraint => "CONSTRAINT",
        PlPgSqlRaiseOptionType::Datatype => "DATATYPE",
        PlPgSqlRaiseOptionType::Table => "TABLE",
        PlPgSqlRaiseOptionType::Schema => "SCHEMA",
    }
}

/// Ordered notice list of one invocation, filtered by `client_min_messages`.
#[derive(Debug, Clone)]
pub struct NoticeLog {
    min_level: Severity,
    notices: Vec<RaisedNotice>,
}

impl NoticeLog {
    pub fn new(min_level: Severity) -> Self {
        Self {
            min_level,
            notices: Vec::new(),
        }
    }

    pub fn accepts(&self, severity: Severity) -> bool {
        severity == Severity::Info
            || severity == Severity::Exception
            || severity.client_rank() >= self.min_level.client_rank()
    }

    /// Records a notice raised directly by the running routine.
    pub fn emit(&mut self, notice: RaisedNotice) {
        if !self.accepts(notice.severity) {
            debug!(severity = %notice.severity, "notice below client_min_messages dropped");
            return;
        }
        trace_notice(&notice);
        self.notices.push(notice);
    }

    /// Appends notices drained from nested invocations; they were filtered
    /// and traced where they were raised.
    pub fn extend_nested(&mut self, notices: Vec<RaisedNotice>) {
        self.notices.extend(notices);
    }

    pub fn len(&self) -> usize {
        self.notices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn into_notices(self) -> Vec<RaisedNotice> {
        self.notices
    }
}

fn trace_notice(notice: &RaisedNotice) {
    match notice.severity {
        Severity::Debug | Severity::Log => {
            debug!(sqlstate = %notice.sqlstate, message = %notice.message, "raise")
        }
        Severity::Info | Severity::Notice => {
            info!(sqlstate = %notice.sqlstate, message = %notice.message, "raise")
        }
        Severity::Warning | Severity::Exception => {
            warn!(
                severity = %notice.severity,
                sqlstate = %notice.sqlstate,
                message = %notice.message,
                "raise"
            )
        }
    }
}
