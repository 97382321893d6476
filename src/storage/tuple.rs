use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::types::SqlType;

/// Runtime value shared by the host engine and the PL/pgSQL interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    /// Row/Record value for ROW(a, b, c), `(a, b)::type` and table rows.
    Record(RecordValue),
}

/// One named, typed field of a record value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub sql_type: SqlType,
    pub value: ScalarValue,
}

/// Tagged composite value. Anonymous rows (`ROW(1, 'a')`) carry no type name
/// and use positional field names `f1`, `f2`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordValue {
    pub type_name: Option<String>,
    pub fields: Vec<RecordField>,
}

impl RecordValue {
    pub fn anonymous(values: Vec<ScalarValue>) -> Self {
        let fields = values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| RecordField {
                name: format!("f{}", idx + 1),
                sql_type: SqlType::of_value(&value),
                value,
            })
            .collect();
        Self {
            type_name: None,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut RecordField> {
        self.fields
            .iter_mut()
            .find(|field| field.name.eq_ignore_ascii_case(name))
    }

    pub fn values(&self) -> Vec<ScalarValue> {
        self.fields.iter().map(|field| field.value.clone()).collect()
    }

    pub fn sql_type(&self) -> SqlType {
        match &self.type_name {
            Some(name) => SqlType::Composite(name.clone()),
            None => SqlType::Record,
        }
    }
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn render(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(v) => if *v { "t" } else { "f" }.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => render_float(*v),
            Self::Numeric(v) => v.to_string(),
            Self::Text(v) => v.clone(),
            Self::Record(record) => {
                let parts: Vec<String> = record
                    .fields
                    .iter()
                    .map(|field| render_record_field(&field.value))
                    .collect();
                format!("({})", parts.join(","))
            }
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn render_float(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    v.to_string()
}

/// Record output quotes fields that would otherwise be ambiguous, the way
/// `record_out` does.
fn render_record_field(value: &ScalarValue) -> String {
    if value.is_null() {
        return String::new();
    }
    let text = value.render();
    let needs_quotes = text.is_empty()
        || text
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\') || c.is_whitespace());
    if needs_quotes {
        format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\"\""))
    } else {
        text
    }
}
