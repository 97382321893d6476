//! SQL type descriptors used by routine signatures, variables and records.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::storage::tuple::ScalarValue;

/// Types understood by the routine layer. Composite types are referenced by
/// name and resolved against the catalog when their field list is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Varchar,
    /// Type of an untyped string literal or NULL at a call site.
    Unknown,
    Void,
    Record,
    Trigger,
    Composite(String),
}

/// Type categories as in `pg_type.typcategory`; used by overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Boolean,
    Numeric,
    String,
    Composite,
    Pseudo,
    Unknown,
}

impl SqlType {
    /// Parses a built-in type name, accepting the usual aliases and an
    /// optional `pg_catalog.` qualifier. Returns `None` for anything that
    /// might be a user-defined composite.
    pub fn parse_builtin(name: &str) -> Option<Self> {
        let normalized = normalize_type_name(name);
        let ty = match normalized.as_str() {
            "bool" | "boolean" => Self::Bool,
            "int2" | "smallint" => Self::Int2,
            "int" | "int4" | "integer" | "serial" | "serial4" => Self::Int4,
            "int8" | "bigint" | "bigserial" | "serial8" => Self::Int8,
            "float4" | "real" => Self::Float4,
            "float8" | "float" | "double precision" => Self::Float8,
            "numeric" | "decimal" => Self::Numeric,
            "text" | "name" => Self::Text,
            "varchar" | "character varying" => Self::Varchar,
            "unknown" => Self::Unknown,
            "void" => Self::Void,
            "record" => Self::Record,
            "trigger" => Self::Trigger,
            _ => return None,
        };
        Some(ty)
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            Self::Bool => TypeCategory::Boolean,
            Self::Int2 | Self::Int4 | Self::Int8 | Self::Float4 | Self::Float8 | Self::Numeric => {
                TypeCategory::Numeric
            }
            Self::Text | Self::Varchar => TypeCategory::String,
            Self::Record | Self::Composite(_) => TypeCategory::Composite,
            Self::Void | Self::Trigger => TypeCategory::Pseudo,
            Self::Unknown => TypeCategory::Unknown,
        }
    }

    /// `pg_type.typispreferred` for the built-in categories.
    pub fn is_preferred(&self) -> bool {
        matches!(self, Self::Bool | Self::Float8 | Self::Text)
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Record | Self::Composite(_))
    }

    /// Best-effort runtime type of a value, used where no declared type is
    /// available (anonymous records, host expression results).
    pub fn of_value(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::Null => Self::Unknown,
            ScalarValue::Bool(_) => Self::Bool,
            ScalarValue::Int(v) => {
                if i32::try_from(*v).is_ok() {
                    Self::Int4
                } else {
                    Self::Int8
                }
            }
            ScalarValue::Float(_) => Self::Float8,
            ScalarValue::Numeric(_) => Self::Numeric,
            ScalarValue::Text(_) => Self::Text,
            ScalarValue::Record(record) => record.sql_type(),
        }
    }

    /// Initial value for a variable declared without a default when the
    /// session uses type defaults rather than NULL.
    pub fn zero_value(&self) -> ScalarValue {
        match self {
            Self::Bool => ScalarValue::Bool(false),
            Self::Int2 | Self::Int4 | Self::Int8 => ScalarValue::Int(0),
            Self::Float4 | Self::Float8 => ScalarValue::Float(0.0),
            Self::Numeric => ScalarValue::Numeric(Decimal::ZERO),
            Self::Text | Self::Varchar => ScalarValue::Text(String::new()),
            _ => ScalarValue::Null,
        }
    }

    /// Short name used in SQL literals (`::int4`).
    pub fn cast_name(&self) -> String {
        match self {
            Self::Bool => "bool".to_string(),
            Self::Int2 => "int2".to_string(),
            Self::Int4 => "int4".to_string(),
            Self::Int8 => "int8".to_string(),
            Self::Float4 => "float4".to_string(),
            Self::Float8 => "float8".to_string(),
            Self::Numeric => "numeric".to_string(),
            Self::Text => "text".to_string(),
            Self::Varchar => "varchar".to_string(),
            Self::Unknown => "unknown".to_string(),
            Self::Void => "void".to_string(),
            Self::Record => "record".to_string(),
            Self::Trigger => "trigger".to_string(),
            Self::Composite(name) => name.clone(),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "boolean",
            Self::Int2 => "smallint",
            Self::Int4 => "integer",
            Self::Int8 => "bigint",
            Self::Float4 => "real",
            Self::Float8 => "double precision",
            Self::Numeric => "numeric",
            Self::Text => "text",
            Self::Varchar => "character varying",
            Self::Unknown => "unknown",
            Self::Void => "void",
            Self::Record => "record",
            Self::Trigger => "trigger",
            Self::Composite(name) => name.as_str(),
        };
        f.write_str(name)
    }
}

/// Field list of a composite type (table row type or `CREATE TYPE ... AS`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeType {
    pub name: String,
    pub fields: Vec<(String, SqlType)>,
}

fn normalize_type_name(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase().replace('"', "");
    let unqualified = lowered
        .strip_prefix("pg_catalog.")
        .unwrap_or(lowered.as_str());
    let without_modifier = match unqualified.find('(') {
        Some(idx) => &unqualified[..idx],
        None => unqualified,
    };
    without_modifier
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
