//! Errors raised while executing a PL/pgSQL routine.

use crate::analyzer::functions::ResolveError;
use crate::catalog::CatalogError;
use crate::plpgsql::diagnostics::RaisedNotice;
use crate::tcop::engine::EngineError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlPgSqlError {
    // Definition errors.
    #[error("duplicate declaration of \"{name}\"")]
    DuplicateVariable { name: String },
    #[error("variable \"{name}\" does not exist")]
    UnknownVariable { name: String },
    #[error("record \"{record}\" has no field \"{field}\"")]
    UnknownRecordField { record: String, field: String },
    #[error("there is no label \"{label}\" attached to any block or loop enclosing this statement")]
    UnknownLabel { label: String },
    #[error("{keyword} cannot be used outside a loop")]
    OutsideLoop { keyword: &'static str },
    #[error("block label \"{label}\" cannot be used in CONTINUE")]
    ContinueBlockLabel { label: String },
    #[error("label \"{label}\" is already used by an enclosing loop")]
    DuplicateLabel { label: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{routine} expects {expected} argument(s), got {got}")]
    ArgumentCount {
        routine: String,
        expected: usize,
        got: usize,
    },

    // Assignment and coercion.
    #[error("variable \"{name}\" is declared CONSTANT")]
    ConstantAssignment { name: String },
    #[error("null value cannot be assigned to variable \"{name}\" declared NOT NULL")]
    NullViolation { name: String },
    #[error("invalid input syntax for type {target}: \"{value}\"")]
    TypeMismatch { value: String, target: String },
    #[error("{target} out of range")]
    OutOfRange { target: String },
    #[error("{message}")]
    RowShape { message: String },
    #[error("record \"{name}\" is not assigned yet")]
    UnassignedRecord { name: String },

    // Runtime control errors.
    #[error("case not found")]
    CaseNotFound,
    #[error("{bound} of FOR loop cannot be null")]
    NullLoopBound { bound: &'static str },
    #[error("BY value of FOR loop must be greater than zero")]
    InvalidLoopStep,
    #[error("query returned no rows")]
    NoDataFound,
    #[error("query returned more than one row")]
    TooManyRows,
    #[error("query returned {columns} columns")]
    NotSingleColumn { columns: usize },
    #[error("query has no destination for result data")]
    NoResultDestination,
    #[error("control reached end of function without RETURN")]
    MissingReturn,
    #[error("{message}")]
    InvalidReturn { message: String },
    #[error("stack depth limit exceeded")]
    StackDepthExceeded { limit: usize },
    #[error("trigger functions can only be called as triggers")]
    TriggerCalledDirectly,
    #[error("function {routine} must return type trigger")]
    NotATriggerFunction { routine: String },

    // Diagnostics.
    #[error("{message}")]
    Raised {
        sqlstate: String,
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },
    #[error("too few parameters specified for RAISE")]
    RaiseTooFewParameters,
    #[error("too many parameters specified for RAISE")]
    RaiseTooManyParameters,
    #[error("RAISE option already specified: {option}")]
    RaiseDuplicateOption { option: &'static str },
    #[error("RAISE statement option cannot be null")]
    RaiseOptionNull,
    #[error("RAISE without parameters cannot be used outside an exception handler")]
    ReraiseOutsideHandler,
    #[error("invalid SQLSTATE code \"{code}\"")]
    InvalidSqlstate { code: String },
    #[error("unrecognized exception condition \"{name}\"")]
    UnknownCondition { name: String },
    #[error("{message}")]
    AssertFailure { message: String },

    /// Embedded SQL failed; the host error is passed through unchanged.
    #[error(transparent)]
    Sql(#[from] EngineError),
}

impl PlPgSqlError {
    pub fn sqlstate(&self) -> &str {
        match self {
            Self::DuplicateVariable { .. } => "42601",
            Self::UnknownVariable { .. } | Self::UnknownRecordField { .. } => "42703",
            Self::UnknownLabel { .. }
            | Self::OutsideLoop { .. }
            | Self::ContinueBlockLabel { .. }
            | Self::DuplicateLabel { .. } => "42601",
            Self::Catalog(err) => err.sqlstate(),
            Self::Resolve(err) => err.sqlstate(),
            Self::ArgumentCount { .. } => "42883",
            Self::ConstantAssignment { .. } => "22005",
            Self::NullViolation { .. } | Self::NullLoopBound { .. } => "22004",
            Self::TypeMismatch { .. } => "22P02",
            Self::OutOfRange { .. } => "22003",
            Self::RowShape { .. } => "42804",
            Self::UnassignedRecord { .. } => "55000",
            Self::CaseNotFound => "20000",
            Self::InvalidLoopStep => "22023",
            Self::NoDataFound => "P0002",
            Self::TooManyRows => "P0003",
            Self::NotSingleColumn { .. } | Self::NoResultDestination => "42601",
            Self::MissingReturn => "2F005",
            Self::InvalidReturn { .. } => "42804",
            Self::StackDepthExceeded { .. } => "54001",
            Self::TriggerCalledDirectly => "0A000",
            Self::NotATriggerFunction { .. } => "42P17",
            Self::Raised { sqlstate, .. } => sqlstate,
            Self::RaiseTooFewParameters
            | Self::RaiseTooManyParameters
            | Self::RaiseDuplicateOption { .. } => "42601",
            Self::RaiseOptionNull => "22004",
            Self::ReraiseOutsideHandler => "0Z002",
            Self::InvalidSqlstate { .. } | Self::UnknownCondition { .. } => "42704",
            Self::AssertFailure { .. } => "P0004",
            Self::Sql(err) => &err.sqlstate,
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::CaseNotFound => Some("CASE statement is missing ELSE part."),
            Self::NoResultDestination => {
                Some("If you want to discard the results of a SELECT, use PERFORM instead.")
            }
            Self::StackDepthExceeded { .. } => {
                Some("Increase the configuration parameter \"max_stack_depth\".")
            }
            Self::Raised { hint, .. } => hint.as_deref(),
            Self::Sql(err) => err.hint.as_deref(),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Raised { detail, .. } => detail.as_deref(),
            Self::Sql(err) => err.detail.as_deref(),
            _ => None,
        }
    }
}

/// A failed invocation: the error, the routine/statement it happened in, and
/// the notices emitted before the failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct InvocationError {
    pub error: PlPgSqlError,
    pub context: String,
    pub notices: Vec<RaisedNotice>,
}

impl InvocationError {
    pub fn sqlstate(&self) -> &str {
        self.error.sqlstate()
    }

    /// Flattens into the host error shape so the failure can travel through
    /// an enclosing query unchanged.
    pub fn into_engine_error(self) -> EngineError {
        let mut err = EngineError::from(self.error);
        if !self.context.is_empty() {
            err.context = Some(match err.context.take() {
                Some(inner) => format!("{inner}\n{}", self.context),
                None => self.context,
            });
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::{InvocationError, PlPgSqlError};
    use crate::tcop::engine::EngineError;

    #[test]
    fn raised_error_keeps_its_sqlstate() {
        let err = PlPgSqlError::Raised {
            sqlstate: "P0001".to_string(),
            message: "foo % bar 2".to_string(),
            detail: None,
            hint: Some("check input".to_string()),
        };
        assert_eq!(err.to_string(), "foo % bar 2");
        assert_eq!(err.sqlstate(), "P0001");
        assert_eq!(err.hint(), Some("check input"));
    }

    #[test]
    fn sql_errors_pass_through_unchanged() {
        let engine = EngineError::new("23505", "duplicate key value violates unique constraint");
        let failure = InvocationError {
            error: PlPgSqlError::from(engine.clone()),
            context: "PL/pgSQL function f() at SQL statement".to_string(),
            notices: Vec::new(),
        };
        assert_eq!(failure.sqlstate(), "23505");
        let flattened = failure.into_engine_error();
        assert_eq!(flattened.message, engine.message);
        assert_eq!(flattened.sqlstate, engine.sqlstate);
        assert_eq!(
            flattened.context.as_deref(),
            Some("PL/pgSQL function f() at SQL statement")
        );
    }

    #[test]
    fn case_not_found_carries_hint() {
        let failure = InvocationError {
            error: PlPgSqlError::CaseNotFound,
            context: String::new(),
            notices: Vec::new(),
        };
        let engine = failure.into_engine_error();
        assert_eq!(engine.sqlstate, "20000");
        assert_eq!(engine.hint.as_deref(), Some("CASE statement is missing ELSE part."));
    }
}
