//! Query-execution capability shared between the host engine and the
//! routine interpreter.

use crate::analyzer::functions::ResolveError;
use crate::catalog::CatalogError;
use crate::catalog::types::SqlType;
use crate::plpgsql::diagnostics::RaisedNotice;
use crate::plpgsql::error::PlPgSqlError;

pub use crate::storage::tuple::ScalarValue;

/// Error reported by the host engine. The message is what a client sees; the
/// SQLSTATE travels alongside it unchanged through nested invocations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub sqlstate: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Routine call stack at the point of failure, innermost first, one
    /// frame per line.
    pub context: Option<String>,
}

impl EngineError {
    pub fn new(sqlstate: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: sqlstate.to_string(),
            detail: None,
            hint: None,
            context: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new("42601", message)
    }

    pub fn query_canceled() -> Self {
        Self::new("57014", "canceling statement due to user request")
    }
}

impl From<PlPgSqlError> for EngineError {
    fn from(err: PlPgSqlError) -> Self {
        match err {
            PlPgSqlError::Sql(err) => err,
            other => Self {
                message: other.to_string(),
                sqlstate: other.sqlstate().to_string(),
                detail: other.detail().map(str::to_string),
                hint: other.hint().map(str::to_string),
                context: None,
            },
        }
    }
}

impl From<ResolveError> for EngineError {
    fn from(err: ResolveError) -> Self {
        Self::new(err.sqlstate(), err.to_string())
    }
}

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        Self::new(err.sqlstate(), err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub column_types: Vec<SqlType>,
    pub rows: Vec<Vec<ScalarValue>>,
    pub command_tag: String,
    pub rows_affected: u64,
}

impl QueryResult {
    /// Result of a utility or DML statement that returns no rows.
    pub fn command(tag: impl Into<String>, rows_affected: u64) -> Self {
        Self {
            columns: Vec::new(),
            column_types: Vec::new(),
            rows: Vec::new(),
            command_tag: tag.into(),
            rows_affected,
        }
    }

    pub fn with_rows(
        columns: Vec<(String, SqlType)>,
        rows: Vec<Vec<ScalarValue>>,
    ) -> Self {
        let rows_affected = rows.len() as u64;
        let (columns, column_types) = columns.into_iter().unzip();
        Self {
            columns,
            column_types,
            rows,
            command_tag: format!("SELECT {rows_affected}"),
            rows_affected,
        }
    }

    pub fn is_select(&self) -> bool {
        self.command_tag.starts_with("SELECT")
    }
}

/// Synchronous "execute SQL, get rows" capability bound to the caller's
/// transaction. The interpreter never opens or commits transactions through
/// it.
pub trait SqlExecutor {
    fn execute_sql(&mut self, sql: &str) -> Result<QueryResult, EngineError>;

    /// Polled at every statement and loop iteration; an error unwinds the
    /// running invocation.
    fn check_for_interrupts(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Notices raised by routines invoked from within `execute_sql` since the
    /// last call, in emission order.
    fn take_notices(&mut self) -> Vec<RaisedNotice> {
        Vec::new()
    }
}
