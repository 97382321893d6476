//! PL/pgSQL routine interpreter.
//!
//! Routine bodies arrive as statement trees ([`PlPgSqlStmtBlock`]); the
//! interpreter keeps variable scopes, runs control flow, and hands every
//! embedded expression or query to the host through [`SqlExecutor`].
//!
//! [`SqlExecutor`]: crate::tcop::engine::SqlExecutor

pub mod bridge;
pub mod coerce;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod result;
pub mod scanner;
pub mod scope;
pub mod types;


pub use diagnostics::{RaisedNotice, Severity, format_raise_message};
pub use error::{InvocationError, PlPgSqlError};
pub use executor::{
    ControlSignal, Invocation, InvocationContext, TriggerData, TriggerEvent, TriggerTiming,
    invoke, invoke_trigger,
};
pub use result::{ResultStream, RoutineResult, zip_result_streams};
pub use types::*;
