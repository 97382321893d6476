//! Interpreter for PL/pgSQL routines plus a small in-memory SQL host.
//!
//! [`Session`] is the reference host: it owns the catalog, tables and
//! settings, and runs routines through [`invoke`].

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::large_enum_variant,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::struct_excessive_bools,
    clippy::match_same_arms,
    clippy::needless_pass_by_value,
    clippy::similar_names,
    clippy::float_cmp
)]

pub mod analyzer;
pub mod catalog;
pub mod commands;
pub mod executor;
pub mod parser;
pub mod plpgsql;
pub mod storage;
pub mod tcop;
pub mod utils;

pub use plpgsql::{Invocation, InvocationError, RoutineResult, invoke, invoke_trigger};
pub use tcop::engine::{EngineError, QueryResult, SqlExecutor};
pub use tcop::session::Session;
