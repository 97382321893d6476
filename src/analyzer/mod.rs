//! Name and type resolution shared by the reference session and the
//! interpreter: SQL type names and routine overload selection.

pub mod functions;
pub mod types;
