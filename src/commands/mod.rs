pub mod create_table;
pub mod function;
pub mod sequence;
pub mod trigger;
pub mod variable;
