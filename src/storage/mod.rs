pub mod heap;
pub mod tuple;
