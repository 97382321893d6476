pub mod ast;
pub mod lexer;
pub mod sql_parser;
