//! Routine (function/procedure) definitions as stored in the catalog.

use serde::{Deserialize, Serialize};

use crate::catalog::types::SqlType;
use crate::plpgsql::types::PlPgSqlStmtBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutineKind {
    Function,
    Procedure,
}

impl RoutineKind {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Procedure => "procedure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamMode {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineParam {
    pub name: String,
    pub sql_type: SqlType,
    pub mode: ParamMode,
}

impl RoutineParam {
    pub fn is_input(&self) -> bool {
        matches!(self.mode, ParamMode::In | ParamMode::InOut)
    }

    pub fn is_output(&self) -> bool {
        matches!(self.mode, ParamMode::Out | ParamMode::InOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnSpec {
    Void,
    Scalar(SqlType),
    SetOf(SqlType),
    Table(Vec<(String, SqlType)>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutineBody {
    PlPgSql(PlPgSqlStmtBlock),
    /// `LANGUAGE sql` body; parameters are referenced by name or `$n`.
    Sql(String),
}

/// A resolved function or procedure. Identity is schema + name + input
/// argument types; distinct overloads are distinct definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub kind: RoutineKind,
    pub params: Vec<RoutineParam>,
    pub returns: ReturnSpec,
    pub body: RoutineBody,
    pub language: String,
    pub strict: bool,
}

impl FunctionDefinition {
    pub fn function(name: &str) -> Self {
        Self::new(RoutineKind::Function, name)
    }

    pub fn procedure(name: &str) -> Self {
        Self::new(RoutineKind::Procedure, name)
    }

    fn new(kind: RoutineKind, name: &str) -> Self {
        Self {
            oid: 0,
            schema: "public".to_string(),
            name: name.to_ascii_lowercase(),
            kind,
            params: Vec::new(),
            returns: ReturnSpec::Void,
            body: RoutineBody::PlPgSql(PlPgSqlStmtBlock::default()),
            language: "plpgsql".to_string(),
            strict: false,
        }
    }

    pub fn in_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_ascii_lowercase();
        self
    }

    pub fn param(self, name: &str, sql_type: SqlType) -> Self {
        self.param_with_mode(name, sql_type, ParamMode::In)
    }

    pub fn param_with_mode(mut self, name: &str, sql_type: SqlType, mode: ParamMode) -> Self {
        self.params.push(RoutineParam {
            name: name.to_ascii_lowercase(),
            sql_type,
            mode,
        });
        self
    }

    pub fn returns(mut self, returns: ReturnSpec) -> Self {
        self.returns = returns;
        self
    }

    pub fn body(mut self, block: PlPgSqlStmtBlock) -> Self {
        self.body = RoutineBody::PlPgSql(block);
        self.language = "plpgsql".to_string();
        self
    }

    pub fn sql_body(mut self, sql: &str) -> Self {
        self.body = RoutineBody::Sql(sql.to_string());
        self.language = "sql".to_string();
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn input_types(&self) -> Vec<SqlType> {
        self.params
            .iter()
            .filter(|param| param.is_input())
            .map(|param| param.sql_type.clone())
            .collect()
    }

    pub fn input_params(&self) -> impl Iterator<Item = &RoutineParam> {
        self.params.iter().filter(|param| param.is_input())
    }

    pub fn output_params(&self) -> impl Iterator<Item = &RoutineParam> {
        self.params.iter().filter(|param| param.is_output())
    }

    pub fn returns_set(&self) -> bool {
        matches!(self.returns, ReturnSpec::SetOf(_) | ReturnSpec::Table(_))
    }

    pub fn is_trigger(&self) -> bool {
        self.returns == ReturnSpec::Scalar(SqlType::Trigger)
    }

    /// Identity signature, e.g. `interpreted_overload(integer)`.
    pub fn signature(&self) -> String {
        let args: Vec<String> = self.input_types().iter().map(ToString::to_string).collect();
        format!("{}({})", self.name, args.join(", "))
    }

    pub fn has_identity(&self, schema: &str, name: &str, input_types: &[SqlType]) -> bool {
        self.schema.eq_ignore_ascii_case(schema)
            && self.name.eq_ignore_ascii_case(name)
            && self.input_types() == input_types
    }
}
