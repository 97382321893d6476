use crate::catalog::routine::RoutineKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    CreateTable(CreateTableStatement),
    DropTable(DropTableStatement),
    CreateSequence(CreateSequenceStatement),
    CreateType(CreateTypeStatement),
    Call(CallStatement),
    DropRoutine(DropRoutineStatement),
    Set(SetStatement),
    Show(ShowStatement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub type_name: String,
    pub serial: bool,
    pub primary_key: bool,
    pub not_null: bool,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub name: Vec<String>,
    pub columns: Vec<ColumnDefinition>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTableStatement {
    pub names: Vec<Vec<String>>,
    pub if_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSequenceStatement {
    pub name: Vec<String>,
    pub start: Option<i64>,
    pub increment: Option<i64>,
    pub if_not_exists: bool,
}

/// `CREATE TYPE name AS (field type, ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTypeStatement {
    pub name: Vec<String>,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallStatement {
    pub name: Vec<String>,
    pub args: Vec<Expr>,
}

/// `DROP FUNCTION|PROCEDURE [IF EXISTS] name [(types)]`. Without a type list
/// the routine is looked up by name alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropRoutineStatement {
    pub kind: RoutineKind,
    pub if_exists: bool,
    pub name: Vec<String>,
    pub arg_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStatement {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowStatement {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Query(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table_name: Vec<String>,
    pub columns: Vec<String>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table_name: Vec<String>,
    pub alias: Option<String>,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table_name: Vec<String>,
    pub alias: Option<String>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub targets: Vec<SelectItem>,
    pub from: Option<FromItem>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Relation {
        name: Vec<String>,
        alias: Option<String>,
    },
    Function {
        name: Vec<String>,
        args: Vec<Expr>,
        alias: Option<String>,
    },
    /// `ROWS FROM (f(...), g(...)) [WITH ORDINALITY]`
    RowsFrom {
        calls: Vec<(Vec<String>, Vec<Expr>)>,
        with_ordinality: bool,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub ascending: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier(Vec<String>),
    String(String),
    Integer(i64),
    Float(String),
    Boolean(bool),
    Null,
    FunctionCall {
        name: Vec<String>,
        args: Vec<Expr>,
        /// `count(*)`
        star: bool,
    },
    Cast {
        expr: Box<Expr>,
        type_name: String,
    },
    Wildcard,
    QualifiedWildcard(Vec<String>),
    Row(Vec<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    CaseSimple {
        operand: Box<Expr>,
        when_then: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    CaseSearched {
        when_then: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
}
