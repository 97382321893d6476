//! PL/pgSQL statement tree.
//!
//! The node layout follows PostgreSQL's `plpgsql.h`, reduced to the
//! constructs this interpreter executes. Variables are referenced by name and
//! resolved against the invocation's scope stack at run time, so trees can be
//! built directly by a parser or by hand.

use serde::{Deserialize, Serialize};

/// Corresponds to `PLpgSQL_expr` in `plpgsql.h`: an embedded SQL expression
/// or query with free references to in-scope variables.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlPgSqlExpr {
    pub query: String,
}

impl PlPgSqlExpr {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

impl From<&str> for PlPgSqlExpr {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

impl From<String> for PlPgSqlExpr {
    fn from(query: String) -> Self {
        Self { query }
    }
}

/// Corresponds to `PLpgSQL_type`: a declared type name, resolved against the
/// catalog when the declaration executes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlPgSqlType {
    pub typname: String,
}

impl From<&str> for PlPgSqlType {
    fn from(typname: &str) -> Self {
        Self {
            typname: typname.to_string(),
        }
    }
}

/// One entry of a DECLARE section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlPgSqlDecl {
    Var(PlPgSqlVarDecl),
    /// `name ALIAS FOR target`
    Alias { name: String, target: String },
}

/// Corresponds to the declaration part of `PLpgSQL_variable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlVarDecl {
    pub refname: String,
    pub datatype: PlPgSqlType,
    pub default_val: Option<PlPgSqlExpr>,
    pub isconst: bool,
    pub notnull: bool,
}

/// Corresponds to `PLpgSQL_stmt_block` in `plpgsql.h` (without an
/// exception section).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlPgSqlStmtBlock {
    pub label: Option<String>,
    pub decls: Vec<PlPgSqlDecl>,
    pub body: Vec<PlPgSqlStmt>,
}

impl PlPgSqlStmtBlock {
    pub fn new(body: Vec<PlPgSqlStmt>) -> Self {
        Self {
            label: None,
            decls: Vec::new(),
            body,
        }
    }

    pub fn labeled(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// `DECLARE name type;`
    pub fn declare(mut self, name: &str, typname: &str) -> Self {
        self.decls.push(PlPgSqlDecl::Var(PlPgSqlVarDecl {
            refname: name.to_string(),
            datatype: typname.into(),
            default_val: None,
            isconst: false,
            notnull: false,
        }));
        self
    }

    /// `DECLARE name type := default;`
    pub fn declare_default(mut self, name: &str, typname: &str, default_val: &str) -> Self {
        self.decls.push(PlPgSqlDecl::Var(PlPgSqlVarDecl {
            refname: name.to_string(),
            datatype: typname.into(),
            default_val: Some(default_val.into()),
            isconst: false,
            notnull: false,
        }));
        self
    }

    pub fn declare_var(mut self, decl: PlPgSqlVarDecl) -> Self {
        self.decls.push(PlPgSqlDecl::Var(decl));
        self
    }

    /// `DECLARE name ALIAS FOR target;`
    pub fn alias(mut self, name: &str, target: &str) -> Self {
        self.decls.push(PlPgSqlDecl::Alias {
            name: name.to_string(),
            target: target.to_string(),
        });
        self
    }
}

/// Corresponds to `PLpgSQL_stmt_assign`. The target may be `var` or
/// `record.field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtAssign {
    pub target: String,
    pub expr: PlPgSqlExpr,
}

/// Corresponds to `PLpgSQL_if_elsif`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlIfElsif {
    pub cond: PlPgSqlExpr,
    pub stmts: Vec<PlPgSqlStmt>,
}

/// Corresponds to `PLpgSQL_stmt_if`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtIf {
    pub cond: PlPgSqlExpr,
    pub then_body: Vec<PlPgSqlStmt>,
    pub elsif_list: Vec<PlPgSqlIfElsif>,
    pub else_body: Vec<PlPgSqlStmt>,
}

/// Corresponds to `PLpgSQL_case_when`. For a simple CASE `exprs` is the
/// comma-separated value list; for a searched CASE it holds one condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlCaseWhen {
    pub exprs: Vec<PlPgSqlExpr>,
    pub stmts: Vec<PlPgSqlStmt>,
}

/// Corresponds to `PLpgSQL_stmt_case`; `t_expr` is present for a simple CASE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtCase {
    pub t_expr: Option<PlPgSqlExpr>,
    pub case_when_list: Vec<PlPgSqlCaseWhen>,
    pub else_stmts: Option<Vec<PlPgSqlStmt>>,
}

/// Corresponds to `PLpgSQL_stmt_loop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtLoop {
    pub label: Option<String>,
    pub body: Vec<PlPgSqlStmt>,
}

/// Corresponds to `PLpgSQL_stmt_while`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtWhile {
    pub label: Option<String>,
    pub cond: PlPgSqlExpr,
    pub body: Vec<PlPgSqlStmt>,
}

/// Corresponds to `PLpgSQL_stmt_fori`. The loop variable is implicitly
/// declared as an integer local to the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtFori {
    pub label: Option<String>,
    pub var: String,
    pub lower: PlPgSqlExpr,
    pub upper: PlPgSqlExpr,
    pub step: Option<PlPgSqlExpr>,
    pub reverse: bool,
    pub body: Vec<PlPgSqlStmt>,
}

/// Corresponds to `PLpgSQL_stmt_fors`. Targets must already be declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtFors {
    pub label: Option<String>,
    pub target: Vec<String>,
    pub query: PlPgSqlExpr,
    pub body: Vec<PlPgSqlStmt>,
}

/// Corresponds to `PLpgSQL_stmt_exit` (EXIT and CONTINUE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtExit {
    pub is_exit: bool,
    pub label: Option<String>,
    pub cond: Option<PlPgSqlExpr>,
}

/// Corresponds to `PLpgSQL_stmt_return`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtReturn {
    pub expr: Option<PlPgSqlExpr>,
}

/// Corresponds to `PLpgSQL_stmt_return_next`. Without an expression the
/// current values of the OUT parameters form the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtReturnNext {
    pub expr: Option<PlPgSqlExpr>,
}

/// Corresponds to `PLpgSQL_stmt_return_query` (static query form).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtReturnQuery {
    pub query: PlPgSqlExpr,
}

/// Corresponds to the `elog_level` of `PLpgSQL_stmt_raise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlPgSqlRaiseLevel {
    Debug,
    Log,
    Info,
    Notice,
    Warning,
    Exception,
}

/// Corresponds to `PLpgSQL_raise_option_type` in `plpgsql.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlPgSqlRaiseOptionType {
    Errcode,
    Message,
    Detail,
    Hint,
    Column,
    Constraint,
    Datatype,
    Table,
    Schema,
}

/// Corresponds to `PLpgSQL_raise_option`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlRaiseOption {
    pub opt_type: PlPgSqlRaiseOptionType,
    pub expr: PlPgSqlExpr,
}

/// Corresponds to `PLpgSQL_stmt_raise`. `message` is the decoded format
/// template; `condname` is a condition name or `SQLSTATE 'xxxxx'` code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtRaise {
    pub elog_level: PlPgSqlRaiseLevel,
    pub condname: Option<String>,
    pub message: Option<String>,
    pub params: Vec<PlPgSqlExpr>,
    pub options: Vec<PlPgSqlRaiseOption>,
}

/// Corresponds to `PLpgSQL_stmt_assert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtAssert {
    pub cond: PlPgSqlExpr,
    pub message: Option<PlPgSqlExpr>,
}

/// Corresponds to `PLpgSQL_stmt_execsql`. With `into`, the INTO clause has
/// already been removed from `sqlstmt` and its targets listed in `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtExecSql {
    pub sqlstmt: PlPgSqlExpr,
    pub into: bool,
    pub strict: bool,
    pub target: Vec<String>,
}

/// Corresponds to `PLpgSQL_stmt_perform`; `expr` is the query without the
/// leading PERFORM keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtPerform {
    pub expr: PlPgSqlExpr,
}

/// Corresponds to `PLpgSQL_getdiag_kind` (current-statement items only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlPgSqlGetdiagKind {
    RowCount,
    RoutineOid,
}

/// Corresponds to `PLpgSQL_diag_item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlDiagItem {
    pub kind: PlPgSqlGetdiagKind,
    pub target: String,
}

/// Corresponds to `PLpgSQL_stmt_getdiag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlPgSqlStmtGetdiag {
    pub diag_items: Vec<PlPgSqlDiagItem>,
}

/// Executable statement nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlPgSqlStmt {
    Block(PlPgSqlStmtBlock),
    Assign(PlPgSqlStmtAssign),
    If(PlPgSqlStmtIf),
    Case(PlPgSqlStmtCase),
    Loop(PlPgSqlStmtLoop),
    While(PlPgSqlStmtWhile),
    Fori(PlPgSqlStmtFori),
    Fors(PlPgSqlStmtFors),
    Exit(PlPgSqlStmtExit),
    Return(PlPgSqlStmtReturn),
    ReturnNext(PlPgSqlStmtReturnNext),
    ReturnQuery(PlPgSqlStmtReturnQuery),
    Raise(PlPgSqlStmtRaise),
    Assert(PlPgSqlStmtAssert),
    ExecSql(PlPgSqlStmtExecSql),
    Perform(PlPgSqlStmtPerform),
    Getdiag(PlPgSqlStmtGetdiag),
    Null,
}

impl PlPgSqlStmt {
    /// Corresponds to `plpgsql_stmt_typename` in `pl_funcs.c`.
    pub fn typename(&self) -> &'static str {
        match self {
            Self::Block(_) => "statement block",
            Self::Assign(_) => "assignment",
            Self::If(_) => "IF",
            Self::Case(_) => "CASE",
            Self::Loop(_) => "LOOP",
            Self::While(_) => "WHILE",
            Self::Fori(_) => "FOR with integer loop variable",
            Self::Fors(_) => "FOR over SELECT rows",
            Self::Exit(stmt) => {
                if stmt.is_exit {
                    "EXIT"
                } else {
                    "CONTINUE"
                }
            }
            Self::Return(_) => "RETURN",
            Self::ReturnNext(_) => "RETURN NEXT",
            Self::ReturnQuery(_) => "RETURN QUERY",
            Self::Raise(_) => "RAISE",
            Self::Assert(_) => "ASSERT",
            Self::ExecSql(_) => "SQL statement",
            Self::Perform(_) => "PERFORM",
            Self::Getdiag(_) => "GET DIAGNOSTICS",
            Self::Null => "NULL",
        }
    }

    pub fn assign(target: &str, expr: &str) -> Self {
        Self::Assign(PlPgSqlStmtAssign {
            target: target.to_string(),
            expr: expr.into(),
        })
    }

    pub fn if_then(cond: &str, then_body: Vec<PlPgSqlStmt>, else_body: Vec<PlPgSqlStmt>) -> Self {
        Self::If(PlPgSqlStmtIf {
            cond: cond.into(),
            then_body,
            elsif_list: Vec::new(),
            else_body,
        })
    }

    pub fn loop_(label: Option<&str>, body: Vec<PlPgSqlStmt>) -> Self {
        Self::Loop(PlPgSqlStmtLoop {
            label: label.map(str::to_string),
            body,
        })
    }

    pub fn while_(label: Option<&str>, cond: &str, body: Vec<PlPgSqlStmt>) -> Self {
        Self::While(PlPgSqlStmtWhile {
            label: label.map(str::to_string),
            cond: cond.into(),
            body,
        })
    }

    pub fn exit(label: Option<&str>, cond: Option<&str>) -> Self {
        Self::Exit(PlPgSqlStmtExit {
            is_exit: true,
            label: label.map(str::to_string),
            cond: cond.map(PlPgSqlExpr::from),
        })
    }

    pub fn continue_(label: Option<&str>, cond: Option<&str>) -> Self {
        Self::Exit(PlPgSqlStmtExit {
            is_exit: false,
            label: label.map(str::to_string),
            cond: cond.map(PlPgSqlExpr::from),
        })
    }

    pub fn return_(expr: &str) -> Self {
        Self::Return(PlPgSqlStmtReturn {
            expr: Some(expr.into()),
        })
    }

    pub fn return_void() -> Self {
        Self::Return(PlPgSqlStmtReturn { expr: None })
    }

    pub fn return_next(expr: &str) -> Self {
        Self::ReturnNext(PlPgSqlStmtReturnNext {
            expr: Some(expr.into()),
        })
    }

    pub fn return_query(query: &str) -> Self {
        Self::ReturnQuery(PlPgSqlStmtReturnQuery {
            query: query.into(),
        })
    }

    pub fn raise(level: PlPgSqlRaiseLevel, message: &str, params: &[&str]) -> Self {
        Self::Raise(PlPgSqlStmtRaise {
            elog_level: level,
            condname: None,
            message: Some(message.to_string()),
            params: params.iter().map(|p| PlPgSqlExpr::from(*p)).collect(),
            options: Vec::new(),
        })
    }

    pub fn perform(expr: &str) -> Self {
        Self::Perform(PlPgSqlStmtPerform { expr: expr.into() })
    }

    /// Plain embedded SQL statement without INTO.
    pub fn sql(query: &str) -> Self {
        Self::ExecSql(PlPgSqlStmtExecSql {
            sqlstmt: query.into(),
            into: false,
            strict: false,
            target: Vec::new(),
        })
    }

    /// `SELECT ... INTO targets ...`, with the INTO clause already removed
    /// from `query`.
    pub fn select_into(query: &str, targets: &[&str], strict: bool) -> Self {
        Self::ExecSql(PlPgSqlStmtExecSql {
            sqlstmt: query.into(),
            into: true,
            strict,
            target: targets.iter().map(|t| t.to_string()).collect(),
        })
    }
}
