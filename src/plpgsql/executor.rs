//! PL/pgSQL statement executor.
//!
//! Statement dispatch follows `pl_exec.c`: each `exec_stmt_*` either
//! completes normally, hands a [`ControlSignal`] up to the enclosing loop or
//! block, or fails with a [`PlPgSqlError`] that unwinds the invocation.

use tracing::{debug, instrument, trace, warn};

use crate::catalog::routine::{
    FunctionDefinition, ReturnSpec, RoutineBody, RoutineKind, RoutineParam,
};
use crate::catalog::types::SqlType;
use crate::catalog::{RoutineCatalog, SearchPath, resolve_type_name};
use crate::commands::variable::{
    CaseNotFoundPolicy, MultipleRowsPolicy, Settings, UninitializedPolicy,
};
use crate::plpgsql::bridge;
use crate::plpgsql::coerce::{
    TypeContext, case_values_match, coerce_to_type, eval_condition, eval_integer, row_to_record,
};
use crate::plpgsql::diagnostics::{NoticeLog, RaisedNotice, build_notice, format_raise_message};
use crate::plpgsql::error::{InvocationError, PlPgSqlError};
use crate::plpgsql::result::{ResultStream, RoutineResult};
use crate::plpgsql::scanner::{PlPgSqlTokenKind, extract_sql_expression, tokenize};
use crate::plpgsql::scope::{InvocationFrame, VarRef, Variable};
use crate::plpgsql::types::{
    PlPgSqlDecl, PlPgSqlExpr, PlPgSqlGetdiagKind, PlPgSqlStmt, PlPgSqlStmtAssert,
    PlPgSqlStmtAssign, PlPgSqlStmtBlock, PlPgSqlStmtCase, PlPgSqlStmtExecSql, PlPgSqlStmtExit,
    PlPgSqlStmtFori, PlPgSqlStmtFors, PlPgSqlStmtGetdiag, PlPgSqlStmtIf, PlPgSqlStmtLoop,
    PlPgSqlStmtPerform, PlPgSqlStmtRaise, PlPgSqlStmtReturn, PlPgSqlStmtReturnNext,
    PlPgSqlStmtReturnQuery, PlPgSqlStmtWhile,
};
use crate::storage::tuple::{RecordField, RecordValue, ScalarValue};
use crate::tcop::engine::{EngineError, QueryResult, SqlExecutor};

/// Everything an invocation borrows from its caller.
pub struct InvocationContext<'a> {
    pub executor: &'a mut dyn SqlExecutor,
    pub catalog: &'a dyn RoutineCatalog,
    pub settings: &'a Settings,
    /// Number of routine invocations already active below this one.
    pub depth: usize,
}

/// A completed invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub result: RoutineResult,
    pub notices: Vec<RaisedNotice>,
}

/// Non-error interruption of the statement walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    Exit(Option<String>),
    Continue(Option<String>),
    Return,
}

type ExecResult = Result<Option<ControlSignal>, PlPgSqlError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
}

impl TriggerTiming {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

impl TriggerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Row-level trigger firing, as `TriggerData` in `commands/trigger.h`.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerData {
    pub trigger_name: String,
    pub timing: TriggerTiming,
    pub event: TriggerEvent,
    pub table_schema: String,
    pub table_name: String,
    pub new: Option<RecordValue>,
    pub old: Option<RecordValue>,
    pub args: Vec<String>,
}

/// Runs `definition` with bound input arguments.
#[instrument(skip_all, fields(routine = %definition.signature(), depth = ctx.depth))]
pub fn invoke(
    definition: &FunctionDefinition,
    args: Vec<ScalarValue>,
    ctx: &mut InvocationContext<'_>,
) -> Result<Invocation, InvocationError> {
    let early = |error: PlPgSqlError| InvocationError {
        error,
        context: call_context(definition, None),
        notices: Vec::new(),
    };
    if definition.is_trigger() {
        return Err(early(PlPgSqlError::TriggerCalledDirectly));
    }
    check_call(definition, args.len(), ctx).map_err(early)?;
    if definition.strict && args.iter().any(ScalarValue::is_null) {
        debug!("strict routine called with NULL argument, body skipped");
        return Ok(Invocation {
            result: null_result(definition),
            notices: Vec::new(),
        });
    }

    let mut estate = PLpgSQLExecState::new(definition, ctx);
    let outcome = estate.exec_function(args, None);
    estate.finish(outcome)
}

/// Runs a trigger function for one row event. The result is the row to use
/// (NEW, OLD or a modified record) or NULL to skip the operation.
#[instrument(skip_all, fields(routine = %definition.signature(), trigger = %trigger.trigger_name))]
pub fn invoke_trigger(
    definition: &FunctionDefinition,
    trigger: &TriggerData,
    ctx: &mut InvocationContext<'_>,
) -> Result<Invocation, InvocationError> {
    let early = |error: PlPgSqlError| InvocationError {
        error,
        context: call_context(definition, None),
        notices: Vec::new(),
    };
    if !definition.is_trigger() {
        return Err(early(PlPgSqlError::NotATriggerFunction {
            routine: definition.signature(),
        }));
    }
    check_call(definition, 0, ctx).map_err(early)?;

    let mut estate = PLpgSQLExecState::new(definition, ctx);
    let outcome = estate.exec_function(Vec::new(), Some(trigger));
    estate.finish(outcome)
}

fn check_call(
    definition: &FunctionDefinition,
    nargs: usize,
    ctx: &InvocationContext<'_>,
) -> Result<(), PlPgSqlError> {
    let expected = definition.input_params().count();
    if nargs != expected {
        return Err(PlPgSqlError::ArgumentCount {
            routine: definition.signature(),
            expected,
            got: nargs,
        });
    }
    if ctx.depth >= ctx.settings.max_stack_depth {
        return Err(PlPgSqlError::StackDepthExceeded {
            limit: ctx.settings.max_stack_depth,
        });
    }
    Ok(())
}

fn null_result(definition: &FunctionDefinition) -> RoutineResult {
    if definition.returns_set() {
        RoutineResult::Set(ResultStream::default())
    } else if definition.returns == ReturnSpec::Void {
        RoutineResult::Void
    } else {
        RoutineResult::Value(ScalarValue::Null)
    }
}

fn call_context(definition: &FunctionDefinition, stmt: Option<&str>) -> String {
    let prefix = match definition.body {
        RoutineBody::Sql(_) => format!("SQL function \"{}\"", definition.name),
        RoutineBody::PlPgSql(_) => format!("PL/pgSQL function {}", definition.signature()),
    };
    match stmt {
        Some(stmt) => format!("{prefix} at {stmt}"),
        None => prefix,
    }
}

fn param_ref(position: usize, param: &RoutineParam) -> String {
    if param.name.is_empty() {
        format!("${}", position + 1)
    } else {
        param.name.clone()
    }
}

fn label_matches(label: Option<&str>, target: &str) -> bool {
    label.is_some_and(|label| label.eq_ignore_ascii_case(target))
}

/// Execution state of one invocation, as `PLpgSQL_execstate` in
/// `plpgsql.h`.
struct PLpgSQLExecState<'a, 'ctx> {
    func: &'a FunctionDefinition,
    ctx: &'a mut InvocationContext<'ctx>,
    search_path: SearchPath,
    frame: InvocationFrame,
    notices: NoticeLog,
    retval: Option<ScalarValue>,
    tuple_store: Option<ResultStream>,
    found_slot: usize,
    row_count: u64,
    err_stmt: Option<&'static str>,
}

impl<'a, 'ctx> PLpgSQLExecState<'a, 'ctx> {
    fn new(func: &'a FunctionDefinition, ctx: &'a mut InvocationContext<'ctx>) -> Self {
        let search_path = ctx.settings.search_path();
        let notices = NoticeLog::new(ctx.settings.client_min_messages);
        Self {
            func,
            ctx,
            search_path,
            frame: InvocationFrame::new(),
            notices,
            retval: None,
            tuple_store: None,
            found_slot: 0,
            row_count: 0,
            err_stmt: None,
        }
    }

    fn exec_function(
        &mut self,
        args: Vec<ScalarValue>,
        trigger: Option<&TriggerData>,
    ) -> Result<RoutineResult, PlPgSqlError> {
        let func = self.func;
        if let RoutineBody::PlPgSql(block) = &func.body {
            validate_labels(block)?;
        }

        self.frame.push_scope(None);
        self.found_slot = self.frame.declare(Variable::new(
            "found",
            SqlType::Bool,
            ScalarValue::Bool(false),
        ))?;
        self.frame.push_scope(Some(&func.name));
        self.bind_parameters(args)?;
        if let Some(trigger) = trigger {
            self.bind_trigger_data(trigger)?;
        }
        if func.returns_set() {
            let columns = self.result_columns()?;
            self.tuple_store = Some(ResultStream::new(columns));
        }

        match &func.body {
            RoutineBody::PlPgSql(block) => {
                self.exec_stmt_block(block)?;
                self.build_result()
            }
            RoutineBody::Sql(body) => self.exec_sql_body(body),
        }
    }

    fn finish(
        self,
        outcome: Result<RoutineResult, PlPgSqlError>,
    ) -> Result<Invocation, InvocationError> {
        let notices = self.notices.into_notices();
        match outcome {
            Ok(result) => Ok(Invocation { result, notices }),
            Err(error) => {
                debug!(sqlstate = error.sqlstate(), %error, "routine failed");
                Err(InvocationError {
                    context: call_context(self.func, self.err_stmt),
                    error,
                    notices,
                })
            }
        }
    }

    fn bind_parameters(&mut self, args: Vec<ScalarValue>) -> Result<(), PlPgSqlError> {
        let func = self.func;
        let mut args = args.into_iter();
        for (position, param) in func.params.iter().enumerate() {
            let value = if param.is_input() {
                let raw = args.next().unwrap_or(ScalarValue::Null);
                self.coerce(raw, &param.sql_type)?
            } else {
                ScalarValue::Null
            };
            let name = param_ref(position, param);
            self.frame
                .declare(Variable::new(&name, param.sql_type.clone(), value))?;
            if !param.name.is_empty() {
                self.frame.alias(&format!("${}", position + 1), &name)?;
            }
        }
        if let ReturnSpec::Table(columns) = &func.returns {
            for (name, sql_type) in columns {
                self.frame
                    .declare(Variable::new(name, sql_type.clone(), ScalarValue::Null))?;
            }
        }
        Ok(())
    }

    fn bind_trigger_data(&mut self, trigger: &TriggerData) -> Result<(), PlPgSqlError> {
        let row_type = SqlType::Composite(trigger.table_name.clone());
        let record = |row: &Option<RecordValue>| {
            row.clone()
                .map(ScalarValue::Record)
                .unwrap_or(ScalarValue::Null)
        };
        let text = |value: &str| ScalarValue::Text(value.to_string());

        self.frame
            .declare(Variable::new("new", row_type.clone(), record(&trigger.new)))?;
        self.frame
            .declare(Variable::new("old", row_type, record(&trigger.old)))?;
        for (name, value) in [
            ("tg_name", text(&trigger.trigger_name)),
            ("tg_when", text(trigger.timing.as_str())),
            ("tg_level", text("ROW")),
            ("tg_op", text(trigger.event.as_str())),
            ("tg_table_name", text(&trigger.table_name)),
            ("tg_relname", text(&trigger.table_name)),
            ("tg_table_schema", text(&trigger.table_schema)),
        ] {
            self.frame.declare(Variable::new(name, SqlType::Text, value))?;
        }
        self.frame.declare(Variable::new(
            "tg_nargs",
            SqlType::Int4,
            ScalarValue::Int(trigger.args.len() as i64),
        ))?;
        Ok(())
    }

    /// Output parameters (or RETURNS TABLE columns) by variable reference.
    fn output_columns(&self) -> Vec<(String, SqlType)> {
        if let ReturnSpec::Table(columns) = &self.func.returns {
            return columns.clone();
        }
        self.func
            .params
            .iter()
            .enumerate()
            .filter(|(_, param)| param.is_output())
            .map(|(position, param)| (param_ref(position, param), param.sql_type.clone()))
            .collect()
    }

    fn result_columns(&self) -> Result<Vec<(String, SqlType)>, PlPgSqlError> {
        match &self.func.returns {
            ReturnSpec::Table(columns) => Ok(columns.clone()),
            ReturnSpec::SetOf(SqlType::Composite(name)) => {
                let composite = self.types().composite(name)?;
                Ok(composite.fields)
            }
            ReturnSpec::SetOf(SqlType::Record) => Ok(self.output_columns()),
            ReturnSpec::SetOf(sql_type) => Ok(vec![(self.func.name.clone(), sql_type.clone())]),
            _ => Ok(Vec::new()),
        }
    }

    fn build_result(&mut self) -> Result<RoutineResult, PlPgSqlError> {
        let func = self.func;
        if func.returns_set() {
            return Ok(RoutineResult::Set(self.tuple_store.take().unwrap_or_default()));
        }
        if func.kind == RoutineKind::Procedure || func.returns == ReturnSpec::Void {
            return Ok(match self.output_record()? {
                Some(record) => RoutineResult::Value(record),
                None => RoutineResult::Void,
            });
        }
        match self.retval.take() {
            Some(value) => Ok(RoutineResult::Value(value)),
            None => match self.output_record()? {
                Some(record) => Ok(RoutineResult::Value(record)),
                None => Err(PlPgSqlError::MissingReturn),
            },
        }
    }

    /// Values of the output parameters: the bare value for a function with a
    /// single one, otherwise a record.
    fn output_record(&self) -> Result<Option<ScalarValue>, PlPgSqlError> {
        let outputs = self.output_columns();
        if outputs.is_empty() {
            return Ok(None);
        }
        if outputs.len() == 1 && self.func.kind == RoutineKind::Function {
            return self.frame.get(&outputs[0].0).map(Some);
        }
        let fields = outputs
            .into_iter()
            .map(|(name, sql_type)| {
                Ok(RecordField {
                    value: self.frame.get(&name)?,
                    name,
                    sql_type,
                })
            })
            .collect::<Result<Vec<_>, PlPgSqlError>>()?;
        Ok(Some(ScalarValue::Record(RecordValue {
            type_name: None,
            fields,
        })))
    }

    fn exec_sql_body(&mut self, body: &str) -> Result<RoutineResult, PlPgSqlError> {
        let mut last = None;
        for sql in split_sql_statements(body)? {
            self.check_for_interrupts()?;
            last = Some(self.exec_run_sql(&sql)?);
        }

        let func = self.func;
        if func.kind == RoutineKind::Procedure || func.returns == ReturnSpec::Void {
            return Ok(RoutineResult::Void);
        }
        let result = last.unwrap_or_else(|| QueryResult::command("", 0));
        if func.returns_set() {
            let mut store = self.tuple_store.take().unwrap_or_default();
            store.set_columns_if_empty(
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(result.column_types.iter().cloned())
                    .collect(),
            );
            let columns = store.columns().to_vec();
            for row in result.rows {
                store.push(self.conform_row(row, &columns)?);
            }
            return Ok(RoutineResult::Set(store));
        }

        let Some(row) = result.rows.into_iter().next() else {
            return Ok(RoutineResult::Value(ScalarValue::Null));
        };
        let value = match &func.returns {
            ReturnSpec::Scalar(sql_type) if sql_type.is_composite() && row.len() != 1 => {
                ScalarValue::Record(row_to_record(&result.columns, row))
            }
            _ => row.into_iter().next().unwrap_or(ScalarValue::Null),
        };
        Ok(RoutineResult::Value(self.coerce_return_value(value)?))
    }

    fn types(&self) -> TypeContext<'_> {
        TypeContext {
            catalog: self.ctx.catalog,
            search_path: &self.search_path,
        }
    }

    fn coerce(&self, value: ScalarValue, target: &SqlType) -> Result<ScalarValue, PlPgSqlError> {
        coerce_to_type(value, target, &self.types())
    }

    fn check_for_interrupts(&self) -> Result<(), PlPgSqlError> {
        Ok(self.ctx.executor.check_for_interrupts()?)
    }

    fn exec_run_sql(&mut self, sql: &str) -> Result<QueryResult, PlPgSqlError> {
        bridge::execute_with_variables(&self.frame, &mut *self.ctx.executor, &mut self.notices, sql)
    }

    /// Equivalent of `exec_eval_expr` (`pl_exec.c`).
    fn exec_eval_expr(&mut self, expr: &PlPgSqlExpr) -> Result<ScalarValue, PlPgSqlError> {
        bridge::eval_expr(&self.frame, &mut *self.ctx.executor, &mut self.notices, &expr.query)
    }

    /// Boolean condition; NULL counts as false.
    fn exec_eval_boolean(&mut self, expr: &PlPgSqlExpr) -> Result<bool, PlPgSqlError> {
        let value = self.exec_eval_expr(expr)?;
        Ok(eval_condition(&value)?.unwrap_or(false))
    }

    fn exec_eval_integer(&mut self, expr: &PlPgSqlExpr) -> Result<Option<i64>, PlPgSqlError> {
        let value = self.exec_eval_expr(expr)?;
        eval_integer(&value)
    }

    fn set_found(&mut self, state: bool) -> Result<(), PlPgSqlError> {
        self.frame.store(self.found_slot, ScalarValue::Bool(state))
    }

    fn with_scope<T>(
        &mut self,
        label: Option<&str>,
        body: impl FnOnce(&mut Self) -> Result<T, PlPgSqlError>,
    ) -> Result<T, PlPgSqlError> {
        self.frame.push_scope(label);
        let result = body(self);
        self.frame.pop_scope();
        result
    }

    fn exec_stmts(&mut self, stmts: &[PlPgSqlStmt]) -> ExecResult {
        for stmt in stmts {
            self.check_for_interrupts()?;
            trace!(stmt = stmt.typename(), "exec");
            let rc = match self.exec_stmt(stmt) {
                Ok(rc) => rc,
                Err(err) => {
                    self.err_stmt.get_or_insert(stmt.typename());
                    return Err(err);
                }
            };
            if rc.is_some() {
                return Ok(rc);
            }
        }
        Ok(None)
    }

    fn exec_stmt(&mut self, stmt: &PlPgSqlStmt) -> ExecResult {
        match stmt {
            PlPgSqlStmt::Block(stmt) => self.exec_stmt_block(stmt),
            PlPgSqlStmt::Assign(stmt) => self.exec_stmt_assign(stmt),
            PlPgSqlStmt::If(stmt) => self.exec_stmt_if(stmt),
            PlPgSqlStmt::Case(stmt) => self.exec_stmt_case(stmt),
            PlPgSqlStmt::Loop(stmt) => self.exec_stmt_loop(stmt),
            PlPgSqlStmt::While(stmt) => self.exec_stmt_while(stmt),
            PlPgSqlStmt::Fori(stmt) => self.exec_stmt_fori(stmt),
            PlPgSqlStmt::Fors(stmt) => self.exec_stmt_fors(stmt),
            PlPgSqlStmt::Exit(stmt) => self.exec_stmt_exit(stmt),
            PlPgSqlStmt::Return(stmt) => self.exec_stmt_return(stmt),
            PlPgSqlStmt::ReturnNext(stmt) => self.exec_stmt_return_next(stmt),
            PlPgSqlStmt::ReturnQuery(stmt) => self.exec_stmt_return_query(stmt),
            PlPgSqlStmt::Raise(stmt) => self.exec_stmt_raise(stmt),
            PlPgSqlStmt::Assert(stmt) => self.exec_stmt_assert(stmt),
            PlPgSqlStmt::ExecSql(stmt) => self.exec_stmt_execsql(stmt),
            PlPgSqlStmt::Perform(stmt) => self.exec_stmt_perform(stmt),
            PlPgSqlStmt::Getdiag(stmt) => self.exec_stmt_getdiag(stmt),
            PlPgSqlStmt::Null => Ok(None),
        }
    }

    fn exec_stmt_block(&mut self, block: &PlPgSqlStmtBlock) -> ExecResult {
        let rc = self.with_scope(block.label.as_deref(), |estate| {
            for decl in &block.decls {
                estate.exec_decl(decl)?;
            }
            estate.exec_stmts(&block.body)
        })?;
        match rc {
            Some(ControlSignal::Exit(Some(label)))
                if label_matches(block.label.as_deref(), &label) =>
            {
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn exec_decl(&mut self, decl: &PlPgSqlDecl) -> Result<(), PlPgSqlError> {
        match decl {
            PlPgSqlDecl::Var(var) => {
                let sql_type =
                    resolve_type_name(self.ctx.catalog, &self.search_path, &var.datatype.typname)?;
                let initial = match &var.default_val {
                    Some(expr) => {
                        let value = self.exec_eval_expr(expr)?;
                        self.coerce(value, &sql_type)?
                    }
                    None => match self.ctx.settings.uninitialized_variables {
                        UninitializedPolicy::TypeDefault => sql_type.zero_value(),
                        UninitializedPolicy::Null => ScalarValue::Null,
                    },
                };
                let mut variable = Variable::new(&var.refname, sql_type, ScalarValue::Null);
                variable.constant = var.isconst;
                variable.not_null = var.notnull;
                let slot = self.frame.declare(variable)?;
                self.frame.initialize(slot, initial)
            }
            PlPgSqlDecl::Alias { name, target } => self.frame.alias(name, target),
        }
    }

    fn exec_stmt_assign(&mut self, stmt: &PlPgSqlStmtAssign) -> ExecResult {
        let value = self.exec_eval_expr(&stmt.expr)?;
        let target = self.frame.resolve(&stmt.target)?;
        self.exec_assign_value(&target, value)?;
        Ok(None)
    }

    /// Equivalent of `exec_assign_value`: casts to the target's type and
    /// stores, field by field for `record.field` targets.
    fn exec_assign_value(
        &mut self,
        target: &VarRef,
        value: ScalarValue,
    ) -> Result<(), PlPgSqlError> {
        match target {
            VarRef::Slot(slot) => {
                let sql_type = self.frame.variable(*slot).sql_type.clone();
                let value = self.coerce(value, &sql_type)?;
                self.frame.store(*slot, value)
            }
            VarRef::Field { slot, field } => {
                let variable = self.frame.variable(*slot);
                let mut record = match &variable.value {
                    ScalarValue::Record(record) => record.clone(),
                    _ => self.empty_record(&variable.sql_type, &variable.name)?,
                };
                let Some(target_field) = record.field_mut(field) else {
                    return Err(PlPgSqlError::UnknownRecordField {
                        record: self.frame.variable(*slot).name.clone(),
                        field: field.clone(),
                    });
                };
                let field_type = target_field.sql_type.clone();
                target_field.value = coerce_to_type(value, &field_type, &self.types())?;
                self.frame.store(*slot, ScalarValue::Record(record))
            }
        }
    }

    fn empty_record(&self, sql_type: &SqlType, name: &str) -> Result<RecordValue, PlPgSqlError> {
        let SqlType::Composite(type_name) = sql_type else {
            return Err(PlPgSqlError::UnassignedRecord {
                name: name.to_string(),
            });
        };
        let composite = self.types().composite(type_name)?;
        Ok(RecordValue {
            type_name: Some(composite.name),
            fields: composite
                .fields
                .into_iter()
                .map(|(name, sql_type)| RecordField {
                    name,
                    sql_type,
                    value: ScalarValue::Null,
                })
                .collect(),
        })
    }

    fn exec_stmt_if(&mut self, stmt: &PlPgSqlStmtIf) -> ExecResult {
        if self.exec_eval_boolean(&stmt.cond)? {
            return self.exec_stmts(&stmt.then_body);
        }
        for elsif in &stmt.elsif_list {
            if self.exec_eval_boolean(&elsif.cond)? {
                return self.exec_stmts(&elsif.stmts);
            }
        }
        self.exec_stmts(&stmt.else_body)
    }

    fn exec_stmt_case(&mut self, stmt: &PlPgSqlStmtCase) -> ExecResult {
        match &stmt.t_expr {
            Some(t_expr) => {
                let t_val = self.exec_eval_expr(t_expr)?;
                for when in &stmt.case_when_list {
                    for expr in &when.exprs {
                        let candidate = self.exec_eval_expr(expr)?;
                        if case_values_match(&t_val, &candidate)? {
                            return self.exec_stmts(&when.stmts);
                        }
                    }
                }
            }
            None => {
                for when in &stmt.case_when_list {
                    for expr in &when.exprs {
                        if self.exec_eval_boolean(expr)? {
                            return self.exec_stmts(&when.stmts);
                        }
                    }
                }
            }
        }

        match &stmt.else_stmts {
            Some(stmts) => self.exec_stmts(stmts),
            None => match self.ctx.settings.case_not_found {
                CaseNotFoundPolicy::Error => Err(PlPgSqlError::CaseNotFound),
                CaseNotFoundPolicy::Ignore => {
                    warn!("CASE matched no WHEN and has no ELSE, continuing");
                    Ok(None)
                }
            },
        }
    }

    fn exec_stmt_loop(&mut self, stmt: &PlPgSqlStmtLoop) -> ExecResult {
        loop {
            self.check_for_interrupts()?;
            let rc = self.exec_stmts(&stmt.body)?;
            match process_loop_rc(stmt.label.as_deref(), rc) {
                LoopControl::Continue => continue,
                LoopControl::Break => return Ok(None),
                LoopControl::Propagate(signal) => return Ok(Some(signal)),
            }
        }
    }

    fn exec_stmt_while(&mut self, stmt: &PlPgSqlStmtWhile) -> ExecResult {
        loop {
            self.check_for_interrupts()?;
            if !self.exec_eval_boolean(&stmt.cond)? {
                return Ok(None);
            }
            let rc = self.exec_stmts(&stmt.body)?;
            match process_loop_rc(stmt.label.as_deref(), rc) {
                LoopControl::Continue => continue,
                LoopControl::Break => return Ok(None),
                LoopControl::Propagate(signal) => return Ok(Some(signal)),
            }
        }
    }

    /// Integer FOR loop, as `exec_stmt_fori`.
    fn exec_stmt_fori(&mut self, stmt: &PlPgSqlStmtFori) -> ExecResult {
        let lower = self
            .exec_eval_integer(&stmt.lower)?
            .ok_or(PlPgSqlError::NullLoopBound { bound: "lower bound" })?;
        let upper = self
            .exec_eval_integer(&stmt.upper)?
            .ok_or(PlPgSqlError::NullLoopBound { bound: "upper bound" })?;
        let step = match &stmt.step {
            Some(step) => {
                let step = self
                    .exec_eval_integer(step)?
                    .ok_or(PlPgSqlError::NullLoopBound { bound: "BY value" })?;
                if step <= 0 {
                    return Err(PlPgSqlError::InvalidLoopStep);
                }
                step
            }
            None => 1,
        };

        self.with_scope(stmt.label.as_deref(), |estate| {
            let slot = estate.frame.declare(Variable::new(
                &stmt.var,
                SqlType::Int4,
                ScalarValue::Int(lower),
            ))?;
            let mut loop_value = lower;
            let mut found = false;

            let rc = loop {
                estate.check_for_interrupts()?;
                let done = if stmt.reverse {
                    loop_value < upper
                } else {
                    loop_value > upper
                };
                if done {
                    break None;
                }

                found = true;
                estate.frame.store(slot, ScalarValue::Int(loop_value))?;
                let rc = estate.exec_stmts(&stmt.body)?;
                match process_loop_rc(stmt.label.as_deref(), rc) {
                    LoopControl::Continue => {}
                    LoopControl::Break => break None,
                    LoopControl::Propagate(signal) => break Some(signal),
                }

                let next = if stmt.reverse {
                    loop_value.checked_sub(step)
                } else {
                    loop_value.checked_add(step)
                };
                match next {
                    Some(next) => loop_value = next,
                    None => break None,
                }
            };

            estate.set_found(found)?;
            Ok(rc)
        })
    }

    /// Query FOR loop, as `exec_stmt_fors`; rows are assigned to the
    /// targets the way SELECT INTO assigns them.
    fn exec_stmt_fors(&mut self, stmt: &PlPgSqlStmtFors) -> ExecResult {
        let targets = self.resolve_targets(&stmt.target)?;
        let result = self.exec_run_sql(&stmt.query.query)?;
        let columns = result.columns;
        let mut found = false;
        let mut rc = None;

        for row in result.rows {
            self.check_for_interrupts()?;
            found = true;
            self.exec_move_row(&targets, &columns, Some(row))?;
            let body_rc = self.exec_stmts(&stmt.body)?;
            match process_loop_rc(stmt.label.as_deref(), body_rc) {
                LoopControl::Continue => {}
                LoopControl::Break => break,
                LoopControl::Propagate(signal) => {
                    rc = Some(signal);
                    break;
                }
            }
        }

        self.set_found(found)?;
        Ok(rc)
    }

    fn exec_stmt_exit(&mut self, stmt: &PlPgSqlStmtExit) -> ExecResult {
        if let Some(cond) = &stmt.cond
            && !self.exec_eval_boolean(cond)?
        {
            return Ok(None);
        }
        let label = stmt.label.as_ref().map(|label| label.to_ascii_lowercase());
        Ok(Some(if stmt.is_exit {
            ControlSignal::Exit(label)
        } else {
            ControlSignal::Continue(label)
        }))
    }

    fn exec_stmt_return(&mut self, stmt: &PlPgSqlStmtReturn) -> ExecResult {
        let func = self.func;
        let Some(expr) = &stmt.expr else {
            let needs_value = !func.returns_set()
                && func.kind == RoutineKind::Function
                && func.returns != ReturnSpec::Void
                && self.output_columns().is_empty();
            if needs_value {
                return Err(PlPgSqlError::InvalidReturn {
                    message: "missing expression in RETURN for function returning a value"
                        .to_string(),
                });
            }
            return Ok(Some(ControlSignal::Return));
        };

        let refusal = if func.returns_set() {
            Some("RETURN cannot have a parameter in function returning set")
        } else if func.kind == RoutineKind::Procedure {
            Some("RETURN cannot have a parameter in a procedure")
        } else if func.returns == ReturnSpec::Void {
            Some("RETURN cannot have a parameter in function returning void")
        } else if !self.output_columns().is_empty() {
            Some("RETURN cannot have a parameter in function with OUT parameters")
        } else {
            None
        };
        if let Some(message) = refusal {
            return Err(PlPgSqlError::InvalidReturn {
                message: message.to_string(),
            });
        }

        let value = self.exec_eval_expr(expr)?;
        self.retval = Some(self.coerce_return_value(value)?);
        Ok(Some(ControlSignal::Return))
    }

    fn coerce_return_value(&self, value: ScalarValue) -> Result<ScalarValue, PlPgSqlError> {
        match &self.func.returns {
            ReturnSpec::Scalar(SqlType::Trigger) => match value {
                ScalarValue::Null | ScalarValue::Record(_) => Ok(value),
                _ => Err(PlPgSqlError::InvalidReturn {
                    message: "trigger function must return a row or NULL".to_string(),
                }),
            },
            ReturnSpec::Scalar(sql_type) => self.coerce(value, sql_type),
            _ => Ok(value),
        }
    }

    fn exec_stmt_return_next(&mut self, stmt: &PlPgSqlStmtReturnNext) -> ExecResult {
        if !self.func.returns_set() {
            return Err(PlPgSqlError::InvalidReturn {
                message: "cannot use RETURN NEXT in a non-SETOF function".to_string(),
            });
        }
        let outputs = self.output_columns();
        let row = match &stmt.expr {
            Some(_) if !outputs.is_empty() => {
                return Err(PlPgSqlError::InvalidReturn {
                    message: "RETURN NEXT cannot have a parameter in function with OUT parameters"
                        .to_string(),
                });
            }
            Some(expr) => {
                let value = self.exec_eval_expr(expr)?;
                self.value_to_row(value)?
            }
            None => outputs
                .iter()
                .map(|(name, _)| self.frame.get(name))
                .collect::<Result<Vec<_>, PlPgSqlError>>()?,
        };
        if let Some(store) = self.tuple_store.as_mut() {
            store.push(row);
        }
        Ok(None)
    }

    fn store_columns(&self) -> Vec<(String, SqlType)> {
        self.tuple_store
            .as_ref()
            .map(|store| store.columns().to_vec())
            .unwrap_or_default()
    }

    /// Shapes a RETURN NEXT value into a row of the result columns.
    fn value_to_row(&mut self, value: ScalarValue) -> Result<Vec<ScalarValue>, PlPgSqlError> {
        let columns = self.store_columns();
        match value {
            ScalarValue::Record(record) if columns.len() != 1 || columns[0].1.is_composite() => {
                if columns.is_empty()
                    && let Some(store) = self.tuple_store.as_mut()
                {
                    store.set_columns_if_empty(
                        record
                            .fields
                            .iter()
                            .map(|field| (field.name.clone(), field.sql_type.clone()))
                            .collect(),
                    );
                    return Ok(record.values());
                }
                if columns.len() == 1 {
                    return Ok(vec![self.coerce(ScalarValue::Record(record), &columns[0].1)?]);
                }
                self.conform_row(record.values(), &columns)
            }
            ScalarValue::Null if columns.len() != 1 => Ok(vec![ScalarValue::Null; columns.len()]),
            other => match columns.first() {
                Some((_, sql_type)) => Ok(vec![self.coerce(other, sql_type)?]),
                None => Ok(vec![other]),
            },
        }
    }

    /// Casts a query row to the result columns.
    fn conform_row(
        &self,
        row: Vec<ScalarValue>,
        columns: &[(String, SqlType)],
    ) -> Result<Vec<ScalarValue>, PlPgSqlError> {
        let row = match row.as_slice() {
            [ScalarValue::Record(record)] if columns.len() > 1 => record.values(),
            _ => row,
        };
        if row.len() != columns.len() {
            return Err(PlPgSqlError::RowShape {
                message: format!(
                    "structure of query does not match function result type: \
                     returned {} columns, expected {}",
                    row.len(),
                    columns.len()
                ),
            });
        }
        row.into_iter()
            .zip(columns)
            .map(|(value, (_, sql_type))| self.coerce(value, sql_type))
            .collect()
    }

    fn exec_stmt_return_query(&mut self, stmt: &PlPgSqlStmtReturnQuery) -> ExecResult {
        if !self.func.returns_set() {
            return Err(PlPgSqlError::InvalidReturn {
                message: "cannot use RETURN QUERY in a non-SETOF function".to_string(),
            });
        }
        let result = self.exec_run_sql(&stmt.query.query)?;
        let count = result.rows.len();
        if let Some(store) = self.tuple_store.as_mut() {
            store.set_columns_if_empty(
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(result.column_types.iter().cloned())
                    .collect(),
            );
        }
        let columns = self.store_columns();
        for row in result.rows {
            let row = self.conform_row(row, &columns)?;
            if let Some(store) = self.tuple_store.as_mut() {
                store.push(row);
            }
        }
        self.row_count = count as u64;
        self.set_found(count > 0)?;
        Ok(None)
    }

    fn exec_stmt_raise(&mut self, stmt: &PlPgSqlStmtRaise) -> ExecResult {
        if stmt.message.is_none() && stmt.condname.is_none() && stmt.options.is_empty() {
            return Err(PlPgSqlError::ReraiseOutsideHandler);
        }

        let mut params = Vec::with_capacity(stmt.params.len());
        for param in &stmt.params {
            params.push(self.exec_eval_expr(param)?);
        }
        let formatted = stmt
            .message
            .as_deref()
            .map(|template| format_raise_message(template, &params))
            .transpose()?;

        let mut options = Vec::with_capacity(stmt.options.len());
        for option in &stmt.options {
            let value = self.exec_eval_expr(&option.expr)?;
            if value.is_null() {
                return Err(PlPgSqlError::RaiseOptionNull);
            }
            options.push((option.opt_type, value.render()));
        }

        let notice = build_notice(stmt.elog_level, stmt.condname.as_deref(), formatted, &options)?;
        if notice.is_exception() {
            let err = notice.to_error();
            self.notices.emit(notice);
            return Err(err);
        }
        self.notices.emit(notice);
        Ok(None)
    }

    fn exec_stmt_assert(&mut self, stmt: &PlPgSqlStmtAssert) -> ExecResult {
        if self.exec_eval_boolean(&stmt.cond)? {
            return Ok(None);
        }
        let message = match &stmt.message {
            Some(expr) => match self.exec_eval_expr(expr)? {
                ScalarValue::Null => None,
                value => Some(value.render()),
            },
            None => None,
        };
        Err(PlPgSqlError::AssertFailure {
            message: message.unwrap_or_else(|| "assertion failed".to_string()),
        })
    }

    fn exec_stmt_execsql(&mut self, stmt: &PlPgSqlStmtExecSql) -> ExecResult {
        let result = self.exec_run_sql(&stmt.sqlstmt.query)?;
        if stmt.into {
            self.row_count = result.rows.len() as u64;
            self.exec_select_into_targets(stmt, result)?;
            return Ok(None);
        }
        if result.is_select() && !result.columns.is_empty() {
            return Err(PlPgSqlError::NoResultDestination);
        }
        self.row_count = result.rows_affected;
        self.set_found(self.row_count > 0)?;
        Ok(None)
    }

    fn resolve_targets(&self, names: &[String]) -> Result<Vec<VarRef>, PlPgSqlError> {
        names.iter().map(|name| self.frame.resolve(name)).collect()
    }

    fn exec_select_into_targets(
        &mut self,
        stmt: &PlPgSqlStmtExecSql,
        result: QueryResult,
    ) -> Result<(), PlPgSqlError> {
        let targets = self.resolve_targets(&stmt.target)?;
        let row_count = result.rows.len();
        if stmt.strict {
            match row_count {
                0 => return Err(PlPgSqlError::NoDataFound),
                1 => {}
                _ => return Err(PlPgSqlError::TooManyRows),
            }
        } else if row_count > 1 {
            match self.ctx.settings.select_into_multiple_rows {
                MultipleRowsPolicy::Error => return Err(PlPgSqlError::TooManyRows),
                MultipleRowsPolicy::FirstRow => {
                    debug!(rows = row_count, "SELECT INTO kept the first of several rows");
                }
            }
        }

        let row = result.rows.into_iter().next();
        self.exec_move_row(&targets, &result.columns, row)?;
        self.set_found(row_count > 0)
    }

    /// Equivalent of `exec_move_row`: a single composite target takes the
    /// whole row, otherwise columns go to targets positionally. A missing
    /// row assigns NULLs.
    fn exec_move_row(
        &mut self,
        targets: &[VarRef],
        columns: &[String],
        row: Option<Vec<ScalarValue>>,
    ) -> Result<(), PlPgSqlError> {
        if let [target @ VarRef::Slot(_)] = targets
            && self.frame.type_of(target).is_composite()
        {
            let value = match row {
                None => ScalarValue::Null,
                Some(mut values) => match self.frame.type_of(target) {
                    SqlType::Composite(_)
                        if values.len() == 1 && matches!(values[0], ScalarValue::Record(_)) =>
                    {
                        values.remove(0)
                    }
                    SqlType::Composite(_) => {
                        ScalarValue::Record(RecordValue::anonymous(values))
                    }
                    _ => ScalarValue::Record(row_to_record(columns, values)),
                },
            };
            return self.exec_assign_value(target, value);
        }

        let mut values = row.unwrap_or_default().into_iter();
        for target in targets {
            let value = values.next().unwrap_or(ScalarValue::Null);
            self.exec_assign_value(target, value)?;
        }
        Ok(())
    }

    fn exec_stmt_perform(&mut self, stmt: &PlPgSqlStmtPerform) -> ExecResult {
        let sql = format!("SELECT {}", stmt.expr.query.trim());
        let result = self.exec_run_sql(&sql)?;
        self.row_count = result.rows.len() as u64;
        self.set_found(!result.rows.is_empty())?;
        Ok(None)
    }

    fn exec_stmt_getdiag(&mut self, stmt: &PlPgSqlStmtGetdiag) -> ExecResult {
        for item in &stmt.diag_items {
            let value = match item.kind {
                PlPgSqlGetdiagKind::RowCount => ScalarValue::Int(self.row_count as i64),
                PlPgSqlGetdiagKind::RoutineOid => ScalarValue::Int(i64::from(self.func.oid)),
            };
            let target = self.frame.resolve(&item.target)?;
            self.exec_assign_value(&target, value)?;
        }
        Ok(None)
    }
}

enum LoopControl {
    Continue,
    Break,
    Propagate(ControlSignal),
}

fn process_loop_rc(loop_label: Option<&str>, rc: Option<ControlSignal>) -> LoopControl {
    match rc {
        None => LoopControl::Continue,
        Some(ControlSignal::Return) => LoopControl::Propagate(ControlSignal::Return),
        Some(ControlSignal::Exit(None)) => LoopControl::Break,
        Some(ControlSignal::Exit(Some(label))) => {
            if label_matches(loop_label, &label) {
                LoopControl::Break
            } else {
                LoopControl::Propagate(ControlSignal::Exit(Some(label)))
            }
        }
        Some(ControlSignal::Continue(None)) => LoopControl::Continue,
        Some(ControlSignal::Continue(Some(label))) => {
            if label_matches(loop_label, &label) {
                LoopControl::Continue
            } else {
                LoopControl::Propagate(ControlSignal::Continue(Some(label)))
            }
        }
    }
}

/// Splits a `LANGUAGE sql` body into its statements.
fn split_sql_statements(body: &str) -> Result<Vec<String>, PlPgSqlError> {
    let syntax = |err: crate::plpgsql::scanner::PlPgSqlScanError| {
        PlPgSqlError::Sql(EngineError::syntax(err.to_string()))
    };
    let tokens = tokenize(body).map_err(syntax)?;
    let mut statements = Vec::new();
    let mut idx = 0usize;
    while idx < tokens.len() {
        match tokens[idx].kind {
            PlPgSqlTokenKind::Eof => break,
            PlPgSqlTokenKind::Semicolon => idx += 1,
            _ => {
                let (statement, end) = extract_sql_expression(&tokens, body, idx).map_err(syntax)?;
                if !statement.is_empty() {
                    statements.push(statement);
                }
                idx = end + 1;
            }
        }
    }
    Ok(statements)
}

struct LabelFrame<'s> {
    label: Option<&'s str>,
    is_loop: bool,
}

/// Checks every EXIT/CONTINUE against its enclosing blocks and loops before
/// the body runs.
fn validate_labels(block: &PlPgSqlStmtBlock) -> Result<(), PlPgSqlError> {
    let mut stack = Vec::new();
    check_block(block, &mut stack)
}

fn check_block<'s>(
    block: &'s PlPgSqlStmtBlock,
    stack: &mut Vec<LabelFrame<'s>>,
) -> Result<(), PlPgSqlError> {
    stack.push(LabelFrame {
        label: block.label.as_deref(),
        is_loop: false,
    });
    let result = check_stmts(&block.body, stack);
    stack.pop();
    result
}

fn check_loop<'s>(
    label: Option<&'s str>,
    body: &'s [PlPgSqlStmt],
    stack: &mut Vec<LabelFrame<'s>>,
) -> Result<(), PlPgSqlError> {
    if let Some(label) = label
        && stack
            .iter()
            .any(|frame| frame.is_loop && label_matches(frame.label, label))
    {
        return Err(PlPgSqlError::DuplicateLabel {
            label: label.to_ascii_lowercase(),
        });
    }
    stack.push(LabelFrame {
        label,
        is_loop: true,
    });
    let result = check_stmts(body, stack);
    stack.pop();
    result
}

fn check_stmts<'s>(
    stmts: &'s [PlPgSqlStmt],
    stack: &mut Vec<LabelFrame<'s>>,
) -> Result<(), PlPgSqlError> {
    for stmt in stmts {
        match stmt {
            PlPgSqlStmt::Block(block) => check_block(block, stack)?,
            PlPgSqlStmt::If(stmt) => {
                check_stmts(&stmt.then_body, stack)?;
                for elsif in &stmt.elsif_list {
                    check_stmts(&elsif.stmts, stack)?;
                }
                check_stmts(&stmt.else_body, stack)?;
            }
            PlPgSqlStmt::Case(stmt) => {
                for when in &stmt.case_when_list {
                    check_stmts(&when.stmts, stack)?;
                }
                if let Some(stmts) = &stmt.else_stmts {
                    check_stmts(stmts, stack)?;
                }
            }
            PlPgSqlStmt::Loop(stmt) => check_loop(stmt.label.as_deref(), &stmt.body, stack)?,
            PlPgSqlStmt::While(stmt) => check_loop(stmt.label.as_deref(), &stmt.body, stack)?,
            PlPgSqlStmt::Fori(stmt) => check_loop(stmt.label.as_deref(), &stmt.body, stack)?,
            PlPgSqlStmt::Fors(stmt) => check_loop(stmt.label.as_deref(), &stmt.body, stack)?,
            PlPgSqlStmt::Exit(stmt) => check_exit(stmt, stack)?,
            _ => {}
        }
    }
    Ok(())
}

fn check_exit(stmt: &PlPgSqlStmtExit, stack: &[LabelFrame<'_>]) -> Result<(), PlPgSqlError> {
    let keyword = if stmt.is_exit { "EXIT" } else { "CONTINUE" };
    let Some(label) = &stmt.label else {
        if stack.iter().any(|frame| frame.is_loop) {
            return Ok(());
        }
        return Err(PlPgSqlError::OutsideLoop { keyword });
    };
    let target = stack
        .iter()
        .rev()
        .find(|frame| label_matches(frame.label, label))
        .ok_or_else(|| PlPgSqlError::UnknownLabel {
            label: label.clone(),
        })?;
    if !stmt.is_exit && !target.is_loop {
        return Err(PlPgSqlError::ContinueBlockLabel {
            label: label.clone(),
        });
    }
    Ok(())
}
