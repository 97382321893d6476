//! Reference host: an in-memory session that parses and runs the SQL subset
//! routines issue, and invokes routines found in its catalog.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument, warn};

use crate::analyzer::functions::resolve_routine;
use crate::catalog::routine::{FunctionDefinition, RoutineKind};
use crate::catalog::types::SqlType;
use crate::catalog::{MemoryCatalog, candidate_routines, resolve_type_name};
use crate::commands::create_table::{execute_create_table, execute_create_type, execute_drop_table};
use crate::commands::function::execute_drop_routine;
use crate::commands::sequence::{SequenceSet, execute_create_sequence};
use crate::commands::trigger::{TriggerDef, TriggerSet};
use crate::commands::variable::{Settings, execute_set, execute_show};
use crate::executor::exec_expr::{EvalScope, ExprContext, eval_expr, infer_arg_type};
use crate::executor::exec_main::{execute_delete, execute_insert, execute_select, execute_update};
use crate::parser::ast::{CallStatement, Statement};
use crate::parser::sql_parser::parse_statement;
use crate::plpgsql::coerce::{TypeContext, coerce_to_type};
use crate::plpgsql::diagnostics::RaisedNotice;
use crate::plpgsql::error::InvocationError;
use crate::plpgsql::executor::{
    Invocation, InvocationContext, TriggerData, TriggerEvent, TriggerTiming, invoke,
    invoke_trigger,
};
use crate::plpgsql::result::RoutineResult;
use crate::storage::heap::HeapStore;
use crate::storage::tuple::ScalarValue;
use crate::tcop::engine::{EngineError, QueryResult, SqlExecutor};
use crate::utils::fmgr::{eval_builtin_function, is_builtin_function};

pub struct Session {
    pub(crate) catalog: Arc<MemoryCatalog>,
    pub(crate) heap: HeapStore,
    pub(crate) sequences: SequenceSet,
    pub(crate) triggers: TriggerSet,
    pub(crate) settings: Settings,
    pending_notices: Vec<RaisedNotice>,
    call_depth: usize,
    cancel: Arc<AtomicBool>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            catalog: Arc::new(MemoryCatalog::new()),
            heap: HeapStore::default(),
            sequences: SequenceSet::default(),
            triggers: TriggerSet::default(),
            settings,
            pending_notices: Vec::new(),
            call_depth: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn catalog(&self) -> &MemoryCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Flag that, once set, cancels the running statement at the next
    /// interrupt check.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Notices raised since the last call, in emission order.
    pub fn take_notices(&mut self) -> Vec<RaisedNotice> {
        std::mem::take(&mut self.pending_notices)
    }

    pub fn create_schema(&mut self, name: &str) -> Result<(), EngineError> {
        Arc::make_mut(&mut self.catalog).create_schema(name)?;
        Ok(())
    }

    pub fn create_routine(
        &mut self,
        definition: FunctionDefinition,
        or_replace: bool,
    ) -> Result<Arc<FunctionDefinition>, EngineError> {
        let created = Arc::make_mut(&mut self.catalog).create_routine(definition, or_replace)?;
        debug!(routine = %created.signature(), oid = created.oid, "routine created");
        Ok(created)
    }

    /// `CREATE TRIGGER name {BEFORE|AFTER} events ON table FOR EACH ROW
    /// EXECUTE FUNCTION function(args)`.
    pub fn create_trigger(
        &mut self,
        name: &str,
        table: &str,
        timing: TriggerTiming,
        events: &[TriggerEvent],
        function: &str,
        args: &[&str],
    ) -> Result<(), EngineError> {
        let path = self.settings.search_path();
        let table_name: Vec<String> = table.split('.').map(str::to_string).collect();
        let (table_schema, table_name) = self.heap.resolve(&path, &table_name).ok_or_else(|| {
            EngineError::new("42P01", format!("relation \"{table}\" does not exist"))
        })?;
        let candidates = candidate_routines(self.catalog.as_ref(), &path, function);
        let function = resolve_routine(&candidates, RoutineKind::Function, function, &[])?;
        self.triggers.create(TriggerDef {
            name: name.to_ascii_lowercase(),
            table_schema,
            table_name,
            timing,
            events: events.to_vec(),
            function,
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
        })
    }

    #[instrument(skip_all, fields(depth = self.call_depth))]
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult, EngineError> {
        debug!(sql, "execute");
        let statement =
            parse_statement(sql).map_err(|err| EngineError::syntax(err.to_string()))?;
        let path = self.settings.search_path();
        match statement {
            Statement::Query(select) => execute_select(self, &select),
            Statement::Insert(insert) => execute_insert(self, &insert),
            Statement::Update(update) => execute_update(self, &update),
            Statement::Delete(delete) => execute_delete(self, &delete),
            Statement::CreateTable(create) => execute_create_table(
                &create,
                Arc::make_mut(&mut self.catalog),
                &mut self.heap,
                &mut self.sequences,
                &path,
            ),
            Statement::DropTable(drop_table) => {
                let result = execute_drop_table(
                    &drop_table,
                    Arc::make_mut(&mut self.catalog),
                    &mut self.heap,
                    &mut self.sequences,
                    &path,
                )?;
                self.triggers.drop_orphaned(&self.heap);
                Ok(result)
            }
            Statement::CreateSequence(create) => {
                execute_create_sequence(&mut self.sequences, &path, &create)
            }
            Statement::CreateType(create) => {
                execute_create_type(&create, Arc::make_mut(&mut self.catalog), &path)
            }
            Statement::DropRoutine(drop_routine) => {
                let outcome =
                    execute_drop_routine(&drop_routine, Arc::make_mut(&mut self.catalog), &path)?;
                if let Some(notice) = outcome.notice {
                    self.pending_notices.push(notice);
                }
                Ok(outcome.result)
            }
            Statement::Call(call) => self.execute_call(&call),
            Statement::Set(set_stmt) => execute_set(&mut self.settings, &set_stmt),
            Statement::Show(show_stmt) => execute_show(&self.settings, &show_stmt),
        }
    }

    /// Runs a routine with already-bound arguments. The routine sees the
    /// catalog and settings as they were when the call started.
    pub fn invoke_routine(
        &mut self,
        definition: &FunctionDefinition,
        args: Vec<ScalarValue>,
    ) -> Result<Invocation, InvocationError> {
        let catalog = Arc::clone(&self.catalog);
        let settings = self.settings.clone();
        let depth = self.call_depth;
        let outer_notices = std::mem::take(&mut self.pending_notices);
        self.call_depth += 1;
        let outcome = {
            let mut ctx = InvocationContext {
                executor: &mut *self,
                catalog: catalog.as_ref(),
                settings: &settings,
                depth,
            };
            invoke(definition, args, &mut ctx)
        };
        self.call_depth -= 1;
        self.pending_notices = outer_notices;
        outcome
    }

    pub(crate) fn invoke_trigger_routine(
        &mut self,
        definition: &FunctionDefinition,
        trigger: &TriggerData,
    ) -> Result<RoutineResult, EngineError> {
        let catalog = Arc::clone(&self.catalog);
        let settings = self.settings.clone();
        let depth = self.call_depth;
        let outer_notices = std::mem::take(&mut self.pending_notices);
        self.call_depth += 1;
        let outcome = {
            let mut ctx = InvocationContext {
                executor: &mut *self,
                catalog: catalog.as_ref(),
                settings: &settings,
                depth,
            };
            invoke_trigger(definition, trigger, &mut ctx)
        };
        self.call_depth -= 1;
        self.pending_notices = outer_notices;
        self.absorb_invocation(outcome)
    }

    fn run_routine(
        &mut self,
        definition: &FunctionDefinition,
        args: Vec<ScalarValue>,
    ) -> Result<RoutineResult, EngineError> {
        let outcome = self.invoke_routine(definition, args);
        self.absorb_invocation(outcome)
    }

    /// Moves an invocation's notices to the client queue and flattens its
    /// failure into a host error. The EXCEPTION entry stays out of the queue;
    /// the error carries it.
    fn absorb_invocation(
        &mut self,
        outcome: Result<Invocation, InvocationError>,
    ) -> Result<RoutineResult, EngineError> {
        match outcome {
            Ok(invocation) => {
                self.pending_notices.extend(invocation.notices);
                Ok(invocation.result)
            }
            Err(mut failure) => {
                self.pending_notices.extend(
                    std::mem::take(&mut failure.notices)
                        .into_iter()
                        .filter(|notice| !notice.is_exception()),
                );
                warn!(sqlstate = failure.sqlstate(), context = %failure.context, "routine failed");
                Err(failure.into_engine_error())
            }
        }
    }

    fn execute_call(&mut self, call: &CallStatement) -> Result<QueryResult, EngineError> {
        let scope = EvalScope::default();
        let mut args = Vec::with_capacity(call.args.len());
        let mut arg_types = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let value = eval_expr(arg, &scope, self)?;
            arg_types.push(infer_arg_type(arg, &value, &scope, self));
            args.push(value);
        }
        let name = call.name.join(".");
        let candidates =
            candidate_routines(self.catalog.as_ref(), &self.settings.search_path(), &name);
        let procedure = resolve_routine(&candidates, RoutineKind::Procedure, &name, &arg_types)?;
        match self.run_routine(&procedure, args)? {
            RoutineResult::Value(ScalarValue::Record(record)) => {
                let columns = record
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.sql_type.clone()))
                    .collect();
                let mut result = QueryResult::with_rows(columns, vec![record.values()]);
                result.command_tag = "CALL".to_string();
                Ok(result)
            }
            _ => Ok(QueryResult::command("CALL", 0)),
        }
    }

    fn eval_sequence_function(
        &mut self,
        fn_name: &str,
        args: &[ScalarValue],
    ) -> Result<RoutineResult, EngineError> {
        let [ScalarValue::Text(raw)] = args else {
            return Err(EngineError::new(
                "42883",
                format!("function {fn_name} expects one regclass argument"),
            ));
        };
        let key = self.sequences.resolve(&self.settings.search_path(), raw)?;
        let value = if fn_name == "nextval" {
            self.sequences.nextval(&key)?
        } else {
            self.sequences.currval(&key)?
        };
        Ok(RoutineResult::Value(ScalarValue::Int(value)))
    }
}

impl ExprContext for Session {
    fn resolve_type(&self, type_name: &str) -> Result<SqlType, EngineError> {
        Ok(resolve_type_name(
            self.catalog.as_ref(),
            &self.settings.search_path(),
            type_name,
        )?)
    }

    fn cast_value(&self, value: ScalarValue, target: &SqlType) -> Result<ScalarValue, EngineError> {
        let search_path = self.settings.search_path();
        let types = TypeContext {
            catalog: self.catalog.as_ref(),
            search_path: &search_path,
        };
        Ok(coerce_to_type(value, target, &types)?)
    }

    fn call_function(
        &mut self,
        name: &[String],
        args: Vec<ScalarValue>,
        arg_types: &[SqlType],
    ) -> Result<RoutineResult, EngineError> {
        let qualified = name.join(".");
        let candidates =
            candidate_routines(self.catalog.as_ref(), &self.settings.search_path(), &qualified);
        if candidates.is_empty() {
            let fn_name = qualified
                .strip_prefix("pg_catalog.")
                .unwrap_or(&qualified)
                .to_ascii_lowercase();
            if fn_name == "nextval" || fn_name == "currval" {
                return self.eval_sequence_function(&fn_name, &args);
            }
            if is_builtin_function(&fn_name) {
                return eval_builtin_function(&fn_name, &args);
            }
        }
        let function = resolve_routine(&candidates, RoutineKind::Function, &qualified, arg_types)?;
        self.run_routine(&function, args)
    }
}

impl SqlExecutor for Session {
    fn execute_sql(&mut self, sql: &str) -> Result<QueryResult, EngineError> {
        self.execute(sql)
    }

    fn check_for_interrupts(&self) -> Result<(), EngineError> {
        if self.cancel.swap(false, Ordering::SeqCst) {
            return Err(EngineError::query_canceled());
        }
        Ok(())
    }

    fn take_notices(&mut self) -> Vec<RaisedNotice> {
        std::mem::take(&mut self.pending_notices)
    }
}
