use std::sync::Arc;

use crate::catalog::routine::FunctionDefinition;
use crate::plpgsql::{TriggerEvent, TriggerTiming};
use crate::storage::heap::HeapStore;
use crate::tcop::engine::EngineError;

/// A row-level trigger bound to one table.
#[derive(Debug, Clone)]
pub struct TriggerDef {
    pub name: String,
    pub table_schema: String,
    pub table_name: String,
    pub timing: TriggerTiming,
    pub events: Vec<TriggerEvent>,
    pub function: Arc<FunctionDefinition>,
    pub args: Vec<String>,
}

impl TriggerDef {
    pub fn fires_on(
        &self,
        schema: &str,
        table: &str,
        timing: TriggerTiming,
        event: TriggerEvent,
    ) -> bool {
        self.table_schema == schema
            && self.table_name == table
            && self.timing == timing
            && self.events.contains(&event)
    }
}

/// Triggers of a session in creation order; firing order is by name, as in
/// PostgreSQL.
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    triggers: Vec<TriggerDef>,
}

impl TriggerSet {
    pub fn create(&mut self, trigger: TriggerDef) -> Result<(), EngineError> {
        if !trigger.function.is_trigger() {
            return Err(EngineError::new(
                "42P17",
                format!(
                    "function {} must return type trigger",
                    trigger.function.signature()
                ),
            ));
        }
        let duplicate = self.triggers.iter().any(|existing| {
            existing.name == trigger.name
                && existing.table_schema == trigger.table_schema
                && existing.table_name == trigger.table_name
        });
        if duplicate {
            return Err(EngineError::new(
                "42710",
                format!(
                    "trigger \"{}\" for relation \"{}\" already exists",
                    trigger.name, trigger.table_name
                ),
            ));
        }
        self.triggers.push(trigger);
        Ok(())
    }

    /// Forgets triggers whose table no longer exists.
    pub fn drop_orphaned(&mut self, heap: &HeapStore) {
        self.triggers
            .retain(|trigger| heap.contains(&trigger.table_schema, &trigger.table_name));
    }

    pub fn matching(
        &self,
        schema: &str,
        table: &str,
        timing: TriggerTiming,
        event: TriggerEvent,
    ) -> Vec<TriggerDef> {
        let mut matching: Vec<TriggerDef> = self
            .triggers
            .iter()
            .filter(|trigger| trigger.fires_on(schema, table, timing, event))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        matching
    }
}
