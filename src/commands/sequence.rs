use std::collections::HashMap;

use crate::catalog::SearchPath;
use crate::parser::ast::CreateSequenceStatement;
use crate::tcop::engine::{EngineError, QueryResult};

#[derive(Debug, Clone)]
pub struct SequenceState {
    pub start: i64,
    pub current: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub called: bool,
}

impl SequenceState {
    pub fn new(start: Option<i64>, increment: Option<i64>) -> Result<Self, EngineError> {
        let increment = increment.unwrap_or(1);
        if increment == 0 {
            return Err(EngineError::new("22023", "INCREMENT must not be zero"));
        }
        let min_value = default_sequence_min_value(increment);
        let max_value = default_sequence_max_value(increment);
        let start =
            start.unwrap_or_else(|| default_sequence_start(increment, min_value, max_value));
        if start < min_value || start > max_value {
            return Err(EngineError::new(
                "22023",
                format!("START value ({start}) cannot be less than MINVALUE ({min_value})"),
            ));
        }
        Ok(Self {
            start,
            current: start,
            increment,
            min_value,
            max_value,
            called: false,
        })
    }
}

/// Sequences of one session, keyed by `schema.name`.
#[derive(Debug, Clone, Default)]
pub struct SequenceSet {
    sequences: HashMap<String, SequenceState>,
}

impl SequenceSet {
    pub fn contains(&self, key: &str) -> bool {
        self.sequences.contains_key(key)
    }

    pub fn insert(&mut self, key: String, state: SequenceState) {
        self.sequences.insert(key, state);
    }

    pub fn remove(&mut self, key: &str) -> Option<SequenceState> {
        self.sequences.remove(key)
    }

    /// Finds an existing sequence for a name as written in `nextval('...')`.
    pub fn resolve(&self, path: &SearchPath, raw: &str) -> Result<String, EngineError> {
        let parts = raw
            .split('.')
            .map(|part| part.trim().trim_matches('"').to_ascii_lowercase())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        let found = match parts.as_slice() {
            [schema_name, seq_name] => Some(format!("{schema_name}.{seq_name}"))
                .filter(|key| self.sequences.contains_key(key)),
            [seq_name] => path
                .schemas()
                .iter()
                .map(|schema| format!("{schema}.{seq_name}"))
                .find(|key| self.sequences.contains_key(key)),
            _ => None,
        };
        found.ok_or_else(|| {
            EngineError::new("42P01", format!("relation \"{raw}\" does not exist"))
        })
    }

    pub fn nextval(&mut self, key: &str) -> Result<i64, EngineError> {
        let state = self.sequences.get_mut(key).ok_or_else(|| {
            EngineError::new("42P01", format!("relation \"{key}\" does not exist"))
        })?;
        sequence_next_value(state, key)
    }

    pub fn currval(&self, key: &str) -> Result<i64, EngineError> {
        match self.sequences.get(key) {
            Some(state) if state.called => Ok(state.current),
            Some(_) => Err(EngineError::new(
                "55000",
                format!("currval of sequence \"{key}\" is not yet defined in this session"),
            )),
            None => Err(EngineError::new(
                "42P01",
                format!("relation \"{key}\" does not exist"),
            )),
        }
    }
}

pub fn execute_create_sequence(
    sequences: &mut SequenceSet,
    path: &SearchPath,
    create: &CreateSequenceStatement,
) -> Result<QueryResult, EngineError> {
    let key = normalize_sequence_name(&create.name, path)?;
    if sequences.contains(&key) {
        if create.if_not_exists {
            return Ok(QueryResult::command("CREATE SEQUENCE", 0));
        }
        return Err(EngineError::new(
            "42P07",
            format!("relation \"{}\" already exists", create.name.join(".")),
        ));
    }
    let state = SequenceState::new(create.start, create.increment)?;
    sequences.insert(key, state);
    Ok(QueryResult::command("CREATE SEQUENCE", 0))
}

pub fn normalize_sequence_name(name: &[String], path: &SearchPath) -> Result<String, EngineError> {
    match name {
        [seq_name] => Ok(format!(
            "{}.{}",
            creation_schema(path)?,
            seq_name.to_ascii_lowercase()
        )),
        [schema_name, seq_name] => Ok(format!(
            "{}.{}",
            schema_name.to_ascii_lowercase(),
            seq_name.to_ascii_lowercase()
        )),
        _ => Err(EngineError::new(
            "42601",
            format!("invalid sequence name \"{}\"", name.join(".")),
        )),
    }
}

pub fn creation_schema(path: &SearchPath) -> Result<&str, EngineError> {
    path.creation_schema()
        .ok_or_else(|| EngineError::new("3F000", "no schema has been selected to create in"))
}

pub fn default_sequence_min_value(increment: i64) -> i64 {
    if increment > 0 { 1 } else { i64::MIN }
}

pub fn default_sequence_max_value(increment: i64) -> i64 {
    if increment > 0 { i64::MAX } else { -1 }
}

pub fn default_sequence_start(increment: i64, min_value: i64, max_value: i64) -> i64 {
    if increment > 0 { min_value } else { max_value }
}

pub fn sequence_next_value(
    state: &mut SequenceState,
    sequence_name: &str,
) -> Result<i64, EngineError> {
    if !state.called {
        state.called = true;
        return Ok(state.current);
    }
    let next = state
        .current
        .checked_add(state.increment)
        .filter(|next| *next >= state.min_value && *next <= state.max_value)
        .ok_or_else(|| {
            EngineError::new(
                "2200H",
                format!("nextval: reached maximum value of sequence \"{sequence_name}\""),
            )
        })?;
    state.current = next;
    Ok(next)
}
