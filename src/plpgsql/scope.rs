//! Variable storage for one invocation.
//!
//! All variables of a call live in one arena (`datums`, as `PLpgSQL_execstate`
//! keeps them). Each nested block or loop pushes a scope that maps names to
//! arena slots; popping a scope truncates the arena back to where the scope
//! began, so inner declarations never outlive their block.

use std::collections::HashMap;

use crate::catalog::types::SqlType;
use crate::plpgsql::error::PlPgSqlError;
use crate::storage::tuple::ScalarValue;

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub sql_type: SqlType,
    pub value: ScalarValue,
    pub constant: bool,
    pub not_null: bool,
}

impl Variable {
    pub fn new(name: &str, sql_type: SqlType, value: ScalarValue) -> Self {
        Self {
            name: normalize_identifier(name),
            sql_type,
            value,
            constant: false,
            not_null: false,
        }
    }
}

/// Case folding of one identifier: unquoted names fold to lower case,
/// `"Quoted"` names keep their case with `""` unescaped.
pub fn normalize_identifier(name: &str) -> String {
    let trimmed = name.trim();
    match trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) if trimmed.len() >= 2 => inner.replace("\"\"", "\""),
        _ => trimmed.to_ascii_lowercase(),
    }
}

/// Splits a dotted reference into normalized identifiers. Dots inside
/// quotes do not split.
pub fn identifier_parts(reference: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in reference.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '.' if !in_quotes => {
                parts.push(normalize_identifier(&current));
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    parts.push(normalize_identifier(&current));
    parts
}

#[derive(Debug, Clone, Default)]
struct Scope {
    label: Option<String>,
    names: HashMap<String, usize>,
    first_datum: usize,
}

/// A resolved variable reference: a whole slot or one field of a record
/// held in a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarRef {
    Slot(usize),
    Field { slot: usize, field: String },
}

impl VarRef {
    pub fn slot(&self) -> usize {
        match self {
            Self::Slot(slot) | Self::Field { slot, .. } => *slot,
        }
    }
}

/// Corresponds to the datum part of `PLpgSQL_execstate`. Never shared
/// between invocations; recursion builds a fresh frame.
#[derive(Debug, Clone, Default)]
pub struct InvocationFrame {
    datums: Vec<Variable>,
    scopes: Vec<Scope>,
}

impl InvocationFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push_scope(&mut self, label: Option<&str>) {
        self.scopes.push(Scope {
            label: label.map(str::to_ascii_lowercase),
            names: HashMap::new(),
            first_datum: self.datums.len(),
        });
    }

    pub fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.datums.truncate(scope.first_datum);
        }
    }

    /// Adds a variable to the innermost scope. Shadowing an outer name is
    /// allowed; redeclaring in the same scope is not.
    pub fn declare(&mut self, variable: Variable) -> Result<usize, PlPgSqlError> {
        let slot = self.datums.len();
        let name = variable.name.clone();
        let Some(scope) = self.scopes.last_mut() else {
            self.push_scope(None);
            return self.declare(variable);
        };
        if scope.names.contains_key(&name) {
            return Err(PlPgSqlError::DuplicateVariable { name });
        }
        scope.names.insert(name, slot);
        self.datums.push(variable);
        Ok(slot)
    }

    /// Makes `name` another handle on the slot `target` resolves to
    /// (`name ALIAS FOR target`, also used for `$n` parameter names).
    pub fn alias(&mut self, name: &str, target: &str) -> Result<(), PlPgSqlError> {
        let slot = match self.resolve(target)? {
            VarRef::Slot(slot) => slot,
            VarRef::Field { .. } => {
                return Err(PlPgSqlError::UnknownVariable {
                    name: target.to_string(),
                });
            }
        };
        let name = normalize_identifier(name);
        let Some(scope) = self.scopes.last_mut() else {
            return Err(PlPgSqlError::UnknownVariable { name });
        };
        if scope.names.contains_key(&name) {
            return Err(PlPgSqlError::DuplicateVariable { name });
        }
        scope.names.insert(name, slot);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.names.get(name).copied())
    }

    fn lookup_in_label(&self, label: &str, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .filter(|scope| scope.label.as_deref() == Some(label))
            .find_map(|scope| scope.names.get(name).copied())
    }

    fn has_label(&self, label: &str) -> bool {
        self.scopes
            .iter()
            .any(|scope| scope.label.as_deref() == Some(label))
    }

    /// Non-failing variant of [`Self::resolve`], used while substituting
    /// references into SQL text where unknown names are columns.
    pub fn try_resolve(&self, reference: &str) -> Option<VarRef> {
        self.resolve(reference).ok()
    }

    /// Resolves `name`, `record.field`, `label.name` or
    /// `label.record.field`, innermost scope first.
    pub fn resolve(&self, reference: &str) -> Result<VarRef, PlPgSqlError> {
        let normalized = identifier_parts(reference);
        let parts: Vec<&str> = normalized.iter().map(String::as_str).collect();
        let unknown = || PlPgSqlError::UnknownVariable {
            name: reference.trim().to_string(),
        };
        match parts.as_slice() {
            [name] => self.lookup(name).map(VarRef::Slot).ok_or_else(unknown),
            [first, second] => {
                if let Some(slot) = self.lookup(first)
                    && self.datums[slot].sql_type.is_composite()
                {
                    return self.field_ref(slot, first, second);
                }
                if self.has_label(first) {
                    return self
                        .lookup_in_label(first, second)
                        .map(VarRef::Slot)
                        .ok_or_else(unknown);
                }
                Err(unknown())
            }
            [label, record, field] => {
                let slot = self.lookup_in_label(label, record).ok_or_else(unknown)?;
                self.field_ref(slot, record, field)
            }
            _ => Err(unknown()),
        }
    }

    fn field_ref(&self, slot: usize, record: &str, field: &str) -> Result<VarRef, PlPgSqlError> {
        // Fields of an unassigned record are unknown until a row arrives.
        if let ScalarValue::Record(value) = &self.datums[slot].value
            && value.field(field).is_none()
        {
            return Err(PlPgSqlError::UnknownRecordField {
                record: record.to_string(),
                field: field.to_string(),
            });
        }
        Ok(VarRef::Field {
            slot,
            field: field.to_string(),
        })
    }

    pub fn variable(&self, slot: usize) -> &Variable {
        &self.datums[slot]
    }

    /// Current value behind a reference; a field of a NULL record is NULL.
    pub fn value(&self, reference: &VarRef) -> Result<ScalarValue, PlPgSqlError> {
        match reference {
            VarRef::Slot(slot) => Ok(self.datums[*slot].value.clone()),
            VarRef::Field { slot, field } => {
                let variable = &self.datums[*slot];
                match &variable.value {
                    ScalarValue::Record(record) => record
                        .field(field)
                        .map(|f| f.value.clone())
                        .ok_or_else(|| PlPgSqlError::UnknownRecordField {
                            record: variable.name.clone(),
                            field: field.clone(),
                        }),
                    _ => Ok(ScalarValue::Null),
                }
            }
        }
    }

    pub fn get(&self, reference: &str) -> Result<ScalarValue, PlPgSqlError> {
        let resolved = self.resolve(reference)?;
        self.value(&resolved)
    }

    /// Type of the slot or field a reference points at, when known.
    pub fn type_of(&self, reference: &VarRef) -> SqlType {
        match reference {
            VarRef::Slot(slot) => self.datums[*slot].sql_type.clone(),
            VarRef::Field { slot, field } => match &self.datums[*slot].value {
                ScalarValue::Record(record) => record
                    .field(field)
                    .map(|f| f.sql_type.clone())
                    .unwrap_or(SqlType::Unknown),
                _ => SqlType::Unknown,
            },
        }
    }

    /// Stores an already coerced value, enforcing CONSTANT and NOT NULL.
    pub fn store(&mut self, slot: usize, value: ScalarValue) -> Result<(), PlPgSqlError> {
        let variable = &mut self.datums[slot];
        if variable.constant {
            return Err(PlPgSqlError::ConstantAssignment {
                name: variable.name.clone(),
            });
        }
        if variable.not_null && value.is_null() {
            return Err(PlPgSqlError::NullViolation {
                name: variable.name.clone(),
            });
        }
        variable.value = value;
        Ok(())
    }

    /// Initial store at declaration time; CONSTANT does not apply yet.
    pub fn initialize(&mut self, slot: usize, value: ScalarValue) -> Result<(), PlPgSqlError> {
        let variable = &mut self.datums[slot];
        if variable.not_null && value.is_null() {
            return Err(PlPgSqlError::NullViolation {
                name: variable.name.clone(),
            });
        }
        variable.value = value;
        Ok(())
    }
}
