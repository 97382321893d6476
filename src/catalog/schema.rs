use std::collections::HashMap;
use std::sync::Arc;

use super::oid::Oid;
use super::routine::FunctionDefinition;
use super::types::CompositeType;

/// Routines and composite types living in one namespace.
#[derive(Debug, Clone)]
pub struct Schema {
    oid: Oid,
    name: String,
    routines: HashMap<String, Vec<Arc<FunctionDefinition>>>,
    types: HashMap<String, CompositeType>,
}

impl Schema {
    pub fn new(oid: Oid, name: String) -> Self {
        Self {
            oid,
            name,
            routines: HashMap::new(),
            types: HashMap::new(),
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.routines.values().all(Vec::is_empty) && self.types.is_empty()
    }

    /// All overloads sharing `name`, in creation order.
    pub fn routines_named(&self, name: &str) -> &[Arc<FunctionDefinition>] {
        self.routines.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn routines_named_mut(&mut self, name: &str) -> &mut Vec<Arc<FunctionDefinition>> {
        self.routines.entry(name.to_string()).or_default()
    }

    pub fn composite_type(&self, name: &str) -> Option<&CompositeType> {
        self.types.get(name)
    }

    pub fn insert_type(&mut self, ty: CompositeType) -> Option<CompositeType> {
        self.types.insert(ty.name.clone(), ty)
    }

    pub fn remove_type(&mut self, name: &str) -> Option<CompositeType> {
        self.types.remove(name)
    }
}
