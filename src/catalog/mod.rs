//! Routine and composite-type catalog.
//!
//! The interpreter only ever sees the catalog through [`RoutineCatalog`], a
//! read-only interface handed in at invocation time. [`MemoryCatalog`] is the
//! in-process implementation used by the reference session and by tests.

use std::collections::HashMap;
use std::sync::Arc;

pub mod oid;
pub mod routine;
pub mod schema;
pub mod search_path;
pub mod types;

use oid::{Oid, OidGenerator};
use routine::FunctionDefinition;
use schema::Schema;
pub use search_path::SearchPath;
use types::{CompositeType, SqlType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("name cannot be empty")]
    EmptyName,
    #[error("schema \"{0}\" does not exist")]
    UndefinedSchema(String),
    #[error("schema \"{0}\" already exists")]
    DuplicateSchema(String),
    #[error("schema \"{0}\" is not empty")]
    SchemaNotEmpty(String),
    #[error("no schema has been selected to create in")]
    NoCreationSchema,
    #[error("{kind} \"{signature}\" already exists with same argument types")]
    DuplicateRoutine {
        kind: &'static str,
        signature: String,
    },
    #[error("{kind} {signature} does not exist")]
    UndefinedRoutine {
        kind: &'static str,
        signature: String,
    },
    #[error("type \"{0}\" already exists")]
    DuplicateType(String),
    #[error("type \"{0}\" does not exist")]
    UndefinedType(String),
    #[error("catalog OID space exhausted")]
    OidSpaceExhausted,
}

impl CatalogError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            Self::EmptyName => "42602",
            Self::UndefinedSchema(_) | Self::NoCreationSchema => "3F000",
            Self::DuplicateSchema(_) => "42P06",
            Self::SchemaNotEmpty(_) => "2BP01",
            Self::DuplicateRoutine { .. } => "42723",
            Self::UndefinedRoutine { .. } => "42883",
            Self::DuplicateType(_) => "42710",
            Self::UndefinedType(_) => "42704",
            Self::OidSpaceExhausted => "54000",
        }
    }
}

/// Read-only catalog view consumed by overload resolution and the
/// interpreter.
pub trait RoutineCatalog {
    fn schema_exists(&self, schema: &str) -> bool;

    /// Every routine called `name` in `schema`, functions and procedures alike.
    fn routines_in_schema(&self, schema: &str, name: &str) -> Vec<Arc<FunctionDefinition>>;

    fn composite_type_in_schema(&self, schema: &str, name: &str) -> Option<CompositeType>;
}

/// Splits `schema.name` into its parts, lower-casing unquoted identifiers.
pub fn split_qualified_name(name: &str) -> (Option<String>, String) {
    let normalized = name.trim().replace('"', "").to_ascii_lowercase();
    match normalized.split_once('.') {
        Some((schema, object)) => (Some(schema.to_string()), object.to_string()),
        None => (None, normalized),
    }
}

/// Collects overload candidates for a possibly qualified routine name.
/// Schemas are searched in path order; a candidate whose input types were
/// already seen in an earlier schema is hidden by it.
pub fn candidate_routines(
    catalog: &dyn RoutineCatalog,
    path: &SearchPath,
    name: &str,
) -> Vec<Arc<FunctionDefinition>> {
    let (schema, object) = split_qualified_name(name);
    if let Some(schema) = schema {
        return catalog.routines_in_schema(&schema, &object);
    }

    let mut candidates: Vec<Arc<FunctionDefinition>> = Vec::new();
    for schema in path.schemas() {
        for routine in catalog.routines_in_schema(schema, &object) {
            let hidden = candidates
                .iter()
                .any(|seen| seen.input_types() == routine.input_types());
            if !hidden {
                candidates.push(routine);
            }
        }
    }
    candidates
}

pub fn lookup_composite_type(
    catalog: &dyn RoutineCatalog,
    path: &SearchPath,
    name: &str,
) -> Option<CompositeType> {
    let (schema, object) = split_qualified_name(name);
    match schema {
        Some(schema) => catalog.composite_type_in_schema(&schema, &object),
        None => path
            .schemas()
            .iter()
            .find_map(|schema| catalog.composite_type_in_schema(schema, &object)),
    }
}

/// Resolves a declared type name to a built-in type or a composite type
/// visible on the search path.
pub fn resolve_type_name(
    catalog: &dyn RoutineCatalog,
    path: &SearchPath,
    typname: &str,
) -> Result<SqlType, CatalogError> {
    if let Some(builtin) = SqlType::parse_builtin(typname) {
        return Ok(builtin);
    }
    lookup_composite_type(catalog, path, typname)
        .map(|ty| SqlType::Composite(ty.name))
        .ok_or_else(|| CatalogError::UndefinedType(typname.trim().to_string()))
}

#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    oid_gen: OidGenerator,
    schemas: HashMap<String, Schema>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    /// A catalog with an empty `public` schema.
    pub fn new() -> Self {
        let mut schemas = HashMap::new();
        let mut oid_gen = OidGenerator::default();
        // The first OID of a fresh generator cannot overflow.
        let public_oid = oid_gen.next_oid().unwrap_or(oid::FIRST_NORMAL_OID);
        schemas.insert(
            "public".to_string(),
            Schema::new(public_oid, "public".to_string()),
        );
        Self { oid_gen, schemas }
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        let key = normalize_name(name).ok()?;
        self.schemas.get(&key)
    }

    pub fn create_schema(&mut self, name: &str) -> Result<Oid, CatalogError> {
        let normalized_name = normalize_name(name)?;
        if self.schemas.contains_key(&normalized_name) {
            return Err(CatalogError::DuplicateSchema(normalized_name));
        }
        let schema_oid = self.oid_gen.next_oid()?;
        self.schemas.insert(
            normalized_name.clone(),
            Schema::new(schema_oid, normalized_name),
        );
        Ok(schema_oid)
    }

    pub fn drop_schema(&mut self, name: &str) -> Result<(), CatalogError> {
        let normalized_name = normalize_name(name)?;
        let Some(schema) = self.schemas.get(&normalized_name) else {
            return Err(CatalogError::UndefinedSchema(normalized_name));
        };
        if !schema.is_empty() {
            return Err(CatalogError::SchemaNotEmpty(normalized_name));
        }
        self.schemas.remove(&normalized_name);
        Ok(())
    }

    /// Registers a routine. With `or_replace`, an existing routine with the
    /// same identity is replaced in place and keeps its OID.
    pub fn create_routine(
        &mut self,
        mut definition: FunctionDefinition,
        or_replace: bool,
    ) -> Result<Arc<FunctionDefinition>, CatalogError> {
        definition.schema = normalize_name(&definition.schema)?;
        definition.name = normalize_name(&definition.name)?;
        let input_types = definition.input_types();
        let next_oid = self.oid_gen.next_oid()?;
        let Some(schema) = self.schemas.get_mut(&definition.schema) else {
            return Err(CatalogError::UndefinedSchema(definition.schema));
        };

        let overloads = schema.routines_named_mut(&definition.name);
        if let Some(existing) = overloads
            .iter_mut()
            .find(|existing| existing.input_types() == input_types)
        {
            if !or_replace || existing.kind != definition.kind {
                return Err(CatalogError::DuplicateRoutine {
                    kind: definition.kind.keyword(),
                    signature: definition.signature(),
                });
            }
            definition.oid = existing.oid;
            let replaced = Arc::new(definition);
            *existing = Arc::clone(&replaced);
            return Ok(replaced);
        }

        definition.oid = next_oid;
        let created = Arc::new(definition);
        overloads.push(Arc::clone(&created));
        Ok(created)
    }

    /// Removes the routine with exactly this identity.
    pub fn drop_routine(&mut self, routine: &FunctionDefinition) -> Result<(), CatalogError> {
        let missing = || CatalogError::UndefinedRoutine {
            kind: routine.kind.keyword(),
            signature: routine.signature(),
        };
        let schema = self.schemas.get_mut(&routine.schema).ok_or_else(missing)?;
        let overloads = schema.routines_named_mut(&routine.name);
        let before = overloads.len();
        overloads.retain(|existing| existing.oid != routine.oid);
        if overloads.len() == before {
            return Err(missing());
        }
        Ok(())
    }

    pub fn create_composite_type(
        &mut self,
        schema_name: &str,
        mut ty: CompositeType,
    ) -> Result<(), CatalogError> {
        let schema_name = normalize_name(schema_name)?;
        ty.name = normalize_name(&ty.name)?;
        let Some(schema) = self.schemas.get_mut(&schema_name) else {
            return Err(CatalogError::UndefinedSchema(schema_name));
        };
        if schema.composite_type(&ty.name).is_some() {
            return Err(CatalogError::DuplicateType(ty.name));
        }
        schema.insert_type(ty);
        Ok(())
    }

    pub fn drop_composite_type(
        &mut self,
        schema_name: &str,
        name: &str,
    ) -> Result<(), CatalogError> {
        let schema_name = normalize_name(schema_name)?;
        let name = normalize_name(name)?;
        let Some(schema) = self.schemas.get_mut(&schema_name) else {
            return Err(CatalogError::UndefinedSchema(schema_name));
        };
        schema
            .remove_type(&name)
            .map(|_| ())
            .ok_or(CatalogError::UndefinedType(name))
    }
}

impl RoutineCatalog for MemoryCatalog {
    fn schema_exists(&self, schema: &str) -> bool {
        self.schema(schema).is_some()
    }

    fn routines_in_schema(&self, schema: &str, name: &str) -> Vec<Arc<FunctionDefinition>> {
        let Ok(name) = normalize_name(name) else {
            return Vec::new();
        };
        self.schema(schema)
            .map(|schema| schema.routines_named(&name).to_vec())
            .unwrap_or_default()
    }

    fn composite_type_in_schema(&self, schema: &str, name: &str) -> Option<CompositeType> {
        let name = normalize_name(name).ok()?;
        self.schema(schema)?.composite_type(&name).cloned()
    }
}

fn normalize_name(name: &str) -> Result<String, CatalogError> {
    let normalized = name.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(CatalogError::EmptyName);
    }
    Ok(normalized)
}
