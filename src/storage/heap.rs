//! In-memory relations owned by a session.

use std::collections::BTreeMap;

use crate::catalog::SearchPath;
use crate::catalog::types::{CompositeType, SqlType};
use crate::parser::ast::Expr;
use crate::storage::tuple::{RecordField, RecordValue, ScalarValue};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    pub not_null: bool,
    pub primary_key: bool,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<ScalarValue>>,
}

impl HeapTable {
    pub fn new(schema: &str, name: &str, columns: Vec<ColumnSpec>) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Row type registered in the catalog under the table's name.
    pub fn row_type(&self) -> CompositeType {
        CompositeType {
            name: self.name.clone(),
            fields: self
                .columns
                .iter()
                .map(|column| (column.name.clone(), column.sql_type.clone()))
                .collect(),
        }
    }

    pub fn record_for(&self, row: &[ScalarValue]) -> RecordValue {
        RecordValue {
            type_name: Some(self.name.clone()),
            fields: self
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| RecordField {
                    name: column.name.clone(),
                    sql_type: column.sql_type.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    pub fn key_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.primary_key)
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// Every table of a session, keyed by (schema, name).
#[derive(Debug, Clone, Default)]
pub struct HeapStore {
    tables: BTreeMap<(String, String), HeapTable>,
}

impl HeapStore {
    /// Finds `name` or `schema.name` along the search path.
    pub fn resolve(&self, path: &SearchPath, name: &[String]) -> Option<(String, String)> {
        match name {
            [schema, table] => {
                let key = (schema.to_ascii_lowercase(), table.to_ascii_lowercase());
                self.tables.contains_key(&key).then_some(key)
            }
            [table] => {
                let table = table.to_ascii_lowercase();
                path.schemas()
                    .iter()
                    .map(|schema| (schema.clone(), table.clone()))
                    .find(|key| self.tables.contains_key(key))
            }
            _ => None,
        }
    }

    pub fn get(&self, key: &(String, String)) -> Option<&HeapTable> {
        self.tables.get(key)
    }

    pub fn get_mut(&mut self, key: &(String, String)) -> Option<&mut HeapTable> {
        self.tables.get_mut(key)
    }

    pub fn contains(&self, schema: &str, name: &str) -> bool {
        self.tables
            .contains_key(&(schema.to_string(), name.to_string()))
    }

    pub fn insert(&mut self, table: HeapTable) {
        self.tables
            .insert((table.schema.clone(), table.name.clone()), table);
    }

    pub fn remove(&mut self, key: &(String, String)) -> Option<HeapTable> {
        self.tables.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnSpec, HeapStore, HeapTable};
    use crate::catalog::SearchPath;
    use crate::catalog::types::SqlType;
    use crate::storage::tuple::ScalarValue;

    fn column(name: &str, sql_type: SqlType) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            sql_type,
            not_null: false,
            primary_key: false,
            default: None,
        }
    }

    #[test]
    fn resolves_unqualified_names_along_search_path() {
        let mut store = HeapStore::default();
        store.insert(HeapTable::new("app", "items", vec![column("id", SqlType::Int4)]));
        let path = SearchPath::parse("public, app");
        assert_eq!(
            store.resolve(&path, &["items".to_string()]),
            Some(("app".to_string(), "items".to_string()))
        );
        assert_eq!(store.resolve(&SearchPath::default(), &["items".to_string()]), None);
    }

    #[test]
    fn record_for_carries_row_type_name() {
        let table = HeapTable::new(
            "public",
            "test",
            vec![column("id", SqlType::Int4), column("name", SqlType::Text)],
        );
        let record = table.record_for(&[ScalarValue::Int(1), ScalarValue::Text("apple".into())]);
        assert_eq!(record.type_name.as_deref(), Some("test"));
        assert_eq!(ScalarValue::Record(record).render(), "(1,apple)");
        assert_eq!(table.row_type().fields.len(), 2);
    }
}
