use crate::catalog::types::CompositeType;
use crate::catalog::{MemoryCatalog, SearchPath, resolve_type_name};
use crate::commands::sequence::{SequenceSet, SequenceState, creation_schema};
use crate::parser::ast::{
    ColumnDefinition, CreateTableStatement, CreateTypeStatement, DropTableStatement, Expr,
};
use crate::storage::heap::{ColumnSpec, HeapStore, HeapTable};
use crate::tcop::engine::{EngineError, QueryResult};

/// Creates a heap table and registers its row type so routines can declare
/// variables of the table's type.
pub fn execute_create_table(
    create: &CreateTableStatement,
    catalog: &mut MemoryCatalog,
    heap: &mut HeapStore,
    sequences: &mut SequenceSet,
    path: &SearchPath,
) -> Result<QueryResult, EngineError> {
    if create.columns.is_empty() {
        return Err(EngineError::new(
            "42P16",
            "CREATE TABLE requires at least one column",
        ));
    }

    let (schema_name, table_name) = relation_name_for_create(&create.name, path)?;
    if heap.contains(&schema_name, &table_name) {
        if create.if_not_exists {
            return Ok(QueryResult::command("CREATE TABLE", 0));
        }
        return Err(EngineError::new(
            "42P07",
            format!("relation \"{table_name}\" already exists"),
        ));
    }

    let mut columns = Vec::with_capacity(create.columns.len());
    let mut serial_sequences = Vec::new();
    for column in &create.columns {
        if columns
            .iter()
            .any(|existing: &ColumnSpec| existing.name == column.name.to_ascii_lowercase())
        {
            return Err(EngineError::new(
                "42701",
                format!("column \"{}\" specified more than once", column.name),
            ));
        }
        let mut spec = column_spec_from_ast(column, catalog, path)?;
        if column.serial {
            if column.default.is_some() {
                return Err(EngineError::new(
                    "42601",
                    format!(
                        "multiple default values specified for column \"{}\" \
                         of table \"{table_name}\"",
                        column.name
                    ),
                ));
            }
            let sequence_name = format!("{schema_name}.{table_name}_{}_seq", spec.name);
            spec.default = Some(Expr::FunctionCall {
                name: vec!["nextval".to_string()],
                args: vec![Expr::String(sequence_name.clone())],
                star: false,
            });
            spec.not_null = true;
            serial_sequences.push(sequence_name);
        }
        columns.push(spec);
    }
    if let Some(name) = serial_sequences.iter().find(|name| sequences.contains(name)) {
        return Err(EngineError::new(
            "42P07",
            format!("relation \"{name}\" already exists"),
        ));
    }

    let table = HeapTable::new(&schema_name, &table_name, columns);
    catalog.create_composite_type(&schema_name, table.row_type())?;
    for name in serial_sequences {
        sequences.insert(name, SequenceState::new(None, None)?);
    }
    heap.insert(table);
    Ok(QueryResult::command("CREATE TABLE", 0))
}

pub fn execute_drop_table(
    drop_table: &DropTableStatement,
    catalog: &mut MemoryCatalog,
    heap: &mut HeapStore,
    sequences: &mut SequenceSet,
    path: &SearchPath,
) -> Result<QueryResult, EngineError> {
    let mut keys = Vec::with_capacity(drop_table.names.len());
    for name in &drop_table.names {
        match heap.resolve(path, name) {
            Some(key) => keys.push(key),
            None if drop_table.if_exists => {}
            None => {
                return Err(EngineError::new(
                    "42P01",
                    format!("table \"{}\" does not exist", name.join(".")),
                ));
            }
        }
    }

    for key in keys {
        let Some(table) = heap.remove(&key) else {
            continue;
        };
        catalog.drop_composite_type(&table.schema, &table.name)?;
        let owned_prefix = format!("{}.{}_", table.schema, table.name);
        for column in &table.columns {
            let sequence_name = format!("{owned_prefix}{}_seq", column.name);
            sequences.remove(&sequence_name);
        }
    }
    Ok(QueryResult::command("DROP TABLE", 0))
}

/// `CREATE TYPE name AS (...)`: a free-standing composite type.
pub fn execute_create_type(
    create: &CreateTypeStatement,
    catalog: &mut MemoryCatalog,
    path: &SearchPath,
) -> Result<QueryResult, EngineError> {
    let (schema_name, type_name) = relation_name_for_create(&create.name, path)?;
    let fields = create
        .fields
        .iter()
        .map(|(name, type_name)| {
            resolve_type_name(catalog, path, type_name)
                .map(|sql_type| (name.to_ascii_lowercase(), sql_type))
        })
        .collect::<Result<Vec<_>, _>>()?;
    catalog.create_composite_type(
        &schema_name,
        CompositeType {
            name: type_name,
            fields,
        },
    )?;
    Ok(QueryResult::command("CREATE TYPE", 0))
}

fn column_spec_from_ast(
    column: &ColumnDefinition,
    catalog: &MemoryCatalog,
    path: &SearchPath,
) -> Result<ColumnSpec, EngineError> {
    let sql_type = resolve_type_name(catalog, path, &column.type_name)?;
    Ok(ColumnSpec {
        name: column.name.to_ascii_lowercase(),
        sql_type,
        not_null: column.not_null || column.primary_key,
        primary_key: column.primary_key,
        default: column.default.clone(),
    })
}

fn relation_name_for_create(
    name: &[String],
    path: &SearchPath,
) -> Result<(String, String), EngineError> {
    match name {
        [relation] => Ok((
            creation_schema(path)?.to_string(),
            relation.to_ascii_lowercase(),
        )),
        [schema, relation] => Ok((schema.to_ascii_lowercase(), relation.to_ascii_lowercase())),
        _ => Err(EngineError::new(
            "42601",
            format!("improper qualified name: {}", name.join(".")),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{execute_create_table, execute_drop_table};
    use crate::catalog::types::SqlType;
    use crate::catalog::{MemoryCatalog, SearchPath, resolve_type_name};
    use crate::commands::sequence::SequenceSet;
    use crate::parser::ast::Statement;
    use crate::parser::sql_parser::parse_statement;
    use crate::storage::heap::HeapStore;

    #[test]
    fn serial_column_gets_owned_sequence_and_row_type() {
        let mut catalog = MemoryCatalog::new();
        let mut heap = HeapStore::default();
        let mut sequences = SequenceSet::default();
        let path = SearchPath::default();
        let Statement::CreateTable(create) =
            parse_statement("CREATE TABLE test (id SERIAL PRIMARY KEY, name TEXT)").expect("parse")
        else {
            panic!("expected CREATE TABLE");
        };
        execute_create_table(&create, &mut catalog, &mut heap, &mut sequences, &path)
            .expect("create table");
        assert!(sequences.contains("public.test_id_seq"));
        assert_eq!(
            resolve_type_name(&catalog, &path, "test").expect("row type"),
            SqlType::Composite("test".to_string())
        );
        let again = execute_create_table(&create, &mut catalog, &mut heap, &mut sequences, &path)
            .expect_err("duplicate");
        assert_eq!(again.sqlstate, "42P07");

        let Statement::DropTable(drop_table) = parse_statement("DROP TABLE test").expect("parse")
        else {
            panic!("expected DROP TABLE");
        };
        execute_drop_table(&drop_table, &mut catalog, &mut heap, &mut sequences, &path)
            .expect("drop");
        assert!(!sequences.contains("public.test_id_seq"));
        assert!(resolve_type_name(&catalog, &path, "test").is_err());
    }
}
