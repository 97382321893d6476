use crate::analyzer::functions::{resolve_routine_by_name, resolve_routine_exact};
use crate::catalog::{MemoryCatalog, SearchPath, candidate_routines, resolve_type_name};
use crate::parser::ast::DropRoutineStatement;
use crate::plpgsql::diagnostics::{RaisedNotice, Severity};
use crate::tcop::engine::{EngineError, QueryResult};

/// Outcome of a DROP FUNCTION/PROCEDURE: the command result and, for
/// `IF EXISTS` on a missing routine, the notice reported to the client.
#[derive(Debug)]
pub struct DropRoutineOutcome {
    pub result: QueryResult,
    pub notice: Option<RaisedNotice>,
}

pub fn execute_drop_routine(
    drop_routine: &DropRoutineStatement,
    catalog: &mut MemoryCatalog,
    path: &SearchPath,
) -> Result<DropRoutineOutcome, EngineError> {
    let name = drop_routine.name.join(".");
    let tag = format!("DROP {}", drop_routine.kind.keyword().to_ascii_uppercase());
    let candidates = candidate_routines(catalog, path, &name);

    let arg_types = match &drop_routine.arg_types {
        Some(type_names) => Some(
            type_names
                .iter()
                .map(|type_name| resolve_type_name(catalog, path, type_name))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => None,
    };
    let resolved = match &arg_types {
        Some(arg_types) => resolve_routine_exact(&candidates, drop_routine.kind, &name, arg_types),
        None => resolve_routine_by_name(&candidates, drop_routine.kind, &name),
    };

    let routine = match resolved {
        Ok(routine) => routine,
        Err(err) if drop_routine.if_exists && err.sqlstate() == "42883" => {
            let rendered_types = arg_types
                .unwrap_or_default()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let notice = RaisedNotice::new(
                Severity::Notice,
                format!(
                    "{} {name}({rendered_types}) does not exist, skipping",
                    drop_routine.kind.keyword()
                ),
            );
            return Ok(DropRoutineOutcome {
                result: QueryResult::command(tag, 0),
                notice: Some(notice),
            });
        }
        Err(err) => return Err(err.into()),
    };

    catalog.drop_routine(&routine)?;
    Ok(DropRoutineOutcome {
        result: QueryResult::command(tag, 0),
        notice: None,
    })
}

#[cfg(test)]
mod tests {
    use super::execute_drop_routine;
    use crate::catalog::routine::{FunctionDefinition, ReturnSpec};
    use crate::catalog::types::SqlType;
    use crate::catalog::{MemoryCatalog, RoutineCatalog, SearchPath};
    use crate::parser::ast::Statement;
    use crate::parser::sql_parser::parse_statement;

    fn drop_statement(sql: &str) -> crate::parser::ast::DropRoutineStatement {
        match parse_statement(sql).expect("parse") {
            Statement::DropRoutine(stmt) => stmt,
            other => panic!("unexpected statement {other:?}"),
        }
    }

    fn catalog_with_overloads() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        for ty in [SqlType::Int4, SqlType::Text] {
            catalog
                .create_routine(
                    FunctionDefinition::function("f")
                        .param("x", ty)
                        .returns(ReturnSpec::Scalar(SqlType::Int4)),
                    false,
                )
                .expect("create");
        }
        catalog
    }

    #[test]
    fn drop_with_types_removes_one_overload() {
        let mut catalog = catalog_with_overloads();
        let path = SearchPath::default();
        execute_drop_routine(&drop_statement("DROP FUNCTION f(text)"), &mut catalog, &path)
            .expect("drop");
        let remaining = catalog.routines_in_schema("public", "f");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].input_types(), vec![SqlType::Int4]);
    }

    #[test]
    fn drop_by_name_with_overloads_is_not_unique() {
        let mut catalog = catalog_with_overloads();
        let err = execute_drop_routine(
            &drop_statement("DROP FUNCTION f"),
            &mut catalog,
            &SearchPath::default(),
        )
        .expect_err("ambiguous");
        assert_eq!(err.sqlstate, "42725");
    }

    #[test]
    fn drop_if_exists_reports_notice() {
        let mut catalog = MemoryCatalog::new();
        let outcome = execute_drop_routine(
            &drop_statement("DROP PROCEDURE IF EXISTS missing(int4)"),
            &mut catalog,
            &SearchPath::default(),
        )
        .expect("if exists");
        let notice = outcome.notice.expect("notice");
        assert_eq!(notice.message, "procedure missing(integer) does not exist, skipping");
        assert_eq!(outcome.result.command_tag, "DROP PROCEDURE");
    }
}
