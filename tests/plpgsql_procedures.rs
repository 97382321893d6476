mod common;

use common::{int, rows, run, session_with, text};
use pgroutine::catalog::routine::{FunctionDefinition, ParamMode};
use pgroutine::catalog::types::SqlType;
use pgroutine::plpgsql::{PlPgSqlStmt, PlPgSqlStmtBlock};

#[test]
fn call_inserts_coerced_argument() {
    let def = FunctionDefinition::procedure("example")
        .param("input", SqlType::Int8)
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::sql(
            "INSERT INTO test VALUES (input)",
        )]));
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE test (v1 INT8)");
    let result = session.execute("CALL example(1)").expect("call");
    assert!(result.rows.is_empty());
    assert_eq!(result.command_tag, "CALL");
    run(&mut session, "CALL example('2')");
    assert_eq!(
        rows(&mut session, "SELECT * FROM test"),
        vec![vec![int(1)], vec![int(2)]]
    );
}

#[test]
fn labeled_while_in_procedure_writes_final_value() {
    let def = FunctionDefinition::procedure("interpreted_while_label")
        .param("input", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::while_(
                    Some("while_label"),
                    "input < 1000",
                    vec![
                        PlPgSqlStmt::assign("input", "input + 1"),
                        PlPgSqlStmt::assign("counter", "counter + 1"),
                        PlPgSqlStmt::if_then(
                            "counter >= 10",
                            vec![PlPgSqlStmt::exit(Some("while_label"), None)],
                            vec![],
                        ),
                    ],
                ),
                PlPgSqlStmt::sql("INSERT INTO test VALUES (input)"),
            ])
            .declare("counter", "int4"),
        );
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE test (v1 INT8)");
    run(&mut session, "CALL interpreted_while_label(42)");
    assert_eq!(rows(&mut session, "SELECT * FROM test"), vec![vec![int(52)]]);
}

#[test]
fn overloaded_procedures_pick_by_argument_type() {
    let by_text = FunctionDefinition::procedure("interpreted_overload")
        .param("input", SqlType::Text)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::if_then(
                    "length(input) > 3",
                    vec![PlPgSqlStmt::assign("var1", "input || '_long'")],
                    vec![PlPgSqlStmt::assign("var1", "input")],
                ),
                PlPgSqlStmt::sql("INSERT INTO test VALUES (var1)"),
            ])
            .declare("var1", "text"),
        );
    let by_int = FunctionDefinition::procedure("interpreted_overload")
        .param("input", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::if_then(
                    "input > 3",
                    vec![PlPgSqlStmt::assign("var1", "-input")],
                    vec![PlPgSqlStmt::assign("var1", "input")],
                ),
                PlPgSqlStmt::sql("INSERT INTO test VALUES (var1::text)"),
            ])
            .declare("var1", "int4"),
        );
    let mut session = session_with(vec![by_text, by_int]);
    run(&mut session, "CREATE TABLE test (v1 TEXT)");
    for call in [
        "CALL interpreted_overload('abc')",
        "CALL interpreted_overload('abcd')",
        "CALL interpreted_overload(3)",
        "CALL interpreted_overload(4)",
    ] {
        run(&mut session, call);
    }
    assert_eq!(
        rows(&mut session, "SELECT * FROM test"),
        vec![
            vec![text("abc")],
            vec![text("abcd_long")],
            vec![text("3")],
            vec![text("-4")],
        ]
    );
}

fn branch_procedure(key: i64, offset: i64) -> FunctionDefinition {
    FunctionDefinition::procedure("interpreted_branch")
        .param("input", SqlType::Int4)
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::sql(&format!("DELETE FROM test WHERE v1 = {key}")),
            PlPgSqlStmt::sql(&format!("INSERT INTO test VALUES ({key}, input + {offset})")),
        ]))
}

#[test]
fn replacing_a_procedure_changes_later_calls() {
    let mut session = session_with(vec![branch_procedure(1, 100)]);
    run(&mut session, "CREATE TABLE test (v1 INT4, v2 INT4)");
    run(&mut session, "CALL interpreted_branch(4)");
    assert_eq!(rows(&mut session, "SELECT * FROM test"), vec![vec![int(1), int(104)]]);
    run(&mut session, "DELETE FROM test WHERE v1 = 1");

    let duplicate = session
        .create_routine(branch_procedure(2, 1000), false)
        .expect_err("same signature without OR REPLACE");
    assert_eq!(duplicate.sqlstate, "42723");
    session
        .create_routine(branch_procedure(2, 1000), true)
        .expect("replace");
    run(&mut session, "CALL interpreted_branch(56)");
    assert_eq!(rows(&mut session, "SELECT * FROM test"), vec![vec![int(2), int(1056)]]);
}

#[test]
fn text_parameter_cast_inside_body_and_missing_overload() {
    let def = FunctionDefinition::procedure("interpreted_merging")
        .param("input", SqlType::Text)
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::sql("DELETE FROM test WHERE v1 = 2"),
            PlPgSqlStmt::sql("INSERT INTO test VALUES (2, input::int4 + 100)"),
        ]));
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE test (v1 INT4, v2 INT4)");
    run(&mut session, "INSERT INTO test VALUES (1, 77)");
    run(&mut session, "CALL interpreted_merging('12')");
    assert_eq!(
        rows(&mut session, "SELECT * FROM test"),
        vec![vec![int(1), int(77)], vec![int(2), int(112)]]
    );

    let err = session
        .execute("CALL interpreted_merging(55)")
        .expect_err("integer argument has no implicit cast to text");
    assert_eq!(err.sqlstate, "42883");
    assert!(err.message.contains("does not exist"), "{}", err.message);
}

#[test]
fn inout_parameters_come_back_as_a_row() {
    let def = FunctionDefinition::procedure("double_it")
        .param_with_mode("amount", SqlType::Int4, ParamMode::InOut)
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::assign(
            "amount",
            "amount * 2",
        )]));
    let mut session = session_with(vec![def]);
    let result = session.execute("CALL double_it(21)").expect("call");
    assert_eq!(result.columns, vec!["amount".to_string()]);
    assert_eq!(result.rows, vec![vec![int(42)]]);
}

#[test]
fn procedures_cannot_be_selected_and_functions_cannot_be_called() {
    let procedure = FunctionDefinition::procedure("only_call")
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::Null]));
    let mut session = session_with(vec![procedure]);
    let err = session
        .execute("SELECT only_call()")
        .expect_err("procedure in SELECT");
    assert_eq!(err.sqlstate, "42883");

    let err = session.execute("CALL lower('A')").expect_err("not a procedure");
    assert_eq!(err.sqlstate, "42883");
}

#[test]
fn procedure_failure_rolls_back_nothing_but_reports_context() {
    let def = FunctionDefinition::procedure("insert_twice")
        .param("v", SqlType::Int4)
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::sql("INSERT INTO test VALUES (v)"),
            PlPgSqlStmt::sql("INSERT INTO test VALUES (v)"),
        ]));
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE test (v1 INT4 PRIMARY KEY)");
    let err = session.execute("CALL insert_twice(5)").expect_err("duplicate key");
    assert_eq!(err.sqlstate, "23505");
    let context = err.context.expect("context");
    assert!(
        context.contains("PL/pgSQL function insert_twice(integer) at SQL statement"),
        "{context}"
    );
    // Statements before the failure stay applied; there are no transactions.
    assert_eq!(rows(&mut session, "SELECT * FROM test"), vec![vec![int(5)]]);
}
