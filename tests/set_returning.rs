mod common;

use common::{int, rows, run, session_with, text};
use pgroutine::catalog::routine::{FunctionDefinition, ReturnSpec};
use pgroutine::catalog::types::SqlType;
use pgroutine::plpgsql::{
    PlPgSqlStmt, PlPgSqlStmtBlock, PlPgSqlStmtFori, PlPgSqlStmtFors, PlPgSqlStmtReturnNext,
};
use pgroutine::storage::tuple::ScalarValue;

fn counting_up(name: &str, limit: i64) -> FunctionDefinition {
    FunctionDefinition::function(name)
        .returns(ReturnSpec::SetOf(SqlType::Int4))
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::Fori(PlPgSqlStmtFori {
            label: None,
            var: "i".to_string(),
            lower: "1".into(),
            upper: limit.to_string().into(),
            step: None,
            reverse: false,
            body: vec![PlPgSqlStmt::return_next("i * 10")],
        })]))
}

fn int_rows(values: &[i64]) -> Vec<Vec<ScalarValue>> {
    values.iter().map(|value| vec![int(*value)]).collect()
}

#[test]
fn return_next_accumulates_rows_in_order() {
    let mut session = session_with(vec![counting_up("tens", 3)]);
    assert_eq!(
        rows(&mut session, "SELECT * FROM tens()"),
        int_rows(&[10, 20, 30])
    );
    assert_eq!(rows(&mut session, "SELECT tens()"), int_rows(&[10, 20, 30]));
}

#[test]
fn return_query_appends_and_execution_continues() {
    let def = FunctionDefinition::function("get_all")
        .returns(ReturnSpec::Table(vec![
            ("id".to_string(), SqlType::Int4),
            ("name".to_string(), SqlType::Text),
        ]))
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::return_query("SELECT id, name FROM items ORDER BY id"),
            PlPgSqlStmt::return_query("SELECT id + 100, upper(name) FROM items ORDER BY id"),
            PlPgSqlStmt::return_void(),
        ]));
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE items (id INT4, name TEXT)");
    run(&mut session, "INSERT INTO items VALUES (2, 'b'), (1, 'a')");
    let result = session.execute("SELECT * FROM get_all()").expect("select");
    assert_eq!(result.columns, ["id", "name"]);
    assert_eq!(
        result.rows,
        vec![
            vec![int(1), text("a")],
            vec![int(2), text("b")],
            vec![int(101), text("A")],
            vec![int(102), text("B")],
        ]
    );
}

#[test]
fn returns_table_row_comes_from_output_columns() {
    let def = FunctionDefinition::function("pairs")
        .param("n", SqlType::Int4)
        .returns(ReturnSpec::Table(vec![
            ("k".to_string(), SqlType::Int4),
            ("sq".to_string(), SqlType::Int8),
        ]))
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::Fori(PlPgSqlStmtFori {
            label: None,
            var: "i".to_string(),
            lower: "1".into(),
            upper: "n".into(),
            step: None,
            reverse: false,
            body: vec![
                PlPgSqlStmt::assign("k", "i"),
                PlPgSqlStmt::assign("sq", "i * i"),
                PlPgSqlStmt::ReturnNext(PlPgSqlStmtReturnNext { expr: None }),
            ],
        })]));
    let mut session = session_with(vec![def]);
    assert_eq!(
        rows(&mut session, "SELECT k, sq FROM pairs(3) WHERE sq > 1"),
        vec![vec![int(2), int(4)], vec![int(3), int(9)]]
    );
}

#[test]
fn empty_set_yields_no_rows() {
    let mut session = session_with(vec![counting_up("nothing", 0)]);
    assert!(rows(&mut session, "SELECT * FROM nothing()").is_empty());
}

#[test]
fn set_returning_targets_zip_with_null_padding() {
    let mut session = session_with(vec![counting_up("three", 3), counting_up("two", 2)]);
    let result = session.execute("SELECT three(), two()").expect("select");
    assert_eq!(result.columns, ["three", "two"]);
    assert_eq!(
        result.rows,
        vec![
            vec![int(10), int(10)],
            vec![int(20), int(20)],
            vec![int(30), ScalarValue::Null],
        ]
    );
}

#[test]
fn same_function_twice_yields_independent_streams() {
    let letters = FunctionDefinition::function("ab")
        .returns(ReturnSpec::SetOf(SqlType::Text))
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::return_next("'A'"),
            PlPgSqlStmt::return_next("'B'"),
        ]));
    let mut session = session_with(vec![letters]);
    assert_eq!(
        rows(&mut session, "SELECT ab(), ab()"),
        vec![vec![text("A"), text("A")], vec![text("B"), text("B")]]
    );
}

#[test]
fn rows_from_with_ordinality_numbers_zipped_rows() {
    let mut session = session_with(vec![counting_up("three", 3), counting_up("one", 1)]);
    let result = session
        .execute("SELECT * FROM ROWS FROM (three(), one()) WITH ORDINALITY")
        .expect("select");
    assert_eq!(result.columns, ["three", "one", "ordinality"]);
    assert_eq!(
        result.rows,
        vec![
            vec![int(10), int(10), int(1)],
            vec![int(20), ScalarValue::Null, int(2)],
            vec![int(30), ScalarValue::Null, int(3)],
        ]
    );
}

#[test]
fn function_scan_with_ordinality() {
    let mut session = session_with(vec![counting_up("tens", 2)]);
    assert_eq!(
        rows(&mut session, "SELECT * FROM tens() WITH ORDINALITY"),
        vec![vec![int(10), int(1)], vec![int(20), int(2)]]
    );
}

#[test]
fn builtin_generate_series_feeds_a_query_loop() {
    let def = FunctionDefinition::function("sum_series")
        .param("hi", SqlType::Int4)
        .returns(ReturnSpec::Scalar(SqlType::Int8))
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::Fors(PlPgSqlStmtFors {
                    label: None,
                    target: vec!["v".to_string()],
                    query: "SELECT * FROM generate_series(1, hi)".into(),
                    body: vec![PlPgSqlStmt::assign("total", "total + v")],
                }),
                PlPgSqlStmt::return_("total"),
            ])
            .declare("total", "int8")
            .declare("v", "int4"),
        );
    let mut session = session_with(vec![def]);
    assert_eq!(rows(&mut session, "SELECT sum_series(10)"), int_rows(&[55]));
}

#[test]
fn return_next_outside_set_function_is_rejected() {
    let def = FunctionDefinition::function("scalar_next")
        .returns(ReturnSpec::Scalar(SqlType::Int4))
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::return_next("1"),
            PlPgSqlStmt::return_("1"),
        ]));
    let mut session = session_with(vec![def]);
    let err = session.execute("SELECT scalar_next()").expect_err("not SETOF");
    assert_eq!(err.sqlstate, "42804");
}
