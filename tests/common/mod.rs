#![allow(dead_code)]

use pgroutine::Session;
use pgroutine::catalog::routine::FunctionDefinition;
use pgroutine::storage::tuple::ScalarValue;

pub fn session_with(routines: Vec<FunctionDefinition>) -> Session {
    let mut session = Session::new();
    for routine in routines {
        session
            .create_routine(routine, false)
            .expect("routine should be created");
    }
    session
}

pub fn run(session: &mut Session, sql: &str) {
    if let Err(err) = session.execute(sql) {
        panic!("{sql} failed: {err}");
    }
}

pub fn rows(session: &mut Session, sql: &str) -> Vec<Vec<ScalarValue>> {
    match session.execute(sql) {
        Ok(result) => result.rows,
        Err(err) => panic!("{sql} failed: {err}"),
    }
}

/// Single value of a one-row, one-column query.
pub fn scalar(session: &mut Session, sql: &str) -> ScalarValue {
    let mut result = rows(session, sql);
    assert_eq!(result.len(), 1, "{sql} should return one row");
    let mut row = result.remove(0);
    assert_eq!(row.len(), 1, "{sql} should return one column");
    row.remove(0)
}

pub fn text(value: &str) -> ScalarValue {
    ScalarValue::Text(value.to_string())
}

pub fn int(value: i64) -> ScalarValue {
    ScalarValue::Int(value)
}
