mod common;

use common::{run, scalar, session_with, text};
use pgroutine::catalog::routine::{FunctionDefinition, ReturnSpec};
use pgroutine::catalog::types::SqlType;
use pgroutine::plpgsql::{
    PlPgSqlRaiseLevel, PlPgSqlRaiseOption, PlPgSqlRaiseOptionType, PlPgSqlStmt, PlPgSqlStmtBlock,
    PlPgSqlStmtRaise, Severity,
};

fn raise_with(
    level: PlPgSqlRaiseLevel,
    condname: Option<&str>,
    message: Option<&str>,
    params: &[&str],
    options: &[(PlPgSqlRaiseOptionType, &str)],
) -> PlPgSqlStmt {
    PlPgSqlStmt::Raise(PlPgSqlStmtRaise {
        elog_level: level,
        condname: condname.map(str::to_string),
        message: message.map(str::to_string),
        params: params.iter().map(|param| (*param).into()).collect(),
        options: options
            .iter()
            .map(|(opt_type, expr)| PlPgSqlRaiseOption {
                opt_type: *opt_type,
                expr: (*expr).into(),
            })
            .collect(),
    })
}

fn raise1() -> FunctionDefinition {
    FunctionDefinition::function("interpreted_raise1")
        .param("input", SqlType::Text)
        .returns(ReturnSpec::Scalar(SqlType::Text))
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::raise(PlPgSqlRaiseLevel::Warning, "MyMessage", &[]),
                raise_with(
                    PlPgSqlRaiseLevel::Notice,
                    None,
                    None,
                    &[],
                    &[(PlPgSqlRaiseOptionType::Message, "'MyNoticeMessage'")],
                ),
                raise_with(
                    PlPgSqlRaiseLevel::Debug,
                    None,
                    Some("DebugTest1"),
                    &[],
                    &[(PlPgSqlRaiseOptionType::Message, "'DebugMessage'")],
                ),
                PlPgSqlStmt::assign("var1", "input"),
                PlPgSqlStmt::return_("var1"),
            ])
            .declare("var1", "text"),
        )
}

fn raise2() -> FunctionDefinition {
    FunctionDefinition::function("interpreted_raise2")
        .param("input", SqlType::Text)
        .returns(ReturnSpec::Scalar(SqlType::Text))
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::raise(
                    PlPgSqlRaiseLevel::Exception,
                    "% %% bar %",
                    &["'foo'", "1+1"],
                ),
                PlPgSqlStmt::assign("var1", "input"),
                PlPgSqlStmt::return_("var1"),
            ])
            .declare("var1", "text"),
        )
}

#[test]
fn notices_arrive_in_raise_order() {
    let mut session = session_with(vec![raise1()]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_raise1('abc')"), text("abc"));
    let notices: Vec<(Severity, String)> = session
        .take_notices()
        .into_iter()
        .map(|notice| (notice.severity, notice.message))
        .collect();
    assert_eq!(
        notices,
        vec![
            (Severity::Warning, "MyMessage".to_string()),
            (Severity::Notice, "MyNoticeMessage".to_string()),
            (Severity::Debug, "DebugMessage".to_string()),
        ]
    );
    assert!(session.take_notices().is_empty());
}

#[test]
fn client_min_messages_filters_lower_levels() {
    let mut session = session_with(vec![raise1()]);
    run(&mut session, "SET client_min_messages = warning");
    run(&mut session, "SELECT interpreted_raise1('abc')");
    let notices = session.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].severity, Severity::Warning);
    assert_eq!(notices[0].sqlstate, "01000");
}

#[test]
fn raise_exception_formats_message_and_aborts() {
    let mut session = session_with(vec![raise2()]);
    let err = session
        .execute("SELECT interpreted_raise2('abc')")
        .expect_err("exception");
    assert_eq!(err.sqlstate, "P0001");
    assert_eq!(err.message, "foo % bar 2");
    assert_eq!(
        err.context.as_deref(),
        Some("PL/pgSQL function interpreted_raise2(text) at RAISE")
    );
    assert!(session.take_notices().is_empty());
}

#[test]
fn notices_before_an_exception_are_still_delivered() {
    let def = FunctionDefinition::function("halfway")
        .returns(ReturnSpec::Void)
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::raise(PlPgSqlRaiseLevel::Notice, "step %", &["1"]),
            raise_with(
                PlPgSqlRaiseLevel::Exception,
                None,
                Some("giving up"),
                &[],
                &[
                    (PlPgSqlRaiseOptionType::Errcode, "'22012'"),
                    (PlPgSqlRaiseOptionType::Hint, "'try ' || 'again'"),
                ],
            ),
            PlPgSqlStmt::raise(PlPgSqlRaiseLevel::Notice, "never", &[]),
        ]));
    let mut session = session_with(vec![def]);
    let err = session.execute("SELECT halfway()").expect_err("raised");
    assert_eq!(err.sqlstate, "22012");
    assert_eq!(err.hint.as_deref(), Some("try again"));
    let notices = session.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "step 1");
}

#[test]
fn condition_names_set_sqlstate_and_default_message() {
    let def = FunctionDefinition::function("by_condition")
        .returns(ReturnSpec::Void)
        .body(PlPgSqlStmtBlock::new(vec![raise_with(
            PlPgSqlRaiseLevel::Exception,
            Some("division_by_zero"),
            None,
            &[],
            &[],
        )]));
    let mut session = session_with(vec![def]);
    let err = session.execute("SELECT by_condition()").expect_err("raised");
    assert_eq!(err.sqlstate, "22012");
    assert_eq!(err.message, "division_by_zero");
}

#[test]
fn bare_raise_outside_handler_is_rejected() {
    let def = FunctionDefinition::function("bare")
        .returns(ReturnSpec::Void)
        .body(PlPgSqlStmtBlock::new(vec![raise_with(
            PlPgSqlRaiseLevel::Exception,
            None,
            None,
            &[],
            &[],
        )]));
    let mut session = session_with(vec![def]);
    let err = session.execute("SELECT bare()").expect_err("no handler");
    assert_eq!(err.sqlstate, "0Z002");
}

#[test]
fn nested_calls_interleave_notices_and_chain_context() {
    let inner = FunctionDefinition::function("inner_fn")
        .param("n", SqlType::Int4)
        .returns(ReturnSpec::Scalar(SqlType::Int4))
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::raise(PlPgSqlRaiseLevel::Notice, "inner %", &["n"]),
            PlPgSqlStmt::if_then(
                "n > 1",
                vec![PlPgSqlStmt::raise(PlPgSqlRaiseLevel::Exception, "too big: %", &["n"])],
                vec![],
            ),
            PlPgSqlStmt::return_("n"),
        ]));
    let outer = FunctionDefinition::function("outer_fn")
        .param("n", SqlType::Int4)
        .returns(ReturnSpec::Scalar(SqlType::Int4))
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::raise(PlPgSqlRaiseLevel::Notice, "outer before", &[]),
                PlPgSqlStmt::assign("got", "inner_fn(n)"),
                PlPgSqlStmt::raise(PlPgSqlRaiseLevel::Notice, "outer after %", &["got"]),
                PlPgSqlStmt::return_("got"),
            ])
            .declare("got", "int4"),
        );
    let mut session = session_with(vec![inner, outer]);

    run(&mut session, "SELECT outer_fn(1)");
    let messages: Vec<String> = session
        .take_notices()
        .into_iter()
        .map(|notice| notice.message)
        .collect();
    assert_eq!(messages, ["outer before", "inner 1", "outer after 1"]);

    let err = session.execute("SELECT outer_fn(2)").expect_err("inner raises");
    assert_eq!(err.message, "too big: 2");
    let context = err.context.expect("context");
    let inner_at = context.find("inner_fn(integer) at RAISE").expect("inner frame");
    let outer_at = context.find("outer_fn(integer) at assignment").expect("outer frame");
    assert!(inner_at < outer_at, "{context}");
    let messages: Vec<String> = session
        .take_notices()
        .into_iter()
        .map(|notice| notice.message)
        .collect();
    assert_eq!(messages, ["outer before", "inner 2"]);
}

#[test]
fn cancellation_stops_a_running_loop() {
    let def = FunctionDefinition::function("spin_forever")
        .returns(ReturnSpec::Void)
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::loop_(
            None,
            vec![PlPgSqlStmt::Null],
        )]));
    let mut session = session_with(vec![def]);
    session
        .cancel_handle()
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let err = session.execute("SELECT spin_forever()").expect_err("canceled");
    assert_eq!(err.sqlstate, "57014");
}
