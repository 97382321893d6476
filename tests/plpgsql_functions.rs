mod common;

use common::{int, rows, run, scalar, session_with, text};
use pgroutine::Session;
use pgroutine::catalog::routine::{FunctionDefinition, ReturnSpec};
use pgroutine::catalog::types::SqlType;
use pgroutine::plpgsql::{
    PlPgSqlCaseWhen, PlPgSqlDiagItem, PlPgSqlExpr, PlPgSqlGetdiagKind, PlPgSqlIfElsif,
    PlPgSqlStmt, PlPgSqlStmtAssert, PlPgSqlStmtBlock, PlPgSqlStmtCase, PlPgSqlStmtFori,
    PlPgSqlStmtFors, PlPgSqlStmtGetdiag, PlPgSqlStmtIf,
};
use pgroutine::storage::tuple::ScalarValue;

fn int4_function(name: &str) -> FunctionDefinition {
    FunctionDefinition::function(name).returns(ReturnSpec::Scalar(SqlType::Int4))
}

fn text_function(name: &str) -> FunctionDefinition {
    FunctionDefinition::function(name).returns(ReturnSpec::Scalar(SqlType::Text))
}

fn if_elsif(
    cond: &str,
    then_body: Vec<PlPgSqlStmt>,
    elsif: Vec<(&str, Vec<PlPgSqlStmt>)>,
    else_body: Vec<PlPgSqlStmt>,
) -> PlPgSqlStmt {
    PlPgSqlStmt::If(PlPgSqlStmtIf {
        cond: cond.into(),
        then_body,
        elsif_list: elsif
            .into_iter()
            .map(|(cond, stmts)| PlPgSqlIfElsif {
                cond: cond.into(),
                stmts,
            })
            .collect(),
        else_body,
    })
}

fn case_stmt(
    t_expr: Option<&str>,
    whens: Vec<(Vec<&str>, Vec<PlPgSqlStmt>)>,
    else_stmts: Option<Vec<PlPgSqlStmt>>,
) -> PlPgSqlStmt {
    PlPgSqlStmt::Case(PlPgSqlStmtCase {
        t_expr: t_expr.map(PlPgSqlExpr::from),
        case_when_list: whens
            .into_iter()
            .map(|(exprs, stmts)| PlPgSqlCaseWhen {
                exprs: exprs.into_iter().map(PlPgSqlExpr::from).collect(),
                stmts,
            })
            .collect(),
        else_stmts,
    })
}

#[test]
fn assignment_with_elsif_chain() {
    let def = text_function("interpreted_assignment")
        .param("input", SqlType::Text)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::assign("var1", "'Initial: ' || input"),
                if_elsif(
                    "input = 'Hello'",
                    vec![PlPgSqlStmt::assign("var1", "var1 || ' - Greeting'")],
                    vec![
                        (
                            "input = 'Bye'",
                            vec![PlPgSqlStmt::assign("var1", "var1 || ' - Farewell'")],
                        ),
                        (
                            "length(input) > 5",
                            vec![PlPgSqlStmt::assign("var1", "var1 || ' - Over 5'")],
                        ),
                    ],
                    vec![PlPgSqlStmt::assign("var1", "var1 || ' - Else'")],
                ),
                PlPgSqlStmt::return_("var1"),
            ])
            .declare("var1", "text"),
        );
    let mut session = session_with(vec![def]);
    for (input, expected) in [
        ("Hello", "Initial: Hello - Greeting"),
        ("Bye", "Initial: Bye - Farewell"),
        ("abc", "Initial: abc - Else"),
        ("something", "Initial: something - Over 5"),
    ] {
        assert_eq!(
            scalar(&mut session, &format!("SELECT interpreted_assignment('{input}')")),
            text(expected)
        );
    }
}

fn case_routine(with_else: bool) -> FunctionDefinition {
    let else_stmts = with_else.then(|| {
        vec![
            PlPgSqlStmt::assign("msg", "'other'"),
            PlPgSqlStmt::assign("msg", "msg || ' value than one or two'"),
        ]
    });
    text_function("interpreted_case")
        .param("x", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                case_stmt(
                    Some("x"),
                    vec![(
                        vec!["1", "2"],
                        vec![
                            PlPgSqlStmt::assign("msg", "'one'"),
                            PlPgSqlStmt::assign("msg", "msg || ' or two'"),
                        ],
                    )],
                    else_stmts,
                ),
                PlPgSqlStmt::return_("msg"),
            ])
            .declare("msg", "text"),
        )
}

#[test]
fn simple_case_matches_value_lists() {
    let mut session = session_with(vec![case_routine(true)]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_case(1)"), text("one or two"));
    assert_eq!(scalar(&mut session, "SELECT interpreted_case(2)"), text("one or two"));
    assert_eq!(
        scalar(&mut session, "SELECT interpreted_case(0)"),
        text("other value than one or two")
    );
}

#[test]
fn case_without_match_or_else_raises_case_not_found() {
    let mut session = session_with(vec![case_routine(false)]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_case(2)"), text("one or two"));
    let err = session
        .execute("SELECT interpreted_case(0)")
        .expect_err("no WHEN matches");
    assert_eq!(err.sqlstate, "20000");
    assert!(err.message.contains("case not found"));
    assert!(
        err.context
            .as_deref()
            .is_some_and(|context| context.contains("interpreted_case(integer) at CASE"))
    );
}

#[test]
fn case_not_found_can_be_ignored_by_setting() {
    let mut session = session_with(vec![case_routine(false)]);
    run(&mut session, "SET plpgsql.case_not_found = ignore");
    assert_eq!(scalar(&mut session, "SELECT interpreted_case(0)"), text(""));
}

#[test]
fn searched_case_runs_only_first_true_branch() {
    let def = text_function("interpreted_case")
        .param("x", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                case_stmt(
                    None,
                    vec![
                        (
                            vec!["x BETWEEN 0 AND 10"],
                            vec![
                                PlPgSqlStmt::assign("msg", "'value is between zero'"),
                                PlPgSqlStmt::assign("msg", "msg || ' and ten'"),
                            ],
                        ),
                        (
                            vec!["x BETWEEN 5 AND 20"],
                            vec![PlPgSqlStmt::assign(
                                "msg",
                                "'value is between five and twenty'",
                            )],
                        ),
                    ],
                    Some(vec![PlPgSqlStmt::assign("msg", "'value is out of bounds'")]),
                ),
                PlPgSqlStmt::return_("msg"),
            ])
            .declare("msg", "text"),
        );
    let mut session = session_with(vec![def]);
    assert_eq!(
        scalar(&mut session, "SELECT interpreted_case(7)"),
        text("value is between zero and ten")
    );
    assert_eq!(
        scalar(&mut session, "SELECT interpreted_case(11)"),
        text("value is between five and twenty")
    );
    assert_eq!(
        scalar(&mut session, "SELECT interpreted_case(21)"),
        text("value is out of bounds")
    );
}

#[test]
fn continue_and_exit_in_unlabeled_loops() {
    let continue_fn = int4_function("interpreted_continue").body(
        PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::loop_(
            None,
            vec![
                PlPgSqlStmt::assign("var1", "var1 + 1"),
                PlPgSqlStmt::if_then("var1 < 4", vec![PlPgSqlStmt::continue_(None, None)], vec![]),
                PlPgSqlStmt::return_("var1"),
            ],
        )])
        .declare("var1", "int4"),
    );
    let exit_fn = int4_function("interpreted_exit").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::loop_(
                None,
                vec![
                    PlPgSqlStmt::assign("var1", "var1 + 1"),
                    PlPgSqlStmt::if_then("var1 >= 8", vec![PlPgSqlStmt::exit(None, None)], vec![]),
                ],
            ),
            PlPgSqlStmt::return_("var1"),
        ])
        .declare("var1", "int4"),
    );
    let exit_when_fn = int4_function("interpreted_exit_when").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::loop_(
                None,
                vec![
                    PlPgSqlStmt::assign("var1", "var1 + 1"),
                    PlPgSqlStmt::exit(None, Some("var1 >= 9")),
                ],
            ),
            PlPgSqlStmt::return_("var1"),
        ])
        .declare("var1", "int4"),
    );
    let loop_fn = int4_function("interpreted_loop").body(
        PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::loop_(
            None,
            vec![
                PlPgSqlStmt::assign("var1", "var1 + 1"),
                PlPgSqlStmt::if_then("var1 >= 10", vec![PlPgSqlStmt::return_("var1")], vec![]),
            ],
        )])
        .declare("var1", "int4"),
    );
    let mut session = session_with(vec![continue_fn, exit_fn, exit_when_fn, loop_fn]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_continue()"), int(4));
    assert_eq!(scalar(&mut session, "SELECT interpreted_exit()"), int(8));
    assert_eq!(scalar(&mut session, "SELECT interpreted_exit_when()"), int(9));
    assert_eq!(scalar(&mut session, "SELECT interpreted_loop()"), int(10));
}

#[test]
fn labeled_exit_and_continue_target_the_named_loop() {
    // outer runs 3 times; inner exits the outer loop from two levels down
    // once total reaches 7, and CONTINUE outer skips the rest of inner.
    let def = int4_function("nested_labels").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::loop_(
                Some("outer"),
                vec![
                    PlPgSqlStmt::assign("rounds", "rounds + 1"),
                    PlPgSqlStmt::exit(Some("outer"), Some("rounds > 3")),
                    PlPgSqlStmt::loop_(
                        Some("inner"),
                        vec![
                            PlPgSqlStmt::assign("total", "total + 1"),
                            PlPgSqlStmt::loop_(
                                None,
                                vec![
                                    PlPgSqlStmt::exit(Some("outer"), Some("total >= 7")),
                                    PlPgSqlStmt::exit(None, None),
                                ],
                            ),
                            PlPgSqlStmt::continue_(Some("outer"), Some("total % 2 = 0")),
                        ],
                    ),
                ],
            ),
            PlPgSqlStmt::return_("total * 100 + rounds"),
        ])
        .declare("total", "int4")
        .declare("rounds", "int4"),
    );
    let mut session = session_with(vec![def]);
    // round 1: total 1, 2 -> continue outer; round 2: 3, 4 -> continue outer;
    // round 3: 5, 6 -> continue outer; round 4 exits before inner.
    assert_eq!(scalar(&mut session, "SELECT nested_labels()"), int(604));
}

#[test]
fn labeled_loops_with_original_counters() {
    let continue_label = int4_function("interpreted_continue_label").body(
        PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::loop_(
            Some("cont_label"),
            vec![
                PlPgSqlStmt::assign("var1", "var1 + 1"),
                PlPgSqlStmt::if_then(
                    "var1 < 6",
                    vec![PlPgSqlStmt::continue_(Some("cont_label"), None)],
                    vec![],
                ),
                PlPgSqlStmt::return_("var1"),
            ],
        )])
        .declare("var1", "int4"),
    );
    let loop_label = int4_function("interpreted_loop_label").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::loop_(
                Some("loop_label"),
                vec![
                    PlPgSqlStmt::assign("var1", "var1 + 1"),
                    PlPgSqlStmt::if_then(
                        "var1 >= 12",
                        vec![PlPgSqlStmt::exit(Some("loop_label"), None)],
                        vec![],
                    ),
                ],
            ),
            PlPgSqlStmt::return_("var1"),
        ])
        .declare("var1", "int4"),
    );
    let mut session = session_with(vec![continue_label, loop_label]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_continue_label()"), int(6));
    assert_eq!(scalar(&mut session, "SELECT interpreted_loop_label()"), int(12));
}

#[test]
fn while_loop_terminates_at_fifty_eight() {
    let def = int4_function("interpreted_while")
        .param("input", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::while_(
                    None,
                    "counter + input < 100",
                    vec![
                        PlPgSqlStmt::assign("counter", "counter + 1"),
                        PlPgSqlStmt::assign("counter", "counter - 1"),
                        PlPgSqlStmt::assign("counter", "counter + 1"),
                    ],
                ),
                PlPgSqlStmt::return_("counter"),
            ])
            .declare("counter", "int4"),
        );
    let mut session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_while(42)"), int(58));
}

#[test]
fn labeled_while_exits_after_ten_rounds() {
    let def = int4_function("interpreted_while_label")
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
                PlPgSqlStmt::return_("input"),
            ])
            .declare("counter", "int4"),
        );
    let mut session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_while_label(42)"), int(52));
}

#[test]
fn null_statement_is_a_no_op() {
    let def = text_function("interpreted_null")
        .param("input", SqlType::Int4)
        .body(PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::if_then(
                "input = 42",
                vec![PlPgSqlStmt::Null, PlPgSqlStmt::Null],
                vec![PlPgSqlStmt::return_("'No'")],
            ),
            PlPgSqlStmt::Null,
            PlPgSqlStmt::return_("'Yes'"),
        ]));
    let mut session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_null(42)"), text("Yes"));
    assert_eq!(scalar(&mut session, "SELECT interpreted_null(43)"), text("No"));
}

#[test]
fn variable_references_inside_string_literals_are_untouched() {
    let def = text_function("test1")
        .param("input", SqlType::Text)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::assign("var1", "'input' || input"),
                PlPgSqlStmt::if_then(
                    "var1 = 'input' || input",
                    vec![PlPgSqlStmt::return_("var1 || 'var1'")],
                    vec![PlPgSqlStmt::return_("'!!!'")],
                ),
            ])
            .declare("var1", "text"),
        );
    let mut session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT test1('Hello')"), text("inputHellovar1"));
}

#[test]
fn alias_chain_writes_through_to_target() {
    let def = text_function("interpreted_alias")
        .param("input", SqlType::Text)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::Block(
                    PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::assign("alias2", "alias3")])
                        .alias("alias1", "var1")
                        .alias("alias2", "alias1")
                        .alias("alias3", "input"),
                ),
                PlPgSqlStmt::return_("var1"),
            ])
            .declare("var1", "text")
            .declare("var2", "text"),
        );
    let mut session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT interpreted_alias('123')"), text("123"));
}

#[test]
fn perform_runs_query_and_discards_rows() {
    let def = FunctionDefinition::function("interpreted_perform")
        .returns(ReturnSpec::Void)
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::perform(
            "nextval('test_sequence')",
        )]));
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE SEQUENCE test_sequence");
    assert_eq!(scalar(&mut session, "SELECT nextval('test_sequence')"), int(1));
    assert_eq!(scalar(&mut session, "SELECT interpreted_perform()"), ScalarValue::Null);
    assert_eq!(scalar(&mut session, "SELECT nextval('test_sequence')"), int(3));
}

fn select_into_routine() -> FunctionDefinition {
    text_function("interpreted_select_into")
        .param("input", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::sql("DROP TABLE IF EXISTS temp_table"),
                PlPgSqlStmt::sql(
                    "CREATE TABLE temp_table (pk SERIAL PRIMARY KEY, v1 TEXT NOT NULL)",
                ),
                PlPgSqlStmt::sql("INSERT INTO temp_table (v1) VALUES ('abc'), ('def'), ('ghi')"),
                PlPgSqlStmt::select_into("SELECT COUNT(*) FROM temp_table", &["count"], false),
                PlPgSqlStmt::if_then(
                    "input > 0 AND input <= count",
                    vec![PlPgSqlStmt::select_into(
                        "SELECT v1 FROM temp_table WHERE pk = input",
                        &["ret"],
                        false,
                    )],
                    vec![PlPgSqlStmt::assign("ret", "'out of bounds'")],
                ),
                PlPgSqlStmt::return_("ret"),
            ])
            .declare("ret", "text")
            .declare("count", "int4"),
        )
}

#[test]
fn select_into_reads_rows_created_by_the_routine() {
    let mut session = session_with(vec![select_into_routine()]);
    for (input, expected) in [(1, "abc"), (2, "def"), (3, "ghi"), (4, "out of bounds")] {
        assert_eq!(
            scalar(&mut session, &format!("SELECT interpreted_select_into({input})")),
            text(expected)
        );
    }
}

#[test]
fn select_into_without_rows_assigns_null_and_clears_found() {
    let def = text_function("lookup")
        .param("key", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::select_into(
                    "SELECT name FROM items WHERE id = key",
                    &["found_name"],
                    false,
                ),
                PlPgSqlStmt::if_then(
                    "NOT found",
                    vec![PlPgSqlStmt::return_("coalesce(found_name, 'missing')")],
                    vec![],
                ),
                PlPgSqlStmt::return_("found_name"),
            ])
            .declare_default("found_name", "text", "'preset'"),
        );
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE items (id INT4 PRIMARY KEY, name TEXT)");
    run(&mut session, "INSERT INTO items VALUES (1, 'one')");
    assert_eq!(scalar(&mut session, "SELECT lookup(1)"), text("one"));
    assert_eq!(scalar(&mut session, "SELECT lookup(99)"), text("missing"));
}

#[test]
fn strict_select_into_demands_exactly_one_row() {
    let def = int4_function("strict_lookup")
        .param("min_id", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::select_into("SELECT id FROM items WHERE id >= min_id", &["hit"], true),
                PlPgSqlStmt::return_("hit"),
            ])
            .declare("hit", "int4"),
        );
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE items (id INT4)");
    run(&mut session, "INSERT INTO items VALUES (1), (2)");
    assert_eq!(scalar(&mut session, "SELECT strict_lookup(2)"), int(2));
    let none = session.execute("SELECT strict_lookup(5)").expect_err("no rows");
    assert_eq!(none.sqlstate, "P0002");
    let many = session.execute("SELECT strict_lookup(1)").expect_err("two rows");
    assert_eq!(many.sqlstate, "P0003");
}

#[test]
fn select_into_multiple_rows_policy() {
    let def = int4_function("first_id").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::select_into("SELECT id FROM items ORDER BY id DESC", &["hit"], false),
            PlPgSqlStmt::return_("hit"),
        ])
        .declare("hit", "int4"),
    );
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE items (id INT4)");
    run(&mut session, "INSERT INTO items VALUES (1), (2), (3)");
    assert_eq!(scalar(&mut session, "SELECT first_id()"), int(3));
    run(&mut session, "SET plpgsql.select_into_multiple_rows = error");
    let err = session.execute("SELECT first_id()").expect_err("too many rows");
    assert_eq!(err.sqlstate, "P0003");
}

#[test]
fn recursion_keeps_locals_per_frame() {
    // Each level sets its local before recursing and reads it afterwards.
    let def = int4_function("fact")
        .param("n", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::assign("mine", "n"),
                PlPgSqlStmt::if_then("n <= 1", vec![PlPgSqlStmt::return_("1")], vec![]),
                PlPgSqlStmt::assign("below", "fact(n - 1)"),
                PlPgSqlStmt::return_("mine * below"),
            ])
            .declare("mine", "int4")
            .declare("below", "int4"),
        );
    let mut session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT fact(6)"), int(720));
}

#[test]
fn runaway_recursion_hits_stack_depth_limit() {
    let def = int4_function("forever")
        .param("n", SqlType::Int4)
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::return_("forever(n + 1)")]));
    let mut session = session_with(vec![def]);
    run(&mut session, "SET max_stack_depth = 8");
    let err = session.execute("SELECT forever(0)").expect_err("too deep");
    assert_eq!(err.sqlstate, "54001");
    let context = err.context.expect("call stack");
    assert!(context.matches("forever(integer)").count() >= 8, "{context}");
}

#[test]
fn integer_for_loops_count_both_directions() {
    let def = int4_function("stepped")
        .param("reverse_it", SqlType::Bool)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::if_then(
                    "reverse_it",
                    vec![PlPgSqlStmt::Fori(PlPgSqlStmtFori {
                        label: None,
                        var: "i".to_string(),
                        lower: "10".into(),
                        upper: "1".into(),
                        step: Some("3".into()),
                        reverse: true,
                        body: vec![PlPgSqlStmt::assign("total", "total * 10 + i")],
                    })],
                    vec![PlPgSqlStmt::Fori(PlPgSqlStmtFori {
                        label: Some("up".to_string()),
                        var: "i".to_string(),
                        lower: "1".into(),
                        upper: "5".into(),
                        step: None,
                        reverse: false,
                        body: vec![
                            PlPgSqlStmt::continue_(Some("up"), Some("i = 2")),
                            PlPgSqlStmt::assign("total", "total + i"),
                        ],
                    })],
                ),
                PlPgSqlStmt::return_("total"),
            ])
            .declare("total", "int4"),
        );
    let mut session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT stepped(false)"), int(13));
    // 10, 7, 4, 1
    assert_eq!(scalar(&mut session, "SELECT stepped(true)"), int(10741));
}

#[test]
fn query_for_loop_walks_rows_in_order() {
    let def = text_function("joined").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::Fors(PlPgSqlStmtFors {
                label: None,
                target: vec!["item".to_string()],
                query: "SELECT name FROM items ORDER BY id".into(),
                body: vec![PlPgSqlStmt::assign("acc", "acc || item || ';'")],
            }),
            PlPgSqlStmt::if_then("found", vec![], vec![PlPgSqlStmt::return_("'empty'")]),
            PlPgSqlStmt::return_("acc"),
        ])
        .declare("acc", "text")
        .declare("item", "text"),
    );
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE items (id INT4, name TEXT)");
    assert_eq!(scalar(&mut session, "SELECT joined()"), text("empty"));
    run(&mut session, "INSERT INTO items VALUES (2, 'b'), (1, 'a')");
    assert_eq!(scalar(&mut session, "SELECT joined()"), text("a;b;"));
}

#[test]
fn record_variable_takes_whole_row_and_fields_assign() {
    let def = text_function("describe")
        .param("key", SqlType::Int4)
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::select_into("SELECT * FROM items WHERE id = key", &["rec"], true),
                PlPgSqlStmt::assign("rec.name", "upper(rec.name)"),
                PlPgSqlStmt::return_("rec.name || '#' || rec.id"),
            ])
            .declare("rec", "items"),
        );
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE items (id INT4, name TEXT)");
    run(&mut session, "INSERT INTO items VALUES (7, 'seven')");
    assert_eq!(scalar(&mut session, "SELECT describe(7)"), text("SEVEN#7"));
}

#[test]
fn composite_return_renders_as_row_literal() {
    let def = FunctionDefinition::function("make_item")
        .returns(ReturnSpec::Scalar(SqlType::Composite("item".to_string())))
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::return_(
            "ROW(1, 'apple', 3, 12.5)::item",
        )]));
    let mut session = session_with(vec![]);
    run(
        &mut session,
        "CREATE TYPE item AS (id INT4, name TEXT, qty INT4, price NUMERIC)",
    );
    session.create_routine(def, false).expect("create");
    let value = scalar(&mut session, "SELECT make_item()");
    assert_eq!(value.render(), "(1,apple,3,12.5)");
    let rows = rows(&mut session, "SELECT * FROM make_item()");
    assert_eq!(rows, vec![vec![
        int(1),
        text("apple"),
        int(3),
        ScalarValue::Numeric("12.5".parse().expect("decimal")),
    ]]);
}

#[test]
fn assert_and_get_diagnostics() {
    let def = int4_function("touch").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::sql("UPDATE items SET name = 'x' WHERE id > 1"),
            PlPgSqlStmt::Getdiag(PlPgSqlStmtGetdiag {
                diag_items: vec![PlPgSqlDiagItem {
                    kind: PlPgSqlGetdiagKind::RowCount,
                    target: "changed".to_string(),
                }],
            }),
            PlPgSqlStmt::Assert(PlPgSqlStmtAssert {
                cond: "changed < 3".into(),
                message: Some("'too many rows: ' || changed".into()),
            }),
            PlPgSqlStmt::return_("changed"),
        ])
        .declare("changed", "int4"),
    );
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE items (id INT4, name TEXT)");
    run(&mut session, "INSERT INTO items VALUES (1, 'a'), (2, 'b'), (3, 'c')");
    assert_eq!(scalar(&mut session, "SELECT touch()"), int(2));
    run(&mut session, "INSERT INTO items VALUES (4, 'd')");
    let err = session.execute("SELECT touch()").expect_err("assertion");
    assert_eq!(err.sqlstate, "P0004");
    assert_eq!(err.message, "too many rows: 3");
}

#[test]
fn constant_and_not_null_declarations_are_enforced() {
    use pgroutine::plpgsql::PlPgSqlVarDecl;

    let constant = int4_function("bump_constant").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::assign("limit_value", "limit_value + 1"),
            PlPgSqlStmt::return_("limit_value"),
        ])
        .declare_var(PlPgSqlVarDecl {
            refname: "limit_value".to_string(),
            datatype: "int4".into(),
            default_val: Some("10".into()),
            isconst: true,
            notnull: false,
        }),
    );
    let not_null = int4_function("null_into_not_null").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::assign("v", "NULL"),
            PlPgSqlStmt::return_("v"),
        ])
        .declare_var(PlPgSqlVarDecl {
            refname: "v".to_string(),
            datatype: "int4".into(),
            default_val: Some("1".into()),
            isconst: false,
            notnull: true,
        }),
    );
    let mut session = session_with(vec![constant, not_null]);
    let err = session.execute("SELECT bump_constant()").expect_err("constant");
    assert!(err.message.contains("is declared CONSTANT"), "{}", err.message);
    let err = session.execute("SELECT null_into_not_null()").expect_err("not null");
    assert_eq!(err.sqlstate, "22004");
}

#[test]
fn exit_outside_loop_is_rejected_before_running() {
    let def = int4_function("bad_exit").body(PlPgSqlStmtBlock::new(vec![
        PlPgSqlStmt::sql("INSERT INTO log VALUES (1)"),
        PlPgSqlStmt::exit(None, None),
    ]));
    let mut session = session_with(vec![def]);
    run(&mut session, "CREATE TABLE log (v INT4)");
    let err = session.execute("SELECT bad_exit()").expect_err("outside loop");
    assert_eq!(err.sqlstate, "42601");
    assert!(rows(&mut session, "SELECT * FROM log").is_empty());
}

#[test]
fn sql_language_function_returns_last_statement_value() {
    let def = FunctionDefinition::function("add_one")
        .param("x", SqlType::Int4)
        .returns(ReturnSpec::Scalar(SqlType::Int4))
        .sql_body("SELECT x + 1");
    let mut session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT add_one(41)"), int(42));
}

#[test]
fn strict_function_returns_null_for_null_argument() {
    let def = int4_function("doubled")
        .param("x", SqlType::Int4)
        .strict()
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::return_("x * 2")]));
    let mut session: Session = session_with(vec![def]);
    assert_eq!(scalar(&mut session, "SELECT doubled(NULL)"), ScalarValue::Null);
    assert_eq!(scalar(&mut session, "SELECT doubled(4)"), int(8));
}

#[test]
fn nested_loops_cannot_share_a_label() {
    let def = int4_function("dup_labels").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::loop_(
                Some("l"),
                vec![
                    PlPgSqlStmt::assign("n", "n + 1"),
                    PlPgSqlStmt::exit(Some("l"), Some("n > 3")),
                    PlPgSqlStmt::loop_(Some("L"), vec![PlPgSqlStmt::exit(Some("l"), None)]),
                ],
            ),
            PlPgSqlStmt::return_("n"),
        ])
        .declare("n", "int4"),
    );
    // Sibling loops may reuse a label.
    let siblings = int4_function("sibling_labels").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::loop_(
                Some("l"),
                vec![
                    PlPgSqlStmt::assign("n", "n + 1"),
                    PlPgSqlStmt::exit(Some("l"), None),
                ],
            ),
            PlPgSqlStmt::loop_(
                Some("l"),
                vec![
                    PlPgSqlStmt::assign("n", "n + 10"),
                    PlPgSqlStmt::exit(Some("l"), None),
                ],
            ),
            PlPgSqlStmt::return_("n"),
        ])
        .declare("n", "int4"),
    );
    let mut session = session_with(vec![def, siblings]);
    let err = session.execute("SELECT dup_labels()").expect_err("shared label");
    assert_eq!(err.sqlstate, "42601");
    assert_eq!(err.message, "label \"l\" is already used by an enclosing loop");
    assert_eq!(scalar(&mut session, "SELECT sibling_labels()"), int(11));
}

#[test]
fn exit_to_a_label_that_does_not_enclose_fails() {
    let def = int4_function("bad_label").body(PlPgSqlStmtBlock::new(vec![
        PlPgSqlStmt::loop_(Some("outer"), vec![PlPgSqlStmt::exit(Some("zzz"), None)]),
        PlPgSqlStmt::return_("1"),
    ]));
    let mut session = session_with(vec![def]);
    let err = session.execute("SELECT bad_label()").expect_err("unknown label");
    assert_eq!(err.sqlstate, "42601");
    assert_eq!(
        err.message,
        "there is no label \"zzz\" attached to any block or loop enclosing this statement"
    );
}

#[test]
fn continue_cannot_target_a_block_label() {
    let def = int4_function("continue_block").body(PlPgSqlStmtBlock::new(vec![
        PlPgSqlStmt::Block(
            PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::loop_(
                None,
                vec![PlPgSqlStmt::continue_(Some("blk"), None)],
            )])
            .labeled("blk"),
        ),
        PlPgSqlStmt::return_("1"),
    ]));
    let mut session = session_with(vec![def]);
    let err = session
        .execute("SELECT continue_block()")
        .expect_err("block label");
    assert_eq!(err.sqlstate, "42601");
    assert_eq!(err.message, "block label \"blk\" cannot be used in CONTINUE");
}

#[test]
fn assigning_an_uncoercible_value_fails() {
    let def = int4_function("mismatch").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::assign("v", "'abc'"),
            PlPgSqlStmt::return_("v"),
        ])
        .declare("v", "int4"),
    );
    let mut session = session_with(vec![def]);
    let err = session.execute("SELECT mismatch()").expect_err("not an integer");
    assert_eq!(err.sqlstate, "22P02");
    assert_eq!(err.message, "invalid input syntax for type integer: \"abc\"");
    assert_eq!(
        err.context.as_deref(),
        Some("PL/pgSQL function mismatch() at assignment")
    );
}

#[test]
fn duplicate_declaration_in_one_block_fails() {
    let def = int4_function("twice_declared").body(
        PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::return_("1")])
            .declare("a", "int4")
            .declare("a", "text"),
    );
    // A nested block may shadow the outer declaration.
    let shadowed = int4_function("shadowed").body(
        PlPgSqlStmtBlock::new(vec![
            PlPgSqlStmt::Block(
                PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::assign("a", "'inner'")])
                    .declare("a", "text"),
            ),
            PlPgSqlStmt::return_("a"),
        ])
        .declare("a", "int4"),
    );
    let mut session = session_with(vec![def, shadowed]);
    let err = session
        .execute("SELECT twice_declared()")
        .expect_err("duplicate");
    assert_eq!(err.sqlstate, "42601");
    assert_eq!(err.message, "duplicate declaration of \"a\"");
    assert_eq!(scalar(&mut session, "SELECT shadowed()"), int(0));
}
