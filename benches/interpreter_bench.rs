use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use pgroutine::Session;
use pgroutine::catalog::routine::{FunctionDefinition, ReturnSpec};
use pgroutine::catalog::types::SqlType;
use pgroutine::plpgsql::{PlPgSqlStmt, PlPgSqlStmtBlock, PlPgSqlStmtFori};

fn session_with(functions: Vec<FunctionDefinition>) -> Session {
    let mut session = Session::new();
    for function in functions {
        session
            .create_routine(function, false)
            .expect("benchmark routine is valid");
    }
    session
}

fn assert_ok(session: &mut Session, sql: &str) {
    if let Err(err) = session.execute(sql) {
        panic!("benchmark query produced error: {err:?}");
    }
}

fn while_sum() -> FunctionDefinition {
    FunctionDefinition::function("while_sum")
        .param("n", SqlType::Int4)
        .returns(ReturnSpec::Scalar(SqlType::Int8))
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::while_(
                    None,
                    "i < n",
                    vec![
                        PlPgSqlStmt::assign("i", "i + 1"),
                        PlPgSqlStmt::assign("total", "total + i"),
                    ],
                ),
                PlPgSqlStmt::return_("total"),
            ])
            .declare("total", "int8")
            .declare("i", "int4"),
        )
}

fn series(name: &str, limit: i64) -> FunctionDefinition {
    FunctionDefinition::function(name)
        .returns(ReturnSpec::SetOf(SqlType::Int4))
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::Fori(PlPgSqlStmtFori {
            label: None,
            var: "i".to_string(),
            lower: "1".into(),
            upper: limit.to_string().into(),
            step: None,
            reverse: false,
            body: vec![PlPgSqlStmt::return_next("i")],
        })]))
}

fn bench_while_loop(c: &mut Criterion) {
    let mut session = session_with(vec![while_sum()]);
    c.bench_function("while_loop_200", |b| {
        b.iter(|| assert_ok(&mut session, "SELECT while_sum(200)"))
    });
}

fn bench_constant_assignment(c: &mut Criterion) {
    let def = FunctionDefinition::function("constant_steps")
        .returns(ReturnSpec::Scalar(SqlType::Int4))
        .body(
            PlPgSqlStmtBlock::new(vec![
                PlPgSqlStmt::loop_(
                    None,
                    vec![
                        PlPgSqlStmt::assign("flag", "TRUE"),
                        PlPgSqlStmt::assign("steps", "steps + 1"),
                        PlPgSqlStmt::exit(None, Some("steps >= 100")),
                    ],
                ),
                PlPgSqlStmt::return_("steps"),
            ])
            .declare("steps", "int4")
            .declare("flag", "bool"),
        );
    let mut session = session_with(vec![def]);
    c.bench_function("loop_exit_when_100", |b| {
        b.iter(|| assert_ok(&mut session, "SELECT constant_steps()"))
    });
}

fn bench_srf_zip(c: &mut Criterion) {
    let mut session = session_with(vec![series("long_series", 100), series("short_series", 10)]);
    c.bench_function("rows_from_zip", |b| {
        b.iter(|| {
            assert_ok(
                &mut session,
                "SELECT * FROM ROWS FROM (long_series(), short_series()) WITH ORDINALITY",
            )
        })
    });
}

fn bench_procedure_inserts(c: &mut Criterion) {
    let def = FunctionDefinition::procedure("fill")
        .param("n", SqlType::Int4)
        .body(PlPgSqlStmtBlock::new(vec![PlPgSqlStmt::Fori(PlPgSqlStmtFori {
            label: None,
            var: "i".to_string(),
            lower: "1".into(),
            upper: "n".into(),
            step: None,
            reverse: false,
            body: vec![PlPgSqlStmt::sql("INSERT INTO bench_fill VALUES (i, 'row ' || i)")],
        })]));
    c.bench_function("procedure_insert_50", |b| {
        b.iter_batched(
            || {
                let mut session = session_with(vec![def.clone()]);
                assert_ok(&mut session, "CREATE TABLE bench_fill (id INT4, label TEXT)");
                session
            },
            |mut session| assert_ok(&mut session, "CALL fill(50)"),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_while_loop,
    bench_constant_assignment,
    bench_srf_zip,
    bench_procedure_inserts
);
criterion_main!(benches);
