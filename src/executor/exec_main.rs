use std::cmp::Ordering;

use tracing::trace;

use crate::catalog::types::SqlType;
use crate::executor::exec_expr::{
    EvalScope, ExprContext, eval_binary, eval_expr, eval_function_call, eval_target, row_value,
    stream_column_names, truthy,
};
use crate::parser::ast::{
    BinaryOp, DeleteStatement, Expr, FromItem, InsertSource, InsertStatement, SelectItem,
    SelectStatement, UpdateStatement,
};
use crate::plpgsql::result::{ResultStream, RoutineResult, zip_result_streams};
use crate::plpgsql::{TriggerData, TriggerEvent, TriggerTiming};
use crate::storage::heap::HeapTable;
use crate::storage::tuple::{RecordField, RecordValue, ScalarValue};
use crate::tcop::engine::{EngineError, QueryResult};
use crate::tcop::session::Session;
use crate::utils::adt::misc::{compare_for_sort, parse_i64_scalar, values_equal};

type TableKey = (String, String);

/// Rows produced by a FROM item, plus the columns `*` expands to.
struct ScanResult {
    scopes: Vec<EvalScope>,
    star_columns: Vec<(String, SqlType)>,
}

pub(crate) fn execute_select(
    session: &mut Session,
    select: &SelectStatement,
) -> Result<QueryResult, EngineError> {
    let scan = scan_from_item(session, select.from.as_ref())?;
    let mut filtered = Vec::with_capacity(scan.scopes.len());
    for scope in scan.scopes {
        if let Some(predicate) = &select.where_clause {
            let value = eval_expr(predicate, &scope, session)?;
            if truthy(&value)? != Some(true) {
                continue;
            }
        }
        filtered.push(scope);
    }

    if select.targets.iter().any(|item| aggregate_name(&item.expr).is_some()) {
        return execute_aggregate_select(session, select, &filtered);
    }

    let names = output_names(&select.targets, &scan.star_columns);
    let mut hints =
        output_type_hints(session, &select.targets, &scan.star_columns, filtered.first());
    let mut rows: Vec<(Vec<ScalarValue>, EvalScope)> = Vec::new();
    for scope in filtered {
        for row in project_row(session, &select.targets, &scope, &mut hints)? {
            rows.push((row, scope.clone()));
        }
    }

    if !select.order_by.is_empty() {
        rows = sort_rows(session, select, &names, rows)?;
    }
    let mut rows: Vec<Vec<ScalarValue>> = rows.into_iter().map(|(row, _)| row).collect();
    if let Some(limit) = &select.limit {
        let value = eval_expr(limit, &EvalScope::default(), session)?;
        if !value.is_null() {
            let limit = parse_i64_scalar(&value, "bigint")?;
            if limit < 0 {
                return Err(EngineError::new("2201W", "LIMIT must not be negative"));
            }
            rows.truncate(limit as usize);
        }
    }

    let column_types = finalize_types(hints, &rows);
    trace!(rows = rows.len(), "select complete");
    Ok(QueryResult::with_rows(
        names.into_iter().zip(column_types).collect(),
        rows,
    ))
}

fn scan_from_item(
    session: &mut Session,
    from: Option<&FromItem>,
) -> Result<ScanResult, EngineError> {
    match from {
        None => Ok(ScanResult {
            scopes: vec![EvalScope::default()],
            star_columns: Vec::new(),
        }),
        Some(FromItem::Relation { name, alias }) => {
            let key = resolve_table(session, name)?;
            let table = table_ref(session, &key)?;
            let alias = alias.clone().unwrap_or_else(|| table.name.clone());
            let scopes = table
                .rows
                .iter()
                .map(|row| EvalScope::for_relation(&alias, table.record_for(row)))
                .collect();
            let star_columns = table
                .columns
                .iter()
                .map(|column| (column.name.clone(), column.sql_type.clone()))
                .collect();
            Ok(ScanResult {
                scopes,
                star_columns,
            })
        }
        Some(FromItem::Function { name, args, alias }) => {
            let default_name = function_display_name(name);
            let result = eval_function_call(name, args, false, &EvalScope::default(), session)?;
            let column_name = alias.clone().unwrap_or_else(|| default_name.clone());
            let stream = result_to_stream(result, &column_name);
            let alias = alias.clone().unwrap_or(default_name);
            Ok(scan_stream(&alias, stream))
        }
        Some(FromItem::RowsFrom {
            calls,
            with_ordinality,
            alias,
        }) => {
            let mut streams = Vec::with_capacity(calls.len());
            for (name, args) in calls {
                let result =
                    eval_function_call(name, args, false, &EvalScope::default(), session)?;
                streams.push(result_to_stream(result, &function_display_name(name)));
            }
            let zipped = zip_result_streams(streams, *with_ordinality);
            let alias = alias.clone().unwrap_or_else(|| "rows_from".to_string());
            Ok(scan_stream(&alias, zipped))
        }
    }
}

fn scan_stream(alias: &str, stream: ResultStream) -> ScanResult {
    let star_columns = stream.columns().to_vec();
    let scopes = stream
        .map(|row| EvalScope::for_relation(alias, stream_record(&star_columns, row)))
        .collect();
    ScanResult {
        scopes,
        star_columns,
    }
}

fn stream_record(columns: &[(String, SqlType)], row: Vec<ScalarValue>) -> RecordValue {
    RecordValue {
        type_name: None,
        fields: columns
            .iter()
            .zip(row)
            .map(|((name, sql_type), value)| RecordField {
                name: name.clone(),
                sql_type: sql_type.clone(),
                value,
            })
            .collect(),
    }
}

/// A call used as a FROM item always yields rows: a composite value
/// expands to its fields, any other scalar is one row of one column.
fn result_to_stream(result: RoutineResult, column_name: &str) -> ResultStream {
    match result {
        RoutineResult::Set(mut stream) => {
            if stream.columns().is_empty() {
                stream.set_columns_if_empty(vec![(column_name.to_string(), SqlType::Unknown)]);
            }
            stream
        }
        RoutineResult::Value(ScalarValue::Record(record)) => {
            let mut stream = ResultStream::new(
                record
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.sql_type.clone()))
                    .collect(),
            );
            stream.push(record.values());
            stream
        }
        RoutineResult::Value(value) => {
            let mut stream =
                ResultStream::new(vec![(column_name.to_string(), SqlType::of_value(&value))]);
            stream.push(vec![value]);
            stream
        }
        RoutineResult::Void => {
            let mut stream = ResultStream::new(vec![(column_name.to_string(), SqlType::Void)]);
            stream.push(vec![ScalarValue::Null]);
            stream
        }
    }
}

fn function_display_name(name: &[String]) -> String {
    name.last().cloned().unwrap_or_default().to_ascii_lowercase()
}

/// Output column name the way PostgreSQL derives it from a target.
pub(crate) fn target_name(item: &SelectItem) -> String {
    if let Some(alias) = &item.alias {
        return alias.clone();
    }
    expr_name(&item.expr).unwrap_or_else(|| "?column?".to_string())
}

fn expr_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(parts) => parts.last().map(|part| part.to_ascii_lowercase()),
        Expr::FunctionCall { name, .. } => Some(function_display_name(name)),
        Expr::Cast { expr, type_name } => expr_name(expr).or_else(|| {
            type_name
                .rsplit('.')
                .next()
                .map(|name| name.trim().to_ascii_lowercase())
        }),
        Expr::CaseSimple { .. } | Expr::CaseSearched { .. } => Some("case".to_string()),
        Expr::Row(_) => Some("row".to_string()),
        _ => None,
    }
}

fn output_names(targets: &[SelectItem], star_columns: &[(String, SqlType)]) -> Vec<String> {
    let mut names = Vec::new();
    for item in targets {
        match &item.expr {
            Expr::Wildcard | Expr::QualifiedWildcard(_) => {
                names.extend(star_columns.iter().map(|(name, _)| name.clone()));
            }
            _ => names.push(target_name(item)),
        }
    }
    names
}

/// Types known before any row is produced; `None` is settled from the data.
fn output_type_hints(
    session: &Session,
    targets: &[SelectItem],
    star_columns: &[(String, SqlType)],
    first_scope: Option<&EvalScope>,
) -> Vec<Option<SqlType>> {
    let mut hints = Vec::new();
    for item in targets {
        match &item.expr {
            Expr::Wildcard | Expr::QualifiedWildcard(_) => {
                hints.extend(star_columns.iter().map(|(_, ty)| Some(ty.clone())));
            }
            Expr::Cast { type_name, .. } => hints.push(session.resolve_type(type_name).ok()),
            Expr::Identifier(parts) => {
                hints.push(first_scope.and_then(|scope| scope.lookup_type(parts)));
            }
            _ => hints.push(None),
        }
    }
    hints
}

fn finalize_types(hints: Vec<Option<SqlType>>, rows: &[Vec<ScalarValue>]) -> Vec<SqlType> {
    hints
        .into_iter()
        .enumerate()
        .map(|(idx, hint)| {
            hint.filter(|ty| *ty != SqlType::Unknown).unwrap_or_else(|| {
                rows.iter()
                    .filter_map(|row| row.get(idx))
                    .find(|value| !value.is_null())
                    .map(SqlType::of_value)
                    .unwrap_or(SqlType::Text)
            })
        })
        .collect()
}

enum ProjectedColumn {
    Scalar(ScalarValue),
    Set(ResultStream),
}

/// Projects one source row. Set-returning targets are expanded and zipped
/// positionally; scalar targets repeat on every produced row.
fn project_row(
    session: &mut Session,
    targets: &[SelectItem],
    scope: &EvalScope,
    hints: &mut [Option<SqlType>],
) -> Result<Vec<Vec<ScalarValue>>, EngineError> {
    let mut columns = Vec::with_capacity(targets.len());
    for item in targets {
        match &item.expr {
            Expr::Wildcard => {
                for (_, _, value) in scope.wildcard_columns(None)? {
                    columns.push(ProjectedColumn::Scalar(value));
                }
            }
            Expr::QualifiedWildcard(qualifier) => {
                let qualifier = qualifier.join(".");
                for (_, _, value) in scope.wildcard_columns(Some(&qualifier))? {
                    columns.push(ProjectedColumn::Scalar(value));
                }
            }
            expr => match eval_target(expr, scope, session)? {
                RoutineResult::Set(stream) => {
                    let position = columns.len();
                    if let Some(slot) = hints.get_mut(position)
                        && slot.is_none()
                        && let [(_, ty)] = stream.columns()
                    {
                        *slot = Some(ty.clone());
                    }
                    columns.push(ProjectedColumn::Set(collapse_stream(stream)));
                }
                RoutineResult::Value(value) => columns.push(ProjectedColumn::Scalar(value)),
                RoutineResult::Void => columns.push(ProjectedColumn::Scalar(ScalarValue::Null)),
            },
        }
    }

    let set_positions: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, column)| matches!(column, ProjectedColumn::Set(_)))
        .map(|(idx, _)| idx)
        .collect();
    if set_positions.is_empty() {
        return Ok(vec![
            columns
                .into_iter()
                .map(|column| match column {
                    ProjectedColumn::Scalar(value) => value,
                    ProjectedColumn::Set(_) => ScalarValue::Null,
                })
                .collect(),
        ]);
    }

    let mut scalars = Vec::with_capacity(columns.len());
    let mut streams = Vec::with_capacity(set_positions.len());
    for column in columns {
        match column {
            ProjectedColumn::Scalar(value) => scalars.push(Some(value)),
            ProjectedColumn::Set(stream) => {
                scalars.push(None);
                streams.push(stream);
            }
        }
    }
    let zipped = zip_result_streams(streams, false);
    let mut rows = Vec::with_capacity(zipped.len());
    for set_values in zipped {
        let mut set_values = set_values.into_iter();
        let row = scalars
            .iter()
            .map(|scalar| match scalar {
                Some(value) => value.clone(),
                None => set_values.next().unwrap_or(ScalarValue::Null),
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Narrows a set to one column; multi-column rows become records.
fn collapse_stream(stream: ResultStream) -> ResultStream {
    if stream.width() <= 1 {
        return stream;
    }
    let names = stream_column_names(&stream);
    let mut collapsed = ResultStream::new(vec![("row".to_string(), SqlType::Record)]);
    for row in stream {
        collapsed.push(vec![row_value(&names, row)]);
    }
    collapsed
}

fn sort_rows(
    session: &mut Session,
    select: &SelectStatement,
    names: &[String],
    rows: Vec<(Vec<ScalarValue>, EvalScope)>,
) -> Result<Vec<(Vec<ScalarValue>, EvalScope)>, EngineError> {
    let mut keyed = Vec::with_capacity(rows.len());
    for (row, scope) in rows {
        let mut key_scope = scope.clone();
        for (name, value) in names.iter().zip(&row) {
            key_scope.force_unqualified(name, value.clone());
        }
        let mut keys = Vec::with_capacity(select.order_by.len());
        for order in &select.order_by {
            let key = match &order.expr {
                Expr::Integer(position) => {
                    let idx = usize::try_from(*position - 1)
                        .ok()
                        .filter(|idx| *idx < row.len())
                        .ok_or_else(|| {
                            EngineError::new(
                                "42P10",
                                format!("ORDER BY position {position} is not in select list"),
                            )
                        })?;
                    row[idx].clone()
                }
                expr => eval_expr(expr, &key_scope, session)?,
            };
            keys.push(key);
        }
        keyed.push((keys, row, scope));
    }

    keyed.sort_by(|(a, _, _), (b, _, _)| {
        for ((left, right), order) in a.iter().zip(b).zip(&select.order_by) {
            let mut ordering = compare_for_sort(left, right);
            if order.ascending == Some(false) {
                ordering = ordering.reverse();
            }
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(keyed.into_iter().map(|(_, row, scope)| (row, scope)).collect())
}

fn aggregate_name(expr: &Expr) -> Option<&'static str> {
    let Expr::FunctionCall { name, args, star } = expr else {
        return None;
    };
    let [fn_name] = name.as_slice() else {
        return None;
    };
    let fn_name = fn_name.to_ascii_lowercase();
    let found = ["count", "sum", "min", "max", "avg"]
        .into_iter()
        .find(|agg| *agg == fn_name)?;
    ((*star && found == "count") || args.len() == 1).then_some(found)
}

fn execute_aggregate_select(
    session: &mut Session,
    select: &SelectStatement,
    rows: &[EvalScope],
) -> Result<QueryResult, EngineError> {
    let mut columns = Vec::with_capacity(select.targets.len());
    let mut values = Vec::with_capacity(select.targets.len());
    for item in &select.targets {
        let value = match (&item.expr, aggregate_name(&item.expr)) {
            (Expr::FunctionCall { args, star, .. }, Some(agg)) => {
                eval_aggregate(session, agg, args.first(), *star, rows)?
            }
            (Expr::Wildcard | Expr::QualifiedWildcard(_), _) => {
                return Err(EngineError::new(
                    "42803",
                    "column reference must appear in the GROUP BY clause \
                     or be used in an aggregate function",
                ));
            }
            (expr, _) => {
                let scope = rows.first().cloned().unwrap_or_default();
                eval_expr(expr, &scope, session)?
            }
        };
        let sql_type = match aggregate_name(&item.expr) {
            Some("count") => SqlType::Int8,
            _ => SqlType::of_value(&value),
        };
        columns.push((target_name(item), sql_type));
        values.push(value);
    }
    Ok(QueryResult::with_rows(columns, vec![values]))
}

fn eval_aggregate(
    session: &mut Session,
    agg: &str,
    arg: Option<&Expr>,
    star: bool,
    rows: &[EvalScope],
) -> Result<ScalarValue, EngineError> {
    if star {
        return Ok(ScalarValue::Int(rows.len() as i64));
    }
    let Some(arg) = arg else {
        return Ok(ScalarValue::Null);
    };
    let mut inputs = Vec::with_capacity(rows.len());
    for scope in rows {
        let value = eval_expr(arg, scope, session)?;
        if !value.is_null() {
            inputs.push(value);
        }
    }
    match agg {
        "count" => Ok(ScalarValue::Int(inputs.len() as i64)),
        "min" | "max" => Ok(inputs
            .into_iter()
            .reduce(|best, value| {
                let ordering = compare_for_sort(&value, &best);
                let better = if agg == "min" {
                    ordering == Ordering::Less
                } else {
                    ordering == Ordering::Greater
                };
                if better { value } else { best }
            })
            .unwrap_or(ScalarValue::Null)),
        _ => {
            let count = inputs.len();
            let mut total: Option<ScalarValue> = None;
            for value in inputs {
                total = Some(match total {
                    Some(sum) => eval_binary(BinaryOp::Add, sum, value)?,
                    None => value,
                });
            }
            match (agg, total) {
                (_, None) => Ok(ScalarValue::Null),
                ("avg", Some(sum)) => {
                    let sum = match sum {
                        ScalarValue::Int(v) => ScalarValue::Numeric(v.into()),
                        other => other,
                    };
                    eval_binary(BinaryOp::Div, sum, ScalarValue::Int(count as i64))
                }
                (_, Some(sum)) => Ok(sum),
            }
        }
    }
}

fn resolve_table(session: &Session, name: &[String]) -> Result<TableKey, EngineError> {
    session
        .heap
        .resolve(&session.settings.search_path(), name)
        .ok_or_else(|| {
            EngineError::new(
                "42P01",
                format!("relation \"{}\" does not exist", name.join(".")),
            )
        })
}

fn table_ref(session: &Session, key: &TableKey) -> Result<HeapTable, EngineError> {
    session.heap.get(key).cloned().ok_or_else(|| {
        EngineError::new(
            "42P01",
            format!("relation \"{}.{}\" does not exist", key.0, key.1),
        )
    })
}

/// Table definition without its rows, used while the heap is mutated.
fn table_meta(session: &Session, key: &TableKey) -> Result<HeapTable, EngineError> {
    let table = session.heap.get(key).ok_or_else(|| {
        EngineError::new(
            "42P01",
            format!("relation \"{}.{}\" does not exist", key.0, key.1),
        )
    })?;
    Ok(HeapTable::new(&table.schema, &table.name, table.columns.clone()))
}

fn coerce_row(
    session: &Session,
    meta: &HeapTable,
    row: Vec<ScalarValue>,
) -> Result<Vec<ScalarValue>, EngineError> {
    meta.columns
        .iter()
        .zip(row)
        .map(|(column, value)| session.cast_value(value, &column.sql_type))
        .collect()
}

fn check_row_constraints(
    session: &Session,
    key: &TableKey,
    row: &[ScalarValue],
    replacing: Option<usize>,
) -> Result<(), EngineError> {
    let table = session
        .heap
        .get(key)
        .ok_or_else(|| {
            EngineError::new("42P01", format!("relation \"{}\" does not exist", key.1))
        })?;
    for (column, value) in table.columns.iter().zip(row) {
        if column.not_null && value.is_null() {
            let mut err = EngineError::new(
                "23502",
                format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    column.name, table.name
                ),
            );
            err.detail = Some(format!(
                "Failing row contains {}.",
                ScalarValue::Record(table.record_for(row)).render()
            ));
            return Err(err);
        }
    }

    let key_columns = table.key_columns();
    if key_columns.is_empty() {
        return Ok(());
    }
    for (idx, existing) in table.rows.iter().enumerate() {
        if Some(idx) == replacing {
            continue;
        }
        let mut duplicate = true;
        for col in &key_columns {
            if values_equal(&existing[*col], &row[*col])? != Some(true) {
                duplicate = false;
                break;
            }
        }
        if duplicate {
            let names: Vec<&str> = key_columns
                .iter()
                .map(|col| table.columns[*col].name.as_str())
                .collect();
            let values: Vec<String> = key_columns.iter().map(|col| row[*col].render()).collect();
            let mut err = EngineError::new(
                "23505",
                format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    table.name
                ),
            );
            err.detail = Some(format!(
                "Key ({})=({}) already exists.",
                names.join(", "),
                values.join(", ")
            ));
            return Err(err);
        }
    }
    Ok(())
}

/// Runs the row-level triggers for one event. Returns the row to store, or
/// `None` when a BEFORE trigger returned NULL.
fn fire_row_triggers(
    session: &mut Session,
    meta: &HeapTable,
    timing: TriggerTiming,
    event: TriggerEvent,
    new: Option<Vec<ScalarValue>>,
    old: Option<&[ScalarValue]>,
) -> Result<Option<Vec<ScalarValue>>, EngineError> {
    let triggers = session
        .triggers
        .matching(&meta.schema, &meta.name, timing, event);
    let mut new = new;
    for trigger in triggers {
        let data = TriggerData {
            trigger_name: trigger.name.clone(),
            timing,
            event,
            table_schema: meta.schema.clone(),
            table_name: meta.name.clone(),
            new: new.as_deref().map(|row| meta.record_for(row)),
            old: old.map(|row| meta.record_for(row)),
            args: trigger.args.clone(),
        };
        let result = session.invoke_trigger_routine(&trigger.function, &data)?;
        if timing == TriggerTiming::After {
            continue;
        }
        match result.into_scalar() {
            ScalarValue::Null => {
                trace!(trigger = %trigger.name, "row skipped by trigger");
                return Ok(None);
            }
            ScalarValue::Record(record) => {
                if record.fields.len() != meta.columns.len() {
                    return Err(EngineError::new(
                        "42804",
                        "returned row structure does not match \
                         the structure of the triggering table",
                    ));
                }
                if event != TriggerEvent::Delete {
                    new = Some(coerce_row(session, meta, record.values())?);
                }
            }
            other => {
                return Err(EngineError::new(
                    "42804",
                    format!(
                        "trigger function returned a non-row value {}",
                        other.render()
                    ),
                ));
            }
        }
    }
    Ok(new.or_else(|| old.map(<[ScalarValue]>::to_vec)))
}

pub(crate) fn execute_insert(
    session: &mut Session,
    insert: &InsertStatement,
) -> Result<QueryResult, EngineError> {
    let key = resolve_table(session, &insert.table_name)?;
    let meta = table_meta(session, &key)?;
    let targets: Vec<usize> = if insert.columns.is_empty() {
        (0..meta.columns.len()).collect()
    } else {
        insert
            .columns
            .iter()
            .map(|name| {
                meta.column_index(name).ok_or_else(|| {
                    EngineError::new(
                        "42703",
                        format!(
                            "column \"{name}\" of relation \"{}\" does not exist",
                            meta.name
                        ),
                    )
                })
            })
            .collect::<Result<_, _>>()?
    };

    let source_rows = match &insert.source {
        InsertSource::Values(rows) => {
            let mut evaluated = Vec::with_capacity(rows.len());
            for row in rows {
                let mut values = Vec::with_capacity(row.len());
                for expr in row {
                    values.push(eval_expr(expr, &EvalScope::default(), session)?);
                }
                evaluated.push(values);
            }
            evaluated
        }
        InsertSource::Query(query) => execute_select(session, query)?.rows,
    };

    let mut inserted = 0_u64;
    for source in source_rows {
        if source.len() > targets.len() {
            return Err(EngineError::new(
                "42601",
                "INSERT has more expressions than target columns",
            ));
        }
        let mut row = vec![ScalarValue::Null; meta.columns.len()];
        let mut provided = vec![false; meta.columns.len()];
        for (target, value) in targets.iter().zip(source) {
            row[*target] = value;
            provided[*target] = true;
        }
        for (idx, column) in meta.columns.iter().enumerate() {
            if !provided[idx]
                && let Some(default) = &column.default
            {
                row[idx] = eval_expr(default, &EvalScope::default(), session)?;
            }
        }
        let row = coerce_row(session, &meta, row)?;
        let Some(row) = fire_row_triggers(
            session,
            &meta,
            TriggerTiming::Before,
            TriggerEvent::Insert,
            Some(row),
            None,
        )?
        else {
            continue;
        };
        check_row_constraints(session, &key, &row, None)?;
        if let Some(table) = session.heap.get_mut(&key) {
            table.rows.push(row.clone());
        }
        fire_row_triggers(
            session,
            &meta,
            TriggerTiming::After,
            TriggerEvent::Insert,
            Some(row),
            None,
        )?;
        inserted += 1;
    }
    Ok(QueryResult::command(format!("INSERT 0 {inserted}"), inserted))
}

pub(crate) fn execute_update(
    session: &mut Session,
    update: &UpdateStatement,
) -> Result<QueryResult, EngineError> {
    let key = resolve_table(session, &update.table_name)?;
    let meta = table_meta(session, &key)?;
    let alias = update.alias.clone().unwrap_or_else(|| meta.name.clone());
    let assignments = update
        .assignments
        .iter()
        .map(|assignment| {
            meta.column_index(&assignment.column)
                .map(|idx| (idx, &assignment.value))
                .ok_or_else(|| {
                    EngineError::new(
                        "42703",
                        format!(
                            "column \"{}\" of relation \"{}\" does not exist",
                            assignment.column, meta.name
                        ),
                    )
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let snapshot = table_ref(session, &key)?.rows;
    let mut updated = 0_u64;
    for (idx, old_row) in snapshot.into_iter().enumerate() {
        let scope = EvalScope::for_relation(&alias, meta.record_for(&old_row));
        if let Some(predicate) = &update.where_clause {
            let value = eval_expr(predicate, &scope, session)?;
            if truthy(&value)? != Some(true) {
                continue;
            }
        }
        let mut new_row = old_row.clone();
        for (column, expr) in &assignments {
            new_row[*column] = eval_expr(expr, &scope, session)?;
        }
        let new_row = coerce_row(session, &meta, new_row)?;
        let Some(new_row) = fire_row_triggers(
            session,
            &meta,
            TriggerTiming::Before,
            TriggerEvent::Update,
            Some(new_row),
            Some(&old_row),
        )?
        else {
            continue;
        };
        check_row_constraints(session, &key, &new_row, Some(idx))?;
        if let Some(slot) = session
            .heap
            .get_mut(&key)
            .and_then(|table| table.rows.get_mut(idx))
        {
            *slot = new_row.clone();
        }
        fire_row_triggers(
            session,
            &meta,
            TriggerTiming::After,
            TriggerEvent::Update,
            Some(new_row),
            Some(&old_row),
        )?;
        updated += 1;
    }
    Ok(QueryResult::command(format!("UPDATE {updated}"), updated))
}

pub(crate) fn execute_delete(
    session: &mut Session,
    delete: &DeleteStatement,
) -> Result<QueryResult, EngineError> {
    let key = resolve_table(session, &delete.table_name)?;
    let meta = table_meta(session, &key)?;
    let alias = delete.alias.clone().unwrap_or_else(|| meta.name.clone());
    let snapshot = table_ref(session, &key)?.rows;

    let mut doomed = Vec::new();
    for (idx, old_row) in snapshot.into_iter().enumerate() {
        let scope = EvalScope::for_relation(&alias, meta.record_for(&old_row));
        if let Some(predicate) = &delete.where_clause {
            let value = eval_expr(predicate, &scope, session)?;
            if truthy(&value)? != Some(true) {
                continue;
            }
        }
        let proceed = fire_row_triggers(
            session,
            &meta,
            TriggerTiming::Before,
            TriggerEvent::Delete,
            None,
            Some(&old_row),
        )?;
        if proceed.is_some() {
            doomed.push((idx, old_row));
        }
    }

    if let Some(table) = session.heap.get_mut(&key) {
        for (idx, _) in doomed.iter().rev() {
            if *idx < table.rows.len() {
                table.rows.remove(*idx);
            }
        }
    }
    for (_, old_row) in &doomed {
        fire_row_triggers(
            session,
            &meta,
            TriggerTiming::After,
            TriggerEvent::Delete,
            None,
            Some(old_row),
        )?;
    }
    let deleted = doomed.len() as u64;
    Ok(QueryResult::command(format!("DELETE {deleted}"), deleted))
}
