//! Expression and SQL bridge between routine bodies and the host engine.
//!
//! Variable references in embedded SQL are replaced by typed literals before
//! the text is handed to the injected [`SqlExecutor`]; the host never sees
//! interpreter state. Notices raised by routines the host runs on our behalf
//! are drained after every call so they stay in emission order.

use rust_decimal::Decimal;
use tracing::trace;

use crate::catalog::types::SqlType;
use crate::plpgsql::diagnostics::NoticeLog;
use crate::plpgsql::error::PlPgSqlError;
use crate::plpgsql::scanner::{PlPgSqlToken, PlPgSqlTokenKind, tokenize};
use crate::plpgsql::scope::{InvocationFrame, VarRef};
use crate::storage::tuple::ScalarValue;
use crate::tcop::engine::{EngineError, QueryResult, SqlExecutor};
use crate::utils::adt::misc::quote_literal;

/// Renders a value as a SQL literal carrying its type, e.g. `42::int4`,
/// `'abc'::text`, `NULL::numeric` or `ROW(1, 'a'::text)::test`.
pub fn sql_literal(value: &ScalarValue, declared: &SqlType) -> String {
    let sql_type = match declared {
        SqlType::Unknown | SqlType::Void | SqlType::Trigger => SqlType::of_value(value),
        other => other.clone(),
    };
    match value {
        ScalarValue::Null => match sql_type {
            SqlType::Unknown => "NULL".to_string(),
            other => format!("NULL::{}", other.cast_name()),
        },
        ScalarValue::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
        ScalarValue::Int(v) => typed_number(v.to_string(), &sql_type, value),
        ScalarValue::Float(v) if !v.is_finite() => {
            format!("'{}'::{}", value.render(), numeric_cast(&sql_type, value))
        }
        ScalarValue::Float(v) => typed_number(v.to_string(), &sql_type, value),
        ScalarValue::Numeric(v) => typed_number(v.to_string(), &sql_type, value),
        ScalarValue::Text(v) => {
            let cast = match sql_type {
                SqlType::Text | SqlType::Varchar => sql_type.cast_name(),
                SqlType::Record | SqlType::Composite(_) => sql_type.cast_name(),
                _ if sql_type.category() == SqlType::Text.category() => sql_type.cast_name(),
                _ => "text".to_string(),
            };
            format!("{}::{cast}", quote_literal(v))
        }
        ScalarValue::Record(record) => {
            let fields: Vec<String> = record
                .fields
                .iter()
                .map(|field| sql_literal(&field.value, &field.sql_type))
                .collect();
            let row = format!("ROW({})", fields.join(", "));
            match &record.type_name {
                Some(name) => format!("{row}::{name}"),
                None => row,
            }
        }
    }
}

fn numeric_cast(sql_type: &SqlType, value: &ScalarValue) -> String {
    match sql_type {
        SqlType::Int2
        | SqlType::Int4
        | SqlType::Int8
        | SqlType::Float4
        | SqlType::Float8
        | SqlType::Numeric => sql_type.cast_name(),
        _ => SqlType::of_value(value).cast_name(),
    }
}

fn typed_number(text: String, sql_type: &SqlType, value: &ScalarValue) -> String {
    let cast = numeric_cast(sql_type, value);
    if text.starts_with('-') {
        format!("({text})::{cast}")
    } else {
        format!("{text}::{cast}")
    }
}

fn scan_error(err: impl std::fmt::Display) -> PlPgSqlError {
    PlPgSqlError::Sql(EngineError::syntax(err.to_string()))
}

fn literal_for(frame: &InvocationFrame, reference: &VarRef) -> Result<String, PlPgSqlError> {
    let value = frame.value(reference)?;
    Ok(sql_literal(&value, &frame.type_of(reference)))
}

const RELATION_KEYWORDS: &[&str] = &[
    "from", "into", "update", "join", "table", "as", "type", "function", "procedure",
];

fn follows_relation_keyword(tokens: &[PlPgSqlToken], idx: usize) -> bool {
    idx > 0
        && tokens[idx - 1]
            .kind
            .keyword()
            .is_some_and(|kw| RELATION_KEYWORDS.contains(&kw.as_str()))
}

/// Identifier as the scope expects it; quoted names get their quotes back so
/// they keep their case.
fn identifier_reference(kind: &PlPgSqlTokenKind) -> Option<String> {
    match kind {
        PlPgSqlTokenKind::Identifier(text) => Some(text.clone()),
        PlPgSqlTokenKind::QuotedIdentifier(text) => {
            Some(format!("\"{}\"", text.replace('"', "\"\"")))
        }
        _ => None,
    }
}

/// End index (exclusive) of the parenthesized column list following
/// `INTO name[.name] (`, if there is one.
fn insert_column_list_end(tokens: &[PlPgSqlToken], into_idx: usize) -> Option<usize> {
    let mut idx = into_idx + 1;
    identifier_reference(&tokens.get(idx)?.kind)?;
    idx += 1;
    if matches!(tokens.get(idx)?.kind, PlPgSqlTokenKind::Dot) {
        identifier_reference(&tokens.get(idx + 1)?.kind)?;
        idx += 2;
    }
    if !matches!(tokens.get(idx)?.kind, PlPgSqlTokenKind::LParen) {
        return None;
    }
    let mut depth = 0usize;
    for (pos, token) in tokens.iter().enumerate().skip(idx) {
        match token.kind {
            PlPgSqlTokenKind::LParen => depth += 1,
            PlPgSqlTokenKind::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Replaces references to in-scope variables (`name`, `record.field`,
/// `label.name` and `$n`) with typed literals. Function names, qualified
/// column references, type names, relation names, aliases and assignment
/// targets of `SET` lists are left alone.
pub fn substitute_variables(sql: &str, frame: &InvocationFrame) -> Result<String, PlPgSqlError> {
    let tokens = tokenize(sql).map_err(scan_error)?;
    let mut output = String::with_capacity(sql.len() + 16);
    let mut cursor = 0usize;
    let mut protected_until = 0usize;
    let mut in_set_list = false;
    let mut idx = 0usize;

    while idx < tokens.len() {
        let token = &tokens[idx];
        if matches!(token.kind, PlPgSqlTokenKind::Eof) {
            break;
        }

        match token.kind.keyword().as_deref() {
            Some("into") => {
                if let Some(end) = insert_column_list_end(&tokens, idx) {
                    protected_until = end;
                }
            }
            Some("set") => in_set_list = true,
            Some("where" | "from" | "returning") => in_set_list = false,
            _ => {}
        }

        let mut replacement = None;
        let mut consumed = 1usize;

        match &token.kind {
            PlPgSqlTokenKind::Param(n) => {
                if let Some(reference) = frame.try_resolve(&format!("${n}")) {
                    replacement = Some(literal_for(frame, &reference)?);
                }
            }
            PlPgSqlTokenKind::Identifier(_) | PlPgSqlTokenKind::QuotedIdentifier(_)
                if idx >= protected_until =>
            {
                let name = identifier_reference(&token.kind).unwrap_or_default();
                let prev = idx.checked_sub(1).map(|p| &tokens[p].kind);
                let next = &tokens[idx + 1].kind;
                let qualified_member =
                    matches!(prev, Some(PlPgSqlTokenKind::Dot | PlPgSqlTokenKind::Typecast));
                let function_name = matches!(next, PlPgSqlTokenKind::LParen);
                let set_target = in_set_list
                    && matches!(next, PlPgSqlTokenKind::Equals)
                    && (matches!(prev, Some(PlPgSqlTokenKind::Comma))
                        || prev.is_some_and(|p| p.is_keyword("set")));

                if qualified_member
                    || function_name
                    || set_target
                    || follows_relation_keyword(&tokens, idx)
                {
                    // leave as written
                } else if matches!(next, PlPgSqlTokenKind::Dot) {
                    let (chain, chain_len) = qualified_chain(&tokens, idx, &name);
                    consumed = chain_len;
                    if let Some(literal) = resolve_chain(frame, &chain)? {
                        output.push_str(&sql[cursor..token.span.start]);
                        output.push_str(&literal);
                        cursor = tokens[idx + chain_len - 1].span.end;
                    }
                } else if let Some(reference) = frame.try_resolve(&name) {
                    replacement = Some(literal_for(frame, &reference)?);
                }
            }
            _ => {}
        }

        if let Some(replacement) = replacement {
            output.push_str(&sql[cursor..token.span.start]);
            output.push_str(&replacement);
            cursor = token.span.end;
        }
        idx += consumed;
    }

    output.push_str(&sql[cursor..]);
    trace!(original = sql, substituted = %output, "substituted variables");
    Ok(output)
}

/// Collects `a.b[.c]` starting at `idx`; returns the dotted parts and the
/// number of tokens they span.
fn qualified_chain(tokens: &[PlPgSqlToken], idx: usize, first: &str) -> (Vec<String>, usize) {
    let mut parts = vec![first.to_string()];
    let mut pos = idx + 1;
    while parts.len() < 3
        && matches!(tokens[pos].kind, PlPgSqlTokenKind::Dot)
        && let Some(part) = identifier_reference(&tokens[pos + 1].kind)
    {
        parts.push(part);
        pos += 2;
    }
    (parts, pos - idx)
}

/// Longest variable reference formed by a dotted chain. A chain whose head
/// is a record variable must name an existing field.
fn resolve_chain(
    frame: &InvocationFrame,
    parts: &[String],
) -> Result<Option<String>, PlPgSqlError> {
    for len in (2..=parts.len()).rev() {
        let reference = parts[..len].join(".");
        match frame.resolve(&reference) {
            Ok(resolved) if len == parts.len() => return Ok(Some(literal_for(frame, &resolved)?)),
            Ok(_) => {}
            Err(err @ PlPgSqlError::UnknownRecordField { .. }) => return Err(err),
            Err(_) => {}
        }
    }
    Ok(None)
}

/// Literal forms the fast path evaluates without a round trip.
pub fn try_parse_simple_constant(expr: &str) -> Option<ScalarValue> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.eq_ignore_ascii_case("null") {
        return Some(ScalarValue::Null);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Some(ScalarValue::Bool(true));
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Some(ScalarValue::Bool(false));
    }
    if let Some(text) = decode_single_quoted_string(trimmed) {
        return Some(ScalarValue::Text(text));
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        if let Ok(int_val) = trimmed.parse::<i64>() {
            return Some(ScalarValue::Int(int_val));
        }
        if let Ok(numeric) = trimmed.parse::<Decimal>() {
            return Some(ScalarValue::Numeric(numeric));
        }
    }
    None
}

fn decode_single_quoted_string(input: &str) -> Option<String> {
    let inner = input.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
            } else {
                return None;
            }
        }
        out.push(ch);
    }
    Some(out)
}

fn try_eval_direct_expression(frame: &InvocationFrame, expr: &str) -> Option<ScalarValue> {
    if let Some(value) = try_parse_simple_constant(expr) {
        return Some(value);
    }
    let is_reference = !expr.is_empty()
        && expr.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|first| first == '_' || first.is_ascii_alphabetic() || first == '$')
                && chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
        });
    if !is_reference {
        return None;
    }
    let reference = frame.try_resolve(expr)?;
    frame.value(&reference).ok()
}

/// Runs one statement on the host and folds the notices it produced into
/// `notices`, also when the statement fails.
pub fn execute_sql(
    executor: &mut dyn SqlExecutor,
    notices: &mut NoticeLog,
    sql: &str,
) -> Result<QueryResult, PlPgSqlError> {
    trace!(sql, "executing embedded SQL");
    let result = executor.execute_sql(sql);
    notices.extend_nested(executor.take_notices());
    Ok(result?)
}

/// Substitutes variables into `sql` and runs it.
pub fn execute_with_variables(
    frame: &InvocationFrame,
    executor: &mut dyn SqlExecutor,
    notices: &mut NoticeLog,
    sql: &str,
) -> Result<QueryResult, PlPgSqlError> {
    let substituted = substitute_variables(sql, frame)?;
    execute_sql(executor, notices, &substituted)
}

/// Evaluates a scalar expression: literals and plain variable references
/// directly, anything else as `SELECT <expr>` on the host.
pub fn eval_expr(
    frame: &InvocationFrame,
    executor: &mut dyn SqlExecutor,
    notices: &mut NoticeLog,
    expr: &str,
) -> Result<ScalarValue, PlPgSqlError> {
    let raw = expr.trim();
    if let Some(value) = try_eval_direct_expression(frame, raw) {
        return Ok(value);
    }

    let substituted = substitute_variables(raw, frame)?;
    let result = execute_sql(executor, notices, &format!("SELECT {substituted}"))?;
    if result.columns.len() > 1 {
        return Err(PlPgSqlError::NotSingleColumn {
            columns: result.columns.len(),
        });
    }
    let mut rows = result.rows.into_iter();
    let Some(row) = rows.next() else {
        return Ok(ScalarValue::Null);
    };
    if rows.next().is_some() {
        return Err(PlPgSqlError::TooManyRows);
    }
    if row.len() != 1 {
        return Err(PlPgSqlError::NotSingleColumn { columns: row.len() });
    }
    Ok(row.into_iter().next().unwrap_or(ScalarValue::Null))
}
