use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::catalog::types::SqlType;
use crate::parser::ast::{BinaryOp, Expr, UnaryOp};
use crate::plpgsql::coerce::row_to_record;
use crate::plpgsql::result::{ResultStream, RoutineResult};
use crate::storage::tuple::{RecordValue, ScalarValue};
use crate::tcop::engine::EngineError;
use crate::utils::adt::misc::{
    NumericOperand, compare_values, numeric_operand, operand_f64, parse_bool_text,
    parse_decimal_text, parse_f64_text, parse_i64_text, value_type_name, values_equal,
};

/// Host services an expression needs beyond its row scope.
pub(crate) trait ExprContext {
    fn resolve_type(&self, type_name: &str) -> Result<SqlType, EngineError>;

    fn cast_value(&self, value: ScalarValue, target: &SqlType) -> Result<ScalarValue, EngineError>;

    /// Calls a routine or built-in; a set-returning callee yields
    /// `RoutineResult::Set`.
    fn call_function(
        &mut self,
        name: &[String],
        args: Vec<ScalarValue>,
        arg_types: &[SqlType],
    ) -> Result<RoutineResult, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EvalScope {
    unqualified: HashMap<String, ScalarValue>,
    qualified: HashMap<String, ScalarValue>,
    ambiguous: HashSet<String>,
    relations: Vec<(String, RecordValue)>,
}

impl EvalScope {
    /// Scope of one row of a FROM item: its fields are visible bare and
    /// qualified by `alias`, and `alias` alone names the whole row.
    pub(crate) fn for_relation(alias: &str, record: RecordValue) -> Self {
        let mut scope = Self::default();
        scope.insert_relation(alias, record);
        scope
    }

    pub(crate) fn insert_relation(&mut self, alias: &str, record: RecordValue) {
        let alias = alias.to_ascii_lowercase();
        for field in &record.fields {
            self.insert_unqualified(&field.name, field.value.clone());
            self.insert_qualified(&format!("{alias}.{}", field.name), field.value.clone());
        }
        self.relations.push((alias, record));
    }

    pub(crate) fn insert_unqualified(&mut self, key: &str, value: ScalarValue) {
        let key = key.to_ascii_lowercase();
        if self.ambiguous.contains(&key) {
            return;
        }
        #[allow(clippy::map_entry)]
        if self.unqualified.contains_key(&key) {
            self.unqualified.remove(&key);
            self.ambiguous.insert(key);
        } else {
            self.unqualified.insert(key, value);
        }
    }

    pub(crate) fn insert_qualified(&mut self, key: &str, value: ScalarValue) {
        self.qualified.insert(key.to_ascii_lowercase(), value);
    }

    pub(crate) fn force_unqualified(&mut self, key: &str, value: ScalarValue) {
        let key = key.to_ascii_lowercase();
        self.ambiguous.remove(&key);
        self.unqualified.insert(key, value);
    }

    pub(crate) fn lookup_identifier(&self, parts: &[String]) -> Result<ScalarValue, EngineError> {
        match parts {
            [] => Err(EngineError::new("42601", "empty identifier")),
            [name] => {
                let key = name.to_ascii_lowercase();
                if self.ambiguous.contains(&key) {
                    return Err(EngineError::new(
                        "42702",
                        format!("column reference \"{name}\" is ambiguous"),
                    ));
                }
                if let Some(value) = self.unqualified.get(&key) {
                    return Ok(value.clone());
                }
                self.relation(&key)
                    .map(|record| ScalarValue::Record(record.clone()))
                    .ok_or_else(|| undefined_column(parts))
            }
            _ => {
                let key = parts
                    .iter()
                    .map(|p| p.to_ascii_lowercase())
                    .collect::<Vec<_>>()
                    .join(".");
                self.qualified
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| undefined_column(parts))
            }
        }
    }

    /// Declared type of a column reference, when it comes from a relation.
    pub(crate) fn lookup_type(&self, parts: &[String]) -> Option<SqlType> {
        match parts {
            [name] => {
                let key = name.to_ascii_lowercase();
                self.relations.iter().find_map(|(alias, record)| {
                    if *alias == key {
                        return Some(record.sql_type());
                    }
                    record.field(&key).map(|field| field.sql_type.clone())
                })
            }
            [qualifier, name] => self
                .relation(&qualifier.to_ascii_lowercase())
                .and_then(|record| record.field(&name.to_ascii_lowercase()))
                .map(|field| field.sql_type.clone()),
            _ => None,
        }
    }

    /// Columns a `*` (or `alias.*`) expands to.
    pub(crate) fn wildcard_columns(
        &self,
        qualifier: Option<&str>,
    ) -> Result<Vec<(String, SqlType, ScalarValue)>, EngineError> {
        let mut columns = Vec::new();
        let mut matched = false;
        for (alias, record) in &self.relations {
            if let Some(wanted) = qualifier
                && !alias.eq_ignore_ascii_case(wanted)
            {
                continue;
            }
            matched = true;
            columns.extend(
                record
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.sql_type.clone(), field.value.clone())),
            );
        }
        match qualifier {
            Some(wanted) if !matched => Err(EngineError::new(
                "42P01",
                format!("missing FROM-clause entry for table \"{wanted}\""),
            )),
            None if !matched => Err(EngineError::new(
                "42601",
                "SELECT * with no tables specified is not valid",
            )),
            _ => Ok(columns),
        }
    }

    fn relation(&self, alias: &str) -> Option<&RecordValue> {
        self.relations
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, record)| record)
    }
}

fn undefined_column(parts: &[String]) -> EngineError {
    EngineError::new(
        "42703",
        format!("column \"{}\" does not exist", parts.join(".")),
    )
}

pub(crate) fn eval_expr(
    expr: &Expr,
    scope: &EvalScope,
    ctx: &mut dyn ExprContext,
) -> Result<ScalarValue, EngineError> {
    match expr {
        Expr::Null => Ok(ScalarValue::Null),
        Expr::Boolean(v) => Ok(ScalarValue::Bool(*v)),
        Expr::Integer(v) => Ok(ScalarValue::Int(*v)),
        Expr::Float(v) => parse_float_literal(v),
        Expr::String(v) => Ok(ScalarValue::Text(v.clone())),
        Expr::Identifier(parts) => scope.lookup_identifier(parts),
        Expr::FunctionCall { name, args, star } => {
            let result = eval_function_call(name, args, *star, scope, ctx)?;
            set_to_scalar(result)
        }
        Expr::Cast { expr, type_name } => {
            let value = eval_expr(expr, scope, ctx)?;
            let target = ctx.resolve_type(type_name)?;
            ctx.cast_value(value, &target)
        }
        Expr::Wildcard | Expr::QualifiedWildcard(_) => Err(EngineError::new(
            "42601",
            "row expansion via \"*\" is not supported here",
        )),
        Expr::Row(items) => {
            let values = items
                .iter()
                .map(|item| eval_expr(item, scope, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ScalarValue::Record(RecordValue::anonymous(values)))
        }
        Expr::Unary { op, expr } => {
            let value = eval_expr(expr, scope, ctx)?;
            eval_unary(*op, value)
        }
        Expr::Binary { left, op, right } => {
            let lhs = eval_expr(left, scope, ctx)?;
            let rhs = eval_expr(right, scope, ctx)?;
            eval_binary(*op, lhs, rhs)
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let needle = eval_expr(expr, scope, ctx)?;
            let mut haystack = Vec::with_capacity(list.len());
            for item in list {
                haystack.push(eval_expr(item, scope, ctx)?);
            }
            eval_in_membership(needle, &haystack, *negated)
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = eval_expr(expr, scope, ctx)?;
            let low = eval_expr(low, scope, ctx)?;
            let high = eval_expr(high, scope, ctx)?;
            eval_between_predicate(value, low, high, *negated)
        }
        Expr::IsNull { expr, negated } => {
            let value = eval_expr(expr, scope, ctx)?;
            let is_null = match &value {
                ScalarValue::Record(record) if *negated => {
                    !record.fields.iter().all(|field| !field.value.is_null())
                }
                other => other.is_null(),
            };
            Ok(ScalarValue::Bool(if *negated { !is_null } else { is_null }))
        }
        Expr::CaseSimple {
            operand,
            when_then,
            else_expr,
        } => {
            let operand = eval_expr(operand, scope, ctx)?;
            for (when_expr, then_expr) in when_then {
                let candidate = eval_expr(when_expr, scope, ctx)?;
                if values_equal(&operand, &candidate)? == Some(true) {
                    return eval_expr(then_expr, scope, ctx);
                }
            }
            match else_expr {
                Some(expr) => eval_expr(expr, scope, ctx),
                None => Ok(ScalarValue::Null),
            }
        }
        Expr::CaseSearched {
            when_then,
            else_expr,
        } => {
            for (when_expr, then_expr) in when_then {
                let condition = eval_expr(when_expr, scope, ctx)?;
                if truthy(&condition)? == Some(true) {
                    return eval_expr(then_expr, scope, ctx);
                }
            }
            match else_expr {
                Some(expr) => eval_expr(expr, scope, ctx),
                None => Ok(ScalarValue::Null),
            }
        }
    }
}

/// Evaluates a select-list entry. Unlike `eval_expr`, a set-returning call at
/// the top of the entry keeps its rows.
pub(crate) fn eval_target(
    expr: &Expr,
    scope: &EvalScope,
    ctx: &mut dyn ExprContext,
) -> Result<RoutineResult, EngineError> {
    match expr {
        Expr::FunctionCall { name, args, star } => {
            eval_function_call(name, args, *star, scope, ctx)
        }
        other => eval_expr(other, scope, ctx).map(RoutineResult::Value),
    }
}

pub(crate) fn eval_function_call(
    name: &[String],
    args: &[Expr],
    star: bool,
    scope: &EvalScope,
    ctx: &mut dyn ExprContext,
) -> Result<RoutineResult, EngineError> {
    if star {
        return Err(EngineError::new(
            "42803",
            format!("{}(*) must be used as an aggregate", name.join(".")),
        ));
    }
    let mut values = Vec::with_capacity(args.len());
    let mut arg_types = Vec::with_capacity(args.len());
    for arg in args {
        let value = eval_expr(arg, scope, ctx)?;
        arg_types.push(infer_arg_type(arg, &value, scope, ctx));
        values.push(value);
    }
    ctx.call_function(name, values, &arg_types)
}

/// Type an argument presents to overload resolution. Untyped string
/// literals and bare NULLs are `unknown`.
pub(crate) fn infer_arg_type(
    expr: &Expr,
    value: &ScalarValue,
    scope: &EvalScope,
    ctx: &dyn ExprContext,
) -> SqlType {
    match expr {
        Expr::String(_) | Expr::Null => SqlType::Unknown,
        Expr::Float(_) => SqlType::Numeric,
        Expr::Cast { type_name, .. } => ctx
            .resolve_type(type_name)
            .unwrap_or_else(|_| SqlType::of_value(value)),
        Expr::Identifier(parts) => scope
            .lookup_type(parts)
            .unwrap_or_else(|| SqlType::of_value(value)),
        Expr::Unary {
            op: UnaryOp::Minus | UnaryOp::Plus,
            expr,
        } => infer_arg_type(expr, value, scope, ctx),
        Expr::Row(_) => SqlType::Record,
        Expr::Binary {
            op: BinaryOp::Concat,
            ..
        } => SqlType::Text,
        Expr::Binary {
            op:
                BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::Gt
                | BinaryOp::Gte
                | BinaryOp::And
                | BinaryOp::Or,
            ..
        }
        | Expr::IsNull { .. }
        | Expr::InList { .. }
        | Expr::Between { .. } => SqlType::Bool,
        _ => SqlType::of_value(value),
    }
}

/// A set used where one value is expected.
pub(crate) fn set_to_scalar(result: RoutineResult) -> Result<ScalarValue, EngineError> {
    match result {
        RoutineResult::Void => Ok(ScalarValue::Null),
        RoutineResult::Value(value) => Ok(value),
        RoutineResult::Set(mut stream) => {
            if stream.len() > 1 {
                return Err(EngineError::new(
                    "0A000",
                    "set-valued function called in context that cannot accept a set",
                ));
            }
            let columns = stream_column_names(&stream);
            Ok(stream
                .next()
                .map(|row| row_value(&columns, row))
                .unwrap_or(ScalarValue::Null))
        }
    }
}

pub(crate) fn stream_column_names(stream: &ResultStream) -> Vec<String> {
    stream
        .columns()
        .iter()
        .map(|(name, _)| name.clone())
        .collect()
}

/// One row of a set as a single value: the column itself when the set is one
/// column wide, a record otherwise.
pub(crate) fn row_value(columns: &[String], row: Vec<ScalarValue>) -> ScalarValue {
    if row.len() == 1 {
        return row.into_iter().next().unwrap_or(ScalarValue::Null);
    }
    ScalarValue::Record(row_to_record(columns, row))
}

fn parse_float_literal(text: &str) -> Result<ScalarValue, EngineError> {
    if let Ok(parsed) = Decimal::from_str(text) {
        return Ok(ScalarValue::Numeric(parsed));
    }
    text.parse::<f64>()
        .map(ScalarValue::Float)
        .map_err(|_| EngineError::new("22P02", format!("invalid numeric literal \"{text}\"")))
}

/// SQL boolean view of a value: `None` is NULL.
pub(crate) fn truthy(value: &ScalarValue) -> Result<Option<bool>, EngineError> {
    match value {
        ScalarValue::Null => Ok(None),
        ScalarValue::Bool(v) => Ok(Some(*v)),
        ScalarValue::Text(text) => parse_bool_text(text).map(Some),
        other => Err(EngineError::new(
            "42804",
            format!(
                "argument of WHERE must be type boolean, not type {}",
                value_type_name(other)
            ),
        )),
    }
}

pub(crate) fn eval_unary(op: UnaryOp, value: ScalarValue) -> Result<ScalarValue, EngineError> {
    if value.is_null() {
        return Ok(ScalarValue::Null);
    }
    match op {
        UnaryOp::Not => Ok(truthy(&value)?
            .map(|v| ScalarValue::Bool(!v))
            .unwrap_or(ScalarValue::Null)),
        UnaryOp::Plus => match numeric_or_text(&value)? {
            NumericOperand::Int(v) => Ok(ScalarValue::Int(v)),
            NumericOperand::Numeric(v) => Ok(ScalarValue::Numeric(v)),
            NumericOperand::Float(v) => Ok(ScalarValue::Float(v)),
        },
        UnaryOp::Minus => match numeric_or_text(&value)? {
            NumericOperand::Int(v) => v
                .checked_neg()
                .map(ScalarValue::Int)
                .ok_or_else(out_of_range),
            NumericOperand::Numeric(v) => Ok(ScalarValue::Numeric(-v)),
            NumericOperand::Float(v) => Ok(ScalarValue::Float(-v)),
        },
    }
}

pub(crate) fn eval_binary(
    op: BinaryOp,
    left: ScalarValue,
    right: ScalarValue,
) -> Result<ScalarValue, EngineError> {
    match op {
        BinaryOp::And => {
            let (l, r) = (truthy(&left)?, truthy(&right)?);
            Ok(match (l, r) {
                (Some(false), _) | (_, Some(false)) => ScalarValue::Bool(false),
                (Some(true), Some(true)) => ScalarValue::Bool(true),
                _ => ScalarValue::Null,
            })
        }
        BinaryOp::Or => {
            let (l, r) = (truthy(&left)?, truthy(&right)?);
            Ok(match (l, r) {
                (Some(true), _) | (_, Some(true)) => ScalarValue::Bool(true),
                (Some(false), Some(false)) => ScalarValue::Bool(false),
                _ => ScalarValue::Null,
            })
        }
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::Lte
        | BinaryOp::Gt
        | BinaryOp::Gte => {
            let Some(ordering) = compare_values(&left, &right)? else {
                return Ok(ScalarValue::Null);
            };
            let result = match op {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::NotEq => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Lte => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(ScalarValue::Bool(result))
        }
        BinaryOp::Concat => {
            if left.is_null() || right.is_null() {
                return Ok(ScalarValue::Null);
            }
            Ok(ScalarValue::Text(format!(
                "{}{}",
                left.render(),
                right.render()
            )))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            eval_arithmetic(op, left, right)
        }
    }
}

fn eval_arithmetic(
    op: BinaryOp,
    left: ScalarValue,
    right: ScalarValue,
) -> Result<ScalarValue, EngineError> {
    if left.is_null() || right.is_null() {
        return Ok(ScalarValue::Null);
    }
    let (lhs, rhs) = arithmetic_operands(&left, &right)?;
    match (lhs, rhs) {
        (NumericOperand::Int(a), NumericOperand::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(division_by_zero());
                    }
                    a.checked_div(b)
                }
                _ => {
                    if b == 0 {
                        return Err(division_by_zero());
                    }
                    a.checked_rem(b)
                }
            };
            result.map(ScalarValue::Int).ok_or_else(out_of_range)
        }
        (NumericOperand::Float(_), _) | (_, NumericOperand::Float(_)) => {
            let (a, b) = (operand_f64(lhs), operand_f64(rhs));
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Err(division_by_zero());
                    }
                    a / b
                }
                _ => {
                    if b == 0.0 {
                        return Err(division_by_zero());
                    }
                    a % b
                }
            };
            Ok(ScalarValue::Float(result))
        }
        _ => {
            let (a, b) = (operand_decimal(lhs), operand_decimal(rhs));
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b.is_zero() {
                        return Err(division_by_zero());
                    }
                    a.checked_div(b)
                }
                _ => {
                    if b.is_zero() {
                        return Err(division_by_zero());
                    }
                    a.checked_rem(b)
                }
            };
            result
                .map(|v| ScalarValue::Numeric(v.normalize()))
                .ok_or_else(|| EngineError::new("22003", "value overflows numeric format"))
        }
    }
}

/// Untyped text next to a number is read as that kind of number.
fn arithmetic_operands(
    left: &ScalarValue,
    right: &ScalarValue,
) -> Result<(NumericOperand, NumericOperand), EngineError> {
    match (numeric_operand(left), numeric_operand(right)) {
        (Some(a), Some(b)) => Ok((a, b)),
        (Some(a), None) => Ok((a, text_operand_like(right, a)?)),
        (None, Some(b)) => Ok((text_operand_like(left, b)?, b)),
        (None, None) => Ok((numeric_or_text(left)?, numeric_or_text(right)?)),
    }
}

fn text_operand_like(
    value: &ScalarValue,
    like: NumericOperand,
) -> Result<NumericOperand, EngineError> {
    let ScalarValue::Text(text) = value else {
        return Err(operator_mismatch(value));
    };
    match like {
        NumericOperand::Int(_) => parse_i64_text(text, "integer").map(NumericOperand::Int),
        NumericOperand::Numeric(_) => parse_decimal_text(text).map(NumericOperand::Numeric),
        NumericOperand::Float(_) => {
            parse_f64_text(text, "double precision").map(NumericOperand::Float)
        }
    }
}

fn numeric_or_text(value: &ScalarValue) -> Result<NumericOperand, EngineError> {
    if let Some(operand) = numeric_operand(value) {
        return Ok(operand);
    }
    match value {
        ScalarValue::Text(text) => match parse_i64_text(text, "integer") {
            Ok(v) => Ok(NumericOperand::Int(v)),
            Err(_) => parse_decimal_text(text).map(NumericOperand::Numeric),
        },
        other => Err(operator_mismatch(other)),
    }
}

fn operand_decimal(operand: NumericOperand) -> Decimal {
    match operand {
        NumericOperand::Int(v) => Decimal::from(v),
        NumericOperand::Numeric(v) => v,
        NumericOperand::Float(v) => Decimal::from_f64_retain(v).unwrap_or_default(),
    }
}

fn operator_mismatch(value: &ScalarValue) -> EngineError {
    EngineError::new(
        "42883",
        format!(
            "operator does not exist for type {}",
            value_type_name(value)
        ),
    )
}

fn division_by_zero() -> EngineError {
    EngineError::new("22012", "division by zero")
}

fn out_of_range() -> EngineError {
    EngineError::new("22003", "integer out of range")
}

pub(crate) fn eval_in_membership(
    needle: ScalarValue,
    haystack: &[ScalarValue],
    negated: bool,
) -> Result<ScalarValue, EngineError> {
    if needle.is_null() {
        return Ok(ScalarValue::Null);
    }
    let mut saw_null = false;
    for candidate in haystack {
        match values_equal(&needle, candidate)? {
            Some(true) => return Ok(ScalarValue::Bool(!negated)),
            Some(false) => {}
            None => saw_null = true,
        }
    }
    if saw_null {
        return Ok(ScalarValue::Null);
    }
    Ok(ScalarValue::Bool(negated))
}

pub(crate) fn eval_between_predicate(
    value: ScalarValue,
    low: ScalarValue,
    high: ScalarValue,
    negated: bool,
) -> Result<ScalarValue, EngineError> {
    let lower = eval_binary(BinaryOp::Gte, value.clone(), low)?;
    let upper = eval_binary(BinaryOp::Lte, value, high)?;
    let within = eval_binary(BinaryOp::And, lower, upper)?;
    if negated {
        eval_unary(UnaryOp::Not, within)
    } else {
        Ok(within)
    }
}
