use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::storage::tuple::ScalarValue;
use crate::tcop::engine::EngineError;

/// Numeric view of a value used for cross-type comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NumericOperand {
    Int(i64),
    Numeric(Decimal),
    Float(f64),
}

pub(crate) fn numeric_operand(value: &ScalarValue) -> Option<NumericOperand> {
    match value {
        ScalarValue::Int(v) => Some(NumericOperand::Int(*v)),
        ScalarValue::Numeric(v) => Some(NumericOperand::Numeric(*v)),
        ScalarValue::Float(v) => Some(NumericOperand::Float(*v)),
        _ => None,
    }
}

fn compare_numeric(left: NumericOperand, right: NumericOperand) -> Ordering {
    match (left, right) {
        (NumericOperand::Int(a), NumericOperand::Int(b)) => a.cmp(&b),
        (NumericOperand::Int(a), NumericOperand::Numeric(b)) => Decimal::from(a).cmp(&b),
        (NumericOperand::Numeric(a), NumericOperand::Int(b)) => a.cmp(&Decimal::from(b)),
        (NumericOperand::Numeric(a), NumericOperand::Numeric(b)) => a.cmp(&b),
        (left, right) => {
            let a = operand_f64(left);
            let b = operand_f64(right);
            // NaN sorts above every other value, as in PostgreSQL.
            match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            }
        }
    }
}

pub(crate) fn operand_f64(operand: NumericOperand) -> f64 {
    match operand {
        NumericOperand::Int(v) => v as f64,
        NumericOperand::Numeric(v) => v.to_f64().unwrap_or(f64::NAN),
        NumericOperand::Float(v) => v,
    }
}

/// Three-valued comparison: `None` when the outcome is NULL. Records compare
/// field by field; a NULL field yields NULL unless an earlier field already
/// decided the order.
pub(crate) fn compare_values(
    left: &ScalarValue,
    right: &ScalarValue,
) -> Result<Option<Ordering>, EngineError> {
    match (left, right) {
        (ScalarValue::Null, _) | (_, ScalarValue::Null) => Ok(None),
        (ScalarValue::Record(a), ScalarValue::Record(b)) => {
            if a.fields.len() != b.fields.len() {
                return Err(EngineError::new(
                    "42804",
                    "cannot compare record types with different numbers of columns",
                ));
            }
            for (fa, fb) in a.fields.iter().zip(&b.fields) {
                match compare_values(&fa.value, &fb.value)? {
                    Some(Ordering::Equal) => continue,
                    other => return Ok(other),
                }
            }
            Ok(Some(Ordering::Equal))
        }
        (ScalarValue::Bool(a), ScalarValue::Bool(b)) => Ok(Some(a.cmp(b))),
        (ScalarValue::Text(a), ScalarValue::Text(b)) => Ok(Some(a.cmp(b))),
        _ => {
            if let (Some(a), Some(b)) = (numeric_operand(left), numeric_operand(right)) {
                return Ok(Some(compare_numeric(a, b)));
            }
            compare_with_text(left, right)
        }
    }
}

/// An untyped literal compared against a typed value is read as that type.
fn compare_with_text(
    left: &ScalarValue,
    right: &ScalarValue,
) -> Result<Option<Ordering>, EngineError> {
    match (left, right) {
        (ScalarValue::Text(text), other) => {
            let parsed = parse_like(text, other)?;
            compare_values(&parsed, other)
        }
        (other, ScalarValue::Text(text)) => {
            let parsed = parse_like(text, other)?;
            compare_values(other, &parsed)
        }
        _ => Err(EngineError::new(
            "42883",
            format!(
                "operator does not exist: {} = {}",
                value_type_name(left),
                value_type_name(right)
            ),
        )),
    }
}

fn parse_like(text: &str, like: &ScalarValue) -> Result<ScalarValue, EngineError> {
    match like {
        ScalarValue::Bool(_) => parse_bool_text(text).map(ScalarValue::Bool),
        ScalarValue::Int(_) => parse_i64_text(text, "bigint").map(ScalarValue::Int),
        ScalarValue::Numeric(_) => parse_decimal_text(text).map(ScalarValue::Numeric),
        ScalarValue::Float(_) => parse_f64_text(text, "double precision").map(ScalarValue::Float),
        _ => Ok(ScalarValue::Text(text.to_string())),
    }
}

pub(crate) fn value_type_name(value: &ScalarValue) -> &'static str {
    match value {
        ScalarValue::Null => "unknown",
        ScalarValue::Bool(_) => "boolean",
        ScalarValue::Int(_) => "bigint",
        ScalarValue::Float(_) => "double precision",
        ScalarValue::Numeric(_) => "numeric",
        ScalarValue::Text(_) => "text",
        ScalarValue::Record(_) => "record",
    }
}

pub(crate) fn values_equal(
    left: &ScalarValue,
    right: &ScalarValue,
) -> Result<Option<bool>, EngineError> {
    Ok(compare_values(left, right)?.map(|ord| ord == Ordering::Equal))
}

/// Total order for ORDER BY: NULLs sort last, like PostgreSQL's default
/// ascending order.
pub(crate) fn compare_for_sort(left: &ScalarValue, right: &ScalarValue) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match compare_values(left, right) {
            Ok(Some(ord)) => ord,
            _ => left.render().cmp(&right.render()),
        },
    }
}

pub(crate) fn parse_bool_text(text: &str) -> Result<bool, EngineError> {
    let normalized = text.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "t" | "true" | "yes" | "y" | "on" | "1" => Ok(true),
        "f" | "false" | "no" | "n" | "off" | "0" => Ok(false),
        _ => Err(invalid_input("boolean", text)),
    }
}

pub(crate) fn parse_i64_text(text: &str, type_name: &str) -> Result<i64, EngineError> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| invalid_input(type_name, text))
}

pub(crate) fn parse_f64_text(text: &str, type_name: &str) -> Result<f64, EngineError> {
    let trimmed = text.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" => Ok(f64::NAN),
        "infinity" | "inf" | "+infinity" => Ok(f64::INFINITY),
        "-infinity" | "-inf" => Ok(f64::NEG_INFINITY),
        _ => trimmed
            .parse::<f64>()
            .map_err(|_| invalid_input(type_name, text)),
    }
}

pub(crate) fn parse_decimal_text(text: &str) -> Result<Decimal, EngineError> {
    let trimmed = text.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| invalid_input("numeric", text))
}

pub(crate) fn decimal_from_f64(value: f64) -> Result<Decimal, EngineError> {
    Decimal::from_f64(value).ok_or_else(|| {
        EngineError::new(
            "22003",
            format!("cannot convert {value} to numeric"),
        )
    })
}

pub(crate) fn invalid_input(type_name: &str, text: &str) -> EngineError {
    EngineError::new(
        "22P02",
        format!("invalid input syntax for type {type_name}: \"{text}\""),
    )
}

pub(crate) fn parse_i64_scalar(value: &ScalarValue, type_name: &str) -> Result<i64, EngineError> {
    match value {
        ScalarValue::Int(v) => Ok(*v),
        ScalarValue::Float(v) => {
            let rounded = v.round_ties_even();
            if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64 {
                Ok(rounded as i64)
            } else {
                Err(EngineError::new("22003", format!("{type_name} out of range")))
            }
        }
        ScalarValue::Numeric(v) => v
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or_else(|| EngineError::new("22003", format!("{type_name} out of range"))),
        ScalarValue::Text(v) => parse_i64_text(v, type_name),
        other => Err(invalid_input(type_name, &other.render())),
    }
}

pub(crate) fn parse_f64_scalar(value: &ScalarValue, type_name: &str) -> Result<f64, EngineError> {
    match value {
        ScalarValue::Float(v) => Ok(*v),
        ScalarValue::Int(v) => Ok(*v as f64),
        ScalarValue::Numeric(v) => Ok(v.to_f64().unwrap_or(f64::NAN)),
        ScalarValue::Text(v) => parse_f64_text(v, type_name),
        other => Err(invalid_input(type_name, &other.render())),
    }
}

pub(crate) fn parse_bool_scalar(value: &ScalarValue) -> Result<bool, EngineError> {
    match value {
        ScalarValue::Bool(v) => Ok(*v),
        ScalarValue::Text(v) => parse_bool_text(v),
        other => Err(EngineError::new(
            "42804",
            format!(
                "argument of type {} must be type boolean",
                value_type_name(other)
            ),
        )),
    }
}

pub(crate) fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

pub(crate) fn quote_ident(text: &str) -> String {
    let plain = text
        .chars()
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_lowercase())
        && text
            .chars()
            .all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit());
    if plain {
        text.to_string()
    } else {
        format!("\"{}\"", text.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use rust_decimal::Decimal;

    use super::{compare_for_sort, compare_values, parse_bool_text, parse_i64_scalar, quote_ident};
    use crate::storage::tuple::{RecordValue, ScalarValue};

    #[test]
    fn compares_across_numeric_representations() {
        let ord = compare_values(&ScalarValue::Int(2), &ScalarValue::Numeric(Decimal::new(25, 1)))
            .expect("comparable");
        assert_eq!(ord, Some(Ordering::Less));
        let ord = compare_values(&ScalarValue::Float(f64::NAN), &ScalarValue::Int(1))
            .expect("comparable");
        assert_eq!(ord, Some(Ordering::Greater));
    }

    #[test]
    fn null_comparison_is_unknown() {
        assert_eq!(compare_values(&ScalarValue::Null, &ScalarValue::Int(1)).expect("ok"), None);
    }

    #[test]
    fn records_compare_lexicographically_with_null_propagation() {
        let record = |values: Vec<ScalarValue>| ScalarValue::Record(RecordValue::anonymous(values));
        let a = record(vec![ScalarValue::Int(1), ScalarValue::Null]);
        let b = record(vec![ScalarValue::Int(2), ScalarValue::Null]);
        let c = record(vec![ScalarValue::Int(1), ScalarValue::Int(3)]);
        assert_eq!(compare_values(&a, &b).expect("ok"), Some(Ordering::Less));
        assert_eq!(compare_values(&a, &c).expect("ok"), None);
    }

    #[test]
    fn text_literal_compares_as_other_operand_type() {
        let ord =
            compare_values(&ScalarValue::Text("10".to_string()), &ScalarValue::Int(9)).expect("ok");
        assert_eq!(ord, Some(Ordering::Greater));
        assert!(compare_values(&ScalarValue::Text("x".to_string()), &ScalarValue::Int(9)).is_err());
    }

    #[test]
    fn sort_places_nulls_last() {
        let mut values = vec![ScalarValue::Null, ScalarValue::Int(3), ScalarValue::Int(1)];
        values.sort_by(compare_for_sort);
        assert_eq!(values, vec![ScalarValue::Int(1), ScalarValue::Int(3), ScalarValue::Null]);
    }

    #[test]
    fn integer_parsing_rounds_like_casts() {
        assert_eq!(parse_i64_scalar(&ScalarValue::Float(2.5), "integer").expect("ok"), 2);
        assert_eq!(
            parse_i64_scalar(&ScalarValue::Numeric(Decimal::new(25, 1)), "integer").expect("ok"),
            3
        );
        assert_eq!(
            parse_i64_scalar(&ScalarValue::Text("abc".to_string()), "integer")
                .expect_err("not a number")
                .message,
            "invalid input syntax for type integer: \"abc\""
        );
    }

    #[test]
    fn bool_and_ident_helpers() {
        assert_eq!(parse_bool_text(" YES ").expect("ok"), true);
        assert!(parse_bool_text("maybe").is_err());
        assert_eq!(quote_ident("plain_name"), "plain_name");
        assert_eq!(quote_ident("Mixed"), "\"Mixed\"");
    }
}
