//! Built-in functions available to SQL run by the reference session. User
//! routines in the catalog take precedence over these names.

use crate::catalog::types::SqlType;
use crate::plpgsql::result::{ResultStream, RoutineResult};
use crate::storage::tuple::ScalarValue;
use crate::tcop::engine::EngineError;
use crate::utils::adt::misc::{
    parse_i64_scalar, quote_ident, quote_literal, value_type_name, values_equal,
};

const BUILTIN_FUNCTIONS: &[&str] = &[
    "abs",
    "char_length",
    "coalesce",
    "generate_series",
    "length",
    "lower",
    "nullif",
    "quote_ident",
    "quote_literal",
    "upper",
];

pub(crate) fn is_builtin_function(fn_name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&fn_name)
}

pub(crate) fn eval_builtin_function(
    fn_name: &str,
    args: &[ScalarValue],
) -> Result<RoutineResult, EngineError> {
    if fn_name == "generate_series" {
        return eval_generate_series(args).map(RoutineResult::Set);
    }
    eval_scalar_function(fn_name, args).map(RoutineResult::Value)
}

fn eval_scalar_function(fn_name: &str, args: &[ScalarValue]) -> Result<ScalarValue, EngineError> {
    match fn_name {
        "upper" if args.len() == 1 => {
            if matches!(args[0], ScalarValue::Null) {
                return Ok(ScalarValue::Null);
            }
            Ok(ScalarValue::Text(args[0].render().to_uppercase()))
        }
        "lower" if args.len() == 1 => {
            if matches!(args[0], ScalarValue::Null) {
                return Ok(ScalarValue::Null);
            }
            Ok(ScalarValue::Text(args[0].render().to_lowercase()))
        }
        "length" | "char_length" if args.len() == 1 => {
            if matches!(args[0], ScalarValue::Null) {
                return Ok(ScalarValue::Null);
            }
            Ok(ScalarValue::Int(args[0].render().chars().count() as i64))
        }
        "abs" if args.len() == 1 => match &args[0] {
            ScalarValue::Null => Ok(ScalarValue::Null),
            ScalarValue::Int(i) => i
                .checked_abs()
                .map(ScalarValue::Int)
                .ok_or_else(|| EngineError::new("22003", "integer out of range")),
            ScalarValue::Float(f) => Ok(ScalarValue::Float(f.abs())),
            ScalarValue::Numeric(n) => Ok(ScalarValue::Numeric(n.abs())),
            other => Err(EngineError::new(
                "42883",
                format!("function abs({}) does not exist", value_type_name(other)),
            )),
        },
        "nullif" if args.len() == 2 => {
            if matches!(args[0], ScalarValue::Null) {
                return Ok(ScalarValue::Null);
            }
            if values_equal(&args[0], &args[1])? == Some(true) {
                Ok(ScalarValue::Null)
            } else {
                Ok(args[0].clone())
            }
        }
        "coalesce" if !args.is_empty() => Ok(args
            .iter()
            .find(|value| !value.is_null())
            .cloned()
            .unwrap_or(ScalarValue::Null)),
        "quote_literal" if args.len() == 1 => match &args[0] {
            ScalarValue::Null => Ok(ScalarValue::Null),
            other => Ok(ScalarValue::Text(quote_literal(&other.render()))),
        },
        "quote_ident" if args.len() == 1 => match &args[0] {
            ScalarValue::Null => Ok(ScalarValue::Null),
            other => Ok(ScalarValue::Text(quote_ident(&other.render()))),
        },
        _ => Err(EngineError::new(
            "42883",
            format!(
                "function {fn_name}({}) does not exist",
                args.iter()
                    .map(value_type_name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )),
    }
}

fn eval_generate_series(args: &[ScalarValue]) -> Result<ResultStream, EngineError> {
    if !(2..=3).contains(&args.len()) {
        return Err(EngineError::new(
            "42883",
            "generate_series expects 2 or 3 arguments",
        ));
    }
    let mut stream = ResultStream::new(vec![("generate_series".to_string(), SqlType::Int4)]);
    if args.iter().any(ScalarValue::is_null) {
        return Ok(stream);
    }
    let start = parse_i64_scalar(&args[0], "integer")?;
    let stop = parse_i64_scalar(&args[1], "integer")?;
    let step = match args.get(2) {
        Some(step) => parse_i64_scalar(step, "integer")?,
        None => 1,
    };
    if step == 0 {
        return Err(EngineError::new("22023", "step size cannot equal zero"));
    }
    let mut current = start;
    while (step > 0 && current <= stop) || (step < 0 && current >= stop) {
        stream.push(vec![ScalarValue::Int(current)]);
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(stream)
}
