//! Value/type adapter: assignment casts between runtime values and declared
//! types, with I/O conversion as the fallback, the way `exec_cast_value`
//! behaves.

use rust_decimal::prelude::ToPrimitive;

use crate::catalog::types::{CompositeType, SqlType};
use crate::catalog::{RoutineCatalog, SearchPath, lookup_composite_type};
use crate::plpgsql::error::PlPgSqlError;
use crate::storage::tuple::{RecordField, RecordValue, ScalarValue};
use crate::utils::adt::misc::{
    decimal_from_f64, parse_bool_text, parse_decimal_text, parse_f64_text, values_equal,
};

/// Catalog view needed to resolve composite types while coercing.
#[derive(Clone, Copy)]
pub struct TypeContext<'a> {
    pub catalog: &'a dyn RoutineCatalog,
    pub search_path: &'a SearchPath,
}

impl<'a> TypeContext<'a> {
    pub fn composite(&self, name: &str) -> Result<CompositeType, PlPgSqlError> {
        lookup_composite_type(self.catalog, self.search_path, name).ok_or_else(|| {
            PlPgSqlError::Catalog(crate::catalog::CatalogError::UndefinedType(name.to_string()))
        })
    }
}

fn mismatch(value: &str, target: &SqlType) -> PlPgSqlError {
    PlPgSqlError::TypeMismatch {
        value: value.to_string(),
        target: target.to_string(),
    }
}

fn integer_bounds(target: &SqlType) -> (i64, i64) {
    match target {
        SqlType::Int2 => (i64::from(i16::MIN), i64::from(i16::MAX)),
        SqlType::Int4 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        _ => (i64::MIN, i64::MAX),
    }
}

fn check_integer(value: i64, target: &SqlType) -> Result<ScalarValue, PlPgSqlError> {
    let (min, max) = integer_bounds(target);
    if value < min || value > max {
        return Err(PlPgSqlError::OutOfRange {
            target: target.to_string(),
        });
    }
    Ok(ScalarValue::Int(value))
}

/// Converts `value` for storage in a slot of type `target`.
pub fn coerce_to_type(
    value: ScalarValue,
    target: &SqlType,
    types: &TypeContext<'_>,
) -> Result<ScalarValue, PlPgSqlError> {
    if value.is_null() {
        return Ok(ScalarValue::Null);
    }
    match target {
        SqlType::Unknown | SqlType::Trigger => Ok(value),
        SqlType::Void => Ok(ScalarValue::Null),
        SqlType::Bool => match value {
            ScalarValue::Bool(_) => Ok(value),
            ScalarValue::Text(text) => {
                parse_bool_text(&text).map(ScalarValue::Bool).map_err(|_| mismatch(&text, target))
            }
            other => Err(mismatch(&other.render(), target)),
        },
        SqlType::Int2 | SqlType::Int4 | SqlType::Int8 => match value {
            ScalarValue::Int(v) => check_integer(v, target),
            ScalarValue::Float(v) => {
                let rounded = v.round_ties_even();
                if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
                    return Err(PlPgSqlError::OutOfRange {
                        target: target.to_string(),
                    });
                }
                check_integer(rounded as i64, target)
            }
            ScalarValue::Numeric(v) => {
                let rounded = v
                    .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
                    .to_i64()
                    .ok_or_else(|| PlPgSqlError::OutOfRange {
                        target: target.to_string(),
                    })?;
                check_integer(rounded, target)
            }
            ScalarValue::Text(text) => {
                let parsed = text.trim().parse::<i64>().map_err(|_| mismatch(&text, target))?;
                check_integer(parsed, target)
            }
            other => Err(mismatch(&other.render(), target)),
        },
        SqlType::Float4 | SqlType::Float8 => {
            let parsed = match value {
                ScalarValue::Float(v) => v,
                ScalarValue::Int(v) => v as f64,
                ScalarValue::Numeric(v) => v.to_f64().unwrap_or(f64::NAN),
                ScalarValue::Text(text) => {
                    parse_f64_text(&text, "double precision").map_err(|_| mismatch(&text, target))?
                }
                other => return Err(mismatch(&other.render(), target)),
            };
            if *target == SqlType::Float4 {
                Ok(ScalarValue::Float(f64::from(parsed as f32)))
            } else {
                Ok(ScalarValue::Float(parsed))
            }
        }
        SqlType::Numeric => match value {
            ScalarValue::Numeric(_) => Ok(value),
            ScalarValue::Int(v) => Ok(ScalarValue::Numeric(v.into())),
            ScalarValue::Float(v) => decimal_from_f64(v)
                .map(ScalarValue::Numeric)
                .map_err(|_| mismatch(&v.to_string(), target)),
            ScalarValue::Text(text) => parse_decimal_text(&text)
                .map(ScalarValue::Numeric)
                .map_err(|_| mismatch(&text, target)),
            other => Err(mismatch(&other.render(), target)),
        },
        SqlType::Text | SqlType::Varchar => match value {
            ScalarValue::Text(_) => Ok(value),
            ScalarValue::Bool(v) => Ok(ScalarValue::Text(
                if v { "true" } else { "false" }.to_string(),
            )),
            other => Ok(ScalarValue::Text(other.render())),
        },
        SqlType::Record => match value {
            ScalarValue::Record(_) => Ok(value),
            _ => Err(PlPgSqlError::RowShape {
                message: "cannot assign non-composite value to a record variable".to_string(),
            }),
        },
        SqlType::Composite(name) => {
            let composite = types.composite(name)?;
            match value {
                ScalarValue::Record(record) => {
                    coerce_record(record.values(), &composite, types).map(ScalarValue::Record)
                }
                ScalarValue::Text(text) => {
                    let raw = parse_record_literal(&text).ok_or_else(|| PlPgSqlError::TypeMismatch {
                        value: text.clone(),
                        target: name.clone(),
                    })?;
                    let values = raw
                        .into_iter()
                        .map(|field| field.map(ScalarValue::Text).unwrap_or(ScalarValue::Null))
                        .collect();
                    coerce_record(values, &composite, types).map(ScalarValue::Record)
                }
                _ => Err(PlPgSqlError::RowShape {
                    message: format!(
                        "cannot assign non-composite value to a variable of type {name}"
                    ),
                }),
            }
        }
    }
}

/// Builds a typed record from positional values, casting each to its field
/// type.
pub fn coerce_record(
    values: Vec<ScalarValue>,
    composite: &CompositeType,
    types: &TypeContext<'_>,
) -> Result<RecordValue, PlPgSqlError> {
    if values.len() != composite.fields.len() {
        return Err(PlPgSqlError::RowShape {
            message: format!(
                "returned row structure does not match the structure of type {}: \
                 expected {} attributes, got {}",
                composite.name,
                composite.fields.len(),
                values.len()
            ),
        });
    }
    let fields = values
        .into_iter()
        .zip(&composite.fields)
        .map(|(value, (name, sql_type))| {
            Ok(RecordField {
                name: name.clone(),
                sql_type: sql_type.clone(),
                value: coerce_to_type(value, sql_type, types)?,
            })
        })
        .collect::<Result<Vec<_>, PlPgSqlError>>()?;
    Ok(RecordValue {
        type_name: Some(composite.name.clone()),
        fields,
    })
}

/// Builds an anonymous record from a result row, keeping column names.
pub fn row_to_record(columns: &[String], row: Vec<ScalarValue>) -> RecordValue {
    let fields = row
        .into_iter()
        .enumerate()
        .map(|(idx, value)| RecordField {
            name: columns
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("f{}", idx + 1)),
            sql_type: SqlType::of_value(&value),
            value,
        })
        .collect();
    RecordValue {
        type_name: None,
        fields,
    }
}

/// Condition value of IF/WHILE/EXIT WHEN; NULL is reported as `None`.
pub fn eval_condition(value: &ScalarValue) -> Result<Option<bool>, PlPgSqlError> {
    match value {
        ScalarValue::Null => Ok(None),
        ScalarValue::Bool(v) => Ok(Some(*v)),
        ScalarValue::Text(text) => parse_bool_text(text)
            .map(Some)
            .map_err(|_| mismatch(text, &SqlType::Bool)),
        other => Err(mismatch(&other.render(), &SqlType::Bool)),
    }
}

/// Integer value of a FOR bound or step.
pub fn eval_integer(value: &ScalarValue) -> Result<Option<i64>, PlPgSqlError> {
    match value {
        ScalarValue::Null => Ok(None),
        ScalarValue::Int(v) => Ok(Some(*v)),
        ScalarValue::Float(_) | ScalarValue::Numeric(_) | ScalarValue::Text(_) => {
            match coerce_int8(value.clone())? {
                ScalarValue::Int(v) => Ok(Some(v)),
                _ => Ok(None),
            }
        }
        other => Err(mismatch(&other.render(), &SqlType::Int4)),
    }
}

fn coerce_int8(value: ScalarValue) -> Result<ScalarValue, PlPgSqlError> {
    match value {
        ScalarValue::Float(v) => {
            let rounded = v.round_ties_even();
            if !rounded.is_finite() {
                return Err(PlPgSqlError::OutOfRange {
                    target: SqlType::Int8.to_string(),
                });
            }
            Ok(ScalarValue::Int(rounded as i64))
        }
        ScalarValue::Numeric(v) => v
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .map(ScalarValue::Int)
            .ok_or_else(|| PlPgSqlError::OutOfRange {
                target: SqlType::Int8.to_string(),
            }),
        ScalarValue::Text(text) => text
            .trim()
            .parse::<i64>()
            .map(ScalarValue::Int)
            .map_err(|_| mismatch(&text, &SqlType::Int8)),
        other => Ok(other),
    }
}

/// Equality used by simple CASE; NULL on either side never matches.
pub fn case_values_match(left: &ScalarValue, right: &ScalarValue) -> Result<bool, PlPgSqlError> {
    Ok(values_equal(left, right)?.unwrap_or(false))
}

/// Splits a record literal such as `(1,apple,"a b",)` into raw field texts;
/// an empty unquoted field is NULL.
pub fn parse_record_literal(text: &str) -> Option<Vec<Option<String>>> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = inner.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' => {
                quoted = true;
                was_quoted = true;
            }
            '\\' => current.push(chars.next()?),
            ',' if !quoted => {
                fields.push(finish_field(&mut current, &mut was_quoted));
            }
            _ => current.push(ch),
        }
    }
    if quoted {
        return None;
    }
    fields.push(finish_field(&mut current, &mut was_quoted));
    Some(fields)
}

fn finish_field(current: &mut String, was_quoted: &mut bool) -> Option<String> {
    let field = std::mem::take(current);
    let quoted = std::mem::replace(was_quoted, false);
    if field.is_empty() && !quoted {
        None
    } else {
        Some(field)
    }
}

#[cfg(test)]
mod tests {
    use super::{TypeContext, coerce_to_type, eval_condition, eval_integer, parse_record_literal};
    use crate::catalog::types::{CompositeType, SqlType};
    use crate::catalog::{MemoryCatalog, SearchPath};
    use crate::plpgsql::error::PlPgSqlError;
    use crate::storage::tuple::{RecordValue, ScalarValue};
    use rust_decimal::Decimal;

    fn catalog_with_test_type() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        catalog
            .create_composite_type(
                "public",
                CompositeType {
                    name: "test".to_string(),
                    fields: vec![
                        ("id".to_string(), SqlType::Int4),
                        ("name".to_string(), SqlType::Text),
                        ("qty".to_string(), SqlType::Int4),
                        ("price".to_string(), SqlType::Float4),
                    ],
                },
            )
            .expect("type should be created");
        catalog
    }

    #[test]
    fn integer_targets_are_range_checked() {
        let catalog = MemoryCatalog::new();
        let path = SearchPath::default();
        let types = TypeContext { catalog: &catalog, search_path: &path };
        assert_eq!(
            coerce_to_type(ScalarValue::Int(40_000), &SqlType::Int2, &types),
            Err(PlPgSqlError::OutOfRange { target: "smallint".to_string() })
        );
        assert_eq!(
            coerce_to_type(ScalarValue::Text(" 12 ".to_string()), &SqlType::Int4, &types),
            Ok(ScalarValue::Int(12))
        );
        assert_eq!(
            coerce_to_type(ScalarValue::Numeric(Decimal::new(25, 1)), &SqlType::Int8, &types),
            Ok(ScalarValue::Int(3))
        );
    }

    #[test]
    fn io_conversion_failure_reports_target_type() {
        let catalog = MemoryCatalog::new();
        let path = SearchPath::default();
        let types = TypeContext { catalog: &catalog, search_path: &path };
        let err = coerce_to_type(ScalarValue::Text("abc".to_string()), &SqlType::Int4, &types)
            .expect_err("not an integer");
        assert_eq!(err.to_string(), "invalid input syntax for type integer: \"abc\"");
    }

    #[test]
    fn anonymous_row_becomes_named_composite() {
        let catalog = catalog_with_test_type();
        let path = SearchPath::default();
        let types = TypeContext { catalog: &catalog, search_path: &path };
        let row = ScalarValue::Record(RecordValue::anonymous(vec![
            ScalarValue::Int(1),
            ScalarValue::Text("apple".to_string()),
            ScalarValue::Int(3),
            ScalarValue::Numeric(Decimal::new(125, 1)),
        ]));
        let coerced = coerce_to_type(row, &SqlType::Composite("test".to_string()), &types)
            .expect("row should fit");
        assert_eq!(coerced.render(), "(1,apple,3,12.5)");
        let ScalarValue::Record(record) = coerced else {
            panic!("expected record");
        };
        assert_eq!(record.field("price").map(|f| &f.value), Some(&ScalarValue::Float(12.5)));
    }

    #[test]
    fn record_literal_text_is_parsed() {
        let catalog = catalog_with_test_type();
        let path = SearchPath::default();
        let types = TypeContext { catalog: &catalog, search_path: &path };
        let coerced = coerce_to_type(
            ScalarValue::Text("(2,\"big pear\",,1.5)".to_string()),
            &SqlType::Composite("test".to_string()),
            &types,
        )
        .expect("literal should parse");
        assert_eq!(coerced.render(), "(2,\"big pear\",,1.5)");
    }

    #[test]
    fn record_literal_parser_distinguishes_null_and_empty() {
        assert_eq!(
            parse_record_literal("(a,,\"\")"),
            Some(vec![Some("a".to_string()), None, Some(String::new())])
        );
        assert_eq!(parse_record_literal("no parens"), None);
    }

    #[test]
    fn conditions_treat_null_as_unknown() {
        assert_eq!(eval_condition(&ScalarValue::Null), Ok(None));
        assert_eq!(eval_condition(&ScalarValue::Text("t".to_string())), Ok(Some(true)));
        assert!(eval_condition(&ScalarValue::Int(1)).is_err());
        assert_eq!(eval_integer(&ScalarValue::Float(2.5)), Ok(Some(2)));
    }
}
