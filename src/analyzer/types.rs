//! Coercion rules.
//!
//! Defines PostgreSQL's implicit and assignment cast compatibility for the
//! built-in types the routine layer understands.

use crate::catalog::types::{SqlType, TypeCategory};

/// PostgreSQL implicit cast compatibility.
/// Returns true if a value of type `from` can be implicitly coerced to `to`.
pub fn can_coerce_implicit(from: &SqlType, to: &SqlType) -> bool {
    if from == to || *from == SqlType::Unknown {
        return true;
    }
    matches!(
        (from, to),
        // Numeric promotions
        (
            SqlType::Int2,
            SqlType::Int4 | SqlType::Int8 | SqlType::Float4 | SqlType::Float8 | SqlType::Numeric
        )
            | (SqlType::Int4, SqlType::Int8 | SqlType::Float4 | SqlType::Float8 | SqlType::Numeric)
            | (SqlType::Int8, SqlType::Float4 | SqlType::Float8 | SqlType::Numeric)
            | (SqlType::Numeric, SqlType::Float4 | SqlType::Float8)
            | (SqlType::Float4, SqlType::Float8)
            // String types are binary compatible
            | (SqlType::Varchar, SqlType::Text)
            | (SqlType::Text, SqlType::Varchar)
            // Any row type is a record
            | (SqlType::Composite(_), SqlType::Record)
    )
}

/// Assignment-context casts: implicit casts plus numeric narrowing and
/// output to string types.
pub fn can_coerce_assignment(from: &SqlType, to: &SqlType) -> bool {
    if can_coerce_implicit(from, to) {
        return true;
    }
    if is_numeric(from) && is_numeric(to) {
        return true;
    }
    matches!(to.category(), TypeCategory::String) && !matches!(from, SqlType::Void)
}

/// Returns true if the type is numeric.
pub fn is_numeric(t: &SqlType) -> bool {
    t.category() == TypeCategory::Numeric
}

#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn test_implicit_coercion_same_type() {
        assert!(can_coerce_implicit(&SqlType::Int8, &SqlType::Int8));
        assert!(can_coerce_implicit(&SqlType::Text, &SqlType::Text));
    }

    #[test]
    fn test_implicit_coercion_int_widening() {
        assert!(can_coerce_implicit(&SqlType::Int4, &SqlType::Int8));
        assert!(can_coerce_implicit(&SqlType::Int4, &SqlType::Numeric));
        assert!(can_coerce_implicit(&SqlType::Int8, &SqlType::Float8));
    }

    #[test]
    fn test_implicit_coercion_not_narrowing() {
        assert!(!can_coerce_implicit(&SqlType::Float8, &SqlType::Int8));
        assert!(!can_coerce_implicit(&SqlType::Int8, &SqlType::Int4));
    }

    #[test]
    fn test_implicit_coercion_no_cross_category() {
        assert!(!can_coerce_implicit(&SqlType::Int4, &SqlType::Text));
        assert!(!can_coerce_implicit(&SqlType::Text, &SqlType::Int4));
    }

    #[test]
    fn test_unknown_coerces_to_anything() {
        assert!(can_coerce_implicit(&SqlType::Unknown, &SqlType::Int8));
        assert!(can_coerce_implicit(&SqlType::Unknown, &SqlType::Text));
    }

    #[test]
    fn test_assignment_allows_narrowing_and_text_output() {
        assert!(can_coerce_assignment(&SqlType::Int8, &SqlType::Int4));
        assert!(can_coerce_assignment(&SqlType::Numeric, &SqlType::Int2));
        assert!(can_coerce_assignment(&SqlType::Bool, &SqlType::Text));
        assert!(!can_coerce_assignment(&SqlType::Bool, &SqlType::Int4));
    }
}
