//! Routine overload resolution.
//!
//! Follows the candidate-narrowing rules of PostgreSQL's `func_select_candidate`
//! (`parse_func.c`): argument-count filter, implicit-coercion filter, then
//! most exact matches, most preferred-type conversions, and the string
//! preference for `unknown` literals.

use std::sync::Arc;

use tracing::trace;

use crate::analyzer::types::can_coerce_implicit;
use crate::catalog::routine::{FunctionDefinition, RoutineKind};
use crate::catalog::types::{SqlType, TypeCategory};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{kind} {signature} does not exist")]
    NoMatchingOverload {
        kind: &'static str,
        signature: String,
    },
    #[error("{kind} {signature} is not unique")]
    AmbiguousOverload {
        kind: &'static str,
        signature: String,
    },
    #[error("could not find a {kind} named \"{name}\"")]
    NotFoundByName { kind: &'static str, name: String },
    #[error("{kind} name \"{name}\" is not unique")]
    NameNotUnique { kind: &'static str, name: String },
}

impl ResolveError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            Self::NoMatchingOverload { .. } | Self::NotFoundByName { .. } => "42883",
            Self::AmbiguousOverload { .. } | Self::NameNotUnique { .. } => "42725",
        }
    }
}

fn call_signature(name: &str, arg_types: &[SqlType]) -> String {
    let args: Vec<String> = arg_types.iter().map(ToString::to_string).collect();
    format!("{name}({})", args.join(", "))
}

/// Selects the routine a call site `name(arg_types...)` refers to.
pub fn resolve_routine(
    candidates: &[Arc<FunctionDefinition>],
    kind: RoutineKind,
    name: &str,
    arg_types: &[SqlType],
) -> Result<Arc<FunctionDefinition>, ResolveError> {
    let no_match = || ResolveError::NoMatchingOverload {
        kind: kind.keyword(),
        signature: call_signature(name, arg_types),
    };

    let mut survivors: Vec<&Arc<FunctionDefinition>> = candidates
        .iter()
        .filter(|def| def.kind == kind)
        .filter(|def| {
            let params = def.input_types();
            params.len() == arg_types.len()
                && arg_types
                    .iter()
                    .zip(&params)
                    .all(|(arg, param)| can_coerce_implicit(arg, param))
        })
        .collect();
    trace!(name, candidates = survivors.len(), "coercible overloads");

    match survivors.len() {
        0 => return Err(no_match()),
        1 => return Ok(Arc::clone(survivors[0])),
        _ => {}
    }

    // Most exact matches; an unknown literal matches anything exactly.
    keep_best(&mut survivors, |def| {
        def.input_types()
            .iter()
            .zip(arg_types)
            .filter(|(param, arg)| *arg == &SqlType::Unknown || param == arg)
            .count()
    });
    if survivors.len() == 1 {
        return Ok(Arc::clone(survivors[0]));
    }

    // Most conversions landing on the preferred type of the argument's category.
    keep_best(&mut survivors, |def| {
        def.input_types()
            .iter()
            .zip(arg_types)
            .filter(|(param, arg)| {
                *arg != &SqlType::Unknown
                    && param != arg
                    && param.is_preferred()
                    && param.category() == arg.category()
            })
            .count()
    });
    if survivors.len() == 1 {
        return Ok(Arc::clone(survivors[0]));
    }

    // Unknown literals prefer the string category when some candidate offers it.
    for (position, arg) in arg_types.iter().enumerate() {
        if *arg != SqlType::Unknown {
            continue;
        }
        let category_at = |def: &Arc<FunctionDefinition>| {
            def.input_types()
                .get(position)
                .map(SqlType::category)
                .unwrap_or(TypeCategory::Unknown)
        };
        if survivors
            .iter()
            .any(|def| category_at(*def) == TypeCategory::String)
        {
            survivors.retain(|def| category_at(*def) == TypeCategory::String);
        }
    }

    match survivors.len() {
        0 => Err(no_match()),
        1 => Ok(Arc::clone(survivors[0])),
        _ => Err(ResolveError::AmbiguousOverload {
            kind: kind.keyword(),
            signature: call_signature(name, arg_types),
        }),
    }
}

fn keep_best(
    survivors: &mut Vec<&Arc<FunctionDefinition>>,
    score: impl Fn(&Arc<FunctionDefinition>) -> usize,
) {
    let best = survivors.iter().map(|def| score(*def)).max().unwrap_or(0);
    survivors.retain(|def| score(*def) == best);
}

/// Resolution for `DROP FUNCTION name` without an argument list: a single
/// routine wins outright; with several, the zero-argument one is chosen if it
/// exists.
pub fn resolve_routine_by_name(
    candidates: &[Arc<FunctionDefinition>],
    kind: RoutineKind,
    name: &str,
) -> Result<Arc<FunctionDefinition>, ResolveError> {
    let matching: Vec<&Arc<FunctionDefinition>> =
        candidates.iter().filter(|def| def.kind == kind).collect();
    match matching.as_slice() {
        [] => Err(ResolveError::NotFoundByName {
            kind: kind.keyword(),
            name: name.to_string(),
        }),
        [only] => Ok(Arc::clone(only)),
        many => many
            .iter()
            .find(|def| def.input_types().is_empty())
            .map(|def| Arc::clone(def))
            .ok_or_else(|| ResolveError::NameNotUnique {
                kind: kind.keyword(),
                name: name.to_string(),
            }),
    }
}

/// Resolution for `DROP FUNCTION name(types)`: the argument list must match
/// exactly.
pub fn resolve_routine_exact(
    candidates: &[Arc<FunctionDefinition>],
    kind: RoutineKind,
    name: &str,
    arg_types: &[SqlType],
) -> Result<Arc<FunctionDefinition>, ResolveError> {
    candidates
        .iter()
        .find(|def| def.kind == kind && def.input_types() == arg_types)
        .map(Arc::clone)
        .ok_or_else(|| ResolveError::NoMatchingOverload {
            kind: kind.keyword(),
            signature: call_signature(name, arg_types),
        })
}
