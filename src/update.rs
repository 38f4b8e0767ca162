//! In-place update synthesis.
//!
//! Stricter than [`crate::convert`]: only class pairs with a registered
//! update method can be updated in place. Everything else is left to the
//! caller, which falls back to constructing a fresh value and assigning it.
use thiserror::Error;

use crate::convert::{MethodTable, synthesize};
use crate::ir::{EXTRA, Expr, MethodKey, Stmt};
use crate::meta::Direction;
use crate::types::FieldType;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("no in-place update from '{from}' to '{to}' (depth {depth})")]
pub struct UpdateImpossible {
    pub from: FieldType,
    pub to: FieldType,
    pub depth: usize,
}

/// Statement that brings the value at `place` up to date with `value`.
pub fn synthesize_update(
    source: &FieldType,
    target: &FieldType,
    value: Expr,
    place: Expr,
    depth: usize,
    methods: &dyn MethodTable,
) -> Result<Stmt, UpdateImpossible> {
    use FieldType as T;
    let impossible = || UpdateImpossible { from: source.clone(), to: target.clone(), depth };
    match (source, target) {
        (T::Class(s), T::Class(t)) if methods.has_method(s, t, Direction::Update) => {
            let key = MethodKey::new(Direction::Update, t);
            Ok(Stmt::Expr(Expr::method_call(value, key, vec![place, Expr::var(EXTRA)])))
        }
        // an empty target slot has nothing to update, so it gets a fresh object
        (s, T::Optional(t)) if !s.is_optional() => {
            let update = synthesize_update(s, t, value.clone(), place.clone(), depth + 1, methods)?;
            let create = synthesize(s, t, value, depth + 1, methods).map_err(|_| impossible())?;
            Ok(Stmt::If {
                cond: place.clone().is_none(),
                then: vec![Stmt::assign(place, create)],
                otherwise: vec![update],
            })
        }
        (T::Optional(s), T::Optional(_)) => {
            let inner = synthesize_update(s, target, value.clone(), place.clone(), depth + 1, methods)?;
            Ok(Stmt::If {
                cond: value.is_none(),
                then: vec![Stmt::assign(place, Expr::none())],
                otherwise: vec![inner],
            })
        }
        _ => Err(impossible()),
    }
}
