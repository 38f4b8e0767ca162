//! Conversion synthesis: given a source type, a target type and the
//! expression holding the source value, produce an expression of the target
//! type.
//!
//! Rules are tried in a fixed order and the first one whose outer shape
//! applies decides; a failure further down is not retried with later rules.
use thiserror::Error;

use crate::ir::{Comprehension, EXTRA, Expr, MethodKey};
use crate::meta::Direction;
use crate::types::{ClassRef, FieldType};

/// Which generated methods exist, as seen by the synthesizers.
pub trait MethodTable {
    fn has_method(&self, source: &ClassRef, target: &ClassRef, direction: Direction) -> bool;
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("no conversion from '{from}' to '{to}' (depth {depth})")]
pub struct ConversionImpossible {
    pub from: FieldType,
    pub to: FieldType,
    pub depth: usize,
}

pub fn synthesize(
    source: &FieldType,
    target: &FieldType,
    value: Expr,
    depth: usize,
    methods: &dyn MethodTable,
) -> Result<Expr, ConversionImpossible> {
    use FieldType as T;
    let impossible = || ConversionImpossible { from: source.clone(), to: target.clone(), depth };
    match (source, target) {
        (_, T::Any) => Ok(value),
        (T::Class(s), T::Class(t)) if s == t => Ok(value),
        (T::Class(_), T::Union(members)) if members.contains(source) => Ok(value),
        (T::Union(s), T::Union(t)) if s.iter().all(|m| t.contains(m)) => Ok(value),
        (T::Class(s), T::Class(t)) => {
            if !methods.has_method(s, t, Direction::Create) {
                return Err(impossible());
            }
            let key = MethodKey::new(Direction::Create, t);
            Ok(Expr::method_call(value, key, vec![Expr::var(EXTRA)]))
        }
        (T::List(s), T::List(t)) => {
            let var = format!("x{depth}");
            let element = synthesize(s, t, Expr::var(&var), depth + 1, methods)?;
            Ok(comprehension(Comprehension::List { element, var, iter: value }))
        }
        (T::Set(s), T::Set(t)) => {
            let var = format!("x{depth}");
            let element = synthesize(s, t, Expr::var(&var), depth + 1, methods)?;
            Ok(comprehension(Comprehension::Set { element, var, iter: value }))
        }
        (T::Dict(sk, sv), T::Dict(tk, tv)) => {
            let key_var = format!("k{depth}");
            let value_var = format!("v{depth}");
            let key = synthesize(sk, tk, Expr::var(&key_var), depth + 1, methods)?;
            let val = synthesize(sv, tv, Expr::var(&value_var), depth + 1, methods)?;
            Ok(comprehension(Comprehension::Dict {
                key,
                value: val,
                key_var,
                value_var,
                iter: value,
            }))
        }
        (T::Tuple(s), T::Tuple(t)) if s.len() == t.len() => {
            let items = s
                .iter()
                .zip(t)
                .enumerate()
                .map(|(i, (s, t))| {
                    synthesize(s, t, value.clone().index(Expr::int(i as i64)), depth + 1, methods)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Tuple(items))
        }
        (s, T::Optional(t)) if !s.is_optional() => synthesize(s, t, value, depth + 1, methods),
        (T::Optional(s), T::Optional(t)) => {
            let inner = synthesize(s, t, value.clone(), depth + 1, methods)?;
            Ok(Expr::ternary(value.is_none(), Expr::none(), inner))
        }
        _ => Err(impossible()),
    }
}

fn comprehension(comp: Comprehension) -> Expr {
    Expr::Comprehension(Box::new(comp))
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
