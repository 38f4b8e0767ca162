// Structured code IR for generated mapping methods, plus its textual rendering.
// Nodes compare structurally so the synthesis output can be asserted on directly.
use std::fmt::{self, Write as _};

use crate::meta::{ConstructionStrategy, Direction};
use crate::types::ClassRef;
use crate::value::Value;

pub const SELF: &str = "self";
pub const EXTRA: &str = "extra";
pub const TARGET: &str = "target";
pub const KWARGS: &str = "d";
pub const OBJ: &str = "obj";

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Const(Value),
    Attr { obj: Box<Expr>, attr: String },
    Index { obj: Box<Expr>, key: Box<Expr> },
    Compare { lhs: Box<Expr>, op: CmpOp, rhs: Box<Expr> },
    Ternary { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Comprehension(Box<Comprehension>),
    Tuple(Vec<Expr>),
    Call(Call),
    IsSet { obj: Box<Expr>, field: String }, // field explicitly set on a model
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Is,
    IsNot,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comprehension {
    List { element: Expr, var: String, iter: Expr },
    Set { element: Expr, var: String, iter: Expr },
    Dict { key: Expr, value: Expr, key_var: String, value_var: String, iter: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub callee: Callee,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// generated method on the receiver, resolved at call time
    Method { receiver: Box<Expr>, key: MethodKey },
    /// user factory captured by the owning method
    Factory { slot: usize },
    /// the target class constructor, fed from the `d` kwargs dict
    Construct { class: ClassRef, strategy: ConstructionStrategy },
}

/// Names a generated method by what it produces, never by string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub direction: Direction,
    pub target: ClassRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { place: Expr, value: Expr },
    Expr(Expr),
    If { cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt> },
    Raise(String),
    Return(Expr),
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

// ————————————————————————————————————————————————————————————————————————————
// BUILDERS
// ————————————————————————————————————————————————————————————————————————————

impl Expr {
    pub fn var(name: &str) -> Self {
        Self::Var(name.to_string())
    }

    pub fn none() -> Self {
        Self::Const(Value::None)
    }

    pub fn str(s: &str) -> Self {
        Self::Const(Value::str(s))
    }

    pub fn int(i: i64) -> Self {
        Self::Const(Value::Int(i))
    }

    pub fn attr(self, attr: &str) -> Self {
        Self::Attr { obj: Box::new(self), attr: attr.to_string() }
    }

    pub fn index(self, key: Expr) -> Self {
        Self::Index { obj: Box::new(self), key: Box::new(key) }
    }

    pub fn compare(self, op: CmpOp, rhs: Expr) -> Self {
        Self::Compare { lhs: Box::new(self), op, rhs: Box::new(rhs) }
    }

    pub fn is_none(self) -> Self {
        self.compare(CmpOp::Is, Self::none())
    }

    pub fn is_not_none(self) -> Self {
        self.compare(CmpOp::IsNot, Self::none())
    }

    pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn method_call(receiver: Expr, key: MethodKey, args: Vec<Expr>) -> Self {
        Self::Call(Call {
            callee: Callee::Method { receiver: Box::new(receiver), key },
            args,
        })
    }
}

impl Stmt {
    pub fn assign(place: Expr, value: Expr) -> Self {
        Self::Assign { place, value }
    }

    pub fn when(cond: Expr, then: Vec<Stmt>) -> Self {
        Self::If { cond, then, otherwise: Vec::new() }
    }
}

impl MethodKey {
    pub fn new(direction: Direction, target: &ClassRef) -> Self {
        Self { direction, target: target.clone() }
    }

    /// Deterministic, collision-free method name.
    pub fn method_name(&self) -> String {
        let prefix = match self.direction {
            Direction::Create => "_map_to",
            Direction::Update => "_mapupdate_to",
        };
        format!("{prefix}_{}_{}", self.target.name(), self.target.id().raw())
    }
}

impl Param {
    pub fn new(name: &str, annotation: Option<&str>) -> Self {
        Self { name: name.to_string(), annotation: annotation.map(str::to_string) }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RENDERING
// ————————————————————————————————————————————————————————————————————————————

const INDENT: &str = "    ";

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => f.write_str(name),
            Self::Const(value) => f.write_str(&value.repr()),
            Self::Attr { obj, attr } => write!(f, "{obj}.{attr}"),
            Self::Index { obj, key } => write!(f, "{obj}[{key}]"),
            Self::Compare { lhs, op, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Self::Ternary { cond, then, otherwise } => {
                write!(f, "{then} if {cond} else {otherwise}")
            }
            Self::Comprehension(comp) => match comp.as_ref() {
                Comprehension::List { element, var, iter } => {
                    write!(f, "[{element} for {var} in {iter}]")
                }
                Comprehension::Set { element, var, iter } => {
                    write!(f, "{{{element} for {var} in {iter}}}")
                }
                Comprehension::Dict { key, value, key_var, value_var, iter } => {
                    write!(f, "{{{key}: {value} for {key_var}, {value_var} in {iter}.items()}}")
                }
            },
            Self::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            Self::Tuple(items) => write!(f, "({})", join(items)),
            Self::Call(call) => match &call.callee {
                Callee::Method { receiver, key } => {
                    write!(f, "{receiver}.{}({})", key.method_name(), join(&call.args))
                }
                Callee::Factory { slot } => write!(f, "{SELF}._factory_{slot}({})", join(&call.args)),
                Callee::Construct { class, strategy } => match strategy {
                    ConstructionStrategy::Validating => write!(f, "{class}(**{KWARGS})"),
                    ConstructionStrategy::BypassValidation => {
                        write!(f, "{class}.model_construct(**{KWARGS})")
                    }
                },
            },
            Self::IsSet { obj, field } => write!(f, "'{field}' in {obj}.model_fields_set"),
        }
    }
}

fn join(exprs: &[Expr]) -> String {
    exprs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl Stmt {
    pub fn render_into(&self, out: &mut String, depth: usize) {
        let pad = INDENT.repeat(depth);
        // writing into a String cannot fail
        let _ = match self {
            Self::Assign { place, value } => writeln!(out, "{pad}{place} = {value}"),
            Self::Expr(expr) => writeln!(out, "{pad}{expr}"),
            Self::If { cond, then, otherwise } => {
                let _ = writeln!(out, "{pad}if {cond}:");
                render_block(then, out, depth + 1);
                if !otherwise.is_empty() {
                    let _ = writeln!(out, "{pad}else:");
                    render_block(otherwise, out, depth + 1);
                }
                Ok(())
            }
            Self::Raise(message) => {
                writeln!(out, "{pad}raise TypeError({})", Value::str(message.as_str()).repr())
            }
            Self::Return(expr) => writeln!(out, "{pad}return {expr}"),
            Self::Pass => writeln!(out, "{pad}pass"),
        };
    }
}

fn render_block(stmts: &[Stmt], out: &mut String, depth: usize) {
    if stmts.is_empty() {
        Stmt::Pass.render_into(out, depth);
    }
    for stmt in stmts {
        stmt.render_into(out, depth);
    }
}

impl Function {
    pub fn render(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| match &p.annotation {
                Some(annotation) => format!("{}: '{annotation}'", p.name),
                None => p.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut out = format!("def {}({params}) -> {}:\n", self.name, self.returns);
        render_block(&self.body, &mut out, 1);
        out
    }
}

impl Module {
    /// Functions in order, separated by one blank line.
    pub fn render(&self) -> String {
        self.functions.iter().map(Function::render).collect::<Vec<_>>().join("\n")
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
