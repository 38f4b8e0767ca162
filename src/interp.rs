//! Executes generated mapping methods over [`Value`]s.
//!
//! Method calls inside generated code are late-bound: the receiver's runtime
//! class and the method key select a registered method at call time, so a
//! mapping may reference one that is registered after it.
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::ir::{Call, Callee, CmpOp, Comprehension, EXTRA, Expr, KWARGS, OBJ, SELF, Stmt, TARGET};
use crate::meta::Direction;
use crate::method::MappingMethod;
use crate::plan::Factory;
use crate::registry::Registry;
use crate::value::Value;

/// Runs a create method and returns the new object.
pub(crate) fn run_create(
    registry: &Registry,
    method: &MappingMethod,
    this: &Value,
    extra: &Value,
) -> Result<Value> {
    let mut frame = Frame::new(registry, method, this, extra, None);
    match frame.exec_block(&method.function.body)? {
        Flow::Return(value) => Ok(value),
        Flow::Next => Err(Error::runtime(format!(
            "generated method '{}' returned nothing",
            method.function.name
        ))),
    }
}

/// Runs an update method against `target` in place.
pub(crate) fn run_update(
    registry: &Registry,
    method: &MappingMethod,
    this: &Value,
    target: &mut Value,
    extra: &Value,
) -> Result<()> {
    let mut frame = Frame::new(registry, method, this, extra, Some(target));
    frame.exec_block(&method.function.body)?;
    Ok(())
}

enum Flow {
    Next,
    Return(Value),
}

/// Comprehension variables, innermost first.
#[derive(Clone, Copy)]
struct Scope<'s> {
    binding: Option<(&'s str, &'s Value)>,
    parent: Option<&'s Scope<'s>>,
}

impl<'s> Scope<'s> {
    fn root() -> Scope<'static> {
        Scope { binding: None, parent: None }
    }

    fn bind<'b>(&'b self, name: &'b str, value: &'b Value) -> Scope<'b>
    where
        's: 'b,
    {
        Scope { binding: Some((name, value)), parent: Some(self) }
    }

    fn lookup(&self, name: &str) -> Option<&'s Value> {
        match self.binding {
            Some((bound, value)) if bound == name => Some(value),
            _ => self.parent.and_then(|parent| parent.lookup(name)),
        }
    }
}

struct Frame<'a> {
    registry: &'a Registry,
    method: &'a MappingMethod,
    this: &'a Value,
    extra: &'a Value,
    target: Option<&'a mut Value>,
    kwargs: IndexMap<String, Value>,
    obj: Option<Value>,
}

impl<'a> Frame<'a> {
    fn new(
        registry: &'a Registry,
        method: &'a MappingMethod,
        this: &'a Value,
        extra: &'a Value,
        target: Option<&'a mut Value>,
    ) -> Self {
        Self { registry, method, this, extra, target, kwargs: IndexMap::new(), obj: None }
    }

    // ------------------------------ Statements ------------------------------ //

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        let root = Scope::root();
        match stmt {
            Stmt::Assign { place, value } => {
                // `d = {}` resets the constructor kwargs
                if matches!(place, Expr::Var(name) if name == KWARGS) {
                    self.kwargs.clear();
                    return Ok(Flow::Next);
                }
                let value = self.eval(value, &root)?;
                self.assign(place, value)?;
            }
            Stmt::Expr(Expr::Call(Call { callee: Callee::Method { receiver, key }, args }))
                if key.direction == Direction::Update =>
            {
                let receiver = self.eval(receiver, &root)?;
                let [place, _] = args.as_slice() else {
                    return Err(Error::runtime("update call takes a target and extra"));
                };
                let (registry, extra) = (self.registry, self.extra);
                let slot = self.place_mut(place)?;
                registry.update_value(&receiver, slot, extra)?;
            }
            Stmt::Expr(expr) => {
                self.eval(expr, &root)?;
            }
            Stmt::If { cond, then, otherwise } => {
                let branch = if self.eval(cond, &root)?.truthy() { then } else { otherwise };
                return self.exec_block(branch);
            }
            Stmt::Raise(message) => return Err(Error::Raised { message: message.clone() }),
            Stmt::Return(expr) => return Ok(Flow::Return(self.eval(expr, &root)?)),
            Stmt::Pass => {}
        }
        Ok(Flow::Next)
    }

    fn assign(&mut self, place: &Expr, value: Value) -> Result<()> {
        match place {
            Expr::Index { obj, key } if matches!(obj.as_ref(), Expr::Var(name) if name == KWARGS) => {
                let Expr::Const(Value::Str(key)) = key.as_ref() else {
                    return Err(Error::runtime("constructor arguments are keyed by name"));
                };
                self.kwargs.insert(key.clone(), value);
                Ok(())
            }
            Expr::Var(name) if name == OBJ => {
                self.obj = Some(value);
                Ok(())
            }
            Expr::Attr { obj, attr } => self.place_mut(obj)?.as_instance_mut()?.set(attr, value),
            other => Err(Error::runtime(format!("cannot assign to '{other}'"))),
        }
    }

    fn place_mut(&mut self, place: &Expr) -> Result<&mut Value> {
        match place {
            Expr::Var(name) if name == TARGET => self
                .target
                .as_deref_mut()
                .ok_or_else(|| Error::runtime("no target object in a create method")),
            Expr::Var(name) if name == OBJ => self
                .obj
                .as_mut()
                .ok_or_else(|| Error::runtime("object used before construction")),
            Expr::Attr { obj, attr } => self.place_mut(obj)?.attr_mut(attr),
            other => Err(Error::runtime(format!("'{other}' is not assignable"))),
        }
    }

    // ------------------------------ Expressions ----------------------------- //

    fn var<'v>(&'v self, name: &str, scope: &Scope<'v>) -> Result<&'v Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        match name {
            SELF => Ok(self.this),
            EXTRA => Ok(self.extra),
            TARGET => self.target.as_deref().ok_or_else(|| Error::runtime("no target object")),
            OBJ => self.obj.as_ref().ok_or_else(|| Error::runtime("object used before construction")),
            other => Err(Error::runtime(format!("name '{other}' is not defined"))),
        }
    }

    /// Borrows the value of a variable/attribute/index chain without cloning.
    /// `None` for expressions that have to be computed.
    fn resolve<'v>(&'v self, expr: &'v Expr, scope: &Scope<'v>) -> Result<Option<&'v Value>> {
        match expr {
            Expr::Var(name) => self.var(name, scope).map(Some),
            Expr::Const(value) => Ok(Some(value)),
            Expr::Attr { obj, attr } => match self.resolve(obj, scope)? {
                Some(base) => base.attr(attr).map(Some),
                None => Ok(None),
            },
            Expr::Index { obj, key } => match self.resolve(obj, scope)? {
                Some(base) => self.with_operand(key, scope, |key| base.subscript(key)).map(Some),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn with_operand<R>(
        &self,
        expr: &Expr,
        scope: &Scope<'_>,
        f: impl FnOnce(&Value) -> Result<R>,
    ) -> Result<R> {
        match self.resolve(expr, scope)? {
            Some(value) => f(value),
            None => {
                let owned = self.eval(expr, scope)?;
                f(&owned)
            }
        }
    }

    fn eval(&self, expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
        if let Some(value) = self.resolve(expr, scope)? {
            return Ok(value.clone());
        }
        match expr {
            Expr::Var(_) | Expr::Const(_) => Err(Error::runtime(format!("cannot evaluate '{expr}'"))),
            Expr::Attr { obj, attr } => self.with_operand(obj, scope, |base| base.attr(attr).cloned()),
            Expr::Index { obj, key } => self.with_operand(obj, scope, |base| {
                self.with_operand(key, scope, |key| base.subscript(key).cloned())
            }),
            Expr::Compare { lhs, op, rhs } => self.with_operand(lhs, scope, |lhs| {
                self.with_operand(rhs, scope, |rhs| {
                    let result = match op {
                        CmpOp::Is => lhs.is_same(rhs),
                        CmpOp::IsNot => !lhs.is_same(rhs),
                        CmpOp::In => rhs.contains(lhs)?,
                        CmpOp::NotIn => !rhs.contains(lhs)?,
                    };
                    Ok(Value::Bool(result))
                })
            }),
            Expr::Ternary { cond, then, otherwise } => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Comprehension(comp) => self.comprehension(comp, scope),
            Expr::Tuple(items) => Ok(Value::Tuple(
                items.iter().map(|item| self.eval(item, scope)).collect::<Result<_>>()?,
            )),
            Expr::Call(call) => self.call(call, scope),
            Expr::IsSet { obj, field } => {
                self.with_operand(obj, scope, |obj| Ok(Value::Bool(obj.as_instance()?.is_set(field))))
            }
        }
    }

    fn comprehension(&self, comp: &Comprehension, scope: &Scope<'_>) -> Result<Value> {
        match comp {
            Comprehension::List { element, var, iter } => self.with_operand(iter, scope, |items| {
                let mut out = Vec::new();
                for item in items.elements()? {
                    out.push(self.eval(element, &scope.bind(var, item))?);
                }
                Ok(Value::List(out))
            }),
            Comprehension::Set { element, var, iter } => self.with_operand(iter, scope, |items| {
                let mut out = indexmap::IndexSet::new();
                for item in items.elements()? {
                    out.insert(self.eval(element, &scope.bind(var, item))?);
                }
                Ok(Value::Set(out))
            }),
            Comprehension::Dict { key, value, key_var, value_var, iter } => {
                self.with_operand(iter, scope, |items| {
                    let Value::Dict(map) = items else {
                        return Err(Error::runtime(format!(
                            "'{}' object has no attribute 'items'",
                            items.type_name()
                        )));
                    };
                    let mut out = IndexMap::with_capacity(map.len());
                    for (k, v) in map {
                        let with_key = scope.bind(key_var, k);
                        let inner = with_key.bind(value_var, v);
                        out.insert(self.eval(key, &inner)?, self.eval(value, &inner)?);
                    }
                    Ok(Value::Dict(out))
                })
            }
        }
    }

    fn call(&self, call: &Call, scope: &Scope<'_>) -> Result<Value> {
        match &call.callee {
            Callee::Method { receiver, key } => match key.direction {
                Direction::Create => self.with_operand(receiver, scope, |receiver| {
                    self.registry.convert_value(receiver, &key.target, self.extra)
                }),
                Direction::Update => Err(Error::runtime("update methods return nothing")),
            },
            Callee::Factory { slot } => {
                let factory = self
                    .method
                    .factories
                    .get(*slot)
                    .ok_or_else(|| Error::runtime(format!("no factory in slot {slot}")))?;
                match factory {
                    Factory::Nullary(f) => Ok(f()),
                    Factory::Unary(f) => {
                        let arg = call.args.first().ok_or_else(|| Error::runtime("factory takes the source"))?;
                        self.with_operand(arg, scope, |arg| Ok(f(arg)))
                    }
                }
            }
            Callee::Construct { class, strategy } => {
                let def = &self.method.target;
                if def.class() != class {
                    return Err(Error::runtime(format!(
                        "method constructs '{}' but targets '{}'",
                        class,
                        def.class()
                    )));
                }
                def.instantiate(self.kwargs.clone(), *strategy)
            }
        }
    }
}
