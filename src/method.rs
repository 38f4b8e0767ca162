//! Turns a [`Plan`] into a generated method: the IR function plus the
//! captured factories and target class it needs at run time.
use std::sync::Arc;

use indexmap::IndexMap;

use crate::class::ClassDef;
use crate::convert::{MethodTable, synthesize};
use crate::error::{Error, Result};
use crate::ir::{
    Call, Callee, CmpOp, EXTRA, Expr, Function, KWARGS, OBJ, Param, SELF, Stmt, TARGET,
};
use crate::meta::{Direction, FieldDescriptor};
use crate::plan::{Factory, Plan, Resolution};
use crate::types::ClassRef;
use crate::update::synthesize_update;
use crate::value::Value;

#[derive(Debug)]
pub struct MappingMethod {
    pub(crate) source: ClassRef,
    pub(crate) target: Arc<ClassDef>,
    pub(crate) direction: Direction,
    pub(crate) function: Function,
    pub(crate) factories: Vec<Factory>,
}

impl MappingMethod {
    pub fn source(&self) -> &ClassRef {
        &self.source
    }

    pub fn target(&self) -> &ClassRef {
        self.target.class()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn render(&self) -> String {
        self.function.render()
    }
}

/// Emits the method for `plan`. `target` must be the class `plan.target`
/// describes.
pub fn assemble(plan: &Plan, target: &Arc<ClassDef>, methods: &dyn MethodTable) -> Result<MappingMethod> {
    let mut emitter = Emitter { plan, methods, factories: Vec::new() };
    let function = match plan.direction {
        Direction::Create => emitter.create()?,
        Direction::Update => emitter.update()?,
    };
    Ok(MappingMethod {
        source: plan.source.class.clone(),
        target: Arc::clone(target),
        direction: plan.direction,
        function,
        factories: emitter.factories,
    })
}

struct Emitter<'a> {
    plan: &'a Plan,
    methods: &'a dyn MethodTable,
    factories: Vec<Factory>,
}

impl Emitter<'_> {
    fn create(&mut self) -> Result<Function> {
        let plan = self.plan;
        let mut body = vec![Stmt::assign(Expr::var(KWARGS), Expr::Const(Value::Dict(IndexMap::new())))];
        let mut after = Vec::new();
        for (name, resolution) in &plan.entries {
            let target_field = &plan.target.fields[name];
            let place = if target_field.settable_via_constructor {
                Expr::var(KWARGS).index(Expr::str(&target_field.initializer_param_name))
            } else {
                Expr::var(OBJ).attr(&target_field.attribute_name)
            };
            let stmts = match resolution {
                Resolution::Default => continue,
                Resolution::Field { field, ty, only_if_set } => {
                    let value = Expr::var(SELF).attr(&field.attribute_name);
                    let expr = synthesize(ty, &target_field.ty, value.clone(), 0, self.methods)
                        .map_err(|_| self.field_error(field, target_field, false))?;
                    let stmt = self.finish_field(Stmt::assign(place, expr), field, target_field);
                    vec![guard(*only_if_set, value, stmt)]
                }
                Resolution::Factory(factory) => vec![Stmt::assign(place, self.factory_call(factory))],
                Resolution::FromExtra(key) => self.from_extra(key, place),
            };
            if target_field.settable_via_constructor {
                body.extend(stmts);
            } else {
                after.extend(stmts);
            }
        }
        let construct = Expr::Call(Call {
            callee: Callee::Construct {
                class: plan.target.class.clone(),
                strategy: plan.target.construction,
            },
            args: Vec::new(),
        });
        if after.is_empty() {
            body.push(Stmt::Return(construct));
        } else {
            body.push(Stmt::assign(Expr::var(OBJ), construct));
            body.extend(after);
            body.push(Stmt::Return(Expr::var(OBJ)));
        }
        Ok(Function {
            name: "convert".to_string(),
            params: vec![Param::new(SELF, None), Param::new(EXTRA, Some("dict"))],
            returns: format!("'{}'", plan.target.name()),
            body,
        })
    }

    fn update(&mut self) -> Result<Function> {
        let plan = self.plan;
        let mut body = Vec::new();
        for (name, resolution) in &plan.entries {
            let target_field = &plan.target.fields[name];
            let place = Expr::var(TARGET).attr(&target_field.attribute_name);
            match resolution {
                Resolution::Default => {}
                Resolution::Field { field, ty, only_if_set } => {
                    let value = Expr::var(SELF).attr(&field.attribute_name);
                    let stmt = match synthesize_update(
                        ty,
                        &target_field.ty,
                        value.clone(),
                        place.clone(),
                        0,
                        self.methods,
                    ) {
                        Ok(stmt) => stmt,
                        Err(_) => {
                            let expr = synthesize(ty, &target_field.ty, value.clone(), 0, self.methods)
                                .map_err(|_| self.field_error(field, target_field, true))?;
                            Stmt::assign(place, expr)
                        }
                    };
                    let stmt = self.finish_field(stmt, field, target_field);
                    body.push(guard(*only_if_set, value, stmt));
                }
                Resolution::Factory(factory) => {
                    let call = self.factory_call(factory);
                    body.push(Stmt::assign(place, call));
                }
                Resolution::FromExtra(key) => body.extend(self.from_extra(key, place)),
            }
        }
        if body.is_empty() {
            body.push(Stmt::Pass);
        }
        Ok(Function {
            name: "update".to_string(),
            params: vec![
                Param::new(SELF, None),
                Param::new(TARGET, Some(plan.target.name())),
                Param::new(EXTRA, Some("dict")),
            ],
            returns: "None".to_string(),
            body,
        })
    }

    fn finish_field(&self, stmt: Stmt, field: &FieldDescriptor, target_field: &FieldDescriptor) -> Stmt {
        self.plan
            .target
            .post_process(stmt, &self.plan.source, field, target_field, Expr::var(SELF))
    }

    fn factory_call(&mut self, factory: &Factory) -> Expr {
        let slot = self.factories.len();
        self.factories.push(factory.clone());
        let args = match factory {
            Factory::Nullary(_) => Vec::new(),
            Factory::Unary(_) => vec![Expr::var(SELF)],
        };
        Expr::Call(Call { callee: Callee::Factory { slot }, args })
    }

    fn from_extra(&self, key: &str, place: Expr) -> Vec<Stmt> {
        let message = format!(
            "When mapping an object of '{}' to '{}' the item '{key}' needs to be provided in the `extra` dictionary",
            self.plan.source.name(),
            self.plan.target.name()
        );
        vec![
            Stmt::when(
                Expr::str(key).compare(CmpOp::NotIn, Expr::var(EXTRA)),
                vec![Stmt::Raise(message)],
            ),
            Stmt::assign(place, Expr::var(EXTRA).index(Expr::str(key))),
        ]
    }

    fn field_error(&self, field: &FieldDescriptor, target_field: &FieldDescriptor, fallback: bool) -> Error {
        let mut message = format!(
            "{field} of '{}' cannot be converted to {target_field} of '{}' ({} mode)",
            self.plan.source.name(),
            self.plan.target.name(),
            self.plan.direction
        );
        if fallback {
            message.push_str(". The mapping is missing, or only exists for update mode");
        }
        Error::FieldType { message }
    }
}

fn guard(only_if_set: bool, value: Expr, stmt: Stmt) -> Stmt {
    if only_if_set { Stmt::when(value.is_not_none(), vec![stmt]) } else { stmt }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{self, DataclassBuilder, ModelBuilder};
    use crate::convert::tests::Methods;
    use crate::plan::{FieldOverride, Overrides, build_plan, from_extra};
    use crate::types::Namespace;
    use pretty_assertions::assert_eq;

    fn emit(
        source: &Arc<ClassDef>,
        target: &Arc<ClassDef>,
        overrides: &Overrides,
        direction: Direction,
        methods: &Methods,
    ) -> Result<MappingMethod> {
        let plan = build_plan(
            &adapters::describe(source)?,
            &adapters::describe(target)?,
            overrides,
            direction,
        )?;
        assemble(&plan, target, methods)
    }

    #[test]
    fn create_method_layout() {
        let mut ns = Namespace::new();
        let source = DataclassBuilder::new("Foo")
            .field("x", "int")
            .field("y", "Optional[str]")
            .build(&mut ns)
            .unwrap();
        let target = DataclassBuilder::new("Bar")
            .field("x", "int")
            .field("y", "Optional[str]")
            .field("z", "int")
            .field("k", "str")
            .non_init_field("late", "int", Some(Value::Int(0)))
            .build(&mut ns)
            .unwrap();
        let overrides = Overrides::new()
            .with("z", FieldOverride::factory(|| Value::Int(42)))
            .with("k", from_extra("key"))
            .with("late", FieldOverride::source("x"));
        let method = emit(&source, &target, &overrides, Direction::Create, &Methods::default()).unwrap();
        let expected = "\
def convert(self, extra: 'dict') -> 'Bar':
    d = {}
    d['x'] = self.x
    d['y'] = None if self.y is None else self.y
    d['z'] = self._factory_0()
    if 'key' not in extra:
        raise TypeError('When mapping an object of \\'Foo\\' to \\'Bar\\' the item \\'key\\' needs to be provided in the `extra` dictionary')
    d['k'] = extra['key']
    obj = Bar(**d)
    obj.late = self.x
    return obj
";
        assert_eq!(method.render(), expected);
        assert_eq!(method.factories.len(), 1);
    }

    #[test]
    fn update_method_layout() {
        let mut ns = Namespace::new();
        let source = DataclassBuilder::new("Patch")
            .field("x", "Optional[int]")
            .field("y", "int")
            .build(&mut ns)
            .unwrap();
        let target = DataclassBuilder::new("Record")
            .field_with_default("x", "int", 0)
            .field("y", "int")
            .build(&mut ns)
            .unwrap();
        let method = emit(&source, &target, &Overrides::new(), Direction::Update, &Methods::default()).unwrap();
        let expected = "\
def update(self, target: 'Record', extra: 'dict') -> None:
    if self.x is not None:
        target.x = self.x
    target.y = self.y
";
        assert_eq!(method.render(), expected);
    }

    #[test]
    fn empty_update_is_pass() {
        let mut ns = Namespace::new();
        let source = DataclassBuilder::new("Empty").build(&mut ns).unwrap();
        let target = DataclassBuilder::new("Other")
            .field_with_default("x", "int", 0)
            .build(&mut ns)
            .unwrap();
        let overrides = Overrides::new().with("x", crate::plan::ignore());
        let method = emit(&source, &target, &overrides, Direction::Update, &Methods::default()).unwrap();
        assert_eq!(method.function().body, vec![Stmt::Pass]);
    }

    #[test]
    fn field_type_errors_name_both_sides_and_mode() {
        let mut ns = Namespace::new();
        let source = DataclassBuilder::new("Foo").field("x", "int").build(&mut ns).unwrap();
        let target = DataclassBuilder::new("Bar").field("y", "str").build(&mut ns).unwrap();
        let overrides = Overrides::new().with("y", FieldOverride::source("x"));
        let err = emit(&source, &target, &overrides, Direction::Create, &Methods::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'x' of type 'int' of 'Foo' cannot be converted to 'y' of type 'str' of 'Bar' (create mode)"
        );
    }

    #[test]
    fn model_targets_guard_on_fields_set() {
        let mut ns = Namespace::new();
        let source = ModelBuilder::new("In").field("x", "Optional[int]").build(&mut ns).unwrap();
        let target = ModelBuilder::new("Out")
            .field_with_default("x", "Optional[int]", Value::None)
            .build(&mut ns)
            .unwrap();
        let method = emit(&source, &target, &Overrides::new(), Direction::Create, &Methods::default()).unwrap();
        let expected = "\
def convert(self, extra: 'dict') -> 'Out':
    d = {}
    if 'x' in self.model_fields_set:
        d['x'] = None if self.x is None else self.x
    return Out.model_construct(**d)
";
        assert_eq!(method.render(), expected);
    }
}
