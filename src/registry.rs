//! Registration and invocation of mappings.
//!
//! The registry owns every generated method, keyed explicitly by
//! (source class, target class, direction). Registration synthesizes outside
//! the lock and then inserts all directions at once, so a failed or
//! duplicate registration leaves the registry unchanged.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::adapters;
use crate::class::ClassDef;
use crate::convert::MethodTable;
use crate::enums::{EnumDef, EnumMapping, EnumOverrides, build_enum_mapping};
use crate::error::{Error, Result};
use crate::interp;
use crate::meta::{Direction, MapperMode};
use crate::method::{MappingMethod, assemble};
use crate::plan::{Overrides, build_plan};
use crate::types::{ClassId, ClassRef};
use crate::value::Value;

/// Caller-supplied side-channel values, looked up by `from_extra` fields.
pub type Extra = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingKey {
    pub source: ClassId,
    pub target: ClassId,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub enum Registered {
    Method(Arc<MappingMethod>),
    Enum(Arc<EnumMapping>),
}

/// What a mapping invocation should produce.
pub enum MapTarget<'t> {
    /// Construct a new object of this class
    Class(&'t ClassRef),
    /// Update this object in place
    Instance(&'t mut Value),
}

#[derive(Debug, Default)]
pub struct Registry {
    mappings: RwLock<HashMap<MappingKey, Registered>>,
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

impl MappingKey {
    pub fn new(source: &ClassRef, target: &ClassRef, direction: Direction) -> Self {
        Self { source: source.id(), target: target.id(), direction }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by the crate-level helpers.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<MappingKey, Registered>> {
        self.mappings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<MappingKey, Registered>> {
        self.mappings.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, key: &MappingKey) -> Option<Registered> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &MappingKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // ------------------------------ Registration ---------------------------- //

    pub fn register(
        &self,
        source: &Arc<ClassDef>,
        target: &Arc<ClassDef>,
        overrides: &Overrides,
        mode: MapperMode,
    ) -> Result<()> {
        let methods = self.synthesize(source, target, overrides, mode)?;
        let entries = methods
            .into_iter()
            .map(|method| {
                let key = MappingKey::new(&method.source, method.target(), method.direction);
                (key, Registered::Method(Arc::new(method)))
            })
            .collect();
        self.insert_all(source.class(), target.class(), entries)?;
        tracing::debug!(source = source.name(), target = target.name(), ?mode, "registered mapping");
        Ok(())
    }

    pub fn register_enum(
        &self,
        source: &EnumDef,
        target: &Arc<EnumDef>,
        overrides: &EnumOverrides,
    ) -> Result<()> {
        let mapping = build_enum_mapping(source, target, overrides)?;
        let key = MappingKey::new(source.class(), target.class(), Direction::Create);
        self.insert_all(source.class(), target.class(), vec![(key, Registered::Enum(Arc::new(mapping)))])?;
        tracing::debug!(source = source.name(), target = target.name(), "registered enum mapping");
        Ok(())
    }

    /// Renders the create and update methods without registering anything.
    pub fn debug_map_codes(
        &self,
        source: &Arc<ClassDef>,
        target: &Arc<ClassDef>,
        overrides: &Overrides,
    ) -> Result<(String, String)> {
        let methods = self.synthesize(source, target, overrides, MapperMode::CreateAndUpdate)?;
        let render = |direction| {
            methods
                .iter()
                .find(|m| m.direction == direction)
                .map(MappingMethod::render)
                .unwrap_or_default()
        };
        Ok((render(Direction::Create), render(Direction::Update)))
    }

    /// Builds the methods for every direction of `mode`; nothing is inserted.
    pub fn synthesize(
        &self,
        source: &Arc<ClassDef>,
        target: &Arc<ClassDef>,
        overrides: &Overrides,
        mode: MapperMode,
    ) -> Result<Vec<MappingMethod>> {
        for &direction in mode.directions() {
            let key = MappingKey::new(source.class(), target.class(), direction);
            if self.contains(&key) {
                return Err(Error::DuplicateMapping {
                    source_class: source.name().to_string(),
                    target_class: target.name().to_string(),
                    direction,
                });
            }
        }
        let source_desc = adapters::describe(source)?;
        let target_desc = adapters::describe(target)?;
        mode.directions()
            .iter()
            .map(|&direction| -> Result<MappingMethod> {
                let plan = build_plan(&source_desc, &target_desc, overrides, direction)?;
                let method = assemble(&plan, target, self)?;
                tracing::trace!(
                    source = source.name(),
                    target = target.name(),
                    %direction,
                    code = %method.render(),
                    "generated mapping method"
                );
                Ok(method)
            })
            .collect()
    }

    fn insert_all(
        &self,
        source: &ClassRef,
        target: &ClassRef,
        entries: Vec<(MappingKey, Registered)>,
    ) -> Result<()> {
        let mut table = self.write();
        // re-check under the write lock; another registration may have won
        if let Some((key, _)) = entries.iter().find(|(key, _)| table.contains_key(key)) {
            return Err(Error::DuplicateMapping {
                source_class: source.name().to_string(),
                target_class: target.name().to_string(),
                direction: key.direction,
            });
        }
        table.extend(entries);
        Ok(())
    }

    // ------------------------------ Invocation ------------------------------ //

    /// Constructs a new `target` object from `source`.
    pub fn convert(&self, source: &Value, target: &ClassRef, extra: &Extra) -> Result<Value> {
        self.convert_value(source, target, &extra_value(extra))
    }

    /// Updates `target` in place from `source`.
    pub fn update(&self, source: &Value, target: &mut Value, extra: &Extra) -> Result<()> {
        self.update_value(source, target, &extra_value(extra))
    }

    /// Constructs when given a class and updates when given an object. Only
    /// construction produces a value.
    pub fn invoke(&self, source: &Value, target: MapTarget<'_>, extra: &Extra) -> Result<Option<Value>> {
        match target {
            MapTarget::Class(class) => self.convert(source, class, extra).map(Some),
            MapTarget::Instance(object) => self.update(source, object, extra).map(|()| None),
        }
    }

    pub(crate) fn convert_value(&self, source: &Value, target: &ClassRef, extra: &Value) -> Result<Value> {
        let not_registered = || Error::NoMappingRegistered {
            source_type: source.type_name(),
            target_type: target.name().to_string(),
        };
        let class = source.class().ok_or_else(not_registered)?;
        match self.lookup(&MappingKey::new(&class, target, Direction::Create)) {
            Some(Registered::Method(method)) => interp::run_create(self, &method, source, extra),
            Some(Registered::Enum(mapping)) => mapping.apply(source),
            None => Err(not_registered()),
        }
    }

    pub(crate) fn update_value(&self, source: &Value, target: &mut Value, extra: &Value) -> Result<()> {
        let not_registered = |target: &Value| Error::NoMappingRegistered {
            source_type: source.type_name(),
            target_type: target.type_name(),
        };
        let (Some(class), Some(target_class)) = (source.class(), target.class()) else {
            return Err(not_registered(&*target));
        };
        match self.lookup(&MappingKey::new(&class, &target_class, Direction::Update)) {
            Some(Registered::Method(method)) => interp::run_update(self, &method, source, target, extra),
            _ => Err(not_registered(&*target)),
        }
    }
}

impl MethodTable for Registry {
    fn has_method(&self, source: &ClassRef, target: &ClassRef, direction: Direction) -> bool {
        self.contains(&MappingKey::new(source, target, direction))
    }
}

fn extra_value(extra: &Extra) -> Value {
    Value::Dict(extra.iter().map(|(k, v)| (Value::str(k.as_str()), v.clone())).collect())
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DataclassBuilder;
    use crate::plan::{FieldOverride, from_extra};
    use crate::types::Namespace;

    fn foo_bar(ns: &mut Namespace) -> (Arc<ClassDef>, Arc<ClassDef>) {
        let foo = DataclassBuilder::new("Foo").field("x", "int").build(ns).unwrap();
        let bar = DataclassBuilder::new("Bar").field("x", "int").build(ns).unwrap();
        (foo, bar)
    }

    #[test]
    fn register_both_directions_and_invoke() {
        let mut ns = Namespace::new();
        let (foo, bar) = foo_bar(&mut ns);
        let registry = Registry::new();
        registry.register(&foo, &bar, &Overrides::new(), MapperMode::default()).unwrap();
        assert_eq!(registry.len(), 2);

        let source = foo.construct([("x", Value::Int(7))]).unwrap();
        let created = registry.invoke(&source, MapTarget::Class(bar.class()), &Extra::new()).unwrap();
        let mut created = created.unwrap();
        assert_eq!(created.attr("x").unwrap(), &Value::Int(7));

        let newer = foo.construct([("x", Value::Int(8))]).unwrap();
        let result = registry.invoke(&newer, MapTarget::Instance(&mut created), &Extra::new()).unwrap();
        assert!(result.is_none());
        assert_eq!(created.attr("x").unwrap(), &Value::Int(8));
    }

    #[test]
    fn duplicates_are_rejected_and_leave_the_table_unchanged() {
        let mut ns = Namespace::new();
        let (foo, bar) = foo_bar(&mut ns);
        let registry = Registry::new();
        registry.register(&foo, &bar, &Overrides::new(), MapperMode::Update).unwrap();
        let err = registry
            .register(&foo, &bar, &Overrides::new(), MapperMode::CreateAndUpdate)
            .unwrap_err();
        assert_eq!(err.to_string(), "There already exists a update mapping between 'Foo' and 'Bar'");
        assert_eq!(registry.len(), 1);
        // the create direction alone is still free
        registry.register(&foo, &bar, &Overrides::new(), MapperMode::Create).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn failed_registration_registers_nothing() {
        let mut ns = Namespace::new();
        let (foo, bar) = foo_bar(&mut ns);
        let registry = Registry::new();
        let overrides = Overrides::new().with("x", FieldOverride::source("nope"));
        assert!(registry.register(&foo, &bar, &overrides, MapperMode::default()).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn unregistered_pairs() {
        let mut ns = Namespace::new();
        let (foo, bar) = foo_bar(&mut ns);
        let registry = Registry::new();
        let source = foo.construct([("x", Value::Int(1))]).unwrap();
        let err = registry.convert(&source, bar.class(), &Extra::new()).unwrap_err();
        assert_eq!(err.to_string(), "Object of type 'Foo' cannot be mapped to 'Bar'");
        let err = registry.convert(&Value::list([]), bar.class(), &Extra::new()).unwrap_err();
        assert_eq!(err.to_string(), "Object of type 'list' cannot be mapped to 'Bar'");
    }

    #[test]
    fn missing_extra_item_raises_at_invocation() {
        let mut ns = Namespace::new();
        let (foo, _) = foo_bar(&mut ns);
        let baz = DataclassBuilder::new("Baz").field("x", "int").field("y", "str").build(&mut ns).unwrap();
        let registry = Registry::new();
        let overrides = Overrides::new().with("y", from_extra("label"));
        registry.register(&foo, &baz, &overrides, MapperMode::Create).unwrap();
        let source = foo.construct([("x", Value::Int(1))]).unwrap();
        let err = registry.convert(&source, baz.class(), &Extra::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "When mapping an object of 'Foo' to 'Baz' the item 'label' needs to be provided in the `extra` dictionary"
        );
        let extra = Extra::from([("label".to_string(), Value::str("hi"))]);
        let out = registry.convert(&source, baz.class(), &extra).unwrap();
        assert_eq!(out.attr("y").unwrap(), &Value::str("hi"));
    }

    #[test]
    fn debug_map_codes_does_not_register() {
        let mut ns = Namespace::new();
        let (foo, bar) = foo_bar(&mut ns);
        let registry = Registry::new();
        let (create, update) = registry.debug_map_codes(&foo, &bar, &Overrides::new()).unwrap();
        assert!(create.starts_with("def convert(self, extra: 'dict') -> 'Bar':"));
        assert!(update.contains("target.x = self.x"));
        assert!(registry.is_empty());
    }
}
