//! Dynamic runtime values that generated mapping code operates on.
pub mod json;

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::{IndexMap, IndexSet};
use ordered_float::OrderedFloat;

use crate::error::{Error, Result};
use crate::types::{Builtin, ClassRef};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Set(IndexSet<Value>),
    Dict(IndexMap<Value, Value>),
    Tuple(Vec<Value>),
    Enum(EnumMember),
    Instance(Instance),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumMember {
    pub enum_class: ClassRef,
    pub name: String,
}

/// An object of a user class.
///
/// `fields_set` records which attributes were explicitly provided, either to
/// the constructor or by later assignment. It does not take part in equality.
#[derive(Debug, Clone)]
pub struct Instance {
    class: ClassRef,
    fields: IndexMap<String, Value>,
    fields_set: BTreeSet<String>,
}

// ————————————————————————————————————————————————————————————————————————————
// INSTANCE
// ————————————————————————————————————————————————————————————————————————————

impl Instance {
    pub(crate) fn new(
        class: ClassRef,
        fields: IndexMap<String, Value>,
        fields_set: BTreeSet<String>,
    ) -> Self {
        Self { class, fields, fields_set }
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.fields.get(attr)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Assigns an existing attribute and marks it as explicitly set.
    pub fn set(&mut self, attr: &str, value: Value) -> Result<()> {
        match self.fields.get_mut(attr) {
            Some(slot) => {
                *slot = value;
                self.fields_set.insert(attr.to_string());
                Ok(())
            }
            None => Err(Error::runtime(format!(
                "'{}' object has no attribute '{attr}'",
                self.class
            ))),
        }
    }

    pub fn is_set(&self, attr: &str) -> bool {
        self.fields_set.contains(attr)
    }

    pub fn fields_set(&self) -> impl Iterator<Item = &str> {
        self.fields_set.iter().map(String::as_str)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.fields == other.fields
    }
}

impl Eq for Instance {}

// ————————————————————————————————————————————————————————————————————————————
// VALUE
// ————————————————————————————————————————————————————————————————————————————

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn float(f: f64) -> Self {
        Self::Float(OrderedFloat(f))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Set(items.into_iter().collect())
    }

    pub fn dict<K: Into<Value>>(items: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Dict(items.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Runtime class for scalars, enum members and instances. Collections
    /// have none.
    pub fn class(&self) -> Option<ClassRef> {
        let builtin = match self {
            Self::Bool(_) => Builtin::Bool,
            Self::Int(_) => Builtin::Int,
            Self::Float(_) => Builtin::Float,
            Self::Str(_) => Builtin::Str,
            Self::Bytes(_) => Builtin::Bytes,
            Self::Date(_) => Builtin::Date,
            Self::DateTime(_) => Builtin::DateTime,
            Self::Enum(member) => return Some(member.enum_class.clone()),
            Self::Instance(instance) => return Some(instance.class.clone()),
            Self::None | Self::List(_) | Self::Set(_) | Self::Dict(_) | Self::Tuple(_) => {
                return None;
            }
        };
        Some(builtin.class())
    }

    pub fn type_name(&self) -> String {
        match self.class() {
            Some(class) => class.name().to_string(),
            None => match self {
                Self::None => "NoneType",
                Self::List(_) => "list",
                Self::Set(_) => "set",
                Self::Dict(_) => "dict",
                _ => "tuple",
            }
            .to_string(),
        }
    }

    pub fn as_instance(&self) -> Result<&Instance> {
        match self {
            Self::Instance(instance) => Ok(instance),
            other => Err(Error::runtime(format!(
                "expected an object, found a value of type '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn as_instance_mut(&mut self) -> Result<&mut Instance> {
        match self {
            Self::Instance(instance) => Ok(instance),
            other => Err(Error::runtime(format!(
                "expected an object, found a value of type '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn attr(&self, attr: &str) -> Result<&Value> {
        let instance = self.as_instance()?;
        instance.get(attr).ok_or_else(|| {
            Error::runtime(format!("'{}' object has no attribute '{attr}'", instance.class))
        })
    }

    pub fn attr_mut(&mut self, attr: &str) -> Result<&mut Value> {
        let instance = self.as_instance_mut()?;
        let class = instance.class.clone();
        instance
            .fields
            .get_mut(attr)
            .ok_or_else(|| Error::runtime(format!("'{class}' object has no attribute '{attr}'")))
    }

    /// `value[key]` for dicts (by key) and lists/tuples (by integer index).
    pub fn subscript(&self, key: &Value) -> Result<&Value> {
        let found = match (self, key) {
            (Self::Dict(map), key) => map.get(key),
            (Self::List(items) | Self::Tuple(items), Self::Int(i)) => {
                usize::try_from(*i).ok().and_then(|i| items.get(i))
            }
            _ => None,
        };
        found.ok_or_else(|| {
            Error::runtime(format!("{} is not a valid key for a '{}'", key.repr(), self.type_name()))
        })
    }

    /// `key in value`.
    pub fn contains(&self, key: &Value) -> Result<bool> {
        match self {
            Self::Dict(map) => Ok(map.contains_key(key)),
            Self::Set(items) => Ok(items.contains(key)),
            Self::List(items) | Self::Tuple(items) => Ok(items.contains(key)),
            other => Err(Error::runtime(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Elements of an iterable collection, in iteration order.
    pub fn elements(&self) -> Result<Vec<&Value>> {
        match self {
            Self::List(items) | Self::Tuple(items) => Ok(items.iter().collect()),
            Self::Set(items) => Ok(items.iter().collect()),
            Self::Dict(map) => Ok(map.keys().collect()),
            other => Err(Error::runtime(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Identity comparison. Only the singletons (`None`, booleans and enum
    /// members) have identity; everything else compares as distinct.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            _ => false,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => f.0 != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
            Self::Set(items) => !items.is_empty(),
            Self::Dict(map) => !map.is_empty(),
            Self::Date(_) | Self::DateTime(_) | Self::Enum(_) | Self::Instance(_) => true,
        }
    }

    /// Source-like rendering used by the code emitter and in messages.
    pub fn repr(&self) -> String {
        match self {
            Self::None => "None".to_string(),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format!("{:?}", f.0),
            Self::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::Bytes(b) => format!("b'{}'", String::from_utf8_lossy(b)),
            Self::Date(d) => format!("date({})", d.format("%Y, %-m, %-d")),
            Self::DateTime(dt) => format!("datetime.fromisoformat('{}')", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::List(items) => format!("[{}]", repr_all(items.iter())),
            Self::Set(items) if items.is_empty() => "set()".to_string(),
            Self::Set(items) => format!("{{{}}}", repr_all(items.iter())),
            Self::Dict(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{entries}}}")
            }
            Self::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Self::Tuple(items) => format!("({})", repr_all(items.iter())),
            Self::Enum(member) => format!("{}.{}", member.enum_class, member.name),
            Self::Instance(instance) => {
                let fields = instance
                    .fields
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({fields})", instance.class)
            }
        }
    }
}

fn repr_all<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items.map(Value::repr).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

// Sets and dicts compare order-independently, so they only hash their length.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::None => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.hash(state),
            Self::Str(s) => s.hash(state),
            Self::Bytes(b) => b.hash(state),
            Self::Date(d) => d.hash(state),
            Self::DateTime(dt) => dt.hash(state),
            Self::List(items) | Self::Tuple(items) => items.hash(state),
            Self::Set(items) => items.len().hash(state),
            Self::Dict(map) => map.len().hash(state),
            Self::Enum(member) => member.hash(state),
            Self::Instance(instance) => {
                instance.class.hash(state);
                instance.fields.len().hash(state);
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Instance> for Value {
    fn from(instance: Instance) -> Self {
        Self::Instance(instance)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(class: &ClassRef, fields: &[(&str, Value)], set: &[&str]) -> Value {
        Value::Instance(Instance::new(
            class.clone(),
            fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            set.iter().map(|s| s.to_string()).collect(),
        ))
    }

    #[test]
    fn instance_equality_ignores_fields_set() {
        let foo = ClassRef::new("Foo");
        let a = instance(&foo, &[("x", Value::Int(1))], &["x"]);
        let b = instance(&foo, &[("x", Value::Int(1))], &[]);
        assert_eq!(a, b);
        let other = ClassRef::new("Foo");
        assert_ne!(a, instance(&other, &[("x", Value::Int(1))], &["x"]));
    }

    #[test]
    fn set_marks_field_as_set() {
        let foo = ClassRef::new("Foo");
        let mut value = instance(&foo, &[("x", Value::Int(1))], &[]);
        let inst = value.as_instance_mut().unwrap();
        assert!(!inst.is_set("x"));
        inst.set("x", Value::Int(2)).unwrap();
        assert!(inst.is_set("x"));
        assert!(inst.set("y", Value::None).is_err());
        assert_eq!(value.attr("x").unwrap(), &Value::Int(2));
    }

    #[test]
    fn sets_and_dicts_compare_regardless_of_order() {
        let a = Value::set([Value::Int(1), Value::Int(2)]);
        let b = Value::set([Value::Int(2), Value::Int(1)]);
        assert_eq!(a, b);
        let a = Value::dict([("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = Value::dict([("y", Value::Int(2)), ("x", Value::Int(1))]);
        assert_eq!(a, b);
        // nested inside a set, so hashing has to agree with equality
        assert!(Value::set([a]).contains(&b).unwrap());
    }

    #[test]
    fn identity_only_for_singletons() {
        assert!(Value::None.is_same(&Value::None));
        assert!(!Value::Int(1).is_same(&Value::Int(1)));
        assert!(!Value::None.is_same(&Value::Bool(false)));
    }

    #[test]
    fn subscript_and_contains() {
        let list = Value::list([Value::Int(5), Value::Int(6)]);
        assert_eq!(list.subscript(&Value::Int(1)).unwrap(), &Value::Int(6));
        assert!(list.subscript(&Value::Int(-1)).is_err());
        let dict = Value::dict([("k", Value::Int(1))]);
        assert!(dict.contains(&Value::str("k")).unwrap());
        assert!(Value::Int(1).contains(&Value::Int(1)).is_err());
    }

    #[test]
    fn reprs() {
        assert_eq!(Value::str("it's").repr(), r"'it\'s'");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::Set(IndexSet::new()).repr(), "set()");
        assert_eq!(Value::float(1.0).repr(), "1.0");
        assert_eq!(Value::from(None::<i64>).repr(), "None");
    }
}
