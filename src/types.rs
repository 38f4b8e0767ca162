//! Canonical field-type algebra.
//!
//! Annotations are parsed into a [`RawType`] and then classified by an ordered
//! list of matchers. The first matcher that recognizes the outer shape wins and
//! recurses into the shape's own type arguments.
pub mod parse;

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::IndexMap;

use crate::error::{Error, Result};
pub use parse::RawType;

// ————————————————————————————————————————————————————————————————————————————
// CLASS HANDLES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

// ids 1..=8 belong to the builtins
static NEXT_CLASS_ID: AtomicU32 = AtomicU32::new(Builtin::ALL.len() as u32 + 1);

impl ClassId {
    fn fresh() -> Self {
        Self(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque handle to a class. Two handles are the same class iff their ids are
/// equal; the name is only carried for rendering.
#[derive(Debug, Clone)]
pub struct ClassRef {
    id: ClassId,
    name: Arc<str>,
}

impl ClassRef {
    pub fn new(name: &str) -> Self {
        Self { id: ClassId::fresh(), name: Arc::from(name) }
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn builtin(&self) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.id() == self.id)
    }
}

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClassRef {}

impl Hash for ClassRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Int,
    Float,
    Str,
    Bool,
    Bytes,
    Date,
    DateTime,
    Uuid,
}

impl Builtin {
    pub const ALL: [Builtin; 8] = [
        Builtin::Int,
        Builtin::Float,
        Builtin::Str,
        Builtin::Bool,
        Builtin::Bytes,
        Builtin::Date,
        Builtin::DateTime,
        Builtin::Uuid,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
            Self::Bytes => "bytes",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Uuid => "UUID",
        }
    }

    fn id(self) -> ClassId {
        ClassId(self as u32 + 1)
    }

    pub fn class(self) -> ClassRef {
        ClassRef { id: self.id(), name: Arc::from(self.name()) }
    }

    pub fn ty(self) -> FieldType {
        FieldType::Class(self.class())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// FIELD TYPES
// ————————————————————————————————————————————————————————————————————————————

/// Normalized field type.
///
/// `Union` always has at least two distinct members and never contains
/// "absent"; absence is expressed by wrapping in `Optional`. Union members
/// compare as a set.
#[derive(Debug, Clone, Eq)]
pub enum FieldType {
    Class(ClassRef),
    Optional(Box<FieldType>),
    Union(Vec<FieldType>),
    List(Box<FieldType>),
    Set(Box<FieldType>),
    Dict(Box<FieldType>, Box<FieldType>),
    Tuple(Vec<FieldType>),
    Any,
}

impl FieldType {
    pub fn class(class: &ClassRef) -> Self {
        Self::Class(class.clone())
    }

    pub fn optional(inner: FieldType) -> Self {
        match inner {
            optional @ Self::Optional(_) => optional,
            inner => Self::Optional(Box::new(inner)),
        }
    }

    pub fn list(inner: FieldType) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn set(inner: FieldType) -> Self {
        Self::Set(Box::new(inner))
    }

    pub fn dict(key: FieldType, value: FieldType) -> Self {
        Self::Dict(Box::new(key), Box::new(value))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional(_))
    }

    /// The type with one level of `Optional` removed.
    pub fn strip_optional(&self) -> &FieldType {
        match self {
            Self::Optional(inner) => inner,
            other => other,
        }
    }
}

impl PartialEq for FieldType {
    fn eq(&self, other: &Self) -> bool {
        use FieldType as T;
        match (self, other) {
            (T::Class(a), T::Class(b)) => a == b,
            (T::Optional(a), T::Optional(b)) | (T::List(a), T::List(b)) | (T::Set(a), T::Set(b)) => a == b,
            // members are distinct, so equal length plus containment is set equality
            (T::Union(a), T::Union(b)) => a.len() == b.len() && a.iter().all(|m| b.contains(m)),
            (T::Dict(ak, av), T::Dict(bk, bv)) => ak == bk && av == bv,
            (T::Tuple(a), T::Tuple(b)) => a == b,
            (T::Any, T::Any) => true,
            _ => false,
        }
    }
}

impl Hash for FieldType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Class(class) => class.hash(state),
            Self::Optional(inner) | Self::List(inner) | Self::Set(inner) => inner.hash(state),
            Self::Union(members) => {
                let mut hashes = members
                    .iter()
                    .map(|member| {
                        let mut hasher = DefaultHasher::new();
                        member.hash(&mut hasher);
                        hasher.finish()
                    })
                    .collect::<Vec<_>>();
                hashes.sort_unstable();
                hashes.hash(state);
            }
            Self::Dict(key, value) => {
                key.hash(state);
                value.hash(state);
            }
            Self::Tuple(items) => items.hash(state),
            Self::Any => {}
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "{class}"),
            Self::Optional(inner) => match inner.as_ref() {
                Self::Union(members) => {
                    write!(f, "Union[{}, None]", join(members))
                }
                inner => write!(f, "Optional[{inner}]"),
            },
            Self::Union(members) => write!(f, "Union[{}]", join(members)),
            Self::List(inner) => write!(f, "List[{inner}]"),
            Self::Set(inner) => write!(f, "Set[{inner}]"),
            Self::Dict(key, value) => write!(f, "Dict[{key}, {value}]"),
            Self::Tuple(items) if items.is_empty() => f.write_str("Tuple[()]"),
            Self::Tuple(items) => write!(f, "Tuple[{}]", join(items)),
            Self::Any => f.write_str("Any"),
        }
    }
}

fn join(types: &[FieldType]) -> String {
    types.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

// ————————————————————————————————————————————————————————————————————————————
// NAMESPACE
// ————————————————————————————————————————————————————————————————————————————

/// Name → class table used to resolve bare names inside annotations.
#[derive(Debug, Clone)]
pub struct Namespace {
    names: IndexMap<String, ClassRef>,
}

impl Default for Namespace {
    fn default() -> Self {
        let mut names = IndexMap::new();
        for builtin in Builtin::ALL {
            names.insert(builtin.name().to_string(), builtin.class());
        }
        names.insert("uuid".to_string(), Builtin::Uuid.class());
        names.insert("UUID".to_string(), Builtin::Uuid.class());
        Self { names }
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a fresh handle under `name`, so classes that reference each
    /// other can be defined in any order.
    pub fn declare(&mut self, name: &str) -> ClassRef {
        let class = ClassRef::new(name);
        self.insert(class.clone());
        class
    }

    pub fn insert(&mut self, class: ClassRef) {
        self.names.insert(class.name().to_string(), class);
    }

    pub fn resolve(&self, name: &str) -> Option<&ClassRef> {
        self.names.get(name)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CLASSIFICATION
// ————————————————————————————————————————————————————————————————————————————

type Matcher = fn(&RawType, &Namespace) -> Option<Result<FieldType>>;

// order matters: `Optional` must see a union before `Union` does
const MATCHERS: [Matcher; 6] = [
    match_any,
    match_optional,
    match_union,
    match_collection,
    match_tuple,
    match_class,
];

pub fn classify(raw: &RawType, ns: &Namespace) -> Result<FieldType> {
    for matcher in MATCHERS {
        if let Some(result) = matcher(raw, ns) {
            return result;
        }
    }
    Err(unsupported(raw, "no known type shape matches"))
}

pub fn classify_str(annotation: &str, ns: &Namespace) -> Result<FieldType> {
    classify(&RawType::parse(annotation)?, ns)
}

fn unsupported(raw: &RawType, reason: impl Into<String>) -> Error {
    Error::UnsupportedType { annotation: raw.to_string(), reason: reason.into() }
}

fn match_any(raw: &RawType, _: &Namespace) -> Option<Result<FieldType>> {
    (raw.head == "Any" && raw.args.is_none()).then_some(Ok(FieldType::Any))
}

fn match_optional(raw: &RawType, ns: &Namespace) -> Option<Result<FieldType>> {
    if !matches!(raw.head.as_str(), "Optional" | "Union") || raw.args.is_none() {
        return None;
    }
    let mut arms = Vec::new();
    let mut has_none = false;
    union_arms(raw, &mut arms, &mut has_none);
    if !has_none {
        return None;
    }
    Some(classify_arms(raw, &arms, ns).map(FieldType::optional))
}

fn match_union(raw: &RawType, ns: &Namespace) -> Option<Result<FieldType>> {
    if raw.head != "Union" || raw.args.is_none() {
        return None;
    }
    let mut arms = Vec::new();
    let mut has_none = false;
    union_arms(raw, &mut arms, &mut has_none);
    Some(classify_arms(raw, &arms, ns))
}

/// Flattens nested `Union`/`Optional` into their non-None arms.
fn union_arms<'r>(raw: &'r RawType, arms: &mut Vec<&'r RawType>, has_none: &mut bool) {
    match (raw.head.as_str(), &raw.args) {
        ("Union", Some(args)) => {
            for arg in args {
                union_arms(arg, arms, has_none);
            }
        }
        ("Optional", Some(args)) if args.len() == 1 => {
            *has_none = true;
            union_arms(&args[0], arms, has_none);
        }
        ("None" | "NoneType", None) => *has_none = true,
        _ => arms.push(raw),
    }
}

fn classify_arms(raw: &RawType, arms: &[&RawType], ns: &Namespace) -> Result<FieldType> {
    let mut members: Vec<FieldType> = Vec::new();
    for arm in arms {
        let member = classify(arm, ns)?;
        if !members.contains(&member) {
            members.push(member);
        }
    }
    match members.len() {
        0 => Err(unsupported(raw, "union has no member besides None")),
        1 => Ok(members.remove(0)),
        _ => Ok(FieldType::Union(members)),
    }
}

#[derive(Clone, Copy)]
enum Collection {
    List,
    Set,
    Dict,
}

fn match_collection(raw: &RawType, ns: &Namespace) -> Option<Result<FieldType>> {
    let kind = match raw.head.as_str() {
        "List" | "list" => Collection::List,
        "Set" | "set" | "FrozenSet" | "frozenset" => Collection::Set,
        "Dict" | "dict" => Collection::Dict,
        _ => return None,
    };
    let Some(args) = &raw.args else {
        return Some(Err(unsupported(raw, "collection without element types")));
    };
    let result = match (kind, args.as_slice()) {
        (Collection::List, [item]) => classify(item, ns).map(FieldType::list),
        (Collection::Set, [item]) => classify(item, ns).map(FieldType::set),
        (Collection::Dict, [key, value]) => {
            classify(key, ns).and_then(|key| Ok(FieldType::dict(key, classify(value, ns)?)))
        }
        _ => Err(unsupported(raw, "wrong number of type arguments")),
    };
    Some(result)
}

fn match_tuple(raw: &RawType, ns: &Namespace) -> Option<Result<FieldType>> {
    if !matches!(raw.head.as_str(), "Tuple" | "tuple") {
        return None;
    }
    let Some(args) = &raw.args else {
        return Some(Err(unsupported(raw, "tuple without element types")));
    };
    if args.iter().any(|arg| arg.head == "...") {
        return Some(Err(unsupported(raw, "variable-length tuples are not supported")));
    }
    if matches!(args.as_slice(), [unit] if unit.head == "()") {
        return Some(Ok(FieldType::Tuple(Vec::new())));
    }
    Some(args.iter().map(|arg| classify(arg, ns)).collect::<Result<Vec<_>>>().map(FieldType::Tuple))
}

fn match_class(raw: &RawType, ns: &Namespace) -> Option<Result<FieldType>> {
    if raw.args.is_some() {
        return None;
    }
    if matches!(raw.head.as_str(), "None" | "NoneType") {
        return Some(Err(unsupported(raw, "None is only valid inside Optional or Union")));
    }
    Some(match ns.resolve(&raw.head) {
        Some(class) => Ok(FieldType::class(class)),
        None => Err(unsupported(raw, format!("unknown type name '{}'", raw.head))),
    })
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
