//! Type-directed conversion between JSON documents and [`Value`]s.
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde_json::{Map, Number, Value as Json};

use super::Value;
use crate::class::ClassDef;
use crate::enums::EnumDef;
use crate::error::{Error, Result};
use crate::types::{Builtin, ClassId, FieldType};

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Resolves class handles to the definitions needed for decoding.
pub trait ClassLookup {
    fn class_def(&self, id: ClassId) -> Option<&Arc<ClassDef>>;

    fn enum_def(&self, id: ClassId) -> Option<&Arc<EnumDef>>;
}

pub fn decode(json: &Json, ty: &FieldType, classes: &dyn ClassLookup) -> Result<Value> {
    Decoder { classes }.decode(json, ty, &mut Vec::new())
}

/// Decodes an object into an instance of `class`, constructing it the way
/// user code would.
pub fn decode_instance(json: &Json, class: &ClassDef, classes: &dyn ClassLookup) -> Result<Value> {
    Decoder { classes }.instance(json, class, &mut Vec::new())
}

struct Decoder<'a> {
    classes: &'a dyn ClassLookup,
}

impl Decoder<'_> {
    fn decode(&self, json: &Json, ty: &FieldType, path: &mut Vec<String>) -> Result<Value> {
        match ty {
            FieldType::Any => Ok(untyped(json)),
            FieldType::Optional(inner) => match json {
                Json::Null => Ok(Value::None),
                json => self.decode(json, inner, path),
            },
            // first member that accepts the document wins
            FieldType::Union(members) => members
                .iter()
                .find_map(|member| self.decode(json, member, path).ok())
                .ok_or_else(|| mismatch(path, ty, json)),
            FieldType::List(item) => {
                let items = self.array(json, ty, path)?;
                Ok(Value::List(self.each(items, item, path)?))
            }
            FieldType::Set(item) => {
                let items = self.array(json, ty, path)?;
                Ok(Value::Set(self.each(items, item, path)?.into_iter().collect()))
            }
            FieldType::Tuple(items) => {
                let values = self.array(json, ty, path)?;
                if values.len() != items.len() {
                    return Err(mismatch(path, ty, json));
                }
                let mut out = Vec::with_capacity(items.len());
                for (i, (json, ty)) in values.iter().zip(items).enumerate() {
                    path.push(i.to_string());
                    out.push(self.decode(json, ty, path)?);
                    path.pop();
                }
                Ok(Value::Tuple(out))
            }
            FieldType::Dict(key_ty, value_ty) => {
                let Json::Object(map) = json else {
                    return Err(mismatch(path, ty, json));
                };
                let mut out = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    path.push(key.clone());
                    let key = self.decode(&Json::String(key.clone()), key_ty, path).or_else(|_| {
                        // non-string keys arrive stringified
                        let parsed: Json = serde_json::from_str(key).map_err(|_| mismatch(path, key_ty, json))?;
                        self.decode(&parsed, key_ty, path)
                    })?;
                    out.insert(key, self.decode(value, value_ty, path)?);
                    path.pop();
                }
                Ok(Value::Dict(out))
            }
            FieldType::Class(class) => {
                if let Some(builtin) = class.builtin() {
                    return scalar(json, builtin).ok_or_else(|| mismatch(path, ty, json));
                }
                if let Some(def) = self.classes.enum_def(class.id()) {
                    return match json {
                        Json::String(name) => def.member(name),
                        _ => Err(mismatch(path, ty, json)),
                    };
                }
                let def = self
                    .classes
                    .class_def(class.id())
                    .ok_or_else(|| Error::schema(format!("no definition for class '{class}'")))?;
                self.instance(json, def, path)
            }
        }
    }

    fn instance(&self, json: &Json, class: &ClassDef, path: &mut Vec<String>) -> Result<Value> {
        let Json::Object(map) = json else {
            return Err(mismatch(path, &FieldType::class(class.class()), json));
        };
        let strategy = class.default_strategy();
        let mut args = IndexMap::with_capacity(map.len());
        for (key, value) in map {
            // keys may use any spelling the constructor accepts
            let slot = class
                .slots()
                .iter()
                .find(|slot| slot.init && class.accepted_params(slot, strategy).contains(&key.as_str()));
            let decoded = match slot {
                Some(slot) => {
                    path.push(key.clone());
                    let decoded = self.decode(value, &slot.ty, path)?;
                    path.pop();
                    decoded
                }
                // unknown keys are left for the constructor to reject
                None => untyped(value),
            };
            args.insert(key.clone(), decoded);
        }
        class.instantiate(args, strategy)
    }

    fn array<'j>(&self, json: &'j Json, ty: &FieldType, path: &[String]) -> Result<&'j Vec<Json>> {
        match json {
            Json::Array(items) => Ok(items),
            other => Err(mismatch(path, ty, other)),
        }
    }

    fn each(&self, items: &[Json], ty: &FieldType, path: &mut Vec<String>) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            path.push(i.to_string());
            out.push(self.decode(item, ty, path)?);
            path.pop();
        }
        Ok(out)
    }
}

fn scalar(json: &Json, builtin: Builtin) -> Option<Value> {
    Some(match (builtin, json) {
        (Builtin::Int, Json::Number(n)) => Value::Int(n.as_i64()?),
        (Builtin::Float, Json::Number(n)) => Value::float(n.as_f64()?),
        (Builtin::Bool, Json::Bool(b)) => Value::Bool(*b),
        (Builtin::Str | Builtin::Uuid, Json::String(s)) => Value::Str(s.clone()),
        (Builtin::Bytes, Json::String(s)) => Value::Bytes(s.as_bytes().to_vec()),
        (Builtin::Date, Json::String(s)) => Value::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?),
        (Builtin::DateTime, Json::String(s)) => Value::DateTime(
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())?,
        ),
        _ => return None,
    })
}

fn untyped(json: &Json) -> Value {
    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(untyped).collect()),
        Json::Object(map) => {
            Value::Dict(map.iter().map(|(k, v)| (Value::Str(k.clone()), untyped(v))).collect())
        }
    }
}

fn mismatch(path: &[String], ty: &FieldType, json: &Json) -> Error {
    let at = if path.is_empty() { ".".to_string() } else { path.join(".") };
    let found = match json {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    };
    Error::schema(format!("at {at}: expected '{ty}', found {found}"))
}

// ————————————————————————————————————————————————————————————————————————————
// ENCODING
// ————————————————————————————————————————————————————————————————————————————

pub fn encode(value: &Value) -> Json {
    match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => Number::from_f64(f.0).map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => Json::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::List(items) | Value::Tuple(items) => Json::Array(items.iter().map(encode).collect()),
        Value::Set(items) => Json::Array(items.iter().map(encode).collect()),
        Value::Dict(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (key_string(k), encode(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Enum(member) => Json::String(member.name.clone()),
        Value::Instance(instance) => Json::Object(
            instance
                .fields()
                .map(|(k, v)| (k.to_string(), encode(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

fn key_string(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        Value::Enum(member) => member.name.clone(),
        other => encode(other).to_string(),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
