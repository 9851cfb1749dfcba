// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record encoding for both storage layouts.
//!
//! Records travel through `serde_json::Value`; the schema decides how each
//! value is laid out in the store:
//!
//! | Declared type | HASH field            | JSON document        |
//! |---------------|-----------------------|----------------------|
//! | GeoPoint      | `"lon,lat"`           | `"lon,lat"`          |
//! | Embedding     | packed float blob     | array of numbers     |
//! | Array         | joined by separator   | array                |
//! | Object        | dotted field names    | nested object        |
//! | Boolean       | `"true"` / `"false"`  | boolean              |

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use super::state::Snapshot;
use crate::connection::{CommandArg, Reply};
use crate::error::{Result, SearchError};
use crate::query::SearchHit;
use crate::schema::{FieldSpec, RecordSchema, StorageType, ValueType, DEFAULT_SEPARATOR};
use crate::vector::{decode_floats, encode_floats};

/// Serialize a record into its JSON object form.
pub fn record_to_map<T: Serialize>(record: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(SearchError::schema(format!(
            "records must serialize to an object, got {}",
            other
        ))),
    }
}

pub fn record_from_map<T: DeserializeOwned>(map: Map<String, Value>) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Encode a record for storage.
pub fn dehydrate(record: &Map<String, Value>, schema: &RecordSchema) -> Result<Snapshot> {
    match schema.storage {
        StorageType::Hash => {
            let mut out = BTreeMap::new();
            flatten_hash(record, Some(schema.fields.as_slice()), "", &mut out)?;
            Ok(Snapshot::Hash(out))
        }
        StorageType::Json => Ok(Snapshot::Json(Value::Object(encode_document(
            record,
            Some(schema.fields.as_slice()),
        )?))),
    }
}

fn flatten_hash(
    map: &Map<String, Value>,
    fields: Option<&[FieldSpec]>,
    prefix: &str,
    out: &mut BTreeMap<String, CommandArg>,
) -> Result<()> {
    for (name, value) in map {
        let spec = fields.and_then(|fs| fs.iter().find(|f| &f.name == name));
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        match (value, spec.map(|s| s.value_type.base())) {
            (Value::Null, _) => {}
            (Value::Object(point), Some(ValueType::GeoPoint)) => {
                out.insert(key.clone(), geo_text(point, &key)?.into());
            }
            (Value::Array(items), Some(ValueType::Embedding(params))) => {
                let floats = numbers(items, &key)?;
                out.insert(key, CommandArg::Blob(encode_floats(&floats, params.element_type)));
            }
            (Value::Object(children), declared) => {
                let nested = match declared {
                    Some(ValueType::Object(specs)) => Some(specs.as_slice()),
                    _ => None,
                };
                flatten_hash(children, nested, &key, out)?;
            }
            (Value::Array(items), _) => {
                let separator = spec.map(|s| s.separator).unwrap_or(DEFAULT_SEPARATOR);
                let parts = items
                    .iter()
                    .map(|item| scalar_text(item, &key))
                    .collect::<Result<Vec<_>>>()?;
                if let Some(part) = parts.iter().find(|p| p.contains(separator)) {
                    return Err(SearchError::schema(format!(
                        "element {:?} of '{}' contains the separator '{}'",
                        part, key, separator
                    )));
                }
                out.insert(key, parts.join(&separator.to_string()).into());
            }
            (scalar, _) => {
                out.insert(key.clone(), scalar_text(scalar, &key)?.into());
            }
        }
    }
    Ok(())
}

fn encode_document(map: &Map<String, Value>, fields: Option<&[FieldSpec]>) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (name, value) in map {
        let spec = fields.and_then(|fs| fs.iter().find(|f| &f.name == name));
        let encoded = match (value, spec.map(|s| s.value_type.base())) {
            (Value::Object(point), Some(ValueType::GeoPoint)) => Value::String(geo_text(point, name)?),
            (Value::Object(children), Some(ValueType::Object(specs))) => {
                Value::Object(encode_document(children, Some(specs.as_slice()))?)
            }
            (Value::Array(items), Some(ValueType::Array(inner))) => match inner.base() {
                ValueType::Object(specs) => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Object(child) => encode_document(child, Some(specs.as_slice())).map(Value::Object),
                            other => Ok(other.clone()),
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                ValueType::GeoPoint => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Object(point) => geo_text(point, name).map(Value::String),
                            other => Ok(other.clone()),
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                _ => value.clone(),
            },
            _ => value.clone(),
        };
        out.insert(name.clone(), encoded);
    }
    Ok(out)
}

fn scalar_text(value: &Value, key: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(SearchError::schema(format!(
            "field '{}' holds a nested value that a hash cannot store",
            key
        ))),
    }
}

fn numbers(items: &[Value], key: &str) -> Result<Vec<f64>> {
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| SearchError::schema(format!("embedding '{}' holds a non-number", key)))
        })
        .collect()
}

fn geo_text(point: &Map<String, Value>, key: &str) -> Result<String> {
    let coordinate = |name: &str| point.get(name).and_then(Value::as_f64);
    match (coordinate("longitude"), coordinate("latitude")) {
        (Some(lon), Some(lat)) => Ok(format!("{},{}", lon, lat)),
        _ => Err(SearchError::schema(format!(
            "geo field '{}' needs numeric longitude and latitude",
            key
        ))),
    }
}

fn geo_value(text: &str) -> Option<Value> {
    let (lon, lat) = text.split_once(',')?;
    let lon: f64 = lon.trim().parse().ok()?;
    let lat: f64 = lat.trim().parse().ok()?;
    let mut point = Map::new();
    point.insert("longitude".into(), Value::Number(Number::from_f64(lon)?));
    point.insert("latitude".into(), Value::Number(Number::from_f64(lat)?));
    Some(Value::Object(point))
}

/// Rebuild a record object from flat hash fields (HGETALL or a search hit).
pub fn hydrate_hash(pairs: Vec<(String, Reply)>, schema: &RecordSchema) -> Result<Map<String, Value>> {
    let mut root = Map::new();
    for (name, reply) in pairs {
        let spec = schema.find_field(&name);
        let value = decode_stored(reply, spec, &name)?;
        insert_path(&mut root, &name, value);
    }
    Ok(root)
}

/// Parse a stored JSON document.
pub fn hydrate_json(document: &str, schema: &RecordSchema) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(document)?;
    // JSON.GET with a `$` path wraps the match in an array
    let value = match value {
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => items.remove(0),
        other => other,
    };
    match value {
        Value::Object(map) => Ok(decode_document(map, Some(schema.fields.as_slice()))),
        other => Err(SearchError::protocol(format!(
            "stored document is not an object: {}",
            other
        ))),
    }
}

/// Rebuild a record object from one search hit.
pub fn hydrate_hit(hit: SearchHit, schema: &RecordSchema) -> Result<Map<String, Value>> {
    let mut map = match schema.storage {
        StorageType::Hash => hydrate_hash(hit.fields, schema)?,
        StorageType::Json => {
            if let Some(document) = hit.get("$").and_then(Reply::to_text) {
                hydrate_json(&document, schema)?
            } else {
                // Projected: each returned property arrives JSON-encoded
                let mut root = Map::new();
                for (name, reply) in hit.fields {
                    let value = match reply.to_text() {
                        Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                        None => Value::Null,
                    };
                    insert_path(&mut root, &name, value);
                }
                decode_document(root, Some(schema.fields.as_slice()))
            }
        }
    };
    inject_id(&mut map, &hit.key, schema);
    Ok(map)
}

fn decode_document(map: Map<String, Value>, fields: Option<&[FieldSpec]>) -> Map<String, Value> {
    map.into_iter()
        .map(|(name, value)| {
            let spec = fields.and_then(|fs| fs.iter().find(|f| f.name == name));
            let decoded = match (value, spec.map(|s| s.value_type.base())) {
                (Value::String(text), Some(ValueType::GeoPoint)) => {
                    geo_value(&text).unwrap_or(Value::String(text))
                }
                (Value::Object(children), Some(ValueType::Object(specs))) => {
                    Value::Object(decode_document(children, Some(specs.as_slice())))
                }
                (Value::Array(items), Some(ValueType::Array(inner))) => match inner.base() {
                    ValueType::Object(specs) => Value::Array(
                        items
                            .into_iter()
                            .map(|item| match item {
                                Value::Object(child) => Value::Object(decode_document(child, Some(specs.as_slice()))),
                                other => other,
                            })
                            .collect(),
                    ),
                    ValueType::GeoPoint => Value::Array(
                        items
                            .into_iter()
                            .map(|item| match item {
                                Value::String(text) => geo_value(&text).unwrap_or(Value::String(text)),
                                other => other,
                            })
                            .collect(),
                    ),
                    _ => Value::Array(items),
                },
                (value, _) => value,
            };
            (name, decoded)
        })
        .collect()
}

fn decode_stored(reply: Reply, spec: Option<&FieldSpec>, name: &str) -> Result<Value> {
    let declared = spec.map(|s| s.value_type.base());
    if let Some(ValueType::Embedding(params)) = declared {
        let bytes = match reply {
            Reply::Blob(bytes) => bytes,
            Reply::Text(text) | Reply::Status(text) => text.into_bytes(),
            Reply::Nil => return Ok(Value::Null),
            other => {
                return Err(SearchError::protocol(format!(
                    "embedding '{}' came back as {:?}",
                    name, other
                )))
            }
        };
        let floats = decode_floats(&bytes, params.element_type)?;
        return Ok(Value::Array(
            floats
                .into_iter()
                .map(|f| Number::from_f64(f).map_or(Value::Null, Value::Number))
                .collect(),
        ));
    }
    let Some(text) = reply.to_text() else {
        return Ok(Value::Null);
    };
    match declared {
        Some(ValueType::Array(inner)) => {
            let separator = spec.map(|s| s.separator).unwrap_or(DEFAULT_SEPARATOR);
            if text.is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            text.split(separator)
                .map(|part| decode_scalar(part, Some(inner.base()), name))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        other => decode_scalar(&text, other, name),
    }
}

fn decode_scalar(text: &str, declared: Option<&ValueType>, name: &str) -> Result<Value> {
    let not_a = |what: &str| SearchError::protocol(format!("field '{}' value '{}' is not {}", name, text, what));
    match declared {
        Some(ValueType::Integer) | Some(ValueType::Timestamp) => {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Value::from(i));
            }
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| not_a("a number"))
        }
        Some(ValueType::Float) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| not_a("a number")),
        Some(ValueType::Boolean) => match text {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(not_a("a boolean")),
        },
        Some(ValueType::GeoPoint) => geo_value(text).ok_or_else(|| not_a("a lon,lat pair")),
        _ => Ok(Value::String(text.to_string())),
    }
}

/// Insert at a dotted path, creating intermediate objects.
fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = root;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

/// Id portion of a key, after the matching `{prefix}:`.
pub fn id_from_key<'k>(key: &'k str, schema: &RecordSchema) -> &'k str {
    schema
        .prefixes
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix.as_str()).and_then(|rest| rest.strip_prefix(':')))
        .unwrap_or_else(|| key.rsplit(':').next().unwrap_or(key))
}

/// Fill a missing id field from the key it was read under.
pub fn inject_id(map: &mut Map<String, Value>, key: &str, schema: &RecordSchema) {
    if map.get(&schema.id_field).is_some_and(|v| !v.is_null()) {
        return;
    }
    let id = id_from_key(key, schema);
    let value = match schema.find_field(&schema.id_field).map(|s| s.value_type.base()) {
        Some(ValueType::Integer) => id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(id.to_string())),
        _ => Value::String(id.to_string()),
    };
    map.insert(schema.id_field.clone(), value);
}
