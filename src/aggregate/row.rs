// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dictionary-valued aggregation rows.
//!
//! Pipeline output is usually a partial projection (group keys plus reducer
//! aliases), so rows stay untyped until the caller asks for
//! [`AggregationRow::hydrate`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::connection::Reply;
use crate::error::Result;
use crate::query::search::pair_up;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowValue {
    Nil,
    Text(String),
    Integer(i64),
    Double(f64),
    List(Vec<RowValue>),
}

impl RowValue {
    pub fn from_reply(reply: Reply) -> Self {
        match reply {
            Reply::Nil => RowValue::Nil,
            Reply::Integer(i) => RowValue::Integer(i),
            Reply::Double(d) => RowValue::Double(d),
            Reply::Text(s) | Reply::Status(s) => RowValue::Text(s),
            Reply::Blob(b) => RowValue::Text(String::from_utf8_lossy(&b).into_owned()),
            Reply::Array(items) => RowValue::List(items.into_iter().map(RowValue::from_reply).collect()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RowValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numbers come back from the engine as text; both forms are accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RowValue::Integer(i) => Some(*i as f64),
            RowValue::Double(d) => Some(*d),
            RowValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RowValue::Integer(i) => Some(*i),
            RowValue::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            RowValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// JSON view: numeric text becomes a number, JSON text is parsed.
    pub fn to_json(&self) -> Value {
        match self {
            RowValue::Nil => Value::Null,
            RowValue::Integer(i) => Value::from(*i),
            RowValue::Double(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
            RowValue::List(items) => Value::Array(items.iter().map(RowValue::to_json).collect()),
            RowValue::Text(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    return Value::from(i);
                }
                if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
                    return Value::Number(n);
                }
                if s.starts_with('[') || s.starts_with('{') {
                    if let Ok(parsed) = serde_json::from_str(s) {
                        return parsed;
                    }
                }
                Value::String(s.clone())
            }
        }
    }
}

/// One output row: field/alias name to value, in reply order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregationRow {
    pub fields: Vec<(String, RowValue)>,
}

impl AggregationRow {
    pub(crate) fn from_reply(reply: Reply) -> Result<Self> {
        let pairs = pair_up(reply.into_array()?)?;
        Ok(Self {
            fields: pairs
                .into_iter()
                .map(|(name, value)| (name, RowValue::from_reply(value)))
                .collect(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&RowValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(RowValue::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(RowValue::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(RowValue::as_i64)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Deserialize the row into a typed record.
    pub fn hydrate<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}
