// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record id generation.
//!
//! Keys are `{prefix}:{id}`. A record whose id field still holds its default
//! (null, `""` or `0`) gets a fresh id from the collection's generator; any
//! other value is taken as caller-supplied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use ulid::Ulid;
use uuid::Uuid;

/// How new ids are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdStrategy {
    /// Process-local monotonic counter starting at 1.
    ///
    /// The counter is not persisted: a fresh process reissues `1`, `2`, ...
    /// and an insert overwrites whatever record already holds that key.
    /// Collections over existing data should seed it with
    /// [`CounterIds::starting_after`] via `Collection::with_id_generator`.
    Counter,
    /// Random 128-bit UUID v4
    Uuid,
    /// Time-ordered, lexicographically sortable
    #[default]
    Ulid,
    /// The caller always supplies the id
    Provided,
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

#[derive(Debug, Default)]
pub struct CounterIds {
    next: AtomicU64,
}

impl CounterIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after `last` (e.g. the highest id already stored).
    pub fn starting_after(last: u64) -> Self {
        Self {
            next: AtomicU64::new(last),
        }
    }
}

impl IdGenerator for CounterIds {
    fn next_id(&self) -> String {
        (self.next.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}

#[derive(Debug, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Default)]
pub struct UlidIds;

impl IdGenerator for UlidIds {
    fn next_id(&self) -> String {
        Ulid::new().to_string()
    }
}

/// Generator for a strategy; `None` for [`IdStrategy::Provided`].
pub fn generator_for(strategy: IdStrategy) -> Option<Box<dyn IdGenerator>> {
    match strategy {
        IdStrategy::Counter => Some(Box::new(CounterIds::new())),
        IdStrategy::Uuid => Some(Box::new(UuidIds)),
        IdStrategy::Ulid => Some(Box::new(UlidIds)),
        IdStrategy::Provided => None,
    }
}

/// True when an id field still holds its type's default value.
pub fn is_default_id(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// Render a caller-supplied id for use in a key.
pub fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
