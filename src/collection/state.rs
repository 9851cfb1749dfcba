// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot-based dirty tracking.
//!
//! Every record the collection hydrates is stored here next to the encoded
//! form it had when it was read (or last written). Saving re-encodes the live
//! record and writes only the difference:
//!
//! ```text
//! HASH: HSET key changed…   + HDEL key removed…
//! JSON: JSON.SET key $.a.b v (per changed sub-path) + JSON.DEL key $.gone
//! ```
//!
//! The diff is against this table only, never against the server, so two
//! writers touching the same field resolve as last-writer-wins.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::connection::{Command, CommandArg};

/// Encoded form of a record as it sits in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Flattened hash fields (`Address.City` style names)
    Hash(BTreeMap<String, CommandArg>),
    /// Whole JSON document
    Json(Value),
}

impl Snapshot {
    /// Number of top-level stored values.
    pub fn len(&self) -> usize {
        match self {
            Snapshot::Hash(fields) => fields.len(),
            Snapshot::Json(Value::Object(map)) => map.len(),
            Snapshot::Json(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Every stored value rewritten
    Full,
    /// Only values that differ from the snapshot
    Partial,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteKind::Full => "full",
            WriteKind::Partial => "partial",
        }
    }
}

/// Commands for one record write plus the snapshot to keep once they succeed.
#[derive(Debug, Clone)]
pub struct WritePlan {
    pub key: String,
    pub kind: WriteKind,
    pub commands: Vec<Command>,
    /// Values set or removed
    pub fields: usize,
    snapshot: Snapshot,
}

impl WritePlan {
    /// Nothing to send.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// One tracked record.
#[derive(Debug, Clone)]
pub struct TrackedEntity<T> {
    pub key: String,
    pub record: T,
    snapshot: Snapshot,
}

impl<T> TrackedEntity<T> {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

/// Key-indexed table of tracked records, owned by one collection.
#[derive(Debug)]
pub struct StateManager<T> {
    entries: HashMap<String, TrackedEntity<T>>,
}

impl<T> Default for StateManager<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> StateManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) tracking `key` from a freshly read snapshot.
    pub fn track(&mut self, key: impl Into<String>, snapshot: Snapshot, record: T) {
        let key = key.into();
        self.entries.insert(
            key.clone(),
            TrackedEntity {
                key,
                record,
                snapshot,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key).map(|e| &e.record)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key).map(|e| &mut e.record)
    }

    pub fn entity(&self, key: &str) -> Option<&TrackedEntity<T>> {
        self.entries.get(key)
    }

    pub fn snapshot(&self, key: &str) -> Option<&Snapshot> {
        self.entries.get(key).map(|e| &e.snapshot)
    }

    pub fn remove(&mut self, key: &str) -> Option<TrackedEntity<T>> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity<T>> {
        self.entries.values()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Rewrite the whole record. Hash fields that were stored before but are
    /// absent now are removed so the key mirrors the record exactly.
    pub fn plan_full(&self, key: &str, current: Snapshot) -> WritePlan {
        let previous = self.snapshot(key);
        let mut commands = Vec::new();
        let fields;
        match &current {
            Snapshot::Hash(map) => {
                if !map.is_empty() {
                    commands.push(hset(key, map.iter()));
                }
                let stale: Vec<&String> = match previous {
                    Some(Snapshot::Hash(old)) => old.keys().filter(|k| !map.contains_key(*k)).collect(),
                    _ => Vec::new(),
                };
                if !stale.is_empty() {
                    commands.push(hdel(key, stale.iter().copied()));
                }
                fields = map.len() + stale.len();
            }
            Snapshot::Json(doc) => {
                commands.push(json_set(key, "$", doc));
                fields = current.len();
            }
        }
        WritePlan {
            key: key.to_string(),
            kind: WriteKind::Full,
            commands,
            fields,
            snapshot: current,
        }
    }

    /// Write only what changed since the snapshot. Untracked keys (and a
    /// storage-type mismatch) fall back to [`plan_full`](Self::plan_full).
    pub fn plan_diff(&self, key: &str, current: Snapshot) -> WritePlan {
        let commands_and_fields = match (self.snapshot(key), &current) {
            (Some(Snapshot::Hash(old)), Snapshot::Hash(new)) => Some(diff_hash(key, old, new)),
            (Some(Snapshot::Json(old)), Snapshot::Json(new)) => Some(diff_json(key, old, new)),
            _ => None,
        };
        match commands_and_fields {
            Some((commands, fields)) => WritePlan {
                key: key.to_string(),
                kind: WriteKind::Partial,
                commands,
                fields,
                snapshot: current,
            },
            None => self.plan_full(key, current),
        }
    }

    /// Record a successfully executed plan.
    pub fn commit(&mut self, plan: WritePlan, record: T) {
        self.track(plan.key, plan.snapshot, record);
    }
}

fn hset<'a>(key: &str, fields: impl Iterator<Item = (&'a String, &'a CommandArg)>) -> Command {
    let mut cmd = Command::new("HSET").arg(key);
    for (name, value) in fields {
        cmd.push(name);
        cmd.push(value.clone());
    }
    cmd
}

fn hdel<'a>(key: &str, fields: impl Iterator<Item = &'a String>) -> Command {
    let mut cmd = Command::new("HDEL").arg(key);
    cmd.extend(fields);
    cmd
}

fn json_set(key: &str, path: &str, value: &Value) -> Command {
    Command::new("JSON.SET")
        .arg(key)
        .arg(path)
        .arg(value.to_string())
}

fn diff_hash(
    key: &str,
    old: &BTreeMap<String, CommandArg>,
    new: &BTreeMap<String, CommandArg>,
) -> (Vec<Command>, usize) {
    let changed: Vec<(&String, &CommandArg)> = new
        .iter()
        .filter(|(name, value)| old.get(*name) != Some(*value))
        .collect();
    let removed: Vec<&String> = old.keys().filter(|k| !new.contains_key(*k)).collect();

    let mut commands = Vec::new();
    if !changed.is_empty() {
        commands.push(hset(key, changed.iter().copied()));
    }
    if !removed.is_empty() {
        commands.push(hdel(key, removed.iter().copied()));
    }
    (commands, changed.len() + removed.len())
}

enum JsonChange<'a> {
    Set(String, &'a Value),
    Delete(String),
}

fn diff_json(key: &str, old: &Value, new: &Value) -> (Vec<Command>, usize) {
    let mut changes = Vec::new();
    diff_value("$", old, new, &mut changes);
    let commands: Vec<Command> = changes
        .iter()
        .map(|change| match change {
            JsonChange::Set(path, value) => json_set(key, path, value),
            JsonChange::Delete(path) => Command::new("JSON.DEL").arg(key).arg(path),
        })
        .collect();
    let count = commands.len();
    (commands, count)
}

/// Objects are diffed member by member; anything else (arrays included) is
/// replaced whole when it differs.
fn diff_value<'a>(path: &str, old: &Value, new: &'a Value, out: &mut Vec<JsonChange<'a>>) {
    match (old, new) {
        (Value::Object(before), Value::Object(after)) => diff_object(path, before, after, out),
        _ if old != new => out.push(JsonChange::Set(path.to_string(), new)),
        _ => {}
    }
}

fn diff_object<'a>(
    path: &str,
    before: &Map<String, Value>,
    after: &'a Map<String, Value>,
    out: &mut Vec<JsonChange<'a>>,
) {
    for (name, value) in after {
        let child = child_path(path, name);
        match before.get(name) {
            Some(previous) => diff_value(&child, previous, value, out),
            None => out.push(JsonChange::Set(child, value)),
        }
    }
    for name in before.keys().filter(|k| !after.contains_key(*k)) {
        out.push(JsonChange::Delete(child_path(path, name)));
    }
}

/// `$.Name`, or `$["odd key"]` when the member name is not a plain identifier.
pub(crate) fn child_path(parent: &str, member: &str) -> String {
    let plain = member
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && member.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        format!("{}.{}", parent, member)
    } else {
        format!("{}[{}]", parent, Value::String(member.to_string()))
    }
}
