// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Registry of index descriptors, built once at startup.
//!
//! # Example
//!
//! ```rust
//! use record_search::schema::{FieldSpec, RecordSchema, SchemaRegistry, StorageType};
//!
//! let registry = SchemaRegistry::new();
//! registry
//!     .register(&RecordSchema::new("Person", StorageType::Hash).field(FieldSpec::integer("Age").indexed()))
//!     .unwrap();
//!
//! // Keys are routed by longest prefix match
//! let index = registry.index_for_key("Person:01H8XGJWBWBAQ4Z4ZJ").unwrap();
//! assert_eq!(index.index_name, "person-idx");
//! assert!(registry.index_for_key("Order:1").is_none());
//! ```
//!
//! # Design
//!
//! - **Build once**: descriptors are immutable and handed out as `Arc`
//! - **Longest prefix match**: more specific prefixes take precedence
//! - **Thread-safe**: uses `parking_lot::RwLock` for concurrent access

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{IndexDescriptor, RecordSchema};
use crate::error::{Result, SearchError};

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    /// Record name -> descriptor
    indexes: RwLock<HashMap<String, Arc<IndexDescriptor>>>,
    /// `{prefix}:` -> record name, sorted by prefix length (descending)
    prefixes: RwLock<Vec<(String, String)>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register the descriptor for a record type.
    ///
    /// Re-registering the same record replaces it; a prefix already owned by
    /// another record is a schema error.
    pub fn register(&self, schema: &RecordSchema) -> Result<Arc<IndexDescriptor>> {
        let descriptor = Arc::new(schema.build_descriptor()?);

        let mut prefixes = self.prefixes.write();
        for prefix in &descriptor.prefixes {
            let key_prefix = format!("{}:", prefix);
            if let Some((_, owner)) = prefixes.iter().find(|(p, _)| *p == key_prefix) {
                if *owner != descriptor.record {
                    return Err(SearchError::schema(format!(
                        "prefix '{}' is already registered by '{}'",
                        prefix, owner
                    )));
                }
            }
        }
        prefixes.retain(|(_, owner)| *owner != descriptor.record);
        for prefix in &descriptor.prefixes {
            prefixes.push((format!("{}:", prefix), descriptor.record.clone()));
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        debug!(record = %descriptor.record, index = %descriptor.index_name, "Registered schema");
        self.indexes
            .write()
            .insert(descriptor.record.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Remove a record type. Returns `true` if it was registered.
    pub fn unregister(&self, record: &str) -> bool {
        self.prefixes.write().retain(|(_, owner)| owner != record);
        self.indexes.write().remove(record).is_some()
    }

    #[must_use]
    pub fn get(&self, record: &str) -> Option<Arc<IndexDescriptor>> {
        self.indexes.read().get(record).cloned()
    }

    /// Descriptor whose key prefix matches `key` (longest prefix first).
    #[must_use]
    pub fn index_for_key(&self, key: &str) -> Option<Arc<IndexDescriptor>> {
        let prefixes = self.prefixes.read();
        let record = prefixes
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, record)| record.clone())?;
        drop(prefixes);
        self.get(&record)
    }

    /// Registered record names, sorted.
    #[must_use]
    pub fn records(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, StorageType};

    fn schema(name: &str) -> RecordSchema {
        RecordSchema::new(name, StorageType::Hash).field(FieldSpec::string("Name").indexed())
    }

    #[test]
    fn test_register_and_get() {
        let registry = SchemaRegistry::new();
        let descriptor = registry.register(&schema("Person")).unwrap();
        assert_eq!(descriptor.index_name, "person-idx");
        assert!(registry.get("Person").is_some());
        assert!(registry.get("Order").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = SchemaRegistry::new();
        registry.register(&schema("Person")).unwrap();
        registry
            .register(&schema("Employee").prefix("Person:Employee"))
            .unwrap();

        assert_eq!(
            registry.index_for_key("Person:Employee:7").unwrap().record,
            "Employee"
        );
        assert_eq!(registry.index_for_key("Person:7").unwrap().record, "Person");
    }

    #[test]
    fn test_prefix_must_be_whole_segment() {
        let registry = SchemaRegistry::new();
        registry.register(&schema("Person")).unwrap();
        assert!(registry.index_for_key("PersonNote:1").is_none());
    }

    #[test]
    fn test_prefix_conflict_is_schema_error() {
        let registry = SchemaRegistry::new();
        registry.register(&schema("Person")).unwrap();
        let err = registry.register(&schema("Human").prefix("Person")).unwrap_err();
        assert!(matches!(err, SearchError::Schema(_)));
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = SchemaRegistry::new();
        registry.register(&schema("Person")).unwrap();
        registry
            .register(&schema("Person").prefix("People"))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.index_for_key("Person:1").is_none());
        assert!(registry.index_for_key("People:1").is_some());
    }

    #[test]
    fn test_unregister() {
        let registry = SchemaRegistry::new();
        registry.register(&schema("Person")).unwrap();
        registry.register(&schema("Order")).unwrap();
        assert_eq!(registry.records(), vec!["Order", "Person"]);

        assert!(registry.unregister("Person"));
        assert!(!registry.unregister("Person"));
        assert!(registry.index_for_key("Person:1").is_none());
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_invalid_schema_is_not_registered() {
        let registry = SchemaRegistry::new();
        let bad = RecordSchema::new("Bad", StorageType::Hash)
            .field(FieldSpec::string("A").indexed())
            .field(FieldSpec::string("B").indexed().alias("A"));
        assert!(registry.register(&bad).is_err());
        assert!(registry.is_empty());
    }
}
