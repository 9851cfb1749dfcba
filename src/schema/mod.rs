// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Schema model: field and index descriptors.
//!
//! # RediSearch Index Creation
//!
//! ```text
//! FT.CREATE person-idx
//!   ON JSON
//!   PREFIX 1 Person:
//!   SCHEMA
//!     $.Name AS Name TEXT SORTABLE
//!     $.Age AS Age NUMERIC SORTABLE
//!     $.Skills[*] AS Skills TAG SEPARATOR |
//!     $.Address.City AS Address_City TAG SEPARATOR |
//! ```
//!
//! Descriptors are built once per record type by
//! [`RecordSchema::build_descriptor`] and never change afterwards; they are
//! shared as `Arc<IndexDescriptor>`.

mod record;
mod registry;

pub use record::{FieldSpec, RecordSchema, ValueType, DEFAULT_SEPARATOR};
pub use registry::SchemaRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::connection::Command;
use crate::error::{Result, SearchError};
use crate::vector::VectorParams;

/// Field types supported by RediSearch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Exact-match tokens, literal wrapped in `{ }`
    Tag,
    /// Full-text searchable
    Text,
    /// Range queries
    Numeric,
    /// Longitude/latitude radius queries
    Geo,
    /// Similarity search
    Vector,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Tag => write!(f, "TAG"),
            FieldKind::Text => write!(f, "TEXT"),
            FieldKind::Numeric => write!(f, "NUMERIC"),
            FieldKind::Geo => write!(f, "GEO"),
            FieldKind::Vector => write!(f, "VECTOR"),
        }
    }
}

/// How records are laid out under their keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    /// Flat field/value hash (`HSET`)
    Hash,
    /// RedisJSON document tree (`JSON.SET`)
    Json,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Hash => write!(f, "HASH"),
            StorageType::Json => write!(f, "JSON"),
        }
    }
}

/// One queryable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Query alias (`@name`)
    pub name: String,
    /// Storage path: JSON path for documents, field name for hashes
    pub path: String,
    /// Dotted property path within the record (`Address.City`)
    pub property: String,
    pub kind: FieldKind,
    pub sortable: bool,
    pub aggregatable: bool,
    pub normalized: bool,
    pub separator: char,
    /// Remaining cascade budget at the point this field was reached
    pub cascade_depth: usize,
    pub vector: Option<VectorParams>,
    pub weight: Option<f64>,
    pub phonetic: Option<String>,
}

impl FieldDescriptor {
    fn schema_args(&self, storage: StorageType) -> Result<Vec<String>> {
        let mut args = Vec::new();
        if storage == StorageType::Json || self.path != self.name {
            args.push(self.path.clone());
            args.push("AS".to_string());
        }
        args.push(self.name.clone());
        args.push(self.kind.to_string());

        match self.kind {
            FieldKind::Text => {
                if let Some(weight) = self.weight {
                    args.push("WEIGHT".to_string());
                    args.push(weight.to_string());
                }
                if let Some(ref matcher) = self.phonetic {
                    args.push("PHONETIC".to_string());
                    args.push(matcher.clone());
                }
            }
            FieldKind::Tag => {
                args.push("SEPARATOR".to_string());
                args.push(self.separator.to_string());
                if !self.normalized {
                    args.push("CASESENSITIVE".to_string());
                }
            }
            FieldKind::Vector => {
                let params = self.vector.as_ref().ok_or_else(|| {
                    SearchError::schema(format!("vector field '{}' has no metadata", self.name))
                })?;
                let (algorithm, dimensions) = params.validate(&self.name)?;
                let attrs = params.attribute_args(dimensions);
                args.push(algorithm.to_string());
                args.push(attrs.len().to_string());
                args.extend(attrs);
            }
            FieldKind::Numeric | FieldKind::Geo => {}
        }

        if (self.sortable || self.aggregatable) && self.kind != FieldKind::Vector && self.kind != FieldKind::Geo {
            args.push("SORTABLE".to_string());
            if !self.normalized && matches!(self.kind, FieldKind::Text | FieldKind::Tag) {
                args.push("UNF".to_string());
            }
        }

        Ok(args)
    }
}

/// Everything FT.CREATE needs for one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Record type this index belongs to
    pub record: String,
    pub index_name: String,
    pub storage: StorageType,
    pub prefixes: Vec<String>,
    pub language: Option<String>,
    pub filter: Option<String>,
    pub stopwords: Option<Vec<String>>,
    pub fields: Vec<FieldDescriptor>,
}

impl IndexDescriptor {
    /// Look a field up by query alias or dotted property path.
    pub fn field(&self, reference: &str) -> Option<&FieldDescriptor> {
        let reference = reference.strip_prefix('@').unwrap_or(reference);
        self.fields
            .iter()
            .find(|f| f.name == reference)
            .or_else(|| self.fields.iter().find(|f| f.property == reference))
    }

    /// Like [`field`](Self::field) but a miss is a [`SearchError::NotIndexed`].
    pub fn require(&self, reference: &str) -> Result<&FieldDescriptor> {
        self.field(reference)
            .ok_or_else(|| SearchError::not_indexed(reference))
    }

    /// Prefix new keys are created under.
    pub fn key_prefix(&self) -> &str {
        &self.prefixes[0]
    }

    /// Descriptor re-rooted at a nested object, for filters written against
    /// the owning type of a nested projection. Aliases and paths are kept so
    /// compiled queries still address the parent index.
    pub fn nested(&self, property: &str) -> Option<IndexDescriptor> {
        let prefix = format!("{}.", property);
        let fields: Vec<FieldDescriptor> = self
            .fields
            .iter()
            .filter_map(|f| {
                f.property.strip_prefix(&prefix).map(|rest| FieldDescriptor {
                    property: rest.to_string(),
                    ..f.clone()
                })
            })
            .collect();
        if fields.is_empty() {
            return None;
        }
        Some(IndexDescriptor {
            fields,
            ..self.clone()
        })
    }

    /// `FT.CREATE` arguments.
    pub fn create_command(&self) -> Result<Command> {
        let mut cmd = Command::new("FT.CREATE")
            .arg(&self.index_name)
            .arg("ON")
            .arg(self.storage.to_string())
            .arg("PREFIX")
            .arg(self.prefixes.len());
        for prefix in &self.prefixes {
            cmd.push(format!("{}:", prefix));
        }
        if let Some(ref filter) = self.filter {
            cmd.push("FILTER");
            cmd.push(filter);
        }
        if let Some(ref language) = self.language {
            cmd.push("LANGUAGE");
            cmd.push(language);
        }
        if let Some(ref words) = self.stopwords {
            cmd.push("STOPWORDS");
            cmd.push(words.len());
            cmd.extend(words.iter());
        }
        cmd.push("SCHEMA");
        if self.fields.is_empty() {
            return Err(SearchError::schema(format!(
                "record '{}' declares no indexed fields",
                self.record
            )));
        }
        for field in &self.fields {
            cmd.extend(field.schema_args(self.storage)?);
        }
        Ok(cmd)
    }

    /// `FT.DROPINDEX` arguments; `DD` also deletes the indexed documents.
    pub fn drop_command(&self, delete_documents: bool) -> Command {
        let cmd = Command::new("FT.DROPINDEX").arg(&self.index_name);
        if delete_documents {
            cmd.arg("DD")
        } else {
            cmd
        }
    }

    /// `FT.INFO` arguments.
    pub fn info_command(&self) -> Command {
        Command::new("FT.INFO").arg(&self.index_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{DistanceMetric, VectorParams};

    fn person() -> RecordSchema {
        RecordSchema::new("Person", StorageType::Json)
            .field(FieldSpec::string("Name").searchable().sortable())
            .field(FieldSpec::string("Email").indexed())
            .field(FieldSpec::integer("Age").indexed().sortable())
            .field(FieldSpec::array(FieldSpec::string("Skills")).indexed())
    }

    #[test]
    fn test_ft_create_full_command() {
        let index = person().build_descriptor().unwrap();
        let cmd = index.create_command().unwrap();

        assert_eq!(cmd.name, "FT.CREATE");
        let args = cmd.text_args();
        assert_eq!(args[0], "person-idx");
        assert_eq!(&args[1..6], &["ON", "JSON", "PREFIX", "1", "Person:"]);
        assert_eq!(args[6], "SCHEMA");

        let line = args.join(" ");
        assert!(line.contains("$.Name AS Name TEXT SORTABLE"));
        assert!(line.contains("$.Email AS Email TAG SEPARATOR |"));
        assert!(line.contains("$.Age AS Age NUMERIC SORTABLE"));
        assert!(line.contains("$.Skills[*] AS Skills TAG SEPARATOR |"));
    }

    #[test]
    fn test_hash_fields_skip_redundant_alias() {
        let index = RecordSchema::new("Person", StorageType::Hash)
            .field(FieldSpec::integer("Age").indexed())
            .build_descriptor()
            .unwrap();
        let args = index.create_command().unwrap().text_args();
        assert_eq!(
            args,
            vec!["person-idx", "ON", "HASH", "PREFIX", "1", "Person:", "SCHEMA", "Age", "NUMERIC"]
        );
    }

    #[test]
    fn test_index_options() {
        let index = person()
            .extra_prefix("Legacy")
            .language("german")
            .filter("@Age>0")
            .stopwords(vec![])
            .build_descriptor()
            .unwrap();
        let line = index.create_command().unwrap().text_args().join(" ");
        assert!(line.starts_with(
            "person-idx ON JSON PREFIX 2 Person: Legacy: FILTER @Age>0 LANGUAGE german STOPWORDS 0 SCHEMA"
        ));
    }

    #[test]
    fn test_case_sensitive_sortable_tag() {
        let index = RecordSchema::new("Person", StorageType::Hash)
            .field(FieldSpec::string("Code").indexed().case_sensitive().aggregatable().separator(','))
            .build_descriptor()
            .unwrap();
        let line = index.create_command().unwrap().text_args().join(" ");
        assert!(line.ends_with("Code TAG SEPARATOR , CASESENSITIVE SORTABLE UNF"));
    }

    #[test]
    fn test_text_weight_and_phonetic() {
        let index = RecordSchema::new("Person", StorageType::Hash)
            .field(FieldSpec::string("Bio").searchable().weight(2.5).phonetic("dm:en"))
            .build_descriptor()
            .unwrap();
        let line = index.create_command().unwrap().text_args().join(" ");
        assert!(line.ends_with("Bio TEXT WEIGHT 2.5 PHONETIC dm:en"));
    }

    #[test]
    fn test_vector_field_schema() {
        let index = RecordSchema::new("Doc", StorageType::Hash)
            .field(FieldSpec::embedding(
                "Embedding",
                VectorParams::hnsw(3).metric(DistanceMetric::L2),
            ))
            .build_descriptor()
            .unwrap();
        let line = index.create_command().unwrap().text_args().join(" ");
        assert!(line.ends_with("Embedding VECTOR HNSW 6 TYPE FLOAT32 DIM 3 DISTANCE_METRIC L2"));
    }

    #[test]
    fn test_create_without_fields_fails() {
        let index = RecordSchema::new("Empty", StorageType::Hash)
            .field(FieldSpec::string("Note"))
            .build_descriptor()
            .unwrap();
        assert!(index.create_command().is_err());
    }

    #[test]
    fn test_drop_command() {
        let index = person().build_descriptor().unwrap();
        assert_eq!(index.drop_command(false).text_args(), vec!["person-idx"]);
        assert_eq!(index.drop_command(true).text_args(), vec!["person-idx", "DD"]);
    }

    #[test]
    fn test_field_lookup_by_alias_or_property() {
        let index = RecordSchema::new("Person", StorageType::Json)
            .field(FieldSpec::object("Address", vec![FieldSpec::string("City").indexed()]).cascade(1))
            .build_descriptor()
            .unwrap();
        assert!(index.field("Address_City").is_some());
        assert!(index.field("@Address_City").is_some());
        assert!(index.field("Address.City").is_some());
        assert!(matches!(index.require("Country"), Err(SearchError::NotIndexed { .. })));

        let nested = index.nested("Address").unwrap();
        let city = nested.require("City").unwrap();
        assert_eq!(city.name, "Address_City");
        assert!(index.nested("Missing").is_none());
    }
}
