// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Declarative record schemas.
//!
//! A [`RecordSchema`] is a plain configuration struct assembled once at
//! startup. It lists every stored field with its value type and indexing
//! settings; [`RecordSchema::build_descriptor`] turns it into the immutable
//! [`IndexDescriptor`] the compilers work from.
//!
//! ```rust
//! use record_search::schema::{FieldSpec, RecordSchema, StorageType};
//!
//! let person = RecordSchema::new("Person", StorageType::Json)
//!     .field(FieldSpec::string("Name").searchable().sortable())
//!     .field(FieldSpec::integer("Age").indexed().sortable())
//!     .field(FieldSpec::array(FieldSpec::string("Skills")).indexed())
//!     .field(
//!         FieldSpec::object("Address", vec![FieldSpec::string("City").indexed()])
//!             .cascade(1),
//!     );
//!
//! let index = person.build_descriptor().unwrap();
//! assert_eq!(index.index_name, "person-idx");
//! assert_eq!(index.require("Address.City").unwrap().name, "Address_City");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{FieldDescriptor, FieldKind, IndexDescriptor, StorageType};
use crate::collection::ids::IdStrategy;
use crate::error::{Result, SearchError};
use crate::vector::VectorParams;

/// Default TAG separator, also used to join string arrays in hashes.
pub const DEFAULT_SEPARATOR: char = '|';

/// Declared value type of a stored field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
    /// Epoch milliseconds
    Timestamp,
    Nullable(Box<ValueType>),
    /// `{"longitude": .., "latitude": ..}`, stored as `"lon,lat"`
    GeoPoint,
    Embedding(VectorParams),
    Array(Box<ValueType>),
    Object(Vec<FieldSpec>),
}

impl ValueType {
    /// Strip any `Nullable` wrappers.
    pub fn base(&self) -> &ValueType {
        match self {
            ValueType::Nullable(inner) => inner.base(),
            other => other,
        }
    }

    fn derived_kind(&self, full_text: bool) -> Option<FieldKind> {
        match self.base() {
            ValueType::String if full_text => Some(FieldKind::Text),
            ValueType::String | ValueType::Boolean => Some(FieldKind::Tag),
            ValueType::Integer | ValueType::Float | ValueType::Timestamp => Some(FieldKind::Numeric),
            ValueType::GeoPoint => Some(FieldKind::Geo),
            ValueType::Embedding(_) => Some(FieldKind::Vector),
            ValueType::Array(inner) => match inner.base() {
                ValueType::String if full_text => Some(FieldKind::Text),
                ValueType::String | ValueType::Boolean => Some(FieldKind::Tag),
                ValueType::Integer | ValueType::Float | ValueType::Timestamp => Some(FieldKind::Numeric),
                _ => None,
            },
            ValueType::Object(_) | ValueType::Nullable(_) => None,
        }
    }
}

/// Per-field declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub value_type: ValueType,
    pub indexed: bool,
    /// Index strings as TEXT instead of TAG
    pub full_text: bool,
    /// Overrides the kind derived from the value type
    pub kind: Option<FieldKind>,
    pub sortable: bool,
    pub aggregatable: bool,
    /// TAG/TEXT values are case-folded by the engine when set
    pub normalized: bool,
    pub separator: char,
    pub cascade_depth: usize,
    pub alias: Option<String>,
    pub weight: Option<f64>,
    pub phonetic: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            indexed: false,
            full_text: false,
            kind: None,
            sortable: false,
            aggregatable: false,
            normalized: true,
            separator: DEFAULT_SEPARATOR,
            cascade_depth: 0,
            alias: None,
            weight: None,
            phonetic: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Boolean)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Timestamp)
    }

    pub fn geo(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::GeoPoint)
    }

    pub fn embedding(name: impl Into<String>, params: VectorParams) -> Self {
        Self::new(name, ValueType::Embedding(params)).indexed()
    }

    pub fn object(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self::new(name, ValueType::Object(fields))
    }

    /// Array of the element described by `element` (its name becomes the field name).
    pub fn array(element: FieldSpec) -> Self {
        Self {
            value_type: ValueType::Array(Box::new(element.value_type.clone())),
            ..element
        }
    }

    pub fn nullable(mut self) -> Self {
        self.value_type = ValueType::Nullable(Box::new(self.value_type));
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Full-text indexed.
    pub fn searchable(mut self) -> Self {
        self.indexed = true;
        self.full_text = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn aggregatable(mut self) -> Self {
        self.aggregatable = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.normalized = false;
        self
    }

    pub fn separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn phonetic(mut self, matcher: impl Into<String>) -> Self {
        self.phonetic = Some(matcher.into());
        self
    }

    /// Index the nested object's fields, `depth` levels down. Implies `indexed`.
    pub fn cascade(mut self, depth: usize) -> Self {
        self.cascade_depth = depth;
        self.indexed = true;
        self
    }
}

/// Registration-time description of one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    pub index_name: Option<String>,
    /// Key prefixes; the first one names new keys
    pub prefixes: Vec<String>,
    pub storage: StorageType,
    pub id_field: String,
    pub id_strategy: IdStrategy,
    pub language: Option<String>,
    pub filter: Option<String>,
    pub stopwords: Option<Vec<String>>,
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, storage: StorageType) -> Self {
        let name = name.into();
        Self {
            prefixes: vec![name.clone()],
            name,
            index_name: None,
            storage,
            id_field: "Id".to_string(),
            id_strategy: IdStrategy::Ulid,
            language: None,
            filter: None,
            stopwords: None,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes = vec![prefix.into()];
        self
    }

    pub fn extra_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    pub fn id(mut self, field: impl Into<String>, strategy: IdStrategy) -> Self {
        self.id_field = field.into();
        self.id_strategy = strategy;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn stopwords(mut self, words: Vec<String>) -> Self {
        self.stopwords = Some(words);
        self
    }

    /// Look up a declared field by dotted property path.
    pub fn find_field(&self, property: &str) -> Option<&FieldSpec> {
        let mut fields = &self.fields;
        let mut parts = property.split('.').peekable();
        while let Some(part) = parts.next() {
            let spec = fields.iter().find(|f| f.name == part)?;
            if parts.peek().is_none() {
                return Some(spec);
            }
            fields = match spec.value_type.base() {
                ValueType::Object(children) => children,
                ValueType::Array(inner) => match inner.base() {
                    ValueType::Object(children) => children,
                    _ => return None,
                },
                _ => return None,
            };
        }
        None
    }

    /// Build the index descriptor. Fails fast on inconsistent metadata.
    pub fn build_descriptor(&self) -> Result<IndexDescriptor> {
        if self.name.is_empty() {
            return Err(SearchError::schema("record name is empty"));
        }
        if self.prefixes.is_empty() || self.prefixes.iter().any(|p| p.is_empty()) {
            return Err(SearchError::schema(format!("record '{}' has an empty key prefix", self.name)));
        }

        let mut out = Vec::new();
        let root = Scope::root(self.storage);
        for spec in &self.fields {
            collect(spec, &root, &mut out)?;
        }

        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for field in &out {
            if !names.insert(field.name.as_str()) {
                return Err(SearchError::schema(format!(
                    "two fields resolve to the alias '{}'",
                    field.name
                )));
            }
            if !paths.insert(field.path.as_str()) {
                return Err(SearchError::schema(format!(
                    "two fields resolve to the storage path '{}'",
                    field.path
                )));
            }
        }

        Ok(IndexDescriptor {
            record: self.name.clone(),
            index_name: self
                .index_name
                .clone()
                .unwrap_or_else(|| format!("{}-idx", self.name.to_lowercase())),
            storage: self.storage,
            prefixes: self.prefixes.clone(),
            language: self.language.clone(),
            filter: self.filter.clone(),
            stopwords: self.stopwords.clone(),
            fields: out,
        })
    }
}

/// Where a field sits while the cascade is being flattened.
struct Scope<'a> {
    storage: StorageType,
    properties: Vec<&'a str>,
    /// JSON path segments; array hops carry `[*]`
    json_segments: Vec<String>,
    /// Remaining cascade budget; `None` at the root
    remaining: Option<usize>,
}

impl<'a> Scope<'a> {
    fn root(storage: StorageType) -> Self {
        Self {
            storage,
            properties: Vec::new(),
            json_segments: Vec::new(),
            remaining: None,
        }
    }

    fn child(&self, spec: &'a FieldSpec, depth: usize, array_hop: bool) -> Scope<'a> {
        let mut properties = self.properties.clone();
        properties.push(&spec.name);
        let mut json_segments = self.json_segments.clone();
        json_segments.push(if array_hop {
            format!("{}[*]", spec.name)
        } else {
            spec.name.clone()
        });
        Scope {
            storage: self.storage,
            properties,
            json_segments,
            remaining: Some(depth),
        }
    }
}

fn collect<'a>(spec: &'a FieldSpec, scope: &Scope<'a>, out: &mut Vec<FieldDescriptor>) -> Result<()> {
    let nested = match spec.value_type.base() {
        ValueType::Object(children) => Some((children, false)),
        ValueType::Array(inner) => match inner.base() {
            ValueType::Object(children) => Some((children, true)),
            _ => None,
        },
        _ => None,
    };

    if let Some((children, array_hop)) = nested {
        if !spec.indexed {
            return Ok(());
        }
        // Inside a cascade the parent's budget wins; at the root the field's own depth
        let depth = match scope.remaining {
            Some(remaining) => remaining,
            None => spec.cascade_depth,
        };
        if depth == 0 {
            if scope.remaining.is_none() {
                return Err(SearchError::schema(format!(
                    "object field '{}' is indexed without a cascade depth",
                    spec.name
                )));
            }
            return Ok(());
        }
        if array_hop && scope.storage == StorageType::Hash {
            return Err(SearchError::schema(format!(
                "array of objects '{}' can only be indexed with JSON storage",
                spec.name
            )));
        }
        let child_scope = scope.child(spec, depth - 1, array_hop);
        for child in children {
            collect(child, &child_scope, out)?;
        }
        return Ok(());
    }

    if !spec.indexed {
        return Ok(());
    }

    let derived = spec.value_type.derived_kind(spec.full_text);
    let kind = match (spec.kind, derived) {
        (Some(kind), _) => kind,
        (None, Some(kind)) => kind,
        (None, None) => {
            return Err(SearchError::schema(format!(
                "cannot derive an index kind for field '{}'",
                spec.name
            )))
        }
    };

    let vector = match (kind, spec.value_type.base()) {
        (FieldKind::Vector, ValueType::Embedding(params)) => {
            params.validate(&spec.name)?;
            Some(params.clone())
        }
        (FieldKind::Vector, _) => {
            return Err(SearchError::schema(format!(
                "vector field '{}' has no dimension/algorithm metadata",
                spec.name
            )))
        }
        _ => None,
    };

    let is_array = matches!(spec.value_type.base(), ValueType::Array(_));
    if is_array && scope.storage == StorageType::Hash && kind == FieldKind::Numeric {
        return Err(SearchError::schema(format!(
            "numeric array '{}' can only be indexed with JSON storage",
            spec.name
        )));
    }

    let mut properties = scope.properties.clone();
    properties.push(&spec.name);
    let property = properties.join(".");

    let path = match scope.storage {
        StorageType::Json => {
            let mut segments = scope.json_segments.clone();
            segments.push(if is_array {
                format!("{}[*]", spec.name)
            } else {
                spec.name.clone()
            });
            format!("$.{}", segments.join("."))
        }
        StorageType::Hash => property.clone(),
    };

    out.push(FieldDescriptor {
        name: spec.alias.clone().unwrap_or_else(|| properties.join("_")),
        path,
        property,
        kind,
        sortable: spec.sortable,
        aggregatable: spec.aggregatable,
        normalized: spec.normalized,
        separator: spec.separator,
        cascade_depth: scope.remaining.unwrap_or(spec.cascade_depth),
        vector,
        weight: spec.weight,
        phonetic: spec.phonetic.clone(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorParams;

    fn address() -> FieldSpec {
        FieldSpec::object(
            "Address",
            vec![
                FieldSpec::string("City").indexed(),
                FieldSpec::string("Street").searchable(),
                FieldSpec::integer("Zip"),
                FieldSpec::object(
                    "Geo",
                    vec![FieldSpec::geo("Location").indexed()],
                )
                .indexed(),
            ],
        )
    }

    #[test]
    fn test_kind_derivation() {
        let index = RecordSchema::new("Person", StorageType::Hash)
            .field(FieldSpec::string("Name").indexed())
            .field(FieldSpec::string("Bio").searchable())
            .field(FieldSpec::integer("Age").nullable().indexed())
            .field(FieldSpec::float("Height").indexed())
            .field(FieldSpec::boolean("Active").indexed())
            .field(FieldSpec::geo("Home").indexed())
            .field(FieldSpec::embedding("Face", VectorParams::flat(4)))
            .build_descriptor()
            .unwrap();

        let kinds: Vec<_> = index.fields.iter().map(|f| (f.name.as_str(), f.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("Name", FieldKind::Tag),
                ("Bio", FieldKind::Text),
                ("Age", FieldKind::Numeric),
                ("Height", FieldKind::Numeric),
                ("Active", FieldKind::Tag),
                ("Home", FieldKind::Geo),
                ("Face", FieldKind::Vector),
            ]
        );
    }

    #[test]
    fn test_unindexed_fields_get_no_descriptor() {
        let index = RecordSchema::new("Person", StorageType::Json)
            .field(FieldSpec::string("Nickname"))
            .field(FieldSpec::integer("Age").indexed())
            .build_descriptor()
            .unwrap();
        assert_eq!(index.fields.len(), 1);
        assert!(index.field("Nickname").is_none());
    }

    #[test]
    fn test_cascade_depth_bounds_flattening() {
        let shallow = RecordSchema::new("Person", StorageType::Json)
            .field(address().cascade(1))
            .build_descriptor()
            .unwrap();
        let names: Vec<_> = shallow.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Address_City", "Address_Street"]);
        assert_eq!(shallow.fields[0].path, "$.Address.City");
        assert_eq!(shallow.fields[0].property, "Address.City");

        let deep = RecordSchema::new("Person", StorageType::Json)
            .field(address().cascade(2))
            .build_descriptor()
            .unwrap();
        let location = deep.require("Address.Geo.Location").unwrap();
        assert_eq!(location.path, "$.Address.Geo.Location");
        assert_eq!(location.name, "Address_Geo_Location");
        assert_eq!(location.kind, FieldKind::Geo);
    }

    #[test]
    fn test_hash_cascade_uses_dotted_names() {
        let index = RecordSchema::new("Person", StorageType::Hash)
            .field(address().cascade(1))
            .build_descriptor()
            .unwrap();
        assert_eq!(index.fields[0].path, "Address.City");
    }

    #[test]
    fn test_indexed_object_without_depth_fails() {
        let err = RecordSchema::new("Person", StorageType::Json)
            .field(address().indexed())
            .build_descriptor()
            .unwrap_err();
        assert!(matches!(err, SearchError::Schema(_)));
    }

    #[test]
    fn test_duplicate_alias_fails() {
        let err = RecordSchema::new("Person", StorageType::Json)
            .field(FieldSpec::string("Name").indexed())
            .field(FieldSpec::string("FullName").indexed().alias("Name"))
            .build_descriptor()
            .unwrap_err();
        assert!(err.to_string().contains("Name"));
    }

    #[test]
    fn test_nested_alias_collision_fails() {
        let err = RecordSchema::new("Person", StorageType::Json)
            .field(FieldSpec::string("Address_City").indexed())
            .field(address().cascade(1))
            .build_descriptor()
            .unwrap_err();
        assert!(matches!(err, SearchError::Schema(_)));
    }

    #[test]
    fn test_vector_without_metadata_fails() {
        let mut params = VectorParams::hnsw(8);
        params.dimensions = None;
        let err = RecordSchema::new("Doc", StorageType::Json)
            .field(FieldSpec::embedding("Embedding", params))
            .build_descriptor()
            .unwrap_err();
        assert!(matches!(err, SearchError::Schema(_)));

        let err = RecordSchema::new("Doc", StorageType::Json)
            .field(FieldSpec::string("Title").indexed().kind(FieldKind::Vector))
            .build_descriptor()
            .unwrap_err();
        assert!(matches!(err, SearchError::Schema(_)));
    }

    #[test]
    fn test_arrays() {
        let index = RecordSchema::new("Person", StorageType::Json)
            .field(FieldSpec::array(FieldSpec::string("Skills")).indexed())
            .field(FieldSpec::array(FieldSpec::integer("Scores")).indexed())
            .field(
                FieldSpec::array(FieldSpec::object("Pets", vec![FieldSpec::string("Kind").indexed()]))
                    .cascade(1),
            )
            .build_descriptor()
            .unwrap();
        assert_eq!(index.require("Skills").unwrap().path, "$.Skills[*]");
        assert_eq!(index.require("Skills").unwrap().kind, FieldKind::Tag);
        assert_eq!(index.require("Scores").unwrap().kind, FieldKind::Numeric);
        assert_eq!(index.require("Pets.Kind").unwrap().path, "$.Pets[*].Kind");

        let err = RecordSchema::new("Person", StorageType::Hash)
            .field(FieldSpec::array(FieldSpec::integer("Scores")).indexed())
            .build_descriptor();
        assert!(err.is_err());
    }

    #[test]
    fn test_find_field_walks_objects() {
        let schema = RecordSchema::new("Person", StorageType::Json).field(address());
        assert_eq!(schema.find_field("Address.City").unwrap().name, "City");
        assert!(schema.find_field("Address.Country").is_none());
        assert!(schema.find_field("Address.City.Name").is_none());
    }

    #[test]
    fn test_empty_prefix_fails() {
        let err = RecordSchema::new("Person", StorageType::Hash).prefix("").build_descriptor();
        assert!(err.is_err());
    }
}
