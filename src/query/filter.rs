// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter AST
//!
//! Filters are explicit trees assembled through [`Filter`] constructors and
//! combinators; they are never mutated after construction. The predicate
//! compiler turns them into RediSearch query text.
//!
//! # Example
//!
//! ```rust
//! use record_search::query::{Filter, FilterBuilder};
//!
//! // Simple comparison
//! let adults = Filter::ge("Age", 18);
//!
//! // Operators build binary nodes; the compiler flattens them
//! let working_age = Filter::gt("Age", 20) & Filter::le("Age", 65);
//! let either = Filter::eq("Status", "active") | Filter::eq("Status", "pending");
//! let not_deleted = !Filter::eq("Deleted", true);
//!
//! // Accumulating builder
//! let filter = FilterBuilder::new()
//!     .eq("Name", "Alice")
//!     .range("Age", Some(25.0), Some(40.0))
//!     .build_and();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use crate::error::Result;
use crate::vector::{VectorInput, Vectorizer};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        };
        write!(f, "{}", s)
    }
}

/// Literal on the right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Text(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Text(s)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

macro_rules! numeric_literal {
    ($($t:ty),*) => {
        $(impl From<$t> for Literal {
            fn from(n: $t) -> Self {
                Literal::Number(n as f64)
            }
        })*
    };
}

numeric_literal!(i32, i64, u32, u64, usize, f32, f64);

/// Longitude/latitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLoc {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoLoc {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }
}

/// Radius unit for geo filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoUnit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl fmt::Display for GeoUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GeoUnit::Meters => "m",
            GeoUnit::Kilometers => "km",
            GeoUnit::Miles => "mi",
            GeoUnit::Feet => "ft",
        };
        write!(f, "{}", s)
    }
}

/// Query embedding for a KNN clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VectorValue {
    /// Already encoded for the field's element type
    Blob(Vec<u8>),
    /// Encoded by the compiler using the field's element type
    Floats(Vec<f64>),
}

/// Filter AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterNode {
    /// All children must match; empty matches everything
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Compare {
        field: String,
        op: CompareOp,
        value: Literal,
    },
    Contains { field: String, value: String },
    StartsWith { field: String, value: String },
    EndsWith { field: String, value: String },
    /// Levenshtein distance 1 on a TEXT field
    Fuzzy { field: String, value: String },
    /// Array field holds `value`
    CollectionContains { field: String, value: Literal },
    /// TAG field holds any of `values`
    AnyOf { field: String, values: Vec<String> },
    GeoWithin {
        field: String,
        center: GeoLoc,
        radius: f64,
        unit: GeoUnit,
    },
    VectorKnn {
        field: String,
        k: usize,
        vector: VectorValue,
        score_alias: Option<String>,
    },
    /// Engine query text passed through untouched
    Raw(String),
}

/// A filter tree with constructor and combinator helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub root: FilterNode,
}

impl Filter {
    pub fn new(root: FilterNode) -> Self {
        Self { root }
    }

    /// Matches every record: `*`
    pub fn all() -> Self {
        Self::new(FilterNode::And(Vec::new()))
    }

    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Literal>) -> Self {
        Self::new(FilterNode::Compare {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    /// Inclusive numeric range; `None` leaves that side open.
    pub fn range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        let field = field.into();
        let mut nodes = Vec::new();
        if let Some(min) = min {
            nodes.push(Self::ge(field.clone(), min).root);
        }
        if let Some(max) = max {
            nodes.push(Self::le(field.clone(), max).root);
        }
        match nodes.len() {
            // an open range still has to reference the field
            0 => Self::ge(field, f64::NEG_INFINITY),
            1 => Self::new(nodes.remove(0)),
            _ => Self::new(FilterNode::And(nodes)),
        }
    }

    /// Substring match: `*value*`
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(FilterNode::Contains {
            field: field.into(),
            value: value.into(),
        })
    }

    /// Prefix match: `value*`
    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(FilterNode::StartsWith {
            field: field.into(),
            value: value.into(),
        })
    }

    /// Suffix match: `*value`
    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(FilterNode::EndsWith {
            field: field.into(),
            value: value.into(),
        })
    }

    /// Fuzzy match: `%value%`
    pub fn fuzzy(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(FilterNode::Fuzzy {
            field: field.into(),
            value: value.into(),
        })
    }

    /// Array membership: `array.contains(value)`
    pub fn has(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::new(FilterNode::CollectionContains {
            field: field.into(),
            value: value.into(),
        })
    }

    /// Tag membership with OR semantics: `@tags:{a|b}`
    pub fn any_of(field: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(FilterNode::AnyOf {
            field: field.into(),
            values,
        })
    }

    pub fn geo_within(field: impl Into<String>, center: GeoLoc, radius: f64, unit: GeoUnit) -> Self {
        Self::new(FilterNode::GeoWithin {
            field: field.into(),
            center,
            radius,
            unit,
        })
    }

    /// K nearest neighbours to `vector`.
    pub fn knn(field: impl Into<String>, k: usize, vector: Vec<f64>) -> Self {
        Self::new(FilterNode::VectorKnn {
            field: field.into(),
            k,
            vector: VectorValue::Floats(vector),
            score_alias: None,
        })
    }

    /// K nearest neighbours to an embedding produced by `vectorizer`.
    pub fn knn_vectorized(
        field: impl Into<String>,
        k: usize,
        vectorizer: &dyn Vectorizer,
        input: &VectorInput,
    ) -> Result<Self> {
        Ok(Self::new(FilterNode::VectorKnn {
            field: field.into(),
            k,
            vector: VectorValue::Blob(vectorizer.encode(input)?),
            score_alias: None,
        }))
    }

    /// Pre-filtered KNN: `filter` narrows the candidates first.
    pub fn knn_filtered(filter: Filter, field: impl Into<String>, k: usize, vector: Vec<f64>) -> Self {
        filter.and(Self::knn(field, k, vector))
    }

    /// Name the score column of a KNN filter. No-op for other filters.
    pub fn score_as(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        set_score_alias(&mut self.root, &alias);
        self
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(FilterNode::Raw(text.into()))
    }

    /// Combine with AND
    pub fn and(self, other: Filter) -> Self {
        Self::new(FilterNode::And(vec![self.root, other.root]))
    }

    /// Combine with OR
    pub fn or(self, other: Filter) -> Self {
        Self::new(FilterNode::Or(vec![self.root, other.root]))
    }

    /// Negate filter
    pub fn negate(self) -> Self {
        Self::new(FilterNode::Not(Box::new(self.root)))
    }
}

fn set_score_alias(node: &mut FilterNode, alias: &str) {
    match node {
        FilterNode::VectorKnn { score_alias, .. } => *score_alias = Some(alias.to_string()),
        FilterNode::And(children) => children.iter_mut().for_each(|c| set_score_alias(c, alias)),
        _ => {}
    }
}

impl From<FilterNode> for Filter {
    fn from(root: FilterNode) -> Self {
        Self::new(root)
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        self.and(rhs)
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        self.or(rhs)
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        self.negate()
    }
}

/// Builder for filters with many constraints
#[derive(Default)]
pub struct FilterBuilder {
    nodes: Vec<FilterNode>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn push(mut self, filter: Filter) -> Self {
        self.nodes.push(filter.root);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.push(Filter::eq(field, value))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.push(Filter::ne(field, value))
    }

    pub fn range(self, field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        self.push(Filter::range(field, min, max))
    }

    pub fn any_of(self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.push(Filter::any_of(field, values))
    }

    pub fn contains(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(Filter::contains(field, value))
    }

    pub fn starts_with(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(Filter::starts_with(field, value))
    }

    /// Build filter with AND semantics (all constraints must match)
    pub fn build_and(mut self) -> Filter {
        if self.nodes.len() == 1 {
            Filter::new(self.nodes.remove(0))
        } else {
            // Empty AND matches everything
            Filter::new(FilterNode::And(self.nodes))
        }
    }

    /// Build filter with OR semantics (any constraint can match)
    pub fn build_or(mut self) -> Filter {
        match self.nodes.len() {
            0 => Filter::all(),
            1 => Filter::new(self.nodes.remove(0)),
            _ => Filter::new(FilterNode::Or(self.nodes)),
        }
    }
}
