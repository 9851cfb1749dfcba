// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Aggregation stages and reducers.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::expr::Expr;
use crate::query::{FilterNode, SortBy, SortDirection};

/// `REDUCE` functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reducer {
    Count,
    CountDistinct(String),
    /// Approximate distinct count (HyperLogLog)
    CountDistinctish(String),
    Sum(String),
    Min(String),
    Max(String),
    Avg(String),
    StdDev(String),
    /// Quantile in `0.0..=1.0`
    Quantile(String, f64),
    ToList(String),
    /// First value of `field`, optionally ordered by another field
    FirstValue {
        field: String,
        by: Option<(String, SortDirection)>,
    },
    RandomSample(String, usize),
}

impl Reducer {
    pub fn function(&self) -> &'static str {
        match self {
            Reducer::Count => "COUNT",
            Reducer::CountDistinct(_) => "COUNT_DISTINCT",
            Reducer::CountDistinctish(_) => "COUNT_DISTINCTISH",
            Reducer::Sum(_) => "SUM",
            Reducer::Min(_) => "MIN",
            Reducer::Max(_) => "MAX",
            Reducer::Avg(_) => "AVG",
            Reducer::StdDev(_) => "STDDEV",
            Reducer::Quantile(..) => "QUANTILE",
            Reducer::ToList(_) => "TOLIST",
            Reducer::FirstValue { .. } => "FIRST_VALUE",
            Reducer::RandomSample(..) => "RANDOM_SAMPLE",
        }
    }

    /// Field the reducer reads, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Reducer::Count => None,
            Reducer::CountDistinct(f)
            | Reducer::CountDistinctish(f)
            | Reducer::Sum(f)
            | Reducer::Min(f)
            | Reducer::Max(f)
            | Reducer::Avg(f)
            | Reducer::StdDev(f)
            | Reducer::Quantile(f, _)
            | Reducer::ToList(f)
            | Reducer::RandomSample(f, _) => Some(f),
            Reducer::FirstValue { field, .. } => Some(field),
        }
    }

    /// `COUNT`, or `{field}_{FUNCTION}` with any `@` and dots made word-safe.
    pub fn default_alias(&self) -> String {
        match self.field() {
            None => self.function().to_string(),
            Some(field) => format!(
                "{}_{}",
                field.trim_start_matches('@').replace('.', "_"),
                self.function()
            ),
        }
    }
}

/// One `REDUCE` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reduce {
    pub reducer: Reducer,
    pub alias: Option<String>,
}

impl Reduce {
    pub fn alias(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.reducer.default_alias())
    }
}

impl From<Reducer> for Reduce {
    fn from(reducer: Reducer) -> Self {
        Self { reducer, alias: None }
    }
}

/// Pipeline stage, serialized in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregationStage {
    GroupBy(Vec<String>),
    Reduce(Reduce),
    Apply { expr: Expr, alias: String },
    Filter(FilterNode),
    SortBy { fields: Vec<SortBy>, max: Option<usize> },
    Limit { offset: usize, count: usize },
    Load(Vec<String>),
}

impl AggregationStage {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationStage::GroupBy(_) => "GROUPBY",
            AggregationStage::Reduce(_) => "REDUCE",
            AggregationStage::Apply { .. } => "APPLY",
            AggregationStage::Filter(_) => "FILTER",
            AggregationStage::SortBy { .. } => "SORTBY",
            AggregationStage::Limit { .. } => "LIMIT",
            AggregationStage::Load(_) => "LOAD",
        }
    }
}

impl fmt::Display for AggregationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
