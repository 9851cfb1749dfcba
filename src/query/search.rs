// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `FT.SEARCH` command construction and reply parsing.
//!
//! ```text
//! FT.SEARCH person-idx "@Age:[(20 65]"
//!     [NOCONTENT] [VERBATIM] [WITHSCORES]
//!     [RETURN n field…] [SORTBY f ASC|DESC] [LIMIT offset count]
//!     [PARAMS n name value…] DIALECT 2
//! ```
//!
//! RESP2 reply: `[total, key1, [f1, v1, …], key2, […], …]`, with a score
//! after each key under `WITHSCORES` and no field arrays under `NOCONTENT`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::compiler::{CompiledQuery, PredicateCompiler};
use super::filter::FilterNode;
use crate::connection::{Command, Reply};
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::schema::{IndexDescriptor, StorageType};

pub const DEFAULT_DIALECT: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Ascending => write!(f, "ASC"),
            SortDirection::Descending => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

impl SortBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Options for one `FT.SEARCH` round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCommand {
    pub filter: FilterNode,
    pub sort: Option<SortBy>,
    pub offset: usize,
    pub count: Option<usize>,
    /// Dotted property paths to project; empty returns whole records
    pub projection: Vec<String>,
    pub nocontent: bool,
    pub verbatim: bool,
    pub with_scores: bool,
    pub dialect: u32,
    pub score_alias: Option<String>,
}

impl SearchCommand {
    pub fn new(filter: FilterNode) -> Self {
        Self {
            filter,
            sort: None,
            offset: 0,
            count: None,
            projection: Vec::new(),
            nocontent: false,
            verbatim: false,
            with_scores: false,
            dialect: DEFAULT_DIALECT,
            score_alias: None,
        }
    }

    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, offset: usize, count: usize) -> Self {
        self.offset = offset;
        self.count = Some(count);
        self
    }

    pub fn project(mut self, properties: Vec<String>) -> Self {
        self.projection = properties;
        self
    }

    /// Keys only.
    pub fn nocontent(mut self) -> Self {
        self.nocontent = true;
        self
    }

    /// Skip stemming of query terms.
    pub fn verbatim(mut self) -> Self {
        self.verbatim = true;
        self
    }

    pub fn with_scores(mut self) -> Self {
        self.with_scores = true;
        self
    }

    pub fn dialect(mut self, dialect: u32) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn default_score_alias(mut self, alias: impl Into<String>) -> Self {
        self.score_alias = Some(alias.into());
        self
    }

    /// Compile the filter and assemble the command.
    pub fn build(&self, index: &IndexDescriptor) -> Result<Command> {
        let mut compiler = PredicateCompiler::new(index);
        if let Some(ref alias) = self.score_alias {
            compiler = compiler.default_score_alias(alias);
        }
        let compiled = compiler.compile(&self.filter)?;
        self.build_compiled(index, &compiled)
    }

    pub(crate) fn build_compiled(&self, index: &IndexDescriptor, compiled: &CompiledQuery) -> Result<Command> {
        let mut cmd = Command::new("FT.SEARCH")
            .arg(&index.index_name)
            .arg(&compiled.text);

        if self.nocontent {
            cmd.push("NOCONTENT");
        }
        if self.verbatim {
            cmd.push("VERBATIM");
        }
        if self.with_scores {
            cmd.push("WITHSCORES");
        }

        if !self.projection.is_empty() && !self.nocontent {
            let mut fields = Vec::new();
            for property in &self.projection {
                match index.storage {
                    StorageType::Json => {
                        fields.push(format!("$.{}", property));
                        fields.push("AS".to_string());
                        fields.push(property.clone());
                    }
                    StorageType::Hash => fields.push(property.clone()),
                }
            }
            cmd.push("RETURN");
            cmd.push(fields.len());
            cmd.extend(fields);
        }

        let sort = match (&self.sort, &compiled.score_alias) {
            (Some(sort), score) => {
                let field = if score.as_deref() == Some(sort.field.as_str()) {
                    sort.field.clone()
                } else {
                    index.require(&sort.field)?.name.clone()
                };
                Some((field, sort.direction))
            }
            // Nearest neighbours first
            (None, Some(score)) => Some((score.clone(), SortDirection::Ascending)),
            (None, None) => None,
        };
        if let Some((field, direction)) = sort {
            cmd.push("SORTBY");
            cmd.push(field);
            cmd.push(direction.to_string());
        }

        if let Some(count) = self.count {
            cmd.push("LIMIT");
            cmd.push(self.offset);
            cmd.push(count);
        }

        cmd.extend(compiled.param_args());
        cmd.push("DIALECT");
        cmd.push(self.dialect.to_string());
        Ok(cmd)
    }

    /// Parse a reply to a command built from these options.
    pub fn parse(&self, reply: Reply) -> Result<SearchPage> {
        parse_search_reply(reply, self.nocontent, self.with_scores)
    }
}

/// One matching record.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub key: String,
    pub score: Option<f64>,
    pub fields: Vec<(String, Reply)>,
}

impl SearchHit {
    pub fn get(&self, field: &str) -> Option<&Reply> {
        self.fields.iter().find(|(name, _)| name == field).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage {
    /// Total matches on the server, independent of LIMIT
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

pub fn parse_search_reply(reply: Reply, nocontent: bool, with_scores: bool) -> Result<SearchPage> {
    let mut items = reply.into_array()?.into_iter();
    let total = items
        .next()
        .and_then(|r| r.as_i64())
        .ok_or_else(|| SearchError::protocol("search reply does not start with a total"))?;

    let mut hits = Vec::new();
    while let Some(key) = items.next() {
        let key = key
            .to_text()
            .ok_or_else(|| SearchError::protocol("search reply has a non-string key"))?;
        let score = if with_scores {
            let score = items
                .next()
                .and_then(|r| r.as_f64())
                .ok_or_else(|| SearchError::protocol(format!("missing score for '{}'", key)))?;
            Some(score)
        } else {
            None
        };
        let fields = if nocontent {
            Vec::new()
        } else {
            match items.next() {
                Some(Reply::Array(values)) => pair_up(values)?,
                // Key expired between indexing and the read
                Some(Reply::Nil) => Vec::new(),
                other => {
                    return Err(SearchError::protocol(format!(
                        "expected field array for '{}', got {:?}",
                        key, other
                    )))
                }
            }
        };
        hits.push(SearchHit { key, score, fields });
    }

    metrics::record_search_results(hits.len());
    Ok(SearchPage {
        total: total.max(0) as u64,
        hits,
    })
}

/// `[k1, v1, k2, v2]` into pairs.
pub(crate) fn pair_up(values: Vec<Reply>) -> Result<Vec<(String, Reply)>> {
    if values.len() % 2 != 0 {
        return Err(SearchError::protocol("field array has an odd number of entries"));
    }
    let mut out = Vec::with_capacity(values.len() / 2);
    let mut iter = values.into_iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        let name = name
            .to_text()
            .ok_or_else(|| SearchError::protocol("field name is not a string"))?;
        out.push((name, value));
    }
    Ok(out)
}
