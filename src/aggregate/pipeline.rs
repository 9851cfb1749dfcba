// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pipeline builder and `FT.AGGREGATE` compiler.
//!
//! # Example
//!
//! ```rust
//! use record_search::aggregate::{Pipeline, Reducer};
//! use record_search::schema::{FieldSpec, RecordSchema, StorageType};
//!
//! let index = RecordSchema::new("Person", StorageType::Json)
//!     .field(FieldSpec::array(FieldSpec::string("Skills")).indexed())
//!     .build_descriptor()
//!     .unwrap();
//!
//! let compiled = Pipeline::new()
//!     .group_by(["Skills"])
//!     .reduce(Reducer::Count)
//!     .compile(&index)
//!     .unwrap();
//! assert_eq!(
//!     compiled.command.text_args().join(" "),
//!     "person-idx * GROUPBY 1 @Skills REDUCE COUNT 0 AS COUNT"
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::expr::{filter_expression, Expr};
use super::stage::{AggregationStage, Reduce, Reducer};
use crate::connection::Command;
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::query::compiler::format_number;
use crate::query::{Filter, FilterNode, PredicateCompiler, SortBy};
use crate::schema::IndexDescriptor;

/// Names visible to a stage: indexed fields until the first GROUPBY, then
/// only the group keys, plus every alias produced so far.
#[derive(Clone)]
pub(crate) struct Scope<'a> {
    index: &'a IndexDescriptor,
    produced: HashSet<String>,
    grouped: Option<HashSet<String>>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(index: &'a IndexDescriptor) -> Self {
        Self {
            index,
            produced: HashSet::new(),
            grouped: None,
        }
    }

    /// Resolve a reference to the name the engine knows it by.
    pub(crate) fn resolve(&self, reference: &str) -> Result<String> {
        let reference = reference.strip_prefix('@').unwrap_or(reference);
        if self.produced.contains(reference) {
            return Ok(reference.to_string());
        }
        match self.grouped {
            None => Ok(self.index.require(reference)?.name.clone()),
            Some(ref keys) => {
                let name = match self.index.field(reference) {
                    Some(field) => field.name.clone(),
                    None => reference.to_string(),
                };
                if keys.contains(&name) {
                    Ok(name)
                } else if self.index.field(reference).is_none() {
                    Err(SearchError::not_indexed(reference))
                } else {
                    Err(SearchError::translation(format!(
                        "field '{}' is not available after GROUPBY",
                        reference
                    )))
                }
            }
        }
    }

    pub(crate) fn field_ref(&self, reference: &str) -> Result<String> {
        Ok(format!("@{}", self.resolve(reference)?))
    }

    fn produce(&mut self, alias: &str) {
        self.produced.insert(alias.to_string());
    }

    fn group(&mut self, keys: Vec<String>) {
        self.produced.clear();
        self.grouped = Some(keys.into_iter().collect());
    }
}

/// Ordered stage list plus execution options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub stages: Vec<AggregationStage>,
    /// Rows per cursor page; `None` returns everything in one reply
    pub cursor: Option<usize>,
    pub verbatim: bool,
    pub dialect: Option<u32>,
}

/// Output of [`Pipeline::compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledAggregation {
    pub command: Command,
    /// Aliases produced by REDUCE and APPLY stages, in order
    pub aliases: Vec<String>,
    pub cursor: Option<usize>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: AggregationStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn filter(self, filter: Filter) -> Self {
        self.stage(AggregationStage::Filter(filter.root))
    }

    pub fn group_by<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stage(AggregationStage::GroupBy(fields.into_iter().map(Into::into).collect()))
    }

    pub fn reduce(self, reducer: Reducer) -> Self {
        self.stage(AggregationStage::Reduce(reducer.into()))
    }

    pub fn reduce_as(self, reducer: Reducer, alias: impl Into<String>) -> Self {
        self.stage(AggregationStage::Reduce(Reduce {
            reducer,
            alias: Some(alias.into()),
        }))
    }

    pub fn apply(self, expr: Expr, alias: impl Into<String>) -> Self {
        self.stage(AggregationStage::Apply {
            expr,
            alias: alias.into(),
        })
    }

    pub fn sort_by(self, fields: Vec<SortBy>, max: Option<usize>) -> Self {
        self.stage(AggregationStage::SortBy { fields, max })
    }

    pub fn limit(self, offset: usize, count: usize) -> Self {
        self.stage(AggregationStage::Limit { offset, count })
    }

    pub fn load<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stage(AggregationStage::Load(fields.into_iter().map(Into::into).collect()))
    }

    /// Read results through a server-side cursor, `count` rows at a time.
    pub fn with_cursor(mut self, count: usize) -> Self {
        self.cursor = Some(count);
        self
    }

    pub fn verbatim(mut self) -> Self {
        self.verbatim = true;
        self
    }

    pub fn dialect(mut self, dialect: u32) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Compile to `FT.AGGREGATE` arguments. Nothing is sent.
    pub fn compile(&self, index: &IndexDescriptor) -> Result<CompiledAggregation> {
        let result = self.compile_inner(index);
        match result {
            Ok(ref compiled) => debug!(index = %index.index_name, command = %compiled.command, "Compiled pipeline"),
            Err(ref e) => {
                metrics::record_compile_error("aggregate");
                debug!(index = %index.index_name, error = %e, "Pipeline compilation failed");
            }
        }
        result
    }

    fn compile_inner(&self, index: &IndexDescriptor) -> Result<CompiledAggregation> {
        // Filters ahead of the first transformation narrow the base query
        let leading = self
            .stages
            .iter()
            .take_while(|s| matches!(s, AggregationStage::Filter(_)))
            .count();
        let mut base: Vec<FilterNode> = self.stages[..leading]
            .iter()
            .filter_map(|s| match s {
                AggregationStage::Filter(node) => Some(node.clone()),
                _ => None,
            })
            .collect();
        let base = if base.len() == 1 {
            base.remove(0)
        } else {
            FilterNode::And(base)
        };
        let query = PredicateCompiler::new(index).compile(&base)?;

        let mut cmd = Command::new("FT.AGGREGATE")
            .arg(&index.index_name)
            .arg(&query.text);
        if self.verbatim {
            cmd.push("VERBATIM");
        }

        let mut scope = Scope::new(index);
        if let Some(ref alias) = query.score_alias {
            scope.produce(alias);
        }
        let mut aliases = Vec::new();
        let mut previous: Option<&AggregationStage> = None;
        // Reducers read the rows entering the current GROUPBY
        let mut group_input: Option<Scope<'_>> = None;

        for stage in &self.stages[leading..] {
            match stage {
                AggregationStage::GroupBy(fields) => {
                    let keys = fields
                        .iter()
                        .map(|f| scope.resolve(f))
                        .collect::<Result<Vec<_>>>()?;
                    group_input = Some(scope.clone());
                    cmd.push("GROUPBY");
                    cmd.push(keys.len());
                    cmd.extend(keys.iter().map(|k| format!("@{}", k)));
                    scope.group(keys);
                }
                AggregationStage::Reduce(reduce) => {
                    let grouped = matches!(
                        previous,
                        Some(AggregationStage::GroupBy(_)) | Some(AggregationStage::Reduce(_))
                    );
                    if !grouped {
                        group_input = Some(scope.clone());
                        cmd.push("GROUPBY");
                        cmd.push("0");
                        scope.group(Vec::new());
                    }
                    let args = reducer_args(&reduce.reducer, group_input.as_ref().unwrap_or(&scope))?;
                    let alias = reduce.alias();
                    cmd.push("REDUCE");
                    cmd.push(reduce.reducer.function());
                    cmd.push(args.len());
                    cmd.extend(args);
                    cmd.push("AS");
                    cmd.push(&alias);
                    scope.produce(&alias);
                    aliases.push(alias);
                }
                AggregationStage::Apply { expr, alias } => {
                    let compiled = expr.compile(&scope)?;
                    cmd.push("APPLY");
                    cmd.push(compiled);
                    cmd.push("AS");
                    cmd.push(alias);
                    scope.produce(alias);
                    aliases.push(alias.clone());
                }
                AggregationStage::Filter(node) => {
                    cmd.push("FILTER");
                    cmd.push(filter_expression(node, &scope, true)?);
                }
                AggregationStage::SortBy { fields, max } => {
                    if fields.is_empty() {
                        return Err(SearchError::translation("SORTBY stage has no fields"));
                    }
                    cmd.push("SORTBY");
                    cmd.push(fields.len() * 2);
                    for sort in fields {
                        cmd.push(scope.field_ref(&sort.field)?);
                        cmd.push(sort.direction.to_string());
                    }
                    if let Some(max) = max {
                        cmd.push("MAX");
                        cmd.push(*max);
                    }
                }
                AggregationStage::Limit { offset, count } => {
                    cmd.push("LIMIT");
                    cmd.push(*offset);
                    cmd.push(*count);
                }
                AggregationStage::Load(fields) => {
                    if fields.is_empty() {
                        return Err(SearchError::translation("LOAD stage has no fields"));
                    }
                    let refs = fields
                        .iter()
                        .map(|f| scope.field_ref(f))
                        .collect::<Result<Vec<_>>>()?;
                    cmd.push("LOAD");
                    cmd.push(refs.len());
                    cmd.extend(refs);
                }
            }
            previous = Some(stage);
        }

        if !query.params.is_empty() || self.dialect.is_some() {
            cmd.extend(query.param_args());
            cmd.push("DIALECT");
            cmd.push(self.dialect.unwrap_or(2).to_string());
        }

        if let Some(count) = self.cursor {
            if count == 0 {
                return Err(SearchError::translation("cursor page size must be at least 1"));
            }
            cmd.push("WITHCURSOR");
            cmd.push("COUNT");
            cmd.push(count);
        }

        Ok(CompiledAggregation {
            command: cmd,
            aliases,
            cursor: self.cursor,
        })
    }
}

fn reducer_args(reducer: &Reducer, scope: &Scope<'_>) -> Result<Vec<String>> {
    let field = match reducer.field() {
        Some(field) => scope.field_ref(field)?,
        None => return Ok(Vec::new()),
    };
    Ok(match reducer {
        Reducer::Quantile(_, q) => {
            if !(0.0..=1.0).contains(q) {
                return Err(SearchError::translation(format!(
                    "quantile {} is outside 0..=1",
                    q
                )));
            }
            vec![field, format_number(*q)]
        }
        Reducer::RandomSample(_, size) => vec![field, size.to_string()],
        Reducer::FirstValue { by: Some((by, direction)), .. } => {
            vec![field, "BY".to_string(), scope.field_ref(by)?, direction.to_string()]
        }
        _ => vec![field],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortDirection;
    use crate::schema::{FieldSpec, RecordSchema, StorageType};
    use crate::vector::VectorParams;

    fn person() -> IndexDescriptor {
        RecordSchema::new("Person", StorageType::Json)
            .field(FieldSpec::string("Name").searchable().sortable())
            .field(FieldSpec::integer("Age").indexed().aggregatable())
            .field(FieldSpec::string("Department").indexed())
            .field(FieldSpec::array(FieldSpec::string("Skills")).indexed())
            .field(FieldSpec::embedding("Embedding", VectorParams::flat(2)))
            .build_descriptor()
            .unwrap()
    }

    fn line(pipeline: Pipeline) -> String {
        pipeline.compile(&person()).unwrap().command.text_args().join(" ")
    }

    #[test]
    fn test_group_by_count() {
        let compiled = Pipeline::new()
            .group_by(["Skills"])
            .reduce(Reducer::Count)
            .compile(&person())
            .unwrap();
        assert_eq!(compiled.command.name, "FT.AGGREGATE");
        assert_eq!(
            compiled.command.text_args().join(" "),
            "person-idx * GROUPBY 1 @Skills REDUCE COUNT 0 AS COUNT"
        );
        assert_eq!(compiled.aliases, vec!["COUNT"]);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let pipeline = Pipeline::new()
            .group_by(["Department"])
            .reduce(Reducer::Avg("Age".into()));
        assert_eq!(pipeline.compile(&person()).unwrap(), pipeline.compile(&person()).unwrap());
    }

    #[test]
    fn test_multiple_reducers_and_sort() {
        assert_eq!(
            line(
                Pipeline::new()
                    .group_by(["Department"])
                    .reduce(Reducer::Avg("Age".into()))
                    .reduce_as(Reducer::Max("Age".into()), "oldest")
                    .sort_by(vec![SortBy::desc("Age_AVG")], Some(10))
                    .limit(0, 5)
            ),
            "person-idx * GROUPBY 1 @Department REDUCE AVG 1 @Age AS Age_AVG \
             REDUCE MAX 1 @Age AS oldest SORTBY 2 @Age_AVG DESC MAX 10 LIMIT 0 5"
        );
    }

    #[test]
    fn test_reduce_without_group_by() {
        assert_eq!(
            line(Pipeline::new().reduce(Reducer::Sum("Age".into()))),
            "person-idx * GROUPBY 0 REDUCE SUM 1 @Age AS Age_SUM"
        );
        assert_eq!(
            line(
                Pipeline::new()
                    .apply(Expr::field("Age") * Expr::number(2), "Double")
                    .reduce(Reducer::Max("Double".into()))
            ),
            "person-idx * APPLY @Age * 2 AS Double GROUPBY 0 REDUCE MAX 1 @Double AS Double_MAX"
        );
    }

    #[test]
    fn test_reducer_arguments() {
        assert_eq!(
            line(
                Pipeline::new()
                    .group_by(["Department"])
                    .reduce(Reducer::Quantile("Age".into(), 0.5))
                    .reduce(Reducer::RandomSample("Name".into(), 3))
                    .reduce(Reducer::FirstValue {
                        field: "Name".into(),
                        by: Some(("Age".into(), SortDirection::Descending)),
                    })
            ),
            "person-idx * GROUPBY 1 @Department REDUCE QUANTILE 2 @Age 0.5 AS Age_QUANTILE \
             REDUCE RANDOM_SAMPLE 2 @Name 3 AS Name_RANDOM_SAMPLE \
             REDUCE FIRST_VALUE 4 @Name BY @Age DESC AS Name_FIRST_VALUE"
        );
        assert!(Pipeline::new()
            .reduce(Reducer::Quantile("Age".into(), 1.5))
            .compile(&person())
            .is_err());
    }

    #[test]
    fn test_leading_filters_fold_into_query() {
        assert_eq!(
            line(
                Pipeline::new()
                    .filter(Filter::gt("Age", 20))
                    .filter(Filter::le("Age", 65))
                    .group_by(["Department"])
                    .reduce(Reducer::Count)
                    .filter(Filter::gt("COUNT", 1))
            ),
            "person-idx @Age:[(20 65] GROUPBY 1 @Department REDUCE COUNT 0 AS COUNT FILTER @COUNT > 1"
        );
    }

    #[test]
    fn test_fields_after_group_by() {
        let err = Pipeline::new()
            .group_by(["Department"])
            .reduce(Reducer::Count)
            .sort_by(vec![SortBy::asc("Age")], None)
            .compile(&person())
            .unwrap_err();
        assert!(matches!(err, SearchError::Translation(_)));

        let err = Pipeline::new()
            .group_by(["Nickname"])
            .compile(&person())
            .unwrap_err();
        assert!(matches!(err, SearchError::NotIndexed { .. }));

        let err = Pipeline::new()
            .apply(Expr::field("Missing"), "x")
            .compile(&person())
            .unwrap_err();
        assert!(matches!(err, SearchError::NotIndexed { .. }));
    }

    #[test]
    fn test_load_and_apply() {
        assert_eq!(
            line(
                Pipeline::new()
                    .load(["Name", "Age"])
                    .apply(Expr::field("Name").upper(), "Upper")
                    .sort_by(vec![SortBy::asc("Upper")], None)
            ),
            "person-idx * LOAD 2 @Name @Age APPLY upper(@Name) AS Upper SORTBY 2 @Upper ASC"
        );
    }

    #[test]
    fn test_cursor_and_params() {
        assert_eq!(
            line(Pipeline::new().group_by(["Skills"]).reduce(Reducer::Count).with_cursor(100)),
            "person-idx * GROUPBY 1 @Skills REDUCE COUNT 0 AS COUNT WITHCURSOR COUNT 100"
        );
        assert_eq!(
            line(
                Pipeline::new()
                    .filter(Filter::knn("Embedding", 3, vec![1.0, 0.0]))
                    .sort_by(vec![SortBy::asc("Embedding_score")], None)
            ),
            "person-idx (*)=>[KNN 3 @Embedding $p0 AS Embedding_score] \
             SORTBY 2 @Embedding_score ASC PARAMS 2 p0 <8 bytes> DIALECT 2"
        );
        assert!(Pipeline::new().with_cursor(0).compile(&person()).is_err());
    }

    #[test]
    fn test_empty_stages_are_errors() {
        assert!(Pipeline::new().sort_by(vec![], None).compile(&person()).is_err());
        assert!(Pipeline::new().load(Vec::<String>::new()).compile(&person()).is_err());
    }

    #[test]
    fn test_group_by_nothing() {
        assert_eq!(
            line(Pipeline::new().group_by(Vec::<String>::new()).reduce(Reducer::Count)),
            "person-idx * GROUPBY 0 REDUCE COUNT 0 AS COUNT"
        );
    }
}
