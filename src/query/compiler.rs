// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Predicate compiler
//!
//! Translates a [`FilterNode`] tree into RediSearch query syntax against an
//! [`IndexDescriptor`]. Pure: no connection, no shared state.
//!
//! # RediSearch Query Syntax
//!
//! ```text
//! @field:value              - TEXT token
//! @field:(a b)              - TEXT phrase
//! @field:*value*            - Contains
//! @field:prefix*            - Prefix match
//! @field:%value%            - Fuzzy match (Levenshtein distance 1)
//! @field:{value}            - TAG membership
//! @field:[(20 65]           - Numeric interval, `(` marks an exclusive bound
//! @field:[lon lat r km]     - Geo radius
//! query1 query2             - AND (implicit)
//! query1 | query2           - OR
//! -(query)                  - NOT
//! (base)=>[KNN k @v $p0 AS score] - Vector similarity
//! ```
//!
//! Vector blobs never appear in the query text; they are returned as
//! parameters and must be sent with `PARAMS` and `DIALECT 2`.

use tracing::debug;

use super::filter::{CompareOp, FilterNode, GeoLoc, GeoUnit, Literal, VectorValue};
use crate::connection::CommandArg;
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::schema::{FieldDescriptor, FieldKind, IndexDescriptor};
use crate::vector::encode_floats;

/// Query text plus the parameters it references.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub text: String,
    /// `(name, value)` in placeholder order
    pub params: Vec<(String, CommandArg)>,
    /// Score column produced by a KNN clause
    pub score_alias: Option<String>,
}

impl CompiledQuery {
    /// `PARAMS n k v …`, empty when there are no parameters.
    pub fn param_args(&self) -> Vec<CommandArg> {
        if self.params.is_empty() {
            return Vec::new();
        }
        let mut args = Vec::with_capacity(2 + self.params.len() * 2);
        args.push(CommandArg::from("PARAMS"));
        args.push(CommandArg::from(self.params.len() * 2));
        for (name, value) in &self.params {
            args.push(CommandArg::from(name));
            args.push(value.clone());
        }
        args
    }
}

/// RediSearch predicate compiler
pub struct PredicateCompiler<'a> {
    index: &'a IndexDescriptor,
    score_alias: Option<String>,
}

impl<'a> PredicateCompiler<'a> {
    pub fn new(index: &'a IndexDescriptor) -> Self {
        Self {
            index,
            score_alias: None,
        }
    }

    /// Score alias for KNN clauses that don't name one. Defaults to `{field}_score`.
    pub fn default_score_alias(mut self, alias: impl Into<String>) -> Self {
        self.score_alias = Some(alias.into());
        self
    }

    /// Compile a filter tree.
    pub fn compile(&self, root: &FilterNode) -> Result<CompiledQuery> {
        let result = self.compile_inner(root);
        match result {
            Ok(ref compiled) => {
                debug!(index = %self.index.index_name, query = %compiled.text, params = compiled.params.len(), "Compiled predicate");
            }
            Err(ref e) => {
                metrics::record_compile_error("predicate");
                debug!(index = %self.index.index_name, error = %e, "Predicate compilation failed");
            }
        }
        result
    }

    fn compile_inner(&self, root: &FilterNode) -> Result<CompiledQuery> {
        let mut members = Vec::new();
        flatten(root, true, &mut members);

        let (knn, rest): (Vec<&FilterNode>, Vec<&FilterNode>) = members
            .into_iter()
            .partition(|n| matches!(n, FilterNode::VectorKnn { .. }));
        if knn.len() > 1 {
            return Err(SearchError::translation("a query may contain at most one KNN clause"));
        }

        let mut emitter = Emitter {
            index: self.index,
            params: Vec::new(),
        };
        let base = emitter.emit_and(&rest, true)?;

        let Some(FilterNode::VectorKnn {
            field,
            k,
            vector,
            score_alias,
        }) = knn.first().copied()
        else {
            return Ok(CompiledQuery {
                text: base,
                params: emitter.params,
                score_alias: None,
            });
        };

        let descriptor = self.index.require(field)?;
        if descriptor.kind != FieldKind::Vector {
            return Err(SearchError::translation(format!(
                "KNN requires a VECTOR field, '{}' is {}",
                descriptor.name, descriptor.kind
            )));
        }
        if *k == 0 {
            return Err(SearchError::translation("KNN k must be greater than zero"));
        }
        let blob = vector_blob(descriptor, vector)?;
        let param = format!("p{}", emitter.params.len());
        emitter.params.push((param.clone(), CommandArg::Blob(blob)));

        let alias = score_alias
            .clone()
            .or_else(|| self.score_alias.clone())
            .unwrap_or_else(|| format!("{}_score", descriptor.name));

        Ok(CompiledQuery {
            text: format!(
                "({})=>[KNN {} @{} ${} AS {}]",
                base,
                k,
                escape_field_name(&descriptor.name),
                param,
                alias
            ),
            params: emitter.params,
            score_alias: Some(alias),
        })
    }
}

/// Shorthand for `PredicateCompiler::new(index).compile(node)`.
pub fn compile(index: &IndexDescriptor, node: &FilterNode) -> Result<CompiledQuery> {
    PredicateCompiler::new(index).compile(node)
}

/// Lift same-operator children so `(a && b) && c` becomes `[a, b, c]`.
pub(crate) fn flatten<'n>(node: &'n FilterNode, and: bool, out: &mut Vec<&'n FilterNode>) {
    match node {
        FilterNode::And(children) if and => {
            for child in children {
                flatten(child, true, out);
            }
        }
        FilterNode::Or(children) if !and => {
            for child in children {
                flatten(child, false, out);
            }
        }
        other => out.push(other),
    }
}

fn vector_blob(descriptor: &FieldDescriptor, vector: &VectorValue) -> Result<Vec<u8>> {
    let params = descriptor.vector.as_ref().ok_or_else(|| {
        SearchError::translation(format!("vector field '{}' has no metadata", descriptor.name))
    })?;
    match vector {
        VectorValue::Blob(blob) => match params.blob_len() {
            Some(expected) if expected != blob.len() => Err(SearchError::translation(format!(
                "vector blob for '{}' is {} bytes, expected {}",
                descriptor.name,
                blob.len(),
                expected
            ))),
            _ => Ok(blob.clone()),
        },
        VectorValue::Floats(values) => match params.dimensions {
            Some(dims) if dims != values.len() => Err(SearchError::translation(format!(
                "vector for '{}' has {} elements, expected {}",
                descriptor.name,
                values.len(),
                dims
            ))),
            _ => Ok(encode_floats(values, params.element_type)),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bound {
    Unbounded,
    Inclusive(f64),
    Exclusive(f64),
}

/// Numeric interval accumulated across one AND chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Interval {
    lower: Bound,
    upper: Bound,
}

impl Interval {
    fn from_op(op: CompareOp, value: f64) -> Option<Self> {
        let (lower, upper) = match op {
            CompareOp::Eq => (Bound::Inclusive(value), Bound::Inclusive(value)),
            CompareOp::Gt => (Bound::Exclusive(value), Bound::Unbounded),
            CompareOp::Ge => (Bound::Inclusive(value), Bound::Unbounded),
            CompareOp::Lt => (Bound::Unbounded, Bound::Exclusive(value)),
            CompareOp::Le => (Bound::Unbounded, Bound::Inclusive(value)),
            CompareOp::Ne => return None,
        };
        Some(Self { lower, upper })
    }

    fn intersect(&mut self, other: Interval) {
        self.lower = tighter(self.lower, other.lower, true);
        self.upper = tighter(self.upper, other.upper, false);
    }

    fn render(&self) -> String {
        let lower = match self.lower {
            Bound::Unbounded => "-inf".to_string(),
            Bound::Inclusive(v) => format_number(v),
            Bound::Exclusive(v) => format!("({}", format_number(v)),
        };
        let upper = match self.upper {
            Bound::Unbounded => "inf".to_string(),
            Bound::Inclusive(v) => format_number(v),
            Bound::Exclusive(v) => format!("({}", format_number(v)),
        };
        format!("[{} {}]", lower, upper)
    }
}

fn tighter(a: Bound, b: Bound, lower: bool) -> Bound {
    let value = |bound: Bound| match bound {
        Bound::Inclusive(v) | Bound::Exclusive(v) => Some(v),
        Bound::Unbounded => None,
    };
    match (value(a), value(b)) {
        (None, _) => b,
        (_, None) => a,
        (Some(x), Some(y)) if x == y => {
            if matches!(a, Bound::Exclusive(_)) {
                a
            } else {
                b
            }
        }
        (Some(x), Some(y)) => {
            if (lower && x > y) || (!lower && x < y) {
                a
            } else {
                b
            }
        }
    }
}

/// Render a number the way RediSearch reads it.
pub(crate) fn format_number(v: f64) -> String {
    if v == f64::INFINITY {
        "inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        v.to_string()
    }
}

enum Member<'n> {
    Node(&'n FilterNode),
    Range(&'n str, Interval),
}

struct Emitter<'a> {
    index: &'a IndexDescriptor,
    params: Vec<(String, CommandArg)>,
}

impl<'a> Emitter<'a> {
    fn emit(&mut self, node: &FilterNode, top: bool) -> Result<String> {
        match node {
            FilterNode::And(_) => {
                let mut members = Vec::new();
                flatten(node, true, &mut members);
                self.emit_and(&members, top)
            }
            FilterNode::Or(_) => {
                let mut members = Vec::new();
                flatten(node, false, &mut members);
                if members.is_empty() {
                    return Err(SearchError::translation("OR needs at least one alternative"));
                }
                let parts = members
                    .iter()
                    .map(|m| self.emit(m, members.len() == 1 && top))
                    .collect::<Result<Vec<_>>>()?;
                Ok(join(parts, " | ", top))
            }
            FilterNode::Not(inner) => Ok(format!("-({})", self.emit(inner, true)?)),
            FilterNode::Compare { field, op, value } => self.emit_compare(field, *op, value),
            FilterNode::Contains { field, value } => self.emit_wildcard(field, value, true, true),
            FilterNode::StartsWith { field, value } => self.emit_wildcard(field, value, false, true),
            FilterNode::EndsWith { field, value } => self.emit_wildcard(field, value, true, false),
            FilterNode::Fuzzy { field, value } => {
                let descriptor = self.kind_of(field, &[FieldKind::Text], "fuzzy match")?;
                Ok(format!(
                    "@{}:%{}%",
                    escape_field_name(&descriptor.name),
                    escape_value(value)
                ))
            }
            FilterNode::CollectionContains { field, value } => {
                let descriptor = self.kind_of(field, &[FieldKind::Tag], "collection membership")?;
                Ok(format!(
                    "@{}:{{{}}}",
                    escape_field_name(&descriptor.name),
                    tag_literal(value)
                ))
            }
            FilterNode::AnyOf { field, values } => {
                let descriptor = self.kind_of(field, &[FieldKind::Tag], "tag set membership")?;
                if values.is_empty() {
                    return Err(SearchError::translation(format!(
                        "tag set for '{}' is empty",
                        descriptor.name
                    )));
                }
                let tags = values.iter().map(|t| escape_tag(t)).collect::<Vec<_>>().join("|");
                Ok(format!("@{}:{{{}}}", escape_field_name(&descriptor.name), tags))
            }
            FilterNode::GeoWithin {
                field,
                center,
                radius,
                unit,
            } => self.emit_geo(field, *center, *radius, *unit),
            FilterNode::VectorKnn { .. } => Err(SearchError::translation(
                "KNN must be a top-level clause, not nested under OR or NOT",
            )),
            FilterNode::Raw(text) => {
                if top {
                    Ok(text.clone())
                } else {
                    Ok(format!("({})", text))
                }
            }
        }
    }

    fn emit_and(&mut self, members: &[&FilterNode], top: bool) -> Result<String> {
        let mut merged: Vec<Member<'_>> = Vec::with_capacity(members.len());
        for node in members {
            if let FilterNode::Compare { field, op, value } = node {
                let descriptor = self.index.require(field)?;
                if descriptor.kind == FieldKind::Numeric {
                    if let Some(interval) = Interval::from_op(*op, numeric_literal(descriptor, value)?) {
                        let existing = merged.iter_mut().find_map(|m| match m {
                            Member::Range(name, range) if *name == descriptor.name => Some(range),
                            _ => None,
                        });
                        match existing {
                            Some(range) => range.intersect(interval),
                            None => merged.push(Member::Range(&descriptor.name, interval)),
                        }
                        continue;
                    }
                }
            }
            merged.push(Member::Node(node));
        }

        let single = merged.len() == 1;
        let parts = merged
            .into_iter()
            .map(|member| match member {
                Member::Node(node) => self.emit(node, single && top),
                Member::Range(name, interval) => {
                    Ok(format!("@{}:{}", escape_field_name(name), interval.render()))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        if parts.is_empty() {
            return Ok("*".to_string());
        }
        Ok(join(parts, " ", top))
    }

    fn kind_of(&self, field: &str, allowed: &[FieldKind], what: &str) -> Result<&'a FieldDescriptor> {
        let descriptor = self.index.require(field)?;
        if allowed.contains(&descriptor.kind) {
            Ok(descriptor)
        } else {
            Err(SearchError::translation(format!(
                "{} is not supported on {} field '{}'",
                what, descriptor.kind, descriptor.name
            )))
        }
    }

    fn emit_compare(&mut self, field: &str, op: CompareOp, value: &Literal) -> Result<String> {
        let descriptor = self.index.require(field)?;
        let name = escape_field_name(&descriptor.name);
        let negate = if op == CompareOp::Ne { "-" } else { "" };
        let unsupported = || {
            SearchError::translation(format!(
                "operator {} is not supported on {} field '{}'",
                op, descriptor.kind, descriptor.name
            ))
        };

        match descriptor.kind {
            FieldKind::Tag => match op {
                CompareOp::Eq | CompareOp::Ne => {
                    Ok(format!("{}@{}:{{{}}}", negate, name, tag_literal(value)))
                }
                _ => Err(unsupported()),
            },
            FieldKind::Text => match op {
                CompareOp::Eq | CompareOp::Ne => {
                    let token = match value {
                        Literal::Text(text) if text.contains(' ') => {
                            format!("({})", escape_special_chars(text))
                        }
                        Literal::Text(text) => escape_special_chars(text),
                        Literal::Number(n) => escape_value(&format_number(*n)),
                        Literal::Bool(b) => b.to_string(),
                    };
                    Ok(format!("{}@{}:{}", negate, name, token))
                }
                _ => Err(unsupported()),
            },
            FieldKind::Numeric => {
                let number = numeric_literal(descriptor, value)?;
                let interval = match Interval::from_op(op, number) {
                    Some(interval) => interval,
                    None => Interval::from_op(CompareOp::Eq, number).ok_or_else(unsupported)?,
                };
                Ok(format!("{}@{}:{}", negate, name, interval.render()))
            }
            FieldKind::Geo | FieldKind::Vector => Err(unsupported()),
        }
    }

    fn emit_wildcard(&mut self, field: &str, value: &str, leading: bool, trailing: bool) -> Result<String> {
        let descriptor = self.kind_of(field, &[FieldKind::Text, FieldKind::Tag], "wildcard match")?;
        let name = escape_field_name(&descriptor.name);
        let lead = if leading { "*" } else { "" };
        let trail = if trailing { "*" } else { "" };
        if descriptor.kind == FieldKind::Tag {
            Ok(format!("@{}:{{{}{}{}}}", name, lead, escape_tag(value), trail))
        } else {
            Ok(format!("@{}:{}{}{}", name, lead, escape_value(value), trail))
        }
    }

    fn emit_geo(&mut self, field: &str, center: GeoLoc, radius: f64, unit: GeoUnit) -> Result<String> {
        let descriptor = self.kind_of(field, &[FieldKind::Geo], "radius filter")?;
        if !(radius.is_finite() && radius >= 0.0) {
            return Err(SearchError::translation(format!(
                "invalid radius {} for '{}'",
                radius, descriptor.name
            )));
        }
        Ok(format!(
            "@{}:[{} {} {} {}]",
            escape_field_name(&descriptor.name),
            format_number(center.longitude),
            format_number(center.latitude),
            format_number(radius),
            unit
        ))
    }
}

fn join(parts: Vec<String>, separator: &str, top: bool) -> String {
    if parts.len() == 1 || top {
        parts.join(separator)
    } else {
        format!("({})", parts.join(separator))
    }
}

fn numeric_literal(descriptor: &FieldDescriptor, value: &Literal) -> Result<f64> {
    match value {
        Literal::Number(n) if n.is_nan() => Err(SearchError::translation(format!(
            "NaN is not a valid bound for '{}'",
            descriptor.name
        ))),
        Literal::Number(n) => Ok(*n),
        Literal::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Literal::Text(text) => Err(SearchError::translation(format!(
            "NUMERIC field '{}' cannot be compared with text '{}'",
            descriptor.name, text
        ))),
    }
}

fn tag_literal(value: &Literal) -> String {
    match value {
        Literal::Text(text) => escape_tag(text),
        Literal::Number(n) => escape_tag(&format_number(*n)),
        Literal::Bool(b) => b.to_string(),
    }
}

/// Aliases are word characters already; anything else is backslash-escaped.
pub(crate) fn escape_field_name(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        if !c.is_alphanumeric() && c != '_' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape every ASCII punctuation character except `_`; spaces stay as the
/// phrase separator.
pub(crate) fn escape_special_chars(value: &str) -> String {
    escape_with(value, false)
}

/// Single-term form: punctuation and spaces are both escaped.
pub(crate) fn escape_value(value: &str) -> String {
    escape_with(value, true)
}

fn escape_with(value: &str, spaces: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if (c.is_ascii_punctuation() && c != '_') || (spaces && c == ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Tag values: every punctuation character and space.
pub(crate) fn escape_tag(value: &str) -> String {
    let mut escaped = String::new();
    for c in value.chars() {
        if (c.is_ascii_punctuation() && c != '_') || c == ' ' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::Filter;
    use crate::schema::{FieldSpec, RecordSchema, StorageType};
    use crate::vector::{VectorElementType, VectorParams};

    fn person() -> IndexDescriptor {
        RecordSchema::new("Person", StorageType::Json)
            .field(FieldSpec::string("Name").searchable())
            .field(FieldSpec::string("Email").indexed())
            .field(FieldSpec::integer("Age").indexed().sortable())
            .field(FieldSpec::boolean("Active").indexed())
            .field(FieldSpec::integer("Rank").indexed())
            .field(FieldSpec::array(FieldSpec::string("Skills")).indexed())
            .field(FieldSpec::geo("Home").indexed())
            .field(FieldSpec::embedding("Embedding", VectorParams::flat(2)))
            .field(FieldSpec::object("Address", vec![FieldSpec::string("City").indexed()]).cascade(1))
            .build_descriptor()
            .unwrap()
    }

    fn text(filter: Filter) -> String {
        compile(&person(), &filter.root).unwrap().text
    }

    fn err(filter: Filter) -> SearchError {
        compile(&person(), &filter.root).unwrap_err()
    }

    #[test]
    fn test_tag_equality() {
        let query = text(Filter::eq("Email", "A"));
        assert_eq!(query, "@Email:{A}");
        assert_eq!(query.matches("{A}").count(), 1);
        assert_eq!(text(Filter::ne("Email", "A")), "-@Email:{A}");
    }

    #[test]
    fn test_tag_escaping() {
        assert_eq!(
            text(Filter::eq("Email", "user@example.com")),
            "@Email:{user\\@example\\.com}"
        );
        assert_eq!(text(Filter::eq("Email", "a b")), "@Email:{a\\ b}");
        assert_eq!(text(Filter::eq("Active", true)), "@Active:{true}");
    }

    #[test]
    fn test_tag_ordering_is_translation_error() {
        assert!(matches!(err(Filter::gt("Email", "A")), SearchError::Translation(_)));
    }

    #[test]
    fn test_text_tokens_and_phrases() {
        assert_eq!(text(Filter::eq("Name", "Alice")), "@Name:Alice");
        assert_eq!(text(Filter::eq("Name", "Alice Smith")), "@Name:(Alice Smith)");
        assert_eq!(text(Filter::ne("Name", "Bob")), "-@Name:Bob");
        assert_eq!(text(Filter::eq("Name", "12:30")), "@Name:12\\:30");
        assert!(err(Filter::lt("Name", "B")).is_compile_error());
    }

    #[test]
    fn test_text_escapes_all_punctuation() {
        assert_eq!(text(Filter::eq("Name", "$5")), "@Name:\\$5");
        assert_eq!(text(Filter::eq("Name", "~maybe")), "@Name:\\~maybe");
        assert_eq!(text(Filter::eq("Name", "a\\b")), "@Name:a\\\\b");
        assert_eq!(text(Filter::eq("Name", "snake_case")), "@Name:snake_case");
        assert_eq!(text(Filter::eq("Name", "O'Brien & co")), "@Name:(O\\'Brien \\& co)");
        assert_eq!(text(Filter::contains("Name", "O\"Brien")), "@Name:*O\\\"Brien*");
        assert_eq!(text(Filter::starts_with("Name", "a b")), "@Name:a\\ b*");
    }

    #[test]
    fn test_numeric_bounds() {
        assert_eq!(text(Filter::gt("Age", 20)), "@Age:[(20 inf]");
        assert_eq!(text(Filter::ge("Age", 20)), "@Age:[20 inf]");
        assert_eq!(text(Filter::lt("Age", 65)), "@Age:[-inf (65]");
        assert_eq!(text(Filter::le("Age", 65)), "@Age:[-inf 65]");
        assert_eq!(text(Filter::eq("Age", 30)), "@Age:[30 30]");
        assert_eq!(text(Filter::ne("Age", 30)), "-@Age:[30 30]");
        assert_eq!(text(Filter::eq("Age", 2.5)), "@Age:[2.5 2.5]");
    }

    #[test]
    fn test_numeric_range_merges_within_and() {
        assert_eq!(text(Filter::gt("Age", 20) & Filter::le("Age", 65)), "@Age:[(20 65]");
        assert_eq!(
            text(Filter::ge("Age", 20) & Filter::eq("Email", "x") & Filter::gt("Age", 20)),
            "@Age:[(20 inf] @Email:{x}"
        );
        assert_eq!(
            text(Filter::range("Age", Some(25.0), Some(40.0))),
            "@Age:[25 40]"
        );
    }

    #[test]
    fn test_numeric_rejects_text_literal() {
        assert!(matches!(err(Filter::gt("Age", "twenty")), SearchError::Translation(_)));
        assert_eq!(text(Filter::eq("Rank", true)), "@Rank:[1 1]");
    }

    #[test]
    fn test_and_or_not_flattening() {
        assert_eq!(
            text(Filter::eq("Name", "Alice") & Filter::eq("Email", "a") & Filter::eq("Skills", "rust")),
            "@Name:Alice @Email:{a} @Skills:{rust}"
        );
        assert_eq!(
            text(Filter::eq("Email", "a") | Filter::eq("Email", "b") | Filter::eq("Email", "c")),
            "@Email:{a} | @Email:{b} | @Email:{c}"
        );
        assert_eq!(text(!Filter::eq("Email", "a")), "-(@Email:{a})");
    }

    #[test]
    fn test_nested_composites_are_parenthesised() {
        let alice = Filter::eq("Name", "Alice") & Filter::range("Age", Some(25.0), Some(40.0));
        let bob = Filter::eq("Name", "Bob") & Filter::any_of("Skills", vec!["rust".into(), "go".into()]);
        assert_eq!(
            text(alice | bob),
            "(@Name:Alice @Age:[25 40]) | (@Name:Bob @Skills:{rust|go})"
        );

        let either = Filter::eq("Email", "a") | Filter::eq("Email", "b");
        assert_eq!(
            text(Filter::gt("Age", 1) & either),
            "@Age:[(1 inf] (@Email:{a} | @Email:{b})"
        );
    }

    #[test]
    fn test_empty_and_is_wildcard() {
        assert_eq!(text(Filter::all()), "*");
    }

    #[test]
    fn test_empty_or_is_translation_error() {
        let empty = compile(&person(), &FilterNode::Or(vec![])).unwrap_err();
        assert!(matches!(empty, SearchError::Translation(_)), "{empty:?}");
        let nested = FilterNode::And(vec![Filter::eq("Email", "a").root, FilterNode::Or(vec![])]);
        assert!(compile(&person(), &nested).is_err());
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(text(Filter::contains("Name", "data")), "@Name:*data*");
        assert_eq!(text(Filter::starts_with("Name", "adm")), "@Name:adm*");
        assert_eq!(text(Filter::ends_with("Name", "son")), "@Name:*son");
        assert_eq!(text(Filter::contains("Email", "ex")), "@Email:{*ex*}");
        assert_eq!(text(Filter::starts_with("Email", "ad")), "@Email:{ad*}");
        assert_eq!(text(Filter::ends_with("Email", "om")), "@Email:{*om}");
        assert_eq!(text(Filter::fuzzy("Name", "alice")), "@Name:%alice%");
        assert!(err(Filter::contains("Age", "1")).is_compile_error());
    }

    #[test]
    fn test_collection_membership() {
        assert_eq!(text(Filter::has("Skills", "rust")), "@Skills:{rust}");
        assert!(matches!(err(Filter::has("Age", 3)), SearchError::Translation(_)));
    }

    #[test]
    fn test_geo_radius() {
        assert_eq!(
            text(Filter::geo_within("Home", GeoLoc::new(-122.4, 37.7), 5.0, GeoUnit::Kilometers)),
            "@Home:[-122.4 37.7 5 km]"
        );
        assert!(err(Filter::eq("Home", 1)).is_compile_error());
    }

    #[test]
    fn test_nested_field_reference() {
        assert_eq!(text(Filter::eq("Address.City", "Paris")), "@Address_City:{Paris}");
        let nested = person().nested("Address").unwrap();
        let compiled = compile(&nested, &Filter::eq("City", "Paris").root).unwrap();
        assert_eq!(compiled.text, "@Address_City:{Paris}");
    }

    #[test]
    fn test_unknown_field_is_not_indexed() {
        assert!(matches!(err(Filter::eq("Nickname", "x")), SearchError::NotIndexed { .. }));
    }

    #[test]
    fn test_knn_alone() {
        let compiled = compile(&person(), &Filter::knn("Embedding", 3, vec![1.0, 2.0]).root).unwrap();
        assert_eq!(compiled.text, "(*)=>[KNN 3 @Embedding $p0 AS Embedding_score]");
        assert_eq!(compiled.score_alias.as_deref(), Some("Embedding_score"));
        assert_eq!(compiled.params.len(), 1);
        assert_eq!(
            compiled.params[0].1,
            CommandArg::Blob(encode_floats(&[1.0, 2.0], VectorElementType::Float32))
        );
        assert!(!compiled.text.contains('\u{0}'));
    }

    #[test]
    fn test_knn_with_prefilter() {
        let filter = Filter::knn_filtered(Filter::gt("Age", 20) & Filter::eq("Email", "a"), "Embedding", 5, vec![0.0, 1.0])
            .score_as("dist");
        let compiled = compile(&person(), &filter.root).unwrap();
        assert_eq!(
            compiled.text,
            "(@Age:[(20 inf] @Email:{a})=>[KNN 5 @Embedding $p0 AS dist]"
        );
        let args: Vec<String> = compiled.param_args().iter().map(|a| a.to_string()).collect();
        assert_eq!(args, vec!["PARAMS", "2", "p0", "<8 bytes>"]);
    }

    #[test]
    fn test_compiler_default_score_alias() {
        let index = person();
        let compiled = PredicateCompiler::new(&index)
            .default_score_alias("score")
            .compile(&Filter::knn("Embedding", 1, vec![0.0, 0.0]).root)
            .unwrap();
        assert!(compiled.text.ends_with("AS score]"));
    }

    #[test]
    fn test_knn_shape_errors() {
        let knn = || Filter::knn("Embedding", 3, vec![1.0, 2.0]);
        assert!(matches!(err(knn() | Filter::eq("Email", "a")), SearchError::Translation(_)));
        assert!(matches!(err(!knn()), SearchError::Translation(_)));
        assert!(matches!(err(knn() & knn()), SearchError::Translation(_)));
        assert!(matches!(err(Filter::knn("Embedding", 3, vec![1.0])), SearchError::Translation(_)));
        assert!(matches!(err(Filter::knn("Age", 3, vec![1.0, 2.0])), SearchError::Translation(_)));
        assert!(matches!(err(Filter::knn("Embedding", 0, vec![1.0, 2.0])), SearchError::Translation(_)));
        assert!(matches!(err(Filter::eq("Embedding", 1)), SearchError::Translation(_)));
    }

    #[test]
    fn test_knn_blob_length_checked() {
        let node = FilterNode::VectorKnn {
            field: "Embedding".into(),
            k: 1,
            vector: VectorValue::Blob(vec![0; 3]),
            score_alias: None,
        };
        assert!(compile(&person(), &node).is_err());
    }

    #[test]
    fn test_raw_passthrough() {
        assert_eq!(text(Filter::raw("@Age:[1 2]")), "@Age:[1 2]");
        assert_eq!(
            text(Filter::raw("@Age:[1 2]") | Filter::eq("Email", "a")),
            "(@Age:[1 2]) | @Email:{a}"
        );
    }

    #[test]
    fn test_empty_tag_set_fails() {
        assert!(err(Filter::any_of("Skills", vec![])).is_compile_error());
    }
}
