// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deferred queries and paginated enumeration.
//!
//! Building a [`RecordQuery`] performs no I/O. A [`RecordPager`] compiles it
//! once (so translation errors surface before the first round trip) and then
//! walks the result set one `LIMIT offset count` window at a time:
//!
//! ```text
//! window = min(page_size, limit - yielded)
//! fetch  ──▶ rows < window ?  done
//!        └─▶ yielded == limit ? done
//!        └─▶ offset += window, fetch again when the buffer drains
//! ```
//!
//! Keys already yielded are skipped, so a record that shifts between windows
//! while the result set changes is returned once.

use std::collections::{HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::hydrate::{dehydrate, hydrate_hit, record_from_map, record_to_map};
use super::{Collection, Record};
use crate::connection::{AsyncConnection, Command, Connection, Reply};
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::query::{CompiledQuery, Filter, FilterNode, PredicateCompiler, SearchCommand, SortBy};

/// Filter, order, window and projection for an enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub filter: FilterNode,
    pub sort: Option<SortBy>,
    /// Rows to skip before the first one returned
    pub offset: usize,
    /// Caps the total number of records returned
    pub limit: Option<usize>,
    /// Rows per round trip; the collection default when unset
    pub page_size: Option<usize>,
    /// Dotted properties to load; whole records when empty
    pub projection: Vec<String>,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            filter: Filter::all().root,
            sort: None,
            offset: 0,
            limit: None,
            page_size: None,
            projection: Vec::new(),
        }
    }
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// AND another condition onto the query.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = match self.filter {
            FilterNode::And(ref children) if children.is_empty() => filter.root,
            existing => FilterNode::And(vec![existing, filter.root]),
        };
        self
    }

    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn project<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = properties.into_iter().map(Into::into).collect();
        self
    }
}

/// Lazily paged sequence of records. Borrows its collection mutably so every
/// hydrated record lands in the collection's tracking table.
pub struct RecordPager<'c, T: Record, C: ?Sized> {
    collection: &'c mut Collection<T, C>,
    search: SearchCommand,
    compiled: CompiledQuery,
    page_size: usize,
    limit: Option<usize>,
    offset: usize,
    yielded: usize,
    fetches: usize,
    buffer: VecDeque<T>,
    seen: HashSet<String>,
    done: bool,
    cancel: Option<CancellationToken>,
}

impl<'c, T: Record, C: ?Sized> RecordPager<'c, T, C> {
    pub(crate) fn new(collection: &'c mut Collection<T, C>, query: RecordQuery) -> Result<Self> {
        let page_size = query.page_size.unwrap_or(collection.config.default_page_size);
        if page_size == 0 {
            return Err(SearchError::translation("page size must be at least 1"));
        }

        let mut compiler = PredicateCompiler::new(&collection.index);
        if let Some(ref alias) = collection.config.score_alias {
            compiler = compiler.default_score_alias(alias);
        }
        let compiled = compiler.compile(&query.filter)?;

        let mut search = SearchCommand::new(query.filter).dialect(collection.config.dialect);
        if let Some(sort) = query.sort {
            search = search.sort_by(sort);
        }
        if !query.projection.is_empty() {
            search = search.project(query.projection);
        }
        // Fail on a bad sort field or projection now rather than mid-enumeration
        search.build_compiled(&collection.index, &compiled)?;

        Ok(Self {
            collection,
            search,
            compiled,
            page_size,
            limit: query.limit,
            offset: query.offset,
            yielded: 0,
            fetches: 0,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            done: query.limit == Some(0),
            cancel: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Round trips issued so far.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    pub fn is_exhausted(&self) -> bool {
        self.done && self.buffer.is_empty()
    }

    /// Next window to fetch, or `None` when enumeration is complete.
    fn next_request(&mut self) -> Result<Option<(Command, usize)>> {
        if self.done {
            return Ok(None);
        }
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            self.done = true;
            return Err(SearchError::Cancelled);
        }
        let window = match self.limit {
            Some(limit) => self.page_size.min(limit.saturating_sub(self.yielded)),
            None => self.page_size,
        };
        if window == 0 {
            self.done = true;
            return Ok(None);
        }
        let command = self
            .search
            .clone()
            .limit(self.offset, window)
            .build_compiled(&self.collection.index, &self.compiled)?;
        Ok(Some((command, window)))
    }

    fn accept(&mut self, reply: Reply, window: usize) -> Result<()> {
        self.fetches += 1;
        let page = self.search.parse(reply)?;
        let rows = page.hits.len();
        metrics::record_page_fetch(rows, window);
        debug!(
            index = %self.collection.index.index_name,
            offset = self.offset,
            window,
            rows,
            "Fetched page"
        );

        self.offset += window;
        if rows < window {
            self.done = true;
        }

        let projected = !self.search.projection.is_empty();
        let schema = &self.collection.schema;
        for hit in page.hits {
            if self.limit.is_some_and(|limit| self.yielded >= limit) {
                break;
            }
            if !self.seen.insert(hit.key.clone()) {
                continue;
            }
            // Expired between indexing and the read
            if hit.fields.is_empty() {
                debug!(key = %hit.key, "Skipping hit without fields");
                continue;
            }
            let key = hit.key.clone();
            let map = hydrate_hit(hit, schema)?;
            let record: T = record_from_map(map)?;
            // Partial records would make the next save delete unloaded fields
            if !projected {
                let snapshot = dehydrate(&record_to_map(&record)?, schema)?;
                self.collection.state.track(key, snapshot, record.clone());
            }
            self.buffer.push_back(record);
            self.yielded += 1;
        }
        if self.limit.is_some_and(|limit| self.yielded >= limit) {
            self.done = true;
        }
        self.collection.report_tracked();
        Ok(())
    }

    fn fail(&mut self, err: SearchError) -> SearchError {
        self.done = true;
        err
    }
}

impl<'c, T: Record, C: AsyncConnection + ?Sized> RecordPager<'c, T, C> {
    /// Fetch the next window. `false` once nothing more can be fetched.
    async fn fetch_async(&mut self) -> Result<bool> {
        let Some((command, window)) = self.next_request()? else {
            return Ok(false);
        };
        let reply = match self.collection.connection.execute_async(&command).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e)),
        };
        self.accept(reply, window).map_err(|e| self.fail(e))?;
        Ok(true)
    }

    pub async fn next_async(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            if !self.fetch_async().await? {
                return Ok(None);
            }
        }
    }

    /// Next page of records as fetched, `None` when exhausted.
    pub async fn next_page_async(&mut self) -> Result<Option<Vec<T>>> {
        loop {
            if !self.buffer.is_empty() {
                return Ok(Some(self.buffer.drain(..).collect()));
            }
            if !self.fetch_async().await? {
                return Ok(None);
            }
        }
    }

    pub async fn to_vec_async(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(page) = self.next_page_async().await? {
            out.extend(page);
        }
        Ok(out)
    }
}

impl<'c, T: Record, C: Connection + ?Sized> RecordPager<'c, T, C> {
    fn fetch(&mut self) -> Result<bool> {
        let Some((command, window)) = self.next_request()? else {
            return Ok(false);
        };
        let reply = self
            .collection
            .connection
            .execute(&command)
            .map_err(|e| self.fail(e))?;
        self.accept(reply, window).map_err(|e| self.fail(e))?;
        Ok(true)
    }

    pub fn next_page(&mut self) -> Result<Option<Vec<T>>> {
        loop {
            if !self.buffer.is_empty() {
                return Ok(Some(self.buffer.drain(..).collect()));
            }
            if !self.fetch()? {
                return Ok(None);
            }
        }
    }

    pub fn to_vec(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(page) = self.next_page()? {
            out.extend(page);
        }
        Ok(out)
    }
}

impl<'c, T: Record, C: Connection + ?Sized> Iterator for RecordPager<'c, T, C> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            match self.fetch() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::tests::{person_page, Person};
    use crate::connection::memory::RecordingConnection;
    use std::sync::Arc;

    fn limits(conn: &RecordingConnection) -> Vec<(String, String)> {
        conn.commands()
            .iter()
            .filter(|c| c.name == "FT.SEARCH")
            .map(|c| {
                let args = c.text_args();
                let at = args.iter().position(|a| a == "LIMIT").unwrap();
                (args[at + 1].clone(), args[at + 2].clone())
            })
            .collect()
    }

    fn server(total: usize) -> RecordingConnection {
        RecordingConnection::with_responder(move |cmd| {
            let args = cmd.text_args();
            let at = args.iter().position(|a| a == "LIMIT").unwrap();
            let offset: usize = args[at + 1].parse().unwrap();
            let count: usize = args[at + 2].parse().unwrap();
            let end = (offset + count).min(total);
            Ok(person_page(total, offset.min(end)..end))
        })
    }

    #[test]
    fn test_query_building_is_pure() {
        let query = RecordQuery::new()
            .filter(Filter::gt("Age", 20))
            .filter(Filter::eq("Name", "Ada"))
            .limit(5);
        assert!(matches!(query.filter, FilterNode::And(ref c) if c.len() == 2));
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn test_limit_issues_ceil_pages() {
        let conn = Arc::new(server(100));
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        let pager = people.pager(RecordQuery::new().limit(25).page_size(10)).unwrap();
        let records = pager.to_vec().unwrap();

        assert_eq!(records.len(), 25);
        assert_eq!(
            limits(&conn),
            vec![
                ("0".into(), "10".into()),
                ("10".into(), "10".into()),
                ("20".into(), "5".into())
            ]
        );
        let ages: Vec<i64> = records.iter().map(|p| p.age).collect();
        assert_eq!(ages, (0..25).collect::<Vec<_>>());
        assert_eq!(people.tracked_len(), 25);
    }

    #[test]
    fn test_short_page_stops_enumeration() {
        let conn = Arc::new(server(7));
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        let records = people
            .pager(RecordQuery::new().page_size(5))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(records.len(), 7);
        assert_eq!(conn.count("FT.SEARCH"), 2);
    }

    #[test]
    fn test_limit_larger_than_results() {
        let conn = Arc::new(server(3));
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        let records = people
            .pager(RecordQuery::new().limit(50).page_size(10))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(conn.count("FT.SEARCH"), 1);
    }

    #[test]
    fn test_duplicates_across_pages_are_dropped() {
        let conn = Arc::new(RecordingConnection::new());
        conn.push_reply(person_page(4, 0..2));
        // The set shifted: row 1 shows up again
        conn.push_reply(person_page(4, 1..3));
        conn.push_reply(person_page(4, 3..4));
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        let ages: Vec<i64> = people
            .pager(RecordQuery::new().page_size(2))
            .unwrap()
            .map(|r| r.map(|p| p.age))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(ages, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_translation_error_before_any_round_trip() {
        let conn = Arc::new(RecordingConnection::new());
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        assert!(people
            .pager(RecordQuery::new().filter(Filter::gt("Name", 3)))
            .is_err());
        assert!(people
            .pager(RecordQuery::new().sort_by(SortBy::asc("Nickname")))
            .is_err());
        assert!(conn.commands().is_empty());
    }

    #[test]
    fn test_projection_is_not_tracked() {
        let conn = Arc::new(RecordingConnection::new());
        conn.push_reply(person_page(1, 0..1));
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        let records = people
            .pager(RecordQuery::new().project(["Name", "Age"]))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(people.tracked_len(), 0);
        let line = conn.commands()[0].text_args().join(" ");
        assert!(line.contains("RETURN 2 Name Age"));
    }

    #[test]
    fn test_hits_without_fields_are_skipped() {
        let conn = Arc::new(RecordingConnection::new());
        conn.push_reply(Reply::Array(vec![
            Reply::Integer(3),
            Reply::text("Person:0"),
            Reply::Array(vec![Reply::text("Name"), Reply::text("P0"), Reply::text("Age"), Reply::text("0")]),
            Reply::text("Person:1"),
            Reply::Nil,
            Reply::text("Person:2"),
            Reply::Array(vec![]),
        ]));
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        let records = people
            .pager(RecordQuery::new().page_size(10))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "P0");
        assert_eq!(people.tracked_len(), 1);
        assert!(people.tracked("Person:1").is_none());
    }

    #[tokio::test]
    async fn test_async_pages() {
        let conn = Arc::new(server(12));
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        let mut pager = people.pager(RecordQuery::new().page_size(5)).unwrap();
        let mut sizes = Vec::new();
        while let Some(page) = pager.next_page_async().await.unwrap() {
            sizes.push(page.len());
        }
        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(pager.fetches(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_checked_before_round_trip() {
        let conn = Arc::new(server(12));
        let token = CancellationToken::new();
        let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
        let mut pager = people
            .pager(RecordQuery::new().page_size(5))
            .unwrap()
            .with_cancellation(token.clone());
        assert!(pager.next_async().await.unwrap().is_some());
        token.cancel();
        for _ in 0..4 {
            assert!(pager.next_async().await.unwrap().is_some());
        }
        assert!(matches!(pager.next_async().await, Err(SearchError::Cancelled)));
        assert_eq!(conn.count("FT.SEARCH"), 1);
    }
}
