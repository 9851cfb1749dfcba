// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed record collections.
//!
//! A [`Collection`] binds one record type to its index and to an injected
//! connection. Everything that decides *what* to send (compiling filters,
//! assigning ids, diffing snapshots) happens without I/O; the async
//! (`*_async`) and blocking drivers only execute the resulting commands.
//!
//! ```text
//! query() ─▶ RecordQuery ─▶ pager() ─▶ FT.SEARCH … LIMIT off n ─▶ hydrate ─▶ track
//! insert()/update() ─▶ full write            (HSET all / JSON.SET $)
//! save()            ─▶ diff vs snapshot      (HSET+HDEL / JSON.SET+JSON.DEL sub-paths)
//! delete()          ─▶ UNLINK + forget snapshot
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use record_search::collection::{Collection, Record};
//! use record_search::connection::redis::RedisConnection;
//! use record_search::query::Filter;
//! use record_search::schema::{FieldSpec, RecordSchema, StorageType};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Person {
//!     #[serde(rename = "Id", default)]
//!     id: String,
//!     #[serde(rename = "Name")]
//!     name: String,
//!     #[serde(rename = "Age")]
//!     age: i64,
//! }
//!
//! impl Record for Person {
//!     fn schema() -> RecordSchema {
//!         RecordSchema::new("Person", StorageType::Json)
//!             .field(FieldSpec::string("Name").searchable())
//!             .field(FieldSpec::integer("Age").indexed().sortable())
//!     }
//! }
//!
//! # async fn run() -> record_search::Result<()> {
//! let connection = Arc::new(RedisConnection::connect("redis://127.0.0.1:6379").await?);
//! let mut people = Collection::<Person, _>::new(connection)?;
//! people.create_index_async().await?;
//!
//! let mut ada = Person { name: "Ada".into(), age: 36, ..Default::default() };
//! people.insert_async(&mut ada).await?;
//!
//! let query = people.query().filter(Filter::gt("Age", 20) & Filter::le("Age", 65));
//! for mut person in people.pager(query)?.to_vec_async().await? {
//!     person.age += 1;
//!     people.save_async(&mut person).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod hydrate;
pub mod ids;
pub mod pager;
pub mod state;

pub use ids::{IdGenerator, IdStrategy};
pub use pager::{RecordPager, RecordQuery};
pub use state::{Snapshot, StateManager, TrackedEntity, WriteKind, WritePlan};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregate::{AggregationCursor, BlockingAggregationCursor, CursorState, Pipeline};
use crate::config::SearchConfig;
use crate::connection::{AsyncConnection, Command, Connection, Reply};
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::query::search::pair_up;
use crate::query::{Filter, FilterNode, SearchCommand};
use crate::schema::{IndexDescriptor, RecordSchema, SchemaRegistry, StorageType};
use hydrate::{dehydrate, hydrate_hash, hydrate_json, inject_id, record_from_map, record_to_map};
use ids::{generator_for, id_text, is_default_id};

/// A type that can be stored in a collection.
///
/// The record serializes to a JSON object whose members follow the schema's
/// field names; the id member (`Id` unless the schema says otherwise) should
/// be present so generated ids survive the round trip.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn schema() -> RecordSchema;
}

pub struct Collection<T: Record, C: ?Sized> {
    connection: Arc<C>,
    schema: RecordSchema,
    index: Arc<IndexDescriptor>,
    config: SearchConfig,
    ids: Option<Box<dyn IdGenerator>>,
    state: StateManager<T>,
}

impl<T: Record, C: ?Sized> Collection<T, C> {
    pub fn new(connection: Arc<C>) -> Result<Self> {
        Self::with_config(connection, SearchConfig::default())
    }

    pub fn with_config(connection: Arc<C>, config: SearchConfig) -> Result<Self> {
        let schema = T::schema();
        let index = Arc::new(schema.build_descriptor()?);
        Self::assemble(connection, schema, index, config)
    }

    /// Register the record type in `registry` and share its descriptor.
    pub fn registered(connection: Arc<C>, registry: &SchemaRegistry, config: SearchConfig) -> Result<Self> {
        let schema = T::schema();
        let index = registry.register(&schema)?;
        Self::assemble(connection, schema, index, config)
    }

    fn assemble(
        connection: Arc<C>,
        schema: RecordSchema,
        index: Arc<IndexDescriptor>,
        config: SearchConfig,
    ) -> Result<Self> {
        config.validate()?;
        debug!(record = %schema.name, index = %index.index_name, "Collection ready");
        Ok(Self {
            connection,
            ids: generator_for(schema.id_strategy),
            schema,
            index,
            config,
            state: StateManager::new(),
        })
    }

    /// Replace the id generator picked from the schema's strategy.
    ///
    /// ```ignore
    /// // Resume a counter past the highest id already stored.
    /// let customers = Collection::<Customer, _>::new(conn)?
    ///     .with_id_generator(Box::new(CounterIds::starting_after(highest)));
    /// ```
    pub fn with_id_generator(mut self, generator: Box<dyn IdGenerator>) -> Self {
        self.ids = Some(generator);
        self
    }

    pub fn index(&self) -> &Arc<IndexDescriptor> {
        &self.index
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Start a query. Nothing is sent until a pager is driven.
    pub fn query(&self) -> RecordQuery {
        RecordQuery::new()
    }

    /// Pager over `query`. Compilation errors surface here, before any I/O.
    pub fn pager(&mut self, query: RecordQuery) -> Result<RecordPager<'_, T, C>> {
        RecordPager::new(self, query)
    }

    pub fn key_for(&self, id: &str) -> String {
        format!("{}:{}", self.index.key_prefix(), id)
    }

    /// Key of an already identified record.
    pub fn key_of(&self, record: &T) -> Result<String> {
        let map = record_to_map(record)?;
        self.existing_key(&map)
            .ok_or_else(|| SearchError::schema(format!("{} record has no id", self.schema.name)))
    }

    fn existing_key(&self, map: &Map<String, Value>) -> Option<String> {
        let id = map.get(&self.schema.id_field).filter(|v| !is_default_id(v))?;
        id_text(id).map(|id| self.key_for(&id))
    }

    pub fn tracked(&self, key: &str) -> Option<&T> {
        self.state.get(key)
    }

    /// Live tracked record; changes are written by [`save_all`](Self::save_all)
    /// or [`save_all_async`](Self::save_all_async).
    pub fn tracked_mut(&mut self, key: &str) -> Option<&mut T> {
        self.state.get_mut(key)
    }

    pub fn tracked_len(&self) -> usize {
        self.state.len()
    }

    pub fn state(&self) -> &StateManager<T> {
        &self.state
    }

    /// Stop tracking `key` without touching the store.
    pub fn forget(&mut self, key: &str) -> bool {
        let removed = self.state.remove(key).is_some();
        self.report_tracked();
        removed
    }

    fn report_tracked(&self) {
        metrics::set_tracked_entities(&self.index.record, self.state.len());
    }

    /// Key and encoded form, assigning a fresh id when the id field is unset.
    fn identify(&self, record: &mut T) -> Result<(String, Map<String, Value>)> {
        let mut map = record_to_map(record)?;
        if let Some(key) = self.existing_key(&map) {
            return Ok((key, map));
        }
        let generator = self.ids.as_ref().ok_or_else(|| {
            SearchError::schema(format!("{} records need a caller-supplied id", self.schema.name))
        })?;
        let id = generator.next_id();
        let value = match map.get(&self.schema.id_field) {
            Some(Value::Number(_)) => id.parse::<u64>().map(Value::from).map_err(|_| {
                SearchError::schema(format!(
                    "generated id '{}' does not fit the numeric field '{}'",
                    id, self.schema.id_field
                ))
            })?,
            _ => Value::String(id.clone()),
        };
        map.insert(self.schema.id_field.clone(), value);
        *record = record_from_map(map.clone())?;
        Ok((self.key_for(&id), map))
    }

    fn plan_insert(&self, record: &mut T) -> Result<WritePlan> {
        let (key, map) = self.identify(record)?;
        Ok(self.state.plan_full(&key, dehydrate(&map, &self.schema)?))
    }

    fn plan_update(&self, record: &T) -> Result<WritePlan> {
        let map = record_to_map(record)?;
        let key = self
            .existing_key(&map)
            .ok_or_else(|| SearchError::schema(format!("{} record has no id to update", self.schema.name)))?;
        Ok(self.state.plan_full(&key, dehydrate(&map, &self.schema)?))
    }

    fn plan_save(&self, record: &mut T) -> Result<WritePlan> {
        let (key, map) = self.identify(record)?;
        Ok(self.state.plan_diff(&key, dehydrate(&map, &self.schema)?))
    }

    /// Plans for every tracked record whose live value differs from its snapshot.
    fn plan_dirty(&self) -> Result<Vec<(WritePlan, T)>> {
        let mut plans = Vec::new();
        for entity in self.state.iter() {
            let map = record_to_map(&entity.record)?;
            let plan = self.state.plan_diff(&entity.key, dehydrate(&map, &self.schema)?);
            if !plan.is_empty() {
                plans.push((plan, entity.record.clone()));
            }
        }
        Ok(plans)
    }

    fn commit(&mut self, plan: WritePlan, record: T) -> usize {
        let sent = plan.commands.len();
        if sent > 0 {
            metrics::record_write(plan.kind.as_str(), plan.fields);
            debug!(key = %plan.key, kind = plan.kind.as_str(), fields = plan.fields, "Wrote record");
        }
        self.state.commit(plan, record);
        self.report_tracked();
        sent
    }

    fn fetch_command(&self, key: &str) -> Command {
        match self.index.storage {
            StorageType::Hash => Command::new("HGETALL").arg(key),
            StorageType::Json => Command::new("JSON.GET").arg(key),
        }
    }

    fn accept_fetched(&mut self, key: &str, reply: Reply) -> Result<Option<T>> {
        let mut map = match (self.index.storage, reply) {
            (_, Reply::Nil) => return Ok(None),
            (StorageType::Hash, Reply::Array(items)) if items.is_empty() => return Ok(None),
            (StorageType::Hash, reply) => hydrate_hash(pair_up(reply.into_array()?)?, &self.schema)?,
            (StorageType::Json, reply) => {
                let document = reply
                    .to_text()
                    .ok_or_else(|| SearchError::protocol(format!("JSON.GET {} returned {:?}", key, reply)))?;
                hydrate_json(&document, &self.schema)?
            }
        };
        inject_id(&mut map, key, &self.schema);
        let record: T = record_from_map(map)?;
        let snapshot = dehydrate(&record_to_map(&record)?, &self.schema)?;
        self.state.track(key, snapshot, record.clone());
        self.report_tracked();
        Ok(Some(record))
    }

    fn search_command(&self, filter: FilterNode) -> SearchCommand {
        let command = SearchCommand::new(filter).dialect(self.config.dialect);
        match self.config.score_alias {
            Some(ref alias) => command.default_score_alias(alias),
            None => command,
        }
    }

    fn count_command(&self, filter: Filter) -> SearchCommand {
        self.search_command(filter.root).nocontent().limit(0, 0)
    }

    fn unlink_command(&self, key: &str) -> Command {
        Command::new("UNLINK").arg(key)
    }

    fn accept_unlink(&mut self, key: &str, reply: Reply) -> bool {
        self.state.remove(key);
        self.report_tracked();
        metrics::record_write("delete", 1);
        reply.as_i64().unwrap_or(0) > 0
    }

    fn cursor_state(&self, pipeline: &Pipeline) -> Result<CursorState> {
        let compiled = pipeline.compile(&self.index)?;
        Ok(CursorState::new(self.index.index_name.clone(), compiled))
    }

    /// Cursor mode at the configured page size unless the pipeline picked one.
    fn streaming_state(&self, pipeline: &Pipeline) -> Result<CursorState> {
        match pipeline.cursor {
            Some(_) => self.cursor_state(pipeline),
            None => self.cursor_state(&pipeline.clone().with_cursor(self.config.cursor_page_size)),
        }
    }

    fn accept_create(&self, result: Result<Reply>) -> Result<bool> {
        match result {
            Ok(_) => {
                metrics::record_index_operation("create", true);
                info!(index = %self.index.index_name, "Created index");
                Ok(true)
            }
            Err(SearchError::Protocol(msg)) if msg.to_lowercase().contains("index already exists") => {
                metrics::record_index_operation("create", true);
                info!(index = %self.index.index_name, "Index already exists");
                Ok(false)
            }
            Err(e) => {
                metrics::record_index_operation("create", false);
                Err(e)
            }
        }
    }

    fn accept_drop(&mut self, result: Result<Reply>, delete_documents: bool) -> Result<bool> {
        match result {
            Ok(_) => {
                metrics::record_index_operation("drop", true);
                info!(index = %self.index.index_name, delete_documents, "Dropped index");
                if delete_documents {
                    self.state.clear();
                    self.report_tracked();
                }
                Ok(true)
            }
            Err(SearchError::Protocol(msg)) if is_unknown_index(&msg) => {
                metrics::record_index_operation("drop", true);
                info!(index = %self.index.index_name, "Index was not present");
                Ok(false)
            }
            Err(e) => {
                metrics::record_index_operation("drop", false);
                Err(e)
            }
        }
    }
}

fn is_unknown_index(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("unknown index name") || msg.contains("no such index")
}

impl<T: Record, C: AsyncConnection + ?Sized> Collection<T, C> {
    async fn run_async(&mut self, plan: WritePlan, record: T) -> Result<usize> {
        for command in &plan.commands {
            self.connection.execute_async(command).await?;
        }
        Ok(self.commit(plan, record))
    }

    /// Write the whole record, assigning an id first when it has none.
    /// Returns the record's key.
    pub async fn insert_async(&mut self, record: &mut T) -> Result<String> {
        let plan = self.plan_insert(record)?;
        let key = plan.key.clone();
        self.run_async(plan, record.clone()).await?;
        Ok(key)
    }

    /// Write the whole record unconditionally.
    pub async fn update_async(&mut self, record: &T) -> Result<String> {
        let plan = self.plan_update(record)?;
        let key = plan.key.clone();
        self.run_async(plan, record.clone()).await?;
        Ok(key)
    }

    /// Write only what changed since the record was read or last written.
    /// Returns the number of commands sent (0 when nothing changed).
    pub async fn save_async(&mut self, record: &mut T) -> Result<usize> {
        let plan = self.plan_save(record)?;
        self.run_async(plan, record.clone()).await
    }

    /// Save every tracked record that was changed through
    /// [`tracked_mut`](Self::tracked_mut).
    pub async fn save_all_async(&mut self) -> Result<usize> {
        let mut sent = 0;
        for (plan, record) in self.plan_dirty()? {
            sent += self.run_async(plan, record).await?;
        }
        Ok(sent)
    }

    pub async fn delete_async(&mut self, record: &T) -> Result<bool> {
        let key = self.key_of(record)?;
        self.delete_key_async(&key).await
    }

    /// `UNLINK` the key and drop its snapshot. `true` if the key existed.
    pub async fn delete_key_async(&mut self, key: &str) -> Result<bool> {
        let reply = self.connection.execute_async(&self.unlink_command(key)).await?;
        Ok(self.accept_unlink(key, reply))
    }

    pub async fn find_by_id_async(&mut self, id: &str) -> Result<Option<T>> {
        let key = self.key_for(id);
        let reply = self.connection.execute_async(&self.fetch_command(&key)).await?;
        self.accept_fetched(&key, reply)
    }

    /// Number of matching records, without loading any.
    pub async fn count_async(&self, filter: Filter) -> Result<u64> {
        let search = self.count_command(filter);
        let command = search.build(&self.index)?;
        let reply = self.connection.execute_async(&command).await?;
        Ok(search.parse(reply)?.total)
    }

    pub async fn first_async(&mut self, query: RecordQuery) -> Result<Option<T>> {
        self.pager(query.limit(1))?.next_async().await
    }

    pub async fn fetch_all_async(&mut self, query: RecordQuery) -> Result<Vec<T>> {
        self.pager(query)?.to_vec_async().await
    }

    /// `FT.CREATE`. `false` when the index already existed.
    pub async fn create_index_async(&self) -> Result<bool> {
        let command = self.index.create_command()?;
        let result = self.connection.execute_async(&command).await;
        self.accept_create(result)
    }

    /// `FT.DROPINDEX [DD]`. `false` when there was no such index.
    pub async fn drop_index_async(&mut self, delete_documents: bool) -> Result<bool> {
        let command = self.index.drop_command(delete_documents);
        let result = self.connection.execute_async(&command).await;
        self.accept_drop(result, delete_documents)
    }

    /// Compile `pipeline` and return a reader over its rows. Nothing is sent
    /// until the first page is requested.
    pub fn aggregate_async(&self, pipeline: &Pipeline) -> Result<AggregationCursor<C>>
    where
        C: 'static,
    {
        Ok(AggregationCursor::new(
            Arc::clone(&self.connection),
            self.cursor_state(pipeline)?,
        ))
    }

    /// Like [`aggregate_async`](Self::aggregate_async), always reading
    /// through a server-side cursor.
    pub fn aggregate_streaming_async(&self, pipeline: &Pipeline) -> Result<AggregationCursor<C>>
    where
        C: 'static,
    {
        Ok(AggregationCursor::new(
            Arc::clone(&self.connection),
            self.streaming_state(pipeline)?,
        ))
    }
}

impl<T: Record, C: Connection + ?Sized> Collection<T, C> {
    fn run(&mut self, plan: WritePlan, record: T) -> Result<usize> {
        for command in &plan.commands {
            self.connection.execute(command)?;
        }
        Ok(self.commit(plan, record))
    }

    pub fn insert(&mut self, record: &mut T) -> Result<String> {
        let plan = self.plan_insert(record)?;
        let key = plan.key.clone();
        self.run(plan, record.clone())?;
        Ok(key)
    }

    pub fn update(&mut self, record: &T) -> Result<String> {
        let plan = self.plan_update(record)?;
        let key = plan.key.clone();
        self.run(plan, record.clone())?;
        Ok(key)
    }

    pub fn save(&mut self, record: &mut T) -> Result<usize> {
        let plan = self.plan_save(record)?;
        self.run(plan, record.clone())
    }

    pub fn save_all(&mut self) -> Result<usize> {
        let mut sent = 0;
        for (plan, record) in self.plan_dirty()? {
            sent += self.run(plan, record)?;
        }
        Ok(sent)
    }

    pub fn delete(&mut self, record: &T) -> Result<bool> {
        let key = self.key_of(record)?;
        self.delete_key(&key)
    }

    pub fn delete_key(&mut self, key: &str) -> Result<bool> {
        let reply = self.connection.execute(&self.unlink_command(key))?;
        Ok(self.accept_unlink(key, reply))
    }

    pub fn find_by_id(&mut self, id: &str) -> Result<Option<T>> {
        let key = self.key_for(id);
        let reply = self.connection.execute(&self.fetch_command(&key))?;
        self.accept_fetched(&key, reply)
    }

    pub fn count(&self, filter: Filter) -> Result<u64> {
        let search = self.count_command(filter);
        let reply = self.connection.execute(&search.build(&self.index)?)?;
        Ok(search.parse(reply)?.total)
    }

    pub fn first(&mut self, query: RecordQuery) -> Result<Option<T>> {
        self.pager(query.limit(1))?.next().transpose()
    }

    pub fn fetch_all(&mut self, query: RecordQuery) -> Result<Vec<T>> {
        self.pager(query)?.to_vec()
    }

    pub fn create_index(&self) -> Result<bool> {
        let result = self.connection.execute(&self.index.create_command()?);
        self.accept_create(result)
    }

    pub fn drop_index(&mut self, delete_documents: bool) -> Result<bool> {
        let result = self.connection.execute(&self.index.drop_command(delete_documents));
        self.accept_drop(result, delete_documents)
    }

    pub fn aggregate(&self, pipeline: &Pipeline) -> Result<BlockingAggregationCursor<C>> {
        Ok(BlockingAggregationCursor::new(
            Arc::clone(&self.connection),
            self.cursor_state(pipeline)?,
        ))
    }

    pub fn aggregate_streaming(&self, pipeline: &Pipeline) -> Result<BlockingAggregationCursor<C>> {
        Ok(BlockingAggregationCursor::new(
            Arc::clone(&self.connection),
            self.streaming_state(pipeline)?,
        ))
    }
}
