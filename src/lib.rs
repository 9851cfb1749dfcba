// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Record Search
//!
//! Typed records stored in Redis hashes or JSON documents, indexed and
//! queried through RediSearch.
//!
//! ## Architecture
//!
//! Every layer above the connection is sans-IO: it turns typed input into
//! [`Command`]s and turns [`Reply`]s back into typed output. Async and
//! blocking drivers are thin loops over an injected connection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Schema                             │
//! │  • RecordSchema / FieldSpec describe a record type          │
//! │  • IndexDescriptor renders FT.CREATE / FT.DROPINDEX         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//! ┌───────────────────────────┐ ┌───────────────────────────────┐
//! │     Predicate compiler    │ │     Aggregation compiler      │
//! │  • Filter tree → query    │ │  • Pipeline → FT.AGGREGATE    │
//! │  • PARAMS for KNN vectors │ │  • WITHCURSOR read / delete   │
//! └───────────────────────────┘ └───────────────────────────────┘
//!               │                             │
//!               ▼                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Collection                           │
//! │  • Paged FT.SEARCH, hydration into typed records            │
//! │  • Snapshot tracking: save() writes only what changed       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Connection (injected)                      │
//! │  • redis-rs adapter with retry, or an in-memory recorder    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use record_search::{Collection, Filter, Pipeline, Record, Reducer, SearchConfig};
//! use record_search::connection::redis::RedisConnection;
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
//!     #[serde(rename = "Skills")]
//!     skills: Vec<String>,
//! }
//!
//! impl Record for Person {
//!     fn schema() -> RecordSchema {
//!         RecordSchema::new("Person", StorageType::Json)
//!             .field(FieldSpec::string("Name").searchable())
//!             .field(FieldSpec::array(FieldSpec::string("Skills")).indexed())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> record_search::Result<()> {
//!     let config = SearchConfig::default();
//!     let connection = Arc::new(RedisConnection::from_config(&config).await?);
//!     let mut people = Collection::<Person, _>::with_config(connection, config)?;
//!     people.create_index_async().await?;
//!
//!     let mut ada = Person { name: "Ada".into(), skills: vec!["math".into()], ..Default::default() };
//!     people.insert_async(&mut ada).await?;
//!
//!     let query = people.query().filter(Filter::has("Skills", "math"));
//!     let mathematicians = people.fetch_all_async(query).await?;
//!     println!("{} found", mathematicians.len());
//!
//!     let pipeline = Pipeline::new().group_by(["Skills"]).reduce_as(Reducer::Count, "n");
//!     for row in people.aggregate_async(&pipeline)?.collect().await? {
//!         println!("{:?} → {:?}", row.get_str("Skills"), row.get_i64("n"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`schema`]: record schemas, index descriptors, the schema registry
//! - [`query`]: filter trees, the predicate compiler, `FT.SEARCH` commands
//! - [`aggregate`]: aggregation pipelines, expressions, cursors
//! - [`collection`]: typed collections, pagination, dirty tracking
//! - [`connection`]: command/reply model and the shipped adapters
//! - [`vector`]: vector field parameters and float blob encoding
//! - [`resilience`]: retry presets for the Redis adapter
//! - [`metrics`]: counters, histograms and gauges

pub mod aggregate;
pub mod collection;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod query;
pub mod resilience;
pub mod schema;
pub mod vector;

pub use aggregate::{AggregationCursor, AggregationRow, BlockingAggregationCursor, Expr, Pipeline, Reducer};
pub use collection::{Collection, IdStrategy, Record, RecordPager, RecordQuery};
pub use config::SearchConfig;
pub use connection::{AsyncConnection, Command, Connection, Reply};
pub use error::{Result, SearchError};
pub use metrics::LatencyTimer;
pub use query::{Filter, SearchCommand, SortBy};
pub use resilience::retry::RetryConfig;
pub use schema::{FieldSpec, IndexDescriptor, RecordSchema, SchemaRegistry, StorageType};
pub use vector::VectorParams;
