// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Aggregation pipelines.
//!
//! - [`pipeline`]: stage list and the `FT.AGGREGATE` compiler
//! - [`stage`]: GROUPBY / REDUCE / APPLY / FILTER / SORTBY / LIMIT / LOAD
//! - [`expr`]: APPLY and FILTER expression language
//! - [`row`]: untyped result rows
//! - [`cursor`]: `WITHCURSOR` reading and cleanup

pub mod cursor;
pub mod expr;
pub mod pipeline;
pub mod row;
pub mod stage;

pub(crate) use pipeline::Scope;

pub use cursor::{parse_aggregate_reply, AggregationCursor, BlockingAggregationCursor, CursorState};
pub use expr::{ArithOp, Expr, Function};
pub use pipeline::{CompiledAggregation, Pipeline};
pub use row::{AggregationRow, RowValue};
pub use stage::{AggregationStage, Reduce, Reducer};
