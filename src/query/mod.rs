// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query layer
//!
//! ```text
//! Filter (AST) ──▶ PredicateCompiler ──▶ CompiledQuery ──▶ SearchCommand ──▶ FT.SEARCH
//!                     ▲
//!                     └── IndexDescriptor
//! ```

pub mod compiler;
pub mod filter;
pub mod search;

pub use compiler::{compile, CompiledQuery, PredicateCompiler};
pub use filter::{
    CompareOp, Filter, FilterBuilder, FilterNode, GeoLoc, GeoUnit, Literal, VectorValue,
};
pub use search::{
    parse_search_reply, SearchCommand, SearchHit, SearchPage, SortBy, SortDirection,
    DEFAULT_DIALECT,
};
