// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy.
//!
//! Compile-time failures ([`SearchError::Schema`], [`SearchError::Translation`],
//! [`SearchError::NotIndexed`]) are raised before any round trip, so a partial
//! or best-guess command is never sent. [`SearchError::Protocol`] only surfaces
//! after a round trip and is never retried here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    /// Duplicate or missing field metadata while building an index descriptor.
    #[error("Schema error: {0}")]
    Schema(String),
    /// Operator/field-kind mismatch or a malformed filter/pipeline shape.
    #[error("Translation error: {0}")]
    Translation(String),
    /// The engine replied with an error, or the reply shape was unexpected.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// A query or pipeline references a field with no descriptor.
    #[error("Field '{field}' is not indexed")]
    NotIndexed { field: String },
    /// The connection collaborator failed to deliver the command.
    #[error("Connection error: {0}")]
    Connection(String),
    /// Record (de)serialization failed during hydration or dehydration.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The caller cancelled before the next round trip.
    #[error("Operation cancelled")]
    Cancelled,
}

impl SearchError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub(crate) fn translation(msg: impl Into<String>) -> Self {
        Self::Translation(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn not_indexed(field: impl Into<String>) -> Self {
        Self::NotIndexed { field: field.into() }
    }

    /// Whether the error happened before anything was sent.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::Schema(_) | Self::Translation(_) | Self::NotIndexed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
