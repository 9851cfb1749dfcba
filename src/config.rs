// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for collections and the Redis adapter.
//!
//! # Example
//!
//! ```
//! use record_search::SearchConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SearchConfig::default();
//! assert_eq!(config.default_page_size, 100);
//! assert_eq!(config.dialect, 2);
//!
//! // Full config
//! let config = SearchConfig {
//!     redis_url: "redis://cache:6379".into(),
//!     default_page_size: 500,
//!     cursor_page_size: 2000,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::resilience::retry::RetryConfig;

/// Configuration for collections and connections.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Rows per FT.SEARCH page when a query sets no page size (default: 100)
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Rows per cursor read for aggregations (default: 1000)
    #[serde(default = "default_cursor_page_size")]
    pub cursor_page_size: usize,

    /// Query dialect sent with FT.SEARCH (default: 2, required for PARAMS)
    #[serde(default = "default_dialect")]
    pub dialect: u32,

    /// Score column for KNN clauses that don't name one (default: `{field}_score`)
    #[serde(default)]
    pub score_alias: Option<String>,

    /// Retry preset for the Redis adapter: "query", "startup" or "none"
    #[serde(default = "default_retry_preset")]
    pub retry_preset: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_page_size() -> usize {
    100
}
fn default_cursor_page_size() -> usize {
    1000
}
fn default_dialect() -> u32 {
    2
}
fn default_retry_preset() -> String {
    "query".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            default_page_size: default_page_size(),
            cursor_page_size: default_cursor_page_size(),
            dialect: default_dialect(),
            score_alias: None,
            retry_preset: default_retry_preset(),
        }
    }
}

impl SearchConfig {
    /// Resolve [`retry_preset`](Self::retry_preset).
    pub fn retry_config(&self) -> Result<RetryConfig> {
        RetryConfig::preset(&self.retry_preset).ok_or_else(|| {
            SearchError::Connection(format!("unknown retry preset '{}'", self.retry_preset))
        })
    }

    /// Reject values no command can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 {
            return Err(SearchError::schema("default_page_size must be at least 1"));
        }
        if self.cursor_page_size == 0 {
            return Err(SearchError::schema("cursor_page_size must be at least 1"));
        }
        if self.dialect < 2 {
            return Err(SearchError::schema("dialect 2 or later is required for query parameters"));
        }
        self.retry_config().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.cursor_page_size, 1000);
        assert!(config.score_alias.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"default_page_size": 25, "score_alias": "score"}"#).unwrap();
        assert_eq!(config.default_page_size, 25);
        assert_eq!(config.score_alias.as_deref(), Some("score"));
        assert_eq!(config.dialect, 2);
        assert_eq!(config.retry_preset, "query");
    }

    #[test]
    fn test_validation() {
        let config = SearchConfig {
            default_page_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SearchConfig {
            retry_preset: "forever".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SearchError::Connection(_))));

        let config = SearchConfig {
            dialect: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
