// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Only the shipped Redis connection adapter retries; the compilers and the
//! collection layer never do. Engine error replies are not transient and are
//! handed straight back to the caller.
//!
//! # Example
//!
//! ```
//! use record_search::resilience::retry::RetryConfig;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Query: quick retry, then fail
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, Some(3));
//!
//! // None: a single attempt
//! assert_eq!(RetryConfig::none().max_retries, Some(1));
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection/command retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts, `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Fast-fail retry for the initial connection.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual commands.
    /// 3 attempts with fast backoff - if it fails, let caller handle it.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Single attempt, no backoff.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: Some(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Resolve a preset by name (`startup`, `query`, `none`).
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "startup" => Some(Self::startup()),
            "query" => Some(Self::query()),
            "none" => Some(Self::none()),
            _ => None,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Attempt bookkeeping shared by the async and blocking loops.
struct Backoff<'a> {
    operation: &'a str,
    config: &'a RetryConfig,
    delay: Duration,
    failures: usize,
}

impl<'a> Backoff<'a> {
    fn new(operation: &'a str, config: &'a RetryConfig) -> Self {
        Self {
            operation,
            config,
            delay: config.initial_delay,
            failures: 0,
        }
    }

    fn succeeded(&self) {
        if self.failures > 0 {
            info!(operation = self.operation, retries = self.failures, "Recovered after retry");
        }
    }

    /// How long to wait before the next attempt, `None` to give up.
    fn failed(&mut self, error: &dyn Display, transient: bool) -> Option<Duration> {
        self.failures += 1;
        let exhausted = self.config.max_retries.is_some_and(|max| self.failures >= max);
        if !transient || exhausted {
            return None;
        }
        warn!(
            operation = self.operation,
            attempt = self.failures,
            error = %error,
            backoff_ms = self.delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        let wait = self.delay;
        self.delay = self.config.next_delay(wait);
        Some(wait)
    }
}

/// Retry every failure until the attempt budget runs out.
pub async fn retry<F, Fut, T, E>(operation_name: &str, config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(operation_name, config, operation, |_| true).await
}

/// Retry only failures accepted by `is_transient`; anything else returns at once.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut backoff = Backoff::new(operation_name, config);
    loop {
        match operation().await {
            Ok(value) => {
                backoff.succeeded();
                return Ok(value);
            }
            Err(err) => match backoff.failed(&err, is_transient(&err)) {
                Some(wait) => sleep(wait).await,
                None => return Err(err),
            },
        }
    }
}

/// Blocking twin of [`retry_if`] for the synchronous adapter.
pub fn retry_blocking_if<F, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut backoff = Backoff::new(operation_name, config);
    loop {
        match operation() {
            Ok(value) => {
                backoff.succeeded();
                return Ok(value);
            }
            Err(err) => match backoff.failed(&err, is_transient(&err)) {
                Some(wait) => std::thread::sleep(wait),
                None => return Err(err),
            },
        }
    }
}
