// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis adapter for the connection contract.
//!
//! Wraps the `redis` crate: [`RedisConnection`] drives a multiplexed
//! `ConnectionManager` for async callers, [`BlockingRedisConnection`] a plain
//! connection behind a mutex for sync callers. Transport failures (IO, dropped
//! connection, timeout) are retried with the configured backoff; engine error
//! replies are surfaced as [`SearchError::Protocol`] without retrying.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Value};
use tracing::debug;

use super::{AsyncConnection, Command, CommandArg, Connection, Reply};
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::resilience::retry::{retry, retry_blocking_if, retry_if, RetryConfig};

pub struct RedisConnection {
    connection: ConnectionManager,
    retry: RetryConfig,
}

impl RedisConnection {
    /// Connect with the default per-command retry policy.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_retry(url, RetryConfig::query()).await
    }

    /// Connect to `config.redis_url` with the configured retry preset.
    pub async fn from_config(config: &SearchConfig) -> Result<Self> {
        Self::connect_with_retry(&config.redis_url, config.retry_config()?).await
    }

    pub async fn connect_with_retry(url: &str, retry_config: RetryConfig) -> Result<Self> {
        let client = Client::open(url).map_err(|e| SearchError::Connection(e.to_string()))?;

        // Startup policy: fast-fail on a bad URL instead of hanging
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: RedisError| SearchError::Connection(e.to_string()))?;

        Ok(Self {
            connection,
            retry: retry_config,
        })
    }
}

#[async_trait]
impl AsyncConnection for RedisConnection {
    async fn execute_async(&self, command: &Command) -> Result<Reply> {
        let _timer = metrics::LatencyTimer::new(command.name);
        let cmd = to_redis_cmd(command);
        debug!(command = %command, "Executing");

        let result = retry_if(
            command.name,
            &self.retry,
            || {
                let mut conn = self.connection.clone();
                let cmd = cmd.clone();
                async move { cmd.query_async::<Value>(&mut conn).await }
            },
            is_transient,
        )
        .await;

        finish(command, result)
    }
}

/// Blocking adapter. One command at a time; the mutex serialises callers.
pub struct BlockingRedisConnection {
    connection: Mutex<redis::Connection>,
    retry: RetryConfig,
}

impl BlockingRedisConnection {
    pub fn open(url: &str) -> Result<Self> {
        Self::open_with_retry(url, RetryConfig::query())
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        Self::open_with_retry(&config.redis_url, config.retry_config()?)
    }

    pub fn open_with_retry(url: &str, retry_config: RetryConfig) -> Result<Self> {
        let client = Client::open(url).map_err(|e| SearchError::Connection(e.to_string()))?;
        let connection = retry_blocking_if(
            "redis_connect",
            &RetryConfig::startup(),
            || client.get_connection(),
            is_transient,
        )
        .map_err(|e| SearchError::Connection(e.to_string()))?;

        Ok(Self {
            connection: Mutex::new(connection),
            retry: retry_config,
        })
    }
}

impl Connection for BlockingRedisConnection {
    fn execute(&self, command: &Command) -> Result<Reply> {
        let _timer = metrics::LatencyTimer::new(command.name);
        let cmd = to_redis_cmd(command);
        debug!(command = %command, "Executing");

        let result = retry_blocking_if(
            command.name,
            &self.retry,
            || {
                let mut conn = self.connection.lock();
                cmd.query::<Value>(&mut *conn)
            },
            is_transient,
        );

        finish(command, result)
    }
}

fn to_redis_cmd(command: &Command) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name);
    for arg in &command.args {
        match arg {
            CommandArg::Text(s) => cmd.arg(s.as_str()),
            CommandArg::Blob(b) => cmd.arg(b.as_slice()),
        };
    }
    cmd
}

fn is_transient(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_timeout()
}

fn finish(command: &Command, result: std::result::Result<Value, RedisError>) -> Result<Reply> {
    match result {
        Ok(value) => {
            metrics::record_command(command.name, "success");
            reply_from_value(value)
        }
        Err(e) => {
            metrics::record_command(command.name, "error");
            if is_transient(&e) || e.is_connection_refusal() {
                Err(SearchError::Connection(e.to_string()))
            } else {
                Err(SearchError::Protocol(e.to_string()))
            }
        }
    }
}

/// Convert a RESP value into the narrow [`Reply`] union.
pub fn reply_from_value(value: Value) -> Result<Reply> {
    Ok(match value {
        Value::Nil => Reply::Nil,
        Value::Int(i) => Reply::Integer(i),
        Value::Double(d) => Reply::Double(d),
        Value::Boolean(b) => Reply::Integer(i64::from(b)),
        Value::Okay => Reply::ok(),
        Value::SimpleString(s) => Reply::Status(s),
        Value::VerbatimString { text, .. } => Reply::Text(text),
        Value::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Reply::Text(s),
            Err(e) => Reply::Blob(e.into_bytes()),
        },
        Value::Array(items) | Value::Set(items) => Reply::Array(
            items
                .into_iter()
                .map(reply_from_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        // RESP3 maps are flattened into the RESP2 key/value array shape
        Value::Map(pairs) => {
            let mut flat = Vec::with_capacity(pairs.len() * 2);
            for (k, v) in pairs {
                flat.push(reply_from_value(k)?);
                flat.push(reply_from_value(v)?);
            }
            Reply::Array(flat)
        }
        Value::Attribute { data, .. } => reply_from_value(*data)?,
        other => {
            return Err(SearchError::protocol(format!(
                "unsupported reply type: {:?}",
                other
            )))
        }
    })
}
