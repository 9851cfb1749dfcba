// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection contract.
//!
//! The compilers and the collection layer only ever produce [`Command`] values
//! and consume [`Reply`] values. Anything that can carry one command to the
//! engine and bring one reply back can be plugged in:
//!
//! ```text
//! Collection ──Command──▶ Connection / AsyncConnection ──▶ Redis
//!            ◀──Reply────
//! ```
//!
//! Timeouts and retries belong to the implementation of these traits, never
//! to the callers.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::fmt;

use crate::error::{Result, SearchError};

/// A single command argument. Binary payloads (vector blobs) stay binary all
/// the way to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArg {
    Text(String),
    Blob(Vec<u8>),
}

impl CommandArg {
    /// Text view of the argument, `None` for blobs.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CommandArg::Text(s) => Some(s),
            CommandArg::Blob(_) => None,
        }
    }
}

impl From<&str> for CommandArg {
    fn from(s: &str) -> Self {
        CommandArg::Text(s.to_string())
    }
}

impl From<String> for CommandArg {
    fn from(s: String) -> Self {
        CommandArg::Text(s)
    }
}

impl From<&String> for CommandArg {
    fn from(s: &String) -> Self {
        CommandArg::Text(s.clone())
    }
}

impl From<Vec<u8>> for CommandArg {
    fn from(b: Vec<u8>) -> Self {
        CommandArg::Blob(b)
    }
}

impl From<usize> for CommandArg {
    fn from(n: usize) -> Self {
        CommandArg::Text(n.to_string())
    }
}

impl From<u64> for CommandArg {
    fn from(n: u64) -> Self {
        CommandArg::Text(n.to_string())
    }
}

impl From<i64> for CommandArg {
    fn from(n: i64) -> Self {
        CommandArg::Text(n.to_string())
    }
}

impl fmt::Display for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandArg::Text(s) => write!(f, "{}", s),
            CommandArg::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A command name plus its argument vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: &'static str,
    pub args: Vec<CommandArg>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self { name, args: Vec::new() }
    }

    /// Append an argument (builder style).
    pub fn arg(mut self, arg: impl Into<CommandArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn push(&mut self, arg: impl Into<CommandArg>) {
        self.args.push(arg.into());
    }

    pub fn extend<I, A>(&mut self, args: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<CommandArg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
    }

    /// Arguments rendered as text, blobs shown by size. Handy in logs and tests.
    pub fn text_args(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string()).collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Engine reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Double(f64),
    /// Bulk string that decoded as UTF-8.
    Text(String),
    /// Bulk string that is not UTF-8 (e.g. a stored vector).
    Blob(Vec<u8>),
    /// Simple status string such as `OK`.
    Status(String),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            Reply::Double(d) => Some(*d as i64),
            Reply::Text(s) | Reply::Status(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reply::Integer(i) => Some(*i as f64),
            Reply::Double(d) => Some(*d),
            Reply::Text(s) | Reply::Status(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// String view of scalar replies. Numbers are rendered.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Reply::Text(s) | Reply::Status(s) => Some(s.clone()),
            Reply::Integer(i) => Some(i.to_string()),
            Reply::Double(d) => Some(d.to_string()),
            Reply::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Reply::Nil | Reply::Array(_) => None,
        }
    }

    pub fn into_array(self) -> Result<Vec<Reply>> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(SearchError::protocol(format!(
                "expected array reply, got {:?}",
                other
            ))),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }
}

/// Blocking connection collaborator.
pub trait Connection {
    fn execute(&self, command: &Command) -> Result<Reply>;
}

/// Async connection collaborator.
#[async_trait]
pub trait AsyncConnection: Send + Sync {
    async fn execute_async(&self, command: &Command) -> Result<Reply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display_hides_blobs() {
        let cmd = Command::new("FT.SEARCH")
            .arg("idx")
            .arg("*")
            .arg("PARAMS")
            .arg(2usize)
            .arg("p0")
            .arg(vec![0u8; 12]);
        assert_eq!(cmd.to_string(), "FT.SEARCH idx * PARAMS 2 p0 <12 bytes>");
    }

    #[test]
    fn test_reply_numeric_views() {
        assert_eq!(Reply::text("42").as_i64(), Some(42));
        assert_eq!(Reply::Integer(7).as_f64(), Some(7.0));
        assert_eq!(Reply::text("1.5").as_f64(), Some(1.5));
        assert_eq!(Reply::Nil.as_i64(), None);
    }

    #[test]
    fn test_into_array_rejects_scalars() {
        assert!(Reply::Integer(1).into_array().is_err());
        assert_eq!(
            Reply::Array(vec![Reply::Nil]).into_array().unwrap(),
            vec![Reply::Nil]
        );
    }
}
