// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory connection that records every command and answers from a script.
//!
//! Used to exercise the collection and cursor drivers without a server: the
//! test queues replies (or installs a responder) and afterwards inspects
//! exactly which commands were sent.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{AsyncConnection, Command, Connection, Reply};
use crate::error::Result;

type Responder = Box<dyn Fn(&Command) -> Result<Reply> + Send + Sync>;

pub struct RecordingConnection {
    sent: Mutex<Vec<Command>>,
    replies: Mutex<VecDeque<Result<Reply>>>,
    responder: Option<Responder>,
}

impl RecordingConnection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            responder: None,
        }
    }

    /// Answer every unscripted command through `responder`.
    #[must_use]
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Command) -> Result<Reply> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Queue a reply; queued replies are consumed before the responder.
    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().push_back(Ok(reply));
    }

    pub fn push_error(&self, err: crate::error::SearchError) {
        self.replies.lock().push_back(Err(err));
    }

    /// Every command sent so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.sent.lock().clone()
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|c| c.name).collect()
    }

    /// Number of commands sent with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.sent.lock().iter().filter(|c| c.name == name).count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    fn answer(&self, command: &Command) -> Result<Reply> {
        self.sent.lock().push(command.clone());
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        match &self.responder {
            Some(responder) => responder(command),
            None => Ok(Reply::ok()),
        }
    }
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for RecordingConnection {
    fn execute(&self, command: &Command) -> Result<Reply> {
        self.answer(command)
    }
}

#[async_trait]
impl AsyncConnection for RecordingConnection {
    async fn execute_async(&self, command: &Command) -> Result<Reply> {
        self.answer(command)
    }
}
