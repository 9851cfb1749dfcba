// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor-driven aggregation.
//!
//! ```text
//! FT.AGGREGATE idx … WITHCURSOR COUNT n   ──▶ [[total, row…], cursor_id]
//! FT.CURSOR READ idx cursor_id COUNT n    ──▶ [[total, row…], cursor_id]   (until id = 0)
//! FT.CURSOR DEL idx cursor_id             (only when abandoned while open)
//! ```
//!
//! [`CursorState`] is the protocol as a plain state machine; the async and
//! blocking readers only ferry its commands and replies. Cancellation is
//! checked before every round trip and still triggers the delete.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pipeline::CompiledAggregation;
use super::row::AggregationRow;
use crate::connection::{AsyncConnection, Command, Connection, Reply};
use crate::error::{Result, SearchError};
use crate::metrics;

/// Protocol state for one aggregation.
#[derive(Debug, Clone)]
pub struct CursorState {
    index_name: String,
    initial: Command,
    count: Option<usize>,
    cursor_id: u64,
    started: bool,
    deleted: bool,
    pages: usize,
}

impl CursorState {
    pub fn new(index_name: impl Into<String>, compiled: CompiledAggregation) -> Self {
        Self {
            index_name: index_name.into(),
            initial: compiled.command,
            count: compiled.cursor,
            cursor_id: 0,
            started: false,
            deleted: false,
            pages: 0,
        }
    }

    /// Next round trip, or `None` once the results are exhausted.
    pub fn next_command(&self) -> Option<Command> {
        if !self.started {
            return Some(self.initial.clone());
        }
        if self.cursor_id == 0 || self.deleted {
            return None;
        }
        let mut cmd = Command::new("FT.CURSOR")
            .arg("READ")
            .arg(&self.index_name)
            .arg(self.cursor_id);
        if let Some(count) = self.count {
            cmd.push("COUNT");
            cmd.push(count);
        }
        Some(cmd)
    }

    /// Feed the reply to the last command from [`next_command`](Self::next_command).
    pub fn accept(&mut self, reply: Reply) -> Result<Vec<AggregationRow>> {
        let (rows, cursor_id) = parse_aggregate_reply(reply, self.count.is_some())?;
        self.started = true;
        self.cursor_id = cursor_id;
        self.pages += 1;
        Ok(rows)
    }

    /// `FT.CURSOR DEL` while a server-side cursor is still open.
    pub fn delete_command(&self) -> Option<Command> {
        if self.is_open() {
            Some(
                Command::new("FT.CURSOR")
                    .arg("DEL")
                    .arg(&self.index_name)
                    .arg(self.cursor_id),
            )
        } else {
            None
        }
    }

    fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    pub fn is_open(&self) -> bool {
        self.started && self.cursor_id != 0 && !self.deleted
    }

    pub fn is_exhausted(&self) -> bool {
        self.started && self.cursor_id == 0
    }

    pub fn cursor_id(&self) -> u64 {
        self.cursor_id
    }

    /// Round trips completed so far.
    pub fn pages(&self) -> usize {
        self.pages
    }
}

/// Split an aggregate reply into rows and the continuation id (0 = done).
pub fn parse_aggregate_reply(reply: Reply, with_cursor: bool) -> Result<(Vec<AggregationRow>, u64)> {
    let (body, cursor_id) = if with_cursor {
        let mut parts = reply.into_array()?.into_iter();
        let (Some(body), Some(id), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(SearchError::protocol("cursor reply must be [results, cursor_id]"));
        };
        let id = id
            .as_i64()
            .filter(|id| *id >= 0)
            .ok_or_else(|| SearchError::protocol("cursor id is not a non-negative integer"))?;
        (body, id as u64)
    } else {
        (reply, 0)
    };

    let mut items = body.into_array()?.into_iter();
    // Leading count; rows follow
    items
        .next()
        .and_then(|r| r.as_i64())
        .ok_or_else(|| SearchError::protocol("aggregate reply does not start with a count"))?;
    let rows = items.map(AggregationRow::from_reply).collect::<Result<Vec<_>>>()?;
    Ok((rows, cursor_id))
}

/// Async reader over a cursor aggregation.
///
/// Call [`close`](Self::close) to release an unfinished cursor; dropping an
/// open reader inside a Tokio runtime spawns the delete instead.
pub struct AggregationCursor<C: AsyncConnection + ?Sized + 'static> {
    connection: Arc<C>,
    state: CursorState,
    cancel: Option<CancellationToken>,
    buffer: VecDeque<AggregationRow>,
}

impl<C: AsyncConnection + ?Sized + 'static> AggregationCursor<C> {
    pub fn new(connection: Arc<C>, state: CursorState) -> Self {
        Self {
            connection,
            state,
            cancel: None,
            buffer: VecDeque::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    /// Next page of rows, `None` when exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<AggregationRow>>> {
        if !self.buffer.is_empty() {
            return Ok(Some(self.buffer.drain(..).collect()));
        }
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            self.release().await;
            return Err(SearchError::Cancelled);
        }
        let Some(cmd) = self.state.next_command() else {
            return Ok(None);
        };
        let reading = self.state.started;
        let reply = match self.connection.execute_async(&cmd).await {
            Ok(reply) => reply,
            Err(e) => {
                record_read(reading, false);
                self.release().await;
                return Err(e);
            }
        };
        record_read(reading, true);
        match self.state.accept(reply) {
            Ok(rows) => {
                debug!(cursor = self.state.cursor_id(), rows = rows.len(), "Aggregation page");
                Ok(Some(rows))
            }
            Err(e) => {
                self.release().await;
                Err(e)
            }
        }
    }

    pub async fn next_row(&mut self) -> Result<Option<AggregationRow>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            match self.next_page().await? {
                Some(rows) => self.buffer.extend(rows),
                None => return Ok(None),
            }
        }
    }

    /// Read to exhaustion.
    pub async fn collect(mut self) -> Result<Vec<AggregationRow>> {
        let mut all = Vec::new();
        while let Some(rows) = self.next_page().await? {
            all.extend(rows);
        }
        Ok(all)
    }

    /// Release the server-side cursor if it is still open.
    pub async fn close(mut self) {
        self.release().await;
    }

    async fn release(&mut self) {
        let Some(cmd) = self.state.delete_command() else {
            return;
        };
        self.state.mark_deleted();
        match self.connection.execute_async(&cmd).await {
            Ok(_) => metrics::record_cursor_operation("delete", true),
            Err(e) => {
                metrics::record_cursor_operation("delete", false);
                warn!(cursor = self.state.cursor_id(), error = %e, "Cursor delete failed");
            }
        }
    }
}

impl<C: AsyncConnection + ?Sized + 'static> Drop for AggregationCursor<C> {
    fn drop(&mut self) {
        let Some(cmd) = self.state.delete_command() else {
            return;
        };
        self.state.mark_deleted();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connection = Arc::clone(&self.connection);
                handle.spawn(async move {
                    if let Err(e) = connection.execute_async(&cmd).await {
                        metrics::record_cursor_operation("delete", false);
                        warn!(command = %cmd, error = %e, "Cursor delete failed");
                    } else {
                        metrics::record_cursor_operation("delete", true);
                    }
                });
            }
            Err(_) => {
                warn!(command = %cmd, "Aggregation cursor dropped outside a runtime; left to expire");
            }
        }
    }
}

/// Blocking reader over a cursor aggregation. Dropping it releases an
/// unfinished cursor.
pub struct BlockingAggregationCursor<C: Connection + ?Sized> {
    connection: Arc<C>,
    state: CursorState,
    cancel: Option<CancellationToken>,
    buffer: VecDeque<AggregationRow>,
}

impl<C: Connection + ?Sized> BlockingAggregationCursor<C> {
    pub fn new(connection: Arc<C>, state: CursorState) -> Self {
        Self {
            connection,
            state,
            cancel: None,
            buffer: VecDeque::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn next_page(&mut self) -> Result<Option<Vec<AggregationRow>>> {
        if !self.buffer.is_empty() {
            return Ok(Some(self.buffer.drain(..).collect()));
        }
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            self.release();
            return Err(SearchError::Cancelled);
        }
        let Some(cmd) = self.state.next_command() else {
            return Ok(None);
        };
        let reading = self.state.started;
        let result = self
            .connection
            .execute(&cmd)
            .and_then(|reply| self.state.accept(reply));
        record_read(reading, result.is_ok());
        match result {
            Ok(rows) => Ok(Some(rows)),
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    pub fn collect_all(mut self) -> Result<Vec<AggregationRow>> {
        let mut all = Vec::new();
        while let Some(rows) = self.next_page()? {
            all.extend(rows);
        }
        Ok(all)
    }

    fn release(&mut self) {
        let Some(cmd) = self.state.delete_command() else {
            return;
        };
        self.state.mark_deleted();
        match self.connection.execute(&cmd) {
            Ok(_) => metrics::record_cursor_operation("delete", true),
            Err(e) => {
                metrics::record_cursor_operation("delete", false);
                warn!(cursor = self.state.cursor_id(), error = %e, "Cursor delete failed");
            }
        }
    }
}

impl<C: Connection + ?Sized> Iterator for BlockingAggregationCursor<C> {
    type Item = Result<AggregationRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Some(Ok(row));
            }
            match self.next_page() {
                Ok(Some(rows)) => self.buffer.extend(rows),
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<C: Connection + ?Sized> Drop for BlockingAggregationCursor<C> {
    fn drop(&mut self) {
        self.release();
    }
}

fn record_read(reading: bool, success: bool) {
    metrics::record_cursor_operation(if reading { "read" } else { "aggregate" }, success);
}
