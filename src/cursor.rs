use std::collections::VecDeque;
use std::sync::Arc;

use bson::Document;
use log::{debug, warn};

use crate::command::check_reply_flags;
use crate::connection::Connection;
use crate::errors::{DriverError, DriverResult};
use crate::wire::{MongoOp, Namespace, OpGetMore, OpKillCursors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Documents are buffered or the server still holds the cursor.
    Active,
    /// Every document has been handed out; the server holds nothing.
    Exhausted,
    /// Closed by the caller.
    Closed,
}

/// A forward-only view over a server-side result set.
///
/// Documents come from the buffered batch first; once it is empty and the
/// server still reports a cursor id, the next batch is fetched with a
/// get-more on the connection that ran the query. Call [`Cursor::close`] to
/// release the server cursor before the end is reached.
pub struct Cursor {
    connection: Arc<Connection>,
    namespace: Namespace,
    cursor_id: i64,
    buffer: VecDeque<Document>,
    batch_size: i32,
    limit: i32,
    returned: i32,
    state: CursorState,
}

impl Cursor {
    pub(crate) fn new(
        connection: Arc<Connection>,
        namespace: Namespace,
        cursor_id: i64,
        first_batch: Vec<Document>,
        batch_size: i32,
        limit: i32,
    ) -> Cursor {
        debug!(
            "cursor {} on {} opened with {} documents",
            cursor_id,
            namespace,
            first_batch.len()
        );
        Cursor {
            connection,
            namespace,
            cursor_id,
            buffer: first_batch.into(),
            batch_size,
            limit,
            returned: 0,
            state: CursorState::Active,
        }
    }

    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Documents already fetched but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn limit_reached(&self) -> bool {
        self.limit > 0 && self.returned >= self.limit
    }

    fn next_batch_size(&self) -> i32 {
        if self.limit > 0 {
            let remaining = self.limit - self.returned - self.buffer.len() as i32;
            if self.batch_size > 0 && self.batch_size < remaining {
                self.batch_size
            } else {
                remaining
            }
        } else {
            self.batch_size
        }
    }

    fn get_more(&mut self) -> DriverResult<()> {
        let get_more = MongoOp::GetMore(OpGetMore {
            full_collection_name: self.namespace.full_name(),
            number_to_return: self.next_batch_size(),
            cursor_id: self.cursor_id,
        });
        let reply = self
            .connection
            .send(&get_more)?
            .ok_or(DriverError::ConnectionClosed)?;
        if let Err(error) = check_reply_flags(&reply, self.cursor_id) {
            if let DriverError::CursorNotFound(_) = error {
                // nothing left to kill on the server
                self.cursor_id = 0;
            }
            return Err(error);
        }
        debug!(
            "cursor {} on {} fetched {} documents",
            self.cursor_id,
            self.namespace,
            reply.documents.len()
        );
        self.cursor_id = reply.cursor_id;
        self.buffer.extend(reply.documents);
        Ok(())
    }

    /// Returns the next document, fetching a batch when the buffer runs dry.
    /// `Ok(None)` marks the end of the results.
    pub fn try_next(&mut self) -> DriverResult<Option<Document>> {
        match self.state {
            CursorState::Closed => return Err(DriverError::CursorClosed),
            CursorState::Exhausted => return Ok(None),
            CursorState::Active => {}
        }
        if !self.connection.is_open() {
            return Err(DriverError::ConnectionClosed);
        }
        loop {
            if let Some(document) = self.buffer.pop_front() {
                self.returned += 1;
                if self.limit_reached() {
                    self.release()?;
                    self.state = CursorState::Exhausted;
                }
                return Ok(Some(document));
            }
            if self.cursor_id == 0 || self.limit_reached() {
                self.state = CursorState::Exhausted;
                return Ok(None);
            }
            self.get_more()?;
        }
    }

    fn release(&mut self) -> DriverResult<()> {
        let cursor_id = std::mem::replace(&mut self.cursor_id, 0);
        self.buffer.clear();
        if cursor_id == 0 || !self.connection.is_open() {
            return Ok(());
        }
        debug!("killing cursor {} on {}", cursor_id, self.namespace);
        let kill = MongoOp::KillCursors(OpKillCursors {
            cursor_ids: vec![cursor_id],
        });
        match self.connection.send(&kill) {
            Ok(_) | Err(DriverError::ConnectionClosed) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Releases the server cursor, if one is still held. Idempotent.
    pub fn close(&mut self) -> DriverResult<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        self.release()
    }

    /// Drains the remaining documents and closes the cursor.
    pub fn collect_documents(mut self) -> DriverResult<Vec<Document>> {
        let mut documents = vec![];
        while let Some(document) = self.try_next()? {
            documents.push(document);
        }
        self.close()?;
        Ok(documents)
    }
}

impl Iterator for Cursor {
    type Item = DriverResult<Document>;

    fn next(&mut self) -> Option<DriverResult<Document>> {
        self.try_next().transpose()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.cursor_id != 0 && self.state == CursorState::Active {
            warn!(
                "cursor {} on {} dropped without close, the server keeps it until it times out",
                self.cursor_id, self.namespace
            );
        }
    }
}
