//! Change log for index consumers. Every mutation appends one row per
//! affected resource; recursive operations stage descendant rows through a
//! session-scoped batch buffer so a large subtree never materializes as one
//! giant insert. Consumers drain rows in sequence order and drained rows are
//! gone for good.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default consumer identity: the index synchronizer.
pub const INDEX_LOGGER_TYPE: i32 = 1;
pub const INDEX_LOGGER_ID: i32 = 1;

/// Rows staged per batch during recursive recording.
pub const STAGING_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Created,
    Modified,
    AclModified,
    Moved,
    Deleted,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Created => "created",
            ChangeOp::Modified => "modified",
            ChangeOp::AclModified => "acl_modified",
            ChangeOp::Moved => "moved",
            ChangeOp::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangelogRow {
    pub seq: u64,
    pub logger_type: i32,
    pub logger_id: i32,
    pub op: ChangeOp,
    pub resource_id: i64,
    pub uri: String,
    pub is_collection: bool,
    /// Set on the head row of a subtree operation; descendant rows staged for
    /// the same operation carry `false`.
    pub recursive: bool,
    pub timestamp: DateTime<Utc>,
}

/// Session-scoped staging buffer. Items accumulate in fixed-size batches and
/// each full batch is handed to the sink before the next fills; `finish`
/// flushes the remainder. Dropping the buffer without finishing discards the
/// unflushed batch, which is the early-exit cleanup path.
pub struct StagingBuffer<T, F>
where
    F: FnMut(Uuid, Vec<T>),
{
    session: Uuid,
    batch_size: usize,
    pending: Vec<T>,
    sink: F,
}

impl<T, F> StagingBuffer<T, F>
where
    F: FnMut(Uuid, Vec<T>),
{
    pub fn new(batch_size: usize, sink: F) -> Self {
        StagingBuffer { session: Uuid::new_v4(), batch_size: batch_size.max(1), pending: Vec::new(), sink }
    }

    pub fn session(&self) -> Uuid { self.session }

    pub fn push(&mut self, item: T) {
        self.pending.push(item);
        if self.pending.len() >= self.batch_size {
            let batch = std::mem::take(&mut self.pending);
            (self.sink)(self.session, batch);
        }
    }

    pub fn finish(mut self) {
        if !self.pending.is_empty() {
            let batch = std::mem::take(&mut self.pending);
            (self.sink)(self.session, batch);
        }
    }
}
