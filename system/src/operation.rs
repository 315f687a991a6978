use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of trailing operations kept per session.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Delete,
    FullUpdate,
}

impl Default for OperationKind {
    fn default() -> Self {
        OperationKind::FullUpdate
    }
}

/// One edit as issued by a participant. Offsets count chars, not bytes, and are
/// clamped against the document when applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub position: i64,
    pub content: String,
    pub length: i64,
    pub participant_id: ParticipantId,
    pub revision: u64,
    pub timestamp: f64,
}

impl Operation {
    pub fn insert(position: i64, content: impl Into<String>) -> Self {
        Self::new(OperationKind::Insert, position, content.into(), 0)
    }

    pub fn delete(position: i64, length: i64) -> Self {
        Self::new(OperationKind::Delete, position, String::new(), length)
    }

    pub fn full_update(content: impl Into<String>) -> Self {
        Self::new(OperationKind::FullUpdate, 0, content.into(), 0)
    }

    pub fn new(kind: OperationKind, position: i64, content: String, length: i64) -> Self {
        Self {
            kind,
            position,
            content,
            length,
            participant_id: ParticipantId::new(),
            revision: 0,
            timestamp: crate::types::epoch_seconds(chrono::Utc::now()),
        }
    }

    pub fn issued_by(mut self, participant_id: impl Into<ParticipantId>, revision: u64) -> Self {
        self.participant_id = participant_id.into();
        self.revision = revision;
        self
    }
}

/// Bounded trailing history of applied operations. Not used for recovery.
#[derive(Debug, Clone)]
pub struct OperationLog {
    entries: VecDeque<Operation>,
    capacity: usize,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, op: Operation) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(op);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&Operation> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}
