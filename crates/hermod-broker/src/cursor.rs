// Cursor model: the user-facing (partition, offset) string pair and its
// normalized internal form.
use crate::error::{CursorErrorKind, InvalidCursorError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Offset sentinel meaning "before the oldest available record".
pub const BEFORE_OLDEST_OFFSET: &str = "BEGIN";

/// User-visible position within a topic. Fields arrive from the wire and may
/// be absent; validation turns absent fields into cursor errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPosition {
    pub topic: String,
    pub partition: Option<String>,
    pub offset: Option<String>,
}

impl TopicPosition {
    pub fn new(
        topic: impl Into<String>,
        partition: impl Into<String>,
        offset: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition: Some(partition.into()),
            offset: Some(offset.into()),
        }
    }

    /// True when the offset is the BEGIN sentinel, case-insensitively.
    pub fn is_begin(&self) -> bool {
        self.offset
            .as_deref()
            .is_some_and(|offset| offset.eq_ignore_ascii_case(BEFORE_OLDEST_OFFSET))
    }
}

/// Normalized cursor. Ordering compares partitions first, then offsets as
/// signed 64-bit integers; comparisons are only meaningful within one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalCursor {
    topic: String,
    partition: i32,
    offset: i64,
}

impl InternalCursor {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn add_offset(&self, delta: i64) -> Self {
        Self {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset + delta,
        }
    }

    pub fn to_position(&self) -> TopicPosition {
        TopicPosition::new(
            self.topic.clone(),
            self.partition.to_string(),
            self.offset.to_string(),
        )
    }

    pub fn from_position(position: &TopicPosition) -> Result<Self, InvalidCursorError> {
        let partition = position.partition.as_deref().ok_or_else(|| {
            InvalidCursorError::new(CursorErrorKind::NullPartition, position.clone())
        })?;
        let offset = position.offset.as_deref().ok_or_else(|| {
            InvalidCursorError::new(CursorErrorKind::NullOffset, position.clone())
        })?;
        let partition = partition.parse::<i32>().map_err(|_| {
            InvalidCursorError::new(CursorErrorKind::InvalidFormat, position.clone())
        })?;
        let offset = offset.parse::<i64>().map_err(|_| {
            InvalidCursorError::new(CursorErrorKind::InvalidFormat, position.clone())
        })?;
        Ok(Self {
            topic: position.topic.clone(),
            partition,
            offset,
        })
    }
}

impl PartialOrd for InternalCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partition
            .cmp(&other.partition)
            .then(self.offset.cmp(&other.offset))
            .then_with(|| self.topic.cmp(&other.topic))
    }
}
