use crate::cursor::TopicPosition;
use std::fmt;

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Defect classes detected while parsing or validating client cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorErrorKind {
    NullPartition,
    NullOffset,
    InvalidFormat,
    PartitionNotFound,
    Unavailable,
}

impl fmt::Display for CursorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CursorErrorKind::NullPartition => "NULL_PARTITION",
            CursorErrorKind::NullOffset => "NULL_OFFSET",
            CursorErrorKind::InvalidFormat => "INVALID_FORMAT",
            CursorErrorKind::PartitionNotFound => "PARTITION_NOT_FOUND",
            CursorErrorKind::Unavailable => "UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// A client-supplied cursor was malformed or outside the retained window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCursorError {
    pub kind: CursorErrorKind,
    pub position: Option<TopicPosition>,
}

impl std::error::Error for InvalidCursorError {}

impl InvalidCursorError {
    pub fn new(kind: CursorErrorKind, position: TopicPosition) -> Self {
        Self {
            kind,
            position: Some(position),
        }
    }

    pub fn bare(kind: CursorErrorKind) -> Self {
        Self {
            kind,
            position: None,
        }
    }
}

impl fmt::Display for InvalidCursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor {}", self.kind)?;
        if let Some(position) = &self.position {
            write!(
                f,
                " (partition={}, offset={})",
                position.partition.as_deref().unwrap_or("-"),
                position.offset.as_deref().unwrap_or("-"),
            )?;
        }
        Ok(())
    }
}

/// Errors surfaced by the topic repository. Publishing failures carry their
/// detail on the batch items themselves; callers inspect per-item results.
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("topic creation failed: {0}")]
    TopicCreation(String),
    #[error("topic deletion failed: {0}")]
    TopicDeletion(String),
    #[error("service temporarily unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("error publishing events")]
    EventPublishing,
    #[error(transparent)]
    InvalidCursor(#[from] InvalidCursorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_cursor_message_names_the_kind() {
        let err = InvalidCursorError::new(
            CursorErrorKind::Unavailable,
            TopicPosition::new("t", "0", "999999"),
        );
        let message = err.to_string();
        assert!(message.starts_with("cursor UNAVAILABLE"));
        assert!(message.contains("999999"));
    }

    #[test]
    fn bare_cursor_error_has_no_position_suffix() {
        let err = InvalidCursorError::bare(CursorErrorKind::InvalidFormat);
        assert_eq!(err.to_string(), "cursor INVALID_FORMAT");
    }
}
