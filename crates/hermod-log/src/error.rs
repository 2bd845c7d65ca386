pub type Result<T> = std::result::Result<T, LogError>;

/// Failure taxonomy of the underlying log store and its coordination service.
///
/// Two classifications matter to callers: connection-class errors are the only
/// ones that count against a broker's circuit breaker, and reset-class errors
/// poison the producer's cached metadata so the producer must be replaced.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unknown server error: {0}")]
    UnknownServer(String),
    #[error("not leader for partition {partition} of topic {topic}")]
    NotLeaderForPartition { topic: String, partition: i32 },
    #[error("unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),
    #[error("topic already exists: {0}")]
    TopicExists(String),
    #[error("coordination service error: {0}")]
    Coordination(String),
    #[error("send cancelled before completion")]
    Cancelled,
}

impl LogError {
    /// True for failures indicating the broker connection itself is unhealthy.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            LogError::Timeout | LogError::Network(_) | LogError::UnknownServer(_)
        )
    }

    /// True for failures after which the producer's metadata can no longer be
    /// trusted and the handle should be replaced.
    pub fn is_reset_error(&self) -> bool {
        matches!(
            self,
            LogError::NotLeaderForPartition { .. } | LogError::UnknownTopicOrPartition(_)
        )
    }

    /// Short stable name used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            LogError::Timeout => "timeout",
            LogError::Network(_) => "network",
            LogError::UnknownServer(_) => "unknown_server",
            LogError::NotLeaderForPartition { .. } => "not_leader",
            LogError::UnknownTopicOrPartition(_) => "unknown_topic_or_partition",
            LogError::TopicExists(_) => "topic_exists",
            LogError::Coordination(_) => "coordination",
            LogError::Cancelled => "cancelled",
        }
    }
}
