// Publish/consume core of the hermod frontend. The repository owns the
// circuit-breaker registry and borrows producers from the log client; the
// event consumer feeds the streaming layer one event at a time.
pub mod batch;
pub mod breaker;
pub mod consumer;
pub mod cursor;
pub mod error;
pub mod repository;

pub use batch::{BatchItem, ItemResponse, PublishingStatus, PublishingStep, fail_unpublished};
pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState};
pub use consumer::{ConsumedEvent, EventConsumer};
pub use cursor::{BEFORE_OLDEST_OFFSET, InternalCursor, TopicPosition};
pub use error::{CursorErrorKind, InvalidCursorError, RepositoryError, Result};
pub use repository::{InitialPosition, RepositorySettings, TopicRepository};
