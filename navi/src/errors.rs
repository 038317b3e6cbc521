use crate::api::ApiError;
use crate::resolver::ResolveError;
use crate::store::StoreError;
use thiserror::Error;

pub type Result<T, E = TaskError> = std::result::Result<T, E>;

/// Errors raised while handling a single inbound event.
///
/// Permanent errors must not be retried: the transport acknowledges and drops
/// the message. Everything else is transient and leads to redelivery.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("invalid event payload: {0}")]
    InvalidEvent(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("instance not found when fetching dependencies from the API")]
    InstanceNotFound,

    #[error("update for {routing_key} is older than the stored entry")]
    StaleUpdate { routing_key: String },

    #[error("api error: {0}")]
    Api(ApiError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker is shutting down")]
    ShuttingDown,
}

impl TaskError {
    pub fn is_permanent(&self) -> bool {
        match self {
            TaskError::InvalidEvent(_)
            | TaskError::UnknownEvent(_)
            | TaskError::Resolve(_)
            | TaskError::InstanceNotFound
            | TaskError::StaleUpdate { .. } => true,
            TaskError::Api(_) | TaskError::Store(_) | TaskError::ShuttingDown => false,
        }
    }

    /// Short tag used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::InvalidEvent(_) => "invalid_event",
            TaskError::UnknownEvent(_) => "unknown_event",
            TaskError::Resolve(_) => "malformed_name",
            TaskError::InstanceNotFound => "instance_not_found",
            TaskError::StaleUpdate { .. } => "stale_update",
            TaskError::Api(_) => "api",
            TaskError::Store(_) => "store",
            TaskError::ShuttingDown => "shutting_down",
        }
    }
}

impl From<ApiError> for TaskError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound => TaskError::InstanceNotFound,
            other => TaskError::Api(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(TaskError::InvalidEvent("x".into()).is_permanent());
        assert!(TaskError::UnknownEvent("x".into()).is_permanent());
        assert!(TaskError::Resolve(ResolveError::MalformedIsolatedName("x".into())).is_permanent());
        assert!(TaskError::StaleUpdate { routing_key: "a".into() }.is_permanent());
        assert!(!TaskError::Store(StoreError::Unavailable("down".into())).is_permanent());
        assert!(!TaskError::Api(ApiError::Status(502)).is_permanent());
    }

    #[test]
    fn test_api_not_found_is_permanent() {
        let err = TaskError::from(ApiError::NotFound);
        assert!(matches!(err, TaskError::InstanceNotFound));
        assert!(err.is_permanent());
        assert!(err.to_string().contains("not found"));

        let err = TaskError::from(ApiError::Status(500));
        assert!(!err.is_permanent());
    }
}
