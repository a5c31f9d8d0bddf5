//! Error types for sendlimit.

use thiserror::Error;

use crate::ratelimit::Topic;

/// Main error type for sendlimit operations.
#[derive(Error, Debug)]
pub enum SendLimitError {
    /// Malformed policy entries, settings or policy files
    #[error("Configuration error: {0}")]
    Config(String),

    /// Strict validation found topics with no classification
    #[error("No rate limit classification for topics: {}", join_topics(.0))]
    UnclassifiedTopics(Vec<Topic>),

    /// The send was refused by the topic's rate limiter
    #[error("Rate limited: skipping `{topic}` send")]
    RateLimited { topic: Topic },

    /// The outbound history could not be read
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The downstream transport failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SendLimitError {
    /// Wrap a persistence failure, keeping the original error as the source.
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        SendLimitError::Storage(err.into())
    }

    /// Whether this error is a policy refusal rather than an operational failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SendLimitError::RateLimited { .. })
    }
}

fn join_topics(topics: &[Topic]) -> String {
    topics
        .iter()
        .map(Topic::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for sendlimit operations.
pub type Result<T> = std::result::Result<T, SendLimitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclassified_topics_message_names_topics() {
        let err = SendLimitError::UnclassifiedTopics(vec![Topic::new("news"), Topic::new("status")]);
        assert_eq!(
            err.to_string(),
            "No rate limit classification for topics: NEWS, STATUS"
        );
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "query timed out");
        let err = SendLimitError::storage(io);

        assert!(!err.is_rate_limited());
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Storage error: query timed out");
    }

    #[test]
    fn test_rate_limited_is_distinguishable() {
        let err = SendLimitError::RateLimited {
            topic: Topic::new("news"),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.to_string(), "Rate limited: skipping `NEWS` send");
    }
}
