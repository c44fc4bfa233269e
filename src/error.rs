//! Error types for the feed workflow
//!
//! Every failure the core can raise is a variant of [`Error`]. Variants are
//! created close to where the problem is detected and travel unchanged up to
//! the HTTP layer, which maps each one to a status code via [`Error::code`].

use thiserror::Error;

use crate::fetcher::FetchFailure;

/// Result type alias for kiosko operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Client input is malformed
    #[error("Invalid payload data: {0}")]
    InvalidPayload(String),

    /// The data service could not produce results
    #[error("Error occurred while fetching data: {0}")]
    FetchFailed(#[from] FetchFailure),

    /// Every requested topic came back empty
    #[error(
        "No data found for the provided topics: {}. Please insert another topic that exists.",
        .0.join(", ")
    )]
    NoDataFound(Vec<String>),

    #[error("Cannot add more than {limit} topics per feed")]
    TopicLimitExceeded { limit: i64 },

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// `(feed_id, name)` is already taken
    #[error("Topic '{0}' already exists in this feed")]
    DuplicateTopic(String),

    #[error("Username already exists: {0}")]
    Conflict(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Storage failure; the surrounding transaction is rolled back
    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable error code used in API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidPayload(_) => "invalid_payload",
            Error::FetchFailed(_) => "fetch_failed",
            Error::NoDataFound(_) => "no_data_found",
            Error::TopicLimitExceeded { .. } => "topic_limit_exceeded",
            Error::InvalidTopic(_) => "invalid_topic",
            Error::DuplicateTopic(_) => "duplicate_topic",
            Error::Conflict(_) => "conflict",
            Error::InvalidCredentials | Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Persistence(_) | Error::Internal(_) => "internal",
        }
    }
}

impl From<bcrypt::BcryptError> for Error {
    fn from(err: bcrypt::BcryptError) -> Self {
        Error::Internal(format!("password hashing failed: {}", err))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_found_message_joins_topics() {
        let err = Error::NoDataFound(vec!["chess".to_string(), "curling".to_string()]);
        assert_eq!(
            err.to_string(),
            "No data found for the provided topics: chess, curling. \
             Please insert another topic that exists."
        );
        assert_eq!(err.code(), "no_data_found");
    }

    #[test]
    fn test_fetch_failure_converts() {
        let err: Error = FetchFailure::Unauthorized.into();
        assert!(matches!(err, Error::FetchFailed(FetchFailure::Unauthorized)));
        assert_eq!(err.code(), "fetch_failed");
    }

    #[test]
    fn test_topic_limit_message() {
        let err = Error::TopicLimitExceeded { limit: 5 };
        assert_eq!(err.to_string(), "Cannot add more than 5 topics per feed");
    }

    #[test]
    fn test_storage_errors_share_internal_code() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "internal");
        assert_eq!(Error::Internal("boom".into()).code(), "internal");
    }
}
