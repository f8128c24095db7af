//! Shared error types for the services crate.

use thiserror::Error;

use lms_core::model::{CourseId, LessonId};
use storage::sqlite::SqliteInitError;

/// Failures talking to the remote API or push channel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("channel closed")]
    Closed,
}

/// Errors emitted by `ProgressStore`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("failed to fetch progress for course {course_id}")]
    Fetch {
        course_id: CourseId,
        #[source]
        source: RemoteError,
    },
    #[error("failed to update completion for lesson {lesson_id}")]
    Toggle {
        lesson_id: LessonId,
        #[source]
        source: RemoteError,
    },
}

/// Errors absorbed by the notification coordinator.
///
/// These are logged and reflected in the connection status; they never
/// reach callers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotificationError {
    #[error("push channel failed")]
    Channel(#[source] RemoteError),
    #[error("unread count poll failed")]
    Poll(#[source] RemoteError),
}

/// Errors emitted while reading client configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{var} must use one of {expected}, got {scheme}")]
    UnsupportedScheme {
        var: &'static str,
        expected: &'static str,
        scheme: String,
    },
    #[error("{var} must be a positive integer, got {raw}")]
    InvalidNumber { var: &'static str, raw: String },
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
