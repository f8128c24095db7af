//! Ports to the remote LMS: the progress service, the unread-count endpoint
//! and the push channel. Stores and the coordinator only see these traits.

use async_trait::async_trait;

use lms_core::model::{
    CourseId, LessonCompletionUpdate, LessonId, OutboundMessage, ProgressSnapshot, StudentId,
};

use crate::error::RemoteError;

mod http;
mod ws;

pub use http::HttpApi;
pub use ws::WsPushTransport;

/// Remote progress service.
#[async_trait]
pub trait ProgressApi: Send + Sync {
    /// Fetch full course progress for a student.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the request fails or the body does not decode.
    async fn get_course_progress(
        &self,
        course_id: &CourseId,
        student_id: &StudentId,
    ) -> Result<ProgressSnapshot, RemoteError>;

    /// Toggle a lesson's completion. `child_id` lets a parent act for a child.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the request fails or the body does not decode.
    async fn update_lesson_completion(
        &self,
        lesson_id: &LessonId,
        completed: bool,
        child_id: Option<&StudentId>,
    ) -> Result<LessonCompletionUpdate, RemoteError>;
}

/// Unread-notification counter used by the polling fallback.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// # Errors
    ///
    /// Returns `RemoteError` if the request fails or the body does not decode.
    async fn unread_count(&self) -> Result<u64, RemoteError>;
}

/// Opens push channels.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns `RemoteError` if the channel cannot be opened.
    async fn connect(&self) -> Result<Box<dyn PushConnection>, RemoteError>;
}

/// One open push channel.
#[async_trait]
pub trait PushConnection: Send {
    /// # Errors
    ///
    /// Returns `RemoteError` if the frame cannot be written.
    async fn send(&mut self, message: OutboundMessage) -> Result<(), RemoteError>;

    /// Next text frame, or `None` once the channel is closed.
    async fn recv(&mut self) -> Option<Result<String, RemoteError>>;

    async fn close(&mut self);
}
