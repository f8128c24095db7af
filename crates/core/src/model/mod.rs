mod focus;
mod ids;
mod notification;
mod progress;

pub use ids::{CourseId, LessonId, ParseIdError, StudentId};

pub use focus::{DefaultFocusMode, FocusMode, LessonFocusState, ParseFocusModeError};
pub use notification::{
    ConnectionStatus, NotificationCategory, NotificationPayload, OutboundMessage, PushMessage,
    Toast, ToastTone,
};
pub use progress::{
    CourseProgress, LessonCompletionUpdate, LessonProgress, LessonSnapshot, ProgressAggregate,
    ProgressSnapshot, SectionSnapshot, progress_percentage,
};
