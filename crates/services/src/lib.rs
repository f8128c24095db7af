#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod lesson_focus_store;
pub mod notifications;
pub mod progress_store;
pub mod remote;

pub use lms_core::Clock;

pub use app_services::AppServices;
pub use config::ClientConfig;
pub use error::{
    AppServicesError, ConfigError, NotificationError, ProgressError, RemoteError,
};
pub use lesson_focus_store::LessonFocusStore;
pub use notifications::{
    CoordinatorConfig, CoordinatorHandle, NotificationCoordinator, QueryCache, QueryInvalidator,
    QueryKey, ToastSink, TracingToastSink,
};
pub use progress_store::ProgressStore;
