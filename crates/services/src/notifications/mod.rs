//! Notification delivery: a push channel with a polling fallback that
//! invalidates shared query caches and raises toasts.

mod cache;
mod coordinator;
mod machine;
mod toast;

pub use cache::{QueryCache, QueryInvalidator, QueryKey};
pub use coordinator::{CoordinatorConfig, CoordinatorHandle, NotificationCoordinator};
pub use machine::{ConnectionMachine, Reconnect, Transition};
pub use toast::{ToastSink, TracingToastSink};
