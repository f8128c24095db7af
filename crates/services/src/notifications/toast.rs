use lms_core::model::{Toast, ToastTone};
use tracing::{info, warn};

/// Receives user-facing toasts raised by the coordinator.
pub trait ToastSink: Send + Sync {
    fn show(&self, toast: Toast);
}

/// Writes toasts to the log; used by headless front ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingToastSink;

impl ToastSink for TracingToastSink {
    fn show(&self, toast: Toast) {
        let body = toast.message.as_deref().unwrap_or_default();
        match toast.tone {
            ToastTone::Error => warn!(icon = toast.icon, body, "{}", toast.title),
            ToastTone::Success | ToastTone::Info => {
                info!(icon = toast.icon, body, "{}", toast.title);
            }
        }
    }
}
