//! Notification delivery task.
//!
//! One spawned task owns the push connection, the polling fallback and the
//! connection machine. Each loop iteration waits on whichever of these can
//! make progress:
//!
//! - commands from the handle (reconnect, shutdown)
//! - focus changes, which pause and resume polling
//! - frames from the open push channel
//! - a connect attempt in flight, bounded by a timeout
//! - the reconnect timer while no channel is open
//! - the poll interval while polling and focused
//!
//! Polling and an open push channel never coexist: a successful connect
//! drops the poller before the next iteration.

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use lms_core::model::{
    ConnectionStatus, NotificationCategory, NotificationPayload, OutboundMessage, PushMessage,
    Toast,
};

use super::cache::{QueryInvalidator, QueryKey};
use super::machine::{ConnectionMachine, Reconnect, Transition};
use super::toast::ToastSink;
use crate::error::{NotificationError, RemoteError};
use crate::remote::{NotificationApi, PushConnection, PushTransport};

/// Tuning for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    /// Failed connect attempts before polling starts.
    pub polling_threshold: u32,
    /// Attempts per burst before reconnecting stops until `reconnect()`.
    pub max_reconnect_attempts: u32,
    pub base_backoff: Duration,
    /// A connect attempt still pending after this counts as failed.
    pub connect_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            polling_threshold: 3,
            max_reconnect_attempts: 5,
            base_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
enum Command {
    Reconnect,
    Shutdown,
}

/// Control handle for a running coordinator.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct CoordinatorHandle {
    status: watch::Receiver<ConnectionStatus>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Start a fresh push retry burst. Ignored while connected.
    pub fn reconnect(&self) {
        if self.commands.send(Command::Reconnect).is_err() {
            debug!("reconnect requested after coordinator stopped");
        }
    }

    /// Close the push channel, stop polling and wait for the task to finish.
    pub async fn shutdown(self) {
        if self.commands.send(Command::Shutdown).is_err() {
            debug!("coordinator already stopped");
        }
        if let Err(err) = self.task.await {
            warn!(error = %err, "notification coordinator task failed");
        }
    }
}

/// Keeps unread-notification state fresh over push, falling back to polling.
pub struct NotificationCoordinator {
    config: CoordinatorConfig,
    push: Option<Arc<dyn PushTransport>>,
    api: Arc<dyn NotificationApi>,
    cache: Arc<dyn QueryInvalidator>,
    toasts: Arc<dyn ToastSink>,
    focus: Option<watch::Receiver<bool>>,
}

impl NotificationCoordinator {
    /// Without a push transport the coordinator polls from the start.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        push: Option<Arc<dyn PushTransport>>,
        api: Arc<dyn NotificationApi>,
        cache: Arc<dyn QueryInvalidator>,
        toasts: Arc<dyn ToastSink>,
    ) -> Self {
        Self {
            config,
            push,
            api,
            cache,
            toasts,
            focus: None,
        }
    }

    /// Pause polling while the receiver reads `false`. Focused by default.
    #[must_use]
    pub fn with_focus(mut self, focus: watch::Receiver<bool>) -> Self {
        self.focus = Some(focus);
        self
    }

    /// Spawn the delivery task on the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> CoordinatorHandle {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (commands, command_rx) = mpsc::unbounded_channel();

        let mut focus = self.focus;
        let focused = focus.as_mut().is_none_or(|rx| *rx.borrow_and_update());
        let runner = Runner {
            machine: ConnectionMachine::new(
                self.config.polling_threshold,
                self.config.max_reconnect_attempts,
                self.config.base_backoff,
            ),
            config: self.config,
            push: self.push,
            api: self.api,
            cache: self.cache,
            toasts: self.toasts,
            status: status_tx,
            conn: None,
            dialing: None,
            retry_at: None,
            poller: None,
            focused,
        };
        let task = tokio::spawn(runner.run(command_rx, focus));

        CoordinatorHandle {
            status: status_rx,
            commands,
            task,
        }
    }
}

struct Poller {
    interval: Interval,
    /// Unset until the first successful poll after polling starts.
    last_count: Option<u64>,
}

impl Poller {
    fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            last_count: None,
        }
    }
}

type PendingConnect =
    Pin<Box<dyn Future<Output = Result<Box<dyn PushConnection>, RemoteError>> + Send>>;

struct Runner {
    config: CoordinatorConfig,
    machine: ConnectionMachine,
    push: Option<Arc<dyn PushTransport>>,
    api: Arc<dyn NotificationApi>,
    cache: Arc<dyn QueryInvalidator>,
    toasts: Arc<dyn ToastSink>,
    status: watch::Sender<ConnectionStatus>,
    conn: Option<Box<dyn PushConnection>>,
    dialing: Option<PendingConnect>,
    retry_at: Option<Instant>,
    poller: Option<Poller>,
    focused: bool,
}

impl Runner {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut focus: Option<watch::Receiver<bool>>,
    ) {
        if self.push.is_some() {
            self.retry_at = Some(Instant::now());
        } else {
            info!("no push endpoint configured; polling for notifications");
            self.machine.start_polling_only();
            self.start_polling().await;
        }
        self.publish();

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Reconnect) => self.request_reconnect(),
                    Some(Command::Shutdown) | None => break,
                },
                changed = focus_changed(&mut focus) => match changed {
                    Some(focused) => self.set_focused(focused).await,
                    None => focus = None,
                },
                frame = next_frame(&mut self.conn) => match frame {
                    Some(Ok(text)) => self.handle_frame(&text).await,
                    Some(Err(source)) => {
                        warn!(error = %NotificationError::Channel(source), "push channel dropped");
                        self.channel_lost().await;
                    }
                    None => {
                        info!("push channel closed");
                        self.channel_lost().await;
                    }
                },
                result = dial(&mut self.dialing) => {
                    self.dialing = None;
                    self.finish_connect(result).await;
                }
                () = sleep_until(self.retry_at) => self.start_connect(),
                () = tick(&mut self.poller, self.focused) => self.poll_once().await,
            }
        }

        self.dialing = None;
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        self.poller = None;
        self.machine.disconnect();
        self.publish();
        debug!("notification coordinator stopped");
    }

    //
    // ─── PUSH CHANNEL ──────────────────────────────────────────────────────────
    //

    /// Begin a connect attempt; the loop keeps polling while it is pending.
    fn start_connect(&mut self) {
        self.retry_at = None;
        let Some(push) = self.push.clone() else {
            return;
        };

        self.machine.connecting();
        self.publish();

        let limit = self.config.connect_timeout;
        self.dialing = Some(Box::pin(async move {
            time::timeout(limit, push.connect())
                .await
                .unwrap_or_else(|_| Err(RemoteError::Timeout(limit)))
        }));
    }

    async fn finish_connect(&mut self, result: Result<Box<dyn PushConnection>, RemoteError>) {
        match result {
            Ok(mut conn) => {
                if let Err(err) = conn.send(OutboundMessage::Ping).await {
                    debug!(error = %err, "initial ping failed");
                }
                self.conn = Some(conn);
                if self.machine.connected() {
                    self.poller = None;
                    info!("push channel recovered; polling stopped");
                } else {
                    info!("push channel connected");
                }
                self.publish();
            }
            Err(source) => {
                let transition = self.machine.connect_failed();
                warn!(
                    error = %NotificationError::Channel(source),
                    attempts = self.machine.attempts(),
                    "push connect failed"
                );
                self.apply(transition).await;
            }
        }
    }

    async fn channel_lost(&mut self) {
        self.conn = None;
        let transition = self.machine.channel_closed();
        self.apply(transition).await;
    }

    fn request_reconnect(&mut self) {
        if self.conn.is_some() || self.dialing.is_some() || self.push.is_none() {
            return;
        }
        info!("manual reconnect requested");
        self.machine.reset_attempts();
        self.retry_at = Some(Instant::now());
    }

    async fn apply(&mut self, transition: Transition) {
        match transition.retry {
            Reconnect::After(delay) => self.retry_at = Some(Instant::now() + delay),
            Reconnect::GiveUp => {
                warn!(
                    attempts = self.machine.attempts(),
                    "push reconnect attempts exhausted"
                );
                self.retry_at = None;
            }
        }
        self.publish();
        if transition.start_polling {
            info!("push unavailable; falling back to polling");
            self.start_polling().await;
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        match PushMessage::parse(text) {
            Ok(PushMessage::Notification(payload)) => {
                self.cache.invalidate(QueryKey::Notifications);
                self.cache.invalidate(QueryKey::UnreadCount);
                let payload = payload.unwrap_or(NotificationPayload {
                    id: None,
                    category: NotificationCategory::Other,
                    title: None,
                    message: None,
                });
                self.toasts.show(Toast::for_notification(&payload));
            }
            Ok(PushMessage::EnrollmentUpdate(_)) => {
                self.cache.invalidate(QueryKey::Enrollments);
            }
            Ok(PushMessage::Ping) => {
                if let Some(conn) = self.conn.as_mut() {
                    if let Err(err) = conn.send(OutboundMessage::Pong).await {
                        debug!(error = %err, "pong failed");
                    }
                }
            }
            Ok(PushMessage::Unknown(kind)) => debug!(kind = %kind, "ignoring push message"),
            Err(err) => debug!(error = %err, "ignoring malformed push frame"),
        }
    }

    //
    // ─── POLLING ───────────────────────────────────────────────────────────────
    //

    async fn start_polling(&mut self) {
        self.poller = Some(Poller::new(self.config.poll_interval));
        if self.focused {
            self.poll_once().await;
        }
    }

    async fn set_focused(&mut self, focused: bool) {
        let regained = focused && !self.focused;
        self.focused = focused;
        debug!(focused, "focus changed");
        if regained {
            if let Some(poller) = self.poller.as_mut() {
                poller.interval.reset();
                self.poll_once().await;
            }
        }
    }

    async fn poll_once(&mut self) {
        let count = match self.api.unread_count().await {
            Ok(count) => count,
            Err(source) => {
                warn!(error = %NotificationError::Poll(source), "skipping poll tick");
                return;
            }
        };
        let Some(poller) = self.poller.as_mut() else {
            return;
        };

        match poller.last_count.replace(count) {
            Some(previous) if count > previous => {
                let delta = count - previous;
                debug!(previous, count, "unread count increased");
                self.cache.invalidate(QueryKey::Notifications);
                self.cache.invalidate(QueryKey::UnreadCount);
                self.toasts.show(Toast::new_notifications(delta));
            }
            _ => {}
        }
    }

    fn publish(&self) {
        let next = self.machine.status();
        let changed = self.status.send_if_modified(|status| {
            let changed = *status != next;
            *status = next;
            changed
        });
        if changed {
            debug!(status = %next, "notification connection status");
        }
    }
}

async fn focus_changed(focus: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
    match focus {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => pending().await,
    }
}

async fn next_frame(
    conn: &mut Option<Box<dyn PushConnection>>,
) -> Option<Result<String, RemoteError>> {
    match conn {
        Some(conn) => conn.recv().await,
        None => pending().await,
    }
}

async fn dial(
    dialing: &mut Option<PendingConnect>,
) -> Result<Box<dyn PushConnection>, RemoteError> {
    match dialing {
        Some(attempt) => attempt.await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(poller: &mut Option<Poller>, focused: bool) {
    match poller {
        Some(poller) if focused => {
            poller.interval.tick().await;
        }
        _ => pending().await,
    }
}
