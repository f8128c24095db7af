use std::sync::Arc;

use tokio::sync::watch;

use storage::repository::Storage;

use crate::Clock;
use crate::config::ClientConfig;
use crate::error::AppServicesError;
use crate::lesson_focus_store::LessonFocusStore;
use crate::notifications::{
    CoordinatorConfig, NotificationCoordinator, QueryCache, ToastSink,
};
use crate::progress_store::ProgressStore;
use crate::remote::{HttpApi, NotificationApi, ProgressApi, PushTransport, WsPushTransport};

/// Assembles the stores and the notification coordinator for a front end.
#[derive(Clone)]
pub struct AppServices {
    progress: Arc<ProgressStore>,
    focus: Arc<LessonFocusStore>,
    query_cache: Arc<QueryCache>,
    notifications_api: Arc<dyn NotificationApi>,
    push: Option<Arc<dyn PushTransport>>,
    coordinator_config: CoordinatorConfig,
}

impl AppServices {
    /// Build services backed by `SQLite` storage and the HTTP/WebSocket API.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the configuration is invalid or storage
    /// initialization fails.
    pub async fn from_config(config: &ClientConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let api_base = config.api_base()?;
        let push_endpoint = config.push_endpoint()?;
        let storage = Storage::sqlite(&config.db_url).await?;

        let http = Arc::new(HttpApi::new(api_base, config.api_token.clone()));
        let push = push_endpoint.map(|url| {
            Arc::new(WsPushTransport::new(url, config.api_token.clone())) as Arc<dyn PushTransport>
        });

        Ok(Self::new(
            storage,
            clock,
            http.clone(),
            http,
            push,
            config.coordinator_config(),
        )
        .await)
    }

    /// Build services from explicit collaborators, restoring persisted state.
    pub async fn new(
        storage: Storage,
        clock: Clock,
        progress_api: Arc<dyn ProgressApi>,
        notifications_api: Arc<dyn NotificationApi>,
        push: Option<Arc<dyn PushTransport>>,
        coordinator_config: CoordinatorConfig,
    ) -> Self {
        let progress =
            ProgressStore::load(clock, progress_api, Arc::clone(&storage.kv)).await;
        let focus = LessonFocusStore::load(Arc::clone(&storage.kv)).await;

        Self {
            progress: Arc::new(progress),
            focus: Arc::new(focus),
            query_cache: Arc::new(QueryCache::new()),
            notifications_api,
            push,
            coordinator_config,
        }
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressStore> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn lesson_focus(&self) -> Arc<LessonFocusStore> {
        Arc::clone(&self.focus)
    }

    #[must_use]
    pub fn query_cache(&self) -> Arc<QueryCache> {
        Arc::clone(&self.query_cache)
    }

    /// Coordinator wired to the shared query cache. Call `spawn` to start it.
    #[must_use]
    pub fn notification_coordinator(
        &self,
        toasts: Arc<dyn ToastSink>,
        focus: Option<watch::Receiver<bool>>,
    ) -> NotificationCoordinator {
        let coordinator = NotificationCoordinator::new(
            self.coordinator_config,
            self.push.clone(),
            Arc::clone(&self.notifications_api),
            self.query_cache.clone(),
            toasts,
        );
        match focus {
            Some(focus) => coordinator.with_focus(focus),
            None => coordinator,
        }
    }
}
