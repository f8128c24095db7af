use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use lms_core::model::{DefaultFocusMode, FocusMode, LessonFocusState};
use storage::{KeyValueStore, StorageError, load_versioned, save_versioned};

pub const FOCUS_STORAGE_KEY: &str = "lesson-focus-storage";
const FOCUS_STATE_VERSION: u32 = 1;

/// Persisted lesson-focus preferences with a derived current mode.
///
/// Every setter writes through to the key-value store. Persist failures are
/// logged and never undo the in-memory change.
pub struct LessonFocusStore {
    kv: Arc<dyn KeyValueStore>,
    state: RwLock<LessonFocusState>,
    persist_lock: Mutex<()>,
    changes: watch::Sender<LessonFocusState>,
}

impl LessonFocusStore {
    /// Store with default settings (`auto`, no preference, `modern`, choice allowed).
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_state(kv, LessonFocusState::default())
    }

    /// Restore persisted settings, falling back to defaults when absent or unreadable.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let state = match load_versioned::<LessonFocusState, _>(
            kv.as_ref(),
            FOCUS_STORAGE_KEY,
            FOCUS_STATE_VERSION,
            migrate_focus,
        )
        .await
        {
            Ok(Some(state)) => LessonFocusState::from_persisted(
                state.focus_mode(),
                state.user_preference(),
                state.admin_default_mode(),
                state.allow_user_choice(),
            ),
            Ok(None) => LessonFocusState::default(),
            Err(err) => {
                warn!(error = %err, "discarding unreadable persisted focus settings");
                LessonFocusState::default()
            }
        };
        debug!(mode = %state.current_mode(), "lesson focus store loaded");
        Self::with_state(kv, state)
    }

    fn with_state(kv: Arc<dyn KeyValueStore>, state: LessonFocusState) -> Self {
        let (changes, _) = watch::channel(state.clone());
        Self {
            kv,
            state: RwLock::new(state),
            persist_lock: Mutex::new(()),
            changes,
        }
    }

    pub async fn set_focus_mode(&self, mode: FocusMode) {
        self.update(|state| state.set_focus_mode(mode)).await;
    }

    /// Record the learner's preference.
    ///
    /// Stored even while user choice is disallowed; it only takes effect
    /// once an admin allows choice again.
    pub async fn set_user_preference(&self, preference: Option<FocusMode>) {
        self.update(|state| state.set_user_preference(preference)).await;
    }

    /// Apply both admin settings in one step.
    pub async fn set_admin_settings(&self, default_mode: DefaultFocusMode, allow_user_choice: bool) {
        self.update(|state| state.set_admin_settings(default_mode, allow_user_choice))
            .await;
    }

    /// Restore defaults and persist them.
    pub async fn reset(&self) {
        self.update(|state| *state = LessonFocusState::default()).await;
    }

    /// Mode to render right now. Derived on every call.
    #[must_use]
    pub fn get_current_mode(&self) -> DefaultFocusMode {
        self.read(LessonFocusState::current_mode)
    }

    #[must_use]
    pub fn can_user_choose(&self) -> bool {
        self.read(LessonFocusState::allow_user_choice)
    }

    #[must_use]
    pub fn snapshot(&self) -> LessonFocusState {
        self.read(LessonFocusState::clone)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LessonFocusState> {
        self.changes.subscribe()
    }

    fn read<T>(&self, f: impl FnOnce(&LessonFocusState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&*state)
    }

    async fn update(&self, f: impl FnOnce(&mut LessonFocusState)) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut *state);
            // Published under the write guard so subscribers see writes in order.
            self.changes.send_if_modified(|current| {
                if *current == *state {
                    return false;
                }
                current.clone_from(&*state);
                true
            });
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let state = self.snapshot();
        if let Err(err) =
            save_versioned(self.kv.as_ref(), FOCUS_STORAGE_KEY, FOCUS_STATE_VERSION, &state).await
        {
            warn!(error = %err, "failed to persist focus settings");
        }
    }
}

// Unversioned blobs share the current field layout.
fn migrate_focus(version: u32, state: Value) -> Result<Value, StorageError> {
    match version {
        0 => Ok(state),
        other => Err(StorageError::Serialization(format!(
            "no migration from focus version {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use storage::InMemoryRepository;

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn load(&self, _key: &str) -> Result<Option<Value>, StorageError> {
            Err(StorageError::Connection("disk unavailable".into()))
        }

        async fn save(&self, _key: &str, _value: &Value) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk unavailable".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn defaults_resolve_to_modern() {
        let store = LessonFocusStore::new(Arc::new(InMemoryRepository::new()));
        assert_eq!(store.get_current_mode(), DefaultFocusMode::Modern);
        assert!(store.can_user_choose());
        assert_eq!(store.snapshot(), LessonFocusState::default());
    }

    #[tokio::test]
    async fn preference_wins_while_choice_allowed() {
        let store = LessonFocusStore::new(Arc::new(InMemoryRepository::new()));
        store
            .set_admin_settings(DefaultFocusMode::Modern, true)
            .await;
        store.set_user_preference(Some(FocusMode::Classic)).await;
        store.set_focus_mode(FocusMode::Auto).await;

        assert_eq!(store.get_current_mode(), DefaultFocusMode::Classic);
    }

    #[tokio::test]
    async fn revoking_choice_drops_preference() {
        let store = LessonFocusStore::new(Arc::new(InMemoryRepository::new()));
        store.set_user_preference(Some(FocusMode::Classic)).await;
        store
            .set_admin_settings(DefaultFocusMode::Modern, false)
            .await;

        assert_eq!(store.snapshot().user_preference(), None);
        assert_eq!(store.get_current_mode(), DefaultFocusMode::Modern);
        assert!(!store.can_user_choose());
    }

    #[tokio::test]
    async fn auto_follows_admin_default() {
        let store = LessonFocusStore::new(Arc::new(InMemoryRepository::new()));
        store
            .set_admin_settings(DefaultFocusMode::Classic, false)
            .await;
        store.set_focus_mode(FocusMode::Auto).await;
        assert_eq!(store.get_current_mode(), DefaultFocusMode::Classic);
    }

    #[tokio::test]
    async fn settings_survive_reload() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryRepository::new());
        let store = LessonFocusStore::new(kv.clone());
        store
            .set_admin_settings(DefaultFocusMode::Classic, true)
            .await;
        store.set_user_preference(Some(FocusMode::Modern)).await;

        let reloaded = LessonFocusStore::load(kv).await;
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert_eq!(reloaded.get_current_mode(), DefaultFocusMode::Modern);
    }

    #[tokio::test]
    async fn unversioned_blob_with_orphaned_preference_is_normalized() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryRepository::new());
        kv.save(
            FOCUS_STORAGE_KEY,
            &json!({
                "focusMode": "auto",
                "userPreference": "classic",
                "adminDefaultMode": "modern",
                "allowUserChoice": false
            }),
        )
        .await
        .unwrap();

        let store = LessonFocusStore::load(kv).await;
        assert_eq!(store.snapshot().user_preference(), None);
        assert_eq!(store.get_current_mode(), DefaultFocusMode::Modern);
    }

    #[tokio::test]
    async fn persist_failure_keeps_in_memory_change() {
        let store = LessonFocusStore::load(Arc::new(FailingStore)).await;
        assert_eq!(store.snapshot(), LessonFocusState::default());

        store.set_focus_mode(FocusMode::Classic).await;
        assert_eq!(store.get_current_mode(), DefaultFocusMode::Classic);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_setters_leave_subscribers_on_final_state() {
        let store = Arc::new(LessonFocusStore::new(Arc::new(InMemoryRepository::new())));
        let rx = store.subscribe();

        let writers: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mode = if i % 2 == 0 { FocusMode::Classic } else { FocusMode::Modern };
                    store.set_focus_mode(mode).await;
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(*rx.borrow(), store.snapshot());
    }

    #[tokio::test]
    async fn subscribers_observe_changes_and_reset() {
        let store = LessonFocusStore::new(Arc::new(InMemoryRepository::new()));
        let mut rx = store.subscribe();

        store.set_focus_mode(FocusMode::Classic).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().focus_mode(), FocusMode::Classic);

        store.reset().await;
        assert_eq!(rx.borrow_and_update().focus_mode(), FocusMode::Auto);
    }
}
