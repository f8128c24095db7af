//! Local mirror of per-course lesson completion.
//!
//! Writes are confirmed by the remote service before the map is patched, so a
//! failed toggle leaves the store exactly as it was. The lesson map is the only
//! mutable state and is changed only through the actions on `ProgressStore`.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use lms_core::Clock;
use lms_core::model::{CourseId, CourseProgress, LessonCompletionUpdate, LessonId, StudentId};
use storage::{KeyValueStore, StorageError, load_versioned, save_versioned};

use crate::error::ProgressError;
use crate::remote::ProgressApi;

pub const PROGRESS_STORAGE_KEY: &str = "course-progress-storage";
const PROGRESS_STATE_VERSION: u32 = 1;

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedProgress {
    #[serde(default)]
    course_progresses: HashMap<CourseId, CourseProgress>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedProgressRef<'a> {
    course_progresses: &'a HashMap<CourseId, CourseProgress>,
}

/// A confirmed toggle kept around so an in-flight fetch can replay it.
struct LessonPatch {
    seq: u64,
    lesson_id: LessonId,
    update: LessonCompletionUpdate,
    applied_at: DateTime<Utc>,
}

#[derive(Default)]
struct ProgressState {
    course_progresses: HashMap<CourseId, CourseProgress>,
    loading: usize,
    // Count per lesson so overlapping toggles of the same lesson stay tracked.
    updating: HashMap<LessonId, usize>,
    // Bumped on every confirmed toggle; never reset while the store lives.
    write_seq: u64,
    // Only populated while a fetch is in flight.
    pending_patches: Vec<LessonPatch>,
}

impl ProgressState {
    fn replay_patches(&self, progress: &mut CourseProgress, since: u64) {
        for patch in &self.pending_patches {
            if patch.seq > since && patch.update.course_progress.course_id == *progress.course_id() {
                progress.apply_lesson_update(&patch.lesson_id, &patch.update, patch.applied_at);
            }
        }
    }
}

pub struct ProgressStore {
    clock: Clock,
    api: Arc<dyn ProgressApi>,
    kv: Arc<dyn KeyValueStore>,
    state: RwLock<ProgressState>,
    persist_lock: Mutex<()>,
    revision: watch::Sender<u64>,
}

impl ProgressStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(clock: Clock, api: Arc<dyn ProgressApi>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_courses(clock, api, kv, HashMap::new())
    }

    /// Create a store seeded from persisted course progress.
    ///
    /// Loading flags always start idle. An unreadable blob is logged and
    /// replaced by an empty store.
    pub async fn load(clock: Clock, api: Arc<dyn ProgressApi>, kv: Arc<dyn KeyValueStore>) -> Self {
        let persisted = load_versioned::<PersistedProgress, _>(
            kv.as_ref(),
            PROGRESS_STORAGE_KEY,
            PROGRESS_STATE_VERSION,
            migrate_progress,
        )
        .await;

        let courses = match persisted {
            Ok(Some(persisted)) => persisted.course_progresses,
            Ok(None) => HashMap::new(),
            Err(err) => {
                warn!(error = %err, "discarding unreadable persisted course progress");
                HashMap::new()
            }
        };
        debug!(courses = courses.len(), "progress store loaded");
        Self::with_courses(clock, api, kv, courses)
    }

    fn with_courses(
        clock: Clock,
        api: Arc<dyn ProgressApi>,
        kv: Arc<dyn KeyValueStore>,
        course_progresses: HashMap<CourseId, CourseProgress>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            clock,
            api,
            kv,
            state: RwLock::new(ProgressState {
                course_progresses,
                ..ProgressState::default()
            }),
            persist_lock: Mutex::new(()),
            revision,
        }
    }

    //
    // ─── ACTIONS ───────────────────────────────────────────────────────────────
    //

    /// Fetch a course's progress and replace the local lesson map for it.
    ///
    /// Other courses are never touched. The lesson map is rebuilt from the
    /// snapshot; toggles confirmed while the fetch was in flight are replayed
    /// on top of it so they are not lost.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Fetch` if the remote call fails.
    pub async fn initialize_course_progress(
        &self,
        course_id: &CourseId,
        student_id: &StudentId,
    ) -> Result<CourseProgress, ProgressError> {
        let issued_seq = {
            let mut state = self.write();
            state.loading += 1;
            state.write_seq
        };
        self.bump();

        let result = self.api.get_course_progress(course_id, student_id).await;

        let outcome = {
            let mut state = self.write();
            state.loading = state.loading.saturating_sub(1);
            let outcome = match result {
                Err(source) => Err(ProgressError::Fetch {
                    course_id: course_id.clone(),
                    source,
                }),
                Ok(mut snapshot) => {
                    if snapshot.course_id != *course_id {
                        warn!(
                            requested = %course_id,
                            received = %snapshot.course_id,
                            "progress response for a different course; keeping requested id"
                        );
                        snapshot.course_id = course_id.clone();
                    }
                    let mut fetched = CourseProgress::from_snapshot(snapshot, self.clock.now());
                    state.replay_patches(&mut fetched, issued_seq);
                    state
                        .course_progresses
                        .insert(course_id.clone(), fetched.clone());
                    Ok(fetched)
                }
            };
            if state.loading == 0 {
                state.pending_patches.clear();
            }
            outcome
        };
        self.bump();

        match &outcome {
            Ok(_) => self.persist().await,
            Err(err) => warn!(course = %course_id, error = %err, "course progress fetch failed"),
        }
        outcome
    }

    /// Toggle a lesson's completion on the server, then patch the local entry.
    ///
    /// The course counters are taken from the server response. If the course
    /// is not known locally it is created from the response.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Toggle` if the remote call fails; local state is
    /// left unchanged apart from the in-flight marker being cleared.
    pub async fn update_lesson_completion(
        &self,
        lesson_id: &LessonId,
        completed: bool,
        child_id: Option<&StudentId>,
    ) -> Result<CourseProgress, ProgressError> {
        *self.write().updating.entry(lesson_id.clone()).or_insert(0) += 1;
        self.bump();

        let result = self
            .api
            .update_lesson_completion(lesson_id, completed, child_id)
            .await;

        let outcome = {
            let mut state = self.write();
            if let Entry::Occupied(mut entry) = state.updating.entry(lesson_id.clone()) {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                }
            }

            match result {
                Err(source) => Err(ProgressError::Toggle {
                    lesson_id: lesson_id.clone(),
                    source,
                }),
                Ok(update) => {
                    let now = self.clock.now();
                    state.write_seq += 1;
                    if state.loading > 0 {
                        let seq = state.write_seq;
                        state.pending_patches.push(LessonPatch {
                            seq,
                            lesson_id: lesson_id.clone(),
                            update: update.clone(),
                            applied_at: now,
                        });
                    }
                    let course_id = update.course_progress.course_id.clone();
                    let progress = match state.course_progresses.entry(course_id) {
                        Entry::Occupied(mut entry) => {
                            entry.get_mut().apply_lesson_update(lesson_id, &update, now);
                            entry.get().clone()
                        }
                        Entry::Vacant(entry) => entry
                            .insert(CourseProgress::from_lesson_update(lesson_id, &update, now))
                            .clone(),
                    };
                    let fully_known = usize::try_from(progress.total_lessons())
                        .is_ok_and(|total| total == progress.lessons().len());
                    if fully_known && !progress.is_consistent() {
                        debug!(
                            course = %progress.course_id(),
                            "local lesson map disagrees with server counters"
                        );
                    }
                    Ok(progress)
                }
            }
        };
        self.bump();

        match &outcome {
            Ok(_) => self.persist().await,
            Err(err) => warn!(lesson = %lesson_id, error = %err, "lesson completion update failed"),
        }
        outcome
    }

    /// Drop one course. No network call; clearing an unknown course is a no-op.
    pub async fn clear_course_progress(&self, course_id: &CourseId) {
        let removed = self.write().course_progresses.remove(course_id).is_some();
        if removed {
            self.bump();
            self.persist().await;
        }
    }

    /// Drop every course. No network call.
    pub async fn clear_all_progress(&self) {
        self.write().course_progresses.clear();
        self.bump();
        self.persist().await;
    }

    //
    // ─── READS ─────────────────────────────────────────────────────────────────
    //

    /// `false` for unknown courses or lessons.
    #[must_use]
    pub fn get_lesson_completion_status(&self, course_id: &CourseId, lesson_id: &LessonId) -> bool {
        self.read()
            .course_progresses
            .get(course_id)
            .is_some_and(|course| course.is_lesson_completed(lesson_id))
    }

    #[must_use]
    pub fn get_course_progress(&self, course_id: &CourseId) -> Option<CourseProgress> {
        self.read().course_progresses.get(course_id).cloned()
    }

    /// Completed lesson ids; empty for an unknown course.
    #[must_use]
    pub fn get_completed_lessons_set(&self, course_id: &CourseId) -> HashSet<LessonId> {
        self.read()
            .course_progresses
            .get(course_id)
            .map(CourseProgress::completed_lesson_ids)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn course_ids(&self) -> Vec<CourseId> {
        let mut ids: Vec<_> = self.read().course_progresses.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.read().loading > 0
    }

    #[must_use]
    pub fn is_updating(&self) -> bool {
        !self.read().updating.is_empty()
    }

    #[must_use]
    pub fn is_updating_lesson(&self, lesson_id: &LessonId) -> bool {
        self.read().updating.contains_key(lesson_id)
    }

    #[must_use]
    pub fn updating_lessons(&self) -> HashSet<LessonId> {
        self.read().updating.keys().cloned().collect()
    }

    /// Revision counter bumped on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    //
    // ─── INTERNALS ─────────────────────────────────────────────────────────────
    //

    fn read(&self) -> RwLockReadGuard<'_, ProgressState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProgressState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    async fn persist(&self) {
        // Serialize after taking the lock so the newest map is written last.
        let _guard = self.persist_lock.lock().await;
        let encoded = {
            let state = self.read();
            serde_json::to_value(PersistedProgressRef {
                course_progresses: &state.course_progresses,
            })
        };
        let result = match encoded {
            Ok(value) => {
                save_versioned(
                    self.kv.as_ref(),
                    PROGRESS_STORAGE_KEY,
                    PROGRESS_STATE_VERSION,
                    &value,
                )
                .await
            }
            Err(err) => Err(StorageError::from(err)),
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to persist course progress");
        }
    }
}

// Unversioned blobs already used the `{ courseProgresses }` layout.
fn migrate_progress(version: u32, state: Value) -> Result<Value, StorageError> {
    match version {
        0 => Ok(state),
        other => Err(StorageError::Serialization(format!(
            "no migration from progress version {other}"
        ))),
    }
}
