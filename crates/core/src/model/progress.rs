use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CourseId, LessonId};

//
// ─── WIRE SHAPES ───────────────────────────────────────────────────────────────
//

/// One lesson as reported by the remote progress service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSnapshot {
    pub id: LessonId,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_completed_at: Option<DateTime<Utc>>,
}

/// A course section; only its lessons matter for progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSnapshot {
    #[serde(default)]
    pub lessons: Vec<LessonSnapshot>,
}

/// Full course progress for one student, as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub course_id: CourseId,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    #[serde(default)]
    pub progress_percentage: Option<u8>,
    #[serde(default)]
    pub sections: Vec<SectionSnapshot>,
}

/// Server-confirmed course counters carried by a completion toggle response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAggregate {
    pub course_id: CourseId,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    #[serde(default)]
    pub progress_percentage: Option<u8>,
}

impl ProgressAggregate {
    /// Percentage reported by the server, or derived from the counts when omitted.
    #[must_use]
    pub fn percentage(&self) -> u8 {
        self.progress_percentage
            .map_or_else(
                || progress_percentage(self.completed_lessons, self.total_lessons),
                |value| value.min(100),
            )
    }
}

/// Response of a completion toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompletionUpdate {
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_completed_at: Option<DateTime<Utc>>,
    pub course_progress: ProgressAggregate,
}

//
// ─── LOCAL STATE ───────────────────────────────────────────────────────────────
//

/// Completion state of a single lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub lesson_id: LessonId,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// First time the lesson was ever completed; never overwritten once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_completed_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    fn from_snapshot(lesson: LessonSnapshot) -> Self {
        let first_completed_at = lesson
            .first_completed_at
            .or(if lesson.completed { lesson.completed_at } else { None });
        Self {
            lesson_id: lesson.id,
            completed: lesson.completed,
            completed_at: lesson.completed_at,
            first_completed_at,
        }
    }

    fn apply(&mut self, update: &LessonCompletionUpdate, now: DateTime<Utc>) {
        self.completed = update.completed;
        self.completed_at = if update.completed {
            Some(update.completed_at.unwrap_or(now))
        } else {
            None
        };
        if self.first_completed_at.is_none() {
            self.first_completed_at = update
                .first_completed_at
                .or(if update.completed { self.completed_at } else { None });
        }
    }
}

/// Local mirror of one course's progress for the signed-in learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    course_id: CourseId,
    completed_lessons: u32,
    total_lessons: u32,
    progress_percentage: u8,
    lessons: HashMap<LessonId, LessonProgress>,
    last_updated: DateTime<Utc>,
}

impl CourseProgress {
    /// Build course progress from a full remote snapshot.
    ///
    /// The lesson map is rebuilt from scratch; counters are taken from the snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: ProgressSnapshot, now: DateTime<Utc>) -> Self {
        let progress_percentage = snapshot.progress_percentage.map_or_else(
            || progress_percentage(snapshot.completed_lessons, snapshot.total_lessons),
            |value| value.min(100),
        );
        let lessons = snapshot
            .sections
            .into_iter()
            .flat_map(|section| section.lessons)
            .map(|lesson| (lesson.id.clone(), LessonProgress::from_snapshot(lesson)))
            .collect();

        Self {
            course_id: snapshot.course_id,
            completed_lessons: snapshot.completed_lessons,
            total_lessons: snapshot.total_lessons,
            progress_percentage,
            lessons,
            last_updated: now,
        }
    }

    /// Create a course that is only known through a single toggle response.
    #[must_use]
    pub fn from_lesson_update(
        lesson_id: &LessonId,
        update: &LessonCompletionUpdate,
        now: DateTime<Utc>,
    ) -> Self {
        let aggregate = &update.course_progress;
        let mut progress = Self {
            course_id: aggregate.course_id.clone(),
            completed_lessons: 0,
            total_lessons: 0,
            progress_percentage: 0,
            lessons: HashMap::new(),
            last_updated: now,
        };
        progress.apply_lesson_update(lesson_id, update, now);
        progress
    }

    /// Patch one lesson entry and adopt the server's counters verbatim.
    pub fn apply_lesson_update(
        &mut self,
        lesson_id: &LessonId,
        update: &LessonCompletionUpdate,
        now: DateTime<Utc>,
    ) {
        self.lessons
            .entry(lesson_id.clone())
            .or_insert_with(|| LessonProgress {
                lesson_id: lesson_id.clone(),
                completed: false,
                completed_at: None,
                first_completed_at: None,
            })
            .apply(update, now);

        let aggregate = &update.course_progress;
        self.completed_lessons = aggregate.completed_lessons;
        self.total_lessons = aggregate.total_lessons;
        self.progress_percentage = aggregate.percentage();
        self.last_updated = now;
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    #[must_use]
    pub fn completed_lessons(&self) -> u32 {
        self.completed_lessons
    }

    #[must_use]
    pub fn total_lessons(&self) -> u32 {
        self.total_lessons
    }

    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        self.progress_percentage
    }

    #[must_use]
    pub fn lessons(&self) -> &HashMap<LessonId, LessonProgress> {
        &self.lessons
    }

    #[must_use]
    pub fn lesson(&self, lesson_id: &LessonId) -> Option<&LessonProgress> {
        self.lessons.get(lesson_id)
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Whether the lesson is known and completed.
    #[must_use]
    pub fn is_lesson_completed(&self, lesson_id: &LessonId) -> bool {
        self.lessons
            .get(lesson_id)
            .is_some_and(|lesson| lesson.completed)
    }

    #[must_use]
    pub fn completed_lesson_ids(&self) -> HashSet<LessonId> {
        self.lessons
            .values()
            .filter(|lesson| lesson.completed)
            .map(|lesson| lesson.lesson_id.clone())
            .collect()
    }

    /// True when the stored counter matches the completed entries in the map.
    ///
    /// Only meaningful once every lesson of the course is present locally.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let completed = self.lessons.values().filter(|lesson| lesson.completed).count();
        usize::try_from(self.completed_lessons).is_ok_and(|stored| stored == completed)
    }
}

/// Integer completion percentage, rounded half up and clamped to `0..=100`.
///
/// Returns `0` for a course without lessons.
#[must_use]
pub fn progress_percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = u64::from(completed.min(total));
    let total = u64::from(total);
    let rounded = (200 * completed + total) / (2 * total);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn lesson(id: &str, completed: bool) -> LessonSnapshot {
        LessonSnapshot {
            id: LessonId::new(id),
            completed,
            completed_at: completed.then(fixed_now),
            first_completed_at: None,
        }
    }

    fn snapshot(course: &str, lessons: Vec<LessonSnapshot>) -> ProgressSnapshot {
        let total = u32::try_from(lessons.len()).unwrap();
        let completed = u32::try_from(lessons.iter().filter(|l| l.completed).count()).unwrap();
        ProgressSnapshot {
            course_id: CourseId::new(course),
            completed_lessons: completed,
            total_lessons: total,
            progress_percentage: None,
            sections: vec![SectionSnapshot { lessons }],
        }
    }

    fn update(course: &str, completed: bool, done: u32, total: u32) -> LessonCompletionUpdate {
        LessonCompletionUpdate {
            completed,
            completed_at: None,
            first_completed_at: None,
            course_progress: ProgressAggregate {
                course_id: CourseId::new(course),
                completed_lessons: done,
                total_lessons: total,
                progress_percentage: None,
            },
        }
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(2, 3), 67);
        assert_eq!(progress_percentage(1, 8), 13);
        assert_eq!(progress_percentage(3, 3), 100);
    }

    #[test]
    fn percentage_is_zero_without_lessons() {
        assert_eq!(progress_percentage(0, 0), 0);
        assert_eq!(progress_percentage(5, 0), 0);
    }

    #[test]
    fn percentage_clamps_overcount() {
        assert_eq!(progress_percentage(7, 5), 100);
    }

    #[test]
    fn snapshot_flattens_sections() {
        let mut snap = snapshot("c1", vec![lesson("l1", true), lesson("l2", false)]);
        snap.sections.push(SectionSnapshot {
            lessons: vec![lesson("l3", true)],
        });
        snap.completed_lessons = 2;
        snap.total_lessons = 3;

        let progress = CourseProgress::from_snapshot(snap, fixed_now());
        assert_eq!(progress.lessons().len(), 3);
        assert_eq!(progress.progress_percentage(), 67);
        assert!(progress.is_lesson_completed(&LessonId::new("l3")));
        assert!(!progress.is_lesson_completed(&LessonId::new("l2")));
        assert!(progress.is_consistent());
    }

    #[test]
    fn snapshot_seeds_first_completion() {
        let progress =
            CourseProgress::from_snapshot(snapshot("c1", vec![lesson("l1", true)]), fixed_now());
        let entry = progress.lesson(&LessonId::new("l1")).unwrap();
        assert_eq!(entry.first_completed_at, Some(fixed_now()));
    }

    #[test]
    fn update_keeps_first_completion_across_toggles() {
        let mut progress =
            CourseProgress::from_snapshot(snapshot("c1", vec![lesson("l1", false)]), fixed_now());
        let lesson_id = LessonId::new("l1");

        progress.apply_lesson_update(&lesson_id, &update("c1", true, 1, 1), fixed_now());
        let first = progress.lesson(&lesson_id).unwrap().first_completed_at;
        assert_eq!(first, Some(fixed_now()));

        let later = fixed_now() + Duration::hours(1);
        progress.apply_lesson_update(&lesson_id, &update("c1", false, 0, 1), later);
        let entry = progress.lesson(&lesson_id).unwrap();
        assert!(!entry.completed);
        assert_eq!(entry.completed_at, None);
        assert_eq!(entry.first_completed_at, first);

        let even_later = later + Duration::hours(1);
        progress.apply_lesson_update(&lesson_id, &update("c1", true, 1, 1), even_later);
        let entry = progress.lesson(&lesson_id).unwrap();
        assert_eq!(entry.completed_at, Some(even_later));
        assert_eq!(entry.first_completed_at, first);
    }

    #[test]
    fn update_writes_server_counts_verbatim() {
        let mut progress = CourseProgress::from_snapshot(
            snapshot("c1", vec![lesson("l1", false), lesson("l2", false)]),
            fixed_now(),
        );
        // Server knows about a completion we never saw locally.
        progress.apply_lesson_update(&LessonId::new("l1"), &update("c1", true, 2, 2), fixed_now());
        assert_eq!(progress.completed_lessons(), 2);
        assert_eq!(progress.progress_percentage(), 100);
        assert!(!progress.is_consistent());
    }

    #[test]
    fn course_can_be_created_from_single_update() {
        let lesson_id = LessonId::new("l5");
        let progress =
            CourseProgress::from_lesson_update(&lesson_id, &update("c9", true, 1, 4), fixed_now());
        assert_eq!(progress.course_id(), &CourseId::new("c9"));
        assert_eq!(progress.total_lessons(), 4);
        assert_eq!(progress.progress_percentage(), 25);
        assert!(progress.is_lesson_completed(&lesson_id));
    }

    #[test]
    fn server_percentage_is_clamped() {
        let mut agg = update("c1", true, 1, 1).course_progress;
        agg.progress_percentage = Some(140);
        assert_eq!(agg.percentage(), 100);
    }

    #[test]
    fn snapshot_parses_camel_case_json() {
        let json = r#"{
            "courseId": "c1",
            "completedLessons": 1,
            "totalLessons": 2,
            "progressPercentage": 50,
            "sections": [
                { "lessons": [
                    { "id": "l1", "completed": true, "completedAt": "2023-11-14T22:13:20Z" },
                    { "id": "l2", "completed": false }
                ] }
            ]
        }"#;
        let snap: ProgressSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.sections[0].lessons.len(), 2);
        assert_eq!(snap.sections[0].lessons[0].completed_at, Some(fixed_now()));
    }
}
