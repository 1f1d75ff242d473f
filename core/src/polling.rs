use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::models::{AnalysisEntry, EntryKey, MealFor};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Entries retried this many times by the backend are no longer waited on.
pub const MAX_POLL_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_retries: MAX_POLL_RETRIES,
        }
    }
}

/// Emitted once when an entry's analysis flips from incomplete to complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionNotice {
    pub entry_id: Option<String>,
    pub meal_for: MealFor,
    pub food_label: String,
    pub image_url: Option<String>,
}

impl CompletionNotice {
    fn from_entry(entry: &AnalysisEntry) -> Self {
        Self {
            entry_id: entry.id.clone(),
            meal_for: entry.meal_for(),
            food_label: entry.food_label.clone(),
            image_url: entry.image_url.clone(),
        }
    }
}

#[must_use]
pub fn needs_polling(entries: &[AnalysisEntry], max_retries: u32) -> bool {
    entries.iter().any(|e| e.needs_polling(max_retries))
}

/// Remembers which entries were last seen incomplete so that completion is
/// reported on the transition only.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    incomplete: HashSet<EntryKey>,
}

impl CompletionTracker {
    pub fn seed(&mut self, entries: &[AnalysisEntry]) {
        self.incomplete.extend(
            entries
                .iter()
                .filter(|e| !e.analysis_complete)
                .map(AnalysisEntry::key),
        );
    }

    /// Compare a fresh snapshot against the previous one.
    ///
    /// Entries that vanished are forgotten; entries first seen already
    /// complete produce nothing.
    pub fn observe(&mut self, entries: &[AnalysisEntry]) -> Vec<CompletionNotice> {
        let mut notices = Vec::new();
        let mut still_incomplete = HashSet::new();
        for entry in entries {
            let key = entry.key();
            if entry.analysis_complete {
                if self.incomplete.contains(&key) {
                    notices.push(CompletionNotice::from_entry(entry));
                }
            } else {
                still_incomplete.insert(key);
            }
        }
        self.incomplete = still_incomplete;
        notices
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    Continue,
    Stop,
}

/// Handle to the background poll task; aborts it when dropped.
#[derive(Debug, Default)]
pub struct PollTimer {
    handle: Option<JoinHandle<()>>,
}

impl PollTimer {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn arm(&mut self, handle: JoinHandle<()>) {
        self.cancel();
        self.handle = Some(handle);
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NutritionPayload;
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, complete: bool, retries: u32) -> AnalysisEntry {
        let mut e = AnalysisEntry::new(
            Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap(),
            id,
            NutritionPayload {
                meal_for: MealFor::Breakfast,
                ..NutritionPayload::default()
            },
        );
        e.id = Some(id.to_string());
        e.analysis_complete = complete;
        e.retry_count = retries;
        e.image_url = Some(format!("https://img.example/{id}.jpg"));
        e
    }

    #[test]
    fn test_needs_polling_respects_retry_ceiling() {
        assert!(!needs_polling(&[], MAX_POLL_RETRIES));
        assert!(!needs_polling(&[entry("a", true, 0)], MAX_POLL_RETRIES));
        assert!(needs_polling(&[entry("a", false, 2)], MAX_POLL_RETRIES));
        assert!(!needs_polling(&[entry("a", false, 3)], MAX_POLL_RETRIES));
    }

    #[test]
    fn test_transition_notified_once() {
        let mut tracker = CompletionTracker::default();
        tracker.seed(&[entry("a", false, 0)]);

        assert!(tracker.observe(&[entry("a", false, 0)]).is_empty());

        let notices = tracker.observe(&[entry("a", true, 0)]);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].entry_id.as_deref(), Some("a"));
        assert_eq!(notices[0].meal_for, MealFor::Breakfast);
        assert_eq!(
            notices[0].image_url.as_deref(),
            Some("https://img.example/a.jpg")
        );

        assert!(tracker.observe(&[entry("a", true, 0)]).is_empty());
    }

    #[test]
    fn test_level_complete_is_silent() {
        let mut tracker = CompletionTracker::default();
        tracker.seed(&[entry("a", true, 0)]);
        assert!(tracker.observe(&[entry("a", true, 0), entry("b", true, 0)]).is_empty());
    }

    #[test]
    fn test_new_incomplete_then_complete() {
        let mut tracker = CompletionTracker::default();
        assert!(tracker.observe(&[entry("b", false, 0)]).is_empty());
        let notices = tracker.observe(&[entry("b", true, 0), entry("c", false, 0)]);
        assert_eq!(notices.len(), 1);
        assert_eq!(tracker.observe(&[entry("c", true, 0)]).len(), 1);
    }

    #[test]
    fn test_vanished_entry_forgotten() {
        let mut tracker = CompletionTracker::default();
        tracker.seed(&[entry("a", false, 0)]);
        assert!(tracker.observe(&[]).is_empty());
        // reappearing complete later is not a transition we saw
        assert!(tracker.observe(&[entry("a", true, 0)]).is_empty());
    }

    #[tokio::test]
    async fn test_poll_timer_cancel() {
        let mut timer = PollTimer::default();
        assert!(!timer.is_running());
        timer.arm(tokio::spawn(std::future::pending::<()>()));
        assert!(timer.is_running());
        timer.cancel();
        assert!(!timer.is_running());
    }
}
