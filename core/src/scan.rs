use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{AnalysisEntry, MealFor};

/// Image submitted to the analysis service.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub image: Vec<u8>,
    /// Reference shown while the scan is pending (file name or local path).
    pub preview: String,
    pub meal_for: MealFor,
}

/// Events streamed back by the gateway for one submission.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Progress { percent: f64, phase: String },
    Completed(AnalysisEntry),
    Failed(String),
}

/// The single optimistic scan shown ahead of the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingScan {
    pub scan_id: Uuid,
    pub preview: String,
    pub progress: f64,
    pub phase: String,
    pub meal_for: MealFor,
}

impl PendingScan {
    /// Rounded percentage held inside 1..=99 until a terminal event arrives.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn display_percent(&self) -> u8 {
        self.progress.round().clamp(1.0, 99.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    InFlight(PendingScan),
    Failed {
        meal_for: MealFor,
        preview: String,
        reason: String,
    },
}

/// Owns at most one in-flight scan submission.
#[derive(Debug, Default)]
pub struct PendingScanTracker {
    state: ScanState,
}

impl PendingScanTracker {
    #[must_use]
    pub fn state(&self) -> &ScanState {
        &self.state
    }

    #[must_use]
    pub fn pending(&self) -> Option<&PendingScan> {
        match &self.state {
            ScanState::InFlight(scan) => Some(scan),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, ScanState::InFlight(_))
    }

    /// Begin a scan. Starting over a failed scan implicitly retakes it.
    pub fn start(&mut self, meal_for: MealFor, preview: &str) -> Result<PendingScan, LedgerError> {
        if self.is_in_flight() {
            return Err(LedgerError::ScanInFlight);
        }
        let scan = PendingScan {
            scan_id: Uuid::new_v4(),
            preview: preview.to_string(),
            progress: 0.0,
            phase: "uploading".to_string(),
            meal_for,
        };
        info!(scan_id = %scan.scan_id, %meal_for, "scan started");
        self.state = ScanState::InFlight(scan.clone());
        Ok(scan)
    }

    /// Apply a progress event. Ignored unless a scan is in flight.
    pub fn progress(&mut self, percent: f64, phase: &str) -> bool {
        let ScanState::InFlight(scan) = &mut self.state else {
            debug!("progress event with no scan in flight; ignoring");
            return false;
        };
        if percent.is_finite() {
            scan.progress = percent.clamp(0.0, 100.0);
        }
        if !phase.is_empty() {
            scan.phase = phase.to_string();
        }
        true
    }

    /// Hand the finished entry back exactly once and clear the pending state.
    pub fn complete(&mut self, entry: AnalysisEntry) -> Option<AnalysisEntry> {
        match std::mem::take(&mut self.state) {
            ScanState::InFlight(scan) => {
                info!(scan_id = %scan.scan_id, label = %entry.food_label, "scan completed");
                Some(entry)
            }
            other => {
                debug!("completion with no scan in flight; dropping");
                self.state = other;
                None
            }
        }
    }

    /// Surface a failure; the ledger is not touched.
    pub fn fail(&mut self, reason: &str) {
        if let ScanState::InFlight(scan) = std::mem::take(&mut self.state) {
            warn!(scan_id = %scan.scan_id, reason, "scan failed");
            self.state = ScanState::Failed {
                meal_for: scan.meal_for,
                preview: scan.preview,
                reason: reason.to_string(),
            };
        }
    }

    /// Clear a failure so the user can resubmit, returning what to resubmit.
    pub fn retake(&mut self) -> Option<(MealFor, String)> {
        match std::mem::take(&mut self.state) {
            ScanState::Failed {
                meal_for, preview, ..
            } => Some((meal_for, preview)),
            other => {
                self.state = other;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NutritionPayload;
    use chrono::Utc;

    fn finished() -> AnalysisEntry {
        AnalysisEntry::new(Utc::now(), "Salad", NutritionPayload::default())
    }

    #[test]
    fn test_start_sets_optimistic_state() {
        let mut tracker = PendingScanTracker::default();
        let scan = tracker.start(MealFor::Lunch, "salad.jpg").unwrap();
        assert_eq!(scan.progress, 0.0);
        assert_eq!(scan.meal_for, MealFor::Lunch);
        assert_eq!(scan.display_percent(), 1);
        assert!(tracker.is_in_flight());
    }

    #[test]
    fn test_only_one_in_flight() {
        let mut tracker = PendingScanTracker::default();
        tracker.start(MealFor::Lunch, "a.jpg").unwrap();
        assert!(matches!(
            tracker.start(MealFor::Dinner, "b.jpg"),
            Err(LedgerError::ScanInFlight)
        ));
        assert_eq!(tracker.pending().unwrap().preview, "a.jpg");
    }

    #[test]
    fn test_progress_clamped_and_held_below_done() {
        let mut tracker = PendingScanTracker::default();
        tracker.start(MealFor::Snack, "bar.jpg").unwrap();

        tracker.progress(42.6, "analyzing");
        let scan = tracker.pending().unwrap();
        assert_eq!(scan.display_percent(), 43);
        assert_eq!(scan.phase, "analyzing");

        tracker.progress(250.0, "");
        let scan = tracker.pending().unwrap();
        assert_eq!(scan.progress, 100.0);
        assert_eq!(scan.display_percent(), 99);
        assert_eq!(scan.phase, "analyzing");

        tracker.progress(-5.0, "uploading");
        assert_eq!(tracker.pending().unwrap().progress, 0.0);
        assert_eq!(tracker.pending().unwrap().display_percent(), 1);

        tracker.progress(f64::NAN, "");
        assert_eq!(tracker.pending().unwrap().progress, 0.0);
    }

    #[test]
    fn test_complete_hands_entry_once() {
        let mut tracker = PendingScanTracker::default();
        tracker.start(MealFor::Lunch, "salad.jpg").unwrap();
        assert!(tracker.complete(finished()).is_some());
        assert!(tracker.complete(finished()).is_none());
        assert_eq!(*tracker.state(), ScanState::Idle);
        assert!(!tracker.progress(50.0, "late"));
    }

    #[test]
    fn test_failure_then_retake() {
        let mut tracker = PendingScanTracker::default();
        tracker.start(MealFor::Dinner, "curry.jpg").unwrap();
        tracker.fail("image too dark");
        assert!(matches!(
            tracker.state(),
            ScanState::Failed { reason, .. } if reason == "image too dark"
        ));
        // late completion after failure is dropped
        assert!(tracker.complete(finished()).is_none());

        let (meal, preview) = tracker.retake().unwrap();
        assert_eq!(meal, MealFor::Dinner);
        assert_eq!(preview, "curry.jpg");
        assert_eq!(*tracker.state(), ScanState::Idle);
        assert!(tracker.retake().is_none());
    }

    #[test]
    fn test_start_after_failure() {
        let mut tracker = PendingScanTracker::default();
        tracker.start(MealFor::Dinner, "a.jpg").unwrap();
        tracker.fail("timeout");
        assert!(tracker.start(MealFor::Dinner, "a.jpg").is_ok());
    }
}
