use serde::Serialize;

use crate::models::{AnalysisEntry, MEAL_BUCKETS, MealFor};

#[derive(Debug, Clone, Serialize)]
pub struct MealBucket {
    pub meal_for: MealFor,
    pub entries: Vec<AnalysisEntry>,
    pub subtotal_calories: f64,
    /// Entries in this bucket still waiting on the analysis service.
    pub pending: usize,
}

impl MealBucket {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Project entries into the five meal buckets, in display order.
///
/// Always derived from the entries passed in; callers re-run it after every
/// ledger mutation.
#[must_use]
pub fn categorize(entries: &[AnalysisEntry]) -> Vec<MealBucket> {
    MEAL_BUCKETS
        .iter()
        .map(|meal| {
            let bucket_entries: Vec<AnalysisEntry> = entries
                .iter()
                .filter(|e| e.meal_for() == *meal)
                .cloned()
                .collect();
            let subtotal_calories = bucket_entries
                .iter()
                .map(AnalysisEntry::display_calories)
                .sum();
            let pending = bucket_entries
                .iter()
                .filter(|e| !e.analysis_complete)
                .count();
            MealBucket {
                meal_for: *meal,
                entries: bucket_entries,
                subtotal_calories,
                pending,
            }
        })
        .collect()
}
