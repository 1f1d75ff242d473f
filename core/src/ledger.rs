//! Incremental reconciliation of a day's analysis entries.
//!
//! Every mutation is a pure function from one [`DayAggregate`] to the next.
//! Totals are adjusted by deltas rather than re-summed so that a snapshot's
//! authoritative meta stays authoritative; the health score is the only field
//! recomputed from scratch each time.

use chrono::NaiveDate;
use tracing::debug;

use crate::error::LedgerError;
use crate::models::{
    AnalysisEntry, AnalysisUpdate, DayAggregate, DaySnapshot, MetaTotals, mean_health_score,
    normalize_consumed_count,
};

/// Result of a reconciliation step that may legitimately do nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Updated(DayAggregate),
    Unchanged,
}

impl DayAggregate {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            entries: Vec::new(),
            meta: MetaTotals::default(),
        }
    }

    /// Wholesale replacement from one authoritative snapshot.
    ///
    /// Base values are pinned here; a snapshot without meta gets totals
    /// recomputed from its entries.
    #[must_use]
    pub fn from_snapshot(date: NaiveDate, snapshot: DaySnapshot) -> Self {
        let mut entries = snapshot.entries;
        for entry in &mut entries {
            entry.pin_base();
        }
        let meta = match snapshot.meta {
            Some(meta) => MetaTotals::new(
                meta.nutrients().clamp_non_negative(),
                mean_health_score(&entries),
            ),
            None => MetaTotals::from_entries(&entries),
        };
        Self {
            date,
            entries,
            meta,
        }
    }

    #[must_use]
    pub fn find(&self, entry_id: &str) -> Option<&AnalysisEntry> {
        self.entries
            .iter()
            .find(|e| e.id.as_deref() == Some(entry_id))
    }

    fn position(&self, entry_id: &str) -> Result<usize, LedgerError> {
        self.entries
            .iter()
            .position(|e| e.id.as_deref() == Some(entry_id))
            .ok_or_else(|| LedgerError::EntryNotFound(entry_id.to_string()))
    }

    #[must_use]
    pub fn contains(&self, entry: &AnalysisEntry) -> bool {
        self.entries.iter().any(|e| e.is_same_as(entry))
    }

    #[must_use]
    pub fn has_incomplete(&self, max_retries: u32) -> bool {
        self.entries.iter().any(|e| e.needs_polling(max_retries))
    }

    /// Prepend a finished scan and fold its contribution into the totals.
    /// Entries already present (by id, else by timestamp + label) are ignored.
    #[must_use]
    pub fn merge_completed_scan(&self, mut entry: AnalysisEntry) -> Reconciled {
        if self.contains(&entry) {
            debug!(label = %entry.food_label, "scan already in ledger; skipping merge");
            return Reconciled::Unchanged;
        }

        entry.pin_base();
        let contribution = entry.contribution();

        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.push(entry);
        entries.extend(self.entries.iter().cloned());

        let nutrients = (self.meta.nutrients() + contribution).clamp_non_negative();
        let meta = MetaTotals::new(nutrients, mean_health_score(&entries));
        debug!(
            calories = contribution.calories,
            total = meta.total_calories,
            "merged scan"
        );

        Reconciled::Updated(Self {
            date: self.date,
            entries,
            meta,
        })
    }

    /// Rescale an entry and shift the totals by the difference.
    ///
    /// `before` and `after` both start from the entry's pinned per-unit base,
    /// so repeated edits never compound rounding error.
    pub fn apply_edit(
        &self,
        entry_id: &str,
        update: &AnalysisUpdate,
    ) -> Result<Reconciled, LedgerError> {
        let idx = self.position(entry_id)?;
        let current = &self.entries[idx];
        if !update.changes(current) {
            return Ok(Reconciled::Unchanged);
        }

        let old_count = current.consumed_count;
        let new_count = update
            .consumed_count
            .map_or(old_count, normalize_consumed_count);
        let base = current.base_nutrients();
        let new_base = update.apply_to_base(base);

        let before = base.scale(old_count);
        let after = new_base.scale(new_count);
        let delta = after - before;

        let mut entry = current.clone();
        entry.rescale(new_base, new_count);
        if let Some(label) = update
            .food_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
        {
            entry.food_label = label.to_string();
        }
        if let Some(meal) = update.meal_for {
            entry.nutrition.meal_for = meal;
        }
        if let Some(score) = update.health_score.filter(|s| s.is_finite()) {
            entry.nutrition.health_score = score;
        }

        let mut entries = self.entries.clone();
        entries[idx] = entry;

        let nutrients = (self.meta.nutrients() + delta).clamp_non_negative();
        let meta = MetaTotals::new(nutrients, mean_health_score(&entries));
        debug!(
            entry_id,
            old_count,
            new_count,
            delta_calories = delta.calories,
            "applied edit"
        );

        Ok(Reconciled::Updated(Self {
            date: self.date,
            entries,
            meta,
        }))
    }

    /// Swap in the backend's stored copy of an entry and shift the totals by
    /// the difference in contribution. The stored copy's base is re-pinned.
    pub fn replace_entry(
        &self,
        entry_id: &str,
        mut record: AnalysisEntry,
    ) -> Result<Self, LedgerError> {
        let idx = self.position(entry_id)?;
        if record.id.is_none() {
            record.id = Some(entry_id.to_string());
        }
        record.pin_base();
        let delta = record.contribution() - self.entries[idx].contribution();

        let mut entries = self.entries.clone();
        entries[idx] = record;

        let nutrients = (self.meta.nutrients() + delta).clamp_non_negative();
        let meta = MetaTotals::new(nutrients, mean_health_score(&entries));
        debug!(entry_id, delta_calories = delta.calories, "replaced entry");

        Ok(Self {
            date: self.date,
            entries,
            meta,
        })
    }

    /// Remove an entry and subtract exactly its last-known contribution.
    pub fn apply_delete(&self, entry_id: &str) -> Result<Self, LedgerError> {
        let idx = self.position(entry_id)?;
        let contribution = self.entries[idx].contribution();

        let mut entries = self.entries.clone();
        entries.remove(idx);

        let nutrients = (self.meta.nutrients() - contribution).clamp_non_negative();
        let meta = MetaTotals::new(nutrients, mean_health_score(&entries));
        debug!(
            entry_id,
            calories = contribution.calories,
            "applied delete"
        );

        Ok(Self {
            date: self.date,
            entries,
            meta,
        })
    }
}
