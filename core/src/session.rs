//! The dashboard session: one viewed day, its ledger and the work in flight.
//!
//! Remote calls never hold the state lock. Every load bumps a generation
//! counter; a response whose generation no longer matches is dropped, which
//! is how stale day loads, late poll results and acks for an abandoned view
//! are kept out of the ledger.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::calendar::DateSelection;
use crate::error::LedgerError;
use crate::gateway::AnalysisGateway;
use crate::ledger::Reconciled;
use crate::meals::{MealBucket, categorize};
use crate::models::{AnalysisEntry, AnalysisUpdate, DayAggregate, MealFor, MonthKey, MonthlySummary};
use crate::polling::{
    CompletionNotice, CompletionTracker, PollConfig, PollStep, PollTimer, needs_polling,
};
use crate::scan::{PendingScan, PendingScanTracker, ScanEvent, ScanRequest, ScanState};

/// Source of "today". Swapped out in tests.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// How a request that reached the backend ended up affecting the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Nothing to change: a no-op edit or an already-merged scan.
    Unchanged,
    /// The view moved on while the request was in flight.
    Discarded,
}

struct SessionState {
    selection: DateSelection,
    ledger: DayAggregate,
    generation: u64,
    mutation_in_flight: bool,
    mutation_seq: u64,
    loading: bool,
    notice: Option<String>,
    summary: Option<MonthlySummary>,
    scan: PendingScanTracker,
    completions: CompletionTracker,
    poll: PollTimer,
}

struct Inner {
    gateway: Arc<dyn AnalysisGateway>,
    config: PollConfig,
    clock: Clock,
    state: Mutex<SessionState>,
    notices: mpsc::UnboundedSender<CompletionNotice>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    async fn poll_tick(&self, generation: u64) -> PollStep {
        let (current, mutation_seq) = {
            let state = self.lock();
            (state.generation, state.mutation_seq)
        };
        if current != generation {
            return PollStep::Stop;
        }

        let today = self.today();
        let result = self.gateway.fetch_day_analyses(today).await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!("view changed during poll; dropping result");
            return PollStep::Stop;
        }
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "poll failed; keeping current ledger");
                state.notice = Some(format!("Could not refresh analyses: {e:#}"));
                return PollStep::Continue;
            }
        };
        if state.mutation_in_flight || state.mutation_seq != mutation_seq {
            debug!("local change since the poll started; dropping poll snapshot");
            return PollStep::Continue;
        }

        for notice in state.completions.observe(&snapshot.entries) {
            info!(label = %notice.food_label, meal = %notice.meal_for, "analysis completed");
            // receiver gone just means nobody is listening
            let _ = self.notices.send(notice);
        }

        let pending = needs_polling(&snapshot.entries, self.config.max_retries);
        if state.ledger.date == today {
            state.ledger = DayAggregate::from_snapshot(today, snapshot);
        }
        if pending {
            PollStep::Continue
        } else {
            info!("no analyses pending; polling stopped");
            PollStep::Stop
        }
    }
}

/// The single edit/delete slot. Dropping it without [`MutationSlot::release`]
/// (a cancelled request) frees the slot as well.
struct MutationSlot<'a> {
    inner: &'a Inner,
    seq: u64,
    held: bool,
}

impl<'a> MutationSlot<'a> {
    fn acquire(inner: &'a Inner, state: &mut SessionState) -> Result<Self, LedgerError> {
        if state.mutation_in_flight {
            return Err(LedgerError::MutationInFlight);
        }
        state.mutation_in_flight = true;
        state.mutation_seq += 1;
        Ok(Self {
            inner,
            seq: state.mutation_seq,
            held: true,
        })
    }

    fn release(mut self, state: &mut SessionState) {
        Self::free(state, self.seq);
        self.held = false;
    }

    // A slot cleared by `close` may already belong to a newer mutation.
    fn free(state: &mut SessionState, seq: u64) {
        if state.mutation_seq == seq {
            state.mutation_in_flight = false;
        }
    }
}

impl Drop for MutationSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            debug!("mutation abandoned before its ack");
            Self::free(&mut self.inner.lock(), self.seq);
        }
    }
}

async fn run_poll(inner: Weak<Inner>, generation: u64, period: Duration) {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        timer.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.poll_tick(generation).await == PollStep::Stop {
            break;
        }
    }
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct DashboardSession {
    inner: Arc<Inner>,
}

impl DashboardSession {
    /// Session on the local calendar. Completion notices arrive on the
    /// returned receiver.
    pub fn new(
        gateway: Arc<dyn AnalysisGateway>,
        config: PollConfig,
    ) -> (Self, mpsc::UnboundedReceiver<CompletionNotice>) {
        Self::with_clock(gateway, config, Arc::new(|| Local::now().date_naive()))
    }

    pub fn with_clock(
        gateway: Arc<dyn AnalysisGateway>,
        config: PollConfig,
        clock: Clock,
    ) -> (Self, mpsc::UnboundedReceiver<CompletionNotice>) {
        let today = clock();
        let (tx, rx) = mpsc::unbounded_channel();
        let state = SessionState {
            selection: DateSelection::new(today),
            ledger: DayAggregate::empty(today),
            generation: 0,
            mutation_in_flight: false,
            mutation_seq: 0,
            loading: false,
            notice: None,
            summary: None,
            scan: PendingScanTracker::default(),
            completions: CompletionTracker::default(),
            poll: PollTimer::default(),
        };
        let session = Self {
            inner: Arc::new(Inner {
                gateway,
                config,
                clock,
                state: Mutex::new(state),
                notices: tx,
            }),
        };
        (session, rx)
    }

    #[must_use]
    pub fn ledger(&self) -> DayAggregate {
        self.inner.lock().ledger.clone()
    }

    #[must_use]
    pub fn meal_buckets(&self) -> Vec<MealBucket> {
        categorize(&self.inner.lock().ledger.entries)
    }

    #[must_use]
    pub fn selected_date(&self) -> NaiveDate {
        self.inner.lock().selection.selected()
    }

    #[must_use]
    pub fn week_window(&self) -> Vec<[NaiveDate; 7]> {
        self.inner.lock().selection.week_window()
    }

    #[must_use]
    pub fn month_cursor(&self) -> MonthKey {
        self.inner.lock().selection.month_cursor()
    }

    pub fn previous_month(&self) -> MonthKey {
        self.inner.lock().selection.previous_month()
    }

    pub fn next_month(&self) -> MonthKey {
        self.inner.lock().selection.next_month()
    }

    #[must_use]
    pub fn is_viewing_today(&self) -> bool {
        self.inner.lock().selection.is_viewing_today()
    }

    /// True while a day load or an edit/delete round trip is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        let state = self.inner.lock();
        state.loading || state.mutation_in_flight
    }

    /// Last user-facing error message, cleared on read.
    pub fn take_notice(&self) -> Option<String> {
        self.inner.lock().notice.take()
    }

    #[must_use]
    pub fn summary(&self) -> Option<MonthlySummary> {
        self.inner.lock().summary.clone()
    }

    #[must_use]
    pub fn scan_state(&self) -> ScanState {
        self.inner.lock().scan.state().clone()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.lock().poll.is_running()
    }

    #[must_use]
    pub fn poll_config(&self) -> PollConfig {
        self.inner.config
    }

    /// Switch the view to `date` and load it.
    ///
    /// The month summary is refreshed only when the selection crosses into
    /// another month. A failed load keeps the previous ledger on screen.
    pub async fn select_date(&self, date: NaiveDate) -> Result<Outcome, LedgerError> {
        let (generation, change) = {
            let mut state = self.inner.lock();
            let today = self.inner.today();
            let change = state.selection.select(date, today)?;
            state.generation += 1;
            state.poll.cancel();
            state.loading = true;
            (state.generation, change)
        };
        debug!(%date, generation, "date selected");

        let outcome = self.load(date, generation).await;
        if let Some(month) = change.refresh_month {
            self.refresh_summary(month).await;
        }
        outcome
    }

    /// Refetch the selected day.
    pub async fn reload(&self) -> Result<Outcome, LedgerError> {
        let (generation, date) = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.poll.cancel();
            state.loading = true;
            (state.generation, state.selection.selected())
        };
        self.load(date, generation).await
    }

    async fn load(&self, date: NaiveDate, generation: u64) -> Result<Outcome, LedgerError> {
        let result = self.inner.gateway.fetch_day_analyses(date).await;

        let mut state = self.inner.lock();
        if state.generation != generation {
            debug!(%date, "discarding stale day snapshot");
            return Ok(Outcome::Discarded);
        }
        state.loading = false;
        match result {
            Ok(snapshot) => {
                let ledger = DayAggregate::from_snapshot(date, snapshot);
                info!(%date, entries = ledger.entries.len(), "day loaded");
                state.completions = CompletionTracker::default();
                state.completions.seed(&ledger.entries);
                state.ledger = ledger;
                state.notice = None;
                self.rearm(&mut state);
                Ok(Outcome::Applied)
            }
            Err(e) => {
                warn!(%date, error = %format!("{e:#}"), "failed to load day; keeping previous snapshot");
                state.notice = Some(format!("Could not load {date}: {e:#}"));
                Err(LedgerError::Network(e))
            }
        }
    }

    async fn refresh_summary(&self, month: MonthKey) {
        let result = self.inner.gateway.fetch_dashboard_summary(month).await;
        let mut state = self.inner.lock();
        match result {
            Ok(summary) => {
                if MonthKey::of(state.selection.selected()) == month {
                    state.summary = Some(summary);
                } else {
                    debug!(%month, "selection left the month; dropping summary");
                }
            }
            Err(e) => {
                warn!(%month, error = %format!("{e:#}"), "failed to load monthly summary");
                state.selection.invalidate_summary();
                state.notice = Some(format!("Could not load summary for {month}: {e:#}"));
            }
        }
    }

    /// Start the poll task when today's ledger has entries still being analyzed.
    fn rearm(&self, state: &mut SessionState) {
        if state.poll.is_running() {
            return;
        }
        let today = self.inner.today();
        if state.ledger.date != today || !state.ledger.has_incomplete(self.inner.config.max_retries)
        {
            return;
        }
        let interval = self.inner.config.interval;
        info!(?interval, "analyses pending; polling started");
        state.poll.arm(tokio::spawn(run_poll(
            Arc::downgrade(&self.inner),
            state.generation,
            interval,
        )));
    }

    /// Send an edit and apply it locally once the backend acknowledges it.
    pub async fn edit_entry(
        &self,
        entry_id: &str,
        update: &AnalysisUpdate,
    ) -> Result<Outcome, LedgerError> {
        update
            .validate()
            .map_err(|e| LedgerError::InvalidEdit(e.to_string()))?;

        let (generation, payload, slot) = {
            let mut state = self.inner.lock();
            let entry = state
                .ledger
                .find(entry_id)
                .ok_or_else(|| LedgerError::EntryNotFound(entry_id.to_string()))?;
            if !update.changes(entry) {
                debug!(entry_id, "edit changes nothing; not sending");
                return Ok(Outcome::Unchanged);
            }
            let payload = update.to_payload(entry.consumed_count);
            let slot = MutationSlot::acquire(&self.inner, &mut state)?;
            (state.generation, payload, slot)
        };

        let result = self
            .inner
            .gateway
            .update_analysis(entry_id, payload)
            .await;

        let mut state = self.inner.lock();
        slot.release(&mut state);
        let stored = match result {
            Ok(stored) => stored,
            Err(e) => {
                warn!(entry_id, error = %format!("{e:#}"), "edit rejected; ledger unchanged");
                state.notice = Some(format!("Could not save changes: {e:#}"));
                return Err(LedgerError::Network(e));
            }
        };
        if state.generation != generation {
            debug!(entry_id, "view changed while edit was in flight");
            return Ok(Outcome::Discarded);
        }
        let reconciled = state.ledger.apply_edit(entry_id, update)?;
        let mut next = match reconciled {
            Reconciled::Updated(next) => next,
            Reconciled::Unchanged => return Ok(Outcome::Unchanged),
        };
        if let Some(record) = stored {
            debug!(entry_id, "using the record the backend stored");
            next = next.replace_entry(entry_id, record)?;
        }
        info!(entry_id, total = next.meta.total_calories, "edit applied");
        state.ledger = next;
        Ok(Outcome::Applied)
    }

    /// Delete an entry and drop it locally once the backend acknowledges it.
    pub async fn delete_entry(&self, entry_id: &str) -> Result<Outcome, LedgerError> {
        let (generation, slot) = {
            let mut state = self.inner.lock();
            if state.ledger.find(entry_id).is_none() {
                return Err(LedgerError::EntryNotFound(entry_id.to_string()));
            }
            let slot = MutationSlot::acquire(&self.inner, &mut state)?;
            (state.generation, slot)
        };

        let result = self.inner.gateway.delete_analysis(entry_id).await;

        let mut state = self.inner.lock();
        slot.release(&mut state);
        if let Err(e) = result {
            warn!(entry_id, error = %format!("{e:#}"), "delete rejected; ledger unchanged");
            state.notice = Some(format!("Could not delete entry: {e:#}"));
            return Err(LedgerError::Network(e));
        }
        if state.generation != generation {
            debug!(entry_id, "view changed while delete was in flight");
            return Ok(Outcome::Discarded);
        }
        let next = state.ledger.apply_delete(entry_id)?;
        info!(entry_id, total = next.meta.total_calories, "entry deleted");
        state.ledger = next;
        Ok(Outcome::Applied)
    }

    /// Submit an image and wait for its analysis.
    ///
    /// `on_progress` sees the optimistic pending scan right away and after
    /// every progress event. The finished entry is merged only while today is
    /// the viewed day; otherwise it shows up when today is next loaded.
    pub async fn submit_scan(
        &self,
        request: ScanRequest,
        mut on_progress: impl FnMut(&PendingScan) + Send,
    ) -> Result<(AnalysisEntry, Outcome), LedgerError> {
        let pending = self
            .inner
            .lock()
            .scan
            .start(request.meal_for, &request.preview)?;
        on_progress(&pending);

        let mut events = match self.inner.gateway.start_scan(request).await {
            Ok(events) => events,
            Err(e) => {
                let mut state = self.inner.lock();
                state.scan.fail(&format!("{e:#}"));
                state.notice = Some(format!("Could not upload image: {e:#}"));
                return Err(LedgerError::Network(e));
            }
        };

        while let Some(event) = events.recv().await {
            match event {
                ScanEvent::Progress { percent, phase } => {
                    let current = {
                        let mut state = self.inner.lock();
                        state.scan.progress(percent, &phase);
                        state.scan.pending().cloned()
                    };
                    if let Some(scan) = current {
                        on_progress(&scan);
                    }
                }
                ScanEvent::Completed(entry) => return self.finish_scan(entry),
                ScanEvent::Failed(reason) => return Err(self.fail_scan(reason)),
            }
        }
        Err(self.fail_scan("analysis stream ended without a result".to_string()))
    }

    fn finish_scan(&self, entry: AnalysisEntry) -> Result<(AnalysisEntry, Outcome), LedgerError> {
        let mut state = self.inner.lock();
        let Some(entry) = state.scan.complete(entry) else {
            return Err(LedgerError::ScanFailed("scan was cancelled".to_string()));
        };
        if state.ledger.date != self.inner.today() {
            debug!(label = %entry.food_label, "viewing another day; scan not merged");
            return Ok((entry, Outcome::Discarded));
        }
        let reconciled = state.ledger.merge_completed_scan(entry.clone());
        match reconciled {
            Reconciled::Updated(next) => {
                state.ledger = next;
                state.completions.seed(std::slice::from_ref(&entry));
                self.rearm(&mut state);
                Ok((entry, Outcome::Applied))
            }
            Reconciled::Unchanged => Ok((entry, Outcome::Unchanged)),
        }
    }

    fn fail_scan(&self, reason: String) -> LedgerError {
        let mut state = self.inner.lock();
        state.scan.fail(&reason);
        state.notice = Some(format!("Scan failed: {reason}"));
        LedgerError::ScanFailed(reason)
    }

    /// Clear a failed scan, returning the meal and preview to resubmit with.
    pub fn retake_scan(&self) -> Option<(MealFor, String)> {
        self.inner.lock().scan.retake()
    }

    /// Stop polling and invalidate everything in flight.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        state.generation += 1;
        state.poll.cancel();
        state.loading = false;
        state.mutation_in_flight = false;
        debug!("session closed");
    }
}
