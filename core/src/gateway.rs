use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::models::{AnalysisEntry, DaySnapshot, MonthKey, MonthlySummary};
use crate::scan::{ScanEvent, ScanRequest};

/// The REST backend behind the food-tracking view.
///
/// The CLI implements this over HTTP with reqwest; tests use in-memory fakes.
/// Implementations report transport and decoding failures as `anyhow` errors;
/// the session turns them into [`crate::error::LedgerError::Network`].
#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    /// Authoritative snapshot of one day's entries and totals.
    async fn fetch_day_analyses(&self, date: NaiveDate) -> Result<DaySnapshot>;

    async fn fetch_dashboard_summary(&self, month: MonthKey) -> Result<MonthlySummary>;

    /// `payload` is already pruned of empty fields. Returns the stored record
    /// when the backend echoes one.
    async fn update_analysis(
        &self,
        entry_id: &str,
        payload: Map<String, Value>,
    ) -> Result<Option<AnalysisEntry>>;

    async fn delete_analysis(&self, entry_id: &str) -> Result<()>;

    /// Submit an image; progress and the terminal result arrive on the channel.
    async fn start_scan(&self, request: ScanRequest) -> Result<mpsc::Receiver<ScanEvent>>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use anyhow::{anyhow, bail};

    use super::*;

    /// Scripted backend. Each day answers from a queue; the last response repeats.
    #[derive(Default)]
    pub(crate) struct FakeGateway {
        days: Mutex<HashMap<NaiveDate, VecDeque<Result<DaySnapshot, String>>>>,
        fetch_delays: Mutex<HashMap<NaiveDate, Duration>>,
        ack_delay: Mutex<Duration>,
        scan_events: Mutex<Vec<ScanEvent>>,
        stored_record: Mutex<Option<AnalysisEntry>>,
        pub(crate) fail_mutations: AtomicBool,
        pub(crate) fetches: Mutex<Vec<NaiveDate>>,
        pub(crate) summaries: Mutex<Vec<MonthKey>>,
        pub(crate) updates: Mutex<Vec<(String, Map<String, Value>)>>,
        pub(crate) deletes: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        pub(crate) fn push(&self, date: NaiveDate, response: Result<DaySnapshot, String>) {
            self.days
                .lock()
                .unwrap()
                .entry(date)
                .or_default()
                .push_back(response);
        }

        pub(crate) fn delay_fetch(&self, date: NaiveDate, delay: Duration) {
            self.fetch_delays.lock().unwrap().insert(date, delay);
        }

        pub(crate) fn set_ack_delay(&self, delay: Duration) {
            *self.ack_delay.lock().unwrap() = delay;
        }

        /// Record echoed back by the next successful update.
        pub(crate) fn store_record(&self, record: AnalysisEntry) {
            *self.stored_record.lock().unwrap() = Some(record);
        }

        pub(crate) fn script_scan(&self, events: Vec<ScanEvent>) {
            *self.scan_events.lock().unwrap() = events;
        }

        pub(crate) fn fetch_count(&self, date: NaiveDate) -> usize {
            self.fetches
                .lock()
                .unwrap()
                .iter()
                .filter(|d| **d == date)
                .count()
        }

        async fn ack(&self) -> Result<()> {
            let delay = *self.ack_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_mutations.load(Ordering::SeqCst) {
                bail!("503 Service Unavailable");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AnalysisGateway for FakeGateway {
        async fn fetch_day_analyses(&self, date: NaiveDate) -> Result<DaySnapshot> {
            self.fetches.lock().unwrap().push(date);
            let delay = self
                .fetch_delays
                .lock()
                .unwrap()
                .get(&date)
                .copied()
                .unwrap_or_default();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let next = {
                let mut days = self.days.lock().unwrap();
                let queue = days.entry(date).or_default();
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            };
            match next {
                Some(Ok(snapshot)) => Ok(snapshot),
                Some(Err(e)) => Err(anyhow!(e)),
                None => Ok(DaySnapshot::default()),
            }
        }

        async fn fetch_dashboard_summary(&self, month: MonthKey) -> Result<MonthlySummary> {
            self.summaries.lock().unwrap().push(month);
            Ok(MonthlySummary {
                month: month.to_string(),
                reading_count: 12,
                reading_goal: 20,
                days_logged: 9,
            })
        }

        async fn update_analysis(
            &self,
            entry_id: &str,
            payload: Map<String, Value>,
        ) -> Result<Option<AnalysisEntry>> {
            self.updates
                .lock()
                .unwrap()
                .push((entry_id.to_string(), payload));
            self.ack().await?;
            Ok(self.stored_record.lock().unwrap().take())
        }

        async fn delete_analysis(&self, entry_id: &str) -> Result<()> {
            self.deletes.lock().unwrap().push(entry_id.to_string());
            self.ack().await
        }

        async fn start_scan(&self, _request: ScanRequest) -> Result<mpsc::Receiver<ScanEvent>> {
            let events = std::mem::take(&mut *self.scan_events.lock().unwrap());
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }
}
