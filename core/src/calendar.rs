use chrono::{Datelike, Duration, NaiveDate};
use tracing::debug;

use crate::error::LedgerError;
use crate::models::MonthKey;

/// Number of weeks in the scrollable strip, ending with the current week.
pub const WEEK_WINDOW: usize = 12;

/// What the caller has to do after a successful selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionChange {
    pub date: NaiveDate,
    /// Set only when the selection crossed into a month whose summary has not
    /// been refreshed yet.
    pub refresh_month: Option<MonthKey>,
}

/// Tracks the viewed day, the 12-week strip and the month-grid cursor.
#[derive(Debug, Clone)]
pub struct DateSelection {
    selected: NaiveDate,
    today: NaiveDate,
    month_cursor: MonthKey,
    summary_month: Option<MonthKey>,
}

#[must_use]
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

impl DateSelection {
    #[must_use]
    pub fn new(today: NaiveDate) -> Self {
        Self {
            selected: today,
            today,
            month_cursor: MonthKey::of(today),
            summary_month: None,
        }
    }

    #[must_use]
    pub fn selected(&self) -> NaiveDate {
        self.selected
    }

    #[must_use]
    pub fn is_viewing_today(&self) -> bool {
        self.selected == self.today
    }

    /// Select a day. Future days are rejected; the month summary is flagged
    /// for refresh only on an actual month boundary crossing.
    pub fn select(
        &mut self,
        date: NaiveDate,
        today: NaiveDate,
    ) -> Result<SelectionChange, LedgerError> {
        self.today = today;
        if date > today {
            return Err(LedgerError::DateInFuture { date, today });
        }
        self.selected = date;

        let month = MonthKey::of(date);
        let refresh_month = if self.summary_month == Some(month) {
            None
        } else {
            debug!(%month, "selection crossed into a new month");
            self.summary_month = Some(month);
            Some(month)
        };

        Ok(SelectionChange {
            date,
            refresh_month,
        })
    }

    /// Forget which month was last summarized so the next selection refetches it.
    pub fn invalidate_summary(&mut self) {
        self.summary_month = None;
    }

    /// Monday of the oldest week in the strip.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn window_start(&self) -> NaiveDate {
        week_start(self.today) - Duration::weeks(WEEK_WINDOW as i64 - 1)
    }

    /// The strip as rows of seven days, oldest week first.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn week_window(&self) -> Vec<[NaiveDate; 7]> {
        let start = self.window_start();
        (0..WEEK_WINDOW)
            .map(|w| {
                let monday = start + Duration::weeks(w as i64);
                std::array::from_fn(|d| monday + Duration::days(d as i64))
            })
            .collect()
    }

    #[must_use]
    pub fn month_cursor(&self) -> MonthKey {
        self.month_cursor
    }

    pub fn previous_month(&mut self) -> MonthKey {
        self.month_cursor = self.month_cursor.pred();
        self.month_cursor
    }

    /// Moves forward, but never past the current month.
    pub fn next_month(&mut self) -> MonthKey {
        let next = self.month_cursor.succ();
        if next <= MonthKey::of(self.today) {
            self.month_cursor = next;
        }
        self.month_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_rejects_future_dates() {
        let today = d(2024, 6, 15);
        let mut sel = DateSelection::new(today);
        let err = sel.select(d(2024, 6, 16), today).unwrap_err();
        assert!(matches!(err, LedgerError::DateInFuture { .. }));
        assert_eq!(sel.selected(), today);
    }

    #[test]
    fn test_month_refresh_only_on_boundary() {
        let today = d(2024, 6, 15);
        let mut sel = DateSelection::new(today);

        let first = sel.select(today, today).unwrap();
        assert_eq!(first.refresh_month, Some(MonthKey { year: 2024, month: 6 }));

        for day in [14, 3, 1, 15] {
            let change = sel.select(d(2024, 6, day), today).unwrap();
            assert!(change.refresh_month.is_none(), "day {day} refreshed");
        }

        let may = sel.select(d(2024, 5, 31), today).unwrap();
        assert_eq!(may.refresh_month, Some(MonthKey { year: 2024, month: 5 }));
        assert!(sel.select(d(2024, 5, 20), today).unwrap().refresh_month.is_none());

        let back = sel.select(d(2024, 6, 2), today).unwrap();
        assert_eq!(back.refresh_month, Some(MonthKey { year: 2024, month: 6 }));
    }

    #[test]
    fn test_invalidate_summary_refetches() {
        let today = d(2024, 6, 15);
        let mut sel = DateSelection::new(today);
        sel.select(today, today).unwrap();
        sel.invalidate_summary();
        assert!(sel.select(d(2024, 6, 14), today).unwrap().refresh_month.is_some());
    }

    #[test]
    fn test_week_window_shape() {
        // 2024-06-15 is a Saturday
        let sel = DateSelection::new(d(2024, 6, 15));
        let weeks = sel.week_window();
        assert_eq!(weeks.len(), WEEK_WINDOW);
        assert_eq!(weeks[WEEK_WINDOW - 1][0], d(2024, 6, 10));
        assert_eq!(weeks[WEEK_WINDOW - 1][6], d(2024, 6, 16));
        assert_eq!(weeks[0][0], d(2024, 3, 25));
        assert_eq!(sel.window_start(), d(2024, 3, 25));
        for w in weeks.windows(2) {
            assert_eq!(w[1][0] - w[0][0], Duration::weeks(1));
        }
    }

    #[test]
    fn test_viewing_today() {
        let today = d(2024, 6, 15);
        let mut sel = DateSelection::new(today);
        assert!(sel.is_viewing_today());
        sel.select(d(2024, 6, 14), today).unwrap();
        assert!(!sel.is_viewing_today());
        // the day rolled over while the old selection stayed put
        sel.select(today, d(2024, 6, 16)).unwrap();
        assert!(!sel.is_viewing_today());
    }

    #[test]
    fn test_month_cursor_independent_of_selection() {
        let today = d(2024, 1, 10);
        let mut sel = DateSelection::new(today);
        assert_eq!(sel.previous_month(), MonthKey { year: 2023, month: 12 });
        assert_eq!(sel.previous_month(), MonthKey { year: 2023, month: 11 });
        sel.select(d(2024, 1, 5), today).unwrap();
        assert_eq!(sel.month_cursor(), MonthKey { year: 2023, month: 11 });
        assert_eq!(sel.next_month(), MonthKey { year: 2023, month: 12 });
        assert_eq!(sel.next_month(), MonthKey { year: 2024, month: 1 });
        // clamped at the current month
        assert_eq!(sel.next_month(), MonthKey { year: 2024, month: 1 });
    }

    #[test]
    fn test_week_start_monday() {
        assert_eq!(week_start(d(2024, 6, 10)), d(2024, 6, 10));
        assert_eq!(week_start(d(2024, 6, 16)), d(2024, 6, 10));
    }
}
