use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};
use std::path::Path;

use nutriscan_core::calendar::week_start;
use nutriscan_core::models::MonthKey;
use nutriscan_core::session::DashboardSession;

use crate::config::Preferences;

use super::helpers::parse_date;

/// How far back `calendar` walks the month cursor to restore a saved month.
const MAX_MONTHS_BACK: usize = 24;

pub(crate) async fn cmd_calendar(
    session: &DashboardSession,
    date: Option<String>,
    prefs_path: &Path,
    json: bool,
) -> Result<()> {
    let explicit = date.is_some();
    let date = parse_date(date)?;
    session.select_date(date).await?;

    let mut prefs = Preferences::load(prefs_path);
    let target = if explicit {
        MonthKey::of(date)
    } else {
        prefs
            .last_month
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or_else(|| MonthKey::of(date))
    };
    let month = seek_month(session, target);
    prefs.last_month = Some(month.to_string());
    prefs.save(prefs_path)?;

    let weeks = session.week_window();
    let summary = session.summary();

    if json {
        let view = serde_json::json!({
            "selected": date,
            "weeks": weeks,
            "month": month.to_string(),
            "monthGrid": month_grid(month),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Last {} weeks", weeks.len());
    println!("  Mo  Tu  We  Th  Fr  Sa  Su");
    for week in &weeks {
        println!("{}", render_week(week.iter().copied().map(Some), date));
    }

    println!("\n{}", month.first_day().format("%B %Y"));
    println!("  Mo  Tu  We  Th  Fr  Sa  Su");
    for row in month_grid(month) {
        println!("{}", render_week(row.into_iter(), date));
    }

    if let Some(s) = summary {
        let goal = if s.goal_reached() { " - goal reached!" } else { "" };
        println!(
            "\n{}: {}/{} readings ({:.0}%), {} days logged{goal}",
            s.month,
            s.reading_count,
            s.reading_goal,
            s.progress_percent(),
            s.days_logged
        );
    }
    if let Some(notice) = session.take_notice() {
        eprintln!("Warning: {notice}");
    }
    Ok(())
}

/// Move the session's month cursor to `target`, or as close as it allows.
fn seek_month(session: &DashboardSession, target: MonthKey) -> MonthKey {
    let mut cursor = session.month_cursor();
    for _ in 0..MAX_MONTHS_BACK {
        if cursor <= target {
            break;
        }
        cursor = session.previous_month();
    }
    while cursor < target {
        let next = session.next_month();
        if next == cursor {
            break;
        }
        cursor = next;
    }
    cursor
}

/// Calendar rows for a month, Monday first, padded with `None`.
#[allow(clippy::cast_possible_wrap)]
fn month_grid(month: MonthKey) -> Vec<[Option<NaiveDate>; 7]> {
    let first = month.first_day();
    let last = month.succ().first_day() - Duration::days(1);
    let mut rows = Vec::new();
    let mut monday = week_start(first);
    while monday <= last {
        rows.push(std::array::from_fn(|i| {
            let day = monday + Duration::days(i as i64);
            (day >= first && day <= last).then_some(day)
        }));
        monday += Duration::weeks(1);
    }
    rows
}

fn render_week(days: impl Iterator<Item = Option<NaiveDate>>, selected: NaiveDate) -> String {
    days.map(|d| match d {
        Some(d) if d == selected => format!("[{:>2}]", d.day()),
        Some(d) => format!(" {:>2} ", d.day()),
        None => "    ".to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_month_grid_shape() {
        // June 2024 starts on a Saturday and ends on a Sunday
        let grid = month_grid(MonthKey { year: 2024, month: 6 });
        assert_eq!(grid.len(), 5);
        assert_eq!(grid[0][4], None);
        assert_eq!(grid[0][5], Some(d(2024, 6, 1)));
        assert_eq!(grid[4][6], Some(d(2024, 6, 30)));
        let days = grid.iter().flatten().flatten().count();
        assert_eq!(days, 30);
    }

    #[test]
    fn test_month_grid_leap_february() {
        let grid = month_grid(MonthKey { year: 2024, month: 2 });
        assert_eq!(grid.iter().flatten().flatten().count(), 29);
    }

    #[test]
    fn test_render_week_marks_selected() {
        let monday = d(2024, 6, 10);
        let week = (0..7).map(|i| Some(monday + Duration::days(i)));
        let line = render_week(week, d(2024, 6, 12));
        assert_eq!(line, " 10  11 [12] 13  14  15  16 ");
    }
}
