use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::process;

use nutriscan_core::models::{AnalysisEntry, MetaTotals};
use nutriscan_core::polling::CompletionNotice;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday")
            }),
        },
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Report a missing entry the way every command does and exit with status 2.
pub(crate) fn exit_not_found(entry_id: &str, json: bool) -> ! {
    let message = format!("Entry {entry_id} not found");
    if json {
        println!("{}", json_error(&message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

pub(crate) fn format_count(count: f64) -> String {
    if count.fract() == 0.0 {
        format!("x{count:.0}")
    } else {
        format!("x{count}")
    }
}

/// One line for an entry inside a meal bucket.
pub(crate) fn format_entry_line(entry: &AnalysisEntry) -> String {
    let id = entry.id.as_deref().unwrap_or("-");
    let name = truncate(&entry.food_label, 40);
    if !entry.analysis_complete {
        return format!("[{id}] {name} (analyzing...)");
    }
    let count = format_count(entry.consumed_count);
    let cal = no_neg_zero(entry.display_calories());
    let n = &entry.nutrition;
    format!(
        "[{id}] {name} {count} | {cal:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
        n.protein, n.carbs, n.fat
    )
}

pub(crate) fn format_totals(meta: &MetaTotals) -> String {
    let cal = no_neg_zero(meta.total_calories);
    let p = no_neg_zero(meta.total_protein);
    let c = no_neg_zero(meta.total_carbs);
    let f = no_neg_zero(meta.total_fat);
    let fiber = no_neg_zero(meta.total_fiber);
    let sugar = no_neg_zero(meta.total_sugar);
    let sodium = no_neg_zero(meta.total_sodium);
    format!(
        "{cal:.0} kcal | P:{p:.0}g C:{c:.0}g F:{f:.0}g | Fiber:{fiber:.0}g Sugar:{sugar:.0}g Sodium:{sodium:.0}mg"
    )
}

pub(crate) fn print_notice(notice: &CompletionNotice, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(notice)?);
    } else {
        let meal = notice.meal_for;
        let label = &notice.food_label;
        println!("Analysis ready: {label} ({meal})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutriscan_core::models::{MealFor, Nutrients, NutritionPayload};

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today - chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
        assert!(parse_date(Some("tomorrow".to_string())).is_err());
    }

    #[test]
    fn test_json_error_escapes() {
        assert_eq!(json_error("bad \"id\""), r#"{"error":"bad \"id\""}"#);
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("日清カップヌードル", 8), "日清カップ...");
    }

    #[test]
    fn test_no_neg_zero() {
        assert_eq!(no_neg_zero(-0.0).to_bits(), 0.0_f64.to_bits());
        assert_eq!(no_neg_zero(5.0), 5.0);
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(2.0), "x2");
        assert_eq!(format_count(1.5), "x1.5");
    }

    #[test]
    fn test_format_entry_line() {
        let mut entry = AnalysisEntry::new(
            chrono::Utc::now(),
            "Rice",
            NutritionPayload {
                calories: 500.0,
                protein: 10.0,
                carbs: 110.0,
                fat: 1.0,
                meal_for: MealFor::Dinner,
                ..NutritionPayload::default()
            },
        );
        entry.id = Some("a1".to_string());
        entry.consumed_count = 2.0;
        assert_eq!(
            format_entry_line(&entry),
            "[a1] Rice x2 | 500 kcal | P:10g C:110g F:1g"
        );

        entry.analysis_complete = false;
        assert_eq!(format_entry_line(&entry), "[a1] Rice (analyzing...)");
    }

    #[test]
    fn test_format_totals() {
        let meta = MetaTotals::new(
            Nutrients {
                calories: 1234.4,
                protein: 80.0,
                carbs: 150.0,
                fat: 40.0,
                fiber: 25.0,
                sugar: 30.0,
                sodium: 1800.0,
            },
            6.5,
        );
        assert_eq!(
            format_totals(&meta),
            "1234 kcal | P:80g C:150g F:40g | Fiber:25g Sugar:30g Sodium:1800mg"
        );
    }
}
