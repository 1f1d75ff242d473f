use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutriscan_core::meals::MealBucket;
use nutriscan_core::session::DashboardSession;

use super::helpers::{format_entry_line, format_totals, no_neg_zero, parse_date};

pub(crate) async fn cmd_day(
    session: &DashboardSession,
    date: Option<String>,
    page_size: usize,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    session.select_date(date).await?;

    let ledger = session.ledger();
    let buckets = session.meal_buckets();

    if json {
        let view = serde_json::json!({
            "date": ledger.date,
            "meta": ledger.meta,
            "meals": buckets,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    if ledger.entries.is_empty() {
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    let marker = if session.is_viewing_today() {
        " (today)"
    } else {
        ""
    };
    println!("=== {date}{marker} ===\n");

    for bucket in buckets.iter().filter(|b| !b.is_empty()) {
        let meal_label = bucket.meal_for.as_str().to_uppercase();
        let sub_cal = bucket.subtotal_calories;
        let pending = match bucket.pending {
            0 => String::new(),
            n => format!(", {n} analyzing"),
        };
        println!("  {meal_label} ({sub_cal:.0} kcal{pending})");
        for entry in bucket.entries.iter().take(page_size) {
            println!("    {}", format_entry_line(entry));
        }
        if bucket.entries.len() > page_size {
            let more = bucket.entries.len() - page_size;
            println!("    ... and {more} more");
        }
        println!();
    }

    println!("{}", meal_table(&buckets));
    println!("  TOTAL: {}", format_totals(&ledger.meta));
    let score = ledger.meta.total_health_score;
    println!("  HEALTH SCORE: {score:.1}/10");

    if session.is_polling() {
        eprintln!("\nSome analyses are still running; `nutriscan watch` follows them.");
    }

    Ok(())
}

fn meal_table(buckets: &[MealBucket]) -> String {
    #[derive(Tabled)]
    struct MealRow {
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Items")]
        items: usize,
        #[tabled(rename = "Analyzing")]
        pending: usize,
        #[tabled(rename = "Calories")]
        calories: String,
    }

    let rows: Vec<MealRow> = buckets
        .iter()
        .map(|b| MealRow {
            meal: b.meal_for.to_string(),
            items: b.entries.len(),
            pending: b.pending,
            calories: format!("{:.0}", no_neg_zero(b.subtotal_calories)),
        })
        .collect();

    Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutriscan_core::meals::categorize;

    #[test]
    fn test_meal_table_lists_every_meal() {
        let table = meal_table(&categorize(&[]));
        for meal in ["breakfast", "lunch", "dinner", "snack", "other"] {
            assert!(table.contains(meal), "missing {meal}");
        }
        assert!(table.contains("Calories"));
    }
}
