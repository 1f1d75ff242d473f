use anyhow::{Result, bail};

use nutriscan_core::error::LedgerError;
use nutriscan_core::models::{AnalysisUpdate, validate_meal_for};
use nutriscan_core::session::{DashboardSession, Outcome};

use super::helpers::{exit_not_found, format_entry_line, format_totals, parse_date};

/// Raw `edit` flags as parsed by clap.
#[derive(Default)]
pub(crate) struct EditArgs {
    pub count: Option<f64>,
    pub label: Option<String>,
    pub meal: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub sugar: Option<f64>,
    pub sodium: Option<f64>,
    pub health_score: Option<f64>,
}

impl EditArgs {
    fn into_update(self) -> Result<AnalysisUpdate> {
        let update = AnalysisUpdate {
            food_label: self.label,
            meal_for: self.meal.as_deref().map(validate_meal_for).transpose()?,
            consumed_count: self.count,
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            fiber: self.fiber,
            sugar: self.sugar,
            sodium: self.sodium,
            health_score: self.health_score,
        };
        if update == AnalysisUpdate::default() {
            bail!(
                "Nothing to update. Provide at least one of --count, --label, --meal or a nutrient value"
            );
        }
        Ok(update)
    }
}

pub(crate) async fn cmd_edit(
    session: &DashboardSession,
    entry_id: &str,
    args: EditArgs,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let update = args.into_update()?;
    session.select_date(parse_date(date)?).await?;

    let outcome = match session.edit_entry(entry_id, &update).await {
        Ok(outcome) => outcome,
        Err(LedgerError::EntryNotFound(_)) => exit_not_found(entry_id, json),
        Err(e) => return Err(e.into()),
    };

    let ledger = session.ledger();
    if json {
        let view = serde_json::json!({
            "outcome": format!("{outcome:?}").to_lowercase(),
            "entry": ledger.find(entry_id),
            "meta": ledger.meta,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    match outcome {
        Outcome::Unchanged => println!("Nothing changed for entry {entry_id}"),
        Outcome::Discarded => println!("Saved entry {entry_id}; reload the day to see it"),
        Outcome::Applied => {
            if let Some(entry) = ledger.find(entry_id) {
                println!("Updated {}", format_entry_line(entry));
            }
            println!("  TOTAL: {}", format_totals(&ledger.meta));
        }
    }
    Ok(())
}

pub(crate) async fn cmd_delete(
    session: &DashboardSession,
    entry_id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    session.select_date(parse_date(date)?).await?;

    match session.delete_entry(entry_id).await {
        Ok(_) => {}
        Err(LedgerError::EntryNotFound(_)) => exit_not_found(entry_id, json),
        Err(e) => return Err(e.into()),
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": entry_id }));
    } else {
        println!("Deleted entry {entry_id}");
        println!("  TOTAL: {}", format_totals(&session.ledger().meta));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutriscan_core::models::MealFor;

    #[test]
    fn test_empty_edit_rejected() {
        assert!(EditArgs::default().into_update().is_err());
    }

    #[test]
    fn test_edit_args_mapped() {
        let update = EditArgs {
            count: Some(2.0),
            meal: Some("Lunch".to_string()),
            calories: Some(320.0),
            ..EditArgs::default()
        }
        .into_update()
        .unwrap();
        assert_eq!(update.consumed_count, Some(2.0));
        assert_eq!(update.meal_for, Some(MealFor::Lunch));
        assert_eq!(update.calories, Some(320.0));
        assert!(update.food_label.is_none());
    }

    #[test]
    fn test_edit_args_bad_meal() {
        let args = EditArgs {
            meal: Some("brunch".to_string()),
            ..EditArgs::default()
        };
        assert!(args.into_update().is_err());
    }
}
