use anyhow::{Context, Result, bail};
use chrono::Local;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use tokio::sync::mpsc;

use nutriscan_core::error::LedgerError;
use nutriscan_core::models::validate_meal_for;
use nutriscan_core::polling::CompletionNotice;
use nutriscan_core::scan::ScanRequest;
use nutriscan_core::session::{DashboardSession, Outcome};

use super::helpers::{format_entry_line, format_totals, json_error};
use super::wait_for_completions;

pub(crate) async fn cmd_scan(
    session: &DashboardSession,
    notices: &mut mpsc::UnboundedReceiver<CompletionNotice>,
    image: &Path,
    meal: &str,
    no_wait: bool,
    json: bool,
) -> Result<()> {
    let meal_for = validate_meal_for(meal)?;
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read image: {}", image.display()))?;
    if bytes.is_empty() {
        bail!("Image file is empty: {}", image.display());
    }
    let preview = image.file_name().map_or_else(
        || image.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    );

    // Finished scans only merge into today's ledger.
    session.select_date(Local::now().date_naive()).await?;

    let request = ScanRequest {
        image: bytes,
        preview,
        meal_for,
    };
    let result = session
        .submit_scan(request, |scan| {
            if !json {
                let pct = scan.display_percent();
                eprint!("\r  {} {pct:>2}% {:<10}", scan.preview, scan.phase);
                let _ = io::stderr().flush();
            }
        })
        .await;
    if !json {
        eprintln!();
    }

    let (entry, outcome) = match result {
        Ok(done) => done,
        Err(LedgerError::ScanFailed(reason)) => {
            if json {
                println!("{}", json_error(&reason));
            } else {
                eprintln!("Scan failed: {reason}");
                eprintln!("Retake the photo and run the scan again.");
            }
            session.retake_scan();
            process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        let view = serde_json::json!({
            "entry": entry,
            "merged": outcome == Outcome::Applied,
            "meta": session.ledger().meta,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        match outcome {
            Outcome::Applied => println!("Logged {}", format_entry_line(&entry)),
            Outcome::Unchanged => println!("Already logged: {}", entry.food_label),
            Outcome::Discarded => println!("Logged {} for today", entry.food_label),
        }
        println!("  TOTAL: {}", format_totals(&session.ledger().meta));
    }

    if !entry.analysis_complete && !no_wait && session.is_polling() {
        if !json {
            eprintln!("Waiting for the analysis to finish (Ctrl-C to stop)...");
        }
        wait_for_completions(session, notices, json).await?;
    }
    Ok(())
}
