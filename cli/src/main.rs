mod commands;
mod config;
mod gateway;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    EditArgs, cmd_calendar, cmd_day, cmd_delete, cmd_edit, cmd_scan, cmd_watch,
};
use crate::config::{Config, DEFAULT_API_URL, Preferences};
use crate::gateway::HttpGateway;
use nutriscan_core::polling::PollConfig;
use nutriscan_core::session::DashboardSession;

#[derive(Parser)]
#[command(
    name = "nutriscan",
    version,
    about = "Daily food log backed by a photo nutrition analysis service"
)]
struct Cli {
    /// Base URL of the analysis API
    #[arg(long, global = true, env = "NUTRISCAN_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
    /// Seconds between checks while analyses are still running
    #[arg(long, global = true, default_value = "5")]
    poll_interval: u64,
    /// Log to stderr (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a day's entries by meal with totals (defaults to today)
    Day {
        /// Date to show (YYYY-MM-DD, today or yesterday)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Photograph a meal: upload an image and log the analysis
    Scan {
        /// Path to the image file
        image: PathBuf,
        /// Meal: breakfast, lunch, dinner, snack, other
        #[arg(short, long, default_value = "other")]
        meal: String,
        /// Return as soon as the entry is logged, without waiting for analysis
        #[arg(long)]
        no_wait: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a logged entry (nutrient values are per serving)
    Edit {
        /// Entry ID to update
        entry_id: String,
        /// Number of servings consumed (at least 1)
        #[arg(short, long)]
        count: Option<f64>,
        /// New food label
        #[arg(long)]
        label: Option<String>,
        /// New meal: breakfast, lunch, dinner, snack, other
        #[arg(long)]
        meal: Option<String>,
        /// Calories per serving
        #[arg(long)]
        calories: Option<f64>,
        /// Protein per serving (g)
        #[arg(long)]
        protein: Option<f64>,
        /// Carbs per serving (g)
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat per serving (g)
        #[arg(long)]
        fat: Option<f64>,
        /// Fiber per serving (g)
        #[arg(long)]
        fiber: Option<f64>,
        /// Sugar per serving (g)
        #[arg(long)]
        sugar: Option<f64>,
        /// Sodium per serving (mg)
        #[arg(long)]
        sodium: Option<f64>,
        /// Health score (0-10)
        #[arg(long)]
        health_score: Option<f64>,
        /// Day the entry was logged on (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a logged entry
    Delete {
        /// Entry ID to delete
        entry_id: String,
        /// Day the entry was logged on (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow today's pending analyses until they finish
    Watch {
        /// Output completions as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show the 12-week strip, a month grid and monthly progress
    Calendar {
        /// Day to select (default: today; the grid reopens the last viewed month)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "nutriscan=info,nutriscan_core=info",
        _ => "nutriscan=debug,nutriscan_core=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.api_url, cli.poll_interval)?;
    debug!(data_dir = %config.data_dir.display(), api = %config.api_url, "config loaded");

    let gateway = Arc::new(HttpGateway::new(&config.api_url, config.token.clone())?);
    let poll = PollConfig {
        interval: config.poll_interval,
        ..PollConfig::default()
    };
    let (session, mut notices) = DashboardSession::new(gateway, poll);

    let result = match cli.command {
        Commands::Day { date, json } => {
            let prefs = Preferences::load(&config.prefs_path);
            cmd_day(&session, date, prefs.page_size, json).await
        }
        Commands::Scan {
            image,
            meal,
            no_wait,
            json,
        } => cmd_scan(&session, &mut notices, &image, &meal, no_wait, json).await,
        Commands::Edit {
            entry_id,
            count,
            label,
            meal,
            calories,
            protein,
            carbs,
            fat,
            fiber,
            sugar,
            sodium,
            health_score,
            date,
            json,
        } => {
            let args = EditArgs {
                count,
                label,
                meal,
                calories,
                protein,
                carbs,
                fat,
                fiber,
                sugar,
                sodium,
                health_score,
            };
            cmd_edit(&session, &entry_id, args, date, json).await
        }
        Commands::Delete {
            entry_id,
            date,
            json,
        } => cmd_delete(&session, &entry_id, date, json).await,
        Commands::Watch { json } => cmd_watch(&session, &mut notices, json).await,
        Commands::Calendar { date, json } => {
            cmd_calendar(&session, date, &config.prefs_path, json).await
        }
    };

    session.close();
    result
}
