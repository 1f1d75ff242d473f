use anyhow::Result;
use chrono::Local;
use tokio::sync::mpsc;

use nutriscan_core::polling::CompletionNotice;
use nutriscan_core::session::DashboardSession;

use super::wait_for_completions;

pub(crate) async fn cmd_watch(
    session: &DashboardSession,
    notices: &mut mpsc::UnboundedReceiver<CompletionNotice>,
    json: bool,
) -> Result<()> {
    session.select_date(Local::now().date_naive()).await?;

    if !session.is_polling() {
        if !json {
            println!("No analyses pending");
        }
        return Ok(());
    }

    if !json {
        let every = session.poll_config().interval.as_secs();
        eprintln!("Checking every {every}s until all analyses finish (Ctrl-C to stop)...");
    }
    let seen = wait_for_completions(session, notices, json).await?;
    if !json {
        println!("{seen} analysis(es) completed");
    }
    Ok(())
}
