mod calendar;
mod day;
mod entry;
mod helpers;
mod scan;
mod watch;

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;

use nutriscan_core::polling::CompletionNotice;
use nutriscan_core::session::DashboardSession;

use helpers::print_notice;

pub(crate) use calendar::cmd_calendar;
pub(crate) use day::cmd_day;
pub(crate) use entry::{EditArgs, cmd_delete, cmd_edit};
pub(crate) use scan::cmd_scan;
pub(crate) use watch::cmd_watch;

const POLL_CHECK: Duration = Duration::from_millis(250);

/// Print completion notices until the session stops polling or the user
/// interrupts. Returns how many completions were seen.
pub(super) async fn wait_for_completions(
    session: &DashboardSession,
    notices: &mut mpsc::UnboundedReceiver<CompletionNotice>,
    json: bool,
) -> Result<usize> {
    let mut seen = 0;
    let mut check = tokio::time::interval(POLL_CHECK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(notice) = notices.recv() => {
                print_notice(&notice, json)?;
                seen += 1;
            }
            _ = check.tick() => {
                if !session.is_polling() {
                    while let Ok(notice) = notices.try_recv() {
                        print_notice(&notice, json)?;
                        seen += 1;
                    }
                    break;
                }
            }
            _ = &mut ctrl_c => {
                eprintln!("Stopped watching");
                break;
            }
        }
    }

    let stuck = session
        .ledger()
        .entries
        .iter()
        .filter(|e| !e.analysis_complete)
        .count();
    if stuck > 0 && !session.is_polling() && !json {
        eprintln!("{stuck} analysis(es) did not finish; retry the scan if they stay pending");
    }
    if let Some(notice) = session.take_notice() {
        eprintln!("Warning: {notice}");
    }
    Ok(seen)
}
