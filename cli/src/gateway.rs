use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Method, RequestBuilder};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use nutriscan_core::gateway::AnalysisGateway;
use nutriscan_core::models::{AnalysisEntry, DaySnapshot, MonthKey, MonthlySummary};
use nutriscan_core::scan::{ScanEvent, ScanRequest};

/// Upload plus server-side analysis can take far longer than a plain read.
const SCAN_TIMEOUT: Duration = Duration::from_secs(120);
const PROGRESS_TICK: Duration = Duration::from_millis(400);
/// Simulated progress approaches this ceiling until the server answers.
const PROGRESS_CEILING: f64 = 90.0;

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "nutriscan-cli/{} (food tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "api request");
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl AnalysisGateway for HttpGateway {
    async fn fetch_day_analyses(&self, date: NaiveDate) -> Result<DaySnapshot> {
        let resp = self
            .request(Method::GET, "/analyses")
            .query(&[("date", date.format("%Y-%m-%d").to_string())])
            .send()
            .await
            .context("Failed to reach analysis API")?
            .error_for_status()
            .context("Analysis API rejected day request")?;

        resp.json()
            .await
            .context("Failed to parse day analyses response")
    }

    async fn fetch_dashboard_summary(&self, month: MonthKey) -> Result<MonthlySummary> {
        let resp = self
            .request(Method::GET, "/dashboard/summary")
            .query(&[("month", month.to_string())])
            .send()
            .await
            .context("Failed to reach analysis API")?
            .error_for_status()
            .context("Analysis API rejected summary request")?;

        resp.json()
            .await
            .context("Failed to parse monthly summary response")
    }

    async fn update_analysis(
        &self,
        entry_id: &str,
        payload: Map<String, Value>,
    ) -> Result<Option<AnalysisEntry>> {
        let body = self
            .request(Method::PATCH, &format!("/analyses/{entry_id}"))
            .json(&payload)
            .send()
            .await
            .context("Failed to reach analysis API")?
            .error_for_status()
            .with_context(|| format!("Analysis API rejected update of {entry_id}"))?
            .text()
            .await
            .context("Failed to read update response")?;

        Ok(parse_update_response(&body))
    }

    async fn delete_analysis(&self, entry_id: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/analyses/{entry_id}"))
            .send()
            .await
            .context("Failed to reach analysis API")?
            .error_for_status()
            .with_context(|| format!("Analysis API rejected delete of {entry_id}"))?;
        Ok(())
    }

    async fn start_scan(&self, request: ScanRequest) -> Result<mpsc::Receiver<ScanEvent>> {
        let upload = self
            .request(Method::POST, "/analyses")
            .query(&[("mealFor", request.meal_for.as_str())])
            .header(reqwest::header::CONTENT_TYPE, content_type_for(&request.preview))
            .timeout(SCAN_TIMEOUT)
            .body(request.image);

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let send = upload.send();
            tokio::pin!(send);
            let mut ticker = tokio::time::interval(PROGRESS_TICK);
            let mut percent = 0.0;
            let response = loop {
                tokio::select! {
                    res = &mut send => break res,
                    _ = ticker.tick() => {
                        percent = eased_progress(percent);
                        let phase = if percent < 30.0 { "uploading" } else { "analyzing" };
                        let event = ScanEvent::Progress { percent, phase: phase.to_string() };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            };
            let event = match read_scan_response(response).await {
                Ok(entry) => ScanEvent::Completed(entry),
                Err(e) => ScanEvent::Failed(format!("{e:#}")),
            };
            let _ = tx.send(event).await;
        });
        Ok(rx)
    }
}

async fn read_scan_response(
    response: reqwest::Result<reqwest::Response>,
) -> Result<AnalysisEntry> {
    response
        .context("Failed to upload image")?
        .error_for_status()
        .context("Analysis API rejected the image")?
        .json()
        .await
        .context("Failed to parse analysis result")
}

/// Some backends answer a PATCH with the stored record, others with nothing.
fn parse_update_response(body: &str) -> Option<AnalysisEntry> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}

fn eased_progress(percent: f64) -> f64 {
    percent + (PROGRESS_CEILING - percent) * 0.15
}

fn content_type_for(preview: &str) -> &'static str {
    let ext = Path::new(preview)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("salad.jpg"), "image/jpeg");
        assert_eq!(content_type_for("/tmp/Lunch.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("plate.png"), "image/png");
        assert_eq!(content_type_for("IMG_0001.HEIC"), "image/heic");
        assert_eq!(content_type_for("photo"), "application/octet-stream");
    }

    #[test]
    fn test_parse_update_response() {
        assert!(parse_update_response("").is_none());
        assert!(parse_update_response("  \n").is_none());
        assert!(parse_update_response(r#"{"ok":true}"#).is_none());

        let entry = parse_update_response(
            r#"{"_id":"a1","createdAt":"2024-06-15T08:00:00Z","foodLabel":"Rice","consumedCount":2}"#,
        )
        .unwrap();
        assert_eq!(entry.id.as_deref(), Some("a1"));
        assert!((entry.consumed_count - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_eased_progress_stays_below_ceiling() {
        let mut p = 0.0;
        for _ in 0..200 {
            let next = eased_progress(p);
            assert!(next > p || (PROGRESS_CEILING - next).abs() < 1e-6);
            assert!(next <= PROGRESS_CEILING);
            p = next;
        }
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let gw = HttpGateway::new("http://localhost:8080/api/", None).unwrap();
        assert_eq!(gw.base_url, "http://localhost:8080/api");
    }

    #[tokio::test]
    #[ignore = "requires a running analysis API"]
    async fn test_fetch_day_live() {
        let gw = HttpGateway::new(crate::config::DEFAULT_API_URL, None).unwrap();
        let today = chrono::Local::now().date_naive();
        let snapshot = gw.fetch_day_analyses(today).await.unwrap();
        assert!(snapshot.entries.iter().all(|e| e.consumed_count >= 1.0));
    }
}
