use std::time::Duration;

use relayd_core::body::PollResponse;
use relayd_core::config::Config;
use relayd_core::dispatcher::PollOutcome;
use relayd_core::notifier::{InvoiceReport, ReportOutcome};

use crate::{ClientError, Result};

/// Talks to the job dispatcher's device endpoints.
///
/// Cheap to clone: clones share one connection pool.
#[derive(Debug, Clone)]
pub struct DispatchClient {
    http: reqwest::Client,
    base_url: String,
}

impl DispatchClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.base_url(),
            Duration::from_millis(config.server.timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn next_url(&self, device_id: &str) -> String {
        format!("{}/api/device/{device_id}/next/", self.base_url)
    }

    pub fn invoice_url(&self, device_id: &str) -> String {
        format!("{}/api/device/{device_id}/request-invoice/", self.base_url)
    }

    /// `GET .../next/`. Non-2xx statuses are errors; a 2xx body that does not
    /// parse reads as "no command".
    pub async fn fetch_next(&self, device_id: &str) -> Result<PollResponse> {
        let resp = self.http.get(self.next_url(device_id)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        Ok(PollResponse::parse(&body))
    }

    /// `POST .../request-invoice/` and return the status, whatever it is.
    pub async fn request_invoice(&self, device_id: &str, report: &InvoiceReport) -> Result<u16> {
        let resp = self
            .http
            .post(self.invoice_url(device_id))
            .json(report)
            .send()
            .await?;
        Ok(resp.status().as_u16())
    }

    pub async fn poll(&self, device_id: &str) -> PollOutcome {
        match self.fetch_next(device_id).await {
            Ok(response) => PollOutcome::Response(response),
            Err(e) => PollOutcome::Failed(e.to_string()),
        }
    }

    pub async fn report(&self, device_id: &str, report: &InvoiceReport) -> ReportOutcome {
        match self.request_invoice(device_id, report).await {
            Ok(status) => ReportOutcome::Status(status),
            Err(e) => ReportOutcome::Failed(e.to_string()),
        }
    }
}
