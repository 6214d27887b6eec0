//! Report delivery to the central collector
//!
//! At-least-once delivery: transport failures and non-success responses are
//! retried with exponential backoff up to a bounded attempt count. After
//! exhaustion the report is dropped; the next device event or periodic
//! resync supersedes it. Re-sending is safe because the collector upserts by
//! (organization, machine, port path).

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use usbfleet_types::{ApiResponse, PortReport, ReportAck};

use crate::error::{Result, WatchError};

/// Collector route accepting wire reports.
pub const REPORT_ROUTE: &str = "/api/reports";

/// Delivery interface handed to the watcher; tests substitute a recorder.
#[async_trait]
pub trait ReportTransmitter: Send + Sync {
    /// Deliver one report, retrying internally as configured.
    async fn deliver(&self, report: &PortReport) -> Result<ReportAck>;
}

/// Compute the backoff delay before retry `attempt` (0-based): exponential
/// doubling plus jitter of up to half the base, so racing agents do not
/// retry in lockstep.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(10));
    let jitter_ms = if base.as_millis() > 1 {
        rand::thread_rng().gen_range(0..=(base.as_millis() as u64 / 2))
    } else {
        0
    };
    exp + Duration::from_millis(jitter_ms)
}

/// HTTP transmission client for the collector.
pub struct HttpTransmitter {
    client: reqwest::Client,
    endpoint: String,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpTransmitter {
    /// Build a transmitter against the collector base URL.
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WatchError::Transmission(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), REPORT_ROUTE),
            max_attempts: max_attempts.max(1),
            backoff_base,
        })
    }

    async fn attempt(&self, report: &PortReport) -> Result<ReportAck> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(report)
            .send()
            .await
            .map_err(|e| WatchError::Transmission(format!("request failed: {}", e)))?;

        let status = response.status();
        let body: ApiResponse<ReportAck> = response
            .json()
            .await
            .map_err(|e| WatchError::Transmission(format!("invalid response body: {}", e)))?;

        if status.is_success() && body.success {
            body.data
                .ok_or_else(|| WatchError::Transmission("response missing ack".to_string()))
        } else {
            let reason = body
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| format!("status {}", status));
            Err(WatchError::Transmission(reason))
        }
    }
}

#[async_trait]
impl ReportTransmitter for HttpTransmitter {
    async fn deliver(&self, report: &PortReport) -> Result<ReportAck> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1, self.backoff_base);
                debug!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Retrying delivery");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(report).await {
                Ok(ack) => {
                    info!(
                        org_id = %ack.org_id,
                        machine_id = %ack.machine_id,
                        inserted = ack.inserted,
                        updated = ack.updated,
                        "Report delivered"
                    );
                    return Ok(ack);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Delivery attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            WatchError::Transmission("delivery failed with no attempts".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let base = Duration::from_millis(100);
        // Lower bounds; jitter only adds.
        assert!(backoff_delay(0, base) >= Duration::from_millis(100));
        assert!(backoff_delay(1, base) >= Duration::from_millis(200));
        assert!(backoff_delay(3, base) >= Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let base = Duration::from_millis(100);
        for attempt in 0..4 {
            let delay = backoff_delay(attempt, base);
            let exp = Duration::from_millis(100 * (1 << attempt));
            assert!(delay <= exp + Duration::from_millis(50));
        }
    }

    #[test]
    fn test_backoff_exponent_is_capped() {
        let base = Duration::from_millis(100);
        // Attempt counts far past the cap must not overflow.
        let delay = backoff_delay(40, base);
        assert!(delay >= Duration::from_millis(100 * 1024));
    }

    #[test]
    fn test_endpoint_join_handles_trailing_slash() {
        let t = HttpTransmitter::new(
            "http://localhost:5000/",
            Duration::from_secs(1),
            1,
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(t.endpoint, "http://localhost:5000/api/reports");
    }

    #[tokio::test]
    async fn test_deliver_exhausts_attempts_against_dead_endpoint() {
        // Nothing listens on this port; every attempt is a transport error.
        let t = HttpTransmitter::new(
            "http://127.0.0.1:1",
            Duration::from_millis(200),
            2,
            Duration::from_millis(1),
        )
        .unwrap();

        let report = PortReport::new(
            "org-1",
            "PC_0011aabbccdd",
            vec![usbfleet_types::PortRecord::empty("1-1")],
        );
        let err = t.deliver(&report).await.unwrap_err();
        assert!(matches!(err, WatchError::Transmission(_)));
    }
}
