//! Best-effort forwarding of operator replies to the automation engine.

use std::time::Duration;

use crate::types::OutboundNotice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { status: u16 },
    /// No endpoint configured.
    Skipped,
    Failed { reason: String },
}

#[derive(Clone)]
pub struct AutomationDispatcher {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl AutomationDispatcher {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: None,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Sends the notice once. Never fails the caller: every outcome is
    /// logged and returned for inspection.
    pub async fn forward(&self, notice: &OutboundNotice) -> DispatchOutcome {
        let Some(endpoint) = self.endpoint.as_deref() else {
            tracing::warn!("automation webhook url not set; reply not forwarded");
            return DispatchOutcome::Skipped;
        };

        let response = match self.client.post(endpoint).json(notice).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, phone = %notice.phone, "automation webhook call failed");
                return DispatchOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), phone = %notice.phone, "automation webhook accepted reply");
            return DispatchOutcome::Delivered {
                status: status.as_u16(),
            };
        }

        let raw_body = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            body = %raw_body,
            phone = %notice.phone,
            "automation webhook rejected reply"
        );
        DispatchOutcome::Failed {
            reason: format!("status {status}"),
        }
    }
}
