use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::{ApprovalEvent, ApprovalNotifier};

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns the header form "sha256=<lowercase hex>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid webhook signing key: {}", e))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Delivers approval events to the configured webhook URLs.
///
/// - HMAC-SHA256 signing (`x-gatekeeper-signature`) when a secret is set
/// - retries with back-off between attempts (0s → 1s → 5s → 25s by default)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
    backoff: Vec<Duration>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Gatekeeper-Webhook/1.0")
            .build()?;
        Ok(Self {
            client,
            urls,
            signing_secret,
            backoff: [0, 1, 5, 25].into_iter().map(Duration::from_secs).collect(),
        })
    }

    /// Replace the delay schedule; one attempt is made per entry.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Send one event to one URL, retrying per the back-off schedule.
    pub async fn send(&self, url: &str, event: &ApprovalEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload))
            .transpose()?;

        for (attempt, delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(*delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-gatekeeper-delivery-id", &delivery_id)
                .header("x-gatekeeper-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-gatekeeper-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivery failed (non-2xx)"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff.len(),
            url
        ))
    }

    /// Deliver to every configured URL concurrently; failures are only logged.
    pub async fn deliver_all(&self, event: &ApprovalEvent) {
        let sends = self.urls.iter().map(|url| async move {
            if let Err(e) = self.send(url, event).await {
                warn!(url = %url, error = %e, "webhook dispatch ultimately failed");
            }
        });
        futures::future::join_all(sends).await;
    }
}

#[async_trait]
impl ApprovalNotifier for WebhookNotifier {
    /// Fire-and-forget: delivery runs on its own task.
    async fn notify(&self, event: ApprovalEvent) {
        if self.urls.is_empty() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.deliver_all(&event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret123", b"payload").unwrap();
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
        assert_eq!(sig1.len(), "sha256=".len() + 64);
    }

    #[test]
    fn test_hmac_signature_different_secret() {
        let sig1 = hmac_sha256_hex("secret1", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret2", b"payload").unwrap();
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn test_default_backoff_schedule() {
        let notifier = WebhookNotifier::new(vec![], None).unwrap();
        assert_eq!(notifier.backoff.len(), 4);
        assert!(notifier.backoff[0].is_zero());
    }
}
