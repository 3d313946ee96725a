//! Human-verification check for new chat sessions and feedback.

use std::time::Duration;

use serde::Deserialize;

pub const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

#[async_trait::async_trait]
pub trait BotCheck: Send + Sync {
    /// True when the token proves a human.  Network trouble counts as a
    /// failed check.
    async fn verify(&self, token: &str, client: Option<&str>) -> bool;
}

#[derive(Deserialize)]
struct SiteVerifyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct TurnstileVerifier {
    secret: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

impl TurnstileVerifier {
    pub fn new(secret: Option<String>) -> reqwest::Result<Self> {
        Self::with_endpoint(secret, TURNSTILE_VERIFY_URL)
    }

    pub fn with_endpoint(secret: Option<String>, endpoint: &str) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            secret,
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl BotCheck for TurnstileVerifier {
    async fn verify(&self, token: &str, client: Option<&str>) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            tracing::warn!("TURNSTILE_SECRET_KEY not configured; rejecting bot-check token");
            return false;
        };
        let mut form = vec![("secret", secret), ("response", token)];
        if let Some(ip) = client {
            form.push(("remoteip", ip));
        }
        let resp = match self.client.post(&self.endpoint).form(&form).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "turnstile verification request failed");
                return false;
            }
        };
        match resp.json::<SiteVerifyResponse>().await {
            Ok(outcome) => {
                if !outcome.success {
                    tracing::info!(codes = ?outcome.error_codes, "turnstile rejected token");
                }
                outcome.success
            }
            Err(e) => {
                tracing::warn!(error = %e, "unreadable turnstile response");
                false
            }
        }
    }
}
