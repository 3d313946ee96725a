//! Remote classifier client.
//!
//! POSTs `{"prompt", "scanner", "topics"}` to the configured URL and reads
//! `{"is_valid", "score", "sanitized_prompt"?}` back.  Transport, read and
//! parse failures follow the fail-open setting: open accepts the text, closed
//! rejects it with a score of 1.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{SafetyScanner, ScanVerdict};

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    prompt: &'a str,
    scanner: &'static str,
    topics: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    is_valid: bool,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    sanitized_prompt: Option<String>,
}

pub struct RemoteScanner {
    url: String,
    topics: Vec<String>,
    fail_open: bool,
    client: reqwest::Client,
}

impl RemoteScanner {
    pub fn new(url: &str, topics: Vec<String>, fail_open: bool, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            topics,
            fail_open,
            client,
        })
    }

    fn failure(&self, text: &str, stage: &'static str, error: &dyn std::fmt::Display) -> ScanVerdict {
        if self.fail_open {
            tracing::warn!(url = %self.url, stage, error = %error, "safety scanner error (fail-open)");
            ScanVerdict::safe(text)
        } else {
            tracing::warn!(url = %self.url, stage, error = %error, "safety scanner error (fail-closed)");
            ScanVerdict {
                text: text.to_string(),
                safe: false,
                score: 1.0,
            }
        }
    }

    async fn scan(&self, text: &str, scanner: &'static str, topics: &[String]) -> ScanVerdict {
        let body = ScanRequest {
            prompt: text,
            scanner,
            topics,
        };
        let resp = match self.client.post(&self.url).json(&body).send().await {
            Ok(r) => r,
            Err(err) => return self.failure(text, "network", &err),
        };
        let status = resp.status();
        if !status.is_success() {
            return self.failure(text, "status", &status);
        }
        let raw = match resp.text().await {
            Ok(t) => t,
            Err(err) => return self.failure(text, "read", &err),
        };
        match serde_json::from_str::<ScanResponse>(&raw) {
            Ok(parsed) => ScanVerdict {
                text: parsed.sanitized_prompt.unwrap_or_else(|| text.to_string()),
                safe: parsed.is_valid,
                score: parsed.score,
            },
            Err(err) => self.failure(text, "parse", &err),
        }
    }
}

#[async_trait::async_trait]
impl SafetyScanner for RemoteScanner {
    fn name(&self) -> &str {
        "remote"
    }

    async fn scan_injection(&self, text: &str) -> ScanVerdict {
        self.scan(text, "PromptInjection", &[]).await
    }

    async fn scan_topics(&self, text: &str) -> ScanVerdict {
        self.scan(text, "BanTopics", &self.topics).await
    }
}
