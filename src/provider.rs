/// HTTP klient stats provideru (TRN-style API).
///
/// Každá odpověď aktualizuje sdílený CooldownTracker z rate-limit
/// hlaviček — i když samotné volání selhalo. 429 se mapuje na
/// RateLimited s Retry-After hintem, zbytek chyb na Transient.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rate_guard::{CooldownTracker, ProviderError};
use serde_json::Value;
use session_poller::StatsProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("rl-session-tracker/", env!("CARGO_PKG_VERSION"));

pub struct TrnClient {
    http:     reqwest::Client,
    base_url: String,
    /// None = klíč nenakonfigurovaný → hard fail na prvním volání
    api_key:  Option<String>,
    cooldown: Arc<CooldownTracker>,
}

impl TrnClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        cooldown: Arc<CooldownTracker>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            cooldown,
        })
    }

    async fn get(&self, url: String) -> Result<Value, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)?;

        let response = self
            .http
            .get(&url)
            .header("TRN-Api-Key", api_key)
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("request failed: {e}")))?;

        self.record_quota_headers(response.headers());

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = header_u64(response.headers(), "retry-after")
                .map(|secs| secs * 1000)
                .unwrap_or(rate_guard::DEFAULT_RETRY_AFTER.as_millis() as u64);
            debug!("provider 429 for {url}, retry after {retry_after_ms}ms");
            return Err(ProviderError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            return Err(ProviderError::transient(format!("{url} returned {status}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::transient(format!("malformed body: {e}")))
    }

    fn record_quota_headers(&self, headers: &reqwest::header::HeaderMap) {
        let limit = header_u64(headers, "x-ratelimit-limit").map(|v| v as u32);
        let remaining = header_u64(headers, "x-ratelimit-remaining").map(|v| v as u32);
        let reset_at = header_u64(headers, "x-ratelimit-reset").and_then(parse_reset);
        if limit.is_some() || remaining.is_some() || reset_at.is_some() {
            self.cooldown.record_headers(limit, remaining, reset_at);
        }
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Reset hlavička chodí buď jako unix epocha, nebo jako sekundy do resetu
fn parse_reset(value: u64) -> Option<DateTime<Utc>> {
    if value >= 1_000_000_000 {
        Utc.timestamp_opt(value as i64, 0).single()
    } else {
        Some(Utc::now() + chrono::Duration::seconds(value as i64))
    }
}

#[async_trait]
impl StatsProvider for TrnClient {
    async fn fetch_profile(&self, platform: &str, handle: &str) -> Result<Value, ProviderError> {
        self.get(format!("{}/standard/profile/{platform}/{handle}", self.base_url))
            .await
    }

    async fn fetch_match_history(&self, platform: &str, handle: &str) -> Result<Value, ProviderError> {
        self.get(format!(
            "{}/standard/profile/{platform}/{handle}/matches",
            self.base_url
        ))
        .await
    }
}
