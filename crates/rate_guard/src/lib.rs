//! rl-session-tracker — Rate Guard
//!
//! Sdílený stav rate limitu stats provideru (jedna kvóta pro celý proces,
//! ne per session) + bounded retry s exponenciálním backoffem.
//!
//! CooldownTracker je jediný mutable stav sdílený napříč sessions — musí
//! snést souběžné čtení/zápis z více session timerů najednou.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Fallback retry-after když provider neposlal explicitní hodnotu
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
/// Strop cooldownu — delší hint od provideru nevěříme
pub const MAX_COOLDOWN: Duration = Duration::from_secs(15 * 60);

// ── Provider error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider vrátil 429 — nese retry-after hint v ms
    #[error("provider rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Chybí API klíč — hard fail na prvním volání, ne tichý no-op
    #[error("provider API key is not configured")]
    MissingApiKey,

    /// Síť, 5xx, rozbité tělo odpovědi — kandidát na retry
    #[error("transient provider error: {0}")]
    Transient(String),
}

impl ProviderError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

// ── Cooldown tracker ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CooldownState {
    cooldown_until: Option<Instant>,
    limit:          Option<u32>,
    remaining:      Option<u32>,
    reset_at:       Option<DateTime<Utc>>,
}

/// Single source of truth: je sdílený provider zrovna rate-limited a dokdy?
///
/// Drží explicitní cooldown okno (z 429 odpovědí) a poslední známý quota
/// snapshot z hlaviček. Nikdy neblokuje, žádné side effecty mimo vlastní stav.
pub struct CooldownTracker {
    state: Mutex<CooldownState>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CooldownState::default()),
        }
    }

    /// Zbývající cooldown — max z explicitního okna a odvozeného
    /// (remaining == 0 + reset_at). Nula když se smí volat.
    pub fn remaining_cooldown(&self) -> Duration {
        let state = self.state.lock().unwrap();

        let explicit = state
            .cooldown_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);

        let derived = match (state.remaining, state.reset_at) {
            (Some(0), Some(reset_at)) => (reset_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        };

        explicit.max(derived)
    }

    pub fn is_cooling_down(&self) -> bool {
        !self.remaining_cooldown().is_zero()
    }

    /// Zaznamenej rate-limit signál — prodlouží cooldown na
    /// now + min(hint, MAX_COOLDOWN). Existující delší okno se nezkracuje.
    pub fn record_rate_limit(&self, retry_after: Option<Duration>) {
        let hint = retry_after.unwrap_or(DEFAULT_RETRY_AFTER).min(MAX_COOLDOWN);
        let until = Instant::now() + hint;

        let mut state = self.state.lock().unwrap();
        state.cooldown_until = Some(match state.cooldown_until {
            Some(current) => current.max(until),
            None => until,
        });
        debug!("provider cooldown extended by {:?}", hint);
    }

    /// Ulož quota snapshot z hlaviček odpovědi — nezávisle na tom,
    /// jestli samotné volání uspělo.
    pub fn record_headers(
        &self,
        limit: Option<u32>,
        remaining: Option<u32>,
        reset_at: Option<DateTime<Utc>>,
    ) {
        let mut state = self.state.lock().unwrap();
        if limit.is_some() {
            state.limit = limit;
        }
        if remaining.is_some() {
            state.remaining = remaining;
        }
        if reset_at.is_some() {
            state.reset_at = reset_at;
        }
    }

    /// Poslední známé (limit, remaining) — pro heartbeat/log výpisy.
    pub fn quota(&self) -> (Option<u32>, Option<u32>) {
        let state = self.state.lock().unwrap();
        (state.limit, state.remaining)
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ── Retry executor ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Počet opakování po prvním pokusu (celkem retries + 1 pokusů)
    pub retries:    u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries:    2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Spusť operaci s bounded retry. Delay = base_delay * 2^attempt;
/// explicitní retry-after z RateLimited má přednost. Poslední selhání
/// se vrací volajícímu, dál se neretryuje.
///
/// Kontrola "už jsme v cooldownu, vůbec nevolat" patří volajícímu
/// (session poller) — jedno pozorování rate limitu tak zruší celý
/// poll cyklus místo retry per hráč.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.retries {
                    return Err(err);
                }
                let delay = match &err {
                    ProviderError::RateLimited { retry_after_ms } => {
                        Duration::from_millis(*retry_after_ms)
                    }
                    _ => policy.base_delay * 2u32.pow(attempt),
                };
                debug!(
                    "attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
