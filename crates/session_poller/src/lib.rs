//! rl-session-tracker — Session Poller
//!
//! Per-session polling engine: rozhoduje kdy fetchovat, jestli fetch
//! znamená nové zápasy, a kdy zachytit snapshot. Každá session má
//! vlastní worker task krmený mpsc kanálem — příkazy jedné sessiony
//! (init / poll / capture / end) tak běží striktně FIFO, různé sessiony
//! nezávisle vedle sebe.
//!
//! Stats provider a snapshot store jsou externí kolaborátoři za traity.

pub mod history;
pub mod model;
mod worker;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use logger::{EventLogger, PollingLog};
use rate_guard::{CooldownTracker, ProviderError, RetryPolicy};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub use history::{count_new_matches, cursor_from, normalize_history, MatchHistory, MatchRecord};
pub use model::{MatchCursor, Player, Session, SessionConfig, Snapshot};

use worker::{SessionCommand, SessionWorker};

/// Kapacita fronty příkazů jedné sessiony
const COMMAND_QUEUE_DEPTH: usize = 32;

// ── External collaborator traits ─────────────────────────────────────────────

/// Read-only klient stats provideru. Obě operace můžou vrátit
/// RateLimited s retry-after hintem.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn fetch_profile(&self, platform: &str, handle: &str) -> Result<Value, ProviderError>;
    async fn fetch_match_history(&self, platform: &str, handle: &str) -> Result<Value, ProviderError>;
}

/// Append-only úložiště snapshotů + perzistence match kurzorů.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert_snapshot(&self, snapshot: Snapshot) -> Result<()>;
    /// Baseline = nejstarší snapshot hráče s match_index = 0
    async fn baseline_snapshot(&self, player_id: &str) -> Result<Option<Snapshot>>;
    async fn latest_snapshot(&self, player_id: &str) -> Result<Option<Snapshot>>;
    /// Posledních `limit` snapshotů sessiony, seřazené podle času zachycení
    async fn recent_snapshots(&self, session_id: &str, limit: usize) -> Result<Vec<Snapshot>>;
    async fn update_player_match_state(&self, player_id: &str, cursor: &MatchCursor) -> Result<()>;
}

// ── Session handle ───────────────────────────────────────────────────────────

/// Handle běžící sessiony — příkazy se řadí do fronty jejího workeru.
/// Po ukončení sessiony jsou odmítnuté.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    tx:     mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Vynucený poll tick mimo timer; vrací se až po dokončení cyklu.
    pub async fn poll_now(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Poll { ack: Some(ack_tx) })
            .await
            .map_err(|_| anyhow::anyhow!("session {} already ended", self.id))?;
        ack_rx.await.context("session worker dropped")?;
        Ok(())
    }

    /// Manual capture: snapshot všech hráčů pod aktuálním match indexem,
    /// bez posunu indexu.
    pub async fn capture_now(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Capture { ack: ack_tx })
            .await
            .map_err(|_| anyhow::anyhow!("session {} already ended", self.id))?;
        ack_rx.await.context("session worker dropped")?
    }

    /// Ukončí sessionu; rozběhlá operace doběhne, nové příkazy se zahazují.
    pub async fn end(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::End { ack: ack_tx })
            .await
            .map_err(|_| anyhow::anyhow!("session {} already ended", self.id))?;
        ack_rx.await.context("session worker dropped")?;
        Ok(())
    }
}

// ── Session tracker ──────────────────────────────────────────────────────────

/// Registr aktivních sessions. Jeden proces, jeden tracker; cooldown
/// tracker je jediný stav sdílený napříč sessions.
pub struct SessionTracker {
    provider:    Arc<dyn StatsProvider>,
    store:       Arc<dyn SnapshotStore>,
    cooldown:    Arc<CooldownTracker>,
    polling_log: Arc<PollingLog>,
    events:      Arc<EventLogger>,
    retry:       RetryPolicy,
    sessions:    Mutex<HashMap<String, SessionHandle>>,
}

impl SessionTracker {
    pub fn new(
        provider: Arc<dyn StatsProvider>,
        store: Arc<dyn SnapshotStore>,
        cooldown: Arc<CooldownTracker>,
        polling_log: Arc<PollingLog>,
        events: Arc<EventLogger>,
    ) -> Self {
        Self {
            provider,
            store,
            cooldown,
            polling_log,
            events,
            retry: RetryPolicy::default(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Spustí sessionu: synchronně proběhne inicializace (baseline
    /// snapshoty + seed kurzorů), teprve pak se rozběhne polling timer.
    pub async fn start_session(&self, config: SessionConfig) -> Result<SessionHandle> {
        if config.poll_interval.is_zero() {
            bail!("poll interval must be positive");
        }
        {
            let sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&config.id) {
                bail!("session {} already running", config.id);
            }
        }

        let id = config.id.clone();
        let poll_interval = config.poll_interval;
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let session_worker = SessionWorker::new(
            config,
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
            Arc::clone(&self.cooldown),
            Arc::clone(&self.polling_log),
            Arc::clone(&self.events),
            self.retry,
        );
        tokio::spawn(session_worker.run(rx));

        // Initializing — baseline se zapíše před prvním poll tickem
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(SessionCommand::Init { ack: ack_tx })
            .await
            .map_err(|_| anyhow::anyhow!("session worker exited during init"))?;
        ack_rx.await.context("session worker dropped during init")??;

        // Polling timer — zavřený kanál (ukončená session) timer zastaví
        {
            let timer_tx = tx.clone();
            let timer_id = id.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await; // první tick střílí hned — přeskočit
                loop {
                    ticker.tick().await;
                    if timer_tx.send(SessionCommand::Poll { ack: None }).await.is_err() {
                        debug!("session {} ended, polling timer stopped", timer_id);
                        break;
                    }
                }
            });
        }

        let handle = SessionHandle { id: id.clone(), tx };
        self.sessions.lock().unwrap().insert(id, handle.clone());
        Ok(handle)
    }

    pub fn session(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Ukončí sessionu a vyřadí ji z registru. Snapshoty zůstávají
    /// ve store ke čtení.
    pub async fn end_session(&self, id: &str) -> Result<()> {
        let handle = self
            .sessions
            .lock()
            .unwrap()
            .remove(id)
            .with_context(|| format!("unknown session {id}"))?;
        handle.end().await
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }
}
