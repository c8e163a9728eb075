//! Per-session worker task.
//!
//! Worker vlastní celý stav sessiony a konzumuje příkazy z mpsc kanálu,
//! takže operace jedné sessiony (init / poll tick / manual capture / end)
//! běží striktně za sebou. Sessiony mezi sebou nesdílí nic kromě
//! CooldownTrackeru.

use crate::history::{count_new_matches, cursor_from, normalize_history, MatchRecord};
use crate::model::{MatchCursor, Player, Session, SessionConfig, Snapshot};
use crate::{SnapshotStore, StatsProvider};
use chrono::Utc;
use logger::{
    EventLogger, MatchDetectedEvent, PollingLog, PollingLogEntry, SessionEndedEvent,
    SessionInitializedEvent, SnapshotCapturedEvent, now_iso,
};
use metrics_extractor::extract_metrics;
use rate_guard::{retry_with_backoff, CooldownTracker, ProviderError, RetryPolicy};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub(crate) enum SessionCommand {
    Init { ack: oneshot::Sender<anyhow::Result<()>> },
    Poll { ack: Option<oneshot::Sender<()>> },
    Capture { ack: oneshot::Sender<anyhow::Result<()>> },
    End { ack: oneshot::Sender<()> },
}

pub(crate) struct SessionWorker {
    session:     Session,
    players:     Vec<Player>,
    provider:    Arc<dyn StatsProvider>,
    store:       Arc<dyn SnapshotStore>,
    cooldown:    Arc<CooldownTracker>,
    polling_log: Arc<PollingLog>,
    events:      Arc<EventLogger>,
    retry:       RetryPolicy,
}

impl SessionWorker {
    pub(crate) fn new(
        config: SessionConfig,
        provider: Arc<dyn StatsProvider>,
        store: Arc<dyn SnapshotStore>,
        cooldown: Arc<CooldownTracker>,
        polling_log: Arc<PollingLog>,
        events: Arc<EventLogger>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            session: Session::new(config.id, config.game_mode),
            players: config.players,
            provider,
            store,
            cooldown,
            polling_log,
            events,
            retry,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SessionCommand::Init { ack } => {
                    let result = self.initialize().await;
                    let _ = ack.send(result);
                }
                SessionCommand::Poll { ack } => {
                    if self.session.active && !self.session.ended {
                        self.poll_cycle().await;
                    }
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                }
                SessionCommand::Capture { ack } => {
                    let index = self.session.match_index;
                    let captured = self.capture_all(index).await;
                    let result = if captured > 0 || self.players.is_empty() {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("manual capture wrote no snapshots"))
                    };
                    let _ = ack.send(result);
                }
                SessionCommand::End { ack } => {
                    self.finish();
                    let _ = ack.send(());
                    break;
                }
            }
        }
    }

    // ── Initializing ──

    /// Zapíše baseline snapshot (match_index = 0) pro každého hráče a
    /// nasadí kurzory z aktuální historie — ještě není s čím porovnávat,
    /// takže první pozorování nehlásí žádnou aktivitu. Best-effort:
    /// selhání jednoho hráče neblokuje ostatní.
    async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(
            "session {} initializing ({} players, mode {})",
            self.session.id,
            self.players.len(),
            self.session.game_mode.as_str()
        );

        let mut baseline_captured = 0usize;
        for i in 0..self.players.len() {
            let player = self.players[i].clone();

            match self.fetch_profile(&player.platform, &player.handle).await {
                Ok(raw) => {
                    if self.write_snapshot(&player.id, raw, 0).await {
                        baseline_captured += 1;
                    }
                }
                Err(err) => {
                    self.note_rate_limit(&err);
                    warn!("baseline capture failed for {}: {}", player.id, err);
                }
            }

            match self.fetch_history(&player.platform, &player.handle).await {
                Ok(raw) => {
                    let history = normalize_history(&raw);
                    let latest = history.matches.first().cloned();
                    self.log_poll_entry(&player.id, &None, latest.as_ref(), history.total_count, 0, None);
                    if let Some(cursor) = cursor_from(&history) {
                        self.persist_cursor(&player.id, &cursor).await;
                        self.players[i].cursor = Some(cursor);
                    }
                }
                Err(err) => {
                    self.note_rate_limit(&err);
                    self.log_poll_entry(&player.id, &None, None, None, 0, Some(err.to_string()));
                    warn!("cursor seed failed for {}: {}", player.id, err);
                }
            }
        }

        self.session.active = true;
        let _ = self.events.log(&SessionInitializedEvent {
            ts:                now_iso(),
            event:             "SESSION_INITIALIZED",
            session_id:        self.session.id.clone(),
            game_mode:         self.session.game_mode.as_str().to_string(),
            players:           self.players.len(),
            baseline_captured,
        });
        Ok(())
    }

    // ── Polling ──

    async fn poll_cycle(&mut self) {
        let cooldown = self.cooldown.remaining_cooldown();
        if !cooldown.is_zero() {
            // no-op tick, ne chyba
            debug!(
                "session {}: shared cooldown active ({}s left), skipping poll tick",
                self.session.id,
                cooldown.as_secs()
            );
            return;
        }

        let mut max_new = 0u32;
        let mut triggered_by = String::new();

        for i in 0..self.players.len() {
            let player = self.players[i].clone();
            let prior = player.cursor.clone();

            let raw = match self.fetch_history(&player.platform, &player.handle).await {
                Ok(raw) => raw,
                Err(err @ ProviderError::RateLimited { .. }) => {
                    // Sdílená kvóta je pryč — zbývající hráče v tomto cyklu
                    // přeskočit úplně, ne retryovat.
                    self.note_rate_limit(&err);
                    self.log_poll_entry(&player.id, &prior, None, None, 0, Some(err.to_string()));
                    warn!(
                        "session {}: rate limited on {}, skipping rest of poll cycle",
                        self.session.id, player.id
                    );
                    break;
                }
                Err(err) => {
                    // kurzor zůstává nedotčený
                    self.log_poll_entry(&player.id, &prior, None, None, 0, Some(err.to_string()));
                    warn!("match history fetch failed for {}: {}", player.id, err);
                    continue;
                }
            };

            let history = normalize_history(&raw);
            let latest = history.matches.first().cloned();
            let new_matches = match &prior {
                // první pozorování zakládá baseline, aktivita to není
                None => 0,
                Some(cursor) => count_new_matches(cursor, &history),
            };

            self.log_poll_entry(&player.id, &prior, latest.as_ref(), history.total_count, new_matches, None);

            // kurzor se posouvá na "co jsme právě viděli", i bez nových zápasů
            if let Some(cursor) = cursor_from(&history) {
                self.persist_cursor(&player.id, &cursor).await;
                self.players[i].cursor = Some(cursor);
            }

            if new_matches > max_new {
                max_new = new_matches;
                triggered_by = player.id.clone();
            }
        }

        // Index posouvá nejaktivnější hráč (max, ne součet) — zápasy jsou
        // napříč spoluhráči zhruba simultánní, rozdílné počty jsou šum
        // provideru.
        if max_new > 0 {
            self.session.match_index += max_new;
            info!(
                "session {}: {} new match(es) detected (by {}), match index -> {}",
                self.session.id, max_new, triggered_by, self.session.match_index
            );
            let _ = self.events.log(&MatchDetectedEvent {
                ts:           now_iso(),
                event:        "MATCH_DETECTED",
                session_id:   self.session.id.clone(),
                match_index:  self.session.match_index,
                new_matches:  max_new,
                triggered_by,
            });
            self.capture_all(self.session.match_index).await;
        }
    }

    // ── Snapshot capture ──

    /// Profile snapshot všech hráčů pod daným match indexem, best-effort.
    /// Rate limit ukončuje i capture — kvóta je sdílená.
    async fn capture_all(&mut self, match_index: u32) -> usize {
        let mut captured = 0usize;
        for player in self.players.clone() {
            match self.fetch_profile(&player.platform, &player.handle).await {
                Ok(raw) => {
                    if self.write_snapshot(&player.id, raw, match_index).await {
                        captured += 1;
                    }
                }
                Err(err @ ProviderError::RateLimited { .. }) => {
                    self.note_rate_limit(&err);
                    warn!(
                        "session {}: rate limited during capture, skipping rest",
                        self.session.id
                    );
                    break;
                }
                Err(err) => {
                    warn!("snapshot capture failed for {}: {}", player.id, err);
                }
            }
        }
        captured
    }

    async fn write_snapshot(&self, player_id: &str, raw: Value, match_index: u32) -> bool {
        let derived = extract_metrics(&raw, self.session.game_mode);
        let snapshot = Snapshot {
            session_id:  self.session.id.clone(),
            player_id:   player_id.to_string(),
            captured_at: Utc::now(),
            match_index,
            raw_payload: raw,
            derived:     derived.clone(),
        };
        match self.store.insert_snapshot(snapshot).await {
            Ok(()) => {
                let _ = self.events.log(&SnapshotCapturedEvent {
                    ts:          now_iso(),
                    event:       "SNAPSHOT_CAPTURED",
                    session_id:  self.session.id.clone(),
                    player_id:   player_id.to_string(),
                    match_index,
                    wins:        derived.wins,
                    losses:      derived.losses,
                });
                true
            }
            Err(err) => {
                warn!("snapshot insert failed for {}: {:#}", player_id, err);
                false
            }
        }
    }

    // ── Ended ──

    fn finish(&mut self) {
        self.session.ended = true;
        self.session.active = false;
        self.session.ended_at = Some(Utc::now());
        let duration_secs = (Utc::now() - self.session.created_at).num_seconds();
        info!(
            "session {} ended at match index {} after {}s",
            self.session.id, self.session.match_index, duration_secs
        );
        let _ = self.events.log(&SessionEndedEvent {
            ts:            now_iso(),
            event:         "SESSION_ENDED",
            session_id:    self.session.id.clone(),
            match_index:   self.session.match_index,
            duration_secs,
        });
    }

    // ── Helpers ──

    async fn fetch_profile(&self, platform: &str, handle: &str) -> Result<Value, ProviderError> {
        retry_with_backoff(self.retry, || {
            let provider = Arc::clone(&self.provider);
            async move { provider.fetch_profile(platform, handle).await }
        })
        .await
    }

    async fn fetch_history(&self, platform: &str, handle: &str) -> Result<Value, ProviderError> {
        retry_with_backoff(self.retry, || {
            let provider = Arc::clone(&self.provider);
            async move { provider.fetch_match_history(platform, handle).await }
        })
        .await
    }

    fn note_rate_limit(&self, err: &ProviderError) {
        if let ProviderError::RateLimited { retry_after_ms } = err {
            self.cooldown
                .record_rate_limit(Some(Duration::from_millis(*retry_after_ms)));
        }
    }

    async fn persist_cursor(&self, player_id: &str, cursor: &MatchCursor) {
        if let Err(err) = self.store.update_player_match_state(player_id, cursor).await {
            warn!("cursor persist failed for {}: {:#}", player_id, err);
        }
    }

    fn log_poll_entry(
        &self,
        player_id: &str,
        prior: &Option<MatchCursor>,
        latest: Option<&MatchRecord>,
        observed_count: Option<u64>,
        new_matches: u32,
        error: Option<String>,
    ) {
        let prior = prior.clone().unwrap_or_default();
        let entry = PollingLogEntry {
            ts:                   Utc::now(),
            session_id:           self.session.id.clone(),
            player_id:            player_id.to_string(),
            prior_match_id:       prior.last_match_id,
            prior_match_at:       prior.last_match_at,
            prior_match_count:    prior.last_match_count,
            observed_match_id:    latest.map(|m| m.id.clone()),
            observed_match_at:    latest.and_then(|m| m.played_at),
            observed_match_count: observed_count,
            new_matches,
            error,
        };
        let _ = self.events.log(&entry);
        self.polling_log.append(entry);
    }
}
