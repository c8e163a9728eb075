/// rl-session-tracker — Logger
/// JSONL event stream + bounded in-memory polling log

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event typy ────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct SessionInitializedEvent {
    pub ts:                String,
    pub event:             &'static str,   // "SESSION_INITIALIZED"
    pub session_id:        String,
    pub game_mode:         String,
    pub players:           usize,
    pub baseline_captured: usize,          // kolik hráčů má baseline snapshot
}

#[derive(Serialize, Debug)]
pub struct MatchDetectedEvent {
    pub ts:           String,
    pub event:        &'static str,   // "MATCH_DETECTED"
    pub session_id:   String,
    pub match_index:  u32,
    pub new_matches:  u32,            // max přes všechny hráče v cyklu
    pub triggered_by: String,         // hráč s nejvyšším počtem nových zápasů
}

#[derive(Serialize, Debug)]
pub struct SnapshotCapturedEvent {
    pub ts:          String,
    pub event:       &'static str,    // "SNAPSHOT_CAPTURED"
    pub session_id:  String,
    pub player_id:   String,
    pub match_index: u32,
    pub wins:        Option<f64>,
    pub losses:      Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct SessionEndedEvent {
    pub ts:            String,
    pub event:         &'static str,  // "SESSION_ENDED"
    pub session_id:    String,
    pub match_index:   u32,
    pub duration_secs: i64,
}

// ── Polling log (ring buffer) ─────────────────────────────────────────────────

/// Jeden záznam na hráče a poll cyklus — konzumuje ho externí log viewer,
/// do řízení enginu nijak nevstupuje.
#[derive(Serialize, Debug, Clone)]
pub struct PollingLogEntry {
    pub ts:                   DateTime<Utc>,
    pub session_id:           String,
    pub player_id:            String,
    pub prior_match_id:       Option<String>,
    pub prior_match_at:       Option<DateTime<Utc>>,
    pub prior_match_count:    Option<u64>,
    pub observed_match_id:    Option<String>,
    pub observed_match_at:    Option<DateTime<Utc>>,
    pub observed_match_count: Option<u64>,
    pub new_matches:          u32,
    pub error:                Option<String>,
}

pub const POLLING_LOG_CAPACITY: usize = 500;

/// Bounded ring buffer — nejstarší záznamy se zahazují za kapacitou.
pub struct PollingLog {
    entries:  Mutex<VecDeque<PollingLogEntry>>,
    capacity: usize,
}

impl PollingLog {
    pub fn new() -> Self {
        Self::with_capacity(POLLING_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries:  Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn append(&self, entry: PollingLogEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Posledních `limit` záznamů, nejnovější poslední.
    pub fn recent(&self, limit: usize) -> Vec<PollingLogEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .skip(entries.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PollingLog {
    fn default() -> Self {
        Self::new()
    }
}
