//! Datový model sessiony: session, hráč, match cursor, snapshot.

use chrono::{DateTime, Utc};
use metrics_extractor::{DerivedMetrics, GameMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Poslední známá identita/čas/počet zápasů hráče — jediný mutable stav
/// pro detekci nové aktivity. Přepisuje se jen hodnotami pozorovanými
/// ve stejném poll cyklu; selhání fetche ho nechává nedotčený.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchCursor {
    pub last_match_id:    Option<String>,
    pub last_match_at:    Option<DateTime<Utc>>,
    pub last_match_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id:       String,
    pub platform: String,
    pub handle:   String,
    /// None dokud neproběhlo první pozorování match history
    pub cursor:   Option<MatchCursor>,
}

impl Player {
    pub fn new(id: impl Into<String>, platform: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            id:       id.into(),
            platform: platform.into(),
            handle:   handle.into(),
            cursor:   None,
        }
    }
}

/// Point-in-time zachycení statistik hráče. Po zápisu immutable;
/// match_index = 0 je baseline snapshot sessiony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id:  String,
    pub player_id:   String,
    pub captured_at: DateTime<Utc>,
    pub match_index: u32,
    pub raw_payload: Value,
    pub derived:     DerivedMetrics,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub id:            String,
    pub game_mode:     GameMode,
    pub poll_interval: Duration,
    pub players:       Vec<Player>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id:          String,
    pub game_mode:   GameMode,
    pub match_index: u32,
    pub active:      bool,
    pub ended:       bool,
    pub created_at:  DateTime<Utc>,
    pub ended_at:    Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>, game_mode: GameMode) -> Self {
        Self {
            id:          id.into(),
            game_mode,
            match_index: 0,
            active:      false,
            ended:       false,
            created_at:  Utc::now(),
            ended_at:    None,
        }
    }
}
