//! Normalizace match history payloadu + inference počtu nových zápasů.
//!
//! Provider formát neřídíme — id i timestamp zkoušíme pod několika
//! pravděpodobnými jmény polí. Timestamp je buď RFC3339 string nebo
//! unix sekundy.

use crate::model::MatchCursor;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub id:        String,
    pub played_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct MatchHistory {
    /// Nejnovější zápas první
    pub matches:     Vec<MatchRecord>,
    pub total_count: Option<u64>,
}

const ID_FIELDS: [&str; 3] = ["id", "matchId", "match_id"];
const TIMESTAMP_FIELDS: [&str; 5] = ["timestamp", "date", "playedAt", "endedAt", "metadata/timestamp"];
const COUNT_FIELDS: [&str; 3] = ["totalMatches", "matchCount", "total"];

fn probe_id(entry: &Value) -> Option<String> {
    for field in ID_FIELDS {
        let v = match entry.get(field) {
            Some(v) => v,
            None => continue,
        };
        if let Some(s) = v.as_str() {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
        if let Some(n) = v.as_u64() {
            return Some(n.to_string());
        }
    }
    None
}

fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = v.as_str() {
        return DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    let secs = v.as_i64()?;
    Utc.timestamp_opt(secs, 0).single()
}

fn probe_timestamp(entry: &Value) -> Option<DateTime<Utc>> {
    for field in TIMESTAMP_FIELDS {
        let v = if field.contains('/') {
            entry.pointer(&format!("/{field}"))
        } else {
            entry.get(field)
        };
        if let Some(ts) = v.and_then(parse_timestamp) {
            return Some(ts);
        }
    }
    None
}

fn probe_total_count(raw: &Value) -> Option<u64> {
    for field in COUNT_FIELDS {
        if let Some(n) = raw
            .pointer(&format!("/data/{field}"))
            .or_else(|| raw.get(field))
            .and_then(|v| v.as_u64())
        {
            return Some(n);
        }
    }
    None
}

/// Raw payload → seznam zápasů seřazený od nejnovějšího.
///
/// Řadí se podle nejbohatšího dostupného klíče: parsovaný timestamp.
/// Když žádný timestamp neparsuje, zůstává původní pořadí pole
/// (provider posílá nejnovější první).
pub fn normalize_history(raw: &Value) -> MatchHistory {
    let entries = raw
        .pointer("/data/matches")
        .or_else(|| raw.get("matches"))
        .and_then(|v| v.as_array())
        .or_else(|| raw.as_array());

    let mut matches: Vec<MatchRecord> = entries
        .map(|list| {
            list.iter()
                .filter_map(|entry| {
                    let id = probe_id(entry)?;
                    Some(MatchRecord {
                        id,
                        played_at: probe_timestamp(entry),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    // stabilní sort: záznamy bez timestampu klesají na konec, jejich
    // vzájemné pořadí se zachovává
    if matches.iter().any(|m| m.played_at.is_some()) {
        matches.sort_by(|a, b| b.played_at.cmp(&a.played_at));
    }

    MatchHistory {
        matches,
        total_count: probe_total_count(raw),
    }
}

/// Kurzor z čerstvě pozorované historie — "to co jsme právě viděli".
pub fn cursor_from(history: &MatchHistory) -> Option<MatchCursor> {
    let latest = history.matches.first();
    if latest.is_none() && history.total_count.is_none() {
        return None;
    }
    Some(MatchCursor {
        last_match_id:    latest.map(|m| m.id.clone()),
        last_match_at:    latest.and_then(|m| m.played_at),
        last_match_count: history.total_count,
    })
}

/// Kolik nových zápasů proběhlo od posledního kurzoru, v pořadí podle
/// síly signálu:
///
/// 1. identita — předchozí id nalezeno na indexu i → i novějších zápasů
/// 2. timestamp — počet zápasů striktně novějších než poslední známý čas
/// 3. počet — nárůst celkového match countu
/// 4. poslední id se liší → přesně 1 (best-effort fallback pro providery,
///    co ořezávají hloubku historie a neposílají timestampy; víc
///    souběžných zápasů tudy podpočítáme)
pub fn count_new_matches(cursor: &MatchCursor, history: &MatchHistory) -> u32 {
    let matches = &history.matches;

    if let Some(prev_id) = &cursor.last_match_id {
        if let Some(i) = matches.iter().position(|m| &m.id == prev_id) {
            return i as u32;
        }
    }

    if let Some(prev_at) = cursor.last_match_at {
        if matches.iter().any(|m| m.played_at.is_some()) {
            return matches
                .iter()
                .filter(|m| m.played_at.map_or(false, |t| t > prev_at))
                .count() as u32;
        }
    }

    if let (Some(prev), Some(current)) = (cursor.last_match_count, history.total_count) {
        if current > prev {
            return (current - prev) as u32;
        }
    }

    match (&cursor.last_match_id, matches.first()) {
        (Some(prev_id), Some(latest)) if &latest.id != prev_id => 1,
        _ => 0,
    }
}
