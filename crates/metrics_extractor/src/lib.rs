//! rl-session-tracker — Metrics Extractor
//!
//! Čistá transformace (raw payload, game mode) → DerivedMetrics.
//! Provider formát nekontrolujeme, takže zkoušíme ordered list shape
//! parserů: segmentovaný tvar → legacy tvar → all-null záznam.
//!
//! Null znamená vždy "z payloadu nepozorovatelné", nikdy nulu.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

// ── Game mode ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    #[serde(rename = "1v1")]
    Duel,
    #[serde(rename = "2v2")]
    Doubles,
    #[serde(rename = "3v3")]
    Standard,
    #[serde(rename = "4v4")]
    Chaos,
}

impl GameMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1v1" => Some(Self::Duel),
            "2v2" => Some(Self::Doubles),
            "3v3" => Some(Self::Standard),
            "4v4" => Some(Self::Chaos),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duel => "1v1",
            Self::Doubles => "2v2",
            Self::Standard => "3v3",
            Self::Chaos => "4v4",
        }
    }

    /// Playlist segment odpovídající módu v provider payloadu
    pub fn playlist_name(&self) -> &'static str {
        match self {
            Self::Duel => "Ranked Duel 1v1",
            Self::Doubles => "Ranked Doubles 2v2",
            Self::Standard => "Ranked Standard 3v3",
            Self::Chaos => "Chaos 4v4",
        }
    }

    /// 4v4 provider nerankuje — business rule, žebříčkové fieldy se pro
    /// tento mód nulují bez ohledu na obsah payloadu.
    pub fn is_ranked(&self) -> bool {
        !matches!(self, Self::Chaos)
    }
}

/// Allow-list playlistů držených v breakdownu — všechno ostatní zahazujeme,
/// ať payload neroste.
pub const ALLOWED_PLAYLISTS: [&str; 4] = [
    "Ranked Duel 1v1",
    "Ranked Doubles 2v2",
    "Ranked Standard 3v3",
    "Chaos 4v4",
];

// ── Derived metrics ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistMetrics {
    pub rating:         Option<f64>,
    pub tier_index:     Option<i64>,
    pub division_index: Option<i64>,
    pub matches_played: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistAverages {
    pub goals:   Option<f64>,
    pub assists: Option<f64>,
    pub saves:   Option<f64>,
    pub shots:   Option<f64>,
}

/// Kanonický metrics záznam — všechna pole nezávisle nullable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    // counters
    pub wins:           Option<f64>,
    pub losses:         Option<f64>,
    /// true = losses dopočítáno jako matches_played - wins (nižší confidence
    /// než hodnota reportovaná providerem)
    #[serde(default)]
    pub losses_computed: bool,
    pub matches_played: Option<f64>,
    pub goals:          Option<f64>,
    pub assists:        Option<f64>,
    pub saves:          Option<f64>,
    pub shots:          Option<f64>,

    // ratios
    pub win_rate:        Option<f64>,
    pub goal_shot_ratio: Option<f64>,

    // ranked ladder
    pub rating:         Option<f64>,
    pub rank_label:     Option<String>,
    pub tier_index:     Option<i64>,
    pub division_index: Option<i64>,
    /// tier_index * 10 + division_index
    pub ladder_points:  Option<i64>,

    // references
    pub avatar_url: Option<String>,
    pub icon_url:   Option<String>,

    // per-playlist breakdown (jen allow-listed playlisty)
    pub playlists: BTreeMap<String, PlaylistMetrics>,
    pub averages:  BTreeMap<String, PlaylistAverages>,
}

// ── Value probing helpers ────────────────────────────────────────────────────

/// Číslo přímo, nebo jako string ("1234" i "1,234")
fn numeric(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    v.as_str()?.trim().replace(',', "").parse().ok()
}

/// Stat obal segmentovaného tvaru: { "value": 10, "displayValue": "10" }
fn stat_value(stats: &Value, key: &str) -> Option<f64> {
    let stat = stats.get(key)?;
    stat.get("value")
        .and_then(numeric)
        .or_else(|| stat.get("displayValue").and_then(numeric))
}

/// Trimnutý neprázdný string, jinak absent
fn clean_string(v: &Value) -> Option<String> {
    let s = v.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn ladder_points(tier: Option<i64>, division: Option<i64>) -> Option<i64> {
    match (tier, division) {
        (Some(t), Some(d)) => Some(t * 10 + d),
        _ => None,
    }
}

// ── Segmented shape ──────────────────────────────────────────────────────────

fn find_segment<'a>(segments: &'a [Value], seg_type: &str, name: Option<&str>) -> Option<&'a Value> {
    segments.iter().find(|seg| {
        let type_ok = seg.get("type").and_then(|t| t.as_str()) == Some(seg_type);
        let name_ok = match name {
            Some(wanted) => seg.pointer("/metadata/name").and_then(|n| n.as_str()) == Some(wanted),
            None => true,
        };
        type_ok && name_ok
    })
}

/// Stat z mode playlistu, fallback na overview segment
fn segment_stat(mode_seg: Option<&Value>, overview: Option<&Value>, key: &str) -> Option<f64> {
    mode_seg
        .and_then(|seg| seg.get("stats"))
        .and_then(|stats| stat_value(stats, key))
        .or_else(|| {
            overview
                .and_then(|seg| seg.get("stats"))
                .and_then(|stats| stat_value(stats, key))
        })
}

fn parse_segmented(raw: &Value, mode: GameMode) -> Option<DerivedMetrics> {
    let segments = raw
        .pointer("/data/segments")
        .or_else(|| raw.get("segments"))?
        .as_array()?;
    if segments.is_empty() {
        return None;
    }

    let overview = find_segment(segments, "overview", None);
    let mode_seg = find_segment(segments, "playlist", Some(mode.playlist_name()));

    let mut m = DerivedMetrics {
        wins:           segment_stat(mode_seg, overview, "wins"),
        losses:         segment_stat(mode_seg, overview, "losses"),
        matches_played: segment_stat(mode_seg, overview, "matchesPlayed"),
        ..Default::default()
    };

    // Counting staty drží provider jen v overview
    if let Some(stats) = overview.and_then(|seg| seg.get("stats")) {
        m.goals = stat_value(stats, "goals");
        m.assists = stat_value(stats, "assists");
        m.saves = stat_value(stats, "saves");
        m.shots = stat_value(stats, "shots");
    }

    if let Some(stats) = mode_seg.and_then(|seg| seg.get("stats")) {
        m.rating = stat_value(stats, "rating");
        m.tier_index = stat_value(stats, "tier").map(|t| t as i64);
        m.division_index = stat_value(stats, "division").map(|d| d as i64);
        m.rank_label = stats
            .pointer("/tier/metadata/name")
            .and_then(clean_string);
        m.icon_url = stats
            .pointer("/tier/metadata/iconUrl")
            .and_then(clean_string);
    }

    m.avatar_url = raw
        .pointer("/data/platformInfo/avatarUrl")
        .and_then(clean_string);

    // Per-playlist breakdown + averages, jen allow-listed jména
    for seg in segments {
        let seg_type = seg.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let name = match seg.pointer("/metadata/name").and_then(|n| n.as_str()) {
            Some(n) if ALLOWED_PLAYLISTS.contains(&n) => n.to_string(),
            _ => continue,
        };
        let stats = match seg.get("stats") {
            Some(s) => s,
            None => continue,
        };

        match seg_type {
            "playlist" => {
                m.playlists.insert(
                    name,
                    PlaylistMetrics {
                        rating:         stat_value(stats, "rating"),
                        tier_index:     stat_value(stats, "tier").map(|t| t as i64),
                        division_index: stat_value(stats, "division").map(|d| d as i64),
                        matches_played: stat_value(stats, "matchesPlayed"),
                    },
                );
            }
            "playlist-average" => {
                m.averages.insert(
                    name,
                    PlaylistAverages {
                        goals:   stat_value(stats, "goals"),
                        assists: stat_value(stats, "assists"),
                        saves:   stat_value(stats, "saves"),
                        shots:   stat_value(stats, "shots"),
                    },
                );
            }
            _ => {}
        }
    }

    Some(m)
}

// ── Legacy shape ─────────────────────────────────────────────────────────────

fn parse_legacy(raw: &Value, mode: GameMode) -> Option<DerivedMetrics> {
    let overview = raw
        .pointer("/stats/overview")
        .or_else(|| raw.get("overview"))?;
    if !overview.is_object() {
        return None;
    }

    let field = |key: &str| overview.get(key).and_then(numeric);

    let mut m = DerivedMetrics {
        wins:           field("wins"),
        losses:         field("losses"),
        matches_played: field("matchesPlayed"),
        goals:          field("goals"),
        assists:        field("assists"),
        saves:          field("saves"),
        shots:          field("shots"),
        ..Default::default()
    };

    // Žebříček: mapa keyed podle jména playlistu
    if let Some(ranks) = raw.get("ranks").and_then(|r| r.as_object()) {
        for (playlist, rank) in ranks {
            if !ALLOWED_PLAYLISTS.contains(&playlist.as_str()) {
                continue;
            }
            m.playlists.insert(
                playlist.clone(),
                PlaylistMetrics {
                    rating:         rank.get("rating").and_then(numeric),
                    tier_index:     rank.get("tier").and_then(numeric).map(|t| t as i64),
                    division_index: rank.get("division").and_then(numeric).map(|d| d as i64),
                    matches_played: rank.get("matchesPlayed").and_then(numeric),
                },
            );
        }
        if let Some(rank) = ranks.get(mode.playlist_name()) {
            m.rating = rank.get("rating").and_then(numeric);
            m.tier_index = rank.get("tier").and_then(numeric).map(|t| t as i64);
            m.division_index = rank.get("division").and_then(numeric).map(|d| d as i64);
            m.rank_label = rank.get("tierName").and_then(clean_string);
            m.icon_url = rank.get("iconUrl").and_then(clean_string);
        }
    }

    m.avatar_url = raw.get("avatar").and_then(clean_string);

    Some(m)
}

// ── Finalize rules ───────────────────────────────────────────────────────────

fn finalize(m: &mut DerivedMetrics, mode: GameMode) {
    // Losses fallback: matches_played - wins, nikdy záporně
    if m.losses.is_none() {
        if let (Some(wins), Some(played)) = (m.wins, m.matches_played) {
            let diff = played - wins;
            if diff >= 0.0 {
                m.losses = Some(diff);
                m.losses_computed = true;
            }
        }
    }

    // Win rate — nikdy nedělit nulou
    m.win_rate = match (m.wins, m.losses) {
        (Some(w), Some(l)) if w + l > 0.0 => Some(w / (w + l)),
        _ => match (m.wins, m.matches_played) {
            (Some(w), Some(p)) if p > 0.0 => Some(w / p),
            _ => None,
        },
    };

    m.goal_shot_ratio = match (m.goals, m.shots) {
        (Some(g), Some(s)) if s > 0.0 => Some(g / s),
        _ => None,
    };

    m.ladder_points = ladder_points(m.tier_index, m.division_index);

    // Nerankovaný mód: žebříčkové fieldy pryč, ať payload tvrdí cokoliv
    if !mode.is_ranked() {
        m.rating = None;
        m.rank_label = None;
        m.tier_index = None;
        m.division_index = None;
        m.ladder_points = None;
        m.icon_url = None;
    }
}

/// Hlavní vstup: raw provider payload + mód → kanonický záznam.
/// Neznámý tvar není chyba — vrací se all-null záznam.
pub fn extract_metrics(raw: &Value, mode: GameMode) -> DerivedMetrics {
    let mut metrics = parse_segmented(raw, mode)
        .or_else(|| parse_legacy(raw, mode))
        .unwrap_or_else(|| {
            debug!("payload shape not recognized, returning all-null metrics");
            DerivedMetrics::default()
        });
    finalize(&mut metrics, mode);
    metrics
}
