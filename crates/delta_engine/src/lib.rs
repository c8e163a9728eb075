//! rl-session-tracker — Delta Engine
//!
//! Čistá aritmetika nad snapshot sériemi: baseline-vs-latest delty,
//! session win rate, týmové agregáty, trend okna a rekordy. Žádné IO,
//! žádný sdílený stav — všechno jsou pure funkce nad DerivedMetrics.
//!
//! Null disciplína: None znamená "z payloadu nepozorovatelné", nikdy
//! nula. Delta přes chybějící hodnotu je None, průměr se počítá jen
//! z přítomných hodnot.

use metrics_extractor::DerivedMetrics;
use serde::Serialize;

// ── Deltas ───────────────────────────────────────────────────────────────────

/// Rozdíl dvou snapshotů po polích. Pole je None, když baseline nebo
/// latest hodnota chybí.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsDelta {
    pub wins:           Option<f64>,
    pub losses:         Option<f64>,
    pub matches_played: Option<f64>,
    pub goals:          Option<f64>,
    pub assists:        Option<f64>,
    pub saves:          Option<f64>,
    pub shots:          Option<f64>,
    pub rating:         Option<f64>,
    pub ladder_points:  Option<i64>,
}

fn sub(latest: Option<f64>, baseline: Option<f64>) -> Option<f64> {
    Some(latest? - baseline?)
}

pub fn metrics_delta(baseline: &DerivedMetrics, latest: &DerivedMetrics) -> MetricsDelta {
    MetricsDelta {
        wins:           sub(latest.wins, baseline.wins),
        losses:         sub(latest.losses, baseline.losses),
        matches_played: sub(latest.matches_played, baseline.matches_played),
        goals:          sub(latest.goals, baseline.goals),
        assists:        sub(latest.assists, baseline.assists),
        saves:          sub(latest.saves, baseline.saves),
        shots:          sub(latest.shots, baseline.shots),
        rating:         sub(latest.rating, baseline.rating),
        ladder_points:  match (latest.ladder_points, baseline.ladder_points) {
            (Some(l), Some(b)) => Some(l - b),
            _ => None,
        },
    }
}

/// Win rate za sessionu z delt: winsΔ / (winsΔ + lossesΔ) když je součet
/// kladný, jinak winsΔ / matchesΔ když je jmenovatel kladný, jinak None.
pub fn session_win_rate(delta: &MetricsDelta) -> Option<f64> {
    if let (Some(w), Some(l)) = (delta.wins, delta.losses) {
        if w + l > 0.0 {
            return Some(w / (w + l));
        }
    }
    match (delta.wins, delta.matches_played) {
        (Some(w), Some(m)) if m > 0.0 => Some(w / m),
        _ => None,
    }
}

// ── Team aggregate ───────────────────────────────────────────────────────────

fn sum_known(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

fn max_known(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| {
        Some(match acc {
            Some(m) if m >= v => m,
            _ => v,
        })
    })
}

/// Týmový agregát z per-player delt. Counting staty (góly, asistence,
/// zákroky, střely) se sčítají; wins/losses/matches jsou sdílené výsledky
/// zápasů — bere se maximum, nejúplnější pozorování vyhrává nad hráči
/// s mezerami ve fetchích.
pub fn team_delta(players: &[MetricsDelta]) -> MetricsDelta {
    MetricsDelta {
        wins:           max_known(players.iter().map(|d| d.wins)),
        losses:         max_known(players.iter().map(|d| d.losses)),
        matches_played: max_known(players.iter().map(|d| d.matches_played)),
        goals:          sum_known(players.iter().map(|d| d.goals)),
        assists:        sum_known(players.iter().map(|d| d.assists)),
        saves:          sum_known(players.iter().map(|d| d.saves)),
        shots:          sum_known(players.iter().map(|d| d.shots)),
        rating:         None,
        ladder_points:  None,
    }
}

// ── Metric accessors ─────────────────────────────────────────────────────────

/// Metriky sledované v trend oknech a rekordech
pub const TRACKED_METRICS: [&str; 9] = [
    "wins",
    "losses",
    "matches_played",
    "goals",
    "assists",
    "saves",
    "shots",
    "win_rate",
    "rating",
];

fn metric_value(metrics: &DerivedMetrics, name: &str) -> Option<f64> {
    match name {
        "wins" => metrics.wins,
        "losses" => metrics.losses,
        "matches_played" => metrics.matches_played,
        "goals" => metrics.goals,
        "assists" => metrics.assists,
        "saves" => metrics.saves,
        "shots" => metrics.shots,
        "win_rate" => metrics.win_rate,
        "rating" => metrics.rating,
        _ => None,
    }
}

// ── Trend windows ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowAverages {
    pub wins:           Option<f64>,
    pub losses:         Option<f64>,
    pub matches_played: Option<f64>,
    pub goals:          Option<f64>,
    pub assists:        Option<f64>,
    pub saves:          Option<f64>,
    pub shots:          Option<f64>,
    pub win_rate:       Option<f64>,
    pub rating:         Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendWindows {
    /// Starší polovina série
    pub early: WindowAverages,
    /// Novější polovina série
    pub late:  WindowAverages,
}

fn average_of(window: &[&DerivedMetrics], name: &str) -> Option<f64> {
    let known: Vec<f64> = window
        .iter()
        .filter_map(|m| metric_value(m, name))
        .collect();
    if known.is_empty() {
        return None;
    }
    Some(known.iter().sum::<f64>() / known.len() as f64)
}

fn window_averages(window: &[&DerivedMetrics]) -> WindowAverages {
    WindowAverages {
        wins:           average_of(window, "wins"),
        losses:         average_of(window, "losses"),
        matches_played: average_of(window, "matches_played"),
        goals:          average_of(window, "goals"),
        assists:        average_of(window, "assists"),
        saves:          average_of(window, "saves"),
        shots:          average_of(window, "shots"),
        win_rate:       average_of(window, "win_rate"),
        rating:         average_of(window, "rating"),
    }
}

/// Rozdělí časově seřazenou sérii v půlce (první polovina = starší) a
/// zprůměruje obě poloviny nezávisle per metrika. Prázdná polovina dává
/// None, ne nulu; chybějící hodnoty do průměru nevstupují.
pub fn trend_windows(series: &[&DerivedMetrics]) -> TrendWindows {
    let mid = series.len() / 2;
    TrendWindows {
        early: window_averages(&series[..mid]),
        late:  window_averages(&series[mid..]),
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordKind {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordEvent {
    pub metric: &'static str,
    pub kind:   RecordKind,
    pub value:  f64,
}

/// Nové high/low rekordy proti celé historii týmu. Rekord jen při
/// striktním překonání všech dřívějších hodnot; prázdná historie žádný
/// rekord nezakládá (první pozorování není výkon).
pub fn detect_records(prior: &[&DerivedMetrics], latest: &DerivedMetrics) -> Vec<RecordEvent> {
    let mut events = Vec::new();
    for metric in TRACKED_METRICS {
        let value = match metric_value(latest, metric) {
            Some(v) => v,
            None => continue,
        };
        let history: Vec<f64> = prior
            .iter()
            .filter_map(|m| metric_value(m, metric))
            .collect();
        if history.is_empty() {
            continue;
        }
        if history.iter().all(|&h| value > h) {
            events.push(RecordEvent { metric, kind: RecordKind::High, value });
        } else if history.iter().all(|&h| value < h) {
            events.push(RecordEvent { metric, kind: RecordKind::Low, value });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(wins: Option<f64>, losses: Option<f64>) -> DerivedMetrics {
        DerivedMetrics {
            wins,
            losses,
            ..Default::default()
        }
    }

    // ── delta ──

    #[test]
    fn delta_and_session_win_rate_from_counters() {
        let baseline = metrics(Some(5.0), Some(2.0));
        let latest = metrics(Some(8.0), Some(3.0));

        let delta = metrics_delta(&baseline, &latest);
        assert_eq!(delta.wins, Some(3.0));
        assert_eq!(delta.losses, Some(1.0));
        assert_eq!(session_win_rate(&delta), Some(0.75));
    }

    #[test]
    fn delta_over_missing_value_is_null() {
        let baseline = metrics(Some(5.0), None);
        let latest = metrics(Some(8.0), Some(3.0));

        let delta = metrics_delta(&baseline, &latest);
        assert_eq!(delta.wins, Some(3.0));
        assert_eq!(delta.losses, None);
    }

    #[test]
    fn win_rate_falls_back_to_matches_played() {
        let delta = MetricsDelta {
            wins:           Some(3.0),
            matches_played: Some(4.0),
            ..Default::default()
        };
        assert_eq!(session_win_rate(&delta), Some(0.75));
    }

    #[test]
    fn win_rate_with_zero_activity_is_null() {
        let delta = MetricsDelta {
            wins:           Some(0.0),
            losses:         Some(0.0),
            matches_played: Some(0.0),
            ..Default::default()
        };
        assert_eq!(session_win_rate(&delta), None);
    }

    // ── team aggregate ──

    #[test]
    fn team_takes_max_of_shared_stats_and_sum_of_counting_stats() {
        let a = MetricsDelta {
            matches_played: Some(4.0),
            goals:          Some(7.0),
            saves:          Some(2.0),
            ..Default::default()
        };
        // spoluhráč fetchnutý o chvíli později — o zápas napřed
        let b = MetricsDelta {
            matches_played: Some(6.0),
            goals:          Some(3.0),
            ..Default::default()
        };

        let team = team_delta(&[a, b]);
        assert_eq!(team.matches_played, Some(6.0));
        assert_eq!(team.goals, Some(10.0));
        assert_eq!(team.saves, Some(2.0));
        assert_eq!(team.shots, None);
    }

    #[test]
    fn team_of_all_unknowns_stays_unknown() {
        let team = team_delta(&[MetricsDelta::default(), MetricsDelta::default()]);
        assert_eq!(team, MetricsDelta::default());
    }

    // ── trend windows ──

    #[test]
    fn midpoint_split_averages_each_half() {
        let series = [
            metrics(Some(1.0), None),
            metrics(Some(3.0), None),
            metrics(Some(5.0), None),
            metrics(Some(9.0), None),
        ];
        let refs: Vec<&DerivedMetrics> = series.iter().collect();

        let trend = trend_windows(&refs);
        assert_eq!(trend.early.wins, Some(2.0));
        assert_eq!(trend.late.wins, Some(7.0));
        assert_eq!(trend.early.goals, None);
    }

    #[test]
    fn single_entry_series_has_empty_early_half() {
        let only = metrics(Some(4.0), Some(1.0));
        let trend = trend_windows(&[&only]);
        assert_eq!(trend.early, WindowAverages::default());
        assert_eq!(trend.late.wins, Some(4.0));
    }

    #[test]
    fn missing_values_do_not_drag_the_average() {
        let series = [metrics(Some(2.0), None), metrics(None, None), metrics(Some(4.0), None)];
        let refs: Vec<&DerivedMetrics> = series.iter().collect();

        // late half = poslední dva, jen jedna známá hodnota
        let trend = trend_windows(&refs);
        assert_eq!(trend.late.wins, Some(4.0));
    }

    // ── records ──

    #[test]
    fn strict_high_and_low_against_all_prior_values() {
        let history = [metrics(Some(3.0), Some(5.0)), metrics(Some(6.0), Some(2.0))];
        let refs: Vec<&DerivedMetrics> = history.iter().collect();

        let latest = metrics(Some(7.0), Some(1.0));
        let events = detect_records(&refs, &latest);

        assert!(events.contains(&RecordEvent { metric: "wins", kind: RecordKind::High, value: 7.0 }));
        assert!(events.contains(&RecordEvent { metric: "losses", kind: RecordKind::Low, value: 1.0 }));
    }

    #[test]
    fn tying_a_prior_value_is_not_a_record() {
        let history = [metrics(Some(6.0), None)];
        let refs: Vec<&DerivedMetrics> = history.iter().collect();
        let events = detect_records(&refs, &metrics(Some(6.0), None));
        assert!(events.is_empty());
    }

    #[test]
    fn empty_history_establishes_no_record() {
        let events = detect_records(&[], &metrics(Some(10.0), Some(0.0)));
        assert!(events.is_empty());
    }
}
