/// rl-session-tracker — Session Observer
///
/// Co dělá:
///   1. Založí session pro nakonfigurované hráče a zachytí baseline snapshoty
///   2. Polluje match history, detekuje nové zápasy, posouvá match index
///   3. Po každém detekovaném zápase zachytí snapshot všech hráčů do SQLite
///   4. Na Ctrl-C sessionu ukončí a vypíše session report (delty, win rate,
///      týmový agregát)
///
/// Spuštění:
///   cargo run --bin session-observer

mod provider;
mod snapshot_db;

use anyhow::{bail, Context, Result};
use delta_engine::{metrics_delta, session_win_rate, team_delta, MetricsDelta};
use dotenv::dotenv;
use logger::{EventLogger, PollingLog};
use metrics_extractor::GameMode;
use provider::TrnClient;
use rate_guard::CooldownTracker;
use session_poller::{Player, SessionConfig, SessionTracker, SnapshotStore, StatsProvider};
use snapshot_db::SqliteSnapshotStore;
use std::env;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

struct ObserverConfig {
    base_url:      String,
    api_key:       Option<String>,
    poll_interval: Duration,
    game_mode:     GameMode,
    db_path:       String,
    players:       Vec<Player>,
}

fn load_config() -> Result<ObserverConfig> {
    let base_url = env::var("PROVIDER_BASE_URL")
        .unwrap_or_else(|_| "https://public-api.tracker.gg/v2/rocket-league".to_string());
    let api_key = env::var("PROVIDER_API_KEY").ok();

    let poll_interval_secs = env::var("POLL_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30);
    if poll_interval_secs == 0 {
        bail!("POLL_INTERVAL_SECS must be positive");
    }

    let mode_raw = env::var("GAME_MODE").unwrap_or_else(|_| "3v3".to_string());
    let game_mode = GameMode::parse(&mode_raw)
        .with_context(|| format!("unknown GAME_MODE '{mode_raw}' (expected 1v1/2v2/3v3/4v4)"))?;

    let db_path = env::var("SNAPSHOT_DB_PATH").unwrap_or_else(|_| "data/snapshots.db".to_string());

    // TRACKED_PLAYERS=steam:Handle1,epic:Handle2
    let players_raw = env::var("TRACKED_PLAYERS").unwrap_or_default();
    let players: Vec<Player> = players_raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (platform, handle) = entry
                .split_once(':')
                .with_context(|| format!("TRACKED_PLAYERS entry '{entry}' is not platform:handle"))?;
            Ok(Player::new(handle.trim(), platform.trim(), handle.trim()))
        })
        .collect::<Result<_>>()?;
    if players.is_empty() {
        bail!("TRACKED_PLAYERS is empty — nothing to observe");
    }

    Ok(ObserverConfig {
        base_url,
        api_key,
        poll_interval: Duration::from_secs(poll_interval_secs),
        game_mode,
        db_path,
        players,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("=== RL Session Tracker — SESSION OBSERVER ===");
    info!("Logs: ./logs/");

    // Single instance lock
    let lock_file_path = env::temp_dir().join("rl_session_tracker.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another instance of session-observer is already running! Exiting.");
            return Ok(());
        }
    };

    let config = load_config()?;
    info!(
        "Mode {} | poll interval {}s | {} players",
        config.game_mode.as_str(),
        config.poll_interval.as_secs(),
        config.players.len()
    );
    if config.api_key.is_none() {
        warn!("PROVIDER_API_KEY not set — first provider call will fail hard");
    }

    let cooldown = Arc::new(CooldownTracker::new());
    let store = Arc::new(SqliteSnapshotStore::open(&config.db_path));
    let client = Arc::new(TrnClient::new(
        &config.base_url,
        config.api_key.clone(),
        Arc::clone(&cooldown),
    )?);

    let tracker = SessionTracker::new(
        client as Arc<dyn StatsProvider>,
        Arc::clone(&store) as Arc<dyn SnapshotStore>,
        Arc::clone(&cooldown),
        Arc::new(PollingLog::new()),
        Arc::new(EventLogger::new("logs")),
    );

    let session_id = format!("session-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S"));
    let player_ids: Vec<String> = config.players.iter().map(|p| p.id.clone()).collect();

    tracker
        .start_session(SessionConfig {
            id:            session_id.clone(),
            game_mode:     config.game_mode,
            poll_interval: config.poll_interval,
            players:       config.players,
        })
        .await?;
    info!("Session {session_id} running. Ctrl-C ends the session.");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("Ctrl-C received, ending session {session_id}");
    tracker.end_session(&session_id).await?;

    print_session_report(&*store, &player_ids).await;
    Ok(())
}

/// Závěrečný report: per-player delta baseline → latest + týmový agregát.
async fn print_session_report(store: &SqliteSnapshotStore, player_ids: &[String]) {
    let mut player_deltas: Vec<MetricsDelta> = Vec::new();

    info!("=== Session report ===");
    for player_id in player_ids {
        let baseline = store.baseline_snapshot(player_id).await;
        let latest = store.latest_snapshot(player_id).await;
        let (baseline, latest) = match (baseline, latest) {
            (Ok(Some(b)), Ok(Some(l))) => (b, l),
            _ => {
                warn!("{player_id}: no snapshots captured, skipping report");
                continue;
            }
        };

        let delta = metrics_delta(&baseline.derived, &latest.derived);
        info!(
            "{player_id}: winsΔ {:?} | lossesΔ {:?} | goalsΔ {:?} | session win rate {:?}",
            delta.wins,
            delta.losses,
            delta.goals,
            session_win_rate(&delta)
        );
        player_deltas.push(delta);
    }

    if player_deltas.len() > 1 {
        let team = team_delta(&player_deltas);
        info!(
            "team: matchesΔ {:?} | goalsΔ {:?} | savesΔ {:?} | win rate {:?}",
            team.matches_played,
            team.goals,
            team.saves,
            session_win_rate(&team)
        );
    }
}
