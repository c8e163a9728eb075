/// SQLite snapshot store za dedikovaným writer threadem.
///
/// rusqlite Connection není Send+Sync přes await pointy — všechno IO
/// běží na jednom std threadu krmeném mpsc kanálem, async strana čeká
/// na oneshot odpověď. Čtení i zápisy tak sdílí jedno pořadí.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use session_poller::{MatchCursor, Snapshot, SnapshotStore};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
enum StoreMsg {
    Insert {
        snapshot: Snapshot,
        reply:    oneshot::Sender<Result<()>>,
    },
    Baseline {
        player_id: String,
        reply:     oneshot::Sender<Result<Option<Snapshot>>>,
    },
    Latest {
        player_id: String,
        reply:     oneshot::Sender<Result<Option<Snapshot>>>,
    },
    Recent {
        session_id: String,
        limit:      usize,
        reply:      oneshot::Sender<Result<Vec<Snapshot>>>,
    },
    UpdateCursor {
        player_id: String,
        cursor:    MatchCursor,
        reply:     oneshot::Sender<Result<()>>,
    },
}

pub struct SqliteSnapshotStore {
    tx: mpsc::Sender<StoreMsg>,
}

impl SqliteSnapshotStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            tx: spawn_store_worker(path.into()),
        }
    }

    async fn roundtrip<T>(
        &self,
        msg: StoreMsg,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("snapshot store worker is gone"))?;
        rx.await.context("snapshot store dropped the reply")?
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn insert_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.roundtrip(StoreMsg::Insert { snapshot, reply }, rx).await
    }

    async fn baseline_snapshot(&self, player_id: &str) -> Result<Option<Snapshot>> {
        let (reply, rx) = oneshot::channel();
        let msg = StoreMsg::Baseline { player_id: player_id.to_string(), reply };
        self.roundtrip(msg, rx).await
    }

    async fn latest_snapshot(&self, player_id: &str) -> Result<Option<Snapshot>> {
        let (reply, rx) = oneshot::channel();
        let msg = StoreMsg::Latest { player_id: player_id.to_string(), reply };
        self.roundtrip(msg, rx).await
    }

    async fn recent_snapshots(&self, session_id: &str, limit: usize) -> Result<Vec<Snapshot>> {
        let (reply, rx) = oneshot::channel();
        let msg = StoreMsg::Recent { session_id: session_id.to_string(), limit, reply };
        self.roundtrip(msg, rx).await
    }

    async fn update_player_match_state(&self, player_id: &str, cursor: &MatchCursor) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let msg = StoreMsg::UpdateCursor {
            player_id: player_id.to_string(),
            cursor:    cursor.clone(),
            reply,
        };
        self.roundtrip(msg, rx).await
    }
}

fn spawn_store_worker(path: PathBuf) -> mpsc::Sender<StoreMsg> {
    let (tx, mut rx) = mpsc::channel::<StoreMsg>(1024);

    std::thread::spawn(move || {
        let result: Result<()> = (|| {
            let db_path = Path::new(&path);
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }

            let conn = Connection::open(db_path).context("open sqlite db")?;
            conn.pragma_update(None, "journal_mode", "WAL").ok();
            conn.pragma_update(None, "synchronous", "NORMAL").ok();

            init_schema(&conn)?;

            while let Some(msg) = rx.blocking_recv() {
                apply_msg(&conn, msg);
            }

            Ok(())
        })();

        if let Err(e) = result {
            eprintln!("[snapshot-db] fatal: {e}");
        }
    });

    tx
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            captured_at TEXT NOT NULL,
            match_index INTEGER NOT NULL,
            raw_payload TEXT NOT NULL,
            derived_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_snapshots_player ON snapshots(player_id, captured_at);
        CREATE INDEX IF NOT EXISTS idx_snapshots_session ON snapshots(session_id, captured_at);

        CREATE TABLE IF NOT EXISTS player_match_state (
            player_id TEXT PRIMARY KEY,
            last_match_id TEXT,
            last_match_at TEXT,
            last_match_count INTEGER,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .context("init schema")?;

    Ok(())
}

fn apply_msg(conn: &Connection, msg: StoreMsg) {
    // zahozený receiver (caller odešel) není chyba store worker loopu
    match msg {
        StoreMsg::Insert { snapshot, reply } => {
            let _ = reply.send(insert_snapshot(conn, &snapshot));
        }
        StoreMsg::Baseline { player_id, reply } => {
            let _ = reply.send(select_one(
                conn,
                "SELECT session_id, player_id, captured_at, match_index, raw_payload, derived_json
                 FROM snapshots WHERE player_id = ?1 AND match_index = 0
                 ORDER BY captured_at ASC LIMIT 1",
                &player_id,
            ));
        }
        StoreMsg::Latest { player_id, reply } => {
            let _ = reply.send(select_one(
                conn,
                "SELECT session_id, player_id, captured_at, match_index, raw_payload, derived_json
                 FROM snapshots WHERE player_id = ?1
                 ORDER BY captured_at DESC LIMIT 1",
                &player_id,
            ));
        }
        StoreMsg::Recent { session_id, limit, reply } => {
            let _ = reply.send(select_recent(conn, &session_id, limit));
        }
        StoreMsg::UpdateCursor { player_id, cursor, reply } => {
            let _ = reply.send(upsert_cursor(conn, &player_id, &cursor));
        }
    }
}

fn insert_snapshot(conn: &Connection, s: &Snapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO snapshots(session_id, player_id, captured_at, match_index, raw_payload, derived_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            s.session_id,
            s.player_id,
            s.captured_at.to_rfc3339(),
            s.match_index,
            serde_json::to_string(&s.raw_payload)?,
            serde_json::to_string(&s.derived)?,
        ],
    )
    .context("insert snapshot")?;
    Ok(())
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<(String, String, String, u32, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_snapshot(
    (session_id, player_id, captured_at, match_index, raw, derived): (String, String, String, u32, String, String),
) -> Result<Snapshot> {
    Ok(Snapshot {
        session_id,
        player_id,
        captured_at: DateTime::parse_from_rfc3339(&captured_at)
            .context("parse captured_at")?
            .with_timezone(&Utc),
        match_index,
        raw_payload: serde_json::from_str(&raw).context("parse raw_payload")?,
        derived: serde_json::from_str(&derived).context("parse derived_json")?,
    })
}

fn select_one(conn: &Connection, sql: &str, key: &str) -> Result<Option<Snapshot>> {
    let row = conn
        .query_row(sql, params![key], row_to_snapshot)
        .optional()
        .context("query snapshot")?;
    row.map(decode_snapshot).transpose()
}

fn select_recent(conn: &Connection, session_id: &str, limit: usize) -> Result<Vec<Snapshot>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, player_id, captured_at, match_index, raw_payload, derived_json
         FROM snapshots WHERE session_id = ?1
         ORDER BY captured_at DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![session_id, limit as i64], row_to_snapshot)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("query recent snapshots")?;

    // DESC + LIMIT bere posledních N, ven se vrací vzestupně podle času
    let mut snapshots = rows
        .into_iter()
        .map(decode_snapshot)
        .collect::<Result<Vec<_>>>()?;
    snapshots.reverse();
    Ok(snapshots)
}

fn upsert_cursor(conn: &Connection, player_id: &str, cursor: &MatchCursor) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO player_match_state(player_id, last_match_id, last_match_at, last_match_count, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(player_id) DO UPDATE SET
            last_match_id=excluded.last_match_id,
            last_match_at=excluded.last_match_at,
            last_match_count=excluded.last_match_count,
            updated_at=excluded.updated_at
        "#,
        params![
            player_id,
            cursor.last_match_id,
            cursor.last_match_at.map(|t| t.to_rfc3339()),
            cursor.last_match_count.map(|n| n as i64),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert player match state")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_extractor::DerivedMetrics;
    use serde_json::json;

    fn snapshot(player: &str, index: u32, wins: f64) -> Snapshot {
        Snapshot {
            session_id:  "s1".to_string(),
            player_id:   player.to_string(),
            captured_at: Utc::now() + chrono::Duration::milliseconds(index as i64),
            match_index: index,
            raw_payload: json!({ "wins": wins }),
            derived:     DerivedMetrics { wins: Some(wins), ..Default::default() },
        }
    }

    fn temp_store(name: &str) -> SqliteSnapshotStore {
        let path = std::env::temp_dir()
            .join("rl-session-tracker-tests")
            .join(format!("{name}-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        SqliteSnapshotStore::open(path)
    }

    #[tokio::test]
    async fn baseline_and_latest_roundtrip() {
        let store = temp_store("roundtrip");
        store.insert_snapshot(snapshot("p1", 0, 10.0)).await.unwrap();
        store.insert_snapshot(snapshot("p1", 1, 11.0)).await.unwrap();
        store.insert_snapshot(snapshot("p1", 2, 12.0)).await.unwrap();

        let baseline = store.baseline_snapshot("p1").await.unwrap().unwrap();
        assert_eq!(baseline.match_index, 0);
        assert_eq!(baseline.derived.wins, Some(10.0));

        let latest = store.latest_snapshot("p1").await.unwrap().unwrap();
        assert_eq!(latest.match_index, 2);
        assert_eq!(latest.raw_payload, json!({ "wins": 12.0 }));

        assert!(store.baseline_snapshot("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_returns_last_n_ascending() {
        let store = temp_store("recent");
        for i in 0..5 {
            store.insert_snapshot(snapshot("p1", i, i as f64)).await.unwrap();
        }

        let recent = store.recent_snapshots("s1", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].match_index, 2);
        assert_eq!(recent[2].match_index, 4);
    }

    #[tokio::test]
    async fn cursor_upsert_overwrites_previous_state() {
        let store = temp_store("cursor");
        let first = MatchCursor {
            last_match_id:    Some("m1".to_string()),
            last_match_at:    Some(Utc::now()),
            last_match_count: Some(10),
        };
        store.update_player_match_state("p1", &first).await.unwrap();

        let second = MatchCursor {
            last_match_id:    Some("m2".to_string()),
            last_match_at:    None,
            last_match_count: Some(11),
        };
        store.update_player_match_state("p1", &second).await.unwrap();
    }
}
