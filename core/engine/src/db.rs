//! SQLite persistence for the session ledger.
//!
//! Single-writer store: the producer thread flushes detection batches and
//! session counter updates; consumers only read. The schema stays small — a
//! sessions table with materialized counters and an append-only detection
//! log.

use std::path::PathBuf;

use lookout_protocol::{BoundingBox, DetectionKind, DetectionRecord};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{EngineError, Result};

pub struct Db {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub session_id: String,
    pub created_at: String,
    pub closed_at: Option<String>,
    pub detections: u64,
    pub tracks: u64,
    pub gifs: u64,
    pub size_bytes: u64,
    pub classes: Vec<String>,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| EngineError::io(format!("create {}", parent.display()), err))?;
        }
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL,
                    closed_at TEXT,
                    detections INTEGER NOT NULL DEFAULT 0,
                    tracks INTEGER NOT NULL DEFAULT 0,
                    gifs INTEGER NOT NULL DEFAULT 0,
                    size_bytes INTEGER NOT NULL DEFAULT 0,
                    classes TEXT NOT NULL DEFAULT '[]'
                );
                CREATE TABLE IF NOT EXISTS detections (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    track_id INTEGER NOT NULL,
                    class_name TEXT NOT NULL,
                    confidence REAL NOT NULL,
                    bbox TEXT NOT NULL,
                    frame_number INTEGER NOT NULL,
                    recorded_at TEXT NOT NULL,
                    kind TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_detections_session
                    ON detections(session_id, id);",
            )
            .map_err(|err| EngineError::Database(format!("init schema: {}", err)))?;
            Ok(())
        })
    }

    pub fn upsert_session(&self, row: &SessionRow) -> Result<()> {
        let classes = serde_json::to_string(&row.classes).map_err(|err| EngineError::Json {
            context: "serialize session classes".to_string(),
            source: err,
        })?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions \
                    (session_id, created_at, closed_at, detections, tracks, gifs, size_bytes, classes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(session_id) DO UPDATE SET \
                    closed_at = excluded.closed_at, \
                    detections = excluded.detections, \
                    tracks = excluded.tracks, \
                    gifs = excluded.gifs, \
                    size_bytes = excluded.size_bytes, \
                    classes = excluded.classes",
                params![
                    row.session_id,
                    row.created_at,
                    row.closed_at,
                    row.detections as i64,
                    row.tracks as i64,
                    row.gifs as i64,
                    row.size_bytes as i64,
                    classes
                ],
            )
            .map_err(|err| EngineError::Database(format!("upsert session: {}", err)))?;
            Ok(())
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT session_id, created_at, closed_at, detections, tracks, gifs, size_bytes, classes \
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                session_row,
            )
            .optional()
            .map_err(|err| EngineError::Database(format!("query session: {}", err)))
        })
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRow>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, created_at, closed_at, detections, tracks, gifs, size_bytes, classes \
                     FROM sessions ORDER BY created_at DESC, session_id DESC",
                )
                .map_err(|err| EngineError::Database(format!("prepare sessions query: {}", err)))?;

            let rows = stmt
                .query_map([], session_row)
                .map_err(|err| EngineError::Database(format!("read session rows: {}", err)))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions
                    .push(row.map_err(|err| EngineError::Database(format!("decode session row: {}", err)))?);
            }
            Ok(sessions)
        })
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])
                .map_err(|err| EngineError::Database(format!("delete session: {}", err)))?;
            conn.execute(
                "DELETE FROM detections WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(|err| EngineError::Database(format!("delete session detections: {}", err)))?;
            Ok(())
        })
    }

    /// Append a batch of detection-log entries in one transaction.
    pub fn insert_detections(&self, records: &[DetectionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.with_connection_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| EngineError::Database(format!("begin detections batch: {}", err)))?;
            for record in records {
                let bbox = serde_json::to_string(&record.bbox).map_err(|err| EngineError::Json {
                    context: "serialize detection bbox".to_string(),
                    source: err,
                })?;
                tx.execute(
                    "INSERT INTO detections \
                        (session_id, track_id, class_name, confidence, bbox, frame_number, recorded_at, kind) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        record.session_id,
                        record.track_id as i64,
                        record.class_name,
                        record.confidence as f64,
                        bbox,
                        record.frame_number as i64,
                        record.recorded_at,
                        kind_label(record.kind)
                    ],
                )
                .map_err(|err| EngineError::Database(format!("insert detection: {}", err)))?;
            }
            tx.commit()
                .map_err(|err| EngineError::Database(format!("commit detections batch: {}", err)))?;
            Ok(())
        })
    }

    /// The most recent `limit` detection entries for a session, in
    /// chronological order.
    pub fn list_detections(&self, session_id: &str, limit: usize) -> Result<Vec<DetectionRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, track_id, class_name, confidence, bbox, frame_number, recorded_at, kind \
                     FROM detections WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
                )
                .map_err(|err| EngineError::Database(format!("prepare detections query: {}", err)))?;

            let rows = stmt
                .query_map(params![session_id, limit as i64], detection_row)
                .map_err(|err| EngineError::Database(format!("read detection rows: {}", err)))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(
                    row.map_err(|err| EngineError::Database(format!("decode detection row: {}", err)))?,
                );
            }
            records.reverse();
            Ok(records)
        })
    }

    pub fn count_detections(&self, session_id: &str) -> Result<u64> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM detections WHERE session_id = ?1",
                params![session_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as u64)
            .map_err(|err| EngineError::Database(format!("count detections: {}", err)))
        })
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.open()?;
        f(&conn)
    }

    fn with_connection_mut<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        f(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .map_err(|err| EngineError::Database(format!("open {}: {}", self.path.display(), err)))
    }
}

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    let classes_raw: String = row.get(7)?;
    Ok(SessionRow {
        session_id: row.get(0)?,
        created_at: row.get(1)?,
        closed_at: row.get(2)?,
        detections: row.get::<_, i64>(3)? as u64,
        tracks: row.get::<_, i64>(4)? as u64,
        gifs: row.get::<_, i64>(5)? as u64,
        size_bytes: row.get::<_, i64>(6)? as u64,
        classes: serde_json::from_str(&classes_raw).unwrap_or_default(),
    })
}

fn detection_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DetectionRecord> {
    let bbox_raw: String = row.get(4)?;
    let kind_raw: String = row.get(7)?;
    Ok(DetectionRecord {
        session_id: row.get(0)?,
        track_id: row.get::<_, i64>(1)? as u64,
        class_name: row.get(2)?,
        confidence: row.get::<_, f64>(3)? as f32,
        bbox: serde_json::from_str(&bbox_raw).unwrap_or(BoundingBox {
            x: 0.0,
            y: 0.0,
            w: 0.0,
            h: 0.0,
        }),
        frame_number: row.get::<_, i64>(5)? as u64,
        recorded_at: row.get(6)?,
        kind: if kind_raw == "created" {
            DetectionKind::Created
        } else {
            DetectionKind::Updated
        },
    })
}

fn kind_label(kind: DetectionKind) -> &'static str {
    match kind {
        DetectionKind::Created => "created",
        DetectionKind::Updated => "updated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(dir.path().join("lookout.db")).expect("db init");
        (dir, db)
    }

    fn record(session_id: &str, track_id: u64, frame: u64) -> DetectionRecord {
        DetectionRecord {
            session_id: session_id.to_string(),
            track_id,
            class_name: "person".to_string(),
            confidence: 0.8,
            bbox: BoundingBox::new(10.0, 10.0, 50.0, 50.0),
            frame_number: frame,
            recorded_at: "2026-02-01T00:00:00Z".to_string(),
            kind: DetectionKind::Created,
        }
    }

    #[test]
    fn session_round_trip() {
        let (_dir, db) = temp_db();
        let row = SessionRow {
            session_id: "20260201_000000".to_string(),
            created_at: "2026-02-01T00:00:00Z".to_string(),
            closed_at: None,
            detections: 4,
            tracks: 2,
            gifs: 1,
            size_bytes: 1024,
            classes: vec!["car".to_string(), "person".to_string()],
        };
        db.upsert_session(&row).expect("upsert");
        let fetched = db
            .get_session("20260201_000000")
            .expect("query")
            .expect("exists");
        assert_eq!(fetched, row);
        assert!(db.get_session("nope").expect("query").is_none());
    }

    #[test]
    fn upsert_replaces_counters() {
        let (_dir, db) = temp_db();
        let mut row = SessionRow {
            session_id: "s1".to_string(),
            created_at: "2026-02-01T00:00:00Z".to_string(),
            closed_at: None,
            detections: 1,
            tracks: 1,
            gifs: 0,
            size_bytes: 0,
            classes: vec![],
        };
        db.upsert_session(&row).expect("insert");
        row.detections = 9;
        row.closed_at = Some("2026-02-01T01:00:00Z".to_string());
        db.upsert_session(&row).expect("update");
        let fetched = db.get_session("s1").expect("query").expect("exists");
        assert_eq!(fetched.detections, 9);
        assert!(fetched.closed_at.is_some());
    }

    #[test]
    fn sessions_list_newest_first() {
        let (_dir, db) = temp_db();
        for (id, created) in [
            ("s1", "2026-02-01T00:00:00Z"),
            ("s3", "2026-02-03T00:00:00Z"),
            ("s2", "2026-02-02T00:00:00Z"),
        ] {
            db.upsert_session(&SessionRow {
                session_id: id.to_string(),
                created_at: created.to_string(),
                closed_at: None,
                detections: 0,
                tracks: 0,
                gifs: 0,
                size_bytes: 0,
                classes: vec![],
            })
            .expect("insert");
        }
        let ids: Vec<String> = db
            .list_sessions()
            .expect("list")
            .into_iter()
            .map(|row| row.session_id)
            .collect();
        assert_eq!(ids, vec!["s3", "s2", "s1"]);
    }

    #[test]
    fn detection_batches_append_and_cap() {
        let (_dir, db) = temp_db();
        let batch: Vec<DetectionRecord> = (1..=10).map(|i| record("s1", i, i)).collect();
        db.insert_detections(&batch).expect("insert batch");
        db.insert_detections(&[record("other", 99, 1)])
            .expect("other session");

        assert_eq!(db.count_detections("s1").expect("count"), 10);

        let recent = db.list_detections("s1", 3).expect("list");
        let frames: Vec<u64> = recent.iter().map(|r| r.frame_number).collect();
        assert_eq!(frames, vec![8, 9, 10], "last N, chronological order");
    }

    #[test]
    fn delete_session_removes_rows_and_log() {
        let (_dir, db) = temp_db();
        db.upsert_session(&SessionRow {
            session_id: "s1".to_string(),
            created_at: "2026-02-01T00:00:00Z".to_string(),
            closed_at: None,
            detections: 1,
            tracks: 1,
            gifs: 0,
            size_bytes: 0,
            classes: vec![],
        })
        .expect("insert");
        db.insert_detections(&[record("s1", 1, 1)]).expect("insert");

        db.delete_session("s1").expect("delete");
        assert!(db.get_session("s1").expect("query").is_none());
        assert_eq!(db.count_detections("s1").expect("count"), 0);
    }
}
