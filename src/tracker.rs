use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::{DownloadStatus, TrackerRecord};
use crate::error::HarvestError;
use crate::report::{ErrorCount, TrackerReport};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS download_log (
    item_id INTEGER PRIMARY KEY,
    status TEXT NOT NULL
        CHECK(status IN ('pending', 'downloaded', 'failed', 'skipped'))
        DEFAULT 'pending',
    resolved_url TEXT,
    local_path TEXT,
    error_message TEXT,
    byte_size INTEGER,
    recorded_at TEXT NOT NULL
)
"#;

/// Durable per-item outcome log. Every write is committed before the call
/// returns; the connection lock serializes concurrent callers.
pub struct Tracker {
    path: Utf8PathBuf,
    conn: Mutex<Connection>,
}

impl Tracker {
    pub fn open(path: &Utf8Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Tracker(format!("{parent}: {err}")))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<(), HarvestError> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Ids already marked `downloaded`. A store that was never initialized
    /// reads as empty.
    pub fn list_completed_ids(&self) -> Result<HashSet<i64>, HarvestError> {
        let conn = self.lock()?;
        let mut stmt = match conn.prepare("SELECT item_id FROM download_log WHERE status = ?1") {
            Ok(stmt) => stmt,
            Err(err) if is_missing_table(&err) => {
                tracing::debug!(tracker = %self.path, "no download_log table yet");
                return Ok(HashSet::new());
            }
            Err(err) => return Err(err.into()),
        };
        let ids = stmt
            .query_map([DownloadStatus::Downloaded.as_str()], |row| row.get::<_, i64>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn upsert(&self, record: &TrackerRecord) -> Result<(), HarvestError> {
        let byte_size = record.byte_size.map(|size| size as i64);
        self.lock()?.execute(
            r#"
            INSERT OR REPLACE INTO download_log
                (item_id, status, resolved_url, local_path, error_message, byte_size, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.item_id,
                record.status.as_str(),
                record.resolved_url,
                record.local_path,
                record.error_message,
                byte_size,
                record.recorded_at,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, item_id: i64) -> Result<Option<TrackerRecord>, HarvestError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT item_id, status, resolved_url, local_path, error_message, byte_size, recorded_at
                FROM download_log
                WHERE item_id = ?1
                "#,
                [item_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((item_id, status, resolved_url, local_path, error_message, byte_size, recorded_at)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(TrackerRecord {
            item_id,
            status: status.parse()?,
            resolved_url,
            local_path,
            error_message,
            byte_size: byte_size.map(|size| size as u64),
            recorded_at,
        }))
    }

    /// Cumulative summary over everything the tracker has ever recorded.
    pub fn report(&self, top_n: usize) -> Result<TrackerReport, HarvestError> {
        let conn = self.lock()?;
        let mut report = TrackerReport::empty(self.path.to_string());

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM download_log GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            report.set_count(status.parse()?, count as u64);
        }

        report.top_failed = top_errors(&conn, DownloadStatus::Failed, top_n)?;
        report.top_skipped = top_errors(&conn, DownloadStatus::Skipped, top_n)?;
        Ok(report)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, HarvestError> {
        self.conn
            .lock()
            .map_err(|_| HarvestError::Tracker("tracker connection poisoned".to_string()))
    }
}

fn top_errors(
    conn: &Connection,
    status: DownloadStatus,
    limit: usize,
) -> Result<Vec<ErrorCount>, HarvestError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT error_message, COUNT(*) AS cnt
        FROM download_log
        WHERE status = ?1 AND error_message IS NOT NULL
        GROUP BY error_message
        ORDER BY cnt DESC, error_message ASC
        LIMIT ?2
        "#,
    )?;
    let rows = stmt
        .query_map(params![status.as_str(), limit as i64], |row| {
            Ok(ErrorCount {
                message: row.get(0)?,
                count: row.get::<_, i64>(1)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn is_missing_table(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("no such table")
    )
}
