use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};

use crate::domain::WorkItem;
use crate::error::HarvestError;

const LOAD_ITEMS: &str = r#"
SELECT id, image_id, variant_type, url, origin_url, width, height
FROM image_variants
WHERE url IS NOT NULL OR origin_url IS NOT NULL
ORDER BY id
"#;

/// Read-only handle on the database produced by the ingestion step.
pub struct SourceStore {
    path: Utf8PathBuf,
    conn: Connection,
}

impl SourceStore {
    pub fn open(path: &Utf8Path) -> Result<Self, HarvestError> {
        if !path.as_std_path().is_file() {
            return Err(HarvestError::SourceMissing(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| read_error(path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn load_items(&self) -> Result<Vec<WorkItem>, HarvestError> {
        let mut stmt = self
            .conn
            .prepare(LOAD_ITEMS)
            .map_err(|err| read_error(&self.path, err))?;
        let items = stmt
            .query_map([], |row| {
                Ok(WorkItem {
                    item_id: row.get(0)?,
                    parent_id: text_value(row.get(1)?).unwrap_or_default(),
                    variant_kind: text_value(row.get(2)?)
                        .unwrap_or_default()
                        .into(),
                    primary_url: text_value(row.get(3)?),
                    fallback_url: text_value(row.get(4)?),
                    width: dimension(row.get(5)?),
                    height: dimension(row.get(6)?),
                })
            })
            .map_err(|err| read_error(&self.path, err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| read_error(&self.path, err))?;
        tracing::debug!(source = %self.path, count = items.len(), "loaded work items");
        Ok(items)
    }
}

fn read_error(path: &Utf8Path, err: rusqlite::Error) -> HarvestError {
    HarvestError::SourceRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

// SQLite columns are dynamically typed; ingestion wrote ids as either
// integers or text depending on the source site.
fn text_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Text(v) => Some(v),
        Value::Blob(v) => Some(String::from_utf8_lossy(&v).into_owned()),
    }
}

fn dimension(value: Value) -> Option<u32> {
    let parsed = match value {
        Value::Integer(v) => v,
        Value::Real(v) => v as i64,
        Value::Text(v) => v.trim().parse().ok()?,
        Value::Null | Value::Blob(_) => return None,
    };
    u32::try_from(parsed).ok().filter(|v| *v > 0)
}
