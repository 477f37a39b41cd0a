use rusqlite::{params, Connection};

use crate::error::AppError;
use crate::models::learning::WeightEntry;
use crate::models::move_record::{MoveRecord, MoveStatus};
use crate::models::whitelist::WhitelistEntry;

fn folder_from_row(row: &rusqlite::Row<'_>) -> Result<WhitelistEntry, rusqlite::Error> {
    Ok(WhitelistEntry {
        id: row.get(0)?,
        path: row.get(1)?,
        description: row.get(2)?,
        position: row.get(3)?,
        added_at: row.get(4)?,
    })
}

pub fn insert_folder(conn: &Connection, path: &str, description: &str) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO whitelist (path, description, position, added_at)
         VALUES (?1, ?2, (SELECT COALESCE(MAX(position), 0) + 1 FROM whitelist), ?3)",
        params![path, description, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_folder_description(
    conn: &Connection,
    folder_id: i64,
    description: &str,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE whitelist SET description = ?1 WHERE id = ?2",
        params![description, folder_id],
    )?;
    Ok(count)
}

pub fn get_folder_by_path(conn: &Connection, path: &str) -> Result<Option<WhitelistEntry>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, path, description, position, added_at FROM whitelist WHERE path = ?1",
    )?;
    let entry = stmt.query_row(params![path], folder_from_row).optional()?;
    Ok(entry)
}

pub fn get_folder_by_id(conn: &Connection, folder_id: i64) -> Result<Option<WhitelistEntry>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, path, description, position, added_at FROM whitelist WHERE id = ?1",
    )?;
    let entry = stmt.query_row(params![folder_id], folder_from_row).optional()?;
    Ok(entry)
}

pub fn list_folders(conn: &Connection) -> Result<Vec<WhitelistEntry>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, path, description, position, added_at FROM whitelist ORDER BY position ASC",
    )?;
    let entries = stmt
        .query_map([], folder_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(entries)
}

pub fn count_folders(conn: &Connection) -> Result<i64, AppError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM whitelist", [], |row| row.get(0))?;
    Ok(count)
}

pub fn delete_folder(conn: &Connection, folder_id: i64) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM whitelist WHERE id = ?1", params![folder_id])?;
    Ok(count)
}

/// Removes every learned row keyed by the folder. Run inside the same
/// transaction as the whitelist delete so removal cannot leave orphans.
pub fn purge_folder_learning(conn: &Connection, folder_id: i64) -> Result<(), AppError> {
    conn.execute("DELETE FROM ext_weights WHERE folder_id = ?1", params![folder_id])?;
    conn.execute("DELETE FROM token_weights WHERE folder_id = ?1", params![folder_id])?;
    conn.execute("DELETE FROM recency WHERE folder_id = ?1", params![folder_id])?;
    Ok(())
}

pub fn get_ext_weight(conn: &Connection, folder_id: i64, extension: &str) -> Result<f32, AppError> {
    let weight = conn
        .query_row(
            "SELECT weight FROM ext_weights WHERE folder_id = ?1 AND extension = ?2",
            params![folder_id, extension],
            |row| row.get::<_, f64>(0),
        )
        .optional()?;
    Ok(weight.unwrap_or(0.0) as f32)
}

pub fn upsert_ext_weight(
    conn: &Connection,
    folder_id: i64,
    extension: &str,
    weight: f32,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO ext_weights (folder_id, extension, weight, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(folder_id, extension)
         DO UPDATE SET weight = excluded.weight, updated_at = excluded.updated_at",
        params![folder_id, extension, weight as f64, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Raw extension weights per folder, for one extension.
pub fn ext_weights_for(conn: &Connection, extension: &str) -> Result<Vec<(i64, f32)>, AppError> {
    let mut stmt =
        conn.prepare("SELECT folder_id, weight FROM ext_weights WHERE extension = ?1")?;
    let rows = stmt
        .query_map(params![extension], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)? as f32))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn get_token_weight(conn: &Connection, folder_id: i64, token: &str) -> Result<f32, AppError> {
    let weight = conn
        .query_row(
            "SELECT weight FROM token_weights WHERE folder_id = ?1 AND token = ?2",
            params![folder_id, token],
            |row| row.get::<_, f64>(0),
        )
        .optional()?;
    Ok(weight.unwrap_or(0.0) as f32)
}

pub fn upsert_token_weight(
    conn: &Connection,
    folder_id: i64,
    token: &str,
    weight: f32,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO token_weights (folder_id, token, weight, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(folder_id, token)
         DO UPDATE SET weight = excluded.weight, updated_at = excluded.updated_at",
        params![folder_id, token, weight as f64, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Raw token weights per folder, summed over the given tokens.
pub fn token_weights_for(conn: &Connection, tokens: &[String]) -> Result<Vec<(i64, f32)>, AppError> {
    use std::collections::HashMap;

    let mut sums: HashMap<i64, f32> = HashMap::new();
    let mut stmt =
        conn.prepare("SELECT folder_id, weight FROM token_weights WHERE token = ?1")?;
    for token in tokens {
        let rows = stmt.query_map(params![token], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)? as f32))
        })?;
        for row in rows.filter_map(|r| r.ok()) {
            *sums.entry(row.0).or_insert(0.0) += row.1;
        }
    }
    Ok(sums.into_iter().collect())
}

/// Tokens that have any learned weight for the folder, used to report
/// which keywords actually matched.
pub fn known_tokens_for_folder(
    conn: &Connection,
    folder_id: i64,
    tokens: &[String],
) -> Result<Vec<String>, AppError> {
    let mut matched = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT 1 FROM token_weights WHERE folder_id = ?1 AND token = ?2 AND weight > 0",
    )?;
    for token in tokens {
        let hit = stmt
            .query_row(params![folder_id, token], |_| Ok(()))
            .optional()?;
        if hit.is_some() {
            matched.push(token.clone());
        }
    }
    Ok(matched)
}

pub fn has_any_weights(conn: &Connection) -> Result<bool, AppError> {
    let ext: i64 = conn.query_row("SELECT COUNT(*) FROM ext_weights", [], |row| row.get(0))?;
    let tok: i64 = conn.query_row("SELECT COUNT(*) FROM token_weights", [], |row| row.get(0))?;
    Ok(ext + tok > 0)
}

pub fn top_ext_weights(conn: &Connection, limit: i64) -> Result<Vec<WeightEntry>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT e.extension, w.path, e.weight FROM ext_weights e
         JOIN whitelist w ON w.id = e.folder_id
         ORDER BY e.weight DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(WeightEntry {
                key: row.get(0)?,
                folder_path: row.get(1)?,
                weight: row.get::<_, f64>(2)? as f32,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn top_token_weights(conn: &Connection, limit: i64) -> Result<Vec<WeightEntry>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT t.token, w.path, t.weight FROM token_weights t
         JOIN whitelist w ON w.id = t.folder_id
         ORDER BY t.weight DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(WeightEntry {
                key: row.get(0)?,
                folder_path: row.get(1)?,
                weight: row.get::<_, f64>(2)? as f32,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn upsert_recency(
    conn: &Connection,
    signature: &str,
    folder_id: i64,
    filed_at: &str,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO recency (signature, folder_id, filed_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(signature)
         DO UPDATE SET folder_id = excluded.folder_id, filed_at = excluded.filed_at",
        params![signature, folder_id, filed_at],
    )?;
    Ok(())
}

pub fn get_recency(conn: &Connection, signature: &str) -> Result<Option<(i64, String)>, AppError> {
    let row = conn
        .query_row(
            "SELECT folder_id, filed_at FROM recency WHERE signature = ?1",
            params![signature],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row)
}

/// Drops ledger rows older than the cutoff, then trims to `max_rows`
/// keeping the most recent.
pub fn prune_recency(conn: &Connection, cutoff: &str, max_rows: i64) -> Result<(), AppError> {
    conn.execute("DELETE FROM recency WHERE filed_at < ?1", params![cutoff])?;
    conn.execute(
        "DELETE FROM recency WHERE id NOT IN
         (SELECT id FROM recency ORDER BY filed_at DESC, id DESC LIMIT ?1)",
        params![max_rows],
    )?;
    Ok(())
}

fn move_from_row(row: &rusqlite::Row<'_>) -> Result<MoveRecord, rusqlite::Error> {
    let status_str: String = row.get(3)?;
    Ok(MoveRecord {
        record_id: row.get(0)?,
        source_path: row.get(1)?,
        dest_path: row.get(2)?,
        // an unparseable status reads as undone
        status: status_str.parse::<MoveStatus>().unwrap_or(MoveStatus::Undone),
        moved_at: row.get(4)?,
    })
}

pub fn insert_move(conn: &Connection, record: &MoveRecord) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO move_log (record_id, source_path, dest_path, status, moved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.record_id,
            record.source_path,
            record.dest_path,
            record.status.to_string(),
            record.moved_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_move(conn: &Connection, record_id: &str) -> Result<Option<MoveRecord>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT record_id, source_path, dest_path, status, moved_at
         FROM move_log WHERE record_id = ?1",
    )?;
    let record = stmt.query_row(params![record_id], move_from_row).optional()?;
    Ok(record)
}

pub fn get_latest_undoable_move(conn: &Connection) -> Result<Option<MoveRecord>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT record_id, source_path, dest_path, status, moved_at
         FROM move_log WHERE status = 'applied'
         ORDER BY moved_at DESC, id DESC LIMIT 1",
    )?;
    let record = stmt.query_row([], move_from_row).optional()?;
    Ok(record)
}

pub fn mark_move_undone(conn: &Connection, record_id: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE move_log SET status = 'undone' WHERE record_id = ?1 AND status = 'applied'",
        params![record_id],
    )?;
    Ok(count)
}

pub fn list_moves(conn: &Connection) -> Result<Vec<MoveRecord>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT record_id, source_path, dest_path, status, moved_at
         FROM move_log ORDER BY moved_at ASC, id ASC",
    )?;
    let records = stmt
        .query_map([], move_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(records)
}

// Needed for rusqlite optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
