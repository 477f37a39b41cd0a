use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS whitelist (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    position INTEGER NOT NULL,
    added_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_whitelist_position ON whitelist(position);

CREATE TABLE IF NOT EXISTS ext_weights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    folder_id INTEGER NOT NULL,
    extension TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 0,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(folder_id, extension)
);

CREATE INDEX IF NOT EXISTS idx_ext_weights_extension ON ext_weights(extension);

CREATE TABLE IF NOT EXISTS token_weights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    folder_id INTEGER NOT NULL,
    token TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 0,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(folder_id, token)
);

CREATE INDEX IF NOT EXISTS idx_token_weights_token ON token_weights(token);

CREATE TABLE IF NOT EXISTS recency (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signature TEXT UNIQUE NOT NULL,
    folder_id INTEGER NOT NULL,
    filed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_recency_folder ON recency(folder_id);
CREATE INDEX IF NOT EXISTS idx_recency_filed ON recency(filed_at);

CREATE TABLE IF NOT EXISTS move_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id TEXT UNIQUE NOT NULL,
    source_path TEXT NOT NULL,
    dest_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'applied',
    moved_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_move_log_time ON move_log(moved_at DESC);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}
