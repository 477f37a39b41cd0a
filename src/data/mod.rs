pub mod migrations;
pub mod repository;

use std::path::Path;

use rusqlite::Connection;

use crate::error::AppError;

/// Opens the store at `db_path`, creating it and running migrations as
/// needed. A file SQLite cannot read is set aside with a timestamped
/// suffix and replaced by a fresh store, so bad state never blocks
/// startup.
pub fn open_store(db_path: &Path) -> Result<Connection, AppError> {
    match try_open(db_path) {
        Ok(conn) => Ok(conn),
        Err(err) if is_corruption(&err) => {
            let aside = db_path.with_extension(format!(
                "corrupt-{}",
                chrono::Utc::now().timestamp()
            ));
            tracing::warn!(
                "store at {} unreadable ({}), starting empty; old file kept at {}",
                db_path.display(),
                err,
                aside.display()
            );
            std::fs::rename(db_path, &aside)?;
            for sidecar in ["-wal", "-shm"] {
                let mut name = db_path.as_os_str().to_os_string();
                name.push(sidecar);
                let _ = std::fs::remove_file(name);
            }
            try_open(db_path)
        }
        Err(err) => Err(err),
    }
}

fn try_open(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

fn is_corruption(err: &AppError) -> bool {
    match err {
        AppError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
            e.code,
            rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
        ),
        _ => false,
    }
}
