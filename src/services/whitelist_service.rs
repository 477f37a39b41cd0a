use rusqlite::Connection;

use crate::data::repository;
use crate::error::AppError;
use crate::models::whitelist::WhitelistEntry;
use crate::scope_path;
use crate::services::embedding_service::EmbeddingIndex;

/// Adds a destination folder, or updates the description if the path is
/// already whitelisted. Updates keep the original position so tie-break
/// order stays stable. The folder must exist on disk.
pub fn add(
    conn: &Connection,
    index: &EmbeddingIndex,
    path: &str,
    description: &str,
) -> Result<WhitelistEntry, AppError> {
    let normalized = normalize_input(path)?;

    let metadata = std::fs::metadata(&normalized)
        .map_err(|_| AppError::Config(format!("whitelist path does not exist: {normalized}")))?;
    if !metadata.is_dir() {
        return Err(AppError::Config(format!(
            "whitelist path is not a directory: {normalized}"
        )));
    }

    let description = description.trim();

    if let Some(existing) = find(conn, &normalized)? {
        repository::update_folder_description(conn, existing.id, description)?;
        index.invalidate(existing.id);
        let refreshed = repository::get_folder_by_id(conn, existing.id)?
            .ok_or_else(|| AppError::General("whitelist row vanished during update".to_string()))?;
        tracing::info!("whitelist updated: {}", refreshed.path);
        return Ok(refreshed);
    }

    let id = repository::insert_folder(conn, &normalized, description)?;
    let entry = repository::get_folder_by_id(conn, id)?
        .ok_or_else(|| AppError::General("whitelist row vanished after insert".to_string()))?;
    tracing::info!("whitelist added: {}", entry.path);
    Ok(entry)
}

/// Removes a folder and, in the same transaction, every weight and
/// recency row keyed by it, so learned memory never outlives the
/// whitelist entry.
pub fn remove(
    conn: &mut Connection,
    index: &EmbeddingIndex,
    path: &str,
) -> Result<WhitelistEntry, AppError> {
    let entry = find(conn, path)?
        .ok_or_else(|| AppError::NotFound(format!("folder not whitelisted: {path}")))?;

    let tx = conn.transaction()?;
    repository::purge_folder_learning(&tx, entry.id)?;
    repository::delete_folder(&tx, entry.id)?;
    tx.commit()?;

    index.invalidate(entry.id);
    tracing::info!("whitelist removed: {}", entry.path);
    Ok(entry)
}

/// Drops every folder and all learned state in one transaction.
pub fn clear(conn: &mut Connection, index: &EmbeddingIndex) -> Result<usize, AppError> {
    let folders = repository::list_folders(conn)?;

    let tx = conn.transaction()?;
    for folder in &folders {
        repository::purge_folder_learning(&tx, folder.id)?;
        repository::delete_folder(&tx, folder.id)?;
    }
    tx.commit()?;

    index.invalidate_all();
    tracing::info!("whitelist cleared ({} folders)", folders.len());
    Ok(folders.len())
}

pub fn list(conn: &Connection) -> Result<Vec<WhitelistEntry>, AppError> {
    repository::list_folders(conn)
}

/// Path lookup tolerant of trailing slashes, `~`, and case differences
/// on filesystems that fold case.
pub fn find(conn: &Connection, path: &str) -> Result<Option<WhitelistEntry>, AppError> {
    let normalized = scope_path::normalize(&scope_path::expand_home(path.trim()));
    if let Some(entry) = repository::get_folder_by_path(conn, &normalized)? {
        return Ok(Some(entry));
    }
    let key = scope_path::dedupe_key(&normalized);
    let scan = repository::list_folders(conn)?
        .into_iter()
        .find(|folder| scope_path::dedupe_key(&folder.path) == key);
    Ok(scan)
}

fn normalize_input(path: &str) -> Result<String, AppError> {
    let normalized = scope_path::normalize(&scope_path::expand_home(path.trim()));
    if normalized.is_empty() {
        return Err(AppError::Config("whitelist path is empty".to_string()));
    }
    Ok(normalized)
}
