use std::path::Path;

use rusqlite::Connection;

use crate::data::repository;
use crate::error::AppError;
use crate::models::learning::{SeedRules, StatusSnapshot};
use crate::scope_path;

/// Blend factor for reinforcement. One accept moves a fresh weight to
/// 0.3; repeated accepts approach 1.0, so weights stay in [0, 1].
const ALPHA: f32 = 0.3;
const REINFORCE_SIGNAL: f32 = 1.0;

/// Only the leading filename tokens are learned, to keep the token
/// table from absorbing serial numbers and dates.
const MAX_LEARNED_TOKENS: usize = 3;

const MAX_RECENCY_ROWS: i64 = 512;
const SEED_WEIGHT: f32 = 0.5;
const TOP_WEIGHTS_LIMIT: i64 = 3;

pub(crate) fn blend(old: f32) -> f32 {
    old * (1.0 - ALPHA) + ALPHA * REINFORCE_SIGNAL
}

/// Recency ledger key: extension plus the leading tokens, so files from
/// the same source fall on the same row.
pub fn signature(extension: Option<&str>, tokens: &[String]) -> Option<String> {
    let ext = extension.unwrap_or("").to_ascii_lowercase();
    let head: Vec<&str> = tokens
        .iter()
        .take(MAX_LEARNED_TOKENS)
        .map(String::as_str)
        .collect();
    if ext.is_empty() && head.is_empty() {
        return None;
    }
    Some(format!("{}:{}", ext, head.join("|")))
}

/// Decayed recency contribution in [0, 1]: 1.0 for a just-filed match,
/// linear down to 0 at the window edge. Unparseable timestamps count
/// as expired.
pub fn recency_score(filed_at: &str, window_secs: i64) -> f32 {
    if window_secs <= 0 {
        return 0.0;
    }
    let Ok(filed) = chrono::DateTime::parse_from_rfc3339(filed_at) else {
        return 0.0;
    };
    let elapsed = (chrono::Utc::now() - filed.with_timezone(&chrono::Utc)).num_seconds();
    if elapsed <= 0 {
        return 1.0;
    }
    let remaining = 1.0 - elapsed as f32 / window_secs as f32;
    remaining.clamp(0.0, 1.0)
}

/// Reinforces the accepted folder: extension weight, the leading token
/// weights, and a recency row, all in one transaction so a failure
/// leaves no partial update. The ledger is pruned on every write.
pub fn record_accept(
    conn: &mut Connection,
    folder_id: i64,
    extension: Option<&str>,
    tokens: &[String],
    recency_window_secs: i64,
) -> Result<(), AppError> {
    let now = chrono::Utc::now();
    let tx = conn.transaction()?;

    if let Some(ext) = extension {
        let ext = ext.to_ascii_lowercase();
        if !ext.is_empty() {
            let old = repository::get_ext_weight(&tx, folder_id, &ext)?;
            repository::upsert_ext_weight(&tx, folder_id, &ext, blend(old))?;
        }
    }

    for token in tokens.iter().take(MAX_LEARNED_TOKENS) {
        let old = repository::get_token_weight(&tx, folder_id, token)?;
        repository::upsert_token_weight(&tx, folder_id, token, blend(old))?;
    }

    if let Some(sig) = signature(extension, tokens) {
        repository::upsert_recency(&tx, &sig, folder_id, &now.to_rfc3339())?;
    }

    let cutoff = (now - chrono::Duration::seconds(recency_window_secs)).to_rfc3339();
    repository::prune_recency(&tx, &cutoff, MAX_RECENCY_ROWS)?;

    tx.commit()?;
    Ok(())
}

pub fn status_snapshot(
    conn: &Connection,
    embeddings_available: Option<bool>,
) -> Result<StatusSnapshot, AppError> {
    Ok(StatusSnapshot {
        whitelist_count: repository::count_folders(conn)?,
        embeddings_available,
        top_extensions: repository::top_ext_weights(conn, TOP_WEIGHTS_LIMIT)?,
        top_tokens: repository::top_token_weights(conn, TOP_WEIGHTS_LIMIT)?,
    })
}

/// Reads the optional seed file. A missing file is normal; an
/// unparseable one is logged and skipped rather than failing startup.
pub fn load_seed_rules(path: &Path) -> Option<SeedRules> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<SeedRules>(&raw) {
        Ok(rules) => Some(rules),
        Err(e) => {
            tracing::warn!("ignoring unreadable seed rules at {}: {}", path.display(), e);
            None
        }
    }
}

/// Imports starter weights for whitelisted folders named by the seed
/// rules. Runs only while both weight tables are empty, so user
/// learning is never overwritten. Returns the number of rules applied.
pub fn import_seed_rules(conn: &mut Connection, rules: &SeedRules) -> Result<usize, AppError> {
    if rules.rules.is_empty() || repository::has_any_weights(conn)? {
        return Ok(0);
    }

    let folders = repository::list_folders(conn)?;
    let mut applied = 0;

    let tx = conn.transaction()?;
    for rule in &rules.rules {
        let key = scope_path::dedupe_key(&rule.folder);
        let Some(folder) = folders.iter().find(|f| scope_path::dedupe_key(&f.path) == key)
        else {
            tracing::warn!("seed rule for {} skipped: not whitelisted", rule.folder);
            continue;
        };

        for ext in &rule.extensions {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            if !ext.is_empty() {
                repository::upsert_ext_weight(&tx, folder.id, &ext, SEED_WEIGHT)?;
            }
        }
        for keyword in &rule.keywords {
            for token in crate::services::scorer_service::tokenize(keyword) {
                repository::upsert_token_weight(&tx, folder.id, &token, SEED_WEIGHT)?;
            }
        }
        applied += 1;
    }
    tx.commit()?;

    if applied > 0 {
        tracing::info!("imported {} seed rules into empty weight tables", applied);
    }
    Ok(applied)
}
