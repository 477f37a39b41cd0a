use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::data;
use crate::error::AppError;
use crate::models::learning::StatusSnapshot;
use crate::models::move_record::MoveRecord;
use crate::models::suggestion::{
    Decision, DecisionOutcome, FileEvent, Suggestion, SuggestionOutcome, SuggestionRequest,
};
use crate::models::whitelist::WhitelistEntry;
use crate::scope_path;
use crate::services::embedding_service::{EmbeddingIndex, EmbeddingProvider};
use crate::services::filing_service::FilingController;
use crate::services::{
    learning_service, move_service, scorer_service, watcher_service, whitelist_service,
};

pub const DB_FILE: &str = "magpie.db";
pub const SEED_RULES_FILE: &str = "seed_rules.json";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Overrides the platform data directory when set.
    pub data_dir: Option<PathBuf>,
    pub recency_window_secs: i64,
    pub ignore_cooldown_secs: u64,
    pub pending_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            recency_window_secs: 14 * 24 * 3600,
            ignore_cooldown_secs: 3600,
            pending_ttl_secs: 600,
        }
    }
}

impl EngineConfig {
    pub fn resolve_data_dir(&self) -> Result<PathBuf, AppError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let dirs = directories::ProjectDirs::from("", "", "magpie").ok_or_else(|| {
            AppError::Config("could not resolve the platform data directory".to_string())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Owns the store, the embedding index, and the filing controller. The
/// CLI talks to this and to nothing below it.
pub struct Engine {
    db: Mutex<Connection>,
    index: EmbeddingIndex,
    controller: FilingController,
    db_path: PathBuf,
    data_dir: PathBuf,
    recency_window_secs: i64,
}

impl Engine {
    /// Opens (or creates) the store under the data directory, applies
    /// seed rules while the weight tables are still empty, and wires
    /// the controller. Does not touch the embedding provider.
    pub fn bootstrap(
        config: &EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let data_dir = config.resolve_data_dir()?;
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(DB_FILE);
        let mut conn = data::open_store(&db_path)?;

        let seed_path = data_dir.join(SEED_RULES_FILE);
        if let Some(rules) = learning_service::load_seed_rules(&seed_path) {
            let imported = learning_service::import_seed_rules(&mut conn, &rules)?;
            if imported > 0 {
                tracing::info!(
                    "seeded {} weight entries from {}",
                    imported,
                    seed_path.display()
                );
            }
        }

        Ok(Self {
            db: Mutex::new(conn),
            index: EmbeddingIndex::new(provider),
            controller: FilingController::new(
                Duration::from_secs(config.pending_ttl_secs),
                Duration::from_secs(config.ignore_cooldown_secs),
                config.recency_window_secs,
            ),
            db_path,
            data_dir,
            recency_window_secs: config.recency_window_secs,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Reads the provider latch only; never builds the index.
    pub fn embeddings_available(&self) -> Option<bool> {
        self.index.availability()
    }

    pub fn status(&self) -> Result<StatusSnapshot, AppError> {
        let conn = self.conn();
        learning_service::status_snapshot(&conn, self.index.availability())
    }

    /// Embeds every whitelisted folder so the first suggestion does not
    /// pay the cold-start cost. Safe to call from a background task.
    pub fn warm_up(&self) -> Result<usize, AppError> {
        let folders = {
            let conn = self.conn();
            whitelist_service::list(&conn)?
        };
        Ok(self.index.warm_up(&folders))
    }

    /// Drops the embedding cache and rebuilds it, giving a previously
    /// unavailable provider another chance.
    pub fn reindex(&self) -> Result<usize, AppError> {
        self.index.invalidate_all();
        self.warm_up()
    }

    pub fn add_folder(&self, path: &str, description: &str) -> Result<WhitelistEntry, AppError> {
        let conn = self.conn();
        whitelist_service::add(&conn, &self.index, path, description)
    }

    pub fn remove_folder(&self, path: &str) -> Result<WhitelistEntry, AppError> {
        let mut conn = self.conn();
        whitelist_service::remove(&mut conn, &self.index, path)
    }

    pub fn clear_folders(&self) -> Result<usize, AppError> {
        let mut conn = self.conn();
        whitelist_service::clear(&mut conn, &self.index)
    }

    pub fn folders(&self) -> Result<Vec<WhitelistEntry>, AppError> {
        let conn = self.conn();
        whitelist_service::list(&conn)
    }

    /// Whitelisted folders sitting inside `dir`. The watch loop warns
    /// about these before it starts; accepted moves into them land
    /// back in the watched tree.
    pub fn folders_within(&self, dir: &Path) -> Result<Vec<WhitelistEntry>, AppError> {
        let root = dir.to_string_lossy();
        let folders = self.folders()?;
        Ok(folders
            .into_iter()
            .filter(|folder| scope_path::is_within_scope(&folder.path, &root))
            .collect())
    }

    pub fn detect(&self, event: FileEvent) -> Result<Option<Suggestion>, AppError> {
        let conn = self.conn();
        self.controller.handle_detected(&conn, &self.index, event)
    }

    /// One-shot suggestion for a file already on disk, outside the
    /// pending-decision flow. Nothing is registered and nothing moves.
    pub fn suggest_file(&self, path: &Path) -> Result<SuggestionOutcome, AppError> {
        let event = watcher_service::event_for_path(path)
            .ok_or_else(|| AppError::NotFound(format!("no scorable file at {}", path.display())))?;
        let request = SuggestionRequest::from(&event);
        let conn = self.conn();
        scorer_service::suggest(&conn, &self.index, &request, self.recency_window_secs)
    }

    pub fn decide(&self, event_id: &str, decision: Decision) -> Result<DecisionOutcome, AppError> {
        let mut conn = self.conn();
        self.controller.decide(&mut conn, event_id, decision)
    }

    pub fn undo(&self, record_id: Option<&str>) -> Result<MoveRecord, AppError> {
        let conn = self.conn();
        self.controller.undo(&conn, record_id)
    }

    /// Triages files already sitting in `dir`, returning each event that
    /// produced a suggestion.
    pub fn sweep(&self, dir: &Path) -> Result<Vec<(FileEvent, Suggestion)>, AppError> {
        let events = watcher_service::scan_existing(dir)?;
        let mut out = Vec::new();
        let conn = self.conn();
        for event in events {
            if let Some(suggestion) =
                self.controller
                    .handle_detected(&conn, &self.index, event.clone())?
            {
                out.push((event, suggestion));
            }
        }
        Ok(out)
    }

    pub fn export_log(&self, out_path: &str) -> Result<usize, AppError> {
        let conn = self.conn();
        move_service::export_csv(&conn, out_path)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
