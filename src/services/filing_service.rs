use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::error::AppError;
use crate::models::move_record::MoveRecord;
use crate::models::suggestion::{
    Decision, DecisionOutcome, FileEvent, Suggestion, SuggestionOutcome, SuggestionRequest,
};
use crate::services::embedding_service::EmbeddingIndex;
use crate::services::{learning_service, move_service, scorer_service, whitelist_service};

struct PendingSuggestion {
    event: FileEvent,
    created: Instant,
}

/// Drives one file event from detection to a terminal decision. Holds
/// the pending-suggestion registry and the ignore cool-downs; the
/// database and embedding index are passed in by handle.
pub struct FilingController {
    pending: Mutex<HashMap<String, PendingSuggestion>>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    pending_ttl: Duration,
    ignore_cooldown: Duration,
    recency_window_secs: i64,
}

impl FilingController {
    pub fn new(pending_ttl: Duration, ignore_cooldown: Duration, recency_window_secs: i64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            pending_ttl,
            ignore_cooldown,
            recency_window_secs,
        }
    }

    /// Scores a detected file and parks the event for a later decision.
    /// Returns `None` when the path is cooling down or the whitelist is
    /// empty; neither is an error.
    pub fn handle_detected(
        &self,
        conn: &Connection,
        index: &EmbeddingIndex,
        event: FileEvent,
    ) -> Result<Option<Suggestion>, AppError> {
        if self.on_cooldown(&event.file_path) {
            tracing::debug!("skipping {} (cooling down)", event.file_path);
            return Ok(None);
        }

        let request = SuggestionRequest::from(&event);
        match scorer_service::suggest(conn, index, &request, self.recency_window_secs)? {
            SuggestionOutcome::NoDestinations => {
                tracing::debug!("no whitelisted destinations for {}", event.file_name);
                Ok(None)
            }
            SuggestionOutcome::Ranked(suggestion) => {
                let mut pending = lock(&self.pending);
                pending.retain(|_, entry| entry.created.elapsed() < self.pending_ttl);
                pending.insert(
                    event.event_id.clone(),
                    PendingSuggestion {
                        event,
                        created: Instant::now(),
                    },
                );
                Ok(Some(suggestion))
            }
        }
    }

    /// Applies the user's decision for a pending event. Accept moves the
    /// file and then updates the learned weights; a failed move leaves
    /// the file untouched and is reported, not thrown. Each pending
    /// event accepts exactly one decision.
    pub fn decide(
        &self,
        conn: &mut Connection,
        event_id: &str,
        decision: Decision,
    ) -> Result<DecisionOutcome, AppError> {
        let entry = {
            let mut pending = lock(&self.pending);
            pending.retain(|_, entry| entry.created.elapsed() < self.pending_ttl);
            pending.remove(event_id)
        };
        let Some(entry) = entry else {
            return Err(AppError::NotFound(format!(
                "no pending suggestion for event {event_id}"
            )));
        };
        let event = entry.event;

        match decision {
            Decision::Accept { folder_path } => {
                let record = match move_service::apply_move(conn, &event.file_path, &folder_path) {
                    Ok(record) => record,
                    Err(err @ AppError::Database(_)) => return Err(err),
                    Err(err) => {
                        tracing::warn!("move failed for {}: {}", event.file_path, err);
                        return Ok(DecisionOutcome::MoveFailed {
                            error: err.to_string(),
                        });
                    }
                };
                self.start_cooldown(record.dest_path.clone());

                if let Err(err) = self.learn_from_accept(conn, &event, &folder_path) {
                    tracing::warn!(
                        "move applied but learning update failed for {}: {}",
                        event.file_name,
                        err
                    );
                }
                Ok(DecisionOutcome::MoveApplied { record })
            }
            Decision::Decline => Ok(DecisionOutcome::Declined),
            Decision::Ignore => {
                self.start_cooldown(event.file_path.clone());
                Ok(DecisionOutcome::Ignored)
            }
        }
    }

    /// Reverses a journaled move. The restored file would otherwise
    /// re-trigger a suggestion immediately, so its path cools down.
    pub fn undo(
        &self,
        conn: &Connection,
        record_id: Option<&str>,
    ) -> Result<MoveRecord, AppError> {
        let record = move_service::undo(conn, record_id)?;
        self.start_cooldown(record.source_path.clone());
        Ok(record)
    }

    fn learn_from_accept(
        &self,
        conn: &mut Connection,
        event: &FileEvent,
        folder_path: &str,
    ) -> Result<(), AppError> {
        let folder = whitelist_service::find(conn, folder_path)?.ok_or_else(|| {
            AppError::NotFound(format!("folder disappeared from whitelist: {folder_path}"))
        })?;
        let tokens = scorer_service::tokenize(&event.file_name);
        learning_service::record_accept(
            conn,
            folder.id,
            event.extension.as_deref(),
            &tokens,
            self.recency_window_secs,
        )
    }

    fn on_cooldown(&self, path: &str) -> bool {
        let mut cooldowns = lock(&self.cooldowns);
        cooldowns.retain(|_, since| since.elapsed() < self.ignore_cooldown);
        cooldowns.contains_key(path)
    }

    fn start_cooldown(&self, path: String) {
        lock(&self.cooldowns).insert(path, Instant::now());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use crate::data::migrations::run_migrations;
    use crate::data::repository;
    use crate::models::move_record::MoveStatus;
    use crate::services::embedding_service::EmbeddingProvider;

    struct OfflineProvider;

    impl EmbeddingProvider for OfflineProvider {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Err(AppError::Provider("offline".to_string()))
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn test_index() -> EmbeddingIndex {
        EmbeddingIndex::new(Arc::new(OfflineProvider))
    }

    fn controller() -> FilingController {
        FilingController::new(Duration::from_secs(60), Duration::from_secs(60), 3600)
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("magpie_test_filing_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn whitelist_dir(conn: &Connection, base: &Path, name: &str) -> String {
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        let dir_str = dir.to_string_lossy().to_string();
        repository::insert_folder(conn, &dir_str, "").unwrap();
        dir_str
    }

    fn event_for(base: &Path, file_name: &str, contents: &str) -> FileEvent {
        let path = base.join(file_name);
        File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        FileEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            file_path: path.to_string_lossy().to_string(),
            extension: Path::new(file_name)
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase()),
        }
    }

    #[test]
    fn accept_moves_the_file_and_reinforces_weights() {
        let mut conn = test_conn();
        let index = test_index();
        let controller = controller();
        let base = temp_dir("accept");
        let dest = whitelist_dir(&conn, &base, "Finance");
        let event = event_for(&base, "acme invoice.pdf", "total 100");

        let suggestion = controller
            .handle_detected(&conn, &index, event.clone())
            .unwrap();
        assert!(suggestion.is_some());

        let outcome = controller
            .decide(
                &mut conn,
                &event.event_id,
                Decision::Accept {
                    folder_path: dest.clone(),
                },
            )
            .unwrap();
        let record = match outcome {
            DecisionOutcome::MoveApplied { record } => record,
            other => panic!("expected MoveApplied, got {other:?}"),
        };
        assert!(Path::new(&record.dest_path).exists());
        assert_eq!(record.status, MoveStatus::Applied);

        let folder = repository::get_folder_by_path(&conn, &dest).unwrap().unwrap();
        let ext_weight = repository::get_ext_weight(&conn, folder.id, "pdf").unwrap();
        assert!((ext_weight - 0.3).abs() < 1e-6);
        let token_weight = repository::get_token_weight(&conn, folder.id, "invoice").unwrap();
        assert!((token_weight - 0.3).abs() < 1e-6);

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn decline_leaves_file_and_weights_untouched() {
        let mut conn = test_conn();
        let index = test_index();
        let controller = controller();
        let base = temp_dir("decline");
        let dest = whitelist_dir(&conn, &base, "Finance");
        let event = event_for(&base, "notes.txt", "misc");

        controller
            .handle_detected(&conn, &index, event.clone())
            .unwrap();
        let outcome = controller
            .decide(&mut conn, &event.event_id, Decision::Decline)
            .unwrap();
        assert!(matches!(outcome, DecisionOutcome::Declined));
        assert!(Path::new(&event.file_path).exists());

        let folder = repository::get_folder_by_path(&conn, &dest).unwrap().unwrap();
        assert_eq!(repository::get_ext_weight(&conn, folder.id, "txt").unwrap(), 0.0);

        // the pending entry was consumed by the first decision
        let replay = controller.decide(&mut conn, &event.event_id, Decision::Decline);
        assert!(matches!(replay, Err(AppError::NotFound(_))));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn ignore_cools_down_the_path() {
        let mut conn = test_conn();
        let index = test_index();
        let controller =
            FilingController::new(Duration::from_secs(60), Duration::from_millis(20), 3600);
        let base = temp_dir("ignore");
        whitelist_dir(&conn, &base, "Finance");
        let event = event_for(&base, "draft.txt", "x");

        controller
            .handle_detected(&conn, &index, event.clone())
            .unwrap();
        let outcome = controller
            .decide(&mut conn, &event.event_id, Decision::Ignore)
            .unwrap();
        assert!(matches!(outcome, DecisionOutcome::Ignored));

        let during = controller
            .handle_detected(&conn, &index, event.clone())
            .unwrap();
        assert!(during.is_none());

        std::thread::sleep(Duration::from_millis(40));
        let after = controller.handle_detected(&conn, &index, event).unwrap();
        assert!(after.is_some());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn failed_move_is_reported_without_learning() {
        let mut conn = test_conn();
        let index = test_index();
        let controller = controller();
        let base = temp_dir("move_fail");
        let dest = whitelist_dir(&conn, &base, "Finance");
        let event = event_for(&base, "vanishing.txt", "x");

        controller
            .handle_detected(&conn, &index, event.clone())
            .unwrap();
        fs::remove_file(&event.file_path).unwrap();

        let outcome = controller
            .decide(
                &mut conn,
                &event.event_id,
                Decision::Accept { folder_path: dest.clone() },
            )
            .unwrap();
        assert!(matches!(outcome, DecisionOutcome::MoveFailed { .. }));

        let folder = repository::get_folder_by_path(&conn, &dest).unwrap().unwrap();
        assert_eq!(repository::get_ext_weight(&conn, folder.id, "txt").unwrap(), 0.0);
        assert!(repository::list_moves(&conn).unwrap().is_empty());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn pending_suggestions_expire() {
        let mut conn = test_conn();
        let index = test_index();
        let controller =
            FilingController::new(Duration::from_millis(20), Duration::from_secs(60), 3600);
        let base = temp_dir("pending_ttl");
        whitelist_dir(&conn, &base, "Finance");
        let event = event_for(&base, "slow.txt", "x");

        controller
            .handle_detected(&conn, &index, event.clone())
            .unwrap();
        std::thread::sleep(Duration::from_millis(40));

        let expired = controller.decide(&mut conn, &event.event_id, Decision::Decline);
        assert!(matches!(expired, Err(AppError::NotFound(_))));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn accepted_destination_does_not_retrigger() {
        let mut conn = test_conn();
        let index = test_index();
        let controller = controller();
        let base = temp_dir("dest_cooldown");
        let dest = whitelist_dir(&conn, &base, "Finance");
        let event = event_for(&base, "report.txt", "x");

        controller
            .handle_detected(&conn, &index, event.clone())
            .unwrap();
        let outcome = controller
            .decide(
                &mut conn,
                &event.event_id,
                Decision::Accept { folder_path: dest },
            )
            .unwrap();
        let record = match outcome {
            DecisionOutcome::MoveApplied { record } => record,
            other => panic!("expected MoveApplied, got {other:?}"),
        };

        let echo = FileEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            file_name: "report.txt".to_string(),
            file_path: record.dest_path.clone(),
            extension: Some("txt".to_string()),
        };
        let suggestion = controller.handle_detected(&conn, &index, echo).unwrap();
        assert!(suggestion.is_none());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn undo_restores_and_cools_down_the_source() {
        let mut conn = test_conn();
        let index = test_index();
        let controller = controller();
        let base = temp_dir("undo");
        let dest = whitelist_dir(&conn, &base, "Finance");
        let event = event_for(&base, "bill.txt", "x");

        controller
            .handle_detected(&conn, &index, event.clone())
            .unwrap();
        controller
            .decide(
                &mut conn,
                &event.event_id,
                Decision::Accept { folder_path: dest },
            )
            .unwrap();

        let undone = controller.undo(&conn, None).unwrap();
        assert_eq!(undone.status, MoveStatus::Undone);
        assert!(Path::new(&event.file_path).exists());

        let suggestion = controller.handle_detected(&conn, &index, event).unwrap();
        assert!(suggestion.is_none());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn empty_whitelist_stays_quiet() {
        let conn = test_conn();
        let index = test_index();
        let controller = controller();
        let base = temp_dir("no_dest");
        let event = event_for(&base, "orphan.txt", "x");

        let suggestion = controller.handle_detected(&conn, &index, event).unwrap();
        assert!(suggestion.is_none());

        let _ = fs::remove_dir_all(&base);
    }
}
