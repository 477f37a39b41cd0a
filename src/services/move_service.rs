use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::data::repository;
use crate::error::AppError;
use crate::models::move_record::{MoveRecord, MoveStatus};
use crate::safety;
use crate::services::whitelist_service;

const MAX_COLLISION_SUFFIX: u32 = 999;

/// Moves a file into a whitelisted folder and journals it. The journal
/// row is written only after the rename succeeds, so an interrupted run
/// never records a move that did not happen.
pub fn apply_move(conn: &Connection, source: &str, dest_dir: &str) -> Result<MoveRecord, AppError> {
    let folder = whitelist_service::find(conn, dest_dir)?.ok_or_else(|| {
        AppError::Config(format!("destination is not whitelisted: {dest_dir}"))
    })?;
    safety::validate_path(&folder.path)?;
    safety::validate_path(source)?;

    let source_path = Path::new(source);
    let metadata = fs::metadata(source_path)
        .map_err(|_| AppError::NotFound(format!("source no longer exists: {source}")))?;
    if metadata.is_dir() {
        return Err(AppError::Config(format!("source is a directory: {source}")));
    }

    let file_name = source_path
        .file_name()
        .ok_or_else(|| AppError::Config(format!("invalid source path: {source}")))?
        .to_string_lossy()
        .to_string();

    // the folder may have been deleted since it was whitelisted
    fs::create_dir_all(&folder.path)?;

    let dest = resolve_collision(Path::new(&folder.path), &file_name)?;
    rename_or_copy(source_path, &dest)?;

    let record = MoveRecord {
        record_id: uuid::Uuid::new_v4().to_string(),
        source_path: source.to_string(),
        dest_path: dest.to_string_lossy().to_string(),
        status: MoveStatus::Applied,
        moved_at: chrono::Utc::now().to_rfc3339(),
    };
    if let Err(err) = repository::insert_move(conn, &record) {
        tracing::error!(
            "move applied but could not be journaled ({} -> {}): {}",
            record.source_path,
            record.dest_path,
            err
        );
        return Err(err);
    }

    tracing::info!("moved {} -> {}", record.source_path, record.dest_path);
    Ok(record)
}

/// Restores the latest applied move, or a specific record by id. A
/// record flips to undone exactly once, and only after the file is
/// back at its original path.
pub fn undo(conn: &Connection, record_id: Option<&str>) -> Result<MoveRecord, AppError> {
    let mut record = match record_id {
        Some(id) => repository::get_move(conn, id)?
            .ok_or_else(|| AppError::NotFound(format!("no move with id {id}")))?,
        None => repository::get_latest_undoable_move(conn)?
            .ok_or_else(|| AppError::NotFound("nothing to undo".to_string()))?,
    };

    if record.status == MoveStatus::Undone {
        return Err(AppError::NotFound(format!(
            "move {} was already undone",
            record.record_id
        )));
    }

    let dest = Path::new(&record.dest_path);
    if !dest.exists() {
        return Err(AppError::NotFound(format!(
            "moved file is no longer at {}",
            record.dest_path
        )));
    }

    let source = Path::new(&record.source_path);
    if source.exists() {
        return Err(AppError::Conflict(format!(
            "original path is occupied: {}",
            record.source_path
        )));
    }
    if let Some(parent) = source.parent() {
        fs::create_dir_all(parent)?;
    }

    rename_or_copy(dest, source)?;

    let changed = repository::mark_move_undone(conn, &record.record_id)?;
    if changed == 0 {
        return Err(AppError::NotFound(format!(
            "move {} was already undone",
            record.record_id
        )));
    }

    tracing::info!("undid move {} -> {}", record.dest_path, record.source_path);
    record.status = MoveStatus::Undone;
    Ok(record)
}

/// Writes the full move log as CSV and returns the row count.
pub fn export_csv(conn: &Connection, out_path: &str) -> Result<usize, AppError> {
    let moves = repository::list_moves(conn)?;
    let mut out = String::from("timestamp,source,destination,status\n");
    for record in &moves {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_field(&record.moved_at),
            csv_field(&record.source_path),
            csv_field(&record.dest_path),
            record.status
        ));
    }
    fs::write(out_path, out)?;
    Ok(moves.len())
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Picks a free name in `dest_dir`, appending " (2)", " (3)", ... before
/// the extension when the plain name is taken.
fn resolve_collision(dest_dir: &Path, file_name: &str) -> Result<PathBuf, AppError> {
    let plain = dest_dir.join(file_name);
    if !plain.exists() {
        return Ok(plain);
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (file_name.to_string(), None),
    };

    for n in 2..=MAX_COLLISION_SUFFIX {
        let candidate_name = match &extension {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dest_dir.join(candidate_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(AppError::Conflict(format!(
        "no free name for {file_name} in {}",
        dest_dir.display()
    )))
}

fn rename_or_copy(from: &Path, to: &Path) -> Result<(), AppError> {
    // rename fails across filesystems; fall back to copy and remove
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    use crate::data::migrations::run_migrations;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("magpie_test_move_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_file(path: &Path, contents: &str) {
        File::create(path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
    }

    fn whitelist_dir(conn: &Connection, base: &Path, name: &str) -> String {
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        let dir_str = dir.to_string_lossy().to_string();
        repository::insert_folder(conn, &dir_str, "").unwrap();
        dir_str
    }

    #[test]
    fn apply_move_relocates_and_journals() {
        let conn = test_conn();
        let base = temp_dir("apply");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");
        let src = base.join("report.pdf");
        write_file(&src, "hello");

        let record = apply_move(&conn, &src.to_string_lossy(), &dest_dir).unwrap();

        assert!(!src.exists());
        assert!(Path::new(&record.dest_path).exists());
        assert_eq!(fs::read_to_string(&record.dest_path).unwrap(), "hello");
        assert_eq!(record.status, MoveStatus::Applied);

        let stored = repository::get_move(&conn, &record.record_id).unwrap().unwrap();
        assert_eq!(stored.dest_path, record.dest_path);
        assert_eq!(stored.status, MoveStatus::Applied);

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn apply_move_suffixes_collisions() {
        let conn = test_conn();
        let base = temp_dir("collision");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");
        write_file(&Path::new(&dest_dir).join("report.pdf"), "old");
        write_file(&Path::new(&dest_dir).join("report (2).pdf"), "older");
        let src = base.join("report.pdf");
        write_file(&src, "new");

        let record = apply_move(&conn, &src.to_string_lossy(), &dest_dir).unwrap();

        assert!(record.dest_path.ends_with("report (3).pdf"));
        assert_eq!(fs::read_to_string(&record.dest_path).unwrap(), "new");
        assert_eq!(
            fs::read_to_string(Path::new(&dest_dir).join("report.pdf")).unwrap(),
            "old"
        );

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn apply_move_suffixes_extensionless_names() {
        let conn = test_conn();
        let base = temp_dir("noext");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");
        write_file(&Path::new(&dest_dir).join("README"), "old");
        let src = base.join("README");
        write_file(&src, "new");

        let record = apply_move(&conn, &src.to_string_lossy(), &dest_dir).unwrap();
        assert!(record.dest_path.ends_with("README (2)"));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn apply_move_rejects_unlisted_destination() {
        let conn = test_conn();
        let base = temp_dir("unlisted");
        let dest_dir = base.join("NotWhitelisted");
        fs::create_dir_all(&dest_dir).unwrap();
        let src = base.join("file.txt");
        write_file(&src, "data");

        let result = apply_move(&conn, &src.to_string_lossy(), &dest_dir.to_string_lossy());
        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(src.exists());
        assert!(repository::list_moves(&conn).unwrap().is_empty());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn apply_move_reports_missing_source() {
        let conn = test_conn();
        let base = temp_dir("gone");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");

        let missing = base.join("never_existed.txt");
        let result = apply_move(&conn, &missing.to_string_lossy(), &dest_dir);
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn apply_move_recreates_deleted_destination() {
        let conn = test_conn();
        let base = temp_dir("recreate");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");
        fs::remove_dir(&dest_dir).unwrap();
        let src = base.join("file.txt");
        write_file(&src, "data");

        let record = apply_move(&conn, &src.to_string_lossy(), &dest_dir).unwrap();
        assert!(Path::new(&record.dest_path).exists());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn undo_latest_restores_the_file_once() {
        let conn = test_conn();
        let base = temp_dir("undo_latest");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");
        let src = base.join("notes.txt");
        write_file(&src, "body");

        let record = apply_move(&conn, &src.to_string_lossy(), &dest_dir).unwrap();
        assert!(!src.exists());

        let undone = undo(&conn, None).unwrap();
        assert_eq!(undone.record_id, record.record_id);
        assert_eq!(undone.status, MoveStatus::Undone);
        assert!(src.exists());
        assert!(!Path::new(&record.dest_path).exists());

        let again = undo(&conn, None);
        assert!(matches!(again, Err(AppError::NotFound(_))));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn undo_by_id_is_single_shot() {
        let conn = test_conn();
        let base = temp_dir("undo_id");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");
        let src = base.join("a.txt");
        write_file(&src, "a");

        let record = apply_move(&conn, &src.to_string_lossy(), &dest_dir).unwrap();
        undo(&conn, Some(&record.record_id)).unwrap();

        let second = undo(&conn, Some(&record.record_id));
        assert!(matches!(second, Err(AppError::NotFound(_))));
        assert!(matches!(
            undo(&conn, Some("not-a-real-id")),
            Err(AppError::NotFound(_))
        ));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn undo_conflict_leaves_record_applied() {
        let conn = test_conn();
        let base = temp_dir("undo_conflict");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");
        let src = base.join("draft.txt");
        write_file(&src, "v1");

        let record = apply_move(&conn, &src.to_string_lossy(), &dest_dir).unwrap();
        write_file(&src, "v2");

        let result = undo(&conn, Some(&record.record_id));
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(fs::read_to_string(&src).unwrap(), "v2");
        assert!(Path::new(&record.dest_path).exists());

        let stored = repository::get_move(&conn, &record.record_id).unwrap().unwrap();
        assert_eq!(stored.status, MoveStatus::Applied);

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn undo_missing_destination_is_not_found() {
        let conn = test_conn();
        let base = temp_dir("undo_missing");
        let dest_dir = whitelist_dir(&conn, &base, "Sorted");
        let src = base.join("b.txt");
        write_file(&src, "b");

        let record = apply_move(&conn, &src.to_string_lossy(), &dest_dir).unwrap();
        fs::remove_file(&record.dest_path).unwrap();

        let result = undo(&conn, Some(&record.record_id));
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let stored = repository::get_move(&conn, &record.record_id).unwrap().unwrap();
        assert_eq!(stored.status, MoveStatus::Applied);

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn export_writes_quoted_csv() {
        let conn = test_conn();
        let base = temp_dir("export");

        repository::insert_move(
            &conn,
            &MoveRecord {
                record_id: "r1".to_string(),
                source_path: "/in/plain.txt".to_string(),
                dest_path: "/out/plain.txt".to_string(),
                status: MoveStatus::Applied,
                moved_at: "2026-08-23T10:00:00+00:00".to_string(),
            },
        )
        .unwrap();
        repository::insert_move(
            &conn,
            &MoveRecord {
                record_id: "r2".to_string(),
                source_path: "/in/with, comma.txt".to_string(),
                dest_path: "/out/with \"quote\".txt".to_string(),
                status: MoveStatus::Undone,
                moved_at: "2026-08-23T11:00:00+00:00".to_string(),
            },
        )
        .unwrap();

        let out_path = base.join("log.csv");
        let rows = export_csv(&conn, &out_path.to_string_lossy()).unwrap();
        assert_eq!(rows, 2);

        let contents = fs::read_to_string(&out_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "timestamp,source,destination,status");
        assert!(lines[1].ends_with(",applied"));
        assert!(lines[2].contains("\"/in/with, comma.txt\""));
        assert!(lines[2].contains("\"/out/with \"\"quote\"\".txt\""));
        assert!(lines[2].ends_with(",undone"));

        let _ = fs::remove_dir_all(&base);
    }
}
