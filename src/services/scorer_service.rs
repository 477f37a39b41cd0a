use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;

use crate::data::repository;
use crate::error::AppError;
use crate::models::suggestion::{
    ScoreBreakdown, Suggestion, SuggestionCandidate, SuggestionOutcome, SuggestionRequest,
};
use crate::models::whitelist::WhitelistEntry;
use crate::scope_path;
use crate::services::embedding_service::{cosine_similarity, EmbeddingIndex};
use crate::services::{learning_service, peek_service};

pub const SEMANTIC_WEIGHT: f32 = 0.60;
pub const EXTENSION_WEIGHT: f32 = 0.45;
pub const TOKEN_WEIGHT: f32 = 0.35;
pub const RECENCY_WEIGHT: f32 = 0.20;

const CONFIDENCE_BASE: f32 = 0.58;
const CONFIDENCE_GAP_SCALE: f32 = 5.0;
const CONFIDENCE_MIN: f32 = 0.50;
const CONFIDENCE_MAX: f32 = 0.99;

/// Best filename-derived total below this counts as a weak signal and
/// arms the content peek for peekable extensions.
const WEAK_SIGNAL_THRESHOLD: f32 = 0.35;

/// Content tokens count for less than filename tokens.
const CONTENT_TOKEN_SCALE: f32 = 0.45;
const MAX_CONTENT_TOKENS: usize = 20;

const MAX_CANDIDATES: usize = 3;
const RATIONALE_DESC_CHARS: usize = 40;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "img", "screen", "shot", "copy", "final", "new", "old",
];

/// ASCII-alphanumeric runs, lowercased; short runs, bare numbers, and
/// stopwords are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| token.len() >= 3)
        .filter(|token| !token.chars().all(|c| c.is_ascii_digit()))
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .collect()
}

pub(crate) fn normalized_extension(request: &SuggestionRequest) -> Option<String> {
    let raw = request.extension.clone().or_else(|| {
        Path::new(&request.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
    })?;
    let ext = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

pub(crate) fn confidence_from_totals(best: f32, runner_up: f32) -> f32 {
    let gap = best - runner_up;
    (CONFIDENCE_BASE + gap / CONFIDENCE_GAP_SCALE).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
}

struct RawScores {
    semantic: HashMap<i64, f32>,
    extension: HashMap<i64, f32>,
    token: HashMap<i64, f32>,
    recency: HashMap<i64, f32>,
}

/// Ranks whitelist folders for one file. Read-only against the store;
/// the embedding index degrades to a zero semantic term when the
/// provider is down. The folder the file already sits in is excluded.
/// The content peek fires only for peekable extensions whose
/// filename-derived ranking is weak, and its text is used for this one
/// request only.
pub fn suggest(
    conn: &Connection,
    index: &EmbeddingIndex,
    request: &SuggestionRequest,
    recency_window_secs: i64,
) -> Result<SuggestionOutcome, AppError> {
    let source_dir = scope_path::parent_dir(&request.file_path).map(|d| scope_path::dedupe_key(&d));
    let folders: Vec<WhitelistEntry> = repository::list_folders(conn)?
        .into_iter()
        .filter(|folder| match source_dir.as_deref() {
            Some(dir) => scope_path::dedupe_key(&folder.path) != dir,
            None => true,
        })
        .collect();
    if folders.is_empty() {
        return Ok(SuggestionOutcome::NoDestinations);
    }

    let extension = normalized_extension(request);
    let tokens = tokenize(&request.file_name);

    let mut raw = RawScores {
        semantic: HashMap::new(),
        extension: HashMap::new(),
        token: HashMap::new(),
        recency: HashMap::new(),
    };

    if let Some(ext) = extension.as_deref() {
        raw.extension = repository::ext_weights_for(conn, ext)?.into_iter().collect();
    }
    raw.token = repository::token_weights_for(conn, &tokens)?.into_iter().collect();

    if let Some(sig) = learning_service::signature(extension.as_deref(), &tokens) {
        if let Some((folder_id, filed_at)) = repository::get_recency(conn, &sig)? {
            let score = learning_service::recency_score(&filed_at, recency_window_secs);
            if score > 0.0 {
                raw.recency.insert(folder_id, score);
            }
        }
    }

    let query_text = compose_query(&request.file_name, &tokens, None);
    fill_semantic(&mut raw.semantic, index, &folders, &query_text);

    // filename-only pass decides whether the peek is worth a disk read
    let mut candidates = rank(&folders, &raw);
    let best_total = candidates.first().map(|c| c.total).unwrap_or(0.0);

    let mut peeked = false;
    if best_total < WEAK_SIGNAL_THRESHOLD && peek_service::is_peekable(extension.as_deref()) {
        let snippet = request
            .content_snippet
            .clone()
            .or_else(|| peek_service::peek(&request.file_path));
        if let Some(snippet) = snippet {
            peeked = true;
            let content_tokens: Vec<String> = tokenize(&snippet)
                .into_iter()
                .take(MAX_CONTENT_TOKENS)
                .collect();

            for (folder_id, sum) in repository::token_weights_for(conn, &content_tokens)? {
                *raw.token.entry(folder_id).or_insert(0.0) += CONTENT_TOKEN_SCALE * sum;
            }

            let query_text = compose_query(&request.file_name, &tokens, Some(&snippet));
            fill_semantic(&mut raw.semantic, index, &folders, &query_text);

            candidates = rank(&folders, &raw);
        }
    }

    let best = candidates.first().map(|c| c.total).unwrap_or(0.0);
    let runner_up = candidates.get(1).map(|c| c.total).unwrap_or(0.0);
    let confidence = confidence_from_totals(best, runner_up);

    let rationale = match candidates.first() {
        Some(top) => build_rationale(conn, top, extension.as_deref(), &tokens, peeked)?,
        None => "weak signals only".to_string(),
    };

    candidates.truncate(MAX_CANDIDATES);

    tracing::debug!(
        "ranked {} candidates for {} (best {:.3}, confidence {:.2})",
        candidates.len(),
        request.file_name,
        best,
        confidence
    );

    Ok(SuggestionOutcome::Ranked(Suggestion {
        candidates,
        confidence,
        rationale,
        peeked,
    }))
}

fn compose_query(file_name: &str, tokens: &[String], snippet: Option<&str>) -> String {
    let mut query = format!("{} {}", file_name, tokens.join(" "));
    if let Some(snippet) = snippet {
        query.push(' ');
        query.push_str(snippet);
    }
    query
}

fn fill_semantic(
    semantic: &mut HashMap<i64, f32>,
    index: &EmbeddingIndex,
    folders: &[WhitelistEntry],
    query_text: &str,
) {
    semantic.clear();
    let Some(query) = index.embed_query(query_text) else {
        return;
    };
    for folder in folders {
        if let Some(vector) = index.embedding_for(folder) {
            let similarity = cosine_similarity(&query, &vector).max(0.0);
            if similarity > 0.0 {
                semantic.insert(folder.id, similarity.min(1.0));
            }
        }
    }
}

/// Weighted blend of the four terms. Extension and token terms are
/// normalized by the maximum raw value across candidates so each lands
/// in [0, 1]; semantic and recency arrive already bounded.
fn rank(folders: &[WhitelistEntry], raw: &RawScores) -> Vec<SuggestionCandidate> {
    let max_ext = max_value(&raw.extension);
    let max_tok = max_value(&raw.token);

    let mut candidates: Vec<SuggestionCandidate> = folders
        .iter()
        .map(|folder| {
            let breakdown = ScoreBreakdown {
                semantic: raw.semantic.get(&folder.id).copied().unwrap_or(0.0),
                extension: normalized(&raw.extension, folder.id, max_ext),
                token: normalized(&raw.token, folder.id, max_tok),
                recency: raw.recency.get(&folder.id).copied().unwrap_or(0.0),
            };
            let total = SEMANTIC_WEIGHT * breakdown.semantic
                + EXTENSION_WEIGHT * breakdown.extension
                + TOKEN_WEIGHT * breakdown.token
                + RECENCY_WEIGHT * breakdown.recency;
            SuggestionCandidate {
                folder: folder.clone(),
                total,
                breakdown,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.total
            .total_cmp(&a.total)
            .then(a.folder.position.cmp(&b.folder.position))
    });
    candidates
}

fn max_value(map: &HashMap<i64, f32>) -> f32 {
    map.values().copied().fold(0.0, f32::max)
}

fn normalized(map: &HashMap<i64, f32>, folder_id: i64, max: f32) -> f32 {
    if max <= 0.0 {
        return 0.0;
    }
    (map.get(&folder_id).copied().unwrap_or(0.0) / max).clamp(0.0, 1.0)
}

fn build_rationale(
    conn: &Connection,
    top: &SuggestionCandidate,
    extension: Option<&str>,
    tokens: &[String],
    peeked: bool,
) -> Result<String, AppError> {
    let mut parts: Vec<String> = Vec::new();

    if peeked {
        parts.push("content peek used".to_string());
    }
    if top.breakdown.semantic > 0.0 {
        let description: String = top
            .folder
            .description
            .chars()
            .take(RATIONALE_DESC_CHARS)
            .collect();
        let label = if description.trim().is_empty() {
            top.folder.name().to_string()
        } else {
            description.trim().to_string()
        };
        parts.push(format!("semantic match to \"{label}\""));
    }
    if top.breakdown.extension > 0.0 {
        if let Some(ext) = extension {
            parts.push(format!("extension .{ext} seen before"));
        }
    }
    if top.breakdown.token > 0.0 {
        let matched = repository::known_tokens_for_folder(conn, top.folder.id, tokens)?;
        if !matched.is_empty() {
            parts.push(format!("keywords matched: {}", matched.join(", ")));
        }
    }
    if top.breakdown.recency > 0.0 {
        parts.push("recent similar files".to_string());
    }

    if parts.is_empty() {
        return Ok("weak signals only".to_string());
    }
    Ok(parts.join("; "))
}
