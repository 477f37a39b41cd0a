use serde::{Deserialize, Serialize};

use crate::models::move_record::MoveRecord;
use crate::models::whitelist::WhitelistEntry;

/// A newly detected file entering the triage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    pub event_id: String,
    pub file_name: String,
    pub file_path: String,
    pub extension: Option<String>,
}

/// Input to the scorer. `content_snippet` stands in for the bounded
/// content peek when the caller already read one; it is consumed under
/// the same weak-signal gate as the side-read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionRequest {
    pub file_name: String,
    pub file_path: String,
    pub extension: Option<String>,
    pub content_snippet: Option<String>,
}

impl From<&FileEvent> for SuggestionRequest {
    fn from(event: &FileEvent) -> Self {
        Self {
            file_name: event.file_name.clone(),
            file_path: event.file_path.clone(),
            extension: event.extension.clone(),
            content_snippet: None,
        }
    }
}

/// Per-term sub-scores, each already normalized to [0, 1] and unweighted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub semantic: f32,
    pub extension: f32,
    pub token: f32,
    pub recency: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionCandidate {
    pub folder: WhitelistEntry,
    pub total: f32,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub candidates: Vec<SuggestionCandidate>,
    pub confidence: f32,
    pub rationale: String,
    pub peeked: bool,
}

impl Suggestion {
    pub fn top(&self) -> Option<&SuggestionCandidate> {
        self.candidates.first()
    }
}

/// Result of a suggestion request. An empty whitelist is a normal
/// outcome, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SuggestionOutcome {
    Ranked(Suggestion),
    NoDestinations,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decision {
    Accept { folder_path: String },
    Decline,
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DecisionOutcome {
    MoveApplied { record: MoveRecord },
    MoveFailed { error: String },
    Declined,
    Ignored,
}
