use serde::{Deserialize, Serialize};

/// A user-approved destination folder. `position` preserves insertion
/// order and is the deterministic tie-break key when totals are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub id: i64,
    pub path: String,
    pub description: String,
    pub position: i64,
    pub added_at: String,
}

impl WhitelistEntry {
    /// Display name for the folder, used in embedding text and rationale.
    pub fn name(&self) -> &str {
        std::path::Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(self.path.as_str())
    }
}
