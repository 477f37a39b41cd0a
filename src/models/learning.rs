use serde::{Deserialize, Serialize};

/// One learned weight row, folder resolved to its path for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEntry {
    pub key: String,
    pub folder_path: String,
    pub weight: f32,
}

/// Inspectable snapshot of the engine's learned state.
/// `embeddings_available` is `None` until the provider has been tried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub whitelist_count: i64,
    pub embeddings_available: Option<bool>,
    pub top_extensions: Vec<WeightEntry>,
    pub top_tokens: Vec<WeightEntry>,
}

/// Optional cold-start rules imported once while the weight tables are
/// still empty. Folder paths must already be whitelisted to take effect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedRules {
    #[serde(default)]
    pub rules: Vec<SeedRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRule {
    pub folder: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}
