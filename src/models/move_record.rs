use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveStatus {
    Applied,
    Undone,
}

impl std::fmt::Display for MoveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Undone => write!(f, "undone"),
        }
    }
}

impl std::str::FromStr for MoveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(Self::Applied),
            "undone" => Ok(Self::Undone),
            _ => Err(format!("unknown move status: {s}")),
        }
    }
}

/// One committed move transaction. Created only after the filesystem
/// rename has succeeded; flips to `undone` at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRecord {
    pub record_id: String,
    pub source_path: String,
    pub dest_path: String,
    pub status: MoveStatus,
    pub moved_at: String,
}
