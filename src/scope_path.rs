//! Textual path handling for whitelist keys and containment checks.
//! Comparisons here are deliberately lexical; callers canonicalize
//! through the filesystem only when a path must exist.

pub fn normalize(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            let home = normalize(&base.home_dir().to_string_lossy());
            if path == "~" {
                return home;
            }
            return format!("{}/{}", home, &path[2..]);
        }
    }
    path.to_string()
}

/// Canonical comparison key for whitelist paths: expanded, normalized,
/// case-folded where filesystems usually are.
pub fn dedupe_key(path: &str) -> String {
    let normalized = normalize(&expand_home(path));
    if cfg!(any(windows, target_os = "macos")) {
        normalized.to_ascii_lowercase()
    } else {
        normalized
    }
}

pub fn parent_dir(path: &str) -> Option<String> {
    let normalized = normalize(path);
    std::path::Path::new(&normalized)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty())
}

/// True when `path` equals `root` or sits anywhere below it.
pub fn is_within_scope(path: &str, root: &str) -> bool {
    let path = dedupe_key(path);
    let root = dedupe_key(root);

    if path == root {
        return true;
    }

    if root == "/" {
        return path.starts_with('/');
    }

    path.starts_with(&(root + "/"))
}
