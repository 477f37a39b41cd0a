use crate::error::AppError;
use crate::scope_path;
use std::path::{Component, Path};

/// Locations the engine refuses to file into or restore onto, no matter
/// what the whitelist says.
const PROTECTED_ROOTS: &[&str] = &[
    "/Applications",
    "/bin",
    "/sbin",
    "/usr",
    "/System",
    "/Library",
    "/etc",
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
];

pub fn validate_path(path: &str) -> Result<(), AppError> {
    if path.trim().is_empty() {
        return Err(AppError::Config("path is empty".to_string()));
    }

    if path.contains('\0') {
        return Err(AppError::Config("path contains a NUL byte".to_string()));
    }

    let has_traversal = Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir));
    if has_traversal {
        return Err(AppError::Config(
            "path must not contain '..' components".to_string(),
        ));
    }

    if is_protected_path(path) {
        return Err(AppError::Config(format!(
            "path is inside a protected system location: {path}"
        )));
    }

    Ok(())
}

pub fn is_protected_path(path: &str) -> bool {
    let normalized = scope_path::normalize(path.trim());
    PROTECTED_ROOTS.iter().any(|root| {
        let root_normalized = scope_path::normalize(root);
        if is_windows_style_path(&root_normalized) {
            let normalized_lower = normalized.to_ascii_lowercase();
            let root_lower = root_normalized.to_ascii_lowercase();
            normalized_lower == root_lower
                || normalized_lower.starts_with(&format!("{root_lower}/"))
        } else {
            normalized == root_normalized || normalized.starts_with(&format!("{root_normalized}/"))
        }
    })
}

fn is_windows_style_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_destinations() {
        assert!(validate_path("/Users/test/Pictures").is_ok());
        assert!(validate_path("/tmp/sorted").is_ok());
        assert!(validate_path("/home/user/docs").is_ok());
    }

    #[test]
    fn rejects_empty_and_nul() {
        assert!(validate_path("").is_err());
        assert!(validate_path("   ").is_err());
        assert!(validate_path("/tmp/\0evil").is_err());
    }

    #[test]
    fn rejects_traversal_components() {
        assert!(validate_path("/tmp/../etc").is_err());
        assert!(validate_path("../relative").is_err());
    }

    #[test]
    fn protected_roots_cover_children() {
        assert!(is_protected_path("/bin"));
        assert!(is_protected_path("/usr/local/bin"));
        assert!(is_protected_path("/System"));
        assert!(is_protected_path("C:\\Program Files (x86)\\Common Files"));
        assert!(is_protected_path("c:\\program files\\Common Files"));
        assert!(is_protected_path("C:/WINDOWS/System32"));
        assert!(!is_protected_path("/Users/test"));
        assert!(!is_protected_path("C:/Users/test"));
        assert!(!is_protected_path("/tmp"));
    }

    #[test]
    fn protected_destinations_rejected() {
        assert!(validate_path("/Users/test").is_ok());
        assert!(validate_path("/bin").is_err());
        assert!(validate_path("/System/Library").is_err());
    }
}
