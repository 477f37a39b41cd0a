use std::io::Read;

/// Extensions always eligible for a content peek, plus anything
/// `mime_guess` resolves to text/plain. Kept deliberately small; the
/// peek exists to rescue weak filename signals, not to analyze content.
const PEEK_EXTENSIONS: &[&str] = &["txt", "md", "rtf"];

const MAX_PEEK_BYTES: u64 = 64 * 1024;
const MAX_PEEK_CHARS: usize = 2000;

pub fn is_peekable(extension: Option<&str>) -> bool {
    let Some(ext) = extension else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    if PEEK_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }
    mime_guess::from_ext(&ext)
        .first()
        .map(|mime| {
            mime.type_() == mime_guess::mime::TEXT && mime.subtype() == mime_guess::mime::PLAIN
        })
        .unwrap_or(false)
}

/// Reads a bounded prefix of the file: at most `MAX_PEEK_BYTES` from
/// disk, then capped to `MAX_PEEK_CHARS` characters after lossy
/// decoding. The result is never cached or persisted.
pub fn peek(path: &str) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut buf = Vec::new();
    file.take(MAX_PEEK_BYTES).read_to_end(&mut buf).ok()?;
    if buf.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(&buf);
    let snippet: String = text.chars().take(MAX_PEEK_CHARS).collect();
    let trimmed = snippet.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
