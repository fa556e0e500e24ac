//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Uploaded file names are user data; spans and log fields only ever carry
//! the final path component or a short hash.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns a short deterministic hash of a path for correlation without
/// exposing the actual path.
pub fn hash_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Truncates tool output to a size that is safe to persist as an error
/// message. Cuts on a char boundary and keeps the tail, where tools usually
/// print the actual failure.
pub fn truncate_output(output: &str, max_len: usize) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max_len;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(&PathBuf::from("/srv/uploads/user-42/track.wav")),
            "track.wav"
        );
    }

    #[test]
    fn test_redact_path_without_filename() {
        assert_eq!(redact_path(&PathBuf::from("/")), "<unknown>");
    }

    #[test]
    fn test_hash_path_is_deterministic() {
        let path = PathBuf::from("/srv/uploads/track.wav");
        assert_eq!(hash_path(&path), hash_path(&path));
        assert_eq!(hash_path(&path).len(), 16);
        assert_ne!(hash_path(&path), hash_path(&PathBuf::from("/other.wav")));
    }

    #[test]
    fn test_truncate_output_short_input_untouched() {
        assert_eq!(truncate_output("  boom \n", 100), "boom");
    }

    #[test]
    fn test_truncate_output_keeps_tail() {
        let long = format!("{}fatal: clipping detected", "x".repeat(500));
        let truncated = truncate_output(&long, 24);
        assert!(truncated.starts_with("..."));
        assert!(truncated.ends_with("fatal: clipping detected"));
    }

    #[test]
    fn test_truncate_output_respects_char_boundaries() {
        let text = "ééééé";
        let truncated = truncate_output(text, 3);
        assert!(truncated.starts_with("..."));
        assert!(truncated.ends_with('é'));
    }
}
