//! Helpers for sanitizing filenames and data entering tracing span attributes.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields — reveals file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces a client-supplied filename to a safe basename.
///
/// Strips directory components (both separators), drops control characters,
/// and never returns an empty or dots-only name. Used when materializing
/// inputs into the per-job working directory so a declared name like
/// `../../etc/passwd` cannot escape it.
pub fn safe_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();

    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        cleaned.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/home/user/uploads/invoice.pdf")),
            "invoice.pdf"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_redact_path_relative() {
        assert_eq!(redact_path(&PathBuf::from("a/b/c.txt")), "c.txt");
    }

    #[test]
    fn test_safe_filename_strips_directories() {
        assert_eq!(safe_filename("../../etc/passwd"), "passwd");
        assert_eq!(safe_filename("C:\\Users\\x\\doc.pdf"), "doc.pdf");
        assert_eq!(safe_filename("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_safe_filename_never_empty() {
        assert_eq!(safe_filename(""), "file");
        assert_eq!(safe_filename("..."), "file");
        assert_eq!(safe_filename("a/b/"), "file");
    }

    #[test]
    fn test_safe_filename_drops_control_chars() {
        assert_eq!(safe_filename("bad\u{0}name.txt"), "badname.txt");
    }
}
