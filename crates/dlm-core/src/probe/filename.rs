//! Server filename derivation: prefer `Content-Disposition`, fall back to
//! the URL path, then sanitize for the local filesystem.

use super::content_disposition::parse_content_disposition_filename;

const FALLBACK_NAME: &str = "download.bin";
const MAX_BYTES: usize = 255;

pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(parse_content_disposition_filename)
        .or_else(|| filename_from_url_path(url))
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let sanitized = sanitize_for_filesystem(&candidate);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        FALLBACK_NAME.to_string()
    } else {
        sanitized
    }
}

fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_string())
}

/// Replaces control/path characters, collapses repeated underscores, trims
/// leading/trailing separators, and truncates to 255 bytes on a char
/// boundary — the set of constraints a Linux filesystem actually enforces.
pub fn sanitize_for_filesystem(name: &str) -> String {
    let mut replaced = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\0' | '/' | '\\' | ' ' | '\t' => replaced.push('_'),
            c if c.is_control() => replaced.push('_'),
            c => replaced.push(c),
        }
    }

    let mut collapsed = String::with_capacity(replaced.len());
    let mut last_was_underscore = false;
    for c in replaced.chars() {
        if c == '_' {
            if !last_was_underscore {
                collapsed.push(c);
            }
            last_was_underscore = true;
        } else {
            collapsed.push(c);
            last_was_underscore = false;
        }
    }

    let trimmed = collapsed
        .trim_matches(|c: char| c == ' ' || c == '.' || c == '_')
        .to_string();

    truncate_on_char_boundary(&trimmed, MAX_BYTES)
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_content_disposition_over_url() {
        let name = derive_filename(
            "https://example.com/x/wrong.bin",
            Some(r#"attachment; filename="right.zip""#),
        );
        assert_eq!(name, "right.zip");
    }

    #[test]
    fn falls_back_to_url_path() {
        let name = derive_filename("https://example.com/dir/file.iso", None);
        assert_eq!(name, "file.iso");
    }

    #[test]
    fn falls_back_to_default_name_when_nothing_usable() {
        let name = derive_filename("https://example.com/", None);
        assert_eq!(name, "download.bin");
    }

    #[test]
    fn rejects_dot_and_dotdot() {
        assert_eq!(derive_filename("https://example.com/.", None), "download.bin");
    }

    #[test]
    fn sanitize_replaces_slashes_and_collapses_underscores() {
        assert_eq!(sanitize_for_filesystem("a/b\\c  d"), "a_b_c__d");
    }

    #[test]
    fn sanitize_truncates_long_names_on_char_boundary() {
        let long = "a".repeat(300);
        let out = sanitize_for_filesystem(&long);
        assert_eq!(out.len(), 255);
    }
}
