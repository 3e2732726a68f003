use regex::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Whitespace, control characters and shell/HTML metacharacters. Never valid
// in a URL we are willing to fetch, and never allowed into a log line.
regex!(FORBIDDEN_CHARS, r#"[ \t\n\r\x00-\x1f\x7f"'`;|&$<>\\]"#);
regex!(DISPOSITION_FILENAME, r#"(?i)filename\*?\s*=\s*(?:UTF-8'[^']*')?"?([^";]+)"?"#);

const LOG_LIMIT: usize = 200;
const FILENAME_LIMIT: usize = 128;
pub const FALLBACK_FILENAME: &str = "module";

pub(crate) fn has_forbidden_chars(raw: &str) -> bool {
    FORBIDDEN_CHARS.is_match(raw)
}

/// Make a user-supplied URL safe to interpolate into a log line: forbidden
/// characters removed, trimmed, and cut to 200 characters.
pub fn sanitize_for_log(raw: &str) -> String {
    let cleaned = FORBIDDEN_CHARS.replace_all(raw, "");
    let cleaned = cleaned.trim();
    match cleaned.char_indices().nth(LOG_LIMIT) {
        Some((cut, _)) => format!("{}...", &cleaned[..cut]),
        None => cleaned.to_string(),
    }
}

/// Reduce an untrusted name to `[A-Za-z0-9._-]`, with no leading dots, so it
/// can be used as a single path component.
pub fn sanitize_filename(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let mapped: String = name
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => c,
            c if c.is_whitespace() => '_',
            _ => '\0',
        })
        .filter(|c| *c != '\0')
        .collect();
    let trimmed = mapped.trim_start_matches(['.', '_']).trim_end_matches('.');
    let truncated: String = trimmed.chars().take(FILENAME_LIMIT).collect();
    match truncated.is_empty() {
        true => FALLBACK_FILENAME.to_string(),
        false => truncated,
    }
}

/// File name announced by a `Content-Disposition` header, if any.
pub(crate) fn disposition_filename(header: &str) -> Option<String> {
    let raw = DISPOSITION_FILENAME.captures(header)?.get(1)?.as_str().trim();
    let decoded = url::form_urlencoded::parse(format!("n={raw}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| raw.to_string());
    Some(sanitize_filename(&decoded)).filter(|name| name != FALLBACK_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://example.com/a b", "https://example.com/ab")]
    #[case("  https://example.com/x\r\nINJECTED  ", "https://example.com/xINJECTED")]
    #[case("http://a/$(id);|&", "http://a/(id)")]
    fn test_sanitize_for_log(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_for_log(raw), expected);
    }

    #[test]
    fn test_sanitize_for_log_truncates() {
        let long = format!("https://example.com/{}", "a".repeat(500));
        let cleaned = sanitize_for_log(&long);
        assert_eq!(cleaned.len(), 203);
        assert!(cleaned.ends_with("..."));
    }

    #[rstest]
    #[case("space debris.mod", "space_debris.mod")]
    #[case("../../etc/passwd", "passwd")]
    #[case("..\\..\\boot.ini", "boot.ini")]
    #[case(".hidden", "hidden")]
    #[case("mdat.Storm", "mdat.Storm")]
    #[case("über;rm -rf.mod", "berrm_-rf.mod")]
    #[case("", "module")]
    #[case("...", "module")]
    fn test_sanitize_filename(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_filename(raw), expected);
    }

    #[rstest]
    #[case(r#"attachment; filename="L_E_D_Storm.lha""#, Some("L_E_D_Storm.lha"))]
    #[case("attachment; filename=song.mod", Some("song.mod"))]
    #[case("attachment; filename*=UTF-8''space%20debris.mod", Some("space_debris.mod"))]
    #[case("inline", None)]
    fn test_disposition_filename(#[case] header: &str, #[case] expected: Option<&str>) {
        assert_eq!(disposition_filename(header).as_deref(), expected);
    }
}
