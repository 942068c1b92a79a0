//! Label dimensions: sanitization and address/program splitting.

use once_cell::sync::Lazy;
use regex::Regex;

/// Characters allowed in label values; everything else becomes `_`.
static RE_DISALLOWED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^A-Za-z0-9_/+:@{}&%<>*\\.,()\[\]-]").expect("label sanitizer regex")
});

/// Program-name suffix appended by connection brokers, stripped before
/// sanitization.
const BROKERED_SUFFIX: &str = " (brokered)";

/// Replace every character outside the allowed set with `_`. Idempotent.
pub fn sanitize_label_value(s: &str) -> String {
    RE_DISALLOWED.replace_all(s, "_").into_owned()
}

/// Strip the broker suffix from a program name.
pub fn strip_brokered(program: &str) -> &str {
    program.strip_suffix(BROKERED_SUFFIX).unwrap_or(program)
}

/// Split a client address into (relay upstream, origin).
///
/// Relayed connections arrive as `upstream/origin`; direct connections have
/// no upstream half.
pub fn split_relay(ip: &str) -> (Option<&str>, &str) {
    match ip.split_once('/') {
        Some((upstream, origin)) => (Some(upstream), origin),
        None => (None, ip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passes_allowed_characters() {
        let s = "p4/2016.2/LINUX26X86_64+a:b@c{d}&e%f<g>h*i,j(k)[l]-m\\n";
        assert_eq!(sanitize_label_value(s), s);
    }

    #[test]
    fn test_sanitize_replaces_disallowed() {
        assert_eq!(sanitize_label_value("a b"), "a_b");
        assert_eq!(sanitize_label_value("a\"b"), "a_b");
        assert_eq!(sanitize_label_value("tab\there"), "tab_here");
        assert_eq!(sanitize_label_value("nl\nhere"), "nl_here");
        assert_eq!(sanitize_label_value("smörgås"), "sm_rg_s");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let once = sanitize_label_value("hello world\"!");
        assert_eq!(sanitize_label_value(&once), once);
    }

    #[test]
    fn test_strip_brokered() {
        assert_eq!(strip_brokered("p4v/2020.1 (brokered)"), "p4v/2020.1");
        assert_eq!(strip_brokered("p4v/2020.1"), "p4v/2020.1");
    }

    #[test]
    fn test_split_relay() {
        assert_eq!(
            split_relay("127.0.0.1/10.40.48.29"),
            (Some("127.0.0.1"), "10.40.48.29")
        );
        assert_eq!(split_relay("10.1.1.1"), (None, "10.1.1.1"));
    }
}
