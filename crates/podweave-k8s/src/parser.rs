use chrono::{DateTime, Utc};

use podweave_types::LogLine;

/// Splits the timestamp prefix the API server adds to every log line
pub struct LineParser;

impl LineParser {
    /// Parse a raw line requested with `timestamps=true`.
    ///
    /// Lines without a readable RFC 3339 prefix are kept whole and stamped
    /// with the current time.
    pub fn parse(raw: &str) -> LogLine {
        let raw = raw.trim_end_matches('\r');
        let (prefix, text) = raw.split_once(' ').unwrap_or((raw, ""));

        match DateTime::parse_from_rfc3339(prefix) {
            Ok(ts) => LogLine::new(ts.with_timezone(&Utc), text),
            Err(_) => LogLine::new(Utc::now(), raw),
        }
    }

    /// Parse one raw line as read off the wire, newline included.
    ///
    /// Container output is not guaranteed to be UTF-8; invalid bytes are
    /// replaced rather than failing the stream.
    pub fn parse_bytes(raw: &[u8]) -> LogLine {
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        Self::parse(&String::from_utf8_lossy(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_k8s_timestamp() {
        let line = "2024-01-15T10:30:00.123456789Z some log message";
        let parsed = LineParser::parse(line);
        assert_eq!(
            parsed.timestamp,
            DateTime::parse_from_rfc3339("2024-01-15T10:30:00.123456789Z").unwrap()
        );
        assert_eq!(parsed.text, "some log message");
    }

    #[test]
    fn test_keeps_inner_spaces() {
        let parsed = LineParser::parse("2024-01-15T10:30:00Z  indented  text ");
        assert_eq!(parsed.text, " indented  text ");
    }

    #[test]
    fn test_timestamp_only() {
        let parsed = LineParser::parse("2024-01-15T10:30:00Z\r");
        assert_eq!(parsed.timestamp.to_rfc3339(), "2024-01-15T10:30:00+00:00");
        assert_eq!(parsed.text, "");
    }

    #[test]
    fn test_missing_timestamp_uses_now() {
        let before = Utc::now();
        let parsed = LineParser::parse("no timestamp here");
        assert!(parsed.timestamp >= before);
        assert_eq!(parsed.text, "no timestamp here");
    }

    #[test]
    fn test_parse_bytes_replaces_invalid_utf8() {
        let parsed = LineParser::parse_bytes(b"2024-01-15T10:30:00Z latin \xe9t\xe9 \xff\n");
        assert_eq!(parsed.timestamp.to_rfc3339(), "2024-01-15T10:30:00+00:00");
        assert_eq!(parsed.text, "latin \u{FFFD}t\u{FFFD} \u{FFFD}");
    }

    #[test]
    fn test_parse_bytes_strips_line_ending() {
        let parsed = LineParser::parse_bytes(b"2024-01-15T10:30:00Z done\r\n");
        assert_eq!(parsed.text, "done");

        let parsed = LineParser::parse_bytes(b"2024-01-15T10:30:00Z no newline at eof");
        assert_eq!(parsed.text, "no newline at eof");
    }

    #[test]
    fn test_parse_multibyte_utf8_no_panic() {
        let parsed = LineParser::parse("─────────────────────────────────────────");
        assert_eq!(parsed.text, "─────────────────────────────────────────");

        let parsed = LineParser::parse("2024-01-15T10:30:00Z ╭────────────────────────────╮");
        assert_eq!(parsed.text, "╭────────────────────────────╮");
    }
}
