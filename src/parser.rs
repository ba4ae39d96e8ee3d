//! Console line handling - turns raw server output into structured records
//!
//! - `classify` separates fatal/JVM lines from regular log lines
//! - `parse_line` applies the `[time] [source/LEVEL]: text` grammar

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

// ─── Log Record ──────────────────────────────────────────────

/// One parsed console line.
///
/// Lines that do not follow the log grammar keep only `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub timestamp: Option<String>,
    pub source: Option<String>,
    pub level: Option<String>,
    pub text: String,
}

impl LogRecord {
    /// Record for a line that did not match the grammar.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            source: None,
            level: None,
            text: text.into(),
        }
    }

    pub fn level_is(&self, level: &str) -> bool {
        self.level.as_deref() == Some(level)
    }

    pub fn source_is(&self, source: &str) -> bool {
        self.source.as_deref() == Some(source)
    }
}

// example: [15:48:42] [Server thread/INFO]: Preparing start region for level 0
fn log_grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[([\d:]+)\]\s\[([\w\s#]+)/(\w+)\]:\s(.+)$").expect("log grammar pattern")
    })
}

/// Parse one console line. Never fails: a mismatch yields a raw record.
pub fn parse_line(line: &str) -> LogRecord {
    let line = line.trim();
    match log_grammar().captures(line) {
        Some(caps) => LogRecord {
            timestamp: Some(caps[1].to_string()),
            source: Some(caps[2].to_string()),
            level: Some(caps[3].to_string()),
            text: caps[4].to_string(),
        },
        None => LogRecord::raw(line),
    }
}

// ─── Classification ──────────────────────────────────────────

/// What kind of console line arrived, decided before grammar parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Uncaught `Error...` / `Exception...` output from the JVM
    Fatal(String),
    /// JVM banner or stack trace continuation
    Java(String),
    /// Regular server log output
    Log(LogRecord),
}

pub fn classify(line: &str) -> LineKind {
    if line.starts_with("Error") || line.starts_with("Exception") {
        LineKind::Fatal(line.trim().to_string())
    } else if line.starts_with("java") || line.starts_with(char::is_whitespace) {
        LineKind::Java(line.to_string())
    } else {
        LineKind::Log(parse_line(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_grammar() {
        let record = parse_line("[15:48:42] [Server thread/INFO]: Preparing start region for level 0");
        assert_eq!(record.timestamp.as_deref(), Some("15:48:42"));
        assert_eq!(record.source.as_deref(), Some("Server thread"));
        assert_eq!(record.level.as_deref(), Some("INFO"));
        assert_eq!(record.text, "Preparing start region for level 0");
    }

    #[test]
    fn parses_authenticator_source() {
        let record = parse_line("[10:00:00] [User Authenticator #1/INFO]: UUID of player Alice is 1234");
        assert_eq!(record.source.as_deref(), Some("User Authenticator #1"));
        assert!(record.level_is("INFO"));
    }

    #[test]
    fn trims_before_matching() {
        let record = parse_line("  [12:00:00] [Server thread/WARN]: Can't keep up!\r\n");
        assert!(record.level_is("WARN"));
        assert_eq!(record.text, "Can't keep up!");
    }

    #[test]
    fn falls_back_to_raw_text() {
        let record = parse_line("  Loading libraries, please wait...  ");
        assert_eq!(record, LogRecord::raw("Loading libraries, please wait..."));

        // missing text after the colon is not the grammar
        let record = parse_line("[12:00:00] [Server thread/INFO]: ");
        assert!(record.level.is_none());
        assert_eq!(record.text, "[12:00:00] [Server thread/INFO]:");
    }

    #[test]
    fn empty_line_yields_empty_text() {
        assert_eq!(parse_line(""), LogRecord::raw(""));
        assert_eq!(parse_line("   "), LogRecord::raw(""));
    }

    #[test]
    fn classifies_fatal_and_java_lines() {
        assert_eq!(
            classify("Exception in thread \"main\" java.lang.OutOfMemoryError"),
            LineKind::Fatal("Exception in thread \"main\" java.lang.OutOfMemoryError".into())
        );
        assert!(matches!(classify("Error: Unable to access jarfile server.jar"), LineKind::Fatal(_)));
        assert!(matches!(classify("java.lang.NullPointerException"), LineKind::Java(_)));
        assert!(matches!(classify("\tat net.minecraft.server.Main"), LineKind::Java(_)));
        assert!(matches!(classify("[12:00:00] [Server thread/INFO]: hi"), LineKind::Log(_)));
    }
}
