//! Parser for TinyCC-style messages.
//!
//! Recognized shapes:
//! - `file.c:12: error: message`
//! - `<string>:3: warning: message`
//! - `tcc: error: message` (no location)
//! - `In file included from file.c:1:` (turned into a note)

use crate::{Diagnostic, ErrorLevel, Span};

const LEVELS: &[(&str, ErrorLevel)] = &[
    (": error: ", ErrorLevel::Error),
    (": warning: ", ErrorLevel::Warning),
    (": note: ", ErrorLevel::Note),
];

const INCLUDED_FROM: &str = "In file included from ";

pub fn parse_compiler_message(raw: &str) -> Diagnostic {
    let text = raw.trim_end();

    if let Some(location) = text.strip_prefix(INCLUDED_FROM) {
        let location = location.trim_end_matches(':');
        return Diagnostic::new(
            ErrorLevel::Note,
            format!("included from {}", location),
            parse_location(location),
        );
    }

    for (marker, level) in LEVELS {
        if let Some(idx) = text.find(marker) {
            let location = &text[..idx];
            let message = &text[idx + marker.len()..];
            return Diagnostic::new(*level, message.trim(), parse_location(location));
        }
    }

    // Bare "error: x" / "warning: x" without a location prefix
    for (marker, level) in LEVELS {
        let bare = marker.trim_start_matches(": ");
        if let Some(message) = text.strip_prefix(bare) {
            return Diagnostic::new(*level, message.trim(), Span::unknown());
        }
    }

    Diagnostic::error(text, Span::unknown())
}

/// Split a multi-line compiler dump into diagnostics, skipping blank lines.
pub fn parse_compiler_output(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_compiler_message)
        .collect()
}

fn parse_location(location: &str) -> Span {
    // Windows paths contain ':' too, so the line number is taken from the right.
    if let Some((file, line)) = location.rsplit_once(':') {
        if let Ok(line) = line.trim().parse::<usize>() {
            // gcc-style file:line:col
            if let Some((file2, maybe_line)) = file.rsplit_once(':') {
                if let Ok(real_line) = maybe_line.trim().parse::<usize>() {
                    return Span::new(file2, real_line, line, 1);
                }
            }
            return Span::line(file, line);
        }
    }
    Span::unknown()
}

#[cfg(test)]
mod parse_tests {
    use super::*;

    #[test]
    fn test_located_error() {
        let d = parse_compiler_message("demo.c:12: error: 'x' undeclared\n");
        assert_eq!(d.level, ErrorLevel::Error);
        assert_eq!(d.message, "'x' undeclared");
        assert_eq!(d.span, Span::line("demo.c", 12));
    }

    #[test]
    fn test_string_source_warning() {
        let d = parse_compiler_message("<string>:3: warning: assignment makes integer from pointer");
        assert_eq!(d.level, ErrorLevel::Warning);
        assert_eq!(d.span.file, "<string>");
        assert_eq!(d.span.line, 3);
    }

    #[test]
    fn test_unlocated_error() {
        let d = parse_compiler_message("tcc: error: undefined symbol 'nope'");
        assert_eq!(d.level, ErrorLevel::Error);
        assert_eq!(d.message, "undefined symbol 'nope'");
        assert!(!d.span.is_known());
    }

    #[test]
    fn test_windows_path_and_column() {
        let d = parse_compiler_message(r"C:\src\m.c:4: error: bad");
        assert_eq!(d.span.file, r"C:\src\m.c");
        assert_eq!(d.span.line, 4);

        let d = parse_compiler_message("m.c:4:9: error: bad");
        assert_eq!(d.span, Span::new("m.c", 4, 9, 1));
    }

    #[test]
    fn test_include_chain_and_plain_text() {
        let d = parse_compiler_message("In file included from main.c:1:");
        assert_eq!(d.level, ErrorLevel::Note);
        assert_eq!(d.span, Span::line("main.c", 1));

        let d = parse_compiler_message("something odd happened");
        assert_eq!(d.level, ErrorLevel::Error);
        assert_eq!(d.message, "something odd happened");

        let all = parse_compiler_output("a.c:1: error: x\n\n  \nb.c:2: warning: y\n");
        assert_eq!(all.len(), 2);
    }
}
