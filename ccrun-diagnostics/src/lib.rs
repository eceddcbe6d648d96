// Diagnostics for ccrun
// Turns raw compiler messages into structured diagnostics and renders them
// with source snippets and colors.

use colored::Colorize;
use std::fmt;

pub mod fuzzy;
pub mod line_map;
pub mod parse;

pub use line_map::LineMap;
pub use parse::{parse_compiler_message, parse_compiler_output};

/// Source code location (file, line, column)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(file: impl Into<String>, line: usize, column: usize, length: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            length,
        }
    }

    /// Whole-line span; the C compiler only reports line numbers.
    pub fn line(file: impl Into<String>, line: usize) -> Self {
        Self::new(file, line, 0, 0)
    }

    pub fn unknown() -> Self {
        Self::new("<unknown>", 0, 0, 0)
    }

    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.line, self.column) {
            (0, _) => write!(f, "{}", self.file),
            (line, 0) => write!(f, "{}:{}", self.file, line),
            (line, column) => write!(f, "{}:{}:{}", self.file, line, column),
        }
    }
}

/// Severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Error,
    Warning,
    Note,
    Help,
}

impl ErrorLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorLevel::Error => "error",
            ErrorLevel::Warning => "warning",
            ErrorLevel::Note => "note",
            ErrorLevel::Help => "help",
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorLevel::Error => write!(f, "{}", "error".red().bold()),
            ErrorLevel::Warning => write!(f, "{}", "warning".yellow().bold()),
            ErrorLevel::Note => write!(f, "{}", "note".cyan().bold()),
            ErrorLevel::Help => write!(f, "{}", "help".green().bold()),
        }
    }
}

/// Structured diagnostic message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: ErrorLevel,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(level: ErrorLevel, message: impl Into<String>, span: Span) -> Self {
        Self {
            level,
            message: message.into(),
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorLevel::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorLevel::Warning, message, span)
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Symbol named in an "undefined symbol 'x'" style message.
    pub fn undefined_symbol(&self) -> Option<&str> {
        let rest = self.message.strip_prefix("undefined symbol ")?;
        Some(rest.trim_matches(|c| c == '\'' || c == '"' || c == '`'))
    }

    /// Format with a snippet taken from `source_code` when the span points into it.
    pub fn format(&self, source_code: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("{}: {}\n", self.level, self.message.bold()));

        if self.span.is_known() {
            output.push_str(&format!(" {} {}\n", "-->".cyan().bold(), self.span));
        }

        if let Some(snippet) = self.source_snippet(source_code) {
            output.push_str(&snippet);
        }

        for note in &self.notes {
            output.push_str(&format!(" {} {}\n", "=".cyan().bold(), note.cyan()));
        }

        if let Some(help) = &self.help {
            output.push_str(&format!(" {} {}\n", "help:".green().bold(), help));
        }

        output
    }

    fn source_snippet(&self, source_code: &str) -> Option<String> {
        let line_idx = self.span.line.checked_sub(1)?;
        let line = source_code.lines().nth(line_idx)?;

        let line_num_width = self.span.line.to_string().len().max(2);
        let gutter = " ".repeat(line_num_width + 1);

        let mut snippet = String::new();
        snippet.push_str(&format!(" {}\n", gutter.cyan()));
        snippet.push_str(&format!(
            " {} {} {}\n",
            format!("{:>width$}", self.span.line, width = line_num_width)
                .cyan()
                .bold(),
            "|".cyan().bold(),
            line
        ));

        if self.span.column > 0 {
            let padding = " ".repeat(self.span.column - 1);
            let underline = "^".repeat(self.span.length.max(1));
            snippet.push_str(&format!(
                " {} {}{}\n",
                gutter.cyan(),
                padding,
                underline.red().bold()
            ));
        } else {
            // No column: underline the trimmed line.
            let indent = line.len() - line.trim_start().len();
            let width = line.trim().len().max(1);
            snippet.push_str(&format!(
                " {} {}{}\n",
                gutter.cyan(),
                " ".repeat(indent),
                "^".repeat(width).red().bold()
            ));
        }

        Some(snippet)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.span.is_known() {
            write!(f, "{}: {}: {}", self.span, self.level.as_str(), self.message)
        } else {
            write!(f, "{}: {}", self.level.as_str(), self.message)
        }
    }
}

/// Diagnostic collection and reporting
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            ErrorLevel::Error => self.error_count += 1,
            ErrorLevel::Warning => self.warning_count += 1,
            _ => {}
        }
        self.diagnostics.push(diagnostic);
    }

    /// Parse raw compiler messages and add them.
    pub fn extend_from_compiler<'a, I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for message in messages {
            self.emit(parse_compiler_message(message));
        }
    }

    /// Attach "did you mean" help to undefined-symbol errors.
    pub fn suggest_symbols(&mut self, known: &[&str]) {
        for diag in &mut self.diagnostics {
            if diag.help.is_some() {
                continue;
            }
            let Some(missing) = diag.undefined_symbol() else {
                continue;
            };
            let similar = fuzzy::find_similar_names(missing, known, 0.8, 3);
            if similar.is_empty() {
                diag.notes.push(format!(
                    "`{}` is not a builtin and no loaded library exports it",
                    missing
                ));
            } else {
                let help = format!("did you mean `{}`?", similar.join("`, `"));
                diag.help = Some(help);
            }
        }
    }

    /// Rewrite spans through `map` (generated line -> user line).
    pub fn remap(&mut self, map: &LineMap) {
        for diag in &mut self.diagnostics {
            if let Some(span) = map.resolve(&diag.span) {
                diag.span = span;
            }
        }
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render everything, using `source_code` for snippets.
    pub fn render(&self, source_code: &str) -> String {
        self.diagnostics
            .iter()
            .map(|d| d.format(source_code))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn print_summary(&self) {
        if self.error_count > 0 {
            eprintln!(
                "{}: {} error{} emitted",
                "error".red().bold(),
                self.error_count,
                if self.error_count == 1 { "" } else { "s" }
            );
        }
        if self.warning_count > 0 {
            eprintln!(
                "{}: {} warning{} emitted",
                "warning".yellow().bold(),
                self.warning_count,
                if self.warning_count == 1 { "" } else { "s" }
            );
        }
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
        self.error_count = 0;
        self.warning_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_format() {
        colored::control::set_override(false);
        let source = "int main(void) {\n    return y;\n}";
        let diag = Diagnostic::error("'y' undeclared", Span::line("demo.c", 2))
            .with_help("declare `y` before use");

        let formatted = diag.format(source);
        assert!(formatted.contains("error: 'y' undeclared"));
        assert!(formatted.contains("--> demo.c:2"));
        assert!(formatted.contains("return y;"));
        assert!(formatted.contains("    ^^^^^^^^^"));
        assert!(formatted.contains("help: declare `y` before use"));
    }

    #[test]
    fn test_display_without_colors() {
        let diag = Diagnostic::warning("unused value", Span::line("a.c", 7));
        assert_eq!(diag.to_string(), "a.c:7: warning: unused value");

        let bare = Diagnostic::error("undefined symbol 'foo'", Span::unknown());
        assert_eq!(bare.to_string(), "error: undefined symbol 'foo'");
        assert_eq!(bare.undefined_symbol(), Some("foo"));
    }

    #[test]
    fn test_engine_counts_and_suggests() {
        let mut engine = DiagnosticEngine::new();
        engine.extend_from_compiler([
            "<string>:3: warning: implicit declaration of function 'prinf'",
            "tcc: error: undefined symbol 'prinf'",
        ]);
        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.warning_count(), 1);
        assert!(engine.has_errors());

        engine.suggest_symbols(&["printf", "malloc", "free"]);
        let undefined = &engine.diagnostics()[1];
        assert_eq!(undefined.help.as_deref(), Some("did you mean `printf`?"));

        engine.clear();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_unknown_symbol_gets_note() {
        colored::control::set_override(false);
        let mut engine = DiagnosticEngine::new();
        engine.extend_from_compiler(["tcc: error: undefined symbol 'zlib_inflate'"]);
        engine.suggest_symbols(&["printf", "malloc", "free"]);

        let diag = &engine.diagnostics()[0];
        assert!(diag.help.is_none());
        assert!(diag
            .format("")
            .contains("`zlib_inflate` is not a builtin and no loaded library exports it"));
    }
}
