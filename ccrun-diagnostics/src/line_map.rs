//! Maps lines of a generated translation unit back to where the user typed them.
//!
//! The REPL stitches declarations and statements into one synthetic source;
//! compiler messages refer to that source, so each user fragment is recorded
//! with the line range it occupies.

use crate::Span;

#[derive(Debug, Clone, Default)]
pub struct LineMap {
    /// File name the compiler uses for the generated source (e.g. `<string>`)
    generated_file: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
struct Segment {
    first_line: usize,
    line_count: usize,
    origin: String,
    origin_line: usize,
}

impl LineMap {
    pub fn new(generated_file: impl Into<String>) -> Self {
        Self {
            generated_file: generated_file.into(),
            segments: Vec::new(),
        }
    }

    /// Record that generated lines `first_line..first_line + line_count`
    /// came from `origin`, starting at `origin_line`.
    pub fn record(
        &mut self,
        first_line: usize,
        line_count: usize,
        origin: impl Into<String>,
        origin_line: usize,
    ) {
        self.segments.push(Segment {
            first_line,
            line_count: line_count.max(1),
            origin: origin.into(),
            origin_line,
        });
    }

    /// Span in user terms, or `None` when the span is not inside a recorded fragment.
    pub fn resolve(&self, span: &Span) -> Option<Span> {
        if span.file != self.generated_file || !span.is_known() {
            return None;
        }
        self.segments
            .iter()
            .find(|s| span.line >= s.first_line && span.line < s.first_line + s.line_count)
            .map(|s| Span {
                file: s.origin.clone(),
                line: s.origin_line + (span.line - s.first_line),
                column: span.column,
                length: span.length,
            })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
