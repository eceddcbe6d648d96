//! Incremental compilation for the interactive shell.
//!
//! Input is split into two buffers:
//! - declarations (function definitions) go to file scope and are only
//!   compiled together with the next statement
//! - statements accumulate in the body of `int __repl_main(void)`, which is
//!   recompiled in a fresh session and re-run after every statement
//!
//! A statement that fails to compile, or crashes, is dropped again so it does
//! not poison later input.

use ccrun_diagnostics::{DiagnosticEngine, LineMap};
use ccrun_runtime::ExecutionResult;

use crate::error::{EngineError, Result};
use crate::runtime::{run_entry, validate_code, Runtime};
use crate::session::CompilerSession;
use crate::symbols::builtins;
use crate::{API_DECLARATIONS, MAX_CODE_LEN};

pub const REPL_UNIT: &str = "<repl>";
pub const REPL_ENTRY: &str = "__repl_main";

/// File name libtcc reports for `tcc_compile_string` input
const GENERATED_FILE: &str = "<string>";

pub const HELP_TEXT: &str = "\
REPL Commands:
  :quit, :q    - Exit REPL
  :show, :s    - Show accumulated code
  :reset, :r   - Reset REPL state
  :help, :h    - Show this help

Usage:
  Declarations/functions are added globally
  Statements/expressions are executed immediately
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Declaration,
    Statement,
}

/// A line with `(`, `)` and `{` is taken as a function definition.
pub fn classify(line: &str) -> LineKind {
    if line.contains('(') && line.contains(')') && line.contains('{') {
        LineKind::Declaration
    } else {
        LineKind::Statement
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Quit,
    Help,
    Show,
    Reset,
}

impl ReplCommand {
    /// `None` for ordinary input, `Some(Err(line))` for an unknown `:command`.
    pub fn parse(line: &str) -> Option<std::result::Result<Self, String>> {
        let line = line.trim();
        if !line.starts_with(':') {
            return None;
        }
        Some(match line {
            ":quit" | ":q" => Ok(ReplCommand::Quit),
            ":help" | ":h" => Ok(ReplCommand::Help),
            ":show" | ":s" => Ok(ReplCommand::Show),
            ":reset" | ":r" => Ok(ReplCommand::Reset),
            other => Err(other.to_string()),
        })
    }
}

#[derive(Debug)]
pub enum ReplOutcome {
    /// Blank input
    Empty,
    /// Stored as a declaration; nothing compiled yet
    Declared,
    /// Recompiled and ran the accumulated statements
    Executed(ExecutionResult),
    /// The statement did not compile and was discarded
    CompileFailed {
        diagnostics: DiagnosticEngine,
        report: String,
    },
}

#[derive(Debug, Clone)]
struct Fragment {
    label: String,
    text: String,
}

impl Fragment {
    fn line_count(&self) -> usize {
        self.text.lines().count().max(1)
    }
}

pub struct ReplSession<'rt> {
    runtime: &'rt Runtime,
    declarations: Vec<Fragment>,
    statements: Vec<Fragment>,
    inputs: u64,
    executions: u64,
    session: Option<CompilerSession>,
}

impl<'rt> ReplSession<'rt> {
    pub fn new(runtime: &'rt Runtime) -> Self {
        Self {
            runtime,
            declarations: Vec::new(),
            statements: Vec::new(),
            inputs: 0,
            executions: 0,
            session: None,
        }
    }

    /// Feed one line of input.
    pub fn eval(&mut self, line: &str) -> Result<ReplOutcome> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return Ok(ReplOutcome::Empty);
        }
        validate_code(line)?;

        self.inputs += 1;
        let label = format!("<input {}>", self.inputs);

        match classify(line) {
            LineKind::Declaration => {
                self.declarations.push(Fragment {
                    label,
                    text: line.to_string(),
                });
                Ok(ReplOutcome::Declared)
            }
            LineKind::Statement => {
                let mut text = line.trim().to_string();
                if !text.ends_with(';') {
                    text.push(';');
                }
                self.statements.push(Fragment { label, text });

                let outcome = self.recompile_and_run();
                let keep = matches!(&outcome, Ok(ReplOutcome::Executed(r)) if !r.is_crash());
                if !keep {
                    self.statements.pop();
                }
                outcome
            }
        }
    }

    fn recompile_and_run(&mut self) -> Result<ReplOutcome> {
        let (unit, map) = self.translation_unit();
        if unit.len() > MAX_CODE_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "accumulated REPL code exceeds {} bytes",
                MAX_CODE_LEN
            )));
        }

        let session = match self.runtime.build(REPL_UNIT, |s| s.compile_string(&unit)) {
            Ok(session) => session,
            Err(err @ EngineError::Compilation { .. }) => {
                let mut diagnostics = err.diagnostics().unwrap_or_default();
                diagnostics.remap(&map);
                diagnostics.suggest_symbols(&builtins().names());
                let report = self.render(&diagnostics);
                return Ok(ReplOutcome::CompileFailed {
                    diagnostics,
                    report,
                });
            }
            Err(err) => return Err(err),
        };

        // The previous session goes away only once its replacement is relocated.
        let session = self.session.insert(session);
        self.executions += 1;
        let result = run_entry(session, REPL_ENTRY, REPL_UNIT, &[])?;
        Ok(ReplOutcome::Executed(result))
    }

    /// Module contract, declarations, then the wrapper around all statements.
    fn translation_unit(&self) -> (String, LineMap) {
        let mut map = LineMap::new(GENERATED_FILE);
        let mut unit = String::from(API_DECLARATIONS);
        let mut line = API_DECLARATIONS.lines().count() + 1;

        for decl in &self.declarations {
            map.record(line, decl.line_count(), decl.label.clone(), 1);
            unit.push_str(&decl.text);
            unit.push('\n');
            line += decl.line_count();
        }

        unit.push_str(&format!("int {}(void) {{\n", REPL_ENTRY));
        line += 1;
        for stmt in &self.statements {
            map.record(line, stmt.line_count(), stmt.label.clone(), 1);
            unit.push_str("    ");
            unit.push_str(&stmt.text);
            unit.push('\n');
            line += stmt.line_count();
        }
        unit.push_str("    return 0;\n}\n");
        (unit, map)
    }

    fn render(&self, diagnostics: &DiagnosticEngine) -> String {
        diagnostics
            .diagnostics()
            .iter()
            .map(|diag| {
                let source = self
                    .declarations
                    .iter()
                    .chain(self.statements.iter())
                    .find(|f| f.label == diag.span.file)
                    .map_or("", |f| f.text.as_str());
                diag.format(source)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop all accumulated code and the kept session.
    pub fn reset(&mut self) {
        self.declarations.clear();
        self.statements.clear();
        self.inputs = 0;
        self.executions = 0;
        self.session = None;
    }

    pub fn declarations(&self) -> String {
        join_fragments(&self.declarations, "")
    }

    pub fn statements(&self) -> String {
        join_fragments(&self.statements, "    ")
    }

    /// Text for `:show`.
    pub fn show(&self) -> String {
        format!(
            "=== Current Code ===\n{}int {}(void) {{\n{}}}\n=== End ===\n",
            self.declarations(),
            REPL_ENTRY,
            self.statements()
        )
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }
}

fn join_fragments(fragments: &[Fragment], indent: &str) -> String {
    fragments
        .iter()
        .map(|f| format!("{}{}\n", indent, f.text))
        .collect()
}

#[cfg(test)]
mod repl_tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("int counter = 0;"), LineKind::Statement);
        assert_eq!(
            classify("int inc(int *c){ return ++(*c); }"),
            LineKind::Declaration
        );
        assert_eq!(classify("printf(\"%d\\n\", x)"), LineKind::Statement);
        assert_eq!(classify("struct P { int x; };"), LineKind::Statement);
    }

    #[test]
    fn test_commands() {
        assert_eq!(ReplCommand::parse(":q"), Some(Ok(ReplCommand::Quit)));
        assert_eq!(ReplCommand::parse(" :show "), Some(Ok(ReplCommand::Show)));
        assert_eq!(ReplCommand::parse(":r"), Some(Ok(ReplCommand::Reset)));
        assert_eq!(ReplCommand::parse(":h"), Some(Ok(ReplCommand::Help)));
        assert_eq!(
            ReplCommand::parse(":bogus"),
            Some(Err(":bogus".to_string()))
        );
        assert_eq!(ReplCommand::parse("int x = 1;"), None);
    }

    #[test]
    fn test_help_lists_commands() {
        for cmd in [":quit", ":show", ":reset", ":help"] {
            assert!(HELP_TEXT.contains(cmd));
        }
    }
}
