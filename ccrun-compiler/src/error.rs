// Engine error taxonomy

use std::path::PathBuf;

use ccrun_diagnostics::DiagnosticEngine;
use ccrun_runtime::RuntimeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("out of memory: {0}")]
    Memory(String),

    #[error("failed to initialize compiler: {0}")]
    CompilerInit(String),

    #[error("{unit}: compilation failed{}", summarize(.messages))]
    Compilation { unit: String, messages: Vec<String> },

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("configuration not initialized")]
    ConfigNotInitialized,

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn summarize(messages: &[String]) -> String {
    match messages.len() {
        0 => String::new(),
        1 => " (1 error)".to_string(),
        n => format!(" ({} errors)", n),
    }
}

impl EngineError {
    pub(crate) fn compilation(unit: impl Into<String>, messages: Vec<String>) -> Self {
        EngineError::Compilation {
            unit: unit.into(),
            messages,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Compiler messages as structured diagnostics, for compilation failures.
    pub fn diagnostics(&self) -> Option<DiagnosticEngine> {
        let EngineError::Compilation { messages, .. } = self else {
            return None;
        };
        let mut engine = DiagnosticEngine::new();
        engine.extend_from_compiler(messages.iter().map(String::as_str));
        Some(engine)
    }
}
