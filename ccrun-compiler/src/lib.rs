// ccrun-compiler: compile C at runtime through libtcc and run it in-process
//
// - runtime: session factory, late binding, inline execution
// - module: import of sources/objects with the per-arch object cache
// - repl: incremental compilation for the interactive shell
// - passthrough: tcc-style flags for the compile-and-run mode
// - symbols: builtin table, library registry, ABI bridging

pub mod cache;
pub mod config;
mod contract;
pub mod error;
pub mod module;
pub mod passthrough;
pub mod platform;
pub mod repl;
pub mod runtime;
pub mod session;
pub mod symbols;
pub mod tcc;

pub use cache::{CacheValidity, ObjectCache};
pub use config::Config;
pub use error::{EngineError, Result};
pub use module::{Module, ModuleOrigin};
pub use passthrough::{parse_compiler_args, CompilerArgs};
pub use platform::{OsFamily, Platform};
pub use repl::{ReplCommand, ReplOutcome, ReplSession};
pub use runtime::Runtime;
pub use session::{CompilerSession, OutputMode};
pub use symbols::SymbolResolver;

use std::fs;

use symbols::builtins;

/// Module contract declarations injected ahead of inline and REPL code.
pub const API_DECLARATIONS: &str = "extern void* __import(const char* path);\n\
extern void* __sym(void* module, const char* symbol);\n";

/// Compiled code is freestanding; the host supplies libc through builtins.
pub const DEFAULT_OPTIONS: &str = "-nostdlib -nostdinc";

/// Defined in every translation unit
pub const ENGINE_DEFINE: &str = "__CCRUN__";

/// Unit name and `argv[0]` for `--eval` code
pub const INLINE_UNIT: &str = "(inline)";

pub const MAX_CODE_LEN: usize = 96 * 1024;
pub const MAX_PATH_LEN: usize = 4096;

/// Print `err` to stderr. Compilation failures are rendered as diagnostics,
/// with a snippet from `source` (name, text) or from the file on disk.
pub fn report_error(err: &EngineError, source: Option<(&str, &str)>) {
    let Some(mut diagnostics) = err.diagnostics() else {
        eprintln!("error: {}", err);
        return;
    };
    if diagnostics.is_empty() {
        eprintln!("error: {}", err);
        return;
    }
    diagnostics.suggest_symbols(&builtins().names());

    for diag in diagnostics.diagnostics() {
        let text = match source {
            Some((name, text)) if name == diag.span.file => Some(text.to_string()),
            _ => fs::read_to_string(&diag.span.file).ok(),
        };
        eprintln!("{}", diag.format(text.as_deref().unwrap_or("")));
    }
    diagnostics.print_summary();
}
