// ccrun-runtime: process-level support for code compiled at runtime
//
// - crash: fatal-signal handler + recovery checkpoints around compiled entry points
// - bridge: SysV -> Win64 trampolines for foreign-ABI library functions
// - program: argv/envp marshalling for `main(argc, argv, envp)` style entries

pub mod bridge;
pub mod crash;
mod exec_mem;
pub mod program;

pub use bridge::{AbiBridge, CallingConvention, ForeignCallBridge, TRAMPOLINE_CAPACITY};
pub use crash::{EntryPoint, ExecutionResult, SourceIdentity, MAX_CRASH_FRAMES};
pub use exec_mem::is_executable;
pub use program::ProgramArgs;

use thiserror::Error;

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to install handler for {name}: {source}")]
    SignalInstall {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("executable memory allocation failed: {0}")]
    ExecutableMemory(#[source] std::io::Error),

    #[error("no trampoline bridge from {from} to {to} on this architecture")]
    UnsupportedBridge {
        from: CallingConvention,
        to: CallingConvention,
    },

    #[error("argument contains an interior NUL byte: {0:?}")]
    InvalidArgument(String),

    #[error("crash isolation is not available on this platform")]
    Unsupported,
}
