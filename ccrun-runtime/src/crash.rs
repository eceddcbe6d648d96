// Crash isolation for compiled code.
//
// A process-wide handler catches SIGSEGV/SIGFPE/SIGILL/SIGABRT/SIGBUS. When a
// recovery checkpoint is armed the handler writes a report and jumps back to
// the guard that armed it; otherwise it reports and terminates the process.
//
// Everything the handler reads lives in fixed-size atomic storage so the
// handler never allocates or takes a lock.

use std::ffi::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use crate::program::ProgramArgs;
use crate::RuntimeError;

/// Nested guards tracked with full source identity. Deeper guards still
/// recover, they just report the identity of the 8th frame.
pub const MAX_CRASH_FRAMES: usize = 8;
const MAX_LABEL_LEN: usize = 256;

/// Entry signature shared by `main(argc, argv, envp)` and `int f(void)`
/// style wrappers (the C calling convention ignores unused arguments).
pub type EntryPoint =
    unsafe extern "C" fn(c_int, *const *const c_char, *const *const c_char) -> c_int;

/// Outcome of running compiled code under a recovery checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The entry returned normally with this status.
    Exited(i32),
    /// A fatal signal fired and control was recovered.
    Crashed { signal: i32, diagnostic: String },
}

impl ExecutionResult {
    /// Process exit status for this result. Crashes map to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionResult::Exited(code) => *code,
            ExecutionResult::Crashed { .. } => 1,
        }
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, ExecutionResult::Crashed { .. })
    }
}

/// Where the guarded code came from, recorded for crash reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl SourceIdentity {
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line,
        }
    }
}

impl std::fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}:{}", self.function, self.file, self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CrashState {
    Disarmed = 0,
    Armed = 1,
    Reporting = 2,
}

impl CrashState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CrashState::Armed,
            2 => CrashState::Reporting,
            _ => CrashState::Disarmed,
        }
    }
}

struct FrameSlot {
    file: [AtomicU8; MAX_LABEL_LEN],
    file_len: AtomicUsize,
    function: [AtomicU8; MAX_LABEL_LEN],
    function_len: AtomicUsize,
    line: AtomicU32,
    session: AtomicUsize,
}

impl FrameSlot {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY: FrameSlot = {
        const INIT_BYTE: AtomicU8 = AtomicU8::new(0);
        FrameSlot {
            file: [INIT_BYTE; MAX_LABEL_LEN],
            file_len: AtomicUsize::new(0),
            function: [INIT_BYTE; MAX_LABEL_LEN],
            function_len: AtomicUsize::new(0),
            line: AtomicU32::new(0),
            session: AtomicUsize::new(0),
        }
    };

    fn store(&self, identity: &SourceIdentity, session: usize) {
        store_label(&self.file, &self.file_len, &identity.file);
        store_label(&self.function, &self.function_len, &identity.function);
        self.line.store(identity.line, Ordering::Release);
        self.session.store(session, Ordering::Release);
    }
}

fn store_label(buf: &[AtomicU8; MAX_LABEL_LEN], len_slot: &AtomicUsize, text: &str) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(MAX_LABEL_LEN);
    for (slot, &b) in buf.iter().zip(bytes.iter().take(len)) {
        slot.store(b, Ordering::Release);
    }
    len_slot.store(len, Ordering::Release);
}

fn load_label(buf: &[AtomicU8; MAX_LABEL_LEN], len_slot: &AtomicUsize) -> String {
    let len = len_slot.load(Ordering::Acquire).min(MAX_LABEL_LEN);
    let bytes: Vec<u8> = buf
        .iter()
        .take(len)
        .map(|b| b.load(Ordering::Acquire))
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

static FRAMES: [FrameSlot; MAX_CRASH_FRAMES] = [FrameSlot::EMPTY; MAX_CRASH_FRAMES];
static DEPTH: AtomicUsize = AtomicUsize::new(0);
static STATE: AtomicU8 = AtomicU8::new(CrashState::Disarmed as u8);
static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

struct SignalInfo {
    signal: c_int,
    name: &'static str,
    description: &'static str,
    hints: &'static [&'static str],
}

const FATAL_SIGNALS: &[SignalInfo] = &[
    SignalInfo {
        signal: libc::SIGSEGV,
        name: "SIGSEGV",
        description: "Segmentation fault (invalid memory access)",
        hints: &[
            "Check for null pointer dereferences",
            "Verify array bounds and buffer sizes",
            "Look for use-after-free or double free",
        ],
    },
    SignalInfo {
        signal: libc::SIGFPE,
        name: "SIGFPE",
        description: "Floating point exception (e.g. division by zero)",
        hints: &[
            "Check for integer division or modulo by zero",
            "Look for overflow in signed arithmetic",
        ],
    },
    SignalInfo {
        signal: libc::SIGILL,
        name: "SIGILL",
        description: "Illegal instruction",
        hints: &[
            "Code may have jumped through a corrupted function pointer",
            "Check calling-convention mismatches with foreign libraries",
        ],
    },
    SignalInfo {
        signal: libc::SIGABRT,
        name: "SIGABRT",
        description: "Abort signal (abort() or failed assertion)",
        hints: &[
            "An assert() failed or abort() was called",
            "Heap corruption detected by the allocator also raises this",
        ],
    },
    SignalInfo {
        signal: libc::SIGBUS,
        name: "SIGBUS",
        description: "Bus error (misaligned or unmapped memory access)",
        hints: &[
            "Check pointer alignment",
            "Look for access past the end of a mapped file",
        ],
    },
];

const UNKNOWN_SIGNAL: SignalInfo = SignalInfo {
    signal: 0,
    name: "UNKNOWN",
    description: "Unknown signal",
    hints: &[],
};

fn signal_info(sig: c_int) -> &'static SignalInfo {
    FATAL_SIGNALS
        .iter()
        .find(|info| info.signal == sig)
        .unwrap_or(&UNKNOWN_SIGNAL)
}

/// Symbolic name of a fatal signal, e.g. `SIGSEGV`.
pub fn signal_name(sig: i32) -> &'static str {
    signal_info(sig).name
}

pub fn signal_description(sig: i32) -> &'static str {
    signal_info(sig).description
}

#[cfg(unix)]
extern "C" {
    fn ccrun_guard_call(
        body: unsafe extern "C" fn(*mut c_void) -> c_int,
        ctx: *mut c_void,
        out_result: *mut c_int,
    ) -> c_int;
    fn ccrun_checkpoint_armed() -> c_int;
    fn ccrun_jump_to_checkpoint(sig: c_int);
    fn ccrun_backtrace_prime();
    fn ccrun_write_backtrace(fd: c_int) -> c_int;
}

/// Install the fatal-signal handler. Idempotent.
#[cfg(unix)]
pub fn install() -> Result<(), RuntimeError> {
    if HANDLER_INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    unsafe { ccrun_backtrace_prime() };

    for info in FATAL_SIGNALS {
        // SAFETY: sigaction is zero-initializable; the handler only touches
        // async-signal-safe state (atomics, write(2), siglongjmp, _exit).
        let result = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_fatal_signal as usize;
            action.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(info.signal, &action, std::ptr::null_mut())
        };
        if result != 0 {
            HANDLER_INSTALLED.store(false, Ordering::Release);
            return Err(RuntimeError::SignalInstall {
                name: info.name,
                source: std::io::Error::last_os_error(),
            });
        }
    }

    log::debug!("crash handler installed for {} signals", FATAL_SIGNALS.len());
    Ok(())
}

#[cfg(not(unix))]
pub fn install() -> Result<(), RuntimeError> {
    Err(RuntimeError::Unsupported)
}

pub fn is_installed() -> bool {
    HANDLER_INSTALLED.load(Ordering::Acquire)
}

pub fn state() -> CrashState {
    CrashState::from_u8(STATE.load(Ordering::Acquire))
}

/// Number of guards currently armed (capped at [`MAX_CRASH_FRAMES`]).
pub fn depth() -> usize {
    DEPTH.load(Ordering::Acquire)
}

/// Identity of the innermost armed guard, if any.
pub fn current_identity() -> Option<SourceIdentity> {
    let depth = DEPTH.load(Ordering::Acquire);
    let slot = FRAMES.get(depth.checked_sub(1)?)?;
    Some(SourceIdentity {
        file: load_label(&slot.file, &slot.file_len),
        function: load_label(&slot.function, &slot.function_len),
        line: slot.line.load(Ordering::Acquire),
    })
}

struct EntryCall {
    entry: EntryPoint,
    argc: c_int,
    argv: *const *const c_char,
    envp: *const *const c_char,
}

// Plain frame with nothing to drop: siglongjmp may unwind straight through it.
unsafe extern "C" fn invoke_entry(ctx: *mut c_void) -> c_int {
    let call = &*(ctx as *const EntryCall);
    (call.entry)(call.argc, call.argv, call.envp)
}

/// Run `entry` under a recovery checkpoint.
///
/// Guards nest: a crash inside an inner guard returns to that guard only and
/// the outer one stays armed.
///
/// # Safety
/// `entry` must be a valid function pointer with the [`EntryPoint`] signature
/// (or a C function taking no arguments and returning `int`).
#[cfg(unix)]
pub unsafe fn execute(
    identity: &SourceIdentity,
    session: usize,
    entry: EntryPoint,
    args: &ProgramArgs,
) -> ExecutionResult {
    if let Err(e) = install() {
        log::warn!("running without crash isolation: {}", e);
        return ExecutionResult::Exited(entry(args.argc(), args.argv(), args.envp()));
    }

    let pushed = push_frame(identity, session);
    STATE.store(CrashState::Armed as u8, Ordering::Release);

    let call = EntryCall {
        entry,
        argc: args.argc(),
        argv: args.argv(),
        envp: args.envp(),
    };
    let mut status: c_int = 0;
    let signal = ccrun_guard_call(
        invoke_entry,
        &call as *const EntryCall as *mut c_void,
        &mut status,
    );

    if pushed {
        DEPTH.fetch_sub(1, Ordering::AcqRel);
    }
    let remaining = if ccrun_checkpoint_armed() != 0 {
        CrashState::Armed
    } else {
        CrashState::Disarmed
    };
    STATE.store(remaining as u8, Ordering::Release);

    if signal == 0 {
        log::trace!("{} exited with {}", identity.function, status);
        ExecutionResult::Exited(status)
    } else {
        let diagnostic = format!(
            "{} ({}) in {}",
            signal_name(signal),
            signal_description(signal),
            identity
        );
        log::debug!("recovered from crash: {}", diagnostic);
        ExecutionResult::Crashed { signal, diagnostic }
    }
}

/// Without signal checkpoints the entry runs unguarded.
///
/// # Safety
/// See the unix variant.
#[cfg(not(unix))]
pub unsafe fn execute(
    _identity: &SourceIdentity,
    _session: usize,
    entry: EntryPoint,
    args: &ProgramArgs,
) -> ExecutionResult {
    ExecutionResult::Exited(entry(args.argc(), args.argv(), args.envp()))
}

fn push_frame(identity: &SourceIdentity, session: usize) -> bool {
    let depth = DEPTH.load(Ordering::Acquire);
    match FRAMES.get(depth) {
        Some(slot) => {
            slot.store(identity, session);
            DEPTH.store(depth + 1, Ordering::Release);
            true
        }
        None => false,
    }
}

// ===== Signal handler =====
// Only async-signal-safe calls below this line.

#[cfg(unix)]
fn write_bytes(bytes: &[u8]) {
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr() as *const c_void, bytes.len());
    }
}

#[cfg(unix)]
fn write_str(s: &str) {
    write_bytes(s.as_bytes());
}

#[cfg(unix)]
fn write_decimal(mut value: u64) {
    let mut buf = [0u8; 20];
    let mut pos = buf.len();
    loop {
        pos -= 1;
        if let Some(slot) = buf.get_mut(pos) {
            *slot = b'0' + (value % 10) as u8;
        }
        value /= 10;
        if value == 0 || pos == 0 {
            break;
        }
    }
    write_bytes(buf.get(pos..).unwrap_or(&[]));
}

#[cfg(unix)]
fn write_hex(mut value: usize) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut buf = [0u8; 18];
    let mut pos = buf.len();
    loop {
        pos -= 1;
        if let Some(slot) = buf.get_mut(pos) {
            *slot = DIGITS[value & 0xf];
        }
        value >>= 4;
        if value == 0 || pos <= 2 {
            break;
        }
    }
    write_str("0x");
    write_bytes(buf.get(pos..).unwrap_or(&[]));
}

#[cfg(unix)]
fn write_label(buf: &[AtomicU8; MAX_LABEL_LEN], len_slot: &AtomicUsize) {
    let len = len_slot.load(Ordering::Acquire).min(MAX_LABEL_LEN);
    let mut chunk = [0u8; MAX_LABEL_LEN];
    for (dst, src) in chunk.iter_mut().zip(buf.iter()).take(len) {
        *dst = src.load(Ordering::Acquire);
    }
    write_bytes(chunk.get(..len).unwrap_or(&[]));
}

#[cfg(unix)]
const RULE: &str =
    "================================================================================\n";

#[cfg(unix)]
fn write_report(sig: c_int, recoverable: bool) {
    let info = signal_info(sig);

    write_str("\n");
    write_str(RULE);
    write_str("CCRUN CRASH DETECTED\n");
    write_str(RULE);
    write_str("Signal: ");
    write_str(info.name);
    write_str(" (");
    write_decimal(sig as u64);
    write_str(")\nDescription: ");
    write_str(info.description);
    write_str("\n\nBacktrace:\n");
    unsafe {
        ccrun_write_backtrace(libc::STDERR_FILENO);
    }

    let depth = DEPTH.load(Ordering::Acquire);
    if let Some(slot) = depth.checked_sub(1).and_then(|top| FRAMES.get(top)) {
        write_str("\nSource File: ");
        write_label(&slot.file, &slot.file_len);
        write_str("\nFunction: ");
        write_label(&slot.function, &slot.function_len);
        write_str("\nLine: ");
        write_decimal(u64::from(slot.line.load(Ordering::Acquire)));
        let session = slot.session.load(Ordering::Acquire);
        if session != 0 {
            write_str("\nSession: ");
            write_hex(session);
        }
        write_str("\n");
    }

    if !info.hints.is_empty() {
        write_str("\nDebugging suggestions:\n");
        for hint in info.hints {
            write_str("  - ");
            write_str(hint);
            write_str("\n");
        }
    }

    write_str(RULE);
    if recoverable {
        write_str("Attempting graceful recovery...\n");
    } else {
        write_str("No recovery point armed; terminating.\n");
    }
}

#[cfg(unix)]
extern "C" fn on_fatal_signal(sig: c_int, _info: *mut libc::siginfo_t, _ctx: *mut c_void) {
    // A second fault while the report is being written goes straight out.
    let previous = STATE.swap(CrashState::Reporting as u8, Ordering::AcqRel);
    if previous == CrashState::Reporting as u8 {
        unsafe { libc::_exit(128 + sig) };
    }

    let armed = previous == CrashState::Armed as u8 && unsafe { ccrun_checkpoint_armed() } != 0;
    write_report(sig, armed);

    if armed {
        STATE.store(CrashState::Armed as u8, Ordering::Release);
        unsafe { ccrun_jump_to_checkpoint(sig) };
    }

    unsafe { libc::_exit(128 + sig) };
}

#[cfg(test)]
mod crash_tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGSEGV), "SIGSEGV");
        assert_eq!(signal_name(libc::SIGFPE), "SIGFPE");
        assert_eq!(signal_name(0), "UNKNOWN");
        assert!(signal_description(libc::SIGABRT).contains("Abort"));
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(ExecutionResult::Exited(3).exit_code(), 3);
        let crashed = ExecutionResult::Crashed {
            signal: libc::SIGSEGV,
            diagnostic: String::new(),
        };
        assert_eq!(crashed.exit_code(), 1);
        assert!(crashed.is_crash());
    }

    #[test]
    fn test_label_truncated_to_capacity() {
        let slot = FrameSlot::EMPTY;
        let long = "x".repeat(MAX_LABEL_LEN + 40);
        slot.store(&SourceIdentity::new(long, "main", 1), 0);
        assert_eq!(load_label(&slot.file, &slot.file_len).len(), MAX_LABEL_LEN);
        assert_eq!(load_label(&slot.function, &slot.function_len), "main");
    }

    #[test]
    fn test_identity_display() {
        let id = SourceIdentity::new("demo.c", "main", 0);
        assert_eq!(id.to_string(), "main in demo.c:0");
    }
}
