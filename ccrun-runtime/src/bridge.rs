//! Calling-convention bridge for foreign-ABI library functions.
//!
//! Compiled code always calls with the native C convention. When symbols come
//! from a library built for a different convention (Win64 code loaded on a
//! SysV host, for instance) each resolved function address is swapped for a
//! small trampoline that reshuffles the arguments before jumping to it.
//!
//! Trampolines are cached per target address and live for the process
//! lifetime.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::exec_mem;
use crate::RuntimeError;

/// Upper bound on cached trampolines. Lookups past this still get a bridge,
/// it just isn't remembered.
pub const TRAMPOLINE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    SysV64,
    Win64,
    Aapcs64,
    Other,
}

impl CallingConvention {
    /// Convention used by C code compiled for the current target.
    pub fn native() -> Self {
        if cfg!(all(target_arch = "x86_64", windows)) {
            CallingConvention::Win64
        } else if cfg!(target_arch = "x86_64") {
            CallingConvention::SysV64
        } else if cfg!(target_arch = "aarch64") {
            CallingConvention::Aapcs64
        } else {
            CallingConvention::Other
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sysv" | "sysv64" => Some(CallingConvention::SysV64),
            "win64" | "ms64" | "microsoft" => Some(CallingConvention::Win64),
            "aapcs" | "aapcs64" | "arm64" => Some(CallingConvention::Aapcs64),
            "native" => Some(Self::native()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallingConvention::SysV64 => "sysv64",
            CallingConvention::Win64 => "win64",
            CallingConvention::Aapcs64 => "aapcs64",
            CallingConvention::Other => "other",
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emits trampolines that let `source`-convention callers reach
/// `target`-convention functions.
pub trait ForeignCallBridge: Send + Sync {
    fn source(&self) -> CallingConvention;
    fn target(&self) -> CallingConvention;

    /// Builds a trampoline for `function` and returns its executable address.
    fn emit(&self, function: usize) -> Result<usize, RuntimeError>;
}

/// Picks the bridge implementation for a convention pair, if one exists.
pub fn bridge_for(
    source: CallingConvention,
    target: CallingConvention,
) -> Result<Box<dyn ForeignCallBridge>, RuntimeError> {
    match (source, target) {
        #[cfg(target_arch = "x86_64")]
        (CallingConvention::SysV64, CallingConvention::Win64) => Ok(Box::new(SysVToWin64)),
        (from, to) => Err(RuntimeError::UnsupportedBridge { from, to }),
    }
}

// Shared bridge routine. Entered from a trampoline with the frame already set
// up (`push rbp; mov rsp, rbp`) and the real target in rax. Supports up to
// 6 register and 8 stack integer arguments.
#[cfg(all(target_arch = "x86_64", not(target_vendor = "apple")))]
std::arch::global_asm!(
    ".text",
    ".globl ccrun_sysv_to_win64",
    ".p2align 4",
    "ccrun_sysv_to_win64:",
    "pushq 72(%rbp)",
    "pushq 64(%rbp)",
    "pushq 56(%rbp)",
    "pushq 48(%rbp)",
    "pushq 40(%rbp)",
    "pushq 32(%rbp)",
    "pushq 24(%rbp)",
    "pushq 16(%rbp)",
    "pushq %r9",
    "pushq %r8",
    "movq %rdx, %r8",
    "movq %rcx, %r9",
    "movq %rdi, %rcx",
    "movq %rsi, %rdx",
    "subq $32, %rsp",
    "callq *%rax",
    "leave",
    "retq",
    options(att_syntax)
);

#[cfg(all(target_arch = "x86_64", target_vendor = "apple"))]
std::arch::global_asm!(
    ".text",
    ".globl _ccrun_sysv_to_win64",
    ".p2align 4",
    "_ccrun_sysv_to_win64:",
    "pushq 72(%rbp)",
    "pushq 64(%rbp)",
    "pushq 56(%rbp)",
    "pushq 48(%rbp)",
    "pushq 40(%rbp)",
    "pushq 32(%rbp)",
    "pushq 24(%rbp)",
    "pushq 16(%rbp)",
    "pushq %r9",
    "pushq %r8",
    "movq %rdx, %r8",
    "movq %rcx, %r9",
    "movq %rdi, %rcx",
    "movq %rsi, %rdx",
    "subq $32, %rsp",
    "callq *%rax",
    "leave",
    "retq",
    options(att_syntax)
);

#[cfg(target_arch = "x86_64")]
extern "C" {
    fn ccrun_sysv_to_win64();
}

/// SysV caller -> Win64 callee on x86_64.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SysVToWin64;

#[cfg(target_arch = "x86_64")]
impl SysVToWin64 {
    // push rbp; mov rsp, rbp; movabs <function>, rax; movabs <bridge>, r10; jmp *r10
    const TEMPLATE: [u8; 27] = [
        0x55, // push %rbp
        0x48, 0x89, 0xE5, // mov %rsp, %rbp
        0x48, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, // movabs $function, %rax
        0x49, 0xBA, 0, 0, 0, 0, 0, 0, 0, 0, // movabs $bridge, %r10
        0x41, 0xFF, 0xE2, // jmp *%r10
    ];
    const FUNCTION_OFFSET: usize = 6;
    const BRIDGE_OFFSET: usize = 16;

    fn encode(function: usize, bridge: usize) -> [u8; 27] {
        let mut code = Self::TEMPLATE;
        let (_, rest) = code.split_at_mut(Self::FUNCTION_OFFSET);
        rest[..8].copy_from_slice(&(function as u64).to_le_bytes());
        let (_, rest) = code.split_at_mut(Self::BRIDGE_OFFSET);
        rest[..8].copy_from_slice(&(bridge as u64).to_le_bytes());
        code
    }
}

#[cfg(target_arch = "x86_64")]
impl ForeignCallBridge for SysVToWin64 {
    fn source(&self) -> CallingConvention {
        CallingConvention::SysV64
    }

    fn target(&self) -> CallingConvention {
        CallingConvention::Win64
    }

    fn emit(&self, function: usize) -> Result<usize, RuntimeError> {
        let code = Self::encode(function, ccrun_sysv_to_win64 as usize);
        exec_mem::alloc_code(&code)
    }
}

#[derive(Debug, Default)]
struct TrampolineCache {
    entries: Vec<(usize, usize)>,
}

impl TrampolineCache {
    fn lookup(&self, function: usize) -> Option<usize> {
        self.entries
            .iter()
            .find(|(target, _)| *target == function)
            .map(|(_, trampoline)| *trampoline)
    }

    fn insert(&mut self, function: usize, trampoline: usize) {
        if self.entries.len() < TRAMPOLINE_CAPACITY {
            self.entries.push((function, trampoline));
        }
    }
}

/// Wraps symbols resolved from foreign modules.
pub struct AbiBridge {
    compiled: CallingConvention,
    foreign: CallingConvention,
    bridge: Option<Box<dyn ForeignCallBridge>>,
    host_module: AtomicUsize,
    cache: Mutex<TrampolineCache>,
    emitted: AtomicUsize,
}

impl fmt::Debug for AbiBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbiBridge")
            .field("compiled", &self.compiled)
            .field("foreign", &self.foreign)
            .field("active", &self.bridge.is_some())
            .field("host_module", &self.host_module.load(Ordering::Relaxed))
            .finish()
    }
}

impl AbiBridge {
    /// `compiled` is the convention of generated code, `foreign` that of the
    /// libraries it loads. Unsupported pairs fall back to passing addresses
    /// through untouched.
    pub fn new(compiled: CallingConvention, foreign: CallingConvention) -> Self {
        let bridge = if compiled == foreign {
            None
        } else {
            match bridge_for(compiled, foreign) {
                Ok(bridge) => Some(bridge),
                Err(e) => {
                    log::warn!("{}; foreign symbols will be called directly", e);
                    None
                }
            }
        };
        Self {
            compiled,
            foreign,
            bridge,
            host_module: AtomicUsize::new(0),
            cache: Mutex::new(TrampolineCache::default()),
            emitted: AtomicUsize::new(0),
        }
    }

    /// No bridging: both sides use the native convention.
    pub fn native() -> Self {
        let native = CallingConvention::native();
        Self::new(native, native)
    }

    pub fn requires_bridging(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn compiled_convention(&self) -> CallingConvention {
        self.compiled
    }

    pub fn foreign_convention(&self) -> CallingConvention {
        self.foreign
    }

    /// Records the module whose symbols already use the compiled convention.
    /// Only the first call takes effect.
    pub fn set_host_module(&self, handle: usize) {
        if handle != 0 {
            let _ = self
                .host_module
                .compare_exchange(0, handle, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    pub fn host_module(&self) -> usize {
        self.host_module.load(Ordering::Acquire)
    }

    /// Returns the address compiled code should call for `function`, which
    /// was resolved from `module`.
    ///
    /// The original address comes back unchanged when no bridging is needed,
    /// when the module is the host (or unknown), when the address is not
    /// executable code, or when emitting a trampoline fails.
    pub fn wrap(&self, module: usize, function: usize) -> usize {
        let Some(bridge) = self.bridge.as_deref() else {
            return function;
        };
        if function == 0 || module == 0 || module == self.host_module() {
            return function;
        }
        if !exec_mem::is_executable(function) {
            log::trace!("{:#x} is not code; leaving unbridged", function);
            return function;
        }

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(trampoline) = cache.lookup(function) {
            return trampoline;
        }

        match bridge.emit(function) {
            Ok(trampoline) => {
                cache.insert(function, trampoline);
                self.emitted.fetch_add(1, Ordering::Relaxed);
                log::trace!(
                    "{} -> {} trampoline {:#x} for {:#x}",
                    bridge.source(),
                    bridge.target(),
                    trampoline,
                    function
                );
                trampoline
            }
            Err(e) => {
                log::warn!("trampoline for {:#x} failed: {}", function, e);
                function
            }
        }
    }

    /// Trampolines emitted so far, cached or not.
    pub fn trampolines_emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn cached_trampolines(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }
}
