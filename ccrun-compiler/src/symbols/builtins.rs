//! Host routines exposed to compiled code by name.
//!
//! Every session is seeded with this table, so compiled code can call these
//! without any library search. The `dl*` entries point at the engine's own
//! versions (probing open, bridged lookup) and the `__import` family is the
//! module contract.

use std::collections::HashSet;
use std::sync::LazyLock;

use ccrun_runtime::CallingConvention;

use crate::contract;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinRoutine {
    pub name: &'static str,
    /// C prototype, shown by the REPL and used to check the entry is typed
    pub prototype: &'static str,
    pub convention: CallingConvention,
    /// Zero marks a placeholder that is skipped at registration
    pub address: usize,
}

impl BuiltinRoutine {
    pub const fn new(name: &'static str, prototype: &'static str, address: usize) -> Self {
        Self {
            name,
            prototype,
            convention: CallingConvention::Other,
            address,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.address == 0
    }
}

#[derive(Debug)]
pub struct BuiltinTable {
    entries: Vec<BuiltinRoutine>,
}

impl BuiltinTable {
    /// Later duplicates of a name are dropped.
    pub fn new(entries: impl IntoIterator<Item = BuiltinRoutine>) -> Self {
        let native = CallingConvention::native();
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for mut entry in entries {
            if !seen.insert(entry.name) {
                log::warn!("duplicate builtin '{}' ignored", entry.name);
                continue;
            }
            entry.convention = native;
            kept.push(entry);
        }
        Self { entries: kept }
    }

    pub fn get(&self, name: &str) -> Option<&BuiltinRoutine> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Address for `name`, skipping placeholders.
    pub fn address(&self, name: &str) -> Option<usize> {
        self.get(name)
            .filter(|e| !e.is_placeholder())
            .map(|e| e.address)
    }

    /// Entries that will actually be registered.
    pub fn registrable(&self) -> impl Iterator<Item = &BuiltinRoutine> {
        self.entries.iter().filter(|e| !e.is_placeholder())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

extern "C" {
    fn sin(x: f64) -> f64;
    fn cos(x: f64) -> f64;
    fn sqrt(x: f64) -> f64;
}

static BUILTINS: LazyLock<BuiltinTable> = LazyLock::new(|| BuiltinTable::new(default_entries()));

/// The process-wide builtin table.
pub fn builtins() -> &'static BuiltinTable {
    &BUILTINS
}

fn default_entries() -> Vec<BuiltinRoutine> {
    let mut entries = vec![
        // stdio / process
        BuiltinRoutine::new("printf", "int printf(const char*, ...)", libc::printf as usize),
        BuiltinRoutine::new("exit", "void exit(int)", libc::exit as usize),
        BuiltinRoutine::new("abort", "void abort(void)", libc::abort as usize),
        // memory
        BuiltinRoutine::new("malloc", "void* malloc(size_t)", libc::malloc as usize),
        BuiltinRoutine::new("calloc", "void* calloc(size_t, size_t)", libc::calloc as usize),
        BuiltinRoutine::new("realloc", "void* realloc(void*, size_t)", libc::realloc as usize),
        BuiltinRoutine::new("free", "void free(void*)", libc::free as usize),
        // strings
        BuiltinRoutine::new("strlen", "size_t strlen(const char*)", libc::strlen as usize),
        BuiltinRoutine::new("strcmp", "int strcmp(const char*, const char*)", libc::strcmp as usize),
        BuiltinRoutine::new(
            "strncmp",
            "int strncmp(const char*, const char*, size_t)",
            libc::strncmp as usize,
        ),
        BuiltinRoutine::new(
            "memcpy",
            "void* memcpy(void*, const void*, size_t)",
            libc::memcpy as usize,
        ),
        BuiltinRoutine::new("memset", "void* memset(void*, int, size_t)", libc::memset as usize),
        BuiltinRoutine::new(
            "memmove",
            "void* memmove(void*, const void*, size_t)",
            libc::memmove as usize,
        ),
        // math
        BuiltinRoutine::new("abs", "int abs(int)", libc::abs as usize),
        BuiltinRoutine::new("labs", "long labs(long)", libc::labs as usize),
        BuiltinRoutine::new("sin", "double sin(double)", sin as usize),
        BuiltinRoutine::new("cos", "double cos(double)", cos as usize),
        BuiltinRoutine::new("sqrt", "double sqrt(double)", sqrt as usize),
        // files
        BuiltinRoutine::new(
            "fopen",
            "FILE* fopen(const char*, const char*)",
            libc::fopen as usize,
        ),
        BuiltinRoutine::new("fclose", "int fclose(FILE*)", libc::fclose as usize),
        BuiltinRoutine::new(
            "fread",
            "size_t fread(void*, size_t, size_t, FILE*)",
            libc::fread as usize,
        ),
        BuiltinRoutine::new(
            "fwrite",
            "size_t fwrite(const void*, size_t, size_t, FILE*)",
            libc::fwrite as usize,
        ),
        BuiltinRoutine::new("fseek", "int fseek(FILE*, long, int)", libc::fseek as usize),
        BuiltinRoutine::new("ftell", "long ftell(FILE*)", libc::ftell as usize),
        BuiltinRoutine::new("fgets", "char* fgets(char*, int, FILE*)", libc::fgets as usize),
        BuiltinRoutine::new("fputs", "int fputs(const char*, FILE*)", libc::fputs as usize),
        BuiltinRoutine::new("fflush", "int fflush(FILE*)", libc::fflush as usize),
        // module contract
        BuiltinRoutine::new(
            "__import",
            "void* __import(const char*)",
            contract::import_module as usize,
        ),
        BuiltinRoutine::new(
            "__sym",
            "void* __sym(void*, const char*)",
            contract::module_symbol as usize,
        ),
        BuiltinRoutine::new(
            "__import_free",
            "void __import_free(void*)",
            contract::release_module as usize,
        ),
    ];
    entries.extend(platform_entries());
    entries
}

#[cfg(unix)]
fn platform_entries() -> Vec<BuiltinRoutine> {
    vec![
        // dynamic loading, routed through the engine's registry and bridge
        BuiltinRoutine::new("dlopen", "void* dlopen(const char*, int)", contract::dlopen as usize),
        BuiltinRoutine::new(
            "dlsym",
            "void* dlsym(void*, const char*)",
            contract::dlsym as usize,
        ),
        BuiltinRoutine::new("dlclose", "int dlclose(void*)", contract::dlclose as usize),
        BuiltinRoutine::new("dlerror", "char* dlerror(void)", contract::dlerror as usize),
        BuiltinRoutine::new(
            "cosmo_dlopen",
            "void* cosmo_dlopen(const char*, int)",
            contract::dlopen as usize,
        ),
        BuiltinRoutine::new(
            "cosmo_dlsym",
            "void* cosmo_dlsym(void*, const char*)",
            contract::dlsym as usize,
        ),
        BuiltinRoutine::new(
            "cosmo_dlclose",
            "int cosmo_dlclose(void*)",
            contract::dlclose as usize,
        ),
        BuiltinRoutine::new(
            "cosmo_dlerror",
            "char* cosmo_dlerror(void)",
            contract::dlerror as usize,
        ),
        // POSIX
        BuiltinRoutine::new("open", "int open(const char*, int, ...)", libc::open as usize),
        BuiltinRoutine::new("read", "ssize_t read(int, void*, size_t)", libc::read as usize),
        BuiltinRoutine::new(
            "write",
            "ssize_t write(int, const void*, size_t)",
            libc::write as usize,
        ),
        BuiltinRoutine::new("close", "int close(int)", libc::close as usize),
        BuiltinRoutine::new("unlink", "int unlink(const char*)", libc::unlink as usize),
        BuiltinRoutine::new("access", "int access(const char*, int)", libc::access as usize),
        BuiltinRoutine::new("fork", "pid_t fork(void)", libc::fork as usize),
        BuiltinRoutine::new(
            "waitpid",
            "pid_t waitpid(pid_t, int*, int)",
            libc::waitpid as usize,
        ),
        BuiltinRoutine::new("_exit", "void _exit(int)", libc::_exit as usize),
        BuiltinRoutine::new(
            "execve",
            "int execve(const char*, char* const*, char* const*)",
            libc::execve as usize,
        ),
    ]
}

#[cfg(not(unix))]
fn platform_entries() -> Vec<BuiltinRoutine> {
    Vec::new()
}
