//! Dynamic library handles: probing opener and the bounded handle registry.
//!
//! Handles are kept as raw loader handles and are never closed; compiled code
//! may hold addresses into them for the rest of the process.
//!
//! Libraries are opened local to their handle by default. The host handle
//! searches the process-wide scope, so a library opened global would be
//! found through it and mistaken for part of the host image.

use std::ffi::{c_int, c_void};
use std::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::platform::Platform;

/// Libraries tracked for symbol lookup. Opens past this still succeed.
pub const LIBRARY_CAPACITY: usize = 16;

/// Name recorded for the host process image.
pub const HOST_LIBRARY: &str = "self";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub name: String,
    pub handle: usize,
}

/// File names to try for a logical library name, literal first.
///
/// `m` on Linux gives `m`, `m.so`, `m.dylib`, `m.dll`, `libm.so`, ...
/// The directory part is preserved and a `lib` prefix is only added when the
/// base name does not already carry one.
pub fn library_candidates(name: &str, platform: &Platform) -> Vec<String> {
    let mut candidates = vec![name.to_string()];

    let split = name.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let (dir, base) = name.split_at(split);
    if base.is_empty() {
        return candidates;
    }

    let extensions = platform.library_extensions();
    let stem = extensions
        .iter()
        .find_map(|ext| base.strip_suffix(ext))
        .unwrap_or(base);

    let mut prefixes = vec![""];
    if !base.to_ascii_lowercase().starts_with("lib") {
        prefixes.push("lib");
    }

    for prefix in prefixes {
        for ext in extensions {
            let candidate = format!("{}{}{}{}", dir, prefix, stem, ext);
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }
    candidates
}

/// Loader flags used when the caller has no preference.
#[cfg(unix)]
pub const DEFAULT_OPEN_FLAGS: c_int = libc::RTLD_NOW | libc::RTLD_LOCAL;
#[cfg(windows)]
pub const DEFAULT_OPEN_FLAGS: c_int = 0;

/// Open `name` through the probing sequence and return the raw handle.
/// `flags` are `dlopen` mode bits; Windows ignores them.
pub fn open_probing(name: &str, platform: &Platform, flags: c_int) -> Result<usize> {
    let mut last_error = None;
    for candidate in library_candidates(name, platform) {
        match open_raw(&candidate, flags) {
            Ok(handle) => {
                log::debug!("opened library '{}' as {}", name, candidate);
                return Ok(handle);
            }
            Err(e) => {
                log::trace!("  {} -> {}", candidate, e);
                last_error = Some(e);
            }
        }
    }
    Err(EngineError::Platform(match last_error {
        Some(e) => format!("cannot open library '{}': {}", name, e),
        None => format!("cannot open library '{}'", name),
    }))
}

#[cfg(unix)]
fn open_raw(path: &str, flags: c_int) -> std::result::Result<usize, libloading::Error> {
    use libloading::os::unix::Library;
    let library = unsafe { Library::open(Some(path), flags)? };
    Ok(library.into_raw() as usize)
}

#[cfg(windows)]
fn open_raw(path: &str, _flags: c_int) -> std::result::Result<usize, libloading::Error> {
    let library = unsafe { libloading::os::windows::Library::new(path)? };
    Ok(library.into_raw() as usize)
}

#[cfg(unix)]
fn open_self() -> usize {
    libloading::os::unix::Library::this().into_raw() as usize
}

#[cfg(windows)]
fn open_self() -> usize {
    libloading::os::windows::Library::this()
        .map(|l| l.into_raw() as usize)
        .unwrap_or(0)
}

/// Look `symbol` up in an already-open raw handle without taking ownership.
#[cfg(unix)]
pub fn lookup_raw(handle: usize, symbol: &str) -> Option<usize> {
    if handle == 0 {
        return None;
    }
    let library = unsafe { libloading::os::unix::Library::from_raw(handle as *mut c_void) };
    let address = unsafe { library.get::<*mut c_void>(symbol.as_bytes()) }
        .ok()
        .map(|sym| *sym as usize);
    // Hand the handle back without closing it.
    let _ = library.into_raw();
    address.filter(|a| *a != 0)
}

#[cfg(windows)]
pub fn lookup_raw(handle: usize, symbol: &str) -> Option<usize> {
    if handle == 0 {
        return None;
    }
    let library = unsafe { libloading::os::windows::Library::from_raw(handle as _) };
    let address = unsafe { library.get::<*mut c_void>(symbol.as_bytes()) }
        .ok()
        .map(|sym| *sym as usize);
    let _ = library.into_raw();
    address.filter(|a| *a != 0)
}

/// Bounded, deduplicated set of opened libraries.
#[derive(Debug)]
pub struct LibraryRegistry {
    platform: Platform,
    entries: Mutex<Vec<LibraryEntry>>,
}

impl LibraryRegistry {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<LibraryEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track `handle`. Returns false if it was already tracked or the
    /// registry is full.
    pub fn record(&self, name: &str, handle: usize) -> bool {
        if handle == 0 {
            return false;
        }
        let mut entries = self.entries();
        if entries.iter().any(|e| e.handle == handle) {
            return false;
        }
        if entries.len() >= LIBRARY_CAPACITY {
            log::warn!(
                "library registry full ({}), '{}' will not be searched",
                LIBRARY_CAPACITY,
                name
            );
            return false;
        }
        entries.push(LibraryEntry {
            name: name.to_string(),
            handle,
        });
        true
    }

    /// Open the host image and track it as [`HOST_LIBRARY`].
    pub fn open_host(&self) -> usize {
        let handle = open_self();
        self.record(HOST_LIBRARY, handle);
        handle
    }

    /// Probing open with [`DEFAULT_OPEN_FLAGS`]; successful opens are tracked.
    pub fn open(&self, name: &str) -> Result<usize> {
        self.open_with(name, DEFAULT_OPEN_FLAGS)
    }

    pub fn open_with(&self, name: &str, flags: c_int) -> Result<usize> {
        let handle = open_probing(name, &self.platform, flags)?;
        self.record(name, handle);
        Ok(handle)
    }

    /// First handle recorded under [`HOST_LIBRARY`].
    pub fn host_handle(&self) -> Option<usize> {
        self.entries()
            .iter()
            .find(|e| e.name == HOST_LIBRARY)
            .map(|e| e.handle)
    }

    /// Search the host image, then the other tracked libraries in insertion
    /// order. Returns the owning handle with the address.
    ///
    /// A library handle also searches its own dependencies, so the host goes
    /// first: a libc symbol reached through some library's dependency list
    /// still belongs to the host.
    pub fn lookup(&self, symbol: &str) -> Option<(usize, usize)> {
        let mut handles: Vec<(bool, usize)> = self
            .entries()
            .iter()
            .map(|e| (e.name != HOST_LIBRARY, e.handle))
            .collect();
        handles.sort_by_key(|(foreign, _)| *foreign);
        handles
            .into_iter()
            .find_map(|(_, handle)| lookup_raw(handle, symbol).map(|addr| (handle, addr)))
    }

    pub fn contains(&self, handle: usize) -> bool {
        self.entries().iter().any(|e| e.handle == handle)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
