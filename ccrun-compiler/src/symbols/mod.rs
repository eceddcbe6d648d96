// Symbol resolution: builtin table first, then opened libraries (through
// the ABI bridge).

pub mod builtins;
pub mod libraries;

use std::ffi::c_int;

use ccrun_runtime::{AbiBridge, CallingConvention};

use crate::error::Result;
use crate::platform::Platform;
use crate::session::CompilerSession;

pub use builtins::{builtins, BuiltinRoutine, BuiltinTable};
pub use libraries::{
    library_candidates, LibraryEntry, LibraryRegistry, DEFAULT_OPEN_FLAGS, LIBRARY_CAPACITY,
};

#[derive(Debug)]
pub struct SymbolResolver {
    builtins: &'static BuiltinTable,
    libraries: LibraryRegistry,
    bridge: AbiBridge,
}

impl SymbolResolver {
    /// Opens the host image (it becomes the bridge's host module) and sets up
    /// bridging for libraries using `foreign_abi`.
    pub fn new(platform: Platform, foreign_abi: CallingConvention) -> Self {
        let libraries = LibraryRegistry::new(platform);
        let bridge = AbiBridge::new(CallingConvention::native(), foreign_abi);
        let host = libraries.open_host();
        bridge.set_host_module(host);
        if bridge.requires_bridging() {
            log::info!(
                "bridging calls into {} libraries ({} host)",
                bridge.foreign_convention(),
                bridge.compiled_convention()
            );
        }
        Self {
            builtins: builtins(),
            libraries,
            bridge,
        }
    }

    /// Open each configured host library; failures are logged and skipped.
    pub fn preload(&self, names: &[String]) {
        for name in names {
            if let Err(e) = self.libraries.open(name) {
                log::warn!("host library '{}' not loaded: {}", name, e);
            }
        }
    }

    /// Register the builtin table into `session`. Returns how many were added.
    pub fn register_builtins(&self, session: &mut CompilerSession) -> usize {
        let mut registered = 0;
        for entry in self.builtins.registrable() {
            match session.add_symbol(entry.name, entry.address) {
                Ok(()) => registered += 1,
                Err(e) => log::warn!("builtin '{}' not registered: {}", entry.name, e),
            }
        }
        log::trace!("registered {} builtins", registered);
        registered
    }

    /// Builtins win; otherwise search opened libraries and bridge the result.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        if let Some(addr) = self.builtins.address(name) {
            return Some(addr);
        }
        let (handle, addr) = self.libraries.lookup(name)?;
        Some(self.bridge.wrap(handle, addr))
    }

    /// Lookup inside a specific library handle, bridged.
    pub fn resolve_in(&self, handle: usize, name: &str) -> Option<usize> {
        let addr = libraries::lookup_raw(handle, name)?;
        Some(self.bridge.wrap(handle, addr))
    }

    pub fn open_library(&self, name: &str) -> Result<usize> {
        self.libraries.open(name)
    }

    /// Open with caller-chosen loader flags. While bridging, a global open
    /// would put the library's symbols in the host scope, so it is kept local.
    pub fn open_library_with(&self, name: &str, flags: c_int) -> Result<usize> {
        #[cfg(unix)]
        let flags = if self.bridge.requires_bridging() && flags & libc::RTLD_GLOBAL != 0 {
            log::debug!("'{}' opened local: its calls are bridged", name);
            flags & !libc::RTLD_GLOBAL
        } else {
            flags
        };
        self.libraries.open_with(name, flags)
    }

    pub fn builtins(&self) -> &'static BuiltinTable {
        self.builtins
    }

    pub fn libraries(&self) -> &LibraryRegistry {
        &self.libraries
    }

    pub fn bridge(&self) -> &AbiBridge {
        &self.bridge
    }
}
