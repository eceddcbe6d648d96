// Runtime binding to the TinyCC shared library (libtcc).
//
// libtcc is opened with libloading instead of being linked, so the engine
// builds without TinyCC installed and reports a CompilerInit error at run time.

use std::ffi::{c_char, c_int, c_void};
use std::path::Path;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::platform::Platform;
use crate::symbols::libraries::library_candidates;

/// Opaque `TCCState`
#[repr(C)]
pub struct TccState {
    _private: [u8; 0],
}

pub type ErrorCallback = unsafe extern "C" fn(opaque: *mut c_void, msg: *const c_char);

/// Relocation target meaning "allocate the code region internally".
/// Ignored by libtcc builds whose `tcc_relocate` takes a single argument.
pub const RELOCATE_AUTO: *mut c_void = 1 as *mut c_void;

/// Output-type numbering changed after the 0.9.27 release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TccAbi {
    /// 0.9.27: MEMORY=1 EXE=2 DLL=3 OBJ=4
    Release,
    /// Development branch: MEMORY=1 EXE=2 OBJ=3 DLL=4
    Mob,
}

impl TccAbi {
    pub const OUTPUT_MEMORY: c_int = 1;

    pub fn output_object(self) -> c_int {
        match self {
            TccAbi::Release => 4,
            TccAbi::Mob => 3,
        }
    }
}

/// Function table resolved from libtcc.
pub struct Libtcc {
    _library: libloading::Library,
    path: String,
    abi: TccAbi,
    pub(crate) new: unsafe extern "C" fn() -> *mut TccState,
    pub(crate) delete: unsafe extern "C" fn(*mut TccState),
    pub(crate) set_lib_path: unsafe extern "C" fn(*mut TccState, *const c_char),
    pub(crate) set_error_func:
        unsafe extern "C" fn(*mut TccState, *mut c_void, Option<ErrorCallback>),
    pub(crate) set_options: unsafe extern "C" fn(*mut TccState, *const c_char),
    pub(crate) add_include_path: unsafe extern "C" fn(*mut TccState, *const c_char) -> c_int,
    pub(crate) add_sysinclude_path: unsafe extern "C" fn(*mut TccState, *const c_char) -> c_int,
    pub(crate) define_symbol: unsafe extern "C" fn(*mut TccState, *const c_char, *const c_char),
    pub(crate) compile_string: unsafe extern "C" fn(*mut TccState, *const c_char) -> c_int,
    pub(crate) set_output_type: unsafe extern "C" fn(*mut TccState, c_int) -> c_int,
    pub(crate) add_file: unsafe extern "C" fn(*mut TccState, *const c_char) -> c_int,
    pub(crate) add_library_path: unsafe extern "C" fn(*mut TccState, *const c_char) -> c_int,
    pub(crate) add_library: unsafe extern "C" fn(*mut TccState, *const c_char) -> c_int,
    pub(crate) add_symbol:
        unsafe extern "C" fn(*mut TccState, *const c_char, *const c_void) -> c_int,
    pub(crate) output_file: unsafe extern "C" fn(*mut TccState, *const c_char) -> c_int,
    pub(crate) relocate: unsafe extern "C" fn(*mut TccState, *mut c_void) -> c_int,
    pub(crate) get_symbol: unsafe extern "C" fn(*mut TccState, *const c_char) -> *mut c_void,
}

impl std::fmt::Debug for Libtcc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Libtcc")
            .field("path", &self.path)
            .field("abi", &self.abi)
            .finish_non_exhaustive()
    }
}

fn load_fn<T: Copy>(library: &libloading::Library, path: &str, name: &str) -> Result<T> {
    let symbol = unsafe { library.get::<T>(name.as_bytes()) }
        .map_err(|e| EngineError::CompilerInit(format!("{}: missing {}: {}", path, name, e)))?;
    Ok(*symbol)
}

impl Libtcc {
    /// Locate libtcc: `CCRUN_LIBTCC` when set, otherwise probe for `tcc`.
    pub fn load(config: &Config, platform: &Platform) -> Result<Self> {
        if let Some(path) = &config.libtcc_path {
            return Self::open(path);
        }

        let mut failures = Vec::new();
        for candidate in library_candidates("tcc", platform) {
            match Self::open(Path::new(&candidate)) {
                Ok(tcc) => return Ok(tcc),
                Err(e) => failures.push(e.to_string()),
            }
        }
        log::debug!("libtcc probing failed:\n  {}", failures.join("\n  "));
        Err(EngineError::CompilerInit(format!(
            "libtcc not found (set {} to its path)",
            crate::config::ENV_LIBTCC
        )))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| EngineError::CompilerInit(format!("{}: {}", display, e)))?;

        let abi = if unsafe { library.get::<*mut c_void>(b"tcc_set_backtrace_func\0") }.is_ok() {
            TccAbi::Mob
        } else {
            TccAbi::Release
        };

        let tcc = Self {
            new: load_fn(&library, &display, "tcc_new")?,
            delete: load_fn(&library, &display, "tcc_delete")?,
            set_lib_path: load_fn(&library, &display, "tcc_set_lib_path")?,
            set_error_func: load_fn(&library, &display, "tcc_set_error_func")?,
            set_options: load_fn(&library, &display, "tcc_set_options")?,
            add_include_path: load_fn(&library, &display, "tcc_add_include_path")?,
            add_sysinclude_path: load_fn(&library, &display, "tcc_add_sysinclude_path")?,
            define_symbol: load_fn(&library, &display, "tcc_define_symbol")?,
            compile_string: load_fn(&library, &display, "tcc_compile_string")?,
            set_output_type: load_fn(&library, &display, "tcc_set_output_type")?,
            add_file: load_fn(&library, &display, "tcc_add_file")?,
            add_library_path: load_fn(&library, &display, "tcc_add_library_path")?,
            add_library: load_fn(&library, &display, "tcc_add_library")?,
            add_symbol: load_fn(&library, &display, "tcc_add_symbol")?,
            output_file: load_fn(&library, &display, "tcc_output_file")?,
            relocate: load_fn(&library, &display, "tcc_relocate")?,
            get_symbol: load_fn(&library, &display, "tcc_get_symbol")?,
            _library: library,
            path: display,
            abi,
        };
        log::info!("loaded libtcc from {} ({:?} ABI)", tcc.path, tcc.abi);
        Ok(tcc)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn abi(&self) -> TccAbi {
        self.abi
    }

    /// Entry points handed to compiled code, so a program can drive a
    /// compiler of its own.
    pub(crate) fn exported_api(&self) -> [(&'static str, usize); 15] {
        [
            ("tcc_new", self.new as usize),
            ("tcc_delete", self.delete as usize),
            ("tcc_set_error_func", self.set_error_func as usize),
            ("tcc_set_output_type", self.set_output_type as usize),
            ("tcc_set_options", self.set_options as usize),
            ("tcc_add_include_path", self.add_include_path as usize),
            ("tcc_add_sysinclude_path", self.add_sysinclude_path as usize),
            ("tcc_add_library_path", self.add_library_path as usize),
            ("tcc_add_library", self.add_library as usize),
            ("tcc_add_symbol", self.add_symbol as usize),
            ("tcc_add_file", self.add_file as usize),
            ("tcc_compile_string", self.compile_string as usize),
            ("tcc_relocate", self.relocate as usize),
            ("tcc_get_symbol", self.get_symbol as usize),
            ("tcc_output_file", self.output_file as usize),
        ]
    }
}

#[cfg(test)]
mod tcc_tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_object_output_numbering() {
        assert_eq!(TccAbi::Release.output_object(), 4);
        assert_eq!(TccAbi::Mob.output_object(), 3);
        assert_eq!(TccAbi::OUTPUT_MEMORY, 1);
    }

    #[test]
    fn test_open_missing_library() {
        let err = Libtcc::open(Path::new("/nonexistent/libtcc.so")).unwrap_err();
        assert!(matches!(err, EngineError::CompilerInit(_)));
    }

    #[test]
    fn test_explicit_path_is_not_probed() {
        let config = Config {
            libtcc_path: Some(PathBuf::from("/nonexistent/custom-libtcc.so")),
            ..Config::default()
        };
        let err = Libtcc::load(&config, &Platform::detect()).unwrap_err();
        assert!(err.to_string().contains("custom-libtcc.so"));
    }
}
