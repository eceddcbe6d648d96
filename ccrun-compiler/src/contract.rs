// C-facing entry points registered as builtins.
//
// Compiled code reaches the engine through these: the module contract
// (`__import`, `__sym`, `__import_free`) and the `dl*` family. Failures follow
// the C convention and come back as null; details go to stderr / the log.
//
// All of them use the runtime installed by `Runtime::global`.

#[cfg(unix)]
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr};
#[cfg(unix)]
use std::ffi::{c_int, CString};
use std::path::Path;
use std::ptr;

use crate::module::Module;
use crate::runtime::Runtime;

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<std::borrow::Cow<'a, str>> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy())
    }
}

/// `void* __import(const char* path)`
pub(crate) unsafe extern "C" fn import_module(path: *const c_char) -> *mut c_void {
    let Some(path) = c_str(path) else {
        return ptr::null_mut();
    };
    let Some(runtime) = Runtime::installed() else {
        log::error!("__import(\"{}\"): no runtime installed", path);
        return ptr::null_mut();
    };
    match runtime.import(Path::new(path.as_ref())) {
        Ok(module) => {
            log::debug!("__import(\"{}\") -> {:?}", path, module.origin());
            Box::into_raw(Box::new(module)) as *mut c_void
        }
        Err(e) => {
            crate::report_error(&e, None);
            ptr::null_mut()
        }
    }
}

/// `void* __sym(void* module, const char* symbol)`
pub(crate) unsafe extern "C" fn module_symbol(module: *mut c_void, name: *const c_char) -> *mut c_void {
    if module.is_null() {
        return ptr::null_mut();
    }
    let Some(name) = c_str(name) else {
        return ptr::null_mut();
    };
    let module = &*(module as *const Module);
    module
        .symbol(&name)
        .map_or(ptr::null_mut(), |addr| addr as *mut c_void)
}

/// `void __import_free(void* module)`
pub(crate) unsafe extern "C" fn release_module(module: *mut c_void) {
    if !module.is_null() {
        drop(Box::from_raw(module as *mut Module));
    }
}

#[cfg(unix)]
struct DlError {
    pending: Option<CString>,
    /// Last string handed out; valid until the next `dlerror` call.
    returned: Option<CString>,
}

#[cfg(unix)]
thread_local! {
    static DL_ERROR: RefCell<DlError> = const {
        RefCell::new(DlError {
            pending: None,
            returned: None,
        })
    };
}

/// Queue `message` for the next `dlerror` on this thread.
#[cfg(unix)]
fn record_dl_error(message: String) {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    DL_ERROR.with(|slot| slot.borrow_mut().pending = Some(message));
}

/// `dlopen` through the probing opener; a null name is the host image.
#[cfg(unix)]
pub(crate) unsafe extern "C" fn dlopen(name: *const c_char, flags: c_int) -> *mut c_void {
    let Some(runtime) = Runtime::installed() else {
        return libc::dlopen(name, flags);
    };
    let Some(name) = c_str(name) else {
        return runtime
            .symbols()
            .libraries()
            .host_handle()
            .map_or(ptr::null_mut(), |h| h as *mut c_void);
    };
    match runtime.symbols().open_library_with(&name, flags) {
        Ok(handle) => handle as *mut c_void,
        Err(e) => {
            log::debug!("dlopen(\"{}\"): {}", name, e);
            record_dl_error(e.to_string());
            ptr::null_mut()
        }
    }
}

/// `dlsym` with the result passed through the ABI bridge.
#[cfg(unix)]
pub(crate) unsafe extern "C" fn dlsym(handle: *mut c_void, name: *const c_char) -> *mut c_void {
    let Some(runtime) = Runtime::installed() else {
        return libc::dlsym(handle, name);
    };
    let Some(symbol) = c_str(name) else {
        return ptr::null_mut();
    };
    match runtime.symbols().resolve_in(handle as usize, &symbol) {
        Some(addr) => addr as *mut c_void,
        None => {
            record_dl_error(format!("undefined symbol: {}", symbol));
            ptr::null_mut()
        }
    }
}

/// Registry-tracked handles stay open for the life of the process.
#[cfg(unix)]
pub(crate) unsafe extern "C" fn dlclose(handle: *mut c_void) -> c_int {
    if let Some(runtime) = Runtime::installed() {
        if runtime.symbols().libraries().contains(handle as usize) {
            return 0;
        }
    }
    libc::dlclose(handle)
}

/// Errors from the engine's own `dlopen`/`dlsym` first, then the loader's.
#[cfg(unix)]
pub(crate) unsafe extern "C" fn dlerror() -> *mut c_char {
    let own = DL_ERROR.with(|slot| {
        let mut slot = slot.borrow_mut();
        let message = slot.pending.take()?;
        let ptr = message.as_ptr() as *mut c_char;
        slot.returned = Some(message);
        Some(ptr)
    });
    own.unwrap_or_else(|| libc::dlerror())
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    #[test]
    fn test_null_arguments_yield_null() {
        unsafe {
            assert!(import_module(ptr::null()).is_null());
            assert!(module_symbol(ptr::null_mut(), ptr::null()).is_null());
            release_module(ptr::null_mut());
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_dl_functions_work_without_runtime() {
        if Runtime::installed().is_some() {
            return;
        }
        let name = CString::new("strlen").unwrap();
        unsafe {
            let host = dlopen(ptr::null(), libc::RTLD_NOW);
            assert!(!host.is_null());
            assert!(!dlsym(host, name.as_ptr()).is_null());
            assert_eq!(dlclose(host), 0);
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_dlerror_reports_engine_failure_once() {
        record_dl_error("cannot open library 'nope'".to_string());
        unsafe {
            let message = dlerror();
            assert!(!message.is_null());
            assert_eq!(
                CStr::from_ptr(message).to_str().unwrap(),
                "cannot open library 'nope'"
            );
            // Drained: falls through to the loader, which has nothing pending.
            assert!(dlerror().is_null());
        }
    }
}
