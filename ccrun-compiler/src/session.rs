// CompilerSession: one owned TCCState plus the messages it produced.

use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::tcc::{Libtcc, TccAbi, TccState, RELOCATE_AUTO};

/// Where compiled code ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Relocated into this process and callable
    Memory,
    /// Written out as a relocatable object file
    Object,
}

/// Collects compiler errors; warnings only go to the trace log.
#[derive(Debug, Default)]
struct MessageSink {
    messages: RefCell<Vec<String>>,
}

unsafe extern "C" fn collect_message(opaque: *mut c_void, msg: *const c_char) {
    if opaque.is_null() || msg.is_null() {
        return;
    }
    let sink = &*(opaque as *const MessageSink);
    let text = CStr::from_ptr(msg).to_string_lossy().into_owned();
    if text.contains("warning:") {
        log::debug!("tcc: {}", text);
        return;
    }
    log::trace!("tcc: {}", text);
    sink.messages.borrow_mut().push(text);
}

pub struct CompilerSession {
    state: NonNull<TccState>,
    tcc: Arc<Libtcc>,
    // Boxed so its address stays valid as the opaque error-callback pointer.
    sink: Box<MessageSink>,
    mode: OutputMode,
    unit: String,
    relocated: bool,
}

impl std::fmt::Debug for CompilerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerSession")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("unit", &self.unit)
            .field("relocated", &self.relocated)
            .finish()
    }
}

impl CompilerSession {
    /// Fresh compiler state with the error callback wired up. Output mode is
    /// applied by [`CompilerSession::set_output_mode`] before any symbol is added.
    pub(crate) fn new(tcc: Arc<Libtcc>, mode: OutputMode, unit: impl Into<String>) -> Result<Self> {
        let raw = unsafe { (tcc.new)() };
        let state = NonNull::new(raw)
            .ok_or_else(|| EngineError::CompilerInit("tcc_new returned null".to_string()))?;

        let sink = Box::new(MessageSink::default());
        unsafe {
            (tcc.set_error_func)(
                state.as_ptr(),
                &*sink as *const MessageSink as *mut c_void,
                Some(collect_message),
            );
        }

        Ok(Self {
            state,
            tcc,
            sink,
            mode,
            unit: unit.into(),
            relocated: false,
        })
    }

    fn raw(&self) -> *mut TccState {
        self.state.as_ptr()
    }

    /// Address used to identify this session in crash reports
    pub fn id(&self) -> usize {
        self.state.as_ptr() as usize
    }

    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    /// Name used in diagnostics (`(inline)`, a path, `<repl>`)
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_relocated(&self) -> bool {
        self.relocated
    }

    pub(crate) fn set_output_mode(&mut self) -> Result<()> {
        let value = match self.mode {
            OutputMode::Memory => TccAbi::OUTPUT_MEMORY,
            OutputMode::Object => self.tcc.abi().output_object(),
        };
        let rc = unsafe { (self.tcc.set_output_type)(self.raw(), value) };
        self.check(rc, "set output type")
    }

    /// Drain collected compiler messages.
    pub fn take_messages(&self) -> Vec<String> {
        std::mem::take(&mut *self.sink.messages.borrow_mut())
    }

    fn check(&self, rc: i32, what: &str) -> Result<()> {
        if rc < 0 {
            let mut messages = self.take_messages();
            if messages.is_empty() {
                messages.push(format!("tcc: error: {} failed", what));
            }
            Err(EngineError::compilation(self.unit.clone(), messages))
        } else {
            Ok(())
        }
    }

    pub fn set_options(&mut self, options: &str) -> Result<()> {
        let options = cstring(options)?;
        unsafe { (self.tcc.set_options)(self.raw(), options.as_ptr()) };
        // tcc reports bad options through the error callback
        let messages = self.take_messages();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(EngineError::InvalidArgument(messages.join("; ")))
        }
    }

    pub fn set_lib_path(&mut self, path: &Path) -> Result<()> {
        let path = path_cstring(path)?;
        unsafe { (self.tcc.set_lib_path)(self.raw(), path.as_ptr()) };
        Ok(())
    }

    pub fn add_include_path(&mut self, path: &Path) -> Result<()> {
        let c = path_cstring(path)?;
        let rc = unsafe { (self.tcc.add_include_path)(self.raw(), c.as_ptr()) };
        self.check(rc, "add include path")
    }

    pub fn add_sysinclude_path(&mut self, path: &Path) -> Result<()> {
        let c = path_cstring(path)?;
        let rc = unsafe { (self.tcc.add_sysinclude_path)(self.raw(), c.as_ptr()) };
        self.check(rc, "add system include path")
    }

    pub fn add_library_path(&mut self, path: &Path) -> Result<()> {
        let c = path_cstring(path)?;
        let rc = unsafe { (self.tcc.add_library_path)(self.raw(), c.as_ptr()) };
        self.check(rc, "add library path")
    }

    pub fn add_library(&mut self, name: &str) -> Result<()> {
        let c = cstring(name)?;
        let rc = unsafe { (self.tcc.add_library)(self.raw(), c.as_ptr()) };
        self.check(rc, &format!("add library '{}'", name))
    }

    /// `#define name value` (value defaults to `1` in the compiler)
    pub fn define(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        let name = cstring(name)?;
        let value = value.map(cstring).transpose()?;
        unsafe {
            (self.tcc.define_symbol)(
                self.raw(),
                name.as_ptr(),
                value.as_ref().map_or(std::ptr::null(), |v| v.as_ptr()),
            )
        };
        Ok(())
    }

    /// Make `address` visible to compiled code as `name`.
    pub fn add_symbol(&mut self, name: &str, address: usize) -> Result<()> {
        if address == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "null address for symbol '{}'",
                name
            )));
        }
        let c = cstring(name)?;
        let rc = unsafe { (self.tcc.add_symbol)(self.raw(), c.as_ptr(), address as *const c_void) };
        self.check(rc, &format!("add symbol '{}'", name))
    }

    pub fn compile_string(&mut self, code: &str) -> Result<()> {
        let c = cstring(code)?;
        let rc = unsafe { (self.tcc.compile_string)(self.raw(), c.as_ptr()) };
        self.check(rc, "compile")
    }

    /// Add a source, object, or library file (type chosen by extension).
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        let c = path_cstring(path)?;
        let rc = unsafe { (self.tcc.add_file)(self.raw(), c.as_ptr()) };
        self.check(rc, &format!("add file {}", path.display()))
    }

    /// Write the compiled unit to `path` (object mode).
    pub fn output_file(&mut self, path: &Path) -> Result<()> {
        let c = path_cstring(path)?;
        let rc = unsafe { (self.tcc.output_file)(self.raw(), c.as_ptr()) };
        self.check(rc, &format!("write {}", path.display()))
    }

    /// Link and load into executable memory. Symbols become resolvable afterwards.
    pub fn relocate(&mut self) -> Result<()> {
        if self.mode != OutputMode::Memory {
            return Err(EngineError::InvalidArgument(
                "only memory-mode sessions can be relocated".to_string(),
            ));
        }
        if self.relocated {
            return Ok(());
        }
        let rc = unsafe { (self.tcc.relocate)(self.raw(), RELOCATE_AUTO) };
        self.check(rc, "relocate")?;
        self.relocated = true;
        Ok(())
    }

    /// Address of a compiled symbol; `None` before relocation or when absent.
    pub fn symbol(&self, name: &str) -> Option<usize> {
        if !self.relocated {
            return None;
        }
        let c = CString::new(name).ok()?;
        let addr = unsafe { (self.tcc.get_symbol)(self.raw(), c.as_ptr()) };
        (!addr.is_null()).then_some(addr as usize)
    }
}

impl Drop for CompilerSession {
    fn drop(&mut self) {
        log::trace!("deleting compiler session for {}", self.unit);
        unsafe { (self.tcc.delete)(self.raw()) };
    }
}

fn cstring(value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| EngineError::InvalidArgument(format!("interior NUL byte in {:?}", value)))
}

fn path_cstring(path: &Path) -> Result<CString> {
    cstring(&path.to_string_lossy())
}

/// Symbol names from "undefined symbol 'x'" link errors.
pub(crate) fn undefined_symbols(messages: &[String]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| {
            let rest = &m[m.find("undefined symbol")? + "undefined symbol".len()..];
            let name = rest
                .trim()
                .trim_matches(|c| c == '\'' || c == '"' || c == '`')
                .to_string();
            (!name.is_empty()).then_some(name)
        })
        .collect()
}

#[cfg(test)]
mod session_tests {
    use super::*;

    #[test]
    fn test_undefined_symbols_extracted() {
        let messages = vec![
            "tcc: error: undefined symbol 'puts'".to_string(),
            "<string>:3: error: ';' expected".to_string(),
            "tcc: error: undefined symbol 'sqrtf'".to_string(),
        ];
        assert_eq!(undefined_symbols(&messages), vec!["puts", "sqrtf"]);
    }

    #[test]
    fn test_sink_filters_warnings() {
        let sink = MessageSink::default();
        let opaque = &sink as *const MessageSink as *mut c_void;
        let warning = CString::new("a.c:1: warning: unused").unwrap();
        let error = CString::new("a.c:2: error: boom").unwrap();
        unsafe {
            collect_message(opaque, warning.as_ptr());
            collect_message(opaque, error.as_ptr());
            collect_message(std::ptr::null_mut(), error.as_ptr());
        }
        assert_eq!(*sink.messages.borrow(), vec!["a.c:2: error: boom".to_string()]);
    }

    #[test]
    fn test_cstring_rejects_nul() {
        assert!(matches!(
            cstring("a\0b"),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
