//! C-style argument vectors for compiled entry points.

use std::ffi::{c_char, c_int, CString, OsString};

use crate::RuntimeError;

/// Owned `argv`/`envp` arrays, NULL-terminated, valid for the lifetime of the value.
#[derive(Debug)]
pub struct ProgramArgs {
    _args: Vec<CString>,
    _env: Vec<CString>,
    argv: Vec<*const c_char>,
    envp: Vec<*const c_char>,
}

impl ProgramArgs {
    /// Builds `argv` from `args` and `envp` from the current process environment.
    pub fn new<I, S>(args: I) -> Result<Self, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let env = std::env::vars_os().map(|(key, value)| {
            let mut entry = OsString::from(key);
            entry.push("=");
            entry.push(value);
            entry.to_string_lossy().into_owned()
        });
        Self::with_environment(args, env)
    }

    pub fn with_environment<I, S, E, V>(args: I, env: E) -> Result<Self, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        E: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let args = args
            .into_iter()
            .map(|a| to_cstring(a.into()))
            .collect::<Result<Vec<_>, _>>()?;
        // Environment entries with NUL bytes cannot be represented; drop them.
        let env: Vec<CString> = env
            .into_iter()
            .filter_map(|e| CString::new(e.into()).ok())
            .collect();

        let argv = args
            .iter()
            .map(|a| a.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        let envp = env
            .iter()
            .map(|e| e.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        Ok(Self {
            _args: args,
            _env: env,
            argv,
            envp,
        })
    }

    pub fn argc(&self) -> c_int {
        c_int::try_from(self.argv.len().saturating_sub(1)).unwrap_or(c_int::MAX)
    }

    pub fn argv(&self) -> *const *const c_char {
        self.argv.as_ptr()
    }

    pub fn envp(&self) -> *const *const c_char {
        self.envp.as_ptr()
    }
}

fn to_cstring(value: String) -> Result<CString, RuntimeError> {
    CString::new(value).map_err(|e| {
        let bytes = e.into_vec();
        RuntimeError::InvalidArgument(String::from_utf8_lossy(&bytes).into_owned())
    })
}
