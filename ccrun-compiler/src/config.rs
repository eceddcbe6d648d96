//! Process-wide configuration read from the environment.
//!
//! | Variable              | Meaning                                               |
//! |-----------------------|-------------------------------------------------------|
//! | `CCRUN_TRACE`         | verbose logging (`0`/empty = off)                     |
//! | `CCRUN_INCLUDE_PATHS` | extra include directories                             |
//! | `CCRUN_LIBRARY_PATHS` | extra library directories                             |
//! | `CCRUN_HOST_LIBS`     | libraries opened at startup (probing opener)          |
//! | `CCRUN_LIBTCC`        | explicit path of the TinyCC shared library            |
//! | `CCRUN_TCC_LIB_PATH`  | TinyCC runtime directory (`libtcc1.a`, headers)       |
//! | `CCRUN_FOREIGN_ABI`   | calling convention of loaded libraries                |

use std::path::PathBuf;
use std::sync::OnceLock;

use ccrun_runtime::CallingConvention;

use crate::error::{EngineError, Result};
use crate::platform::Platform;

pub const ENV_TRACE: &str = "CCRUN_TRACE";
pub const ENV_INCLUDE_PATHS: &str = "CCRUN_INCLUDE_PATHS";
pub const ENV_LIBRARY_PATHS: &str = "CCRUN_LIBRARY_PATHS";
pub const ENV_HOST_LIBS: &str = "CCRUN_HOST_LIBS";
pub const ENV_LIBTCC: &str = "CCRUN_LIBTCC";
pub const ENV_TCC_LIB_PATH: &str = "CCRUN_TCC_LIB_PATH";
pub const ENV_FOREIGN_ABI: &str = "CCRUN_FOREIGN_ABI";

static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub trace: bool,
    pub include_paths: Vec<PathBuf>,
    pub library_paths: Vec<PathBuf>,
    pub host_libraries: Vec<String>,
    pub libtcc_path: Option<PathBuf>,
    pub tcc_lib_path: Option<PathBuf>,
    pub foreign_abi: CallingConvention,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trace: false,
            include_paths: Vec::new(),
            library_paths: Vec::new(),
            host_libraries: Vec::new(),
            libtcc_path: None,
            tcc_lib_path: None,
            foreign_abi: CallingConvention::native(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let platform = Platform::detect();
        let paths = |key: &str| {
            lookup(key)
                .map(|v| platform.split_path_list(&v))
                .unwrap_or_default()
        };
        let single = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let foreign_abi = match single(ENV_FOREIGN_ABI) {
            Some(name) => CallingConvention::parse(&name).unwrap_or_else(|| {
                log::warn!("unknown {} value '{}', using native", ENV_FOREIGN_ABI, name);
                CallingConvention::native()
            }),
            None => CallingConvention::native(),
        };

        Self {
            trace: trace_enabled(lookup(ENV_TRACE).as_deref()),
            include_paths: paths(ENV_INCLUDE_PATHS),
            library_paths: paths(ENV_LIBRARY_PATHS),
            host_libraries: paths(ENV_HOST_LIBS)
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            libtcc_path: single(ENV_LIBTCC).map(PathBuf::from),
            tcc_lib_path: single(ENV_TCC_LIB_PATH).map(PathBuf::from),
            foreign_abi,
        }
    }

    /// Read the environment once. Later calls return the same values.
    pub fn init() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    /// Install an explicit configuration. No effect if one is already installed.
    pub fn init_with(config: Config) -> &'static Config {
        CONFIG.get_or_init(|| config)
    }

    pub fn get() -> Result<&'static Config> {
        CONFIG.get().ok_or(EngineError::ConfigNotInitialized)
    }
}

/// `0`, negative numbers and empty strings disable tracing; positive numbers
/// and any non-numeric text enable it.
pub fn trace_enabled(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => match v.parse::<i64>() {
            Ok(n) => n > 0,
            Err(_) => true,
        },
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_trace_values() {
        assert!(!trace_enabled(None));
        assert!(!trace_enabled(Some("")));
        assert!(!trace_enabled(Some("0")));
        assert!(trace_enabled(Some("1")));
        assert!(trace_enabled(Some("3")));
        assert!(trace_enabled(Some("yes")));
        assert!(!trace_enabled(Some("-1")));
    }

    #[test]
    fn test_empty_environment() {
        let config = config_from(&[]);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_paths_and_libraries() {
        let config = config_from(&[
            (ENV_INCLUDE_PATHS, "/opt/inc;/usr/share/inc"),
            (ENV_LIBRARY_PATHS, "/opt/lib"),
            (ENV_HOST_LIBS, "m;z"),
            (ENV_LIBTCC, " /opt/tcc/libtcc.so "),
            (ENV_TRACE, "1"),
        ]);
        assert!(config.trace);
        assert_eq!(
            config.include_paths,
            vec![PathBuf::from("/opt/inc"), PathBuf::from("/usr/share/inc")]
        );
        assert_eq!(config.library_paths, vec![PathBuf::from("/opt/lib")]);
        assert_eq!(config.host_libraries, vec!["m".to_string(), "z".to_string()]);
        assert_eq!(config.libtcc_path, Some(PathBuf::from("/opt/tcc/libtcc.so")));
        assert_eq!(config.tcc_lib_path, None);
    }

    #[test]
    fn test_foreign_abi() {
        let config = config_from(&[(ENV_FOREIGN_ABI, "win64")]);
        assert_eq!(config.foreign_abi, CallingConvention::Win64);

        let config = config_from(&[(ENV_FOREIGN_ABI, "bogus")]);
        assert_eq!(config.foreign_abi, CallingConvention::native());
    }
}
