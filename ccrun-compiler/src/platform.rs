// Platform detection and platform-specific defaults

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    MacOs,
    Windows,
    OtherUnix,
}

/// Platform information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: OsFamily,
    pub arch: &'static str,
}

impl Platform {
    /// Detect current platform
    pub fn detect() -> Self {
        Self {
            os: detect_os(),
            arch: std::env::consts::ARCH,
        }
    }

    pub fn new(os: OsFamily, arch: &'static str) -> Self {
        Self { os, arch }
    }

    /// Preprocessor symbols every session defines for this target
    pub fn target_defines(&self) -> &'static [&'static str] {
        match self.os {
            OsFamily::Windows => &["_WIN32", "WIN32", "_WINDOWS"],
            OsFamily::MacOs => &["__APPLE__", "__MACH__"],
            OsFamily::Linux => &["__unix__", "__linux__"],
            OsFamily::OtherUnix => &["__unix__"],
        }
    }

    /// Include directories tried by default, in priority order.
    /// Only the ones that exist get registered.
    pub fn default_include_candidates(&self) -> Vec<PathBuf> {
        let dirs: &[&str] = match self.os {
            OsFamily::Windows => &[],
            OsFamily::MacOs => &[
                "/opt/homebrew/include",
                "/usr/local/include",
                "/Library/Developer/CommandLineTools/SDKs/MacOSX.sdk/usr/include",
                "/Applications/Xcode.app/Contents/Developer/Toolchains/XcodeDefault.xctoolchain/usr/include",
            ],
            OsFamily::Linux | OsFamily::OtherUnix => {
                &["/usr/local/include", "/usr/include", "/opt/local/include"]
            }
        };
        dirs.iter().map(PathBuf::from).collect()
    }

    pub fn default_library_candidates(&self) -> Vec<PathBuf> {
        match self.os {
            OsFamily::Windows => Vec::new(),
            OsFamily::MacOs => ["/opt/homebrew/lib", "/usr/local/lib", "/usr/lib"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            OsFamily::Linux => vec![
                PathBuf::from("/usr/local/lib"),
                PathBuf::from(format!("/usr/lib/{}-linux-gnu", self.arch)),
                PathBuf::from("/usr/lib"),
                PathBuf::from("/lib"),
            ],
            OsFamily::OtherUnix => ["/usr/local/lib", "/usr/lib"]
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }

    pub fn default_include_dirs(&self) -> Vec<PathBuf> {
        existing(self.default_include_candidates())
    }

    pub fn default_library_dirs(&self) -> Vec<PathBuf> {
        existing(self.default_library_candidates())
    }

    /// Shared-library extensions in the order the probing opener tries them
    pub fn library_extensions(&self) -> &'static [&'static str] {
        match self.os {
            OsFamily::MacOs => &[".dylib", ".so", ".dll"],
            OsFamily::Windows => &[".dll", ".so", ".dylib"],
            OsFamily::Linux | OsFamily::OtherUnix => &[".so", ".dylib", ".dll"],
        }
    }

    /// Separator for path lists in configuration values.
    /// `;` wins whenever it appears; Windows never uses `:` (drive letters).
    pub fn split_path_list(&self, value: &str) -> Vec<PathBuf> {
        let separator = if self.os == OsFamily::Windows || value.contains(';') {
            ';'
        } else {
            ':'
        };
        value
            .split(separator)
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Architecture tag used in object cache file names
    pub fn cache_arch(&self) -> &'static str {
        self.arch
    }

    pub fn display_name(&self) -> String {
        let os_name = match self.os {
            OsFamily::Linux => "Linux",
            OsFamily::MacOs => "macOS",
            OsFamily::Windows => "Windows",
            OsFamily::OtherUnix => "Unix",
        };
        let arch_name = match self.arch {
            "x86_64" => "x86-64",
            "aarch64" => "ARM64",
            "riscv64" => "RISC-V 64",
            other => other,
        };
        format!("{} {}", os_name, arch_name)
    }
}

fn existing(candidates: Vec<PathBuf>) -> Vec<PathBuf> {
    candidates.into_iter().filter(|p| p.is_dir()).collect()
}

/// Detect operating system
fn detect_os() -> OsFamily {
    if cfg!(target_os = "linux") {
        OsFamily::Linux
    } else if cfg!(target_os = "macos") {
        OsFamily::MacOs
    } else if cfg!(target_os = "windows") {
        OsFamily::Windows
    } else {
        OsFamily::OtherUnix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let platform = Platform::detect();
        assert!(!platform.arch.is_empty());
        assert_eq!(platform.cache_arch(), std::env::consts::ARCH);
        assert!(!platform.target_defines().is_empty());
    }

    #[test]
    fn test_split_path_list() {
        let linux = Platform::new(OsFamily::Linux, "x86_64");
        assert_eq!(
            linux.split_path_list(" /a : /b::/c "),
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
        // ';' takes precedence when present
        assert_eq!(
            linux.split_path_list("/a:x;/b"),
            vec![PathBuf::from("/a:x"), PathBuf::from("/b")]
        );

        let windows = Platform::new(OsFamily::Windows, "x86_64");
        assert_eq!(
            windows.split_path_list(r"C:\inc;D:\more"),
            vec![PathBuf::from(r"C:\inc"), PathBuf::from(r"D:\more")]
        );
        assert!(linux.split_path_list("  ").is_empty());
    }

    #[test]
    fn test_extension_order() {
        let mac = Platform::new(OsFamily::MacOs, "aarch64");
        assert_eq!(mac.library_extensions().first(), Some(&".dylib"));
        let win = Platform::new(OsFamily::Windows, "x86_64");
        assert_eq!(win.library_extensions().first(), Some(&".dll"));
    }

    #[test]
    fn test_default_dirs_exist() {
        let platform = Platform::detect();
        for dir in platform.default_include_dirs() {
            assert!(dir.is_dir());
        }
        assert_eq!(
            Platform::new(OsFamily::Linux, "aarch64").display_name(),
            "Linux ARM64"
        );
    }
}
