// Module loader: import a source file or relocatable object into memory,
// using the object cache beside the source when it is usable.

use std::path::{Path, PathBuf};

use ccrun_runtime::ExecutionResult;

use crate::cache::{tagged_path, CacheValidity, ObjectCache};
use crate::error::{EngineError, Result};
use crate::runtime::{c_string_literal, run_entry, Runtime};
use crate::session::{CompilerSession, OutputMode};
use crate::MAX_PATH_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOrigin {
    /// Compiled from source in this process
    Compiled,
    /// Loaded from `<stem>.<arch>.o` instead of compiling
    Cached,
    /// An object file imported directly
    Object,
}

/// A relocated unit whose symbols can be looked up and called.
#[derive(Debug)]
pub struct Module {
    path: PathBuf,
    origin: ModuleOrigin,
    session: CompilerSession,
}

impl Module {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    pub fn symbol(&self, name: &str) -> Option<usize> {
        self.session.symbol(name)
    }

    /// Run `main(argc, argv, envp)` with `argv[0]` set to the module path.
    pub fn run_main(&self, args: &[String]) -> Result<ExecutionResult> {
        let program = self.path.display().to_string();
        run_entry(&self.session, "main", &program, args)
    }
}

pub(crate) fn validate_path(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len == 0 {
        return Err(EngineError::InvalidArgument("empty path".to_string()));
    }
    if len > MAX_PATH_LEN {
        return Err(EngineError::InvalidArgument(format!(
            "path exceeds {} bytes",
            MAX_PATH_LEN
        )));
    }
    Ok(())
}

fn is_object_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("o"))
}

/// Source text with a `#line` marker so diagnostics name the real file.
fn file_source(path: &Path, text: &str) -> String {
    format!(
        "#line 1 {}\n{}\n",
        c_string_literal(&path.display().to_string()),
        text
    )
}

impl Runtime {
    /// Load `path` as a module.
    ///
    /// - `foo.o`: loaded directly, or `foo.<arch>.o` when `foo.o` is absent
    /// - `foo.c` with a usable cache: the cached object is loaded
    /// - otherwise the source is compiled; a cache object is written first
    ///   (best effort)
    pub fn import(&self, path: &Path) -> Result<Module> {
        validate_path(path)?;
        let arch = self.platform().cache_arch();

        if is_object_path(path) {
            let object = if path.exists() {
                path.to_path_buf()
            } else {
                let tagged = tagged_path(path, arch);
                if !tagged.exists() {
                    return Err(EngineError::FileNotFound(path.to_path_buf()));
                }
                tagged
            };
            return self.load_object(path, &object, ModuleOrigin::Object);
        }

        let cache = ObjectCache::for_source(path, arch);
        let validity = cache.validity();
        log::debug!("{}: cache {:?}", path.display(), validity);
        if validity.is_usable() {
            match self.load_object(path, cache.object_path(), ModuleOrigin::Cached) {
                Ok(module) => return Ok(module),
                Err(e) if validity == CacheValidity::Fresh => {
                    log::warn!(
                        "ignoring unusable cache {}: {}",
                        cache.object_path().display(),
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let unit = path.display().to_string();
        let source = file_source(path, &text);

        if let Err(e) = self.write_object(&unit, &source, cache.object_path()) {
            log::warn!(
                "object cache {} not written: {}",
                cache.object_path().display(),
                e
            );
        }

        let session = self.build(&unit, |s| s.compile_string(&source))?;
        log::info!("compiled {}", unit);
        Ok(Module {
            path: path.to_path_buf(),
            origin: ModuleOrigin::Compiled,
            session,
        })
    }

    /// Import `path` and run its `main`; the result is the program's.
    pub fn run_file(&self, path: &Path, args: &[String]) -> Result<ExecutionResult> {
        self.import(path)?.run_main(args)
    }

    fn load_object(&self, path: &Path, object: &Path, origin: ModuleOrigin) -> Result<Module> {
        let unit = object.display().to_string();
        let session = self.build(&unit, |s| s.add_file(object))?;
        log::info!("loaded object {}", unit);
        Ok(Module {
            path: path.to_path_buf(),
            origin,
            session,
        })
    }

    /// Compile `source` into a relocatable object at `object`.
    pub fn write_object(&self, unit: &str, source: &str, object: &Path) -> Result<()> {
        let mut session = self.create_session(OutputMode::Object, unit)?;
        session.compile_string(source)?;
        session.output_file(object)?;
        log::debug!("wrote {}", object.display());
        Ok(())
    }
}

#[cfg(test)]
mod module_tests {
    use super::*;

    #[test]
    fn test_path_validation() {
        assert!(matches!(
            validate_path(Path::new("")),
            Err(EngineError::InvalidArgument(_))
        ));
        let long = "a".repeat(MAX_PATH_LEN + 1);
        assert!(validate_path(Path::new(&long)).is_err());
        assert!(validate_path(Path::new("ok.c")).is_ok());
    }

    #[test]
    fn test_object_detection() {
        assert!(is_object_path(Path::new("x/y.o")));
        assert!(is_object_path(Path::new("Y.O")));
        assert!(!is_object_path(Path::new("y.c")));
        assert!(!is_object_path(Path::new("noext")));
    }

    #[test]
    fn test_file_source_marks_path() {
        let source = file_source(Path::new("dir/m.c"), "int main(){return 0;}");
        assert!(source.starts_with("#line 1 \"dir/m.c\"\n"));
    }
}
