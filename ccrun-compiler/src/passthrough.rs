// Compiler passthrough: tcc-style command-line flags applied to a session,
// then either run in memory or written out as a relocatable object (`-c`).

use std::path::{Path, PathBuf};

use ccrun_runtime::ExecutionResult;

use crate::error::{EngineError, Result};
use crate::runtime::{run_entry, Runtime};
use crate::session::{CompilerSession, OutputMode};

/// Flags that take a value, either joined (`-Iinc`) or separate (`-I inc`).
const VALUE_FLAGS: &[&str] = &["-include", "-isystem", "-I", "-D", "-U", "-L", "-l", "-o"];

/// True for a bare value-taking flag whose value is the next argument.
pub fn takes_separate_value(arg: &str) -> bool {
    VALUE_FLAGS.contains(&arg)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerArgs {
    /// Everything handed to `tcc_set_options` verbatim
    pub options: Vec<String>,
    pub include_paths: Vec<PathBuf>,
    pub sysinclude_paths: Vec<PathBuf>,
    pub library_paths: Vec<PathBuf>,
    pub libraries: Vec<String>,
    pub defines: Vec<(String, Option<String>)>,
    pub files: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub object_only: bool,
}

impl CompilerArgs {
    /// First input file; it becomes `argv[0]` of the program.
    pub fn program_name(&self) -> Option<&Path> {
        self.files.first().map(PathBuf::as_path)
    }

    /// `-o` path, or `<stem>.o` in the working directory.
    pub fn object_output(&self) -> Option<PathBuf> {
        if let Some(output) = &self.output {
            return Some(output.clone());
        }
        let stem = self.program_name()?.file_stem()?;
        Some(PathBuf::from(format!("{}.o", stem.to_string_lossy())))
    }

    fn apply(&self, session: &mut CompilerSession) -> Result<()> {
        if !self.options.is_empty() {
            session.set_options(&self.options.join(" "))?;
        }
        for (name, value) in &self.defines {
            session.define(name, value.as_deref())?;
        }
        for dir in &self.sysinclude_paths {
            session.add_sysinclude_path(dir)?;
        }
        for dir in &self.include_paths {
            session.add_include_path(dir)?;
        }
        for dir in &self.library_paths {
            session.add_library_path(dir)?;
        }
        for file in &self.files {
            session.add_file(file)?;
        }
        Ok(())
    }
}

/// Split tcc-style flags into a [`CompilerArgs`]. Anything not starting with
/// `-` is an input file.
pub fn parse_compiler_args(args: &[String]) -> Result<CompilerArgs> {
    let mut parsed = CompilerArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "-c" {
            parsed.object_only = true;
            continue;
        }
        if !arg.starts_with('-') || arg == "-" {
            parsed.files.push(PathBuf::from(arg));
            continue;
        }

        let Some(flag) = VALUE_FLAGS.iter().find(|f| arg.starts_with(**f)) else {
            parsed.options.push(arg.clone());
            continue;
        };
        let value = if arg.len() > flag.len() {
            arg[flag.len()..].to_string()
        } else {
            iter.next()
                .cloned()
                .ok_or_else(|| EngineError::InvalidArgument(format!("{} requires a value", flag)))?
        };

        match *flag {
            "-I" => parsed.include_paths.push(value.into()),
            "-isystem" => parsed.sysinclude_paths.push(value.into()),
            "-L" => parsed.library_paths.push(value.into()),
            "-l" => parsed.libraries.push(value),
            "-o" => parsed.output = Some(value.into()),
            "-D" => parsed.defines.push(match value.split_once('=') {
                Some((name, v)) => (name.to_string(), Some(v.to_string())),
                None => (value, None),
            }),
            other => {
                parsed.options.push(other.to_string());
                parsed.options.push(value);
            }
        }
    }
    Ok(parsed)
}

impl Runtime {
    /// Compile `args.files` and run `main`, or with `-c` write an object file.
    pub fn run_compiler(&self, args: &CompilerArgs, program_args: &[String]) -> Result<ExecutionResult> {
        let Some(program) = args.program_name() else {
            return Err(EngineError::InvalidArgument("no input file provided".to_string()));
        };
        let unit = program.display().to_string();

        if args.object_only {
            let output = args
                .object_output()
                .ok_or_else(|| EngineError::InvalidArgument("cannot name output file".to_string()))?;
            let mut session = self.create_session(OutputMode::Object, &unit)?;
            args.apply(&mut session)?;
            session.output_file(&output)?;
            log::info!("wrote {}", output.display());
            return Ok(ExecutionResult::Exited(0));
        }
        if let Some(output) = &args.output {
            return Err(EngineError::InvalidArgument(format!(
                "-o {} needs -c: only relocatable objects can be written",
                output.display()
            )));
        }

        let session = self.build(&unit, |session| {
            args.apply(session)?;
            for name in &args.libraries {
                // Probing opener first so late binding sees the library.
                if self.symbols().open_library(name).is_err() {
                    session.add_library(name)?;
                }
            }
            Ok(())
        })?;
        run_entry(&session, "main", &unit, program_args)
    }
}

#[cfg(test)]
mod passthrough_tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_joined_and_separate_values() {
        let parsed = parse_compiler_args(&args(&[
            "-Iinc", "-I", "more", "-DDEBUG", "-D", "LEVEL=3", "-Llib", "-lm", "main.c",
        ]))
        .unwrap();
        assert_eq!(
            parsed.include_paths,
            vec![PathBuf::from("inc"), PathBuf::from("more")]
        );
        assert_eq!(
            parsed.defines,
            vec![
                ("DEBUG".to_string(), None),
                ("LEVEL".to_string(), Some("3".to_string()))
            ]
        );
        assert_eq!(parsed.library_paths, vec![PathBuf::from("lib")]);
        assert_eq!(parsed.libraries, vec!["m".to_string()]);
        assert_eq!(parsed.files, vec![PathBuf::from("main.c")]);
        assert!(!parsed.object_only);
    }

    #[test]
    fn test_unknown_flags_become_options() {
        let parsed =
            parse_compiler_args(&args(&["-Wall", "-g", "-UNDEBUG", "-include", "cfg.h", "a.c"]))
                .unwrap();
        assert_eq!(
            parsed.options,
            args(&["-Wall", "-g", "-U", "NDEBUG", "-include", "cfg.h"])
        );
    }

    #[test]
    fn test_isystem_is_not_an_include_flag() {
        let parsed = parse_compiler_args(&args(&["-isystem", "/opt/inc", "a.c"])).unwrap();
        assert_eq!(parsed.sysinclude_paths, vec![PathBuf::from("/opt/inc")]);
        assert!(parsed.include_paths.is_empty());
    }

    #[test]
    fn test_separate_value_flags() {
        assert!(takes_separate_value("-I"));
        assert!(takes_separate_value("-include"));
        assert!(!takes_separate_value("-Iinc"));
        assert!(!takes_separate_value("-c"));
    }

    #[test]
    fn test_missing_value() {
        let err = parse_compiler_args(&args(&["a.c", "-I"])).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn test_object_output_name() {
        let parsed = parse_compiler_args(&args(&["-c", "src/util.c"])).unwrap();
        assert!(parsed.object_only);
        assert_eq!(parsed.object_output(), Some(PathBuf::from("util.o")));

        let parsed = parse_compiler_args(&args(&["-c", "util.c", "-o", "out/u.o"])).unwrap();
        assert_eq!(parsed.object_output(), Some(PathBuf::from("out/u.o")));
    }

    #[test]
    fn test_program_name_is_first_file() {
        let parsed = parse_compiler_args(&args(&["-O2", "main.c", "extra.c"])).unwrap();
        assert_eq!(parsed.program_name(), Some(Path::new("main.c")));
        assert!(parse_compiler_args(&args(&["-O2"]))
            .unwrap()
            .program_name()
            .is_none());
    }
}
