// Mode selection from the parsed command line.

use std::path::PathBuf;

use anyhow::{bail, Result};
use ccrun_compiler::passthrough::takes_separate_value;

use crate::Cli;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Repl,
    Inline { code: String },
    DirectImport { path: PathBuf },
    /// Flags and input files for the compiler
    Compile { flags: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInvocation {
    pub mode: Mode,
    /// Arguments after `argv[0]`
    pub program_args: Vec<String>,
}

impl ParsedInvocation {
    fn new(mode: Mode, program_args: &[String]) -> Self {
        let program_args = program_args
            .iter()
            .skip_while(|a| *a == "--")
            .cloned()
            .collect();
        Self { mode, program_args }
    }

    /// `argv[0]` the program will see.
    pub fn program_name(&self) -> String {
        match &self.mode {
            Mode::Repl => "<repl>".to_string(),
            Mode::Inline { .. } => ccrun_compiler::INLINE_UNIT.to_string(),
            Mode::DirectImport { path } => path.display().to_string(),
            Mode::Compile { flags } => ccrun_compiler::parse_compiler_args(flags)
                .ok()
                .and_then(|a| a.program_name().map(|p| p.display().to_string()))
                .unwrap_or_default(),
        }
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program_name())
            .chain(self.program_args.iter().cloned())
            .collect()
    }
}

pub fn route(cli: Cli) -> Result<ParsedInvocation> {
    if cli.repl {
        if !cli.args.is_empty() {
            bail!("--repl takes no arguments");
        }
        return Ok(ParsedInvocation::new(Mode::Repl, &[]));
    }

    if let Some(code) = cli.eval {
        if code.trim().is_empty() {
            bail!("--eval requires C code");
        }
        return Ok(ParsedInvocation::new(Mode::Inline { code }, &cli.args));
    }

    let args = cli.args;
    let Some(first) = args.first() else {
        return Ok(ParsedInvocation::new(Mode::Repl, &[]));
    };

    if first != "--" && !first.starts_with('-') {
        let path = PathBuf::from(first);
        return Ok(ParsedInvocation::new(Mode::DirectImport { path }, &args[1..]));
    }

    let (flags, rest) = split_compiler_flags(&args);
    if !flags.iter().any(|f| !f.starts_with('-')) {
        bail!("no input file provided");
    }
    Ok(ParsedInvocation::new(
        Mode::Compile {
            flags: flags.to_vec(),
        },
        rest,
    ))
}

/// With `--`, everything before it is for the compiler. Otherwise the flags
/// end with the first input file.
fn split_compiler_flags(args: &[String]) -> (&[String], &[String]) {
    if let Some(pos) = args.iter().position(|a| a == "--") {
        return (&args[..pos], &args[pos + 1..]);
    }

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if takes_separate_value(arg) {
            i += 2;
            continue;
        }
        if !arg.starts_with('-') {
            return args.split_at(i + 1);
        }
        i += 1;
    }
    (args, &[])
}
