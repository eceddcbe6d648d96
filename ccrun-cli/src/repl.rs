// Interactive shell on stdin/stdout around `ReplSession`.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use colored::Colorize;

use ccrun_compiler::repl::HELP_TEXT;
use ccrun_compiler::{report_error, ReplCommand, ReplOutcome, ReplSession, Runtime};
use ccrun_runtime::ExecutionResult;

const PROMPT: &str = ">>> ";
const DECLARED_NOTICE: &str = "(added to global scope)";

pub fn run(runtime: &Runtime) -> Result<()> {
    let stdin = io::stdin();
    run_with(runtime, stdin.lock(), io::stdout())
}

fn run_with(runtime: &Runtime, mut input: impl BufRead, mut out: impl Write) -> Result<()> {
    writeln!(out, "ccrun {} REPL - C interactive shell", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "Type C code, :help for commands, :quit to exit")?;

    let mut session = ReplSession::new(runtime);
    let mut buffer = String::new();

    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        buffer.clear();
        match input.read_line(&mut buffer) {
            Ok(0) => break, // EOF (Ctrl+D)
            Ok(_) => {}
            Err(e) => {
                eprintln!("input error: {}", e);
                break;
            }
        }
        let line = buffer.trim_end_matches(['\n', '\r']);

        if let Some(command) = ReplCommand::parse(line) {
            match command {
                Ok(ReplCommand::Quit) => break,
                Ok(ReplCommand::Help) => write!(out, "{}", HELP_TEXT)?,
                Ok(ReplCommand::Show) => write!(out, "{}", session.show())?,
                Ok(ReplCommand::Reset) => {
                    session.reset();
                    writeln!(out, "REPL reset")?;
                }
                Err(unknown) => writeln!(out, "Unknown command: {} (type :help)", unknown)?,
            }
            continue;
        }

        match session.eval(line) {
            Ok(ReplOutcome::Empty) => {}
            Ok(ReplOutcome::Declared) => writeln!(out, "{}", DECLARED_NOTICE)?,
            Ok(ReplOutcome::Executed(ExecutionResult::Exited(_))) => {}
            Ok(ReplOutcome::Executed(ExecutionResult::Crashed { diagnostic, .. })) => {
                eprintln!("{} {} (statement discarded)", "crashed:".red().bold(), diagnostic);
            }
            Ok(ReplOutcome::CompileFailed { report, .. }) => eprintln!("{}", report),
            Err(e) => report_error(&e, None),
        }
        // Compiled code writes through C stdio, which has its own buffer.
        unsafe { libc::fflush(std::ptr::null_mut()) };
        out.flush()?;
    }

    writeln!(out, "\nBye!")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccrun_compiler::Config;

    fn transcript(runtime: &Runtime, input: &str) -> String {
        let mut out = Vec::new();
        run_with(runtime, input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn runtime() -> Option<&'static Runtime> {
        Config::init();
        match Runtime::global() {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                eprintln!("skipping: libtcc unavailable ({})", e);
                None
            }
        }
    }

    #[test]
    fn test_definition_is_acknowledged() {
        let Some(rt) = runtime() else { return };
        let output = transcript(rt, "int twice(int x) { return 2 * x; }\n:show\n:quit\n");
        assert!(output.contains(&format!("{}{}\n", PROMPT, DECLARED_NOTICE)));
        assert!(output.contains("int twice(int x) { return 2 * x; }"));
        assert!(output.ends_with("\nBye!\n"));
    }

    #[test]
    fn test_commands_without_code() {
        let Some(rt) = runtime() else { return };
        let output = transcript(rt, ":help\n:bogus\n\n");
        assert!(output.contains("REPL Commands:"));
        assert!(output.contains("Unknown command: :bogus (type :help)"));
        assert!(!output.contains(DECLARED_NOTICE));
        assert!(output.ends_with("\nBye!\n"));
    }
}
