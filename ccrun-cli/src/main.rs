use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use ccrun_compiler::config::{trace_enabled, ENV_TRACE};
use ccrun_compiler::{parse_compiler_args, report_error, Config, Runtime, INLINE_UNIT};
use ccrun_runtime::{crash, ExecutionResult};

mod invocation;
mod repl;

use invocation::{Mode, ParsedInvocation};

/// Filter used when tracing is switched on
const TRACE_FILTER: &str = "ccrun=trace,ccrun_compiler=trace,ccrun_runtime=trace";

#[derive(Parser, Debug)]
#[command(name = "ccrun")]
#[command(version)]
#[command(about = "Compile and run C in-process with TinyCC", long_about = None)]
#[command(after_help = "\
Modes:
  ccrun                          interactive REPL
  ccrun --eval 'CODE' [-- ARGS]  compile CODE and run its main
  ccrun FILE.c|FILE.o [ARGS]     import FILE and run its main
  ccrun [FLAGS] FILE.c [ARGS]    tcc-style flags; `--` ends the flags")]
pub struct Cli {
    /// Start the interactive REPL
    #[arg(long, conflicts_with = "eval")]
    repl: bool,

    /// Compile and run C code given on the command line
    #[arg(long, value_name = "CODE")]
    eval: Option<String>,

    /// Verbose engine logging (same as CCRUN_TRACE=1)
    #[arg(long)]
    trace: bool,

    /// Input file, compiler flags and program arguments
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    args: Vec<String>,
}

fn init_logging(trace: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if trace {
        builder.parse_filters(TRACE_FILTER);
    }
    if let Err(e) = builder.format_timestamp(None).try_init() {
        eprintln!("logger already initialized: {}", e);
    }
}

/// Logging starts before the environment is read, so complaints about bad
/// configuration values reach stderr.
fn load_config(cli_trace: bool) -> Config {
    let trace = cli_trace || trace_enabled(std::env::var(ENV_TRACE).ok().as_deref());
    init_logging(trace);
    let mut config = Config::from_env();
    config.trace = trace;
    config
}

fn report_result(result: &ExecutionResult) -> i32 {
    if let ExecutionResult::Crashed { diagnostic, .. } = result {
        eprintln!("{} {}", "crashed:".red().bold(), diagnostic);
        eprintln!("Program crashed but recovered gracefully.");
    }
    result.exit_code()
}

fn run(invocation: ParsedInvocation) -> Result<i32> {
    let runtime = Runtime::global().context("failed to initialize the compiler runtime")?;
    log::debug!("{:?} with argv {:?}", invocation.mode, invocation.argv());

    let outcome = match &invocation.mode {
        Mode::Repl => return repl::run(runtime).map(|()| 0),
        Mode::Inline { code } => runtime.run_inline(code, &invocation.program_args),
        Mode::DirectImport { path } => runtime.run_file(path, &invocation.program_args),
        Mode::Compile { flags } => parse_compiler_args(flags)
            .and_then(|args| runtime.run_compiler(&args, &invocation.program_args)),
    };

    match outcome {
        Ok(result) => Ok(report_result(&result)),
        Err(e) => {
            let source = match &invocation.mode {
                Mode::Inline { code } => Some((INLINE_UNIT, code.as_str())),
                _ => None,
            };
            report_error(&e, source);
            Ok(1)
        }
    }
}

fn main() {
    let cli = Cli::parse();

    Config::init_with(load_config(cli.trace));

    if let Err(e) = crash::install() {
        log::warn!("crash isolation unavailable: {}", e);
    }

    let code = match invocation::route(cli).and_then(run) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}
