// Incremental REPL sessions against a real libtcc.

#![cfg(unix)]

use ccrun_compiler::{Config, ReplOutcome, ReplSession, Runtime};
use ccrun_runtime::ExecutionResult;
use serial_test::serial;

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

fn executed(outcome: ReplOutcome) -> ExecutionResult {
    match outcome {
        ReplOutcome::Executed(result) => result,
        other => panic!("expected execution, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_declared_helper_stays_callable() {
    let Some(rt) = runtime() else { return };
    let mut repl = ReplSession::new(rt);

    assert!(matches!(
        repl.eval("int inc(int *c){ return ++(*c); }").unwrap(),
        ReplOutcome::Declared
    ));
    assert_eq!(repl.executions(), 0);

    let result = executed(repl.eval("int counter = 0").unwrap());
    assert_eq!(result, ExecutionResult::Exited(0));

    executed(repl.eval("inc(&counter)").unwrap());
    executed(repl.eval("inc(&counter);").unwrap());
    assert_eq!(repl.executions(), 3);
    assert!(repl.statements().contains("    inc(&counter);\n"));
    assert!(repl.has_session());
}

#[test]
#[serial]
fn test_failed_statement_is_rolled_back() {
    let Some(rt) = runtime() else { return };
    let mut repl = ReplSession::new(rt);

    executed(repl.eval("int x = 1;").unwrap());
    let before = repl.statements();

    match repl.eval("x = undefined_thing + 1;").unwrap() {
        ReplOutcome::CompileFailed { diagnostics, report } => {
            assert!(diagnostics.has_errors());
            assert!(diagnostics.diagnostics()[0].span.file.starts_with("<input"));
            assert!(!report.is_empty());
        }
        other => panic!("expected compile failure, got {:?}", other),
    }
    assert_eq!(repl.statements(), before);

    executed(repl.eval("x = x + 1;").unwrap());
}

#[test]
#[serial]
fn test_crashing_statement_is_dropped() {
    let Some(rt) = runtime() else { return };
    let mut repl = ReplSession::new(rt);

    executed(repl.eval("int y = 2;").unwrap());
    let result = executed(repl.eval("*(volatile int *)0 = y;").unwrap());
    assert!(result.is_crash());
    assert!(!repl.statements().contains("volatile"));

    assert_eq!(executed(repl.eval("y = 3;").unwrap()).exit_code(), 0);
}

#[test]
#[serial]
fn test_reset_clears_everything() {
    let Some(rt) = runtime() else { return };
    let mut repl = ReplSession::new(rt);

    repl.eval("int twice(int v){ return v * 2; }").unwrap();
    executed(repl.eval("int z = twice(4);").unwrap());
    repl.reset();

    assert!(repl.declarations().is_empty());
    assert!(repl.statements().is_empty());
    assert_eq!(repl.executions(), 0);
    assert!(!repl.has_session());

    // The helper is gone after reset.
    assert!(matches!(
        repl.eval("int w = twice(1);").unwrap(),
        ReplOutcome::CompileFailed { .. }
    ));
    executed(repl.eval("int w = 1;").unwrap());
}

#[test]
#[serial]
fn test_show_lists_accumulated_code() {
    let Some(rt) = runtime() else { return };
    let mut repl = ReplSession::new(rt);

    repl.eval("int sq(int v){ return v * v; }").unwrap();
    executed(repl.eval("int s = sq(3)").unwrap());

    let shown = repl.show();
    assert!(shown.starts_with("=== Current Code ===\n"));
    assert!(shown.contains("int sq(int v){ return v * v; }\n"));
    assert!(shown.contains("int __repl_main(void) {\n    int s = sq(3);\n}"));
    assert!(shown.ends_with("=== End ===\n"));
}

#[test]
#[serial]
fn test_blank_input_is_ignored() {
    let Some(rt) = runtime() else { return };
    let mut repl = ReplSession::new(rt);
    assert!(matches!(repl.eval("   ").unwrap(), ReplOutcome::Empty));
    assert_eq!(repl.executions(), 0);
}
