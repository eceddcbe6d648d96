// Crash recovery tests
// Each test raises a real fatal signal inside a guarded entry and checks the
// host keeps running. Serialized: the handler and checkpoints are process-wide.

#![cfg(unix)]

use std::ffi::{c_char, c_int};

use ccrun_runtime::crash::{self, CrashState};
use ccrun_runtime::{ExecutionResult, ProgramArgs, SourceIdentity};
use serial_test::serial;

unsafe extern "C" fn answer_entry(
    argc: c_int,
    _argv: *const *const c_char,
    _envp: *const *const c_char,
) -> c_int {
    40 + argc
}

unsafe extern "C" fn segv_entry(
    _argc: c_int,
    _argv: *const *const c_char,
    _envp: *const *const c_char,
) -> c_int {
    // Low page is never mapped.
    std::ptr::read_volatile(16 as *const u64) as c_int
}

unsafe extern "C" fn fpe_entry(
    _argc: c_int,
    _argv: *const *const c_char,
    _envp: *const *const c_char,
) -> c_int {
    libc::raise(libc::SIGFPE);
    0
}

unsafe extern "C" fn abort_entry(
    _argc: c_int,
    _argv: *const *const c_char,
    _envp: *const *const c_char,
) -> c_int {
    libc::raise(libc::SIGABRT);
    0
}

unsafe extern "C" fn nested_entry(
    _argc: c_int,
    _argv: *const *const c_char,
    _envp: *const *const c_char,
) -> c_int {
    let args = match ProgramArgs::with_environment(["inner"], Vec::<String>::new()) {
        Ok(args) => args,
        Err(_) => return -1,
    };
    let inner = crash::execute(&identity("inner.c"), 0, segv_entry, &args);
    if inner.is_crash() && crash::state() == CrashState::Armed {
        7
    } else {
        -2
    }
}

fn identity(file: &str) -> SourceIdentity {
    SourceIdentity::new(file, "main", 0)
}

fn no_args() -> ProgramArgs {
    ProgramArgs::with_environment(["test"], Vec::<String>::new()).unwrap()
}

#[test]
#[serial]
fn test_normal_exit_passes_status() {
    crash::install().unwrap();
    let args = ProgramArgs::with_environment(["prog", "x"], Vec::<String>::new()).unwrap();
    let result = unsafe { crash::execute(&identity("ok.c"), 0, answer_entry, &args) };
    assert_eq!(result, ExecutionResult::Exited(42));
    assert_eq!(crash::state(), CrashState::Disarmed);
    assert_eq!(crash::depth(), 0);
}

#[test]
#[serial]
fn test_segfault_is_recovered() {
    crash::install().unwrap();
    let result = unsafe { crash::execute(&identity("segv.c"), 0x1000, segv_entry, &no_args()) };
    match result {
        ExecutionResult::Crashed { signal, diagnostic } => {
            assert_eq!(signal, libc::SIGSEGV);
            assert!(diagnostic.contains("SIGSEGV"));
            assert!(diagnostic.contains("segv.c"));
        }
        other => panic!("expected crash, got {:?}", other),
    }
    assert_eq!(crash::state(), CrashState::Disarmed);
    assert_eq!(crash::depth(), 0);
}

#[test]
#[serial]
fn test_fpe_and_abort_are_recovered() {
    crash::install().unwrap();
    let fpe = unsafe { crash::execute(&identity("fpe.c"), 0, fpe_entry, &no_args()) };
    assert!(matches!(fpe, ExecutionResult::Crashed { signal, .. } if signal == libc::SIGFPE));

    let abort = unsafe { crash::execute(&identity("abort.c"), 0, abort_entry, &no_args()) };
    assert!(matches!(abort, ExecutionResult::Crashed { signal, .. } if signal == libc::SIGABRT));
    assert_eq!(abort.exit_code(), 1);
}

#[test]
#[serial]
fn test_host_survives_repeated_crashes() {
    crash::install().unwrap();
    for _ in 0..5 {
        let result = unsafe { crash::execute(&identity("loop.c"), 0, segv_entry, &no_args()) };
        assert!(result.is_crash());
    }
    let result = unsafe { crash::execute(&identity("after.c"), 0, answer_entry, &no_args()) };
    assert_eq!(result, ExecutionResult::Exited(41));
}

#[test]
#[serial]
fn test_nested_guard_recovers_to_inner() {
    crash::install().unwrap();
    let result = unsafe { crash::execute(&identity("outer.c"), 0, nested_entry, &no_args()) };
    assert_eq!(result, ExecutionResult::Exited(7));
    assert_eq!(crash::depth(), 0);
}

#[test]
#[serial]
fn test_install_is_idempotent() {
    crash::install().unwrap();
    crash::install().unwrap();
    assert!(crash::is_installed());
    assert!(crash::current_identity().is_none());
}

/// Set in the child process that takes an unguarded fault.
const UNGUARDED_CHILD: &str = "CCRUN_TEST_UNGUARDED_FAULT";

#[test]
#[serial]
fn test_unguarded_fault_exits_with_signal_status() {
    use std::os::unix::process::ExitStatusExt;

    if std::env::var_os(UNGUARDED_CHILD).is_some() {
        crash::install().unwrap();
        assert_eq!(crash::state(), CrashState::Disarmed);
        unsafe { std::ptr::read_volatile(16 as *const u64) };
        unreachable!("fault outside a guarded entry returned");
    }

    let status = std::process::Command::new(std::env::current_exe().unwrap())
        .args([
            "test_unguarded_fault_exits_with_signal_status",
            "--exact",
            "--test-threads=1",
        ])
        .env(UNGUARDED_CHILD, "1")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.signal(), None);
    assert_eq!(status.code(), Some(128 + libc::SIGSEGV));
}
