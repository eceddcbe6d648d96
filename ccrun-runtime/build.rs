// Build script for ccrun-runtime
// Compiles the crash-guard shim (sigsetjmp/siglongjmp + backtrace helpers)

use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR")
        .map_err(|e| format!("Failed to get CARGO_MANIFEST_DIR: {}", e))?;
    let c_dir = PathBuf::from(&manifest_dir).join("c");

    let target_os = env::var("CARGO_CFG_TARGET_OS")
        .map_err(|e| format!("Failed to get CARGO_CFG_TARGET_OS: {}", e))?;
    let target_family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();

    println!("cargo:rerun-if-changed=c/ccrun_guard.c");
    println!("cargo:rerun-if-changed=build.rs");

    // Signal-based recovery needs sigsetjmp, which only exists on unix targets.
    if target_family != "unix" {
        println!(
            "cargo:warning=ccrun-runtime: crash isolation disabled for target os {}",
            target_os
        );
        return Ok(());
    }

    let mut builder = cc::Build::new();
    builder
        .warnings(true)
        .flag_if_supported("-std=c11")
        .file(c_dir.join("ccrun_guard.c"));

    // glibc hides sigsetjmp/backtrace prototypes without a feature macro
    if target_os == "linux" || target_os == "android" {
        builder.define("_GNU_SOURCE", None);
    }

    builder.compile("ccrun_guard");

    Ok(())
}
