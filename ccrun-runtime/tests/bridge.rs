// Trampoline tests: call real Win64 functions through SysV function pointers.

#![cfg(all(target_arch = "x86_64", unix))]

use ccrun_runtime::{AbiBridge, CallingConvention, TRAMPOLINE_CAPACITY};

// Pretend module handle for a foreign library (anything but 0 or the host).
const FOREIGN_MODULE: usize = 0x5a5a;

extern "win64" fn weighted3(a: i64, b: i64, c: i64) -> i64 {
    a + 10 * b + 100 * c
}

extern "win64" fn weighted6(a: i64, b: i64, c: i64, d: i64, e: i64, f: i64) -> i64 {
    a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * f
}

#[allow(clippy::too_many_arguments)]
extern "win64" fn weighted8(a: i64, b: i64, c: i64, d: i64, e: i64, f: i64, g: i64, h: i64) -> i64 {
    a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * f + 7 * g + 8 * h
}

type SysV3 = extern "C" fn(i64, i64, i64) -> i64;
type SysV6 = extern "C" fn(i64, i64, i64, i64, i64, i64) -> i64;
type SysV8 = extern "C" fn(i64, i64, i64, i64, i64, i64, i64, i64) -> i64;

fn win64_bridge() -> AbiBridge {
    AbiBridge::new(CallingConvention::SysV64, CallingConvention::Win64)
}

#[test]
fn test_three_register_arguments() {
    let bridge = win64_bridge();
    assert!(bridge.requires_bridging());
    let target = weighted3 as usize;
    let trampoline = bridge.wrap(FOREIGN_MODULE, target);
    assert_ne!(trampoline, target);

    let f: SysV3 = unsafe { std::mem::transmute(trampoline) };
    assert_eq!(f(1, 2, 3), 321);
}

#[test]
fn test_six_arguments_spill_to_stack() {
    let bridge = win64_bridge();
    let trampoline = bridge.wrap(FOREIGN_MODULE, weighted6 as usize);
    let f: SysV6 = unsafe { std::mem::transmute(trampoline) };
    assert_eq!(f(1, 1, 1, 1, 1, 1), 21);
    assert_eq!(f(6, 5, 4, 3, 2, 1), weighted6(6, 5, 4, 3, 2, 1));
}

#[test]
fn test_eight_arguments() {
    let bridge = win64_bridge();
    let trampoline = bridge.wrap(FOREIGN_MODULE, weighted8 as usize);
    let f: SysV8 = unsafe { std::mem::transmute(trampoline) };
    assert_eq!(f(1, 2, 3, 4, 5, 6, 7, 8), weighted8(1, 2, 3, 4, 5, 6, 7, 8));
}

#[test]
fn test_trampoline_reused_for_same_target() {
    let bridge = win64_bridge();
    let first = bridge.wrap(FOREIGN_MODULE, weighted3 as usize);
    let second = bridge.wrap(FOREIGN_MODULE, weighted3 as usize);
    assert_eq!(first, second);
    assert_eq!(bridge.trampolines_emitted(), 1);
    assert_eq!(bridge.cached_trampolines(), 1);
}

#[test]
fn test_host_and_data_addresses_untouched() {
    let bridge = win64_bridge();
    bridge.set_host_module(0x77);
    let target = weighted3 as usize;
    assert_eq!(bridge.wrap(0x77, target), target);
    assert_eq!(bridge.wrap(0, target), target);
    assert_eq!(bridge.wrap(FOREIGN_MODULE, 0), 0);

    let data = Box::new([0u64; 8]);
    let data_addr = data.as_ptr() as usize;
    assert_eq!(bridge.wrap(FOREIGN_MODULE, data_addr), data_addr);
    assert_eq!(bridge.trampolines_emitted(), 0);
}

#[test]
fn test_cache_is_bounded() {
    let bridge = win64_bridge();
    // Distinct addresses inside this binary's text segment. Never called.
    let base = weighted8 as usize;
    for offset in 0..TRAMPOLINE_CAPACITY {
        bridge.wrap(FOREIGN_MODULE, base + offset);
    }
    assert_eq!(bridge.cached_trampolines(), TRAMPOLINE_CAPACITY);

    let overflow = base + TRAMPOLINE_CAPACITY;
    let a = bridge.wrap(FOREIGN_MODULE, overflow);
    let b = bridge.wrap(FOREIGN_MODULE, overflow);
    assert_ne!(a, overflow);
    assert_ne!(a, b);
    assert_eq!(bridge.cached_trampolines(), TRAMPOLINE_CAPACITY);
    assert_eq!(bridge.trampolines_emitted(), TRAMPOLINE_CAPACITY + 2);
}
