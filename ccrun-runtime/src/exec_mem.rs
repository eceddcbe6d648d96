// Executable memory for generated trampolines.
//
// Pages are mapped RW, filled, then flipped to RX. They are never unmapped:
// trampolines are handed to compiled code that may keep the pointer for the
// rest of the process.

use crate::RuntimeError;

/// Copies `code` into a fresh executable mapping and returns its address.
#[cfg(unix)]
pub(crate) fn alloc_code(code: &[u8]) -> Result<usize, RuntimeError> {
    let len = code.len().max(1);

    // SAFETY: anonymous private mapping, fully owned by us until published.
    unsafe {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(RuntimeError::ExecutableMemory(std::io::Error::last_os_error()));
        }

        std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());

        if libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
            let err = std::io::Error::last_os_error();
            libc::munmap(ptr, len);
            return Err(RuntimeError::ExecutableMemory(err));
        }

        flush_icache(ptr as *mut u8, len);
        Ok(ptr as usize)
    }
}

#[cfg(not(unix))]
pub(crate) fn alloc_code(_code: &[u8]) -> Result<usize, RuntimeError> {
    Err(RuntimeError::Unsupported)
}

#[cfg(all(unix, target_arch = "aarch64"))]
unsafe fn flush_icache(start: *mut u8, len: usize) {
    extern "C" {
        fn __clear_cache(start: *mut std::ffi::c_char, end: *mut std::ffi::c_char);
    }
    __clear_cache(start as *mut _, start.add(len) as *mut _);
}

// x86 keeps instruction and data caches coherent.
#[cfg(all(unix, not(target_arch = "aarch64")))]
unsafe fn flush_icache(_start: *mut u8, _len: usize) {}

/// Whether `addr` points into a mapping with execute permission.
#[cfg(target_os = "linux")]
pub fn is_executable(addr: usize) -> bool {
    if addr == 0 {
        return false;
    }
    match std::fs::read_to_string("/proc/self/maps") {
        Ok(maps) => maps_contains_executable(&maps, addr),
        Err(e) => {
            log::debug!("cannot read /proc/self/maps: {}", e);
            false
        }
    }
}

/// Falls back to asking the dynamic linker which image owns the address.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn is_executable(addr: usize) -> bool {
    if addr == 0 {
        return false;
    }
    // SAFETY: dladdr only inspects loader tables.
    unsafe {
        let mut info: libc::Dl_info = std::mem::zeroed();
        libc::dladdr(addr as *const std::ffi::c_void, &mut info) != 0
    }
}

#[cfg(not(unix))]
pub fn is_executable(_addr: usize) -> bool {
    false
}

#[cfg(any(target_os = "linux", test))]
fn maps_contains_executable(maps: &str, addr: usize) -> bool {
    maps.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let (Some(range), Some(perms)) = (fields.next(), fields.next()) else {
            return false;
        };
        let Some((start, end)) = range.split_once('-') else {
            return false;
        };
        let (Ok(start), Ok(end)) = (
            usize::from_str_radix(start, 16),
            usize::from_str_radix(end, 16),
        ) else {
            return false;
        };
        addr >= start && addr < end && perms.as_bytes().get(2) == Some(&b'x')
    })
}

#[cfg(test)]
mod exec_mem_tests {
    use super::*;

    const SAMPLE_MAPS: &str = "\
00400000-00452000 r-xp 00000000 08:02 173521      /usr/bin/demo
00651000-00652000 rw-p 00051000 08:02 173521      /usr/bin/demo
7f2c4000-7f2c5000 r--p 00000000 00:00 0
";

    #[test]
    fn test_maps_parsing() {
        assert!(maps_contains_executable(SAMPLE_MAPS, 0x0040_1000));
        assert!(!maps_contains_executable(SAMPLE_MAPS, 0x0065_1800));
        assert!(!maps_contains_executable(SAMPLE_MAPS, 0x7f2c_4800));
        assert!(!maps_contains_executable(SAMPLE_MAPS, 0x1));
        // end address is exclusive
        assert!(!maps_contains_executable(SAMPLE_MAPS, 0x0045_2000));
    }

    #[test]
    #[cfg(unix)]
    fn test_alloc_code_is_executable() {
        let addr = alloc_code(&[0xC3]).unwrap();
        assert_ne!(addr, 0);
        assert!(is_executable(addr));
    }

    #[test]
    fn test_data_is_not_executable() {
        let data = Box::new([0u8; 64]);
        assert!(!is_executable(data.as_ptr() as usize));
        assert!(!is_executable(0));
    }
}
