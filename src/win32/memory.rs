//! `VirtualAlloc` / `VirtualFree` / `HeapAlloc` / `HeapFree` (spec.md §4.3).

use crate::runtime::PROCESS_HEAP_SENTINEL;

bitflags::bitflags! {
    /// `flAllocationType`. Commit vs. reserve is collapsed — both just mmap
    /// memory, per spec.md §4.3.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AllocationType: u32 {
        const COMMIT   = 0x0000_1000;
        const RESERVE  = 0x0000_2000;
        const RELEASE  = 0x0000_8000;
        const DECOMMIT = 0x0000_4000;
    }
}

bitflags::bitflags! {
    /// `flProtect`, translated to POSIX `PROT_*` bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Protect: u32 {
        const NOACCESS          = 0x01;
        const READONLY          = 0x02;
        const READWRITE         = 0x04;
        const EXECUTE           = 0x10;
        const EXECUTE_READ      = 0x20;
        const EXECUTE_READWRITE = 0x40;
    }
}

/// Maps a `PAGE_*` constant to POSIX `PROT_*` bits, used both here and by
/// [`crate::loader::imports`]'s final protection pass.
pub fn protect_to_prot(protect: Protect) -> i32 {
    if protect.contains(Protect::EXECUTE_READWRITE) {
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC
    } else if protect.contains(Protect::EXECUTE_READ) {
        libc::PROT_READ | libc::PROT_EXEC
    } else if protect.contains(Protect::EXECUTE) {
        libc::PROT_EXEC
    } else if protect.contains(Protect::READWRITE) {
        libc::PROT_READ | libc::PROT_WRITE
    } else if protect.contains(Protect::READONLY) {
        libc::PROT_READ
    } else {
        libc::PROT_NONE
    }
}

/// `VirtualAlloc`. Maps anonymous memory at `addr` (fixed, if non-null) with
/// the protection bits `protect` implies.
pub extern "win64" fn virtual_alloc(addr: u64, size: u64, _alloc_type: u32, protect: u32) -> u64 {
    let prot = protect_to_prot(Protect::from_bits_truncate(protect));
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if addr != 0 {
        flags |= libc::MAP_FIXED;
    }
    let result = unsafe {
        libc::mmap(addr as *mut libc::c_void, size as usize, prot, flags, -1, 0)
    };
    if result == libc::MAP_FAILED {
        crate::win32::set_last_error(crate::error::win32::ERROR_NOT_ENOUGH_MEMORY);
        return 0;
    }
    result as u64
}

/// `VirtualFree`. `MEM_RELEASE` with a caller-supplied size of 0 unmaps
/// exactly one page, per the Windows contract spec.md §4.3 calls out.
pub extern "win64" fn virtual_free(addr: u64, size: u64, free_type: u32) -> i32 {
    let alloc_type = AllocationType::from_bits_truncate(free_type);
    let len = if size == 0 && alloc_type.contains(AllocationType::RELEASE) { 4096 } else { size as usize };
    let rc = unsafe { libc::munmap(addr as *mut libc::c_void, len) };
    (rc == 0) as i32
}

/// `GetProcessHeap`. Returns the opaque process-heap sentinel.
pub extern "win64" fn get_process_heap() -> u64 {
    PROCESS_HEAP_SENTINEL
}

/// `HeapAlloc`. Wraps host `malloc`; `zero_memory` (bit 0x8 of `dwFlags`)
/// zeros the payload.
pub extern "win64" fn heap_alloc(_heap: u64, flags: u32, size: u64) -> u64 {
    const HEAP_ZERO_MEMORY: u32 = 0x0000_0008;
    let ptr = unsafe { libc::malloc(size as usize) };
    if ptr.is_null() {
        crate::win32::set_last_error(crate::error::win32::ERROR_NOT_ENOUGH_MEMORY);
        return 0;
    }
    if flags & HEAP_ZERO_MEMORY != 0 {
        unsafe { std::ptr::write_bytes(ptr as *mut u8, 0, size as usize) };
    }
    ptr as u64
}

/// `HeapFree`. Wraps host `free`.
pub extern "win64" fn heap_free(_heap: u64, _flags: u32, ptr: u64) -> i32 {
    if ptr != 0 {
        unsafe { libc::free(ptr as *mut libc::c_void) };
    }
    1
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("kernel32.dll", "VirtualAlloc", virtual_alloc as usize),
        ("kernel32.dll", "VirtualFree", virtual_free as usize),
        ("kernel32.dll", "GetProcessHeap", get_process_heap as usize),
        ("kernel32.dll", "HeapAlloc", heap_alloc as usize),
        ("kernel32.dll", "HeapFree", heap_free as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_alloc_then_free_round_trips() {
        let addr = virtual_alloc(0, 4096, AllocationType::COMMIT.bits(), Protect::READWRITE.bits());
        assert_ne!(addr, 0);
        unsafe {
            std::ptr::write_bytes(addr as *mut u8, 0xAB, 4096);
        }
        assert_eq!(virtual_free(addr, 0, AllocationType::RELEASE.bits()), 1);
    }

    #[test]
    fn heap_alloc_zero_memory_flag_zeros_payload() {
        let ptr = heap_alloc(PROCESS_HEAP_SENTINEL, 0x8, 64);
        assert_ne!(ptr, 0);
        let slice = unsafe { std::slice::from_raw_parts(ptr as *const u8, 64) };
        assert!(slice.iter().all(|&b| b == 0));
        heap_free(PROCESS_HEAP_SENTINEL, 0, ptr);
    }
}
