//! Environment, process/module identity, and command-line surrogates
//! (spec.md §4.3).

use std::ffi::{CStr, CString};

use crate::runtime::Runtime;

/// `GetEnvironmentVariableA`. Returns the length written (excluding the
/// terminator), or the required length if `buf` is too small.
pub extern "win64" fn get_env(name: *const u8, buf: *mut u8, size: u32) -> u32 {
    let name = unsafe { CStr::from_ptr(name as *const i8) }.to_string_lossy();
    let Ok(value) = std::env::var(name.as_ref()) else {
        crate::win32::set_last_error(crate::error::win32::ERROR_ENVVAR_NOT_FOUND);
        return 0;
    };
    let needed = value.len() as u32 + 1;
    if needed > size {
        return needed;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(value.as_ptr(), buf, value.len());
        *buf.add(value.len()) = 0;
    }
    value.len() as u32
}

/// `SetEnvironmentVariableA`. A null `value` unsets the variable.
pub extern "win64" fn set_env(name: *const u8, value: *const u8) -> i32 {
    let name = unsafe { CStr::from_ptr(name as *const i8) }.to_string_lossy().into_owned();
    if value.is_null() {
        unsafe { std::env::remove_var(name) };
    } else {
        let value = unsafe { CStr::from_ptr(value as *const i8) }.to_string_lossy().into_owned();
        unsafe { std::env::set_var(name, value) };
    }
    1
}

/// `GetCurrentProcessId`.
pub extern "win64" fn get_current_process_id() -> u32 {
    std::process::id()
}

/// `GetCurrentThreadId`. Hashes the host thread id down to a u32; unique
/// enough for a teaching runtime's diagnostics and TLS bookkeeping.
pub extern "win64" fn get_current_thread_id() -> u32 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

/// `GetCurrentProcess`. Windows' well-known pseudo-handle value.
pub extern "win64" fn get_current_process() -> i64 {
    -1
}

/// `GetModuleHandleA(NULL)` returns a fixed non-null pseudo-base; any other
/// argument is unresolvable in this core and returns null.
pub extern "win64" fn get_module_handle(name: *const u8) -> u64 {
    if name.is_null() {
        0x0040_0000
    } else {
        0
    }
}

/// `GetModuleFileNameA(NULL, ...)` reads the host's own executable link.
pub extern "win64" fn get_module_file_name(module: u64, buf: *mut u8, size: u32) -> u32 {
    if module != 0 {
        return 0;
    }
    let path = std::env::current_exe().unwrap_or_default();
    let s = path.to_string_lossy();
    let n = (s.len() as u32).min(size.saturating_sub(1));
    unsafe {
        std::ptr::copy_nonoverlapping(s.as_ptr(), buf, n as usize);
        *buf.add(n as usize) = 0;
    }
    n
}

/// `GetCommandLineA`. Returns the process-global C string LDR sets before entry.
pub extern "win64" fn get_command_line() -> *const u8 {
    Runtime::get().command_line().as_ptr() as *const u8
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("kernel32.dll", "GetEnvironmentVariableA", get_env as usize),
        ("kernel32.dll", "SetEnvironmentVariableA", set_env as usize),
        ("kernel32.dll", "GetCurrentProcessId", get_current_process_id as usize),
        ("kernel32.dll", "GetCurrentThreadId", get_current_thread_id as usize),
        ("kernel32.dll", "GetCurrentProcess", get_current_process as usize),
        ("kernel32.dll", "GetModuleHandleA", get_module_handle as usize),
        ("kernel32.dll", "GetModuleFileNameA", get_module_file_name as usize),
        ("kernel32.dll", "GetCommandLineA", get_command_line as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_round_trip() {
        let name = CString::new("CITC_TEST").unwrap();
        let value = CString::new("hello").unwrap();
        assert_eq!(set_env(name.as_ptr() as *const u8, value.as_ptr() as *const u8), 1);

        let mut buf = [0u8; 64];
        let n = get_env(name.as_ptr() as *const u8, buf.as_mut_ptr(), buf.len() as u32);
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn get_env_reports_required_length_when_buffer_too_small() {
        let name = CString::new("CITC_TEST_LONG").unwrap();
        let value = CString::new("0123456789").unwrap();
        set_env(name.as_ptr() as *const u8, value.as_ptr() as *const u8);
        let mut tiny = [0u8; 2];
        let needed = get_env(name.as_ptr() as *const u8, tiny.as_mut_ptr(), tiny.len() as u32);
        assert_eq!(needed, 11);
    }

    #[test]
    fn module_handle_null_returns_fixed_pseudo_base() {
        assert_eq!(get_module_handle(std::ptr::null()), 0x0040_0000);
    }
}
