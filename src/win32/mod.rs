//! The Win32 surrogate layer (spec.md §4.3): thin, foreign-ABI adapters that
//! validate guest arguments, call [`crate::nt`] or POSIX directly, translate
//! status codes, and maintain the thread-local "last error" slot every
//! kernel32 function consults on failure.
//!
//! Every function a guest's IAT can point at is declared `extern "win64"` —
//! Rust's own name for the Microsoft x64 calling convention — so no manual
//! trampoline is needed to cross the ABI boundary (spec.md §6).

pub mod env;
pub mod file;
pub mod fsys;
pub mod memory;
pub mod registry;
pub mod sync;
pub mod sysinfo;
pub mod threading;
pub mod time;

use std::cell::Cell;

use crate::handle::{Handle, HandleTable, STDERR_INDEX, STDIN_INDEX, STDOUT_INDEX};

thread_local! {
    static LAST_ERROR: Cell<u32> = const { Cell::new(0) };
}

/// `SetLastError`.
pub fn set_last_error(code: u32) {
    LAST_ERROR.with(|c| c.set(code));
}

/// `GetLastError`.
pub fn get_last_error() -> u32 {
    LAST_ERROR.with(|c| c.get())
}

/// The three special DWORD sentinels `GetStdHandle` accepts, and the
/// reserved handle-table index each maps to (spec.md §4.3, §6).
pub const STD_INPUT_HANDLE: i32 = -10;
pub const STD_OUTPUT_HANDLE: i32 = -11;
pub const STD_ERROR_HANDLE: i32 = -12;

/// `GetStdHandle`.
pub fn get_std_handle(which: i32) -> Handle {
    let index = match which {
        STD_INPUT_HANDLE => STDIN_INDEX,
        STD_OUTPUT_HANDLE => STDOUT_INDEX,
        STD_ERROR_HANDLE => STDERR_INDEX,
        _ => {
            set_last_error(crate::error::win32::ERROR_INVALID_PARAMETER);
            return crate::handle::INVALID_HANDLE_VALUE;
        }
    };
    HandleTable::standard_handle(index)
}

/// `CloseHandle`.
pub fn close_handle(rt: &crate::runtime::Runtime, handle: Handle) -> bool {
    match crate::nt::file::close(rt, handle) {
        Ok(()) => true,
        Err(status) => {
            set_last_error(status.to_win32());
            false
        }
    }
}

/// The flat `(dll, function) -> address` table the loader's import resolver
/// searches (spec.md §4.5). Built once, read-only for the rest of the run.
pub fn stub_table() -> Vec<(&'static str, &'static str, usize)> {
    let mut table = Vec::new();
    table.extend(memory::stubs());
    table.extend(env::stubs());
    table.extend(threading::stubs());
    table.extend(sync::stubs());
    table.extend(time::stubs());
    table.extend(fsys::stubs());
    table.extend(sysinfo::stubs());
    table.extend(file::stubs());
    table.extend(registry::stubs());
    table.push(("kernel32.dll", "GetStdHandle", get_std_handle as usize));
    table.push(("kernel32.dll", "CloseHandle", close_handle_stub as usize));
    table.push(("kernel32.dll", "GetLastError", get_last_error_stub as usize));
    table.push(("kernel32.dll", "SetLastError", set_last_error_stub as usize));
    table.extend(crate::gfx::stub_table());
    table
}

extern "win64" fn close_handle_stub(handle: u64) -> i32 {
    crate::win32::close_handle(crate::runtime::Runtime::get(), handle) as i32
}

extern "win64" fn get_last_error_stub() -> u32 {
    get_last_error()
}

extern "win64" fn set_last_error_stub(code: u32) {
    set_last_error(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_handle_sentinels_map_to_the_three_reserved_slots() {
        assert_eq!(get_std_handle(STD_INPUT_HANDLE), HandleTable::standard_handle(STDIN_INDEX));
        assert_eq!(get_std_handle(STD_OUTPUT_HANDLE), HandleTable::standard_handle(STDOUT_INDEX));
        assert_eq!(get_std_handle(STD_ERROR_HANDLE), HandleTable::standard_handle(STDERR_INDEX));
    }

    #[test]
    fn last_error_is_thread_local() {
        set_last_error(42);
        assert_eq!(get_last_error(), 42);
        let joined = std::thread::spawn(|| get_last_error()).join().unwrap();
        assert_eq!(joined, 0);
    }
}
