//! `CreateFileA` / `ReadFile` / `WriteFile` / `DeleteFileA` /
//! `SetFilePointer` / `GetFileSize` / `GetFileType` (spec.md §4.3): the
//! Win32-ABI adapters in front of [`crate::nt::file`].

use std::ffi::CStr;

use crate::handle::{AccessMask, Handle, Kind, INVALID_HANDLE_VALUE};
use crate::nt::file::{self, Disposition, Whence};
use crate::runtime::Runtime;
use crate::win32::set_last_error;

bitflags::bitflags! {
    /// `dwDesiredAccess`, the subset this core inspects.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DesiredAccess: u32 {
        const GENERIC_READ  = 0x8000_0000;
        const GENERIC_WRITE = 0x4000_0000;
    }
}

fn access_mask(desired: u32) -> AccessMask {
    let desired = DesiredAccess::from_bits_truncate(desired);
    let mut mask = AccessMask::empty();
    if desired.contains(DesiredAccess::GENERIC_READ) {
        mask |= AccessMask::READ;
    }
    if desired.contains(DesiredAccess::GENERIC_WRITE) {
        mask |= AccessMask::WRITE;
    }
    mask
}

fn disposition(value: u32) -> Option<Disposition> {
    match value {
        1 => Some(Disposition::CreateNew),
        2 => Some(Disposition::CreateAlways),
        3 => Some(Disposition::OpenExisting),
        4 => Some(Disposition::OpenAlways),
        5 => Some(Disposition::TruncateExisting),
        _ => None,
    }
}

/// `CreateFileA`.
pub extern "win64" fn create_file(
    path: *const u8,
    desired_access: u32,
    _share_mode: u32,
    _security_attrs: u64,
    creation_disposition: u32,
    _flags_and_attrs: u32,
    _template_file: u64,
) -> Handle {
    let rt = Runtime::get();
    let path_str = unsafe { CStr::from_ptr(path as *const i8) }.to_string_lossy();
    let Some(disposition) = disposition(creation_disposition) else {
        set_last_error(crate::error::win32::ERROR_INVALID_PARAMETER);
        return INVALID_HANDLE_VALUE;
    };
    match file::create_file(rt, &path_str, access_mask(desired_access), disposition) {
        Ok(handle) => handle,
        Err(status) => {
            set_last_error(status.to_win32());
            INVALID_HANDLE_VALUE
        }
    }
}

/// `ReadFile`. `overlapped` is accepted for ABI compatibility and ignored —
/// this core only models synchronous I/O.
pub extern "win64" fn read_file(handle: Handle, buf: *mut u8, bytes_to_read: u32, bytes_read: *mut u32, _overlapped: u64) -> i32 {
    let rt = Runtime::get();
    let slice = unsafe { std::slice::from_raw_parts_mut(buf, bytes_to_read as usize) };
    match file::read(rt, handle, slice) {
        Ok(n) => {
            if !bytes_read.is_null() {
                unsafe { *bytes_read = n as u32 };
            }
            1
        }
        Err(status) => {
            set_last_error(status.to_win32());
            0
        }
    }
}

/// `WriteFile`.
pub extern "win64" fn write_file(handle: Handle, buf: *const u8, bytes_to_write: u32, bytes_written: *mut u32, _overlapped: u64) -> i32 {
    let rt = Runtime::get();
    let slice = unsafe { std::slice::from_raw_parts(buf, bytes_to_write as usize) };
    match file::write(rt, handle, slice) {
        Ok(n) => {
            if !bytes_written.is_null() {
                unsafe { *bytes_written = n as u32 };
            }
            1
        }
        Err(status) => {
            set_last_error(status.to_win32());
            0
        }
    }
}

/// `DeleteFileA`.
pub extern "win64" fn delete_file(path: *const u8) -> i32 {
    let path_str = unsafe { CStr::from_ptr(path as *const i8) }.to_string_lossy();
    match file::delete_file(&path_str) {
        Ok(()) => 1,
        Err(status) => {
            set_last_error(status.to_win32());
            0
        }
    }
}

const INVALID_SET_FILE_POINTER: u32 = 0xFFFF_FFFF;

/// `SetFilePointer`. `distance_high`'s contents are ignored, per spec.md
/// §9's documented open question — large (>4GiB) seeks under-report.
pub extern "win64" fn set_file_pointer(handle: Handle, distance_low: i32, _distance_high: *mut i32, move_method: u32) -> u32 {
    let rt = Runtime::get();
    let whence = match move_method {
        0 => Whence::Begin,
        1 => Whence::Current,
        2 => Whence::End,
        _ => {
            set_last_error(crate::error::win32::ERROR_INVALID_PARAMETER);
            return INVALID_SET_FILE_POINTER;
        }
    };
    match file::set_file_position(rt, handle, distance_low as i64, whence) {
        Ok(pos) => pos as u32,
        Err(status) => {
            set_last_error(status.to_win32());
            INVALID_SET_FILE_POINTER
        }
    }
}

const INVALID_FILE_SIZE: u32 = 0xFFFF_FFFF;

/// `GetFileSize`. `size_high` is always written 0 — this core has no guest
/// that needs files over 4GiB.
pub extern "win64" fn get_file_size(handle: Handle, size_high: *mut u32) -> u32 {
    let rt = Runtime::get();
    match file::query_file_size(rt, handle) {
        Ok(size) => {
            if !size_high.is_null() {
                unsafe { *size_high = (size >> 32) as u32 };
            }
            size as u32
        }
        Err(status) => {
            set_last_error(status.to_win32());
            INVALID_FILE_SIZE
        }
    }
}

const FILE_TYPE_UNKNOWN: u32 = 0x0000;
const FILE_TYPE_DISK: u32 = 0x0001;
const FILE_TYPE_CHAR: u32 = 0x0002;

/// `GetFileType`. Console handles report as character devices, everything
/// else this core issues reports as disk files (spec.md §4.3).
pub extern "win64" fn get_file_type(handle: Handle) -> u32 {
    let rt = Runtime::get();
    rt.handles
        .with(handle, |slot| match slot.kind {
            Kind::Console => FILE_TYPE_CHAR,
            Kind::File => FILE_TYPE_DISK,
            _ => FILE_TYPE_UNKNOWN,
        })
        .unwrap_or(FILE_TYPE_UNKNOWN)
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("kernel32.dll", "CreateFileA", create_file as usize),
        ("kernel32.dll", "ReadFile", read_file as usize),
        ("kernel32.dll", "WriteFile", write_file as usize),
        ("kernel32.dll", "DeleteFileA", delete_file as usize),
        ("kernel32.dll", "SetFilePointer", set_file_pointer as usize),
        ("kernel32.dll", "GetFileSize", get_file_size as usize),
        ("kernel32.dll", "GetFileType", get_file_type as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::init_for_test;
    use std::ffi::CString;

    #[test]
    fn write_then_read_back_round_trips_through_the_win32_abi() {
        init_for_test();
        let path = std::env::temp_dir().join(format!("citcrun-win32-file-test-{}", std::process::id()));
        let cpath = CString::new(path.to_str().unwrap()).unwrap();

        let handle = create_file(cpath.as_ptr() as *const u8, DesiredAccess::GENERIC_READ.bits() | DesiredAccess::GENERIC_WRITE.bits(), 0, 0, 2, 0, 0);
        assert_ne!(handle, INVALID_HANDLE_VALUE);

        let mut written = 0u32;
        assert_eq!(write_file(handle, b"hi".as_ptr(), 2, &mut written, 0), 1);
        assert_eq!(written, 2);

        assert_eq!(set_file_pointer(handle, 0, std::ptr::null_mut(), 0), 0);

        let mut buf = [0u8; 2];
        let mut read = 0u32;
        assert_eq!(read_file(handle, buf.as_mut_ptr(), 2, &mut read, 0), 1);
        assert_eq!(read, 2);
        assert_eq!(&buf, b"hi");

        assert_eq!(delete_file(cpath.as_ptr() as *const u8), 1);
    }

    #[test]
    fn get_file_type_reports_console_handles_as_character_devices() {
        init_for_test();
        let rt = Runtime::get();
        let stdout = crate::handle::HandleTable::standard_handle(crate::handle::STDOUT_INDEX);
        let _ = rt;
        assert_eq!(get_file_type(stdout), FILE_TYPE_CHAR);
    }

    #[test]
    fn create_file_with_an_unknown_disposition_is_invalid_parameter() {
        init_for_test();
        let cpath = CString::new("/tmp/whatever").unwrap();
        let handle = create_file(cpath.as_ptr() as *const u8, DesiredAccess::GENERIC_READ.bits(), 0, 0, 99, 0, 0);
        assert_eq!(handle, INVALID_HANDLE_VALUE);
    }
}
