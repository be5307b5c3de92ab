//! `RegOpenKeyExA` / `RegCreateKeyExA` / `RegCloseKey` / `RegQueryValueExA` /
//! `RegSetValueExA` / `RegDeleteKeyA` / `RegDeleteValueA` / `RegEnumKeyExA` /
//! `RegEnumValueA` (spec.md §4.4): the Win32-ABI adapters in front of
//! [`crate::registry`].

use std::ffi::CStr;

use crate::handle::{AccessMask, Handle};
use crate::registry::value::ValueType;
use crate::registry::{key, value};
use crate::runtime::Runtime;
use crate::win32::set_last_error;

const ERROR_SUCCESS: i32 = 0;

bitflags::bitflags! {
    /// `samDesired`, the subset this core inspects. Real Windows folds in
    /// `KEY_NOTIFY`, `KEY_CREATE_LINK`, and friends this core never models.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RegSam: u32 {
        const KEY_QUERY_VALUE = 0x0001;
        const KEY_SET_VALUE   = 0x0002;
        const KEY_READ        = 0x20019;
        const KEY_WRITE       = 0x20006;
        const KEY_ALL_ACCESS  = 0xF003F;
    }
}

fn access_mask(sam: u32) -> AccessMask {
    let sam = RegSam::from_bits_truncate(sam);
    let mut mask = AccessMask::empty();
    if sam.intersects(RegSam::KEY_QUERY_VALUE | RegSam::KEY_READ | RegSam::KEY_ALL_ACCESS) {
        mask |= AccessMask::READ;
    }
    if sam.intersects(RegSam::KEY_SET_VALUE | RegSam::KEY_WRITE | RegSam::KEY_ALL_ACCESS) {
        mask |= AccessMask::WRITE;
    }
    mask
}

unsafe fn cstr(ptr: *const u8) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr as *const i8).to_string_lossy().into_owned()
    }
}

/// `RegOpenKeyExA`. Returns an NT status, not a `BOOL` — this matches the
/// real `advapi32` ABI, which reports `LSTATUS` directly.
pub extern "win64" fn reg_open_key_ex_a(parent: Handle, subkey: *const u8, _options: u32, sam: u32, out: *mut Handle) -> i32 {
    let rt = Runtime::get();
    let subkey = unsafe { cstr(subkey) };
    match key::open_key(rt, parent, &subkey, access_mask(sam)) {
        Ok(handle) => {
            if !out.is_null() {
                unsafe { *out = handle };
            }
            ERROR_SUCCESS
        }
        Err(status) => status.to_win32() as i32,
    }
}

const REG_CREATED_NEW_KEY: u32 = 1;
const REG_OPENED_EXISTING_KEY: u32 = 2;

/// `RegCreateKeyExA`.
pub extern "win64" fn reg_create_key_ex_a(
    parent: Handle,
    subkey: *const u8,
    _reserved: u32,
    _class: *const u8,
    _options: u32,
    sam: u32,
    _security_attrs: u64,
    out: *mut Handle,
    disposition_out: *mut u32,
) -> i32 {
    let rt = Runtime::get();
    let subkey = unsafe { cstr(subkey) };
    match key::create_key(rt, parent, &subkey, access_mask(sam)) {
        Ok((handle, disposition)) => {
            if !out.is_null() {
                unsafe { *out = handle };
            }
            if !disposition_out.is_null() {
                let value = match disposition {
                    key::Disposition::CreatedNewKey => REG_CREATED_NEW_KEY,
                    key::Disposition::OpenedExistingKey => REG_OPENED_EXISTING_KEY,
                };
                unsafe { *disposition_out = value };
            }
            ERROR_SUCCESS
        }
        Err(status) => status.to_win32() as i32,
    }
}

/// `RegCloseKey`.
pub extern "win64" fn reg_close_key(handle: Handle) -> i32 {
    let rt = Runtime::get();
    match key::close_key(rt, handle) {
        Ok(()) => ERROR_SUCCESS,
        Err(status) => status.to_win32() as i32,
    }
}

/// `RegDeleteKeyA`.
pub extern "win64" fn reg_delete_key_a(parent: Handle, subkey: *const u8) -> i32 {
    let rt = Runtime::get();
    let subkey = unsafe { cstr(subkey) };
    match key::delete_key(rt, parent, &subkey) {
        Ok(()) => ERROR_SUCCESS,
        Err(status) => status.to_win32() as i32,
    }
}

fn value_type_code(t: ValueType) -> u32 {
    match t {
        ValueType::None => 0,
        ValueType::Sz => 1,
        ValueType::ExpandSz => 2,
        ValueType::Binary => 3,
        ValueType::Dword => 4,
    }
}

fn value_type_from_code(code: u32) -> ValueType {
    match code {
        1 => ValueType::Sz,
        2 => ValueType::ExpandSz,
        3 => ValueType::Binary,
        4 => ValueType::Dword,
        _ => ValueType::None,
    }
}

/// `RegQueryValueExA`. `data` may be null to query only the type and
/// length; `data_len` is both in (capacity) and out (actual length)
/// per the real ABI. Returns `ERROR_MORE_DATA` if the caller's buffer is
/// too small, matching Windows rather than silently truncating.
pub extern "win64" fn reg_query_value_ex_a(handle: Handle, name: *const u8, _reserved: *mut u32, type_out: *mut u32, data: *mut u8, data_len: *mut u32) -> i32 {
    let rt = Runtime::get();
    let name = unsafe { cstr(name) };
    match value::query_value_by_handle(rt, handle, &name) {
        Ok(queried) => {
            if !type_out.is_null() {
                unsafe { *type_out = value_type_code(queried.value_type) };
            }
            let needed = queried.data.len() as u32;
            if !data.is_null() && !data_len.is_null() {
                let capacity = unsafe { *data_len };
                if capacity < needed {
                    unsafe { *data_len = needed };
                    return crate::error::win32::ERROR_MORE_DATA as i32;
                }
                let dst = unsafe { std::slice::from_raw_parts_mut(data, needed as usize) };
                dst.copy_from_slice(&queried.data);
            }
            if !data_len.is_null() {
                unsafe { *data_len = needed };
            }
            ERROR_SUCCESS
        }
        Err(status) => status.to_win32() as i32,
    }
}

/// `RegSetValueExA`.
pub extern "win64" fn reg_set_value_ex_a(handle: Handle, name: *const u8, _reserved: u32, value_type: u32, data: *const u8, data_len: u32) -> i32 {
    let rt = Runtime::get();
    let name = unsafe { cstr(name) };
    let slice = if data.is_null() { &[][..] } else { unsafe { std::slice::from_raw_parts(data, data_len as usize) } };
    match value::set_value_by_handle(rt, handle, &name, value_type_from_code(value_type), slice) {
        Ok(()) => ERROR_SUCCESS,
        Err(status) => status.to_win32() as i32,
    }
}

/// `RegDeleteValueA`.
pub extern "win64" fn reg_delete_value_a(handle: Handle, name: *const u8) -> i32 {
    let rt = Runtime::get();
    let name = unsafe { cstr(name) };
    match key::key_path(rt, handle).and_then(|path| value::delete_value(&path, &name)) {
        Ok(()) => ERROR_SUCCESS,
        Err(status) => status.to_win32() as i32,
    }
}

fn write_name_out(name: &str, buf: *mut u8, len_out: *mut u32) {
    if buf.is_null() || len_out.is_null() {
        return;
    }
    let capacity = unsafe { *len_out } as usize;
    let bytes = name.as_bytes();
    let n = bytes.len().min(capacity.saturating_sub(1));
    let dst = unsafe { std::slice::from_raw_parts_mut(buf, capacity) };
    dst[..n].copy_from_slice(&bytes[..n]);
    if capacity > n {
        dst[n] = 0;
    }
    unsafe { *len_out = n as u32 };
}

/// `RegEnumKeyExA`. `index` is a stateless cursor, not a handle-owned
/// position — callers re-pass it each call, per spec.md §4.4.
pub extern "win64" fn reg_enum_key_ex_a(handle: Handle, index: u32, name: *mut u8, name_len: *mut u32, _reserved: *mut u32, _class: *mut u8, _class_len: *mut u32, _last_write: u64) -> i32 {
    let rt = Runtime::get();
    match key::key_path(rt, handle).and_then(|path| value::enum_subkey(&path, index)) {
        Ok(found) => {
            write_name_out(&found, name, name_len);
            ERROR_SUCCESS
        }
        Err(status) => status.to_win32() as i32,
    }
}

/// `RegEnumValueA`.
pub extern "win64" fn reg_enum_value_a(handle: Handle, index: u32, name: *mut u8, name_len: *mut u32, _reserved: *mut u32, _type_out: *mut u32, _data: *mut u8, _data_len: *mut u32) -> i32 {
    let rt = Runtime::get();
    match key::key_path(rt, handle).and_then(|path| value::enum_value(&path, index)) {
        Ok(found) => {
            write_name_out(&found, name, name_len);
            ERROR_SUCCESS
        }
        Err(status) => status.to_win32() as i32,
    }
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("advapi32.dll", "RegOpenKeyExA", reg_open_key_ex_a as usize),
        ("advapi32.dll", "RegCreateKeyExA", reg_create_key_ex_a as usize),
        ("advapi32.dll", "RegCloseKey", reg_close_key as usize),
        ("advapi32.dll", "RegDeleteKeyA", reg_delete_key_a as usize),
        ("advapi32.dll", "RegQueryValueExA", reg_query_value_ex_a as usize),
        ("advapi32.dll", "RegSetValueExA", reg_set_value_ex_a as usize),
        ("advapi32.dll", "RegDeleteValueA", reg_delete_value_a as usize),
        ("advapi32.dll", "RegEnumKeyExA", reg_enum_key_ex_a as usize),
        ("advapi32.dll", "RegEnumValueA", reg_enum_value_a as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Hive;
    use crate::runtime::init_for_test;
    use std::ffi::CString;

    struct ScratchRegistry {
        path: std::path::PathBuf,
    }
    impl ScratchRegistry {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("citcrun-win32-registry-test-{}-{}", std::process::id(), std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos()));
            crate::registry::set_base_path_override_for_test(Some(path.clone()));
            ScratchRegistry { path }
        }
    }
    impl Drop for ScratchRegistry {
        fn drop(&mut self) {
            crate::registry::set_base_path_override_for_test(None);
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn create_query_set_and_close_round_trip_through_the_win32_abi() {
        let _guard = ScratchRegistry::new();
        init_for_test();
        let hklm = key::hive_handle(Hive::Hklm);

        let subkey = CString::new("Software\\Citc").unwrap();
        let mut handle: Handle = 0;
        let mut disposition = 0u32;
        let rc = reg_create_key_ex_a(hklm, subkey.as_ptr() as *const u8, 0, std::ptr::null(), 0, RegSam::KEY_ALL_ACCESS.bits(), 0, &mut handle, &mut disposition);
        assert_eq!(rc, ERROR_SUCCESS);
        assert_eq!(disposition, REG_CREATED_NEW_KEY);

        let name = CString::new("Version").unwrap();
        let data = 7u32.to_le_bytes();
        let rc = reg_set_value_ex_a(handle, name.as_ptr() as *const u8, 0, 4, data.as_ptr(), data.len() as u32);
        assert_eq!(rc, ERROR_SUCCESS);

        let mut type_out = 0u32;
        let mut buf = [0u8; 4];
        let mut len = buf.len() as u32;
        let rc = reg_query_value_ex_a(handle, name.as_ptr() as *const u8, std::ptr::null_mut(), &mut type_out, buf.as_mut_ptr(), &mut len);
        assert_eq!(rc, ERROR_SUCCESS);
        assert_eq!(type_out, 4);
        assert_eq!(u32::from_le_bytes(buf), 7);

        assert_eq!(reg_close_key(handle), ERROR_SUCCESS);
    }

    #[test]
    fn query_value_with_undersized_buffer_reports_more_data() {
        let _guard = ScratchRegistry::new();
        init_for_test();
        let hklm = key::hive_handle(Hive::Hklm);
        let subkey = CString::new("Software\\Citc2").unwrap();
        let mut handle: Handle = 0;
        reg_create_key_ex_a(hklm, subkey.as_ptr() as *const u8, 0, std::ptr::null(), 0, RegSam::KEY_ALL_ACCESS.bits(), 0, &mut handle, std::ptr::null_mut());

        let name = CString::new("Blob").unwrap();
        let data = [1u8, 2, 3, 4, 5];
        reg_set_value_ex_a(handle, name.as_ptr() as *const u8, 0, 3, data.as_ptr(), data.len() as u32);

        let mut buf = [0u8; 2];
        let mut len = buf.len() as u32;
        let rc = reg_query_value_ex_a(handle, name.as_ptr() as *const u8, std::ptr::null_mut(), std::ptr::null_mut(), buf.as_mut_ptr(), &mut len);
        assert_eq!(rc, crate::error::win32::ERROR_MORE_DATA as i32);
        assert_eq!(len, 5);
    }

    #[test]
    fn open_key_on_missing_subkey_maps_to_file_not_found() {
        let _guard = ScratchRegistry::new();
        init_for_test();
        let hkcu = key::hive_handle(Hive::Hkcu);
        let subkey = CString::new("DoesNotExist").unwrap();
        let mut handle: Handle = 0;
        let rc = reg_open_key_ex_a(hkcu, subkey.as_ptr() as *const u8, 0, RegSam::KEY_READ.bits(), &mut handle);
        assert_eq!(rc, crate::error::win32::ERROR_FILE_NOT_FOUND as i32);
    }
}
