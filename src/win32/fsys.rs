//! Directory and enumeration surrogates: `CreateDirectoryA`,
//! `RemoveDirectoryA`, `GetTempPathA`, `Get/SetCurrentDirectoryA`,
//! `GetFileAttributesA`, `FindFirst/NextFile/FindClose` (spec.md §4.3).

use std::ffi::{CStr, CString};

use crate::handle::{AccessMask, Extra, Handle, Kind};
use crate::runtime::Runtime;

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn cstr_arg(ptr: *const u8) -> String {
    unsafe { CStr::from_ptr(ptr as *const i8) }.to_string_lossy().into_owned()
}

fn write_out(value: &str, buf: *mut u8, size: u32) -> u32 {
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

/// `CreateDirectoryA`.
pub extern "win64" fn create_directory(path: *const u8, _attrs: u64) -> i32 {
    let translated = crate::nt::translate_path(&cstr_arg(path));
    let cpath = CString::new(translated).unwrap();
    let rc = unsafe { libc::mkdir(cpath.as_ptr(), 0o755) };
    if rc < 0 {
        crate::win32::set_last_error(crate::error::NtStatus::from_errno(errno()).to_win32());
        0
    } else {
        1
    }
}

/// `RemoveDirectoryA`.
pub extern "win64" fn remove_directory(path: *const u8) -> i32 {
    let translated = crate::nt::translate_path(&cstr_arg(path));
    let cpath = CString::new(translated).unwrap();
    let rc = unsafe { libc::rmdir(cpath.as_ptr()) };
    if rc < 0 {
        crate::win32::set_last_error(crate::error::NtStatus::from_errno(errno()).to_win32());
        0
    } else {
        1
    }
}

/// `GetTempPathA`.
pub extern "win64" fn get_temp_path(size: u32, buf: *mut u8) -> u32 {
    let mut path = std::env::temp_dir().to_string_lossy().into_owned();
    if !path.ends_with('/') {
        path.push('/');
    }
    write_out(&path, buf, size)
}

/// `GetCurrentDirectoryA`.
pub extern "win64" fn get_current_directory(size: u32, buf: *mut u8) -> u32 {
    let cwd = std::env::current_dir().unwrap_or_default();
    write_out(&cwd.to_string_lossy(), buf, size)
}

/// `SetCurrentDirectoryA`.
pub extern "win64" fn set_current_directory(path: *const u8) -> i32 {
    let translated = crate::nt::translate_path(&cstr_arg(path));
    match std::env::set_current_dir(translated) {
        Ok(()) => 1,
        Err(e) => {
            crate::win32::set_last_error(crate::error::NtStatus::from_errno(e.raw_os_error().unwrap_or(libc::EIO)).to_win32());
            0
        }
    }
}

bitflags::bitflags! {
    /// `FILE_ATTRIBUTE_*`, the subset this core can actually report.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FileAttributes: u32 {
        const READONLY  = 0x0001;
        const DIRECTORY = 0x0010;
        const NORMAL    = 0x0080;
    }
}

pub const INVALID_FILE_ATTRIBUTES: u32 = 0xFFFF_FFFF;

/// `GetFileAttributesA`.
pub extern "win64" fn get_file_attributes(path: *const u8) -> u32 {
    let translated = crate::nt::translate_path(&cstr_arg(path));
    let cpath = CString::new(translated).unwrap();
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(cpath.as_ptr(), &mut st) } < 0 {
        crate::win32::set_last_error(crate::error::NtStatus::from_errno(errno()).to_win32());
        return INVALID_FILE_ATTRIBUTES;
    }
    let mut attrs = FileAttributes::NORMAL;
    if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
        attrs = FileAttributes::DIRECTORY;
    }
    if st.st_mode & 0o200 == 0 {
        attrs |= FileAttributes::READONLY;
    }
    attrs.bits()
}

/// One open `readdir` stream, keyed to a `find` handle (spec.md §3).
pub struct FindState {
    dir: *mut libc::DIR,
    pattern_prefix: String,
}
unsafe impl Send for FindState {}

/// A single `WIN32_FIND_DATAA`-equivalent result, returned by value rather
/// than written through a raw struct pointer — callers marshal it into the
/// guest layout themselves (spec.md §9's note on keeping this layer
/// allocation-free of guest memory specifics).
pub struct FindData {
    pub file_name: String,
    pub attributes: u32,
}

fn dir_path_and_glob(full_pattern: &str) -> (String, String) {
    match full_pattern.rsplit_once('/') {
        Some((dir, glob)) => (dir.to_string(), glob.to_string()),
        None => (".".to_string(), full_pattern.to_string()),
    }
}

fn matches_glob(name: &str, glob: &str) -> bool {
    if glob == "*" || glob == "*.*" {
        return true;
    }
    if let Some(stem) = glob.strip_suffix(".*") {
        return name.starts_with(stem);
    }
    name == glob
}

fn read_next(dir: *mut libc::DIR, prefix: &str) -> Option<FindData> {
    loop {
        let entry = unsafe { libc::readdir(dir) };
        if entry.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) }.to_string_lossy().into_owned();
        if name == "." || name == ".." {
            continue;
        }
        if !matches_glob(&name, prefix) {
            continue;
        }
        let attributes = if unsafe { (*entry).d_type } == libc::DT_DIR {
            FileAttributes::DIRECTORY.bits()
        } else {
            FileAttributes::NORMAL.bits()
        };
        return Some(FindData { file_name: name, attributes });
    }
}

/// `FindFirstFileA`. Returns `(handle, data)` on the first match, or
/// [`crate::handle::INVALID_HANDLE_VALUE`] when nothing matches.
pub fn find_first_file(rt: &Runtime, pattern: &str) -> Result<(Handle, FindData), crate::error::NtStatus> {
    let translated = crate::nt::translate_path(pattern);
    let (dir_path, glob) = dir_path_and_glob(&translated);
    let cdir = CString::new(dir_path).map_err(|_| crate::error::NtStatus::InvalidParameter)?;
    let dir = unsafe { libc::opendir(cdir.as_ptr()) };
    if dir.is_null() {
        return Err(crate::error::NtStatus::from_errno(errno()));
    }
    let Some(first) = read_next(dir, &glob) else {
        unsafe { libc::closedir(dir) };
        return Err(crate::error::NtStatus::NoMoreFiles);
    };
    let state = FindState { dir, pattern_prefix: glob };
    let handle = rt.handles.allocate(Kind::Find, -1, AccessMask::READ, Extra::FindHandle(Box::new(state)))?;
    Ok((handle, first))
}

/// `FindNextFileA`.
pub fn find_next_file(rt: &Runtime, handle: Handle) -> Result<FindData, crate::error::NtStatus> {
    rt.handles
        .with(handle, |slot| match &slot.extra {
            Extra::FindHandle(state) => read_next(state.dir, &state.pattern_prefix).ok_or(crate::error::NtStatus::NoMoreFiles),
            _ => Err(crate::error::NtStatus::InvalidHandle),
        })?
}

/// `FindClose`.
pub fn find_close(rt: &Runtime, handle: Handle) -> Result<(), crate::error::NtStatus> {
    rt.handles.with(handle, |slot| {
        if let Extra::FindHandle(state) = &slot.extra {
            unsafe { libc::closedir(state.dir) };
        }
    })?;
    rt.handles.close(handle)
}

extern "win64" fn create_directory_stub(path: *const u8, attrs: u64) -> i32 {
    create_directory(path, attrs)
}

const MAX_PATH: usize = 260;

/// `WIN32_FIND_DATAA`, laid out exactly as the real Windows header
/// declares it — guest code compiled against that header indexes
/// `cFileName` at its fixed offset, so the field order and widths here
/// must match bit-for-bit.
#[repr(C)]
pub struct Win32FindDataA {
    pub file_attributes: u32,
    pub creation_time: [u32; 2],
    pub last_access_time: [u32; 2],
    pub last_write_time: [u32; 2],
    pub file_size_high: u32,
    pub file_size_low: u32,
    pub reserved0: u32,
    pub reserved1: u32,
    pub file_name: [u8; MAX_PATH],
    pub alternate_file_name: [u8; 14],
}

fn fill_find_data(out: *mut Win32FindDataA, data: &FindData) {
    let mut file_name = [0u8; MAX_PATH];
    let n = data.file_name.len().min(MAX_PATH - 1);
    file_name[..n].copy_from_slice(&data.file_name.as_bytes()[..n]);
    unsafe {
        (*out).file_attributes = data.attributes;
        (*out).creation_time = [0, 0];
        (*out).last_access_time = [0, 0];
        (*out).last_write_time = [0, 0];
        (*out).file_size_high = 0;
        (*out).file_size_low = 0;
        (*out).reserved0 = 0;
        (*out).reserved1 = 0;
        (*out).file_name = file_name;
        (*out).alternate_file_name = [0u8; 14];
    }
}

/// `FindFirstFileA`.
pub extern "win64" fn find_first_file_a(pattern: *const u8, out: *mut Win32FindDataA) -> Handle {
    let rt = Runtime::get();
    let pattern = cstr_arg(pattern);
    match find_first_file(rt, &pattern) {
        Ok((handle, data)) => {
            fill_find_data(out, &data);
            handle
        }
        Err(status) => {
            crate::win32::set_last_error(status.to_win32());
            crate::handle::INVALID_HANDLE_VALUE
        }
    }
}

/// `FindNextFileA`.
pub extern "win64" fn find_next_file_a(handle: Handle, out: *mut Win32FindDataA) -> i32 {
    let rt = Runtime::get();
    match find_next_file(rt, handle) {
        Ok(data) => {
            fill_find_data(out, &data);
            1
        }
        Err(status) => {
            crate::win32::set_last_error(status.to_win32());
            0
        }
    }
}

/// `FindClose`.
pub extern "win64" fn find_close_a(handle: Handle) -> i32 {
    let rt = Runtime::get();
    match find_close(rt, handle) {
        Ok(()) => 1,
        Err(status) => {
            crate::win32::set_last_error(status.to_win32());
            0
        }
    }
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("kernel32.dll", "CreateDirectoryA", create_directory_stub as usize),
        ("kernel32.dll", "RemoveDirectoryA", remove_directory as usize),
        ("kernel32.dll", "GetTempPathA", get_temp_path as usize),
        ("kernel32.dll", "GetCurrentDirectoryA", get_current_directory as usize),
        ("kernel32.dll", "SetCurrentDirectoryA", set_current_directory as usize),
        ("kernel32.dll", "GetFileAttributesA", get_file_attributes as usize),
        ("kernel32.dll", "FindFirstFileA", find_first_file_a as usize),
        ("kernel32.dll", "FindNextFileA", find_next_file_a as usize),
        ("kernel32.dll", "FindClose", find_close_a as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::init_for_test;

    #[test]
    fn directory_round_trips_create_stat_remove() {
        let dir = std::env::temp_dir().join(format!("citcrun-fsys-test-{}", std::process::id()));
        let path = CString::new(dir.to_str().unwrap()).unwrap();
        assert_eq!(create_directory(path.as_ptr() as *const u8, 0), 1);

        let attrs = get_file_attributes(path.as_ptr() as *const u8);
        assert!(FileAttributes::from_bits_truncate(attrs).contains(FileAttributes::DIRECTORY));

        assert_eq!(remove_directory(path.as_ptr() as *const u8), 1);
    }

    #[test]
    fn find_first_and_next_enumerate_a_directory() {
        init_for_test();
        let rt = Runtime::get();
        let dir = std::env::temp_dir().join(format!("citcrun-find-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), b"x").unwrap();
        std::fs::write(dir.join("b.txt"), b"y").unwrap();

        let pattern = format!("{}/*.*", dir.to_str().unwrap());
        let (handle, first) = find_first_file(rt, &pattern).unwrap();
        let mut names = vec![first.file_name];
        while let Ok(next) = find_next_file(rt, handle) {
            names.push(next.file_name);
        }
        find_close(rt, handle).unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
