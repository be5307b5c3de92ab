//! `create_file` / `read` / `write` / `close` / `query_file_size` /
//! `set_file_position` / `delete_file` (spec.md §4.2).

use std::ffi::CString;
use std::os::fd::RawFd;

use crate::error::NtStatus;
use crate::handle::{AccessMask, Extra, Handle, Kind};
use crate::runtime::Runtime;

/// Windows file-disposition values, mapped to POSIX `open` flags per the
/// table in spec.md §4.2.
#[derive(Copy, Clone, Debug)]
pub enum Disposition {
    CreateNew,
    CreateAlways,
    OpenExisting,
    OpenAlways,
    TruncateExisting,
}

impl Disposition {
    fn open_flags(self) -> i32 {
        match self {
            Disposition::CreateNew => libc::O_CREAT | libc::O_EXCL,
            Disposition::CreateAlways => libc::O_CREAT | libc::O_TRUNC,
            Disposition::OpenExisting => 0,
            Disposition::OpenAlways => libc::O_CREAT,
            Disposition::TruncateExisting => libc::O_TRUNC,
        }
    }
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// Opens (or creates) a file and installs a `file` entry in the handle
/// table. On failure, translates `errno` through [`NtStatus::from_errno`].
pub fn create_file(rt: &Runtime, path: &str, access: AccessMask, disposition: Disposition) -> Result<Handle, NtStatus> {
    let translated = crate::nt::translate_path(path);
    let cpath = CString::new(translated).map_err(|_| NtStatus::InvalidParameter)?;

    let mut flags = disposition.open_flags();
    flags |= match (access.contains(AccessMask::READ), access.contains(AccessMask::WRITE)) {
        (true, true) => libc::O_RDWR,
        (false, true) => libc::O_WRONLY,
        _ => libc::O_RDONLY,
    };

    let fd: RawFd = unsafe { libc::open(cpath.as_ptr(), flags, 0o644) };
    if fd < 0 {
        return Err(NtStatus::from_errno(errno()));
    }

    rt.handles.allocate(Kind::File, fd, access, Extra::File)
}

/// Reads up to `buf.len()` bytes from `handle`'s fd, returning the number
/// transferred.
pub fn read(rt: &Runtime, handle: Handle, buf: &mut [u8]) -> Result<usize, NtStatus> {
    let fd = rt.handles.with(handle, |slot| slot.native_fd)?;
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(NtStatus::from_errno(errno()));
    }
    Ok(n as usize)
}

/// Writes `buf` to `handle`'s fd, returning the number transferred.
pub fn write(rt: &Runtime, handle: Handle, buf: &[u8]) -> Result<usize, NtStatus> {
    let fd = rt.handles.with(handle, |slot| slot.native_fd)?;
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        return Err(NtStatus::from_errno(errno()));
    }
    Ok(n as usize)
}

/// Destroys the handle-table entry and closes the fd — never for `console`.
pub fn close(rt: &Runtime, handle: Handle) -> Result<(), NtStatus> {
    let (kind, fd) = rt.handles.with(handle, |slot| (slot.kind, slot.native_fd))?;
    rt.handles.close(handle)?;
    if kind != Kind::Console {
        unsafe {
            libc::close(fd);
        }
    }
    Ok(())
}

/// `fstat`-based file size query.
pub fn query_file_size(rt: &Runtime, handle: Handle) -> Result<u64, NtStatus> {
    let fd = rt.handles.with(handle, |slot| slot.native_fd)?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstat(fd, &mut st) };
    if rc < 0 {
        return Err(NtStatus::from_errno(errno()));
    }
    Ok(st.st_size as u64)
}

/// Whence values for [`set_file_position`], matching `SetFilePointer`'s
/// `MoveMethod`.
#[derive(Copy, Clone, Debug)]
pub enum Whence {
    Begin,
    Current,
    End,
}

/// `SetFilePointer`'s high-dword is ignored by this design (spec.md §9 open
/// question) — callers that need >4GiB seeks will under-report, which
/// matches the partial usage this layer is built to serve.
pub fn set_file_position(rt: &Runtime, handle: Handle, offset: i64, whence: Whence) -> Result<u64, NtStatus> {
    let fd = rt.handles.with(handle, |slot| slot.native_fd)?;
    let w = match whence {
        Whence::Begin => libc::SEEK_SET,
        Whence::Current => libc::SEEK_CUR,
        Whence::End => libc::SEEK_END,
    };
    let pos = unsafe { libc::lseek(fd, offset, w) };
    if pos < 0 {
        return Err(NtStatus::from_errno(errno()));
    }
    Ok(pos as u64)
}

/// Translates the path and unlinks.
pub fn delete_file(path: &str) -> Result<(), NtStatus> {
    let translated = crate::nt::translate_path(path);
    let cpath = CString::new(translated).map_err(|_| NtStatus::InvalidParameter)?;
    let rc = unsafe { libc::unlink(cpath.as_ptr()) };
    if rc < 0 {
        return Err(NtStatus::from_errno(errno()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::init_for_test;

    #[test]
    fn create_write_read_close_round_trips_through_a_real_file() {
        init_for_test();
        let rt = Runtime::get();
        let path = std::env::temp_dir().join(format!("citcrun-nt-test-{}.bin", std::process::id()));
        let path_str = path.to_str().unwrap();

        let h = create_file(rt, path_str, AccessMask::READ | AccessMask::WRITE, Disposition::CreateAlways).unwrap();
        assert_eq!(write(rt, h, b"hi").unwrap(), 2);
        assert_eq!(query_file_size(rt, h).unwrap(), 2);
        set_file_position(rt, h, 0, Whence::Begin).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(read(rt, h, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
        close(rt, h).unwrap();

        delete_file(path_str).unwrap();
    }

    #[test]
    fn open_existing_missing_file_maps_errno_to_object_name_not_found() {
        init_for_test();
        let rt = Runtime::get();
        let err = create_file(rt, "/nonexistent/citcrun/definitely-not-here", AccessMask::READ, Disposition::OpenExisting).unwrap_err();
        assert_eq!(err, NtStatus::ObjectNameNotFound);
    }
}
