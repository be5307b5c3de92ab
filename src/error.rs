//! Error taxonomies shared across subsystems.
//!
//! Windows itself does not propagate errors by unwinding: callers check a
//! sentinel return value and then consult a per-thread "last error". NT
//! statuses and Win32 error codes are therefore plain `#[repr(u32)]` enums,
//! not [`std::error::Error`] types — they are *data*, passed across the
//! guest/host boundary and written into [`crate::win32::last_error`]. Host-side
//! fallibility (malformed files, bad byte streams) uses the `thiserror` enums
//! below, which convert into an NT status or HRESULT at the layer boundary
//! per spec.md §7's propagation policy.

use thiserror::Error;

/// A small closed set of NT-style status codes, per spec.md §4.2 / §7.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum NtStatus {
    Success = 0x0000_0000,
    Unsuccessful = 0xC000_0001,
    InvalidHandle = 0xC000_0008,
    InvalidParameter = 0xC000_000D,
    ObjectNameNotFound = 0xC000_0034,
    ObjectNameCollision = 0xC000_0035,
    AccessDenied = 0xC000_0022,
    TooManyOpenedFiles = 0xC000_011F,
    DiskFull = 0xC000_007F,
    NotADirectory = 0xC000_0103,
    EndOfFile = 0xC000_0011,
    NoMoreFiles = 0x8000_0006,
}

impl NtStatus {
    /// True for any status in the `0xC...` "error" range.
    pub fn is_error(self) -> bool {
        (self as u32) & 0xC000_0000 == 0xC000_0000
    }

    /// Maps a host `errno` value into the closed NT status set (spec.md §4.2).
    /// Unknown errno values fold to `Unsuccessful`, the documented generic failure.
    pub fn from_errno(errno: i32) -> NtStatus {
        match errno {
            libc::ENOENT => NtStatus::ObjectNameNotFound,
            libc::EACCES | libc::EPERM => NtStatus::AccessDenied,
            libc::EEXIST => NtStatus::ObjectNameCollision,
            libc::EMFILE | libc::ENFILE => NtStatus::TooManyOpenedFiles,
            libc::ENOSPC => NtStatus::DiskFull,
            libc::ENOTDIR => NtStatus::NotADirectory,
            libc::EBADF => NtStatus::InvalidHandle,
            libc::EINVAL => NtStatus::InvalidParameter,
            _ => NtStatus::Unsuccessful,
        }
    }

    /// Maps an NT status to the Win32 error code surfaced through
    /// `GetLastError` (spec.md §4.2's second conversion table).
    pub fn to_win32(self) -> u32 {
        match self {
            NtStatus::Success => 0,
            NtStatus::ObjectNameNotFound => win32::ERROR_FILE_NOT_FOUND,
            NtStatus::AccessDenied => win32::ERROR_ACCESS_DENIED,
            NtStatus::ObjectNameCollision => win32::ERROR_ALREADY_EXISTS,
            NtStatus::TooManyOpenedFiles => win32::ERROR_TOO_MANY_OPEN_FILES,
            NtStatus::DiskFull => win32::ERROR_DISK_FULL,
            NtStatus::NotADirectory => win32::ERROR_DIRECTORY,
            NtStatus::InvalidHandle => win32::ERROR_INVALID_HANDLE,
            NtStatus::InvalidParameter => win32::ERROR_INVALID_PARAMETER,
            NtStatus::EndOfFile => win32::ERROR_HANDLE_EOF,
            NtStatus::NoMoreFiles => win32::ERROR_NO_MORE_FILES,
            NtStatus::Unsuccessful => win32::ERROR_GEN_FAILURE,
        }
    }
}

/// Win32 numeric error codes, as written into `GetLastError`'s thread-local slot.
#[allow(dead_code)]
pub mod win32 {
    pub const ERROR_FILE_NOT_FOUND: u32 = 2;
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_HANDLE: u32 = 6;
    pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
    pub const ERROR_INVALID_DRIVE: u32 = 15;
    pub const ERROR_GEN_FAILURE: u32 = 31;
    pub const ERROR_HANDLE_EOF: u32 = 38;
    pub const ERROR_NOT_SUPPORTED: u32 = 50;
    pub const ERROR_DISK_FULL: u32 = 112;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
    pub const ERROR_ALREADY_EXISTS: u32 = 183;
    pub const ERROR_DIRECTORY: u32 = 267;
    pub const ERROR_MORE_DATA: u32 = 234;
    pub const ERROR_NO_MORE_ITEMS: u32 = 259;
    pub const ERROR_NO_MORE_FILES: u32 = 18;
    pub const ERROR_TOO_MANY_OPEN_FILES: u32 = 4;
    pub const ERROR_ENVVAR_NOT_FOUND: u32 = 203;
    pub const ERROR_TIMEOUT: u32 = 1460;
}

/// COM-style `HRESULT`s, for the graphics surrogate (spec.md §7).
#[allow(dead_code)]
pub mod hresult {
    pub const S_OK: i32 = 0x0000_0000u32 as i32;
    pub const E_FAIL: i32 = 0x8000_4005u32 as i32;
    pub const E_POINTER: i32 = 0x8000_4003u32 as i32;
    pub const E_INVALIDARG: i32 = 0x8007_0057u32 as i32;
    pub const E_OUTOFMEMORY: i32 = 0x8007_000Eu32 as i32;
    pub const E_NOTIMPL: i32 = 0x8000_4001u32 as i32;

    pub fn succeeded(hr: i32) -> bool {
        hr >= 0
    }
}

/// Header / mapping / relocation / import errors from the PE activator (spec.md §4.5, §7).
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("not a valid MZ/DOS image")]
    BadDosSignature,
    #[error("missing PE\\0\\0 signature")]
    BadPeSignature,
    #[error("unsupported machine type (only AMD64 is supported)")]
    UnsupportedMachine,
    #[error("unsupported optional header magic (only PE32+ is supported)")]
    UnsupportedOptionalHeader,
    #[error("image truncated while reading {0}")]
    Truncated(&'static str),
    #[error("failed to reserve the image address space: {0}")]
    Reservation(std::io::Error),
    #[error("failed to map a section: {0}")]
    Mapping(std::io::Error),
    #[error("failed to apply a final section protection: {0}")]
    Protection(std::io::Error),
    #[error("import descriptor referenced an unreadable DLL or function name")]
    BadImportName,
}

/// Failures parsing or translating DXBC / SM4 bytecode (spec.md §7).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DxbcError {
    #[error("missing DXBC magic")]
    BadMagic,
    #[error("chunk table truncated")]
    TruncatedChunkTable,
    #[error("chunk body truncated")]
    TruncatedChunk,
    #[error("SHDR chunk missing or malformed")]
    BadShader,
    #[error("unsupported SM4 construct during translation: {0}")]
    UnsupportedForTranslation(&'static str),
}
