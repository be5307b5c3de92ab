//! `RegQueryValueExA` / `RegSetValueExA` / `RegDeleteValueA` /
//! `RegEnumKeyExA` / `RegEnumValueA` (spec.md §4.4).
//!
//! A value is a regular file under the key directory, starting with two
//! little-endian `u32`s (`type`, `length`) followed by the payload.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::NtStatus;
use crate::handle::Handle;
use crate::registry::key;
use crate::runtime::Runtime;

/// The closed set of registry value types spec.md §3 names.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ValueType {
    None = 0,
    Sz = 1,
    ExpandSz = 2,
    Binary = 3,
    Dword = 4,
}

impl ValueType {
    fn from_u32(v: u32) -> ValueType {
        match v {
            1 => ValueType::Sz,
            2 => ValueType::ExpandSz,
            3 => ValueType::Binary,
            4 => ValueType::Dword,
            _ => ValueType::None,
        }
    }
}

const DEFAULT_VALUE_NAME: &str = "(Default)";

fn value_file_name(name: &str) -> &str {
    if name.is_empty() {
        DEFAULT_VALUE_NAME
    } else {
        name
    }
}

fn io_err(e: std::io::Error) -> NtStatus {
    NtStatus::from_errno(e.raw_os_error().unwrap_or(libc::EIO))
}

/// Queried result: the value's type and payload bytes.
pub struct QueriedValue {
    pub value_type: ValueType,
    pub data: Vec<u8>,
}

/// `RegQueryValueExA`. Name defaults to `(Default)` when empty (spec.md
/// §4.4). Callers that only want the length should pass a zero-capacity
/// destination and read `data.len()` off the `more_data`-style error path —
/// modeled here simply by always returning the full payload, since this is
/// an in-process API rather than a raw buffer-marshaling boundary.
pub fn query_value(key_path: &Path, name: &str) -> Result<QueriedValue, NtStatus> {
    let path = key_path.join(value_file_name(name));
    let mut file = fs::File::open(&path).map_err(io_err)?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header).map_err(io_err)?;
    let value_type = ValueType::from_u32(u32::from_le_bytes(header[0..4].try_into().unwrap()));
    let length = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    let mut data = vec![0u8; length];
    file.read_exact(&mut data).map_err(io_err)?;
    Ok(QueriedValue { value_type, data })
}

/// `RegSetValueExA`. Creates or truncates the value file and writes the
/// header then the payload.
pub fn set_value(key_path: &Path, name: &str, value_type: ValueType, data: &[u8]) -> Result<(), NtStatus> {
    if !key_path.is_dir() {
        return Err(NtStatus::ObjectNameNotFound);
    }
    let path = key_path.join(value_file_name(name));
    let mut file = fs::File::create(&path).map_err(io_err)?;
    file.write_all(&(value_type as u32).to_le_bytes()).map_err(io_err)?;
    file.write_all(&(data.len() as u32).to_le_bytes()).map_err(io_err)?;
    file.write_all(data).map_err(io_err)?;
    Ok(())
}

/// `RegDeleteValueA`.
pub fn delete_value(key_path: &Path, name: &str) -> Result<(), NtStatus> {
    let path = key_path.join(value_file_name(name));
    fs::remove_file(&path).map_err(io_err)
}

/// `RegEnumKeyExA`. Walks the directory, counting subdirectories, returning
/// the name at `index` or `NoMoreFiles` once exhausted. Re-reads the
/// directory on every call — the O(n²) enumeration cost spec.md §4.4
/// explicitly accepts in exchange for a stateless cursor.
pub fn enum_subkey(key_path: &Path, index: u32) -> Result<String, NtStatus> {
    let mut seen = 0u32;
    let entries = fs::read_dir(key_path).map_err(io_err)?;
    for entry in entries {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_dir() {
            continue;
        }
        if seen == index {
            return Ok(entry.file_name().to_string_lossy().into_owned());
        }
        seen += 1;
    }
    Err(NtStatus::NoMoreFiles)
}

/// `RegEnumValueA`. Same walking strategy as [`enum_subkey`], but over
/// regular files.
pub fn enum_value(key_path: &Path, index: u32) -> Result<String, NtStatus> {
    let mut seen = 0u32;
    let entries = fs::read_dir(key_path).map_err(io_err)?;
    for entry in entries {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        if seen == index {
            return Ok(entry.file_name().to_string_lossy().into_owned());
        }
        seen += 1;
    }
    Err(NtStatus::NoMoreFiles)
}

pub fn query_value_by_handle(rt: &Runtime, handle: Handle, name: &str) -> Result<QueriedValue, NtStatus> {
    query_value(&key::key_path(rt, handle)?, name)
}

pub fn set_value_by_handle(rt: &Runtime, handle: Handle, name: &str, value_type: ValueType, data: &[u8]) -> Result<(), NtStatus> {
    set_value(&key::key_path(rt, handle)?, name, value_type, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "citcrun-regvalue-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos()
        ));
        fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn set_then_query_value_round_trips_type_and_payload() {
        let dir = scratch_dir();
        set_value(&dir, "Version", ValueType::Sz, b"1.0\0").unwrap();
        let queried = query_value(&dir, "Version").unwrap();
        assert_eq!(queried.value_type, ValueType::Sz);
        assert_eq!(queried.data, b"1.0\0");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_name_maps_to_the_default_value() {
        let dir = scratch_dir();
        set_value(&dir, "", ValueType::Dword, &42u32.to_le_bytes()).unwrap();
        assert!(dir.join("(Default)").exists());
        let queried = query_value(&dir, "").unwrap();
        assert_eq!(u32::from_le_bytes(queried.data.try_into().unwrap()), 42);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn delete_value_then_query_is_not_found() {
        let dir = scratch_dir();
        set_value(&dir, "Temp", ValueType::Binary, &[1, 2, 3]).unwrap();
        delete_value(&dir, "Temp").unwrap();
        let err = query_value(&dir, "Temp").unwrap_err();
        assert_eq!(err, NtStatus::ObjectNameNotFound);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn enum_subkey_stops_at_no_more_files() {
        let dir = scratch_dir();
        fs::create_dir(dir.join("Sub1")).unwrap();
        assert!(enum_subkey(&dir, 0).is_ok());
        assert_eq!(enum_subkey(&dir, 1).unwrap_err(), NtStatus::NoMoreFiles);
        fs::remove_dir_all(&dir).unwrap();
    }
}
