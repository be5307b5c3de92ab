//! `RegOpenKeyExA` / `RegCreateKeyExA` / `RegCloseKey` / `RegDeleteKeyA`
//! (spec.md §4.4).

use std::path::PathBuf;

use crate::error::NtStatus;
use crate::handle::{AccessMask, Extra, Handle, Kind};
use crate::registry::Hive;
use crate::runtime::Runtime;

/// The resolved host path a registry-key handle's `extra` owns for its
/// lifetime (spec.md §3).
pub struct RegistryKeyState {
    pub path: PathBuf,
}

/// `RegCreateKeyExA`'s disposition out-parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    CreatedNewKey,
    OpenedExistingKey,
}

fn resolve_path(rt: &Runtime, parent: Handle, subpath: &str) -> Result<PathBuf, NtStatus> {
    let folded: String = subpath.chars().map(|c| if c == '\\' { '/' } else { c }).collect();
    if let Some(hive) = Hive::from_pseudo_handle(parent) {
        let base = crate::registry::hive_path(hive).map_err(|e| NtStatus::from_errno(e.raw_os_error().unwrap_or(libc::EIO)))?;
        return Ok(if folded.is_empty() { base } else { base.join(folded) });
    }
    let parent_path = rt.handles.with(parent, |slot| match &slot.extra {
        Extra::RegistryKey(state) => Some(state.path.clone()),
        _ => None,
    })?;
    let parent_path = parent_path.ok_or(NtStatus::InvalidHandle)?;
    Ok(if folded.is_empty() { parent_path } else { parent_path.join(folded) })
}

/// `RegOpenKeyExA`. Fails with `ObjectNameNotFound` if the resolved path
/// doesn't exist, or `NotADirectory` if it exists but isn't a key.
pub fn open_key(rt: &Runtime, parent: Handle, subpath: &str, access: AccessMask) -> Result<Handle, NtStatus> {
    let path = resolve_path(rt, parent, subpath)?;
    if !path.exists() {
        return Err(NtStatus::ObjectNameNotFound);
    }
    if !path.is_dir() {
        return Err(NtStatus::NotADirectory);
    }
    rt.handles.allocate(Kind::RegistryKey, -1, access, Extra::RegistryKey(Box::new(RegistryKeyState { path })))
}

/// `RegCreateKeyExA`. `mkdir -p`s the resolved path if absent.
pub fn create_key(rt: &Runtime, parent: Handle, subpath: &str, access: AccessMask) -> Result<(Handle, Disposition), NtStatus> {
    let path = resolve_path(rt, parent, subpath)?;
    let disposition = if path.exists() { Disposition::OpenedExistingKey } else { Disposition::CreatedNewKey };
    std::fs::create_dir_all(&path).map_err(|e| NtStatus::from_errno(e.raw_os_error().unwrap_or(libc::EIO)))?;
    let handle = rt.handles.allocate(Kind::RegistryKey, -1, access, Extra::RegistryKey(Box::new(RegistryKeyState { path })))?;
    Ok((handle, disposition))
}

/// `RegCloseKey`. A no-op success for root hive pseudo-handles.
pub fn close_key(rt: &Runtime, handle: Handle) -> Result<(), NtStatus> {
    if Hive::from_pseudo_handle(handle).is_some() {
        return Ok(());
    }
    rt.handles.close(handle)
}

/// `RegDeleteKeyA`. Surfaces `ENOTEMPTY` as `AccessDenied`, matching
/// Windows' refusal to delete a key with live subkeys (spec.md §4.4).
pub fn delete_key(rt: &Runtime, parent: Handle, subpath: &str) -> Result<(), NtStatus> {
    let path = resolve_path(rt, parent, subpath)?;
    std::fs::remove_dir(&path).map_err(|e| match e.raw_os_error() {
        Some(libc::ENOTEMPTY) => NtStatus::AccessDenied,
        Some(errno) => NtStatus::from_errno(errno),
        None => NtStatus::Unsuccessful,
    })
}

pub fn key_path(rt: &Runtime, handle: Handle) -> Result<PathBuf, NtStatus> {
    if let Some(hive) = Hive::from_pseudo_handle(handle) {
        return crate::registry::hive_path(hive).map_err(|e| NtStatus::from_errno(e.raw_os_error().unwrap_or(libc::EIO)));
    }
    rt.handles
        .with(handle, |slot| match &slot.extra {
            Extra::RegistryKey(state) => Some(state.path.clone()),
            _ => None,
        })?
        .ok_or(NtStatus::InvalidHandle)
}

/// Provided for symmetry with [`HandleTable::standard_handle`]; root hives
/// never occupy a table slot, so their "handle" is just the pseudo-handle
/// constant itself.
pub fn hive_handle(hive: Hive) -> Handle {
    match hive {
        Hive::Hklm => 0x8000_0002,
        Hive::Hkcu => 0x8000_0001,
        Hive::Hku => 0x8000_0003,
        Hive::Hkcr => 0x8000_0000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::init_for_test;

    fn isolated_base() -> tempfile_guard::Guard {
        tempfile_guard::Guard::new()
    }

    mod tempfile_guard {
        use crate::registry::set_base_path_override_for_test;

        pub struct Guard {
            pub path: std::path::PathBuf,
        }
        impl Guard {
            pub fn new() -> Self {
                let path = std::env::temp_dir().join(format!("citcrun-registry-test-{}-{}", std::process::id(), std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos()));
                set_base_path_override_for_test(Some(path.clone()));
                Guard { path }
            }
        }
        impl Drop for Guard {
            fn drop(&mut self) {
                set_base_path_override_for_test(None);
                let _ = std::fs::remove_dir_all(&self.path);
            }
        }
    }

    #[test]
    fn create_key_reports_created_then_opened_on_second_call() {
        let _guard = isolated_base();
        init_for_test();
        let rt = Runtime::get();
        let hklm = hive_handle(Hive::Hklm);

        let (h1, d1) = create_key(rt, hklm, "Test", AccessMask::READ | AccessMask::WRITE).unwrap();
        assert_eq!(d1, Disposition::CreatedNewKey);
        close_key(rt, h1).unwrap();

        let (h2, d2) = create_key(rt, hklm, "Test", AccessMask::READ).unwrap();
        assert_eq!(d2, Disposition::OpenedExistingKey);
        close_key(rt, h2).unwrap();
    }

    #[test]
    fn open_key_on_missing_path_is_object_name_not_found() {
        let _guard = isolated_base();
        init_for_test();
        let rt = Runtime::get();
        let hkcu = hive_handle(Hive::Hkcu);
        let err = open_key(rt, hkcu, "DoesNotExist", AccessMask::READ).unwrap_err();
        assert_eq!(err, NtStatus::ObjectNameNotFound);
    }
}
