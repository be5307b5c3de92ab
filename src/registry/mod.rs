//! The filesystem-backed registry (spec.md §4.4): hierarchical key/value
//! store with typed values, multiple root hives, and enumeration — all
//! implemented directly atop host directories and files.

pub mod key;
pub mod value;

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::OnceLock;

static BASE_PATH: OnceLock<PathBuf> = OnceLock::new();

thread_local! {
    /// Per-thread override of `base_path()`, used by tests so each test
    /// thread gets its own isolated registry root instead of racing over
    /// the process-wide `BASE_PATH` memoization (`cargo test` runs every
    /// test's `#[test]` fn on its own thread, one process).
    static BASE_PATH_OVERRIDE: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// Test-only: sets this thread's `base_path()` override. Pass `None` to
/// clear it.
#[cfg(test)]
pub fn set_base_path_override_for_test(path: Option<PathBuf>) {
    BASE_PATH_OVERRIDE.with(|cell| *cell.borrow_mut() = path);
}

/// The four root hives a guest can open (spec.md's registry on-disk format).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Hive {
    Hklm,
    Hkcu,
    Hku,
    Hkcr,
}

impl Hive {
    /// Maps the well-known `HKEY_*` pseudo-handle constants a guest passes
    /// as `parent` to `RegOpenKeyExA`/`RegCreateKeyExA`.
    pub fn from_pseudo_handle(value: u64) -> Option<Hive> {
        match value as u32 {
            0x8000_0002 => Some(Hive::Hklm),
            0x8000_0001 => Some(Hive::Hkcu),
            0x8000_0003 => Some(Hive::Hku),
            0x8000_0000 => Some(Hive::Hkcr),
            _ => None,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Hive::Hklm => "HKLM",
            Hive::Hkcu => "HKCU",
            Hive::Hku => "HKU",
            Hive::Hkcr => "HKCR",
        }
    }
}

/// Resolves and memoizes the on-disk base path, per spec.md §4.4's order:
/// `CITC_REGISTRY_PATH` env var; else (root) `/var/lib/citc/registry`; else
/// `$HOME/.citc/registry`; else a temp-directory fallback.
///
/// A thread-local override (set by [`set_base_path_override_for_test`]) is
/// checked first and bypasses the process-wide memoization entirely; it
/// exists so unit tests running concurrently on separate threads each get
/// their own registry root.
pub fn base_path() -> PathBuf {
    if let Some(path) = BASE_PATH_OVERRIDE.with(|cell| cell.borrow().clone()) {
        return path;
    }
    BASE_PATH
        .get_or_init(|| {
            if let Ok(path) = std::env::var("CITC_REGISTRY_PATH") {
                return PathBuf::from(path);
            }
            let is_root = unsafe { libc::geteuid() } == 0;
            if is_root {
                return PathBuf::from("/var/lib/citc/registry");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".citc").join("registry");
            }
            std::env::temp_dir().join("citc-registry")
        })
        .clone()
}

/// The directory a hive resolves to, creating it on first use.
pub fn hive_path(hive: Hive) -> std::io::Result<PathBuf> {
    let path = base_path().join(hive.dir_name());
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_handle_mapping_covers_the_four_hives() {
        assert_eq!(Hive::from_pseudo_handle(0x8000_0002), Some(Hive::Hklm));
        assert_eq!(Hive::from_pseudo_handle(0x8000_0001), Some(Hive::Hkcu));
        assert_eq!(Hive::from_pseudo_handle(0x8000_0003), Some(Hive::Hku));
        assert_eq!(Hive::from_pseudo_handle(0x8000_0000), Some(Hive::Hkcr));
        assert_eq!(Hive::from_pseudo_handle(0x1234), None);
    }
}
