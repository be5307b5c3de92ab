//! The process-global handle table (spec.md §4.1).
//!
//! Every kind of guest-visible kernel object — files, events, mutexes,
//! threads, registry keys — is looked up by an opaque `HANDLE`. Slots are
//! allocated from a single `Mutex`-guarded `Vec`; once a slot is allocated,
//! its `kind` is type-stable until `close`, so [`HandleTable::reference`]
//! needs no lock (this mirrors `ob::handle`'s flat handle table in the
//! reference OS sources, minus the 3-level indirection it notes as future
//! work — a flat `Vec` is plenty for a single-process teaching kernel).

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use crate::error::NtStatus;
use crate::registry::key::RegistryKeyState;
use crate::win32::sync::{EventObject, MutexObject};
use crate::win32::threading::ThreadObject;

/// Opaque handle value. Non-zero for anything valid; `0` and `u64::MAX` are
/// never issued (the latter doubles as `INVALID_HANDLE_VALUE`).
pub type Handle = u64;

pub const INVALID_HANDLE_VALUE: Handle = u64::MAX;

/// The three console pseudo-handles pre-reserved at indices 0..2.
pub const STDIN_INDEX: usize = 0;
pub const STDOUT_INDEX: usize = 1;
pub const STDERR_INDEX: usize = 2;
const RESERVED_SLOTS: usize = 3;

bitflags::bitflags! {
    /// `access_mask` bit set (spec.md §3).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AccessMask: u32 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const OTHER = 0b100;
    }
}

/// Kind-specific auxiliary state, owned by the slot when the kind's
/// lifecycle says so (spec.md §3's ownership summary).
///
/// `Event`/`Mutex`/`Thread` are `Arc`-wrapped rather than `Box`-wrapped: a
/// waiter must be able to clone the object out from under [`HandleTable::with`]
/// and block on it *after* the table lock is released (spec.md §5 — waits
/// are suspension points and must never hold the table mutex).
pub enum Extra {
    None,
    File,
    Console,
    Event(Arc<EventObject>),
    Mutex(Arc<MutexObject>),
    Thread(Arc<ThreadObject>),
    RegistryKey(Box<RegistryKeyState>),
    FindHandle(Box<crate::win32::fsys::FindState>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Free,
    File,
    Console,
    Mutex,
    Event,
    Thread,
    RegistryKey,
    Find,
}

/// One slot in the handle table (spec.md §3's `HandleEntry`).
pub struct HandleEntry {
    pub kind: Kind,
    pub native_fd: RawFd,
    pub access: AccessMask,
    pub extra: Extra,
}

impl HandleEntry {
    fn free() -> Self {
        HandleEntry { kind: Kind::Free, native_fd: -1, access: AccessMask::empty(), extra: Extra::None }
    }
}

/// The process-global handle table. Constructed once by [`crate::runtime::Runtime`].
pub struct HandleTable {
    slots: Mutex<Vec<HandleEntry>>,
}

impl HandleTable {
    /// Builds a table with the three console slots pre-reserved, per spec.md §4.1.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(256);
        for fd in [0 as RawFd, 1, 2] {
            slots.push(HandleEntry { kind: Kind::Console, native_fd: fd, access: AccessMask::READ | AccessMask::WRITE, extra: Extra::Console });
        }
        HandleTable { slots: Mutex::new(slots) }
    }

    fn encode(index: usize) -> Handle {
        (index as u64) + 1
    }

    fn decode(handle: Handle) -> Option<usize> {
        handle.checked_sub(1).map(|v| v as usize)
    }

    /// Linearly scans from the first non-reserved slot for a free one;
    /// installs the fields and returns the new handle. Mutex-protected.
    pub fn allocate(&self, kind: Kind, native_fd: RawFd, access: AccessMask, extra: Extra) -> Result<Handle, NtStatus> {
        let mut slots = self.slots.lock().unwrap();
        for (i, slot) in slots.iter_mut().enumerate().skip(RESERVED_SLOTS) {
            if slot.kind == Kind::Free {
                *slot = HandleEntry { kind, native_fd, access, extra };
                return Ok(Self::encode(i));
            }
        }
        if slots.len() >= u32::MAX as usize {
            return Err(NtStatus::Unsuccessful);
        }
        slots.push(HandleEntry { kind, native_fd, access, extra });
        Ok(Self::encode(slots.len() - 1))
    }

    /// Runs `f` against the slot for `handle` while the table mutex is held.
    /// `f` must be non-blocking — it exists to read fields or clone an
    /// `Arc`-wrapped kind-specific object (`Extra::Event`/`Mutex`/`Thread`)
    /// out of the slot, never to wait on it. Waiting on the condvar/mutex a
    /// cloned `Arc` points at must happen *after* `with` returns, so the
    /// table lock is never held across a suspension point (spec.md §5: "no
    /// nested locks across subsystems"; handle-table mutations are "bounded
    /// under its mutex", waits are suspension points that must not hold it).
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&HandleEntry) -> R) -> Result<R, NtStatus> {
        let slots = self.slots.lock().unwrap();
        let index = Self::decode(handle).ok_or(NtStatus::InvalidHandle)?;
        let slot = slots.get(index).ok_or(NtStatus::InvalidHandle)?;
        if slot.kind == Kind::Free {
            return Err(NtStatus::InvalidHandle);
        }
        Ok(f(slot))
    }

    /// Marks the slot free under the mutex. Never closes `native_fd` and
    /// never frees `extra` beyond dropping it — the caller is responsible for
    /// anything that needs flushing first. Closing a reserved console slot
    /// is a no-op success.
    pub fn close(&self, handle: Handle) -> Result<(), NtStatus> {
        let mut slots = self.slots.lock().unwrap();
        let index = Self::decode(handle).ok_or(NtStatus::InvalidHandle)?;
        let slot = slots.get_mut(index).ok_or(NtStatus::InvalidHandle)?;
        if index < RESERVED_SLOTS {
            return Ok(());
        }
        if slot.kind == Kind::Free {
            return Err(NtStatus::InvalidHandle);
        }
        *slot = HandleEntry::free();
        Ok(())
    }

    pub fn standard_handle(index: usize) -> Handle {
        Self::encode(index)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_slots_are_preallocated_and_unclosable() {
        let ht = HandleTable::new();
        let h = HandleTable::standard_handle(STDOUT_INDEX);
        ht.with(h, |slot| assert_eq!(slot.kind, Kind::Console)).unwrap();
        ht.close(h).unwrap();
        ht.with(h, |slot| assert_eq!(slot.kind, Kind::Console)).unwrap();
    }

    #[test]
    fn allocate_then_close_frees_the_slot_for_reuse() {
        let ht = HandleTable::new();
        let h = ht.allocate(Kind::File, 7, AccessMask::READ, Extra::File).unwrap();
        ht.with(h, |slot| assert_eq!(slot.native_fd, 7)).unwrap();
        ht.close(h).unwrap();
        assert!(ht.with(h, |_| ()).is_err());
    }

    #[test]
    fn reference_on_invalid_handle_is_an_error() {
        let ht = HandleTable::new();
        assert!(ht.with(999_999, |_| ()).is_err());
        assert!(ht.with(INVALID_HANDLE_VALUE, |_| ()).is_err());
    }
}
