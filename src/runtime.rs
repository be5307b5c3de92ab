//! The process-singleton runtime value (spec.md §9's design note).
//!
//! Real Windows scatters this state across global kernel tables; spec.md
//! explicitly recommends modeling it "as fields of a single runtime value
//! constructed at startup and injected into the loader and every surrogate".
//! [`Runtime::get`] is that value — a `OnceLock` populated by `main.rs`
//! before the guest image is activated, then read (never re-initialized)
//! for the rest of the process's life.

use std::ffi::CString;
use std::sync::OnceLock;

use crate::gfx::GfxTables;
use crate::handle::HandleTable;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// The sentinel `HANDLE` kernel32 hands back for `GetProcessHeap()`. Not a
/// real handle-table entry — `HeapAlloc`/`HeapFree` against it fall straight
/// through to the host allocator (spec.md §4.3).
pub const PROCESS_HEAP_SENTINEL: u64 = 0x0001_0000;

pub struct Runtime {
    pub handles: HandleTable,
    pub gfx: GfxTables,
    command_line: CString,
}

impl Runtime {
    /// Initializes the process singleton. Must be called exactly once, from
    /// `main.rs`, before the guest entry point runs. Panics if called twice.
    pub fn init(command_line: CString) {
        let runtime = Runtime { handles: HandleTable::new(), gfx: GfxTables::new(), command_line };
        RUNTIME.set(runtime).unwrap_or_else(|_| panic!("Runtime::init called more than once"));
    }

    /// Accesses the singleton. Panics if [`Runtime::init`] has not run yet —
    /// every surrogate call happens after LDR has transferred control to the
    /// guest, by which point initialization is guaranteed complete.
    pub fn get() -> &'static Runtime {
        RUNTIME.get().expect("Runtime::init must run before any surrogate call")
    }

    pub fn command_line(&self) -> &CString {
        &self.command_line
    }
}

#[cfg(test)]
pub fn init_for_test() {
    let _ = RUNTIME.set(Runtime { handles: HandleTable::new(), gfx: GfxTables::new(), command_line: CString::new("citcrun-test").unwrap() });
}
