//! `CreateThread` / TLS / interlocked primitives (spec.md §4.3).
//!
//! Guest threads map 1:1 onto host `std::thread`s. Exit codes and the
//! finished flag live behind the same condvar [`win32::sync`] uses for
//! waits, so `WaitForSingleObject(thread_handle, ...)` composes directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Instant;

use crate::handle::{AccessMask, Extra, Handle, Kind};
use crate::runtime::Runtime;

type ThreadStart = extern "win64" fn(*mut u8) -> u32;

/// `{finished, exit_code, condvar}` (spec.md §3).
pub struct ThreadObject {
    state: Mutex<ThreadState>,
    condvar: Condvar,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
}

struct ThreadState {
    finished: bool,
    exit_code: u32,
}

impl ThreadObject {
    fn new() -> Self {
        ThreadObject {
            state: Mutex::new(ThreadState { finished: false, exit_code: 0 }),
            condvar: Condvar::new(),
            join: Mutex::new(None),
        }
    }

    fn mark_finished(&self, exit_code: u32) {
        let mut state = self.state.lock().unwrap();
        state.finished = true;
        state.exit_code = exit_code;
        self.condvar.notify_all();
    }

    /// Blocks until the thread finishes or `deadline` elapses.
    pub fn wait_finished(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.finished {
                return true;
            }
            let Some(deadline) = deadline else {
                state = self.condvar.wait(state).unwrap();
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, timed_out) = self.condvar.wait_timeout(state, deadline - now).unwrap();
            state = next;
            if timed_out.timed_out() && !state.finished {
                return false;
            }
        }
    }

    pub fn exit_code(&self) -> u32 {
        self.state.lock().unwrap().exit_code
    }
}

/// A guest thread-local slot index → per-host-thread value map, keyed by the
/// same hashed thread id [`crate::win32::env::get_current_thread_id`] uses.
/// A real Windows TLS slot is per-thread storage; this core models it with a
/// shared table rather than true thread-locals, since slot indices are
/// allocated at runtime and must be visible across all guest threads
/// (spec.md §4.3's TLS note).
static TLS: OnceLock<Mutex<TlsState>> = OnceLock::new();

#[derive(Default)]
struct TlsState {
    next_slot: u32,
    values: HashMap<(u32, u32), u64>,
}

fn tls() -> &'static Mutex<TlsState> {
    TLS.get_or_init(|| Mutex::new(TlsState::default()))
}

/// `TlsAlloc`.
pub extern "win64" fn tls_alloc() -> u32 {
    let mut state = tls().lock().unwrap();
    let slot = state.next_slot;
    state.next_slot += 1;
    slot
}

/// `TlsGetValue`.
pub extern "win64" fn tls_get_value(slot: u32) -> u64 {
    let tid = crate::win32::env::get_current_thread_id();
    tls().lock().unwrap().values.get(&(tid, slot)).copied().unwrap_or(0)
}

/// `TlsSetValue`.
pub extern "win64" fn tls_set_value(slot: u32, value: u64) -> i32 {
    let tid = crate::win32::env::get_current_thread_id();
    tls().lock().unwrap().values.insert((tid, slot), value);
    1
}

/// `TlsFree`. Drops every value ever stored under `slot`, across all threads.
pub extern "win64" fn tls_free(slot: u32) -> i32 {
    tls().lock().unwrap().values.retain(|&(_, s), _| s != slot);
    1
}

struct ThreadStartArgs {
    start: ThreadStart,
    param: *mut u8,
}
unsafe impl Send for ThreadStartArgs {}

/// `CreateThread`. Spawns a host thread running `start(param)` under the
/// foreign x64 ABI and installs a `thread` handle-table entry others can
/// wait on.
pub extern "win64" fn create_thread(
    _attrs: u64,
    _stack_size: u64,
    start: ThreadStart,
    param: *mut u8,
    _flags: u32,
    out_thread_id: *mut u32,
) -> u64 {
    let rt = Runtime::get();
    let object = Arc::new(ThreadObject::new());
    let object_for_trampoline = Arc::clone(&object);

    let args = ThreadStartArgs { start, param };
    let join = std::thread::spawn(move || {
        let args = args;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (args.start)(args.param)));
        let exit_code = match result {
            Ok(code) => code,
            Err(payload) => match payload.downcast::<ThreadExit>() {
                Ok(exit) => exit.0,
                Err(payload) => std::panic::resume_unwind(payload),
            },
        };
        object_for_trampoline.mark_finished(exit_code);
    });

    if !out_thread_id.is_null() {
        let tid_guess = join.thread().id();
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        tid_guess.hash(&mut hasher);
        unsafe { *out_thread_id = hasher.finish() as u32 };
    }

    *object.join.lock().unwrap() = Some(join);

    match rt.handles.allocate(Kind::Thread, -1, AccessMask::READ, Extra::Thread(object)) {
        Ok(h) => h,
        Err(status) => {
            crate::win32::set_last_error(status.to_win32());
            0
        }
    }
}

/// `ExitThread`. Unwinds the calling host thread with a `ThreadExit`
/// payload; the spawn closure in [`create_thread`] catches it and treats it
/// the same as a normal return of `exit_code`.
pub extern "win64" fn exit_thread(exit_code: u32) -> ! {
    std::panic::panic_any(ThreadExit(exit_code));
}

struct ThreadExit(u32);

/// `GetExitCodeThread`. `STILL_ACTIVE` (259) while running.
pub extern "win64" fn get_exit_code_thread(handle: u64, out_code: *mut u32) -> i32 {
    const STILL_ACTIVE: u32 = 259;
    let rt = Runtime::get();
    let result = rt.handles.with(handle, |slot| match &slot.extra {
        Extra::Thread(thread) => {
            let state = thread.state.lock().unwrap();
            if state.finished { state.exit_code } else { STILL_ACTIVE }
        }
        _ => STILL_ACTIVE,
    });
    match result {
        Ok(code) => {
            unsafe { *out_code = code };
            1
        }
        Err(status) => {
            crate::win32::set_last_error(status.to_win32());
            0
        }
    }
}

/// `InterlockedIncrement`.
pub extern "win64" fn interlocked_increment(addend: *mut i32) -> i32 {
    let atomic = unsafe { &*(addend as *const AtomicI32) };
    atomic.fetch_add(1, Ordering::SeqCst) + 1
}

/// `InterlockedDecrement`.
pub extern "win64" fn interlocked_decrement(addend: *mut i32) -> i32 {
    let atomic = unsafe { &*(addend as *const AtomicI32) };
    atomic.fetch_sub(1, Ordering::SeqCst) - 1
}

/// `InterlockedExchange`.
pub extern "win64" fn interlocked_exchange(target: *mut u32, value: u32) -> u32 {
    let atomic = unsafe { &*(target as *const AtomicU32) };
    atomic.swap(value, Ordering::SeqCst)
}

/// `InterlockedCompareExchange`.
pub extern "win64" fn interlocked_compare_exchange(dest: *mut u32, exchange: u32, comparand: u32) -> u32 {
    let atomic = unsafe { &*(dest as *const AtomicU32) };
    match atomic.compare_exchange(comparand, exchange, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(prev) => prev,
        Err(prev) => prev,
    }
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("kernel32.dll", "CreateThread", create_thread as usize),
        ("kernel32.dll", "ExitThread", exit_thread as usize),
        ("kernel32.dll", "GetExitCodeThread", get_exit_code_thread as usize),
        ("kernel32.dll", "TlsAlloc", tls_alloc as usize),
        ("kernel32.dll", "TlsGetValue", tls_get_value as usize),
        ("kernel32.dll", "TlsSetValue", tls_set_value as usize),
        ("kernel32.dll", "TlsFree", tls_free as usize),
        ("kernel32.dll", "InterlockedIncrement", interlocked_increment as usize),
        ("kernel32.dll", "InterlockedDecrement", interlocked_decrement as usize),
        ("kernel32.dll", "InterlockedExchange", interlocked_exchange as usize),
        ("kernel32.dll", "InterlockedCompareExchange", interlocked_compare_exchange as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::init_for_test;

    extern "win64" fn returns_seven(_param: *mut u8) -> u32 {
        7
    }

    extern "win64" fn calls_exit_thread(_param: *mut u8) -> u32 {
        exit_thread(42);
    }

    #[test]
    fn exit_thread_unwinds_through_the_spawn_closure_and_still_marks_finished() {
        init_for_test();
        let rt = Runtime::get();
        let mut tid = 0u32;
        let handle = create_thread(0, 0, calls_exit_thread, std::ptr::null_mut(), 0, &mut tid);
        assert_ne!(handle, 0);

        let thread = rt
            .handles
            .with(handle, |slot| match &slot.extra {
                Extra::Thread(thread) => Some(Arc::clone(thread)),
                _ => None,
            })
            .unwrap()
            .unwrap();
        assert!(thread.wait_finished(None));

        let mut code = 0u32;
        assert_eq!(get_exit_code_thread(handle, &mut code), 1);
        assert_eq!(code, 42);
    }

    #[test]
    fn create_thread_runs_and_reports_exit_code() {
        init_for_test();
        let rt = Runtime::get();
        let mut tid = 0u32;
        let handle = create_thread(0, 0, returns_seven, std::ptr::null_mut(), 0, &mut tid);
        assert_ne!(handle, 0);

        let thread = rt
            .handles
            .with(handle, |slot| match &slot.extra {
                Extra::Thread(thread) => Some(Arc::clone(thread)),
                _ => None,
            })
            .unwrap()
            .unwrap();
        assert!(thread.wait_finished(None));

        let mut code = 0u32;
        assert_eq!(get_exit_code_thread(handle, &mut code), 1);
        assert_eq!(code, 7);
    }

    #[test]
    fn tls_value_is_scoped_per_calling_thread() {
        let slot = tls_alloc();
        assert_eq!(tls_get_value(slot), 0);
        tls_set_value(slot, 42);
        assert_eq!(tls_get_value(slot), 42);
        tls_free(slot);
    }

    #[test]
    fn interlocked_increment_and_compare_exchange() {
        let mut value: i32 = 0;
        assert_eq!(interlocked_increment(&mut value), 1);
        assert_eq!(interlocked_decrement(&mut value), 0);

        let mut target: u32 = 5;
        assert_eq!(interlocked_compare_exchange(&mut target, 9, 5), 5);
        assert_eq!(target, 9);
        assert_eq!(interlocked_compare_exchange(&mut target, 1, 5), 9);
        assert_eq!(target, 9);
    }
}
