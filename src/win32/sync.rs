//! Events, mutexes, critical sections, and the wait family (spec.md §4.3,
//! §5). Each object carries its own lock plus condvar; the handle table's
//! mutex is never held while blocking on one (spec.md §5's locking
//! discipline — no nested locks across subsystems).

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::handle::{AccessMask, Extra, Handle, Kind};
use crate::runtime::Runtime;

pub const INFINITE: u32 = 0xFFFF_FFFF;
pub const WAIT_OBJECT_0: u32 = 0;
pub const WAIT_TIMEOUT: u32 = 0x0000_0102;
pub const WAIT_FAILED: u32 = 0xFFFF_FFFF;

/// `{mutex, condvar, signaled, manual_reset}` (spec.md §3).
pub struct EventObject {
    signaled: Mutex<bool>,
    condvar: Condvar,
    manual_reset: bool,
}

impl EventObject {
    pub fn new(manual_reset: bool, initial_state: bool) -> Self {
        EventObject { signaled: Mutex::new(initial_state), condvar: Condvar::new(), manual_reset }
    }

    /// `SetEvent`. Broadcasts for manual-reset events; signals one waiter
    /// for auto-reset (the auto-reset clear happens inside `wait`, not here).
    pub fn set(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        if self.manual_reset {
            self.condvar.notify_all();
        } else {
            self.condvar.notify_one();
        }
    }

    /// `ResetEvent`.
    pub fn reset(&self) {
        *self.signaled.lock().unwrap() = false;
    }

    /// Blocks until signaled or `deadline` elapses. Returns `true` if the
    /// wait was satisfied. For auto-reset events, clears the flag atomically
    /// with the wake-up, under the same mutex that guards `set`/`reset`.
    fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut signaled = self.signaled.lock().unwrap();
        loop {
            if *signaled {
                if !self.manual_reset {
                    *signaled = false;
                }
                return true;
            }
            let Some(deadline) = deadline else {
                signaled = self.condvar.wait(signaled).unwrap();
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, timed_out) = self.condvar.wait_timeout(signaled, deadline - now).unwrap();
            signaled = next;
            if timed_out.timed_out() && !*signaled {
                return false;
            }
        }
    }

    /// Zero-timeout try-wait with no sleep, per spec.md §8's boundary case.
    fn try_wait(&self) -> bool {
        self.wait(Some(Instant::now()))
    }
}

/// A recursive lock, optionally pre-acquired by the creator (spec.md §3).
pub struct MutexObject {
    state: Mutex<MutexState>,
    condvar: Condvar,
}

struct MutexState {
    owner: Option<std::thread::ThreadId>,
    depth: u32,
}

impl MutexObject {
    pub fn new(initial_owner: bool) -> Self {
        let state = if initial_owner {
            MutexState { owner: Some(std::thread::current().id()), depth: 1 }
        } else {
            MutexState { owner: None, depth: 0 }
        };
        MutexObject { state: Mutex::new(state), condvar: Condvar::new() }
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let me = std::thread::current().id();
        match state.owner {
            Some(owner) if owner == me => {
                state.depth += 1;
                true
            }
            None => {
                state.owner = Some(me);
                state.depth = 1;
                true
            }
            _ => false,
        }
    }

    fn acquire_blocking(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock().unwrap();
        let me = std::thread::current().id();
        loop {
            match state.owner {
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return true;
                }
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return true;
                }
                _ => {}
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
            if timed_out.timed_out() {
                return false;
            }
        }
    }

    /// `ReleaseMutex`.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        if state.depth > 0 {
            state.depth -= 1;
            if state.depth == 0 {
                state.owner = None;
                self.condvar.notify_one();
            }
        }
    }
}

/// A single guest-allocated `CRITICAL_SECTION`. The in-process pointer the
/// guest stores inside the structure points at a leaked `MutexObject`;
/// `delete` frees it (spec.md §4.3).
pub extern "win64" fn initialize_critical_section(section: *mut u64) {
    let boxed = Box::new(MutexObject::new(false));
    unsafe {
        *section = Box::into_raw(boxed) as u64;
    }
}

pub extern "win64" fn enter_critical_section(section: *mut u64) {
    let mutex = unsafe { &*(*section as *const MutexObject) };
    mutex.acquire_blocking(None);
}

pub extern "win64" fn leave_critical_section(section: *mut u64) {
    let mutex = unsafe { &*(*section as *const MutexObject) };
    mutex.release();
}

pub extern "win64" fn delete_critical_section(section: *mut u64) {
    unsafe {
        drop(Box::from_raw(*section as *mut MutexObject));
        *section = 0;
    }
}

/// `CreateEventA`. `name` is ignored in this core.
pub extern "win64" fn create_event(manual_reset: i32, initial_state: i32, _name: *const u8) -> u64 {
    let rt = Runtime::get();
    let event = EventObject::new(manual_reset != 0, initial_state != 0);
    match rt.handles.allocate(Kind::Event, -1, AccessMask::READ | AccessMask::WRITE, Extra::Event(Arc::new(event))) {
        Ok(h) => h,
        Err(status) => {
            crate::win32::set_last_error(status.to_win32());
            0
        }
    }
}

pub extern "win64" fn set_event(handle: u64) -> i32 {
    with_event(handle, |event| event.set()).is_some() as i32
}

pub extern "win64" fn reset_event(handle: u64) -> i32 {
    with_event(handle, |event| event.reset()).is_some() as i32
}

pub extern "win64" fn create_mutex(_attrs: u64, initial_owner: i32, _name: *const u8) -> u64 {
    let rt = Runtime::get();
    let mutex = MutexObject::new(initial_owner != 0);
    match rt.handles.allocate(Kind::Mutex, -1, AccessMask::READ | AccessMask::WRITE, Extra::Mutex(Arc::new(mutex))) {
        Ok(h) => h,
        Err(status) => {
            crate::win32::set_last_error(status.to_win32());
            0
        }
    }
}

pub extern "win64" fn release_mutex(handle: u64) -> i32 {
    with_mutex(handle, |mutex| mutex.release()).is_some() as i32
}

/// Clones the event's `Arc` out from under the table lock, then releases it
/// before calling `f` — `f` may block (e.g. `EventObject::wait`), and must
/// never run while the handle table's mutex is held (spec.md §5).
fn with_event<R>(handle: Handle, f: impl FnOnce(&EventObject) -> R) -> Option<R> {
    let event = Runtime::get()
        .handles
        .with(handle, |slot| match &slot.extra {
            Extra::Event(event) => Some(Arc::clone(event)),
            _ => None,
        })
        .ok()
        .flatten()?;
    Some(f(&event))
}

/// Same pattern as [`with_event`]: the `Arc<MutexObject>` is cloned out
/// while the table lock is held only for the clone, then `f` (which may
/// block in `MutexObject::acquire_blocking`) runs after it's released.
fn with_mutex<R>(handle: Handle, f: impl FnOnce(&MutexObject) -> R) -> Option<R> {
    let mutex = Runtime::get()
        .handles
        .with(handle, |slot| match &slot.extra {
            Extra::Mutex(mutex) => Some(Arc::clone(mutex)),
            _ => None,
        })
        .ok()
        .flatten()?;
    Some(f(&mutex))
}

fn deadline_from_timeout(timeout_ms: u32) -> Option<Instant> {
    if timeout_ms == INFINITE {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
    }
}

/// `WaitForSingleObject`, dispatching on the slot's kind (spec.md §4.3).
pub extern "win64" fn wait_single(handle: u64, timeout_ms: u32) -> u32 {
    let rt = Runtime::get();
    let kind = match rt.handles.with(handle, |slot| slot.kind) {
        Ok(kind) => kind,
        Err(_) => return WAIT_FAILED,
    };
    let deadline = deadline_from_timeout(timeout_ms);
    match kind {
        Kind::Thread => {
            // Clone the `Arc<ThreadObject>` out while the table lock is
            // held only for the clone, then block on it afterward — never
            // hold the handle table's mutex across a suspension point
            // (spec.md §5).
            let thread = rt
                .handles
                .with(handle, |slot| match &slot.extra {
                    Extra::Thread(thread) => Some(Arc::clone(thread)),
                    _ => None,
                })
                .ok()
                .flatten();
            let satisfied = thread.map(|thread| thread.wait_finished(deadline));
            match satisfied {
                Some(true) => WAIT_OBJECT_0,
                Some(false) => WAIT_TIMEOUT,
                None => WAIT_FAILED,
            }
        }
        Kind::Event => {
            let satisfied = with_event(handle, |event| {
                if timeout_ms == 0 { event.try_wait() } else { event.wait(deadline) }
            });
            match satisfied {
                Some(true) => WAIT_OBJECT_0,
                Some(false) => WAIT_TIMEOUT,
                None => WAIT_FAILED,
            }
        }
        Kind::Mutex => {
            let satisfied = with_mutex(handle, |mutex| {
                if timeout_ms == INFINITE {
                    mutex.acquire_blocking(None)
                } else if timeout_ms == 0 {
                    mutex.try_acquire()
                } else {
                    mutex.acquire_blocking(deadline)
                }
            });
            match satisfied {
                Some(true) => WAIT_OBJECT_0,
                Some(false) => WAIT_TIMEOUT,
                None => WAIT_FAILED,
            }
        }
        _ => WAIT_FAILED,
    }
}

/// `WaitForMultipleObjects`. When `wait_all`, each handle's single-wait must
/// succeed within the *same* per-call `timeout_ms` bound — spec.md §9 flags
/// this as a deliberate deviation from real Windows (which bounds the total),
/// kept here to keep the semantics teachable. When waiting for any, polls
/// each handle with a zero timeout in round-robin until one succeeds or the
/// deadline passes.
pub extern "win64" fn wait_multiple(handles: *const u64, count: u32, wait_all: i32, timeout_ms: u32) -> u32 {
    let handles = unsafe { std::slice::from_raw_parts(handles, count as usize) };
    if wait_all != 0 {
        for &h in handles {
            if wait_single(h, timeout_ms) != WAIT_OBJECT_0 {
                return WAIT_TIMEOUT;
            }
        }
        return WAIT_OBJECT_0;
    }

    let deadline = deadline_from_timeout(timeout_ms);
    loop {
        for (i, &h) in handles.iter().enumerate() {
            if wait_single(h, 0) == WAIT_OBJECT_0 {
                return WAIT_OBJECT_0 + i as u32;
            }
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return WAIT_TIMEOUT;
            }
        } else {
            std::thread::yield_now();
            continue;
        }
        std::thread::yield_now();
    }
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("kernel32.dll", "InitializeCriticalSection", initialize_critical_section as usize),
        ("kernel32.dll", "EnterCriticalSection", enter_critical_section as usize),
        ("kernel32.dll", "LeaveCriticalSection", leave_critical_section as usize),
        ("kernel32.dll", "DeleteCriticalSection", delete_critical_section as usize),
        ("kernel32.dll", "CreateEventA", create_event as usize),
        ("kernel32.dll", "SetEvent", set_event as usize),
        ("kernel32.dll", "ResetEvent", reset_event as usize),
        ("kernel32.dll", "CreateMutexA", create_mutex as usize),
        ("kernel32.dll", "ReleaseMutex", release_mutex as usize),
        ("kernel32.dll", "WaitForSingleObject", wait_single as usize),
        ("kernel32.dll", "WaitForMultipleObjects", wait_multiple as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::init_for_test;

    #[test]
    fn wait_single_zero_timeout_on_unsignaled_event_times_out_immediately() {
        init_for_test();
        let handle = create_event(0, 0, std::ptr::null());
        let started = Instant::now();
        assert_eq!(wait_single(handle, 0), WAIT_TIMEOUT);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn set_then_wait_single_succeeds_on_manual_reset_event() {
        init_for_test();
        let handle = create_event(1, 0, std::ptr::null());
        set_event(handle);
        assert_eq!(wait_single(handle, 100), WAIT_OBJECT_0);
        assert_eq!(wait_single(handle, 0), WAIT_OBJECT_0, "manual-reset stays signaled");
    }

    #[test]
    fn auto_reset_event_clears_after_one_waiter() {
        init_for_test();
        let handle = create_event(0, 0, std::ptr::null());
        set_event(handle);
        assert_eq!(wait_single(handle, 100), WAIT_OBJECT_0);
        assert_eq!(wait_single(handle, 0), WAIT_TIMEOUT);
    }

    #[test]
    fn mutex_is_reentrant_on_the_owning_thread() {
        let mutex = MutexObject::new(true);
        assert!(mutex.try_acquire());
        mutex.release();
        mutex.release();
        assert!(mutex.try_acquire());
    }
}
