//! `GetTickCount[64]` / `QueryPerformanceCounter[Frequency]` /
//! `GetSystemTimeAsFileTime` (spec.md §4.3).

use std::sync::OnceLock;
use std::time::Instant;

/// FILETIME ticks (100ns units) between the Windows epoch (1601-01-01) and
/// the Unix epoch (1970-01-01).
const FILETIME_EPOCH_OFFSET: u64 = 116_444_736_000_000_000;

static START: OnceLock<Instant> = OnceLock::new();

fn start() -> Instant {
    *START.get_or_init(Instant::now)
}

/// `GetTickCount`. Wraps at `u32::MAX`, matching the real API's documented
/// ~49.7 day rollover.
pub extern "win64" fn get_tick_count() -> u32 {
    start().elapsed().as_millis() as u32
}

/// `GetTickCount64`.
pub extern "win64" fn get_tick_count_64() -> u64 {
    start().elapsed().as_millis() as u64
}

/// `QueryPerformanceFrequency`. This core reports nanosecond resolution.
pub extern "win64" fn query_performance_frequency(out_freq: *mut i64) -> i32 {
    unsafe { *out_freq = 1_000_000_000 };
    1
}

/// `QueryPerformanceCounter`.
pub extern "win64" fn query_performance_counter(out_count: *mut i64) -> i32 {
    unsafe { *out_count = start().elapsed().as_nanos() as i64 };
    1
}

/// `GetSystemTimeAsFileTime`. Converts the host wall clock to a Windows
/// FILETIME pair via [`chrono`], the way the rest of this layer reaches for
/// it instead of hand-rolling calendar math.
pub extern "win64" fn get_system_time_as_file_time(out_low: *mut u32, out_high: *mut u32) {
    let now = chrono::Utc::now();
    let unix_100ns = (now.timestamp() as u64).saturating_mul(10_000_000) + (now.timestamp_subsec_nanos() as u64) / 100;
    let filetime = unix_100ns + FILETIME_EPOCH_OFFSET;
    unsafe {
        *out_low = filetime as u32;
        *out_high = (filetime >> 32) as u32;
    }
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("kernel32.dll", "GetTickCount", get_tick_count as usize),
        ("kernel32.dll", "GetTickCount64", get_tick_count_64 as usize),
        ("kernel32.dll", "QueryPerformanceFrequency", query_performance_frequency as usize),
        ("kernel32.dll", "QueryPerformanceCounter", query_performance_counter as usize),
        ("kernel32.dll", "GetSystemTimeAsFileTime", get_system_time_as_file_time as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_count_is_monotonic_nondecreasing() {
        let a = get_tick_count_64();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = get_tick_count_64();
        assert!(b >= a);
    }

    #[test]
    fn performance_counter_advances_with_the_declared_frequency() {
        let mut freq = 0i64;
        query_performance_frequency(&mut freq);
        assert_eq!(freq, 1_000_000_000);

        let mut a = 0i64;
        let mut b = 0i64;
        query_performance_counter(&mut a);
        query_performance_counter(&mut b);
        assert!(b >= a);
    }

    #[test]
    fn file_time_is_after_the_epoch_offset() {
        let mut low = 0u32;
        let mut high = 0u32;
        get_system_time_as_file_time(&mut low, &mut high);
        let value = ((high as u64) << 32) | low as u64;
        assert!(value > FILETIME_EPOCH_OFFSET);
    }
}
