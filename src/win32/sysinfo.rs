//! `GetSystemInfo` / `GlobalMemoryStatusEx` / `GetVersionExA` / computer name
//! (spec.md §4.3). This core reports a fixed, plausible Windows 10 identity
//! regardless of the actual host — enough for guests that branch on major
//! version without probing deeper.

use std::ffi::CString;

fn write_cstring(value: &str, buf: *mut u8, size: u32) -> u32 {
    let needed = value.len() as u32 + 1;
    if needed > size {
        return needed;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(value.as_ptr(), buf, value.len());
        *buf.add(value.len()) = 0;
    }
    value.len() as u32
}

/// The `SYSTEM_INFO` fields this core fabricates a value for.
#[repr(C)]
pub struct SystemInfo {
    pub processor_architecture: u16,
    pub page_size: u32,
    pub minimum_application_address: u64,
    pub maximum_application_address: u64,
    pub active_processor_mask: u64,
    pub number_of_processors: u32,
}

const PROCESSOR_ARCHITECTURE_AMD64: u16 = 9;

/// `GetSystemInfo`.
pub extern "win64" fn get_system_info(out: *mut SystemInfo) {
    let cpus = std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1);
    unsafe {
        *out = SystemInfo {
            processor_architecture: PROCESSOR_ARCHITECTURE_AMD64,
            page_size: 4096,
            minimum_application_address: 0x0001_0000,
            maximum_application_address: 0x7FFF_FFFF_FFFF,
            active_processor_mask: (1u64 << cpus.min(64)) - 1,
            number_of_processors: cpus,
        };
    }
}

/// The `MEMORYSTATUSEX` fields this core reports.
#[repr(C)]
pub struct MemoryStatusEx {
    pub length: u32,
    pub memory_load: u32,
    pub total_phys: u64,
    pub avail_phys: u64,
    pub total_page_file: u64,
    pub avail_page_file: u64,
    pub total_virtual: u64,
    pub avail_virtual: u64,
}

fn host_sysinfo() -> libc::sysinfo {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    unsafe { libc::sysinfo(&mut info) };
    info
}

/// `GlobalMemoryStatusEx`.
pub extern "win64" fn global_memory_status_ex(out: *mut MemoryStatusEx) -> i32 {
    let info = host_sysinfo();
    let unit = info.mem_unit.max(1) as u64;
    let total = info.totalram as u64 * unit;
    let free = info.freeram as u64 * unit;
    let load = if total == 0 { 0 } else { (100 * (total - free) / total) as u32 };
    unsafe {
        *out = MemoryStatusEx {
            length: std::mem::size_of::<MemoryStatusEx>() as u32,
            memory_load: load,
            total_phys: total,
            avail_phys: free,
            total_page_file: total,
            avail_page_file: free,
            total_virtual: 0x7FFF_FFFF_FFFF,
            avail_virtual: 0x7FFF_FFFF_FFFF,
        };
    }
    1
}

/// `GetVersionExA`'s `OSVERSIONINFOA` payload. Reports Windows 10 (10.0.19041).
#[repr(C)]
pub struct VersionInfo {
    pub dw_os_version_info_size: u32,
    pub dw_major_version: u32,
    pub dw_minor_version: u32,
    pub dw_build_number: u32,
    pub dw_platform_id: u32,
}

const VER_PLATFORM_WIN32_NT: u32 = 2;

pub extern "win64" fn get_version_ex(out: *mut VersionInfo) -> i32 {
    unsafe {
        *out = VersionInfo {
            dw_os_version_info_size: std::mem::size_of::<VersionInfo>() as u32,
            dw_major_version: 10,
            dw_minor_version: 0,
            dw_build_number: 19041,
            dw_platform_id: VER_PLATFORM_WIN32_NT,
        };
    }
    1
}

/// `GetComputerNameA`, backed by the host's actual hostname.
pub extern "win64" fn get_computer_name(buf: *mut u8, size: *mut u32) -> i32 {
    let mut hostbuf = [0u8; 256];
    let rc = unsafe { libc::gethostname(hostbuf.as_mut_ptr() as *mut libc::c_char, hostbuf.len()) };
    let name = if rc == 0 {
        CString::new(&hostbuf[..hostbuf.iter().position(|&b| b == 0).unwrap_or(0)])
            .map(|c| c.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "CITCRUN-HOST".to_string())
    } else {
        "CITCRUN-HOST".to_string()
    };
    let available = unsafe { *size };
    let written = write_cstring(&name, buf, available);
    unsafe { *size = name.len() as u32 };
    (written <= available) as i32
}

/// `GetWindowsDirectoryA` / `GetSystemDirectoryA` both report this fixed path
/// (spec.md §4.3's note that no real `C:\Windows` tree exists on the host).
pub extern "win64" fn get_windows_directory(buf: *mut u8, size: u32) -> u32 {
    write_cstring("C:\\Windows", buf, size)
}

pub extern "win64" fn get_system_directory(buf: *mut u8, size: u32) -> u32 {
    write_cstring("C:\\Windows\\System32", buf, size)
}

pub fn stubs() -> Vec<(&'static str, &'static str, usize)> {
    vec![
        ("kernel32.dll", "GetSystemInfo", get_system_info as usize),
        ("kernel32.dll", "GlobalMemoryStatusEx", global_memory_status_ex as usize),
        ("kernel32.dll", "GetVersionExA", get_version_ex as usize),
        ("kernel32.dll", "GetComputerNameA", get_computer_name as usize),
        ("kernel32.dll", "GetWindowsDirectoryA", get_windows_directory as usize),
        ("kernel32.dll", "GetSystemDirectoryA", get_system_directory as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_info_reports_amd64_and_at_least_one_processor() {
        let mut info = unsafe { std::mem::zeroed::<SystemInfo>() };
        get_system_info(&mut info);
        assert_eq!(info.processor_architecture, PROCESSOR_ARCHITECTURE_AMD64);
        assert!(info.number_of_processors >= 1);
        assert_eq!(info.page_size, 4096);
    }

    #[test]
    fn memory_status_reports_nonzero_physical_memory() {
        let mut status = unsafe { std::mem::zeroed::<MemoryStatusEx>() };
        assert_eq!(global_memory_status_ex(&mut status), 1);
        assert!(status.total_phys > 0);
        assert!(status.memory_load <= 100);
    }

    #[test]
    fn version_reports_windows_10() {
        let mut version = unsafe { std::mem::zeroed::<VersionInfo>() };
        get_version_ex(&mut version);
        assert_eq!(version.dw_major_version, 10);
        assert_eq!(version.dw_platform_id, VER_PLATFORM_WIN32_NT);
    }

    #[test]
    fn windows_directory_reports_a_fixed_path() {
        let mut buf = [0u8; 64];
        let n = get_windows_directory(buf.as_mut_ptr(), buf.len() as u32);
        assert_eq!(&buf[..n as usize], b"C:\\Windows");
    }
}
