//! The PE activator (LDR, spec.md §4.5): parses a PE32+ image, maps its
//! sections, relocates, links the IAT to host stubs, tightens final page
//! protections, and hands back the entry point for `main.rs` to jump to.

pub mod headers;
pub mod imports;
pub mod relocation;

use log::{info, warn};

use headers::{directory, parse_headers, ParsedHeaders, SectionFlags};
use crate::error::LoaderError;

const PAGE_SIZE: usize = 4096;

fn page_align_down(x: usize) -> usize {
    x & !(PAGE_SIZE - 1)
}

fn page_align_up(x: usize) -> usize {
    page_align_down(x + PAGE_SIZE - 1)
}

fn section_prot(flags: SectionFlags) -> i32 {
    let mut prot = 0;
    if flags.contains(SectionFlags::MEM_READ) {
        prot |= libc::PROT_READ;
    }
    if flags.contains(SectionFlags::MEM_WRITE) {
        prot |= libc::PROT_WRITE;
    }
    if flags.contains(SectionFlags::MEM_EXECUTE) {
        prot |= libc::PROT_EXEC;
    }
    // "defaulting to read-only if none are set" (spec.md §4.5).
    if prot == 0 {
        libc::PROT_READ
    } else {
        prot
    }
}

/// Everything the activator knows about the image once it has been mapped
/// and is ready for the guest entry point to run (spec.md §3's "PE image
/// state").
pub struct ActivatedImage {
    pub base: *mut u8,
    pub size: usize,
    pub entry_rva: u32,
    pub headers: ParsedHeaders,
}

impl ActivatedImage {
    /// Casts `base + entry_rva` to the zero-argument foreign-ABI entry
    /// point and transfers control. A normal return is process exit 0
    /// (spec.md §4.5) — the guest is expected to call `ExitProcess` and
    /// never actually return here.
    ///
    /// # Safety
    /// The caller must have fully activated the image (relocated, imports
    /// resolved, final protections applied) before calling this.
    pub unsafe fn run(&self) -> ! {
        let entry: extern "win64" fn() = std::mem::transmute(self.base.add(self.entry_rva as usize));
        entry();
        std::process::exit(0);
    }

    /// A raw byte view of the whole mapped image, for diagnostics or tests
    /// that want to read back what landed where.
    ///
    /// # Safety
    /// Valid only while the image remains mapped and no guest thread is
    /// concurrently mutating the region being read.
    pub unsafe fn bytes(&self) -> &[u8] {
        std::slice::from_raw_parts(self.base, self.size)
    }
}

/// The catch-all stub every unresolved or ordinal import is wired to
/// (spec.md §4.5, §7): the signal that the guest touched an unimplemented
/// Windows API. Printing and exiting is the only sane behavior for a
/// function pointer whose real argument count and types are unknown.
pub extern "win64" fn catch_all_stub() -> ! {
    eprintln!("citcrun: guest called an unimplemented Windows API");
    std::process::exit(1);
}

/// Reserves, maps, relocates, resolves imports for, and protects a PE32+
/// image, returning its entry point ready to run. `stubs` is the
/// concatenation of every surrogate layer's `(dll, function, address)`
/// table (spec.md §4.5's "searching the concatenation of per-DLL stub
/// tables").
pub fn activate(binary: &[u8], stubs: &imports::StubTable) -> Result<ActivatedImage, LoaderError> {
    let headers = parse_headers(binary)?;
    let size_of_image = headers.optional.size_of_image as usize;

    // Reserve the whole image, honoring no preferred base — relocations
    // always apply (spec.md §4.5).
    let base = unsafe {
        libc::mmap(std::ptr::null_mut(), size_of_image, libc::PROT_NONE, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0)
    };
    if base == libc::MAP_FAILED {
        return Err(LoaderError::Reservation(std::io::Error::last_os_error()));
    }
    let base = base as *mut u8;

    // The reservation already backs every page with anonymous zero memory;
    // `mprotect` to RW is equivalent to spec.md's "overwrite with a
    // writable-readable mapping" without a second MAP_FIXED call.
    let commit_rw = |start: usize, len: usize| -> Result<(), LoaderError> {
        let rc = unsafe { libc::mprotect(base.add(start) as *mut libc::c_void, len, libc::PROT_READ | libc::PROT_WRITE) };
        if rc != 0 {
            return Err(LoaderError::Mapping(std::io::Error::last_os_error()));
        }
        Ok(())
    };

    let headers_len = page_align_up(headers.optional.size_of_headers as usize);
    commit_rw(0, headers_len)?;
    let header_bytes = binary.get(0..headers.optional.size_of_headers as usize).ok_or(LoaderError::Truncated("header bytes"))?;
    unsafe {
        std::ptr::copy_nonoverlapping(header_bytes.as_ptr(), base, header_bytes.len());
    }

    for section in &headers.sections {
        if section.size_of_raw_data == 0 {
            continue;
        }
        let start = page_align_down(section.virtual_address as usize);
        let end = page_align_up(section.virtual_address as usize + section.size_of_raw_data as usize);
        commit_rw(start, end - start)?;

        let file_start = section.pointer_to_raw_data as usize;
        let file_end = file_start + section.size_of_raw_data as usize;
        let raw = binary.get(file_start..file_end).ok_or(LoaderError::Truncated("section raw data"))?;
        unsafe {
            std::ptr::copy_nonoverlapping(raw.as_ptr(), base.add(section.virtual_address as usize), raw.len());
        }
    }

    let image = unsafe { std::slice::from_raw_parts_mut(base, size_of_image) };

    let preferred_base = headers.optional.image_base;
    let delta = (base as u64).wrapping_sub(preferred_base) as i64;
    let reloc_dir = headers.optional.data_directory(directory::BASE_RELOCATION_TABLE);
    relocation::apply(image, reloc_dir, delta);

    let import_dir = headers.optional.data_directory(directory::IMPORT_TABLE);
    imports::resolve(image, import_dir, stubs, catch_all_stub as usize)?;

    for section in &headers.sections {
        let extent = section.virtual_size.max(section.size_of_raw_data) as usize;
        if extent == 0 {
            continue;
        }
        let start = page_align_down(section.virtual_address as usize);
        let end = page_align_up(section.virtual_address as usize + extent);
        let prot = section_prot(section.flags());
        let rc = unsafe { libc::mprotect(base.add(start) as *mut libc::c_void, end - start, prot) };
        if rc != 0 {
            return Err(LoaderError::Protection(std::io::Error::last_os_error()));
        }
    }

    if reloc_dir.size == 0 && delta != 0 {
        warn!("image has no base relocation directory; assuming position-independent code");
    }

    let entry_rva = headers.optional.address_of_entry_point;
    info!("activated image at base {:#x}, entry rva {:#x}", base as u64, entry_rva);

    Ok(ActivatedImage { base, size: size_of_image, entry_rva, headers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::headers::tests::build_minimal_pe;
    use super::headers::SectionHeader;

    /// A one-section image whose `.text` section contains a single `ret`
    /// (0xC3) at its very start, with the entry point pointing at it
    /// (spec.md §8 scenario 1: "Null-import hello").
    fn build_ret_image() -> Vec<u8> {
        let section_va = 0x1000u32;
        let mut section = SectionHeader { name: *b".text\0\0\0", virtual_size: 0x1000, virtual_address: section_va, size_of_raw_data: 0x200, ..Default::default() };
        section.characteristics = (SectionFlags::MEM_READ | SectionFlags::MEM_EXECUTE).bits();

        let mut bytes = build_minimal_pe(0, &[section]);
        // build_minimal_pe doesn't set size_of_image/size_of_headers/entry
        // point/pointer_to_raw_data, so patch them by byte offset directly:
        // optional header starts right after the 20-byte COFF header.
        let optional_start = 0x40 + 4 + 20;
        bytes[optional_start + 16..optional_start + 20].copy_from_slice(&section_va.to_le_bytes()); // entry point = start of .text
        let size_of_headers = page_align_up(optional_start + 112) as u32;
        bytes[optional_start + 60..optional_start + 64].copy_from_slice(&size_of_headers.to_le_bytes());
        let size_of_image = page_align_up(section_va as usize + 0x1000) as u32;
        bytes[optional_start + 56..optional_start + 60].copy_from_slice(&size_of_image.to_le_bytes());

        // Patch the just-appended section header's pointer_to_raw_data to
        // point at a fresh `ret`-filled page we tack onto the file tail.
        let section_header_offset = bytes.len() - std::mem::size_of::<SectionHeader>();
        let raw_data_file_offset = page_align_up(bytes.len());
        bytes.resize(raw_data_file_offset, 0);
        bytes.extend_from_slice(&[0xC3u8; 0x200]);
        bytes[section_header_offset + 20..section_header_offset + 24].copy_from_slice(&(raw_data_file_offset as u32).to_le_bytes());

        bytes
    }

    #[test]
    fn activates_a_minimal_image_and_maps_the_entry_byte() {
        let bytes = build_ret_image();
        let image = activate(&bytes, &[]).unwrap();
        let mapped = unsafe { image.bytes() };
        assert_eq!(mapped[image.entry_rva as usize], 0xC3);
    }

    #[test]
    fn running_a_ret_only_entry_point_returns_control() {
        let bytes = build_ret_image();
        let image = activate(&bytes, &[]).unwrap();
        let entry: extern "win64" fn() = unsafe { std::mem::transmute(image.base.add(image.entry_rva as usize)) };
        entry();
    }

    #[test]
    fn header_validation_failure_propagates_before_any_mapping() {
        let mut bytes = build_minimal_pe(0, &[]);
        bytes[0] = 0;
        assert!(matches!(activate(&bytes, &[]), Err(LoaderError::BadDosSignature)));
    }
}
