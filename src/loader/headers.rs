//! DOS/COFF/optional-header + section-table parsing (spec.md §4.5's
//! "Header parse" step), kept in the teacher's `Pod`/`try_from_bytes` idiom
//! but narrowed to exactly what this loader accepts: AMD64, PE32+.

use bytemuck::checked::try_from_bytes;
use bytemuck::{Pod, Zeroable};
use bitflags::bitflags;

use crate::error::LoaderError;

const DOS_SIGNATURE: u16 = 0x5a4d; // "MZ"
const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
const IMAGE_DOS_PE_OFFSET_FIELD: usize = 0x3c;
const MACHINE_AMD64: u16 = 0x8664;
const MAGIC_PE32_PLUS: u16 = 0x20b;

/// A bounds-checked cursor over a file's bytes. Every read advances past the
/// field it returns or fails with [`LoaderError::Truncated`] naming the field
/// — in the same spirit as [`crate::gfx::dxbc::ChunkCursor`].
pub struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, offset: 0 }
    }

    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn read_bytes(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], LoaderError> {
        let slice = self.bytes.get(self.offset..self.offset + len).ok_or(LoaderError::Truncated(field))?;
        self.offset += len;
        Ok(slice)
    }

    pub fn read_pod<T: Pod>(&mut self, field: &'static str) -> Result<T, LoaderError> {
        let slice = self.read_bytes(core::mem::size_of::<T>(), field)?;
        Ok(*try_from_bytes::<T>(slice).map_err(|_| LoaderError::Truncated(field))?)
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, LoaderError> {
        Ok(u16::from_le_bytes(self.read_bytes(2, field)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, LoaderError> {
        Ok(u32::from_le_bytes(self.read_bytes(4, field)?.try_into().unwrap()))
    }
}

/// The fields of the 64-byte DOS header this loader actually consults.
#[derive(Copy, Clone, Debug)]
pub struct DosHeader {
    pub pe_header_offset: u32,
}

/// COFF file header, narrowed to the one machine type spec.md supports.
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug)]
#[repr(C)]
pub struct CoffFileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

/// A data directory: an RVA and a size, as in the teacher's `optional.rs`.
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug)]
#[repr(C)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

/// Which data-directory slot each index names (spec.md §4.5 only reads
/// `import_table` and `base_relocation_table`, but the full 16-entry layout
/// must still be read off the wire so later fields stay aligned).
pub mod directory {
    pub const EXPORT_TABLE: usize = 0;
    pub const IMPORT_TABLE: usize = 1;
    pub const BASE_RELOCATION_TABLE: usize = 5;
    pub const COUNT: usize = 16;
}

/// The PE32+ optional header, narrowed to the fields the loader reads.
/// `data_directories` is read separately since its length is driven by
/// `number_of_rva_and_sizes`, not a fixed-size array.
#[derive(Copy, Clone, Debug)]
pub struct OptionalHeader64 {
    pub magic: u16,
    pub address_of_entry_point: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub data_directories: Vec<DataDirectory>,
}

impl OptionalHeader64 {
    pub fn data_directory(&self, index: usize) -> DataDirectory {
        self.data_directories.get(index).copied().unwrap_or_default()
    }
}

bitflags! {
    /// The three protection-relevant bits of a section's characteristics
    /// (spec.md §4.5's "Final protection" step reads only these).
    #[derive(Copy, Clone, Debug)]
    pub struct SectionFlags: u32 {
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}

/// One row of the section table.
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug)]
#[repr(C)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.characteristics)
    }

    /// Name as a display string, dropping the null padding. Long names that
    /// spill into a string table (`/123`) are not supported — spec.md's
    /// loader never needs section names for anything but diagnostics.
    pub fn name_str(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

/// Everything the "Header parse" step of spec.md §4.5 produces, ready for
/// `loader::mod`'s mapping stage.
pub struct ParsedHeaders {
    pub dos: DosHeader,
    pub coff: CoffFileHeader,
    pub optional: OptionalHeader64,
    pub sections: Vec<SectionHeader>,
}

/// Runs the full header-parse step: DOS header, PE signature, COFF header
/// (AMD64 only), 64-bit optional header (PE32+ only), section table.
pub fn parse_headers(binary: &[u8]) -> Result<ParsedHeaders, LoaderError> {
    if binary.len() < IMAGE_DOS_PE_OFFSET_FIELD + 4 {
        return Err(LoaderError::Truncated("dos header"));
    }
    let mut dos_cursor = Cursor::new(binary);
    let dos_signature = dos_cursor.read_u16("dos signature")?;
    if dos_signature != DOS_SIGNATURE {
        return Err(LoaderError::BadDosSignature);
    }
    dos_cursor.seek(IMAGE_DOS_PE_OFFSET_FIELD);
    let pe_header_offset = dos_cursor.read_u32("e_lfanew")?;
    let dos = DosHeader { pe_header_offset };

    let mut cursor = Cursor::new(binary);
    cursor.seek(pe_header_offset as usize);
    let signature = cursor.read_bytes(4, "PE signature")?;
    if signature != PE_SIGNATURE {
        return Err(LoaderError::BadPeSignature);
    }

    let coff: CoffFileHeader = cursor.read_pod("COFF file header")?;
    if coff.machine != MACHINE_AMD64 {
        return Err(LoaderError::UnsupportedMachine);
    }

    let optional_header_start = cursor.position();
    let magic = cursor.read_u16("optional header magic")?;
    if magic != MAGIC_PE32_PLUS {
        return Err(LoaderError::UnsupportedOptionalHeader);
    }
    cursor.seek(optional_header_start + 16);
    let address_of_entry_point = cursor.read_u32("address of entry point")?;
    cursor.seek(optional_header_start + 24);
    let image_base = u64::from_le_bytes(cursor.read_bytes(8, "image base")?.try_into().unwrap());
    let section_alignment = cursor.read_u32("section alignment")?;
    let file_alignment = cursor.read_u32("file alignment")?;
    cursor.seek(optional_header_start + 56);
    let size_of_image = cursor.read_u32("size of image")?;
    let size_of_headers = cursor.read_u32("size of headers")?;
    cursor.seek(optional_header_start + 108);
    let number_of_rva_and_sizes = cursor.read_u32("number of rva and sizes")?;

    cursor.seek(optional_header_start + 112);
    let directory_count = (number_of_rva_and_sizes as usize).min(directory::COUNT);
    let mut data_directories = Vec::with_capacity(directory_count);
    for _ in 0..directory_count {
        data_directories.push(cursor.read_pod::<DataDirectory>("data directory")?);
    }

    let optional = OptionalHeader64 { magic, address_of_entry_point, image_base, section_alignment, file_alignment, size_of_image, size_of_headers, data_directories };

    cursor.seek(optional_header_start + coff.size_of_optional_header as usize);
    let mut sections = Vec::with_capacity(coff.number_of_sections as usize);
    for _ in 0..coff.number_of_sections {
        sections.push(cursor.read_pod::<SectionHeader>("section header")?);
    }

    Ok(ParsedHeaders { dos, coff, optional, sections })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a minimal but structurally valid PE32+ image: DOS header with
    /// `e_lfanew` pointing straight at the PE signature, a COFF header
    /// declaring AMD64 and `n` sections, a PE32+ optional header with
    /// `data_directories_count` directories, and `n` zeroed section headers.
    pub fn build_minimal_pe(data_directories_count: u32, sections: &[SectionHeader]) -> Vec<u8> {
        let mut bytes = vec![0u8; 0x40];
        bytes[0..2].copy_from_slice(&DOS_SIGNATURE.to_le_bytes());
        let pe_offset = 0x40u32;
        bytes[IMAGE_DOS_PE_OFFSET_FIELD..IMAGE_DOS_PE_OFFSET_FIELD + 4].copy_from_slice(&pe_offset.to_le_bytes());

        bytes.extend_from_slice(&PE_SIGNATURE);

        let coff = CoffFileHeader {
            machine: MACHINE_AMD64,
            number_of_sections: sections.len() as u16,
            time_date_stamp: 0,
            pointer_to_symbol_table: 0,
            number_of_symbols: 0,
            size_of_optional_header: (112 + data_directories_count * 8) as u16,
            characteristics: 0,
        };
        bytes.extend_from_slice(bytemuck::bytes_of(&coff));

        let optional_start = bytes.len();
        bytes.extend_from_slice(&[0u8; 112]);
        bytes[optional_start..optional_start + 2].copy_from_slice(&MAGIC_PE32_PLUS.to_le_bytes());
        bytes[optional_start + 108..optional_start + 112].copy_from_slice(&data_directories_count.to_le_bytes());
        for _ in 0..data_directories_count {
            bytes.extend_from_slice(bytemuck::bytes_of(&DataDirectory::default()));
        }

        for section in sections {
            bytes.extend_from_slice(bytemuck::bytes_of(section));
        }

        bytes
    }

    #[test]
    fn rejects_a_missing_mz_signature() {
        let mut bytes = build_minimal_pe(0, &[]);
        bytes[0] = 0;
        assert!(matches!(parse_headers(&bytes), Err(LoaderError::BadDosSignature)));
    }

    #[test]
    fn rejects_a_missing_pe_signature() {
        let mut bytes = build_minimal_pe(0, &[]);
        bytes[0x40] = b'X';
        assert!(matches!(parse_headers(&bytes), Err(LoaderError::BadPeSignature)));
    }

    #[test]
    fn rejects_a_non_amd64_machine() {
        let mut bytes = build_minimal_pe(0, &[]);
        bytes[0x44..0x46].copy_from_slice(&0x014cu16.to_le_bytes());
        assert!(matches!(parse_headers(&bytes), Err(LoaderError::UnsupportedMachine)));
    }

    #[test]
    fn rejects_a_non_pe32_plus_magic() {
        let mut bytes = build_minimal_pe(0, &[]);
        let optional_start = 0x40 + 4 + 20;
        bytes[optional_start..optional_start + 2].copy_from_slice(&0x10bu16.to_le_bytes());
        assert!(matches!(parse_headers(&bytes), Err(LoaderError::UnsupportedOptionalHeader)));
    }

    #[test]
    fn parses_machine_entry_point_and_section_count() {
        let mut section = SectionHeader::default();
        section.name[..5].copy_from_slice(b".text");
        section.characteristics = (SectionFlags::MEM_READ | SectionFlags::MEM_EXECUTE).bits();
        let bytes = build_minimal_pe(2, &[section]);
        let parsed = parse_headers(&bytes).unwrap();
        assert_eq!(parsed.coff.machine, MACHINE_AMD64);
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].name_str(), ".text");
        assert_eq!(parsed.optional.data_directories.len(), 2);
    }

    #[test]
    fn truncated_section_table_reports_the_field_name() {
        let mut bytes = build_minimal_pe(0, &[SectionHeader::default()]);
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(parse_headers(&bytes), Err(LoaderError::Truncated("section header"))));
    }
}
