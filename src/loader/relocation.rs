//! Base relocation application (spec.md §4.5's "Base relocation" step).

use log::warn;

use super::headers::DataDirectory;

const TYPE_ABSOLUTE: u16 = 0;
const TYPE_HIGHLOW: u16 = 3;
const TYPE_DIR64: u16 = 10;

/// Applies every fixup in the base relocation directory, in place, over the
/// mapped image at `image`. `delta` is `actual_base - preferred_base`; a
/// zero delta or an empty directory is a documented no-op, not an error.
pub fn apply(image: &mut [u8], directory: DataDirectory, delta: i64) {
    if delta == 0 || directory.size == 0 {
        return;
    }

    let mut block_offset = directory.virtual_address as usize;
    let directory_end = block_offset + directory.size as usize;

    while block_offset < directory_end {
        let Some(header) = image.get(block_offset..block_offset + 8) else { break };
        let block_rva = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let block_size = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if block_size < 8 {
            break;
        }

        let entry_count = (block_size as usize - 8) / 2;
        for i in 0..entry_count {
            let entry_offset = block_offset + 8 + i * 2;
            let Some(entry_bytes) = image.get(entry_offset..entry_offset + 2) else { break };
            let entry = u16::from_le_bytes(entry_bytes.try_into().unwrap());
            let fixup_type = entry >> 12;
            let page_offset = entry & 0x0fff;
            let fixup_address = block_rva as usize + page_offset as usize;

            match fixup_type {
                TYPE_ABSOLUTE => {}
                TYPE_DIR64 => {
                    if let Some(slot) = image.get_mut(fixup_address..fixup_address + 8) {
                        let current = u64::from_le_bytes(slot.try_into().unwrap());
                        let fixed = current.wrapping_add_signed(delta);
                        slot.copy_from_slice(&fixed.to_le_bytes());
                    }
                }
                TYPE_HIGHLOW => {
                    if let Some(slot) = image.get_mut(fixup_address..fixup_address + 4) {
                        let current = u32::from_le_bytes(slot.try_into().unwrap());
                        let fixed = current.wrapping_add((delta & 0xffff_ffff) as u32);
                        slot.copy_from_slice(&fixed.to_le_bytes());
                    }
                }
                other => warn!("skipping unknown base relocation type {other} at rva {fixup_address:#x}"),
            }
        }

        block_offset += block_size as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(rva: u32, entries: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let size = 8 + entries.len() * 2;
        bytes.extend_from_slice(&rva.to_le_bytes());
        bytes.extend_from_slice(&(size as u32).to_le_bytes());
        for e in entries {
            bytes.extend_from_slice(&e.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn zero_delta_is_a_no_op() {
        let mut image = vec![0xAAu8; 64];
        let before = image.clone();
        let dir = DataDirectory { virtual_address: 0, size: 10 };
        apply(&mut image, dir, 0);
        assert_eq!(image, before);
    }

    #[test]
    fn zero_size_directory_is_a_no_op() {
        let mut image = vec![0xAAu8; 64];
        let before = image.clone();
        apply(&mut image, DataDirectory { virtual_address: 0, size: 0 }, 0x1000);
        assert_eq!(image, before);
    }

    #[test]
    fn dir64_entry_adds_delta_to_the_eight_byte_value() {
        let mut image = vec![0u8; 64];
        image[32..40].copy_from_slice(&100u64.to_le_bytes());
        let entry = (TYPE_DIR64 << 12) | 32;
        let reloc_block = block(0, &[entry]);
        let dir_offset = 40;
        image[dir_offset..dir_offset + reloc_block.len()].copy_from_slice(&reloc_block);
        let dir = DataDirectory { virtual_address: dir_offset as u32, size: reloc_block.len() as u32 };
        apply(&mut image, dir, 16);
        let fixed = u64::from_le_bytes(image[32..40].try_into().unwrap());
        assert_eq!(fixed, 116);
    }

    #[test]
    fn highlow_entry_adds_low_32_bits_of_delta() {
        let mut image = vec![0u8; 64];
        image[16..20].copy_from_slice(&200u32.to_le_bytes());
        let entry = (TYPE_HIGHLOW << 12) | 16;
        let reloc_block = block(0, &[entry]);
        let dir_offset = 32;
        image[dir_offset..dir_offset + reloc_block.len()].copy_from_slice(&reloc_block);
        let dir = DataDirectory { virtual_address: dir_offset as u32, size: reloc_block.len() as u32 };
        apply(&mut image, dir, 50);
        let fixed = u32::from_le_bytes(image[16..20].try_into().unwrap());
        assert_eq!(fixed, 250);
    }

    #[test]
    fn absolute_entry_is_ignored() {
        let mut image = vec![0u8; 64];
        image[16..20].copy_from_slice(&200u32.to_le_bytes());
        let entry = TYPE_ABSOLUTE << 12;
        let reloc_block = block(0, &[entry]);
        let dir_offset = 32;
        image[dir_offset..dir_offset + reloc_block.len()].copy_from_slice(&reloc_block);
        let before = image.clone();
        let dir = DataDirectory { virtual_address: dir_offset as u32, size: reloc_block.len() as u32 };
        apply(&mut image, dir, 50);
        assert_eq!(image, before);
    }
}
