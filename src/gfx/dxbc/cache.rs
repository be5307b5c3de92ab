//! The on-disk SPIR-V shader cache (spec.md §4.6): keyed by the FNV-1a-64 of
//! the exact DXBC byte blob, so any byte change invalidates automatically.

use std::io::Write;
use std::path::PathBuf;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

const MAX_CACHED_PAYLOAD: usize = 1024 * 1024;
const SPIRV_MAGIC_BYTES: [u8; 4] = 0x0723_0203u32.to_le_bytes();

pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn cache_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| std::env::temp_dir().to_string_lossy().into_owned());
    PathBuf::from(home).join(".citc").join("shader_cache")
}

fn cache_path(key: u64) -> PathBuf {
    cache_dir().join(format!("{key:016x}.spv"))
}

/// Looks up a previously-translated module by the DXBC blob's FNV-1a-64 key.
/// Rejects oversized entries and anything missing the SPIR-V magic, treating
/// either as a cache miss rather than an error.
pub fn lookup(dxbc: &[u8]) -> Option<Vec<u8>> {
    let path = cache_path(fnv1a64(dxbc));
    let bytes = std::fs::read(&path).ok()?;
    if bytes.len() > MAX_CACHED_PAYLOAD {
        return None;
    }
    if bytes.len() < 4 || bytes[..4] != SPIRV_MAGIC_BYTES {
        return None;
    }
    Some(bytes)
}

/// Stores a translated module, keyed off the exact DXBC bytes it came from.
/// Writes to a sibling temp file and renames over the destination so a
/// concurrent reader never observes a partial write.
pub fn store(dxbc: &[u8], spirv_bytes: &[u8]) -> std::io::Result<()> {
    let dir = cache_dir();
    std::fs::create_dir_all(&dir)?;
    let path = cache_path(fnv1a64(dxbc));
    let tmp_path = path.with_extension("spv.tmp");
    let mut tmp = std::fs::File::create(&tmp_path)?;
    tmp.write_all(spirv_bytes)?;
    tmp.sync_all()?;
    std::fs::rename(&tmp_path, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a64_matches_the_known_test_vector_for_the_empty_string() {
        assert_eq!(fnv1a64(b""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn any_byte_change_produces_a_different_key() {
        assert_ne!(fnv1a64(b"shader-a"), fnv1a64(b"shader-b"));
    }

    #[test]
    fn store_then_lookup_round_trips_through_a_temp_cache_dir() {
        let dxbc = b"pretend-dxbc-bytes";
        let mut spirv_bytes = SPIRV_MAGIC_BYTES.to_vec();
        spirv_bytes.extend_from_slice(&[1, 2, 3, 4]);

        let temp_home = std::env::temp_dir().join(format!("citcrun-cache-test-{}", std::process::id()));
        unsafe { std::env::set_var("HOME", &temp_home) };

        store(dxbc, &spirv_bytes).unwrap();
        let loaded = lookup(dxbc).unwrap();
        assert_eq!(loaded, spirv_bytes);

        std::fs::remove_dir_all(&temp_home).ok();
    }

    #[test]
    fn payload_missing_the_spirv_magic_is_treated_as_a_miss() {
        let temp_home = std::env::temp_dir().join(format!("citcrun-cache-test-badmagic-{}", std::process::id()));
        unsafe { std::env::set_var("HOME", &temp_home) };
        let dxbc = b"other-dxbc-bytes";
        std::fs::create_dir_all(cache_dir()).unwrap();
        std::fs::write(cache_path(fnv1a64(dxbc)), b"not-spirv").unwrap();
        assert!(lookup(dxbc).is_none());
        std::fs::remove_dir_all(&temp_home).ok();
    }
}
