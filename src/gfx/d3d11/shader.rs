//! `ID3D11VertexShader` / `ID3D11PixelShader` (spec.md §4.6's shader table):
//! the raw DXBC blob, its parsed form, and a cached SPIR-V translation.

use std::sync::atomic::AtomicU32;

use crate::error::DxbcError;
use crate::gfx::dxbc::{self, cache, spirv, ParsedShader};

use super::{new_ref_count, Unknown};

pub struct Shader {
    ref_count: AtomicU32,
    pub dxbc: Vec<u8>,
    pub parsed: ParsedShader,
    pub spirv: Vec<u8>,
}

impl Shader {
    /// Parses `dxbc`, consults the on-disk SPIR-V cache, and translates on a
    /// miss (spec.md §4.6's shader-creation path).
    pub fn create(dxbc: Vec<u8>) -> Result<Self, DxbcError> {
        let parsed = dxbc::parse(&dxbc)?;
        let spirv_bytes = match cache::lookup(&dxbc) {
            Some(cached) => cached,
            None => {
                let words = spirv::translate(&parsed)?;
                let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
                let _ = cache::store(&dxbc, &bytes);
                bytes
            }
        };
        Ok(Shader { ref_count: new_ref_count(), dxbc, parsed, spirv: spirv_bytes })
    }
}

impl Unknown for Shader {
    fn ref_count(&self) -> &AtomicU32 {
        &self.ref_count
    }
}
