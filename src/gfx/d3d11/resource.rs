//! `ID3D11Buffer` / `ID3D11Texture2D` records (spec.md §4.6's resource table).

use std::sync::atomic::AtomicU32;

use super::{new_ref_count, Unknown};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Texture2D,
}

bitflags::bitflags! {
    /// `D3D11_BIND_FLAG` subset this core acts on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER   = 0x1;
        const INDEX_BUFFER    = 0x2;
        const CONSTANT_BUFFER = 0x4;
        const SHADER_RESOURCE = 0x8;
        const RENDER_TARGET   = 0x20;
        const DEPTH_STENCIL   = 0x40;
    }
}

/// A CPU-backed buffer or 2D texture. Texel/byte data is stored as raw
/// bytes; the rasterizer and SRV sampling paths interpret it per the bound
/// view's described format (spec.md §4.6's texture address-mode notes).
pub struct Resource {
    ref_count: AtomicU32,
    pub kind: ResourceKind,
    pub bind_flags: BindFlags,
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
    pub data: Vec<u8>,
    /// True only for the swap chain's back-buffer, which the resource table
    /// references non-owning (spec.md §4.6's `GetBuffer` note) — `release`
    /// on it never frees the swap chain's storage.
    pub non_owning: bool,
}

impl Resource {
    pub fn new_buffer(size: u32, bind_flags: BindFlags, initial: Option<&[u8]>) -> Self {
        let mut data = vec![0u8; size as usize];
        if let Some(initial) = initial {
            let n = initial.len().min(data.len());
            data[..n].copy_from_slice(&initial[..n]);
        }
        Resource {
            ref_count: new_ref_count(),
            kind: ResourceKind::Buffer,
            bind_flags,
            width: size,
            height: 1,
            row_pitch: size,
            data,
            non_owning: false,
        }
    }

    pub fn new_texture2d(width: u32, height: u32, bytes_per_pixel: u32, bind_flags: BindFlags, initial: Option<&[u8]>) -> Self {
        let row_pitch = width * bytes_per_pixel;
        let mut data = vec![0u8; (row_pitch * height) as usize];
        if let Some(initial) = initial {
            let n = initial.len().min(data.len());
            data[..n].copy_from_slice(&initial[..n]);
        }
        Resource { ref_count: new_ref_count(), kind: ResourceKind::Texture2D, bind_flags, width, height, row_pitch, data, non_owning: false }
    }
}

impl Unknown for Resource {
    fn ref_count(&self) -> &AtomicU32 {
        &self.ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_initial_data_is_copied_and_clamped_to_capacity() {
        let resource = Resource::new_buffer(4, BindFlags::VERTEX_BUFFER, Some(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(resource.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn texture_row_pitch_is_width_times_bytes_per_pixel() {
        let resource = Resource::new_texture2d(4, 2, 4, BindFlags::SHADER_RESOURCE, None);
        assert_eq!(resource.row_pitch, 16);
        assert_eq!(resource.data.len(), 32);
    }
}
