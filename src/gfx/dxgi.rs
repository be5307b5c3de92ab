//! The DXGI swap chain surrogate (spec.md §4.6): a CPU back-buffer plus
//! `Present`, decoupled from any real windowing system behind a small
//! `PresentSurface` trait a compositor collaborator would implement.

/// What `Present` hands off to: a place pixels land. The Non-goals in
/// spec.md exclude building the compositor itself; this core only needs the
/// contract so the rasterizer and `Present` path are testable standalone.
pub trait PresentSurface {
    fn commit(&mut self, pixels: &[u8], width: u32, height: u32);
    fn size(&self) -> (u32, u32);
}

/// An in-memory stand-in implementing [`PresentSurface`] — used by tests and
/// by any caller that has no real compositor attached.
pub struct MemorySurface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32) -> Self {
        MemorySurface { width, height, pixels: vec![0u8; (width * height * 4) as usize] }
    }
}

impl PresentSurface for MemorySurface {
    fn commit(&mut self, pixels: &[u8], width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = pixels.to_vec();
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Owns the CPU back-buffer a swap chain presents from (spec.md §4.6).
pub struct SwapChain {
    pub width: u32,
    pub height: u32,
    pub back_buffer: Vec<u8>,
}

impl SwapChain {
    /// Sizes the back-buffer from the description, falling back to the
    /// window size published by the compositor when either dimension is
    /// zero.
    pub fn new(mut width: u32, mut height: u32, surface: &dyn PresentSurface) -> Self {
        if width == 0 || height == 0 {
            let (sw, sh) = surface.size();
            if width == 0 {
                width = sw;
            }
            if height == 0 {
                height = sh;
            }
        }
        SwapChain { width, height, back_buffer: vec![0u8; (width * height * 4) as usize] }
    }

    /// `Present(sync, flags)`. Copies `min(sc_w, w_w) x min(sc_h, w_h)` rows
    /// into the surface's pixel buffer and commits it (spec.md §4.6).
    pub fn present(&self, surface: &mut dyn PresentSurface) {
        let (surface_w, surface_h) = surface.size();
        let copy_w = self.width.min(surface_w);
        let copy_h = self.height.min(surface_h);

        let mut out = vec![0u8; (surface_w * surface_h * 4) as usize];
        for y in 0..copy_h {
            let src_row = &self.back_buffer[(y * self.width * 4) as usize..((y * self.width + copy_w) * 4) as usize];
            let dst_start = (y * surface_w * 4) as usize;
            out[dst_start..dst_start + src_row.len()].copy_from_slice(src_row);
        }
        surface.commit(&out, surface_w, surface_h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_falls_back_to_the_surface_size() {
        let surface = MemorySurface::new(640, 480);
        let swap_chain = SwapChain::new(0, 0, &surface);
        assert_eq!((swap_chain.width, swap_chain.height), (640, 480));
    }

    #[test]
    fn present_copies_the_overlapping_region_into_the_surface() {
        let mut surface = MemorySurface::new(4, 4);
        let mut swap_chain = SwapChain::new(4, 4, &surface);
        for px in swap_chain.back_buffer.chunks_mut(4) {
            px.copy_from_slice(&[255, 0, 0, 255]);
        }
        swap_chain.present(&mut surface);
        assert_eq!(&surface.pixels[0..4], &[255, 0, 0, 255]);
    }
}
