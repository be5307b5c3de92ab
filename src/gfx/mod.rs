//! The software Direct3D 11 graphics core (spec.md §4.6): fixed-capacity
//! object tables behind COM-style vtables, a DXBC/SM4 shader pipeline, and a
//! CPU triangle rasterizer. Everything here runs against a single immediate
//! context — spec.md §5 explicitly does not model concurrent draws.

pub mod abi;
pub mod d3d11;
pub mod dxbc;
pub mod dxgi;
pub mod raster;

use d3d11::resource::Resource;
use d3d11::sampler::Sampler;
use d3d11::shader::Shader;
use d3d11::state::State;
use d3d11::view::View;
use dxgi::SwapChain;

pub use abi::stub_table;

/// A fixed-capacity slot table with `active` flags, matching spec.md §4.6's
/// object-table shape. `BASE` is the fixed per-kind offset folded into the
/// handle value so that an index round-trips back to the right table.
pub struct ObjectTable<T> {
    slots: Vec<Option<T>>,
}

impl<T> ObjectTable<T> {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        ObjectTable { slots }
    }

    /// Installs `value` in the first free slot, returning its table index.
    pub fn insert(&mut self, value: T) -> Option<usize> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(value);
                return Some(i);
            }
        }
        None
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(|s| s.take())
    }
}

/// Per-kind fixed offsets folded into a handle's high bits, so that a single
/// `u64` opaque "object handle" both names its table and its slot (spec.md
/// §4.6's object-table summary).
pub mod table_offset {
    pub const RESOURCE: u64 = 0x1000_0000_0000;
    pub const VIEW: u64 = 0x2000_0000_0000;
    pub const SHADER: u64 = 0x3000_0000_0000;
    pub const INPUT_LAYOUT: u64 = 0x4000_0000_0000;
    pub const STATE: u64 = 0x5000_0000_0000;
    pub const SAMPLER: u64 = 0x6000_0000_0000;
    pub const SWAP_CHAIN: u64 = 0x7000_0000_0000;
}

pub const RESOURCE_CAPACITY: usize = 256;
pub const VIEW_CAPACITY: usize = 128;
pub const SHADER_CAPACITY: usize = 64;
pub const INPUT_LAYOUT_CAPACITY: usize = 32;
pub const STATE_CAPACITY: usize = 64;
pub const SAMPLER_CAPACITY: usize = 32;

/// The process-singleton graphics state: every object table plus (at most)
/// one swap chain, guarded by a single mutex since spec.md §5 assumes a
/// single immediate context drives all of this.
pub struct GfxTables {
    pub inner: std::sync::Mutex<GfxState>,
}

pub struct GfxState {
    pub resources: ObjectTable<Resource>,
    pub views: ObjectTable<View>,
    pub shaders: ObjectTable<Shader>,
    pub input_layouts: ObjectTable<d3d11::state::InputLayout>,
    pub states: ObjectTable<State>,
    pub samplers: ObjectTable<Sampler>,
    pub swap_chain: Option<SwapChain>,
    /// The single immediate context's bound pipeline state (spec.md §4.6 —
    /// this core models one context, never a deferred one).
    pub context: abi::ContextState,
}

impl GfxTables {
    pub fn new() -> Self {
        GfxTables {
            inner: std::sync::Mutex::new(GfxState {
                resources: ObjectTable::with_capacity(RESOURCE_CAPACITY),
                views: ObjectTable::with_capacity(VIEW_CAPACITY),
                shaders: ObjectTable::with_capacity(SHADER_CAPACITY),
                input_layouts: ObjectTable::with_capacity(INPUT_LAYOUT_CAPACITY),
                states: ObjectTable::with_capacity(STATE_CAPACITY),
                samplers: ObjectTable::with_capacity(SAMPLER_CAPACITY),
                swap_chain: None,
                context: abi::ContextState::default(),
            }),
        }
    }
}

impl Default for GfxTables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_table_reuses_freed_slots() {
        let mut table: ObjectTable<u32> = ObjectTable::with_capacity(4);
        let a = table.insert(1).unwrap();
        table.insert(2).unwrap();
        table.remove(a);
        let c = table.insert(3).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn object_table_is_exhausted_past_capacity() {
        let mut table: ObjectTable<u32> = ObjectTable::with_capacity(2);
        assert!(table.insert(1).is_some());
        assert!(table.insert(2).is_some());
        assert!(table.insert(3).is_none());
    }
}
