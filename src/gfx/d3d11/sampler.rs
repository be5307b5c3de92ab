//! `ID3D11SamplerState` descriptors and the three texture address modes
//! spec.md §4.6 names.

use std::sync::atomic::AtomicU32;

use super::{new_ref_count, Unknown};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressMode {
    Clamp,
    Wrap,
    Mirror,
}

impl AddressMode {
    /// Maps a texture coordinate into `[0, 1)` per spec.md §4.6: `clamp`
    /// saturates, `wrap` takes the fractional part, `mirror` reflects across
    /// odd integer boundaries.
    pub fn apply(self, coord: f32) -> f32 {
        match self {
            AddressMode::Clamp => coord.clamp(0.0, 1.0),
            AddressMode::Wrap => coord - coord.floor(),
            AddressMode::Mirror => {
                let floor = coord.floor();
                let frac = coord - floor;
                if (floor as i64).rem_euclid(2) != 0 {
                    1.0 - frac
                } else {
                    frac
                }
            }
        }
    }
}

pub struct SamplerDesc {
    pub address_u: AddressMode,
    pub address_v: AddressMode,
}

pub struct Sampler {
    ref_count: AtomicU32,
    pub desc: SamplerDesc,
}

impl Sampler {
    pub fn new(desc: SamplerDesc) -> Self {
        Sampler { ref_count: new_ref_count(), desc }
    }
}

impl Unknown for Sampler {
    fn ref_count(&self) -> &AtomicU32 {
        &self.ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_takes_the_fractional_part() {
        assert!((AddressMode::Wrap.apply(1.75) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn mirror_reflects_on_odd_integer_spans() {
        assert!((AddressMode::Mirror.apply(0.25) - 0.25).abs() < 1e-6);
        assert!((AddressMode::Mirror.apply(1.25) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn clamp_saturates_to_unit_range() {
        assert_eq!(AddressMode::Clamp.apply(-0.5), 0.0);
        assert_eq!(AddressMode::Clamp.apply(1.5), 1.0);
    }
}
