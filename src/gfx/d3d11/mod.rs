//! The D3D11 surrogate: COM-style vtables over the fixed-capacity object
//! tables in [`crate::gfx`] (spec.md §4.6).

pub mod resource;
pub mod sampler;
pub mod shader;
pub mod state;
pub mod view;

use std::sync::atomic::{AtomicU32, Ordering};

/// The `IUnknown` method triple every guest-visible COM object starts with.
/// Real vtables are a `#[repr(C)]` struct of function pointers; this core
/// models the shared prefix as a trait so `query_interface`/`add_ref`/
/// `release` are written once and reused by every concrete vtable.
pub trait Unknown {
    fn ref_count(&self) -> &AtomicU32;

    /// `AddRef`. Returns the new count.
    fn add_ref(&self) -> u32 {
        self.ref_count().fetch_add(1, Ordering::SeqCst) + 1
    }

    /// `Release`. Returns the new count; callers are expected to destroy the
    /// object's table slot once this reaches zero.
    fn release(&self) -> u32 {
        self.ref_count().fetch_sub(1, Ordering::SeqCst) - 1
    }
}

/// Reference count starts at 1 on construction (spec.md §4.6).
pub fn new_ref_count() -> AtomicU32 {
    AtomicU32::new(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(AtomicU32);
    impl Unknown for Dummy {
        fn ref_count(&self) -> &AtomicU32 {
            &self.0
        }
    }

    #[test]
    fn add_ref_then_release_round_trips_to_destruction() {
        let obj = Dummy(new_ref_count());
        assert_eq!(obj.add_ref(), 2);
        assert_eq!(obj.release(), 1);
        assert_eq!(obj.release(), 0);
    }
}
