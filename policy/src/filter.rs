// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Versioned filter images: each `(protocol, filter-kind)` target owns a
//! small ring of generational slots, so routes mid-flight through an older
//! generation complete under the old code while new routes pick up the
//! latest install. Mutates in place behind a shared pointer and lets the
//! refcount gate cleanup.

use crate::code::CodeImage;
use std::cell::RefCell;
use std::rc::Rc;

/// An opaque, reference-counted handle to a compiled filter image. Cheap to
/// clone; clones observe in-place updates to the same generational slot
/// (see [`VersionedFilter`]) because they share the same `Rc<RefCell<_>>`.
#[derive(Debug, Clone)]
pub struct FilterHandle(Rc<RefCell<CodeImage>>);

impl FilterHandle {
    pub fn new(image: CodeImage) -> Self {
        FilterHandle(Rc::new(RefCell::new(image)))
    }

    pub fn image(&self) -> std::cell::Ref<'_, CodeImage> {
        self.0.borrow()
    }

    /// Number of live holders of this slot's image, including this handle.
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl PartialEq for FilterHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// The handle is opaque on the wire: a receiver never reconstructs VM-side
// sharing from a serialized handle, so serialization carries no payload.
impl serde::Serialize for FilterHandle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

impl<'de> serde::Deserialize<'de> for FilterHandle {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_unit(UnitVisitor)?;
        Ok(FilterHandle::new(CodeImage::new()))
    }
}

struct UnitVisitor;
impl serde::de::Visitor<'_> for UnitVisitor {
    type Value = ();
    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a unit placeholder for an opaque filter handle")
    }
    fn visit_unit<E>(self) -> Result<(), E> {
        Ok(())
    }
}

/// Per-`(protocol, filter-kind)` target: three generational slots (indices
/// 0, 1, 2) of policy-filter handles. A route in flight through an older
/// generation completes under the old code; new routes pick up the new
/// handle on their next read of the filter slot.
#[derive(Debug, Default)]
pub struct VersionedFilter {
    slots: [Option<FilterHandle>; 3],
    current: u8,
}

impl VersionedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle new route processing should bind to.
    pub fn current(&self) -> Option<&FilterHandle> {
        self.slots[self.current as usize].as_ref()
    }

    pub fn current_slot(&self) -> u8 {
        self.current
    }

    /// Install a new image into the next generational slot and advance
    /// `current` to it. The previous handle, if any in-flight VM still
    /// holds a clone, stays alive via its own `Rc` refcount until that VM
    /// finishes and drops it.
    pub fn install(&mut self, image: CodeImage) -> FilterHandle {
        let next = (self.current as usize + 1) % 3;
        let handle = FilterHandle::new(image);
        self.slots[next] = Some(handle.clone());
        self.current = next as u8;
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_advances_generation_and_keeps_old_alive_while_held() {
        let mut vf = VersionedFilter::new();
        let h0 = vf.install(CodeImage::new());
        assert_eq!(vf.current_slot(), 1);
        let held = h0.clone();
        let _h1 = vf.install(CodeImage::new());
        assert_eq!(vf.current_slot(), 2);
        // old handle still usable via the clone held by "in-flight work"
        assert_eq!(held.strong_count(), 2);
        drop(held);
        assert_eq!(h0.strong_count(), 1);
    }

    #[test]
    fn wraps_around_after_three_generations() {
        let mut vf = VersionedFilter::new();
        vf.install(CodeImage::new());
        vf.install(CodeImage::new());
        vf.install(CodeImage::new());
        assert_eq!(vf.current_slot(), 0);
    }
}
