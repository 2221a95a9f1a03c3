//! Tagged reference encoding.
//!
//! ```text
//! reference:  aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaattt
//! ```
//!
//! The low `TAG_NUM_BITS_REF` bits carry the tag, the rest is the byte address
//! of the object. Addresses must be `HEAP_ALIGN` aligned; nothing here checks
//! that.

use std::fmt;

use rt_abi::TAG_REF_MASK;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Boxed(usize);

impl Boxed {
    #[inline]
    pub const fn new(address: usize, tag: usize) -> Self {
        box_ref(address, tag)
    }

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Boxed(raw)
    }

    #[inline]
    pub fn from_ptr<T>(ptr: *mut T, tag: usize) -> Self {
        box_ref(ptr as usize, tag)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn unbox(self) -> usize {
        unbox_ref(self)
    }

    #[inline]
    pub const fn tag(self) -> usize {
        ref_tag(self)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.unbox() as *mut u8
    }
}

impl fmt::Debug for Boxed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Boxed(0x{:x}, tag={})", self.unbox(), self.tag())
    }
}

#[inline]
pub const fn unbox_ref(value: Boxed) -> usize {
    value.0 & !TAG_REF_MASK
}

#[inline]
pub const fn box_ref(address: usize, tag: usize) -> Boxed {
    Boxed(address | tag)
}

#[inline]
pub const fn ref_tag(value: Boxed) -> usize {
    value.0 & TAG_REF_MASK
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_abi::{HEAP_ALIGN, TAG_ARRAY, TAG_OBJECT, TAG_OTHER};

    #[test]
    fn round_trips_every_tag_for_aligned_addresses() {
        let addresses = [0usize, HEAP_ALIGN, 0x1000, 0x7fff_fff8, usize::MAX & !TAG_REF_MASK];
        for address in addresses {
            for tag in 0..=TAG_REF_MASK {
                let boxed = box_ref(address, tag);
                assert_eq!(unbox_ref(boxed), address);
                assert_eq!(ref_tag(boxed), tag);
            }
        }
    }

    #[test]
    fn boxed_methods_agree_with_free_functions() {
        let boxed = Boxed::new(0x4000, TAG_OBJECT);
        assert_eq!(boxed.raw(), 0x4007);
        assert_eq!(boxed.unbox(), 0x4000);
        assert_eq!(boxed.tag(), TAG_OBJECT);
        assert_eq!(Boxed::from_raw(0x4005).tag(), TAG_ARRAY);
        assert_eq!(format!("{:?}", Boxed::new(0x10, TAG_OTHER)), "Boxed(0x10, tag=1)");
    }
}
