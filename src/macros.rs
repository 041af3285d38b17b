//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields stored as
//! little-endian wrapper types, so on-disk headers read the same on every
//! host. Used by `spill::headers::SpillPageHeader`.
//!
//! ```ignore
//! use zerocopy::little_endian::U32;
//!
//! #[repr(C)]
//! struct SpillPageHeader {
//!     magic: U32,
//!     row_count: U32,
//! }
//!
//! impl SpillPageHeader {
//!     zerocopy_accessors! {
//!         magic: u32,
//!         row_count: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn row_count(&self) -> u32 { self.row_count.get() }
//! // pub fn set_row_count(&mut self, val: u32) { self.row_count = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::little_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
