#![forbid(unsafe_code)]

use crate::block::{BlockDescriptor, BlockRef};
use crate::csr::{CsrBlockDescriptor, CsrBlockRef};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime tag of a numeric element type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    I32,
    F32,
    #[default]
    F64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::I32 => std::mem::size_of::<i32>(),
            DataType::F32 => std::mem::size_of::<f32>(),
            DataType::F64 => std::mem::size_of::<f64>(),
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            DataType::I32 => 0,
            DataType::F32 => 1,
            DataType::F64 => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DataType::I32),
            1 => Some(DataType::F32),
            2 => Some(DataType::F64),
            _ => None,
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A numeric type a table can store or hand out through a block descriptor.
///
/// Conversions go through `f64`, which represents every `i32` and `f32` value exactly, so the
/// widening direction is lossless. Narrowing uses `as` semantics: float to integer truncates toward
/// zero and saturates at the integer bounds (NaN becomes 0).
///
/// The trait is sealed; `i32`, `f32` and `f64` are the only implementations.
pub trait Element:
    sealed::Sealed + Copy + Default + PartialEq + PartialOrd + fmt::Debug + Send + Sync + 'static
{
    const DATA_TYPE: DataType;

    fn to_f64(self) -> f64;

    fn from_f64(value: f64) -> Self;

    #[inline]
    fn cast<D: Element>(self) -> D {
        D::from_f64(self.to_f64())
    }

    /// Borrow `storage` as a slice of `Self` if that is its physical type.
    fn view(storage: &Storage) -> Option<&[Self]>;

    fn view_mut(storage: &mut Storage) -> Option<&mut Vec<Self>>;

    fn into_storage(values: Vec<Self>) -> Storage;

    /// Erase the element type of a descriptor for object-safe table calls.
    fn block_ref(block: &mut BlockDescriptor<Self>) -> BlockRef<'_>;

    fn csr_block_ref(block: &mut CsrBlockDescriptor<Self>) -> CsrBlockRef<'_>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DATA_TYPE: DataType = DataType::$variant;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn view(storage: &Storage) -> Option<&[Self]> {
                match storage {
                    Storage::$variant(values) => Some(values.as_slice()),
                    _ => None,
                }
            }

            fn view_mut(storage: &mut Storage) -> Option<&mut Vec<Self>> {
                match storage {
                    Storage::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn into_storage(values: Vec<Self>) -> Storage {
                Storage::$variant(values)
            }

            fn block_ref(block: &mut BlockDescriptor<Self>) -> BlockRef<'_> {
                BlockRef::$variant(block)
            }

            fn csr_block_ref(block: &mut CsrBlockDescriptor<Self>) -> CsrBlockRef<'_> {
                CsrBlockRef::$variant(block)
            }
        }
    };
}

impl_element!(i32, I32);
impl_element!(f32, F32);
impl_element!(f64, F64);

/// Widen (or narrow) `src` element-wise into `out`, appending.
#[inline]
pub(crate) fn cast_extend<S: Element, D: Element>(src: &[S], out: &mut Vec<D>) {
    out.extend(src.iter().map(|&v| v.cast::<D>()));
}

/// Convert `src` element-wise into the equally sized `dst`.
#[inline]
pub(crate) fn cast_into<S: Element, D: Element>(src: &[S], dst: &mut [D]) {
    debug_assert_eq!(src.len(), dst.len());
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = s.cast::<D>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_to_int_truncates_toward_zero() {
        assert_eq!(3.7f32.cast::<i32>(), 3);
        assert_eq!((-3.7f64).cast::<i32>(), -3);
        assert_eq!(0.999f64.cast::<i32>(), 0);
    }

    #[test]
    fn narrowing_saturates() {
        assert_eq!(1e20f64.cast::<i32>(), i32::MAX);
        assert_eq!((-1e20f64).cast::<i32>(), i32::MIN);
        assert_eq!(f64::NAN.cast::<i32>(), 0);
    }

    #[test]
    fn widening_is_exact() {
        assert_eq!(i32::MAX.cast::<f64>(), 2_147_483_647.0);
        assert_eq!(0.1f32.cast::<f64>().cast::<f32>(), 0.1f32);
    }

    #[test]
    fn data_type_tags_round_trip() {
        for dt in [DataType::I32, DataType::F32, DataType::F64] {
            assert_eq!(DataType::from_tag(dt.tag()), Some(dt));
        }
        assert_eq!(DataType::from_tag(9), None);
        assert_eq!(DataType::F32.size(), 4);
    }
}
