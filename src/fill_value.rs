//! Dataset fill values.
//!
//! A [`FillValue`] is the element value of regions of a dataset that have never been written,
//! including chunks that do not exist yet in the backend.

use serde::{Deserialize, Serialize};

use crate::data_type::DataType;

/// The fill value of a dataset.
///
/// Stored as native-endian bytes of a single element.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct FillValue(Vec<u8>);

impl core::fmt::Display for FillValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<Vec<u8>> for FillValue {
    fn from(value: Vec<u8>) -> Self {
        FillValue(value)
    }
}

macro_rules! impl_from_ne_bytes {
    ($($type:ty),*) => {
        $(
            impl From<$type> for FillValue {
                fn from(value: $type) -> Self {
                    FillValue(value.to_ne_bytes().to_vec())
                }
            }
        )*
    };
}

impl_from_ne_bytes!(u8, u16, u32, u64, i8, i16, i32, i64, half::f16, f32, f64);

impl FillValue {
    /// Create a new fill value composed of `bytes`.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> FillValue {
        FillValue(bytes)
    }

    /// The all-zero fill value for `data_type`.
    #[must_use]
    pub fn zero(data_type: DataType) -> FillValue {
        FillValue(vec![0; data_type.size()])
    }

    /// Returns the size in bytes of the fill value.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Return the byte representation of the fill value.
    #[must_use]
    pub fn as_ne_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the bytes of `num_elements` repetitions of the fill value.
    #[must_use]
    pub fn repeat(&self, num_elements: usize) -> Vec<u8> {
        self.0.repeat(num_elements)
    }
}
