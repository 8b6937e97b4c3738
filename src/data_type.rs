//! Dataset element types.
//!
//! Every dataset has a fixed-size [`DataType`].
//! Typed access from Rust goes through the [`Element`] trait, which ties a plain-old-data type to its [`DataType`].

use derive_more::{Display, From};
use half::f16;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A data type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[rustfmt::skip]
pub enum DataType {
    /// `int8` Integer in `[-2^7, 2^7-1]`.
    #[display("int8")]
    Int8,
    /// `int16` Integer in `[-2^15, 2^15-1]`.
    #[display("int16")]
    Int16,
    /// `int32` Integer in `[-2^31, 2^31-1]`.
    #[display("int32")]
    Int32,
    /// `int64` Integer in `[-2^63, 2^63-1]`.
    #[display("int64")]
    Int64,
    /// `uint8` Integer in `[0, 2^8-1]`.
    #[display("uint8")]
    UInt8,
    /// `uint16` Integer in `[0, 2^16-1]`.
    #[display("uint16")]
    UInt16,
    /// `uint32` Integer in `[0, 2^32-1]`.
    #[display("uint32")]
    UInt32,
    /// `uint64` Integer in `[0, 2^64-1]`.
    #[display("uint64")]
    UInt64,
    /// `float16` IEEE 754 half-precision floating point: sign bit, 5 bits exponent, 10 bits mantissa.
    #[display("float16")]
    Float16,
    /// `float32` IEEE 754 single-precision floating point: sign bit, 8 bits exponent, 23 bits mantissa.
    #[display("float32")]
    Float32,
    /// `float64` IEEE 754 double-precision floating point: sign bit, 11 bits exponent, 52 bits mantissa.
    #[display("float64")]
    Float64,
}

/// An unsupported data type error.
#[derive(Debug, Error, From)]
#[error("unsupported data type {_0}")]
pub struct UnsupportedDataTypeError(String);

/// An element type incompatibility error.
#[derive(Clone, Debug, Error)]
#[error("incompatible element type {got}, the dataset data type is {expected}")]
pub struct IncompatibleElementTypeError {
    /// The dataset data type.
    pub expected: DataType,
    /// The requested element type.
    pub got: DataType,
}

impl DataType {
    /// Returns the name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Returns the size in bytes of an element.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Create a data type from its name.
    ///
    /// # Errors
    /// Returns [`UnsupportedDataTypeError`] if `name` is not a supported data type.
    pub fn from_name(name: &str) -> Result<Self, UnsupportedDataTypeError> {
        Ok(match name {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::UInt8,
            "uint16" => Self::UInt16,
            "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "float16" => Self::Float16,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            _ => return Err(UnsupportedDataTypeError(name.to_string())),
        })
    }
}

/// A plain-old-data element type with a corresponding [`DataType`].
pub trait Element: bytemuck::Pod + Send + Sync {
    /// The data type of this element.
    const DATA_TYPE: DataType;

    /// Check that this element type matches `data_type`.
    ///
    /// # Errors
    /// Returns [`IncompatibleElementTypeError`] if the types differ.
    fn validate_data_type(data_type: DataType) -> Result<(), IncompatibleElementTypeError> {
        if data_type == Self::DATA_TYPE {
            Ok(())
        } else {
            Err(IncompatibleElementTypeError {
                expected: data_type,
                got: Self::DATA_TYPE,
            })
        }
    }
}

macro_rules! impl_element {
    ($type:ty, $data_type:ident) => {
        impl Element for $type {
            const DATA_TYPE: DataType = DataType::$data_type;
        }
    };
}

impl_element!(i8, Int8);
impl_element!(i16, Int16);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, UInt8);
impl_element!(u16, UInt16);
impl_element!(u32, UInt32);
impl_element!(u64, UInt64);
impl_element!(f16, Float16);
impl_element!(f32, Float32);
impl_element!(f64, Float64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_names() {
        for data_type in [
            DataType::Int8,
            DataType::Int16,
            DataType::Int32,
            DataType::Int64,
            DataType::UInt8,
            DataType::UInt16,
            DataType::UInt32,
            DataType::UInt64,
            DataType::Float16,
            DataType::Float32,
            DataType::Float64,
        ] {
            assert_eq!(DataType::from_name(data_type.name()).unwrap(), data_type);
            assert_eq!(data_type.to_string(), data_type.name());
        }
        assert!(DataType::from_name("complex64").is_err());
    }

    #[test]
    fn data_type_serde() {
        let data_type: DataType = serde_json::from_str(r#""uint16""#).unwrap();
        assert_eq!(data_type, DataType::UInt16);
        assert_eq!(data_type.size(), 2);
        assert_eq!(
            serde_json::to_string(&DataType::Float64).unwrap(),
            r#""float64""#
        );
    }

    #[test]
    fn data_type_element() {
        assert_eq!(f16::DATA_TYPE.size(), std::mem::size_of::<f16>());
        assert!(f32::validate_data_type(DataType::Float32).is_ok());
        let err = u8::validate_data_type(DataType::Int8).unwrap_err();
        assert_eq!(err.expected, DataType::Int8);
        assert_eq!(err.got, DataType::UInt8);
    }
}
