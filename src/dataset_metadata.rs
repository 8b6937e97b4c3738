//! Dataset metadata.
//!
//! [`DatasetMetadata`] holds the immutable attributes of a dataset: its name, shape, data type, chunk shape, and fill value.
//! It is plain serializable data, so it can be persisted by a [backend](crate::backend) and transmitted between ranks of a [process group](crate::group).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    chunk_grid::{ChunkGridCreateError, RegularChunkGrid},
    data_type::DataType,
    fill_value::FillValue,
    name::{NodeName, NodeNameError},
    ArrayShape,
};

/// A dataset metadata error.
#[derive(Clone, Debug, Error)]
pub enum DatasetMetadataError {
    /// An invalid dataset name.
    #[error(transparent)]
    InvalidName(#[from] NodeNameError),
    /// The dataset shape has a zero dimension.
    #[error("dataset shape {_0:?} must have positive dimensions")]
    InvalidShape(ArrayShape),
    /// The chunk shape is incompatible with the dataset shape.
    #[error(transparent)]
    InvalidChunkShape(#[from] ChunkGridCreateError),
    /// The fill value size does not match the data type.
    #[error("incompatible fill value {_1} for data type {_0}")]
    IncompatibleFillValue(DataType, FillValue),
}

/// The metadata of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    name: NodeName,
    shape: ArrayShape,
    data_type: DataType,
    chunk_shape: ArrayShape,
    fill_value: FillValue,
}

impl DatasetMetadata {
    /// Create new dataset metadata.
    ///
    /// # Errors
    /// Returns a [`DatasetMetadataError`] if
    ///  - `name` is not a valid [`NodeName`],
    ///  - `shape` has a zero dimension,
    ///  - `chunk_shape` does not match the dimensionality of `shape` or has a zero dimension, or
    ///  - `fill_value` is not the size of an element of `data_type`.
    pub fn new(
        name: &str,
        shape: ArrayShape,
        data_type: DataType,
        chunk_shape: ArrayShape,
        fill_value: FillValue,
    ) -> Result<Self, DatasetMetadataError> {
        let metadata = Self {
            name: NodeName::new(name)?,
            shape,
            data_type,
            chunk_shape,
            fill_value,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Validate the metadata.
    ///
    /// Metadata read from a backend or received from another rank is validated before use.
    ///
    /// # Errors
    /// Returns a [`DatasetMetadataError`] if the metadata is inconsistent.
    pub fn validate(&self) -> Result<(), DatasetMetadataError> {
        if self.shape.contains(&0) {
            return Err(DatasetMetadataError::InvalidShape(self.shape.clone()));
        }
        RegularChunkGrid::new(self.shape.clone(), self.chunk_shape.clone())?;
        if self.fill_value.size() != self.data_type.size() {
            return Err(DatasetMetadataError::IncompatibleFillValue(
                self.data_type,
                self.fill_value.clone(),
            ));
        }
        Ok(())
    }

    /// The dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// The dataset shape.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The dimensionality of the dataset.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.shape.len()
    }

    /// The data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The chunk shape.
    #[must_use]
    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    /// The fill value.
    #[must_use]
    pub fn fill_value(&self) -> &FillValue {
        &self.fill_value
    }

    /// The chunk grid of the dataset.
    ///
    /// # Panics
    /// Panics if the metadata bypassed validation. Construction through [`DatasetMetadata::new`] or deserialization followed by [`validate`](Self::validate) guarantees a valid grid.
    #[must_use]
    pub fn chunk_grid(&self) -> RegularChunkGrid {
        RegularChunkGrid::new(self.shape.clone(), self.chunk_shape.clone())
            .expect("dataset metadata is validated on creation")
    }

    /// The total number of chunks, the product of the chunk grid dimensions.
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.chunk_grid().total_chunks()
    }

    /// Returns true if `other` has the same attributes as `self`, ignoring the name.
    #[must_use]
    pub fn same_layout(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.data_type == other.data_type
            && self.chunk_shape == other.chunk_shape
            && self.fill_value == other.fill_value
    }
}

/// A [`DatasetMetadata`] builder.
///
/// ```rust
/// # use distarray::{data_type::DataType, dataset_metadata::DatasetBuilder};
/// let metadata = DatasetBuilder::new(vec![10, 10], DataType::UInt8, vec![4, 4], 0u8)
///     .build("image")?;
/// assert_eq!(metadata.total_chunks(), 9);
/// # Ok::<_, distarray::dataset_metadata::DatasetMetadataError>(())
/// ```
#[derive(Clone, Debug)]
pub struct DatasetBuilder {
    /// Dataset shape.
    pub shape: ArrayShape,
    /// Data type.
    pub data_type: DataType,
    /// Chunk shape.
    pub chunk_shape: ArrayShape,
    /// Fill value.
    pub fill_value: FillValue,
}

impl DatasetBuilder {
    /// Create a new dataset builder.
    #[must_use]
    pub fn new(
        shape: ArrayShape,
        data_type: DataType,
        chunk_shape: ArrayShape,
        fill_value: impl Into<FillValue>,
    ) -> Self {
        Self {
            shape,
            data_type,
            chunk_shape,
            fill_value: fill_value.into(),
        }
    }

    /// Create a new builder copying the attributes of existing dataset metadata.
    #[must_use]
    pub fn from_metadata(metadata: &DatasetMetadata) -> Self {
        Self::new(
            metadata.shape.clone(),
            metadata.data_type,
            metadata.chunk_shape.clone(),
            metadata.fill_value.clone(),
        )
    }

    /// Set the shape.
    pub fn shape(&mut self, shape: ArrayShape) -> &mut Self {
        self.shape = shape;
        self
    }

    /// Set the chunk shape.
    pub fn chunk_shape(&mut self, chunk_shape: ArrayShape) -> &mut Self {
        self.chunk_shape = chunk_shape;
        self
    }

    /// Set the fill value.
    pub fn fill_value(&mut self, fill_value: impl Into<FillValue>) -> &mut Self {
        self.fill_value = fill_value.into();
        self
    }

    /// Build dataset metadata named `name`.
    ///
    /// # Errors
    /// Returns a [`DatasetMetadataError`] if the name or attributes are invalid.
    pub fn build(&self, name: &str) -> Result<DatasetMetadata, DatasetMetadataError> {
        DatasetMetadata::new(
            name,
            self.shape.clone(),
            self.data_type,
            self.chunk_shape.clone(),
            self.fill_value.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_metadata() {
        let metadata = DatasetBuilder::new(vec![4, 5], DataType::Int32, vec![2, 2], 7i32)
            .build("data")
            .unwrap();
        assert_eq!(metadata.name(), "data");
        assert_eq!(metadata.shape(), &[4, 5]);
        assert_eq!(metadata.chunk_grid().grid_shape(), &[2, 3]);
        assert_eq!(metadata.total_chunks(), 6);
        assert_eq!(metadata.fill_value(), &FillValue::from(7i32));

        let renamed = DatasetBuilder::from_metadata(&metadata)
            .build("other")
            .unwrap();
        assert_eq!(renamed.name(), "other");
        assert!(renamed.same_layout(&metadata));
        assert_ne!(renamed, metadata);
    }

    #[test]
    fn dataset_metadata_invalid() {
        let builder = DatasetBuilder::new(vec![4, 4], DataType::Float32, vec![2, 2], 0.0f32);
        assert!(builder.build("").is_err());
        assert!(builder.build("a/b").is_err());
        assert!(builder
            .clone()
            .shape(vec![4, 0])
            .build("data")
            .is_err());
        assert!(builder.clone().chunk_shape(vec![2]).build("data").is_err());
        assert!(builder.clone().chunk_shape(vec![2, 0]).build("data").is_err());
        assert!(matches!(
            builder.clone().fill_value(0u8).build("data"),
            Err(DatasetMetadataError::IncompatibleFillValue(..))
        ));
    }

    #[test]
    fn dataset_metadata_serde() {
        let metadata = DatasetBuilder::new(vec![3], DataType::UInt16, vec![2], 1u16)
            .build("data")
            .unwrap();
        let json = serde_json::to_string(&metadata).unwrap();
        let metadata_in: DatasetMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata, metadata_in);
        assert!(serde_json::from_str::<DatasetMetadata>(
            r#"{"name":"__bad","shape":[1],"data_type":"int8","chunk_shape":[1],"fill_value":[0]}"#
        )
        .is_err());
    }
}
