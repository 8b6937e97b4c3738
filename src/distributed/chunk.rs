use crate::{
    array_subset::ArraySubset,
    backend::Chunk,
    data_type::Element,
    ArrayShape,
};

use super::DistributedError;

/// A chunk of a distributed dataset.
///
/// Chunk access is not coordinated.
/// Within a bulk operation, only the rank owning a chunk touches it.
#[derive(Debug, Clone)]
pub struct DistributedChunk {
    chunk: Chunk,
}

impl DistributedChunk {
    pub(crate) fn new(chunk: Chunk) -> Self {
        Self { chunk }
    }

    /// The backend chunk handle.
    #[must_use]
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// The chunk grid indices of the chunk.
    #[must_use]
    pub fn chunk_indices(&self) -> &[u64] {
        self.chunk.chunk_indices()
    }

    /// The shape of the chunk.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        self.chunk.shape()
    }

    /// Read the bytes of `region`, relative to the chunk origin.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if the region is out of bounds or the chunk was deleted.
    pub fn read_region(&self, region: &ArraySubset) -> Result<Vec<u8>, DistributedError> {
        Ok(self.chunk.read_region(region)?)
    }

    /// Write `bytes` to `region`, relative to the chunk origin.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if the region is out of bounds, `bytes` has the wrong length, or the chunk was deleted.
    pub fn write_region(&self, region: &ArraySubset, bytes: &[u8]) -> Result<(), DistributedError> {
        Ok(self.chunk.write_region(region, bytes)?)
    }

    /// Read the entire chunk into an [`ndarray::ArrayD`].
    ///
    /// # Errors
    /// Returns a [`DistributedError`] if `T` is not compatible with the chunk data or the read fails.
    pub fn retrieve_ndarray<T: Element>(&self) -> Result<ndarray::ArrayD<T>, DistributedError> {
        let region = ArraySubset::new_with_shape(self.shape().to_vec());
        let bytes = self.read_region(&region)?;
        elements_to_ndarray(region.shape(), &bytes)
    }

    /// Write an [`ndarray::ArrayD`] to the entire chunk.
    ///
    /// # Errors
    /// Returns [`DistributedError::ShapeMismatch`] if the shape of `array` does not match the chunk shape.
    pub fn store_ndarray<T: Element>(
        &self,
        array: &ndarray::ArrayD<T>,
    ) -> Result<(), DistributedError> {
        super::dataset::check_data_shape(self.shape(), array.shape())?;
        let region = ArraySubset::new_with_shape(self.shape().to_vec());
        self.write_region(&region, &ndarray_to_bytes(&array.view()))
    }
}

/// Convert C-order element bytes to an [`ndarray::ArrayD`] of `shape`.
pub(crate) fn elements_to_ndarray<T: Element>(
    shape: &[u64],
    bytes: &[u8],
) -> Result<ndarray::ArrayD<T>, DistributedError> {
    let elements: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
    Ok(ndarray::ArrayD::<T>::from_shape_vec(
        crate::iter_u64_to_usize(shape.iter()),
        elements,
    )?)
}

/// The C-order element bytes of an array view.
pub(crate) fn ndarray_to_bytes<T: Element>(array: &ndarray::ArrayViewD<'_, T>) -> Vec<u8> {
    if let Some(elements) = array.as_slice() {
        bytemuck::cast_slice(elements).to_vec()
    } else {
        let elements: Vec<T> = array.iter().copied().collect();
        bytemuck::cast_slice(&elements).to_vec()
    }
}

/// The shape of an ndarray as an [`ArrayShape`].
pub(crate) fn ndarray_shape(shape: &[usize]) -> ArrayShape {
    shape.iter().map(|&s| s as u64).collect()
}
