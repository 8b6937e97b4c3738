//! The regular chunk grid.
//!
//! A [`RegularChunkGrid`] divides an array of shape `array_shape` into chunks of a fixed `chunk_shape`.
//! Chunks on the upper boundary of the array may extend past its end; only their in-bounds part belongs to the array.
//!
//! The grid maps between the three coordinate systems used by the [`distributed`](crate::distributed) layer:
//!  - a *flat ordinal* in `[0, total_chunks)` ([`chunk_indices_from_flat`](RegularChunkGrid::chunk_indices_from_flat)), in C order over the grid,
//!  - the *global* region of a chunk in the array ([`chunk_subset_global`](RegularChunkGrid::chunk_subset_global)), and
//!  - the *local* region of the same elements within the chunk ([`chunk_subset_local`](RegularChunkGrid::chunk_subset_local)).

use thiserror::Error;

use crate::{
    array_subset::ArraySubset, ravel_indices, unravel_index, ArrayIndices, ArrayShape,
};

/// An invalid chunk grid error.
#[derive(Clone, Debug, Error)]
pub enum ChunkGridCreateError {
    /// The chunk shape dimensionality does not match the array.
    #[error("chunk shape {_0:?} does not match the dimensionality of array shape {_1:?}")]
    IncompatibleDimensionality(ArrayShape, ArrayShape),
    /// A chunk dimension is zero.
    #[error("chunk shape {_0:?} has a zero dimension")]
    ZeroChunkDimension(ArrayShape),
}

/// Invalid chunk grid indices.
#[derive(Clone, Debug, Error)]
#[error("invalid chunk grid indices {_0:?} for grid shape {_1:?}")]
pub struct InvalidChunkGridIndicesError(ArrayIndices, ArrayShape);

/// A flat chunk ordinal outside of the chunk grid.
#[derive(Clone, Debug, Error)]
#[error("chunk ordinal {_0} is out of bounds for a grid with {_1} chunks")]
pub struct InvalidChunkOrdinalError(u64, u64);

/// A regular chunk grid bound to an array shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularChunkGrid {
    array_shape: ArrayShape,
    chunk_shape: ArrayShape,
    grid_shape: ArrayShape,
}

impl RegularChunkGrid {
    /// Create a new regular chunk grid for an array of `array_shape` with chunk shape `chunk_shape`.
    ///
    /// # Errors
    /// Returns a [`ChunkGridCreateError`] if the dimensionalities differ or a chunk dimension is zero.
    pub fn new(array_shape: ArrayShape, chunk_shape: ArrayShape) -> Result<Self, ChunkGridCreateError> {
        if array_shape.len() != chunk_shape.len() {
            return Err(ChunkGridCreateError::IncompatibleDimensionality(
                chunk_shape,
                array_shape,
            ));
        }
        if chunk_shape.contains(&0) {
            return Err(ChunkGridCreateError::ZeroChunkDimension(chunk_shape));
        }
        let grid_shape = std::iter::zip(&array_shape, &chunk_shape)
            .map(|(a, s)| a.div_ceil(*s))
            .collect();
        Ok(Self {
            array_shape,
            chunk_shape,
            grid_shape,
        })
    }

    /// Return the array shape.
    #[must_use]
    pub fn array_shape(&self) -> &[u64] {
        &self.array_shape
    }

    /// Return the chunk shape. Fixed for a regular grid.
    #[must_use]
    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    /// The grid shape (i.e. number of chunks along each dimension).
    #[must_use]
    pub fn grid_shape(&self) -> &[u64] {
        &self.grid_shape
    }

    /// The dimensionality of the grid.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.chunk_shape.len()
    }

    /// The total number of chunks, the product of the grid shape.
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.grid_shape.iter().product()
    }

    /// Returns true if `chunk_indices` are within the chunk grid.
    #[must_use]
    pub fn chunk_indices_inbounds(&self, chunk_indices: &[u64]) -> bool {
        chunk_indices.len() == self.dimensionality()
            && std::iter::zip(chunk_indices, &self.grid_shape).all(|(i, g)| i < g)
    }

    fn validate_chunk_indices(
        &self,
        chunk_indices: &[u64],
    ) -> Result<(), InvalidChunkGridIndicesError> {
        if self.chunk_indices_inbounds(chunk_indices) {
            Ok(())
        } else {
            Err(InvalidChunkGridIndicesError(
                chunk_indices.to_vec(),
                self.grid_shape.clone(),
            ))
        }
    }

    /// Map a flat chunk ordinal to chunk grid indices.
    ///
    /// # Errors
    /// Returns [`InvalidChunkOrdinalError`] if `ordinal` is not less than [`total_chunks`](Self::total_chunks).
    pub fn chunk_indices_from_flat(&self, ordinal: u64) -> Result<ArrayIndices, InvalidChunkOrdinalError> {
        let total_chunks = self.total_chunks();
        if ordinal < total_chunks {
            Ok(unravel_index(ordinal, &self.grid_shape))
        } else {
            Err(InvalidChunkOrdinalError(ordinal, total_chunks))
        }
    }

    /// Map chunk grid indices to a flat chunk ordinal.
    ///
    /// # Errors
    /// Returns [`InvalidChunkGridIndicesError`] if `chunk_indices` are outside of the grid.
    pub fn flat_from_chunk_indices(
        &self,
        chunk_indices: &[u64],
    ) -> Result<u64, InvalidChunkGridIndicesError> {
        self.validate_chunk_indices(chunk_indices)?;
        Ok(ravel_indices(chunk_indices, &self.grid_shape))
    }

    /// The origin of the chunk at `chunk_indices` in the array.
    ///
    /// # Errors
    /// Returns [`InvalidChunkGridIndicesError`] if `chunk_indices` are outside of the grid.
    pub fn chunk_origin(
        &self,
        chunk_indices: &[u64],
    ) -> Result<ArrayIndices, InvalidChunkGridIndicesError> {
        self.validate_chunk_indices(chunk_indices)?;
        Ok(std::iter::zip(chunk_indices, &self.chunk_shape)
            .map(|(i, s)| i * s)
            .collect())
    }

    /// The region of the array covered by the chunk at `chunk_indices`, bounded by the array shape.
    ///
    /// # Errors
    /// Returns [`InvalidChunkGridIndicesError`] if `chunk_indices` are outside of the grid.
    pub fn chunk_subset_global(
        &self,
        chunk_indices: &[u64],
    ) -> Result<ArraySubset, InvalidChunkGridIndicesError> {
        let origin = self.chunk_origin(chunk_indices)?;
        let end = itertools::izip!(&origin, &self.chunk_shape, &self.array_shape)
            .map(|(o, c, a)| std::cmp::min(o + c, *a))
            .collect();
        ArraySubset::new_with_start_end_exc(origin, end).map_err(|_| {
            InvalidChunkGridIndicesError(chunk_indices.to_vec(), self.grid_shape.clone())
        })
    }

    /// The region of the chunk at `chunk_indices` that lies within the array, relative to the chunk origin.
    ///
    /// Equal to the full chunk except for chunks on the upper boundary of the array.
    ///
    /// # Errors
    /// Returns [`InvalidChunkGridIndicesError`] if `chunk_indices` are outside of the grid.
    pub fn chunk_subset_local(
        &self,
        chunk_indices: &[u64],
    ) -> Result<ArraySubset, InvalidChunkGridIndicesError> {
        let global = self.chunk_subset_global(chunk_indices)?;
        Ok(ArraySubset::new_with_shape(global.shape().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_grid_regular() {
        let chunk_grid = RegularChunkGrid::new(vec![5, 7, 52], vec![1, 2, 3]).unwrap();
        assert_eq!(chunk_grid.dimensionality(), 3);
        assert_eq!(chunk_grid.grid_shape(), &[5, 4, 18]);
        assert_eq!(chunk_grid.total_chunks(), 5 * 4 * 18);
        assert_eq!(chunk_grid.chunk_origin(&[1, 1, 1]).unwrap(), vec![1, 2, 3]);
        assert!(chunk_grid.chunk_origin(&[5, 0, 0]).is_err());
        assert!(chunk_grid.chunk_origin(&[0, 0]).is_err());
    }

    #[test]
    fn chunk_grid_regular_invalid() {
        assert!(RegularChunkGrid::new(vec![5, 7], vec![1]).is_err());
        assert!(RegularChunkGrid::new(vec![5, 7], vec![1, 0]).is_err());
    }

    #[test]
    fn chunk_grid_regular_flat() {
        let chunk_grid = RegularChunkGrid::new(vec![4, 6], vec![2, 2]).unwrap();
        assert_eq!(chunk_grid.total_chunks(), 6);
        assert_eq!(chunk_grid.chunk_indices_from_flat(0).unwrap(), vec![0, 0]);
        assert_eq!(chunk_grid.chunk_indices_from_flat(4).unwrap(), vec![1, 1]);
        assert_eq!(chunk_grid.chunk_indices_from_flat(5).unwrap(), vec![1, 2]);
        assert!(chunk_grid.chunk_indices_from_flat(6).is_err());
        for ordinal in 0..chunk_grid.total_chunks() {
            let chunk_indices = chunk_grid.chunk_indices_from_flat(ordinal).unwrap();
            assert_eq!(
                chunk_grid.flat_from_chunk_indices(&chunk_indices).unwrap(),
                ordinal
            );
        }
    }

    #[test]
    fn chunk_grid_regular_boundary_subsets() {
        let chunk_grid = RegularChunkGrid::new(vec![5, 3], vec![2, 2]).unwrap();
        assert_eq!(chunk_grid.grid_shape(), &[3, 2]);
        assert_eq!(
            chunk_grid.chunk_subset_global(&[0, 0]).unwrap(),
            ArraySubset::new_with_ranges(&[0..2, 0..2])
        );
        assert_eq!(
            chunk_grid.chunk_subset_global(&[2, 1]).unwrap(),
            ArraySubset::new_with_ranges(&[4..5, 2..3])
        );
        assert_eq!(
            chunk_grid.chunk_subset_local(&[2, 1]).unwrap(),
            ArraySubset::new_with_ranges(&[0..1, 0..1])
        );
        assert_eq!(
            chunk_grid.chunk_subset_local(&[1, 0]).unwrap(),
            ArraySubset::new_with_ranges(&[0..2, 0..2])
        );
    }
}
