//! Array subsets.
//!
//! An [`ArraySubset`] is a rectangular region of an array: a start and a shape.
//! It is the "slice tuple" exchanged with [backends](crate::backend) when reading or writing a region of a chunk,
//! and the unit returned by the [chunk grid](crate::chunk_grid) when mapping a chunk to the dataset coordinate space.
//!
//! This module provides convenience functions for:
//!  - iterating over the contiguous runs of elements of a subset within an array,
//!  - extracting the bytes within a subset of an array, and
//!  - storing bytes into a subset of an array.

mod iterators;

pub use iterators::{ChunksIterator, ContiguousLinearisedIndicesIterator, IndicesIterator};

use std::ops::Range;

use derive_more::Display;
use itertools::izip;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ArrayIndices, ArrayShape};

/// An array subset.
#[derive(
    Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Default, Serialize, Deserialize,
)]
#[display("start {start:?} shape {shape:?}")]
pub struct ArraySubset {
    /// The start of the array subset.
    start: ArrayIndices,
    /// The shape of the array subset.
    shape: ArrayShape,
}

/// An array extract bytes error.
#[derive(Debug, Error)]
#[error("array subset {_0} is incompatible with array of shape {_1:?} and element size {_2}")]
pub struct ArrayExtractBytesError(ArraySubset, ArrayShape, usize);

/// An array store bytes error.
#[derive(Debug, Error)]
pub enum ArrayStoreBytesError {
    /// Invalid array shape.
    #[error("array shape {_1:?} is incompatible with array subset {_0}")]
    InvalidArrayShape(ArraySubset, ArrayShape),
    /// Invalid subset bytes.
    #[error("expected subset bytes to have length {_1}, got {_0}")]
    InvalidSubsetBytes(usize, usize),
    /// Invalid array bytes.
    #[error("expected array bytes to have length {_1}, got {_0}")]
    InvalidArrayBytes(usize, usize),
}

impl ArraySubset {
    /// Create a new array subset with `shape` starting at the origin.
    #[must_use]
    pub fn new_with_shape(shape: ArrayShape) -> Self {
        Self {
            start: vec![0; shape.len()],
            shape,
        }
    }

    /// Create a new array subset from a list of [`Range`]s.
    #[must_use]
    pub fn new_with_ranges(ranges: &[Range<u64>]) -> Self {
        let start = ranges.iter().map(|range| range.start).collect();
        let shape = ranges
            .iter()
            .map(|range| range.end.saturating_sub(range.start))
            .collect();
        Self { start, shape }
    }

    /// Create a new array subset.
    ///
    /// # Errors
    ///
    /// Returns [`IncompatibleDimensionalityError`] if the length of `start` and `shape` do not match.
    pub fn new_with_start_shape(
        start: ArrayIndices,
        shape: ArrayShape,
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() == shape.len() {
            Ok(Self { start, shape })
        } else {
            Err(IncompatibleDimensionalityError::new(
                start.len(),
                shape.len(),
            ))
        }
    }

    /// Create a new array subset from a start and end (exclusive).
    ///
    /// Each end is clamped so that it is never less than the corresponding start.
    ///
    /// # Errors
    ///
    /// Returns [`IncompatibleDimensionalityError`] if the length of `start` and `end` do not match.
    pub fn new_with_start_end_exc(
        start: ArrayIndices,
        end: ArrayIndices,
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() == end.len() {
            let shape = std::iter::zip(&start, end)
                .map(|(&start, end)| end.saturating_sub(start))
                .collect();
            Ok(Self { start, shape })
        } else {
            Err(IncompatibleDimensionalityError::new(start.len(), end.len()))
        }
    }

    /// Bound the array subset to the domain within `end` (exclusive).
    ///
    /// # Errors
    /// Returns an error if `end` does not match the array subset dimensionality.
    pub fn bound(&self, end: &[u64]) -> Result<Self, IncompatibleDimensionalityError> {
        if end.len() == self.dimensionality() {
            let start = std::iter::zip(self.start(), end)
                .map(|(&a, &b)| std::cmp::min(a, b))
                .collect();
            let end = std::iter::zip(self.end_exc(), end)
                .map(|(a, &b)| std::cmp::min(a, b))
                .collect();
            Self::new_with_start_end_exc(start, end)
        } else {
            Err(IncompatibleDimensionalityError(
                end.len(),
                self.dimensionality(),
            ))
        }
    }

    /// Return the start of the array subset.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// Return the shape of the array subset.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Return the dimensionality of the array subset.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// Return the end (exclusive) of the array subset.
    #[must_use]
    pub fn end_exc(&self) -> ArrayIndices {
        std::iter::zip(&self.start, &self.shape)
            .map(|(start, size)| start + size)
            .collect()
    }

    /// Return the number of elements of the array subset.
    ///
    /// Equal to the product of the components of its shape.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Return the number of elements of the array subset as a `usize`.
    ///
    /// # Panics
    ///
    /// Panics if [`num_elements()`](Self::num_elements()) is greater than [`usize::MAX`].
    #[must_use]
    pub fn num_elements_usize(&self) -> usize {
        usize::try_from(self.num_elements()).unwrap()
    }

    /// Returns true if the array subset is within the bounds of `array_shape`.
    #[must_use]
    pub fn inbounds(&self, array_shape: &[u64]) -> bool {
        if self.dimensionality() != array_shape.len() {
            return false;
        }

        for (subset_start, subset_shape, shape) in izip!(self.start(), self.shape(), array_shape) {
            if subset_start + subset_shape > *shape {
                return false;
            }
        }
        true
    }

    /// Return the overlapping subset between this array subset and `subset_other`.
    ///
    /// # Errors
    ///
    /// Returns [`IncompatibleDimensionalityError`] if the dimensionality of `subset_other` does not match the dimensionality of this array subset.
    pub fn overlap(&self, subset_other: &Self) -> Result<Self, IncompatibleDimensionalityError> {
        if subset_other.dimensionality() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError::new(
                subset_other.dimensionality(),
                self.dimensionality(),
            ));
        }
        let mut starts = Vec::with_capacity(self.start.len());
        let mut ends = Vec::with_capacity(self.start.len());
        for (start, size, other_start, other_size) in izip!(
            &self.start,
            &self.shape,
            subset_other.start(),
            subset_other.shape(),
        ) {
            let overlap_start = *std::cmp::max(start, other_start);
            let overlap_end = std::cmp::min(start + size, other_start + other_size);
            starts.push(overlap_start);
            ends.push(std::cmp::max(overlap_start, overlap_end));
        }
        Self::new_with_start_end_exc(starts, ends)
    }

    /// Return this array subset relative to `offset`, i.e. with `offset` subtracted from its start.
    ///
    /// # Errors
    ///
    /// Returns [`IncompatibleDimensionalityError`] if the length of `offset` does not match the dimensionality of this array subset.
    pub fn relative_to(&self, offset: &[u64]) -> Result<Self, IncompatibleDimensionalityError> {
        if offset.len() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError::new(
                offset.len(),
                self.dimensionality(),
            ));
        }
        Ok(Self {
            start: std::iter::zip(&self.start, offset)
                .map(|(start, offset)| start.saturating_sub(*offset))
                .collect(),
            shape: self.shape.clone(),
        })
    }

    /// Returns an iterator over the indices of elements within the subset.
    #[must_use]
    pub fn iter_indices(&self) -> IndicesIterator {
        IndicesIterator::new(self.clone())
    }

    /// Returns an iterator over the linearised indices of contiguous elements within the subset.
    ///
    /// # Errors
    ///
    /// Returns [`IncompatibleArrayShapeError`] if the `array_shape` does not encapsulate this array subset.
    pub fn iter_contiguous_linearised_indices<'a>(
        &self,
        array_shape: &'a [u64],
    ) -> Result<ContiguousLinearisedIndicesIterator<'a>, IncompatibleArrayShapeError> {
        ContiguousLinearisedIndicesIterator::new(self, array_shape)
    }

    /// Returns an iterator over chunks with shape `chunk_shape` in the array subset.
    ///
    /// All chunks overlapping the array subset are returned, and they all have the same shape `chunk_shape`.
    /// Thus, the subsets of the chunks may extend out over the subset.
    ///
    /// # Errors
    ///
    /// Returns an error if `chunk_shape` does not match the array subset dimensionality.
    pub fn iter_chunks(
        &self,
        chunk_shape: &[u64],
    ) -> Result<ChunksIterator, IncompatibleDimensionalityError> {
        ChunksIterator::new(self, chunk_shape)
    }

    /// Return the bytes in this array subset from an array with shape `array_shape` and `element_size`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayExtractBytesError`] if the length of `array_shape` does not match the array subset dimensionality,
    /// the array subset is outside of the bounds of `array_shape`, or `bytes` does not match `array_shape`.
    pub fn extract_bytes(
        &self,
        bytes: &[u8],
        array_shape: &[u64],
        element_size: usize,
    ) -> Result<Vec<u8>, ArrayExtractBytesError> {
        let element_size_u64 = element_size as u64;
        let error = || ArrayExtractBytesError(self.clone(), array_shape.to_vec(), element_size);
        if bytes.len() as u64 != array_shape.iter().product::<u64>() * element_size_u64 {
            return Err(error());
        }
        let contiguous = self
            .iter_contiguous_linearised_indices(array_shape)
            .map_err(|_| error())?;
        let mut bytes_subset = Vec::with_capacity(self.num_elements_usize() * element_size);
        for (array_index, contiguous_elements) in contiguous {
            let byte_offset = usize::try_from(array_index * element_size_u64).map_err(|_| error())?;
            let byte_length =
                usize::try_from(contiguous_elements * element_size_u64).map_err(|_| error())?;
            bytes_subset.extend_from_slice(&bytes[byte_offset..byte_offset + byte_length]);
        }
        Ok(bytes_subset)
    }

    /// Store `bytes_subset` corresponding to the bytes of this subset into the bytes of an array (`bytes_array`) with shape `array_shape` and `element_size`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayStoreBytesError`] if:
    ///  - the length of `array_shape` does not match the array subset dimensionality or the array subset is outside of the bounds of `array_shape`,
    ///  - the length of `bytes_array` is not compatible with the `array_shape` and `element size`, or
    ///  - the length of `bytes_subset` is not compatible with the shape of this subset and `element_size`.
    pub fn store_bytes(
        &self,
        bytes_subset: &[u8],
        bytes_array: &mut [u8],
        array_shape: &[u64],
        element_size: usize,
    ) -> Result<(), ArrayStoreBytesError> {
        let element_size_u64 = element_size as u64;
        let expected_subset_size = self.num_elements() * element_size_u64;
        let expected_array_size = array_shape.iter().product::<u64>() * element_size_u64;
        if bytes_subset.len() as u64 != expected_subset_size {
            return Err(ArrayStoreBytesError::InvalidSubsetBytes(
                bytes_subset.len(),
                usize::try_from(expected_subset_size).unwrap_or(usize::MAX),
            ));
        }
        if bytes_array.len() as u64 != expected_array_size {
            return Err(ArrayStoreBytesError::InvalidArrayBytes(
                bytes_array.len(),
                usize::try_from(expected_array_size).unwrap_or(usize::MAX),
            ));
        }
        let mut offset = 0;
        for (array_index, contiguous_elements) in self
            .iter_contiguous_linearised_indices(array_shape)
            .map_err(|err| ArrayStoreBytesError::InvalidArrayShape(err.1, err.0))?
        {
            // Both values are bounded by the lengths validated above.
            let byte_index = (array_index * element_size_u64) as usize;
            let byte_length = (contiguous_elements * element_size_u64) as usize;
            bytes_array[byte_index..byte_index + byte_length]
                .copy_from_slice(&bytes_subset[offset..offset + byte_length]);
            offset += byte_length;
        }
        Ok(())
    }
}

/// An incompatible dimensionality error.
#[derive(Copy, Clone, Debug, Error)]
#[error("incompatible dimensionality {0}, expected {1}")]
pub struct IncompatibleDimensionalityError(usize, usize);

impl IncompatibleDimensionalityError {
    /// Create a new incompatible dimensionality error.
    #[must_use]
    pub const fn new(got: usize, expected: usize) -> Self {
        Self(got, expected)
    }
}

/// An incompatible array shape error.
#[derive(Clone, Debug, Error)]
#[error("incompatible array shape {0:?} with array subset {1}")]
pub struct IncompatibleArrayShapeError(ArrayShape, ArraySubset);
