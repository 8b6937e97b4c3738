//! Array subset iterators.
//!
//! The iterators are:
//!  - [`IndicesIterator`]: iterate over the multidimensional indices of the elements in the subset.
//!  - [`ContiguousLinearisedIndicesIterator`]: iterate over contiguous sets of elements in the subset with the start a linearised index.
//!  - [`ChunksIterator`]: iterate over regular sized chunks in the array subset.

use std::iter::FusedIterator;

use itertools::izip;

use crate::{ravel_indices, ArrayIndices};

use super::{ArraySubset, IncompatibleArrayShapeError, IncompatibleDimensionalityError};

/// Iterates over element indices in an array subset.
pub struct IndicesIterator {
    subset_rev: ArraySubset,
    index: u64,
    length: u64,
}

impl IndicesIterator {
    /// Create a new indices iterator.
    #[must_use]
    pub fn new(mut subset: ArraySubset) -> Self {
        subset.start.reverse();
        subset.shape.reverse();
        let length = subset.num_elements();
        Self {
            subset_rev: subset,
            index: 0,
            length,
        }
    }
}

impl Iterator for IndicesIterator {
    type Item = ArrayIndices;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.length {
            return None;
        }
        let mut current = self.index;
        let mut indices = vec![0; self.subset_rev.dimensionality()];
        for (out, &subset_start, &subset_size) in izip!(
            indices.iter_mut().rev(),
            self.subset_rev.start.iter(),
            self.subset_rev.shape.iter(),
        ) {
            *out = current % subset_size + subset_start;
            current /= subset_size;
        }
        self.index += 1;
        Some(indices)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.length - self.index).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for IndicesIterator {}

impl FusedIterator for IndicesIterator {}

/// Iterates over contiguous linearised element indices in an array subset.
///
/// The iterator item is a tuple: (linearised index, # contiguous elements).
pub struct ContiguousLinearisedIndicesIterator<'a> {
    inner: IndicesIterator,
    contiguous_elements: u64,
    array_shape: &'a [u64],
}

impl<'a> ContiguousLinearisedIndicesIterator<'a> {
    /// Create a new contiguous linearised indices iterator.
    ///
    /// # Errors
    /// Returns [`IncompatibleArrayShapeError`] if `array_shape` does not encapsulate `subset`.
    pub fn new(
        subset: &ArraySubset,
        array_shape: &'a [u64],
    ) -> Result<Self, IncompatibleArrayShapeError> {
        if !subset.inbounds(array_shape) {
            return Err(IncompatibleArrayShapeError(
                array_shape.to_vec(),
                subset.clone(),
            ));
        }

        // Merge trailing dimensions that span the whole array into one contiguous run
        let mut contiguous = true;
        let mut contiguous_elements = 1;
        let mut shape_outer = vec![0; array_shape.len()];
        for (&subset_start, &subset_size, &array_size, shape_outer_i) in izip!(
            subset.start().iter().rev(),
            subset.shape().iter().rev(),
            array_shape.iter().rev(),
            shape_outer.iter_mut().rev(),
        ) {
            if contiguous {
                contiguous_elements *= subset_size;
                *shape_outer_i = 1;
                contiguous = subset_start == 0 && subset_size == array_size;
            } else {
                *shape_outer_i = subset_size;
            }
        }
        if contiguous_elements == 0 {
            shape_outer.iter_mut().for_each(|size| *size = 0);
        }
        let subset_outer = ArraySubset {
            start: subset.start().to_vec(),
            shape: shape_outer,
        };
        Ok(Self {
            inner: subset_outer.iter_indices(),
            contiguous_elements,
            array_shape,
        })
    }

    /// Return the number of contiguous elements (fixed on each iteration).
    #[must_use]
    pub fn contiguous_elements(&self) -> u64 {
        self.contiguous_elements
    }
}

impl Iterator for ContiguousLinearisedIndicesIterator<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|indices| {
            (
                ravel_indices(&indices, self.array_shape),
                self.contiguous_elements,
            )
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ContiguousLinearisedIndicesIterator<'_> {}

impl FusedIterator for ContiguousLinearisedIndicesIterator<'_> {}

/// Iterates over the regular sized chunks overlapping an array subset.
///
/// The iterator item is a tuple: (chunk indices, chunk subset).
pub struct ChunksIterator {
    inner: IndicesIterator,
    chunk_shape: Vec<u64>,
}

impl ChunksIterator {
    /// Create a new chunks iterator.
    ///
    /// # Errors
    ///
    /// Returns [`IncompatibleDimensionalityError`] if `chunk_shape` does not match the dimensionality of `subset`.
    pub fn new(
        subset: &ArraySubset,
        chunk_shape: &[u64],
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if subset.dimensionality() != chunk_shape.len() {
            return Err(IncompatibleDimensionalityError::new(
                chunk_shape.len(),
                subset.dimensionality(),
            ));
        }
        let chunk_start: ArrayIndices = std::iter::zip(subset.start(), chunk_shape)
            .map(|(s, c)| s / c)
            .collect();
        let chunk_end_exc: ArrayIndices = std::iter::zip(subset.end_exc(), chunk_shape)
            .map(|(e, c)| e.div_ceil(*c))
            .collect();
        let subset_chunks = ArraySubset::new_with_start_end_exc(chunk_start, chunk_end_exc)?;
        Ok(Self {
            inner: subset_chunks.iter_indices(),
            chunk_shape: chunk_shape.to_vec(),
        })
    }
}

impl Iterator for ChunksIterator {
    type Item = (ArrayIndices, ArraySubset);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|chunk_indices| {
            let start = std::iter::zip(&chunk_indices, &self.chunk_shape)
                .map(|(i, c)| i * c)
                .collect();
            let chunk_subset = ArraySubset {
                start,
                shape: self.chunk_shape.clone(),
            };
            (chunk_indices, chunk_subset)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ChunksIterator {}

impl FusedIterator for ChunksIterator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_subset_iter_indices() {
        let subset = ArraySubset::new_with_ranges(&[1..3, 1..3]);
        let indices: Vec<_> = subset.iter_indices().collect();
        assert_eq!(
            indices,
            vec![vec![1, 1], vec![1, 2], vec![2, 1], vec![2, 2]]
        );
        assert_eq!(subset.iter_indices().len(), 4);

        let empty = ArraySubset::new_with_ranges(&[1..1, 0..3]);
        assert_eq!(empty.iter_indices().count(), 0);
    }

    #[test]
    fn array_subset_iter_contiguous_linearised_indices() {
        let subset = ArraySubset::new_with_ranges(&[1..3, 1..3]);
        let mut iter = subset.iter_contiguous_linearised_indices(&[4, 4]).unwrap();
        assert_eq!(iter.contiguous_elements(), 2);
        assert_eq!(iter.next(), Some((5, 2)));
        assert_eq!(iter.next(), Some((9, 2)));
        assert_eq!(iter.next(), None);

        let subset = ArraySubset::new_with_ranges(&[1..3, 0..4]);
        let runs: Vec<_> = subset
            .iter_contiguous_linearised_indices(&[4, 4])
            .unwrap()
            .collect();
        assert_eq!(runs, vec![(4, 8)]);

        assert!(subset.iter_contiguous_linearised_indices(&[2, 4]).is_err());
    }

    #[test]
    fn array_subset_iter_chunks() {
        let subset = ArraySubset::new_with_ranges(&[1..5, 1..3]);
        let chunks: Vec<_> = subset.iter_chunks(&[2, 2]).unwrap().collect();
        assert_eq!(
            chunks,
            vec![
                (vec![0, 0], ArraySubset::new_with_ranges(&[0..2, 0..2])),
                (vec![0, 1], ArraySubset::new_with_ranges(&[0..2, 2..4])),
                (vec![1, 0], ArraySubset::new_with_ranges(&[2..4, 0..2])),
                (vec![1, 1], ArraySubset::new_with_ranges(&[2..4, 2..4])),
                (vec![2, 0], ArraySubset::new_with_ranges(&[4..6, 0..2])),
                (vec![2, 1], ArraySubset::new_with_ranges(&[4..6, 2..4])),
            ]
        );
        assert!(subset.iter_chunks(&[2]).is_err());
    }
}
