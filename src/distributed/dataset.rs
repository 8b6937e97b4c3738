use crate::{
    array_subset::{ArraySubset, IncompatibleDimensionalityError},
    backend::{BackendError, Chunk, Dataset, Pool},
    chunk_grid::RegularChunkGrid,
    data_type::{DataType, Element},
    dataset_metadata::{DatasetBuilder, DatasetMetadata},
    fill_value::FillValue,
    group::ProcessGroup,
};

use super::{
    chunk::{elements_to_ndarray, ndarray_shape, ndarray_to_bytes},
    collective::{finish_bulk, for_each_in_shard, from_root, on_root, validate_collective_call},
    DistributedChunk, DistributedError, RoundRobinPartition,
};

/// A dataset shared by every rank of a process group.
///
/// Chunks are created lazily: reading a chunk that does not exist yields the fill value, and writing to it creates it.
///
/// ### Bulk operations
/// [`load`](Self::load), [`map`](Self::map), [`apply`](Self::apply) and [`clear`](Self::clear) are collective.
/// Each rank processes the chunks of its [shard](Self::shard) and then joins a trailing barrier, so no rank returns before every chunk is done.
/// A rank that fails on one of its chunks stops processing its shard, still joins the barrier, and returns its error.
/// Other ranks are unaffected.
#[derive(Debug, Clone)]
pub struct DistributedDataset {
    dataset: Dataset,
    pool: Pool,
    group: ProcessGroup,
}

/// Check that the shape of an ndarray matches `expected`.
pub(crate) fn check_data_shape(expected: &[u64], got: &[usize]) -> Result<(), DistributedError> {
    let got = ndarray_shape(got);
    if got == expected {
        Ok(())
    } else {
        Err(DistributedError::ShapeMismatch {
            expected: expected.to_vec(),
            got,
        })
    }
}

impl DistributedDataset {
    pub(crate) fn new(dataset: Dataset, pool: Pool, group: ProcessGroup) -> Self {
        Self {
            dataset,
            pool,
            group,
        }
    }

    /// The dataset metadata.
    #[must_use]
    pub fn metadata(&self) -> &DatasetMetadata {
        self.dataset.metadata()
    }

    /// The dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata().name()
    }

    /// The dataset shape.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        self.metadata().shape()
    }

    /// The dimensionality of the dataset.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.metadata().dimensionality()
    }

    /// The data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.metadata().data_type()
    }

    /// The chunk shape.
    #[must_use]
    pub fn chunk_shape(&self) -> &[u64] {
        self.metadata().chunk_shape()
    }

    /// The fill value.
    #[must_use]
    pub fn fill_value(&self) -> &FillValue {
        self.metadata().fill_value()
    }

    /// The total number of chunks.
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.metadata().total_chunks()
    }

    /// The chunk grid.
    #[must_use]
    pub fn chunk_grid(&self) -> RegularChunkGrid {
        self.metadata().chunk_grid()
    }

    /// The backend dataset handle of this rank.
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// The process group.
    #[must_use]
    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    /// The chunks owned by this rank in a bulk operation.
    #[must_use]
    pub fn shard(&self) -> RoundRobinPartition {
        RoundRobinPartition::new(self.group.rank(), self.group.size(), self.total_chunks())
    }

    /// Create the chunk at `chunk_indices` and return a handle to it on every rank.
    ///
    /// This is a collective operation.
    /// Only the root creates the chunk, which is filled with the fill value.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the chunk could not be created, e.g. it already exists.
    pub fn create_chunk(&self, chunk_indices: &[u64]) -> Result<DistributedChunk, DistributedError> {
        validate_collective_call(self.group.as_ref(), || {
            format!("create_chunk({}, {chunk_indices:?})", self.name())
        })?;
        on_root(self.group.as_ref(), || {
            Ok(self.dataset.create_chunk(chunk_indices)?)
        })?;
        self.get_chunk(chunk_indices)
    }

    /// Get a handle to the existing chunk at `chunk_indices`.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if the chunk does not exist or `chunk_indices` are outside of the chunk grid.
    pub fn get_chunk(&self, chunk_indices: &[u64]) -> Result<DistributedChunk, DistributedError> {
        Ok(DistributedChunk::new(self.dataset.get_chunk(chunk_indices)?))
    }

    /// Returns true if the chunk at `chunk_indices` exists.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if `chunk_indices` are outside of the chunk grid.
    pub fn has_chunk(&self, chunk_indices: &[u64]) -> Result<bool, DistributedError> {
        Ok(self.dataset.has_chunk(chunk_indices)?)
    }

    /// Delete the chunk at `chunk_indices`, returning true if it existed.
    ///
    /// Within a bulk phase, only the rank owning the chunk may delete it.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if `chunk_indices` are outside of the chunk grid.
    pub fn del_chunk(&self, chunk_indices: &[u64]) -> Result<bool, DistributedError> {
        Ok(self.dataset.del_chunk(chunk_indices)?)
    }

    /// Delete every chunk of the dataset.
    ///
    /// This is a collective operation.
    /// Each rank deletes the chunks of its shard.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] on a rank that failed to delete one of its chunks.
    pub fn clear(&self) -> Result<(), DistributedError> {
        validate_collective_call(self.group.as_ref(), || format!("clear({})", self.name()))?;
        let chunk_grid = self.chunk_grid();
        let result = for_each_in_shard(&self.shard(), |ordinal| {
            let chunk_indices = chunk_grid.chunk_indices_from_flat(ordinal)?;
            self.dataset.del_chunk(&chunk_indices)?;
            Ok(())
        });
        finish_bulk(self.group.as_ref(), result)
    }

    /// Load `data` into the dataset.
    ///
    /// This is a collective operation.
    /// Every rank must supply the same `data`; each rank writes the part of `data` covered by the chunks of its shard.
    ///
    /// # Errors
    /// Returns [`DistributedError::ShapeMismatch`] if the shape of `data` does not match the dataset shape,
    /// or [`DistributedError::IncompatibleElementType`] if `T` does not match the data type.
    /// Both are detected identically on every rank before any chunk is written.
    ///
    /// Returns a [`DistributedError::Backend`] on a rank that failed to write one of its chunks.
    pub fn load<T: Element>(&self, data: &ndarray::ArrayD<T>) -> Result<(), DistributedError> {
        validate_collective_call(self.group.as_ref(), || {
            format!("load({}, {:?})", self.name(), data.shape())
        })?;
        T::validate_data_type(self.data_type())?;
        check_data_shape(self.shape(), data.shape())?;

        let chunk_grid = self.chunk_grid();
        let result = for_each_in_shard(&self.shard(), |ordinal| {
            let chunk_indices = chunk_grid.chunk_indices_from_flat(ordinal)?;
            let chunk_subset = chunk_grid.chunk_subset_global(&chunk_indices)?;
            let region = chunk_grid.chunk_subset_local(&chunk_indices)?;
            let start = crate::iter_u64_to_usize(chunk_subset.start().iter());
            let end = crate::iter_u64_to_usize(chunk_subset.end_exc().iter());
            let chunk_data = data.slice_each_axis(|axis| {
                let axis = axis.axis.index();
                ndarray::Slice::from(start[axis]..end[axis])
            });
            self.write_chunk_bytes(&chunk_indices, &region, &ndarray_to_bytes(&chunk_data))
        });
        finish_bulk(self.group.as_ref(), result)
    }

    /// Apply `transform` to every chunk and write the results to a new dataset `output_name` with the same metadata.
    ///
    /// This is a collective operation.
    /// The dataset is [cloned](Self::clone_as) to `output_name`, then each rank transforms the chunks of its shard.
    /// `transform` receives the part of a chunk within the dataset bounds and must return an array of the same shape.
    /// The source dataset is not modified.
    ///
    /// Returns a handle to the output dataset on every rank.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the output dataset cannot be created.
    /// Returns [`DistributedError::TransformShapeMismatch`] on a rank where `transform` changed the shape of a chunk.
    pub fn map<T, F>(&self, transform: F, output_name: &str) -> Result<Self, DistributedError>
    where
        T: Element,
        F: Fn(ndarray::ArrayD<T>) -> ndarray::ArrayD<T> + Send + Sync,
    {
        validate_collective_call(self.group.as_ref(), || {
            format!("map({}, {output_name})", self.name())
        })?;
        T::validate_data_type(self.data_type())?;
        let output = self.clone_as(output_name)?;
        let result = self.transform_shard(&transform, &output);
        finish_bulk(self.group.as_ref(), result)?;
        Ok(output)
    }

    /// Apply `transform` to every chunk in place.
    ///
    /// This is a collective operation.
    /// `transform` receives the part of a chunk within the dataset bounds and must return an array of the same shape.
    ///
    /// # Errors
    /// Returns [`DistributedError::IncompatibleElementType`] on every rank if `T` does not match the data type.
    /// Returns [`DistributedError::TransformShapeMismatch`] on a rank where `transform` changed the shape of a chunk.
    pub fn apply<T, F>(&self, transform: F) -> Result<(), DistributedError>
    where
        T: Element,
        F: Fn(ndarray::ArrayD<T>) -> ndarray::ArrayD<T> + Send + Sync,
    {
        validate_collective_call(self.group.as_ref(), || format!("apply({})", self.name()))?;
        T::validate_data_type(self.data_type())?;
        let result = self.transform_shard(&transform, self);
        finish_bulk(self.group.as_ref(), result)
    }

    fn transform_shard<T, F>(&self, transform: &F, output: &Self) -> Result<(), DistributedError>
    where
        T: Element,
        F: Fn(ndarray::ArrayD<T>) -> ndarray::ArrayD<T> + Send + Sync,
    {
        let chunk_grid = self.chunk_grid();
        for_each_in_shard(&self.shard(), |ordinal| {
            let chunk_indices = chunk_grid.chunk_indices_from_flat(ordinal)?;
            let region = chunk_grid.chunk_subset_local(&chunk_indices)?;
            let bytes = self.read_chunk_bytes(&chunk_indices, &region)?;
            let chunk_data = transform(elements_to_ndarray::<T>(region.shape(), &bytes)?);
            let got = ndarray_shape(chunk_data.shape());
            if got != region.shape() {
                return Err(DistributedError::TransformShapeMismatch {
                    expected: region.shape().to_vec(),
                    got,
                });
            }
            output.write_chunk_bytes(&chunk_indices, &region, &ndarray_to_bytes(&chunk_data.view()))
        })
    }

    /// Create an empty dataset `name` in the same pool with the same shape, data type, chunk shape and fill value.
    ///
    /// This is a collective operation.
    /// The root creates the dataset and broadcasts its metadata, and every rank attaches to it.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the dataset could not be created, e.g. `name` already exists.
    pub fn clone_as(&self, name: &str) -> Result<Self, DistributedError> {
        validate_collective_call(self.group.as_ref(), || {
            format!("clone_as({}, {name})", self.name())
        })?;
        let metadata = from_root(self.group.as_ref(), || {
            let metadata = DatasetBuilder::from_metadata(self.metadata()).build(name)?;
            log::debug!("root cloning dataset {} to {name}", self.name());
            self.pool.create_dataset(&metadata)?;
            Ok(metadata)
        })?;
        let dataset = self.pool.attach_dataset(metadata)?;
        Ok(Self::new(dataset, self.pool.clone(), self.group.clone()))
    }

    /// Delete the dataset through its pool.
    ///
    /// This is a collective operation.
    /// Outstanding work is drained with a barrier before the root deletes the dataset.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the dataset could not be deleted.
    pub fn delete(self) -> Result<(), DistributedError> {
        validate_collective_call(self.group.as_ref(), || format!("delete({})", self.name()))?;
        self.group.barrier()?;
        on_root(self.group.as_ref(), || {
            log::debug!("root deleting dataset {}", self.name());
            Ok(self.pool.del_dataset(self.name())?)
        })?;
        Ok(())
    }

    /// Read the chunk at `chunk_indices` into an [`ndarray::ArrayD`] with the chunk shape.
    ///
    /// A chunk that does not exist is filled with the fill value.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] if `T` does not match the data type, `chunk_indices` are invalid, or the read fails.
    pub fn retrieve_chunk_ndarray<T: Element>(
        &self,
        chunk_indices: &[u64],
    ) -> Result<ndarray::ArrayD<T>, DistributedError> {
        T::validate_data_type(self.data_type())?;
        self.chunk_grid().chunk_origin(chunk_indices)?;
        let region = ArraySubset::new_with_shape(self.chunk_shape().to_vec());
        let bytes = self.read_chunk_bytes(chunk_indices, &region)?;
        elements_to_ndarray(region.shape(), &bytes)
    }

    /// Write `chunk_array` to the chunk at `chunk_indices`, creating the chunk if it does not exist.
    ///
    /// Within a bulk phase, only the rank owning the chunk may store it.
    ///
    /// # Errors
    /// Returns [`DistributedError::ShapeMismatch`] if the shape of `chunk_array` is not the chunk shape.
    /// Otherwise, returns a [`DistributedError`] if `T` does not match the data type, `chunk_indices` are invalid, or the write fails.
    pub fn store_chunk_ndarray<T: Element>(
        &self,
        chunk_indices: &[u64],
        chunk_array: &ndarray::ArrayD<T>,
    ) -> Result<(), DistributedError> {
        T::validate_data_type(self.data_type())?;
        self.chunk_grid().chunk_origin(chunk_indices)?;
        check_data_shape(self.chunk_shape(), chunk_array.shape())?;
        let region = ArraySubset::new_with_shape(self.chunk_shape().to_vec());
        self.write_chunk_bytes(chunk_indices, &region, &ndarray_to_bytes(&chunk_array.view()))
    }

    /// Read `array_subset` of the dataset into an [`ndarray::ArrayD`].
    ///
    /// The region is assembled from every chunk it intersects, with the fill value where a chunk does not exist.
    /// This is not a collective operation.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] if `T` does not match the data type, `array_subset` is not within the dataset, or a read fails.
    pub fn retrieve_array_subset_ndarray<T: Element>(
        &self,
        array_subset: &ArraySubset,
    ) -> Result<ndarray::ArrayD<T>, DistributedError> {
        T::validate_data_type(self.data_type())?;
        if array_subset.dimensionality() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError::new(
                array_subset.dimensionality(),
                self.dimensionality(),
            )
            .into());
        }
        if !array_subset.inbounds(self.shape()) {
            return Err(DistributedError::ArraySubsetOutOfBounds(
                array_subset.clone(),
                self.shape().to_vec(),
            ));
        }

        let element_size = self.data_type().size();
        let mut bytes = self.fill_value().repeat(array_subset.num_elements_usize());
        if array_subset.num_elements() > 0 {
            for (chunk_indices, chunk_subset) in array_subset.iter_chunks(self.chunk_shape())? {
                let overlap = array_subset.overlap(&chunk_subset)?;
                let region = overlap.relative_to(chunk_subset.start())?;
                if let Some(chunk_bytes) = self.read_existing_chunk_bytes(&chunk_indices, &region)? {
                    overlap
                        .relative_to(array_subset.start())?
                        .store_bytes(&chunk_bytes, &mut bytes, array_subset.shape(), element_size)
                        .map_err(|err| BackendError::InvalidRegion(err.to_string()))?;
                }
            }
        }
        elements_to_ndarray(array_subset.shape(), &bytes)
    }

    /// Read the entire dataset into an [`ndarray::ArrayD`].
    ///
    /// This is not a collective operation.
    ///
    /// # Errors
    /// See [`retrieve_array_subset_ndarray`](Self::retrieve_array_subset_ndarray).
    pub fn retrieve_ndarray<T: Element>(&self) -> Result<ndarray::ArrayD<T>, DistributedError> {
        self.retrieve_array_subset_ndarray(&ArraySubset::new_with_shape(self.shape().to_vec()))
    }

    fn read_existing_chunk_bytes(
        &self,
        chunk_indices: &[u64],
        region: &ArraySubset,
    ) -> Result<Option<Vec<u8>>, DistributedError> {
        match self.dataset.get_chunk(chunk_indices) {
            Ok(chunk) => Ok(Some(chunk.read_region(region)?)),
            Err(BackendError::ChunkNotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Read `region` of a chunk, or the fill value if the chunk does not exist.
    fn read_chunk_bytes(
        &self,
        chunk_indices: &[u64],
        region: &ArraySubset,
    ) -> Result<Vec<u8>, DistributedError> {
        Ok(self
            .read_existing_chunk_bytes(chunk_indices, region)?
            .unwrap_or_else(|| self.fill_value().repeat(region.num_elements_usize())))
    }

    fn get_or_create_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, DistributedError> {
        match self.dataset.get_chunk(chunk_indices) {
            Ok(chunk) => Ok(chunk),
            Err(BackendError::ChunkNotFound(_)) => match self.dataset.create_chunk(chunk_indices) {
                Ok(chunk) => Ok(chunk),
                // Created by another handle in the meantime
                Err(BackendError::ChunkConflict(_)) => Ok(self.dataset.get_chunk(chunk_indices)?),
                Err(err) => Err(err.into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Write `bytes` to `region` of a chunk, creating the chunk if it does not exist.
    fn write_chunk_bytes(
        &self,
        chunk_indices: &[u64],
        region: &ArraySubset,
        bytes: &[u8],
    ) -> Result<(), DistributedError> {
        let chunk = self.get_or_create_chunk(chunk_indices)?;
        Ok(chunk.write_region(region, bytes)?)
    }
}
