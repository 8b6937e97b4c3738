use crate::{
    backend::{Pool, PoolOptions},
    data_type::Element,
    dataset_metadata::DatasetMetadata,
    group::ProcessGroup,
};

use super::{
    collective::{on_root, validate_collective_call},
    DistributedDataset, DistributedError,
};

/// A pool shared by every rank of a process group.
#[derive(Debug, Clone)]
pub struct DistributedPool {
    pool: Pool,
    group: ProcessGroup,
}

impl DistributedPool {
    pub(crate) fn new(pool: Pool, group: ProcessGroup) -> Self {
        Self { pool, group }
    }

    /// The pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.pool.name()
    }

    /// The backend pool handle of this rank.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// The process group.
    #[must_use]
    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    /// Open the pool handle of this rank.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if the pool no longer exists.
    pub fn open(&self) -> Result<(), DistributedError> {
        Ok(self.pool.open()?)
    }

    /// Close the pool handle of this rank.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Returns true if the pool handle of this rank is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.pool.is_open()
    }

    /// The options the pool was created with.
    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        self.pool.options()
    }

    /// Create a dataset described by `metadata` and return a handle to it on every rank.
    ///
    /// This is a collective operation.
    /// Only the root creates the dataset.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the dataset could not be created, e.g. it already exists.
    pub fn create_dataset(
        &self,
        metadata: &DatasetMetadata,
    ) -> Result<DistributedDataset, DistributedError> {
        validate_collective_call(self.group.as_ref(), || {
            format!("create_dataset({}, {})", self.name(), metadata.name())
        })?;
        on_root(self.group.as_ref(), || {
            log::debug!("root creating dataset {} in pool {}", metadata.name(), self.name());
            Ok(self.pool.create_dataset(metadata)?)
        })?;
        self.get_dataset(metadata.name())
    }

    /// Create a dataset described by `metadata` and [load](DistributedDataset::load) `data` into it.
    ///
    /// This is a collective operation.
    ///
    /// # Errors
    /// Returns [`DistributedError::ShapeMismatch`] before creating anything if the shape of `data` does not match `metadata`.
    /// Returns [`DistributedError::IncompatibleElementType`] if `T` does not match the data type of `metadata`.
    /// Otherwise, returns a [`DistributedError`] if the dataset could not be created or loaded.
    pub fn create_dataset_with_data<T: Element>(
        &self,
        metadata: &DatasetMetadata,
        data: &ndarray::ArrayD<T>,
    ) -> Result<DistributedDataset, DistributedError> {
        T::validate_data_type(metadata.data_type())?;
        super::dataset::check_data_shape(metadata.shape(), data.shape())?;
        let dataset = self.create_dataset(metadata)?;
        dataset.load(data)?;
        Ok(dataset)
    }

    /// Get a handle to the existing dataset `name`.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if the dataset does not exist.
    pub fn get_dataset(&self, name: &str) -> Result<DistributedDataset, DistributedError> {
        let dataset = self.pool.get_dataset(name)?;
        Ok(DistributedDataset::new(
            dataset,
            self.pool.clone(),
            self.group.clone(),
        ))
    }

    /// Returns true if the dataset `name` exists.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] on failure.
    pub fn has_dataset(&self, name: &str) -> Result<bool, DistributedError> {
        Ok(self.pool.has_dataset(name)?)
    }

    /// List the datasets of the pool, sorted by name.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] on failure.
    pub fn list_datasets(&self) -> Result<Vec<String>, DistributedError> {
        Ok(self.pool.list_datasets()?)
    }

    /// Delete the dataset `name` and all of its chunks.
    ///
    /// This is a collective operation.
    /// Outstanding work is drained with a barrier before the root deletes the dataset.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the dataset could not be deleted, e.g. it does not exist.
    pub fn del_dataset(&self, name: &str) -> Result<(), DistributedError> {
        validate_collective_call(self.group.as_ref(), || {
            format!("del_dataset({}, {name})", self.name())
        })?;
        self.group.barrier()?;
        on_root(self.group.as_ref(), || {
            log::debug!("root deleting dataset {name} in pool {}", self.name());
            Ok(self.pool.del_dataset(name)?)
        })?;
        Ok(())
    }
}
