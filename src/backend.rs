//! Storage backends.
//!
//! A backend stores a *cluster / pool / dataset / chunk* hierarchy for a single process.
//! Its capabilities are expressed as traits, each with a shared handle alias:
//!  - [`BackendTraits`] ([`Backend`]): a backend kind, configured from a [`ClusterConfig`], which opens cluster handles,
//!  - [`ClusterTraits`] ([`Cluster`]): a session to a cluster; pool lifecycle,
//!  - [`PoolTraits`] ([`Pool`]): a named container of datasets; dataset lifecycle,
//!  - [`DatasetTraits`] ([`Dataset`]): a chunked array with immutable [`DatasetMetadata`]; chunk lifecycle, and
//!  - [`ChunkTraits`] ([`Chunk`]): byte-level region reads and writes of one chunk.
//!
//! Backends do no coordination between processes; that is the job of the [`distributed`](crate::distributed) layer.
//!
//! Backends are registered as [`BackendPlugin`]s and resolved by kind name with [`backend_from_config`]:
//!  - `memory`: [`MemoryBackend`], process-local state shared by every handle with the same cluster name,
//!  - `memory_session`: [`MemoryBackend`] with session-scoped pool visibility, requiring reconnection after structural changes, and
//!  - `filesystem` (feature `filesystem`): [`FilesystemBackend`], a directory tree shared by processes on the same filesystem.
//!
//! [`UsageLogBackend`] wraps any backend and logs every capability call.

pub mod memory;
pub mod usage_log;

#[cfg(feature = "filesystem")]
pub mod filesystem;

pub use memory::MemoryBackend;
pub use usage_log::UsageLogBackend;

#[cfg(feature = "filesystem")]
pub use filesystem::FilesystemBackend;

use std::sync::Arc;

use thiserror::Error;

use crate::{
    array_subset::ArraySubset,
    config::ClusterConfig,
    dataset_metadata::{DatasetMetadata, DatasetMetadataError},
    name::NodeNameError,
    plugin::{Plugin, PluginCreateError},
    ArrayIndices,
};

/// A backend plugin.
pub type BackendPlugin = Plugin<Backend, ClusterConfig>;
inventory::collect!(BackendPlugin);

/// A backend handle.
pub type Backend = Arc<dyn BackendTraits>;

/// A cluster handle.
pub type Cluster = Arc<dyn ClusterTraits>;

/// A pool handle.
pub type Pool = Arc<dyn PoolTraits>;

/// A dataset handle.
pub type Dataset = Arc<dyn DatasetTraits>;

/// Backend-specific pool options, stored with the pool when it is created.
pub type PoolOptions = serde_json::Map<String, serde_json::Value>;

/// Format the arguments of a pool creation call for logs and collective call tags.
pub(crate) fn pool_call_arguments(name: &str, options: &PoolOptions) -> String {
    if options.is_empty() {
        name.to_string()
    } else {
        format!("{name}, {}", serde_json::Value::Object(options.clone()))
    }
}

/// A chunk handle.
pub type Chunk = Arc<dyn ChunkTraits>;

/// Create the backend named by `config`.
///
/// # Errors
/// Returns [`BackendError::UnknownBackend`] if no registered backend matches the backend kind of `config`, or a [`BackendError`] if the backend rejects the configuration.
pub fn backend_from_config(config: &ClusterConfig) -> Result<Backend, BackendError> {
    for plugin in inventory::iter::<BackendPlugin> {
        if plugin.match_name(config.backend()) {
            return plugin.create(config).map_err(BackendError::from);
        }
    }
    Err(BackendError::UnknownBackend(config.backend().to_string()))
}

/// A backend error.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The pool already exists.
    #[error("pool {0} already exists")]
    PoolConflict(String),
    /// The pool does not exist.
    #[error("pool {0} does not exist")]
    PoolNotFound(String),
    /// The dataset already exists.
    #[error("dataset {0} already exists")]
    DatasetConflict(String),
    /// The dataset does not exist.
    #[error("dataset {0} does not exist")]
    DatasetNotFound(String),
    /// The chunk already exists.
    #[error("chunk {0:?} already exists")]
    ChunkConflict(ArrayIndices),
    /// The chunk does not exist.
    #[error("chunk {0:?} does not exist")]
    ChunkNotFound(ArrayIndices),
    /// The cluster handle is not connected.
    #[error("the cluster {0} is not connected")]
    NotConnected(String),
    /// An invalid chunk or region.
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    /// No backend is registered under the requested kind name.
    #[error("unknown backend {0}")]
    UnknownBackend(String),
    /// An invalid pool or dataset name.
    #[error(transparent)]
    InvalidName(#[from] NodeNameError),
    /// Invalid stored or supplied dataset metadata.
    #[error("invalid dataset metadata: {0}")]
    InvalidMetadata(String),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for BackendError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for BackendError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

impl From<DatasetMetadataError> for BackendError {
    fn from(err: DatasetMetadataError) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

impl From<PluginCreateError> for BackendError {
    fn from(err: PluginCreateError) -> Self {
        match err {
            PluginCreateError::Unsupported { name, .. } => Self::UnknownBackend(name),
            err => Self::Other(err.to_string()),
        }
    }
}

/// Backend traits.
pub trait BackendTraits: core::fmt::Debug + Send + Sync {
    /// The backend kind name.
    fn kind(&self) -> &'static str;

    /// Returns true if cluster handles must be disconnected and reopened to observe a structural change (pool creation or deletion) made through another handle.
    fn requires_reconnect_after_structural_change(&self) -> bool {
        false
    }

    /// Returns true if the stored hierarchy is only visible within the current process.
    fn is_process_local(&self) -> bool;

    /// Open a new, disconnected handle to the cluster `name`.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the cluster cannot be opened.
    fn open_cluster(&self, name: &str) -> Result<Cluster, BackendError>;
}

/// Cluster traits.
///
/// Pool operations fail with [`BackendError::NotConnected`] unless the handle is connected.
pub trait ClusterTraits: core::fmt::Debug + Send + Sync {
    /// The cluster name.
    fn name(&self) -> &str;

    /// Connect the handle.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the connection fails.
    fn connect(&self) -> Result<(), BackendError>;

    /// Disconnect the handle.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if disconnection fails.
    fn disconnect(&self) -> Result<(), BackendError>;

    /// Returns true if the handle is connected.
    fn is_connected(&self) -> bool;

    /// Create the pool `name` with no options.
    ///
    /// # Errors
    /// Returns [`BackendError::PoolConflict`] if the pool exists.
    fn create_pool(&self, name: &str) -> Result<Pool, BackendError> {
        self.create_pool_opt(name, &PoolOptions::default())
    }

    /// Create the pool `name` with `options`.
    ///
    /// # Errors
    /// Returns [`BackendError::PoolConflict`] if the pool exists.
    fn create_pool_opt(&self, name: &str, options: &PoolOptions) -> Result<Pool, BackendError>;

    /// Get the pool `name`.
    ///
    /// # Errors
    /// Returns [`BackendError::PoolNotFound`] if the pool does not exist.
    fn get_pool(&self, name: &str) -> Result<Pool, BackendError>;

    /// Delete the pool `name` and every dataset in it.
    ///
    /// # Errors
    /// Returns [`BackendError::PoolNotFound`] if the pool does not exist.
    fn del_pool(&self, name: &str) -> Result<(), BackendError>;

    /// Returns true if the pool `name` exists.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the query fails.
    fn has_pool(&self, name: &str) -> Result<bool, BackendError>;

    /// List the pool names, sorted.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the query fails.
    fn list_pools(&self) -> Result<Vec<String>, BackendError>;
}

/// Pool traits.
pub trait PoolTraits: core::fmt::Debug + Send + Sync {
    /// The pool name.
    fn name(&self) -> &str;

    /// Open the pool.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the pool no longer exists.
    fn open(&self) -> Result<(), BackendError>;

    /// Close the pool.
    fn close(&self);

    /// Returns true if the pool is open.
    fn is_open(&self) -> bool;

    /// The options the pool was created with.
    fn options(&self) -> &PoolOptions;

    /// Create a dataset described by `metadata`.
    ///
    /// # Errors
    /// Returns [`BackendError::DatasetConflict`] if a dataset with the same name exists.
    fn create_dataset(&self, metadata: &DatasetMetadata) -> Result<Dataset, BackendError>;

    /// Get the dataset `name`.
    ///
    /// # Errors
    /// Returns [`BackendError::DatasetNotFound`] if the dataset does not exist.
    fn get_dataset(&self, name: &str) -> Result<Dataset, BackendError>;

    /// Wrap an existing dataset from its metadata, as returned by [`create_dataset`](PoolTraits::create_dataset) through another handle.
    ///
    /// # Errors
    /// Returns [`BackendError::DatasetNotFound`] if the dataset does not exist, or [`BackendError::InvalidMetadata`] if it does not match `metadata`.
    fn attach_dataset(&self, metadata: DatasetMetadata) -> Result<Dataset, BackendError>;

    /// Delete the dataset `name` and its chunks.
    ///
    /// # Errors
    /// Returns [`BackendError::DatasetNotFound`] if the dataset does not exist.
    fn del_dataset(&self, name: &str) -> Result<(), BackendError>;

    /// Returns true if the dataset `name` exists.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the query fails.
    fn has_dataset(&self, name: &str) -> Result<bool, BackendError>;

    /// List the dataset names, sorted.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the query fails.
    fn list_datasets(&self) -> Result<Vec<String>, BackendError>;
}

/// Dataset traits.
///
/// Chunk indices are validated against the chunk grid of the dataset metadata, failing with [`BackendError::InvalidRegion`].
pub trait DatasetTraits: core::fmt::Debug + Send + Sync {
    /// The dataset metadata.
    fn metadata(&self) -> &DatasetMetadata;

    /// Create the chunk at `chunk_indices`, filled with the fill value.
    ///
    /// # Errors
    /// Returns [`BackendError::ChunkConflict`] if the chunk exists.
    fn create_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, BackendError>;

    /// Get the chunk at `chunk_indices`.
    ///
    /// # Errors
    /// Returns [`BackendError::ChunkNotFound`] if the chunk does not exist.
    fn get_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, BackendError>;

    /// Returns true if the chunk at `chunk_indices` exists.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if the query fails.
    fn has_chunk(&self, chunk_indices: &[u64]) -> Result<bool, BackendError>;

    /// Delete the chunk at `chunk_indices`.
    ///
    /// Returns true if the chunk existed.
    ///
    /// # Errors
    /// Returns a [`BackendError`] if deletion fails.
    fn del_chunk(&self, chunk_indices: &[u64]) -> Result<bool, BackendError>;
}

/// Chunk traits.
///
/// Regions are [`ArraySubset`]s relative to the chunk origin within the full chunk shape, and bytes are native-endian elements in C order.
pub trait ChunkTraits: core::fmt::Debug + Send + Sync {
    /// The chunk grid indices of the chunk.
    fn chunk_indices(&self) -> &[u64];

    /// The full chunk shape.
    fn shape(&self) -> &[u64];

    /// Read the bytes of `region`.
    ///
    /// # Errors
    /// Returns [`BackendError::InvalidRegion`] if `region` is outside of the chunk, or a [`BackendError`] if the read fails.
    fn read_region(&self, region: &ArraySubset) -> Result<Vec<u8>, BackendError>;

    /// Write `bytes` into `region`.
    ///
    /// # Errors
    /// Returns [`BackendError::InvalidRegion`] if `region` is outside of the chunk or `bytes` has the wrong length, or a [`BackendError`] if the write fails.
    fn write_region(&self, region: &ArraySubset, bytes: &[u8]) -> Result<(), BackendError>;
}

/// Check that `chunk_indices` are within the chunk grid of `metadata`.
fn validate_chunk_indices(
    metadata: &DatasetMetadata,
    chunk_indices: &[u64],
) -> Result<(), BackendError> {
    if metadata.chunk_grid().chunk_indices_inbounds(chunk_indices) {
        Ok(())
    } else {
        Err(BackendError::InvalidRegion(format!(
            "chunk indices {chunk_indices:?} are outside of the chunk grid of dataset {}",
            metadata.name()
        )))
    }
}

/// Read `region` from chunk bytes `bytes` of shape `chunk_shape`.
fn read_chunk_region(
    bytes: &[u8],
    region: &ArraySubset,
    chunk_shape: &[u64],
    element_size: usize,
) -> Result<Vec<u8>, BackendError> {
    region
        .extract_bytes(bytes, chunk_shape, element_size)
        .map_err(|err| BackendError::InvalidRegion(err.to_string()))
}

/// Write `region_bytes` into `region` of chunk bytes `bytes` of shape `chunk_shape`.
fn write_chunk_region(
    bytes: &mut [u8],
    region: &ArraySubset,
    region_bytes: &[u8],
    chunk_shape: &[u64],
    element_size: usize,
) -> Result<(), BackendError> {
    region
        .store_bytes(region_bytes, bytes, chunk_shape, element_size)
        .map_err(|err| BackendError::InvalidRegion(err.to_string()))
}
