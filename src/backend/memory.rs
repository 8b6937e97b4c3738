//! An in-memory backend.
//!
//! Clusters live in a process-wide registry keyed by cluster name, so every handle opened with the same name in the same process sees the same hierarchy.
//! The hierarchy is not visible to other processes.
//!
//! The `memory_session` variant gives each cluster handle a session-scoped view of the pools:
//! the pool list is captured on [`connect`](ClusterTraits::connect) and only changes through the handle itself.
//! A pool created or deleted through another handle is only observed after disconnecting and reconnecting.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use parking_lot::{Mutex, RwLock};

use crate::{
    array_subset::ArraySubset, config::ClusterConfig, dataset_metadata::DatasetMetadata,
    name::NodeName, ArrayIndices, ArrayShape,
};

use super::{
    read_chunk_region, validate_chunk_indices, write_chunk_region, Backend, BackendError,
    BackendPlugin, BackendTraits, Chunk, ChunkTraits, Cluster, ClusterTraits, Dataset,
    DatasetTraits, Pool, PoolOptions, PoolTraits,
};

const IDENTIFIER: &str = "memory";
const IDENTIFIER_SESSION: &str = "memory_session";

// Register the backends.
inventory::submit! {
    BackendPlugin::new(IDENTIFIER, is_name_memory, create_backend_memory)
}
inventory::submit! {
    BackendPlugin::new(IDENTIFIER_SESSION, is_name_memory_session, create_backend_memory_session)
}

fn is_name_memory(name: &str) -> bool {
    name.eq(IDENTIFIER) || name.eq("ram")
}

fn is_name_memory_session(name: &str) -> bool {
    name.eq(IDENTIFIER_SESSION)
}

fn create_backend_memory(_config: &ClusterConfig) -> Result<Backend, crate::plugin::PluginCreateError> {
    Ok(Arc::new(MemoryBackend::new()))
}

fn create_backend_memory_session(
    _config: &ClusterConfig,
) -> Result<Backend, crate::plugin::PluginCreateError> {
    Ok(Arc::new(MemoryBackend::new_session_scoped()))
}

type ClusterRegistry = Mutex<HashMap<String, Arc<MemoryClusterState>>>;

static CLUSTERS: OnceLock<ClusterRegistry> = OnceLock::new();

fn cluster_state(name: &str) -> Arc<MemoryClusterState> {
    CLUSTERS
        .get_or_init(Mutex::default)
        .lock()
        .entry(name.to_string())
        .or_default()
        .clone()
}

#[derive(Debug, Default)]
struct MemoryClusterState {
    pools: RwLock<BTreeMap<String, Arc<MemoryPoolState>>>,
}

#[derive(Debug, Default)]
struct MemoryPoolState {
    options: PoolOptions,
    datasets: RwLock<BTreeMap<String, Arc<MemoryDatasetState>>>,
    deleted: AtomicBool,
}

#[derive(Debug)]
struct MemoryDatasetState {
    metadata: DatasetMetadata,
    chunks: Mutex<BTreeMap<ArrayIndices, Arc<RwLock<Vec<u8>>>>>,
    deleted: AtomicBool,
}

/// An in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    session_scoped: bool,
}

impl MemoryBackend {
    /// Create a new memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_scoped: false,
        }
    }

    /// Create a new memory backend whose cluster handles have session-scoped pool visibility.
    #[must_use]
    pub fn new_session_scoped() -> Self {
        Self {
            session_scoped: true,
        }
    }
}

impl BackendTraits for MemoryBackend {
    fn kind(&self) -> &'static str {
        if self.session_scoped {
            IDENTIFIER_SESSION
        } else {
            IDENTIFIER
        }
    }

    fn requires_reconnect_after_structural_change(&self) -> bool {
        self.session_scoped
    }

    fn is_process_local(&self) -> bool {
        true
    }

    fn open_cluster(&self, name: &str) -> Result<Cluster, BackendError> {
        Ok(Arc::new(MemoryCluster {
            name: name.to_string(),
            state: cluster_state(name),
            session_scoped: self.session_scoped,
            session: Mutex::default(),
        }))
    }
}

/// A handle to an in-memory cluster.
#[derive(Debug)]
pub struct MemoryCluster {
    name: String,
    state: Arc<MemoryClusterState>,
    session_scoped: bool,
    /// The visible pools while connected.
    session: Mutex<Option<BTreeSet<String>>>,
}

impl MemoryCluster {
    fn check_connected(&self) -> Result<(), BackendError> {
        if self.session.lock().is_some() {
            Ok(())
        } else {
            Err(BackendError::NotConnected(self.name.clone()))
        }
    }

    fn is_visible(&self, name: &str) -> Result<bool, BackendError> {
        let session = self.session.lock();
        let Some(visible) = session.as_ref() else {
            return Err(BackendError::NotConnected(self.name.clone()));
        };
        if self.session_scoped {
            Ok(visible.contains(name))
        } else {
            Ok(self.state.pools.read().contains_key(name))
        }
    }

    fn set_visible(&self, name: &str, visible: bool) {
        if let Some(session) = self.session.lock().as_mut() {
            if visible {
                session.insert(name.to_string());
            } else {
                session.remove(name);
            }
        }
    }
}

impl ClusterTraits for MemoryCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<(), BackendError> {
        let pools = self.state.pools.read().keys().cloned().collect();
        *self.session.lock() = Some(pools);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BackendError> {
        *self.session.lock() = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    fn create_pool_opt(&self, name: &str, options: &PoolOptions) -> Result<Pool, BackendError> {
        self.check_connected()?;
        NodeName::new(name)?;
        let state = {
            let mut pools = self.state.pools.write();
            if pools.contains_key(name) {
                return Err(BackendError::PoolConflict(name.to_string()));
            }
            let state = Arc::new(MemoryPoolState {
                options: options.clone(),
                ..Default::default()
            });
            pools.insert(name.to_string(), state.clone());
            state
        };
        self.set_visible(name, true);
        Ok(Arc::new(MemoryPool::new(name, state)))
    }

    fn get_pool(&self, name: &str) -> Result<Pool, BackendError> {
        if !self.is_visible(name)? {
            return Err(BackendError::PoolNotFound(name.to_string()));
        }
        let state = self
            .state
            .pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::PoolNotFound(name.to_string()))?;
        Ok(Arc::new(MemoryPool::new(name, state)))
    }

    fn del_pool(&self, name: &str) -> Result<(), BackendError> {
        if !self.is_visible(name)? {
            return Err(BackendError::PoolNotFound(name.to_string()));
        }
        let state = self
            .state
            .pools
            .write()
            .remove(name)
            .ok_or_else(|| BackendError::PoolNotFound(name.to_string()))?;
        state.deleted.store(true, Ordering::SeqCst);
        for dataset in state.datasets.write().values() {
            dataset.deleted.store(true, Ordering::SeqCst);
        }
        self.set_visible(name, false);
        Ok(())
    }

    fn has_pool(&self, name: &str) -> Result<bool, BackendError> {
        self.is_visible(name)
    }

    fn list_pools(&self) -> Result<Vec<String>, BackendError> {
        let session = self.session.lock();
        let Some(visible) = session.as_ref() else {
            return Err(BackendError::NotConnected(self.name.clone()));
        };
        if self.session_scoped {
            Ok(visible.iter().cloned().collect())
        } else {
            Ok(self.state.pools.read().keys().cloned().collect())
        }
    }
}

/// A handle to an in-memory pool.
#[derive(Debug)]
pub struct MemoryPool {
    name: String,
    state: Arc<MemoryPoolState>,
    open: AtomicBool,
}

impl MemoryPool {
    fn new(name: &str, state: Arc<MemoryPoolState>) -> Self {
        Self {
            name: name.to_string(),
            state,
            open: AtomicBool::new(false),
        }
    }

    fn check_exists(&self) -> Result<(), BackendError> {
        if self.state.deleted.load(Ordering::SeqCst) {
            Err(BackendError::PoolNotFound(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn dataset_state(&self, name: &str) -> Result<Arc<MemoryDatasetState>, BackendError> {
        self.check_exists()?;
        self.state
            .datasets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::DatasetNotFound(name.to_string()))
    }
}

impl PoolTraits for MemoryPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), BackendError> {
        self.check_exists()?;
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn options(&self) -> &PoolOptions {
        &self.state.options
    }

    fn create_dataset(&self, metadata: &DatasetMetadata) -> Result<Dataset, BackendError> {
        self.check_exists()?;
        metadata.validate()?;
        let state = {
            let mut datasets = self.state.datasets.write();
            if datasets.contains_key(metadata.name()) {
                return Err(BackendError::DatasetConflict(metadata.name().to_string()));
            }
            let state = Arc::new(MemoryDatasetState {
                metadata: metadata.clone(),
                chunks: Mutex::default(),
                deleted: AtomicBool::new(false),
            });
            datasets.insert(metadata.name().to_string(), state.clone());
            state
        };
        Ok(Arc::new(MemoryDataset { state }))
    }

    fn get_dataset(&self, name: &str) -> Result<Dataset, BackendError> {
        let state = self.dataset_state(name)?;
        Ok(Arc::new(MemoryDataset { state }))
    }

    fn attach_dataset(&self, metadata: DatasetMetadata) -> Result<Dataset, BackendError> {
        let state = self.dataset_state(metadata.name())?;
        if state.metadata != metadata {
            return Err(BackendError::InvalidMetadata(format!(
                "dataset {} does not match the attached metadata",
                metadata.name()
            )));
        }
        Ok(Arc::new(MemoryDataset { state }))
    }

    fn del_dataset(&self, name: &str) -> Result<(), BackendError> {
        self.check_exists()?;
        let state = self
            .state
            .datasets
            .write()
            .remove(name)
            .ok_or_else(|| BackendError::DatasetNotFound(name.to_string()))?;
        state.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn has_dataset(&self, name: &str) -> Result<bool, BackendError> {
        self.check_exists()?;
        Ok(self.state.datasets.read().contains_key(name))
    }

    fn list_datasets(&self) -> Result<Vec<String>, BackendError> {
        self.check_exists()?;
        Ok(self.state.datasets.read().keys().cloned().collect())
    }
}

/// A handle to an in-memory dataset.
#[derive(Debug)]
pub struct MemoryDataset {
    state: Arc<MemoryDatasetState>,
}

impl MemoryDataset {
    fn check_exists(&self) -> Result<(), BackendError> {
        if self.state.deleted.load(Ordering::SeqCst) {
            Err(BackendError::DatasetNotFound(
                self.state.metadata.name().to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn chunk_handle(&self, chunk_indices: &[u64], data: Arc<RwLock<Vec<u8>>>) -> Chunk {
        Arc::new(MemoryChunk {
            chunk_indices: chunk_indices.to_vec(),
            chunk_shape: self.state.metadata.chunk_shape().to_vec(),
            element_size: self.state.metadata.data_type().size(),
            data,
            dataset: self.state.clone(),
        })
    }
}

impl DatasetTraits for MemoryDataset {
    fn metadata(&self) -> &DatasetMetadata {
        &self.state.metadata
    }

    fn create_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, BackendError> {
        self.check_exists()?;
        validate_chunk_indices(&self.state.metadata, chunk_indices)?;
        let data = {
            let mut chunks = self.state.chunks.lock();
            if chunks.contains_key(chunk_indices) {
                return Err(BackendError::ChunkConflict(chunk_indices.to_vec()));
            }
            let num_elements = self
                .state
                .metadata
                .chunk_shape()
                .iter()
                .product::<u64>();
            let num_elements = usize::try_from(num_elements)
                .map_err(|_| BackendError::InvalidRegion("chunk is too large".to_string()))?;
            let data = Arc::new(RwLock::new(
                self.state.metadata.fill_value().repeat(num_elements),
            ));
            chunks.insert(chunk_indices.to_vec(), data.clone());
            data
        };
        Ok(self.chunk_handle(chunk_indices, data))
    }

    fn get_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, BackendError> {
        self.check_exists()?;
        validate_chunk_indices(&self.state.metadata, chunk_indices)?;
        let data = self
            .state
            .chunks
            .lock()
            .get(chunk_indices)
            .cloned()
            .ok_or_else(|| BackendError::ChunkNotFound(chunk_indices.to_vec()))?;
        Ok(self.chunk_handle(chunk_indices, data))
    }

    fn has_chunk(&self, chunk_indices: &[u64]) -> Result<bool, BackendError> {
        self.check_exists()?;
        validate_chunk_indices(&self.state.metadata, chunk_indices)?;
        Ok(self.state.chunks.lock().contains_key(chunk_indices))
    }

    fn del_chunk(&self, chunk_indices: &[u64]) -> Result<bool, BackendError> {
        self.check_exists()?;
        validate_chunk_indices(&self.state.metadata, chunk_indices)?;
        Ok(self.state.chunks.lock().remove(chunk_indices).is_some())
    }
}

/// A handle to an in-memory chunk.
#[derive(Debug)]
pub struct MemoryChunk {
    chunk_indices: ArrayIndices,
    chunk_shape: ArrayShape,
    element_size: usize,
    data: Arc<RwLock<Vec<u8>>>,
    dataset: Arc<MemoryDatasetState>,
}

impl MemoryChunk {
    fn check_exists(&self) -> Result<(), BackendError> {
        let exists = !self.dataset.deleted.load(Ordering::SeqCst)
            && self
                .dataset
                .chunks
                .lock()
                .get(&self.chunk_indices)
                .is_some_and(|data| Arc::ptr_eq(data, &self.data));
        if exists {
            Ok(())
        } else {
            Err(BackendError::ChunkNotFound(self.chunk_indices.clone()))
        }
    }
}

impl ChunkTraits for MemoryChunk {
    fn chunk_indices(&self) -> &[u64] {
        &self.chunk_indices
    }

    fn shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    fn read_region(&self, region: &ArraySubset) -> Result<Vec<u8>, BackendError> {
        self.check_exists()?;
        let data = self.data.read();
        read_chunk_region(&data, region, &self.chunk_shape, self.element_size)
    }

    fn write_region(&self, region: &ArraySubset, bytes: &[u8]) -> Result<(), BackendError> {
        self.check_exists()?;
        let mut data = self.data.write();
        write_chunk_region(
            &mut data,
            region,
            bytes,
            &self.chunk_shape,
            self.element_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::{data_type::DataType, dataset_metadata::DatasetBuilder};

    use super::*;

    fn metadata(name: &str) -> DatasetMetadata {
        DatasetBuilder::new(vec![4, 3], DataType::UInt8, vec![2, 2], 9u8)
            .build(name)
            .unwrap()
    }

    #[test]
    fn memory_backend_hierarchy() {
        let backend = MemoryBackend::new();
        let cluster = backend.open_cluster("memory_backend_hierarchy").unwrap();
        assert!(matches!(
            cluster.create_pool("pool"),
            Err(BackendError::NotConnected(_))
        ));
        cluster.connect().unwrap();
        assert!(!cluster.has_pool("pool").unwrap());
        let pool = cluster.create_pool("pool").unwrap();
        assert!(matches!(
            cluster.create_pool("pool"),
            Err(BackendError::PoolConflict(_))
        ));
        assert_eq!(cluster.list_pools().unwrap(), vec!["pool".to_string()]);

        assert!(!pool.is_open());
        pool.open().unwrap();
        assert!(pool.is_open());
        pool.close();
        assert!(!pool.is_open());

        let dataset = pool.create_dataset(&metadata("data")).unwrap();
        assert!(matches!(
            pool.create_dataset(&metadata("data")),
            Err(BackendError::DatasetConflict(_))
        ));
        assert!(pool.has_dataset("data").unwrap());
        assert_eq!(pool.list_datasets().unwrap(), vec!["data".to_string()]);

        // Another handle to the same cluster name sees the same hierarchy
        let cluster_other = backend.open_cluster("memory_backend_hierarchy").unwrap();
        cluster_other.connect().unwrap();
        let dataset_other = cluster_other
            .get_pool("pool")
            .unwrap()
            .get_dataset("data")
            .unwrap();
        assert_eq!(dataset_other.metadata(), dataset.metadata());

        cluster.del_pool("pool").unwrap();
        assert!(!cluster_other.has_pool("pool").unwrap());
        assert!(matches!(
            pool.has_dataset("data"),
            Err(BackendError::PoolNotFound(_))
        ));
        assert!(matches!(
            dataset.has_chunk(&[0, 0]),
            Err(BackendError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn memory_backend_chunks() {
        let backend = MemoryBackend::new();
        let cluster = backend.open_cluster("memory_backend_chunks").unwrap();
        cluster.connect().unwrap();
        let pool = cluster.create_pool("pool").unwrap();
        let dataset = pool.create_dataset(&metadata("data")).unwrap();

        assert!(!dataset.has_chunk(&[1, 1]).unwrap());
        assert!(matches!(
            dataset.get_chunk(&[1, 1]),
            Err(BackendError::ChunkNotFound(_))
        ));
        assert!(matches!(
            dataset.create_chunk(&[2, 0]),
            Err(BackendError::InvalidRegion(_))
        ));
        let chunk = dataset.create_chunk(&[1, 1]).unwrap();
        assert!(matches!(
            dataset.create_chunk(&[1, 1]),
            Err(BackendError::ChunkConflict(_))
        ));
        assert_eq!(chunk.shape(), &[2, 2]);
        assert_eq!(
            chunk.read_region(&ArraySubset::new_with_shape(vec![2, 2])).unwrap(),
            vec![9; 4]
        );
        chunk
            .write_region(&ArraySubset::new_with_ranges(&[1..2, 0..2]), &[1, 2])
            .unwrap();
        assert_eq!(
            dataset
                .get_chunk(&[1, 1])
                .unwrap()
                .read_region(&ArraySubset::new_with_shape(vec![2, 2]))
                .unwrap(),
            vec![9, 9, 1, 2]
        );
        assert!(chunk
            .write_region(&ArraySubset::new_with_ranges(&[1..3, 0..2]), &[0; 4])
            .is_err());

        assert!(dataset.del_chunk(&[1, 1]).unwrap());
        assert!(!dataset.del_chunk(&[1, 1]).unwrap());
        assert!(matches!(
            chunk.read_region(&ArraySubset::new_with_shape(vec![2, 2])),
            Err(BackendError::ChunkNotFound(_))
        ));
        cluster.del_pool("pool").unwrap();
    }

    #[test]
    fn memory_session_backend_visibility() {
        let backend = MemoryBackend::new_session_scoped();
        let cluster_a = backend.open_cluster("memory_session_backend_visibility").unwrap();
        let cluster_b = backend.open_cluster("memory_session_backend_visibility").unwrap();
        cluster_a.connect().unwrap();
        cluster_b.connect().unwrap();

        cluster_a.create_pool("pool").unwrap();
        assert!(cluster_a.has_pool("pool").unwrap());
        assert!(!cluster_b.has_pool("pool").unwrap());
        assert!(matches!(
            cluster_b.get_pool("pool"),
            Err(BackendError::PoolNotFound(_))
        ));

        cluster_b.disconnect().unwrap();
        cluster_b.connect().unwrap();
        assert!(cluster_b.has_pool("pool").unwrap());

        cluster_a.del_pool("pool").unwrap();
        assert!(cluster_b.has_pool("pool").unwrap());
        let cluster_b = backend.open_cluster("memory_session_backend_visibility").unwrap();
        cluster_b.connect().unwrap();
        assert!(!cluster_b.has_pool("pool").unwrap());
    }
}
