//! A filesystem backend.
//!
//! The hierarchy is stored as a directory tree under a root directory (the `root` cluster option):
//! ```text
//! <root>/<cluster>/<pool>/<dataset>/dataset.json
//! <root>/<cluster>/<pool>/<dataset>/c/<i>.<j>...
//! ```
//! Chunk files hold the native-endian bytes of a full chunk in C order.
//!
//! The tree is visible to every process that can reach `root`, so this backend is usable by process groups that do not share an address space.

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use walkdir::WalkDir;

use crate::{
    array_subset::ArraySubset,
    config::ClusterConfig,
    dataset_metadata::DatasetMetadata,
    name::NodeName,
    plugin::PluginCreateError,
    ArrayIndices, ArrayShape,
};

use super::{
    read_chunk_region, validate_chunk_indices, write_chunk_region, Backend, BackendError,
    BackendPlugin, BackendTraits, Chunk, ChunkTraits, Cluster, ClusterTraits, Dataset,
    DatasetTraits, Pool, PoolOptions, PoolTraits,
};

const IDENTIFIER: &str = "filesystem";

const POOL_OPTIONS_FILE: &str = "pool.json";

const DATASET_METADATA_FILE: &str = "dataset.json";

const CHUNKS_DIRECTORY: &str = "c";

// Register the backend.
inventory::submit! {
    BackendPlugin::new(IDENTIFIER, is_name_filesystem, create_backend_filesystem)
}

fn is_name_filesystem(name: &str) -> bool {
    name.eq(IDENTIFIER) || name.eq("file")
}

fn create_backend_filesystem(config: &ClusterConfig) -> Result<Backend, PluginCreateError> {
    let root = config
        .option_str("root")
        .ok_or_else(|| PluginCreateError::ConfigurationInvalid {
            identifier: IDENTIFIER,
            plugin_type: "backend",
            reason: "missing string option \"root\"".to_string(),
        })?;
    Ok(Arc::new(FilesystemBackend::new(root)))
}

/// Per-file locks shared by the handles of one cluster within this process.
#[derive(Debug, Default)]
struct FileLocks {
    files: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl FileLocks {
    fn get_file_mutex(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut files = self.files.lock();
        let file = files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::default()))
            .clone();
        drop(files);
        file
    }
}

fn list_directories(path: &Path, required_file: Option<&str>) -> Result<Vec<String>, BackendError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| BackendError::Other(err.to_string()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(required_file) = required_file {
            if !entry.path().join(required_file).is_file() {
                continue;
            }
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Read and validate the stored metadata of dataset `name` in the dataset directory `path`.
fn read_dataset_metadata(name: &str, path: &Path) -> Result<DatasetMetadata, BackendError> {
    let json = match std::fs::read(path.join(DATASET_METADATA_FILE)) {
        Ok(json) => json,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(BackendError::DatasetNotFound(name.to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    let metadata: DatasetMetadata = serde_json::from_slice(&json)
        .map_err(|err| BackendError::InvalidMetadata(err.to_string()))?;
    metadata.validate()?;
    if metadata.name() != name {
        return Err(BackendError::InvalidMetadata(format!(
            "dataset {name} has metadata for dataset {}",
            metadata.name()
        )));
    }
    Ok(metadata)
}

/// A filesystem backend.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<FileLocks>>>,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with clusters stored under `root`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: Mutex::default(),
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BackendTraits for FilesystemBackend {
    fn kind(&self) -> &'static str {
        IDENTIFIER
    }

    fn is_process_local(&self) -> bool {
        false
    }

    fn open_cluster(&self, name: &str) -> Result<Cluster, BackendError> {
        NodeName::new(name)?;
        let locks = self
            .locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(Arc::new(FilesystemCluster {
            name: name.to_string(),
            path: self.root.join(name),
            connected: AtomicBool::new(false),
            locks,
        }))
    }
}

/// A handle to a filesystem cluster.
#[derive(Debug)]
pub struct FilesystemCluster {
    name: String,
    path: PathBuf,
    connected: AtomicBool,
    locks: Arc<FileLocks>,
}

impl FilesystemCluster {
    fn pool_path(&self, name: &str) -> Result<PathBuf, BackendError> {
        if !self.is_connected() {
            return Err(BackendError::NotConnected(self.name.clone()));
        }
        Ok(self.path.join(NodeName::new(name)?.as_str()))
    }

    fn pool_handle(&self, name: &str, path: PathBuf, options: PoolOptions) -> Pool {
        Arc::new(FilesystemPool {
            name: name.to_string(),
            path,
            options,
            open: AtomicBool::new(false),
            locks: self.locks.clone(),
        })
    }
}

impl ClusterTraits for FilesystemCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<(), BackendError> {
        std::fs::create_dir_all(&self.path)?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BackendError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn create_pool_opt(&self, name: &str, options: &PoolOptions) -> Result<Pool, BackendError> {
        let path = self.pool_path(name)?;
        match std::fs::create_dir(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(BackendError::PoolConflict(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        let json = serde_json::to_vec_pretty(options)
            .map_err(|err| BackendError::Other(err.to_string()))?;
        std::fs::write(path.join(POOL_OPTIONS_FILE), json)?;
        Ok(self.pool_handle(name, path, options.clone()))
    }

    fn get_pool(&self, name: &str) -> Result<Pool, BackendError> {
        let path = self.pool_path(name)?;
        if !path.is_dir() {
            return Err(BackendError::PoolNotFound(name.to_string()));
        }
        // A pool directory without an options file has no options
        let options = match std::fs::read(path.join(POOL_OPTIONS_FILE)) {
            Ok(json) => serde_json::from_slice(&json).map_err(|err| {
                BackendError::Other(format!("invalid options for pool {name}: {err}"))
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => PoolOptions::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(self.pool_handle(name, path, options))
    }

    fn del_pool(&self, name: &str) -> Result<(), BackendError> {
        let path = self.pool_path(name)?;
        let _lock = self.locks.files.lock(); // lock all operations
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BackendError::PoolNotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn has_pool(&self, name: &str) -> Result<bool, BackendError> {
        Ok(self.pool_path(name)?.is_dir())
    }

    fn list_pools(&self) -> Result<Vec<String>, BackendError> {
        if !self.is_connected() {
            return Err(BackendError::NotConnected(self.name.clone()));
        }
        list_directories(&self.path, None)
    }
}

/// A handle to a filesystem pool.
#[derive(Debug)]
pub struct FilesystemPool {
    name: String,
    path: PathBuf,
    options: PoolOptions,
    open: AtomicBool,
    locks: Arc<FileLocks>,
}

impl FilesystemPool {
    fn dataset_path(&self, name: &str) -> Result<PathBuf, BackendError> {
        if !self.path.is_dir() {
            return Err(BackendError::PoolNotFound(self.name.clone()));
        }
        Ok(self.path.join(NodeName::new(name)?.as_str()))
    }

    fn dataset_handle(&self, metadata: DatasetMetadata, path: PathBuf) -> Dataset {
        Arc::new(FilesystemDataset {
            metadata,
            path,
            locks: self.locks.clone(),
        })
    }
}

impl PoolTraits for FilesystemPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), BackendError> {
        if !self.path.is_dir() {
            return Err(BackendError::PoolNotFound(self.name.clone()));
        }
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
        &self.options
    }

    fn create_dataset(&self, metadata: &DatasetMetadata) -> Result<Dataset, BackendError> {
        metadata.validate()?;
        let path = self.dataset_path(metadata.name())?;
        match std::fs::create_dir(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(BackendError::DatasetConflict(metadata.name().to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        std::fs::create_dir(path.join(CHUNKS_DIRECTORY))?;
        let json = serde_json::to_vec_pretty(metadata)
            .map_err(|err| BackendError::InvalidMetadata(err.to_string()))?;
        std::fs::write(path.join(DATASET_METADATA_FILE), json)?;
        Ok(self.dataset_handle(metadata.clone(), path))
    }

    fn get_dataset(&self, name: &str) -> Result<Dataset, BackendError> {
        let path = self.dataset_path(name)?;
        let metadata = read_dataset_metadata(name, &path)?;
        Ok(self.dataset_handle(metadata, path))
    }

    fn attach_dataset(&self, metadata: DatasetMetadata) -> Result<Dataset, BackendError> {
        metadata.validate()?;
        let path = self.dataset_path(metadata.name())?;
        if read_dataset_metadata(metadata.name(), &path)? != metadata {
            return Err(BackendError::InvalidMetadata(format!(
                "dataset {} does not match the attached metadata",
                metadata.name()
            )));
        }
        Ok(self.dataset_handle(metadata, path))
    }

    fn del_dataset(&self, name: &str) -> Result<(), BackendError> {
        let path = self.dataset_path(name)?;
        let _lock = self.locks.files.lock(); // lock all operations
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BackendError::DatasetNotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn has_dataset(&self, name: &str) -> Result<bool, BackendError> {
        Ok(self.dataset_path(name)?.join(DATASET_METADATA_FILE).is_file())
    }

    fn list_datasets(&self) -> Result<Vec<String>, BackendError> {
        if !self.path.is_dir() {
            return Err(BackendError::PoolNotFound(self.name.clone()));
        }
        list_directories(&self.path, Some(DATASET_METADATA_FILE))
    }
}

/// A handle to a filesystem dataset.
#[derive(Debug)]
pub struct FilesystemDataset {
    metadata: DatasetMetadata,
    path: PathBuf,
    locks: Arc<FileLocks>,
}

impl FilesystemDataset {
    fn chunk_path(&self, chunk_indices: &[u64]) -> Result<PathBuf, BackendError> {
        validate_chunk_indices(&self.metadata, chunk_indices)?;
        let key = if chunk_indices.is_empty() {
            "0".to_string()
        } else {
            chunk_indices.iter().join(".")
        };
        Ok(self.path.join(CHUNKS_DIRECTORY).join(key))
    }

    fn chunk_handle(&self, chunk_indices: &[u64], path: PathBuf) -> Chunk {
        Arc::new(FilesystemChunk {
            chunk_indices: chunk_indices.to_vec(),
            chunk_shape: self.metadata.chunk_shape().to_vec(),
            element_size: self.metadata.data_type().size(),
            path,
            locks: self.locks.clone(),
        })
    }
}

impl DatasetTraits for FilesystemDataset {
    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    fn create_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, BackendError> {
        let path = self.chunk_path(chunk_indices)?;
        let num_elements = usize::try_from(self.metadata.chunk_shape().iter().product::<u64>())
            .map_err(|_| BackendError::InvalidRegion("chunk is too large".to_string()))?;
        let file = self.locks.get_file_mutex(&path);
        let _lock = file.write();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(BackendError::ChunkConflict(chunk_indices.to_vec()));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BackendError::DatasetNotFound(
                    self.metadata.name().to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };
        file.write_all(&self.metadata.fill_value().repeat(num_elements))?;
        Ok(self.chunk_handle(chunk_indices, path))
    }

    fn get_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, BackendError> {
        let path = self.chunk_path(chunk_indices)?;
        if path.is_file() {
            Ok(self.chunk_handle(chunk_indices, path))
        } else {
            Err(BackendError::ChunkNotFound(chunk_indices.to_vec()))
        }
    }

    fn has_chunk(&self, chunk_indices: &[u64]) -> Result<bool, BackendError> {
        Ok(self.chunk_path(chunk_indices)?.is_file())
    }

    fn del_chunk(&self, chunk_indices: &[u64]) -> Result<bool, BackendError> {
        let path = self.chunk_path(chunk_indices)?;
        let file = self.locks.get_file_mutex(&path);
        let _lock = file.write();
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// A handle to a filesystem chunk.
#[derive(Debug)]
pub struct FilesystemChunk {
    chunk_indices: ArrayIndices,
    chunk_shape: ArrayShape,
    element_size: usize,
    path: PathBuf,
    locks: Arc<FileLocks>,
}

impl FilesystemChunk {
    fn read_chunk(&self) -> Result<Vec<u8>, BackendError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BackendError::ChunkNotFound(self.chunk_indices.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        let expected_size = self.chunk_shape.iter().product::<u64>() * self.element_size as u64;
        if bytes.len() as u64 == expected_size {
            Ok(bytes)
        } else {
            Err(BackendError::Other(format!(
                "chunk {:?} has {} bytes, expected {expected_size}",
                self.chunk_indices,
                bytes.len()
            )))
        }
    }
}

impl ChunkTraits for FilesystemChunk {
    fn chunk_indices(&self) -> &[u64] {
        &self.chunk_indices
    }

    fn shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    fn read_region(&self, region: &ArraySubset) -> Result<Vec<u8>, BackendError> {
        let file = self.locks.get_file_mutex(&self.path);
        let _lock = file.read();
        let bytes = self.read_chunk()?;
        read_chunk_region(&bytes, region, &self.chunk_shape, self.element_size)
    }

    fn write_region(&self, region: &ArraySubset, bytes: &[u8]) -> Result<(), BackendError> {
        let file = self.locks.get_file_mutex(&self.path);
        let _lock = file.write();
        let mut chunk_bytes = self.read_chunk()?;
        write_chunk_region(
            &mut chunk_bytes,
            region,
            bytes,
            &self.chunk_shape,
            self.element_size,
        )?;
        std::fs::write(&self.path, chunk_bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{data_type::DataType, dataset_metadata::DatasetBuilder};

    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn filesystem_backend() -> Result<(), Box<dyn std::error::Error>> {
        let path = tempfile::TempDir::new()?;
        let config = ClusterConfig::new("filesystem", "cluster")
            .with_option("root", path.path().to_str().unwrap());
        let backend = crate::backend::backend_from_config(&config)?;
        assert_eq!(backend.kind(), "filesystem");
        assert!(!backend.is_process_local());

        let cluster = backend.open_cluster("cluster")?;
        assert!(cluster.has_pool("pool").is_err());
        cluster.connect()?;
        let pool = cluster.create_pool("pool")?;
        assert!(matches!(
            cluster.create_pool("pool"),
            Err(BackendError::PoolConflict(_))
        ));
        let mut options = PoolOptions::new();
        options.insert("replicas".to_string(), 2.into());
        cluster.create_pool_opt("other", &options)?;
        assert_eq!(cluster.list_pools()?, vec!["other", "pool"]);
        assert_eq!(cluster.get_pool("other")?.options(), &options);
        assert!(cluster.get_pool("pool")?.options().is_empty());

        let metadata = DatasetBuilder::new(vec![3, 3], DataType::Int16, vec![2, 2], -1i16)
            .build("data")?;
        let dataset = pool.create_dataset(&metadata)?;
        assert!(pool.has_dataset("data")?);
        assert_eq!(pool.list_datasets()?, vec!["data"]);
        assert_eq!(pool.get_dataset("data")?.metadata(), &metadata);
        assert!(path
            .path()
            .join("cluster/pool/data/dataset.json")
            .is_file());

        let chunk = dataset.create_chunk(&[1, 0])?;
        assert!(path.path().join("cluster/pool/data/c/1.0").is_file());
        let region = ArraySubset::new_with_ranges(&[0..1, 0..2]);
        let values: Vec<u8> = [5i16, 6].iter().flat_map(|v| v.to_ne_bytes()).collect();
        chunk.write_region(&region, &values)?;
        let chunk = dataset.get_chunk(&[1, 0])?;
        let expected: Vec<u8> = [5i16, 6, -1, -1]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        assert_eq!(
            chunk.read_region(&ArraySubset::new_with_shape(vec![2, 2]))?,
            expected
        );

        assert!(dataset.del_chunk(&[1, 0])?);
        assert!(!dataset.has_chunk(&[1, 0])?);
        assert!(matches!(
            chunk.read_region(&region),
            Err(BackendError::ChunkNotFound(_))
        ));

        let attached = pool.attach_dataset(metadata.clone())?;
        assert_eq!(attached.metadata(), &metadata);
        let mismatched = DatasetBuilder::new(vec![3, 3], DataType::Int16, vec![3, 3], -1i16)
            .build("data")?;
        assert!(matches!(
            pool.attach_dataset(mismatched),
            Err(BackendError::InvalidMetadata(_))
        ));
        pool.del_dataset("data")?;
        assert!(matches!(
            pool.attach_dataset(metadata),
            Err(BackendError::DatasetNotFound(_))
        ));
        cluster.del_pool("pool")?;
        assert!(!cluster.has_pool("pool")?);
        Ok(())
    }

    #[test]
    fn filesystem_backend_missing_root() {
        assert!(crate::backend::backend_from_config(&ClusterConfig::new("filesystem", "c")).is_err());
    }
}
