//! A backend adapter which logs capability calls.

use std::{io::Write, sync::Arc};

use itertools::Itertools;
use parking_lot::Mutex;

use crate::{array_subset::ArraySubset, dataset_metadata::DatasetMetadata};

use super::{
    pool_call_arguments, Backend, BackendError, BackendTraits, Chunk, ChunkTraits, Cluster,
    ClusterTraits, Dataset, DatasetTraits, Pool, PoolOptions, PoolTraits,
};

/// The usage log backend. Wraps a backend and logs every fallible capability call of every handle it opens.
///
/// It is intended to aid in debugging by revealing the backend access pattern of each rank,
/// for example that only the root creates pools and datasets and that each rank only touches the chunks of its own shard.
///
/// ### Example (log to stdout)
/// ```rust
/// # use std::sync::Arc;
/// # use parking_lot::Mutex;
/// # use distarray::backend::{BackendTraits, MemoryBackend, UsageLogBackend};
/// let log_writer = Arc::new(Mutex::new(
///     // std::io::BufWriter::new(
///     std::io::stdout(),
///     //    )
/// ));
/// let backend = Arc::new(UsageLogBackend::new(
///     Arc::new(MemoryBackend::new()),
///     log_writer,
///     || chrono::Utc::now().format("[%T%.3f] ").to_string(),
/// ));
/// let cluster = backend.open_cluster("usage_log_example")?;
/// cluster.connect()?;
/// # Ok::<_, distarray::backend::BackendError>(())
/// ```
///
/// Collective operations with the above [`UsageLogBackend`] print outputs like:
/// ```text
/// [23:41:19.885] open_cluster(usage_log_example) -> Ok
/// [23:41:19.885] usage_log_example.connect() -> Ok(())
/// [23:41:19.885] usage_log_example.create_pool(pool) -> Ok
/// [23:41:19.886] pool.create_dataset(data, shape=[4, 4], chunk_shape=[2, 2]) -> Ok
/// [23:41:19.887] data.get_chunk([0, 0]) -> Err(chunk [0, 0] does not exist)
/// [23:41:19.887] data.create_chunk([0, 0]) -> Ok
/// [23:41:19.887] data[0, 0].write_region(start [0, 0] shape [2, 2], len=64) -> Ok(())
/// ```
#[derive(Clone)]
pub struct UsageLogBackend {
    backend: Backend,
    log: UsageLog,
}

#[derive(Clone)]
struct UsageLog {
    handle: Arc<Mutex<dyn Write + Send + Sync>>,
    prefix_func: fn() -> String,
}

impl UsageLog {
    fn log(&self, args: core::fmt::Arguments) -> Result<(), BackendError> {
        writeln!(self.handle.lock(), "{}{args}", (self.prefix_func)())?;
        Ok(())
    }
}

fn status<T>(result: &Result<T, BackendError>) -> String {
    match result {
        Ok(_) => "Ok".to_string(),
        Err(err) => format!("Err({err})"),
    }
}

impl core::fmt::Debug for UsageLogBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "usage log ({:?})", self.backend)
    }
}

impl UsageLogBackend {
    /// Create a new usage log backend wrapping `backend`.
    ///
    /// Each line written to `handle` starts with the output of `prefix_func`.
    pub fn new(
        backend: Backend,
        handle: Arc<Mutex<dyn Write + Send + Sync>>,
        prefix_func: fn() -> String,
    ) -> Self {
        Self {
            backend,
            log: UsageLog {
                handle,
                prefix_func,
            },
        }
    }
}

impl BackendTraits for UsageLogBackend {
    fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    fn requires_reconnect_after_structural_change(&self) -> bool {
        self.backend.requires_reconnect_after_structural_change()
    }

    fn is_process_local(&self) -> bool {
        self.backend.is_process_local()
    }

    fn open_cluster(&self, name: &str) -> Result<Cluster, BackendError> {
        let result = self.backend.open_cluster(name);
        self.log.log(format_args!("open_cluster({name}) -> {}", status(&result)))?;
        Ok(Arc::new(UsageLogCluster {
            cluster: result?,
            log: self.log.clone(),
        }))
    }
}

struct UsageLogCluster {
    cluster: Cluster,
    log: UsageLog,
}

impl core::fmt::Debug for UsageLogCluster {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "usage log ({:?})", self.cluster)
    }
}

impl UsageLogCluster {
    fn wrap_pool(&self, pool: Pool) -> Pool {
        Arc::new(UsageLogPool {
            pool,
            log: self.log.clone(),
        })
    }
}

impl ClusterTraits for UsageLogCluster {
    fn name(&self) -> &str {
        self.cluster.name()
    }

    fn connect(&self) -> Result<(), BackendError> {
        let result = self.cluster.connect();
        self.log
            .log(format_args!("{}.connect() -> {result:?}", self.name()))?;
        result
    }

    fn disconnect(&self) -> Result<(), BackendError> {
        let result = self.cluster.disconnect();
        self.log
            .log(format_args!("{}.disconnect() -> {result:?}", self.name()))?;
        result
    }

    fn is_connected(&self) -> bool {
        self.cluster.is_connected()
    }

    fn create_pool_opt(&self, name: &str, options: &PoolOptions) -> Result<Pool, BackendError> {
        let result = self.cluster.create_pool_opt(name, options);
        self.log.log(format_args!(
            "{}.create_pool({}) -> {}",
            self.name(),
            pool_call_arguments(name, options),
            status(&result)
        ))?;
        Ok(self.wrap_pool(result?))
    }

    fn get_pool(&self, name: &str) -> Result<Pool, BackendError> {
        let result = self.cluster.get_pool(name);
        self.log.log(format_args!(
            "{}.get_pool({name}) -> {}",
            self.name(),
            status(&result)
        ))?;
        Ok(self.wrap_pool(result?))
    }

    fn del_pool(&self, name: &str) -> Result<(), BackendError> {
        let result = self.cluster.del_pool(name);
        self.log.log(format_args!(
            "{}.del_pool({name}) -> {}",
            self.name(),
            status(&result)
        ))?;
        result
    }

    fn has_pool(&self, name: &str) -> Result<bool, BackendError> {
        let result = self.cluster.has_pool(name);
        self.log.log(format_args!(
            "{}.has_pool({name}) -> {result:?}",
            self.name()
        ))?;
        result
    }

    fn list_pools(&self) -> Result<Vec<String>, BackendError> {
        let result = self.cluster.list_pools();
        self.log.log(format_args!(
            "{}.list_pools() -> [{}]",
            self.name(),
            result.as_ref().map_or(&vec![], |v| v).iter().format(", ")
        ))?;
        result
    }
}

struct UsageLogPool {
    pool: Pool,
    log: UsageLog,
}

impl core::fmt::Debug for UsageLogPool {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "usage log ({:?})", self.pool)
    }
}

impl UsageLogPool {
    fn wrap_dataset(&self, dataset: Dataset) -> Dataset {
        Arc::new(UsageLogDataset {
            dataset,
            log: self.log.clone(),
        })
    }
}

impl PoolTraits for UsageLogPool {
    fn name(&self) -> &str {
        self.pool.name()
    }

    fn open(&self) -> Result<(), BackendError> {
        let result = self.pool.open();
        self.log
            .log(format_args!("{}.open() -> {}", self.name(), status(&result)))?;
        result
    }

    fn close(&self) {
        self.pool.close();
    }

    fn is_open(&self) -> bool {
        self.pool.is_open()
    }

    fn options(&self) -> &PoolOptions {
        self.pool.options()
    }

    fn create_dataset(&self, metadata: &DatasetMetadata) -> Result<Dataset, BackendError> {
        let result = self.pool.create_dataset(metadata);
        self.log.log(format_args!(
            "{}.create_dataset({}, shape={:?}, chunk_shape={:?}) -> {}",
            self.name(),
            metadata.name(),
            metadata.shape(),
            metadata.chunk_shape(),
            status(&result)
        ))?;
        Ok(self.wrap_dataset(result?))
    }

    fn get_dataset(&self, name: &str) -> Result<Dataset, BackendError> {
        let result = self.pool.get_dataset(name);
        self.log.log(format_args!(
            "{}.get_dataset({name}) -> {}",
            self.name(),
            status(&result)
        ))?;
        Ok(self.wrap_dataset(result?))
    }

    fn attach_dataset(&self, metadata: DatasetMetadata) -> Result<Dataset, BackendError> {
        let name = metadata.name().to_string();
        let result = self.pool.attach_dataset(metadata);
        self.log.log(format_args!(
            "{}.attach_dataset({name}) -> {}",
            self.name(),
            status(&result)
        ))?;
        Ok(self.wrap_dataset(result?))
    }

    fn del_dataset(&self, name: &str) -> Result<(), BackendError> {
        let result = self.pool.del_dataset(name);
        self.log.log(format_args!(
            "{}.del_dataset({name}) -> {}",
            self.name(),
            status(&result)
        ))?;
        result
    }

    fn has_dataset(&self, name: &str) -> Result<bool, BackendError> {
        let result = self.pool.has_dataset(name);
        self.log.log(format_args!(
            "{}.has_dataset({name}) -> {result:?}",
            self.name()
        ))?;
        result
    }

    fn list_datasets(&self) -> Result<Vec<String>, BackendError> {
        let result = self.pool.list_datasets();
        self.log.log(format_args!(
            "{}.list_datasets() -> [{}]",
            self.name(),
            result.as_ref().map_or(&vec![], |v| v).iter().format(", ")
        ))?;
        result
    }
}

struct UsageLogDataset {
    dataset: Dataset,
    log: UsageLog,
}

impl core::fmt::Debug for UsageLogDataset {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "usage log ({:?})", self.dataset)
    }
}

impl UsageLogDataset {
    fn name(&self) -> &str {
        self.dataset.metadata().name()
    }

    fn wrap_chunk(&self, chunk: Chunk) -> Chunk {
        Arc::new(UsageLogChunk {
            chunk,
            dataset_name: self.name().to_string(),
            log: self.log.clone(),
        })
    }
}

impl DatasetTraits for UsageLogDataset {
    fn metadata(&self) -> &DatasetMetadata {
        self.dataset.metadata()
    }

    fn create_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, BackendError> {
        let result = self.dataset.create_chunk(chunk_indices);
        self.log.log(format_args!(
            "{}.create_chunk({chunk_indices:?}) -> {}",
            self.name(),
            status(&result)
        ))?;
        Ok(self.wrap_chunk(result?))
    }

    fn get_chunk(&self, chunk_indices: &[u64]) -> Result<Chunk, BackendError> {
        let result = self.dataset.get_chunk(chunk_indices);
        self.log.log(format_args!(
            "{}.get_chunk({chunk_indices:?}) -> {}",
            self.name(),
            status(&result)
        ))?;
        Ok(self.wrap_chunk(result?))
    }

    fn has_chunk(&self, chunk_indices: &[u64]) -> Result<bool, BackendError> {
        let result = self.dataset.has_chunk(chunk_indices);
        self.log.log(format_args!(
            "{}.has_chunk({chunk_indices:?}) -> {result:?}",
            self.name()
        ))?;
        result
    }

    fn del_chunk(&self, chunk_indices: &[u64]) -> Result<bool, BackendError> {
        let result = self.dataset.del_chunk(chunk_indices);
        self.log.log(format_args!(
            "{}.del_chunk({chunk_indices:?}) -> {result:?}",
            self.name()
        ))?;
        result
    }
}

struct UsageLogChunk {
    chunk: Chunk,
    dataset_name: String,
    log: UsageLog,
}

impl core::fmt::Debug for UsageLogChunk {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "usage log ({:?})", self.chunk)
    }
}

impl ChunkTraits for UsageLogChunk {
    fn chunk_indices(&self) -> &[u64] {
        self.chunk.chunk_indices()
    }

    fn shape(&self) -> &[u64] {
        self.chunk.shape()
    }

    fn read_region(&self, region: &ArraySubset) -> Result<Vec<u8>, BackendError> {
        let result = self.chunk.read_region(region);
        self.log.log(format_args!(
            "{}{:?}.read_region({region}) -> len={:?}",
            self.dataset_name,
            self.chunk_indices(),
            result.as_ref().map(Vec::len)
        ))?;
        result
    }

    fn write_region(&self, region: &ArraySubset, bytes: &[u8]) -> Result<(), BackendError> {
        let result = self.chunk.write_region(region, bytes);
        self.log.log(format_args!(
            "{}{:?}.write_region({region}, len={}) -> {result:?}",
            self.dataset_name,
            self.chunk_indices(),
            bytes.len()
        ))?;
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::{backend::MemoryBackend, data_type::DataType, dataset_metadata::DatasetBuilder};

    use super::*;

    #[test]
    fn usage_log_backend() {
        let log_writer = Arc::new(Mutex::new(Vec::<u8>::new()));
        let backend = UsageLogBackend::new(Arc::new(MemoryBackend::new()), log_writer.clone(), || {
            "[log] ".to_string()
        });
        assert_eq!(backend.kind(), "memory");
        let cluster = backend.open_cluster("usage_log_backend").unwrap();
        cluster.connect().unwrap();
        let pool = cluster.create_pool("pool").unwrap();
        let metadata = DatasetBuilder::new(vec![2, 2], DataType::UInt8, vec![2, 2], 0u8)
            .build("data")
            .unwrap();
        let dataset = pool.create_dataset(&metadata).unwrap();
        assert!(dataset.get_chunk(&[0, 0]).is_err());
        let chunk = dataset.create_chunk(&[0, 0]).unwrap();
        chunk
            .write_region(&ArraySubset::new_with_shape(vec![2, 2]), &[1, 2, 3, 4])
            .unwrap();
        cluster.del_pool("pool").unwrap();

        let log = String::from_utf8(log_writer.lock().clone()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[log] open_cluster(usage_log_backend) -> Ok",
                "[log] usage_log_backend.connect() -> Ok(())",
                "[log] usage_log_backend.create_pool(pool) -> Ok",
                "[log] pool.create_dataset(data, shape=[2, 2], chunk_shape=[2, 2]) -> Ok",
                "[log] data.get_chunk([0, 0]) -> Err(chunk [0, 0] does not exist)",
                "[log] data.create_chunk([0, 0]) -> Ok",
                "[log] data[0, 0].write_region(start [0, 0] shape [2, 2], len=4) -> Ok(())",
                "[log] usage_log_backend.del_pool(pool) -> Ok",
            ]
        );
    }
}
