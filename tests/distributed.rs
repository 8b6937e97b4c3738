use distarray::{
    array_subset::ArraySubset,
    backend::{BackendError, PoolOptions},
    config::{global_config_mut, ClusterConfig},
    data_type::DataType,
    dataset_metadata::{DatasetBuilder, DatasetMetadata},
    distributed::{DistributedCluster, DistributedError},
    group::{LocalProcessGroup, ProcessGroup, SingleProcessGroup},
};
use ndarray::{array, ArrayD};

fn open_cluster(backend: &str, name: &str, group: ProcessGroup) -> DistributedCluster {
    DistributedCluster::open(&ClusterConfig::new(backend, name), group).unwrap()
}

fn metadata_4x4() -> DatasetMetadata {
    DatasetBuilder::new(vec![4, 4], DataType::Int32, vec![2, 2], 0i32)
        .build("data")
        .unwrap()
}

fn sequential_4x4() -> ArrayD<i32> {
    ArrayD::from_shape_vec(vec![4, 4], (0..16).collect()).unwrap()
}

#[test]
fn distributed_load_apply_top_left_chunk() {
    let results = LocalProcessGroup::run(3, |group| {
        let mut cluster = open_cluster("memory", "distributed_load_apply_top_left_chunk", group);
        let pool = cluster.create_pool("pool").unwrap();
        let dataset = pool.create_dataset(&metadata_4x4()).unwrap();
        assert_eq!(dataset.total_chunks(), 4);
        dataset.load(&sequential_4x4()).unwrap();
        dataset.apply(|chunk: ArrayD<i32>| chunk + 1).unwrap();
        dataset.retrieve_chunk_ndarray::<i32>(&[0, 0]).unwrap()
    });
    for chunk in results {
        assert_eq!(chunk, array![[1, 2], [5, 6]].into_dyn());
    }
}

#[test]
fn distributed_shards() {
    let results = LocalProcessGroup::run(3, |group| {
        let mut cluster = open_cluster("memory", "distributed_shards", group);
        let pool = cluster.create_pool("pool").unwrap();
        let metadata = DatasetBuilder::new(vec![10], DataType::UInt8, vec![1], 0u8)
            .build("data")
            .unwrap();
        let dataset = pool.create_dataset(&metadata).unwrap();
        dataset.shard().iter().collect::<Vec<u64>>()
    });
    assert_eq!(results, vec![vec![0, 3, 6, 9], vec![1, 4, 7], vec![2, 5, 8]]);
}

#[test]
fn distributed_load_round_trip() {
    let data = ArrayD::from_shape_vec(
        vec![7, 5, 3],
        (0..105).map(|i| i as f32 * 0.5).collect(),
    )
    .unwrap();
    for size in 1..=5 {
        let cluster_name = format!("distributed_load_round_trip_{size}");
        let results = LocalProcessGroup::run(size, |group| {
            let mut cluster = open_cluster("memory", &cluster_name, group);
            let pool = cluster.create_pool("pool").unwrap();
            let metadata =
                DatasetBuilder::new(vec![7, 5, 3], DataType::Float32, vec![3, 2, 2], -1.0f32)
                    .build("data")
                    .unwrap();
            let dataset = pool.create_dataset(&metadata).unwrap();
            dataset.load(&data).unwrap();
            let chunks_present = (0..dataset.total_chunks())
                .map(|ordinal| {
                    let chunk_indices = dataset.chunk_grid().chunk_indices_from_flat(ordinal).unwrap();
                    dataset.has_chunk(&chunk_indices).unwrap()
                })
                .all(|present| present);
            (chunks_present, dataset.retrieve_ndarray::<f32>().unwrap())
        });
        for (chunks_present, retrieved) in results {
            assert!(chunks_present);
            assert_eq!(retrieved, data);
        }
    }
}

#[test]
fn distributed_load_concurrent_shards() {
    global_config_mut().set_shard_concurrent_limit(4);
    let data = ArrayD::from_shape_vec(vec![32, 32], (0..1024u32).collect()).unwrap();
    let results = LocalProcessGroup::run(2, |group| {
        let mut cluster = open_cluster("memory", "distributed_load_concurrent_shards", group);
        let pool = cluster.create_pool("pool").unwrap();
        let metadata = DatasetBuilder::new(vec![32, 32], DataType::UInt32, vec![4, 4], 0u32)
            .build("data")
            .unwrap();
        let dataset = pool.create_dataset(&metadata).unwrap();
        dataset.load(&data).unwrap();
        dataset.apply(|chunk: ArrayD<u32>| chunk * 2).unwrap();
        dataset.retrieve_ndarray::<u32>().unwrap()
    });
    global_config_mut().set_shard_concurrent_limit(1);
    for retrieved in results {
        assert_eq!(retrieved, &data * 2);
    }
}

#[test]
fn distributed_load_shape_mismatch() {
    let results = LocalProcessGroup::run(3, |group| {
        let mut cluster = open_cluster("memory", "distributed_load_shape_mismatch", group);
        let pool = cluster.create_pool("pool").unwrap();
        let dataset = pool.create_dataset(&metadata_4x4()).unwrap();
        let data = ArrayD::<i32>::zeros(vec![4, 5]);
        let error = dataset.load(&data).unwrap_err();
        assert!(matches!(
            error,
            DistributedError::ShapeMismatch { ref expected, ref got } if expected == &[4, 4] && got == &[4, 5]
        ));
        let any_chunk = (0..dataset.total_chunks()).any(|ordinal| {
            let chunk_indices = dataset.chunk_grid().chunk_indices_from_flat(ordinal).unwrap();
            dataset.has_chunk(&chunk_indices).unwrap()
        });

        // Creating with mismatched initial data creates nothing
        let metadata = DatasetBuilder::from_metadata(&metadata_4x4()).build("initial").unwrap();
        assert!(matches!(
            pool.create_dataset_with_data(&metadata, &data),
            Err(DistributedError::ShapeMismatch { .. })
        ));
        (any_chunk, pool.has_dataset("initial").unwrap())
    });
    assert!(results.iter().all(|result| result == &(false, false)));
}

#[test]
fn distributed_map() {
    let results = LocalProcessGroup::run(4, |group| {
        let mut cluster = open_cluster("memory", "distributed_map", group);
        let pool = cluster.create_pool("pool").unwrap();
        let source = pool
            .create_dataset_with_data(&metadata_4x4(), &sequential_4x4())
            .unwrap();
        let output = source
            .map(|chunk: ArrayD<i32>| chunk.mapv(|x| x * x), "squared")
            .unwrap();
        assert_eq!(output.name(), "squared");
        assert!(pool.has_dataset("squared").unwrap());
        (
            source.retrieve_ndarray::<i32>().unwrap(),
            output.retrieve_ndarray::<i32>().unwrap(),
        )
    });
    let expected_source = sequential_4x4();
    let expected_output = sequential_4x4().mapv(|x| x * x);
    for (source, output) in results {
        assert_eq!(source, expected_source);
        assert_eq!(output, expected_output);
    }
}

#[test]
fn distributed_apply_identity() {
    let results = LocalProcessGroup::run(2, |group| {
        let mut cluster = open_cluster("memory", "distributed_apply_identity", group);
        let pool = cluster.create_pool("pool").unwrap();
        let metadata = DatasetBuilder::new(vec![5, 3], DataType::Float64, vec![2, 2], 0.5f64)
            .build("data")
            .unwrap();
        let dataset = pool.create_dataset(&metadata).unwrap();
        let data = ArrayD::from_shape_vec(vec![5, 3], (0..15).map(f64::from).collect()).unwrap();
        dataset.load(&data).unwrap();
        dataset.apply(|chunk: ArrayD<f64>| chunk).unwrap();
        (data, dataset.retrieve_ndarray::<f64>().unwrap())
    });
    for (data, retrieved) in results {
        assert_eq!(data, retrieved);
    }
}

#[test]
fn distributed_clone_as() {
    let results = LocalProcessGroup::run(3, |group| {
        let mut cluster = open_cluster("memory", "distributed_clone_as", group);
        let pool = cluster.create_pool("pool").unwrap();
        let metadata = DatasetBuilder::new(vec![9, 4], DataType::Int16, vec![4, 3], 3i16)
            .build("data")
            .unwrap();
        let source = pool.create_dataset(&metadata).unwrap();
        let clone = source.clone_as("copy").unwrap();
        assert!(pool.has_dataset("copy").unwrap());
        assert!(clone.metadata().same_layout(source.metadata()));
        assert_eq!(clone.total_chunks(), source.total_chunks());

        // Clones are empty
        assert_eq!(
            clone.retrieve_ndarray::<i16>().unwrap(),
            ArrayD::from_elem(vec![9, 4], 3i16)
        );

        // A clone onto an existing name fails on every rank
        let error = source.clone_as("data").unwrap_err();
        (clone.metadata().clone(), error.to_string())
    });
    for (metadata, error) in results {
        assert_eq!(metadata.name(), "copy");
        assert_eq!(metadata.shape(), &[9, 4]);
        assert_eq!(metadata.chunk_shape(), &[4, 3]);
        assert_eq!(metadata.data_type(), DataType::Int16);
        assert_eq!(metadata.fill_value().as_ne_bytes(), 3i16.to_ne_bytes());
        assert_eq!(error, "dataset data already exists");
    }
}

#[test]
fn distributed_existence_visibility() {
    let results = LocalProcessGroup::run(4, |group| {
        let mut cluster = open_cluster("memory", "distributed_existence_visibility", group);
        let mut visibility = Vec::new();
        let pool = cluster.create_pool("pool").unwrap();
        visibility.push(cluster.has_pool("pool").unwrap());
        let dataset = pool.create_dataset(&metadata_4x4()).unwrap();
        visibility.push(pool.has_dataset("data").unwrap());
        assert_eq!(pool.list_datasets().unwrap(), vec!["data".to_string()]);
        dataset.delete().unwrap();
        visibility.push(pool.has_dataset("data").unwrap());

        pool.create_dataset(&metadata_4x4()).unwrap();
        pool.del_dataset("data").unwrap();
        visibility.push(pool.has_dataset("data").unwrap());

        assert_eq!(cluster.list_pools().unwrap(), vec!["pool".to_string()]);
        cluster.del_pool("pool").unwrap();
        visibility.push(cluster.has_pool("pool").unwrap());
        visibility
    });
    for visibility in results {
        assert_eq!(visibility, vec![true, true, false, false, false]);
    }
}

#[test]
fn distributed_session_backend_reconnects() {
    let results = LocalProcessGroup::run(3, |group| {
        let mut cluster =
            open_cluster("memory_session", "distributed_session_backend_reconnects", group);
        assert!(cluster.backend().requires_reconnect_after_structural_change());
        let pool = cluster.create_pool("pool").unwrap();
        let dataset = pool
            .create_dataset_with_data(&metadata_4x4(), &sequential_4x4())
            .unwrap();
        let created = cluster.has_pool("pool").unwrap();
        let retrieved = dataset.retrieve_ndarray::<i32>().unwrap();
        cluster.create_pool("other").unwrap();
        let pools = cluster.list_pools().unwrap();
        cluster.del_pool("pool").unwrap();
        let deleted = !cluster.has_pool("pool").unwrap();
        (created, retrieved, pools, deleted, cluster.is_connected())
    });
    for (created, retrieved, pools, deleted, connected) in results {
        assert!(created);
        assert_eq!(retrieved, sequential_4x4());
        assert_eq!(pools, vec!["other".to_string(), "pool".to_string()]);
        assert!(deleted);
        assert!(connected);
    }
}

#[test]
fn distributed_pool_options() {
    let mut options = PoolOptions::new();
    options.insert("replicas".to_string(), 3.into());
    let results = LocalProcessGroup::run(3, |group| {
        let mut cluster = open_cluster("memory_session", "distributed_pool_options", group);
        let pool = cluster.create_pool_opt("pool", &options).unwrap();
        let plain = cluster.create_pool("plain").unwrap();
        (pool.options().clone(), plain.options().is_empty())
    });
    for (pool_options, plain_empty) in results {
        assert_eq!(pool_options, options);
        assert!(plain_empty);
    }
}

#[test]
fn distributed_root_failure_propagates() {
    let results = LocalProcessGroup::run(3, |group| {
        let mut cluster = open_cluster("memory", "distributed_root_failure_propagates", group);
        cluster.create_pool("pool").unwrap();
        let conflict = cluster.create_pool("pool").unwrap_err();
        let not_found = cluster.del_pool("missing").unwrap_err();
        // The group is still usable
        cluster.del_pool("pool").unwrap();
        (conflict, not_found)
    });
    // Every rank sees the same error kind
    for (conflict, not_found) in results {
        assert!(matches!(
            conflict,
            DistributedError::Backend(BackendError::PoolConflict(name)) if name == "pool"
        ));
        assert!(matches!(
            not_found,
            DistributedError::Backend(BackendError::PoolNotFound(name)) if name == "missing"
        ));
    }
}

#[test]
fn distributed_chunks() {
    let results = LocalProcessGroup::run(3, |group| {
        let rank = group.rank();
        let mut cluster = open_cluster("memory", "distributed_chunks", group);
        let pool = cluster.create_pool("pool").unwrap();
        let dataset = pool.create_dataset(&metadata_4x4()).unwrap();
        let chunk = dataset.create_chunk(&[1, 1]).unwrap();
        assert_eq!(chunk.chunk_indices(), &[1, 1]);
        assert_eq!(chunk.shape(), &[2, 2]);
        assert!(matches!(
            dataset.create_chunk(&[1, 1]),
            Err(DistributedError::Backend(BackendError::ChunkConflict(_)))
        ));

        // The owner of chunk ordinal 3 writes it, everyone reads it after a fence
        if dataset.shard().contains(3) {
            chunk
                .store_ndarray(&array![[1i32, 2], [3, 4]].into_dyn())
                .unwrap();
        }
        cluster.group().barrier().unwrap();
        let chunk = dataset.get_chunk(&[1, 1]).unwrap();
        let region = chunk
            .read_region(&ArraySubset::new_with_ranges(&[1..2, 0..2]))
            .unwrap();
        let full = chunk.retrieve_ndarray::<i32>().unwrap();

        // Every rank has read the chunk before its owner clears it
        cluster.group().barrier().unwrap();
        dataset.clear().unwrap();
        let cleared = !dataset.has_chunk(&[1, 1]).unwrap();
        (rank, bytemuck::pod_collect_to_vec::<u8, i32>(&region), full, cleared)
    });
    for (rank, region, full, cleared) in results {
        assert_eq!(region, vec![3, 4], "rank {rank}");
        assert_eq!(full, array![[1, 2], [3, 4]].into_dyn());
        assert!(cleared);
    }
}

#[test]
fn distributed_single_process_group() {
    let group = SingleProcessGroup::new_handle();
    let mut cluster = open_cluster("memory", "distributed_single_process_group", group);
    let pool = cluster.create_pool("pool").unwrap();
    assert_eq!(pool.name(), "pool");
    let dataset = pool
        .create_dataset_with_data(&metadata_4x4(), &sequential_4x4())
        .unwrap();
    assert_eq!(dataset.shard().len(), 4);
    let doubled = dataset.map(|chunk: ArrayD<i32>| chunk * 2, "doubled").unwrap();
    assert_eq!(
        doubled.retrieve_array_subset_ndarray::<i32>(&ArraySubset::new_with_ranges(&[3..4, 0..4])).unwrap(),
        array![[24, 26, 28, 30]].into_dyn()
    );
    pool.close();
    assert!(!pool.is_open());
    pool.open().unwrap();
    assert!(pool.is_open());
    cluster.del_pool("pool").unwrap();
    assert!(cluster.list_pools().unwrap().is_empty());
}

#[test]
fn distributed_rank_panic_aborts_group() {
    let result = std::panic::catch_unwind(|| {
        LocalProcessGroup::run(3, |group| {
            let mut cluster = open_cluster("memory", "distributed_rank_panic_aborts_group", group.clone());
            if group.rank() == 2 {
                panic!("rank 2 failed");
            }
            // The other ranks fail instead of blocking
            assert!(matches!(
                cluster.create_pool("pool"),
                Err(DistributedError::ProcessGroup(_))
            ));
        })
    });
    assert!(result.is_err());
}

#[test]
fn distributed_usage_log() {
    use distarray::backend::{MemoryBackend, UsageLogBackend};
    use std::sync::Arc;

    let log_writer = Arc::new(parking_lot::Mutex::new(Vec::<u8>::new()));
    let backend = Arc::new(UsageLogBackend::new(
        Arc::new(MemoryBackend::new()),
        log_writer.clone(),
        || chrono::Utc::now().format("[%T%.3f] ").to_string(),
    ));
    let config = ClusterConfig::new("memory", "distributed_usage_log");
    let results = LocalProcessGroup::run(2, |group| {
        let mut cluster =
            DistributedCluster::open_with_backend(backend.clone(), &config, group).unwrap();
        let pool = cluster.create_pool("pool").unwrap();
        let dataset = pool
            .create_dataset_with_data(&metadata_4x4(), &sequential_4x4())
            .unwrap();
        dataset.retrieve_chunk_ndarray::<i32>(&[1, 1]).unwrap()
    });
    for chunk in results {
        assert_eq!(chunk, array![[10, 11], [14, 15]].into_dyn());
    }

    let log = String::from_utf8(log_writer.lock().clone()).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(
        lines
            .iter()
            .filter(|line| line.ends_with("open_cluster(distributed_usage_log) -> Ok"))
            .count(),
        2
    );
    // Only the root mutates
    assert_eq!(
        lines
            .iter()
            .filter(|line| line.contains("create_pool(pool)"))
            .count(),
        1
    );
    assert!(lines.iter().all(|line| line.starts_with('[')));
}
