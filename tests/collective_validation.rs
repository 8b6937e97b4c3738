use distarray::{
    config::{global_config_mut, ClusterConfig},
    data_type::DataType,
    dataset_metadata::DatasetBuilder,
    distributed::{DistributedCluster, DistributedError},
    group::LocalProcessGroup,
};
use ndarray::ArrayD;

// Collective call validation is global, so every test in this binary enables it.
fn enable_validation() {
    global_config_mut().set_validate_collective_calls(true);
}

#[test]
fn collective_validation_divergent_pool_names() {
    enable_validation();
    let results = LocalProcessGroup::run(3, |group| {
        let rank = group.rank();
        let config = ClusterConfig::new("memory", "collective_validation_divergent_pool_names");
        let mut cluster = DistributedCluster::open(&config, group).unwrap();
        let name = if rank == 2 { "b" } else { "a" };
        let error = cluster.create_pool(name).unwrap_err();
        (error, cluster.list_pools().unwrap())
    });
    for (error, pools) in results {
        match error {
            DistributedError::CollectiveProtocolViolation { expected, got } => {
                assert_eq!(expected, "create_pool(a)");
                assert_eq!(got, "create_pool(b)");
            }
            error => panic!("unexpected error {error}"),
        }
        assert!(pools.is_empty());
    }
}

#[test]
fn collective_validation_divergent_operations() {
    enable_validation();
    let results = LocalProcessGroup::run(2, |group| {
        let rank = group.rank();
        let config = ClusterConfig::new("memory", "collective_validation_divergent_operations");
        let mut cluster = DistributedCluster::open(&config, group).unwrap();
        let pool = cluster.create_pool("pool").unwrap();
        let metadata = DatasetBuilder::new(vec![4], DataType::UInt8, vec![2], 0u8)
            .build("data")
            .unwrap();
        let dataset = pool.create_dataset(&metadata).unwrap();
        let result = if rank == 0 {
            dataset.clear()
        } else {
            dataset.load(&ArrayD::<u8>::zeros(vec![4]))
        };
        // Matching calls still succeed afterwards
        dataset.load(&ArrayD::<u8>::ones(vec![4])).unwrap();
        (
            matches!(result, Err(DistributedError::CollectiveProtocolViolation { .. })),
            dataset.retrieve_ndarray::<u8>().unwrap(),
        )
    });
    for (violation, data) in results {
        assert!(violation);
        assert_eq!(data, ArrayD::<u8>::ones(vec![4]));
    }
}

#[test]
fn collective_validation_map_against_clone() {
    enable_validation();
    let results = LocalProcessGroup::run(2, |group| {
        let rank = group.rank();
        let config = ClusterConfig::new("memory", "collective_validation_map_against_clone");
        let mut cluster = DistributedCluster::open(&config, group).unwrap();
        let pool = cluster.create_pool("pool").unwrap();
        let metadata = DatasetBuilder::new(vec![4], DataType::UInt8, vec![2], 0u8)
            .build("data")
            .unwrap();
        let dataset = pool.create_dataset(&metadata).unwrap();
        let error = if rank == 0 {
            dataset.map(|chunk: ArrayD<u8>| chunk, "out").map(|_| ()).unwrap_err()
        } else {
            dataset.clone_as("out").map(|_| ()).unwrap_err()
        };
        (error, pool.has_dataset("out").unwrap())
    });
    for (error, has_output) in results {
        match error {
            DistributedError::CollectiveProtocolViolation { expected, got } => {
                assert_eq!(expected, "map(data, out)");
                assert_eq!(got, "clone_as(data, out)");
            }
            error => panic!("unexpected error {error}"),
        }
        assert!(!has_output);
    }
}
