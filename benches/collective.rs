use criterion::{
    criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion, PlotConfiguration,
    Throughput,
};
use distarray::{
    config::ClusterConfig, data_type::DataType, dataset_metadata::DatasetBuilder,
    distributed::DistributedCluster, group::LocalProcessGroup,
};
use ndarray::ArrayD;

fn collective_load_apply(c: &mut Criterion) {
    let plot_config = PlotConfiguration::default().summary_scale(AxisScale::Logarithmic);
    let mut group = c.benchmark_group("collective_load_apply");
    group.plot_config(plot_config);

    for size in [64u64, 256, 512] {
        let num_elements = size * size;
        let data = ArrayD::from_shape_vec(
            vec![size as usize, size as usize],
            (0..num_elements).map(|i| i as f32).collect(),
        )
        .unwrap();
        group.throughput(Throughput::Bytes(num_elements * 4));
        for num_ranks in [1, 2, 4] {
            let cluster_name = format!("bench_{size}_{num_ranks}");
            group.bench_function(BenchmarkId::new(format!("ranks_{num_ranks}"), size), |b| {
                b.iter(|| {
                    LocalProcessGroup::run(num_ranks, |process_group| {
                        let config = ClusterConfig::new("memory", &cluster_name);
                        let mut cluster = DistributedCluster::open(&config, process_group).unwrap();
                        let pool = cluster.create_pool("pool").unwrap();
                        let metadata = DatasetBuilder::new(
                            vec![size, size],
                            DataType::Float32,
                            vec![32, 32],
                            0.0f32,
                        )
                        .build("data")
                        .unwrap();
                        let dataset = pool.create_dataset_with_data(&metadata, &data).unwrap();
                        dataset.apply(|chunk: ArrayD<f32>| chunk * 2.0).unwrap();
                        cluster.del_pool("pool").unwrap();
                    });
                });
            });
        }
    }
}

criterion_group!(benches, collective_load_apply);
criterion_main!(benches);
