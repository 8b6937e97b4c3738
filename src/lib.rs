//! A coordination layer for chunked n-dimensional arrays shared by a fixed group of cooperating processes.
//!
//! `distarray` organises data in a logical *cluster / pool / dataset / chunk* hierarchy.
//! The hierarchy is stored by an interchangeable [`backend`], and the [`distributed`] layer lets a fixed
//! [`group`] of processes running the same program (single-program-multiple-data) share one consistent view of it:
//!  - metadata changes (pool and dataset creation/deletion) have exactly one mutator, the root process, and are fenced on both sides,
//!  - whole-dataset operations (`load`, `map`, `apply`, `clear`) are partitioned over the chunk index space with a static round-robin rule, so every chunk has exactly one owner per operation,
//!  - handles that a backend invalidates on structural change are refreshed in lockstep across the group.
//!
//! ## Getting Started
//! - Pick a [process group](group): [`LocalProcessGroup`](group::LocalProcessGroup) runs one rank per thread, [`SingleProcessGroup`](group::SingleProcessGroup) is a group of one.
//!   Other transports implement [`ProcessGroupTraits`](group::ProcessGroupTraits).
//! - Pick a [backend](backend) by kind name (`memory`, `memory_session`, `filesystem`) in a [`ClusterConfig`](config::ClusterConfig).
//! - Open a [`DistributedCluster`](distributed::DistributedCluster) on every rank and issue the same collective calls in the same order.
//!
//! ## Example
//! ```rust
//! # use distarray::{config::ClusterConfig, data_type::DataType, dataset_metadata::DatasetBuilder};
//! # use distarray::distributed::DistributedCluster;
//! # use distarray::group::LocalProcessGroup;
//! let results = LocalProcessGroup::run(3, |group| -> Result<Vec<f32>, Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ClusterConfig::new("memory", "doc_example_cluster");
//!     let mut cluster = DistributedCluster::open(&config, group)?;
//!     let pool = cluster.create_pool("pool")?;
//!     let metadata = DatasetBuilder::new(vec![4, 4], DataType::Float32, vec![2, 2], 0.0f32).build("data")?;
//!     let dataset = pool.create_dataset(&metadata)?;
//!     let data = ndarray::Array2::<f32>::ones((4, 4)).into_dyn();
//!     dataset.load(&data)?;
//!     dataset.apply(|chunk: ndarray::ArrayD<f32>| chunk * 2.0)?;
//!     let chunk = dataset.retrieve_chunk_ndarray::<f32>(&[1, 1])?;
//!     dataset.delete()?;
//!     cluster.del_pool("pool")?;
//!     Ok(chunk.iter().copied().collect())
//! });
//! for result in results {
//!     assert_eq!(result.unwrap(), vec![2.0; 4]);
//! }
//! ```
//!
//! ## Collective calls
//! Every operation documented as *collective* must be called by every rank of the group, in the same order, with the same arguments.
//! This is a precondition, not something checked at runtime (see [`Config`](config::Config) for an optional debug check).
//! A collective call issued by a strict subset of the group blocks forever.
//!
//! ## Crate Features
//! #### Default
//!  - `filesystem`: the [`filesystem`](backend::filesystem) backend.
//!
//! ## Licence
//! `distarray` is licensed under either of
//!  - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license <http://opensource.org/licenses/MIT>, at your option.

#![warn(unused_variables)]
#![warn(dead_code)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod array_subset;
pub mod backend;
pub mod chunk_grid;
pub mod config;
pub mod data_type;
pub mod dataset_metadata;
pub mod distributed;
pub mod fill_value;
pub mod group;
pub mod name;
pub mod plugin;

/// An ND index to an element in an array or chunk grid.
pub type ArrayIndices = Vec<u64>;

/// The shape of an array or chunk.
pub type ArrayShape = Vec<u64>;

/// Unravel a linearised index to ND indices.
#[must_use]
pub fn unravel_index(mut index: u64, shape: &[u64]) -> ArrayIndices {
    let mut indices = vec![0; shape.len()];
    for (indices_i, &dim) in std::iter::zip(indices.iter_mut().rev(), shape.iter().rev()) {
        *indices_i = index % dim;
        index /= dim;
    }
    indices
}

/// Ravel ND indices to a linearised index.
#[must_use]
pub fn ravel_indices(indices: &[u64], shape: &[u64]) -> u64 {
    let mut index: u64 = 0;
    let mut count = 1;
    for (i, s) in std::iter::zip(indices, shape).rev() {
        index += i * count;
        count *= s;
    }
    index
}

fn iter_u64_to_usize<'a, I: Iterator<Item = &'a u64>>(iter: I) -> Vec<usize> {
    iter.map(|v| usize::try_from(*v).unwrap_or(usize::MAX))
        .collect::<Vec<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ravel_unravel() {
        let shape = [2, 3, 4];
        for index in 0..24 {
            let indices = unravel_index(index, &shape);
            assert_eq!(ravel_indices(&indices, &shape), index);
        }
        assert_eq!(unravel_index(23, &shape), vec![1, 2, 3]);
        assert_eq!(unravel_index(5, &shape), vec![0, 1, 1]);
    }
}
