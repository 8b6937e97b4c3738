//! The distributed coordination layer.
//!
//! Every rank of a [process group](crate::group) holds its own [`DistributedCluster`], [`DistributedPool`], [`DistributedDataset`] and [`DistributedChunk`] handles wrapping the same backend objects.
//! The handles coordinate through the two collective primitives of the group (`barrier` and `broadcast`):
//!  - **root-only mutation**: pool, dataset and explicit chunk creation/deletion are issued by the root rank only.
//!    The root broadcasts the outcome, so no rank leaves the call before the change is applied (or before learning that it failed).
//!    Deletions also drain outstanding work with a leading barrier.
//!  - **handle refresh**: if the backend [requires reconnection after structural changes](crate::backend::BackendTraits::requires_reconnect_after_structural_change),
//!    every rank replaces its cluster handle in lockstep after a pool is created or deleted.
//!  - **bulk operations** (`load`, `map`, `apply`, `clear`) are partitioned over the flat chunk ordinals with a [`RoundRobinPartition`].
//!    Each rank touches only the chunks of its own shard, then joins a trailing barrier.
//!
//! Methods documented as **collective** must be called by every rank, in the same order, with the same arguments.
//! Other methods are independent per-rank operations.

mod chunk;
mod cluster;
mod collective;
mod dataset;
mod distributed_errors;
mod partition;
mod pool;

pub use chunk::DistributedChunk;
pub use cluster::DistributedCluster;
pub use dataset::DistributedDataset;
pub use distributed_errors::DistributedError;
use distributed_errors::SharedError;
pub use partition::RoundRobinPartition;
pub use pool::DistributedPool;
