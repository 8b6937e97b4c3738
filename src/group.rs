//! Process groups.
//!
//! A process group is a fixed set of `size` cooperating processes running the same program.
//! Each process has a rank in `[0, size)`; rank `0` is the root.
//! The group provides the two collective primitives the [`distributed`](crate::distributed) layer is built on:
//!  - [`barrier`](ProcessGroupTraits::barrier): block until every rank has called it, and
//!  - [`broadcast_bytes`](ProcessGroupTraits::broadcast_bytes): return the bytes supplied by one rank on every rank.
//!
//! Both must be called by every rank in the same relative order.
//! Calling either from a strict subset of the group, or in divergent order, is a protocol violation that deadlocks or corrupts the exchange.
//!
//! This crate includes
//!  - [`LocalProcessGroup`]: one rank per thread, for in-process simulation and tests, and
//!  - [`SingleProcessGroup`]: a group with one rank, for which every collective is trivial.
//!
//! Other transports (e.g. MPI or a TCP rendezvous) are supported by implementing [`ProcessGroupTraits`].

mod local;
mod single;

pub use local::LocalProcessGroup;
pub use single::SingleProcessGroup;

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// A process group error.
#[derive(Clone, Debug, Error)]
pub enum ProcessGroupError {
    /// The root rank is not in the group.
    #[error("root rank {_0} is out of range for a group of size {_1}")]
    InvalidRoot(usize, usize),
    /// The root rank did not supply a value to broadcast.
    #[error("the root rank {_0} did not supply a value to broadcast")]
    MissingRootValue(usize),
    /// A broadcast value could not be serialized or deserialized.
    #[error("broadcast value serialization failed: {_0}")]
    Serialization(String),
    /// The group was aborted because a rank failed.
    #[error("the process group was aborted")]
    Aborted,
    /// A transport error.
    #[error("{_0}")]
    Transport(String),
}

/// Process group traits.
pub trait ProcessGroupTraits: core::fmt::Debug + Send + Sync {
    /// The rank of this process in `[0, size)`.
    fn rank(&self) -> usize;

    /// The number of processes in the group.
    fn size(&self) -> usize;

    /// Returns true if this process is the root (rank `0`).
    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Block until every rank of the group has called `barrier`.
    ///
    /// # Errors
    /// Returns a [`ProcessGroupError`] if the transport fails or the group is aborted.
    fn barrier(&self) -> Result<(), ProcessGroupError>;

    /// Broadcast `bytes` from rank `root` to every rank.
    ///
    /// Returns the bytes supplied by `root` on every rank, including `root` itself.
    /// `bytes` is ignored on non-root ranks.
    /// The root blocks until every rank has received the value.
    ///
    /// # Errors
    /// Returns a [`ProcessGroupError`] if `root` is not in the group, the transport fails, or the group is aborted.
    fn broadcast_bytes(&self, bytes: Vec<u8>, root: usize) -> Result<Vec<u8>, ProcessGroupError>;

    /// Returns true if every rank of the group runs in the same address space.
    ///
    /// Backends with process-local state are only shared by such a group.
    fn shares_address_space(&self) -> bool;
}

/// A process group handle shared by every operation of one rank.
pub type ProcessGroup = Arc<dyn ProcessGroupTraits>;

/// Broadcast a serializable value from rank `root` to every rank.
///
/// `value` must be [`Some`] on `root` and is ignored elsewhere.
/// Values are transmitted as JSON, so they must be plain data.
///
/// # Errors
/// Returns a [`ProcessGroupError`] if
///  - `root` is out of range,
///  - `root` supplied [`None`] (every rank fails together),
///  - serialization fails, or
///  - the transport fails.
pub fn broadcast<T: Serialize + DeserializeOwned>(
    group: &dyn ProcessGroupTraits,
    value: Option<&T>,
    root: usize,
) -> Result<T, ProcessGroupError> {
    if root >= group.size() {
        return Err(ProcessGroupError::InvalidRoot(root, group.size()));
    }
    // A root that cannot supply a value still takes part in the exchange (with no bytes) so other ranks fail instead of blocking.
    let (bytes, serialize_error) = match value {
        Some(value) if group.rank() == root => match serde_json::to_vec(value) {
            Ok(bytes) => (bytes, None),
            Err(err) => (Vec::new(), Some(err)),
        },
        _ => (Vec::new(), None),
    };
    let bytes = group.broadcast_bytes(bytes, root)?;
    if let Some(err) = serialize_error {
        return Err(ProcessGroupError::Serialization(err.to_string()));
    }
    if bytes.is_empty() {
        return Err(ProcessGroupError::MissingRootValue(root));
    }
    serde_json::from_slice(&bytes).map_err(|err| ProcessGroupError::Serialization(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_group_broadcast_typed() {
        let results = LocalProcessGroup::run(4, |group| {
            let value = (group.rank() == 2).then(|| vec![1u64, 2, 3]);
            broadcast(group.as_ref(), value.as_ref(), 2)
        });
        for result in results {
            assert_eq!(result.unwrap(), vec![1, 2, 3]);
        }
    }

    #[test]
    fn process_group_broadcast_missing_root_value() {
        let results = LocalProcessGroup::run(3, |group| {
            broadcast::<String>(group.as_ref(), None, 0)
        });
        for result in results {
            assert!(matches!(
                result,
                Err(ProcessGroupError::MissingRootValue(0))
            ));
        }
    }

    #[test]
    fn process_group_broadcast_invalid_root() {
        let group = SingleProcessGroup::new();
        assert!(matches!(
            broadcast(&group, Some(&1u8), 1),
            Err(ProcessGroupError::InvalidRoot(1, 1))
        ));
        assert_eq!(broadcast(&group, Some(&1u8), 0).unwrap(), 1);
    }
}
