use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    array_subset::IncompatibleDimensionalityError,
    backend::BackendError,
    chunk_grid::{InvalidChunkGridIndicesError, InvalidChunkOrdinalError},
    data_type::IncompatibleElementTypeError,
    dataset_metadata::DatasetMetadataError,
    group::ProcessGroupError,
    name::NodeNameError,
    ArrayIndices, ArrayShape,
};

/// A distributed operation error.
#[derive(Debug, Error)]
pub enum DistributedError {
    /// The shape of supplied data does not match the dataset shape.
    #[error("data shape {got:?} does not match the dataset shape {expected:?}")]
    ShapeMismatch {
        /// The dataset shape.
        expected: ArrayShape,
        /// The data shape.
        got: ArrayShape,
    },
    /// A backend error, surfaced unchanged.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A process group error.
    #[error(transparent)]
    ProcessGroup(#[from] ProcessGroupError),
    /// A root-only operation failed on the root rank with an error that has no shared form.
    ///
    /// Returned on non-root ranks; the root returns the original error.
    /// Backend and shape errors are rebuilt as the same variant on every rank instead.
    #[error("root operation failed: {0}")]
    RootOperationFailed(String),
    /// Ranks issued divergent collective calls.
    ///
    /// Only detected if [collective call validation](crate::config::Config#validate-collective-calls) is enabled.
    #[error("collective protocol violation: the root called {expected}, a rank called {got}")]
    CollectiveProtocolViolation {
        /// The call issued by the root.
        expected: String,
        /// The divergent call.
        got: String,
    },
    /// The element type does not match the dataset data type.
    #[error(transparent)]
    IncompatibleElementType(#[from] IncompatibleElementTypeError),
    /// A transform returned an array with a different shape to its input.
    #[error("transform output shape {got:?} does not match the input shape {expected:?}")]
    TransformShapeMismatch {
        /// The input chunk shape.
        expected: ArrayShape,
        /// The output shape.
        got: ArrayShape,
    },
    /// Invalid chunk grid indices.
    #[error(transparent)]
    InvalidChunkIndices(#[from] InvalidChunkGridIndicesError),
    /// An invalid chunk ordinal.
    #[error(transparent)]
    InvalidChunkOrdinal(#[from] InvalidChunkOrdinalError),
    /// Invalid dataset metadata.
    #[error(transparent)]
    DatasetMetadata(#[from] DatasetMetadataError),
    /// A region has the wrong dimensionality.
    #[error(transparent)]
    IncompatibleDimensionality(#[from] IncompatibleDimensionalityError),
    /// An array subset is out of the bounds of the dataset.
    #[error("array subset {0} is out of bounds of the dataset shape {1:?}")]
    ArraySubsetOutOfBounds(crate::array_subset::ArraySubset, ArrayShape),
    /// An ndarray shape error.
    #[error(transparent)]
    NdarrayShape(#[from] ndarray::ShapeError),
}

/// The form of a root error broadcast to the other ranks of a group.
///
/// Every rank rebuilds the same [`DistributedError`] variant from it, so callers branching on the error kind stay in step.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum SharedError {
    PoolConflict(String),
    PoolNotFound(String),
    DatasetConflict(String),
    DatasetNotFound(String),
    ChunkConflict(ArrayIndices),
    ChunkNotFound(ArrayIndices),
    NotConnected(String),
    InvalidRegion(String),
    UnknownBackend(String),
    InvalidName(String),
    InvalidMetadata(String),
    BackendOther(String),
    ShapeMismatch { expected: ArrayShape, got: ArrayShape },
    TransformShapeMismatch { expected: ArrayShape, got: ArrayShape },
    CollectiveProtocolViolation { expected: String, got: String },
    /// The message of an error with no shared form.
    Message(String),
}

impl From<&DistributedError> for SharedError {
    fn from(err: &DistributedError) -> Self {
        match err {
            DistributedError::Backend(err) => match err {
                BackendError::PoolConflict(name) => Self::PoolConflict(name.clone()),
                BackendError::PoolNotFound(name) => Self::PoolNotFound(name.clone()),
                BackendError::DatasetConflict(name) => Self::DatasetConflict(name.clone()),
                BackendError::DatasetNotFound(name) => Self::DatasetNotFound(name.clone()),
                BackendError::ChunkConflict(indices) => Self::ChunkConflict(indices.clone()),
                BackendError::ChunkNotFound(indices) => Self::ChunkNotFound(indices.clone()),
                BackendError::NotConnected(name) => Self::NotConnected(name.clone()),
                BackendError::InvalidRegion(msg) => Self::InvalidRegion(msg.clone()),
                BackendError::UnknownBackend(name) => Self::UnknownBackend(name.clone()),
                BackendError::InvalidName(err) => Self::InvalidName(err.0.clone()),
                BackendError::InvalidMetadata(msg) => Self::InvalidMetadata(msg.clone()),
                BackendError::Other(msg) => Self::BackendOther(msg.clone()),
                BackendError::IOError(_) => Self::Message(err.to_string()),
            },
            DistributedError::ShapeMismatch { expected, got } => Self::ShapeMismatch {
                expected: expected.clone(),
                got: got.clone(),
            },
            DistributedError::TransformShapeMismatch { expected, got } => {
                Self::TransformShapeMismatch {
                    expected: expected.clone(),
                    got: got.clone(),
                }
            }
            DistributedError::CollectiveProtocolViolation { expected, got } => {
                Self::CollectiveProtocolViolation {
                    expected: expected.clone(),
                    got: got.clone(),
                }
            }
            DistributedError::RootOperationFailed(msg) => Self::Message(msg.clone()),
            err => Self::Message(err.to_string()),
        }
    }
}

impl From<SharedError> for DistributedError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::PoolConflict(name) => BackendError::PoolConflict(name).into(),
            SharedError::PoolNotFound(name) => BackendError::PoolNotFound(name).into(),
            SharedError::DatasetConflict(name) => BackendError::DatasetConflict(name).into(),
            SharedError::DatasetNotFound(name) => BackendError::DatasetNotFound(name).into(),
            SharedError::ChunkConflict(indices) => BackendError::ChunkConflict(indices).into(),
            SharedError::ChunkNotFound(indices) => BackendError::ChunkNotFound(indices).into(),
            SharedError::NotConnected(name) => BackendError::NotConnected(name).into(),
            SharedError::InvalidRegion(msg) => BackendError::InvalidRegion(msg).into(),
            SharedError::UnknownBackend(name) => BackendError::UnknownBackend(name).into(),
            SharedError::InvalidName(name) => BackendError::InvalidName(NodeNameError(name)).into(),
            SharedError::InvalidMetadata(msg) => BackendError::InvalidMetadata(msg).into(),
            SharedError::BackendOther(msg) => BackendError::Other(msg).into(),
            SharedError::ShapeMismatch { expected, got } => Self::ShapeMismatch { expected, got },
            SharedError::TransformShapeMismatch { expected, got } => {
                Self::TransformShapeMismatch { expected, got }
            }
            SharedError::CollectiveProtocolViolation { expected, got } => {
                Self::CollectiveProtocolViolation { expected, got }
            }
            SharedError::Message(msg) => Self::RootOperationFailed(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_error_keeps_backend_kind() {
        let err = DistributedError::Backend(BackendError::ChunkConflict(vec![1, 2]));
        let shared: SharedError = serde_json::from_slice(
            &serde_json::to_vec(&SharedError::from(&err)).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            DistributedError::from(shared),
            DistributedError::Backend(BackendError::ChunkConflict(indices)) if indices == vec![1, 2]
        ));
    }

    #[test]
    fn shared_error_falls_back_to_message() {
        let err = DistributedError::Backend(BackendError::IOError(std::io::Error::other("disk")));
        let rebuilt = DistributedError::from(SharedError::from(&err));
        match rebuilt {
            DistributedError::RootOperationFailed(msg) => assert_eq!(msg, "disk"),
            err => panic!("unexpected error {err}"),
        }
    }
}
