//! A group with a single rank.

use std::sync::Arc;

use super::{ProcessGroup, ProcessGroupError, ProcessGroupTraits};

/// A process group containing only the calling process.
///
/// Every collective call returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcessGroup;

impl SingleProcessGroup {
    /// Create a new single process group.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Create a new single process group handle.
    #[must_use]
    pub fn new_handle() -> ProcessGroup {
        Arc::new(Self)
    }
}

impl ProcessGroupTraits for SingleProcessGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), ProcessGroupError> {
        Ok(())
    }

    fn broadcast_bytes(&self, bytes: Vec<u8>, root: usize) -> Result<Vec<u8>, ProcessGroupError> {
        if root == 0 {
            Ok(bytes)
        } else {
            Err(ProcessGroupError::InvalidRoot(root, 1))
        }
    }

    fn shares_address_space(&self) -> bool {
        true
    }
}
