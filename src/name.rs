//! Pool and dataset names.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The name of a pool or dataset.
///
/// Names are single path components so that every backend can map them to a key or directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeName(String);

/// An invalid node name.
#[derive(Debug, Clone, Error)]
#[error("invalid name {0:?}")]
pub struct NodeNameError(pub(crate) String);

impl NodeName {
    /// Create a new node name from `name`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeNameError`] if `name` is not valid according to [`NodeName::validate`()].
    pub fn new(name: &str) -> Result<Self, NodeNameError> {
        if Self::validate(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(NodeNameError(name.to_string()))
        }
    }

    /// Extracts a string slice containing the node name `String`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a node name according to the following rules:
    /// - must not be the empty string (""),
    /// - must not include the characters "/" or "\\",
    /// - must not be a string composed only of period characters, e.g. "." or "..", and
    /// - must not start with the reserved prefix "__".
    #[must_use]
    pub fn validate(node_name: &str) -> bool {
        !node_name.is_empty()
            && !node_name.contains(['/', '\\'])
            && !node_name.starts_with("__")
            && !node_name.replace('.', "").is_empty()
    }
}

impl TryFrom<String> for NodeName {
    type Error = NodeNameError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        if Self::validate(&name) {
            Ok(Self(name))
        } else {
            Err(NodeNameError(name))
        }
    }
}

impl From<NodeName> for String {
    fn from(name: NodeName) -> Self {
        name.0
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
