use std::fmt;

use dashmap::DashMap;

use crate::proc::Node;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// No parameter with this name on the node.
    Unknown { node: Node, name: String },
    /// The node cannot be reached by this table.
    Unreachable { node: Node },
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamError::Unknown { node, name } => write!(f, "unknown parameter '{}' on node {}", name, node),
            ParamError::Unreachable { node } => write!(f, "node {} is unreachable", node),
        }
    }
}

impl std::error::Error for ParamError {}

/// Named integer parameters addressed by node.
pub trait ParamTable: Send + Sync {
    fn get(&self, node: Node, name: &str) -> Result<i64, ParamError>;
    fn set(&self, node: Node, name: &str, value: i64) -> Result<(), ParamError>;
}

/// In-memory parameter table shared by every execution.
///
/// Reads of a parameter that was never written fail with [`ParamError::Unknown`].
#[derive(Debug, Default)]
pub struct MemoryParams {
    values: DashMap<(Node, String), i64>,
}

impl MemoryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style seed, used when loading initial values.
    pub fn with(self, node: Node, name: &str, value: i64) -> Self {
        self.values.insert((node, name.to_string()), value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted copy of every parameter.
    pub fn snapshot(&self) -> Vec<(Node, String, i64)> {
        let mut all: Vec<(Node, String, i64)> = self
            .values
            .iter()
            .map(|entry| (entry.key().0, entry.key().1.clone(), *entry.value()))
            .collect();
        all.sort();
        all
    }
}

impl ParamTable for MemoryParams {
    fn get(&self, node: Node, name: &str) -> Result<i64, ParamError> {
        self.values
            .get(&(node, name.to_string()))
            .map(|v| *v)
            .ok_or_else(|| ParamError::Unknown {
                node,
                name: name.to_string(),
            })
    }

    fn set(&self, node: Node, name: &str, value: i64) -> Result<(), ParamError> {
        self.values.insert((node, name.to_string()), value);
        Ok(())
    }
}
