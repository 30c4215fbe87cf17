use thiserror::Error;

use crate::tensor::{DataType, MemoryType};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("duplicate edge: {0} -> {1}")]
    DuplicateEdge(String, String),

    #[error("graph contains a cycle")]
    CyclicGraph,

    #[error("multiple graph input nodes: {0}, {1}")]
    MultipleInputs(String, String),

    #[error("multiple graph output nodes: {0}, {1}")]
    MultipleOutputs(String, String),

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("data type mismatch: expected {expected:?}, got {actual:?}")]
    DataTypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    #[error("memory type mismatch: expected {expected:?}, got {actual:?}")]
    MemoryTypeMismatch {
        expected: MemoryType,
        actual: MemoryType,
    },

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("graph has not been built")]
    NotBuilt,

    #[error("graph already built")]
    AlreadyBuilt,

    #[error("session has not been started")]
    NotStarted,

    #[error("session already started")]
    AlreadyStarted,

    #[error("session stopped")]
    Stopped,

    #[error("task '{node}' failed: {message}")]
    TaskFailed { node: String, message: String },

    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(String),
}
