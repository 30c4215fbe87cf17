pub mod error;
pub mod execution;
pub mod graph;
pub mod queue;
pub mod task;
pub mod tensor;

// Re-export commonly used types
pub use error::{Error, Result};
pub use execution::scheduler::EDGE_CAPACITY;
pub use execution::session::{ExecutionMode, Session, SessionConfig};
pub use graph::node::Node;
pub use graph::topology::Topology;
pub use queue::{BlockingQueue, BlockingQueuePair};
pub use task::Task;
pub use tensor::{DataType, MemoryType, Shape, Tensor, TensorView, TensorViewMut};
