pub mod scheduler;
pub mod session;

pub use scheduler::Scheduler;
pub use session::{ExecutionMode, Session, SessionConfig};
