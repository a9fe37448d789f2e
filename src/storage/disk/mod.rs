pub mod completion;
pub mod manager;
pub mod queue;
pub mod request;
pub mod scheduler;
pub mod signal;
