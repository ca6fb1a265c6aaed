//! Cluster dispatcher: loop coordinador único + pool de workers.

pub mod dispatcher;
pub mod local;
pub mod pool;
pub mod slots;

pub use dispatcher::{completion_channel, CancelToken, Dispatcher, DispatcherConfig, RunReport};
pub use local::LocalWorkerPool;
pub use pool::{TaskCompletion, TaskEnvelope, TaskOutcome, WorkerPool};
pub use slots::SlotTable;
