//! molgrid-core: pipeline distribuido de datos moleculares (G1)
//!
//! Subsistemas, de hoja a raíz: fingerprints content-addressable
//! (`hashing`, `model::fingerprint`), cache de artifacts (`cache`),
//! expansión de batch a DAG de tasks (`graph`), dispatcher con loop
//! coordinador único y pool de workers (`dispatch`) y agregación de sinks
//! (`aggregate`). Los executors concretos viven en `molgrid-adapters`.
pub mod aggregate;
pub mod cache;
pub mod constants;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod graph;
pub mod hashing;
pub mod model;
pub mod stage;

pub use aggregate::aggregate;
pub use cache::{ArtifactCache, PutOutcome};
pub use dispatch::{completion_channel, CancelToken, Dispatcher, DispatcherConfig, LocalWorkerPool, RunReport,
                   TaskCompletion, TaskEnvelope, TaskOutcome, WorkerPool};
pub use errors::CoreError;
pub use event::{EventStore, InMemoryEventStore, RunEvent, RunEventKind};
pub use graph::{aggregate_fingerprint, GraphBuilder, GraphRequest, RequestUnit, StageRequest, TaskGraph};
pub use model::{Artifact, ArtifactKind, ArtifactMeta, CapacityClass, Fingerprint, Task, TaskId, TaskStatus};
pub use stage::{ExecutorRegistry, StageContext, StageExecutor, StageKind, StageParams};
