//! Modelos neutrales (Artifact, Fingerprint, Task,...)

pub mod artifact;
pub mod fingerprint;
pub mod task;

pub use artifact::{Artifact, ArtifactKind, ArtifactMeta};
pub use fingerprint::{Fingerprint, TaskFingerprintInput};
pub use task::{CapacityClass, Task, TaskId, TaskStatus};
