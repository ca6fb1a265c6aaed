//! Grafo de tasks y su builder.

pub mod builder;
pub mod types;

pub use builder::{aggregate_fingerprint, GraphBuilder};
pub use types::{GraphRequest, RequestUnit, StageRequest, TaskGraph};
