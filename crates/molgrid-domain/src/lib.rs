//! molgrid-domain: entidades moleculares y configuración de pipeline.
//!
//! Este crate NO depende del core: define los registros de entrada
//! (`MoleculeRecord`), la configuración de pipeline declarada por el usuario
//! (`PipelineConfig`, `StageSpec`) y el `BatchRequest` que agrupa ambos.
//! La resolución de stages a un conjunto cerrado y tipado ocurre en el core.

pub mod batch;
pub mod error;
pub mod pipeline;
pub mod record;

pub use batch::BatchRequest;
pub use error::DomainError;
pub use pipeline::{PipelineConfig, StageSpec};
pub use record::MoleculeRecord;
