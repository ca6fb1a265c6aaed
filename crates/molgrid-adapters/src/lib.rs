//! molgrid-adapters: puente dominio → core neutral + executors de stage.
//!
//! El core no interpreta payloads; aquí viven el encoder que empaqueta
//! `BatchRequest` de dominio en un `GraphRequest` neutral y los cuatro
//! executors del conjunto cerrado de stages. Todos los executors son stubs
//! deterministas: puros respecto a inputs + params (la corrección científica
//! de la featurización es un no-objetivo; el determinismo es el requisito).

pub mod encoder;
pub mod executors;

pub use encoder::{DomainRequestEncoder, SimpleRequestEncoder};
pub use executors::{default_registry, AggregateModelExecutor, FeaturizeExecutor, PredictExecutor,
                    TrainShardExecutor};
