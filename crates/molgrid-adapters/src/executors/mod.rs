//! Executors del conjunto cerrado de stages.

pub mod aggregate_model;
pub mod featurize;
pub mod predict;
pub mod train;

pub use aggregate_model::AggregateModelExecutor;
pub use featurize::FeaturizeExecutor;
pub use predict::PredictExecutor;
pub use train::TrainShardExecutor;

use std::sync::Arc;

use molgrid_core::ExecutorRegistry;

/// Registry con los cuatro executors estándar.
pub fn default_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(FeaturizeExecutor));
    registry.register(Arc::new(TrainShardExecutor));
    registry.register(Arc::new(AggregateModelExecutor));
    registry.register(Arc::new(PredictExecutor));
    registry
}
