//! Smoke test del workspace completo: dominio → encoder → builder →
//! dispatcher (pool local) → agregación, sobre un batch chico real.

use std::sync::Arc;

use serde_json::json;

use molgrid_adapters::{default_registry, DomainRequestEncoder, SimpleRequestEncoder};
use molgrid_core::{aggregate, completion_channel, ArtifactCache, Dispatcher, DispatcherConfig, GraphBuilder,
                   InMemoryEventStore, LocalWorkerPool};
use molgrid_domain::{BatchRequest, MoleculeRecord, PipelineConfig, StageSpec};

#[tokio::test]
async fn workspace_smoke_featurize_and_predict() {
    let records = vec![
        MoleculeRecord::new("LFQSCWFLJHTTHZ-UHFFFAOYSA-N", "CCO", json!({"name": "ethanol"})).unwrap(),
        MoleculeRecord::new("UHOVQNZJYSORNB-UHFFFAOYSA-N", "c1ccccc1", json!({"name": "benzene"})).unwrap(),
    ];
    let pipeline = PipelineConfig::new(vec![StageSpec::new("featurize"), StageSpec::new("predict")], 1).unwrap();
    let batch = BatchRequest::new(records, pipeline).unwrap();

    let registry = Arc::new(default_registry());
    let request = SimpleRequestEncoder.encode_batch(&batch);
    let mut cache = ArtifactCache::new(u64::MAX);
    let mut graph = GraphBuilder::new(&registry).build(&request, &mut cache).unwrap();

    let (tx, rx) = completion_channel(16);
    let pool = LocalWorkerPool::new(registry.clone(), tx, 2, 1);
    let mut dispatcher = Dispatcher::new(pool, InMemoryEventStore::default(), DispatcherConfig::default(), rx);

    let report = dispatcher.run(&mut graph, &mut cache).await.unwrap();
    assert_eq!(report.succeeded, 4, "2 shards x 2 stages");
    assert!(report.failed.is_empty());

    let result = aggregate(&graph, &mut cache).unwrap();
    let items = result.payload["result"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 2, "una predicción por registro");
}
