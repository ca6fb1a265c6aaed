//! Demo end-to-end del pipeline: corre un batch frío (todo se despacha),
//! luego el mismo batch caliente (cero dispatch, resultado byte-idéntico) y
//! muestra el rechazo de un stage desconocido en build-time.

mod config;

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use molgrid_adapters::{default_registry, DomainRequestEncoder, SimpleRequestEncoder};
use molgrid_core::{aggregate, completion_channel, ArtifactCache, CoreError, Dispatcher, GraphBuilder,
                   InMemoryEventStore, LocalWorkerPool};
use molgrid_domain::{BatchRequest, MoleculeRecord, PipelineConfig, StageSpec};

use config::CONFIG;

fn demo_batch() -> BatchRequest {
    // Pequeño set de moléculas conocidas (InChIKey + SMILES).
    let records = vec![
        MoleculeRecord::new("LFQSCWFLJHTTHZ-UHFFFAOYSA-N", "CCO", json!({"name": "ethanol"})),
        MoleculeRecord::new("UHOVQNZJYSORNB-UHFFFAOYSA-N", "c1ccccc1", json!({"name": "benzene"})),
        MoleculeRecord::new("CSCPPACGZOOCGX-UHFFFAOYSA-N", "CC(=O)C", json!({"name": "acetone"})),
        MoleculeRecord::new("XLYOFNOQVPJJNP-UHFFFAOYSA-N", "O", json!({"name": "water"})),
        MoleculeRecord::new("QTBSBXVTEAMEQO-UHFFFAOYSA-N", "CC(=O)O", json!({"name": "acetic acid"})),
        MoleculeRecord::new("OKKJLVBELUTLKV-UHFFFAOYSA-N", "CO", json!({"name": "methanol"})),
    ];
    let records: Vec<MoleculeRecord> = records.into_iter().map(|r| r.expect("demo records are valid")).collect();

    let stages = vec![StageSpec::new("featurize"),
                      StageSpec::with_params("train-shard", json!({"learning_rate": 0.05})),
                      StageSpec::new("aggregate-model"),
                      StageSpec::with_params("predict", json!({"threshold": 1.5}))];
    let pipeline = PipelineConfig::new(stages, 2).expect("demo pipeline is valid");
    BatchRequest::new(records, pipeline).expect("demo batch is valid")
}

async fn run_once(cache: &mut ArtifactCache, label: &str) -> (usize, String) {
    let registry = Arc::new(default_registry());
    let request = SimpleRequestEncoder.encode_batch(&demo_batch());

    let graph_builder = GraphBuilder::new(&registry);
    let mut graph = graph_builder.build(&request, cache).expect("demo graph builds");

    let (tx, rx) = completion_channel(64);
    let pool = LocalWorkerPool::new(registry.clone(), tx, CONFIG.workers.cpu_slots, CONFIG.workers.gpu_slots);
    let mut dispatcher = Dispatcher::new(pool, InMemoryEventStore::default(), CONFIG.dispatcher.clone(), rx);

    let report = dispatcher.run(&mut graph, cache).await.expect("demo run completes");
    let result = aggregate(&graph, cache).expect("demo aggregation succeeds");

    info!(run = label,
          tasks = graph.len(),
          dispatched = report.dispatched,
          cache_hits = report.cache_hits,
          max_in_flight = report.max_in_flight,
          aggregate = %result.fingerprint,
          "batch finished");
    println!("[{label}] tasks={} dispatched={} cache_hits={} max_in_flight={} aggregate={}",
             graph.len(), report.dispatched, report.cache_hits, report.max_in_flight, result.fingerprint);
    (report.dispatched, result.canonical_payload())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut cache = ArtifactCache::new(CONFIG.cache_budget_bytes);

    // Run frío: cache vacía, todo el grafo se despacha.
    let (cold_dispatched, cold_payload) = run_once(&mut cache, "cold").await;
    assert!(cold_dispatched > 0, "cold run must dispatch work");

    // Run caliente: mismo batch, la cache satisface todo sin despachar.
    let (warm_dispatched, warm_payload) = run_once(&mut cache, "warm").await;
    assert_eq!(warm_dispatched, 0, "warm run must dispatch nothing");
    assert_eq!(cold_payload, warm_payload, "warm aggregate must be byte-identical");

    // Stage desconocido: rechazado en build, nunca llega al dispatcher.
    let registry = Arc::new(default_registry());
    let mut bad_request = SimpleRequestEncoder.encode_batch(&demo_batch());
    bad_request.stages.push(molgrid_core::StageRequest { name: "docking".to_string(),
                                                         params: serde_json::Value::Null });
    match GraphBuilder::new(&registry).build(&bad_request, &mut cache) {
        Err(CoreError::MalformedRequest(msg)) => println!("[build] rejected as expected: {msg}"),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("unknown stage must be rejected at build time"),
    }
}
