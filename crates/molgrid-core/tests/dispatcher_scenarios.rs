//! Escenarios de dispatch de punta a punta sobre el pool scripteado: run
//! frío, re-run caliente servido íntegramente por cache y respeto de slots
//! por clase de capacidad.

mod util;

use molgrid_core::{aggregate, aggregate_fingerprint, ArtifactCache, CoreError, RunEventKind, StageKind, TaskStatus};
use molgrid_domain::StageSpec;

use util::{replay_max_concurrency, run_graph, RunSetup};

fn featurize_predict() -> Vec<StageSpec> {
    vec![StageSpec::new("featurize"), StageSpec::new("predict")]
}

fn full_pipeline() -> Vec<StageSpec> {
    vec![StageSpec::new("featurize"),
         StageSpec::new("train-shard"),
         StageSpec::new("aggregate-model"),
         StageSpec::new("predict")]
}

#[tokio::test]
async fn cold_batch_dispatches_the_whole_graph() {
    let request = util::request(10, featurize_predict(), 1);
    let mut cache = ArtifactCache::new(u64::MAX);

    let (graph, report, events) = run_graph(&request, &mut cache, RunSetup::default()).await.unwrap();

    assert_eq!(graph.len(), 20, "10 shards x 2 stages");
    assert!(graph.all_terminal(), "toda task termina en exactamente un estado terminal");
    assert_eq!(report.dispatched, 20);
    assert_eq!(report.succeeded, 20);
    assert!(report.failed.is_empty());
    assert_eq!(report.cache_hits, 0);
    assert_eq!(report.max_in_flight, 4, "10 tasks ready contra 4 slots CPU");
    assert_eq!(replay_max_concurrency(&events, ""), 4);

    let dispatches = events.iter()
                           .filter(|e| matches!(e.kind, RunEventKind::TaskDispatched { .. }))
                           .count();
    assert_eq!(dispatches, 20);

    // El agregado final queda commiteado bajo un fingerprint derivado del
    // batch, no del contenido de los sinks.
    let result = aggregate(&graph, &mut cache).unwrap();
    assert_eq!(result.fingerprint, aggregate_fingerprint(graph.batch_fp(), StageKind::Predict));
    assert_eq!(result.payload.get("sink_stage").and_then(|v| v.as_str()), Some("predict"));
}

#[tokio::test]
async fn warm_rerun_is_served_entirely_from_cache() {
    let request = util::request(10, featurize_predict(), 1);
    let mut cache = ArtifactCache::new(u64::MAX);

    let (cold_graph, _, _) = run_graph(&request, &mut cache, RunSetup::default()).await.unwrap();
    let cold = aggregate(&cold_graph, &mut cache).unwrap();

    let (warm_graph, report, events) = run_graph(&request, &mut cache, RunSetup::default()).await.unwrap();
    assert_eq!(report.dispatched, 0, "el re-run caliente no despacha nada");
    assert_eq!(report.cache_hits, 20);
    assert_eq!(report.succeeded, 20);
    assert!(warm_graph.iter()
                      .all(|t| t.status == TaskStatus::Succeeded { by_cache: true }));
    let skipped = events.iter()
                        .filter(|e| matches!(e.kind, RunEventKind::TaskSkippedByCache { .. }))
                        .count();
    assert_eq!(skipped, 20);

    let warm = aggregate(&warm_graph, &mut cache).unwrap();
    assert_eq!(cold.fingerprint, warm.fingerprint);
    assert_eq!(cold.canonical_payload(), warm.canonical_payload(), "resultado byte-idéntico");
}

#[tokio::test]
async fn partial_warm_run_recomputes_only_the_missing_suffix() {
    // El mismo batch con un predict distinto: los featurize pegan en cache,
    // los predict (y solo ellos) se recomputan.
    let base = util::request(6, featurize_predict(), 2);
    let tweaked = util::request(6,
                                vec![StageSpec::new("featurize"),
                                     StageSpec::with_params("predict", serde_json::json!({"threshold": 3.0}))],
                                2);
    let mut cache = ArtifactCache::new(u64::MAX);

    run_graph(&base, &mut cache, RunSetup::default()).await.unwrap();
    let (graph, report, _) = run_graph(&tweaked, &mut cache, RunSetup::default()).await.unwrap();

    assert_eq!(graph.len(), 6);
    assert_eq!(report.cache_hits, 3, "los 3 featurize vienen de cache");
    assert_eq!(report.dispatched, 3, "solo los 3 predict se recomputan");
    assert_eq!(report.succeeded, 6);
}

#[tokio::test]
async fn gpu_stage_never_oversubscribes_its_single_slot() {
    let request = util::request(6, full_pipeline(), 2);
    let mut cache = ArtifactCache::new(u64::MAX);

    let (graph, report, events) =
        run_graph(&request, &mut cache, RunSetup { cpu_slots: 4, gpu_slots: 1, ..RunSetup::default() }).await
                                                                                                       .unwrap();

    // 3 featurize + 3 train + 1 aggregate-model + 3 predict
    assert_eq!(graph.len(), 10);
    assert_eq!(report.succeeded, 10);
    assert!(report.failed.is_empty());
    assert_eq!(replay_max_concurrency(&events, "train-shard-"), 1,
               "los train nunca se solapan con un solo slot GPU");

    let result = aggregate(&graph, &mut cache).unwrap();
    assert_eq!(result.fingerprint, aggregate_fingerprint(graph.batch_fp(), StageKind::Predict));
}

#[tokio::test]
async fn tiny_cache_budget_never_aborts_the_run() {
    // Presupuesto ridículo: la eviction corre tras cada commit, pero los
    // pins de por vida de task garantizan que ninguna task pendiente pierda
    // sus insumos y el run completa igual.
    let request = util::request(10, featurize_predict(), 1);
    let mut cache = ArtifactCache::new(64);

    let (graph, report, _) = run_graph(&request, &mut cache, RunSetup::default()).await.unwrap();
    assert!(graph.all_terminal());
    assert_eq!(report.succeeded, 20);
    assert!(report.failed.is_empty());

    // Los outputs de los sinks sobreviven pinneados hasta la agregación.
    let result = aggregate(&graph, &mut cache).unwrap();
    assert_eq!(result.fingerprint, aggregate_fingerprint(graph.batch_fp(), StageKind::Predict));
}

#[tokio::test]
async fn missing_capacity_class_fails_fast() {
    let request = util::request(4, full_pipeline(), 2);
    let mut cache = ArtifactCache::new(u64::MAX);

    match run_graph(&request, &mut cache, RunSetup { gpu_slots: 0, ..RunSetup::default() }).await {
        Err(CoreError::MalformedRequest(_)) => {}
        Err(e) => panic!("error inesperado: {e}"),
        Ok(_) => panic!("sin slots GPU el run debe fallar antes de despachar"),
    }
}
