//! Fallos y cancelación: agotamiento de reintentos, propagación failed-final
//! acotada a la clausura de dependientes y cancelación idempotente.

mod util;

use std::sync::Arc;

use molgrid_adapters::default_registry;
use molgrid_core::{aggregate, completion_channel, ArtifactCache, CoreError, Dispatcher, EventStore, GraphBuilder,
                   InMemoryEventStore, RunEventKind, StageKind, TaskId, TaskStatus};
use molgrid_domain::StageSpec;

use util::{run_graph, RunSetup, ScriptedPool};

fn featurize_predict() -> Vec<StageSpec> {
    vec![StageSpec::new("featurize"), StageSpec::new("predict")]
}

#[tokio::test]
async fn exhausted_retries_fail_the_dependent_closure_only() {
    let request = util::request(10, featurize_predict(), 1);
    let mut cache = ArtifactCache::new(u64::MAX);

    // featurize-0002 excede su deadline en los 3 intentos permitidos.
    let setup = RunSetup { timeouts: Some(("featurize-0002".to_string(), 3)), ..RunSetup::default() };
    let (graph, report, events) = run_graph(&request, &mut cache, setup).await.unwrap();

    let failed: Vec<String> = report.failed.iter().map(|id| id.to_string()).collect();
    assert_eq!(failed, vec!["featurize-0002".to_string(), "predict-0002".to_string()],
               "el fallo queda acotado a la task y su dependiente");
    assert_eq!(report.succeeded, 18, "los shards hermanos completan normalmente");

    let feat = graph.task(&TaskId::new(StageKind::Featurize, 2)).unwrap();
    assert_eq!(feat.status, TaskStatus::FailedFinal);
    assert_eq!(feat.attempts, 3);

    // El dependiente se marca failed-final sin haberse despachado nunca.
    let dependent_dispatched = events.iter().any(|e| {
        matches!(&e.kind, RunEventKind::TaskDispatched { task_id, .. } if task_id == "predict-0002")
    });
    assert!(!dependent_dispatched);

    let retries = events.iter()
                        .filter(|e| matches!(e.kind, RunEventKind::RetryScheduled { .. }))
                        .count();
    assert_eq!(retries, 2, "2 reintentos programados antes de agotar los 3 intentos");

    match aggregate(&graph, &mut cache).unwrap_err() {
        CoreError::IncompleteResult { failed } => {
            assert_eq!(failed, vec!["featurize-0002".to_string(), "predict-0002".to_string()],
                       "el resultado incompleto nombra el subconjunto exacto");
        }
        other => panic!("expected IncompleteResult, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_failure_retries_and_recovers() {
    let request = util::request(4, featurize_predict(), 2);
    let mut cache = ArtifactCache::new(u64::MAX);

    let setup = RunSetup { timeouts: Some(("featurize-0001".to_string(), 1)), ..RunSetup::default() };
    let (graph, report, events) = run_graph(&request, &mut cache, setup).await.unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(report.succeeded, 4);
    let recovered = graph.task(&TaskId::new(StageKind::Featurize, 1)).unwrap();
    assert_eq!(recovered.attempts, 2, "un timeout, un reintento exitoso");

    let retries = events.iter()
                        .filter(|e| matches!(e.kind, RunEventKind::RetryScheduled { .. }))
                        .count();
    assert_eq!(retries, 1);

    assert!(aggregate(&graph, &mut cache).is_ok());
}

#[tokio::test]
async fn cancellation_terminates_everything_without_dispatch() {
    let registry = Arc::new(default_registry());
    let request = util::request(6, featurize_predict(), 2);
    let mut cache = ArtifactCache::new(u64::MAX);
    let mut graph = GraphBuilder::new(&registry).build(&request, &mut cache).unwrap();

    let (tx, rx) = completion_channel(64);
    let pool = ScriptedPool::new(registry, tx, 4, 1);
    let mut dispatcher = Dispatcher::new(pool, InMemoryEventStore::default(), RunSetup::default().config, rx);

    // Cancelado antes de arrancar; el segundo cancel es no-op.
    let token = dispatcher.cancel_token();
    token.cancel();
    token.cancel();

    let report = dispatcher.run(&mut graph, &mut cache).await.unwrap();
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.cancelled, graph.len());
    assert!(graph.iter().all(|t| t.status == TaskStatus::Cancelled));

    let events = dispatcher.event_store().list(graph.run_id());
    let cancelled = events.iter()
                          .filter(|e| matches!(e.kind, RunEventKind::TaskCancelled { .. }))
                          .count();
    assert_eq!(cancelled, graph.len());

    match aggregate(&graph, &mut cache).unwrap_err() {
        CoreError::IncompleteResult { failed } => assert_eq!(failed.len(), graph.len()),
        other => panic!("expected IncompleteResult, got {other:?}"),
    }
}
