//! World files: load, reconcile, write back

use std::sync::Arc;

use respool_controller::{Context, Controller};
use respool_core::config::ControllerConfig;
use respool_core::condition::Reason;
use respool_store::{MemoryStore, World};

const WORLD: &str = r#"
config:
  maxParallelMirrors: 2
  conflictInitialBackoffMs: 1
  conflictMaxBackoffMs: 4
namespaces:
  - name: team-a
    labels:
      tier: gold
  - name: team-b
    labels:
      tier: gold
  - name: sandbox
pools:
  - metadata:
      name: gold
    spec:
      selectors:
        - matchLabels:
            tier: gold
      hard:
        cpu: "4"
        memory: 8Gi
      defaults:
        pods: "10"
      config:
        orderedQueue: true
        defaultsAssignZero: true
claims:
  - metadata:
      name: web
      namespace: team-a
      creationTimestamp: "2024-01-01T00:00:00Z"
    spec:
      pool: gold
      resourceClaims:
        cpu: "3"
        memory: 2Gi
  - metadata:
      name: batch
      namespace: team-b
      creationTimestamp: "2024-01-01T00:01:00Z"
    spec:
      pool: gold
      resourceClaims:
        cpu: "2"
  - metadata:
      name: cache
      namespace: team-b
      creationTimestamp: "2024-01-01T00:02:00Z"
    spec:
      pool: gold
      resourceClaims:
        memory: 1Gi
  - metadata:
      name: stray
      namespace: sandbox
      creationTimestamp: "2024-01-01T00:03:00Z"
    spec:
      pool: gold
      resourceClaims:
        cpu: 100m
"#;

fn find<'a>(world: &'a World, ns: &str, name: &str) -> &'a respool_core::claim::Claim {
    world
        .claims
        .iter()
        .find(|c| c.namespace() == ns && c.name() == name)
        .expect("claim present")
}

#[tokio::test]
async fn world_round_trips_through_a_controller_pass() {
    let world = World::from_yaml_str(WORLD).expect("world parses");
    let mut config = ControllerConfig::default();
    world.config.apply(&mut config);
    assert_eq!(config.max_parallel_mirrors, 2);

    let store = Arc::new(MemoryStore::from_world(&world).expect("store loads"));
    let controller = Controller::new(Context::new(Arc::clone(&store), config).expect("config"));
    let report = controller.run_once().await.expect("pass runs");
    assert!(report.is_clean(), "failures: {:?}", report.failures);

    let yaml = store.snapshot().await.to_yaml().expect("serialises");
    let after = World::from_yaml_str(&yaml).expect("output parses");

    assert_eq!(find(&after, "team-a", "web").bound_reason(), Some(Reason::Succeeded));
    assert_eq!(find(&after, "team-b", "batch").bound_reason(), Some(Reason::PoolExhausted));
    // Memory is not contended, so the queue does not hold this one.
    assert_eq!(find(&after, "team-b", "cache").bound_reason(), Some(Reason::Succeeded));
    assert_eq!(find(&after, "sandbox", "stray").bound_reason(), Some(Reason::Failed));

    let gold = &after.pools[0];
    assert_eq!(gold.status.claim_size, 2);
    assert_eq!(gold.status.namespaces, vec!["team-a", "team-b"]);
    assert_eq!(gold.status.allocation.claimed.to_string(), "cpu=3,memory=3Gi");

    // defaults + claimed, zero-filled for the rest of hard.
    let team_b = after
        .mirrors
        .iter()
        .find(|m| m.namespace == "team-b")
        .expect("team-b mirrored");
    assert_eq!(team_b.hard.to_string(), "cpu=0,memory=1Gi,pods=10");
}

#[tokio::test]
async fn decisions_serialise_with_a_kind_tag() {
    let world = World::from_yaml_str(WORLD).expect("world parses");
    let store = Arc::new(MemoryStore::from_world(&world).expect("store loads"));
    let ctx = Context::new(store, ControllerConfig::default()).expect("config");
    let outcome = respool_controller::PoolReconciler::new(ctx)
        .plan("gold")
        .await
        .expect("plan");

    let json = serde_json::to_value(&outcome.decisions).expect("json");
    let kinds: Vec<&str> = json
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|d| d["decision"]["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["bound", "exhausted", "bound"]);
}

#[test]
fn duplicate_pools_are_rejected() {
    let yaml = "pools:\n  - metadata: {name: p}\n    spec: {hard: {cpu: \"1\"}}\n  - metadata: {name: p}\n    spec: {hard: {cpu: \"2\"}}\n";
    let err = World::from_yaml_str(yaml).expect_err("duplicate");
    assert!(err.to_string().contains("duplicate pool 'p'"));
}
