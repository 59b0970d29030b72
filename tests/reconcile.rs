//! End-to-end controller passes against the in-memory store

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use respool_controller::{ClaimOutcome, Context, Controller};
use respool_core::claim::Claim;
use respool_core::condition::{find_condition, ConditionType, Reason};
use respool_core::config::ControllerConfig;
use respool_core::pool::{Pool, PoolConfig};
use respool_core::quantity::Quantity;
use respool_core::resources::{ResourceList, ResourceName};
use respool_core::selector::LabelSelector;
use respool_core::{POOL_FINALIZER, RELEASE_ANNOTATION};
use respool_store::{ClaimStore, MemoryStore, PoolStore, World};

fn rl(pairs: &[(&str, &str)]) -> ResourceList {
    ResourceList::parse(pairs.iter().copied()).expect("valid resource list")
}

fn qty(list: &ResourceList, name: &str) -> Quantity {
    list.get_or_zero(&ResourceName::new(name))
}

fn q(s: &str) -> Quantity {
    Quantity::parse(s).expect("valid quantity")
}

fn labels(tier: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("tier".to_string(), tier.to_string())])
}

fn claim(ns: &str, name: &str, pool: &str, secs: i64, req: &[(&str, &str)]) -> Claim {
    let mut c = Claim::new(ns, name, pool, rl(req));
    c.metadata.creation_timestamp = Utc
        .timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp");
    c
}

fn gold_pool(hard: &[(&str, &str)], config: PoolConfig) -> Pool {
    Pool::new("gold", rl(hard))
        .with_selector(LabelSelector::default().with_label("tier", "gold"))
        .with_config(config)
}

fn test_config() -> ControllerConfig {
    ControllerConfig {
        conflict_initial_backoff_ms: 1,
        conflict_max_backoff_ms: 5,
        ..ControllerConfig::default()
    }
}

/// team-a and team-b are gold, team-c is silver.
async fn setup(pool: Pool, claims: Vec<Claim>) -> (Arc<MemoryStore>, Controller) {
    let store = Arc::new(MemoryStore::new());
    store.put_namespace("team-a", labels("gold")).await;
    store.put_namespace("team-b", labels("gold")).await;
    store.put_namespace("team-c", labels("silver")).await;
    store.create_pool(pool).await.expect("create pool");
    for c in claims {
        store.create_claim(c).await.expect("create claim");
    }
    let ctx = Context::new(Arc::clone(&store), test_config()).expect("valid config");
    (store, Controller::new(ctx))
}

async fn get_claim(store: &MemoryStore, ns: &str, name: &str) -> Claim {
    store.get_claim(ns, name).await.expect("claim exists")
}

#[tokio::test]
async fn pass_binds_claims_within_capacity_and_mirrors_namespaces() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4"), ("memory", "8Gi")], PoolConfig::default()),
        vec![
            claim("team-a", "a1", "gold", 0, &[("cpu", "2")]),
            claim("team-b", "b1", "gold", 1, &[("cpu", "1"), ("memory", "1Gi")]),
            claim("team-c", "c1", "gold", 2, &[("cpu", "1")]),
        ],
    )
    .await;

    let report = controller.run_once().await.expect("pass runs");
    assert!(report.is_clean(), "failures: {:?}", report.failures);

    let a1 = get_claim(&store, "team-a", "a1").await;
    let b1 = get_claim(&store, "team-b", "b1").await;
    let c1 = get_claim(&store, "team-c", "c1").await;
    let pool = store.get_pool("gold").await.expect("pool exists");

    assert!(a1.is_bound_to(pool.uid()));
    assert!(b1.is_bound_to(pool.uid()));
    assert_eq!(a1.bound_reason(), Some(Reason::Succeeded));
    assert_eq!(a1.metadata.pool_owner().map(|o| o.uid), Some(pool.uid()));

    assert!(!c1.is_bound());
    assert_eq!(c1.bound_reason(), Some(Reason::Failed));

    assert_eq!(qty(&pool.status.allocation.claimed, "cpu"), q("3"));
    assert_eq!(qty(&pool.status.allocation.available, "cpu"), q("1"));
    assert_eq!(qty(&pool.status.allocation.available, "memory"), q("7Gi"));
    assert_eq!(pool.status.claim_size, 2);
    assert!(pool.metadata.has_finalizer(POOL_FINALIZER));
    assert_eq!(pool.status.namespaces, vec!["team-a", "team-b"]);

    assert_eq!(store.mirror("team-a", "gold").await, Some(rl(&[("cpu", "2")])));
    assert_eq!(
        store.mirror("team-b", "gold").await,
        Some(rl(&[("cpu", "1"), ("memory", "1Gi")]))
    );
    assert_eq!(store.mirror("team-c", "gold").await, None);

    let bound_events = store.events().iter().filter(|e| e.reason == "Bound").count();
    assert_eq!(bound_events, 2);

    let gold = report.pool("gold").expect("gold reconciled");
    assert!(gold.digest.is_some());
    assert!(!gold.removed);
}

#[tokio::test]
async fn ordered_queue_holds_later_claims_behind_an_exhausted_one() {
    let (store, controller) = setup(
        gold_pool(
            &[("cpu", "1")],
            PoolConfig {
                ordered_queue: true,
                ..PoolConfig::default()
            },
        ),
        vec![
            claim("team-a", "big", "gold", 0, &[("cpu", "2")]),
            claim("team-b", "small", "gold", 1, &[("cpu", "100m")]),
        ],
    )
    .await;

    controller.run_once().await.expect("pass runs");

    let big = get_claim(&store, "team-a", "big").await;
    let small = get_claim(&store, "team-b", "small").await;
    assert_eq!(big.bound_reason(), Some(Reason::PoolExhausted));
    assert_eq!(small.bound_reason(), Some(Reason::QueueExhausted));
    assert!(!small.is_bound());

    let pool = store.get_pool("gold").await.expect("pool exists");
    let cpu = pool
        .status
        .exhaustions
        .get(&ResourceName::new("cpu"))
        .expect("cpu exhausted");
    assert_eq!(cpu.available, q("1"));
    assert_eq!(cpu.requesting, q("2"));
    assert_eq!(pool.status.claim_size, 0);
    assert!(!pool.metadata.has_finalizer(POOL_FINALIZER));
}

#[tokio::test]
async fn namespace_leaving_scope_is_collected_once() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![
            claim("team-a", "a1", "gold", 0, &[("cpu", "1")]),
            claim("team-b", "b1", "gold", 1, &[("cpu", "2")]),
        ],
    )
    .await;
    controller.run_once().await.expect("first pass");
    assert!(store.mirror("team-b", "gold").await.is_some());

    store.put_namespace("team-b", labels("silver")).await;
    let report = controller.run_once().await.expect("second pass");
    let gc = &report.pool("gold").expect("gold reconciled").gc;
    assert_eq!(gc.removed_namespaces, vec!["team-b"]);
    assert_eq!(gc.disassociated.len(), 1);
    assert_eq!(gc.disassociated[0].name, "b1");
    assert!(gc.disassociated[0].touched);

    let b1 = get_claim(&store, "team-b", "b1").await;
    assert!(!b1.is_bound());
    assert_eq!(b1.bound_reason(), Some(Reason::Disassociated));
    assert_eq!(store.mirror("team-b", "gold").await, None);

    let pool = store.get_pool("gold").await.expect("pool exists");
    assert_eq!(qty(&pool.status.allocation.claimed, "cpu"), q("1"));
    assert_eq!(pool.status.claim_size, 1);

    let again = controller.run_once().await.expect("third pass");
    assert!(again.pool("gold").expect("gold reconciled").gc.is_empty());
    // Out of scope now, so the next admission attempt fails.
    assert_eq!(
        get_claim(&store, "team-b", "b1").await.bound_reason(),
        Some(Reason::Failed)
    );
    let disassociations = store
        .events()
        .iter()
        .filter(|e| e.reason == "Disassociated")
        .count();
    assert_eq!(disassociations, 1);
}

#[tokio::test]
async fn released_claim_frees_capacity_for_the_queue() {
    let (store, controller) = setup(
        gold_pool(
            &[("cpu", "2")],
            PoolConfig {
                delete_bound_resources: true,
                ..PoolConfig::default()
            },
        ),
        vec![
            claim("team-a", "first", "gold", 0, &[("cpu", "2")]),
            claim("team-b", "second", "gold", 1, &[("cpu", "1")]),
        ],
    )
    .await;
    controller.run_once().await.expect("first pass");
    assert_eq!(
        get_claim(&store, "team-b", "second").await.bound_reason(),
        Some(Reason::PoolExhausted)
    );

    let mut first = get_claim(&store, "team-a", "first").await;
    first
        .metadata
        .annotations
        .insert(RELEASE_ANNOTATION.to_string(), "true".to_string());
    store.update_claim(&first).await.expect("annotate");

    let report = controller.run_once().await.expect("second pass");
    let outcome = report
        .claims
        .iter()
        .find(|(r, _)| r.name == "first")
        .map(|(_, o)| o.clone());
    assert_eq!(
        outcome,
        Some(ClaimOutcome::Releasing {
            pool: Some("gold".into())
        })
    );

    let first = get_claim(&store, "team-a", "first").await;
    let second = get_claim(&store, "team-b", "second").await;
    assert!(!first.is_bound());
    assert_eq!(first.bound_reason(), Some(Reason::Disassociated));
    // Released claims keep their owner reference.
    assert!(first.metadata.pool_owner().is_some());
    assert!(second.is_bound());
}

#[tokio::test]
async fn raising_a_bound_request_does_not_raise_what_it_holds() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "1")], PoolConfig::default()),
        vec![claim("team-a", "a", "gold", 0, &[("cpu", "500m")])],
    )
    .await;
    controller.run_once().await.expect("first pass");
    assert!(get_claim(&store, "team-a", "a").await.is_bound());

    let mut a = get_claim(&store, "team-a", "a").await;
    a.spec.resource_claims = rl(&[("cpu", "10")]);
    store.update_claim(&a).await.expect("edit request");

    let report = controller.run_once().await.expect("second pass");
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    let pool = store.get_pool("gold").await.expect("gold");
    assert_eq!(qty(&pool.status.allocation.claimed, "cpu"), q("500m"));
    assert_eq!(qty(&pool.status.allocation.available, "cpu"), q("500m"));
    assert_eq!(store.mirror("team-a", "gold").await, Some(rl(&[("cpu", "500m")])));

    // The other half is still there for someone else.
    store
        .create_claim(claim("team-b", "b", "gold", 5, &[("cpu", "500m")]))
        .await
        .expect("create b");
    controller.run_once().await.expect("third pass");
    assert!(get_claim(&store, "team-b", "b").await.is_bound());
    let pool = store.get_pool("gold").await.expect("gold");
    assert_eq!(qty(&pool.status.allocation.claimed, "cpu"), q("1"));
    assert!(qty(&pool.status.allocation.available, "cpu").is_zero());
}

#[tokio::test]
async fn binding_left_by_a_failed_status_write_is_released() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![claim("team-a", "a", "gold", 0, &[("cpu", "1")])],
    )
    .await;
    let pool = store.get_pool("gold").await.expect("gold");
    store.inject_conflicts(&pool.object_ref(), 1_000).await;

    let report = controller.run_once().await.expect("first pass");
    assert!(report.failures.iter().any(|(r, _)| r.name == "gold"));
    let gold_uid = pool.uid();
    assert!(get_claim(&store, "team-a", "a").await.is_bound_to(gold_uid));
    assert_eq!(store.get_pool("gold").await.expect("gold").status.claim_size, 0);

    store.clear_faults().await;
    let mut a = get_claim(&store, "team-a", "a").await;
    a.metadata
        .annotations
        .insert(RELEASE_ANNOTATION.to_string(), "true".to_string());
    store.update_claim(&a).await.expect("annotate");

    let report = controller.run_once().await.expect("second pass");
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    let gold = report.pool("gold").expect("gold report");
    assert_eq!(gold.gc.disassociated.len(), 1);

    let a = get_claim(&store, "team-a", "a").await;
    assert!(!a.is_bound());
    assert_eq!(a.bound_reason(), Some(Reason::Disassociated));
    let ready = find_condition(&a.status.conditions, ConditionType::Ready).expect("ready set");
    assert!(!ready.is_true());
    let pool = store.get_pool("gold").await.expect("gold");
    assert_eq!(pool.status.claim_size, 0);
    assert!(pool.status.allocation.claimed.is_all_zero());

    let report = controller.run_once().await.expect("third pass");
    assert!(report.pool("gold").expect("gold report").gc.is_empty());
}

#[tokio::test]
async fn bound_claim_cannot_migrate_to_another_pool() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![claim("team-a", "a1", "gold", 0, &[("cpu", "1")])],
    )
    .await;
    store
        .create_pool(
            Pool::new("silver", rl(&[("cpu", "4")]))
                .with_selector(LabelSelector::default().with_label("tier", "gold")),
        )
        .await
        .expect("create silver");
    controller.run_once().await.expect("first pass");
    let gold_uid = store.get_pool("gold").await.expect("gold").uid();

    let mut a1 = get_claim(&store, "team-a", "a1").await;
    a1.spec.pool = "silver".into();
    store.update_claim(&a1).await.expect("retarget");

    let report = controller.run_once().await.expect("second pass");
    assert!(report
        .claims
        .iter()
        .any(|(r, o)| r.name == "a1" && matches!(o, ClaimOutcome::Rejected { .. })));

    let a1 = get_claim(&store, "team-a", "a1").await;
    assert!(a1.is_bound_to(gold_uid));
    let ready = find_condition(&a1.status.conditions, ConditionType::Ready).expect("ready set");
    assert!(!ready.is_true());
    assert_eq!(ready.message, "cannot change pool while claim is in use");

    let silver = store.get_pool("silver").await.expect("silver");
    assert_eq!(silver.status.claim_size, 0);
    let gold = store.get_pool("gold").await.expect("gold");
    assert_eq!(gold.status.claim_size, 1);
}

#[tokio::test]
async fn unbound_claim_may_switch_pools() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "1")], PoolConfig::default()),
        vec![claim("team-a", "a1", "gold", 0, &[("cpu", "2")])],
    )
    .await;
    store
        .create_pool(
            Pool::new("silver", rl(&[("cpu", "4")]))
                .with_selector(LabelSelector::default().with_label("tier", "gold")),
        )
        .await
        .expect("create silver");
    controller.run_once().await.expect("first pass");
    assert_eq!(
        get_claim(&store, "team-a", "a1").await.bound_reason(),
        Some(Reason::PoolExhausted)
    );

    let mut a1 = get_claim(&store, "team-a", "a1").await;
    a1.spec.pool = "silver".into();
    store.update_claim(&a1).await.expect("retarget");
    controller.run_once().await.expect("second pass");

    let silver = store.get_pool("silver").await.expect("silver");
    let a1 = get_claim(&store, "team-a", "a1").await;
    assert!(a1.is_bound_to(silver.uid()));
    assert_eq!(a1.metadata.pool_owner().map(|o| o.name.as_str()), Some("silver"));
}

#[tokio::test]
async fn stale_owner_is_replaced_when_an_unbound_claim_migrates() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![claim("team-a", "a1", "gold", 0, &[("cpu", "1")])],
    )
    .await;
    store
        .create_pool(
            Pool::new("silver", rl(&[("cpu", "4")]))
                .with_selector(LabelSelector::default().with_label("tier", "silver")),
        )
        .await
        .expect("create silver");
    controller.run_once().await.expect("first pass");

    // Leaving gold's scope unbinds the claim but keeps its owner reference.
    store.put_namespace("team-a", labels("silver")).await;
    controller.run_once().await.expect("second pass");
    let a1 = get_claim(&store, "team-a", "a1").await;
    assert!(!a1.is_bound());
    assert_eq!(a1.metadata.pool_owner().map(|o| o.name.as_str()), Some("gold"));

    let mut a1 = a1;
    a1.spec.pool = "silver".into();
    store.update_claim(&a1).await.expect("retarget");
    controller.run_once().await.expect("third pass");

    let silver = store.get_pool("silver").await.expect("silver");
    let a1 = get_claim(&store, "team-a", "a1").await;
    assert!(a1.is_bound_to(silver.uid()));
    let owners: Vec<&str> = a1
        .metadata
        .owner_references
        .iter()
        .map(|o| o.name.as_str())
        .collect();
    assert_eq!(owners, vec!["silver"]);
}

#[tokio::test]
async fn deleting_pool_releases_claims_then_drops_finalizer() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![
            claim("team-a", "a1", "gold", 0, &[("cpu", "1")]),
            claim("team-b", "b1", "gold", 1, &[("cpu", "1")]),
        ],
    )
    .await;
    controller.run_once().await.expect("first pass");

    store.delete_pool("gold").await.expect("delete");
    let held = store.get_pool("gold").await.expect("finalizer holds the pool");
    assert!(held.metadata.is_deleting());

    let report = controller.run_once().await.expect("second pass");
    let gold = report.pool("gold").expect("gold reconciled");
    assert!(gold.removed);
    assert_eq!(gold.gc.disassociated.len(), 2);

    assert!(store
        .get_pool("gold")
        .await
        .is_err_and(|e| e.is_not_found()));
    assert!(store.mirror_namespaces("gold").await.is_empty());
    for (ns, name) in [("team-a", "a1"), ("team-b", "b1")] {
        assert!(!get_claim(&store, ns, name).await.is_bound());
    }
}

#[tokio::test]
async fn mirror_failure_fails_the_cycle_until_cleared() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![claim("team-a", "a1", "gold", 0, &[("cpu", "1")])],
    )
    .await;
    store.fail_mirrors_in("team-b").await;

    let report = controller.run_once().await.expect("pass runs");
    assert!(!report.is_clean());
    assert!(report.failures.iter().any(|(r, _)| r.name == "gold"));
    let pool = store.get_pool("gold").await.expect("gold");
    let ready = find_condition(&pool.status.conditions, ConditionType::Ready).expect("ready set");
    assert!(!ready.is_true());
    assert_eq!(ready.reason, Reason::Failed);
    // Decisions were written before the fan-out.
    assert!(get_claim(&store, "team-a", "a1").await.is_bound());

    store.clear_faults().await;
    let report = controller.run_once().await.expect("pass runs");
    assert!(report.is_clean());
    let pool = store.get_pool("gold").await.expect("gold");
    let ready = find_condition(&pool.status.conditions, ConditionType::Ready).expect("ready set");
    assert!(ready.is_true());
}

#[tokio::test]
async fn write_conflicts_are_retried() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![claim("team-a", "a1", "gold", 0, &[("cpu", "1")])],
    )
    .await;
    let a1 = get_claim(&store, "team-a", "a1").await;
    store.inject_conflicts(&a1.object_ref(), 2).await;
    let pool = store.get_pool("gold").await.expect("gold");
    store.inject_conflicts(&pool.object_ref(), 1).await;

    let report = controller.run_once().await.expect("pass runs");
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert!(get_claim(&store, "team-a", "a1").await.is_bound());
}

#[tokio::test]
async fn conflicts_beyond_the_retry_budget_surface() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![claim("team-a", "a1", "gold", 0, &[("cpu", "1")])],
    )
    .await;
    let a1 = get_claim(&store, "team-a", "a1").await;
    store.inject_conflicts(&a1.object_ref(), 100).await;

    let report = controller.run_once().await.expect("pass runs");
    assert!(report
        .failures
        .iter()
        .any(|(r, e)| r.name == "gold" && e.is_conflict()));
}

#[tokio::test]
async fn store_outage_aborts_the_pass() {
    let (store, controller) = setup(gold_pool(&[("cpu", "4")], PoolConfig::default()), vec![]).await;
    store.set_unavailable(true).await;
    assert!(controller.run_once().await.is_err());
}

#[tokio::test]
async fn identical_worlds_reach_identical_decisions() {
    let mut world = World::default();
    for ns in ["team-a", "team-b"] {
        world.namespaces.push(respool_store::world::NamespaceDef {
            name: ns.into(),
            labels: labels("gold"),
        });
    }
    world.pools.push(gold_pool(
        &[("cpu", "3"), ("memory", "4Gi")],
        PoolConfig {
            ordered_queue: true,
            ..PoolConfig::default()
        },
    ));
    for (i, (ns, cpu, mem)) in [
        ("team-a", "1", "1Gi"),
        ("team-b", "2", "1Gi"),
        ("team-a", "1", "4Gi"),
        ("team-b", "500m", "512Mi"),
    ]
    .iter()
    .enumerate()
    {
        world.claims.push(claim(
            ns,
            &format!("c{i}"),
            "gold",
            i as i64,
            &[("cpu", cpu), ("memory", mem)],
        ));
    }

    let mut digests = Vec::new();
    for _ in 0..2 {
        let store = Arc::new(MemoryStore::from_world(&world).expect("load world"));
        let controller = Controller::new(Context::new(store, test_config()).expect("config"));
        let report = controller.run_once().await.expect("pass runs");
        let gold = report.pool("gold").expect("gold reconciled");
        digests.push((gold.digest, gold.decisions.clone()));
    }
    assert_eq!(digests[0], digests[1]);
}

#[tokio::test]
async fn run_stops_when_shutdown_resolves() {
    let (store, controller) = setup(
        gold_pool(&[("cpu", "4")], PoolConfig::default()),
        vec![claim("team-a", "a1", "gold", 0, &[("cpu", "1")])],
    )
    .await;
    controller.run(async {}).await.expect("loop exits cleanly");
    assert!(get_claim(&store, "team-a", "a1").await.is_bound());
}
