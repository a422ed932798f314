//! Tests for pool admission through the cache surface.
//!
//! Exercises the router-facing flow: `get_func_svc` admits against
//! per-pod budgets, signals specialization while a function is under
//! its concurrency cap, and parks requests FIFO once the cap is
//! reached. The sweeper flow (`list_old_for_pool` +
//! `delete_old_pool_cache`) is covered at the end.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use muninn::{FunctionRef, FunctionService, FunctionServiceCache, Quantity};

// ============================================================================
// Helpers
// ============================================================================

fn function(name: &str) -> FunctionRef {
    FunctionRef {
        name: name.into(),
        namespace: "default".into(),
        uid: format!("uid-{name}"),
        resource_version: "1".into(),
    }
}

fn service(fref: &FunctionRef, address: &str) -> FunctionService {
    FunctionService::new(format!("{}-pod", fref.name), fref.clone(), address)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn empty_pool_signals_specialization() {
    let cache = FunctionServiceCache::new();
    let fref = function("f1");

    let err = cache.get_func_svc(&fref, 1, 3).await.unwrap_err();
    assert!(err.is_not_found(), "caller should specialize a new pod");
}

#[tokio::test]
async fn specialized_pod_is_admitted_without_blocking() {
    let cache = FunctionServiceCache::new();
    let fref = function("f1");

    assert!(cache.get_func_svc(&fref, 1, 3).await.is_err());
    cache.add_func(service(&fref, "10.0.0.3:8080"), 1);

    let svc = cache.get_func_svc(&fref, 1, 3).await.unwrap();
    assert_eq!(svc.address, "10.0.0.3:8080");
    assert!(svc.atime >= svc.ctime);
}

#[tokio::test]
async fn blocked_request_wakes_on_mark_available() {
    let cache = Arc::new(FunctionServiceCache::new());
    let fref = function("f1");
    cache.add_func(service(&fref, "10.0.0.1:8080"), 1);
    cache.add_func(service(&fref, "10.0.0.2:8080"), 1);

    // Saturate both pods.
    cache.get_func_svc(&fref, 1, 2).await.unwrap();
    cache.get_func_svc(&fref, 1, 2).await.unwrap();

    let parked = tokio::spawn({
        let cache = cache.clone();
        let fref = fref.clone();
        async move { cache.get_func_svc(&fref, 1, 2).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!parked.is_finished(), "cap reached, request must park");

    cache.mark_available(&fref, "10.0.0.1:8080");
    let svc = timeout(Duration::from_millis(200), parked)
        .await
        .expect("parked request wakes")
        .unwrap()
        .unwrap();
    assert_eq!(svc.address, "10.0.0.1:8080");
}

#[tokio::test]
async fn waiters_wake_in_enqueue_order() {
    let cache = Arc::new(FunctionServiceCache::new());
    let fref = function("f1");
    cache.add_func(service(&fref, "10.0.0.1:8080"), 1);
    cache.get_func_svc(&fref, 1, 1).await.unwrap();

    let first = tokio::spawn({
        let cache = cache.clone();
        let fref = fref.clone();
        async move { cache.get_func_svc(&fref, 1, 1).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = tokio::spawn({
        let cache = cache.clone();
        let fref = fref.clone();
        async move { cache.get_func_svc(&fref, 1, 1).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    cache.mark_available(&fref, "10.0.0.1:8080");
    timeout(Duration::from_millis(200), first)
        .await
        .expect("first waiter wakes first")
        .unwrap()
        .unwrap();
    assert!(!second.is_finished(), "second waiter stays parked");

    cache.mark_available(&fref, "10.0.0.1:8080");
    timeout(Duration::from_millis(200), second)
        .await
        .expect("second waiter wakes next")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn fresh_pod_handed_to_parked_waiter() {
    let cache = Arc::new(FunctionServiceCache::new());
    let fref = function("f1");

    // Promise one specialization…
    assert!(cache.get_func_svc(&fref, 1, 1).await.is_err());

    // …and park a second request behind the cap.
    let parked = tokio::spawn({
        let cache = cache.clone();
        let fref = fref.clone();
        async move { cache.get_func_svc(&fref, 1, 1).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!parked.is_finished());

    cache.add_func(service(&fref, "10.0.0.9:8080"), 1);
    let svc = timeout(Duration::from_millis(200), parked)
        .await
        .expect("waiter is handed the fresh pod")
        .unwrap()
        .unwrap();
    assert_eq!(svc.address, "10.0.0.9:8080");

    // The handoff carried the admission: the pod is already at budget.
    let next = timeout(Duration::from_millis(50), cache.get_func_svc(&fref, 1, 1)).await;
    assert!(next.is_err(), "handed-off pod is in use");
}

#[tokio::test]
async fn abandoned_request_does_not_leak_capacity() {
    let cache = Arc::new(FunctionServiceCache::new());
    let fref = function("f1");
    cache.add_func(service(&fref, "10.0.0.1:8080"), 1);
    cache.get_func_svc(&fref, 1, 1).await.unwrap();

    // Park and abandon a request.
    let abandoned = timeout(Duration::from_millis(30), cache.get_func_svc(&fref, 1, 1)).await;
    assert!(abandoned.is_err());

    let live = tokio::spawn({
        let cache = cache.clone();
        let fref = fref.clone();
        async move { cache.get_func_svc(&fref, 1, 1).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    cache.mark_available(&fref, "10.0.0.1:8080");
    timeout(Duration::from_millis(200), live)
        .await
        .expect("live request wakes past the abandoned slot")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn cpu_utilization_is_advisory() {
    let cache = FunctionServiceCache::new();
    let fref = function("f1");
    cache.add_func(service(&fref, "10.0.0.1:8080"), 1);

    cache.set_cpu_utilization(&fref, "10.0.0.1:8080", Quantity::millis(999));
    // Admission is unaffected by reported usage.
    cache.get_func_svc(&fref, 1, 1).await.unwrap();
}

#[tokio::test]
async fn sweep_flow_for_pool_entries() {
    let cache = FunctionServiceCache::new();
    let fref = function("f1");
    cache.add_func(service(&fref, "10.0.0.1:8080"), 1);

    assert!(cache
        .list_old_for_pool(Duration::from_secs(3600))
        .await
        .unwrap()
        .is_empty());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let old = cache.list_old_for_pool(Duration::ZERO).await.unwrap();
    assert_eq!(old.len(), 1);

    assert!(!cache.delete_old_pool_cache(&old[0], Duration::from_secs(3600)));
    assert!(cache.delete_old_pool_cache(&old[0], Duration::ZERO));
    assert!(cache
        .list_old_for_pool(Duration::ZERO)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn busy_entries_are_not_swept() {
    let cache = FunctionServiceCache::new();
    let fref = function("f1");
    cache.add_func(service(&fref, "10.0.0.1:8080"), 1);
    cache.get_func_svc(&fref, 1, 1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cache
        .list_old_for_pool(Duration::ZERO)
        .await
        .unwrap()
        .is_empty());

    cache.mark_available(&fref, "10.0.0.1:8080");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        cache.list_old_for_pool(Duration::ZERO).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn delete_function_svc_swallows_missing_entries() {
    let cache = FunctionServiceCache::new();
    let fref = function("f1");
    let svc = service(&fref, "10.0.0.1:8080");

    // Absent entry: logged, not propagated.
    cache.delete_function_svc(&svc);

    cache.add_func(svc.clone(), 1);
    cache.delete_function_svc(&svc);
    assert!(cache.get_func_svc(&fref, 1, 1).await.is_err());
}
