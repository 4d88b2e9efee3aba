//! Response cache unit tests

use pretty_assertions::assert_eq;
use rstest::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use clinical_gateway::{
    cache::{CacheKey, Invalidation, ResponseCache},
    handlers::patients::{collection_invalidation, patient_invalidation},
    store::{MemoryStore, SharedStore},
};

use crate::common::FailingStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Patient {
    id: String,
    name: String,
}

fn patient(id: &str) -> Patient {
    Patient {
        id: id.to_string(),
        name: format!("Patient {id}"),
    }
}

#[fixture]
fn memory() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

fn cache_over(memory: &Arc<MemoryStore>) -> ResponseCache {
    let store: Arc<dyn SharedStore> = memory.clone();
    ResponseCache::new(store, true)
}

#[rstest]
#[case(CacheKey::new("patients", "detail").segment("p-1"), "patients:detail:p-1")]
#[case(CacheKey::new("patients", "list"), "patients:list:")]
#[case(CacheKey::new("patients", "search").param("q", "a&b=c"), "patients:search:q=a%26b%3Dc")]
#[case(CacheKey::new("patients", "list").param("filter", ""), "patients:list:")]
#[case(
    CacheKey::new("patients", "records").segment("p-1").param("page", "1"),
    "patients:records:p-1:page=1"
)]
fn test_key_layout(#[case] key: CacheKey, #[case] expected: &str) {
    assert_eq!(key.build(), expected);
}

#[rstest]
#[tokio::test]
async fn test_set_then_get(memory: Arc<MemoryStore>) {
    let cache = cache_over(&memory);
    cache.set("patients:detail:p-1", &patient("p-1"), Duration::from_secs(60)).await;

    let hit: Option<Patient> = cache.get("patients:detail:p-1").await;
    assert_eq!(hit, Some(patient("p-1")));
    assert_eq!(cache.get::<Patient>("patients:detail:p-2").await, None);
}

#[rstest]
#[tokio::test]
async fn test_entries_expire(memory: Arc<MemoryStore>) {
    let cache = cache_over(&memory);
    cache.set("patients:detail:p-1", &patient("p-1"), Duration::from_millis(20)).await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(cache.get::<Patient>("patients:detail:p-1").await, None);
}

#[rstest]
#[tokio::test]
async fn test_patient_write_drops_its_families(memory: Arc<MemoryStore>) {
    let cache = cache_over(&memory);
    let ttl = Duration::from_secs(60);
    for key in [
        "patients:detail:p-1",
        "patients:detail:p-2",
        "patients:list:page=1",
        "patients:search:q=smith",
        "patients:records:p-1:page=1",
        "patients:records:p-10:page=1",
    ] {
        cache.set(key, &patient("x"), ttl).await;
    }

    let removed = cache.invalidate(&patient_invalidation("p-1")).await;
    assert_eq!(removed, 4);

    // Other patients survive, including ids sharing a textual prefix
    assert!(cache.get::<Patient>("patients:detail:p-2").await.is_some());
    assert!(cache.get::<Patient>("patients:records:p-10:page=1").await.is_some());
    assert!(cache.get::<Patient>("patients:list:page=1").await.is_none());
}

#[rstest]
#[tokio::test]
async fn test_collection_invalidation_keeps_details(memory: Arc<MemoryStore>) {
    let cache = cache_over(&memory);
    let ttl = Duration::from_secs(60);
    cache.set("patients:detail:p-1", &patient("p-1"), ttl).await;
    cache.set("patients:list:page=1", &patient("x"), ttl).await;

    assert_eq!(cache.invalidate(&collection_invalidation()).await, 1);
    assert!(cache.get::<Patient>("patients:detail:p-1").await.is_some());
}

#[rstest]
#[tokio::test]
async fn test_clear_only_touches_cache_namespace(memory: Arc<MemoryStore>) {
    let cache = cache_over(&memory);
    cache.set("patients:detail:p-1", &patient("p-1"), Duration::from_secs(60)).await;
    memory
        .increment("rl:ip:10.0.0.1", Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(cache.delete_by_prefix("").await, 1);
    assert_eq!(memory.len(), 1);
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let cache = ResponseCache::new(Arc::new(FailingStore), true);
    cache.set("patients:detail:p-1", &patient("p-1"), Duration::from_secs(60)).await;

    assert_eq!(cache.get::<Patient>("patients:detail:p-1").await, None);
    assert!(!cache.delete("patients:detail:p-1").await);
    assert_eq!(
        cache.invalidate(&Invalidation::new().prefix("patients:list:")).await,
        0
    );
}
