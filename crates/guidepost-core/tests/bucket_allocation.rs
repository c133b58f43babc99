use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use guidepost_core::store::{MemoryStore, TICKET_BUCKETS};
use guidepost_core::sync::{NoopInvalidator, RetryPolicy, TracingNotifier};
use guidepost_core::{EngineContext, EngineError};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn context(store: Arc<MemoryStore>) -> EngineContext {
    EngineContext::new(store, Arc::new(NoopInvalidator), Arc::new(TracingNotifier), RetryPolicy::immediate(2))
}

fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(TICKET_BUCKETS, vec![
        json!({"id": "b1", "reference": "VER-A", "date": "2024-06-01", "bucket_type": "small",
               "max_tickets": 10, "allocated_tickets": 0, "assigned_tours": [], "version": 0}),
        json!({"id": "b2", "reference": "VER-B", "date": "2024-06-01", "bucket_type": "large",
               "max_tickets": 30, "allocated_tickets": 0, "assigned_tours": null, "version": 0}),
        json!({"id": "b3", "reference": "VER-C", "date": "2024-06-02", "bucket_type": "small",
               "max_tickets": 10, "allocated_tickets": 0, "assigned_tours": [], "version": 0}),
    ]);
    store
}

#[tokio::test]
async fn test_second_tour_rejected_when_bucket_short() {
    let store = seeded();
    let mut allocator = context(store.clone()).allocator();

    let bucket = allocator.assign("b1", "X", 6).await.unwrap();
    assert_eq!(bucket.allocated_tickets, 6);
    assert_eq!(bucket.tour_ids(), vec!["X"]);

    let err = allocator.assign("b1", "Y", 5).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientCapacity { remaining: 4, required: 5, .. }));

    let row = &store.rows(TICKET_BUCKETS)[0];
    assert_eq!(row["allocated_tickets"], 6);
    assert_eq!(row["assigned_tours"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_duplicate_assignment_rejected() {
    let mut allocator = context(seeded()).allocator();
    allocator.assign("b2", "X", 3).await.unwrap();
    let err = allocator.assign("b2", "X", 1).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateAssignment { .. }));
    assert_eq!(allocator.cached("b2").unwrap().allocated_tickets, 3);
}

#[tokio::test]
async fn test_release_returns_tickets() {
    let store = seeded();
    let mut allocator = context(store.clone()).allocator();
    allocator.assign("b1", "X", 6).await.unwrap();
    allocator.assign("b1", "Y", 4).await.unwrap();

    let bucket = allocator.release("b1", "X").await.unwrap();
    assert_eq!(bucket.allocated_tickets, 4);
    assert_eq!(bucket.remaining(), 6);

    let err = allocator.release("b1", "X").await.unwrap_err();
    assert!(matches!(err, EngineError::NotAssigned { .. }));
    assert_eq!(store.rows(TICKET_BUCKETS)[0]["allocated_tickets"], 4);
}

#[tokio::test]
async fn test_candidates_for_date() {
    let mut allocator = context(seeded()).allocator();
    allocator.assign("b2", "X", 25).await.unwrap();

    let ids = |buckets: Vec<guidepost_core::models::TicketBucket>| -> Vec<String> {
        buckets.into_iter().map(|b| b.id).collect()
    };

    assert_eq!(ids(allocator.candidates(day(), "T", 5).await.unwrap()), vec!["b2", "b1"]);
    assert_eq!(ids(allocator.candidates(day(), "T", 8).await.unwrap()), vec!["b1"]);
    assert_eq!(ids(allocator.candidates(day(), "X", 0).await.unwrap()), vec!["b1"]);
    assert!(allocator.candidates(day(), "T", 11).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_bucket() {
    let mut allocator = context(seeded()).allocator();
    let err = allocator.assign("nope", "X", 1).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
}
