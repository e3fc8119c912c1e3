/// In-memory document store tests
///
/// Index creation, query planning, text search and transaction isolation.
/// Run with: cargo test --test store_tests
mod common;

use common::doc;
use docrunner::core::{Filter, FindOptions, IndexSpec, SortOrder, Update};
use docrunner::store::{DocumentStore, InMemoryStore, ScanStage, StoreConfig};
use docrunner::DbError;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

async fn customers(count: i64) -> InMemoryStore {
    let store = InMemoryStore::new();
    for i in 0..count {
        store
            .insert_one(
                "customers",
                doc(json!({"_id": i, "email": format!("user{}@example.com", i), "tier": i % 3})),
                None,
            )
            .await
            .unwrap();
    }
    store
}

async fn orders() -> InMemoryStore {
    let store = InMemoryStore::new();
    let rows = [
        ("a", 12345, "2022-12-31T23:00:00Z"),
        ("b", 12345, "2023-01-01T00:00:00Z"),
        ("c", 12345, "2023-08-15T12:00:00Z"),
        ("d", 12345, "2023-04-02T07:30:00Z"),
        ("e", 555, "2023-05-05T05:05:00Z"),
    ];
    for (id, customer, date) in rows {
        store
            .insert_one(
                "orders",
                doc(json!({"_id": id, "customerId": customer, "orderDate": {"$date": date}})),
                None,
            )
            .await
            .unwrap();
    }
    store
}

#[tokio::test]
async fn test_explain_switches_from_collscan_to_ixscan() {
    let store = customers(40).await;
    let query = FindOptions::new(Filter::eq("email", json!("user7@example.com")));

    let before = assert_ok!(store.explain("customers", &query).await);
    assert_eq!(before.stage, ScanStage::CollScan);
    assert_eq!(before.total_docs_examined, 40);
    assert_eq!(before.n_returned, 1);

    let name = assert_ok!(store.create_index("customers", IndexSpec::ascending("email")).await);
    assert_eq!(name, "email_1");

    let after = assert_ok!(store.explain("customers", &query).await);
    assert_eq!(after.stage, ScanStage::IxScan);
    assert_eq!(after.index_name.as_deref(), Some("email_1"));
    assert_eq!(after.total_docs_examined, 1);
    assert_eq!(after.n_returned, 1);
}

#[tokio::test]
async fn test_index_creation_is_idempotent() {
    let store = customers(10).await;
    let query = FindOptions::new(Filter::eq("tier", json!(1))).sort_by("_id", SortOrder::Ascending);
    let before = store.find("customers", &query, None).await.unwrap();

    let first = assert_ok!(store.create_index("customers", IndexSpec::ascending("tier")).await);
    let second = assert_ok!(store.create_index("customers", IndexSpec::ascending("tier")).await);
    assert_eq!(first, second);

    let indexes = store.list_indexes("customers").await.unwrap();
    assert_eq!(indexes.len(), 2);
    assert_eq!(indexes[0].name(), "_id_");

    let after = store.find("customers", &query, None).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_index_name_conflict() {
    let store = customers(3).await;
    assert_ok!(
        store
            .create_index("customers", IndexSpec::ascending("email").named("by_email"))
            .await
    );
    let err = assert_err!(
        store
            .create_index("customers", IndexSpec::ascending("tier").named("by_email"))
            .await
    );
    assert!(matches!(err, DbError::IndexConflict(_)));
}

#[tokio::test]
async fn test_compound_index_date_range_sorted_descending() {
    let store = orders().await;
    let name = store
        .create_index(
            "orders",
            IndexSpec::compound([("customerId", 1), ("orderDate", -1)]),
        )
        .await
        .unwrap();
    assert_eq!(name, "customerId_1_orderDate_-1");

    let filter = Filter::from_value(json!({
        "customerId": 12345,
        "orderDate": {"$gte": {"$date": "2023-01-01T00:00:00Z"}}
    }))
    .unwrap();
    let query = FindOptions::new(filter).sort_by("orderDate", SortOrder::Descending);

    let found = store.find("orders", &query, None).await.unwrap();
    let ids: Vec<&str> = found.iter().map(|d| d["_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["c", "d", "b"]);

    let stats = store.explain("orders", &query).await.unwrap();
    assert_eq!(stats.stage, ScanStage::IxScan);
    assert_eq!(stats.total_keys_examined, 4);
    assert_eq!(stats.n_returned, 3);
}

#[tokio::test]
async fn test_text_search_requires_text_index() {
    let store = InMemoryStore::new();
    for (id, description) in [
        (1, "고급 전자제품 OLED TV"),
        (2, "심플한 LED 스탠드"),
        (3, "스마트 전자제품 밥솥"),
    ] {
        store
            .insert_one("products", doc(json!({"_id": id, "description": description})), None)
            .await
            .unwrap();
    }

    let search = Filter::from_value(json!({"$text": {"$search": "고급 전자제품"}})).unwrap();
    let err = assert_err!(store.find("products", &FindOptions::new(search.clone()), None).await);
    assert!(matches!(err, DbError::IndexNotFound(_)));

    let name = store
        .create_index("products", IndexSpec::text("description"))
        .await
        .unwrap();
    assert_eq!(name, "description_text");

    let found = store
        .find("products", &FindOptions::new(search.clone()), None)
        .await
        .unwrap();
    let ids: Vec<i64> = found.iter().map(|d| d["_id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 3]);

    let stats = store.explain("products", &FindOptions::new(search)).await.unwrap();
    assert_eq!(stats.stage, ScanStage::Text);
}

#[tokio::test]
async fn test_unique_index_enforced_inside_transaction() {
    let store = InMemoryStore::new();
    store
        .create_index("users", IndexSpec::ascending("email").unique())
        .await
        .unwrap();
    store
        .insert_one("users", doc(json!({"_id": 1, "email": "a@example.com"})), None)
        .await
        .unwrap();

    let session = store.start_session().await.unwrap();
    store.start_transaction(session).await.unwrap();
    let err = assert_err!(
        store
            .insert_one("users", doc(json!({"_id": 2, "email": "a@example.com"})), Some(session))
            .await
    );
    assert!(err.is_duplicate_key());

    // freeing the key inside the same transaction makes it available
    store
        .update_one(
            "users",
            &Filter::by_id(json!(1)),
            &Update::new().set("email", json!("moved@example.com")),
            Some(session),
        )
        .await
        .unwrap();
    assert_ok!(
        store
            .insert_one("users", doc(json!({"_id": 2, "email": "a@example.com"})), Some(session))
            .await
    );
    store.commit_transaction(session).await.unwrap();
    store.end_session(session).await.unwrap();

    let taken = store
        .find_one("users", &Filter::eq("email", json!("a@example.com")), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(taken["_id"], json!(2));
}

#[tokio::test]
async fn test_unique_violation_detected_at_commit() {
    let store = InMemoryStore::new();
    store
        .create_index("users", IndexSpec::ascending("email").unique())
        .await
        .unwrap();

    let session = store.start_session().await.unwrap();
    store.start_transaction(session).await.unwrap();
    store
        .insert_one("users", doc(json!({"_id": 1, "email": "a@example.com"})), Some(session))
        .await
        .unwrap();

    // another writer takes the key first
    store
        .insert_one("users", doc(json!({"_id": 2, "email": "a@example.com"})), None)
        .await
        .unwrap();

    let err = assert_err!(store.commit_transaction(session).await);
    assert!(err.is_duplicate_key());
    assert!(matches!(
        store.abort_transaction(session).await,
        Err(DbError::NoTransaction(_))
    ));
    store.end_session(session).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_insert_of_same_id_conflicts() {
    let store = InMemoryStore::new();
    let first = store.start_session().await.unwrap();
    let second = store.start_session().await.unwrap();
    for session in [first, second] {
        store.start_transaction(session).await.unwrap();
        store
            .insert_one("customers", doc(json!({"_id": 2})), Some(session))
            .await
            .unwrap();
    }

    assert_ok!(store.commit_transaction(first).await);
    let err = assert_err!(store.commit_transaction(second).await);
    assert!(err.is_duplicate_key());
}

#[tokio::test]
async fn test_write_conflict_between_sessions() {
    let store = InMemoryStore::new();
    store
        .insert_one("accounts", doc(json!({"_id": 1, "balance": 100})), None)
        .await
        .unwrap();

    let a = store.start_session().await.unwrap();
    let b = store.start_session().await.unwrap();
    for (session, amount) in [(a, 10), (b, 20)] {
        store.start_transaction(session).await.unwrap();
        store
            .update_one(
                "accounts",
                &Filter::by_id(json!(1)),
                &Update::new().inc("balance", amount),
                Some(session),
            )
            .await
            .unwrap();
    }

    assert_ok!(store.commit_transaction(a).await);
    let err = assert_err!(store.commit_transaction(b).await);
    assert!(err.is_write_conflict());

    let account = store
        .find_one("accounts", &Filter::by_id(json!(1)), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account["balance"], json!(110));
}

#[tokio::test]
async fn test_end_session_aborts_open_transaction() {
    let store = InMemoryStore::new();
    let session = store.start_session().await.unwrap();
    store.start_transaction(session).await.unwrap();
    store
        .insert_one("customers", doc(json!({"_id": 1})), Some(session))
        .await
        .unwrap();
    store.end_session(session).await.unwrap();

    assert_eq!(store.count("customers").await, 0);
    assert!(store.list_collections().await.is_empty());
}

#[tokio::test]
async fn test_sort_skip_limit() {
    let store = customers(6).await;
    let query = FindOptions::new(Filter::all())
        .sort_by("_id", SortOrder::Descending)
        .skip(1)
        .limit(2);
    let found = store.find("customers", &query, None).await.unwrap();
    let ids: Vec<i64> = found.iter().map(|d| d["_id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![4, 3]);
}

#[tokio::test]
async fn test_invalid_filter_and_update_rejected() {
    let store = customers(2).await;
    let bad_filter = Filter::from_value(json!({"tier": {"$regex": "x"}})).unwrap();
    let err = assert_err!(store.find("customers", &FindOptions::new(bad_filter), None).await);
    assert!(matches!(err, DbError::InvalidFilter(_)));

    let err = assert_err!(
        store
            .update_one("customers", &Filter::by_id(json!(0)), &Update::new().set("_id", json!(9)), None)
            .await
    );
    assert!(matches!(err, DbError::InvalidUpdate(_)));
}

#[tokio::test]
async fn test_config_from_url_limits_sessions() {
    let config = StoreConfig::from_url("memdoc://localhost/bank?maxSessions=2").unwrap();
    let store = InMemoryStore::open(config).unwrap();
    let _a = store.start_session().await.unwrap();
    let _b = store.start_session().await.unwrap();
    let err = assert_err!(store.start_session().await);
    assert!(matches!(err, DbError::Connection(_)));
}
