use trud_gateway::auth::api_key;
use trud_gateway::db::Database;

async fn setup() -> Database {
    let db = Database::connect_memory().await.expect("in-memory sqlite");
    db.migrate().await.expect("migrations");
    db
}

#[tokio::test]
async fn created_key_is_retrievable_by_hash_only() {
    let db = setup().await;
    let (raw, record) = api_key::create(&db.pool, "ci", 60, None, None)
        .await
        .unwrap();

    assert!(raw.starts_with("trud_"));
    assert_eq!(record.name, "ci");
    assert_eq!(record.rate_limit, 60);
    assert!(record.is_active);

    let found = api_key::lookup_by_hash(&db.pool, &api_key::hash_key(&raw))
        .await
        .unwrap()
        .expect("key resolves by hash");
    assert_eq!(found.id, record.id);

    // The raw key itself is not a valid lookup value.
    assert!(api_key::lookup_by_hash(&db.pool, &raw).await.unwrap().is_none());
}

#[tokio::test]
async fn touch_increments_usage_count() {
    let db = setup().await;
    let (_, record) = api_key::create(&db.pool, "ci", 60, None, None)
        .await
        .unwrap();
    assert_eq!(record.usage_count, 0);

    api_key::touch(&db.pool, record.id).await;
    api_key::touch(&db.pool, record.id).await;

    let reloaded = api_key::get_by_id(&db.pool, record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.usage_count, 2);
    assert!(reloaded.last_used.is_some());
}

#[tokio::test]
async fn update_and_delete_round_trip() {
    let db = setup().await;
    let (_, record) = api_key::create(&db.pool, "ci", 60, None, Some("10.0.0.1"))
        .await
        .unwrap();

    let patched = api_key::update(
        &db.pool,
        record.id,
        &api_key::UpdateApiKey {
            is_active: Some(false),
            rate_limit: Some(5),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(patched);

    let reloaded = api_key::get_by_id(&db.pool, record.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!reloaded.is_active);
    assert_eq!(reloaded.rate_limit, 5);
    assert_eq!(reloaded.allowed_ips.as_deref(), Some("10.0.0.1"));

    assert!(api_key::delete(&db.pool, record.id).await.unwrap());
    assert!(api_key::get_by_id(&db.pool, record.id).await.unwrap().is_none());
}
