use trud_gateway::db::Database;
use trud_gateway::db::session::{SessionFilter, SessionOutcome, SessionStore};

async fn setup() -> SessionStore {
    let db = Database::connect_memory().await.expect("in-memory sqlite");
    db.migrate().await.expect("migrations");
    SessionStore::new(db)
}

fn success_outcome() -> SessionOutcome {
    SessionOutcome {
        status: "success".into(),
        error_message: None,
        response_time: 1.25,
        contact_found: true,
        contact_name: Some("Ahmed".into()),
        carrier_name: Some("Zain".into()),
        country_code: Some("964".into()),
        is_spam: false,
    }
}

#[tokio::test]
async fn pending_session_has_expected_shape() {
    let store = setup().await;
    let session_id = store.create_pending("9647701234567", "single").await.unwrap();

    assert!(session_id.starts_with("trud_"));
    assert_eq!(session_id.len(), "trud_".len() + 16);

    let record = store.get(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, "pending");
    assert_eq!(record.phone_number, "9647701234567");
    assert_eq!(record.request_type, "single");
    assert!(record.started_at.is_some());
    assert!(record.completed_at.is_none());
}

#[tokio::test]
async fn terminal_transition_happens_exactly_once() {
    let store = setup().await;
    let session_id = store.create_pending("9647701234567", "single").await.unwrap();

    assert!(store.complete(&session_id, &success_outcome()).await.unwrap());

    // A second writer loses the race and changes nothing.
    let late = SessionOutcome {
        status: "failed".into(),
        error_message: Some("late writer".into()),
        ..Default::default()
    };
    assert!(!store.complete(&session_id, &late).await.unwrap());

    let record = store.get(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, "success");
    assert!(record.contact_found);
    assert_eq!(record.contact_name.as_deref(), Some("Ahmed"));
    assert!(record.error_message.is_none());
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn resources_are_recorded_on_the_session() {
    let store = setup().await;
    let session_id = store.create_pending("9647701234567", "bulk").await.unwrap();

    store
        .assign_resources(&session_id, Some(3), Some(7), Some("abc==def"))
        .await
        .unwrap();

    let record = store.get(&session_id).await.unwrap().unwrap();
    assert_eq!(record.account_id, Some(3));
    assert_eq!(record.proxy_id, Some(7));
    assert_eq!(record.payload_used.as_deref(), Some("abc==def"));
}

#[tokio::test]
async fn list_filters_by_status_and_phone() {
    let store = setup().await;
    let done = store.create_pending("9647700000001", "single").await.unwrap();
    store.create_pending("9647700000002", "single").await.unwrap();
    store.complete(&done, &success_outcome()).await.unwrap();

    let successes = store
        .list(&SessionFilter {
            status: Some("success".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].session_id, done);

    let by_phone = store
        .list(&SessionFilter {
            phone_number: Some("9647700000002".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_phone.len(), 1);
    assert_eq!(by_phone[0].status, "pending");
}

#[tokio::test]
async fn cleanup_spares_pending_and_recent_rows() {
    let store = setup().await;
    let pending = store.create_pending("9647700000001", "single").await.unwrap();
    let recent = store.create_pending("9647700000002", "single").await.unwrap();
    store.complete(&recent, &success_outcome()).await.unwrap();

    // Both rows were created just now, nothing qualifies.
    let removed = store.cleanup(1).await.unwrap();
    assert_eq!(removed, 0);
    assert!(store.get(&pending).await.unwrap().is_some());
    assert!(store.get(&recent).await.unwrap().is_some());
}

#[tokio::test]
async fn stats_summary_counts_by_terminal_state() {
    let store = setup().await;
    let ok = store.create_pending("9647700000001", "single").await.unwrap();
    let bad = store.create_pending("9647700000002", "single").await.unwrap();
    store.create_pending("9647700000003", "single").await.unwrap();

    store.complete(&ok, &success_outcome()).await.unwrap();
    store
        .complete(
            &bad,
            &SessionOutcome {
                status: "failed".into(),
                error_message: Some("no answer".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stats = store.stats_summary().await.unwrap();
    assert_eq!(stats["total_sessions"], 3);
    assert_eq!(stats["successful"], 1);
    assert_eq!(stats["failed"], 1);
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["contacts_found"], 1);
    // Success rate is over completed sessions only.
    assert_eq!(stats["success_rate"], 0.5);
}
