use std::sync::Arc;
use std::time::Duration;

use trud_gateway::config::Config;
use trud_gateway::db::Database;
use trud_gateway::db::session::{SessionFilter, SessionStore};
use trud_gateway::hellocallers::bulk::BulkRequest;
use trud_gateway::hellocallers::{BulkController, LookupExecutor, PayloadEncoder};
use trud_gateway::pool::{AccountPool, ProxyPool};

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: "sqlite::memory:".into(),
        upstream_base: "http://127.0.0.1:9".into(),
        request_timeout_secs: 1,
        default_rate_limit: 50,
        max_bulk_size: 100,
        health_concurrency: 2,
        auth_enabled: false,
        admin_token: None,
    }
}

/// Controller over an empty account pool: every lookup fails at selection,
/// before any network traffic, so the tests only exercise dispatch shape.
async fn setup() -> (Database, BulkController) {
    let db = Database::connect_memory().await.expect("in-memory sqlite");
    db.migrate().await.expect("migrations");
    let executor = LookupExecutor::new(
        &test_config(),
        AccountPool::new(db.clone()),
        ProxyPool::new(db.clone()),
        SessionStore::new(db.clone()),
        Arc::new(PayloadEncoder::with_seed(7)),
    );
    (db.clone(), BulkController::new(Arc::new(executor), 100))
}

fn request(numbers: &[&str], max_concurrent: usize, delay: f64) -> BulkRequest {
    BulkRequest {
        phone_numbers: numbers.iter().map(|s| s.to_string()).collect(),
        max_concurrent,
        delay_between_requests: delay,
        account_id: None,
        proxy_id: None,
    }
}

#[tokio::test]
async fn completed_batch_covers_every_number() {
    let (_db, controller) = setup().await;

    let outcome = controller
        .run(&request(&["9647701234501", "9647701234502"], 3, 0.1))
        .await
        .unwrap();

    assert_eq!(outcome.total_searched, 2);
    assert_eq!(outcome.successful, 0);
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.results[0].index, 0);
    assert_eq!(outcome.results[1].index, 1);
}

#[tokio::test]
async fn abandoned_batch_stops_dispatching_queued_lookups() {
    let (db, controller) = setup().await;

    // One slot, three numbers, a one-second pacing delay per slot: only the
    // first lookup can start before the caller gives up.
    let req = request(&["9647701234501", "9647701234502", "9647701234503"], 1, 1.0);
    let abandoned = tokio::time::timeout(Duration::from_millis(200), controller.run(&req)).await;
    assert!(abandoned.is_err());

    // Let the in-flight slot drain and the queued tasks observe the drop.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let sessions = SessionStore::new(db.clone())
        .list(&SessionFilter::default())
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1, "queued lookups must not start after abandonment");
}
