use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::db;

use super::lookup::{LookupExecutor, SearchOutcome};
use super::payload::clean_phone;

pub const MIN_PHONE_DIGITS: usize = 7;
pub const MAX_PHONE_DIGITS: usize = 15;

lazy_static! {
    static ref DIGITS_ONLY: Regex = Regex::new(r"^\d+$").expect("static regex");
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequest {
    pub phone_numbers: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub max_concurrent: usize,
    #[serde(default = "default_delay")]
    pub delay_between_requests: f64,
    pub account_id: Option<i64>,
    pub proxy_id: Option<i64>,
}

fn default_concurrency() -> usize {
    3
}

fn default_delay() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkItem {
    /// Position of this number in the deduplicated submission order.
    pub index: usize,
    #[serde(flatten)]
    pub outcome: SearchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub total_searched: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BulkItem>,
    pub errors: Vec<String>,
    pub completed_at: String,
}

/// Validate, normalize and dedupe the input before any dispatch. Invalid
/// entries become error strings, never network calls. Pure so it can be
/// unit-tested without a runtime.
pub fn prepare_numbers(
    raw: &[String],
    max_bulk_size: usize,
) -> Result<(Vec<String>, Vec<String>), String> {
    if raw.is_empty() {
        return Err("phone_numbers must not be empty".into());
    }
    if raw.len() > max_bulk_size {
        return Err(format!(
            "too many numbers: {} exceeds the limit of {max_bulk_size}",
            raw.len()
        ));
    }

    let mut accepted = Vec::new();
    let mut errors = Vec::new();
    for entry in raw {
        let cleaned = clean_phone(entry);
        if !DIGITS_ONLY.is_match(&cleaned)
            || !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&cleaned.len())
        {
            errors.push(format!("invalid phone number: {entry}"));
            continue;
        }
        if !accepted.contains(&cleaned) {
            accepted.push(cleaned);
        }
    }

    Ok((accepted, errors))
}

/// Flips the shared flag when the owning batch future is dropped, so
/// queued lookups stop starting while in-flight ones run to completion.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Rate-bounded fan-out over many lookups. Concurrency is a semaphore;
/// each slot sleeps the configured delay (with jitter) after its lookup so
/// the aggregate pace stays human-shaped even at full concurrency.
#[derive(Debug, Clone)]
pub struct BulkController {
    executor: Arc<LookupExecutor>,
    max_bulk_size: usize,
}

impl BulkController {
    pub fn new(executor: Arc<LookupExecutor>, max_bulk_size: usize) -> Self {
        Self {
            executor,
            max_bulk_size,
        }
    }

    pub async fn run(&self, req: &BulkRequest) -> Result<BulkOutcome, String> {
        let (numbers, errors) = prepare_numbers(&req.phone_numbers, self.max_bulk_size)?;

        let concurrency = req.max_concurrent.clamp(1, 10);
        let delay = req.delay_between_requests.clamp(0.1, 10.0);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        // If this future is dropped (caller disconnects), the flag flips
        // and tasks still waiting on a permit bail out instead of firing
        // new lookups.
        let cancelled = Arc::new(AtomicBool::new(false));
        let _abort_guard = CancelOnDrop(cancelled.clone());

        let mut handles = Vec::with_capacity(numbers.len());
        for (index, phone) in numbers.iter().cloned().enumerate() {
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let cancelled = cancelled.clone();
            let account_id = req.account_id;
            let proxy_id = req.proxy_id;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| "bulk batch cancelled".to_string())?;
                if cancelled.load(Ordering::Relaxed) {
                    return Err("bulk batch cancelled".to_string());
                }

                let result = executor
                    .search(&phone, account_id, proxy_id, "bulk")
                    .await
                    .map_err(|e| e.to_string());

                // Hold the slot through the pacing delay so concurrency and
                // delay compose into an aggregate rate bound.
                let jitter = {
                    let mut rng = rand::rng();
                    rng.random_range(0.8..=1.2)
                };
                tokio::time::sleep(Duration::from_secs_f64(delay * jitter)).await;

                result.map(|outcome| BulkItem { index, outcome })
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut errors = errors;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(item)) => results.push(item),
                Ok(Err(msg)) => errors.push(msg),
                Err(join_err) => errors.push(format!("lookup task failed: {join_err}")),
            }
        }
        // Joined in spawn order, but keep the index ordering explicit.
        results.sort_by_key(|item| item.index);

        let successful = results.iter().filter(|r| r.outcome.success).count();
        let failed = results.len() - successful;

        Ok(BulkOutcome {
            total_searched: results.len(),
            successful,
            failed,
            results,
            errors,
            completed_at: db::now_ts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_oversized_batches() {
        let raw: Vec<String> = (0..101).map(|i| format!("96477000{i:05}")).collect();
        assert!(prepare_numbers(&raw, 100).is_err());
    }

    #[test]
    fn rejects_empty_input() {
        assert!(prepare_numbers(&[], 100).is_err());
    }

    #[test]
    fn normalizes_and_dedupes_preserving_order() {
        let (accepted, errors) = prepare_numbers(
            &nums(&["+964 770-123-4567", "9647701234567", "9647809394930"]),
            100,
        )
        .unwrap();
        assert_eq!(accepted, nums(&["9647701234567", "9647809394930"]));
        assert!(errors.is_empty());
    }

    #[test]
    fn invalid_numbers_become_errors_not_dispatches() {
        let (accepted, errors) =
            prepare_numbers(&nums(&["9647809394930", "invalid", "123"]), 100).unwrap();
        assert_eq!(accepted, nums(&["9647809394930"]));
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("invalid"));
    }

    #[test]
    fn length_bounds_are_inclusive() {
        let (accepted, errors) = prepare_numbers(
            &nums(&["1234567", "123456789012345", "123456", "1234567890123456"]),
            100,
        )
        .unwrap();
        assert_eq!(accepted.len(), 2);
        assert_eq!(errors.len(), 2);
    }
}
