use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::pool::ProxyPool;
use crate::pool::proxy::Proxy;

/// Neutral echo endpoints used to verify a proxy can reach the internet
/// and to learn its egress IP.
pub const TEST_URLS: &[&str] = &[
    "https://httpbin.org/ip",
    "https://icanhazip.com",
    "https://api.ipify.org?format=json",
];

#[derive(Debug, Clone, Serialize)]
pub struct ProxyTestResult {
    pub proxy_id: i64,
    pub working: bool,
    pub response_time: f64,
    pub ip_address: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    proxies: ProxyPool,
    concurrency: usize,
}

impl HealthChecker {
    pub fn new(proxies: ProxyPool, concurrency: usize) -> Self {
        Self {
            proxies,
            concurrency: concurrency.max(1),
        }
    }

    /// Probe one proxy against the echo endpoints, first responder wins.
    /// The timeout comes from the proxy row, not a global default.
    pub async fn test_proxy(&self, proxy: &Proxy) -> ProxyTestResult {
        let started = Instant::now();
        let result = Self::probe(proxy).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(ip) => ProxyTestResult {
                proxy_id: proxy.id,
                working: true,
                response_time: elapsed,
                ip_address: ip,
                error_message: None,
            },
            Err(message) => ProxyTestResult {
                proxy_id: proxy.id,
                working: false,
                response_time: elapsed,
                ip_address: None,
                error_message: Some(message),
            },
        }
    }

    async fn probe(proxy: &Proxy) -> Result<Option<String>, String> {
        let rp = reqwest::Proxy::all(proxy.proxy_url())
            .map_err(|e| format!("bad proxy url: {e}"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(proxy.timeout.max(1) as u64))
            .proxy(rp)
            .build()
            .map_err(|e| format!("client build: {e}"))?;

        let mut last_err = String::from("no test endpoints");
        for url in TEST_URLS {
            match client.get(*url).send().await {
                Ok(response) if response.status().is_success() => {
                    let text = response.text().await.unwrap_or_default();
                    return Ok(extract_ip(url, &text));
                }
                Ok(response) => {
                    last_err = format!("{url} returned HTTP {}", response.status().as_u16());
                }
                Err(e) => {
                    last_err = format!("{url}: {e}");
                }
            }
        }
        Err(last_err)
    }

    /// Probe every active proxy with bounded concurrency and persist each
    /// verdict through the pool's smoothed write-back.
    pub async fn test_all_proxies(&self) -> Result<Vec<ProxyTestResult>> {
        let proxies = self.proxies.list_active().await?;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let mut handles = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            let checker = self.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                Some(checker.test_proxy(&proxy).await)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(Some(result)) = handle.await {
                let message = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "ok".to_string());
                self.proxies
                    .write_check_result(
                        result.proxy_id,
                        result.working,
                        result.response_time,
                        result.ip_address.as_deref(),
                        &message,
                    )
                    .await?;
                results.push(result);
            }
        }

        let working = results.iter().filter(|r| r.working).count();
        tracing::info!(
            tested = results.len(),
            working,
            "Proxy health check finished"
        );
        Ok(results)
    }

    /// Full maintenance pass: probe everything, then trip the circuit
    /// breaker on chronically bad proxies.
    pub async fn run_health_check(&self) -> Result<serde_json::Value> {
        let results = self.test_all_proxies().await?;
        let disabled = self.proxies.auto_disable_bad().await?;

        let working = results.iter().filter(|r| r.working).count();
        Ok(serde_json::json!({
            "tested": results.len(),
            "working": working,
            "failing": results.len() - working,
            "auto_disabled": disabled,
            "results": results,
        }))
    }
}

/// Each echo endpoint answers in its own shape.
fn extract_ip(url: &str, body: &str) -> Option<String> {
    if url.contains("icanhazip") {
        let ip = body.trim();
        return (!ip.is_empty()).then(|| ip.to_string());
    }
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    parsed
        .get("origin")
        .or_else(|| parsed.get("ip"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ip_from_each_endpoint_shape() {
        assert_eq!(
            extract_ip("https://httpbin.org/ip", r#"{"origin": "1.2.3.4"}"#),
            Some("1.2.3.4".into())
        );
        assert_eq!(
            extract_ip("https://icanhazip.com", "5.6.7.8\n"),
            Some("5.6.7.8".into())
        );
        assert_eq!(
            extract_ip("https://api.ipify.org?format=json", r#"{"ip": "9.8.7.6"}"#),
            Some("9.8.7.6".into())
        );
    }

    #[test]
    fn malformed_bodies_yield_no_ip() {
        assert_eq!(extract_ip("https://httpbin.org/ip", "not json"), None);
        assert_eq!(extract_ip("https://icanhazip.com", "   "), None);
    }
}
