//! Ordered-provider failover with per-provider circuit breaking.
//!
//! The executor walks providers in priority order. Each eligible provider
//! gets up to `max_retries` attempts; the first usable result wins and no
//! further providers are tried. Upstreams often answer "successfully" with an
//! empty payload during partial outages, so a result must also pass
//! [`Payload::is_usable`] before it counts as a success.
//!
//! A provider whose consecutive failure count reaches the open threshold is
//! skipped until it succeeds again or [`FailoverExecutor::reset`] is called.
//! Elapsed time alone never closes the circuit.

use crate::error::{FailoverError, ProviderError};
use crate::models::{Operation, ProviderStatus, Record, TimeSeries};
use crate::provider::Provider;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Validity predicate applied to every provider result.
pub trait Payload {
    /// `false` for absent or empty payloads.
    fn is_usable(&self) -> bool;
}

impl<T> Payload for Vec<T> {
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Payload> Payload for Option<T> {
    fn is_usable(&self) -> bool {
        self.as_ref().is_some_and(Payload::is_usable)
    }
}

impl<K, V> Payload for HashMap<K, V> {
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }
}

impl<K, V> Payload for BTreeMap<K, V> {
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }
}

impl Payload for Record {
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }
}

impl Payload for serde_json::Value {
    fn is_usable(&self) -> bool {
        match self {
            serde_json::Value::Null => false,
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }
}

impl Payload for TimeSeries {
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }
}

/// Retry and circuit breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailoverConfig {
    /// Attempts per provider per call.
    pub max_retries: u32,
    /// Pause after a failed attempt (not after the last one).
    pub retry_delay: Duration,
    /// Consecutive failed calls before a provider is skipped.
    pub circuit_open_threshold: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            circuit_open_threshold: 5,
        }
    }
}

/// Health of one provider, owned by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderHealth {
    pub consecutive_failures: u32,
    pub circuit_open: bool,
}

/// Executes operations against providers in priority order.
pub struct FailoverExecutor {
    providers: Vec<Arc<dyn Provider>>,
    config: FailoverConfig,
    health: Mutex<HashMap<String, ProviderHealth>>,
}

impl FailoverExecutor {
    /// Providers are tried in the order given.
    pub fn new(providers: Vec<Arc<dyn Provider>>, config: FailoverConfig) -> Self {
        let health = providers
            .iter()
            .map(|p| (p.name().to_string(), ProviderHealth::default()))
            .collect();

        Self {
            providers,
            config,
            health: Mutex::new(health),
        }
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Run `call` against each eligible provider until one yields a usable
    /// result.
    pub async fn execute<T, F, Fut>(&self, operation: Operation, call: F) -> Result<T, FailoverError>
    where
        T: Payload,
        F: Fn(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_retries = self.config.max_retries.max(1);
        let mut tried = Vec::new();
        let mut last_error = None;

        for provider in &self.providers {
            let name = provider.name();

            if self.health_of(name).circuit_open {
                debug!("[{}] circuit open, skipping {}", name, operation);
                continue;
            }
            if !provider.supports(operation) {
                debug!("[{}] does not support {}, skipping", name, operation);
                continue;
            }

            tried.push(name.to_string());

            for attempt in 1..=max_retries {
                match call(Arc::clone(provider)).await {
                    Ok(result) if result.is_usable() => {
                        self.record_success(name);
                        return Ok(result);
                    }
                    Ok(_) => {
                        debug!(
                            "[{}] {} returned an empty result (attempt {}/{})",
                            name, operation, attempt, max_retries
                        );
                        last_error = Some(ProviderError::Empty {
                            provider: name.to_string(),
                        });
                    }
                    Err(e) => {
                        warn!(
                            "[{}] {} failed (attempt {}/{}): {}",
                            name, operation, attempt, max_retries, e
                        );
                        last_error = Some(e);
                        if attempt < max_retries {
                            tokio::time::sleep(self.config.retry_delay).await;
                        }
                    }
                }
            }

            let failures = self.record_failure(name);
            warn!("[{}] failure count: {}", name, failures);
        }

        Err(FailoverError::Exhausted {
            operation,
            tried,
            last_error,
        })
    }

    fn lock_health(&self) -> MutexGuard<'_, HashMap<String, ProviderHealth>> {
        // Counters stay consistent even if a holder panicked.
        self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn health_of(&self, name: &str) -> ProviderHealth {
        self.lock_health().get(name).copied().unwrap_or_default()
    }

    fn record_success(&self, name: &str) {
        let mut health = self.lock_health();
        let entry = health.entry(name.to_string()).or_default();
        if entry.circuit_open {
            info!("[{}] recovered, closing circuit", name);
        }
        *entry = ProviderHealth::default();
    }

    fn record_failure(&self, name: &str) -> u32 {
        let mut health = self.lock_health();
        let entry = health.entry(name.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.config.circuit_open_threshold && !entry.circuit_open {
            entry.circuit_open = true;
            warn!(
                "[{}] circuit opened after {} consecutive failures",
                name, entry.consecutive_failures
            );
        }
        entry.consecutive_failures
    }

    /// Snapshot of every provider's health.
    pub fn status(&self) -> ProviderStatus {
        let health = self.lock_health();
        let mut status = ProviderStatus::default();
        for (name, h) in health.iter() {
            status.status.insert(name.clone(), !h.circuit_open);
            status.fail_count.insert(name.clone(), h.consecutive_failures);
        }
        status
    }

    /// Clear all counters and close every circuit.
    pub fn reset(&self) {
        let mut health = self.lock_health();
        for h in health.values_mut() {
            *h = ProviderHealth::default();
        }
        info!("Provider health reset");
    }
}
