//! Discovery engine: store records in, registry snapshot out

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use alertroute_common::{
    classify, DiscoveryConfig, DiscoveryStats, Error, Result, TargetDescriptor,
};

use crate::parser;
use crate::registry::TargetRegistry;
use crate::store::ConfigStore;

/// Counts from one successful discovery pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
}

/// Rebuilds the target registry from the external store.
///
/// `discover` is best-effort at the record granularity and all-or-nothing at
/// the store granularity: records that fail to parse or validate are counted
/// and skipped, while a store listing failure leaves the previous registry
/// snapshot untouched.
pub struct DiscoveryEngine {
    store: Arc<dyn ConfigStore>,
    registry: Arc<TargetRegistry>,
    config: DiscoveryConfig,
    stats: Mutex<DiscoveryStats>,
}

impl DiscoveryEngine {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        registry: Arc<TargetRegistry>,
        config: DiscoveryConfig,
    ) -> Arc<DiscoveryEngine> {
        Arc::new(DiscoveryEngine {
            store,
            registry,
            config,
            stats: Mutex::new(DiscoveryStats::default()),
        })
    }

    /// One discovery pass: list, parse, validate, swap.
    pub async fn discover(&self) -> Result<DiscoveryOutcome> {
        let records = match self
            .store
            .list_records(&self.config.namespace, &self.config.label_query)
            .await
        {
            Ok(records) => records,
            Err(err) => {
                let classification = classify(&err);
                {
                    let mut stats = self.stats.lock();
                    stats.cumulative_error_count += 1;
                    if classification.transient {
                        stats.transient_error_count += 1;
                    }
                }
                warn!(
                    namespace = %self.config.namespace,
                    error = %err,
                    kind = classification.kind.as_str(),
                    "listing descriptor records failed, keeping previous registry"
                );
                return Err(Error::Discovery(format!("listing records: {err}")));
            }
        };

        let total = records.len() as u64;
        let mut valid_targets: Vec<TargetDescriptor> = Vec::with_capacity(records.len());
        let mut invalid = 0u64;

        for record in &records {
            match parser::parse_and_validate(record) {
                Ok(descriptor) => {
                    debug!(target = %descriptor.name, target_type = %descriptor.target_type, "descriptor accepted");
                    valid_targets.push(descriptor);
                }
                Err(err) => {
                    invalid += 1;
                    warn!(record = %record.name, error = %err, "skipping invalid descriptor record");
                }
            }
        }

        let valid = valid_targets.len() as u64;
        // empty is a legitimate outcome: it means no targets are configured
        self.registry.set(valid_targets);

        {
            let mut stats = self.stats.lock();
            stats.total_records = total;
            stats.valid_count = valid;
            stats.invalid_count = invalid;
            stats.last_success_at = Some(Utc::now());
        }

        info!(total, valid, invalid, "discovery pass complete");
        Ok(DiscoveryOutcome {
            total,
            valid,
            invalid,
        })
    }

    /// Re-validate a single record by name without a full sweep.
    ///
    /// The returned descriptor is parsed from the store's current contents;
    /// the registry is not modified.
    pub async fn discover_one(&self, name: &str) -> Result<TargetDescriptor> {
        let record = self
            .store
            .get_record(&self.config.namespace, name)
            .await?;
        parser::parse_and_validate(&record)
    }

    /// Probe external-store connectivity for the status boundary.
    pub async fn store_health(&self) -> Result<()> {
        self.store.health().await
    }

    /// Snapshot of discovery statistics.
    pub fn stats(&self) -> DiscoveryStats {
        self.stats.lock().clone()
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConfigRecord, ConfigStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn record(name: &str, json: &str) -> ConfigRecord {
        ConfigRecord::with_config(name, json)
    }

    fn engine_with(store: Arc<dyn ConfigStore>) -> Arc<DiscoveryEngine> {
        let config = DiscoveryConfig {
            namespace: "monitoring".to_string(),
            label_query: String::new(),
        };
        DiscoveryEngine::new(store, TargetRegistry::new(), config)
    }

    #[tokio::test]
    async fn happy_discovery() {
        let store = MemoryStore::new();
        store.put(
            "monitoring",
            record(
                "rootly-prod",
                r#"{"name":"rootly-prod","type":"rootly","url":"https://example.com/webhook","format":"rootly"}"#,
            ),
        );
        store.put(
            "monitoring",
            record(
                "slack-ops",
                r#"{"name":"slack-ops","type":"slack","url":"https://hooks.slack.com/services/x","format":"slack"}"#,
            ),
        );

        let engine = engine_with(store);
        let outcome = engine.discover().await.unwrap();
        assert_eq!(
            outcome,
            DiscoveryOutcome {
                total: 2,
                valid: 2,
                invalid: 0
            }
        );

        let stats = engine.stats();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.valid_count, 2);
        assert_eq!(stats.invalid_count, 0);
        assert!(stats.last_success_at.is_some());

        let registry = engine.registry();
        assert_eq!(
            registry.get("rootly-prod").unwrap().url,
            "https://example.com/webhook"
        );
        assert_eq!(
            registry
                .filter_by_type(alertroute_common::TargetType::Slack)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn partial_decode_resilience() {
        let store = MemoryStore::new();
        store.put(
            "monitoring",
            record(
                "rootly-prod",
                r#"{"name":"rootly-prod","type":"rootly","url":"https://example.com/webhook","format":"rootly"}"#,
            ),
        );
        store.put(
            "monitoring",
            ConfigRecord {
                name: "bad-1".to_string(),
                ..Default::default()
            },
        );
        store.put("monitoring", record("bad-2", "{this is not json"));

        let engine = engine_with(store);
        let outcome = engine.discover().await.unwrap();
        assert_eq!(
            outcome,
            DiscoveryOutcome {
                total: 3,
                valid: 1,
                invalid: 2
            }
        );
        assert_eq!(engine.registry().len(), 1);
        assert!(engine.registry().get("rootly-prod").is_some());
    }

    #[tokio::test]
    async fn zero_records_swaps_in_empty_registry() {
        let store = MemoryStore::new();
        store.put(
            "monitoring",
            record(
                "old",
                r#"{"name":"old","type":"webhook","url":"https://example.com","format":"webhook"}"#,
            ),
        );
        let engine = engine_with(store.clone());
        engine.discover().await.unwrap();
        assert_eq!(engine.registry().len(), 1);

        store.clear();
        let outcome = engine.discover().await.unwrap();
        assert_eq!(outcome.total, 0);
        assert!(engine.registry().is_empty());
    }

    struct FailingStore {
        calls: AtomicU64,
    }

    #[async_trait]
    impl ConfigStore for FailingStore {
        async fn list_records(&self, _: &str, _: &str) -> Result<Vec<ConfigRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Store("connection refused".to_string()))
        }

        async fn get_record(&self, namespace: &str, name: &str) -> Result<ConfigRecord> {
            Err(Error::NotFound(format!("{namespace}/{name}")))
        }

        async fn health(&self) -> Result<()> {
            Err(Error::Store("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failure_keeps_previous_snapshot() {
        let memory = MemoryStore::new();
        memory.put(
            "monitoring",
            record(
                "keep-me",
                r#"{"name":"keep-me","type":"webhook","url":"https://example.com","format":"webhook"}"#,
            ),
        );
        let engine = engine_with(memory);
        engine.discover().await.unwrap();

        // now point a second engine at a broken store but share the registry
        let registry = engine.registry().clone();
        let failing = Arc::new(FailingStore {
            calls: AtomicU64::new(0),
        });
        let broken = DiscoveryEngine::new(
            failing.clone(),
            registry.clone(),
            DiscoveryConfig {
                namespace: "monitoring".to_string(),
                label_query: String::new(),
            },
        );

        let err = broken.discover().await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
        assert_eq!(registry.len(), 1, "previous registry must survive");

        let stats = broken.stats();
        assert_eq!(stats.cumulative_error_count, 1);
        assert_eq!(stats.transient_error_count, 1);
        assert_eq!(stats.valid_count, 0, "valid counts only track successes");
        assert!(stats.last_success_at.is_none());
    }

    #[tokio::test]
    async fn discover_one_fetches_without_mutation() {
        let store = MemoryStore::new();
        store.put(
            "monitoring",
            record(
                "solo",
                r#"{"name":"solo","type":"slack","url":"https://hooks.slack.com/z","format":"slack"}"#,
            ),
        );
        let engine = engine_with(store);
        let descriptor = engine.discover_one("solo").await.unwrap();
        assert_eq!(descriptor.name, "solo");
        assert!(engine.registry().is_empty(), "registry untouched");

        let missing = engine.discover_one("nope").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }
}
