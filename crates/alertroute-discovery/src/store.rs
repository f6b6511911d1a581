//! External descriptor store capability
//!
//! The control plane never talks to a concrete cluster store directly; it
//! consumes this trait. Implementations wrap a cluster secret service, a
//! file mount, or (for tests and static deployments) the in-memory store
//! shipped here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use alertroute_common::{Error, Result};

/// Opaque descriptor record as stored externally.
///
/// The control plane only ever reads the `config` key of `data`; everything
/// else is carried for the benefit of store implementations.
#[derive(Debug, Clone, Default)]
pub struct ConfigRecord {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub data: HashMap<String, Vec<u8>>,
}

impl ConfigRecord {
    /// Convenience constructor used heavily by tests.
    pub fn with_config(name: &str, config: impl Into<Vec<u8>>) -> Self {
        let mut data = HashMap::new();
        data.insert("config".to_string(), config.into());
        ConfigRecord {
            name: name.to_string(),
            labels: HashMap::new(),
            data,
        }
    }
}

/// Capability the external store must expose
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// List records in `namespace` matching `label_query` (`k=v[,k2=v2]`,
    /// empty selects everything).
    async fn list_records(&self, namespace: &str, label_query: &str) -> Result<Vec<ConfigRecord>>;

    /// Fetch one record by name.
    async fn get_record(&self, namespace: &str, name: &str) -> Result<ConfigRecord>;

    /// Probe store connectivity.
    async fn health(&self) -> Result<()>;
}

/// Parsed `k=v[,k2=v2]` label selector
#[derive(Debug, Clone, Default)]
pub struct LabelSelector {
    requirements: Vec<(String, String)>,
}

impl LabelSelector {
    /// Parse a selector string. Empty input means "match everything".
    pub fn parse(query: &str) -> Result<LabelSelector> {
        let mut requirements = Vec::new();
        for term in query.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let (key, value) = term
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid label selector term: {term:?}")))?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(Error::Config(format!(
                    "invalid label selector term: {term:?}"
                )));
            }
            requirements.push((key.to_string(), value.to_string()));
        }
        Ok(LabelSelector { requirements })
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(key, value)| labels.get(key).map(String::as_str) == Some(value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// In-memory store keyed by namespace, used by tests and static deployments.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<ConfigRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::default())
    }

    pub fn put(&self, namespace: &str, record: ConfigRecord) {
        let mut records = self.records.write();
        let entries = records.entry(namespace.to_string()).or_default();
        entries.retain(|existing| existing.name != record.name);
        entries.push(record);
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        if let Some(entries) = self.records.write().get_mut(namespace) {
            entries.retain(|record| record.name != name);
        }
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn list_records(&self, namespace: &str, label_query: &str) -> Result<Vec<ConfigRecord>> {
        let selector = LabelSelector::parse(label_query)?;
        let records = self.records.read();
        Ok(records
            .get(namespace)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|record| selector.matches(&record.labels))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_record(&self, namespace: &str, name: &str) -> Result<ConfigRecord> {
        let records = self.records.read();
        records
            .get(namespace)
            .and_then(|entries| entries.iter().find(|record| record.name == name))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("record {namespace}/{name}")))
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(name: &str, labels: &[(&str, &str)]) -> ConfigRecord {
        let mut record = ConfigRecord::with_config(name, "{}");
        for (key, value) in labels {
            record
                .labels
                .insert(key.to_string(), value.to_string());
        }
        record
    }

    #[test]
    fn selector_empty_matches_all() {
        let selector = LabelSelector::parse("").unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&HashMap::new()));
    }

    #[test]
    fn selector_requires_every_term() {
        let selector = LabelSelector::parse("app=alerts, tier=prod").unwrap();
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "alerts".to_string());
        assert!(!selector.matches(&labels));
        labels.insert("tier".to_string(), "prod".to_string());
        assert!(selector.matches(&labels));
    }

    #[test]
    fn selector_rejects_malformed_terms() {
        assert!(LabelSelector::parse("not-a-pair").is_err());
        assert!(LabelSelector::parse("=value").is_err());
    }

    #[tokio::test]
    async fn memory_store_lists_by_label() {
        let store = MemoryStore::new();
        store.put("monitoring", labeled("a", &[("watch", "yes")]));
        store.put("monitoring", labeled("b", &[("watch", "no")]));

        let all = store.list_records("monitoring", "").await.unwrap();
        assert_eq!(all.len(), 2);

        let watched = store.list_records("monitoring", "watch=yes").await.unwrap();
        assert_eq!(watched.len(), 1);
        assert_eq!(watched[0].name, "a");

        let other_ns = store.list_records("elsewhere", "").await.unwrap();
        assert!(other_ns.is_empty());
    }

    #[tokio::test]
    async fn memory_store_get_and_replace() {
        let store = MemoryStore::new();
        store.put("ns", ConfigRecord::with_config("x", "old"));
        store.put("ns", ConfigRecord::with_config("x", "new"));

        let record = store.get_record("ns", "x").await.unwrap();
        assert_eq!(record.data["config"], b"new");

        let missing = store.get_record("ns", "y").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }
}
