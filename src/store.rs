//! Research Data Store
//!
//! In-memory keyed store shared by agents through the MCP server. Every
//! record keeps the time it was written so callers can ask for recent
//! findings only.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A stored research record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: Value,
    pub stored_at: DateTime<Utc>,
}

/// Store summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSummary {
    pub total: usize,
    pub keys: Vec<String>,
    pub last_write: Option<DateTime<Utc>>,
}

impl StoreSummary {
    pub fn format(&self) -> String {
        if self.total == 0 {
            return "No research data currently stored".to_string();
        }
        format!(
            "Research Data Summary\nTotal datasets: {}\nAvailable keys: {}",
            self.total,
            self.keys.join(", ")
        )
    }
}

/// Shared research store
#[derive(Debug, Default)]
pub struct ResearchDataStore {
    records: RwLock<BTreeMap<String, Record>>,
}

impl ResearchDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous record under the key
    pub fn store(&self, key: &str, value: Value) -> Record {
        self.store_at(key, value, Utc::now())
    }

    fn store_at(&self, key: &str, value: Value, stored_at: DateTime<Utc>) -> Record {
        let record = Record {
            key: key.to_string(),
            value,
            stored_at,
        };
        self.records.write().insert(key.to_string(), record.clone());
        record
    }

    pub fn retrieve(&self, key: &str) -> Option<Record> {
        self.records.read().get(key).cloned()
    }

    /// All keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records written within the last `minutes`. A window too large to
    /// represent covers every record.
    pub fn recent(&self, minutes: i64) -> Vec<Record> {
        let cutoff = Duration::try_minutes(minutes.max(0))
            .and_then(|window| Utc::now().checked_sub_signed(window));
        self.records
            .read()
            .values()
            .filter(|r| cutoff.map_or(true, |c| r.stored_at > c))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> StoreSummary {
        let records = self.records.read();
        StoreSummary {
            total: records.len(),
            keys: records.keys().cloned().collect(),
            last_write: records.values().map(|r| r.stored_at).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_retrieve() {
        let store = ResearchDataStore::new();
        store.store("market_research", serde_json::json!({"growth_rate": "37.3% CAGR"}));

        let record = store.retrieve("market_research").unwrap();
        assert_eq!(record.value["growth_rate"], "37.3% CAGR");
        assert!(store.retrieve("missing").is_none());
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let store = ResearchDataStore::new();
        store.store("k", serde_json::json!(1));
        store.store("k", serde_json::json!(2));

        assert_eq!(store.len(), 1);
        assert_eq!(store.retrieve("k").unwrap().value, serde_json::json!(2));
    }

    #[test]
    fn test_keys_sorted() {
        let store = ResearchDataStore::new();
        store.store("technical_analysis", serde_json::json!({}));
        store.store("market_research", serde_json::json!({}));

        assert_eq!(store.keys(), vec!["market_research", "technical_analysis"]);
    }

    #[test]
    fn test_recent_filters_old_records() {
        let store = ResearchDataStore::new();
        store.store_at("old", serde_json::json!(1), Utc::now() - Duration::minutes(120));
        store.store("new", serde_json::json!(2));

        let recent = store.recent(60);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].key, "new");
    }

    #[test]
    fn test_recent_with_huge_window_returns_everything() {
        let store = ResearchDataStore::new();
        store.store_at("old", serde_json::json!(1), Utc::now() - Duration::days(3650));
        store.store("new", serde_json::json!(2));

        assert_eq!(store.recent(i64::MAX).len(), 2);
        assert!(store.recent(-5).is_empty());
    }

    #[test]
    fn test_summary_format() {
        let store = ResearchDataStore::new();
        assert_eq!(store.summary().format(), "No research data currently stored");

        store.store("a", serde_json::json!(1));
        store.store("b", serde_json::json!(2));
        let summary = store.summary();
        assert_eq!(summary.total, 2);
        assert!(summary.last_write.is_some());
        assert!(summary.format().contains("Available keys: a, b"));
    }
}
