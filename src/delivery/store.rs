//! Outbound send history.
//!
//! The limiter only reads from the store; senders append to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Result, SendLimitError};
use crate::ratelimit::Topic;

/// Identifier of the recipient of a notification.
pub type UserId = u64;

/// A notification that was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRecord {
    pub user_id: UserId,
    pub topic: Topic,
    pub sent_at: DateTime<Utc>,
}

impl OutboundRecord {
    pub fn new(user_id: UserId, topic: Topic, sent_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            topic,
            sent_at,
        }
    }
}

/// Persistence for outbound sends.
#[async_trait]
pub trait OutboundStore: Send + Sync + std::fmt::Debug {
    /// Sends to `user_id` with a topic in `topics` and `sent_at >= after`,
    /// newest first.
    async fn fetch_since(
        &self,
        user_id: UserId,
        topics: &BTreeSet<Topic>,
        after: DateTime<Utc>,
    ) -> Result<Vec<OutboundRecord>>;

    /// Append a send to the history.
    async fn record(&self, record: OutboundRecord) -> Result<()>;
}

/// Outbound history held in memory.
#[derive(Debug, Default)]
pub struct InMemoryOutboundStore {
    records: RwLock<Vec<OutboundRecord>>,
}

impl InMemoryOutboundStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<OutboundRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Load a JSON array of `{userId, topic, sentAt}` records.
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<OutboundRecord> = serde_json::from_str(json)
            .map_err(|e| SendLimitError::Config(format!("Failed to parse send history: {e}")))?;
        Ok(Self::with_records(records))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of every record for one user, in insertion order.
    pub fn records_for(&self, user_id: UserId) -> Vec<OutboundRecord> {
        self.records
            .read()
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OutboundStore for InMemoryOutboundStore {
    async fn fetch_since(
        &self,
        user_id: UserId,
        topics: &BTreeSet<Topic>,
        after: DateTime<Utc>,
    ) -> Result<Vec<OutboundRecord>> {
        let mut matching: Vec<OutboundRecord> = self
            .records
            .read()
            .iter()
            .filter(|record| {
                record.user_id == user_id && record.sent_at >= after && topics.contains(&record.topic)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(matching)
    }

    async fn record(&self, record: OutboundRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn topics(names: &[&str]) -> BTreeSet<Topic> {
        names.iter().map(|name| Topic::new(name)).collect()
    }

    #[tokio::test]
    async fn test_fetch_filters_user_topic_and_cutoff() {
        let store = InMemoryOutboundStore::with_records(vec![
            OutboundRecord::new(1, Topic::new("news"), t0()),
            OutboundRecord::new(1, Topic::new("news"), t0() + Duration::hours(2)),
            OutboundRecord::new(1, Topic::new("status"), t0() + Duration::hours(3)),
            OutboundRecord::new(2, Topic::new("news"), t0() + Duration::hours(3)),
            OutboundRecord::new(1, Topic::new("marketing"), t0() + Duration::hours(1)),
        ]);

        let fetched = store
            .fetch_since(1, &topics(&["news", "marketing"]), t0() + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(
            fetched,
            vec![
                OutboundRecord::new(1, Topic::new("news"), t0() + Duration::hours(2)),
                OutboundRecord::new(1, Topic::new("marketing"), t0() + Duration::hours(1)),
            ]
        );
    }

    #[test]
    fn test_record_appends() {
        let store = InMemoryOutboundStore::new();
        assert!(store.is_empty());

        tokio_test::block_on(store.record(OutboundRecord::new(7, Topic::new("news"), t0()))).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.records_for(7).len(), 1);
        assert!(store.records_for(8).is_empty());
    }

    #[test]
    fn test_history_from_json() {
        let json = r#"[
  {"userId": 1, "topic": "news", "sentAt": "2024-01-01T00:00:00Z"},
  {"userId": 1, "topic": "STATUS", "sentAt": "2024-01-01T03:00:00Z"}
]"#;
        let store = InMemoryOutboundStore::from_json(json).unwrap();
        let records = store.records_for(1);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].topic, Topic::new("NEWS"));
        assert_eq!(records[1].sent_at, t0() + Duration::hours(3));
    }

    #[test]
    fn test_history_from_invalid_json() {
        assert!(matches!(
            InMemoryOutboundStore::from_json("{\"userId\": 1}"),
            Err(SendLimitError::Config(_))
        ));
    }
}
