//! In-memory `AutomationStore` backend.
//!
//! A single `RwLock` over plain maps. The write lock makes
//! `insert_executed_if_absent` genuinely atomic, which is the property
//! the executor's idempotency rests on; a real backend provides the same
//! guarantee with a unique key.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::rules::model::Rule;
use crate::store::traits::{
    AutomationStore, DigestItem, ExecutedInsert, ExecutedRule, ExecutionStatus, Group,
    ThreadTracker, TrackerKind,
};

type AccountKey = (String, String);

#[derive(Default)]
struct Inner {
    rules: HashMap<Uuid, Rule>,
    /// Keyed by (account id, message id) — the idempotency key.
    executed: HashMap<AccountKey, ExecutedRule>,
    trackers: HashMap<(String, String, TrackerKind), ThreadTracker>,
    groups: HashMap<AccountKey, Group>,
    digests: HashMap<String, Vec<DigestItem>>,
    markers: HashMap<AccountKey, Instant>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AutomationStore for MemoryStore {
    async fn list_rules(&self, account_id: &str) -> Result<Vec<Rule>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .rules
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<Rule>, StoreError> {
        Ok(self.inner.read().await.rules.get(&id).cloned())
    }

    async fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        self.inner.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.rules.remove(&id).is_some())
    }

    async fn insert_executed_if_absent(
        &self,
        record: &ExecutedRule,
    ) -> Result<ExecutedInsert, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (record.account_id.clone(), record.message_id.clone());
        match inner.executed.entry(key) {
            Entry::Occupied(existing) => Ok(ExecutedInsert::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(ExecutedInsert::Created)
            }
        }
    }

    async fn update_executed(
        &self,
        account_id: &str,
        message_id: &str,
        status: ExecutionStatus,
        actions: &[String],
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (account_id.to_string(), message_id.to_string());
        let record = inner.executed.get_mut(&key).ok_or(StoreError::NotFound {
            entity: "executed_rule".to_string(),
            id: message_id.to_string(),
        })?;
        record.status = status;
        record.actions = actions.to_vec();
        record.reason = reason.map(String::from);
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_executed(
        &self,
        account_id: &str,
        message_id: &str,
    ) -> Result<Option<ExecutedRule>, StoreError> {
        let inner = self.inner.read().await;
        let key = (account_id.to_string(), message_id.to_string());
        Ok(inner.executed.get(&key).cloned())
    }

    async fn executed_message_ids(
        &self,
        account_id: &str,
        message_ids: &[String],
    ) -> Result<std::collections::HashSet<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(message_ids
            .iter()
            .filter(|id| {
                inner
                    .executed
                    .contains_key(&(account_id.to_string(), (*id).clone()))
            })
            .cloned()
            .collect())
    }

    async fn upsert_tracker(&self, tracker: &ThreadTracker) -> Result<(), StoreError> {
        let key = (
            tracker.account_id.clone(),
            tracker.thread_id.clone(),
            tracker.kind,
        );
        self.inner.write().await.trackers.insert(key, tracker.clone());
        Ok(())
    }

    async fn resolve_tracker(
        &self,
        account_id: &str,
        thread_id: &str,
        kind: TrackerKind,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (account_id.to_string(), thread_id.to_string(), kind);
        match inner.trackers.get_mut(&key) {
            Some(tracker) if !tracker.resolved => {
                tracker.resolved = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_trackers(
        &self,
        account_id: &str,
        thread_id: &str,
    ) -> Result<Vec<ThreadTracker>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .trackers
            .values()
            .filter(|t| t.account_id == account_id && t.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), StoreError> {
        let key = (group.account_id.clone(), group.name.clone());
        self.inner.write().await.groups.insert(key, group.clone());
        Ok(())
    }

    async fn group_contains(
        &self,
        account_id: &str,
        group: &str,
        sender: &str,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        let key = (account_id.to_string(), group.to_string());
        let Some(group) = inner.groups.get(&key) else {
            return Ok(false);
        };
        let sender = sender.to_lowercase();
        Ok(group
            .members
            .iter()
            .any(|pattern| sender.contains(&pattern.to_lowercase())))
    }

    async fn queue_digest_item(&self, item: &DigestItem) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .digests
            .entry(item.account_id.clone())
            .or_default()
            .push(item.clone());
        Ok(())
    }

    async fn drain_digest_items(&self, account_id: &str) -> Result<Vec<DigestItem>, StoreError> {
        Ok(self
            .inner
            .write()
            .await
            .digests
            .remove(account_id)
            .unwrap_or_default())
    }

    async fn try_begin_processing(
        &self,
        account_id: &str,
        message_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (account_id.to_string(), message_id.to_string());
        if let Some(acquired_at) = inner.markers.get(&key)
            && acquired_at.elapsed() < ttl
        {
            return Ok(false);
        }
        inner.markers.insert(key, Instant::now());
        Ok(true)
    }

    async fn end_processing(
        &self,
        account_id: &str,
        message_id: &str,
    ) -> Result<(), StoreError> {
        let key = (account_id.to_string(), message_id.to_string());
        self.inner.write().await.markers.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use futures::future::join_all;

    use super::*;

    fn record(message_id: &str) -> ExecutedRule {
        ExecutedRule::pending("acct_1", message_id, "t1", vec![])
    }

    #[tokio::test]
    async fn insert_if_absent_reports_the_existing_record() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.insert_executed_if_absent(&record("m1")).await.unwrap(),
            ExecutedInsert::Created
        ));
        match store.insert_executed_if_absent(&record("m1")).await.unwrap() {
            ExecutedInsert::Existing(existing) => {
                assert_eq!(existing.status, ExecutionStatus::Pending)
            }
            ExecutedInsert::Created => panic!("second insert must observe the first"),
        }
    }

    #[tokio::test]
    async fn concurrent_inserts_create_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.insert_executed_if_absent(&record("m1")).await.unwrap()
                })
            })
            .collect();
        let created = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r.as_ref().unwrap(), ExecutedInsert::Created))
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn update_executed_transitions_status() {
        let store = MemoryStore::new();
        store.insert_executed_if_absent(&record("m1")).await.unwrap();
        store
            .update_executed(
                "acct_1",
                "m1",
                ExecutionStatus::Rejected,
                &["label".into()],
                Some("label service down"),
            )
            .await
            .unwrap();
        let stored = store.get_executed("acct_1", "m1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Rejected);
        assert_eq!(stored.actions, vec!["label".to_string()]);
        assert_eq!(stored.reason.as_deref(), Some("label service down"));
    }

    #[tokio::test]
    async fn executed_message_ids_filters_the_batch() {
        let store = MemoryStore::new();
        store.insert_executed_if_absent(&record("m1")).await.unwrap();
        store.insert_executed_if_absent(&record("m3")).await.unwrap();
        let hits = store
            .executed_message_ids(
                "acct_1",
                &["m1".to_string(), "m2".to_string(), "m3".to_string()],
            )
            .await
            .unwrap();
        assert!(hits.contains("m1"));
        assert!(!hits.contains("m2"));
        assert!(hits.contains("m3"));
    }

    #[tokio::test]
    async fn resolve_tracker_only_once_and_only_its_kind() {
        let store = MemoryStore::new();
        for kind in [TrackerKind::NeedsReply, TrackerKind::Awaiting] {
            store
                .upsert_tracker(&ThreadTracker {
                    account_id: "acct_1".into(),
                    thread_id: "t1".into(),
                    kind,
                    resolved: false,
                    sent_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert!(store
            .resolve_tracker("acct_1", "t1", TrackerKind::NeedsReply)
            .await
            .unwrap());
        assert!(!store
            .resolve_tracker("acct_1", "t1", TrackerKind::NeedsReply)
            .await
            .unwrap());

        let trackers = store.get_trackers("acct_1", "t1").await.unwrap();
        let awaiting = trackers
            .iter()
            .find(|t| t.kind == TrackerKind::Awaiting)
            .unwrap();
        assert!(!awaiting.resolved);
    }

    #[tokio::test]
    async fn group_membership_is_substring_and_case_insensitive() {
        let store = MemoryStore::new();
        store
            .upsert_group(&Group {
                account_id: "acct_1".into(),
                name: "vendors".into(),
                members: vec!["@Vendor.com".into(), "billing@other.io".into()],
            })
            .await
            .unwrap();

        assert!(store
            .group_contains("acct_1", "vendors", "invoices@vendor.com")
            .await
            .unwrap());
        assert!(!store
            .group_contains("acct_1", "vendors", "friend@personal.net")
            .await
            .unwrap());
        assert!(!store
            .group_contains("acct_1", "no-such-group", "invoices@vendor.com")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn digest_drain_empties_the_queue() {
        let store = MemoryStore::new();
        store
            .queue_digest_item(&DigestItem {
                account_id: "acct_1".into(),
                message_id: "m1".into(),
                thread_id: "t1".into(),
                from: "news@example.com".into(),
                subject: "weekly".into(),
                snippet: "hi".into(),
                rule_name: "newsletters".into(),
                queued_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(store.drain_digest_items("acct_1").await.unwrap().len(), 1);
        assert!(store.drain_digest_items("acct_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processing_marker_blocks_until_released_or_expired() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.try_begin_processing("acct_1", "m1", ttl).await.unwrap());
        assert!(!store.try_begin_processing("acct_1", "m1", ttl).await.unwrap());

        store.end_processing("acct_1", "m1").await.unwrap();
        assert!(store.try_begin_processing("acct_1", "m1", ttl).await.unwrap());

        // A zero TTL means any existing marker is already expired.
        assert!(store
            .try_begin_processing("acct_1", "m1", Duration::ZERO)
            .await
            .unwrap());
    }
}
