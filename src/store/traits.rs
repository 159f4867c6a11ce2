//! Unified `AutomationStore` trait — single async interface for all
//! persistence.
//!
//! The engine only ever sees this trait. The in-memory backend ships with
//! the crate for tests and local runs; a real deployment implements the
//! trait over its own persistence engine.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::rules::model::Rule;

/// Lifecycle of an executed-rule record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Record persisted, side effects not yet complete.
    Pending,
    /// Every action of every matched rule ran.
    Applied,
    /// An action failed unrecoverably; `reason` says why.
    Rejected,
}

/// The idempotency record: at most one per (account, message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedRule {
    pub account_id: String,
    pub message_id: String,
    pub thread_id: String,
    /// Matched rules in execution order.
    pub rule_ids: Vec<Uuid>,
    /// Action tags in the order they were attempted.
    pub actions: Vec<String>,
    pub status: ExecutionStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutedRule {
    /// A fresh PENDING record, persisted before any side effect runs.
    pub fn pending(
        account_id: impl Into<String>,
        message_id: impl Into<String>,
        thread_id: impl Into<String>,
        rule_ids: Vec<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            account_id: account_id.into(),
            message_id: message_id.into(),
            thread_id: thread_id.into(),
            rule_ids,
            actions: Vec::new(),
            status: ExecutionStatus::Pending,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of the atomic insert-if-absent on executed-rule records.
#[derive(Debug, Clone)]
pub enum ExecutedInsert {
    /// No record existed; the caller's PENDING record is now persisted.
    Created,
    /// A record already existed; the caller decides what that means.
    Existing(ExecutedRule),
}

/// Reply-state tracking for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    /// The account owner owes a reply.
    NeedsReply,
    /// The account owner replied and awaits the other side.
    Awaiting,
    /// The thread was marked done.
    Resolved,
}

/// One conceptually-active tracker per thread per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadTracker {
    pub account_id: String,
    pub thread_id: String,
    pub kind: TrackerKind,
    pub resolved: bool,
    pub sent_at: DateTime<Utc>,
}

/// A named set of sender patterns owned by an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub account_id: String,
    pub name: String,
    /// Patterns matched case-insensitively as substrings of the sender
    /// address (so `@vendor.com` covers the whole domain).
    pub members: Vec<String>,
}

/// A message queued for the next digest email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestItem {
    pub account_id: String,
    pub message_id: String,
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    pub snippet: String,
    pub rule_name: String,
    pub queued_at: DateTime<Utc>,
}

/// Backend-agnostic store trait covering rules, executed-rule records,
/// trackers, groups, the digest queue, and processing markers.
#[async_trait]
pub trait AutomationStore: Send + Sync {
    // ── Rules ───────────────────────────────────────────────────────

    /// All rules owned by the account, in no particular order.
    async fn list_rules(&self, account_id: &str) -> Result<Vec<Rule>, StoreError>;

    /// Get a rule by id.
    async fn get_rule(&self, id: Uuid) -> Result<Option<Rule>, StoreError>;

    /// Insert or replace a rule.
    async fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError>;

    /// Delete a rule. Returns whether it existed.
    async fn delete_rule(&self, id: Uuid) -> Result<bool, StoreError>;

    // ── Executed-rule records ───────────────────────────────────────

    /// Atomically insert the record unless one already exists for its
    /// (account, message) key. This is the idempotency backstop: backends
    /// must guarantee that under concurrent calls exactly one caller
    /// observes `Created`.
    async fn insert_executed_if_absent(
        &self,
        record: &ExecutedRule,
    ) -> Result<ExecutedInsert, StoreError>;

    /// Update status, attempted actions, and reason on an existing record.
    async fn update_executed(
        &self,
        account_id: &str,
        message_id: &str,
        status: ExecutionStatus,
        actions: &[String],
        reason: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Look up the record for a message.
    async fn get_executed(
        &self,
        account_id: &str,
        message_id: &str,
    ) -> Result<Option<ExecutedRule>, StoreError>;

    /// Which of the given message ids already have a record. One call per
    /// page, not per message.
    async fn executed_message_ids(
        &self,
        account_id: &str,
        message_ids: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    // ── Thread trackers ─────────────────────────────────────────────

    /// Insert or refresh the tracker for (thread, kind), unresolved.
    async fn upsert_tracker(&self, tracker: &ThreadTracker) -> Result<(), StoreError>;

    /// Mark the tracker for (thread, kind) resolved. Returns whether an
    /// unresolved tracker was found. Other kinds are untouched.
    async fn resolve_tracker(
        &self,
        account_id: &str,
        thread_id: &str,
        kind: TrackerKind,
    ) -> Result<bool, StoreError>;

    /// All trackers for a thread.
    async fn get_trackers(
        &self,
        account_id: &str,
        thread_id: &str,
    ) -> Result<Vec<ThreadTracker>, StoreError>;

    // ── Sender groups ───────────────────────────────────────────────

    /// Insert or replace a group.
    async fn upsert_group(&self, group: &Group) -> Result<(), StoreError>;

    /// Whether the named group contains the sender address. An unknown
    /// group contains nothing.
    async fn group_contains(
        &self,
        account_id: &str,
        group: &str,
        sender: &str,
    ) -> Result<bool, StoreError>;

    // ── Digest queue ────────────────────────────────────────────────

    /// Queue a message for the next digest email.
    async fn queue_digest_item(&self, item: &DigestItem) -> Result<(), StoreError>;

    /// Take every queued item for the account, emptying the queue.
    async fn drain_digest_items(&self, account_id: &str) -> Result<Vec<DigestItem>, StoreError>;

    // ── Processing markers ──────────────────────────────────────────

    /// Try to place a short-lived marker for the message. Returns false
    /// when an unexpired marker is already present. Best-effort only; the
    /// executed-rule record stays the final authority.
    async fn try_begin_processing(
        &self,
        account_id: &str,
        message_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Drop the marker once processing finished (either way).
    async fn end_processing(&self, account_id: &str, message_id: &str)
        -> Result<(), StoreError>;
}
