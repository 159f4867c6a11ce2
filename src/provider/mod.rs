//! Email provider abstraction.
//!
//! Everything the engine does to a mailbox goes through `EmailProvider`.
//! Real SDK integrations live behind this trait in deployments; the crate
//! ships `MemoryProvider`, an in-memory mailbox for tests and local runs.

pub mod memory;

pub use memory::MemoryProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::MessageEvent;

/// A provider label: stable id plus the user-visible name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// A thread as the provider currently sees it.
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub id: String,
    pub messages: Vec<MessageEvent>,
}

/// Date bounds for bulk listing. `None` means unbounded on that side.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

/// One page of a message listing.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<MessageEvent>,
    pub next_page_token: Option<String>,
}

/// A change notification: one message touched in one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDelta {
    pub message_id: String,
    pub thread_id: String,
}

/// An email to send or draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub cc: Option<String>,
    pub subject: String,
    pub body: String,
    /// Message id this replies to, for threading headers.
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
}

impl OutgoingEmail {
    /// A fresh email outside any thread.
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            cc: None,
            subject: subject.into(),
            body: body.into(),
            in_reply_to: None,
            thread_id: None,
        }
    }

    /// A reply within the original message's thread, addressed to its
    /// sender.
    pub fn reply_to(original: &MessageEvent, body: impl Into<String>) -> Self {
        Self {
            to: original.headers.from.clone(),
            cc: None,
            subject: reply_subject(&original.headers.subject),
            body: body.into(),
            in_reply_to: Some(original.id.clone()),
            thread_id: Some(original.thread_id.clone()),
        }
    }

    /// The original forwarded onward with the conventional quoted header.
    pub fn forward(original: &MessageEvent, to: impl Into<String>) -> Self {
        let body = format!(
            "---------- Forwarded message ----------\nFrom: {}\nDate: {}\nSubject: {}\n\n{}",
            original.headers.from,
            original.headers.date.to_rfc2822(),
            original.headers.subject,
            original.content(),
        );
        Self {
            to: to.into(),
            cc: None,
            subject: forward_subject(&original.headers.subject),
            body,
            in_reply_to: None,
            thread_id: None,
        }
    }
}

fn reply_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

fn forward_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("fwd:") {
        subject.to_string()
    } else {
        format!("Fwd: {subject}")
    }
}

/// The mailbox operations the engine consumes.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    // ── Reading ─────────────────────────────────────────────────────

    /// Fetch a single message. Missing messages answer `NotFound`, which
    /// the ingest paths treat as benign.
    async fn get_message(&self, id: &str) -> Result<MessageEvent, ProviderError>;

    /// Fetch a thread with its current per-message label state.
    async fn get_thread(&self, id: &str) -> Result<ThreadSnapshot, ProviderError>;

    /// One page of inbox messages matching the query, newest first.
    async fn list_messages(
        &self,
        query: &MessageQuery,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage, ProviderError>;

    /// Resolve a history id to the deltas it covers.
    async fn history_deltas(&self, since_id: &str) -> Result<Vec<HistoryDelta>, ProviderError>;

    // ── Labels ──────────────────────────────────────────────────────

    /// Look up a label by name without creating it.
    async fn get_label_by_name(&self, name: &str) -> Result<Option<Label>, ProviderError>;

    /// Look up a label by name, creating it if absent.
    async fn ensure_label(&self, name: &str) -> Result<Label, ProviderError>;

    /// Apply a label to every message of a thread.
    async fn add_thread_label(&self, thread_id: &str, label_id: &str)
        -> Result<(), ProviderError>;

    /// Remove a label from every message of a thread.
    async fn remove_thread_label(
        &self,
        thread_id: &str,
        label_id: &str,
    ) -> Result<(), ProviderError>;

    /// Remove a label from one message.
    async fn remove_message_label(
        &self,
        message_id: &str,
        label_id: &str,
    ) -> Result<(), ProviderError>;

    // ── Mailbox state ───────────────────────────────────────────────

    /// Remove the inbox designation from a thread.
    async fn archive_thread(&self, thread_id: &str) -> Result<(), ProviderError>;

    /// Remove the unread designation from a message.
    async fn mark_read(&self, message_id: &str) -> Result<(), ProviderError>;

    /// Move a message to spam.
    async fn mark_spam(&self, message_id: &str) -> Result<(), ProviderError>;

    // ── Sending ─────────────────────────────────────────────────────

    /// Send an email; returns the new message id.
    async fn send_email(&self, email: &OutgoingEmail) -> Result<String, ProviderError>;

    /// Create a draft instead of sending; returns the draft id.
    async fn create_draft(&self, email: &OutgoingEmail) -> Result<String, ProviderError>;

    // ── Push subscription ───────────────────────────────────────────

    /// Register the push watch; returns its expiry.
    async fn watch(&self) -> Result<DateTime<Utc>, ProviderError>;

    /// Tear the push watch down.
    async fn unwatch(&self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Direction, MessageHeaders};

    fn original() -> MessageEvent {
        MessageEvent {
            id: "m1".into(),
            thread_id: "t1".into(),
            direction: Direction::Inbound,
            headers: MessageHeaders {
                from: "Jane Doe <jane@example.com>".into(),
                to: "me@example.com".into(),
                cc: None,
                subject: "Quarterly numbers".into(),
                date: "2026-02-17T08:15:00Z".parse().unwrap(),
            },
            label_ids: vec![],
            snippet: "the numbers are in".into(),
            body: None,
        }
    }

    #[test]
    fn reply_prefixes_subject_once() {
        let reply = OutgoingEmail::reply_to(&original(), "thanks");
        assert_eq!(reply.subject, "Re: Quarterly numbers");
        assert_eq!(reply.to, "Jane Doe <jane@example.com>");
        assert_eq!(reply.thread_id.as_deref(), Some("t1"));
        assert_eq!(reply.in_reply_to.as_deref(), Some("m1"));

        let mut already = original();
        already.headers.subject = "RE: Quarterly numbers".into();
        let reply = OutgoingEmail::reply_to(&already, "thanks");
        assert_eq!(reply.subject, "RE: Quarterly numbers");
    }

    #[test]
    fn forward_quotes_the_original() {
        let fwd = OutgoingEmail::forward(&original(), "ops@example.com");
        assert_eq!(fwd.subject, "Fwd: Quarterly numbers");
        assert!(fwd.body.contains("Forwarded message"));
        assert!(fwd.body.contains("From: Jane Doe <jane@example.com>"));
        assert!(fwd.body.contains("the numbers are in"));
        assert!(fwd.thread_id.is_none());
    }
}
