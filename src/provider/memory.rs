//! In-memory mailbox provider.
//!
//! Backs tests and local runs: messages are seeded directly, label state
//! lives on the stored events, and outgoing mail is recorded instead of
//! delivered. Mutating operations are logged so tests can assert exactly
//! which side effects happened.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::ProviderError;
use crate::message::{
    Direction, LABEL_INBOX, LABEL_SENT, LABEL_SPAM, LABEL_UNREAD, MessageEvent, MessageHeaders,
};
use crate::provider::{
    EmailProvider, HistoryDelta, Label, MessagePage, MessageQuery, OutgoingEmail, ThreadSnapshot,
};

#[derive(Default)]
struct Inner {
    messages: HashMap<String, MessageEvent>,
    labels: Vec<Label>,
    label_seq: u32,
    send_seq: u32,
    sent: Vec<OutgoingEmail>,
    drafts: Vec<OutgoingEmail>,
    deltas: Vec<HistoryDelta>,
    /// Mutating operations, in order, as `op:target` strings.
    ops: Vec<String>,
    watch_expiry: Option<DateTime<Utc>>,
}

/// An in-memory mailbox owned by one address.
pub struct MemoryProvider {
    own_address: String,
    inner: RwLock<Inner>,
}

impl MemoryProvider {
    pub fn new(own_address: impl Into<String>) -> Self {
        let mut inner = Inner::default();
        // System labels exist up front with id == name, as providers do.
        for name in [LABEL_INBOX, LABEL_SENT, LABEL_SPAM, LABEL_UNREAD, "TRASH"] {
            inner.labels.push(Label {
                id: name.to_string(),
                name: name.to_string(),
            });
        }
        Self {
            own_address: own_address.into(),
            inner: RwLock::new(inner),
        }
    }

    /// Seed a message and record its delta.
    pub async fn add_message(&self, event: MessageEvent) {
        let mut inner = self.inner.write().await;
        inner.deltas.push(HistoryDelta {
            message_id: event.id.clone(),
            thread_id: event.thread_id.clone(),
        });
        inner.messages.insert(event.id.clone(), event);
    }

    /// Everything sent through this provider, oldest first.
    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.inner.read().await.sent.clone()
    }

    /// Every draft created, oldest first.
    pub async fn drafts(&self) -> Vec<OutgoingEmail> {
        self.inner.read().await.drafts.clone()
    }

    /// Mutating operations performed so far, in order.
    pub async fn ops(&self) -> Vec<String> {
        self.inner.read().await.ops.clone()
    }

    /// Number of mutating operations performed so far.
    pub async fn op_count(&self) -> usize {
        self.inner.read().await.ops.len()
    }

    /// Current label set of a stored message, for assertions.
    pub async fn labels_of(&self, message_id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .messages
            .get(message_id)
            .map(|m| m.label_ids.clone())
            .unwrap_or_default()
    }

    pub async fn watch_active(&self) -> bool {
        self.inner.read().await.watch_expiry.is_some()
    }
}

fn thread_messages(inner: &Inner, thread_id: &str) -> Vec<MessageEvent> {
    let mut messages: Vec<MessageEvent> = inner
        .messages
        .values()
        .filter(|m| m.thread_id == thread_id)
        .cloned()
        .collect();
    messages.sort_by_key(|m| m.headers.date);
    messages
}

fn with_message<F>(inner: &mut Inner, message_id: &str, f: F) -> Result<(), ProviderError>
where
    F: FnOnce(&mut MessageEvent),
{
    match inner.messages.get_mut(message_id) {
        Some(message) => {
            f(message);
            Ok(())
        }
        None => Err(ProviderError::not_found("message", message_id)),
    }
}

#[async_trait]
impl EmailProvider for MemoryProvider {
    async fn get_message(&self, id: &str) -> Result<MessageEvent, ProviderError> {
        self.inner
            .read()
            .await
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::not_found("message", id))
    }

    async fn get_thread(&self, id: &str) -> Result<ThreadSnapshot, ProviderError> {
        let inner = self.inner.read().await;
        let messages = thread_messages(&inner, id);
        if messages.is_empty() {
            return Err(ProviderError::not_found("thread", id));
        }
        Ok(ThreadSnapshot {
            id: id.to_string(),
            messages,
        })
    }

    async fn list_messages(
        &self,
        query: &MessageQuery,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage, ProviderError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&MessageEvent> = inner
            .messages
            .values()
            .filter(|m| m.is_in_inbox())
            .filter(|m| query.after.is_none_or(|a| m.headers.date > a))
            .filter(|m| query.before.is_none_or(|b| m.headers.date < b))
            .collect();
        matching.sort_by(|a, b| b.headers.date.cmp(&a.headers.date));

        let offset: usize = match page_token {
            Some(token) => token.parse().map_err(|_| ProviderError::InvalidRequest {
                reason: format!("bad page token: {token}"),
            })?,
            None => 0,
        };
        let page: Vec<MessageEvent> = matching
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|m| (*m).clone())
            .collect();
        let next_page_token = if offset + page.len() < matching.len() {
            Some((offset + page.len()).to_string())
        } else {
            None
        };
        Ok(MessagePage {
            messages: page,
            next_page_token,
        })
    }

    async fn history_deltas(&self, since_id: &str) -> Result<Vec<HistoryDelta>, ProviderError> {
        let inner = self.inner.read().await;
        let offset: usize = since_id.parse().map_err(|_| ProviderError::InvalidRequest {
            reason: format!("bad history id: {since_id}"),
        })?;
        Ok(inner.deltas.iter().skip(offset).cloned().collect())
    }

    async fn get_label_by_name(&self, name: &str) -> Result<Option<Label>, ProviderError> {
        let inner = self.inner.read().await;
        Ok(inner
            .labels
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn ensure_label(&self, name: &str) -> Result<Label, ProviderError> {
        let mut inner = self.inner.write().await;
        if let Some(label) = inner
            .labels
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
        {
            return Ok(label.clone());
        }
        inner.label_seq += 1;
        let label = Label {
            id: format!("label_{}", inner.label_seq),
            name: name.to_string(),
        };
        inner.labels.push(label.clone());
        inner.ops.push(format!("create_label:{name}"));
        Ok(label)
    }

    async fn add_thread_label(
        &self,
        thread_id: &str,
        label_id: &str,
    ) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        let ids: Vec<String> = thread_messages(&inner, thread_id)
            .into_iter()
            .map(|m| m.id)
            .collect();
        if ids.is_empty() {
            return Err(ProviderError::not_found("thread", thread_id));
        }
        for id in ids {
            with_message(&mut inner, &id, |m| {
                if !m.has_label(label_id) {
                    m.label_ids.push(label_id.to_string());
                }
            })?;
        }
        inner.ops.push(format!("add_thread_label:{thread_id}:{label_id}"));
        Ok(())
    }

    async fn remove_thread_label(
        &self,
        thread_id: &str,
        label_id: &str,
    ) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        let ids: Vec<String> = thread_messages(&inner, thread_id)
            .into_iter()
            .map(|m| m.id)
            .collect();
        for id in ids {
            with_message(&mut inner, &id, |m| m.label_ids.retain(|l| l != label_id))?;
        }
        inner
            .ops
            .push(format!("remove_thread_label:{thread_id}:{label_id}"));
        Ok(())
    }

    async fn remove_message_label(
        &self,
        message_id: &str,
        label_id: &str,
    ) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        with_message(&mut inner, message_id, |m| {
            m.label_ids.retain(|l| l != label_id)
        })?;
        inner
            .ops
            .push(format!("remove_message_label:{message_id}:{label_id}"));
        Ok(())
    }

    async fn archive_thread(&self, thread_id: &str) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        let ids: Vec<String> = thread_messages(&inner, thread_id)
            .into_iter()
            .map(|m| m.id)
            .collect();
        if ids.is_empty() {
            return Err(ProviderError::not_found("thread", thread_id));
        }
        for id in ids {
            with_message(&mut inner, &id, |m| {
                m.label_ids.retain(|l| l != LABEL_INBOX)
            })?;
        }
        inner.ops.push(format!("archive_thread:{thread_id}"));
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        with_message(&mut inner, message_id, |m| {
            m.label_ids.retain(|l| l != LABEL_UNREAD)
        })?;
        inner.ops.push(format!("mark_read:{message_id}"));
        Ok(())
    }

    async fn mark_spam(&self, message_id: &str) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        with_message(&mut inner, message_id, |m| {
            m.label_ids.retain(|l| l != LABEL_INBOX);
            if !m.has_label(LABEL_SPAM) {
                m.label_ids.push(LABEL_SPAM.to_string());
            }
        })?;
        inner.ops.push(format!("mark_spam:{message_id}"));
        Ok(())
    }

    async fn send_email(&self, email: &OutgoingEmail) -> Result<String, ProviderError> {
        let mut inner = self.inner.write().await;
        inner.send_seq += 1;
        let id = format!("sent_{}", inner.send_seq);
        // Sends within a thread become visible as outbound messages so
        // reply tracking sees them on the next delta.
        if let Some(thread_id) = &email.thread_id {
            let event = MessageEvent {
                id: id.clone(),
                thread_id: thread_id.clone(),
                direction: Direction::Outbound,
                headers: MessageHeaders {
                    from: self.own_address.clone(),
                    to: email.to.clone(),
                    cc: email.cc.clone(),
                    subject: email.subject.clone(),
                    date: Utc::now(),
                },
                label_ids: vec![LABEL_SENT.to_string()],
                snippet: email.body.chars().take(120).collect(),
                body: Some(email.body.clone()),
            };
            inner.deltas.push(HistoryDelta {
                message_id: id.clone(),
                thread_id: thread_id.clone(),
            });
            inner.messages.insert(id.clone(), event);
        }
        inner.ops.push(format!("send_email:{}", email.to));
        inner.sent.push(email.clone());
        Ok(id)
    }

    async fn create_draft(&self, email: &OutgoingEmail) -> Result<String, ProviderError> {
        let mut inner = self.inner.write().await;
        inner.send_seq += 1;
        let id = format!("draft_{}", inner.send_seq);
        inner.ops.push(format!("create_draft:{}", email.to));
        inner.drafts.push(email.clone());
        Ok(id)
    }

    async fn watch(&self) -> Result<DateTime<Utc>, ProviderError> {
        let mut inner = self.inner.write().await;
        let expiry = Utc::now() + Duration::days(7);
        inner.watch_expiry = Some(expiry);
        Ok(expiry)
    }

    async fn unwatch(&self) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        inner.watch_expiry = None;
        Ok(())
    }
}
