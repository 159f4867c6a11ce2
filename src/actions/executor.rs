//! Action execution with exactly-once semantics.
//!
//! The executed-rule record is the idempotency backstop: a PENDING
//! record is persisted atomically BEFORE any side effect, so a crash
//! leaves either no record (nothing happened) or a PENDING record a
//! later delivery resumes. An APPLIED or REJECTED record short-circuits
//! replays without a single provider call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::classify::Classifier;
use crate::config::Account;
use crate::error::ExecuteError;
use crate::message::MessageEvent;
use crate::provider::{EmailProvider, OutgoingEmail};
use crate::rules::{Action, ActionText, ConversationStatus, MatchOutcome, Rule};
use crate::store::{
    AutomationStore, DigestItem, ExecutedInsert, ExecutedRule, ExecutionStatus, ThreadTracker,
    TrackerKind,
};
use crate::threads::ThreadStatusManager;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the actions of matched rules against the provider, gated by the
/// executed-rule record.
pub struct ActionExecutor {
    store: Arc<dyn AutomationStore>,
    provider: Arc<dyn EmailProvider>,
    classifier: Arc<dyn Classifier>,
    status: ThreadStatusManager,
    templates: crate::actions::TemplateEngine,
    http: reqwest::Client,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        provider: Arc<dyn EmailProvider>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            store,
            provider: provider.clone(),
            classifier,
            status: ThreadStatusManager::new(provider),
            templates: crate::actions::TemplateEngine::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Execute every matched rule's actions for one message.
    ///
    /// Returns `None` when nothing matched (no record is written), the
    /// final record otherwise. A retryable failure leaves the record
    /// PENDING and propagates so the delivery is retried; unrecoverable
    /// failures mark it REJECTED, which is terminal.
    #[instrument(skip_all, fields(account = %account.id, message_id = %message.id))]
    pub async fn execute(
        &self,
        account: &Account,
        message: &MessageEvent,
        outcome: &MatchOutcome,
    ) -> Result<Option<ExecutedRule>, ExecuteError> {
        if outcome.is_empty() {
            debug!("no rules matched, nothing to record");
            return Ok(None);
        }

        let rule_ids = outcome.rules.iter().map(|m| m.rule.id).collect();
        let mut record =
            ExecutedRule::pending(&account.id, &message.id, &message.thread_id, rule_ids);

        match self.store.insert_executed_if_absent(&record).await? {
            ExecutedInsert::Created => {}
            ExecutedInsert::Existing(existing) => match existing.status {
                ExecutionStatus::Applied => {
                    debug!("already applied, acknowledging replay");
                    return Ok(Some(existing));
                }
                ExecutionStatus::Rejected => {
                    debug!("previously rejected, not retrying");
                    return Ok(Some(existing));
                }
                ExecutionStatus::Pending => {
                    info!("resuming interrupted execution");
                    record = existing;
                }
            },
        }

        let mut attempted: Vec<String> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for matched in &outcome.rules {
            let rule = &matched.rule;
            match self.run_rule(account, message, rule, &mut attempted).await {
                Ok(()) => {
                    info!(rule = %rule.name, "rule actions applied");
                }
                Err(e) if e.is_retryable() => {
                    // Keep the record PENDING so the retried delivery
                    // picks execution back up.
                    warn!(rule = %rule.name, error = %e, "retryable action failure");
                    self.store
                        .update_executed(
                            &account.id,
                            &message.id,
                            ExecutionStatus::Pending,
                            &attempted,
                            None,
                        )
                        .await?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "rule actions failed unrecoverably");
                    failures.push(format!("{}: {}", rule.name, e));
                }
            }
        }

        let (status, reason) = if failures.is_empty() {
            (ExecutionStatus::Applied, None)
        } else {
            (ExecutionStatus::Rejected, Some(failures.join("; ")))
        };

        self.store
            .update_executed(
                &account.id,
                &message.id,
                status,
                &attempted,
                reason.as_deref(),
            )
            .await?;

        record.status = status;
        record.actions = attempted;
        record.reason = reason;
        record.updated_at = Utc::now();
        Ok(Some(record))
    }

    /// Run one rule's actions in list order, stopping at the first
    /// failure.
    async fn run_rule(
        &self,
        account: &Account,
        message: &MessageEvent,
        rule: &Rule,
        attempted: &mut Vec<String>,
    ) -> Result<(), ExecuteError> {
        for action in &rule.actions {
            debug!(rule = %rule.name, action = action.type_tag(), "executing action");
            attempted.push(action.type_tag().to_string());
            self.apply_action(account, message, rule, action).await?;
        }
        Ok(())
    }

    async fn apply_action(
        &self,
        account: &Account,
        message: &MessageEvent,
        rule: &Rule,
        action: &Action,
    ) -> Result<(), ExecuteError> {
        match action {
            Action::Label { name } => {
                let label = self.provider.ensure_label(name).await?;
                self.provider
                    .add_thread_label(&message.thread_id, &label.id)
                    .await?;
            }
            Action::Archive => {
                self.provider.archive_thread(&message.thread_id).await?;
            }
            Action::Forward { to } => {
                let email = OutgoingEmail::forward(message, to);
                self.provider.send_email(&email).await?;
            }
            Action::Reply { body } => {
                let body = self.resolve_text(body, message).await?;
                let email = OutgoingEmail::reply_to(message, body);
                self.provider.send_email(&email).await?;
            }
            Action::SendEmail { to, subject, body } => {
                let subject = self.resolve_text(subject, message).await?;
                let body = self.resolve_text(body, message).await?;
                self.provider
                    .send_email(&OutgoingEmail::new(to, subject, body))
                    .await?;
            }
            Action::Digest => {
                let item = DigestItem {
                    account_id: account.id.clone(),
                    message_id: message.id.clone(),
                    thread_id: message.thread_id.clone(),
                    from: message.headers.from.clone(),
                    subject: message.headers.subject.clone(),
                    snippet: message.snippet.clone(),
                    rule_name: rule.name.clone(),
                    queued_at: Utc::now(),
                };
                self.store.queue_digest_item(&item).await?;
            }
            Action::TrackThread { status } => {
                self.track_thread(account, message, *status).await?;
            }
            Action::MarkRead => {
                self.provider.mark_read(&message.id).await?;
            }
            Action::MarkSpam => {
                self.provider.mark_spam(&message.id).await?;
            }
            Action::DraftReply { body } => {
                let body = self.resolve_text(body, message).await?;
                self.provider
                    .create_draft(&OutgoingEmail::reply_to(message, body))
                    .await?;
            }
            Action::CallWebhook { url } => {
                self.call_webhook(url, message, rule).await?;
            }
        }
        Ok(())
    }

    /// Record reply-state and apply the matching status label. FYI is
    /// label-only; ACTIONED closes any open trackers.
    async fn track_thread(
        &self,
        account: &Account,
        message: &MessageEvent,
        status: ConversationStatus,
    ) -> Result<(), ExecuteError> {
        match status {
            ConversationStatus::NeedsReply => {
                self.upsert_tracker(account, message, TrackerKind::NeedsReply)
                    .await?;
            }
            ConversationStatus::AwaitingReply => {
                self.upsert_tracker(account, message, TrackerKind::Awaiting)
                    .await?;
            }
            ConversationStatus::Actioned => {
                self.store
                    .resolve_tracker(&account.id, &message.thread_id, TrackerKind::NeedsReply)
                    .await?;
                self.store
                    .resolve_tracker(&account.id, &message.thread_id, TrackerKind::Awaiting)
                    .await?;
            }
            ConversationStatus::Fyi => {}
        }

        self.status
            .apply_status(&message.thread_id, status)
            .await?;
        Ok(())
    }

    async fn upsert_tracker(
        &self,
        account: &Account,
        message: &MessageEvent,
        kind: TrackerKind,
    ) -> Result<(), ExecuteError> {
        let tracker = ThreadTracker {
            account_id: account.id.clone(),
            thread_id: message.thread_id.clone(),
            kind,
            resolved: false,
            sent_at: message.headers.date,
        };
        self.store.upsert_tracker(&tracker).await?;
        Ok(())
    }

    async fn call_webhook(
        &self,
        url: &str,
        message: &MessageEvent,
        rule: &Rule,
    ) -> Result<(), ExecuteError> {
        let payload = serde_json::json!({
            "rule": rule.name,
            "message_id": message.id,
            "thread_id": message.thread_id,
            "from": message.headers.from,
            "subject": message.headers.subject,
            "snippet": message.snippet,
            "date": message.headers.date,
        });

        let response = self
            .http
            .post(url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExecuteError::Webhook {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ExecuteError::Webhook {
                url: url.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }

    async fn resolve_text(
        &self,
        text: &ActionText,
        message: &MessageEvent,
    ) -> Result<String, ExecuteError> {
        match text {
            ActionText::Template { text } => Ok(self.templates.render(text, message)),
            ActionText::Prompt { prompt } => {
                Ok(self.classifier.generate(prompt, message).await?)
            }
        }
    }
}
