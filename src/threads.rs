//! Conversation-status labels on threads.
//!
//! A thread carries at most one label from the status family
//! (Needs-Reply, Awaiting-Reply, FYI, Actioned). Applying a status
//! always starts from a fresh thread fetch and fresh label-id lookups,
//! because label state drifts under concurrent automations and ids
//! differ per mailbox.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::EmailProvider;
use crate::rules::ConversationStatus;

/// What one status pass did.
#[derive(Debug, Clone, Default)]
pub struct StatusApplyReport {
    pub applied: Option<ConversationStatus>,
    /// Competing labels removed, counted per message.
    pub removed: usize,
    /// Removal attempts that failed and were skipped.
    pub failed: usize,
}

/// Enforces the one-status-label-per-thread invariant.
pub struct ThreadStatusManager {
    provider: Arc<dyn EmailProvider>,
}

impl ThreadStatusManager {
    pub fn new(provider: Arc<dyn EmailProvider>) -> Self {
        Self { provider }
    }

    /// Make `status` the thread's only status label. Competing labels
    /// are stripped from every message first; individual removal
    /// failures are counted, not fatal, and the new label is still
    /// applied.
    pub async fn apply_status(
        &self,
        thread_id: &str,
        status: ConversationStatus,
    ) -> Result<StatusApplyReport, ProviderError> {
        let mut report = self.remove_competing(thread_id, Some(status)).await?;

        let label = self.provider.ensure_label(status.label_name()).await?;
        self.provider.add_thread_label(thread_id, &label.id).await?;
        report.applied = Some(status);

        debug!(
            thread_id,
            status = %status,
            removed = report.removed,
            failed = report.failed,
            "thread status applied"
        );
        Ok(report)
    }

    /// Strip every status label from the thread.
    pub async fn clear_status(&self, thread_id: &str) -> Result<StatusApplyReport, ProviderError> {
        let report = self.remove_competing(thread_id, None).await?;
        debug!(thread_id, removed = report.removed, "thread status cleared");
        Ok(report)
    }

    async fn remove_competing(
        &self,
        thread_id: &str,
        keep: Option<ConversationStatus>,
    ) -> Result<StatusApplyReport, ProviderError> {
        let thread = self.provider.get_thread(thread_id).await?;

        let mut report = StatusApplyReport::default();
        for status in ConversationStatus::ALL {
            if keep == Some(status) {
                continue;
            }
            // Label ids are looked up fresh per pass; a mailbox may not
            // have the label at all yet.
            let Some(label) = self.provider.get_label_by_name(status.label_name()).await? else {
                continue;
            };

            for message in &thread.messages {
                if !message.has_label(&label.id) {
                    continue;
                }
                match self
                    .provider
                    .remove_message_label(&message.id, &label.id)
                    .await
                {
                    Ok(()) => report.removed += 1,
                    Err(e) => {
                        warn!(
                            message_id = %message.id,
                            label = %label.name,
                            error = %e,
                            "failed to remove status label, continuing"
                        );
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }
}
