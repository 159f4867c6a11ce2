//! Event ingestion.
//!
//! Push deltas carry only {message id, thread id}; everything else is
//! fetched fresh exactly once. Inbound messages flow into match and
//! execute; the account's own outbound mail maintains reply-state
//! instead. A TTL-bounded store marker narrows the duplicate-delivery
//! window, but the executed-rule record remains the authority.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::actions::ActionExecutor;
use crate::config::Account;
use crate::error::{IngestError, ProviderError};
use crate::message::{Direction, MessageEvent};
use crate::provider::{EmailProvider, HistoryDelta};
use crate::rules::{ConversationStatus, RuleMatcher};
use crate::store::{AutomationStore, ThreadTracker, TrackerKind};
use crate::threads::ThreadStatusManager;

const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(60);

/// What happened to one delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The message vanished between the delta and the fetch.
    Missing,
    /// Trashed, spam, or otherwise outside the inbox and sent states.
    Skipped,
    /// Another worker holds the processing marker.
    InFlight,
    /// Inbound path ran; `matched` rules fired.
    Processed { matched: usize },
    /// Outbound path ran reply-state maintenance.
    ReplyStateUpdated,
}

/// Entry point for provider push deltas.
pub struct EventIngestor {
    store: Arc<dyn AutomationStore>,
    provider: Arc<dyn EmailProvider>,
    matcher: Arc<RuleMatcher>,
    executor: Arc<ActionExecutor>,
    status: ThreadStatusManager,
    marker_ttl: Duration,
}

impl EventIngestor {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        provider: Arc<dyn EmailProvider>,
        matcher: Arc<RuleMatcher>,
        executor: Arc<ActionExecutor>,
    ) -> Self {
        Self {
            store,
            provider: provider.clone(),
            matcher,
            executor,
            status: ThreadStatusManager::new(provider),
            marker_ttl: DEFAULT_MARKER_TTL,
        }
    }

    /// Process one push delta end to end.
    #[instrument(skip_all, fields(account = %account.id, message_id = %delta.message_id))]
    pub async fn ingest(
        &self,
        account: &Account,
        delta: &HistoryDelta,
    ) -> Result<IngestOutcome, IngestError> {
        // One fetch; the delta payload itself is never trusted.
        let message = match self.provider.get_message(&delta.message_id).await {
            Ok(message) => message,
            Err(ProviderError::NotFound { .. }) => {
                debug!("message gone before fetch, skipping");
                return Ok(IngestOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        if message.is_discarded() || (!message.is_in_inbox() && !message.is_sent()) {
            debug!("message outside inbox/sent, skipping");
            return Ok(IngestOutcome::Skipped);
        }

        if !self
            .store
            .try_begin_processing(&account.id, &message.id, self.marker_ttl)
            .await?
        {
            debug!("processing marker already held");
            return Ok(IngestOutcome::InFlight);
        }

        let direction = Direction::derive(&message.headers.from, &account.email);
        let result = match direction {
            Direction::Inbound => {
                self.spawn_processing_label(account, &message);
                self.process_inbound(account, &message).await
            }
            Direction::Outbound => self.process_outbound(account, &message).await,
        };

        if let Err(e) = self.store.end_processing(&account.id, &message.id).await {
            warn!(error = %e, "failed to clear processing marker");
        }
        result
    }

    /// Apply the account's processing label without blocking the event
    /// path. Failures are logged; the label is cosmetic.
    fn spawn_processing_label(&self, account: &Account, message: &MessageEvent) {
        let Some(name) = account.processing_label.clone() else {
            return;
        };
        let provider = self.provider.clone();
        let thread_id = message.thread_id.clone();
        tokio::spawn(async move {
            let applied = async {
                let label = provider.ensure_label(&name).await?;
                provider.add_thread_label(&thread_id, &label.id).await
            }
            .await;
            if let Err(e) = applied {
                warn!(thread_id, label = %name, error = %e, "failed to apply processing label");
            }
        });
    }

    async fn process_inbound(
        &self,
        account: &Account,
        message: &MessageEvent,
    ) -> Result<IngestOutcome, IngestError> {
        let outcome = self.matcher.match_message(account, message).await?;
        let matched = outcome.rules.len();

        if matched > 0 {
            info!(rules = ?outcome.rule_names(), "inbound message matched");
        }
        self.executor.execute(account, message, &outcome).await?;

        Ok(IngestOutcome::Processed { matched })
    }

    /// The account owner replied: close the NEEDS_REPLY tracker, open an
    /// AWAITING one, and flip the thread's status label.
    async fn process_outbound(
        &self,
        account: &Account,
        message: &MessageEvent,
    ) -> Result<IngestOutcome, IngestError> {
        let resolved = self
            .store
            .resolve_tracker(&account.id, &message.thread_id, TrackerKind::NeedsReply)
            .await?;
        if resolved {
            debug!(thread_id = %message.thread_id, "needs-reply tracker resolved by reply");
        }

        self.store
            .upsert_tracker(&ThreadTracker {
                account_id: account.id.clone(),
                thread_id: message.thread_id.clone(),
                kind: TrackerKind::Awaiting,
                resolved: false,
                sent_at: Utc::now(),
            })
            .await?;

        self.status
            .apply_status(&message.thread_id, ConversationStatus::AwaitingReply)
            .await
            .map_err(IngestError::Provider)?;

        Ok(IngestOutcome::ReplyStateUpdated)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::classify::{Classifier, Verdict};
    use crate::error::ClassifierError;
    use crate::message::{MessageHeaders, LABEL_INBOX, LABEL_SENT, LABEL_TRASH};
    use crate::provider::MemoryProvider;
    use crate::rules::{Action, Condition, Rule};
    use crate::store::{ExecutionStatus, MemoryStore};

    struct NeverClassifier;

    #[async_trait::async_trait]
    impl Classifier for NeverClassifier {
        fn model_name(&self) -> &str {
            "never-test"
        }

        async fn classify(
            &self,
            _instructions: &str,
            _message: &MessageEvent,
        ) -> Result<Verdict, ClassifierError> {
            Ok(Verdict::no_match())
        }

        async fn generate(
            &self,
            _prompt: &str,
            _message: &MessageEvent,
        ) -> Result<String, ClassifierError> {
            unimplemented!("not used in ingest tests")
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        provider: Arc<MemoryProvider>,
        ingestor: EventIngestor,
        account: Account,
    }

    fn make_fixture() -> Fixture {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let provider = Arc::new(MemoryProvider::new("me@corp.test"));
        let classifier: Arc<dyn Classifier> = Arc::new(NeverClassifier);

        let matcher = Arc::new(RuleMatcher::new(store.clone(), classifier.clone()));
        let executor = Arc::new(ActionExecutor::new(
            store.clone(),
            provider.clone(),
            classifier,
        ));
        let ingestor = EventIngestor::new(store.clone(), provider.clone(), matcher, executor);

        Fixture {
            store,
            provider,
            ingestor,
            account: Account::new("acct", "me@corp.test"),
        }
    }

    fn delta(message_id: &str, thread_id: &str) -> HistoryDelta {
        HistoryDelta {
            message_id: message_id.to_string(),
            thread_id: thread_id.to_string(),
        }
    }

    fn inbound_event(id: &str, thread_id: &str, labels: &[&str]) -> MessageEvent {
        MessageEvent {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            direction: Direction::Inbound,
            headers: MessageHeaders {
                from: "alice@client.test".to_string(),
                to: "me@corp.test".to_string(),
                cc: None,
                subject: "Invoice 42".to_string(),
                date: Utc::now(),
            },
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
            snippet: "please find attached".to_string(),
            body: None,
        }
    }

    fn outbound_event(id: &str, thread_id: &str) -> MessageEvent {
        MessageEvent {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            direction: Direction::Outbound,
            headers: MessageHeaders {
                from: "me@corp.test".to_string(),
                to: "alice@client.test".to_string(),
                cc: None,
                subject: "Re: Invoice 42".to_string(),
                date: Utc::now(),
            },
            label_ids: vec![LABEL_SENT.to_string()],
            snippet: "on it".to_string(),
            body: None,
        }
    }

    #[tokio::test]
    async fn missing_message_is_a_benign_skip() {
        let fx = make_fixture();

        let outcome = fx
            .ingestor
            .ingest(&fx.account, &delta("ghost", "t1"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Missing);
    }

    #[tokio::test]
    async fn trashed_message_is_skipped() {
        let fx = make_fixture();
        fx.provider
            .add_message(inbound_event("m1", "t1", &[LABEL_INBOX, LABEL_TRASH]))
            .await;

        let outcome = fx
            .ingestor
            .ingest(&fx.account, &delta("m1", "t1"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped);
        assert!(fx.store.get_executed("acct", "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inbound_message_runs_match_and_execute() {
        let fx = make_fixture();
        fx.store
            .upsert_rule(&Rule::new(
                "acct",
                "invoices",
                10,
                vec![Condition::Static {
                    from: None,
                    to: None,
                    subject: Some("invoice".to_string()),
                }],
                vec![Action::Label {
                    name: "Billing".to_string(),
                }],
            ))
            .await
            .unwrap();
        fx.provider
            .add_message(inbound_event("m1", "t1", &[LABEL_INBOX]))
            .await;

        let outcome = fx
            .ingestor
            .ingest(&fx.account, &delta("m1", "t1"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Processed { matched: 1 });

        let record = fx.store.get_executed("acct", "m1").await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Applied);

        let label = fx
            .provider
            .get_label_by_name("Billing")
            .await
            .unwrap()
            .unwrap();
        assert!(fx.provider.labels_of("m1").await.contains(&label.id));
    }

    #[tokio::test]
    async fn inbound_without_matches_writes_no_record() {
        let fx = make_fixture();
        fx.provider
            .add_message(inbound_event("m1", "t1", &[LABEL_INBOX]))
            .await;

        let outcome = fx
            .ingestor
            .ingest(&fx.account, &delta("m1", "t1"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Processed { matched: 0 });
        assert!(fx.store.get_executed("acct", "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn outbound_reply_maintains_reply_state() {
        let fx = make_fixture();
        fx.store
            .upsert_tracker(&ThreadTracker {
                account_id: "acct".to_string(),
                thread_id: "t1".to_string(),
                kind: TrackerKind::NeedsReply,
                resolved: false,
                sent_at: Utc::now(),
            })
            .await
            .unwrap();
        fx.provider
            .add_message(inbound_event("m1", "t1", &[LABEL_INBOX]))
            .await;
        fx.provider.add_message(outbound_event("m2", "t1")).await;

        let outcome = fx
            .ingestor
            .ingest(&fx.account, &delta("m2", "t1"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::ReplyStateUpdated);

        let trackers = fx.store.get_trackers("acct", "t1").await.unwrap();
        let needs = trackers
            .iter()
            .find(|t| t.kind == TrackerKind::NeedsReply)
            .unwrap();
        assert!(needs.resolved);
        let awaiting = trackers
            .iter()
            .find(|t| t.kind == TrackerKind::Awaiting)
            .unwrap();
        assert!(!awaiting.resolved);

        let label = fx
            .provider
            .get_label_by_name("Awaiting-Reply")
            .await
            .unwrap()
            .unwrap();
        assert!(fx.provider.labels_of("m2").await.contains(&label.id));
    }

    #[tokio::test]
    async fn held_marker_defers_the_duplicate_delivery() {
        let fx = make_fixture();
        fx.provider
            .add_message(inbound_event("m1", "t1", &[LABEL_INBOX]))
            .await;
        assert!(fx
            .store
            .try_begin_processing("acct", "m1", Duration::from_secs(60))
            .await
            .unwrap());

        let outcome = fx
            .ingestor
            .ingest(&fx.account, &delta("m1", "t1"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::InFlight);
    }

    #[tokio::test]
    async fn processing_label_is_applied_in_the_background() {
        let fx = make_fixture();
        let account = Account {
            processing_label: Some("Automation".to_string()),
            ..fx.account.clone()
        };
        fx.provider
            .add_message(inbound_event("m1", "t1", &[LABEL_INBOX]))
            .await;

        fx.ingestor
            .ingest(&account, &delta("m1", "t1"))
            .await
            .unwrap();

        // The label task is spawned, not awaited; poll for it.
        let mut applied = false;
        for _ in 0..100 {
            if let Some(label) = fx.provider.get_label_by_name("Automation").await.unwrap()
                && fx.provider.labels_of("m1").await.contains(&label.id)
            {
                applied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(applied, "processing label never showed up");
    }
}
