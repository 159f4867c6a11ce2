//! Bulk backfill over existing inbox mail.
//!
//! Pages through the provider's listings sequentially and pushes each
//! surviving message through the same match/execute path the ingestor
//! uses. Within a run a thread is handled at most once, by its newest
//! message; a seen-thread set carried across pages enforces that. The
//! run loop alone touches that set, only between concurrent batches.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::actions::ActionExecutor;
use crate::config::Account;
use crate::error::BulkError;
use crate::message::MessageEvent;
use crate::provider::{EmailProvider, MessageQuery};
use crate::rules::RuleMatcher;
use crate::store::AutomationStore;

const DEFAULT_PAGE_SIZE: usize = 50;
const DEFAULT_BATCH_SIZE: usize = 5;

/// Knobs for one bulk run.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Date bounds forwarded to the provider listing.
    pub query: MessageQuery,
    /// Stop once this many items were dispatched. Checked after each
    /// batch, never mid-batch.
    pub max_emails: Option<usize>,
    /// Filter out messages that already have an executed-rule record,
    /// one batched store lookup per page.
    pub skip_already_processed: bool,
    /// Dispatch a page's survivors oldest first.
    pub oldest_first: bool,
    pub page_size: usize,
    pub batch_size: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            query: MessageQuery::default(),
            max_emails: None,
            skip_already_processed: true,
            oldest_first: false,
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Counters for a finished (or stopped) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Messages returned by the listings.
    pub fetched: usize,
    /// Newest-per-thread survivors new to this run.
    pub unique_threads: usize,
    /// Survivors dropped because a record already existed.
    pub skipped: usize,
    /// Dispatched items whose pipeline completed.
    pub processed: usize,
    /// Dispatched items whose pipeline failed.
    pub errored: usize,
    pub pages: usize,
}

/// Drives backfill runs.
pub struct BulkProcessor {
    store: Arc<dyn AutomationStore>,
    provider: Arc<dyn EmailProvider>,
    matcher: Arc<RuleMatcher>,
    executor: Arc<ActionExecutor>,
}

impl BulkProcessor {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        provider: Arc<dyn EmailProvider>,
        matcher: Arc<RuleMatcher>,
        executor: Arc<ActionExecutor>,
    ) -> Self {
        Self {
            store,
            provider,
            matcher,
            executor,
        }
    }

    /// Run a backfill until the listing is exhausted, `max_emails` is
    /// reached, or `cancel` is set (checked between pages).
    #[instrument(skip_all, fields(account = %account.id))]
    pub async fn run(
        &self,
        account: &Account,
        options: &BulkOptions,
        cancel: &AtomicBool,
    ) -> Result<BulkSummary, BulkError> {
        let mut summary = BulkSummary::default();
        let mut seen_threads: HashSet<String> = HashSet::new();
        let mut page_token: Option<String> = None;

        'pages: loop {
            if cancel.load(Ordering::SeqCst) {
                info!("bulk run cancelled");
                break;
            }

            let page = self
                .provider
                .list_messages(&options.query, page_token.as_deref(), options.page_size)
                .await?;
            summary.pages += 1;
            summary.fetched += page.messages.len();

            let mut survivors = newest_per_thread(page.messages, &seen_threads);
            for message in &survivors {
                seen_threads.insert(message.thread_id.clone());
            }
            summary.unique_threads += survivors.len();

            if options.skip_already_processed && !survivors.is_empty() {
                let ids: Vec<String> = survivors.iter().map(|m| m.id.clone()).collect();
                let done = self.store.executed_message_ids(&account.id, &ids).await?;
                let before = survivors.len();
                survivors.retain(|m| !done.contains(&m.id));
                summary.skipped += before - survivors.len();
            }

            if options.oldest_first {
                survivors.sort_by_key(|m| m.headers.date);
            } else {
                survivors.sort_by(|a, b| b.headers.date.cmp(&a.headers.date));
            }

            debug!(
                page = summary.pages,
                survivors = survivors.len(),
                "dispatching page"
            );

            for batch in survivors.chunks(options.batch_size.max(1)) {
                let results = join_all(
                    batch
                        .iter()
                        .map(|message| self.process_one(account, message)),
                )
                .await;

                for (message, result) in batch.iter().zip(results) {
                    match result {
                        Ok(()) => summary.processed += 1,
                        Err(e) => {
                            warn!(message_id = %message.id, error = %e, "bulk item failed");
                            summary.errored += 1;
                        }
                    }
                }

                if let Some(max) = options.max_emails
                    && summary.processed + summary.errored >= max
                {
                    info!(max, "bulk email budget reached");
                    break 'pages;
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(
            fetched = summary.fetched,
            unique_threads = summary.unique_threads,
            processed = summary.processed,
            errored = summary.errored,
            skipped = summary.skipped,
            pages = summary.pages,
            "bulk run finished"
        );
        Ok(summary)
    }

    /// Item failures land in the summary, so the error type here is the
    /// crate umbrella.
    async fn process_one(
        &self,
        account: &Account,
        message: &MessageEvent,
    ) -> Result<(), crate::error::Error> {
        let outcome = self.matcher.match_message(account, message).await?;
        self.executor.execute(account, message, &outcome).await?;
        Ok(())
    }
}

/// One message per thread, keeping the most recent by date, skipping
/// threads the run already handled.
fn newest_per_thread(
    messages: Vec<MessageEvent>,
    seen_threads: &HashSet<String>,
) -> Vec<MessageEvent> {
    let mut newest: HashMap<String, MessageEvent> = HashMap::new();
    for message in messages {
        if seen_threads.contains(&message.thread_id) {
            continue;
        }
        match newest.get(&message.thread_id) {
            Some(current) if current.headers.date >= message.headers.date => {}
            _ => {
                newest.insert(message.thread_id.clone(), message);
            }
        }
    }
    newest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::classify::{Classifier, Verdict};
    use crate::error::ClassifierError;
    use crate::message::{Direction, MessageHeaders, LABEL_INBOX};
    use crate::provider::MemoryProvider;
    use crate::rules::{Action, Condition, Rule};
    use crate::store::{ExecutedRule, MemoryStore};

    struct ErroringClassifier;

    #[async_trait::async_trait]
    impl Classifier for ErroringClassifier {
        fn model_name(&self) -> &str {
            "erroring-test"
        }

        async fn classify(
            &self,
            _instructions: &str,
            _message: &MessageEvent,
        ) -> Result<Verdict, ClassifierError> {
            Err(ClassifierError::RequestFailed {
                reason: "down".to_string(),
            })
        }

        async fn generate(
            &self,
            _prompt: &str,
            _message: &MessageEvent,
        ) -> Result<String, ClassifierError> {
            unimplemented!("not used in bulk tests")
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        provider: Arc<MemoryProvider>,
        processor: BulkProcessor,
        account: Account,
    }

    fn make_fixture(classifier: Arc<dyn Classifier>) -> Fixture {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let provider = Arc::new(MemoryProvider::new("me@corp.test"));
        let matcher = Arc::new(RuleMatcher::new(store.clone(), classifier.clone()));
        let executor = Arc::new(ActionExecutor::new(
            store.clone(),
            provider.clone(),
            classifier,
        ));
        let processor =
            BulkProcessor::new(store.clone(), provider.clone(), matcher, executor);
        Fixture {
            store,
            provider,
            processor,
            account: Account::new("acct", "me@corp.test"),
        }
    }

    fn event_at(id: &str, thread_id: &str, minute: u32) -> MessageEvent {
        MessageEvent {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            direction: Direction::Inbound,
            headers: MessageHeaders {
                from: "alice@client.test".to_string(),
                to: "me@corp.test".to_string(),
                cc: None,
                subject: "hello".to_string(),
                date: Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0).unwrap(),
            },
            label_ids: vec![LABEL_INBOX.to_string()],
            snippet: String::new(),
            body: None,
        }
    }

    fn match_all_rule() -> Rule {
        // Every sender address contains '@'.
        Rule::new(
            "acct",
            "catch-all",
            10,
            vec![Condition::Static {
                from: Some("@".to_string()),
                to: None,
                subject: None,
            }],
            vec![Action::Archive],
        )
    }

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
            unimplemented!("not used in bulk tests")
        }
    }

    #[tokio::test]
    async fn dedups_to_newest_message_per_thread() {
        let fx = make_fixture(Arc::new(NeverClassifier));
        fx.store.upsert_rule(&match_all_rule()).await.unwrap();
        fx.provider.add_message(event_at("old", "t1", 0)).await;
        fx.provider.add_message(event_at("new", "t1", 30)).await;

        let summary = fx
            .processor
            .run(&fx.account, &BulkOptions::default(), &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.unique_threads, 1);
        assert_eq!(summary.processed, 1);

        // Only the newest message got a record.
        assert!(fx.store.get_executed("acct", "new").await.unwrap().is_some());
        assert!(fx.store.get_executed("acct", "old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn thread_dedup_carries_across_pages() {
        let fx = make_fixture(Arc::new(NeverClassifier));
        fx.store.upsert_rule(&match_all_rule()).await.unwrap();
        // Newest-first listing puts these on separate pages with size 1.
        fx.provider.add_message(event_at("new", "t1", 30)).await;
        fx.provider.add_message(event_at("old", "t1", 0)).await;

        let options = BulkOptions {
            page_size: 1,
            ..BulkOptions::default()
        };
        let summary = fx
            .processor
            .run(&fx.account, &options, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(summary.pages, 2);
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.unique_threads, 1);
        assert_eq!(summary.processed, 1);
        assert!(fx.store.get_executed("acct", "old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn already_processed_messages_are_filtered_in_one_lookup() {
        let fx = make_fixture(Arc::new(NeverClassifier));
        fx.store.upsert_rule(&match_all_rule()).await.unwrap();
        fx.provider.add_message(event_at("done", "t1", 0)).await;
        fx.provider.add_message(event_at("fresh", "t2", 5)).await;

        let existing = ExecutedRule::pending("acct", "done", "t1", vec![]);
        fx.store.insert_executed_if_absent(&existing).await.unwrap();

        let summary = fx
            .processor
            .run(&fx.account, &BulkOptions::default(), &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn max_emails_stops_after_a_full_batch() {
        let fx = make_fixture(Arc::new(NeverClassifier));
        fx.store.upsert_rule(&match_all_rule()).await.unwrap();
        for i in 0..5 {
            fx.provider
                .add_message(event_at(&format!("m{i}"), &format!("t{i}"), i))
                .await;
        }

        let options = BulkOptions {
            max_emails: Some(2),
            batch_size: 1,
            ..BulkOptions::default()
        };
        let summary = fx
            .processor
            .run(&fx.account, &options, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(summary.processed + summary.errored, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_page() {
        let fx = make_fixture(Arc::new(NeverClassifier));
        fx.provider.add_message(event_at("m1", "t1", 0)).await;

        let cancel = AtomicBool::new(true);
        let summary = fx
            .processor
            .run(&fx.account, &BulkOptions::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.pages, 0);
        assert_eq!(summary.fetched, 0);
    }

    #[tokio::test]
    async fn oldest_first_dispatches_in_date_order() {
        let fx = make_fixture(Arc::new(NeverClassifier));
        fx.store.upsert_rule(&match_all_rule()).await.unwrap();
        fx.provider.add_message(event_at("late", "t-late", 45)).await;
        fx.provider.add_message(event_at("early", "t-early", 5)).await;

        let options = BulkOptions {
            oldest_first: true,
            batch_size: 1,
            ..BulkOptions::default()
        };
        fx.processor
            .run(&fx.account, &options, &AtomicBool::new(false))
            .await
            .unwrap();

        let ops = fx.provider.ops().await;
        let archives: Vec<&str> = ops
            .iter()
            .filter(|op| op.starts_with("archive_thread:"))
            .map(|op| op.as_str())
            .collect();
        assert_eq!(archives, vec!["archive_thread:t-early", "archive_thread:t-late"]);
    }

    #[tokio::test]
    async fn item_failures_do_not_abort_the_run() {
        let fx = make_fixture(Arc::new(ErroringClassifier));
        // OR rule: static hit for client mail, classifier for the rest.
        let rule = Rule::new(
            "acct",
            "mixed",
            10,
            vec![
                Condition::Static {
                    from: Some("@client.test".to_string()),
                    to: None,
                    subject: None,
                },
                Condition::Ai {
                    instructions: "matches anything interesting".to_string(),
                },
            ],
            vec![Action::Archive],
        )
        .with_operator(crate::rules::ConditionOperator::Or);
        fx.store.upsert_rule(&rule).await.unwrap();

        fx.provider.add_message(event_at("ok", "t1", 0)).await;
        let mut stranger = event_at("bad", "t2", 5);
        stranger.headers.from = "bob@elsewhere.test".to_string();
        fx.provider.add_message(stranger).await;

        let summary = fx
            .processor
            .run(&fx.account, &BulkOptions::default(), &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errored, 1);
        assert!(fx.store.get_executed("acct", "ok").await.unwrap().is_some());
    }
}
