//! Digest assembly.
//!
//! DIGEST actions queue items instead of acting immediately; on
//! schedule the assembler drains the account's queue into one summary
//! email sent to the account's own address.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Account;
use crate::error::Result;
use crate::provider::{EmailProvider, OutgoingEmail};
use crate::store::{AutomationStore, DigestItem};

pub struct DigestAssembler {
    store: Arc<dyn AutomationStore>,
    provider: Arc<dyn EmailProvider>,
}

impl DigestAssembler {
    pub fn new(store: Arc<dyn AutomationStore>, provider: Arc<dyn EmailProvider>) -> Self {
        Self { store, provider }
    }

    /// Drain the queue and send one summary email. An empty queue sends
    /// nothing. Returns the number of summarized items.
    pub async fn assemble_and_send(&self, account: &Account) -> Result<usize> {
        let items = self.store.drain_digest_items(&account.id).await?;
        if items.is_empty() {
            debug!(account = %account.id, "digest queue empty, nothing to send");
            return Ok(0);
        }

        let email = OutgoingEmail::new(
            &account.email,
            format!("Inbox digest: {} message(s)", items.len()),
            compose_digest(&items),
        );

        match self.provider.send_email(&email).await {
            Ok(_) => {
                info!(account = %account.id, items = items.len(), "digest sent");
                Ok(items.len())
            }
            Err(e) => {
                // The queue was already drained; put the items back so
                // the next run retries them.
                warn!(error = %e, "digest send failed, requeueing items");
                for item in &items {
                    if let Err(requeue) = self.store.queue_digest_item(item).await {
                        warn!(
                            message_id = %item.message_id,
                            error = %requeue,
                            "failed to requeue digest item"
                        );
                    }
                }
                Err(e.into())
            }
        }
    }
}

/// Plain-text summary, grouped by the rule that queued each item.
fn compose_digest(items: &[DigestItem]) -> String {
    let mut by_rule: BTreeMap<&str, Vec<&DigestItem>> = BTreeMap::new();
    for item in items {
        by_rule.entry(item.rule_name.as_str()).or_default().push(item);
    }

    let mut body = format!("{} message(s) collected by your rules.\n", items.len());
    for (rule, entries) in by_rule {
        body.push_str(&format!("\n[{rule}]\n"));
        for item in entries {
            body.push_str(&format!("- {}: {}\n", item.from, item.subject));
            if !item.snippet.is_empty() {
                body.push_str(&format!("  {}\n", item.snippet));
            }
        }
    }
    body
}
