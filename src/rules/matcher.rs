//! Rule matching.
//!
//! Evaluates an inbound message against the account's rules in priority
//! order. Static and group matchers are cheap and run first; the
//! classifier is consulted only when its verdict can still change the
//! rule's outcome. The first satisfied rule wins unless the account
//! opted into multi-rule selection, which collects every satisfied rule
//! in priority order.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::classify::{Classifier, Verdict};
use crate::config::Account;
use crate::error::MatchError;
use crate::message::MessageEvent;
use crate::rules::model::{Condition, ConditionOperator, Rule};
use crate::store::AutomationStore;

/// A rule that fired, with the classifier verdict that tipped it (when
/// an AI matcher was consulted).
#[derive(Debug, Clone)]
pub struct MatchedRule {
    pub rule: Rule,
    pub verdict: Option<Verdict>,
}

/// The ordered set of rules that fired for one message.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub rules: Vec<MatchedRule>,
}

impl MatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule names in firing order, for logs and stored records.
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|m| m.rule.name.as_str()).collect()
    }
}

/// Matches messages against stored rules.
pub struct RuleMatcher {
    store: Arc<dyn AutomationStore>,
    classifier: Arc<dyn Classifier>,
}

impl RuleMatcher {
    pub fn new(store: Arc<dyn AutomationStore>, classifier: Arc<dyn Classifier>) -> Self {
        Self { store, classifier }
    }

    /// Evaluate every enabled rule in priority order and return the ones
    /// that fired. Without multi-rule selection the scan stops at the
    /// first match.
    #[instrument(skip_all, fields(account = %account.id, message_id = %message.id))]
    pub async fn match_message(
        &self,
        account: &Account,
        message: &MessageEvent,
    ) -> Result<MatchOutcome, MatchError> {
        let mut rules = self.store.list_rules(&account.id).await?;
        // Stores make no ordering promise; ties broken by id so reruns
        // see the same winner.
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));

        let mut matched = Vec::new();
        for rule in rules {
            if !rule.enabled {
                debug!(rule = %rule.name, "skipping disabled rule");
                continue;
            }

            if let Some(hit) = self.evaluate_rule(account, &rule, message).await? {
                debug!(rule = %rule.name, priority = rule.priority, "rule matched");
                matched.push(hit);
                if !account.multi_rule_selection {
                    break;
                }
            }
        }

        Ok(MatchOutcome { rules: matched })
    }

    /// Evaluate one rule's matchers under its operator. `None` means the
    /// rule did not fire.
    async fn evaluate_rule(
        &self,
        account: &Account,
        rule: &Rule,
        message: &MessageEvent,
    ) -> Result<Option<MatchedRule>, MatchError> {
        if rule.conditions.is_empty() {
            debug!(rule = %rule.name, "rule has no matchers, never fires");
            return Ok(None);
        }

        let (cheap, ai): (Vec<&Condition>, Vec<&Condition>) =
            rule.conditions.iter().partition(|c| !c.is_ai());

        match rule.condition_operator {
            ConditionOperator::And => {
                for condition in &cheap {
                    if !self.cheap_matches(account, condition, message).await? {
                        return Ok(None);
                    }
                }
                // Every cheap matcher held; the classifier must agree on
                // each AI matcher too.
                let mut verdict = None;
                for condition in &ai {
                    let v = self.classify(rule, condition, message).await?;
                    if !v.matched {
                        return Ok(None);
                    }
                    verdict = Some(v);
                }
                Ok(Some(MatchedRule {
                    rule: rule.clone(),
                    verdict,
                }))
            }
            ConditionOperator::Or => {
                for condition in &cheap {
                    if self.cheap_matches(account, condition, message).await? {
                        return Ok(Some(MatchedRule {
                            rule: rule.clone(),
                            verdict: None,
                        }));
                    }
                }
                // No cheap matcher held; let the classifier have a say.
                for condition in &ai {
                    let v = self.classify(rule, condition, message).await?;
                    if v.matched {
                        return Ok(Some(MatchedRule {
                            rule: rule.clone(),
                            verdict: Some(v),
                        }));
                    }
                }
                Ok(None)
            }
        }
    }

    async fn cheap_matches(
        &self,
        account: &Account,
        condition: &Condition,
        message: &MessageEvent,
    ) -> Result<bool, MatchError> {
        match condition {
            Condition::Static { from, to, subject } => {
                Ok(static_matches(from, to, subject, message))
            }
            Condition::Group { group } => {
                let sender = message.sender_address();
                Ok(self
                    .store
                    .group_contains(&account.id, group, sender)
                    .await?)
            }
            // Partitioned out by the caller.
            Condition::Ai { .. } => Ok(false),
        }
    }

    async fn classify(
        &self,
        rule: &Rule,
        condition: &Condition,
        message: &MessageEvent,
    ) -> Result<Verdict, MatchError> {
        let Condition::Ai { instructions } = condition else {
            return Ok(Verdict::no_match());
        };
        debug!(rule = %rule.name, model = self.classifier.model_name(), "consulting classifier");
        Ok(self.classifier.classify(instructions, message).await?)
    }
}

/// Case-insensitive substring test per header field. Unset fields are
/// don't-care, but a matcher with no fields set never fires.
fn static_matches(
    from: &Option<String>,
    to: &Option<String>,
    subject: &Option<String>,
    message: &MessageEvent,
) -> bool {
    if from.is_none() && to.is_none() && subject.is_none() {
        return false;
    }

    let field_holds = |needle: &Option<String>, haystack: &str| match needle {
        None => true,
        Some(n) => haystack.to_lowercase().contains(&n.to_lowercase()),
    };

    field_holds(from, &message.headers.from)
        && field_holds(to, &message.headers.to)
        && field_holds(subject, &message.headers.subject)
}
