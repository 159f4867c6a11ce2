//! Automation rules.
//!
//! A rule is an ordered bundle of matchers and actions owned by one
//! account. Matching lives in [`matcher`], the data model in [`model`];
//! execution of a matched rule's actions belongs to `crate::actions`.

pub mod matcher;
pub mod model;

pub use matcher::{MatchOutcome, MatchedRule, RuleMatcher};
pub use model::{Action, ActionText, Condition, ConditionOperator, ConversationStatus, Rule};
