//! Core types for the rules system.
//!
//! A rule is a named, prioritized, account-owned automation: condition
//! matchers decide whether a message fires it, and an ordered action list
//! says what happens. Rules are data; evaluation lives in the matcher and
//! side effects in the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a rule combines multiple condition matchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Every matcher must hold.
    #[default]
    And,
    /// At least one matcher must hold.
    Or,
}

/// A single condition matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Free-text instructions evaluated by the classifier.
    Ai { instructions: String },
    /// Case-insensitive substring tests against header fields. Unset
    /// fields are don't-care; a matcher with no fields set never fires.
    Static {
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        subject: Option<String>,
    },
    /// Membership of the message sender in a named sender group.
    Group { group: String },
}

impl Condition {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Condition::Ai { .. } => "ai",
            Condition::Static { .. } => "static",
            Condition::Group { .. } => "group",
        }
    }

    /// AI matchers are the expensive ones; the matcher evaluates them
    /// last and only when the outcome is still undecided.
    pub fn is_ai(&self) -> bool {
        matches!(self, Condition::Ai { .. })
    }
}

/// A free-text action field: either a static template (with
/// `{{variable}}` placeholders) or a prompt the classifier expands at
/// execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ActionText {
    Template { text: String },
    Prompt { prompt: String },
}

impl ActionText {
    /// Shorthand for a static template.
    pub fn template(text: impl Into<String>) -> Self {
        ActionText::Template { text: text.into() }
    }

    /// Shorthand for an AI prompt.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        ActionText::Prompt {
            prompt: prompt.into(),
        }
    }
}

/// Conversation-status labels. At most one of these is ever present on a
/// thread; the thread status manager enforces that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    NeedsReply,
    AwaitingReply,
    Fyi,
    Actioned,
}

impl ConversationStatus {
    pub const ALL: [ConversationStatus; 4] = [
        ConversationStatus::NeedsReply,
        ConversationStatus::AwaitingReply,
        ConversationStatus::Fyi,
        ConversationStatus::Actioned,
    ];

    /// Provider label name for this status.
    pub fn label_name(&self) -> &'static str {
        match self {
            ConversationStatus::NeedsReply => "Needs-Reply",
            ConversationStatus::AwaitingReply => "Awaiting-Reply",
            ConversationStatus::Fyi => "FYI",
            ConversationStatus::Actioned => "Actioned",
        }
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label_name())
    }
}

/// What a fired rule does, in list order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Apply a user label (created at the provider if absent) to the
    /// message's thread.
    Label { name: String },
    /// Remove the inbox designation from the thread.
    Archive,
    /// Send the original onward with a `Fwd:` subject and quoted body.
    Forward { to: String },
    /// Reply within the thread.
    Reply { body: ActionText },
    /// Compose a fresh email.
    SendEmail {
        to: String,
        subject: ActionText,
        body: ActionText,
    },
    /// Queue the message for the next digest email instead of acting now.
    Digest,
    /// Record reply-state for the thread and apply its status label.
    TrackThread { status: ConversationStatus },
    /// Remove the unread designation.
    MarkRead,
    /// Move the message to spam.
    MarkSpam,
    /// Leave a draft reply in the thread instead of sending.
    DraftReply { body: ActionText },
    /// POST a JSON event payload to a configured URL.
    CallWebhook { url: String },
}

impl Action {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Action::Label { .. } => "label",
            Action::Archive => "archive",
            Action::Forward { .. } => "forward",
            Action::Reply { .. } => "reply",
            Action::SendEmail { .. } => "send_email",
            Action::Digest => "digest",
            Action::TrackThread { .. } => "track_thread",
            Action::MarkRead => "mark_read",
            Action::MarkSpam => "mark_spam",
            Action::DraftReply { .. } => "draft_reply",
            Action::CallWebhook { .. } => "call_webhook",
        }
    }
}

/// A user-defined automation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub account_id: String,
    pub name: String,
    pub enabled: bool,
    /// Lower fires first; rule id breaks ties for a stable order.
    pub priority: i32,
    #[serde(default)]
    pub condition_operator: ConditionOperator,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(
        account_id: impl Into<String>,
        name: impl Into<String>,
        priority: i32,
        conditions: Vec<Condition>,
        actions: Vec<Action>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            name: name.into(),
            enabled: true,
            priority,
            condition_operator: ConditionOperator::default(),
            conditions,
            actions,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_operator(mut self, operator: ConditionOperator) -> Self {
        self.condition_operator = operator;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
