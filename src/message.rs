//! Message events: the immutable unit flowing through the pipeline.
//!
//! Events arrive from the provider (push delta or bulk listing) and are
//! normalized by the ingestor before matching. Header text is kept as
//! received; all matching on it is case-insensitive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Provider-side system labels. These mirror the conventional mailbox
// designations; user labels are referenced by name instead.
pub const LABEL_INBOX: &str = "INBOX";
pub const LABEL_SENT: &str = "SENT";
pub const LABEL_TRASH: &str = "TRASH";
pub const LABEL_SPAM: &str = "SPAM";
pub const LABEL_UNREAD: &str = "UNREAD";

/// Which way a message travelled relative to the account owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// Derive direction from the From header and the account's own
    /// address. The delta payload is not trusted for this.
    pub fn derive(from_header: &str, own_address: &str) -> Self {
        let (_, addr) = split_address(from_header);
        if addr.eq_ignore_ascii_case(own_address) {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }
}

/// Header fields the engine matches and templates against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeaders {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub cc: Option<String>,
    pub subject: String,
    pub date: DateTime<Utc>,
}

/// A single message event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: String,
    pub thread_id: String,
    pub direction: Direction,
    pub headers: MessageHeaders,
    /// Provider label ids currently on the message.
    pub label_ids: Vec<String>,
    pub snippet: String,
    /// Full text body when the provider supplied one.
    #[serde(default)]
    pub body: Option<String>,
}

impl MessageEvent {
    pub fn is_in_inbox(&self) -> bool {
        self.has_label(LABEL_INBOX)
    }

    pub fn is_sent(&self) -> bool {
        self.has_label(LABEL_SENT)
    }

    /// Trashed or spam messages are skipped by the ingest paths.
    pub fn is_discarded(&self) -> bool {
        self.has_label(LABEL_TRASH) || self.has_label(LABEL_SPAM)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }

    /// Body text for classification and quoting, falling back to the
    /// snippet when the provider sent no body.
    pub fn content(&self) -> &str {
        match &self.body {
            Some(body) if !body.is_empty() => body,
            _ => &self.snippet,
        }
    }

    /// Display name from the From header, when present.
    pub fn sender_name(&self) -> Option<&str> {
        split_address(&self.headers.from).0
    }

    /// Bare address from the From header.
    pub fn sender_address(&self) -> &str {
        split_address(&self.headers.from).1
    }
}

/// Split an RFC-style mailbox (`Jane Doe <jane@example.com>`) into an
/// optional display name and the bare address. A plain address comes
/// back with no name; surrounding quotes on the name are stripped.
pub fn split_address(raw: &str) -> (Option<&str>, &str) {
    let raw = raw.trim();
    if let Some(open) = raw.rfind('<') {
        let close = raw.rfind('>').unwrap_or(raw.len());
        let addr = raw[open + 1..close].trim();
        let name = raw[..open].trim().trim_matches('"').trim();
        if name.is_empty() {
            (None, addr)
        } else {
            (Some(name), addr)
        }
    } else {
        (None, raw)
    }
}
