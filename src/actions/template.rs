//! `{{variable}}` substitution for static action fields.

use regex::{Captures, Regex};
use tracing::debug;

use crate::message::MessageEvent;

/// Expands `{{variable}}` placeholders against a message. Unknown
/// placeholders are left intact so a typo in a rule is visible in the
/// output instead of silently vanishing.
pub struct TemplateEngine {
    placeholder: Regex,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").unwrap(),
        }
    }

    pub fn render(&self, template: &str, message: &MessageEvent) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                match self.lookup(name, message) {
                    Some(value) => value,
                    None => {
                        debug!(placeholder = name, "unknown template placeholder");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    fn lookup(&self, name: &str, message: &MessageEvent) -> Option<String> {
        match name {
            "sender_first_name" => Some(first_name(message)),
            "sender_name" => Some(
                message
                    .sender_name()
                    .unwrap_or_else(|| message.sender_address())
                    .to_string(),
            ),
            "sender_address" => Some(message.sender_address().to_string()),
            "subject" => Some(message.headers.subject.clone()),
            "date" => Some(message.headers.date.format("%Y-%m-%d").to_string()),
            _ => None,
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// First word of the display name, falling back to the address local
/// part when the From header carries no name.
fn first_name(message: &MessageEvent) -> String {
    if let Some(name) = message.sender_name()
        && let Some(first) = name.split_whitespace().next()
    {
        return first.to_string();
    }
    let address = message.sender_address();
    address
        .split('@')
        .next()
        .unwrap_or(address)
        .to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::message::{Direction, MessageHeaders};

    fn make_event(from: &str, subject: &str) -> MessageEvent {
        MessageEvent {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            direction: Direction::Inbound,
            headers: MessageHeaders {
                from: from.to_string(),
                to: "me@corp.test".to_string(),
                cc: None,
                subject: subject.to_string(),
                date: Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 0).unwrap(),
            },
            label_ids: vec![],
            snippet: String::new(),
            body: None,
        }
    }

    #[test]
    fn substitutes_sender_and_subject_fields() {
        let engine = TemplateEngine::new();
        let event = make_event("Jane Doe <jane@client.test>", "Q3 proposal");

        let out = engine.render(
            "Hi {{sender_first_name}}, re: {{subject}} from {{sender_address}}",
            &event,
        );
        assert_eq!(out, "Hi Jane, re: Q3 proposal from jane@client.test");
    }

    #[test]
    fn full_name_and_date() {
        let engine = TemplateEngine::new();
        let event = make_event("Jane Doe <jane@client.test>", "Q3");

        let out = engine.render("{{sender_name}} / {{date}}", &event);
        assert_eq!(out, "Jane Doe / 2026-03-09");
    }

    #[test]
    fn unknown_placeholder_left_intact() {
        let engine = TemplateEngine::new();
        let event = make_event("jane@client.test", "Q3");

        let out = engine.render("Hello {{middle_name}}!", &event);
        assert_eq!(out, "Hello {{middle_name}}!");
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let engine = TemplateEngine::new();
        let event = make_event("jane@client.test", "Q3");

        let out = engine.render("{{ subject }}", &event);
        assert_eq!(out, "Q3");
    }

    #[test]
    fn first_name_falls_back_to_local_part() {
        let engine = TemplateEngine::new();
        let event = make_event("jane.doe@client.test", "Q3");

        let out = engine.render("Hi {{sender_first_name}}", &event);
        assert_eq!(out, "Hi jane.doe");
    }
}
