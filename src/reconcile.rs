//! Whole-document reconciliation of remote updates against local state.
//!
//! A remote update is applied only when it differs by value from what is
//! already held locally. That rule is what keeps the echo of our own flush
//! from being treated as a foreign edit. There is no conflict detection:
//! the last message to arrive wins.

use crate::protocol::WireMessage;

/// Result of reconciling one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Identical to local state; nothing changed.
    Echo,
    /// Local state was replaced.
    Applied { content: bool, language: bool },
}

impl Outcome {
    pub fn changed(self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

/// Holder of the local document and the echo-suppression rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciler {
    content: String,
    language: String,
}

impl Reconciler {
    pub fn new(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            language: language.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Local edit. Returns whether the value changed.
    pub fn set_content(&mut self, content: &str) -> bool {
        replace_if_different(&mut self.content, content)
    }

    /// Local language change. Returns whether the value changed.
    pub fn set_language(&mut self, language: &str) -> bool {
        replace_if_different(&mut self.language, language)
    }

    /// Reset both fields, e.g. from a freshly fetched snapshot.
    pub fn reset(&mut self, content: &str, language: &str) -> Outcome {
        self.apply_remote(content, language)
    }

    /// Apply a remote `(content, language)` pair if it differs from local state.
    pub fn apply_remote(&mut self, content: &str, language: &str) -> Outcome {
        let content_changed = replace_if_different(&mut self.content, content);
        let language_changed = replace_if_different(&mut self.language, language);
        if content_changed || language_changed {
            Outcome::Applied {
                content: content_changed,
                language: language_changed,
            }
        } else {
            Outcome::Echo
        }
    }

    /// Apply a decoded wire message, substituting `fallback_language` when
    /// the peer omitted one.
    pub fn apply_message(&mut self, msg: &WireMessage, fallback_language: &str) -> Outcome {
        let language = msg.language.as_deref().unwrap_or(fallback_language);
        self.apply_remote(&msg.content, language)
    }
}

fn replace_if_different(slot: &mut String, value: &str) -> bool {
    if slot == value {
        return false;
    }
    slot.clear();
    slot.push_str(value);
    true
}
