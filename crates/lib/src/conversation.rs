//! Messages and per-contact conversations.
//!
//! A conversation is append-only and duplicate-free under [`MessageKey`]. The store never
//! re-sorts: messages keep the order in which they were appended (transport arrival order
//! for retrieved messages, creation order for locally sent ones).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::contacts::Contact;

/// A direct message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "frm", alias = "from")]
    pub sender: String,
    /// Empty only for legacy profile entries; normalized to the owner on load.
    #[serde(default)]
    pub recipient: String,
    #[serde(alias = "message", alias = "entry")]
    pub body: String,
    /// Seconds since the Unix epoch.
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: f64,
}

/// Deduplication identity of a message: (sender, recipient, body, timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    sender: String,
    recipient: String,
    body: String,
    timestamp_bits: u64,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
        timestamp: f64,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            body: body.into(),
            timestamp,
        }
    }

    /// Timestamp for a message created now.
    pub fn now_timestamp() -> f64 {
        let now = chrono::Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
    }

    pub fn key(&self) -> MessageKey {
        // -0.0 and 0.0 are the same instant
        let ts = if self.timestamp == 0.0 { 0.0 } else { self.timestamp };
        MessageKey {
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            body: self.body.clone(),
            timestamp_bits: ts.to_bits(),
        }
    }

    /// The other party of this message as seen by `owner`.
    pub fn counterpart(&self, owner: &str) -> &str {
        if self.sender == owner {
            &self.recipient
        } else {
            &self.sender
        }
    }
}

/// Timestamp as it appears on the wire or in a profile: a number or a decimal string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawTimestamp {
    Num(f64),
    Str(String),
    Other(serde::de::IgnoredAny),
}

impl RawTimestamp {
    /// Seconds since the epoch. `None` unless the value parses to a finite number.
    pub(crate) fn seconds(&self) -> Option<f64> {
        match self {
            RawTimestamp::Num(n) => Some(*n),
            RawTimestamp::Str(s) => s.trim().parse().ok(),
            RawTimestamp::Other(_) => None,
        }
        .filter(|t: &f64| t.is_finite())
    }
}

/// Accepts either a number or a decimal string (legacy profiles and the DSP wire use strings).
/// Non-finite values are rejected: they cannot be written back as JSON numbers.
pub(crate) fn de_timestamp<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = RawTimestamp::deserialize(deserializer)?;
    raw.seconds()
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {:?}", raw)))
}

/// Ordered, duplicate-free message history for one contact.
#[derive(Debug, Clone, Default)]
struct Conversation {
    messages: Vec<Message>,
    keys: HashSet<MessageKey>,
}

/// Mapping from contact to conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: HashMap<Contact, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` to `contact`'s conversation unless an identical message is already there.
    pub fn append(&mut self, contact: &str, message: Message) -> bool {
        let conv = self.conversations.entry(contact.to_string()).or_default();
        if !conv.keys.insert(message.key()) {
            return false;
        }
        conv.messages.push(message);
        true
    }

    /// Full history in arrival order; empty when the contact has no messages.
    pub fn history(&self, contact: &str) -> Vec<Message> {
        self.conversations
            .get(contact)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Append each message in order. Returns the messages that were actually new.
    pub fn merge_batch<I>(&mut self, contact: &str, messages: I) -> Vec<Message>
    where
        I: IntoIterator<Item = Message>,
    {
        messages
            .into_iter()
            .filter_map(|m| {
                let copy = m.clone();
                self.append(contact, m).then_some(copy)
            })
            .collect()
    }

    pub fn len(&self, contact: &str) -> usize {
        self.conversations.get(contact).map_or(0, |c| c.messages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str, body: &str, ts: f64) -> Message {
        Message::new(from, "alice", body, ts)
    }

    #[test]
    fn append_same_message_twice_keeps_length() {
        let mut store = ConversationStore::new();
        assert!(store.append("bob", msg("bob", "hi", 1.0)));
        assert!(!store.append("bob", msg("bob", "hi", 1.0)));
        assert_eq!(store.len("bob"), 1);
    }

    #[test]
    fn same_body_different_timestamp_is_distinct() {
        let mut store = ConversationStore::new();
        store.append("bob", msg("bob", "hi", 1.0));
        store.append("bob", msg("bob", "hi", 2.0));
        assert_eq!(store.len("bob"), 2);
    }

    #[test]
    fn history_of_unknown_contact_is_empty() {
        let store = ConversationStore::new();
        assert!(store.history("nobody").is_empty());
    }

    #[test]
    fn overlapping_batches_converge_to_union() {
        let a = msg("bob", "a", 1.0);
        let b = msg("bob", "b", 2.0);
        let c = msg("bob", "c", 3.0);

        let mut store = ConversationStore::new();
        let added = store.merge_batch("bob", vec![a.clone(), b.clone()]);
        assert_eq!(added.len(), 2);
        let added = store.merge_batch("bob", vec![b.clone(), c.clone(), a.clone()]);
        assert_eq!(added, vec![c.clone()]);
        assert_eq!(store.history("bob"), vec![a, b, c]);
    }

    #[test]
    fn counterpart_depends_on_direction() {
        let incoming = Message::new("bob", "alice", "hi", 1.0);
        let outgoing = Message::new("alice", "bob", "yo", 2.0);
        assert_eq!(incoming.counterpart("alice"), "bob");
        assert_eq!(outgoing.counterpart("alice"), "bob");
    }

    #[test]
    fn deserializes_legacy_field_names_and_string_timestamps() {
        let m: Message =
            serde_json::from_str(r#"{"frm":"bob","message":"hi","timestamp":"1603167689.25"}"#)
                .unwrap();
        assert_eq!(m.sender, "bob");
        assert_eq!(m.body, "hi");
        assert_eq!(m.recipient, "");
        assert_eq!(m.timestamp, 1603167689.25);
    }

    #[test]
    fn rejects_non_finite_timestamps() {
        for ts in [r#""inf""#, r#""NaN""#, r#""1e400""#, "null"] {
            let raw = format!(r#"{{"from":"bob","message":"x","timestamp":{}}}"#, ts);
            assert!(serde_json::from_str::<Message>(&raw).is_err(), "accepted {}", ts);
        }
    }

    #[test]
    fn json_roundtrip_preserves_key() {
        let m = Message::new("bob", "alice", "hi", Message::now_timestamp());
        let back: Message = serde_json::from_str(&serde_json::to_string(&m).unwrap()).unwrap();
        assert_eq!(back.key(), m.key());
    }
}
