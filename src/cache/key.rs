//! Cache key derivation.
//!
//! A query is identified by the ordered concatenation of its question
//! `(name, type)` pairs. Names are normalized to lowercase so lookups are
//! case-insensitive. The same key identifies a single-flight group entry,
//! which is what deduplicates concurrent identical queries end to end.

use std::fmt;

use hickory_proto::op::Message;

/// Key identifying a cacheable query and a single-flight group entry.
///
/// # Example
///
/// ```
/// use std::str::FromStr;
/// use hickory_proto::op::{Message, Query};
/// use hickory_proto::rr::{Name, RecordType};
/// use sshdns::cache::QuestionKey;
///
/// let mut msg = Message::new();
/// msg.add_query(Query::query(Name::from_str("Example.COM.").unwrap(), RecordType::A));
///
/// let key = QuestionKey::from_message(&msg).unwrap();
/// assert_eq!(key.as_str(), "example.com.:1,");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionKey(String);

impl QuestionKey {
    /// Derive the key from a message's question list.
    ///
    /// Returns `None` when the message carries no question; such messages
    /// are neither cacheable nor deduplicable.
    #[must_use]
    pub fn from_message(msg: &Message) -> Option<Self> {
        if msg.queries().is_empty() {
            return None;
        }

        let mut key = String::new();
        for q in msg.queries() {
            key.push_str(&q.name().to_string().to_lowercase());
            key.push(':');
            key.push_str(&u16::from(q.query_type()).to_string());
            key.push(',');
        }
        Some(Self(key))
    }

    /// The key in its printable form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
