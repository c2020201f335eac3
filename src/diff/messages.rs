//! Per-conversation message and participant differences.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::config::ScanConfig;
use crate::diff::result::{ConversationDiff, MissingMessage};
use crate::error::Result;
use crate::models::{Conversation, Message, MessageFilter, Participant};
use crate::signature::MessageSignature;
use crate::store::ChatStore;

/// Messages and participants each side of one conversation has over the other
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDiff {
    /// Messages only in A
    pub only_on_a: Vec<MissingMessage>,
    /// Messages only in B
    pub only_on_b: Vec<MissingMessage>,
    /// Participants only in A
    pub participants_only_on_a: Vec<Participant>,
    /// Participants only in B
    pub participants_only_on_b: Vec<Participant>,
}

/// Computes message set differences for single conversations.
///
/// Both sides are read page by page in ascending time order and keyed by
/// [`MessageSignature`]; row ids never take part in matching.
#[derive(Debug, Clone, Copy)]
pub struct MessageSetDiffer {
    page_size: usize,
    max_query_params: usize,
}

impl Default for MessageSetDiffer {
    fn default() -> Self {
        Self::new(&ScanConfig::default())
    }
}

impl MessageSetDiffer {
    /// Differ with the page size and id-chunk size from `config`
    #[must_use]
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            page_size: config.message_page_size.max(1),
            max_query_params: config.max_query_params.max(1),
        }
    }

    /// Compare one conversation as recorded in `a` and `b`
    pub fn diff(
        &self,
        a: &dyn ChatStore,
        conversation_a: Option<&Conversation>,
        b: &dyn ChatStore,
        conversation_b: Option<&Conversation>,
    ) -> Result<MessageDiff> {
        let messages_a = self.materialize(a, conversation_a)?;
        let messages_b = self.materialize(b, conversation_b)?;
        let participants_a = participants_of(a, conversation_a)?;
        let participants_b = participants_of(b, conversation_b)?;

        Ok(MessageDiff {
            only_on_a: set_difference(&messages_a, &messages_b),
            only_on_b: set_difference(&messages_b, &messages_a),
            participants_only_on_a: participants_missing_from(&participants_a, &participants_b),
            participants_only_on_b: participants_missing_from(&participants_b, &participants_a),
        })
    }

    /// Fill in the message and participant differences of `diff`
    pub fn diff_conversation(&self, diff: &mut ConversationDiff, a: &dyn ChatStore, b: &dyn ChatStore) -> Result<()> {
        let found = self.diff(a, diff.a.as_ref(), b, diff.b.as_ref())?;
        debug!(
            chat = %diff.identity,
            only_on_a = found.only_on_a.len(),
            only_on_b = found.only_on_b.len(),
            "Compared messages"
        );
        diff.only_on_a = found.only_on_a;
        diff.only_on_b = found.only_on_b;
        diff.participants_only_on_a = found.participants_only_on_a;
        diff.participants_only_on_b = found.participants_only_on_b;
        Ok(())
    }

    /// Load full messages by row id from `store`, at most `max_query_params`
    /// ids per query. The result is ordered by time, then row id.
    pub fn fetch_messages(&self, store: &dyn ChatStore, ids: &[i64]) -> Result<Vec<Message>> {
        let mut messages = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.max_query_params) {
            trace!(database = %store.label(), ids = chunk.len(), "Fetching message chunk");
            messages.extend(store.get_messages_by_ids(chunk)?);
        }
        messages.sort_by(|x, y| x.timestamp.cmp(&y.timestamp).then(x.id.cmp(&y.id)));
        Ok(messages)
    }

    /// Signatures of a conversation in time order, first occurrence of each
    fn materialize(&self, store: &dyn ChatStore, conversation: Option<&Conversation>) -> Result<Vec<MissingMessage>> {
        let Some(conversation) = conversation else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut sequence = Vec::with_capacity(conversation.message_count);
        let mut offset = 0;
        loop {
            let page = store.get_messages(conversation, &MessageFilter::page(offset, self.page_size))?;
            let fetched = page.len();
            for message in page {
                let signature = message.signature();
                if seen.insert(signature.clone()) {
                    sequence.push(MissingMessage {
                        id: message.id,
                        signature,
                    });
                }
            }
            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }
        Ok(sequence)
    }
}

fn participants_of(store: &dyn ChatStore, conversation: Option<&Conversation>) -> Result<Vec<Participant>> {
    conversation.map_or_else(|| Ok(Vec::new()), |c| store.get_participants(c))
}

fn set_difference(from: &[MissingMessage], other: &[MissingMessage]) -> Vec<MissingMessage> {
    let known: HashSet<&MessageSignature> = other.iter().map(|m| &m.signature).collect();
    from.iter().filter(|m| !known.contains(&m.signature)).cloned().collect()
}

fn participants_missing_from(from: &[Participant], other: &[Participant]) -> Vec<Participant> {
    let known: HashSet<&str> = other.iter().map(|p| p.identity.as_str()).collect();
    let mut emitted = HashSet::new();
    from.iter()
        .filter(|p| !known.contains(p.identity.as_str()) && emitted.insert(p.identity.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn missing(id: i64, author: &str, secs: i64, body: &str) -> MissingMessage {
        let timestamp = Utc.timestamp_opt(secs, 0).single().unwrap_or_default();
        MissingMessage {
            id,
            signature: MessageSignature::new(author, timestamp, body),
        }
    }

    #[test]
    fn test_set_difference_ignores_row_ids() {
        let a = vec![missing(1, "x", 1, "hi"), missing(2, "y", 2, "yo")];
        let b = vec![missing(77, "x", 1, "hi")];
        let only_a = set_difference(&a, &b);
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id, 2);
        assert!(set_difference(&b, &a).is_empty());
    }

    #[test]
    fn test_whitespace_variants_match() {
        let a = vec![missing(1, "x", 1, "hello   world")];
        let b = vec![missing(5, "x", 1, " hello world ")];
        assert!(set_difference(&a, &b).is_empty());
    }

    #[test]
    fn test_participants_compared_by_identity() {
        let a = vec![Participant::new("me"), Participant::new("bob")];
        let mut admin = Participant::new("me");
        admin.role = Some("admin".to_string());
        let missing = participants_missing_from(&a, &[admin]);
        assert_eq!(missing, vec![Participant::new("bob")]);
    }
}
