//! Comparison results and their transposition.

use serde::{Deserialize, Serialize};

use crate::models::{ChatType, Contact, ContactGroup, Conversation, Participant};
use crate::report::plural;
use crate::signature::MessageSignature;

/// Which database of a comparison pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Left database
    A,
    /// Right database
    B,
}

impl Side {
    /// The other side
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Cheap classification of a conversation across both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Same message count and last message time on both sides
    Identical,
    /// Present on both sides with differing statistics
    Different,
    /// Present only in database A
    OnlyOnA,
    /// Present only in database B
    OnlyOnB,
}

impl Classification {
    /// Classify a conversation from its two records.
    ///
    /// Both records are expected to share an identity; callers correlate them
    /// before classifying.
    #[must_use]
    pub fn of(a: Option<&Conversation>, b: Option<&Conversation>) -> Self {
        match (a, b) {
            (Some(a), Some(b))
                if a.identity == b.identity
                    && a.message_count == b.message_count
                    && a.last_message_at == b.last_message_at =>
            {
                Self::Identical
            },
            (Some(_), None) => Self::OnlyOnA,
            (None, Some(_)) => Self::OnlyOnB,
            _ => Self::Different,
        }
    }

    /// Classification with the meaning of A and B exchanged
    #[must_use]
    pub const fn transpose(self) -> Self {
        match self {
            Self::OnlyOnA => Self::OnlyOnB,
            Self::OnlyOnB => Self::OnlyOnA,
            other => other,
        }
    }
}

/// A message present on one side and absent on the other
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingMessage {
    /// Row id in the database that holds the message
    pub id: i64,
    /// Cross-database identity
    pub signature: MessageSignature,
}

/// Differences of one conversation between the two databases.
///
/// `only_on_a` holds messages that A has and B lacks, i.e. what B is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDiff {
    /// Conversation identity shared by both sides
    pub identity: String,
    /// Record in database A
    pub a: Option<Conversation>,
    /// Record in database B
    pub b: Option<Conversation>,
    /// Messages only in A, in A's time order
    pub only_on_a: Vec<MissingMessage>,
    /// Messages only in B, in B's time order
    pub only_on_b: Vec<MissingMessage>,
    /// Participants only in A
    pub participants_only_on_a: Vec<Participant>,
    /// Participants only in B
    pub participants_only_on_b: Vec<Participant>,
    /// Cheap classification
    pub classification: Classification,
}

impl ConversationDiff {
    /// A diff without any message or participant differences computed yet
    #[must_use]
    pub fn unscanned(identity: &str, a: Option<Conversation>, b: Option<Conversation>) -> Self {
        let classification = Classification::of(a.as_ref(), b.as_ref());
        Self {
            identity: identity.to_string(),
            a,
            b,
            only_on_a: Vec::new(),
            only_on_b: Vec::new(),
            participants_only_on_a: Vec::new(),
            participants_only_on_b: Vec::new(),
            classification,
        }
    }

    /// Record on the given side
    #[must_use]
    pub const fn record(&self, side: Side) -> Option<&Conversation> {
        match side {
            Side::A => self.a.as_ref(),
            Side::B => self.b.as_ref(),
        }
    }

    /// Messages that only `side` has
    #[must_use]
    pub fn messages_only_on(&self, side: Side) -> &[MissingMessage] {
        match side {
            Side::A => &self.only_on_a,
            Side::B => &self.only_on_b,
        }
    }

    /// Participants that only `side` has
    #[must_use]
    pub fn participants_only_on(&self, side: Side) -> &[Participant] {
        match side {
            Side::A => &self.participants_only_on_a,
            Side::B => &self.participants_only_on_b,
        }
    }

    /// Whether `side` has anything the other side lacks
    #[must_use]
    pub fn has_new_on(&self, side: Side) -> bool {
        let missing_record = self.record(side).is_some() && self.record(side.other()).is_none();
        missing_record || !self.messages_only_on(side).is_empty() || !self.participants_only_on(side).is_empty()
    }

    /// Whether either side has anything the other lacks
    #[must_use]
    pub fn has_differences(&self) -> bool {
        self.has_new_on(Side::A) || self.has_new_on(Side::B)
    }

    /// Display title from whichever side has the conversation
    #[must_use]
    pub fn title(&self) -> &str {
        self.a
            .as_ref()
            .or(self.b.as_ref())
            .map_or(self.identity.as_str(), |c| c.title.as_str())
    }

    /// Participant display text.
    ///
    /// Group chats list everyone as `3 (a, b, c)`; single chats name the other
    /// party, leaving out `account`.
    #[must_use]
    pub fn people(&self, account: Option<&str>) -> String {
        let Some(conversation) = self.a.as_ref().or(self.b.as_ref()) else {
            return String::new();
        };
        let mut people: Vec<&str> = conversation.participants.iter().map(|p| p.identity.as_str()).collect();
        people.sort_unstable();
        match conversation.chat_type {
            ChatType::Group => format!("{} ({})", people.len(), people.join(", ")),
            ChatType::Single => people
                .into_iter()
                .filter(|p| Some(*p) != account)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// The same diff seen with A and B exchanged
    #[must_use]
    pub fn transpose(self) -> Self {
        Self {
            identity: self.identity,
            a: self.b,
            b: self.a,
            only_on_a: self.only_on_b,
            only_on_b: self.only_on_a,
            participants_only_on_a: self.participants_only_on_b,
            participants_only_on_b: self.participants_only_on_a,
            classification: self.classification.transpose(),
        }
    }

    /// Forget what `source` had over the other side after a merge into it
    pub(crate) fn mark_merged(&mut self, source: Side) {
        let copied = self.record(source).cloned();
        match source {
            Side::A => {
                self.only_on_a.clear();
                self.participants_only_on_a.clear();
                if self.b.is_none() {
                    self.b = copied;
                }
            },
            Side::B => {
                self.only_on_b.clear();
                self.participants_only_on_b.clear();
                if self.a.is_none() {
                    self.a = copied;
                }
            },
        }
        self.classification = if self.has_differences() {
            Classification::Different
        } else {
            Classification::Identical
        };
    }
}

/// Running totals of what one side has over the other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    /// Conversations
    pub chats: usize,
    /// Messages
    pub messages: usize,
    /// Contacts
    pub contacts: usize,
    /// Contact groups
    pub contact_groups: usize,
}

impl DiffCounts {
    /// Whether every count is zero
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.chats == 0 && self.messages == 0 && self.contacts == 0 && self.contact_groups == 0
    }

    /// Human readable listing of the non-zero counts, e.g. "2 chats, 10 messages"
    #[must_use]
    pub fn describe(&self) -> String {
        [
            ("chat", self.chats),
            ("message", self.messages),
            ("contact", self.contacts),
            ("contact group", self.contact_groups),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(word, count)| plural(word, count))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Everything found by one scan of a database pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// One entry per conversation identity found on either side, in scan order
    pub conversations: Vec<ConversationDiff>,
    /// Contacts only in A
    pub contacts_only_on_a: Vec<Contact>,
    /// Contacts only in B
    pub contacts_only_on_b: Vec<Contact>,
    /// Contact groups in A that B lacks or has with other members
    pub groups_only_on_a: Vec<ContactGroup>,
    /// Contact groups in B that A lacks or has with other members
    pub groups_only_on_b: Vec<ContactGroup>,
    /// Conversations processed so far
    pub scanned: usize,
    /// Conversations to process
    pub total: usize,
    /// False when the scan was cancelled before finishing
    pub complete: bool,
}

impl ComparisonResult {
    /// Diff of one conversation
    #[must_use]
    pub fn conversation(&self, identity: &str) -> Option<&ConversationDiff> {
        self.conversations.iter().find(|d| d.identity == identity)
    }

    /// Contacts only on `side`
    #[must_use]
    pub fn contacts_only_on(&self, side: Side) -> &[Contact] {
        match side {
            Side::A => &self.contacts_only_on_a,
            Side::B => &self.contacts_only_on_b,
        }
    }

    /// Contact groups only on `side`
    #[must_use]
    pub fn groups_only_on(&self, side: Side) -> &[ContactGroup] {
        match side {
            Side::A => &self.groups_only_on_a,
            Side::B => &self.groups_only_on_b,
        }
    }

    /// Conversations where `side` has something the other side lacks
    pub fn differing_on(&self, side: Side) -> impl Iterator<Item = &ConversationDiff> {
        self.conversations.iter().filter(move |d| d.has_new_on(side))
    }

    /// What `side` has over the other side
    #[must_use]
    pub fn counts(&self, side: Side) -> DiffCounts {
        DiffCounts {
            chats: self.differing_on(side).count(),
            messages: self.conversations.iter().map(|d| d.messages_only_on(side).len()).sum(),
            contacts: self.contacts_only_on(side).len(),
            contact_groups: self.groups_only_on(side).len(),
        }
    }

    /// Whether the two sides differ in anything the scan looked at
    #[must_use]
    pub fn has_differences(&self) -> bool {
        !(self.counts(Side::A).is_empty() && self.counts(Side::B).is_empty())
    }

    /// The same result seen with A and B exchanged
    #[must_use]
    pub fn transpose(self) -> Self {
        Self {
            conversations: self.conversations.into_iter().map(ConversationDiff::transpose).collect(),
            contacts_only_on_a: self.contacts_only_on_b,
            contacts_only_on_b: self.contacts_only_on_a,
            groups_only_on_a: self.groups_only_on_b,
            groups_only_on_b: self.groups_only_on_a,
            scanned: self.scanned,
            total: self.total,
            complete: self.complete,
        }
    }

    /// Drop entries a merge out of `source` has resolved
    pub(crate) fn apply_merge(
        &mut self,
        source: Side,
        conversations: &[String],
        contacts: &[String],
        groups: &[String],
    ) {
        let only_contacts = match source {
            Side::A => &mut self.contacts_only_on_a,
            Side::B => &mut self.contacts_only_on_b,
        };
        only_contacts.retain(|c| !contacts.contains(&c.identity));

        // A replaced group now matches the source version on both sides
        self.groups_only_on_a.retain(|g| !groups.contains(&g.name));
        self.groups_only_on_b.retain(|g| !groups.contains(&g.name));

        for diff in &mut self.conversations {
            if conversations.contains(&diff.identity) {
                diff.mark_merged(source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn conversation(identity: &str, count: usize, last: i64) -> Conversation {
        let mut conversation = Conversation::new(identity, identity, ChatType::Single);
        conversation.message_count = count;
        conversation.last_message_at = Utc.timestamp_opt(last, 0).single();
        conversation
    }

    #[test]
    fn test_identical_requires_matching_statistics() {
        let a = conversation("alice", 10, 100);
        assert_eq!(Classification::of(Some(&a), Some(&a.clone())), Classification::Identical);
        assert_eq!(
            Classification::of(Some(&a), Some(&conversation("alice", 11, 100))),
            Classification::Different
        );
        assert_eq!(
            Classification::of(Some(&a), Some(&conversation("bob", 10, 100))),
            Classification::Different
        );
        assert_eq!(Classification::of(None, Some(&a)), Classification::OnlyOnB);
    }

    #[test]
    fn test_people_for_group_and_single_chats() {
        let mut single = conversation("alice", 0, 0);
        single.participants = vec![Participant::new("me"), Participant::new("alice")];
        let diff = ConversationDiff::unscanned("alice", Some(single.clone()), None);
        assert_eq!(diff.people(Some("me")), "alice");

        single.chat_type = ChatType::Group;
        single.participants.push(Participant::new("bob"));
        let diff = ConversationDiff::unscanned("alice", None, Some(single));
        assert_eq!(diff.people(Some("me")), "3 (alice, bob, me)");
    }

    #[test]
    fn test_describe_skips_zero_counts() {
        let counts = DiffCounts {
            chats: 2,
            messages: 1,
            contacts: 0,
            contact_groups: 3,
        };
        assert_eq!(counts.describe(), "2 chats, 1 message, 3 contact groups");
        assert_eq!(DiffCounts::default().describe(), "");
    }

    #[test]
    fn test_mark_merged_resolves_only_on_a() {
        let mut diff = ConversationDiff::unscanned("alice", Some(conversation("alice", 1, 5)), None);
        assert!(diff.has_new_on(Side::A));
        diff.mark_merged(Side::A);
        assert!(!diff.has_differences());
        assert_eq!(diff.classification, Classification::Identical);
    }
}
