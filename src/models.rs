//! Data models for conversations, messages, participants and contacts
//!
//! Every record carries a local row id (`id`) that is only meaningful inside
//! the database it was read from. Records are correlated across databases by
//! their identity fields: `Conversation::identity`, `Contact::identity`,
//! `ContactGroup::name`, and for messages the derived [`MessageSignature`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signature::MessageSignature;

/// Conversation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    /// One-to-one chat
    Single,
    /// Multi-party chat
    Group,
}

impl ChatType {
    /// Storage code for this type
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Single => 1,
            Self::Group => 2,
        }
    }

    /// Parse a storage code, treating unknown codes as group chats
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Single,
            _ => Self::Group,
        }
    }
}

/// A conversation with its statistics and participant list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Local row id
    pub id: i64,
    /// Stable cross-database identity (canonical chat handle)
    pub identity: String,
    /// Display title
    pub title: String,
    /// Single or group chat
    pub chat_type: ChatType,
    /// When the conversation was created, if known
    pub created_at: Option<DateTime<Utc>>,
    /// Number of messages in the conversation
    pub message_count: usize,
    /// Timestamp of the first message
    pub first_message_at: Option<DateTime<Utc>>,
    /// Timestamp of the last message
    pub last_message_at: Option<DateTime<Utc>>,
    /// Participants of the conversation
    pub participants: Vec<Participant>,
}

impl Conversation {
    /// Create a conversation record with empty statistics
    #[must_use]
    pub fn new(identity: &str, title: &str, chat_type: ChatType) -> Self {
        Self {
            id: 0,
            identity: identity.to_string(),
            title: title.to_string(),
            chat_type,
            created_at: None,
            message_count: 0,
            first_message_at: None,
            last_message_at: None,
            participants: Vec::new(),
        }
    }

    /// Long title for logs, e.g. `chat "Alice" (alice)`
    #[must_use]
    pub fn title_long(&self) -> String {
        format!("chat \"{}\" ({})", self.title, self.identity)
    }
}

/// Message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Regular text message
    Normal,
    /// Informational event (topic change, member added, ...)
    Info,
    /// Call event
    Call,
    /// File transfer
    Transfer,
}

impl MessageKind {
    /// Storage code for this kind
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Info => 1,
            Self::Call => 2,
            Self::Transfer => 3,
        }
    }

    /// Parse a storage code, treating unknown codes as normal messages
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Info,
            2 => Self::Call,
            3 => Self::Transfer,
            _ => Self::Normal,
        }
    }
}

/// A single message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Local row id
    pub id: i64,
    /// Local row id of the owning conversation
    pub conversation_id: i64,
    /// Identity of the author
    pub author: String,
    /// When the message was sent
    pub timestamp: DateTime<Utc>,
    /// Message text
    pub body: String,
    /// Message type
    pub kind: MessageKind,
}

impl Message {
    /// Cross-database identity of this message
    #[must_use]
    pub fn signature(&self) -> MessageSignature {
        MessageSignature::new(&self.author, self.timestamp, &self.body)
    }
}

/// Membership of a contact in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    /// Contact identity of the member
    pub identity: String,
    /// Role in the conversation (creator, admin, ...)
    pub role: Option<String>,
}

impl Participant {
    /// Participant without a role
    #[must_use]
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            role: None,
        }
    }
}

/// A contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Local row id
    pub id: i64,
    /// Stable account handle
    pub identity: String,
    /// Display name
    pub name: String,
    /// Phone number
    pub phone: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Country
    pub country: Option<String>,
    /// City
    pub city: Option<String>,
    /// Free-form profile text
    pub about: Option<String>,
}

impl Contact {
    /// Contact with only identity and name set
    #[must_use]
    pub fn new(identity: &str, name: &str) -> Self {
        Self {
            id: 0,
            identity: identity.to_string(),
            name: name.to_string(),
            phone: None,
            email: None,
            country: None,
            city: None,
            about: None,
        }
    }
}

/// A named set of contacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactGroup {
    /// Local row id
    pub id: i64,
    /// Group name, the cross-database identity
    pub name: String,
    /// Contact identities of the members
    pub members: BTreeSet<String>,
}

impl ContactGroup {
    /// Group with the given members
    #[must_use]
    pub fn new<I, S>(name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: 0,
            name: name.to_string(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Members as stored: a JSON array of identities
    pub fn members_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.members)
    }

    /// Parse the stored member text
    pub fn parse_members(text: &str) -> serde_json::Result<BTreeSet<String>> {
        serde_json::from_str(text)
    }
}

/// Bounded retrieval options for [`crate::store::ChatStore::get_messages`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFilter {
    /// Oldest first when true
    pub ascending: bool,
    /// Maximum number of messages to return
    pub limit: Option<usize>,
    /// Number of messages to skip
    pub offset: Option<usize>,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            ascending: true,
            limit: None,
            offset: None,
        }
    }
}

impl MessageFilter {
    /// Create an ascending, unbounded filter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One page of `size` messages starting at `offset`
    #[must_use]
    pub const fn page(offset: usize, size: usize) -> Self {
        Self {
            ascending: true,
            limit: Some(size),
            offset: Some(offset),
        }
    }

    /// Set descending order
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    /// Set the maximum number of results to return
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = Some(limit);
    }

    /// Set the number of results to skip
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = Some(offset);
    }
}
