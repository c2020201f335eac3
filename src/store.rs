//! The database access seam consumed by the comparison and merge engine.
//!
//! [`crate::db::Database`] implements it over SQLite; tests substitute
//! in-memory stores.

use crate::error::Result;
use crate::models::{Contact, ContactGroup, Conversation, Message, MessageFilter, Participant};
use crate::signature::MessageSignature;

/// Read/write access to one chat database.
///
/// Implementations must be shareable across threads: a scan or merge job
/// reads and writes through `Arc<dyn ChatStore>` on its own worker thread
/// while other sessions may read the same store.
///
/// Read failures are reported as [`crate::MergeError::Access`], insert
/// failures as [`crate::MergeError::Insertion`].
pub trait ChatStore: Send + Sync {
    /// Human-readable label (usually the file path)
    fn label(&self) -> String;

    /// Identity of the account owning this database, if recorded
    fn account_identity(&self) -> Result<Option<String>>;

    /// All conversations with statistics and participants
    fn get_conversations(&self) -> Result<Vec<Conversation>>;

    /// One conversation by identity
    fn get_conversation(&self, identity: &str) -> Result<Option<Conversation>> {
        Ok(self.get_conversations()?.into_iter().find(|c| c.identity == identity))
    }

    /// All contacts
    fn get_contacts(&self) -> Result<Vec<Contact>>;

    /// All contact groups
    fn get_contact_groups(&self) -> Result<Vec<ContactGroup>>;

    /// Participants of a conversation
    fn get_participants(&self, conversation: &Conversation) -> Result<Vec<Participant>>;

    /// Messages of a conversation, bounded and ordered per `filter`
    fn get_messages(&self, conversation: &Conversation, filter: &MessageFilter) -> Result<Vec<Message>>;

    /// Messages by local row id. Callers pass at most
    /// [`crate::schema::MAX_QUERY_PARAMS`] ids per call.
    fn get_messages_by_ids(&self, ids: &[i64]) -> Result<Vec<Message>>;

    /// Signatures of every message currently in a conversation
    fn get_message_signatures(&self, conversation: &Conversation) -> Result<Vec<MessageSignature>> {
        Ok(self
            .get_messages(conversation, &MessageFilter::new())?
            .iter()
            .map(Message::signature)
            .collect())
    }

    /// Insert a conversation copied from `source`, returning its new row id
    fn insert_chat(&self, conversation: &Conversation, source: &dyn ChatStore) -> Result<i64>;

    /// Add participants to an existing conversation of this store
    fn insert_participants(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
        source: &dyn ChatStore,
    ) -> Result<usize>;

    /// Add messages to an existing conversation of this store, in the given order
    fn insert_messages(
        &self,
        conversation: &Conversation,
        messages: &[Message],
        source: &dyn ChatStore,
        source_conversation: &Conversation,
    ) -> Result<usize>;

    /// Insert contacts copied from `source`
    fn insert_contacts(&self, contacts: &[Contact], source: &dyn ChatStore) -> Result<usize>;

    /// Insert or overwrite contact groups by name
    fn replace_contact_groups(&self, groups: &[ContactGroup], source: &dyn ChatStore) -> Result<usize>;

    /// Run `unit` so that its writes are committed together or not at all.
    ///
    /// Stores without transactions run the unit directly.
    fn in_transaction(&self, unit: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        unit()
    }

    /// Whether a failed [`ChatStore::in_transaction`] unit leaves no writes behind
    fn rolls_back(&self) -> bool {
        false
    }

    /// Drop cached statistics so later reads see new writes
    fn clear_cache(&self);

    /// Record that `owner` uses this store
    fn register_consumer(&self, owner: &str);

    /// Release `owner`'s use of this store
    fn unregister_consumer(&self, owner: &str);

    /// Whether any owner still uses this store
    fn has_consumers(&self) -> bool;
}
