//! Shared fixtures for integration tests: an in-memory `ChatStore` that logs
//! every write and enforces the same limits as SQLite.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use history_merge::models::MessageFilter;
use history_merge::schema::MAX_QUERY_PARAMS;
use history_merge::{
    ChatStore, ChatType, Contact, ContactGroup, Conversation, MergeError, Message, MessageKind, Participant, Result,
};

#[derive(Default)]
struct Inner {
    account: Option<String>,
    next_id: i64,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    contacts: Vec<Contact>,
    groups: Vec<ContactGroup>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn with_stats(&self, conversation: &Conversation) -> Conversation {
        let mut full = conversation.clone();
        let messages: Vec<&Message> = self.messages.iter().filter(|m| m.conversation_id == conversation.id).collect();
        full.message_count = messages.len();
        full.first_message_at = messages.iter().map(|m| m.timestamp).min();
        full.last_message_at = messages.iter().map(|m| m.timestamp).max();
        full
    }
}

/// In-memory chat store
pub struct MemoryStore {
    label: String,
    inner: Mutex<Inner>,
    consumers: Mutex<BTreeSet<String>>,
    operations: Mutex<Vec<String>>,
    id_lookups: AtomicUsize,
    page_reads: Mutex<Vec<String>>,
    fail_messages_for: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            inner: Mutex::new(Inner::default()),
            consumers: Mutex::new(BTreeSet::new()),
            operations: Mutex::new(Vec::new()),
            id_lookups: AtomicUsize::new(0),
            page_reads: Mutex::new(Vec::new()),
            fail_messages_for: Mutex::new(None),
        }
    }

    pub fn with_account(self, identity: &str) -> Self {
        self.inner.lock().unwrap().account = Some(identity.to_string());
        self
    }

    pub fn contact(&self, identity: &str, name: &str) -> &Self {
        let mut inner = self.inner.lock().unwrap();
        let mut contact = Contact::new(identity, name);
        contact.id = inner.next_id();
        inner.contacts.push(contact);
        self
    }

    pub fn group(&self, name: &str, members: &[&str]) -> &Self {
        let mut inner = self.inner.lock().unwrap();
        let mut group = ContactGroup::new(name, members.iter().copied());
        group.id = inner.next_id();
        inner.groups.push(group);
        self
    }

    pub fn chat(&self, identity: &str, chat_type: ChatType, participants: &[&str]) -> &Self {
        let mut inner = self.inner.lock().unwrap();
        let mut conversation = Conversation::new(identity, identity, chat_type);
        conversation.id = inner.next_id();
        conversation.participants = participants.iter().map(|p| Participant::new(p)).collect();
        inner.conversations.push(conversation);
        self
    }

    pub fn message(&self, chat: &str, author: &str, seconds: i64, body: &str) -> &Self {
        let mut inner = self.inner.lock().unwrap();
        let conversation_id = inner
            .conversations
            .iter()
            .find(|c| c.identity == chat)
            .map(|c| c.id)
            .expect("chat must exist before its messages");
        let id = inner.next_id();
        inner.messages.push(Message {
            id,
            conversation_id,
            author: author.to_string(),
            timestamp: at(seconds),
            body: body.to_string(),
            kind: MessageKind::Normal,
        });
        self
    }

    /// Make every message insert into `chat` fail
    pub fn fail_messages_for(&self, chat: &str) {
        *self.fail_messages_for.lock().unwrap() = Some(chat.to_string());
    }

    /// Write operations in the order they happened, e.g. `message:alice`
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    /// Number of `get_messages_by_ids` calls so far
    pub fn id_lookups(&self) -> usize {
        self.id_lookups.load(Ordering::SeqCst)
    }

    /// Conversations read through `get_messages`, one entry per call
    pub fn page_reads(&self) -> Vec<String> {
        self.page_reads.lock().unwrap().clone()
    }

    pub fn message_count(&self, chat: &str) -> usize {
        self.get_conversation(chat).unwrap().map_or(0, |c| c.message_count)
    }

    pub fn has_contact(&self, identity: &str) -> bool {
        self.inner.lock().unwrap().contacts.iter().any(|c| c.identity == identity)
    }

    pub fn group_members(&self, name: &str) -> Option<BTreeSet<String>> {
        let inner = self.inner.lock().unwrap();
        inner.groups.iter().find(|g| g.name == name).map(|g| g.members.clone())
    }

    fn log(&self, operation: String) {
        self.operations.lock().unwrap().push(operation);
    }

    fn insertion(&self, entity: &'static str, reason: &str) -> MergeError {
        MergeError::insertion(entity, self.label.clone(), reason)
    }
}

impl ChatStore for MemoryStore {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn account_identity(&self) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().account.clone())
    }

    fn get_conversations(&self) -> Result<Vec<Conversation>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.conversations.iter().map(|c| inner.with_stats(c)).collect())
    }

    fn get_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.inner.lock().unwrap().contacts.clone())
    }

    fn get_contact_groups(&self) -> Result<Vec<ContactGroup>> {
        Ok(self.inner.lock().unwrap().groups.clone())
    }

    fn get_participants(&self, conversation: &Conversation) -> Result<Vec<Participant>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .conversations
            .iter()
            .find(|c| c.identity == conversation.identity)
            .map(|c| c.participants.clone())
            .unwrap_or_default())
    }

    fn get_messages(&self, conversation: &Conversation, filter: &MessageFilter) -> Result<Vec<Message>> {
        self.page_reads.lock().unwrap().push(conversation.identity.clone());
        let inner = self.inner.lock().unwrap();
        let Some(id) = inner.conversations.iter().find(|c| c.identity == conversation.identity).map(|c| c.id) else {
            return Ok(Vec::new());
        };
        let mut messages: Vec<Message> = inner.messages.iter().filter(|m| m.conversation_id == id).cloned().collect();
        messages.sort_by(|x, y| x.timestamp.cmp(&y.timestamp).then(x.id.cmp(&y.id)));
        if !filter.ascending {
            messages.reverse();
        }
        Ok(messages
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn get_messages_by_ids(&self, ids: &[i64]) -> Result<Vec<Message>> {
        if ids.len() > MAX_QUERY_PARAMS {
            return Err(MergeError::access(self.label.clone(), "too many SQL variables"));
        }
        self.id_lookups.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        Ok(inner.messages.iter().filter(|m| ids.contains(&m.id)).cloned().collect())
    }

    fn insert_chat(&self, conversation: &Conversation, _source: &dyn ChatStore) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.conversations.iter().any(|c| c.identity == conversation.identity) {
            return Err(self.insertion("chat", "duplicate identity"));
        }
        let mut created = Conversation::new(&conversation.identity, &conversation.title, conversation.chat_type);
        created.id = inner.next_id();
        created.created_at = conversation.created_at;
        let id = created.id;
        inner.conversations.push(created);
        drop(inner);
        self.log(format!("chat:{}", conversation.identity));
        Ok(id)
    }

    fn insert_participants(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
        _source: &dyn ChatStore,
    ) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let known: BTreeSet<String> = inner.contacts.iter().map(|c| c.identity.clone()).chain(inner.account.clone()).collect();
        if let Some(missing) = participants.iter().find(|p| !known.contains(&p.identity)) {
            return Err(self.insertion("participant", &format!("no contact {}", missing.identity)));
        }
        let Some(target) = inner.conversations.iter_mut().find(|c| c.id == conversation.id) else {
            return Err(self.insertion("participant", "no such chat"));
        };
        target.participants.extend(participants.iter().cloned());
        drop(inner);
        for participant in participants {
            self.log(format!("participant:{}:{}", conversation.identity, participant.identity));
        }
        Ok(participants.len())
    }

    fn insert_messages(
        &self,
        conversation: &Conversation,
        messages: &[Message],
        _source: &dyn ChatStore,
        _source_conversation: &Conversation,
    ) -> Result<usize> {
        if self.fail_messages_for.lock().unwrap().as_deref() == Some(conversation.identity.as_str()) {
            return Err(self.insertion("message", "disk I/O error"));
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.conversations.iter().any(|c| c.id == conversation.id) {
            return Err(self.insertion("message", "no such chat"));
        }
        for message in messages {
            let id = inner.next_id();
            inner.messages.push(Message {
                id,
                conversation_id: conversation.id,
                ..message.clone()
            });
        }
        drop(inner);
        self.log(format!("messages:{}:{}", conversation.identity, messages.len()));
        Ok(messages.len())
    }

    fn insert_contacts(&self, contacts: &[Contact], _source: &dyn ChatStore) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        for contact in contacts {
            let id = inner.next_id();
            inner.contacts.push(Contact { id, ..contact.clone() });
        }
        drop(inner);
        for contact in contacts {
            self.log(format!("contact:{}", contact.identity));
        }
        Ok(contacts.len())
    }

    fn replace_contact_groups(&self, groups: &[ContactGroup], _source: &dyn ChatStore) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        for group in groups {
            if let Some(existing) = inner.groups.iter_mut().find(|g| g.name == group.name) {
                existing.members = group.members.clone();
            } else {
                let id = inner.next_id();
                inner.groups.push(ContactGroup { id, ..group.clone() });
            }
        }
        drop(inner);
        for group in groups {
            self.log(format!("group:{}", group.name));
        }
        Ok(groups.len())
    }

    fn clear_cache(&self) {}

    fn register_consumer(&self, owner: &str) {
        self.consumers.lock().unwrap().insert(owner.to_string());
    }

    fn unregister_consumer(&self, owner: &str) {
        self.consumers.lock().unwrap().remove(owner);
    }

    fn has_consumers(&self) -> bool {
        !self.consumers.lock().unwrap().is_empty()
    }
}

/// UTC time `seconds` after 2020-01-01
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
}

/// Pair where A has a one-to-one chat with Alice holding ten messages B lacks
pub fn alice_only_on_a() -> (MemoryStore, MemoryStore) {
    let a = MemoryStore::new("a.db").with_account("me");
    a.contact("alice", "Alice");
    a.chat("alice", ChatType::Single, &["me", "alice"]);
    for i in 0..10 {
        a.message("alice", if i % 2 == 0 { "alice" } else { "me" }, i * 60, &format!("message {i}"));
    }
    let b = MemoryStore::new("b.db").with_account("me");
    (a, b)
}
