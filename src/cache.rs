use crate::models::{Contact, Conversation};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct CacheEntry {
    conversations: Option<Vec<Conversation>>,
    contacts: Option<Vec<Contact>>,
}

/// Conversation statistics and contact lists of one database, kept until the
/// next write invalidates them.
#[derive(Default)]
pub struct StatsCache {
    entry: Mutex<CacheEntry>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheEntry> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_cached_conversations(&self) -> Option<Vec<Conversation>> {
        self.lock().conversations.clone()
    }

    pub fn cache_conversations(&self, conversations: &[Conversation]) {
        self.lock().conversations = Some(conversations.to_vec());
    }

    pub fn get_cached_contacts(&self) -> Option<Vec<Contact>> {
        self.lock().contacts.clone()
    }

    pub fn cache_contacts(&self, contacts: &[Contact]) {
        self.lock().contacts = Some(contacts.to_vec());
    }

    pub fn clear_cache(&self) {
        *self.lock() = CacheEntry::default();
    }
}
