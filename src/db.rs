use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::cache::StatsCache;
use crate::config::DatabaseConfig;
use crate::error::{MergeError, Result};
use crate::models::{ChatType, Contact, ContactGroup, Conversation, Message, MessageFilter, MessageKind, Participant};
use crate::schema::{accounts, contact_groups, contacts, conversations, messages, participants, MAX_QUERY_PARAMS};
use crate::store::ChatStore;

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// One chat history database.
///
/// Reads go through a pool of connections. All writes go through a single
/// writer connection so that inserts from one handle are serialized and a
/// merge unit can be wrapped in one transaction.
pub struct Database {
    path: PathBuf,
    label: String,
    pool: DbPool,
    writer: Mutex<Connection>,
    unit_lock: Mutex<()>,
    cache: StatsCache,
    consumers: Mutex<BTreeSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_millis(timestamp: Option<DateTime<Utc>>) -> Option<i64> {
    timestamp.map(|t| t.timestamp_millis())
}

fn from_millis(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Database {
    /// Open (creating if needed) the database at `path` with default settings
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, &DatabaseConfig::default())
    }

    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>, config: &DatabaseConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let label = path.display().to_string();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| MergeError::access(&label, e))?;
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let writer = Connection::open(&path).map_err(|e| MergeError::access(&label, e))?;
        writer
            .busy_timeout(busy_timeout)
            .and_then(|()| writer.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;"))
            .map_err(|e| MergeError::access(&label, e))?;
        Self::run_migrations(&writer).map_err(|e| MergeError::access(&label, e))?;

        // Set up connection manager and pool
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .build(manager)
            .map_err(|e| MergeError::access(&label, e))?;

        info!(database = %label, "Opened database");

        Ok(Self {
            path,
            label,
            pool,
            writer: Mutex::new(writer),
            unit_lock: Mutex::new(()),
            cache: StatsCache::new(),
            consumers: Mutex::new(BTreeSet::new()),
        })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(include_str!("../migrations/2026-10-01-000000_create_tables/up.sql"))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a read connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        self.pool.get().map_err(|e| self.access(e))
    }

    fn access(&self, err: impl ToString) -> MergeError {
        MergeError::access(&self.label, err)
    }

    fn insertion(&self, entity: &'static str, err: impl ToString) -> MergeError {
        MergeError::insertion(entity, &self.label, err)
    }

    fn with_writer<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let conn = lock(&self.writer);
        f(&conn)
    }

    /// Row id of a conversation as seen by the writer connection, so chats
    /// inserted earlier in an open transaction are found.
    fn writer_conversation_id(conn: &Connection, identity: &str) -> rusqlite::Result<Option<i64>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM {} WHERE {} = ?",
                conversations::ID,
                conversations::TABLE,
                conversations::IDENTITY
            ),
            params![identity],
            |row| row.get(0),
        )
        .optional()
    }

    /// File size in bytes and last modification time
    pub fn file_info(&self) -> Result<(u64, Option<DateTime<Utc>>)> {
        let metadata = fs::metadata(&self.path).map_err(|e| self.access(e))?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok((metadata.len(), modified))
    }

    /// Map a database row to a Message
    fn map_message(row: &Row) -> rusqlite::Result<Message> {
        Ok(Message {
            id: row.get(messages::ID)?,
            conversation_id: row.get(messages::CONVERSATION_ID)?,
            author: row.get(messages::AUTHOR)?,
            timestamp: from_millis(row.get(messages::TIMESTAMP)?).unwrap_or_default(),
            body: row.get(messages::BODY)?,
            kind: MessageKind::from_code(row.get(messages::KIND)?),
        })
    }

    /// Map a database row to a Contact
    fn map_contact(row: &Row) -> rusqlite::Result<Contact> {
        Ok(Contact {
            id: row.get(contacts::ID)?,
            identity: row.get(contacts::IDENTITY)?,
            name: row.get(contacts::NAME)?,
            phone: row.get(contacts::PHONE)?,
            email: row.get(contacts::EMAIL)?,
            country: row.get(contacts::COUNTRY)?,
            city: row.get(contacts::CITY)?,
            about: row.get(contacts::ABOUT)?,
        })
    }

    fn query_conversations(conn: &Connection) -> rusqlite::Result<Vec<Conversation>> {

        let query = format!(
            "SELECT c.{id}, c.{identity}, c.{title}, c.{chat_type}, c.{created_at}, \
             COUNT(m.{mid}), MIN(m.{ts}), MAX(m.{ts}) \
             FROM {conv} c LEFT JOIN {msg} m ON m.{mconv} = c.{id} \
             GROUP BY c.{id} ORDER BY c.{id}",
            id = conversations::ID,
            identity = conversations::IDENTITY,
            title = conversations::TITLE,
            chat_type = conversations::CHAT_TYPE,
            created_at = conversations::CREATED_AT,
            mid = messages::ID,
            ts = messages::TIMESTAMP,
            conv = conversations::TABLE,
            msg = messages::TABLE,
            mconv = messages::CONVERSATION_ID,
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(5)?;
            Ok(Conversation {
                id: row.get(0)?,
                identity: row.get(1)?,
                title: row.get(2)?,
                chat_type: ChatType::from_code(row.get(3)?),
                created_at: from_millis(row.get(4)?),
                message_count: usize::try_from(count).unwrap_or(0),
                first_message_at: from_millis(row.get(6)?),
                last_message_at: from_millis(row.get(7)?),
                participants: Vec::new(),
            })
        })?;
        let mut results = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        // Attach participants in one pass
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {}, {} FROM {} ORDER BY {}",
            participants::CONVERSATION_ID,
            participants::IDENTITY,
            participants::ROLE,
            participants::TABLE,
            participants::ID
        ))?;
        let mut by_conversation: HashMap<i64, Vec<Participant>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Participant {
                    identity: row.get(1)?,
                    role: row.get(2)?,
                },
            ))
        })?;
        for row in rows {
            let (conversation_id, participant) = row?;
            by_conversation.entry(conversation_id).or_default().push(participant);
        }
        for conversation in &mut results {
            conversation.participants = by_conversation.remove(&conversation.id).unwrap_or_default();
        }

        Ok(results)
    }

    fn query_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.get_connection()?;
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {} ORDER BY {}", contacts::TABLE, contacts::ID))
            .map_err(|e| self.access(e))?;
        let rows = stmt.query_map([], Self::map_contact).map_err(|e| self.access(e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| self.access(e))
    }

    /// Record the owner account of this database
    pub fn add_account(&self, identity: &str, name: &str) -> Result<i64> {
        self.with_writer(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                    accounts::TABLE,
                    accounts::IDENTITY,
                    accounts::NAME
                ),
                params![identity, name],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .map_err(MergeError::from)
    }

    /// Add a contact directly
    pub fn add_contact(&self, contact: &Contact) -> Result<i64> {
        let id = self.with_writer(|conn| Self::write_contact(conn, contact))?;
        self.cache.clear_cache();
        Ok(id)
    }

    /// Add a contact group directly
    pub fn add_contact_group(&self, group: &ContactGroup) -> Result<i64> {
        let id = self.with_writer(|conn| Self::write_contact_group(conn, group))?;
        Ok(id)
    }

    /// Add a conversation together with its participants
    pub fn add_conversation(&self, conversation: &Conversation) -> Result<i64> {
        let id = self.with_writer(|conn| {
            let id = Self::write_conversation(conn, conversation)?;
            for participant in &conversation.participants {
                Self::write_participant(conn, id, participant)?;
            }
            Ok(id)
        })?;
        self.cache.clear_cache();
        Ok(id)
    }

    /// Add one participant to an existing conversation
    pub fn add_participant(&self, conversation_identity: &str, participant: &Participant) -> Result<()> {
        self.with_writer(|conn| {
            let id = Self::writer_conversation_id(conn, conversation_identity)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            Self::write_participant(conn, id, participant)
        })?;
        self.cache.clear_cache();
        Ok(())
    }

    /// Add one message to an existing conversation
    pub fn add_message(
        &self,
        conversation_identity: &str,
        author: &str,
        timestamp: DateTime<Utc>,
        body: &str,
        kind: MessageKind,
    ) -> Result<i64> {
        let id = self.with_writer(|conn| {
            let conversation_id =
                Self::writer_conversation_id(conn, conversation_identity)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            Self::write_message(conn, conversation_id, author, timestamp, body, kind)
        })?;
        self.cache.clear_cache();
        Ok(id)
    }

    fn write_conversation(conn: &Connection, conversation: &Conversation) -> rusqlite::Result<i64> {
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
                conversations::TABLE,
                conversations::IDENTITY,
                conversations::TITLE,
                conversations::CHAT_TYPE,
                conversations::CREATED_AT
            ),
            params![
                conversation.identity,
                conversation.title,
                conversation.chat_type.code(),
                to_millis(conversation.created_at)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn write_participant(conn: &Connection, conversation_id: i64, participant: &Participant) -> rusqlite::Result<()> {
        conn.prepare_cached(&format!(
            "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
            participants::TABLE,
            participants::CONVERSATION_ID,
            participants::IDENTITY,
            participants::ROLE
        ))?
        .execute(params![conversation_id, participant.identity, participant.role])?;
        Ok(())
    }

    fn write_message(
        conn: &Connection,
        conversation_id: i64,
        author: &str,
        timestamp: DateTime<Utc>,
        body: &str,
        kind: MessageKind,
    ) -> rusqlite::Result<i64> {
        conn.prepare_cached(&format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?)",
            messages::TABLE,
            messages::CONVERSATION_ID,
            messages::AUTHOR,
            messages::TIMESTAMP,
            messages::BODY,
            messages::KIND
        ))?
        .execute(params![conversation_id, author, timestamp.timestamp_millis(), body, kind.code()])?;
        Ok(conn.last_insert_rowid())
    }

    fn write_contact(conn: &Connection, contact: &Contact) -> rusqlite::Result<i64> {
        conn.prepare_cached(&format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            contacts::TABLE,
            contacts::IDENTITY,
            contacts::NAME,
            contacts::PHONE,
            contacts::EMAIL,
            contacts::COUNTRY,
            contacts::CITY,
            contacts::ABOUT
        ))?
        .execute(params![
            contact.identity,
            contact.name,
            contact.phone,
            contact.email,
            contact.country,
            contact.city,
            contact.about
        ])?;
        Ok(conn.last_insert_rowid())
    }

    fn write_contact_group(conn: &Connection, group: &ContactGroup) -> rusqlite::Result<i64> {
        conn.prepare_cached(&format!(
            "INSERT INTO {table} ({name}, {members}) VALUES (?, ?) \
             ON CONFLICT({name}) DO UPDATE SET {members} = excluded.{members}",
            table = contact_groups::TABLE,
            name = contact_groups::NAME,
            members = contact_groups::MEMBERS
        ))?
        .execute(params![
            group.name,
            group
                .members_text()
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?
        ])?;
        Ok(conn.last_insert_rowid())
    }
}

impl ChatStore for Database {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn account_identity(&self) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM {} ORDER BY {} LIMIT 1",
                accounts::IDENTITY,
                accounts::TABLE,
                accounts::ID
            ),
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| self.access(e))
    }

    fn get_conversations(&self) -> Result<Vec<Conversation>> {
        if let Some(cached) = self.cache.get_cached_conversations() {
            return Ok(cached);
        }
        let conn = self.get_connection()?;
        let conversations = Self::query_conversations(&conn).map_err(|e| self.access(e))?;
        debug!(database = %self.label, count = conversations.len(), "Loaded conversations");
        self.cache.cache_conversations(&conversations);
        Ok(conversations)
    }

    fn get_contacts(&self) -> Result<Vec<Contact>> {
        if let Some(cached) = self.cache.get_cached_contacts() {
            return Ok(cached);
        }
        let contacts = self.query_contacts()?;
        self.cache.cache_contacts(&contacts);
        Ok(contacts)
    }

    fn get_contact_groups(&self) -> Result<Vec<ContactGroup>> {
        let conn = self.get_connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {}, {}, {} FROM {} ORDER BY {}",
                contact_groups::ID,
                contact_groups::NAME,
                contact_groups::MEMBERS,
                contact_groups::TABLE,
                contact_groups::ID
            ))
            .map_err(|e| self.access(e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ContactGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    members: ContactGroup::parse_members(&row.get::<_, String>(2)?).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
                    })?,
                })
            })
            .map_err(|e| self.access(e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| self.access(e))
    }

    fn get_participants(&self, conversation: &Conversation) -> Result<Vec<Participant>> {
        let conn = self.get_connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT p.{identity}, p.{role} FROM {table} p JOIN {conv} c ON c.{cid} = p.{pconv} \
                 WHERE c.{cidentity} = ? ORDER BY p.{pid}",
                identity = participants::IDENTITY,
                role = participants::ROLE,
                table = participants::TABLE,
                conv = conversations::TABLE,
                cid = conversations::ID,
                pconv = participants::CONVERSATION_ID,
                cidentity = conversations::IDENTITY,
                pid = participants::ID
            ))
            .map_err(|e| self.access(e))?;
        let rows = stmt
            .query_map(params![conversation.identity], |row| {
                Ok(Participant {
                    identity: row.get(0)?,
                    role: row.get(1)?,
                })
            })
            .map_err(|e| self.access(e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| self.access(e))
    }

    fn get_messages(&self, conversation: &Conversation, filter: &MessageFilter) -> Result<Vec<Message>> {
        let conn = self.get_connection()?;
        let order = if filter.ascending { "ASC" } else { "DESC" };
        let query = format!(
            "SELECT m.* FROM {msg} m JOIN {conv} c ON c.{cid} = m.{mconv} WHERE c.{cidentity} = ? \
             ORDER BY m.{ts} {order}, m.{mid} {order} LIMIT ? OFFSET ?",
            msg = messages::TABLE,
            conv = conversations::TABLE,
            cid = conversations::ID,
            mconv = messages::CONVERSATION_ID,
            cidentity = conversations::IDENTITY,
            ts = messages::TIMESTAMP,
            mid = messages::ID,
        );
        let limit = filter.limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1);
        let offset = filter.offset.and_then(|o| i64::try_from(o).ok()).unwrap_or(0);

        let mut stmt = conn.prepare(&query).map_err(|e| self.access(e))?;
        let rows = stmt
            .query_map(params![conversation.identity, limit, offset], Self::map_message)
            .map_err(|e| self.access(e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| self.access(e))
    }

    fn get_messages_by_ids(&self, ids: &[i64]) -> Result<Vec<Message>> {
        let conn = self.get_connection()?;
        let mut results = Vec::with_capacity(ids.len());

        // SQLite can take up to 999 parameters per statement
        for chunk in ids.chunks(MAX_QUERY_PARAMS) {
            let query = format!(
                "SELECT * FROM {} WHERE {} IN ({}) ORDER BY {}, {}",
                messages::TABLE,
                messages::ID,
                placeholders(chunk.len()),
                messages::TIMESTAMP,
                messages::ID
            );
            let mut stmt = conn.prepare(&query).map_err(|e| self.access(e))?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), Self::map_message)
                .map_err(|e| self.access(e))?;
            for message in rows {
                results.push(message.map_err(|e| self.access(e))?);
            }
        }

        Ok(results)
    }

    fn insert_chat(&self, conversation: &Conversation, source: &dyn ChatStore) -> Result<i64> {
        let id = self
            .with_writer(|conn| Self::write_conversation(conn, conversation))
            .map_err(|e| self.insertion("chat", e))?;
        debug!(target_db = %self.label, source_db = %source.label(), chat = %conversation.identity, id, "Inserted chat");
        Ok(id)
    }

    fn insert_participants(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
        source: &dyn ChatStore,
    ) -> Result<usize> {
        let inserted = self
            .with_writer(|conn| {
                let id = Self::writer_conversation_id(conn, &conversation.identity)?
                    .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                for participant in participants {
                    Self::write_participant(conn, id, participant)?;
                }
                Ok(participants.len())
            })
            .map_err(|e| self.insertion("participant", e))?;
        debug!(target_db = %self.label, source_db = %source.label(), chat = %conversation.identity, inserted, "Inserted participants");
        Ok(inserted)
    }

    fn insert_messages(
        &self,
        conversation: &Conversation,
        messages: &[Message],
        source: &dyn ChatStore,
        source_conversation: &Conversation,
    ) -> Result<usize> {
        let inserted = self
            .with_writer(|conn| {
                let id = Self::writer_conversation_id(conn, &conversation.identity)?
                    .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                for message in messages {
                    Self::write_message(conn, id, &message.author, message.timestamp, &message.body, message.kind)?;
                }
                Ok(messages.len())
            })
            .map_err(|e| self.insertion("message", e))?;
        debug!(
            target_db = %self.label,
            source_db = %source.label(),
            chat = %conversation.identity,
            source_chat_id = source_conversation.id,
            inserted,
            "Inserted messages"
        );
        Ok(inserted)
    }

    fn insert_contacts(&self, contacts: &[Contact], source: &dyn ChatStore) -> Result<usize> {
        let inserted = self
            .with_writer(|conn| {
                for contact in contacts {
                    Self::write_contact(conn, contact)?;
                }
                Ok(contacts.len())
            })
            .map_err(|e| self.insertion("contact", e))?;
        debug!(target_db = %self.label, source_db = %source.label(), inserted, "Inserted contacts");
        Ok(inserted)
    }

    fn replace_contact_groups(&self, groups: &[ContactGroup], source: &dyn ChatStore) -> Result<usize> {
        let replaced = self
            .with_writer(|conn| {
                for group in groups {
                    Self::write_contact_group(conn, group)?;
                }
                Ok(groups.len())
            })
            .map_err(|e| self.insertion("contact group", e))?;
        debug!(target_db = %self.label, source_db = %source.label(), replaced, "Replaced contact groups");
        Ok(replaced)
    }

    fn in_transaction(&self, unit: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let _unit = lock(&self.unit_lock);
        self.with_writer(|conn| conn.execute_batch("BEGIN IMMEDIATE"))
            .map_err(|e| self.access(e))?;

        match unit() {
            Ok(()) => self
                .with_writer(|conn| conn.execute_batch("COMMIT"))
                .map_err(|e| self.insertion("transaction", e)),
            Err(err) => {
                if let Err(rollback) = self.with_writer(|conn| conn.execute_batch("ROLLBACK")) {
                    warn!(database = %self.label, error = %rollback, "Rollback failed");
                }
                Err(err)
            },
        }
    }

    fn rolls_back(&self) -> bool {
        true
    }

    fn clear_cache(&self) {
        self.cache.clear_cache();
    }

    fn register_consumer(&self, owner: &str) {
        lock(&self.consumers).insert(owner.to_string());
    }

    fn unregister_consumer(&self, owner: &str) {
        lock(&self.consumers).remove(owner);
    }

    fn has_consumers(&self) -> bool {
        !lock(&self.consumers).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    #[test]
    fn test_conversation_statistics() {
        let dir = tempdir().expect("Failed to create temp directory");
        let db = Database::new(dir.path().join("stats.db")).expect("Failed to create database");
        db.add_conversation(&Conversation::new("alice", "Alice", ChatType::Single)).expect("chat");
        db.add_message("alice", "alice", at(50), "first", MessageKind::Normal).expect("message");
        db.add_message("alice", "me", at(100), "last", MessageKind::Normal).expect("message");

        let conversations = db.get_conversations().expect("Failed to load conversations");
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].message_count, 2);
        assert_eq!(conversations[0].first_message_at, Some(at(50)));
        assert_eq!(conversations[0].last_message_at, Some(at(100)));
    }

    #[test]
    fn test_messages_rejected_for_missing_conversation() {
        let dir = tempdir().expect("Failed to create temp directory");
        let db = Database::new(dir.path().join("orphan.db")).expect("Failed to create database");
        let ghost = Conversation::new("ghost", "Ghost", ChatType::Single);
        let message = Message {
            id: 1,
            conversation_id: 1,
            author: "ghost".to_string(),
            timestamp: at(1),
            body: "boo".to_string(),
            kind: MessageKind::Normal,
        };

        let err = db.insert_messages(&ghost, &[message], &db, &ghost).unwrap_err();
        assert!(matches!(err, MergeError::Insertion { entity: "message", .. }));
    }

    #[test]
    fn test_transaction_rolls_back_failed_unit() {
        let dir = tempdir().expect("Failed to create temp directory");
        let db = Database::new(dir.path().join("tx.db")).expect("Failed to create database");
        let chat = Conversation::new("bob", "Bob", ChatType::Single);

        let result = db.in_transaction(&mut || {
            db.insert_chat(&chat, &db)?;
            Err(MergeError::Other("abort".to_string()))
        });
        assert!(result.is_err());
        db.clear_cache();
        assert!(db.get_conversation("bob").expect("read").is_none());
    }

    #[test]
    fn test_consumer_registry() {
        let dir = tempdir().expect("Failed to create temp directory");
        let db = Database::new(dir.path().join("consumers.db")).expect("Failed to create database");
        assert!(!db.has_consumers());
        db.register_consumer("session-1");
        db.register_consumer("session-2");
        db.unregister_consumer("session-1");
        assert!(db.has_consumers());
        db.unregister_consumer("session-2");
        assert!(!db.has_consumers());
    }
}
