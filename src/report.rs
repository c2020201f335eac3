//! Human-readable summaries for logs and the command line.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::error::Result;
use crate::store::ChatStore;

/// `"1 chat"`, `"3 chats"`
#[must_use]
pub fn plural(word: &str, count: usize) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Byte count as B, KB, MB or GB with one decimal
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Overview of one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    /// Database label
    pub label: String,
    /// File size in bytes, for file-backed stores
    pub size_bytes: Option<u64>,
    /// File modification time, for file-backed stores
    pub modified_at: Option<DateTime<Utc>>,
    /// Number of conversations
    pub conversations: usize,
    /// Number of messages over all conversations
    pub messages: usize,
    /// Number of contacts
    pub contacts: usize,
    /// Earliest message time
    pub first_message_at: Option<DateTime<Utc>>,
    /// Latest message time
    pub last_message_at: Option<DateTime<Utc>>,
    /// Contacts the other database of a pair lacks
    pub contacts_not_in_other: Option<usize>,
}

impl StoreSummary {
    /// Summarize `store`, comparing its contacts against `other` when given
    pub fn collect(store: &dyn ChatStore, other: Option<&dyn ChatStore>) -> Result<Self> {
        let conversations = store.get_conversations()?;
        let contacts = store.get_contacts()?;

        let contacts_not_in_other = match other {
            Some(other) => {
                let known: HashSet<String> = other.get_contacts()?.into_iter().map(|c| c.identity).collect();
                Some(contacts.iter().filter(|c| !known.contains(&c.identity)).count())
            },
            None => None,
        };

        Ok(Self {
            label: store.label(),
            size_bytes: None,
            modified_at: None,
            conversations: conversations.len(),
            messages: conversations.iter().map(|c| c.message_count).sum(),
            contacts: contacts.len(),
            first_message_at: conversations.iter().filter_map(|c| c.first_message_at).min(),
            last_message_at: conversations.iter().filter_map(|c| c.last_message_at).max(),
            contacts_not_in_other,
        })
    }

    /// Summarize a database file, including its size and modification time
    pub fn for_database(db: &Database, other: Option<&dyn ChatStore>) -> Result<Self> {
        let mut summary = Self::collect(db, other)?;
        let (size, modified) = db.file_info()?;
        summary.size_bytes = Some(size);
        summary.modified_at = modified;
        Ok(summary)
    }

    /// Summaries of two databases, each counting the contacts the other lacks
    pub fn for_pair(a: &Database, b: &Database) -> Result<(Self, Self)> {
        Ok((
            Self::for_database(a, Some(b as &dyn ChatStore))?,
            Self::for_database(b, Some(a as &dyn ChatStore))?,
        ))
    }
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.label)?;
        if let Some(size) = self.size_bytes {
            writeln!(f, "  Size: {}", format_bytes(size))?;
        }
        if let Some(modified) = self.modified_at {
            writeln!(f, "  Last modified: {}", modified.format("%Y-%m-%d %H:%M:%S"))?;
        }
        writeln!(f, "  {}", plural("conversation", self.conversations))?;
        writeln!(f, "  {}", plural("message", self.messages))?;
        write!(f, "  {}", plural("contact", self.contacts))?;
        if let Some(missing) = self.contacts_not_in_other {
            write!(f, " ({missing} not present on the other side)")?;
        }
        writeln!(f)?;
        if let (Some(first), Some(last)) = (self.first_message_at, self.last_message_at) {
            writeln!(
                f,
                "  Messages from {} to {}",
                first.format("%Y-%m-%d %H:%M"),
                last.format("%Y-%m-%d %H:%M")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural("chat", 1), "1 chat");
        assert_eq!(plural("chat", 0), "0 chats");
        assert_eq!(plural("contact group", 2), "2 contact groups");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
