//! Database schema definitions
//!
//! Constants for table and column names used with rusqlite. Both sides of a
//! comparison share these table shapes.

/// Largest number of bound parameters SQLite accepts in one statement
pub const MAX_QUERY_PARAMS: usize = 999;

/// Accounts table schema (owner of the database)
pub mod accounts {
    /// Table name
    pub const TABLE: &str = "accounts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Account handle column
    pub const IDENTITY: &str = "identity";
    /// Display name column
    pub const NAME: &str = "name";
}

/// Contacts table schema
pub mod contacts {
    /// Table name
    pub const TABLE: &str = "contacts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Contact handle column
    pub const IDENTITY: &str = "identity";
    /// Contact name column
    pub const NAME: &str = "name";
    /// Phone number column
    pub const PHONE: &str = "phone";
    /// Email address column
    pub const EMAIL: &str = "email";
    /// Country column
    pub const COUNTRY: &str = "country";
    /// City column
    pub const CITY: &str = "city";
    /// Profile text column
    pub const ABOUT: &str = "about";
}

/// Contact groups table schema
pub mod contact_groups {
    /// Table name
    pub const TABLE: &str = "contact_groups";
    /// Primary key column
    pub const ID: &str = "id";
    /// Group name column
    pub const NAME: &str = "name";
    /// Member identities column, a JSON array
    pub const MEMBERS: &str = "members";
}

/// Conversations table schema
pub mod conversations {
    /// Table name
    pub const TABLE: &str = "conversations";
    /// Primary key column
    pub const ID: &str = "id";
    /// Chat handle column
    pub const IDENTITY: &str = "identity";
    /// Title column
    pub const TITLE: &str = "title";
    /// Chat type code column
    pub const CHAT_TYPE: &str = "chat_type";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
}

/// Participants table schema
pub mod participants {
    /// Table name
    pub const TABLE: &str = "participants";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to conversations table
    pub const CONVERSATION_ID: &str = "conversation_id";
    /// Contact handle column
    pub const IDENTITY: &str = "identity";
    /// Role column
    pub const ROLE: &str = "role";
}

/// Messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to conversations table
    pub const CONVERSATION_ID: &str = "conversation_id";
    /// Author handle column
    pub const AUTHOR: &str = "author";
    /// Send timestamp column
    pub const TIMESTAMP: &str = "timestamp";
    /// Message text column
    pub const BODY: &str = "body";
    /// Message kind code column
    pub const KIND: &str = "kind";
}
