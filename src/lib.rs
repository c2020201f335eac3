//! History Merge - compare and merge diverged chat histories
//!
//! A Rust library for reconciling two SQLite chat-history databases that
//! share a schema but have drifted apart, e.g. the same account backed up on
//! two machines.
//!
//! # Features
//!
//! - Scan both databases for conversations, messages, participants, contacts
//!   and contact groups present on only one side
//! - Match messages across databases by content signature, never by row id
//! - Merge one direction at a time, inserting only, in dependency order
//! - Background jobs with progress events and cooperative cancellation
//! - Swap sides of a finished comparison without rescanning

/// In-memory statistics cache
pub mod cache;
/// Configuration management
pub mod config;
/// SQLite database handle and connection pooling
pub mod db;
/// Comparison of two databases
pub mod diff;
/// Error types
pub mod error;
/// Background jobs, progress events and cancellation
pub mod job;
/// Logging setup and utilities
pub mod logging;
/// Merge executor
pub mod merge;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Human-readable summaries
pub mod report;
/// Database schema definitions
pub mod schema;
/// Comparison session state machine
pub mod session;
/// Cross-database message identity
pub mod signature;
/// Database access interface
pub mod store;
/// Input validation
pub mod validation;

// Re-export key components for easier access
pub use db::Database;
pub use diff::{Classification, ComparisonResult, ConversationDiff, DiffCounts, DiffScanner, Side};
pub use error::{MergeError, Result};
pub use job::{CancellationToken, JobEvent, JobHandle, JobOutput, JobRunner};
pub use merge::{Direction, MergeExecutor, MergeScope, MergeSummary};
pub use models::{ChatType, Contact, ContactGroup, Conversation, Message, MessageKind, Participant};
pub use session::{ComparisonSession, SessionState};
pub use signature::MessageSignature;
pub use store::ChatStore;
