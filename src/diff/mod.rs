//! Comparison of two chat databases.
//!
//! [`entities`] compares contacts, contact groups and conversation
//! statistics across the whole pair, [`messages`] compares the messages and
//! participants of one conversation, and [`scanner`] drives both over every
//! conversation.

pub mod entities;
pub mod messages;
pub mod result;
pub mod scanner;

pub use entities::{EntityDiff, EntityDiffer};
pub use messages::{MessageDiff, MessageSetDiffer};
pub use result::{Classification, ComparisonResult, ConversationDiff, DiffCounts, MissingMessage, Side};
pub use scanner::{DiffScanner, ScanStep};
