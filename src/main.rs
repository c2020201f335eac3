use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{debug, info};

use history_merge::config::AppConfig;
use history_merge::diff::result::Side;
use history_merge::job::{Fragment, JobEvent};
use history_merge::logging::init_logging;
use history_merge::report::{plural, StoreSummary};
use history_merge::validation::InputValidator;
use history_merge::{
    ChatStore, ChatType, ComparisonResult, ComparisonSession, Contact, ContactGroup, Conversation, ConversationDiff,
    Database, Direction, MergeScope, MessageKind, Participant,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file layered over the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan two databases for differences
    Scan {
        /// Left database (side A)
        left: PathBuf,

        /// Right database (side B)
        right: PathBuf,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan, then copy differences from one database into the other
    Merge {
        /// Left database (side A)
        left: PathBuf,

        /// Right database (side B)
        right: PathBuf,

        /// Which way to copy
        #[arg(short, long, value_enum)]
        direction: DirectionArg,

        /// Only merge these conversations
        #[arg(long = "chat")]
        chats: Vec<String>,

        /// Only merge these contacts
        #[arg(long = "contact")]
        contacts: Vec<String>,

        /// Only merge these contact groups
        #[arg(long = "group")]
        groups: Vec<String>,
    },
    /// Show an overview of one database
    Summary {
        /// Database file
        db: PathBuf,

        /// Second database to compare contacts against; both are summarized
        #[arg(long)]
        against: Option<PathBuf>,
    },
    /// Compare a single conversation
    DiffChat {
        /// Left database (side A)
        left: PathBuf,

        /// Right database (side B)
        right: PathBuf,

        /// Conversation identity
        identity: String,

        /// Print the diff as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load a JSON fixture into a database
    Import {
        /// Database file, created if missing
        db: PathBuf,

        /// Fixture file
        fixture: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    /// Copy from left into right
    LeftToRight,
    /// Copy from right into left
    RightToLeft,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::LeftToRight => Self::AToB,
            DirectionArg::RightToLeft => Self::BToA,
        }
    }
}

/// Fixture layout accepted by `import`
#[derive(Debug, Deserialize)]
struct Fixture {
    account: Option<FixtureAccount>,
    #[serde(default)]
    contacts: Vec<FixtureContact>,
    #[serde(default)]
    groups: Vec<FixtureGroup>,
    #[serde(default)]
    conversations: Vec<FixtureConversation>,
}

#[derive(Debug, Deserialize)]
struct FixtureAccount {
    identity: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct FixtureContact {
    identity: String,
    #[serde(default)]
    name: String,
    phone: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FixtureGroup {
    name: String,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FixtureConversation {
    identity: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    group: bool,
    #[serde(default)]
    participants: Vec<String>,
    #[serde(default)]
    messages: Vec<FixtureMessage>,
}

#[derive(Debug, Deserialize)]
struct FixtureMessage {
    author: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    body: String,
    kind: Option<MessageKind>,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load_from(cli.config.as_deref())?;

    // Initialize logging
    let _log_guard = init_logging(
        Some(&config.get_log_level()),
        config.logging.file_path.as_deref().map(Path::new),
        config.logging.format == "json",
    )?;

    debug!("Starting history-merge");

    // Process command
    match cli.command {
        Commands::Scan { left, right, json } => scan(&config, &left, &right, json),
        Commands::Merge {
            left,
            right,
            direction,
            chats,
            contacts,
            groups,
        } => merge(&config, &left, &right, direction.into(), build_scope(chats, contacts, groups)),
        Commands::Summary { db, against } => summary(&config, &db, against.as_deref()),
        Commands::DiffChat {
            left,
            right,
            identity,
            json,
        } => diff_chat(&config, &left, &right, &identity, json),
        Commands::Import { db, fixture } => import(&config, &db, &fixture),
    }
}

#[allow(clippy::print_stdout)]
fn output(text: &str) {
    println!("{text}");
}

fn build_scope(chats: Vec<String>, contacts: Vec<String>, groups: Vec<String>) -> MergeScope {
    if !chats.is_empty() {
        MergeScope::Conversations(chats)
    } else if !contacts.is_empty() || !groups.is_empty() {
        MergeScope::Contacts { contacts, groups }
    } else {
        MergeScope::All
    }
}

/// Open both sides of a comparison
fn open_pair(config: &AppConfig, left: &Path, right: &Path) -> Result<(Arc<Database>, Arc<Database>)> {
    InputValidator::validate_database_path(left, true)?;
    InputValidator::validate_database_path(right, true)?;
    InputValidator::validate_distinct(left, right)?;

    let a = Database::open(left, &config.database).with_context(|| format!("Failed to open {}", left.display()))?;
    let b = Database::open(right, &config.database).with_context(|| format!("Failed to open {}", right.display()))?;
    Ok((Arc::new(a), Arc::new(b)))
}

fn log_event(event: &JobEvent) {
    match event {
        JobEvent::Progress(progress) => {
            info!(
                percent = progress.percent,
                completed = progress.completed,
                total = progress.total,
                "{}% complete ({} of {})",
                progress.percent,
                progress.completed,
                plural("unit", progress.total)
            );
        },
        JobEvent::Partial(Fragment::Conversation(diff)) => {
            debug!(chat = %diff.identity, classification = ?diff.classification, "Conversation differs");
        },
        JobEvent::Partial(Fragment::Merged { unit }) => debug!(%unit, "Merged unit"),
        JobEvent::Partial(Fragment::Entities { .. }) => debug!("Compared contacts"),
        JobEvent::Completed(_) | JobEvent::Failed(_) | JobEvent::Cancelled(_) => {},
    }
}

fn scanned_session(config: &AppConfig, left: &Path, right: &Path) -> Result<ComparisonSession> {
    let (a, b) = open_pair(config, left, right)?;
    let mut session = ComparisonSession::new(a, b, config);
    session.scan()?;
    session.wait(&mut log_event)?;
    Ok(session)
}

/// Scan two databases and print what each has over the other
fn scan(config: &AppConfig, left: &Path, right: &Path, json: bool) -> Result<()> {
    let session = scanned_session(config, left, right)?;
    let result = session.result().context("Scan produced no result")?;

    if json {
        output(&serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let labels = (session.left().label(), session.right().label());
    let accounts = (session.left().account_identity()?, session.right().account_identity()?);
    output(&describe_side(result, Side::A, &labels.0, &labels.1, accounts.0.as_deref()));
    output(&describe_side(result, Side::B, &labels.1, &labels.0, accounts.1.as_deref()));
    Ok(())
}

fn describe_side(result: &ComparisonResult, side: Side, label: &str, other: &str, account: Option<&str>) -> String {
    let counts = result.counts(side);
    if counts.is_empty() {
        return format!("{label}: no new messages or contacts.");
    }

    let mut lines = vec![format!("{label} has over {other}: {}.", counts.describe())];
    for diff in result.differing_on(side) {
        lines.push(format!(
            "  {} [{}]: {}",
            diff.title(),
            diff.people(account),
            describe_conversation(diff, side)
        ));
    }
    let contacts = result.contacts_only_on(side);
    if !contacts.is_empty() {
        let names: Vec<&str> = contacts.iter().map(|c| c.name.as_str()).collect();
        lines.push(format!("  {}: {}", plural("new contact", contacts.len()), names.join(", ")));
    }
    let groups = result.groups_only_on(side);
    if !groups.is_empty() {
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        lines.push(format!("  {}: {}", plural("new contact group", groups.len()), names.join(", ")));
    }
    lines.join("\n")
}

fn describe_conversation(diff: &ConversationDiff, side: Side) -> String {
    let mut parts = Vec::new();
    if diff.record(side.other()).is_none() {
        parts.push("new chat".to_string());
    }
    let messages = diff.messages_only_on(side).len();
    if messages > 0 {
        parts.push(plural("message", messages));
    }
    let participants = diff.participants_only_on(side).len();
    if participants > 0 {
        parts.push(plural("participant", participants));
    }
    parts.join(", ")
}

/// Scan, then merge in one direction
fn merge(config: &AppConfig, left: &Path, right: &Path, direction: Direction, scope: MergeScope) -> Result<()> {
    let mut session = scanned_session(config, left, right)?;
    session.merge(direction, scope)?;
    session.wait(&mut log_event)?;

    let summary = session.last_summary().context("Merge produced no summary")?;
    output(&summary.to_string());
    if summary.participants_skipped > 0 {
        output(&format!(
            "Skipped {} without a contact on either side.",
            plural("participant", summary.participants_skipped)
        ));
    }
    Ok(())
}

/// Print the overview of one database
fn summary(config: &AppConfig, path: &Path, against: Option<&Path>) -> Result<()> {
    let Some(other) = against else {
        InputValidator::validate_database_path(path, true)?;
        let db =
            Database::open(path, &config.database).with_context(|| format!("Failed to open {}", path.display()))?;
        let summary = StoreSummary::for_database(&db, None)?;
        output(summary.to_string().trim_end());
        return Ok(());
    };

    let (a, b) = open_pair(config, path, other)?;
    let (left, right) = StoreSummary::for_pair(&a, &b)?;
    output(left.to_string().trim_end());
    output("");
    output(right.to_string().trim_end());
    Ok(())
}

/// Compare one conversation without a full scan
fn diff_chat(config: &AppConfig, left: &Path, right: &Path, identity: &str, json: bool) -> Result<()> {
    let (a, b) = open_pair(config, left, right)?;
    let mut session = ComparisonSession::new(a, b, config);
    let diff = session.get_conversation_diff(identity)?;

    if json {
        output(&serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    output(&format!("{} ({:?})", diff.title(), diff.classification));
    for (side, label) in [(Side::A, session.left().label()), (Side::B, session.right().label())] {
        let described = describe_conversation(&diff, side);
        output(&format!(
            "  only in {label}: {}",
            if described.is_empty() { "nothing" } else { described.as_str() }
        ));
    }
    Ok(())
}

/// Load a fixture file into a database
fn import(config: &AppConfig, path: &Path, fixture_path: &Path) -> Result<()> {
    InputValidator::validate_database_path(path, false)?;
    let text = fs::read_to_string(fixture_path)
        .with_context(|| format!("Failed to read fixture {}", fixture_path.display()))?;
    let fixture: Fixture = serde_json::from_str(&text).context("Invalid fixture")?;
    let db = Database::open(path, &config.database).with_context(|| format!("Failed to open {}", path.display()))?;

    if let Some(account) = &fixture.account {
        db.add_account(&account.identity, &account.name)?;
    }
    for contact in &fixture.contacts {
        InputValidator::validate_identity(&contact.identity)?;
        let mut record = Contact::new(&contact.identity, &contact.name);
        record.phone.clone_from(&contact.phone);
        record.email.clone_from(&contact.email);
        db.add_contact(&record)?;
    }
    for group in &fixture.groups {
        db.add_contact_group(&ContactGroup::new(&group.name, group.members.iter().cloned()))?;
    }

    let mut messages = 0;
    for chat in &fixture.conversations {
        InputValidator::validate_identity(&chat.identity)?;
        let chat_type = if chat.group { ChatType::Group } else { ChatType::Single };
        let mut conversation = Conversation::new(&chat.identity, &chat.title, chat_type);
        conversation.created_at = chat.messages.iter().map(|m| m.timestamp).min();
        conversation.participants = chat.participants.iter().map(|p| Participant::new(p)).collect();
        db.add_conversation(&conversation)?;

        for message in &chat.messages {
            db.add_message(
                &chat.identity,
                &message.author,
                message.timestamp,
                &message.body,
                message.kind.unwrap_or(MessageKind::Normal),
            )?;
            messages += 1;
        }
    }

    info!(
        database = %path.display(),
        contacts = fixture.contacts.len(),
        groups = fixture.groups.len(),
        conversations = fixture.conversations.len(),
        messages,
        "Imported fixture"
    );
    Ok(())
}
