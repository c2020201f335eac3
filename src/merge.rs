//! One-directional merge of scan differences into the target database.
//!
//! Merging only ever inserts. Each conversation is one unit of work: the chat
//! row first, then contacts its new participants need, then the participants,
//! then the messages in source time order. The contact and contact group
//! batch is a unit of its own. A failed insert abandons its unit and the merge
//! moves on; an access error stops the whole merge.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{MergeConfig, ScanConfig};
use crate::diff::messages::MessageSetDiffer;
use crate::diff::result::{ComparisonResult, ConversationDiff, DiffCounts, Side};
use crate::error::{MergeError, Result};
use crate::job::CancellationToken;
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{Contact, ContactGroup, Conversation, Message, Participant};
use crate::report::plural;
use crate::signature::MessageSignature;
use crate::store::ChatStore;

/// Unit label of the contact and contact group batch
pub const CONTACTS_UNIT: &str = "contacts";

/// Which database is copied from and which is copied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Copy from A into B
    AToB,
    /// Copy from B into A
    BToA,
}

impl Direction {
    /// Side copied from
    #[must_use]
    pub const fn source(self) -> Side {
        match self {
            Self::AToB => Side::A,
            Self::BToA => Side::B,
        }
    }

    /// Side copied to
    #[must_use]
    pub const fn target(self) -> Side {
        self.source().other()
    }

    /// The opposite direction
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::AToB => Self::BToA,
            Self::BToA => Self::AToB,
        }
    }

    /// Label for logs and metrics
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AToB => "a_to_b",
            Self::BToA => "b_to_a",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What part of a scan result to merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeScope {
    /// Every difference from the source side
    All,
    /// These conversations, by identity
    Conversations(Vec<String>),
    /// These contacts (by identity) and contact groups (by name)
    Contacts {
        /// Contact identities
        contacts: Vec<String>,
        /// Contact group names
        groups: Vec<String>,
    },
}

/// Totals of a merge. Counts only cover units that were written successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Conversations that received any insert
    pub conversations: usize,
    /// Messages inserted
    pub messages: usize,
    /// Participants inserted
    pub participants: usize,
    /// Participants left out because their contact exists on neither side
    pub participants_skipped: usize,
    /// Contacts inserted
    pub contacts: usize,
    /// Contact groups inserted or replaced
    pub contact_groups: usize,
    /// Units abandoned after an insertion error
    pub failed_units: usize,
    /// First insertion error, if any
    pub first_error: Option<String>,
    /// Identities of conversations merged successfully
    pub merged_conversations: Vec<String>,
    /// Identities of contacts merged successfully
    pub merged_contacts: Vec<String>,
    /// Names of contact groups merged successfully
    pub merged_groups: Vec<String>,
    /// Whether the merge stopped early on request
    pub cancelled: bool,
}

impl MergeSummary {
    /// Written records by category
    #[must_use]
    pub const fn counts(&self) -> DiffCounts {
        DiffCounts {
            chats: self.conversations,
            messages: self.messages,
            contacts: self.contacts,
            contact_groups: self.contact_groups,
        }
    }

    /// Whether the merge wrote nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.counts().is_empty() && self.participants == 0
    }

    /// Add another summary's totals to this one
    pub fn absorb(&mut self, other: Self) {
        self.conversations += other.conversations;
        self.messages += other.messages;
        self.participants += other.participants;
        self.participants_skipped += other.participants_skipped;
        self.contacts += other.contacts;
        self.contact_groups += other.contact_groups;
        self.failed_units += other.failed_units;
        if self.first_error.is_none() {
            self.first_error = other.first_error;
        }
        self.merged_conversations.extend(other.merged_conversations);
        self.merged_contacts.extend(other.merged_contacts);
        self.merged_groups.extend(other.merged_groups);
        self.cancelled |= other.cancelled;
    }

    fn record_failure(&mut self, unit: &str, err: &MergeError) {
        self.failed_units += 1;
        if self.first_error.is_none() {
            self.first_error = Some(format!("{unit}: {err}"));
        }
    }
}

impl fmt::Display for MergeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let described = self.counts().describe();
        if described.is_empty() {
            f.write_str("Nothing merged")?;
        } else {
            write!(f, "Merged {described}")?;
        }
        if self.participants > 0 {
            write!(f, " ({})", plural("participant", self.participants))?;
        }
        if let Some(err) = &self.first_error {
            write!(f, "; {} failed, first error: {err}", plural("unit", self.failed_units))?;
        }
        if self.cancelled {
            f.write_str("; cancelled")?;
        }
        Ok(())
    }
}

/// Observation point handed to the merge callback after each unit
#[derive(Debug)]
pub struct MergeStep<'a> {
    /// Units finished so far
    pub completed: usize,
    /// Units in the merge
    pub total: usize,
    /// Conversation identity or [`CONTACTS_UNIT`]
    pub unit: &'a str,
    /// Whether the unit was written successfully
    pub written: bool,
    /// Totals so far
    pub summary: &'a MergeSummary,
}

/// Records planned for one conversation, read before anything is written
struct ConversationPlan {
    source_conversation: Conversation,
    target_conversation: Option<Conversation>,
    contacts: Vec<Contact>,
    participants: Vec<Participant>,
    skipped: usize,
    messages: Vec<Message>,
}

/// Records planned for one contact batch
struct ContactPlan {
    contacts: Vec<Contact>,
    groups: Vec<ContactGroup>,
}

/// Applies scan differences to one side of a database pair
pub struct MergeExecutor<'a> {
    a: &'a dyn ChatStore,
    b: &'a dyn ChatStore,
    differ: MessageSetDiffer,
    transactional: bool,
    cancel: CancellationToken,
    metrics: MetricsCollector,
}

impl<'a> MergeExecutor<'a> {
    /// Executor over the pair (`a`, `b`)
    #[must_use]
    pub fn new(a: &'a dyn ChatStore, b: &'a dyn ChatStore, merge: &MergeConfig, scan: &ScanConfig) -> Self {
        Self {
            a,
            b,
            differ: MessageSetDiffer::new(scan),
            transactional: merge.transaction_per_conversation,
            cancel: CancellationToken::new(),
            metrics: MetricsCollector::default(),
        }
    }

    /// Stop between units once `cancel` is triggered
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    const fn store(&self, side: Side) -> &'a dyn ChatStore {
        match side {
            Side::A => self.a,
            Side::B => self.b,
        }
    }

    /// Merge every difference the source side of `direction` has
    pub fn merge_all(&self, result: &ComparisonResult, direction: Direction) -> Result<MergeSummary> {
        self.merge_scope(result, direction, &MergeScope::All, &mut |_| {})
    }

    /// Merge the part of `result` selected by `scope`, reporting each finished unit
    pub fn merge_scope(
        &self,
        result: &ComparisonResult,
        direction: Direction,
        scope: &MergeScope,
        on_step: &mut dyn FnMut(MergeStep<'_>),
    ) -> Result<MergeSummary> {
        let source = direction.source();
        let timer = OperationTimer::new("merge");

        let (contacts, groups): (Vec<Contact>, Vec<ContactGroup>) = match scope {
            MergeScope::All => (result.contacts_only_on(source).to_vec(), result.groups_only_on(source).to_vec()),
            MergeScope::Conversations(_) => (Vec::new(), Vec::new()),
            MergeScope::Contacts { contacts, groups } => (
                result
                    .contacts_only_on(source)
                    .iter()
                    .filter(|c| contacts.contains(&c.identity))
                    .cloned()
                    .collect(),
                result
                    .groups_only_on(source)
                    .iter()
                    .filter(|g| groups.contains(&g.name))
                    .cloned()
                    .collect(),
            ),
        };
        let conversations: Vec<&ConversationDiff> = match scope {
            MergeScope::All => result.differing_on(source).collect(),
            MergeScope::Conversations(identities) => {
                for identity in identities.iter().filter(|i| result.conversation(i).is_none()) {
                    warn!(chat = %identity, "Conversation not in scan result, skipping");
                }
                result
                    .differing_on(source)
                    .filter(|d| identities.contains(&d.identity))
                    .collect()
            },
            MergeScope::Contacts { .. } => Vec::new(),
        };

        let has_contact_unit = !contacts.is_empty() || !groups.is_empty();
        let total = conversations.len() + usize::from(has_contact_unit);
        let mut summary = MergeSummary::default();

        info!(
            source = %self.store(source).label(),
            target = %self.store(direction.target()).label(),
            %direction,
            units = total,
            "Merging differences"
        );

        let contact_unit = has_contact_unit.then_some((contacts.as_slice(), groups.as_slice()));
        let outcome = self.run_units(contact_unit, &conversations, direction, &mut summary, on_step);

        let duration = timer.finish();
        if let Err(err) = outcome {
            self.metrics.record_error(err.kind(), "merge");
            warn!(%direction, error = %err, "Merge aborted");
            return Err(err);
        }

        self.metrics.record_merge(direction, &summary, duration);
        info!(%direction, "{summary}");
        Ok(summary)
    }

    fn run_units(
        &self,
        contact_unit: Option<(&[Contact], &[ContactGroup])>,
        conversations: &[&ConversationDiff],
        direction: Direction,
        summary: &mut MergeSummary,
        on_step: &mut dyn FnMut(MergeStep<'_>),
    ) -> Result<()> {
        let total = conversations.len() + usize::from(contact_unit.is_some());
        let mut completed = 0;

        if let Some((contacts, groups)) = contact_unit {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                return Ok(());
            }
            let written = self.run_unit(CONTACTS_UNIT, summary, |s| {
                self.merge_contacts_unit(contacts, groups, direction, s)
            })?;
            completed += 1;
            on_step(MergeStep {
                completed,
                total,
                unit: CONTACTS_UNIT,
                written,
                summary: &*summary,
            });
        }

        for diff in conversations {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                return Ok(());
            }
            let written = self.run_unit(&diff.identity, summary, |s| self.merge_conversation_unit(diff, direction, s))?;
            completed += 1;
            on_step(MergeStep {
                completed,
                total,
                unit: &diff.identity,
                written,
                summary: &*summary,
            });
        }
        Ok(())
    }

    /// Merge the source side of one conversation diff
    pub fn merge_one(&self, diff: &ConversationDiff, direction: Direction) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        self.run_unit(&diff.identity, &mut summary, |s| self.merge_conversation_unit(diff, direction, s))?;
        Ok(summary)
    }

    /// Merge contacts and contact groups from the source side of `direction`.
    ///
    /// Group members the target lacks are copied from the source first.
    pub fn merge_contacts(
        &self,
        contacts: &[Contact],
        groups: &[ContactGroup],
        direction: Direction,
    ) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        self.run_unit(CONTACTS_UNIT, &mut summary, |s| {
            self.merge_contacts_unit(contacts, groups, direction, s)
        })?;
        Ok(summary)
    }

    /// Run one unit, folding its outcome into `summary`.
    ///
    /// Returns whether the unit succeeded. Fatal errors are passed on.
    fn run_unit(
        &self,
        unit: &str,
        summary: &mut MergeSummary,
        body: impl FnOnce(&mut MergeSummary) -> Result<()>,
    ) -> Result<bool> {
        let mut unit_summary = MergeSummary::default();
        match body(&mut unit_summary) {
            Ok(()) => {
                summary.absorb(unit_summary);
                Ok(true)
            },
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(unit, error = %err, "Merge unit abandoned");
                self.metrics.record_error(err.kind(), "merge");
                summary.absorb(unit_summary);
                summary.record_failure(unit, &err);
                Ok(false)
            },
        }
    }

    /// Run `write` inside a target transaction when configured, then drop the
    /// target's cached statistics whatever the outcome.
    fn write_unit(&self, target: &dyn ChatStore, write: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let outcome = if self.transactional {
            target.in_transaction(write)
        } else {
            write()
        };
        target.clear_cache();
        outcome
    }

    /// Count what a failed unit left in the target when nothing was rolled back
    fn keep_partial(&self, target: &dyn ChatStore, written: MergeSummary, summary: &mut MergeSummary) {
        if self.transactional && target.rolls_back() {
            return;
        }
        if !written.is_empty() {
            debug!(
                conversations = written.conversations,
                participants = written.participants,
                contacts = written.contacts,
                "Failed unit kept partial writes"
            );
        }
        summary.absorb(written);
    }

    fn account_identities(&self) -> Result<HashSet<String>> {
        Ok([self.a.account_identity()?, self.b.account_identity()?]
            .into_iter()
            .flatten()
            .collect())
    }

    fn plan_conversation(&self, diff: &ConversationDiff, direction: Direction) -> Result<Option<ConversationPlan>> {
        let (source, target) = (self.store(direction.source()), self.store(direction.target()));
        let Some(source_conversation) = diff.record(direction.source()).cloned() else {
            return Ok(None);
        };
        let target_conversation = target.get_conversation(&diff.identity)?;

        // Participants are re-read so a stale scan cannot add duplicates
        let present: HashSet<String> = match &target_conversation {
            Some(conversation) => target.get_participants(conversation)?.into_iter().map(|p| p.identity).collect(),
            None => HashSet::new(),
        };
        let wanted: Vec<Participant> = source
            .get_participants(&source_conversation)?
            .into_iter()
            .filter(|p| !present.contains(&p.identity))
            .collect();

        let mut known: HashSet<String> = target.get_contacts()?.into_iter().map(|c| c.identity).collect();
        known.extend(self.account_identities()?);
        let source_contacts: HashMap<String, Contact> =
            source.get_contacts()?.into_iter().map(|c| (c.identity.clone(), c)).collect();

        let mut contacts = Vec::new();
        let mut participants = Vec::with_capacity(wanted.len());
        let mut skipped = 0;
        for participant in wanted {
            if known.contains(&participant.identity) {
                participants.push(participant);
            } else if let Some(contact) = source_contacts.get(&participant.identity) {
                known.insert(participant.identity.clone());
                contacts.push(contact.clone());
                participants.push(participant);
            } else {
                warn!(
                    chat = %diff.identity,
                    participant = %participant.identity,
                    "No contact for participant on either side, skipping"
                );
                skipped += 1;
            }
        }

        let ids: Vec<i64> = diff.messages_only_on(direction.source()).iter().map(|m| m.id).collect();
        let mut messages = self.differ.fetch_messages(source, &ids)?;
        let mut present_messages: HashSet<MessageSignature> = match &target_conversation {
            Some(conversation) => target.get_message_signatures(conversation)?.into_iter().collect(),
            None => HashSet::new(),
        };
        messages.retain(|m| present_messages.insert(m.signature()));

        Ok(Some(ConversationPlan {
            source_conversation,
            target_conversation,
            contacts,
            participants,
            skipped,
            messages,
        }))
    }

    fn merge_conversation_unit(
        &self,
        diff: &ConversationDiff,
        direction: Direction,
        summary: &mut MergeSummary,
    ) -> Result<()> {
        let (source, target) = (self.store(direction.source()), self.store(direction.target()));
        let Some(plan) = self.plan_conversation(diff, direction)? else {
            return Ok(());
        };

        let mut written = MergeSummary::default();
        let outcome = self.write_unit(target, &mut || {
            written = MergeSummary::default();
            let target_conversation = match &plan.target_conversation {
                Some(existing) => existing.clone(),
                None => {
                    let mut created = plan.source_conversation.clone();
                    created.id = target.insert_chat(&plan.source_conversation, source)?;
                    created.participants.clear();
                    written.conversations = 1;
                    created
                },
            };
            if !plan.contacts.is_empty() {
                written.contacts = target.insert_contacts(&plan.contacts, source)?;
                written.merged_contacts = plan.contacts.iter().map(|c| c.identity.clone()).collect();
            }
            if !plan.participants.is_empty() {
                written.participants = target.insert_participants(&target_conversation, &plan.participants, source)?;
            }
            if !plan.messages.is_empty() {
                written.messages =
                    target.insert_messages(&target_conversation, &plan.messages, source, &plan.source_conversation)?;
            }
            Ok(())
        });
        if let Err(err) = outcome {
            self.keep_partial(target, written, summary);
            return Err(err);
        }

        if written.conversations == 0 && (written.messages > 0 || written.participants > 0) {
            written.conversations = 1;
        }
        written.participants_skipped = plan.skipped;
        written.merged_conversations.push(diff.identity.clone());
        debug!(
            chat = %diff.identity,
            messages = written.messages,
            participants = written.participants,
            contacts = written.contacts,
            "Merged conversation"
        );
        summary.absorb(written);
        Ok(())
    }

    fn merge_contacts_unit(
        &self,
        contacts: &[Contact],
        groups: &[ContactGroup],
        direction: Direction,
        summary: &mut MergeSummary,
    ) -> Result<()> {
        let (source, target) = (self.store(direction.source()), self.store(direction.target()));
        let plan = self.plan_contacts(contacts, groups, direction)?;

        let mut written = MergeSummary::default();
        let outcome = self.write_unit(target, &mut || {
            written = MergeSummary::default();
            // Members first, so no group refers to a contact the target lacks
            if !plan.contacts.is_empty() {
                written.contacts = target.insert_contacts(&plan.contacts, source)?;
            }
            if !plan.groups.is_empty() {
                written.contact_groups = target.replace_contact_groups(&plan.groups, source)?;
            }
            Ok(())
        });
        if let Err(err) = outcome {
            self.keep_partial(target, written, summary);
            return Err(err);
        }

        written.merged_contacts = contacts.iter().map(|c| c.identity.clone()).collect();
        written.merged_groups = plan.groups.iter().map(|g| g.name.clone()).collect();
        debug!(
            contacts = written.contacts,
            groups = written.contact_groups,
            "Merged contacts"
        );
        summary.absorb(written);
        Ok(())
    }

    fn plan_contacts(&self, contacts: &[Contact], groups: &[ContactGroup], direction: Direction) -> Result<ContactPlan> {
        let (source, target) = (self.store(direction.source()), self.store(direction.target()));
        let mut known: HashSet<String> = target.get_contacts()?.into_iter().map(|c| c.identity).collect();
        known.extend(self.account_identities()?);

        let mut planned = Vec::new();
        for contact in contacts {
            if known.insert(contact.identity.clone()) {
                planned.push(contact.clone());
            }
        }

        let missing_members: Vec<&String> = groups
            .iter()
            .flat_map(|g| g.members.iter())
            .filter(|m| !known.contains(*m))
            .collect();
        if !missing_members.is_empty() {
            let source_contacts: HashMap<String, Contact> =
                source.get_contacts()?.into_iter().map(|c| (c.identity.clone(), c)).collect();
            for member in missing_members {
                match source_contacts.get(member) {
                    Some(contact) if known.insert(member.clone()) => planned.push(contact.clone()),
                    Some(_) => {},
                    None => warn!(member = %member, "Group member has no contact on the source side"),
                }
            }
        }

        Ok(ContactPlan {
            contacts: planned,
            groups: groups.to_vec(),
        })
    }
}
