//! Whole-database comparison of contacts, contact groups and conversation
//! statistics.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::diff::result::ConversationDiff;
use crate::error::Result;
use crate::models::{Contact, ContactGroup, Conversation};
use crate::store::ChatStore;

/// Entities present on one side and absent on the other
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityDiff {
    /// Contacts only in A
    pub contacts_only_on_a: Vec<Contact>,
    /// Contacts only in B
    pub contacts_only_on_b: Vec<Contact>,
    /// Groups in A missing from B or with other members in B
    pub groups_only_on_a: Vec<ContactGroup>,
    /// Groups in B missing from A or with other members in A
    pub groups_only_on_b: Vec<ContactGroup>,
    /// Every conversation identity on either side, A's order first
    pub conversations: Vec<ConversationDiff>,
}

/// Stateless differ over the entity lists of two stores
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityDiffer;

impl EntityDiffer {
    /// Compare contacts, contact groups and conversation statistics of `a` and `b`
    pub fn diff(a: &dyn ChatStore, b: &dyn ChatStore) -> Result<EntityDiff> {
        let (contacts_a, contacts_b) = (a.get_contacts()?, b.get_contacts()?);
        let (groups_a, groups_b) = (a.get_contact_groups()?, b.get_contact_groups()?);
        let (conversations_a, conversations_b) = (a.get_conversations()?, b.get_conversations()?);

        let diff = EntityDiff {
            contacts_only_on_a: contacts_missing_from(&contacts_a, &contacts_b),
            contacts_only_on_b: contacts_missing_from(&contacts_b, &contacts_a),
            groups_only_on_a: groups_differing_from(&groups_a, &groups_b),
            groups_only_on_b: groups_differing_from(&groups_b, &groups_a),
            conversations: classify_conversations(conversations_a, conversations_b),
        };

        debug!(
            left = %a.label(),
            right = %b.label(),
            contacts_a = diff.contacts_only_on_a.len(),
            contacts_b = diff.contacts_only_on_b.len(),
            groups_a = diff.groups_only_on_a.len(),
            groups_b = diff.groups_only_on_b.len(),
            conversations = diff.conversations.len(),
            "Compared entities"
        );
        Ok(diff)
    }
}

/// Contacts of `from` whose identity `other` lacks, each identity once
fn contacts_missing_from(from: &[Contact], other: &[Contact]) -> Vec<Contact> {
    let known: HashSet<&str> = other.iter().map(|c| c.identity.as_str()).collect();
    let mut emitted = HashSet::new();
    from.iter()
        .filter(|c| !known.contains(c.identity.as_str()) && emitted.insert(c.identity.as_str()))
        .cloned()
        .collect()
}

/// Groups of `from` that `other` lacks by name or holds with a different member set
fn groups_differing_from(from: &[ContactGroup], other: &[ContactGroup]) -> Vec<ContactGroup> {
    let by_name: HashMap<&str, &ContactGroup> = other.iter().map(|g| (g.name.as_str(), g)).collect();
    from.iter()
        .filter(|g| by_name.get(g.name.as_str()).map_or(true, |o| o.members != g.members))
        .cloned()
        .collect()
}

fn classify_conversations(a: Vec<Conversation>, b: Vec<Conversation>) -> Vec<ConversationDiff> {
    let order_b: Vec<String> = b.iter().map(|c| c.identity.clone()).collect();
    let mut b_by_identity: HashMap<String, Conversation> = b.into_iter().map(|c| (c.identity.clone(), c)).collect();

    let mut diffs = Vec::with_capacity(a.len().max(order_b.len()));
    let mut seen = HashSet::new();
    for conversation in a {
        if !seen.insert(conversation.identity.clone()) {
            continue;
        }
        let identity = conversation.identity.clone();
        let other = b_by_identity.remove(&identity);
        diffs.push(ConversationDiff::unscanned(&identity, Some(conversation), other));
    }
    for identity in order_b {
        if let Some(only_b) = b_by_identity.remove(&identity) {
            diffs.push(ConversationDiff::unscanned(&identity, None, Some(only_b)));
        }
    }
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contacts_deduplicated_by_identity() {
        let from = vec![Contact::new("x", "X"), Contact::new("x", "X again"), Contact::new("y", "Y")];
        let other = vec![Contact::new("y", "Y")];
        let missing = contacts_missing_from(&from, &other);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "X");
    }

    #[test]
    fn test_group_with_changed_members_differs_both_ways() {
        let a = vec![ContactGroup::new("Friends", ["x", "y", "z"])];
        let b = vec![ContactGroup::new("Friends", ["x", "y"])];
        assert_eq!(groups_differing_from(&a, &b).len(), 1);
        assert_eq!(groups_differing_from(&b, &a).len(), 1);
        assert!(groups_differing_from(&a, &a.clone()).is_empty());
    }
}
