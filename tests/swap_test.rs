//! Transposing comparison results

use chrono::{TimeZone, Utc};
use history_merge::diff::MissingMessage;
use history_merge::{
    ChatType, Classification, ComparisonResult, Contact, ContactGroup, Conversation, ConversationDiff, MessageSignature,
    Side,
};
use proptest::prelude::*;

fn conversation(identity: &str, count: usize) -> Conversation {
    let mut conversation = Conversation::new(identity, identity, ChatType::Single);
    conversation.message_count = count;
    conversation
}

fn missing(prefix: &str, n: usize) -> Vec<MissingMessage> {
    (0..n)
        .map(|i| MissingMessage {
            id: i64::try_from(i).unwrap_or_default(),
            signature: MessageSignature::new(prefix, Utc.timestamp_opt(0, 0).unwrap(), &format!("{prefix} {i}")),
        })
        .collect()
}

prop_compose! {
    fn arb_diff(index: usize)(on_a in any::<bool>(), on_b in any::<bool>(), only_a in 0usize..5, only_b in 0usize..5)
        -> ConversationDiff
    {
        let identity = format!("chat-{index}");
        let a = (on_a || !on_b).then(|| conversation(&identity, only_a + 1));
        let b = on_b.then(|| conversation(&identity, only_b + 1));
        let mut diff = ConversationDiff::unscanned(&identity, a, b);
        if diff.a.is_some() {
            diff.only_on_a = missing("a", only_a);
        }
        if diff.b.is_some() {
            diff.only_on_b = missing("b", only_b);
        }
        diff
    }
}

fn arb_result() -> impl Strategy<Value = ComparisonResult> {
    (1usize..8)
        .prop_flat_map(|n| {
            (
                (0..n).map(arb_diff).collect::<Vec<_>>(),
                proptest::collection::vec("[a-z]{1,6}", 0..4),
                proptest::collection::vec("[a-z]{1,6}", 0..4),
                any::<bool>(),
            )
        })
        .prop_map(|(conversations, contacts_a, contacts_b, with_group)| {
            let total = conversations.len();
            ComparisonResult {
                conversations,
                contacts_only_on_a: contacts_a.iter().map(|c| Contact::new(c, c)).collect(),
                contacts_only_on_b: contacts_b.iter().map(|c| Contact::new(c, c)).collect(),
                groups_only_on_a: if with_group {
                    vec![ContactGroup::new("Friends", ["x", "y"])]
                } else {
                    Vec::new()
                },
                groups_only_on_b: Vec::new(),
                scanned: total,
                total,
                complete: true,
            }
        })
}

proptest! {
    #[test]
    fn test_transpose_twice_is_identity(result in arb_result()) {
        prop_assert_eq!(result.clone().transpose().transpose(), result);
    }

    #[test]
    fn test_transpose_exchanges_counts(result in arb_result()) {
        let swapped = result.clone().transpose();
        prop_assert_eq!(swapped.counts(Side::A), result.counts(Side::B));
        prop_assert_eq!(swapped.counts(Side::B), result.counts(Side::A));
        prop_assert_eq!(swapped.has_differences(), result.has_differences());
    }
}

#[test]
fn test_transpose_flips_one_sided_classification() {
    let diff = ConversationDiff::unscanned("alice", Some(conversation("alice", 3)), None);
    assert_eq!(diff.classification, Classification::OnlyOnA);
    let swapped = diff.transpose();
    assert_eq!(swapped.classification, Classification::OnlyOnB);
    assert!(swapped.a.is_none());
    assert!(swapped.has_new_on(Side::B));
}
