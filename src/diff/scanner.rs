//! Full comparison of a database pair, one conversation at a time.

use tracing::{info, warn};

use crate::config::ScanConfig;
use crate::diff::entities::EntityDiffer;
use crate::diff::messages::MessageSetDiffer;
use crate::diff::result::{Classification, ComparisonResult, ConversationDiff, Side};
use crate::error::Result;
use crate::job::CancellationToken;
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::store::ChatStore;

/// Observation point handed to the scan callback
#[derive(Debug)]
pub enum ScanStep<'a> {
    /// Contacts and groups are known, no conversation has been diffed yet
    Entities(&'a ComparisonResult),
    /// One more conversation was processed
    Conversation {
        /// Conversations processed so far
        completed: usize,
        /// Conversations in the scan
        total: usize,
        /// The conversation just processed
        diff: &'a ConversationDiff,
        /// Everything gathered so far
        result: &'a ComparisonResult,
    },
}

/// Runs the entity comparison once, then the message comparison for every
/// conversation whose statistics differ.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffScanner {
    differ: MessageSetDiffer,
    metrics: MetricsCollector,
}

impl DiffScanner {
    /// Scanner using the page and chunk sizes from `config`
    #[must_use]
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            differ: MessageSetDiffer::new(config),
            metrics: MetricsCollector::default(),
        }
    }

    /// Compare `a` and `b`.
    ///
    /// `on_step` sees the result after the entity pass and after every
    /// conversation. When `cancel` is triggered the scan stops at the next
    /// conversation boundary and returns what it has, with `complete` unset.
    pub fn scan(
        &self,
        a: &dyn ChatStore,
        b: &dyn ChatStore,
        cancel: &CancellationToken,
        on_step: &mut dyn FnMut(ScanStep<'_>),
    ) -> Result<ComparisonResult> {
        let timer = OperationTimer::new("scan");
        info!(left = %a.label(), right = %b.label(), "Scanning differences");

        let outcome = self.scan_inner(a, b, cancel, on_step);
        let duration = timer.finish();

        match &outcome {
            Ok(result) => {
                self.metrics.record_scan(result.scanned, duration, result.complete);
                self.metrics.set_pending_differences("a", result.counts(Side::A).chats);
                self.metrics.set_pending_differences("b", result.counts(Side::B).chats);
                info!(
                    left = %a.label(),
                    right = %b.label(),
                    differing_a = result.counts(Side::A).chats,
                    differing_b = result.counts(Side::B).chats,
                    complete = result.complete,
                    "Scan finished"
                );
            },
            Err(err) => {
                self.metrics.record_error(err.kind(), "scan");
                warn!(error = %err, "Scan failed");
            },
        }
        outcome
    }

    fn scan_inner(
        &self,
        a: &dyn ChatStore,
        b: &dyn ChatStore,
        cancel: &CancellationToken,
        on_step: &mut dyn FnMut(ScanStep<'_>),
    ) -> Result<ComparisonResult> {
        let entities = EntityDiffer::diff(a, b)?;
        let total = entities.conversations.len();
        let mut result = ComparisonResult {
            conversations: Vec::with_capacity(total),
            contacts_only_on_a: entities.contacts_only_on_a,
            contacts_only_on_b: entities.contacts_only_on_b,
            groups_only_on_a: entities.groups_only_on_a,
            groups_only_on_b: entities.groups_only_on_b,
            scanned: 0,
            total,
            complete: false,
        };
        on_step(ScanStep::Entities(&result));

        for mut diff in entities.conversations {
            if cancel.is_cancelled() {
                return Ok(result);
            }
            // Matching statistics are taken as equal content
            if diff.classification != Classification::Identical {
                self.differ.diff_conversation(&mut diff, a, b)?;
            }
            result.conversations.push(diff);
            result.scanned += 1;

            if let Some(diff) = result.conversations.last() {
                on_step(ScanStep::Conversation {
                    completed: result.scanned,
                    total,
                    diff,
                    result: &result,
                });
            }
        }

        result.complete = true;
        Ok(result)
    }
}
