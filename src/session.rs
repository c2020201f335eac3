//! Stateful comparison of one database pair.
//!
//! ```text
//! Idle --scan--> Scanning --done/cancel(keep)--> Scanned --merge--> Merging
//!   ^                |                             |  ^                |
//!   +--cancel/fail---+                     scan    |  +-----done-------+
//!                                                  v
//!                                               Scanning
//! ```
//!
//! `swap` is synchronous and only valid in `Scanned`.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::diff::messages::MessageSetDiffer;
use crate::diff::result::{ComparisonResult, ConversationDiff};
use crate::error::{MergeError, Result};
use crate::job::{Job, JobEvent, JobHandle, JobKind, JobOutput, JobRunner};
use crate::merge::{Direction, MergeScope, MergeSummary};
use crate::store::ChatStore;
use crate::validation::InputValidator;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing computed yet
    Idle,
    /// A scan job is running
    Scanning,
    /// A comparison result is available
    Scanned,
    /// A merge job is running
    Merging,
}

/// Comparison and merge of two databases, owned by its caller
pub struct ComparisonSession {
    owner: String,
    a: Arc<dyn ChatStore>,
    b: Arc<dyn ChatStore>,
    config: AppConfig,
    state: SessionState,
    result: Option<ComparisonResult>,
    diff_cache: HashMap<String, ConversationDiff>,
    job: Option<JobHandle>,
    merging: Option<Direction>,
    keep_partial: bool,
    last_summary: Option<MergeSummary>,
}

impl ComparisonSession {
    /// Open a session over `a` and `b`, registering it as a consumer of both
    #[must_use]
    pub fn new(a: Arc<dyn ChatStore>, b: Arc<dyn ChatStore>, config: &AppConfig) -> Self {
        let owner = format!("session-{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed));
        a.register_consumer(&owner);
        b.register_consumer(&owner);
        debug!(%owner, left = %a.label(), right = %b.label(), "Opened comparison session");

        Self {
            owner,
            a,
            b,
            config: config.clone(),
            state: SessionState::Idle,
            result: None,
            diff_cache: HashMap::new(),
            job: None,
            merging: None,
            keep_partial: true,
            last_summary: None,
        }
    }

    /// Consumer name this session registered under
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Database currently on side A
    #[must_use]
    pub fn left(&self) -> &Arc<dyn ChatStore> {
        &self.a
    }

    /// Database currently on side B
    #[must_use]
    pub fn right(&self) -> &Arc<dyn ChatStore> {
        &self.b
    }

    /// Latest comparison result
    #[must_use]
    pub const fn result(&self) -> Option<&ComparisonResult> {
        self.result.as_ref()
    }

    /// Totals of the latest finished merge
    #[must_use]
    pub const fn last_summary(&self) -> Option<&MergeSummary> {
        self.last_summary.as_ref()
    }

    /// Direction of the running merge
    #[must_use]
    pub const fn merging(&self) -> Option<Direction> {
        self.merging
    }

    fn runner(&self) -> JobRunner {
        JobRunner::new(
            Arc::clone(&self.a),
            Arc::clone(&self.b),
            self.config.scan.clone(),
            self.config.merge.clone(),
        )
    }

    fn invalid(&self, operation: &str) -> MergeError {
        MergeError::InvalidState(format!("{operation} is not allowed while {:?}", self.state))
    }

    /// Start a fresh scan, discarding any previous result
    pub fn scan(&mut self) -> Result<()> {
        if !matches!(self.state, SessionState::Idle | SessionState::Scanned) {
            return Err(self.invalid("scan"));
        }

        self.result = None;
        self.diff_cache.clear();
        self.keep_partial = true;
        self.job = Some(self.runner().run(Job::Scan)?);
        self.state = SessionState::Scanning;
        info!(owner = %self.owner, "Scan started");
        Ok(())
    }

    /// Start merging `scope` in `direction`
    pub fn merge(&mut self, direction: Direction, scope: MergeScope) -> Result<()> {
        if self.state != SessionState::Scanned {
            return Err(self.invalid("merge"));
        }
        InputValidator::validate_scope(&scope)?;
        let result = self.result.clone().unwrap_or_default();

        self.job = Some(self.runner().run(Job::Merge {
            result,
            direction,
            scope,
        })?);
        self.merging = Some(direction);
        self.state = SessionState::Merging;
        info!(owner = %self.owner, %direction, "Merge started");
        Ok(())
    }

    /// Exchange sides A and B, transposing the current result without rescanning
    pub fn swap(&mut self) -> Result<&ComparisonResult> {
        if self.state != SessionState::Scanned {
            return Err(self.invalid("swap"));
        }

        mem::swap(&mut self.a, &mut self.b);
        self.result = self.result.take().map(ComparisonResult::transpose);
        self.diff_cache = mem::take(&mut self.diff_cache)
            .into_iter()
            .map(|(identity, diff)| (identity, diff.transpose()))
            .collect();
        debug!(owner = %self.owner, left = %self.a.label(), right = %self.b.label(), "Swapped sides");

        self.result.as_ref().ok_or_else(|| MergeError::InvalidState("no result to swap".to_string()))
    }

    /// Stop the running job and wait for it to wind down.
    ///
    /// A cancelled scan keeps its partial result when `keep_partial` is set,
    /// otherwise the session returns to `Idle`. A merge stops after its
    /// current unit; what it already wrote stays written.
    pub fn cancel(&mut self, keep_partial: bool) -> Result<()> {
        let Some(job) = &self.job else {
            return Err(self.invalid("cancel"));
        };
        job.cancel();
        self.keep_partial = keep_partial;
        self.wait(&mut |_| {})
    }

    /// Deliver every event that is ready to `sink`, applying a terminal event
    /// to the session. Returns true once no job is running.
    pub fn poll(&mut self, sink: &mut dyn FnMut(&JobEvent)) -> Result<bool> {
        loop {
            let Some(job) = &self.job else {
                return Ok(true);
            };
            let Some(event) = job.try_next() else {
                if job.is_finished() && job.events().is_empty() {
                    return self.finish_without_result().map(|()| true);
                }
                return Ok(false);
            };
            sink(&event);
            if event.is_terminal() {
                return self.finish(event).map(|()| true);
            }
        }
    }

    /// Deliver events to `sink` until the running job ends
    pub fn wait(&mut self, sink: &mut dyn FnMut(&JobEvent)) -> Result<()> {
        loop {
            let Some(job) = &self.job else {
                return Ok(());
            };
            let Some(event) = job.next_blocking() else {
                return self.finish_without_result();
            };
            sink(&event);
            if event.is_terminal() {
                return self.finish(event);
            }
        }
    }

    fn finish_without_result(&mut self) -> Result<()> {
        self.finish(JobEvent::Failed(MergeError::Other(
            "job worker stopped without a result".to_string(),
        )))
    }

    fn finish(&mut self, event: JobEvent) -> Result<()> {
        let kind = self.job.take().map(|job| job.kind());
        let direction = self.merging.take();

        match (kind, event) {
            (Some(JobKind::Scan), JobEvent::Completed(JobOutput::Scan(result))) => {
                self.result = Some(result);
                self.state = SessionState::Scanned;
            },
            (Some(JobKind::Scan), JobEvent::Cancelled(JobOutput::Scan(result))) => {
                if self.keep_partial {
                    self.result = Some(result);
                    self.state = SessionState::Scanned;
                } else {
                    self.result = None;
                    self.state = SessionState::Idle;
                }
            },
            (
                Some(JobKind::Merge),
                JobEvent::Completed(JobOutput::Merge(summary)) | JobEvent::Cancelled(JobOutput::Merge(summary)),
            ) => {
                if let (Some(direction), Some(result)) = (direction, self.result.as_mut()) {
                    result.apply_merge(
                        direction.source(),
                        &summary.merged_conversations,
                        &summary.merged_contacts,
                        &summary.merged_groups,
                    );
                    result
                        .conversations
                        .retain(|d| d.has_differences() || !summary.merged_conversations.contains(&d.identity));
                }
                for identity in &summary.merged_conversations {
                    self.diff_cache.remove(identity);
                }
                info!(owner = %self.owner, "{summary}");
                self.last_summary = Some(summary);
                self.state = SessionState::Scanned;
            },
            (Some(JobKind::Merge), JobEvent::Failed(err)) => {
                warn!(owner = %self.owner, error = %err, "Merge failed");
                self.state = SessionState::Scanned;
                return Err(err);
            },
            (_, JobEvent::Failed(err)) => {
                warn!(owner = %self.owner, error = %err, "Scan failed");
                self.result = None;
                self.state = SessionState::Idle;
                return Err(err);
            },
            (kind, event) => {
                warn!(owner = %self.owner, ?kind, ?event, "Unexpected job event");
            },
        }
        Ok(())
    }

    /// Differences of one conversation.
    ///
    /// Served from the scan result when it holds the conversation, otherwise
    /// computed on demand and kept until the next scan or merge.
    pub fn get_conversation_diff(&mut self, identity: &str) -> Result<ConversationDiff> {
        InputValidator::validate_identity(identity)?;
        if let Some(diff) = self.result.as_ref().and_then(|r| r.conversation(identity)) {
            return Ok(diff.clone());
        }
        if let Some(diff) = self.diff_cache.get(identity) {
            return Ok(diff.clone());
        }

        let a = self.a.get_conversation(identity)?;
        let b = self.b.get_conversation(identity)?;
        if a.is_none() && b.is_none() {
            return Err(MergeError::NotFound(format!("conversation {identity}")));
        }
        let mut diff = ConversationDiff::unscanned(identity, a, b);
        MessageSetDiffer::new(&self.config.scan).diff_conversation(&mut diff, self.a.as_ref(), self.b.as_ref())?;
        self.diff_cache.insert(identity.to_string(), diff.clone());
        Ok(diff)
    }
}

impl Drop for ComparisonSession {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel();
        }
        self.a.unregister_consumer(&self.owner);
        self.b.unregister_consumer(&self.owner);
        debug!(owner = %self.owner, "Closed comparison session");
    }
}
