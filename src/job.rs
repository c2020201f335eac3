//! Background scan and merge jobs.
//!
//! A job runs on its own worker thread and reports back over a channel. The
//! worker is the only sender, so events of one job arrive in the order they
//! were produced. Cancellation is cooperative and checked between units of
//! work (one conversation, or one contact batch).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{MergeConfig, ScanConfig};
use crate::diff::result::{ComparisonResult, ConversationDiff, DiffCounts, Side};
use crate::diff::scanner::{DiffScanner, ScanStep};
use crate::error::{MergeError, Result};
use crate::merge::{Direction, MergeExecutor, MergeScope, MergeStep, MergeSummary};
use crate::models::{Contact, ContactGroup};
use crate::store::ChatStore;

/// Cooperative cancellation flag shared between a job and its owner
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token (not cancelled)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Completion of a job as a percentage, `ceil(100 * completed / total)`.
/// An empty job counts as complete.
#[must_use]
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let value = (100 * completed.min(total)).div_ceil(total);
    u8::try_from(value).unwrap_or(100)
}

/// Running progress of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// 0 to 100
    pub percent: u8,
    /// Units of work done
    pub completed: usize,
    /// Units of work in the job
    pub total: usize,
    /// For scans, what A has over B. For merges out of A, what was written to B
    pub a: DiffCounts,
    /// For scans, what B has over A. For merges out of B, what was written to A
    pub b: DiffCounts,
}

impl Progress {
    fn new(completed: usize, total: usize, a: DiffCounts, b: DiffCounts) -> Self {
        Self {
            percent: percent(completed, total),
            completed,
            total,
            a,
            b,
        }
    }
}

/// Structured piece of a result, delivered while the job runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Fragment {
    /// Contacts and contact groups found on one side only
    Entities {
        /// Contacts only in A
        contacts_only_on_a: Vec<Contact>,
        /// Contacts only in B
        contacts_only_on_b: Vec<Contact>,
        /// Groups only in A
        groups_only_on_a: Vec<ContactGroup>,
        /// Groups only in B
        groups_only_on_b: Vec<ContactGroup>,
    },
    /// A conversation with differences
    Conversation(ConversationDiff),
    /// A merge unit that was written
    Merged {
        /// Conversation identity, or "contacts" for the contact batch
        unit: String,
    },
}

/// What a job produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobOutput {
    /// Scan result, partial when cancelled
    Scan(ComparisonResult),
    /// Merge totals
    Merge(MergeSummary),
}

/// Event streamed from a running job
#[derive(Debug)]
pub enum JobEvent {
    /// Units of work completed
    Progress(Progress),
    /// Partial result
    Partial(Fragment),
    /// Finished normally
    Completed(JobOutput),
    /// Aborted by an access-class error
    Failed(MergeError),
    /// Stopped on request, carrying what was done so far
    Cancelled(JobOutput),
}

impl JobEvent {
    /// Whether no further events follow this one
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Cancelled(_))
    }
}

/// Kind of background job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Comparison of both databases
    Scan,
    /// Copy of differences in one direction
    Merge,
}

/// Work to run in the background
#[derive(Debug, Clone)]
pub enum Job {
    /// Compare the two databases
    Scan,
    /// Copy what `result` lists from the source side of `direction`
    Merge {
        /// Scan result to merge from
        result: ComparisonResult,
        /// Source and target
        direction: Direction,
        /// What to merge
        scope: MergeScope,
    },
}

impl Job {
    /// Kind of this job
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Scan => JobKind::Scan,
            Self::Merge { .. } => JobKind::Merge,
        }
    }
}

/// Owner's side of a running job
pub struct JobHandle {
    kind: JobKind,
    cancel: CancellationToken,
    events: Receiver<JobEvent>,
    worker: Option<JoinHandle<()>>,
}

impl JobHandle {
    /// Kind of the running job
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.kind
    }

    /// Ask the job to stop at the next unit boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raw event stream
    #[must_use]
    pub const fn events(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    /// Next event if one is ready
    #[must_use]
    pub fn try_next(&self) -> Option<JobEvent> {
        self.events.try_recv().ok()
    }

    /// Next event, waiting up to `timeout`
    #[must_use]
    pub fn next_timeout(&self, timeout: Duration) -> Option<JobEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next event, blocking. `None` once the worker is gone.
    #[must_use]
    pub fn next_blocking(&self) -> Option<JobEvent> {
        self.events.recv().ok()
    }

    /// Whether the worker thread has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the job ends, discarding progress, and return its output
    pub fn wait(mut self) -> Result<JobOutput> {
        let outcome = loop {
            match self.events.recv() {
                Ok(JobEvent::Completed(output) | JobEvent::Cancelled(output)) => break Ok(output),
                Ok(JobEvent::Failed(err)) => break Err(err),
                Ok(_) => {},
                Err(_) => break Err(MergeError::Other("job worker stopped without a result".to_string())),
            }
        };
        self.join();
        outcome
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(kind = ?self.kind, "Job worker panicked");
            }
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.join();
    }
}

/// Starts scan and merge jobs over one pair of stores
pub struct JobRunner {
    a: Arc<dyn ChatStore>,
    b: Arc<dyn ChatStore>,
    scan: ScanConfig,
    merge: MergeConfig,
}

impl JobRunner {
    /// Runner for the stores `a` and `b`
    #[must_use]
    pub fn new(a: Arc<dyn ChatStore>, b: Arc<dyn ChatStore>, scan: ScanConfig, merge: MergeConfig) -> Self {
        Self { a, b, scan, merge }
    }

    /// Start `job` on a worker thread and return immediately
    pub fn run(&self, job: Job) -> Result<JobHandle> {
        let (tx, rx) = unbounded();
        let cancel = CancellationToken::new();
        let kind = job.kind();

        let worker = JobWorker {
            a: Arc::clone(&self.a),
            b: Arc::clone(&self.b),
            scan: self.scan.clone(),
            merge: self.merge.clone(),
            cancel: cancel.clone(),
            tx,
        };
        let name = match kind {
            JobKind::Scan => "history-merge-scan",
            JobKind::Merge => "history-merge-merge",
        };
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.run(job))?;

        debug!(?kind, "Started job");
        Ok(JobHandle {
            kind,
            cancel,
            events: rx,
            worker: Some(handle),
        })
    }
}

struct JobWorker {
    a: Arc<dyn ChatStore>,
    b: Arc<dyn ChatStore>,
    scan: ScanConfig,
    merge: MergeConfig,
    cancel: CancellationToken,
    tx: Sender<JobEvent>,
}

impl JobWorker {
    fn emit(&self, event: JobEvent) {
        // The owner may have dropped its receiver; the job still runs to its end
        let _ = self.tx.send(event);
    }

    fn run(self, job: Job) {
        let terminal = match job {
            Job::Scan => self.run_scan(),
            Job::Merge {
                result,
                direction,
                scope,
            } => self.run_merge(&result, direction, &scope),
        };
        self.emit(terminal);
    }

    fn run_scan(&self) -> JobEvent {
        let scanner = DiffScanner::new(&self.scan);
        let outcome = scanner.scan(self.a.as_ref(), self.b.as_ref(), &self.cancel, &mut |step: ScanStep<'_>| match step {
            ScanStep::Entities(result) => {
                self.emit(JobEvent::Partial(Fragment::Entities {
                    contacts_only_on_a: result.contacts_only_on_a.clone(),
                    contacts_only_on_b: result.contacts_only_on_b.clone(),
                    groups_only_on_a: result.groups_only_on_a.clone(),
                    groups_only_on_b: result.groups_only_on_b.clone(),
                }));
                self.emit(JobEvent::Progress(Progress::new(
                    0,
                    result.total,
                    result.counts(Side::A),
                    result.counts(Side::B),
                )));
            },
            ScanStep::Conversation {
                completed,
                total,
                diff,
                result,
            } => {
                if diff.has_differences() {
                    self.emit(JobEvent::Partial(Fragment::Conversation(diff.clone())));
                }
                self.emit(JobEvent::Progress(Progress::new(
                    completed,
                    total,
                    result.counts(Side::A),
                    result.counts(Side::B),
                )));
            },
        });

        match outcome {
            Ok(result) if result.complete => JobEvent::Completed(JobOutput::Scan(result)),
            Ok(result) => {
                info!(scanned = result.scanned, total = result.total, "Scan cancelled");
                JobEvent::Cancelled(JobOutput::Scan(result))
            },
            Err(err) => JobEvent::Failed(err),
        }
    }

    fn run_merge(&self, result: &ComparisonResult, direction: Direction, scope: &MergeScope) -> JobEvent {
        let executor = MergeExecutor::new(self.a.as_ref(), self.b.as_ref(), &self.merge, &self.scan)
            .with_cancellation(self.cancel.clone());
        let target = direction.target();

        let outcome = executor.merge_scope(result, direction, scope, &mut |step: MergeStep<'_>| {
            if step.written {
                self.emit(JobEvent::Partial(Fragment::Merged {
                    unit: step.unit.to_string(),
                }));
            }
            let counts = step.summary.counts();
            let (a, b) = match target {
                Side::B => (counts, DiffCounts::default()),
                Side::A => (DiffCounts::default(), counts),
            };
            self.emit(JobEvent::Progress(Progress::new(step.completed, step.total, a, b)));
        });

        match outcome {
            Ok(summary) if summary.cancelled => JobEvent::Cancelled(JobOutput::Merge(summary)),
            Ok(summary) => JobEvent::Completed(JobOutput::Merge(summary)),
            Err(err) => JobEvent::Failed(err),
        }
    }
}
