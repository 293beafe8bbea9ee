//! Job lifecycle monitoring.
//!
//! This is the core of the tool: classify change notifications for one
//! watched Job, log each transition, decide when the job has reached a
//! terminal outcome, and signal completion exactly once.
//!
//! The monitor owns no shared mutable state. Events arrive over a channel
//! and are consumed by a single task; the only thing the rest of the
//! process sees is the one-shot completion signal.

use k8s_openapi::api::batch::v1::Job;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Identity of the watched resource. The kind is fixed: batch/v1 Job.
///
/// Built once from CLI arguments and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    /// Namespace the job lives in
    pub namespace: String,
    /// Name of the job
    pub name: String,
}

/// The slice of a Job's reported status this monitor classifies.
///
/// Produced fresh on every event and discarded after classification;
/// absent status fields read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStatusSnapshot {
    /// Number of actively running pods
    pub active: i32,
    /// Number of pods that reached the Succeeded phase
    pub succeeded: i32,
    /// Number of pods that reached the Failed phase
    pub failed: i32,
}

impl JobStatusSnapshot {
    /// Extracts the counts from a Job, treating a missing status block or
    /// missing fields as zero.
    pub fn from_job(job: &Job) -> Self {
        let status = job.status.as_ref();
        Self {
            active: status.and_then(|s| s.active).unwrap_or(0),
            succeeded: status.and_then(|s| s.succeeded).unwrap_or(0),
            failed: status.and_then(|s| s.failed).unwrap_or(0),
        }
    }
}

/// One change notification for the watched job.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// The job appeared, either live or via a (re)list
    Added {
        /// Job name as reported by the API server
        name: String,
        /// Status counts at delivery time
        status: JobStatusSnapshot,
    },
    /// The job changed
    Updated {
        /// Job name as reported by the API server
        name: String,
        /// Status counts at delivery time
        status: JobStatusSnapshot,
    },
    /// The job was deleted
    Removed {
        /// Job name as reported by the API server
        name: String,
    },
}

/// What ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job reported at least one succeeded pod
    Succeeded,
    /// The job reported at least one failed pod and completion-on-failure
    /// is enabled
    Failed,
}

/// The monitor's wait has exactly two states; `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// No terminal condition observed yet
    Waiting,
    /// A terminal condition was observed and signaled
    Done,
}

/// Advances the wait state for one snapshot.
///
/// Pure so that redelivered snapshots are idempotent by construction: only
/// the `Waiting` -> `Done` edge yields an outcome, and in `Done` every
/// snapshot maps to no effect. A snapshot reporting both succeeded and
/// failed counts resolves to `Succeeded`.
pub fn advance(
    state: WaitState,
    status: &JobStatusSnapshot,
    complete_on_failure: bool,
) -> (WaitState, Option<JobOutcome>) {
    if state == WaitState::Done {
        return (WaitState::Done, None);
    }
    if status.succeeded > 0 {
        (WaitState::Done, Some(JobOutcome::Succeeded))
    } else if complete_on_failure && status.failed > 0 {
        (WaitState::Done, Some(JobOutcome::Failed))
    } else {
        (WaitState::Waiting, None)
    }
}

/// Write side of the one-shot completion signal.
///
/// Backed by a capacity-1 channel written with `try_send`: the first write
/// lands, later writes find the slot full (or the reader gone) and are
/// dropped, so duplicate success observations can never block the event
/// loop.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: mpsc::Sender<JobOutcome>,
}

impl CompletionSignal {
    /// Records the outcome. At most one write lands per watch session.
    pub fn notify(&self, outcome: JobOutcome) {
        let _ = self.tx.try_send(outcome);
    }
}

/// Creates the completion signal and its single reader.
pub fn completion_channel() -> (CompletionSignal, mpsc::Receiver<JobOutcome>) {
    let (tx, rx) = mpsc::channel(1);
    (CompletionSignal { tx }, rx)
}

/// Classifies lifecycle events for one watched job and decides completion.
#[derive(Debug)]
pub struct JobMonitor {
    target: WatchTarget,
    state: WaitState,
    complete_on_failure: bool,
    completion: CompletionSignal,
}

impl JobMonitor {
    /// Creates a monitor in the `Waiting` state.
    pub fn new(target: WatchTarget, complete_on_failure: bool, completion: CompletionSignal) -> Self {
        Self {
            target,
            state: WaitState::Waiting,
            complete_on_failure,
            completion,
        }
    }

    /// Wait state after the events handled so far.
    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Handles one event: log the transition kind, classify the snapshot,
    /// and signal completion on the `Waiting` -> `Done` edge.
    ///
    /// Name filtering belongs to the subscription; a stray event for some
    /// other name is logged and classified like any other and must never
    /// break the loop.
    pub fn handle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Added { name, status } => {
                info!("Job Added: {name}");
                self.classify(&name, &status);
            }
            LifecycleEvent::Updated { name, status } => {
                info!("Job Updated: {name}");
                self.classify(&name, &status);
            }
            LifecycleEvent::Removed { name } => {
                info!("Job Deleted: {name}");
            }
        }
    }

    /// Consumes lifecycle events until the subscription closes the channel.
    pub async fn run(mut self, mut events: mpsc::Receiver<LifecycleEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("event channel closed, monitor for {} stopping", self.target.name);
    }

    fn classify(&mut self, name: &str, status: &JobStatusSnapshot) {
        if name != self.target.name {
            debug!("event for {name} outside watch target {}", self.target.name);
        }
        // The three checks are independent; a transitioning job can report
        // nonzero active and succeeded in the same snapshot.
        if status.active > 0 {
            info!("{name} Active");
        }
        if status.succeeded > 0 {
            info!("{name} Succeeded");
        }
        if status.failed > 0 {
            info!("{name} Failed");
        }
        let (state, outcome) = advance(self.state, status, self.complete_on_failure);
        self.state = state;
        if let Some(outcome) = outcome {
            self.completion.notify(outcome);
        }
    }
}
