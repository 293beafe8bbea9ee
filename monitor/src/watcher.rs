//! Kubernetes watch subscription lifecycle.
//!
//! Bridges the kube-runtime watcher to the monitor's event channel: the
//! subscription runs as a background task, maps raw watch events onto
//! lifecycle events, re-lists on a fixed resync interval, and tears the
//! stream down cooperatively when told to stop.

use crate::error::MonitorError;
use crate::monitor::{JobStatusSnapshot, LifecycleEvent, WatchTarget};
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::batch::v1::Job;
use kube::{Api, ResourceExt};
use kube_runtime::{WatchStreamExt, watcher};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The event stream a subscription consumes.
pub(crate) type WatchStream = BoxStream<'static, Result<watcher::Event<Job>, watcher::Error>>;

/// A running watch subscription and its shutdown handle.
///
/// `start` returns immediately; the subscription keeps delivering events
/// until `stop` is called or the event channel's consumer goes away.
#[derive(Debug)]
pub struct Subscription {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Starts the watch loop in a background task.
    pub fn start(
        api: Api<Job>,
        target: WatchTarget,
        events: mpsc::Sender<LifecycleEvent>,
        resync_interval: Duration,
    ) -> Self {
        // Exact-name filter; the API server does the matching, so an empty
        // or unknown name simply never delivers anything.
        let config = watcher::Config::default().fields(&format!("metadata.name={}", target.name));
        // The raw watcher re-polls immediately after an error; the backoff
        // wrapper is what throttles retries against a failing apiserver.
        let make_stream =
            move || watcher(api.clone(), config.clone()).default_backoff().boxed();
        Self::start_with_stream(make_stream, target, events, resync_interval)
    }

    /// Starts the watch loop over streams produced by `make_stream`; the
    /// factory is invoked again on every resync re-list.
    pub(crate) fn start_with_stream<F>(
        make_stream: F,
        target: WatchTarget,
        events: mpsc::Sender<LifecycleEvent>,
        resync_interval: Duration,
    ) -> Self
    where
        F: FnMut() -> WatchStream + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_subscription(
            make_stream,
            target,
            events,
            resync_interval,
            shutdown_rx,
        ));
        Self { shutdown, task }
    }

    /// Tells the watch loop to stop. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Waits for the watch loop to finish shutting down.
    pub async fn join(self) -> Result<(), MonitorError> {
        self.task
            .await
            .map_err(|e| MonitorError::Watch(format!("watch task panicked: {e}")))
    }
}

async fn run_subscription<F>(
    mut make_stream: F,
    target: WatchTarget,
    events: mpsc::Sender<LifecycleEvent>,
    resync_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    F: FnMut() -> WatchStream + Send + 'static,
{
    let mut stream = make_stream();
    let mut resync = tokio::time::interval(resync_interval);
    resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // An interval's first tick completes immediately; consume it so the
    // first resync happens one full interval after startup.
    resync.tick().await;
    let mut seen = false;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = resync.tick() => {
                debug!("resync: re-listing {} in {}", target.name, target.namespace);
                stream = make_stream();
            }
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    if let Some(event) = map_event(event, &mut seen) {
                        if events.send(event).await.is_err() {
                            // Consumer is gone; nothing left to deliver to.
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    // Surfaced after the stream's backoff delay; transient,
                    // keep the loop.
                    warn!("watch error for {} in {}: {e}", target.name, target.namespace);
                }
                None => {
                    // Watcher streams do not normally end; re-list if one does.
                    stream = make_stream();
                }
            }
        }
    }
    debug!("watch loop for {} stopped", target.name);
}

/// Maps one raw watcher event to at most one lifecycle event.
///
/// `InitApply` always maps to Added: the initial list and every resync
/// re-list redeliver current state, so a job that was already Updated can
/// legitimately arrive as Added again. A live `Apply` is Added on first
/// sight and Updated after; `Delete` maps to Removed and resets first-sight
/// tracking. `Init`/`InitDone` are stream punctuation and deliver nothing.
pub(crate) fn map_event(event: watcher::Event<Job>, seen: &mut bool) -> Option<LifecycleEvent> {
    match event {
        watcher::Event::InitApply(job) => {
            *seen = true;
            Some(LifecycleEvent::Added {
                name: job.name_any(),
                status: JobStatusSnapshot::from_job(&job),
            })
        }
        watcher::Event::Apply(job) => {
            let name = job.name_any();
            let status = JobStatusSnapshot::from_job(&job);
            if *seen {
                Some(LifecycleEvent::Updated { name, status })
            } else {
                *seen = true;
                Some(LifecycleEvent::Added { name, status })
            }
        }
        watcher::Event::Delete(job) => {
            *seen = false;
            Some(LifecycleEvent::Removed { name: job.name_any() })
        }
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}
