//! Job Monitor
//!
//! Watches a single Kubernetes batch Job and blocks until it reaches a
//! terminal state, then shuts the watch down and exits.
//!
//! The watch itself is a kube-runtime watcher filtered to one job name;
//! this binary wires it to the lifecycle monitor, waits on the one-shot
//! completion signal, and coordinates shutdown.

mod error;
mod monitor;
mod watcher;
#[cfg(test)]
mod watcher_test;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use k8s_openapi::api::batch::v1::Job;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::error::MonitorError;
use crate::monitor::{JobMonitor, JobOutcome, WatchTarget, completion_channel};
use crate::watcher::Subscription;

/// Watch one Kubernetes batch Job until it completes.
#[derive(Parser, Debug)]
#[command(name = "job-monitor")]
#[command(version = "0.1.0")]
#[command(about = "Watches a Kubernetes Job and exits when it completes", long_about = None)]
struct Args {
    /// Name of the Job to watch
    #[arg(short = 'j', long)]
    job: String,

    /// Namespace to watch the Job in
    #[arg(short = 'n', long, default_value = "default")]
    namespace: String,

    /// Path to the kubeconfig file (defaults to ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Resynchronization interval in seconds (periodic full re-list)
    #[arg(long, default_value = "60")]
    resync: u64,

    /// Also end the wait when the Job reports failed pods
    #[arg(long)]
    complete_on_failure: bool,

    /// Give up after this many seconds instead of waiting indefinitely
    #[arg(long)]
    max_wait: Option<u64>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[tokio::main]
async fn main() -> Result<(), MonitorError> {
    let args = Args::parse();

    let log_level = match args.log_level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    if args.resync == 0 {
        return Err(MonitorError::InvalidConfig(
            "--resync must be at least 1 second".to_string(),
        ));
    }

    info!(job = %args.job, namespace = %args.namespace, "Monitor configuration");

    let client = build_client(args.kubeconfig.clone()).await?;
    let api: Api<Job> = Api::namespaced(client, &args.namespace);

    let target = WatchTarget {
        namespace: args.namespace.clone(),
        name: args.job.clone(),
    };

    let (signal, mut completion) = completion_channel();
    let (events_tx, events_rx) = tokio::sync::mpsc::channel(16);
    let consumer = tokio::spawn(
        JobMonitor::new(target.clone(), args.complete_on_failure, signal).run(events_rx),
    );
    let subscription = Subscription::start(
        api,
        target,
        events_tx,
        Duration::from_secs(args.resync),
    );

    info!("Started Watching {} Job", args.job);

    let waited = match args.max_wait {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), completion.recv()).await
        {
            Ok(outcome) => Ok(outcome),
            Err(_) => Err(MonitorError::TimedOut(secs)),
        },
        None => Ok(completion.recv().await),
    };

    // The subscription is stopped only after the completion wait resolves,
    // and always before exit.
    shut_down(subscription, consumer).await?;

    match waited? {
        Some(JobOutcome::Succeeded) => {
            info!("{} Completed", args.job);
            Ok(())
        }
        Some(JobOutcome::Failed) => {
            error!("{} ended in failure", args.job);
            Err(MonitorError::JobFailed(args.job))
        }
        None => Err(MonitorError::Watch(
            "watch ended before the job completed".to_string(),
        )),
    }
}

/// Stops the subscription and waits for both background tasks to finish,
/// surfacing a panic in either one instead of swallowing it.
async fn shut_down(
    subscription: Subscription,
    consumer: tokio::task::JoinHandle<()>,
) -> Result<(), MonitorError> {
    subscription.stop();
    subscription.join().await?;
    consumer
        .await
        .map_err(|e| MonitorError::Watch(format!("monitor task panicked: {e}")))
}

/// Builds a Kubernetes client from the kubeconfig file.
///
/// The path defaults to `$HOME/.kube/config`; without a home directory it
/// must be given explicitly. Any failure here is fatal: there is nothing to
/// watch without cluster access.
async fn build_client(kubeconfig: Option<PathBuf>) -> Result<Client, MonitorError> {
    let path = match kubeconfig {
        Some(path) => path,
        None => {
            let home = std::env::var_os("HOME").ok_or_else(|| {
                MonitorError::InvalidConfig(
                    "--kubeconfig is required when HOME is not set".to_string(),
                )
            })?;
            PathBuf::from(home).join(".kube").join("config")
        }
    };
    let kubeconfig = Kubeconfig::read_from(&path)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(config)?)
}
