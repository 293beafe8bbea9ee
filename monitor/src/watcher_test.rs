//! Unit tests for watch event mapping and subscription lifecycle

#[cfg(test)]
mod tests {
    use crate::error::MonitorError;
    use crate::monitor::{LifecycleEvent, WatchTarget};
    use crate::watcher::{Subscription, WatchStream, map_event};
    use futures::StreamExt;
    use futures::stream;
    use k8s_openapi::api::batch::v1::{Job, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_runtime::watcher::{Error, Event};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn job(name: &str, succeeded: i32) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            status: Some(JobStatus {
                succeeded: Some(succeeded),
                ..JobStatus::default()
            }),
            ..Job::default()
        }
    }

    fn target() -> WatchTarget {
        WatchTarget {
            namespace: "ci".to_string(),
            name: "build-42".to_string(),
        }
    }

    /// A stream that never yields; stands in for a quiet watch.
    fn pending_factory() -> impl FnMut() -> WatchStream + Send + 'static {
        || stream::pending::<Result<Event<Job>, Error>>().boxed()
    }

    /// Yields the given events once, then stays quiet; later factory calls
    /// (resync re-lists) get an empty quiet stream.
    fn one_shot_factory(events: Vec<Event<Job>>) -> impl FnMut() -> WatchStream + Send + 'static {
        let mut first = Some(events);
        move || match first.take() {
            Some(events) => stream::iter(events.into_iter().map(Ok::<_, Error>))
                .chain(stream::pending())
                .boxed(),
            None => stream::pending().boxed(),
        }
    }

    #[test]
    fn test_first_apply_is_added_then_updated() {
        let mut seen = false;

        let first = map_event(Event::Apply(job("build-42", 0)), &mut seen);
        assert!(matches!(first, Some(LifecycleEvent::Added { name, .. }) if name == "build-42"));

        let second = map_event(Event::Apply(job("build-42", 1)), &mut seen);
        assert!(matches!(second, Some(LifecycleEvent::Updated { name, status })
            if name == "build-42" && status.succeeded == 1));
    }

    #[test]
    fn test_init_apply_is_always_added() {
        // A re-list redelivers current state as InitApply; that must come
        // through as Added even for a job already seen and updated.
        let mut seen = false;

        let _ = map_event(Event::Apply(job("build-42", 0)), &mut seen);
        let _ = map_event(Event::Apply(job("build-42", 0)), &mut seen);

        let redelivered = map_event(Event::InitApply(job("build-42", 1)), &mut seen);
        assert!(matches!(redelivered, Some(LifecycleEvent::Added { name, status })
            if name == "build-42" && status.succeeded == 1));
    }

    #[test]
    fn test_delete_is_removed_and_resets_tracking() {
        let mut seen = false;

        let _ = map_event(Event::Apply(job("build-42", 0)), &mut seen);
        let removed = map_event(Event::Delete(job("build-42", 0)), &mut seen);
        assert!(matches!(removed, Some(LifecycleEvent::Removed { name }) if name == "build-42"));

        // A recreated job starts over as Added.
        let recreated = map_event(Event::Apply(job("build-42", 0)), &mut seen);
        assert!(matches!(recreated, Some(LifecycleEvent::Added { .. })));
    }

    #[test]
    fn test_stream_punctuation_delivers_nothing() {
        let mut seen = true;
        assert!(map_event(Event::Init, &mut seen).is_none());
        assert!(map_event(Event::InitDone, &mut seen).is_none());
        assert!(seen, "punctuation does not touch first-sight tracking");
    }

    #[tokio::test]
    async fn test_events_reach_the_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let subscription = Subscription::start_with_stream(
            one_shot_factory(vec![Event::InitApply(job("build-42", 1))]),
            target(),
            tx,
            Duration::from_secs(60),
        );

        let received = timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(received, Ok(Some(LifecycleEvent::Added { name, status }))
            if name == "build-42" && status.succeeded == 1));

        subscription.stop();
        let joined = timeout(Duration::from_secs(1), subscription.join()).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_stop_ends_subscription_promptly() {
        // Keep the consumer side alive so only stop() can end the loop.
        let (tx, _rx) = mpsc::channel(4);
        let subscription = Subscription::start_with_stream(
            pending_factory(),
            target(),
            tx,
            Duration::from_secs(60),
        );

        subscription.stop();
        subscription.stop(); // repeated stop is a no-op

        let joined = timeout(Duration::from_secs(1), subscription.join()).await;
        assert!(matches!(joined, Ok(Ok(()))), "loop must end promptly after stop");
    }

    #[tokio::test]
    async fn test_departed_consumer_ends_subscription() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let subscription = Subscription::start_with_stream(
            one_shot_factory(vec![Event::Apply(job("build-42", 0))]),
            target(),
            tx,
            Duration::from_secs(60),
        );

        // Delivering to a departed consumer ends the loop without stop().
        let joined = timeout(Duration::from_secs(1), subscription.join()).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_consumer_panic_surfaces_at_shutdown() {
        let (tx, _rx) = mpsc::channel(4);
        let subscription = Subscription::start_with_stream(
            pending_factory(),
            target(),
            tx,
            Duration::from_secs(60),
        );
        let consumer = tokio::spawn(async { panic!("monitor blew up") });

        let result = crate::shut_down(subscription, consumer).await;
        assert!(matches!(result, Err(MonitorError::Watch(_))));
    }
}
