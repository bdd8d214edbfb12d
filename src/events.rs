/// Observer notifications
///
/// Interested parties subscribe to a monitor and are told when the published
/// state or snapshot changed and when the rolling latency average moved.
/// Notifications carry no payload; observers re-read the monitor accessors.
/// An observer that panics is logged and skipped, never propagated.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;

/// Callbacks fired by a node monitor after it publishes an update
pub trait NodeObserver: Send + Sync {
    /// The (state, snapshot) pair changed
    fn server_changed(&self);

    /// The rolling round-trip average changed
    fn latency_changed(&self, average: Duration);
}

/// Subscriber set shared by one monitor
pub(crate) struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn NodeObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn NodeObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub fn notify_server_changed(&self) {
        for observer in self.current() {
            if catch_unwind(AssertUnwindSafe(|| observer.server_changed())).is_err() {
                warn!("observer panicked during server-changed notification");
            }
        }
    }

    pub fn notify_latency_changed(&self, average: Duration) {
        for observer in self.current() {
            if catch_unwind(AssertUnwindSafe(|| observer.latency_changed(average))).is_err() {
                warn!("observer panicked during latency-changed notification");
            }
        }
    }

    // Snapshot the subscriber list so observer code never runs under the lock
    fn current(&self) -> Vec<Arc<dyn NodeObserver>> {
        match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingObserver {
        server_changes: AtomicUsize,
        latencies: Mutex<Vec<Duration>>,
    }

    impl NodeObserver for CountingObserver {
        fn server_changed(&self) {
            self.server_changes.fetch_add(1, Ordering::SeqCst);
        }

        fn latency_changed(&self, average: Duration) {
            self.latencies.lock().unwrap().push(average);
        }
    }

    struct PanickingObserver;

    impl NodeObserver for PanickingObserver {
        fn server_changed(&self) {
            panic!("observer failure");
        }

        fn latency_changed(&self, _average: Duration) {
            panic!("observer failure");
        }
    }

    #[test]
    fn test_server_changed_reaches_all_observers() {
        let registry = ObserverRegistry::new();
        let first = Arc::new(CountingObserver::default());
        let second = Arc::new(CountingObserver::default());
        registry.subscribe(first.clone());
        registry.subscribe(second.clone());

        registry.notify_server_changed();
        registry.notify_server_changed();

        assert_eq!(first.server_changes.load(Ordering::SeqCst), 2);
        assert_eq!(second.server_changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_latency_changed_carries_average() {
        let registry = ObserverRegistry::new();
        let observer = Arc::new(CountingObserver::default());
        registry.subscribe(observer.clone());

        registry.notify_latency_changed(Duration::from_millis(12));

        assert_eq!(
            observer.latencies.lock().unwrap().as_slice(),
            &[Duration::from_millis(12)]
        );
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let registry = ObserverRegistry::new();
        let counting = Arc::new(CountingObserver::default());
        registry.subscribe(Arc::new(PanickingObserver));
        registry.subscribe(counting.clone());

        registry.notify_server_changed();
        registry.notify_latency_changed(Duration::from_millis(7));

        assert_eq!(counting.server_changes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.latencies.lock().unwrap().len(), 1);
    }
}
