//! Event Bus (component E): typed publish/subscribe with disposable
//! subscriptions and asynchronous fan-out.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::event::{Event, EventKind};

type Handler = Arc<dyn Fn(Event) + Send + Sync + 'static>;

struct Entry {
    disposed: Arc<AtomicBool>,
    handler: Handler,
}

/// A disposable capability returned by `subscribe`/`subscribe_all`.
///
/// `dispose()` is idempotent; after it returns, the handler is never invoked
/// again for events published afterward.
#[derive(Clone)]
pub struct Subscription {
    disposed: Arc<AtomicBool>,
}

impl Subscription {
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Delivery mode. Async fans events out onto the tokio worker pool (the
/// default); Sync dispatches inline, in publish order, for deterministic
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Async,
    Sync,
}

/// Typed publish/subscribe bus. Publishing a concrete event also notifies
/// subscribers registered via [`EventBus::subscribe_all`] ("union-root" kind).
pub struct EventBus {
    by_kind: Mutex<HashMap<EventKind, Vec<Entry>>>,
    any: Mutex<Vec<Entry>>,
    mode: DeliveryMode,
    closed: Arc<AtomicBool>,
    inflight: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(mode: DeliveryMode) -> Self {
        Self {
            by_kind: Mutex::new(HashMap::new()),
            any: Mutex::new(Vec::new()),
            mode,
            closed: Arc::new(AtomicBool::new(false)),
            inflight: AsyncMutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let disposed = Arc::new(AtomicBool::new(false));
        let entry = Entry {
            disposed: disposed.clone(),
            handler: Arc::new(handler),
        };
        // Copy-on-write: lock only to push/replace the per-kind vec.
        self.by_kind.lock().unwrap().entry(kind).or_default().push(entry);
        Subscription { disposed }
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let disposed = Arc::new(AtomicBool::new(false));
        let entry = Entry {
            disposed: disposed.clone(),
            handler: Arc::new(handler),
        };
        self.any.lock().unwrap().push(entry);
        Subscription { disposed }
    }

    /// Publish an event. No-ops (after logging) once `close()` has returned.
    pub async fn publish(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(kind = ?event.kind(), "dropping publish after bus close");
            return;
        }

        let kind = event.kind();
        let targets: Vec<Handler> = {
            let by_kind = self.by_kind.lock().unwrap();
            let any = self.any.lock().unwrap();
            by_kind
                .get(&kind)
                .into_iter()
                .flatten()
                .chain(any.iter())
                .filter(|e| !e.disposed.load(Ordering::SeqCst))
                .map(|e| e.handler.clone())
                .collect()
        };

        match self.mode {
            DeliveryMode::Sync => {
                for handler in targets {
                    invoke_logged(&handler, event.clone());
                }
            }
            DeliveryMode::Async => {
                let mut inflight = self.inflight.lock().await;
                inflight.retain(|h| !h.is_finished());
                for handler in targets {
                    let ev = event.clone();
                    inflight.push(tokio::spawn(async move {
                        invoke_logged(&handler, ev);
                    }));
                }
            }
        }
    }

    /// Stop accepting new publishes and wait briefly for in-flight async
    /// handler invocations to finish.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = {
            let mut inflight = self.inflight.lock().await;
            std::mem::take(&mut *inflight)
        };
        let grace = tokio::time::sleep(std::time::Duration::from_secs(5));
        tokio::pin!(grace);
        let join_all = futures_util::future::join_all(handles);
        tokio::select! {
            _ = join_all => {},
            _ = &mut grace => {
                tracing::warn!("event bus close() grace period elapsed with handlers still running");
            }
        }
    }
}

fn invoke_logged(handler: &Handler, event: Event) {
    let handler = handler.clone();
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
    if let Err(panic) = result {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        tracing::warn!(%msg, "event handler panicked; swallowed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn sync_delivery_is_in_publish_order() {
        let bus = EventBus::new(DeliveryMode::Sync);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe(EventKind::Connected, move |_| {
            seen2.lock().unwrap().push(1);
        });
        bus.publish(Event::Connected { timestamp: 1 }).await;
        bus.publish(Event::Connected { timestamp: 2 }).await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_stops_delivery() {
        let bus = EventBus::new(DeliveryMode::Sync);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let sub = bus.subscribe(EventKind::Connected, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Event::Connected { timestamp: 1 }).await;
        sub.dispose();
        sub.dispose(); // idempotent
        bus.publish(Event::Connected { timestamp: 2 }).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribe_all_sees_concrete_events() {
        let bus = EventBus::new(DeliveryMode::Sync);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe_all(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Event::Connected { timestamp: 1 }).await;
        bus.publish(Event::Error {
            code: "X".into(),
            message: "y".into(),
            timestamp: 2,
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handler_panic_does_not_affect_siblings() {
        let bus = EventBus::new(DeliveryMode::Sync);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(EventKind::Connected, |_| panic!("boom"));
        bus.subscribe(EventKind::Connected, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Event::Connected { timestamp: 1 }).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_then_publish_is_dropped() {
        let bus = EventBus::new(DeliveryMode::Sync);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(EventKind::Connected, move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.close().await;
        bus.publish(Event::Connected { timestamp: 1 }).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
