//! Fan-out of decoded sentences to subscribers
//!
//! Each subscription owns a bounded channel. [`Dispatcher::dispatch`] walks
//! the subscriptions in registration order and hands every matching one a
//! clone of the record with a non-blocking send, so a subscriber that stops
//! reading loses records instead of stalling the connection. Subscriptions
//! whose receiving side is gone are pruned on the next dispatch.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    Result,
    error::GpsdError,
    protocol::v3::{SentenceKinds, SentenceRecord},
};

/// Identifies one subscription within its dispatcher
pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    kinds: SentenceKinds,
    tx: mpsc::Sender<SentenceRecord>,
}

/// Thread running a callback subscription
struct Listener {
    id: SubscriptionId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    next_id: SubscriptionId,
    subscribers: Vec<Subscriber>,
    listeners: Vec<Listener>,
    closed: bool,
}

type Shared = Arc<Mutex<Registry>>;

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // a panic while holding the lock leaves the list itself consistent
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Delivers records to the registered subscriptions
///
/// Cloning yields another handle to the same subscription list.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Shared,
    capacity: usize,
}

impl Dispatcher {
    /// Creates a dispatcher whose subscriptions buffer up to `capacity` records
    pub fn new(capacity: usize) -> Self {
        Dispatcher {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Registers a channel subscription for the given kinds
    ///
    /// Fails with [`GpsdError::Shutdown`] once the dispatcher is closed.
    pub fn subscribe(&self, kinds: impl Into<SentenceKinds>) -> Result<Subscription> {
        let kinds = kinds.into();
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut registry = lock(&self.registry);
        if registry.closed {
            return Err(GpsdError::Shutdown);
        }
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.push(Subscriber { id, kinds, tx });
        drop(registry);

        tracing::debug!(subscription = id, kinds = ?kinds, "subscribed");
        Ok(Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Registers a callback invoked for every matching record
    ///
    /// The callback runs on a dedicated blocking thread, so a slow or stuck
    /// callback only fills its own channel. An `Err` return or a panic is
    /// logged and the callback keeps receiving subsequent records. Once the
    /// subscription is removed or the dispatcher closed, records still queued
    /// for it are discarded instead of delivered.
    ///
    /// Fails with [`GpsdError::NoRuntime`] outside a tokio runtime.
    pub fn subscribe_fn<F, E>(
        &self,
        kinds: impl Into<SentenceKinds>,
        mut callback: F,
    ) -> Result<SubscriptionId>
    where
        F: FnMut(SentenceRecord) -> core::result::Result<(), E> + Send + 'static,
        E: std::fmt::Display + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| GpsdError::NoRuntime)?;
        let mut subscription = self.subscribe(kinds)?;
        // the registry entry is removed by unsubscribe, not by this handle
        let id = subscription.id;
        subscription.registry = Weak::new();

        let cancel = CancellationToken::new();
        let stopped = cancel.clone();
        let handle = runtime.spawn_blocking(move || {
            while let Some(record) = subscription.blocking_recv() {
                if stopped.is_cancelled() {
                    break;
                }
                let kind = record.kind();
                match catch_unwind(AssertUnwindSafe(|| callback(record))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(subscription = id, kind = %kind, error = %e, "listener failed");
                    }
                    Err(_) => {
                        tracing::error!(subscription = id, kind = %kind, "listener panicked");
                    }
                }
            }
            tracing::debug!(subscription = id, "listener finished");
        });

        let mut registry = lock(&self.registry);
        if registry.closed {
            // closed between subscribe and here; the sender is already gone
            cancel.cancel();
        }
        registry.listeners.retain(|listener| !listener.handle.is_finished());
        registry.listeners.push(Listener { id, cancel, handle });
        Ok(id)
    }

    /// Removes a subscription
    ///
    /// Takes effect before the next dispatched record. Returns `false` if the
    /// id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = remove(&self.registry, id);
        if removed {
            tracing::debug!(subscription = id, "unsubscribed");
        }
        removed
    }

    /// Delivers `record` to every matching subscription
    ///
    /// Returns the number of subscriptions that accepted the record.
    pub fn dispatch(&self, record: &SentenceRecord) -> usize {
        let kind = record.kind();
        let mut registry = lock(&self.registry);
        if registry.closed {
            return 0;
        }

        let mut delivered = 0;
        registry.subscribers.retain(|sub| {
            if !sub.kinds.matches(kind) {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(record.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscription = sub.id, kind = %kind, "subscriber lagging, record dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(subscription = sub.id, "subscriber gone, pruning");
                    false
                }
            }
        });
        delivered
    }

    /// Drops every subscription and refuses new ones
    ///
    /// Channel receivers still drain what was already queued and then end.
    /// Callback subscriptions stop before their next record; one that is
    /// running right now finishes, see [`Dispatcher::shutdown`].
    pub fn close(&self) {
        let mut registry = lock(&self.registry);
        registry.closed = true;
        registry.subscribers.clear();
        for listener in &registry.listeners {
            listener.cancel.cancel();
        }
    }

    /// Closes the dispatcher and waits for running callbacks to return
    ///
    /// After this resolves no callback is invoked again.
    pub async fn shutdown(&self) {
        self.close();
        let listeners = std::mem::take(&mut lock(&self.registry).listeners);
        for listener in listeners {
            if let Err(e) = listener.handle.await {
                tracing::error!(subscription = listener.id, error = %e, "listener thread failed");
            }
        }
    }

    /// Whether [`Dispatcher::close`] has been called
    pub fn is_closed(&self) -> bool {
        lock(&self.registry).closed
    }

    /// Number of registered subscriptions
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("Dispatcher")
            .field("subscribers", &registry.subscribers.len())
            .field("closed", &registry.closed)
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn remove(registry: &Mutex<Registry>, id: SubscriptionId) -> bool {
    let mut registry = lock(registry);
    let before = registry.subscribers.len();
    registry.subscribers.retain(|sub| sub.id != id);
    registry.listeners.retain(|listener| {
        if listener.id == id {
            listener.cancel.cancel();
            return false;
        }
        true
    });
    registry.subscribers.len() != before
}

/// Receiving side of a subscription
///
/// Dropping it unsubscribes. Yields `None` once unsubscribed or once the
/// dispatcher is closed and the queue is drained.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<SentenceRecord>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Identifier usable with [`Dispatcher::unsubscribe`]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next record
    pub async fn recv(&mut self) -> Option<SentenceRecord> {
        self.rx.recv().await
    }

    /// Takes the next record if one is queued
    pub fn try_recv(&mut self) -> Option<SentenceRecord> {
        self.rx.try_recv().ok()
    }

    /// Blocking variant of [`Subscription::recv`] for use outside async code
    pub fn blocking_recv(&mut self) -> Option<SentenceRecord> {
        self.rx.blocking_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            remove(&registry, self.id);
        }
    }
}

impl futures_util::Stream for Subscription {
    type Item = SentenceRecord;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use super::*;
    use crate::protocol::decode_line;
    use crate::protocol::v3::SentenceKind;

    fn gst(rms: f64) -> SentenceRecord {
        decode_line(&format!(r#"{{"class":"GST","rms":{rms}}}"#)).unwrap()
    }

    fn tpv() -> SentenceRecord {
        decode_line(r#"{"class":"TPV","mode":3}"#).unwrap()
    }

    fn rms(record: &SentenceRecord) -> f64 {
        match record {
            SentenceRecord::Gst(gst) => gst.rms,
            other => panic!("expected GST, got {other:?}"),
        }
    }

    #[test]
    fn filters_by_kind_and_keeps_order() {
        let dispatcher = Dispatcher::new(16);
        let mut gst_only = dispatcher.subscribe(SentenceKind::Gst).unwrap();
        let mut everything = dispatcher.subscribe(SentenceKinds::all()).unwrap();

        for record in [gst(1.0), tpv(), gst(2.0), gst(3.0)] {
            dispatcher.dispatch(&record);
        }

        let seen: Vec<f64> = std::iter::from_fn(|| gst_only.try_recv())
            .map(|r| rms(&r))
            .collect();
        assert_eq!(seen, vec![1.0, 2.0, 3.0]);

        let kinds: Vec<SentenceKind> = std::iter::from_fn(|| everything.try_recv())
            .map(|r| r.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                SentenceKind::Gst,
                SentenceKind::Tpv,
                SentenceKind::Gst,
                SentenceKind::Gst
            ]
        );
    }

    #[test]
    fn empty_filter_receives_nothing() {
        let dispatcher = Dispatcher::new(4);
        let mut none = dispatcher.subscribe(SentenceKinds::empty()).unwrap();
        assert_eq!(dispatcher.dispatch(&gst(1.0)), 0);
        assert!(none.try_recv().is_none());
    }

    #[test]
    fn stalled_subscriber_does_not_block_others() {
        let dispatcher = Dispatcher::new(2);
        let mut stalled = dispatcher.subscribe(SentenceKinds::all()).unwrap();
        let mut live = dispatcher.subscribe(SentenceKinds::all()).unwrap();

        for i in 0..5 {
            dispatcher.dispatch(&gst(f64::from(i)));
            let record = live.try_recv().expect("live subscriber gets every record");
            assert_eq!(rms(&record), f64::from(i));
        }

        // the stalled one kept only what fit in its buffer
        assert_eq!(rms(&stalled.try_recv().unwrap()), 0.0);
        assert_eq!(rms(&stalled.try_recv().unwrap()), 1.0);
        assert!(stalled.try_recv().is_none());
        assert_eq!(dispatcher.subscriber_count(), 2);
    }

    #[test]
    fn unsubscribe_and_drop_take_effect_before_next_record() {
        let dispatcher = Dispatcher::new(4);
        let mut kept = dispatcher.subscribe(SentenceKinds::all()).unwrap();
        let mut removed = dispatcher.subscribe(SentenceKinds::all()).unwrap();
        let dropped = dispatcher.subscribe(SentenceKinds::all()).unwrap();

        assert!(dispatcher.unsubscribe(removed.id()));
        assert!(!dispatcher.unsubscribe(removed.id()));
        drop(dropped);
        assert_eq!(dispatcher.subscriber_count(), 1);

        assert_eq!(dispatcher.dispatch(&gst(1.0)), 1);
        assert!(kept.try_recv().is_some());
        assert!(removed.try_recv().is_none());
    }

    #[test]
    fn close_refuses_new_subscriptions_and_ends_existing() {
        let dispatcher = Dispatcher::new(4);
        let mut sub = dispatcher.subscribe(SentenceKinds::all()).unwrap();
        dispatcher.dispatch(&gst(1.0));
        dispatcher.close();

        assert!(dispatcher.is_closed());
        assert!(matches!(
            dispatcher.subscribe(SentenceKinds::all()),
            Err(GpsdError::Shutdown)
        ));
        assert_eq!(dispatcher.dispatch(&gst(2.0)), 0);

        // already queued records still drain, then the channel ends
        assert_eq!(rms(&sub.blocking_recv().unwrap()), 1.0);
        assert!(sub.blocking_recv().is_none());
    }

    #[tokio::test]
    async fn failing_listener_is_isolated() {
        let dispatcher = Dispatcher::new(16);
        let (panicky_tx, panicky_rx) = std_mpsc::channel();
        let (steady_tx, steady_rx) = std_mpsc::channel();

        dispatcher
            .subscribe_fn(SentenceKind::Gst, move |record| {
                let value = rms(&record);
                if value == 1.0 {
                    panic!("listener bug");
                }
                if value == 2.0 {
                    return Err("cannot handle 2.0");
                }
                panicky_tx.send(value).map_err(|_| "receiver gone")
            })
            .unwrap();
        dispatcher
            .subscribe_fn(SentenceKind::Gst, move |record| {
                steady_tx.send(rms(&record)).map_err(|_| "receiver gone")
            })
            .unwrap();

        for i in 0..4 {
            dispatcher.dispatch(&gst(f64::from(i)));
        }

        let timeout = Duration::from_secs(5);
        let steady: Vec<f64> = (0..4).map(|_| steady_rx.recv_timeout(timeout).unwrap()).collect();
        assert_eq!(steady, vec![0.0, 1.0, 2.0, 3.0]);

        // the failing listener survived its panic and its error
        assert_eq!(panicky_rx.recv_timeout(timeout).unwrap(), 0.0);
        assert_eq!(panicky_rx.recv_timeout(timeout).unwrap(), 3.0);
    }

    #[tokio::test]
    async fn unsubscribing_a_callback_ends_its_thread() {
        let dispatcher = Dispatcher::new(4);
        let (tx, rx) = std_mpsc::channel::<f64>();
        let id = dispatcher
            .subscribe_fn(SentenceKinds::all(), move |record| {
                tx.send(rms(&record)).map_err(|_| "receiver gone")
            })
            .unwrap();

        dispatcher.dispatch(&gst(1.0));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1.0);

        assert!(dispatcher.unsubscribe(id));
        // the sender inside the callback is dropped with the thread
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
    }

    fn counting_callback(
        dispatcher: &Dispatcher,
        calls: &Arc<AtomicUsize>,
        started: std_mpsc::Sender<()>,
    ) -> SubscriptionId {
        let calls = Arc::clone(calls);
        dispatcher
            .subscribe_fn(SentenceKinds::all(), move |_| {
                let _ = started.send(());
                std::thread::sleep(Duration::from_millis(50));
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_waits_for_running_callback_and_discards_the_rest() {
        let dispatcher = Dispatcher::new(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = std_mpsc::channel();
        counting_callback(&dispatcher, &calls, started_tx);

        for i in 0..10 {
            dispatcher.dispatch(&gst(f64::from(i)));
        }
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        dispatcher.shutdown().await;
        let at_shutdown = calls.load(Ordering::SeqCst);
        assert!(at_shutdown >= 1);
        assert!(at_shutdown < 10, "queued records were still delivered");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), at_shutdown);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsubscribe_discards_queued_callback_records() {
        let dispatcher = Dispatcher::new(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = std_mpsc::channel();
        let id = counting_callback(&dispatcher, &calls, started_tx);

        for i in 0..10 {
            dispatcher.dispatch(&gst(f64::from(i)));
        }
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(dispatcher.unsubscribe(id));

        // at most the call already running completes
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(calls.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn callback_outside_runtime_is_refused_without_registering() {
        let dispatcher = Dispatcher::new(4);
        let result = dispatcher.subscribe_fn(SentenceKinds::all(), |_| Ok::<_, &str>(()));
        assert!(matches!(result, Err(GpsdError::NoRuntime)));
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
