//! Change streams: bounded channels of [`ChangeEvent`]s for readers on other
//! threads.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError, TrySendError};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::event::ChangeEvent;
use crate::key::CompositeKey;
use crate::store::KeyedStore;
use crate::subscription::Subscription;

/// A bounded stream of change events.
///
/// Writers never block on a slow reader: when the buffer is full the event is
/// dropped and counted. Dropping the stream unsubscribes it.
#[derive(Debug)]
pub struct ChangeStream<N, C, V> {
    rx: Receiver<ChangeEvent<N, C, V>>,
    subscription: Subscription,
    dropped_events: Arc<AtomicU64>,
}

impl<N, C, V> ChangeStream<N, C, V> {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> StoreResult<ChangeEvent<N, C, V>> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> StoreResult<ChangeEvent<N, C, V>> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StoreError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Receive an already buffered event, if any.
    pub fn try_recv(&self) -> StoreResult<Option<ChangeEvent<N, C, V>>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }

    /// Events discarded because the buffer was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Stop receiving new events. Idempotent. Buffered events stay readable.
    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }
}

fn disconnected() -> StoreError {
    StoreError::Disconnected {
        path: "change_stream".to_string(),
    }
}

impl<N, C, V> KeyedStore<N, C, V>
where
    N: Eq + Hash + Clone + Send + Sync + 'static,
    C: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    /// Open a change stream with the configured default capacity.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ListenerLimitExceeded` if the store cannot take
    /// another registration.
    pub fn stream(&self, filter: Option<CompositeKey<N, C>>) -> StoreResult<ChangeStream<N, C, V>> {
        self.stream_with_capacity(filter, self.config().stream_capacity)
    }

    /// Open a change stream buffering at most `capacity` events (minimum 1).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ListenerLimitExceeded` if the store cannot take
    /// another registration.
    pub fn stream_with_capacity(
        &self,
        filter: Option<CompositeKey<N, C>>,
        capacity: usize,
    ) -> StoreResult<ChangeStream<N, C, V>> {
        let (tx, rx) = bounded::<ChangeEvent<N, C, V>>(capacity.max(1));
        let dropped_events = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&dropped_events);
        let subscription = self.subscribe_events(filter, move |event| match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let dropped = counter.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, version = event.version, "change stream dropped event");
            }
        })?;

        Ok(ChangeStream {
            rx,
            subscription,
            dropped_events,
        })
    }
}
