//! Keyed observable store.
//!
//! [`KeyedStore`] maps [`CompositeKey`]s to values and notifies listeners
//! synchronously when a write changes a value. A write of a value equal to the
//! current one is a no-op: nothing is stored and nobody is notified.
//!
//! # Dispatch
//!
//! Listeners run on the writer's thread, in registration order, outside the
//! internal lock. A listener may therefore call back into the store. Under
//! [`DispatchMode::Immediate`] a listener that writes a key fans out again on
//! the same stack; if it keeps flipping the key it was notified about, that
//! recursion is unbounded. [`DispatchMode::Deferred`] queues such nested
//! notifications until the running fan-out completes.
//!
//! # Poisoning
//!
//! The lock is never held while user code runs and every mutation completes
//! before it is released, so a poisoned lock still guards consistent state and
//! is recovered rather than reported.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tracing::{debug, trace};

use crate::config::{DispatchMode, StoreConfig};
use crate::error::{StoreResult, ValidationError};
use crate::event::ChangeEvent;
use crate::key::CompositeKey;
use crate::subscription::{Subscription, SubscriptionId, Unregister};

type Callback<N, C, V> = Arc<dyn Fn(&ChangeEvent<N, C, V>) + Send + Sync>;

/// Stored state of a key that has been written at least once.
#[derive(Debug, Clone, PartialEq)]
enum Slot<V> {
    Value(V),
    Cleared,
}

impl<V> Slot<V> {
    fn from_option(value: Option<V>) -> Self {
        value.map_or(Self::Cleared, Self::Value)
    }

    fn as_option(&self) -> Option<&V> {
        match self {
            Self::Value(v) => Some(v),
            Self::Cleared => None,
        }
    }
}

struct Registration<N, C, V> {
    id: SubscriptionId,
    /// `None` matches every key.
    filter: Option<CompositeKey<N, C>>,
    active: AtomicBool,
    callback: Callback<N, C, V>,
}

impl<N: PartialEq, C: PartialEq, V> Registration<N, C, V> {
    fn matches(&self, key: &CompositeKey<N, C>) -> bool {
        self.filter.as_ref().map_or(true, |f| f == key)
    }
}

struct StoreState<N, C, V> {
    values: HashMap<CompositeKey<N, C>, Slot<V>>,
    listeners: Vec<Arc<Registration<N, C, V>>>,
    version: u64,
    dispatching: bool,
    pending: VecDeque<ChangeEvent<N, C, V>>,
}

impl<N, C, V> Default for StoreState<N, C, V> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            listeners: Vec::new(),
            version: 0,
            dispatching: false,
            pending: VecDeque::new(),
        }
    }
}

impl<N: PartialEq, C: PartialEq, V> StoreState<N, C, V> {
    fn listeners_for(&self, key: &CompositeKey<N, C>) -> Vec<Arc<Registration<N, C, V>>> {
        self.listeners
            .iter()
            .filter(|r| r.matches(key))
            .cloned()
            .collect()
    }
}

struct Shared<N, C, V> {
    config: StoreConfig,
    state: Mutex<StoreState<N, C, V>>,
}

impl<N, C, V> Shared<N, C, V> {
    fn lock(&self) -> MutexGuard<'_, StoreState<N, C, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<N, C, V> Unregister for Shared<N, C, V>
where
    N: Send + Sync,
    C: Send + Sync,
    V: Send,
{
    fn unregister(&self, id: SubscriptionId) {
        let mut state = self.lock();
        if let Some(pos) = state.listeners.iter().position(|r| r.id == id) {
            let reg = state.listeners.remove(pos);
            reg.active.store(false, Ordering::Release);
            debug!(subscription = %id, listeners = state.listeners.len(), "listener removed");
        }
    }
}

/// Resets the dispatch flag if a listener panics mid fan-out, so the store
/// does not stay stuck in dispatch.
struct DispatchGuard<'a, N, C, V> {
    shared: &'a Shared<N, C, V>,
}

impl<N, C, V> Drop for DispatchGuard<'_, N, C, V> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.shared.lock();
            state.dispatching = false;
            state.pending.clear();
        }
    }
}

/// An observable map from `(namespace, category)` keys to values.
///
/// Cloning a `KeyedStore` yields another handle to the same state. Construct
/// one per application (or per test) and hand clones to whatever needs it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use countdown_store::KeyedStore;
///
/// let store: KeyedStore<u64, &str, u32> = KeyedStore::new();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&hits);
/// let _sub = store
///     .subscribe(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     })
///     .unwrap();
///
/// store.set(7, "chess", Some(30));
/// store.set(7, "chess", Some(30));
/// assert_eq!(store.get(7, "chess"), Some(30));
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
pub struct KeyedStore<N, C, V> {
    shared: Arc<Shared<N, C, V>>,
}

impl<N, C, V> Clone for KeyedStore<N, C, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<N, C, V> std::fmt::Debug for KeyedStore<N, C, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("KeyedStore")
            .field("keys", &state.values.len())
            .field("listeners", &state.listeners.len())
            .field("version", &state.version)
            .field("dispatch", &self.shared.config.dispatch)
            .finish()
    }
}

impl<N, C, V> Default for KeyedStore<N, C, V>
where
    N: Eq + Hash + Clone + Send + Sync + 'static,
    C: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<N, C, V> KeyedStore<N, C, V>
where
    N: Eq + Hash + Clone + Send + Sync + 'static,
    C: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    /// Create an empty store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(StoreConfig::default())
    }

    /// Create an empty store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the configuration is unusable.
    pub fn with_config(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    /// The configuration this store was built with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Write `value` (or clear the key with `None`).
    ///
    /// Returns `false` without touching state or notifying anyone if the value
    /// equals the current one; a never-written key compares as `None`.
    /// Otherwise stores the value, bumps the version, notifies matching
    /// listeners, and returns `true`.
    pub fn set(&self, namespace: N, category: C, value: Option<V>) -> bool {
        self.update(namespace, category, |_| value)
    }

    /// Compute the next value from the current one while holding the lock,
    /// then apply it with the same rules as [`KeyedStore::set`].
    ///
    /// The closure must not call back into the store.
    pub fn update(&self, namespace: N, category: C, f: impl FnOnce(Option<&V>) -> Option<V>) -> bool {
        let key = CompositeKey::new(namespace, category);
        let mut state = self.shared.lock();

        let current = state.values.get(&key).and_then(Slot::as_option);
        let next = f(current);
        if current == next.as_ref() {
            trace!(version = state.version, "write ignored, value unchanged");
            return false;
        }

        state.version += 1;
        let event = ChangeEvent {
            key: key.clone(),
            value: next.clone(),
            version: state.version,
            changed_at: Utc::now(),
        };
        state.values.insert(key, Slot::from_option(next));
        trace!(version = state.version, "write accepted");

        match self.shared.config.dispatch {
            DispatchMode::Immediate => {
                let listeners = state.listeners_for(&event.key);
                drop(state);
                fan_out(&listeners, &event);
            }
            DispatchMode::Deferred => {
                state.pending.push_back(event);
                if state.dispatching {
                    trace!(queued = state.pending.len(), "notification deferred");
                    return true;
                }
                state.dispatching = true;
                drop(state);
                self.drain_pending();
            }
        }
        true
    }

    fn drain_pending(&self) {
        let _guard = DispatchGuard {
            shared: &*self.shared,
        };
        loop {
            let mut state = self.shared.lock();
            let Some(event) = state.pending.pop_front() else {
                state.dispatching = false;
                return;
            };
            let listeners = state.listeners_for(&event.key);
            drop(state);
            fan_out(&listeners, &event);
        }
    }

    /// Current value for the key. Never-written and cleared keys both read as
    /// `None`; use [`KeyedStore::contains`] to tell them apart.
    #[must_use]
    pub fn get(&self, namespace: N, category: C) -> Option<V> {
        let key = CompositeKey::new(namespace, category);
        self.shared
            .lock()
            .values
            .get(&key)
            .and_then(Slot::as_option)
            .cloned()
    }

    /// Returns true once any write to the key has been accepted, including a
    /// write that cleared it.
    #[must_use]
    pub fn contains(&self, namespace: N, category: C) -> bool {
        let key = CompositeKey::new(namespace, category);
        self.shared.lock().values.contains_key(&key)
    }

    /// Register a listener called, with no payload, after every accepted write
    /// to any key. Re-read with [`KeyedStore::get`] inside the listener.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ListenerLimitExceeded` if the store already
    /// holds `max_listeners` registrations.
    pub fn subscribe<F>(&self, listener: F) -> StoreResult<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(None, Arc::new(move |_: &ChangeEvent<N, C, V>| listener()))
    }

    /// Register a listener called only after accepted writes to one key.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ListenerLimitExceeded` if the store already
    /// holds `max_listeners` registrations.
    pub fn subscribe_key<F>(&self, namespace: N, category: C, listener: F) -> StoreResult<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = CompositeKey::new(namespace, category);
        self.register(Some(key), Arc::new(move |_: &ChangeEvent<N, C, V>| listener()))
    }

    /// Register a listener that receives the [`ChangeEvent`] of every accepted
    /// write, optionally restricted to one key.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ListenerLimitExceeded` if the store already
    /// holds `max_listeners` registrations.
    pub fn subscribe_events<F>(&self, filter: Option<CompositeKey<N, C>>, listener: F) -> StoreResult<Subscription>
    where
        F: Fn(&ChangeEvent<N, C, V>) + Send + Sync + 'static,
    {
        self.register(filter, Arc::new(listener))
    }

    fn register(&self, filter: Option<CompositeKey<N, C>>, callback: Callback<N, C, V>) -> StoreResult<Subscription> {
        let id = SubscriptionId::new();
        let keyed = filter.is_some();
        {
            let mut state = self.shared.lock();
            let limit = self.shared.config.max_listeners;
            if state.listeners.len() >= limit {
                debug!(limit, "listener limit reached");
                return Err(ValidationError::ListenerLimitExceeded { limit }.into());
            }
            state.listeners.push(Arc::new(Registration {
                id,
                filter,
                active: AtomicBool::new(true),
                callback,
            }));
            debug!(subscription = %id, keyed, listeners = state.listeners.len(), "listener added");
        }

        let shared: Arc<dyn Unregister> = Arc::clone(&self.shared) as Arc<dyn Unregister>;
        Ok(Subscription::new(id, Arc::downgrade(&shared)))
    }

    /// Number of live registrations.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.lock().listeners.len()
    }

    /// Number of keys ever written, cleared ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().values.len()
    }

    /// Returns true if no key has ever been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.lock().values.is_empty()
    }

    /// Keys currently holding a value. Order is unspecified.
    #[must_use]
    pub fn keys(&self) -> Vec<CompositeKey<N, C>> {
        self.shared
            .lock()
            .values
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Value(_)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Count of accepted writes since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.lock().version
    }

    /// A handle that does not keep the store alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakKeyedStore<N, C, V> {
        WeakKeyedStore {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

/// Non-owning handle to a [`KeyedStore`].
pub struct WeakKeyedStore<N, C, V> {
    shared: Weak<Shared<N, C, V>>,
}

impl<N, C, V> Clone for WeakKeyedStore<N, C, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<N, C, V> WeakKeyedStore<N, C, V> {
    /// The store, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<KeyedStore<N, C, V>> {
        self.shared.upgrade().map(|shared| KeyedStore { shared })
    }
}

fn fan_out<N, C, V>(listeners: &[Arc<Registration<N, C, V>>], event: &ChangeEvent<N, C, V>) {
    trace!(listeners = listeners.len(), version = event.version, "notifying");
    for reg in listeners {
        // A listener torn down earlier in this fan-out must not fire.
        if reg.active.load(Ordering::Acquire) {
            (reg.callback)(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type TestStore = KeyedStore<u64, &'static str, u32>;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&hits);
        (hits, move || {
            clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_get_unset_is_none() {
        let store = TestStore::new();
        assert_eq!(store.get(999, "chess"), None);
        assert!(!store.contains(999, "chess"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_then_get() {
        let store = TestStore::new();
        assert!(store.set(7, "chess", Some(30)));
        assert_eq!(store.get(7, "chess"), Some(30));
        assert_eq!(store.version(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_equal_write_is_noop() {
        let store = TestStore::new();
        let (hits, listener) = counter();
        let _sub = store.subscribe(listener).unwrap();

        assert!(store.set(7, "chess", Some(30)));
        assert!(!store.set(7, "chess", Some(30)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_clear_on_unset_key_is_noop() {
        let store = TestStore::new();
        assert!(!store.set(7, "chess", None));
        assert!(!store.contains(7, "chess"));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_clear_is_distinguishable_via_contains() {
        let store = TestStore::new();
        store.set(7, "chess", Some(5));
        assert!(store.set(7, "chess", None));
        assert_eq!(store.get(7, "chess"), None);
        assert!(store.contains(7, "chess"));
        assert!(store.keys().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_sees_current_value() {
        let store = TestStore::new();
        store.set(1, "chess", Some(10));
        assert!(store.update(1, "chess", |cur| cur.map(|v| v - 1)));
        assert_eq!(store.get(1, "chess"), Some(9));
        assert!(!store.update(2, "chess", |cur| cur.copied()));
    }

    #[test]
    fn test_same_callback_registered_twice() {
        let store = TestStore::new();
        let (hits, listener) = counter();
        let listener = Arc::new(listener);
        let l1 = Arc::clone(&listener);
        let l2 = Arc::clone(&listener);
        let sub1 = store.subscribe(move || l1()).unwrap();
        let sub2 = store.subscribe(move || l2()).unwrap();
        assert_ne!(sub1.id(), sub2.id());

        store.set(1, "chess", Some(1));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        sub1.unsubscribe();
        store.set(1, "chess", Some(2));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(store.listener_count(), 1);
        drop(sub2);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_listener_limit() {
        let store = TestStore::with_config(StoreConfig {
            max_listeners: 1,
            ..StoreConfig::default()
        })
        .unwrap();
        let _first = store.subscribe(|| {}).unwrap();
        let err = store.subscribe(|| {}).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_with_config_rejects_invalid() {
        let err = TestStore::with_config(StoreConfig {
            max_listeners: 0,
            ..StoreConfig::default()
        })
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_listener_can_read_during_notification() {
        let store = TestStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reader = store.clone();
        let sink = Arc::clone(&seen);
        let _sub = store
            .subscribe(move || sink.lock().unwrap().push(reader.get(7, "chess")))
            .unwrap();

        store.set(7, "chess", Some(3));
        store.set(7, "chess", Some(2));
        assert_eq!(*seen.lock().unwrap(), vec![Some(3), Some(2)]);
    }

    #[test]
    fn test_unsubscribed_mid_fan_out_is_skipped() {
        let store = TestStore::new();
        let (hits, listener) = counter();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&victim);
        let _killer = store
            .subscribe(move || {
                if let Some(sub) = slot.lock().unwrap().take() {
                    sub.unsubscribe();
                }
            })
            .unwrap();
        *victim.lock().unwrap() = Some(store.subscribe(listener).unwrap());

        store.set(1, "chess", Some(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_outlives_store() {
        let store = TestStore::new();
        let sub = store.subscribe(|| {}).unwrap();
        drop(store);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn test_weak_handle() {
        let store = TestStore::new();
        let weak = store.downgrade();
        assert!(weak.upgrade().is_some());
        drop(store);
        assert!(weak.upgrade().is_none());
    }
}
