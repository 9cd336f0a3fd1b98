//! Subscriber adapter.
//!
//! [`ValueWatch`] is what a rendering layer holds for one displayed value: a
//! local copy of the value plus one keyed subscription that refreshes it. The
//! `on_change` callback fires only when the local copy actually changes, which
//! is the signal to re-render.

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::StoreResult;
use crate::key::CompositeKey;
use crate::store::{KeyedStore, WeakKeyedStore};
use crate::subscription::Subscription;

type OnChange = Arc<dyn Fn() + Send + Sync>;

/// Live view of one key in a [`KeyedStore`].
///
/// Without a namespace the watch reads as `None` forever and holds no
/// subscription.
///
/// # Examples
///
/// ```
/// use countdown_store::{KeyedStore, ValueWatch};
///
/// let store: KeyedStore<u64, &str, u32> = KeyedStore::new();
/// let watch = ValueWatch::new(&store, Some(7), "chess", || {}).unwrap();
/// assert_eq!(watch.value(), None);
///
/// store.set(7, "chess", Some(30));
/// assert_eq!(watch.value(), Some(30));
/// ```
pub struct ValueWatch<N, C, V> {
    store: KeyedStore<N, C, V>,
    target: Option<CompositeKey<N, C>>,
    local: Arc<Mutex<Option<V>>>,
    on_change: OnChange,
    subscription: Option<Subscription>,
}

impl<N, C, V> ValueWatch<N, C, V>
where
    N: Eq + Hash + Clone + Send + Sync + 'static,
    C: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    /// Start watching `(namespace, category)`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ListenerLimitExceeded` if the store cannot take
    /// another registration.
    pub fn new<F>(store: &KeyedStore<N, C, V>, namespace: Option<N>, category: C, on_change: F) -> StoreResult<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut watch = Self {
            store: store.clone(),
            target: None,
            local: Arc::new(Mutex::new(None)),
            on_change: Arc::new(on_change),
            subscription: None,
        };
        watch.attach(namespace.map(|ns| CompositeKey::new(ns, category)))?;
        Ok(watch)
    }

    /// Current local value.
    #[must_use]
    pub fn value(&self) -> Option<V> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns true if the watch holds a live subscription.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    /// The key being watched, if any.
    #[must_use]
    pub fn target(&self) -> Option<&CompositeKey<N, C>> {
        self.target.as_ref()
    }

    /// Point the watch at a different key.
    ///
    /// The old subscription is torn down before the new one is registered, so
    /// no notification for the old key reaches this watch afterwards. Does
    /// nothing if the key is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ListenerLimitExceeded` if the store cannot take
    /// the new registration. The watch is then detached and reads `None`.
    pub fn retarget(&mut self, namespace: Option<N>, category: C) -> StoreResult<()> {
        let next = namespace.map(|ns| CompositeKey::new(ns, category));
        if next == self.target {
            return Ok(());
        }
        self.attach(next)
    }

    fn attach(&mut self, target: Option<CompositeKey<N, C>>) -> StoreResult<()> {
        if let Some(old) = self.subscription.take() {
            old.unsubscribe();
        }
        self.target = None;
        self.set_local(None);

        let Some(key) = target else {
            debug!("watch has no namespace, not subscribing");
            return Ok(());
        };

        let weak = self.store.downgrade();
        let local = Arc::clone(&self.local);
        let on_change = Arc::clone(&self.on_change);
        let (namespace, category) = key.clone().into_parts();
        let subscription = self.store.subscribe_key(namespace.clone(), category.clone(), move || {
            refresh(&weak, &local, &on_change, &namespace, &category);
        })?;

        // Read after subscribing so a write racing the registration is not lost.
        {
            let mut current = self.local.lock().unwrap_or_else(PoisonError::into_inner);
            let (namespace, category) = key.clone().into_parts();
            *current = self.store.get(namespace, category);
        }
        self.subscription = Some(subscription);
        self.target = Some(key);
        Ok(())
    }

    fn set_local(&self, value: Option<V>) {
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

fn refresh<N, C, V>(
    store: &WeakKeyedStore<N, C, V>,
    local: &Mutex<Option<V>>,
    on_change: &OnChange,
    namespace: &N,
    category: &C,
) where
    N: Eq + Hash + Clone + Send + Sync + 'static,
    C: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    let Some(store) = store.upgrade() else {
        return;
    };
    {
        // Read under the local lock: refreshes from concurrent writers then
        // apply in order and the last one leaves the latest value behind.
        let mut current = local.lock().unwrap_or_else(PoisonError::into_inner);
        let next = store.get(namespace.clone(), category.clone());
        if *current == next {
            return;
        }
        *current = next;
    }
    on_change();
}

impl<N, C, V> fmt::Debug for ValueWatch<N, C, V>
where
    N: fmt::Debug,
    C: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueWatch")
            .field("target", &self.target)
            .field("value", &*self.local.lock().unwrap_or_else(PoisonError::into_inner))
            .field("subscribed", &self.subscription.is_some())
            .finish_non_exhaustive()
    }
}
