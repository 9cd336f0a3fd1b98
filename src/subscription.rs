//! Subscription handles.
//!
//! A [`Subscription`] is the teardown capability for one registration. It does
//! not keep the store alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one registration.
///
/// Registering the same callback twice yields two distinct ids.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Removal side of a listener registry, erased over the store's key and value
/// types.
pub(crate) trait Unregister: Send + Sync {
    fn unregister(&self, id: SubscriptionId);
}

/// Teardown handle returned by `subscribe`.
///
/// Dropping the handle unsubscribes. [`Subscription::unsubscribe`] does the
/// same explicitly and is idempotent; once it returns, the listener will not
/// be invoked again by later writes, nor by a fan-out already in progress on
/// the calling thread. A fan-out running concurrently on another thread may
/// still deliver one last call.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<dyn Unregister>,
    unregistered: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, registry: Weak<dyn Unregister>) -> Self {
        Self {
            id,
            registry,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The registration id backing this handle.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns true until this handle has been torn down.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.unregistered.load(Ordering::Acquire)
    }

    /// Remove this registration. Calling it again, or after the store is gone,
    /// does nothing.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        removed: Mutex<Vec<SubscriptionId>>,
    }

    impl Unregister for Recorder {
        fn unregister(&self, id: SubscriptionId) {
            self.removed.lock().unwrap().push(id);
        }
    }

    fn handle(recorder: &Arc<Recorder>) -> Subscription {
        let registry: Arc<dyn Unregister> = Arc::clone(recorder) as Arc<dyn Unregister>;
        Subscription::new(SubscriptionId::new(), Arc::downgrade(&registry))
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let sub = handle(&recorder);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        drop(sub);
        assert_eq!(recorder.removed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let recorder = Arc::new(Recorder::default());
        let sub = handle(&recorder);
        let id = sub.id();
        drop(sub);
        assert_eq!(*recorder.removed.lock().unwrap(), vec![id]);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let recorder = Arc::new(Recorder::default());
        let sub = handle(&recorder);
        drop(recorder);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }
}
