use crate::AddressSet;
use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc,
};

/// Receives endpoint updates for a subscription.
///
/// Implementations are invoked while a watcher holds its per-IP lock, so they should hand updates
/// off (e.g. to a channel) rather than block.
pub trait EndpointUpdateListener: Send + Sync {
    /// Upserts addresses by pod identity. Addresses not named in `set` are retained.
    fn add(&self, set: AddressSet);

    /// Clears all previously delivered addresses. `exists` indicates whether the target still
    /// exists.
    fn no_endpoints(&self, exists: bool);

    /// Signals that the pod a listener was watching has been deleted.
    ///
    /// Only pod watchers issue this.
    fn delete_endpoint(&self) {}
}

/// A shared handle to a listener.
///
/// Handles compare by the identity of the listener they point to, so a listener can be
/// registered (and later removed) by cloning its handle.
#[derive(Clone)]
pub struct Listener(Arc<dyn EndpointUpdateListener>);

// === impl Listener ===

impl Listener {
    pub fn new<L>(listener: Arc<L>) -> Self
    where
        L: EndpointUpdateListener + 'static,
    {
        Self(listener)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl<L: EndpointUpdateListener + 'static> From<Arc<L>> for Listener {
    fn from(listener: Arc<L>) -> Self {
        Self::new(listener)
    }
}

impl Deref for Listener {
    type Target = dyn EndpointUpdateListener;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl Hash for Listener {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.addr()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Noop;

    impl EndpointUpdateListener for Noop {
        fn add(&self, _: AddressSet) {}
        fn no_endpoints(&self, _: bool) {}
    }

    #[test]
    fn compares_by_identity() {
        let inner = Arc::new(Noop);
        let a = Listener::new(inner.clone());
        let b = Listener::from(inner);
        let c = Listener::new(Arc::new(Noop));

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set = [a.clone(), b, c].into_iter().collect::<HashSet<_>>();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }
}
