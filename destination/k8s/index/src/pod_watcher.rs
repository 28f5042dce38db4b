//! Pod-deletion subscriptions by IP address.
//!
//! Profile listeners watch a pod IP only to learn when the pod behind it goes away. Unlike
//! [`IpWatcher`](crate::IpWatcher), subscribing delivers nothing; listeners are told only when
//! the pod they were watching is deleted.

use crate::resources::{Resolution, SharedResourceIndex};
use ahash::AHashMap as HashMap;
use linkerd_destination_core::{AddressSet, Id, Listener, Port};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, error, instrument};

#[derive(Debug)]
pub struct PodWatcher {
    resources: SharedResourceIndex,
    bindings: RwLock<HashMap<String, Arc<Mutex<Binding>>>>,
}

#[derive(Debug)]
struct Binding {
    /// The pod currently at this IP, if known.
    pod: AddressSet,
    listeners: HashMap<Listener, Port>,
}

// === impl PodWatcher ===

impl PodWatcher {
    pub fn new(resources: SharedResourceIndex) -> Self {
        Self {
            resources,
            bindings: RwLock::new(HashMap::default()),
        }
    }

    #[instrument(skip_all, fields(%ip, %port))]
    pub fn subscribe(&self, ip: &str, port: Port, listener: Listener) {
        debug!("Subscribing to pod");
        self.binding_or_default(ip).lock().listeners.insert(listener, port);
    }

    #[instrument(skip_all, fields(%ip))]
    pub fn unsubscribe(&self, ip: &str, listener: &Listener) {
        match self.binding(ip) {
            Some(binding) => {
                binding.lock().listeners.remove(listener);
            }
            None => error!("Cannot unsubscribe from unknown pod IP"),
        }
    }

    /// Records the pod now at `ip`, if the IP is being watched.
    pub(crate) fn refresh(&self, ip: &str) {
        if let Some(binding) = self.binding(ip) {
            let mut binding = binding.lock();
            if let Resolution::Pod(pod) = self.resources.resolve(ip) {
                binding.pod = pod;
            }
        }
    }

    /// Notifies listeners on `ip` that the pod they were watching, `id`, has been deleted.
    ///
    /// Deleting some other pod that once held the IP does not notify anyone.
    pub(crate) fn delete(&self, ip: &str, id: &Id) {
        let Some(binding) = self.binding(ip) else {
            return;
        };
        let mut binding = binding.lock();
        if !binding.pod.addresses.contains_key(id) {
            debug!(%ip, pod = %id, "Deleted pod was not being watched");
            return;
        }
        debug!(%ip, pod = %id, listeners = binding.listeners.len(), "Pod deleted");
        for listener in binding.listeners.keys() {
            listener.delete_endpoint();
        }
        binding.pod = AddressSet::default();
    }

    fn binding(&self, ip: &str) -> Option<Arc<Mutex<Binding>>> {
        self.bindings.read().get(ip).cloned()
    }

    fn binding_or_default(&self, ip: &str) -> Arc<Mutex<Binding>> {
        if let Some(binding) = self.binding(ip) {
            return binding;
        }

        self.bindings
            .write()
            .entry(ip.to_string())
            .or_insert_with(|| {
                let pod = match self.resources.resolve(ip) {
                    Resolution::Pod(pod) => pod,
                    _ => AddressSet::default(),
                };
                Arc::new(Mutex::new(Binding {
                    pod,
                    listeners: HashMap::default(),
                }))
            })
            .clone()
    }
}
