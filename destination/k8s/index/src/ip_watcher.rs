//! Subscriptions by IP address.
//!
//! `IpWatcher` holds a binding per IP. A binding records what the IP currently names and which
//! listeners are subscribed to it, and it translates occupant changes into listener updates:
//!
//! - While a service occupies the IP, each listener is subscribed to the service through the
//!   endpoint resolver.
//! - While a pod occupies the IP, each listener receives that pod's address directly.
//! - Otherwise each listener receives the raw IP.
//!
//! While more than one resource claims an IP, listeners that are already bound keep their
//! occupant, and listeners that subscribe in the meantime receive the raw IP until a single
//! occupant emerges.
//!
//! A listener leaving a service is always cleared before it receives anything else, because the
//! resolver may deliver the next service's addresses arbitrarily later. A listener moving between
//! pods is not cleared: pod addresses are keyed by pod, so an `add` replaces the prior entry.

use crate::resources::{Conflict, Resolution, SharedResourceIndex};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::Result;
use linkerd_destination_core::{AddressSet, EndpointResolver, Listener, Port, ServiceId};
use linkerd_destination_k8s_api as k8s;
use parking_lot::{Mutex, RwLock};
use prometheus_client::metrics::counter::Counter;
use std::{fmt, sync::Arc};
use tracing::{debug, error, info, instrument, trace, warn};

/// Multiplexes IP subscriptions over the endpoint resolver.
pub struct IpWatcher {
    resources: SharedResourceIndex,
    endpoints: Arc<dyn EndpointResolver>,

    /// Bindings are created on demand and never removed; an IP that is reused is rebound in
    /// place.
    bindings: RwLock<HashMap<String, Arc<Mutex<Binding>>>>,

    pub(crate) fallbacks: Counter,
}

/// The state of a single IP.
struct Binding {
    ip: String,
    occupant: Occupant,
    listeners: HashMap<Listener, Port>,

    /// Set while more than one resource claims the IP.
    conflicted: bool,

    /// Listeners that subscribed while the IP was conflicted. They hold only the raw IP and are
    /// not registered with the resolver.
    unbound: HashSet<Listener>,

    endpoints: Arc<dyn EndpointResolver>,
    fallbacks: Counter,
}

#[derive(Clone, Debug, Default, PartialEq)]
enum Occupant {
    #[default]
    Empty,
    Service(ServiceId),
    /// The pod's port-less address set.
    Pod(AddressSet),
}

// === impl IpWatcher ===

impl IpWatcher {
    pub fn new(resources: SharedResourceIndex, endpoints: Arc<dyn EndpointResolver>) -> Self {
        Self {
            resources,
            endpoints,
            bindings: RwLock::new(HashMap::default()),
            fallbacks: Counter::default(),
        }
    }

    /// Subscribes `listener` to the endpoints of `ip`.
    ///
    /// The listener receives its initial endpoints before this returns, unless the IP names a
    /// service, in which case the resolver delivers them. An error is returned only if the
    /// resolver rejects the subscription, in which case the listener is not registered.
    ///
    /// Subscribing a listener that is already subscribed to `ip` replaces its port.
    #[instrument(skip_all, fields(%ip, %port))]
    pub fn subscribe(&self, ip: &str, port: Port, listener: Listener) -> Result<()> {
        info!("Establishing watch on IP");
        self.binding_or_default(ip).lock().subscribe(port, listener)
    }

    /// Removes a subscription. Removing an unknown subscription has no effect.
    #[instrument(skip_all, fields(%ip, %port))]
    pub fn unsubscribe(&self, ip: &str, port: Port, listener: &Listener) {
        info!("Stopping watch on IP");
        match self.binding(ip) {
            Some(binding) => binding.lock().unsubscribe(listener),
            None => error!("Cannot unsubscribe from unknown IP"),
        }
    }

    /// Returns the service whose cluster IP is `ip`, independent of any subscriptions.
    pub fn service_for_ip(&self, ip: &str) -> Result<Option<ServiceId>, Conflict> {
        self.resources.service_for_ip(ip)
    }

    /// Returns the live pod whose IP is `ip`, independent of any subscriptions.
    pub fn pod_for_ip(&self, ip: &str) -> Result<Option<Arc<k8s::Pod>>, Conflict> {
        self.resources.pod_for_ip(ip)
    }

    pub fn bindings_len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn listeners_len(&self) -> usize {
        let bindings = self.bindings.read().values().cloned().collect::<Vec<_>>();
        bindings.iter().map(|b| b.lock().listeners.len()).sum()
    }

    /// Brings the binding for `ip` in line with the resource index, creating it if necessary.
    pub(crate) fn reconcile(&self, ip: &str) {
        let binding = self.binding_or_default(ip);
        let mut binding = binding.lock();
        // Resolve under the binding's lock so that concurrent service and pod events cannot
        // apply their resolutions out of order.
        let resolution = self.resources.resolve(ip);
        binding.reconcile(resolution);
    }

    /// Like `reconcile`, but only for an IP that already has a binding.
    pub(crate) fn reconcile_existing(&self, ip: &str) {
        if let Some(binding) = self.binding(ip) {
            let mut binding = binding.lock();
            let resolution = self.resources.resolve(ip);
            binding.reconcile(resolution);
        }
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
                let resolution = self.resources.resolve(ip);
                let conflicted = resolution == Resolution::Conflict;
                let occupant = match resolution {
                    Resolution::Service(id) => Occupant::Service(id),
                    Resolution::Pod(set) => Occupant::Pod(set),
                    Resolution::None | Resolution::Conflict => Occupant::Empty,
                };
                debug!(%ip, ?occupant, conflicted, "Creating binding");
                Arc::new(Mutex::new(Binding {
                    ip: ip.to_string(),
                    occupant,
                    listeners: HashMap::default(),
                    conflicted,
                    unbound: HashSet::default(),
                    endpoints: self.endpoints.clone(),
                    fallbacks: self.fallbacks.clone(),
                }))
            })
            .clone()
    }
}

impl fmt::Debug for IpWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpWatcher")
            .field("bindings", &self.bindings.read().len())
            .finish_non_exhaustive()
    }
}

// === impl Binding ===

impl Binding {
    fn subscribe(&mut self, port: Port, listener: Listener) -> Result<()> {
        let prior = self.listeners.get(&listener).copied();
        let bound = !self.unbound.contains(&listener);

        if self.conflicted {
            if let (Occupant::Service(id), Some(prior), true) = (&self.occupant, prior, bound) {
                self.endpoints.unsubscribe(id, prior, "", &listener);
                listener.no_endpoints(true);
            }
            debug!("No unique occupant; delivering IP");
            listener.add(AddressSet::singleton(self.ip.clone(), port));
            self.unbound.insert(listener.clone());
            self.listeners.insert(listener, port);
            return Ok(());
        }

        match &self.occupant {
            Occupant::Service(id) => {
                // A listener holds at most one registration with the resolver.
                if prior != Some(port) {
                    self.endpoints.subscribe(id, port, "", listener.clone())?;
                    if let Some(prior) = prior {
                        self.endpoints.unsubscribe(id, prior, "", &listener);
                    }
                }
            }
            Occupant::Pod(set) if !set.is_empty() => listener.add(set.with_port(port)),
            Occupant::Pod(_) | Occupant::Empty => {
                listener.add(AddressSet::singleton(self.ip.clone(), port))
            }
        }
        self.listeners.insert(listener, port);
        Ok(())
    }

    fn unsubscribe(&mut self, listener: &Listener) {
        let Some(port) = self.listeners.remove(listener) else {
            debug!("Listener was not subscribed");
            return;
        };
        if self.unbound.remove(listener) {
            return;
        }
        if let Occupant::Service(id) = &self.occupant {
            self.endpoints.unsubscribe(id, port, "", listener);
        }
    }

    fn reconcile(&mut self, resolution: Resolution) {
        if resolution == Resolution::Conflict {
            debug!(
                ip = %self.ip,
                occupant = ?self.occupant,
                "No unique occupant; binding unchanged"
            );
            self.conflicted = true;
            return;
        }
        self.conflicted = false;

        let changed = match resolution {
            Resolution::Service(id) => {
                let changed =
                    !matches!(&self.occupant, Occupant::Service(current) if *current == id);
                if changed {
                    self.bind_service(id);
                }
                changed
            }
            Resolution::Pod(set) => {
                let changed =
                    !matches!(&self.occupant, Occupant::Pod(current) if *current == set);
                if changed {
                    self.bind_pod(set);
                }
                changed
            }
            Resolution::None => match self.occupant {
                Occupant::Service(_) => {
                    self.unbind_service();
                    true
                }
                Occupant::Pod(_) => {
                    self.unbind_pod();
                    true
                }
                Occupant::Empty => false,
            },
            Resolution::Conflict => false,
        };
        if !changed {
            self.attach_unbound();
        }
        self.unbound.clear();
    }

    /// Delivers the unchanged occupant to listeners that subscribed during a conflict.
    fn attach_unbound(&self) {
        for listener in &self.unbound {
            let Some(&port) = self.listeners.get(listener) else {
                continue;
            };
            match &self.occupant {
                Occupant::Service(id) => self.attach_service(id, listener, port),
                Occupant::Pod(set) if !set.is_empty() => listener.add(set.with_port(port)),
                Occupant::Pod(_) | Occupant::Empty => {}
            }
        }
    }

    /// Clears `listener` and registers it for `id`, falling back to the raw IP.
    fn attach_service(&self, id: &ServiceId, listener: &Listener, port: Port) {
        listener.no_endpoints(true);
        if let Err(error) = self.endpoints.subscribe(id, port, "", listener.clone()) {
            warn!(%error, service = %id, port, "Failed to subscribe; falling back to IP");
            self.fallbacks.inc();
            listener.no_endpoints(true);
            listener.add(AddressSet::singleton(self.ip.clone(), port));
        }
    }

    fn bind_service(&mut self, id: ServiceId) {
        debug!(
            ip = %self.ip,
            service = %id,
            listeners = self.listeners.len(),
            "Binding service"
        );
        let prior = std::mem::replace(&mut self.occupant, Occupant::Service(id.clone()));
        for (listener, &port) in &self.listeners {
            if let Occupant::Service(prior) = &prior {
                if !self.unbound.contains(listener) {
                    self.endpoints.unsubscribe(prior, port, "", listener);
                }
            }
            self.attach_service(&id, listener, port);
        }
    }

    fn bind_pod(&mut self, set: AddressSet) {
        debug!(ip = %self.ip, listeners = self.listeners.len(), "Binding pod");
        let prior = std::mem::take(&mut self.occupant);
        for (listener, &port) in &self.listeners {
            if let Occupant::Service(prior) = &prior {
                if !self.unbound.contains(listener) {
                    // The listener may hold the service's addresses, which the pod's address
                    // would not replace.
                    self.endpoints.unsubscribe(prior, port, "", listener);
                    listener.no_endpoints(true);
                    if set.is_empty() {
                        listener.add(AddressSet::singleton(self.ip.clone(), port));
                    }
                }
            }
            if !set.is_empty() {
                trace!(?listener, port, "Delivering pod");
                listener.add(set.with_port(port));
            }
        }
        self.occupant = Occupant::Pod(set);
    }

    fn unbind_service(&mut self) {
        let Occupant::Service(prior) = std::mem::take(&mut self.occupant) else {
            return;
        };
        debug!(
            ip = %self.ip,
            service = %prior,
            listeners = self.listeners.len(),
            "Unbinding service"
        );
        for (listener, &port) in &self.listeners {
            // Unbound listeners already hold the raw IP.
            if self.unbound.contains(listener) {
                continue;
            }
            self.endpoints.unsubscribe(&prior, port, "", listener);
            listener.no_endpoints(true);
            listener.add(AddressSet::singleton(self.ip.clone(), port));
        }
    }

    fn unbind_pod(&mut self) {
        debug!(ip = %self.ip, listeners = self.listeners.len(), "Unbinding pod");
        self.occupant = Occupant::Empty;
        for (listener, &port) in &self.listeners {
            if self.unbound.contains(listener) {
                continue;
            }
            listener.no_endpoints(true);
            listener.add(AddressSet::singleton(self.ip.clone(), port));
        }
    }
}
