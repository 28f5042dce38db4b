//! Services by cluster IP and pods by pod IP.

use crate::{owner, ClusterInfo};
use ahash::AHashMap as HashMap;
use linkerd_destination_core::{AddressSet, Id, ServiceId};
use linkerd_destination_k8s_api as k8s;
use parking_lot::RwLock;
use prometheus_client::metrics::counter::Counter;
use std::{fmt, sync::Arc};
use tracing::{debug, error, trace};

pub type SharedResourceIndex = Arc<ResourceIndex>;

/// Answers "which live resource, if any, currently claims this IP?".
///
/// Services and pods are indexed separately so that service and pod events may be applied
/// concurrently. A lookup holds both read locks only while it collects matches.
#[derive(Debug)]
pub struct ResourceIndex {
    cluster_info: Arc<ClusterInfo>,
    services: RwLock<ByIp<()>>,
    pods: RwLock<ByIp<IndexedPod>>,
    pub(crate) conflicts: Counter,
}

/// The outcome of resolving an IP.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Nothing live claims the IP.
    None,
    Service(ServiceId),
    /// A single pod claims the IP. The set's addresses are port-less.
    Pod(AddressSet),
    /// More than one live resource claims the IP, so there is no unique occupant.
    Conflict,
}

/// Indicates that more than one live resource claims an IP.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("IP address conflict on {ip}: {first}, {second}")]
pub struct Conflict {
    pub ip: String,
    pub first: String,
    pub second: String,
}

/// The IPs affected by an index update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Moved {
    /// An IP the resource no longer claims.
    pub released: Option<String>,
    /// The IP the resource now claims.
    pub claimed: Option<String>,
}

/// Resources of one kind, indexed by IP and by identity.
#[derive(Debug)]
struct ByIp<T> {
    by_ip: HashMap<String, HashMap<Id, T>>,

    /// The IP each resource is indexed under, so that deletions (which only carry a name) can
    /// find the IP.
    ips: HashMap<Id, String>,
}

#[derive(Clone, Debug)]
struct IndexedPod {
    pod: Arc<k8s::Pod>,
    terminated: bool,
    addresses: AddressSet,
}

enum Occupant {
    Service(ServiceId),
    Pod(IndexedPod),
}

// === impl ResourceIndex ===

impl ResourceIndex {
    pub fn shared(cluster_info: Arc<ClusterInfo>) -> SharedResourceIndex {
        Arc::new(Self {
            cluster_info,
            services: Default::default(),
            pods: Default::default(),
            conflicts: Counter::default(),
        })
    }

    /// Resolves the single live occupant of `ip`.
    ///
    /// Terminated pods are ignored, since their IPs may already belong to new pods.
    pub fn resolve(&self, ip: &str) -> Resolution {
        match self.occupant(ip) {
            Ok(None) => Resolution::None,
            Ok(Some(Occupant::Service(id))) => Resolution::Service(id),
            Ok(Some(Occupant::Pod(pod))) => Resolution::Pod(pod.addresses),
            Err(_) => Resolution::Conflict,
        }
    }

    /// Logs and counts a conflict on `ip`, if there is one.
    pub(crate) fn report_conflict(&self, ip: &str) {
        if let Err(error) = self.occupant(ip) {
            error!(%error, "No unique occupant");
            self.conflicts.inc();
        }
    }

    /// Returns the service whose cluster IP is `ip`.
    pub fn service_for_ip(&self, ip: &str) -> Result<Option<ServiceId>, Conflict> {
        let services = self.services.read();
        let found = unique(
            ip,
            services.get(ip).map(|(id, _)| Occupant::Service(id.clone())),
        )?;
        Ok(found.and_then(|o| match o {
            Occupant::Service(id) => Some(id),
            Occupant::Pod(_) => None,
        }))
    }

    /// Returns the live pod whose IP is `ip`.
    pub fn pod_for_ip(&self, ip: &str) -> Result<Option<Arc<k8s::Pod>>, Conflict> {
        let pods = self.pods.read();
        let found = unique(ip, pods.live(ip).map(|(_, pod)| Occupant::Pod(pod.clone())))?;
        Ok(found.and_then(|o| match o {
            Occupant::Pod(pod) => Some(pod.pod),
            Occupant::Service(_) => None,
        }))
    }

    pub fn services_len(&self) -> usize {
        self.services.read().len()
    }

    pub fn pods_len(&self) -> usize {
        self.pods.read().len()
    }

    pub(crate) fn apply_service(&self, service: k8s::Service) -> Moved {
        let Some(id) = self.id_of(&service, "service") else {
            return Moved::default();
        };

        let mut services = self.services.write();
        match k8s::service::cluster_ip(&service) {
            Some(ip) => {
                trace!(service = %id, %ip, "indexing service");
                let released = services.insert(id, ip.to_string(), ());
                Moved {
                    released,
                    claimed: Some(ip.to_string()),
                }
            }
            None => {
                trace!(service = %id, "service has no cluster IP");
                Moved {
                    released: services.remove(&id),
                    claimed: None,
                }
            }
        }
    }

    pub(crate) fn delete_service(&self, namespace: String, name: String) -> Option<String> {
        self.services.write().remove(&Id::new(namespace, name))
    }

    pub(crate) fn apply_pod(&self, pod: k8s::Pod) -> Moved {
        let Some(id) = self.id_of(&pod, "pod") else {
            return Moved::default();
        };

        if k8s::pod::uses_host_network(&pod) {
            trace!(pod = %id, "ignoring host-network pod");
            return Moved {
                released: self.pods.write().remove(&id),
                claimed: None,
            };
        }

        let Some(ip) = k8s::pod::pod_ip(&pod).map(str::to_string) else {
            trace!(pod = %id, "pod has not been assigned an IP");
            return Moved {
                released: self.pods.write().remove(&id),
                claimed: None,
            };
        };

        let terminated = k8s::pod::is_terminated(&pod);
        trace!(pod = %id, %ip, terminated, "indexing pod");
        let pod = Arc::new(pod);
        let indexed = IndexedPod {
            addresses: owner::pod_address_set(pod.clone(), &ip),
            pod,
            terminated,
        };
        let released = self.pods.write().insert(id, ip.clone(), indexed);
        Moved {
            released,
            claimed: Some(ip),
        }
    }

    pub(crate) fn delete_pod(&self, namespace: String, name: String) -> Option<String> {
        self.pods.write().remove(&Id::new(namespace, name))
    }

    fn occupant(&self, ip: &str) -> Result<Option<Occupant>, Conflict> {
        let services = self.services.read();
        let pods = self.pods.read();
        let occupants = services
            .get(ip)
            .map(|(id, _)| Occupant::Service(id.clone()))
            .chain(pods.live(ip).map(|(_, pod)| Occupant::Pod(pod.clone())));
        unique(ip, occupants)
    }

    /// Returns the resource's identity if it should be indexed at all.
    fn id_of<R>(&self, resource: &R, kind: &str) -> Option<Id>
    where
        R: k8s::Resource,
    {
        let meta = resource.meta();
        let (Some(namespace), Some(name)) = (meta.namespace.as_ref(), meta.name.as_ref()) else {
            error!(
                namespace = ?meta.namespace,
                name = ?meta.name,
                %kind,
                "dropping resource without a namespaced name"
            );
            return None;
        };
        if self.cluster_info.is_excluded(namespace) {
            debug!(%namespace, %name, %kind, "ignoring control plane resource");
            return None;
        }
        Some(Id::new(namespace.clone(), name.clone()))
    }
}

/// Returns the only item in `occupants`, failing if there is more than one.
fn unique(
    ip: &str,
    mut occupants: impl Iterator<Item = Occupant>,
) -> Result<Option<Occupant>, Conflict> {
    let Some(first) = occupants.next() else {
        return Ok(None);
    };
    match occupants.next() {
        None => Ok(Some(first)),
        Some(second) => Err(Conflict {
            ip: ip.to_string(),
            first: first.to_string(),
            second: second.to_string(),
        }),
    }
}

// === impl ByIp ===

impl<T> Default for ByIp<T> {
    fn default() -> Self {
        Self {
            by_ip: HashMap::default(),
            ips: HashMap::default(),
        }
    }
}

impl<T> ByIp<T> {
    /// Indexes `id` under `ip`, returning the IP it was previously indexed under if that differs.
    fn insert(&mut self, id: Id, ip: String, value: T) -> Option<String> {
        let released = match self.ips.insert(id.clone(), ip.clone()) {
            Some(prior) if prior != ip => {
                self.unlink(&prior, &id);
                Some(prior)
            }
            _ => None,
        };
        self.by_ip.entry(ip).or_default().insert(id, value);
        released
    }

    /// Removes `id`, returning the IP it was indexed under.
    fn remove(&mut self, id: &Id) -> Option<String> {
        let ip = self.ips.remove(id)?;
        self.unlink(&ip, id);
        Some(ip)
    }

    fn unlink(&mut self, ip: &str, id: &Id) {
        if let Some(ids) = self.by_ip.get_mut(ip) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_ip.remove(ip);
            }
        }
    }

    fn get(&self, ip: &str) -> impl Iterator<Item = (&Id, &T)> {
        self.by_ip.get(ip).into_iter().flat_map(|ids| ids.iter())
    }

    fn len(&self) -> usize {
        self.ips.len()
    }
}

impl ByIp<IndexedPod> {
    fn live(&self, ip: &str) -> impl Iterator<Item = (&Id, &IndexedPod)> {
        self.get(ip).filter(|(_, pod)| !pod.terminated)
    }
}

// === impl Occupant ===

impl fmt::Display for Occupant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(id) => write!(f, "service {id}"),
            Self::Pod(pod) => match pod.addresses.addresses.keys().next() {
                Some(id) => write!(f, "pod {id}"),
                None => write!(f, "pod"),
            },
        }
    }
}
