use crate::{
    resources::{Moved, ResourceIndex, SharedResourceIndex},
    ClusterInfo, IpWatcher, PodWatcher,
};
use kubert::index::IndexNamespacedResource;
use linkerd_destination_core::{EndpointResolver, Id};
use linkerd_destination_k8s_api as k8s;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{instrument, trace};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Applies `Service` and `Pod` events to the resource index and then to the watchers whose IPs
/// they affect.
///
/// An `Index` is a cheap handle. Each resource kind should be driven through its own
/// [`SharedIndex`] (see [`Index::shared`]) so that service and pod events are processed
/// concurrently.
#[derive(Clone, Debug)]
pub struct Index {
    resources: SharedResourceIndex,
    ips: Arc<IpWatcher>,
    pods: Arc<PodWatcher>,
}

// === impl Index ===

impl Index {
    pub fn new(cluster_info: Arc<ClusterInfo>, endpoints: Arc<dyn EndpointResolver>) -> Self {
        let resources = ResourceIndex::shared(cluster_info);
        Self {
            ips: Arc::new(IpWatcher::new(resources.clone(), endpoints)),
            pods: Arc::new(PodWatcher::new(resources.clone())),
            resources,
        }
    }

    /// Returns a new lock-wrapped handle, suitable for `kubert::index::namespaced`.
    pub fn shared(&self) -> SharedIndex {
        Arc::new(RwLock::new(self.clone()))
    }

    pub fn ip_watcher(&self) -> &Arc<IpWatcher> {
        &self.ips
    }

    pub fn pod_watcher(&self) -> &Arc<PodWatcher> {
        &self.pods
    }

    pub fn resources(&self) -> &SharedResourceIndex {
        &self.resources
    }

    fn reconcile(&self, Moved { released, claimed }: Moved) {
        if let Some(ip) = released {
            trace!(%ip, "released");
            self.ips.reconcile_existing(&ip);
            self.pods.refresh(&ip);
        }
        if let Some(ip) = claimed {
            trace!(%ip, "claimed");
            self.resources.report_conflict(&ip);
            self.ips.reconcile(&ip);
            self.pods.refresh(&ip);
        }
    }
}

impl IndexNamespacedResource<k8s::Service> for Index {
    #[instrument(skip_all, fields(
        namespace = ?service.metadata.namespace,
        name = ?service.metadata.name,
    ))]
    fn apply(&mut self, service: k8s::Service) {
        let moved = self.resources.apply_service(service);
        self.reconcile(moved);
    }

    #[instrument(skip(self))]
    fn delete(&mut self, namespace: String, name: String) {
        if let Some(ip) = self.resources.delete_service(namespace, name) {
            self.ips.reconcile_existing(&ip);
        }
    }
}

impl IndexNamespacedResource<k8s::Pod> for Index {
    #[instrument(skip_all, fields(
        namespace = ?pod.metadata.namespace,
        name = ?pod.metadata.name,
    ))]
    fn apply(&mut self, pod: k8s::Pod) {
        let moved = self.resources.apply_pod(pod);
        self.reconcile(moved);
    }

    #[instrument(skip(self))]
    fn delete(&mut self, namespace: String, name: String) {
        let id = Id::new(namespace, name);
        if let Some(ip) = self
            .resources
            .delete_pod(id.namespace.clone(), id.name.clone())
        {
            self.ips.reconcile_existing(&ip);
            self.pods.delete(&ip, &id);
        }
    }
}
