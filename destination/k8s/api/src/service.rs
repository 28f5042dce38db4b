use crate::Service;

/// The cluster IP value Kubernetes uses for headless services.
const HEADLESS: &str = "None";

/// Returns the service's cluster IP, if it has one.
///
/// Headless services and services whose IP has not yet been allocated have none.
pub fn cluster_ip(service: &Service) -> Option<&str> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != HEADLESS)
}
