//! Pod -> owning workload

use linkerd_destination_core::{Address, AddressSet, PodId};
use linkerd_destination_k8s_api::{self as k8s, pod::POD_TEMPLATE_HASH_LABEL, ResourceExt};
use std::sync::Arc;

/// Builds the single-address set for a pod.
///
/// The port is left unset; it is stamped per-subscription at delivery time.
pub(crate) fn pod_address_set(pod: Arc<k8s::Pod>, ip: &str) -> AddressSet {
    let namespace = pod.namespace().unwrap_or_default();
    let name = pod.name_any();
    let (owner_kind, owner_name) = owner_kind_and_name(&pod);
    let addr = Address {
        ip: ip.to_string(),
        port: 0,
        pod: Some(pod),
        owner_kind,
        owner_name,
    };
    AddressSet {
        addresses: Some((PodId::new(namespace.clone(), name), addr))
            .into_iter()
            .collect(),
        labels: Some(("namespace".to_string(), namespace)).into_iter().collect(),
    }
}

/// Returns the lowercased kind and the name of the workload that controls `pod`.
///
/// Pods owned by a `ReplicaSet` that a `Deployment` manages are attributed to the deployment;
/// pods with no owner are their own workload.
pub(crate) fn owner_kind_and_name(pod: &k8s::Pod) -> (String, String) {
    let refs = pod.owner_references();
    let owner = refs
        .iter()
        .find(|r| r.controller == Some(true))
        .or_else(|| refs.first());

    let Some(owner) = owner else {
        return ("pod".to_string(), pod.name_any());
    };

    if owner.kind == "ReplicaSet" {
        let deployment = pod
            .labels()
            .get(POD_TEMPLATE_HASH_LABEL)
            .and_then(|hash| owner.name.strip_suffix(hash.as_str()))
            .and_then(|name| name.strip_suffix('-'))
            .filter(|name| !name.is_empty());
        if let Some(name) = deployment {
            return ("deployment".to_string(), name.to_string());
        }
    }

    (owner.kind.to_lowercase(), owner.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn pod(owner: Option<(&str, &str)>, hash: Option<&str>) -> k8s::Pod {
        k8s::Pod {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("web-7d4b9c-x2x9z".to_string()),
                labels: hash.map(|h| btreemap! { POD_TEMPLATE_HASH_LABEL.to_string() => h.to_string() }),
                owner_references: owner.map(|(kind, name)| {
                    vec![k8s::OwnerReference {
                        kind: kind.to_string(),
                        name: name.to_string(),
                        controller: Some(true),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn unowned_pod() {
        assert_eq!(
            owner_kind_and_name(&pod(None, None)),
            ("pod".to_string(), "web-7d4b9c-x2x9z".to_string())
        );
    }

    #[test]
    fn deployment_pod() {
        assert_eq!(
            owner_kind_and_name(&pod(Some(("ReplicaSet", "web-7d4b9c")), Some("7d4b9c"))),
            ("deployment".to_string(), "web".to_string())
        );
    }

    #[test]
    fn bare_replicaset_pod() {
        // Without a matching template hash the replicaset is the workload.
        assert_eq!(
            owner_kind_and_name(&pod(Some(("ReplicaSet", "web-7d4b9c")), None)),
            ("replicaset".to_string(), "web-7d4b9c".to_string())
        );
        assert_eq!(
            owner_kind_and_name(&pod(Some(("ReplicaSet", "web-7d4b9c")), Some("abcdef"))),
            ("replicaset".to_string(), "web-7d4b9c".to_string())
        );
    }

    #[test]
    fn other_controllers() {
        assert_eq!(
            owner_kind_and_name(&pod(Some(("StatefulSet", "db")), None)),
            ("statefulset".to_string(), "db".to_string())
        );
        assert_eq!(
            owner_kind_and_name(&pod(Some(("DaemonSet", "agent")), None)),
            ("daemonset".to_string(), "agent".to_string())
        );
    }

    #[test]
    fn address_set_is_portless() {
        let set = pod_address_set(
            Arc::new(pod(Some(("StatefulSet", "db")), None)),
            "10.0.0.9",
        );
        assert_eq!(set.labels.get("namespace").map(String::as_str), Some("ns"));
        let addr = &set.addresses[&PodId::new("ns", "web-7d4b9c-x2x9z")];
        assert_eq!(addr.ip, "10.0.0.9");
        assert_eq!(addr.port, 0);
        assert_eq!(addr.owner_kind, "statefulset");
        assert_eq!(addr.owner_name, "db");
        assert!(addr.pod.is_some());
    }
}
