use crate::Pod;

/// Pods in these phases have released their IP, which may already belong to a new pod.
const TERMINAL_PHASES: [&str; 2] = ["Succeeded", "Failed"];

/// Label the deployment controller stamps on the pods of each `ReplicaSet`.
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

pub fn is_terminated(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(|phase| TERMINAL_PHASES.contains(&phase))
        .unwrap_or(false)
}

/// Host-network pods share their node's IP, so the IP does not identify the pod.
pub fn uses_host_network(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.host_network)
        .unwrap_or(false)
}

/// Returns the pod's primary IP once one has been assigned.
pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|status| status.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}
