/// Holds cluster metadata.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The namespace where the linkerd control plane is deployed.
    ///
    /// Resources in this namespace are never indexed by IP.
    pub control_plane_ns: String,
}

impl ClusterInfo {
    pub(crate) fn is_excluded(&self, ns: &str) -> bool {
        ns == self.control_plane_ns
    }
}
