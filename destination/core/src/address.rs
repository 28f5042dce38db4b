use crate::{PodId, Port};
use linkerd_destination_k8s_api::Pod;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// A single resolved endpoint.
///
/// Addresses are rebuilt on every resolution; an update replaces an address rather than
/// modifying it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Address {
    pub ip: String,
    pub port: Port,

    /// The pod backing this address, when the address was resolved from one.
    pub pod: Option<Arc<Pod>>,

    /// The kind of the pod's owning controller, e.g. `deployment`.
    pub owner_kind: String,
    pub owner_name: String,
}

/// A set of addresses keyed by the identity of the pod backing each address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AddressSet {
    pub addresses: HashMap<PodId, Address>,

    /// Labels describing the set as a whole.
    pub labels: BTreeMap<String, String>,
}

// === impl AddressSet ===

impl AddressSet {
    /// Builds a set holding only the raw `ip:port`, for when nothing richer is known about an IP.
    ///
    /// The address is keyed by the empty pod ID.
    pub fn singleton(ip: impl Into<String>, port: Port) -> Self {
        let addr = Address {
            ip: ip.into(),
            port,
            ..Default::default()
        };
        Self {
            addresses: Some((PodId::default(), addr)).into_iter().collect(),
            labels: BTreeMap::new(),
        }
    }

    /// Returns a copy of this set with `port` set on every address.
    pub fn with_port(&self, port: Port) -> Self {
        let addresses = self
            .addresses
            .iter()
            .map(|(id, addr)| {
                let addr = Address {
                    port,
                    ..addr.clone()
                };
                (id.clone(), addr)
            })
            .collect();
        Self {
            addresses,
            labels: self.labels.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton() {
        let set = AddressSet::singleton("10.0.0.5", 80);
        assert_eq!(set.len(), 1);
        assert!(set.labels.is_empty());
        let addr = set.addresses.get(&PodId::default()).expect("keyed by the empty id");
        assert_eq!(addr.ip, "10.0.0.5");
        assert_eq!(addr.port, 80);
        assert!(addr.pod.is_none());
    }

    #[test]
    fn with_port_stamps_every_address() {
        let mut set = AddressSet::default();
        for (name, ip) in [("pod-a", "10.0.0.1"), ("pod-b", "10.0.0.2")] {
            set.addresses.insert(
                PodId::new("ns", name),
                Address {
                    ip: ip.to_string(),
                    owner_kind: "deployment".to_string(),
                    owner_name: "web".to_string(),
                    ..Default::default()
                },
            );
        }
        set.labels.insert("namespace".to_string(), "ns".to_string());

        let stamped = set.with_port(8080);
        assert_eq!(stamped.len(), 2);
        assert_eq!(stamped.labels, set.labels);
        for (id, addr) in &stamped.addresses {
            assert_eq!(addr.port, 8080, "{id}");
            assert_eq!(addr.ip, set.addresses[id].ip);
            assert_eq!(addr.owner_name, "web");
        }

        // The source set is left port-less.
        assert!(set.addresses.values().all(|addr| addr.port == 0));
    }
}
