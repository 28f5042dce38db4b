use crate::Index;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(Index);

pub fn register(reg: &mut Registry, index: &Index) {
    reg.register(
        "ip_conflicts",
        "Count of resource events that left an IP claimed by more than one live resource",
        index.resources().conflicts.clone(),
    );
    reg.register(
        "resolver_fallbacks",
        "Count of listeners that fell back to a raw IP after a failed service subscription",
        index.ip_watcher().fallbacks.clone(),
    );
    reg.register_collector(Box::new(Instrumented(index.clone())));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let gauges = [
            (
                "bindings",
                "The number of IPs with a binding",
                self.0.ip_watcher().bindings_len(),
            ),
            (
                "listeners",
                "The number of listeners subscribed by IP",
                self.0.ip_watcher().listeners_len(),
            ),
            (
                "services_index_size",
                "The number of services indexed by cluster IP",
                self.0.resources().services_len(),
            ),
            (
                "pods_index_size",
                "The number of pods indexed by pod IP",
                self.0.resources().pods_len(),
            ),
        ];

        for (name, help, value) in gauges {
            let gauge_encoder = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            ConstGauge::new(value as i64).encode(gauge_encoder)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tests::*, ClusterInfo};
    use kubert::index::IndexNamespacedResource;
    use prometheus_client::encoding::text::encode;
    use std::sync::Arc;

    #[test]
    fn encodes_index_sizes() {
        let resolver = Arc::new(TestResolver::default());
        let mut index = Index::new(
            Arc::new(ClusterInfo {
                control_plane_ns: "linkerd".to_string(),
            }),
            resolver,
        );
        let mut reg = Registry::default();
        register(reg.sub_registry_with_prefix("ip_watcher"), &index);

        index.apply(mk_service("ns", "svc", "10.96.0.1"));
        index.apply(mk_pod("ns", "pod-0", "10.0.0.1"));

        let mut out = String::new();
        encode(&mut out, &reg).unwrap();
        assert!(out.contains("ip_watcher_bindings 2"), "{out}");
        assert!(out.contains("ip_watcher_services_index_size 1"), "{out}");
        assert!(out.contains("ip_watcher_pods_index_size 1"), "{out}");
        assert!(out.contains("ip_watcher_listeners 0"), "{out}");
        assert!(out.contains("ip_watcher_ip_conflicts_total 0"), "{out}");
    }
}
