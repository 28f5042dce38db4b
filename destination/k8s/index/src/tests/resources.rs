use super::*;
use crate::{Conflict, Resolution};
use linkerd_destination_core::PodId;

#[test]
fn resolves_services_and_pods() {
    let mut test = TestConfig::default();
    test.apply_service(mk_service("ns", "svc", "10.96.0.10"));
    test.apply_pod(mk_pod("ns", "pod-0", "10.0.0.9"));
    let resources = test.index.resources();

    assert_eq!(
        resources.resolve("10.96.0.10"),
        Resolution::Service(ServiceId::new("ns", "svc"))
    );
    match resources.resolve("10.0.0.9") {
        Resolution::Pod(set) => {
            assert_eq!(addrs(&set), vec![("10.0.0.9".to_string(), 0)]);
            assert!(set.addresses.contains_key(&PodId::new("ns", "pod-0")));
        }
        other => panic!("unexpected resolution: {other:?}"),
    }
    assert_eq!(resources.resolve("10.0.0.1"), Resolution::None);
}

#[test]
fn point_lookups() {
    let mut test = TestConfig::default();
    test.apply_service(mk_service("ns", "svc", "10.96.0.10"));
    test.apply_pod(mk_pod("ns", "pod-0", "10.0.0.9"));
    let resources = test.index.resources();

    assert_eq!(
        resources.service_for_ip("10.96.0.10"),
        Ok(Some(ServiceId::new("ns", "svc")))
    );
    assert_eq!(resources.service_for_ip("10.0.0.9"), Ok(None));

    let pod = resources
        .pod_for_ip("10.0.0.9")
        .expect("pod must not conflict")
        .expect("pod must be indexed");
    assert_eq!(pod.metadata.name.as_deref(), Some("pod-0"));
    assert_eq!(resources.pod_for_ip("10.96.0.10"), Ok(None));
}

#[test]
fn conflicting_services() {
    init_tracing();
    let mut test = TestConfig::default();
    test.apply_service(mk_service("ns", "a", "10.96.0.10"));
    test.apply_service(mk_service("ns", "b", "10.96.0.10"));
    let resources = test.index.resources();

    let Conflict { ip, first, second } = resources
        .service_for_ip("10.96.0.10")
        .expect_err("lookup must conflict");
    assert_eq!(ip, "10.96.0.10");
    let mut occupants = vec![first, second];
    occupants.sort();
    assert_eq!(occupants, vec!["service ns/a", "service ns/b"]);

    // The conflicting event is counted once; lookups are not counted.
    assert_eq!(resources.conflicts.get(), 1);
    assert_eq!(resources.resolve("10.96.0.10"), Resolution::Conflict);
    assert_eq!(resources.conflicts.get(), 1);
}

#[test]
fn service_and_pod_on_one_ip_conflict() {
    let mut test = TestConfig::default();
    test.apply_service(mk_service("ns", "svc", "10.0.0.7"));
    test.apply_pod(mk_pod("ns", "pod-0", "10.0.0.7"));
    let resources = test.index.resources();

    assert_eq!(resources.resolve("10.0.0.7"), Resolution::Conflict);
    // Point lookups only consider their own kind.
    assert_eq!(
        resources.service_for_ip("10.0.0.7"),
        Ok(Some(ServiceId::new("ns", "svc")))
    );
    assert!(matches!(resources.pod_for_ip("10.0.0.7"), Ok(Some(_))));
}

#[test]
fn terminated_pods_are_indexed_but_not_resolved() {
    let mut test = TestConfig::default();
    test.apply_pod(with_phase(mk_pod("ns", "a", "10.0.0.2"), "Failed"));
    test.apply_pod(with_phase(mk_pod("ns", "b", "10.0.0.2"), "Succeeded"));
    let resources = test.index.resources();

    assert_eq!(resources.pods_len(), 2);
    assert_eq!(resources.resolve("10.0.0.2"), Resolution::None);
    assert_eq!(resources.pod_for_ip("10.0.0.2"), Ok(None));
}

#[test]
fn pods_without_ips_are_not_indexed() {
    let mut test = TestConfig::default();
    let mut pod = mk_pod("ns", "pending", "");
    test.apply_pod(pod.clone());
    assert_eq!(test.index.resources().pods_len(), 0);

    pod.status = None;
    test.apply_pod(pod);
    assert_eq!(test.index.resources().pods_len(), 0);
}

#[test]
fn pod_ip_change_is_tracked() {
    let mut test = TestConfig::default();
    test.apply_pod(mk_pod("ns", "pod-0", "10.0.0.9"));
    test.apply_pod(mk_pod("ns", "pod-0", "10.0.0.10"));
    let resources = test.index.resources();

    assert_eq!(resources.pods_len(), 1);
    assert_eq!(resources.resolve("10.0.0.9"), Resolution::None);
    assert!(matches!(resources.resolve("10.0.0.10"), Resolution::Pod(_)));

    test.delete_pod("ns", "pod-0");
    assert_eq!(test.index.resources().pods_len(), 0);
    assert_eq!(test.index.resources().resolve("10.0.0.10"), Resolution::None);
}

#[test]
fn service_losing_cluster_ip_is_removed() {
    let mut test = TestConfig::default();
    test.apply_service(mk_service("ns", "svc", "10.96.0.10"));
    test.apply_service(mk_service("ns", "svc", ""));

    assert_eq!(test.index.resources().services_len(), 0);
    assert_eq!(test.index.resources().resolve("10.96.0.10"), Resolution::None);
}

#[test]
fn conflicting_pod_event_is_counted_once() {
    init_tracing();
    let mut test = TestConfig::default();
    test.apply_pod(mk_pod("ns", "a", "10.0.0.2"));
    let (ips, _ip_updates) = listener();
    let (pods, _pod_updates) = listener();
    test.index
        .ip_watcher()
        .subscribe("10.0.0.2", 80, ips)
        .unwrap();
    test.index.pod_watcher().subscribe("10.0.0.2", 80, pods);

    // Both watchers observe the IP, but the event reports one conflict.
    test.apply_pod(mk_pod("ns", "b", "10.0.0.2"));
    assert_eq!(test.index.resources().conflicts.get(), 1);

    test.apply_pod(mk_pod("ns", "c", "10.0.0.2"));
    assert_eq!(test.index.resources().conflicts.get(), 2);
}
