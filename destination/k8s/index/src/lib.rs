//! Linkerd Destination IP Index
//!
//! Proxies may ask the destination service for a bare IP rather than a service name. This crate
//! answers those requests by tracking what each IP currently names:
//!
//! - A `Service` claims its cluster IP. Subscriptions on a cluster IP are forwarded to an
//!   [`EndpointResolver`](linkerd_destination_core::EndpointResolver), which streams the
//!   addresses of the pods backing the service.
//! - A `Pod` claims its pod IP. Subscriptions on a pod IP receive that single pod's address.
//! - When neither claims an IP, subscribers receive the raw IP itself.
//!
//! ```text
//! [ Service | Pod ] -> [ ResourceIndex ] -> [ IpWatcher ] -> [ Listener ]
//!                                      \--> [ PodWatcher ] -> [ Listener ]
//! ```
//!
//! Each IP has its own binding, guarded by its own lock, so that an occupant change and the
//! notifications it produces are observed atomically by every listener on that IP while
//! unrelated IPs proceed concurrently.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster_info;
mod index;
pub mod ip_watcher;
pub mod metrics;
mod owner;
pub mod pod_watcher;
pub mod resources;


pub use self::{
    cluster_info::ClusterInfo,
    index::{Index, SharedIndex},
    ip_watcher::IpWatcher,
    pod_watcher::PodWatcher,
    resources::{Conflict, Resolution, ResourceIndex, SharedResourceIndex},
};
