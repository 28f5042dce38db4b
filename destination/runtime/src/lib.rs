#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use linkerd_destination_core as core;
pub use linkerd_destination_k8s_api as k8s;
pub use linkerd_destination_k8s_index as index;

mod args;

pub use self::args::Args;
