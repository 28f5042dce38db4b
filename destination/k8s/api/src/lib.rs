#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod pod;
pub mod service;

pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Pod, PodSpec, PodStatus, Service, ServiceSpec},
    },
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
};
pub use kube::{Resource, ResourceExt};
