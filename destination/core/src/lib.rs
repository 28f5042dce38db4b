//! Types shared by the destination service's IP watchers.
//!
//! A proxy that needs a route to a bare IP subscribes an [`EndpointUpdateListener`] for that IP.
//! The watchers decide what the IP currently names and stream [`AddressSet`]s to the listener
//! accordingly. Service resolution itself is delegated to an [`EndpointResolver`].

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod address;
mod id;
mod listener;
mod resolver;

pub use self::{
    address::{Address, AddressSet},
    id::{Id, PodId, ServiceId},
    listener::{EndpointUpdateListener, Listener},
    resolver::EndpointResolver,
};

/// A numeric port.
pub type Port = u32;
