use crate::{Listener, Port, ServiceId};

/// Resolves a service to the addresses that back it, streaming updates to subscribed listeners.
///
/// The IP watcher calls into the resolver while it holds the lock for a single IP. A resolver
/// must therefore register the listener and return without waiting on the network; the initial
/// address set may be delivered asynchronously.
pub trait EndpointResolver: Send + Sync {
    /// Registers `listener` for the addresses of `service` on `port`.
    ///
    /// `hostname` optionally narrows the subscription to a single named endpoint; it is empty
    /// for IP-based subscriptions.
    fn subscribe(
        &self,
        service: &ServiceId,
        port: Port,
        hostname: &str,
        listener: Listener,
    ) -> anyhow::Result<()>;

    /// Removes a registration previously made with `subscribe`.
    fn unsubscribe(&self, service: &ServiceId, port: Port, hostname: &str, listener: &Listener);
}
