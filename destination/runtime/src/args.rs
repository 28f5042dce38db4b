use crate::{
    core::EndpointResolver,
    index::{self, ClusterInfo, Index},
    k8s,
};
use anyhow::{bail, Result};
use futures::prelude::*;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, clap::Parser)]
#[clap(name = "destination", about = "Resolves destination lookups by IP address")]
pub struct Args {
    #[clap(
        long,
        default_value = "linkerd=info,warn",
        env = "LINKERD_DESTINATION_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Resources in this namespace are never resolved by IP.
    #[clap(long, default_value = "linkerd")]
    control_plane_namespace: String,
}

impl Args {
    /// Runs the IP index until the process is signaled to shut down.
    ///
    /// Services are subscribed through `endpoints`. `serve` is spawned once the watches are
    /// running and is handed the index and a shutdown handle.
    pub async fn run<F, S>(self, endpoints: Arc<dyn EndpointResolver>, serve: F) -> Result<()>
    where
        F: FnOnce(Index, drain::Watch) -> S,
        S: Future<Output = Result<()>> + Send + 'static,
    {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            control_plane_namespace,
        } = self;

        let cluster_info = Arc::new(ClusterInfo {
            control_plane_ns: control_plane_namespace,
        });
        let index = Index::new(cluster_info, endpoints);

        let mut prom = <Registry>::default();
        index::metrics::register(prom.sub_registry_with_prefix("ip_watcher"), &index);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Services and pods are indexed through separate handles so that neither kind's
        // events wait on the other's.
        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.shared(), services)
                .instrument(info_span!("services")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.shared(), pods).instrument(info_span!("pods")),
        );

        let server = serve(index, runtime.shutdown_handle());
        tokio::spawn(
            async move {
                if let Err(error) = server.await {
                    error!(%error, "Server failed");
                }
            }
            .instrument(info_span!("serve")),
        );

        info!("Watching services and pods");

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
