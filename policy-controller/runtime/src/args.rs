use crate::{
    admission::{Admission, AdmissionMetrics},
    index, k8s, lease, reconciler,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "sovereignty-controller",
    about = "Enforces geographic residency policies"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "sovereignty=info,warn",
        env = "SOVEREIGNTY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    #[clap(long, default_value = "federated-sovereignty-system")]
    controller_namespace: String,

    /// The Deployment that owns the write Lease.
    #[clap(long, default_value = "sovereignty-controller")]
    controller_deployment_name: String,

    #[clap(
        long,
        default_value = "5000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    patch_timeout_ms: u64,

    /// How often policies are checked for a passed expiry date.
    #[clap(
        long,
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    expiry_check_interval_secs: u64,

    #[clap(long, default_value = "5000")]
    retry_base_delay_ms: u64,

    #[clap(long, default_value = "6")]
    retry_factor: u32,

    /// The number of retries of a failed write before a policy fails.
    #[clap(long, default_value = "2")]
    retry_limit: u32,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            controller_namespace,
            controller_deployment_name,
            patch_timeout_ms,
            expiry_check_interval_secs,
            retry_base_delay_ms,
            retry_factor,
            retry_limit,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        // The index is populated by the watches below and published to the
        // reconciler as events.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let index = index::Index::shared(events_tx.clone());

        let mut prom = <Registry>::default();
        let controller_metrics = reconciler::ControllerMetrics::register(
            prom.sub_registry_with_prefix("sovereignty_controller"),
        );
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("sovereignty"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("Failed to fetch `HOSTNAME` environment variable")?;

        let claims = lease::init(
            &runtime,
            &controller_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        // Spawn resource watches.

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), namespaces).instrument(info_span!("namespaces")),
        );

        let policies =
            runtime.watch_all::<k8s::policy::SovereignPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), policies)
                .instrument(info_span!("sovereignpolicies")),
        );

        tokio::spawn(
            reconciler::expiry::run(
                index.clone(),
                events_tx,
                Duration::from_secs(expiry_check_interval_secs),
            )
            .instrument(info_span!("expiry")),
        );

        let store = reconciler::KubeStore::new(
            runtime.client(),
            Duration::from_millis(patch_timeout_ms),
        );
        let backoff = reconciler::Backoff {
            base: Duration::from_millis(retry_base_delay_ms),
            factor: retry_factor,
            limit: retry_limit,
        };
        let controller = reconciler::Controller::new(
            store,
            index.clone(),
            claims,
            hostname,
            backoff,
            controller_metrics,
        );
        tokio::spawn(
            controller
                .run(events_rx)
                .instrument(info_span!("controller")),
        );

        info!(namespace = %controller_namespace, "Sovereignty controller started");
        let runtime = runtime.spawn_server(move || {
            Admission::new(index.clone(), admission_metrics.clone())
        });

        // Block the main thread on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
