use crate::{
    controller::{self, Context},
    k8s::{ClusterEnvironment, RegisteredService, ServiceCatalog, ServiceClaim, ServiceClass},
    lease,
    reconcile::{
        is_triggered_by, AgentImages, CatalogReconciler, ClaimReconciler, EnvironmentReconciler,
        RegisteredServiceReconciler, ServiceClassReconciler, Watches,
    },
    store::{KubeConnector, KubeStore},
};
use anyhow::{bail, Context as _, Result};
use clap::Parser;
use kube::{
    runtime::{reflector::ObjectRef, watcher, Controller},
    Api,
};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

const MIN_HEALTH_CHECK_INTERVAL: u64 = 10;

#[derive(Debug, Parser)]
#[clap(
    name = "binding-controller",
    about = "Resolves service claims and keeps worker clusters in sync"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "binding=info,warn",
        env = "BINDING_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The control-plane namespace holding environments, services and claims.
    #[clap(long, default_value = "binding-system", env = "WATCH_NAMESPACE")]
    namespace: String,

    /// Image of the agent run in application namespaces.
    #[clap(long, default_value = "", env = "AGENT_APP_IMAGE")]
    app_agent_image: String,

    /// Image of the agent run in service namespaces.
    #[clap(long, default_value = "", env = "AGENT_SVC_IMAGE")]
    svc_agent_image: String,

    /// Seconds between health checks of the cluster environments. Values
    /// below the minimum are raised to it.
    #[clap(long, default_value = "600", env = "HEALTH_CHECK_INTERVAL")]
    health_check_interval: u64,

    /// Seconds before a failed or deferred reconciliation is retried.
    #[clap(long, default_value = "10")]
    requeue_after: u64,

    #[clap(long, default_value = "binding-controller-write")]
    lease_name: String,

    #[clap(long, default_value = "binding-controller")]
    controller_deployment_name: String,
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
            namespace,
            app_agent_image,
            svc_agent_image,
            health_check_interval,
            requeue_after,
            lease_name,
            controller_deployment_name,
        } = self;
        let requeue_after = Duration::from_secs(requeue_after);

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder())
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("Failed to fetch `HOSTNAME` environment variable")?;

        let claims = lease::init(
            &runtime,
            &namespace,
            &lease_name,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        let store = KubeStore::new(runtime.client());
        let connector = KubeConnector::new(store.clone());
        let watches = Arc::new(Watches::default());
        let images = AgentImages {
            application: app_agent_image,
            service: svc_agent_image,
        };

        let client = runtime.client();
        let config = watcher::Config::default();

        // Claims are also reconciled when a service they may bind to changes.
        let claims_ctl = Controller::new(
            Api::<ServiceClaim>::namespaced(client.clone(), &namespace),
            config.clone(),
        );
        let claim_store = claims_ctl.store();
        let claims_ctl = claims_ctl.watches(
            Api::<RegisteredService>::namespaced(client.clone(), &namespace),
            config.clone(),
            move |service| {
                claim_store
                    .state()
                    .into_iter()
                    .filter(|claim| is_triggered_by(claim, &service))
                    .map(|claim| ObjectRef::from_obj(&*claim))
                    .collect::<Vec<_>>()
            },
        );
        tokio::spawn(
            controller::run(
                claims_ctl,
                Context::new(
                    ClaimReconciler::new(store.clone(), connector.clone()),
                    claims.clone(),
                    hostname.clone(),
                    requeue_after,
                ),
            )
            .instrument(info_span!("serviceclaims")),
        );

        tokio::spawn(
            controller::run(
                Controller::new(
                    Api::<RegisteredService>::namespaced(client.clone(), &namespace),
                    config.clone(),
                ),
                Context::new(
                    RegisteredServiceReconciler::new(store.clone()),
                    claims.clone(),
                    hostname.clone(),
                    requeue_after,
                ),
            )
            .instrument(info_span!("registeredservices")),
        );

        tokio::spawn(
            controller::run(
                Controller::new(
                    Api::<ServiceCatalog>::namespaced(client.clone(), &namespace),
                    config.clone(),
                ),
                Context::new(
                    CatalogReconciler::new(store.clone(), connector.clone()),
                    claims.clone(),
                    hostname.clone(),
                    requeue_after,
                ),
            )
            .instrument(info_span!("servicecatalogs")),
        );

        tokio::spawn(
            controller::run(
                Controller::new(
                    Api::<ServiceClass>::namespaced(client.clone(), &namespace),
                    config.clone(),
                ),
                Context::new(
                    ServiceClassReconciler::new(store.clone(), connector.clone()),
                    claims.clone(),
                    hostname.clone(),
                    requeue_after,
                ),
            )
            .instrument(info_span!("serviceclasses")),
        );

        let environments = Context::new(
            EnvironmentReconciler::new(store.clone(), connector.clone(), images, watches),
            claims.clone(),
            hostname.clone(),
            requeue_after,
        );
        tokio::spawn(
            controller::run(
                Controller::new(
                    Api::<ClusterEnvironment>::namespaced(client, &namespace),
                    config,
                ),
                environments.clone(),
            )
            .instrument(info_span!("clusterenvironments")),
        );
        tokio::spawn(
            controller::monitor(
                environments,
                namespace,
                Duration::from_secs(health_check_interval.max(MIN_HEALTH_CHECK_INTERVAL)),
            )
            .instrument(info_span!("healthcheck")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
