use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::action::ActionArgs;
use crate::config::ActionConfig;
use crate::config::DaemonArgs;
use crate::config::LeaseConfig;
use crate::domain::action::ResizeExecutor;
use crate::domain::lease::LeaseRegistry;
use crate::infrastructure::k8s::KubeCluster;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let lease_config = LeaseConfig::from(&self.daemon_args);
        let lease_registry = Arc::new(LeaseRegistry::new(lease_config.ttl));
        let executor = create_executor(
            self.daemon_args.kubeconfig.clone(),
            &self.daemon_args.action,
            Arc::clone(&lease_registry),
        )
        .await?;

        let services = ApplicationServices {
            executor,
            lease_registry,
        };
        Ok(Application::new(services, self.daemon_args))
    }
}

/// Connect to the cluster and create an executor sharing `lease_registry`.
pub async fn create_executor(
    kubeconfig: Option<PathBuf>,
    tunables: &ActionArgs,
    lease_registry: Arc<LeaseRegistry>,
) -> Result<Arc<ResizeExecutor>> {
    let cluster = KubeCluster::connect(kubeconfig.as_deref())
        .await
        .map_err(|report| anyhow::anyhow!("{report:?}"))?;
    let cluster = Arc::new(cluster);

    let config = ActionConfig::from(tunables);
    tracing::info!(?config, "action configuration");
    Ok(Arc::new(ResizeExecutor::new(
        cluster.clone(),
        cluster,
        lease_registry,
        config,
    )))
}

/// Lease registry for a single action run outside the daemon.
pub fn standalone_registry(tunables: &ActionArgs) -> Arc<LeaseRegistry> {
    Arc::new(LeaseRegistry::new(Duration::from_secs(
        tunables.lease_ttl_secs.max(1),
    )))
}
