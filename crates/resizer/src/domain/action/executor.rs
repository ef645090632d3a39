use std::sync::Arc;

use api_types::ActionRequest;
use api_types::CommodityChange;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use tokio::time::sleep;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::mutation::resize_container;
use super::mutation::ReplaceOptions;
use super::resize_spec::build_capacity;
use super::resize_spec::ResizeSpec;
use super::scheduler_helper::SchedulerHelper;
use super::traits::ClusterApi;
use super::traits::NodeMeasurement;
use super::types::ActionError;
use super::types::ActionOutcome;
use super::types::ControllerKind;
use super::types::ParentRef;
use super::verify::wait_pod_running;
use crate::config::ActionConfig;
use crate::domain::lease::LeaseRegistry;
use crate::domain::lease::LockHelper;
use crate::infrastructure::k8s::parse_container_id;
use crate::infrastructure::k8s::pod_full_name;
use crate::infrastructure::k8s::pod_parent;
use crate::infrastructure::k8s::PodParentInfo;

/// Executes container resize actions against the cluster.
///
/// Cheap to share: every action runs on its own task with a reference to one executor.
pub struct ResizeExecutor {
    cluster: Arc<dyn ClusterApi>,
    nodes: Arc<dyn NodeMeasurement>,
    registry: Arc<LeaseRegistry>,
    config: ActionConfig,
}

fn invalid(message: impl Into<String>) -> Report<ActionError> {
    Report::new(ActionError::ValidationError {
        message: message.into(),
    })
}

fn validate(request: &ActionRequest) -> Result<&CommodityChange, Report<ActionError>> {
    if request.target_container_id.trim().is_empty() {
        return Err(invalid("target container id is empty"));
    }
    if request.hosting_pod_id.trim().is_empty() {
        return Err(invalid("hosting pod id is empty"));
    }
    request
        .commodity
        .as_ref()
        .ok_or_else(|| invalid("action carries no commodity change"))
}

impl ResizeExecutor {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        nodes: Arc<dyn NodeMeasurement>,
        registry: Arc<LeaseRegistry>,
        config: ActionConfig,
    ) -> Self {
        Self {
            cluster,
            nodes,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    /// Run one resize action to completion and classify the result.
    #[tracing::instrument(skip(self, request), fields(container = %request.target_container_id))]
    pub async fn execute(&self, request: &ActionRequest) -> ActionOutcome {
        let outcome = ActionOutcome::from(self.run(request).await);
        match &outcome {
            ActionOutcome::Succeeded { pod } => info!(pod = %pod, "resize action succeeded"),
            ActionOutcome::RetryableFailure { error } => {
                warn!("resize action failed, retry later: {error:?}")
            }
            ActionOutcome::PermanentFailure { error } => error!("resize action failed: {error:?}"),
        }
        outcome
    }

    async fn run(&self, request: &ActionRequest) -> Result<String, Report<ActionError>> {
        let change = validate(request)?;
        let display_name = request
            .hosting_pod_display_name
            .clone()
            .unwrap_or_else(|| request.hosting_pod_id.clone());

        let (pod_uid, index) = parse_container_id(&request.target_container_id).ok_or_else(|| {
            invalid(format!(
                "malformed container id {}",
                request.target_container_id
            ))
        })?;
        if pod_uid != request.hosting_pod_id {
            return Err(Report::new(ActionError::IdentityMismatch {
                display_name,
                from_container: pod_uid.to_string(),
                from_request: request.hosting_pod_id.clone(),
            }));
        }

        let pod = self
            .cluster
            .get_pod_by_uid(pod_uid)
            .await
            .change_context_lazy(|| ActionError::DependencyError {
                message: format!("failed to find hosting pod {display_name}"),
            })?;
        let full_name = pod_full_name(&pod);
        let container_count = pod.spec.as_ref().map_or(0, |spec| spec.containers.len());
        if index >= container_count {
            return Err(invalid(format!(
                "container index {index} out of range, pod {full_name} has {container_count} containers"
            )));
        }

        let node_name = pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref());
        let target = build_capacity(change, node_name, self.nodes.as_ref())
            .await
            .attach_printable_lazy(|| format!("pod: {full_name}"))?;
        let spec = ResizeSpec {
            container_index: index,
            target,
        };

        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let parent = pod_parent(&pod).change_context_lazy(|| ActionError::DependencyError {
            message: format!("failed to get parent controller of pod {full_name}"),
        })?;

        let resized = match parent {
            None => self.resize_bare_pod(namespace, name, &spec).await?,
            Some(parent) => {
                let parent = self.resolve_controller(namespace, parent, &full_name).await?;
                self.resize_controlled_pod(namespace, name, parent, &spec)
                    .await?
            }
        };

        let resized_name = resized.metadata.name.as_deref().unwrap_or(name);
        wait_pod_running(
            self.cluster.as_ref(),
            namespace,
            resized_name,
            self.config.verify_attempts,
            self.config.verify_interval,
        )
        .await?;
        Ok(format!("{namespace}/{resized_name}"))
    }

    /// The controller whose template has to be swapped for a pod owned by `parent`.
    ///
    /// A ReplicaSet managed by a Deployment would be rolled back by it, so the
    /// Deployment is used instead.
    async fn resolve_controller(
        &self,
        namespace: &str,
        parent: PodParentInfo,
        full_name: &str,
    ) -> Result<ParentRef, Report<ActionError>> {
        let mut owner = parent;
        if owner.kind == "ReplicaSet" {
            let grandparent = self
                .cluster
                .get_replica_set_owner(namespace, &owner.name)
                .await
                .change_context_lazy(|| ActionError::DependencyError {
                    message: format!("failed to get ReplicaSet {namespace}/{}", owner.name),
                })?;
            if let Some(grandparent) = grandparent {
                debug!(
                    replica_set = %owner.name,
                    controller = %grandparent.name,
                    "pod is managed through a ReplicaSet"
                );
                owner = grandparent;
            }
        }
        let kind = ControllerKind::parse(&owner.kind).ok_or_else(|| {
            Report::new(ActionError::UnsupportedController {
                kind: owner.kind.clone(),
                pod: full_name.to_string(),
            })
        })?;
        Ok(ParentRef::new(namespace, kind, owner.name))
    }

    async fn resize_bare_pod(
        &self,
        namespace: &str,
        name: &str,
        spec: &ResizeSpec,
    ) -> Result<Pod, Report<ActionError>> {
        let mut lock = LockHelper::new(format!("pod/{namespace}/{name}"), Arc::clone(&self.registry))?;
        lock.try_lock(self.config.lock_timeout, self.config.lock_poll_interval)
            .await?;
        lock.keep_renew_lock();

        let options = ReplaceOptions {
            strip_labels: false,
            max_retries: self.config.bare_pod_mutation_retries,
        };
        let result = resize_container(self.cluster.as_ref(), namespace, name, spec, options).await;
        lock.release_lock().await;
        result
    }

    #[tracing::instrument(skip(self, spec), fields(parent = %parent))]
    async fn resize_controlled_pod(
        &self,
        namespace: &str,
        name: &str,
        parent: ParentRef,
        spec: &ResizeSpec,
    ) -> Result<Pod, Report<ActionError>> {
        let mut helper = SchedulerHelper::new(
            Arc::clone(&self.cluster),
            parent,
            self.config.scheduler_retries,
        );
        helper.setup_lock(Arc::clone(&self.registry))?;
        self.wait_for_parent_lock(&mut helper).await?;
        helper.keep_renew_lock();

        let result = self
            .swap_scheduler_and_resize(&mut helper, namespace, name, spec)
            .await;
        helper.clean_up().await;
        result
    }

    /// Poll single lock attempts until the configured lock timeout.
    async fn wait_for_parent_lock(
        &self,
        helper: &mut SchedulerHelper,
    ) -> Result<(), Report<ActionError>> {
        let timeout = self.config.lock_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if helper.acquire_lock() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Report::new(ActionError::LockTimeout {
                    key: helper.parent().lock_key(),
                    waited: timeout,
                }));
            }
            sleep(self.config.lock_poll_interval.min(deadline - now)).await;
        }
    }

    async fn swap_scheduler_and_resize(
        &self,
        helper: &mut SchedulerHelper,
        namespace: &str,
        name: &str,
        spec: &ResizeSpec,
    ) -> Result<Pod, Report<ActionError>> {
        helper
            .update_scheduler(
                &self.config.placeholder_scheduler,
                self.config.scheduler_retries,
            )
            .await?;

        let options = ReplaceOptions {
            strip_labels: true,
            max_retries: self.config.controller_mutation_retries,
        };
        resize_container(self.cluster.as_ref(), namespace, name, spec, options).await
    }
}
