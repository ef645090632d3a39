//! Pod replacement with new container resources
//!
//! Container resources of a running pod are immutable, so a resize creates a
//! copy of the pod with the new limits on the same node and deletes the
//! original.

use std::collections::BTreeMap;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use super::resize_spec::quantity_value;
use super::resize_spec::ResizeSpec;
use super::traits::ClusterApi;
use super::types::ActionError;
use crate::infrastructure::k8s::pod_full_name;
use crate::infrastructure::k8s::ClusterError;

/// Pause between attempts to label a replacement whose original is already gone.
const LABEL_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOptions {
    /// Create the copy without labels and add them after the original is gone,
    /// so the owning controller never counts both pods at once.
    pub strip_labels: bool,
    /// Attempts before write conflicts are reported, also used for labelling the replacement.
    pub max_retries: u32,
}

/// Build the replacement for `pod` with the resource change of `spec` applied.
///
/// # Errors
///
/// - [`ActionError::ValidationError`] if the pod has no spec or no container at the index
pub fn build_resized_pod(
    pod: &Pod,
    spec: &ResizeSpec,
    strip_labels: bool,
) -> Result<Pod, Report<ActionError>> {
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();

    let mut pod_spec = pod.spec.clone().ok_or_else(|| {
        Report::new(ActionError::ValidationError {
            message: format!("pod {} has no spec", pod_full_name(pod)),
        })
    })?;
    let container_count = pod_spec.containers.len();
    let container = pod_spec
        .containers
        .get_mut(spec.container_index)
        .ok_or_else(|| {
            Report::new(ActionError::ValidationError {
                message: format!(
                    "container index {} out of range, pod {} has {container_count} containers",
                    spec.container_index,
                    pod_full_name(pod)
                ),
            })
        })?;

    let resource = spec.target.resource_name();
    let limit = spec.target.to_quantity();
    let resources = container.resources.get_or_insert_with(Default::default);
    if let Some(requests) = resources.requests.as_mut() {
        let request_exceeds_limit = requests
            .get(resource)
            .and_then(quantity_value)
            .zip(quantity_value(&limit))
            .is_some_and(|(request, limit)| request > limit);
        if request_exceeds_limit {
            requests.insert(resource.to_string(), limit.clone());
        }
    }
    resources
        .limits
        .get_or_insert_with(BTreeMap::new)
        .insert(resource.to_string(), limit);

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(format!("{name}-{}", &suffix[..8])),
            namespace: pod.metadata.namespace.clone(),
            labels: if strip_labels {
                None
            } else {
                pod.metadata.labels.clone()
            },
            annotations: pod.metadata.annotations.clone(),
            ..Default::default()
        },
        // node_name is kept from the original spec, pinning the copy to the same node
        spec: Some(pod_spec),
        status: None,
    })
}

enum Attempt {
    Done(Pod),
    Conflict(Report<ClusterError>),
}

/// Replace pod `namespace/name` with a copy carrying the resized container.
///
/// Returns the created replacement pod.
///
/// # Errors
///
/// - [`ActionError::MutationConflictExhausted`] if every attempt hit a write conflict
/// - [`ActionError::MutationFailed`] for any other API failure
/// - [`ActionError::PodDeletedDuringAction`] if the pod is already terminating
/// - [`ActionError::ReplacementNotAdopted`] if the original was deleted but the replacement
///   could not be labelled; the replacement is deleted so the controller recreates the replica
#[tracing::instrument(skip(cluster, spec), fields(pod = %format!("{namespace}/{name}")))]
pub async fn resize_container(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    spec: &ResizeSpec,
    options: ReplaceOptions,
) -> Result<Pod, Report<ActionError>> {
    let full_name = format!("{namespace}/{name}");
    let attempts = options.max_retries.max(1);
    for attempt in 1..=attempts {
        match replace_once(cluster, namespace, name, spec, options).await? {
            Attempt::Done(pod) => {
                info!(
                    replacement = pod.metadata.name.as_deref().unwrap_or_default(),
                    resource = spec.target.resource_name(),
                    "pod replaced"
                );
                return Ok(pod);
            }
            Attempt::Conflict(e) => {
                warn!(attempt, "write conflict replacing pod: {e:?}");
            }
        }
    }
    Err(Report::new(ActionError::MutationConflictExhausted {
        pod: full_name,
        attempts,
    }))
}

async fn replace_once(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    spec: &ResizeSpec,
    options: ReplaceOptions,
) -> Result<Attempt, Report<ActionError>> {
    let full_name = format!("{namespace}/{name}");
    let failed = |message: &str| ActionError::MutationFailed {
        pod: full_name.clone(),
        message: message.to_string(),
    };

    let pod = match cluster.get_pod(namespace, name).await {
        Ok(pod) => pod,
        Err(e) if e.current_context().is_conflict() => return Ok(Attempt::Conflict(e)),
        Err(e) => return Err(e.change_context(failed("failed to read pod"))),
    };
    if pod.metadata.deletion_timestamp.is_some() {
        return Err(Report::new(ActionError::PodDeletedDuringAction {
            pod: full_name.clone(),
        }));
    }

    let replacement = build_resized_pod(&pod, spec, options.strip_labels)?;
    let created = match cluster.create_pod(&replacement).await {
        Ok(created) => created,
        Err(e) if e.current_context().is_conflict() => return Ok(Attempt::Conflict(e)),
        Err(e) => return Err(e.change_context(failed("failed to create replacement pod"))),
    };
    let created_name = created
        .metadata
        .name
        .clone()
        .or(replacement.metadata.name)
        .unwrap_or_default();
    debug!(replacement = %created_name, "replacement pod created");

    if let Err(e) = cluster.delete_pod(namespace, name).await {
        // two copies must not be left running
        if let Err(cleanup) = cluster.delete_pod(namespace, &created_name).await {
            warn!(replacement = %created_name, "failed to delete replacement pod: {cleanup:?}");
        }
        if e.current_context().is_conflict() {
            return Ok(Attempt::Conflict(e));
        }
        return Err(e.change_context(failed("failed to delete original pod")));
    }

    if options.strip_labels {
        if let Some(labels) = pod.metadata.labels.as_ref().filter(|labels| !labels.is_empty()) {
            hand_to_controller(cluster, namespace, name, &created_name, labels, options.max_retries)
                .await?;
        }
    }

    Ok(Attempt::Done(created))
}

/// Put the original's labels on `replacement` so its controller adopts it.
///
/// The original is already deleted, so this step cannot be repeated by
/// resubmitting the action. If every attempt fails the unlabelled replacement
/// is deleted, leaving the controller to recreate the replica from its template.
async fn hand_to_controller(
    cluster: &dyn ClusterApi,
    namespace: &str,
    original: &str,
    replacement: &str,
    labels: &BTreeMap<String, String>,
    max_retries: u32,
) -> Result<(), Report<ActionError>> {
    let attempts = max_retries.max(1);
    let mut attempt = 0;
    let error = loop {
        attempt += 1;
        match cluster.patch_pod_labels(namespace, replacement, labels).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(attempt, replacement, "failed to label replacement pod, retrying: {e:?}");
                sleep(LABEL_RETRY_INTERVAL).await;
            }
            Err(e) => break e,
        }
    };

    error!(replacement, "giving up on labelling replacement pod, deleting it");
    if let Err(cleanup) = cluster.delete_pod(namespace, replacement).await {
        error!(replacement, "failed to delete unlabelled replacement pod: {cleanup:?}");
    }
    Err(error.change_context(ActionError::ReplacementNotAdopted {
        pod: format!("{namespace}/{original}"),
        replacement: format!("{namespace}/{replacement}"),
    }))
}
