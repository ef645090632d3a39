//! Identity helpers for pods: container ids, full names and owning controllers

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::Deserialize;

use super::types::ClusterError;

/// Legacy annotation recording the controller that created a pod.
pub const CREATED_BY_ANNOTATION: &str = "kubernetes.io/created-by";

/// Label a Deployment puts on its ReplicaSets' pods; the ReplicaSet is named `<deployment>-<hash>`.
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Kind and name of the controller owning a pod, as recorded on the pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodParentInfo {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct SerializedReference {
    reference: ObjectReference,
}

#[derive(Debug, Deserialize)]
struct ObjectReference {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    name: String,
}

/// Split a container id of the form `<pod-uid>-<index>`.
///
/// The pod uid itself contains dashes, so the index is the text after the last one.
pub fn parse_container_id(container_id: &str) -> Option<(&str, usize)> {
    let (pod_uid, index) = container_id.rsplit_once('-')?;
    if pod_uid.is_empty() {
        return None;
    }
    let index = index.parse().ok()?;
    Some((pod_uid, index))
}

/// `namespace/name` of a pod.
pub fn pod_full_name(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

fn controller_owner(owners: &[OwnerReference]) -> Option<&OwnerReference> {
    owners.iter().find(|owner| {
        owner.controller.unwrap_or(false) && !owner.kind.is_empty() && !owner.name.is_empty()
    })
}

/// Controller among `owners`, if any.
pub fn controller_of(owners: Option<&[OwnerReference]>) -> Option<PodParentInfo> {
    owners.and_then(controller_owner).map(|owner| PodParentInfo {
        kind: owner.kind.clone(),
        name: owner.name.clone(),
    })
}

/// Find the controller owning `pod`.
///
/// Owner references are checked first, then the legacy created-by annotation.
/// `Ok(None)` means the pod is a bare pod.
///
/// # Errors
///
/// - [`ClusterError::InvalidObject`] if the created-by annotation cannot be decoded
pub fn pod_parent(pod: &Pod) -> Result<Option<PodParentInfo>, Report<ClusterError>> {
    if let Some(parent) = controller_of(pod.metadata.owner_references.as_deref()) {
        return Ok(Some(parent));
    }

    let Some(created_by) = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(CREATED_BY_ANNOTATION))
    else {
        return Ok(None);
    };

    let reference: SerializedReference = serde_json::from_str(created_by)
        .change_context(ClusterError::InvalidObject {
            kind: "Pod".to_string(),
            message: format!("failed to decode {CREATED_BY_ANNOTATION} of {}", pod_full_name(pod)),
        })
        .attach_printable_lazy(|| created_by.clone())?;

    if reference.reference.kind.is_empty() || reference.reference.name.is_empty() {
        return Ok(None);
    }
    Ok(Some(PodParentInfo {
        kind: reference.reference.kind,
        name: reference.reference.name,
    }))
}

/// Whether `pod` is controlled by the controller `kind`/`name`.
///
/// Pods of a Deployment are owned by its ReplicaSets, named `<deployment>-<hash>`.
/// The hash is taken from the pod's `pod-template-hash` label, so Deployment `web`
/// does not claim the pods of Deployment `web-api`.
pub fn is_controlled_by(pod: &Pod, kind: &str, name: &str) -> bool {
    let Some(owner) = pod
        .metadata
        .owner_references
        .as_deref()
        .and_then(controller_owner)
    else {
        return false;
    };
    if owner.kind == kind && owner.name == name {
        return true;
    }
    if kind != "Deployment" || owner.kind != "ReplicaSet" {
        return false;
    }
    let Some(hash) = owner
        .name
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };
    match pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(POD_TEMPLATE_HASH_LABEL))
    {
        Some(label) => label == hash,
        // hashes never contain dashes
        None => !hash.is_empty() && !hash.contains('-'),
    }
}
