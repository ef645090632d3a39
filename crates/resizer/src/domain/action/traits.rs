//! Cluster access used by the resize workflow

use std::collections::BTreeMap;

use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;

use super::types::ParentRef;
use crate::infrastructure::k8s::ClusterError;
use crate::infrastructure::k8s::PodParentInfo;

/// Scheduler name of a controller's pod template, with the object version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateScheduler {
    /// `None` when the template does not set one (the cluster default applies)
    pub scheduler_name: Option<String>,
    pub resource_version: Option<String>,
}

/// Reads and writes against the cluster API.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Find a pod by its uid across all namespaces.
    async fn get_pod_by_uid(&self, uid: &str) -> Result<Pod, Report<ClusterError>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Report<ClusterError>>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Report<ClusterError>>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Report<ClusterError>>;

    /// Merge the given labels into the pod's labels.
    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Report<ClusterError>>;

    /// Controller owning the ReplicaSet `namespace/name`, `None` for a standalone ReplicaSet.
    async fn get_replica_set_owner(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodParentInfo>, Report<ClusterError>>;

    async fn get_template_scheduler(
        &self,
        parent: &ParentRef,
    ) -> Result<TemplateScheduler, Report<ClusterError>>;

    /// Write the template scheduler name, failing with [`ClusterError::Conflict`]
    /// when the controller changed since `resource_version`.
    async fn set_template_scheduler(
        &self,
        parent: &ParentRef,
        scheduler_name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), Report<ClusterError>>;
}

/// Node measurements needed to turn a CPU rate into an absolute quantity.
#[async_trait::async_trait]
pub trait NodeMeasurement: Send + Sync {
    /// Measured CPU frequency capacity of the node, in kHz.
    async fn cpu_frequency_khz(&self, node_name: &str) -> Result<u64, Report<ClusterError>>;
}
