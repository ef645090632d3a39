use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::ReplicationController;
use k8s_openapi::NamespaceResourceScope;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::pod_info::controller_of;
use super::pod_info::PodParentInfo;
use super::types::ClusterError;
use crate::domain::action::ClusterApi;
use crate::domain::action::ControllerKind;
use crate::domain::action::NodeMeasurement;
use crate::domain::action::ParentRef;
use crate::domain::action::TemplateScheduler;

/// Subset of the kubelet machine spec served under `/api/v1/nodes/<node>/proxy/spec`.
#[derive(Debug, Deserialize)]
struct MachineSpec {
    #[serde(default)]
    cpu_frequency_khz: u64,
}

/// Workload controllers that carry a pod template.
trait PodTemplateOwner:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    fn template_spec(&self) -> Option<&PodSpec>;
    fn template_spec_mut(&mut self) -> Option<&mut PodSpec>;
}

impl PodTemplateOwner for Deployment {
    fn template_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref()?.template.spec.as_ref()
    }

    fn template_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut()?.template.spec.as_mut()
    }
}

impl PodTemplateOwner for ReplicaSet {
    fn template_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref()?.template.as_ref()?.spec.as_ref()
    }

    fn template_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut()?.template.as_mut()?.spec.as_mut()
    }
}

impl PodTemplateOwner for ReplicationController {
    fn template_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref()?.template.as_ref()?.spec.as_ref()
    }

    fn template_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut()?.template.as_mut()?.spec.as_mut()
    }
}

fn kube_report(err: kube::Error, kind: &str, name: &str) -> Report<ClusterError> {
    let context = ClusterError::from_kube(&err, kind, name);
    Report::new(err).change_context(context)
}

/// [`ClusterApi`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the given kubeconfig file, or the in-cluster/default
    /// configuration when none is given.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Report<ClusterError>> {
        let config = match kubeconfig {
            Some(path) => {
                let connection_failed = || ClusterError::ConnectionFailed {
                    message: format!("unusable kubeconfig {}", path.display()),
                };
                let file = Kubeconfig::read_from(path).change_context_lazy(connection_failed)?;
                Config::from_custom_kubeconfig(file, &KubeConfigOptions::default())
                    .await
                    .change_context_lazy(connection_failed)?
            }
            None => Config::infer().await.change_context(ClusterError::ConnectionFailed {
                message: "no in-cluster or default kubeconfig".to_string(),
            })?,
        };
        debug!(cluster_url = %config.cluster_url, "connecting to API server");
        let client = Client::try_from(config).change_context(ClusterError::ConnectionFailed {
            message: "failed to build API client".to_string(),
        })?;
        Ok(Self::new(client))
    }

    async fn read_template<K: PodTemplateOwner>(
        &self,
        parent: &ParentRef,
    ) -> Result<TemplateScheduler, Report<ClusterError>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &parent.namespace);
        let full_name = format!("{}/{}", parent.namespace, parent.name);
        let object = api
            .get(&parent.name)
            .await
            .map_err(|e| kube_report(e, &parent.kind.to_string(), &full_name))?;

        let spec = object
            .template_spec()
            .ok_or_else(|| missing_template(parent))?;
        Ok(TemplateScheduler {
            scheduler_name: spec.scheduler_name.clone(),
            resource_version: object.meta().resource_version.clone(),
        })
    }

    async fn write_template<K: PodTemplateOwner>(
        &self,
        parent: &ParentRef,
        scheduler_name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), Report<ClusterError>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &parent.namespace);
        let kind = parent.kind.to_string();
        let full_name = format!("{}/{}", parent.namespace, parent.name);
        let mut object = api
            .get(&parent.name)
            .await
            .map_err(|e| kube_report(e, &kind, &full_name))?;

        // Pin the write to the version the caller read so a concurrent
        // change surfaces as a 409 instead of being overwritten.
        if let Some(version) = resource_version {
            object.meta_mut().resource_version = Some(version.to_string());
        }
        object
            .template_spec_mut()
            .ok_or_else(|| missing_template(parent))?
            .scheduler_name = Some(scheduler_name.to_string());

        api.replace(&parent.name, &PostParams::default(), &object)
            .await
            .map_err(|e| kube_report(e, &kind, &full_name))?;
        debug!(parent = %parent, scheduler = scheduler_name, "template scheduler updated");
        Ok(())
    }
}

fn missing_template(parent: &ParentRef) -> Report<ClusterError> {
    Report::new(ClusterError::InvalidObject {
        kind: parent.kind.to_string(),
        message: format!("{}/{} has no pod template", parent.namespace, parent.name),
    })
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn get_pod_by_uid(&self, uid: &str) -> Result<Pod, Report<ClusterError>> {
        // uid is not a supported field selector for pods
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| kube_report(e, "Pod", uid))?;
        pods.items
            .into_iter()
            .find(|pod| pod.metadata.uid.as_deref() == Some(uid))
            .ok_or_else(|| {
                Report::new(ClusterError::NotFound {
                    kind: "Pod".to_string(),
                    name: format!("uid {uid}"),
                })
            })
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| kube_report(e, "Pod", &format!("{namespace}/{name}")))
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Report<ClusterError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| kube_report(e, "Pod", namespace))?;
        Ok(pods.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Report<ClusterError>> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), pod)
            .await
            .map_err(|e| kube_report(e, "Pod", &format!("{namespace}/{name}")))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Report<ClusterError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| kube_report(e, "Pod", &format!("{namespace}/{name}")))?;
        Ok(())
    }

    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Report<ClusterError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": {
                "labels": labels
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| kube_report(e, "Pod", &format!("{namespace}/{name}")))?;
        Ok(())
    }

    async fn get_replica_set_owner(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodParentInfo>, Report<ClusterError>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let replica_set = api
            .get(name)
            .await
            .map_err(|e| kube_report(e, "ReplicaSet", &format!("{namespace}/{name}")))?;
        Ok(controller_of(replica_set.metadata.owner_references.as_deref()))
    }

    async fn get_template_scheduler(
        &self,
        parent: &ParentRef,
    ) -> Result<TemplateScheduler, Report<ClusterError>> {
        match parent.kind {
            ControllerKind::Deployment => self.read_template::<Deployment>(parent).await,
            ControllerKind::ReplicaSet => self.read_template::<ReplicaSet>(parent).await,
            ControllerKind::ReplicationController => {
                self.read_template::<ReplicationController>(parent).await
            }
        }
    }

    async fn set_template_scheduler(
        &self,
        parent: &ParentRef,
        scheduler_name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), Report<ClusterError>> {
        match parent.kind {
            ControllerKind::Deployment => {
                self.write_template::<Deployment>(parent, scheduler_name, resource_version)
                    .await
            }
            ControllerKind::ReplicaSet => {
                self.write_template::<ReplicaSet>(parent, scheduler_name, resource_version)
                    .await
            }
            ControllerKind::ReplicationController => {
                self.write_template::<ReplicationController>(
                    parent,
                    scheduler_name,
                    resource_version,
                )
                .await
            }
        }
    }
}

#[async_trait::async_trait]
impl NodeMeasurement for KubeCluster {
    async fn cpu_frequency_khz(&self, node_name: &str) -> Result<u64, Report<ClusterError>> {
        let request = http::Request::get(format!("/api/v1/nodes/{node_name}/proxy/spec"))
            .body(Vec::new())
            .change_context(ClusterError::Api {
                message: format!("failed to build machine spec request for node {node_name}"),
            })?;
        let spec: MachineSpec = self
            .client
            .request(request)
            .await
            .map_err(|e| kube_report(e, "Node", node_name))?;
        debug!(node = node_name, khz = spec.cpu_frequency_khz, "node cpu frequency");
        Ok(spec.cpu_frequency_khz)
    }
}
