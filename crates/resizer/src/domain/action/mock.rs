//! In-memory cluster used by the action tests
//!
//! Records every call and supports injecting write conflicts and failures.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use error_stack::Report;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use super::traits::ClusterApi;
use super::traits::NodeMeasurement;
use super::traits::TemplateScheduler;
use super::types::ControllerKind;
use super::types::ParentRef;
use crate::infrastructure::k8s::ClusterError;
use crate::infrastructure::k8s::PodParentInfo;

/// One recorded cluster call. Pods are identified as `namespace/name`,
/// controllers by their lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetPodByUid(String),
    GetPod(String),
    ListPods(String),
    CreatePod(String),
    DeletePod(String),
    PatchPodLabels(String),
    GetReplicaSet(String),
    GetTemplateScheduler(String),
    SetTemplateScheduler(String, String),
}

impl Call {
    pub fn is_scheduler_call(&self) -> bool {
        matches!(
            self,
            Self::GetTemplateScheduler(_) | Self::SetTemplateScheduler(..)
        )
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreatePod(_)
                | Self::DeletePod(_)
                | Self::PatchPodLabels(_)
                | Self::SetTemplateScheduler(..)
        )
    }
}

/// What a scripted `get_pod` returns for a replacement pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodStep {
    Phase(&'static str),
    Deleting,
    Missing,
}

#[derive(Debug, Clone)]
struct Template {
    scheduler_name: Option<String>,
    version: u64,
}

#[derive(Default)]
struct State {
    pods: BTreeMap<String, Pod>,
    templates: HashMap<String, Template>,
    calls: Vec<Call>,
    scheduler_write_conflicts: u32,
    scheduler_write_failures: u32,
    create_conflicts: u32,
    create_failures: u32,
    delete_failures: u32,
    label_patch_failures: u32,
    /// `namespace/name` of each ReplicaSet to its controller
    replica_sets: HashMap<String, Option<PodParentInfo>>,
    /// keyed by the original pod name, applied to its replacements
    replacement_scripts: HashMap<String, VecDeque<PodStep>>,
}

#[derive(Default)]
pub struct MockCluster {
    state: Mutex<State>,
}

fn pod_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn not_found(kind: &str, name: &str) -> Report<ClusterError> {
    Report::new(ClusterError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    })
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = pod_key(
            pod.metadata.namespace.as_deref().unwrap_or("default"),
            pod.metadata.name.as_deref().unwrap_or_default(),
        );
        self.state.lock().unwrap().pods.insert(key, pod);
    }

    /// Register the pod template of `parent`. A ReplicaSet parent is also
    /// registered as standalone unless [`MockCluster::add_replica_set`] says otherwise.
    pub fn add_template(&self, parent: &ParentRef, scheduler_name: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if parent.kind == ControllerKind::ReplicaSet {
            state
                .replica_sets
                .entry(pod_key(&parent.namespace, &parent.name))
                .or_insert(None);
        }
        state.templates.insert(
            parent.lock_key(),
            Template {
                scheduler_name: scheduler_name.map(str::to_string),
                version: 1,
            },
        );
    }

    /// Register ReplicaSet `namespace/name`, optionally owned by Deployment `deployment`.
    pub fn add_replica_set(&self, namespace: &str, name: &str, deployment: Option<&str>) {
        self.state.lock().unwrap().replica_sets.insert(
            pod_key(namespace, name),
            deployment.map(|deployment| PodParentInfo {
                kind: "Deployment".to_string(),
                name: deployment.to_string(),
            }),
        );
    }

    /// Make the next `count` scheduler writes fail with a 409.
    pub fn fail_scheduler_writes_with_conflict(&self, count: u32) {
        self.state.lock().unwrap().scheduler_write_conflicts = count;
    }

    /// Make the next `count` scheduler writes fail with a server error.
    pub fn fail_scheduler_writes(&self, count: u32) {
        self.state.lock().unwrap().scheduler_write_failures = count;
    }

    pub fn fail_creates_with_conflict(&self, count: u32) {
        self.state.lock().unwrap().create_conflicts = count;
    }

    pub fn fail_creates(&self, count: u32) {
        self.state.lock().unwrap().create_failures = count;
    }

    pub fn fail_deletes(&self, count: u32) {
        self.state.lock().unwrap().delete_failures = count;
    }

    pub fn fail_label_patches(&self, count: u32) {
        self.state.lock().unwrap().label_patch_failures = count;
    }

    /// Script what `get_pod` sees for replacements of `original_name`, one step per read.
    /// The last step repeats once the script is exhausted.
    pub fn script_replacement(&self, original_name: &str, steps: Vec<PodStep>) {
        self.state
            .lock()
            .unwrap()
            .replacement_scripts
            .insert(original_name.to_string(), steps.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(&pod_key(namespace, name))
            .cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.state.lock().unwrap().pods.values().cloned().collect()
    }

    pub fn template_scheduler(&self, parent: &ParentRef) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .templates
            .get(&parent.lock_key())
            .and_then(|template| template.scheduler_name.clone())
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn apply_step(mut pod: Pod, step: PodStep) -> Option<Pod> {
    match step {
        PodStep::Phase(phase) => {
            pod.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
            Some(pod)
        }
        PodStep::Deleting => {
            pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            Some(pod)
        }
        PodStep::Missing => None,
    }
}

#[async_trait::async_trait]
impl ClusterApi for MockCluster {
    async fn get_pod_by_uid(&self, uid: &str) -> Result<Pod, Report<ClusterError>> {
        self.record(Call::GetPodByUid(uid.to_string()));
        let state = self.state.lock().unwrap();
        state
            .pods
            .values()
            .find(|pod| pod.metadata.uid.as_deref() == Some(uid))
            .cloned()
            .ok_or_else(|| not_found("Pod", uid))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<ClusterError>> {
        let key = pod_key(namespace, name);
        self.record(Call::GetPod(key.clone()));
        let mut state = self.state.lock().unwrap();
        let pod = state.pods.get(&key).cloned();

        let script = state
            .replacement_scripts
            .iter_mut()
            .find(|(original, _)| {
                name.strip_prefix(original.as_str())
                    .is_some_and(|rest| rest.starts_with('-'))
            })
            .map(|(_, steps)| steps);
        let pod = match (pod, script) {
            (Some(pod), Some(steps)) => {
                let step = if steps.len() > 1 {
                    steps.pop_front()
                } else {
                    steps.front().copied()
                };
                match step {
                    Some(step) => apply_step(pod, step),
                    None => Some(pod),
                }
            }
            (pod, _) => pod,
        };
        pod.ok_or_else(|| not_found("Pod", &key))
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Report<ClusterError>> {
        self.record(Call::ListPods(namespace.to_string()));
        let prefix = format!("{namespace}/");
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Report<ClusterError>> {
        let key = pod_key(
            pod.metadata.namespace.as_deref().unwrap_or("default"),
            pod.metadata.name.as_deref().unwrap_or_default(),
        );
        self.record(Call::CreatePod(key.clone()));
        let mut state = self.state.lock().unwrap();
        if state.create_conflicts > 0 {
            state.create_conflicts -= 1;
            return Err(Report::new(ClusterError::Conflict {
                kind: "Pod".to_string(),
                name: key,
            }));
        }
        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(Report::new(ClusterError::Api {
                message: format!("admission webhook rejected {key}"),
            }));
        }
        if state.pods.contains_key(&key) {
            return Err(Report::new(ClusterError::Conflict {
                kind: "Pod".to_string(),
                name: key,
            }));
        }

        let mut created = pod.clone();
        created.metadata.uid = Some(format!("uid-{key}"));
        created.metadata.resource_version = Some("1".to_string());
        created.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        });
        state.pods.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Report<ClusterError>> {
        let key = pod_key(namespace, name);
        self.record(Call::DeletePod(key.clone()));
        let mut state = self.state.lock().unwrap();
        if state.delete_failures > 0 {
            state.delete_failures -= 1;
            return Err(Report::new(ClusterError::Api {
                message: format!("etcd timeout deleting {key}"),
            }));
        }
        match state.pods.remove(&key) {
            Some(_) => Ok(()),
            None => Err(not_found("Pod", &key)),
        }
    }

    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Report<ClusterError>> {
        let key = pod_key(namespace, name);
        self.record(Call::PatchPodLabels(key.clone()));
        let mut state = self.state.lock().unwrap();
        if state.label_patch_failures > 0 {
            state.label_patch_failures -= 1;
            return Err(Report::new(ClusterError::Api {
                message: format!("etcd timeout patching {key}"),
            }));
        }
        let pod = state
            .pods
            .get_mut(&key)
            .ok_or_else(|| not_found("Pod", &key))?;
        pod.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn get_replica_set_owner(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodParentInfo>, Report<ClusterError>> {
        let key = pod_key(namespace, name);
        self.record(Call::GetReplicaSet(key.clone()));
        self.state
            .lock()
            .unwrap()
            .replica_sets
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found("ReplicaSet", &key))
    }

    async fn get_template_scheduler(
        &self,
        parent: &ParentRef,
    ) -> Result<TemplateScheduler, Report<ClusterError>> {
        let key = parent.lock_key();
        self.record(Call::GetTemplateScheduler(key.clone()));
        let state = self.state.lock().unwrap();
        let template = state
            .templates
            .get(&key)
            .ok_or_else(|| not_found(&parent.kind.to_string(), &key))?;
        Ok(TemplateScheduler {
            scheduler_name: template.scheduler_name.clone(),
            resource_version: Some(template.version.to_string()),
        })
    }

    async fn set_template_scheduler(
        &self,
        parent: &ParentRef,
        scheduler_name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), Report<ClusterError>> {
        let key = parent.lock_key();
        self.record(Call::SetTemplateScheduler(
            key.clone(),
            scheduler_name.to_string(),
        ));
        let mut state = self.state.lock().unwrap();
        let conflict = || {
            Report::new(ClusterError::Conflict {
                kind: parent.kind.to_string(),
                name: key.clone(),
            })
        };
        if state.scheduler_write_conflicts > 0 {
            state.scheduler_write_conflicts -= 1;
            return Err(conflict());
        }
        if state.scheduler_write_failures > 0 {
            state.scheduler_write_failures -= 1;
            return Err(Report::new(ClusterError::Api {
                message: format!("internal error updating {key}"),
            }));
        }
        let template = state
            .templates
            .get_mut(&key)
            .ok_or_else(|| not_found(&parent.kind.to_string(), &key))?;
        if resource_version.is_some_and(|version| version != template.version.to_string()) {
            return Err(conflict());
        }
        template.scheduler_name = Some(scheduler_name.to_string());
        template.version += 1;
        Ok(())
    }
}

/// Node with a fixed CPU frequency.
pub struct MockNodes {
    pub khz: u64,
}

#[async_trait::async_trait]
impl NodeMeasurement for MockNodes {
    async fn cpu_frequency_khz(&self, _node_name: &str) -> Result<u64, Report<ClusterError>> {
        Ok(self.khz)
    }
}

/// A running single-container pod on `node-1`, optionally owned by a controller.
pub fn running_pod(namespace: &str, name: &str, uid: &str, owner: Option<(&str, &str)>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            resource_version: Some("7".to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            owner_references: owner.map(|(kind, owner_name)| {
                vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: kind.to_string(),
                    name: owner_name.to_string(),
                    uid: format!("uid-{owner_name}"),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]
            }),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-1".to_string()),
            scheduler_name: Some("default-scheduler".to_string()),
            containers: vec![Container {
                name: "app".to_string(),
                image: Some("nginx:1.25".to_string()),
                resources: Some(ResourceRequirements {
                    limits: Some(BTreeMap::from([
                        ("cpu".to_string(), Quantity("1".to_string())),
                        ("memory".to_string(), Quantity("512Mi".to_string())),
                    ])),
                    requests: Some(BTreeMap::from([
                        ("cpu".to_string(), Quantity("500m".to_string())),
                        ("memory".to_string(), Quantity("256Mi".to_string())),
                    ])),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// A pod of `owner` stuck in `Pending` under `scheduler_name`.
pub fn pending_pod(namespace: &str, name: &str, owner: (&str, &str), scheduler_name: &str) -> Pod {
    let mut pod = running_pod(namespace, name, &format!("uid-{name}"), Some(owner));
    if let Some(spec) = pod.spec.as_mut() {
        spec.node_name = None;
        spec.scheduler_name = Some(scheduler_name.to_string());
    }
    pod.status = Some(PodStatus {
        phase: Some("Pending".to_string()),
        ..Default::default()
    });
    pod
}
