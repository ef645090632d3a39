//! Scheduler swap on a pod's parent controller
//!
//! While a controlled pod is being replaced, its controller would notice the
//! missing replica and start a new pod of its own. Pointing the controller's
//! pod template at a scheduler that does not exist keeps any such pod
//! `Pending`; once the replacement is adopted the original scheduler is
//! restored and the pending orphans are deleted.

use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::traits::ClusterApi;
use super::types::ActionError;
use super::types::ParentRef;
use crate::domain::lease::LeaseRegistry;
use crate::domain::lease::LockHelper;
use crate::infrastructure::k8s::is_controlled_by;
use crate::infrastructure::k8s::pod_full_name;
use crate::infrastructure::k8s::ClusterError;

/// Scheduler the cluster applies when a pod template names none.
pub const DEFAULT_SCHEDULER: &str = "default-scheduler";

/// What has to be written back to undo a scheduler swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub parent: ParentRef,
    pub original: String,
    pub placeholder: String,
}

fn effective_scheduler(name: Option<&str>) -> &str {
    name.filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_SCHEDULER)
}

pub struct SchedulerHelper {
    cluster: Arc<dyn ClusterApi>,
    parent: ParentRef,
    lock: Option<LockHelper>,
    staged: Option<SchedulerState>,
    restore_retries: u32,
}

impl SchedulerHelper {
    pub fn new(cluster: Arc<dyn ClusterApi>, parent: ParentRef, restore_retries: u32) -> Self {
        Self {
            cluster,
            parent,
            lock: None,
            staged: None,
            restore_retries,
        }
    }

    pub fn parent(&self) -> &ParentRef {
        &self.parent
    }

    /// Swap waiting to be undone, if any.
    pub fn staged(&self) -> Option<&SchedulerState> {
        self.staged.as_ref()
    }

    pub fn setup_lock(&mut self, registry: Arc<LeaseRegistry>) -> Result<(), Report<ActionError>> {
        if self.lock.is_none() {
            self.lock = Some(LockHelper::new(self.parent.lock_key(), registry)?);
        }
        Ok(())
    }

    /// Single attempt on the parent lock. `false` if [`SchedulerHelper::setup_lock`] was not called.
    pub fn acquire_lock(&mut self) -> bool {
        self.lock.as_mut().is_some_and(LockHelper::acquire)
    }

    pub fn keep_renew_lock(&mut self) {
        if let Some(lock) = self.lock.as_mut() {
            lock.keep_renew_lock();
        }
    }

    /// Point the parent's pod template at `placeholder` and return the scheduler it replaced.
    ///
    /// The replaced name is staged for [`SchedulerHelper::clean_up`] before the write is sent.
    ///
    /// # Errors
    ///
    /// - [`ActionError::SchedulerUpdateFailed`] if the template cannot be read, a write
    ///   fails, or write conflicts persist for `max_retries` attempts
    #[tracing::instrument(skip(self), fields(parent = %self.parent))]
    pub async fn update_scheduler(
        &mut self,
        placeholder: &str,
        max_retries: u32,
    ) -> Result<String, Report<ActionError>> {
        let attempts = max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failed = |message: String| ActionError::SchedulerUpdateFailed {
                parent: self.parent.to_string(),
                message,
            };

            let current = self
                .cluster
                .get_template_scheduler(&self.parent)
                .await
                .change_context_lazy(|| failed("failed to read pod template".to_string()))?;

            let mut original = effective_scheduler(current.scheduler_name.as_deref()).to_string();
            if original == placeholder {
                // left behind by an action that never restored it
                warn!(
                    placeholder,
                    "template already uses the placeholder scheduler, restoring to {DEFAULT_SCHEDULER}"
                );
                original = DEFAULT_SCHEDULER.to_string();
            }
            let original = self
                .staged
                .get_or_insert_with(|| SchedulerState {
                    parent: self.parent.clone(),
                    original,
                    placeholder: placeholder.to_string(),
                })
                .original
                .clone();

            match self
                .cluster
                .set_template_scheduler(&self.parent, placeholder, current.resource_version.as_deref())
                .await
            {
                Ok(()) => {
                    info!(previous = %original, placeholder, "scheduler disabled");
                    return Ok(original);
                }
                Err(e) if e.current_context().is_conflict() && attempt < attempts => {
                    warn!(attempt, "write conflict updating scheduler, retrying");
                }
                Err(e) => {
                    let message = if e.current_context().is_conflict() {
                        format!("write conflicts persisted after {attempt} attempts")
                    } else {
                        "failed to write pod template".to_string()
                    };
                    return Err(e.change_context(failed(message)));
                }
            }
        }
    }

    /// Restore the staged scheduler, delete the pending pods the swap stranded, then
    /// release the parent lock.
    ///
    /// Failures are logged. Safe to call more than once.
    #[tracing::instrument(skip(self), fields(parent = %self.parent))]
    pub async fn clean_up(&mut self) {
        if let Some(state) = self.staged.take() {
            if let Err(e) =
                restore_template_scheduler(self.cluster.as_ref(), &state, self.restore_retries).await
            {
                error!("failed to restore scheduler {}: {e:?}", state.original);
            }
            match clean_pending_pods(self.cluster.as_ref(), &state.parent, &state.placeholder).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "deleted pending pods left by the scheduler swap"),
                Err(e) => error!("failed to clean pending pods: {e:?}"),
            }
        }
        if let Some(lock) = self.lock.as_mut() {
            lock.release_lock().await;
        }
    }
}

impl Drop for SchedulerHelper {
    fn drop(&mut self) {
        let Some(state) = self.staged.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(parent = %state.parent, "no runtime left to restore scheduler {}", state.original);
            return;
        };
        warn!(parent = %state.parent, "scheduler helper dropped before clean up, restoring in background");

        let cluster = Arc::clone(&self.cluster);
        let retries = self.restore_retries;
        // the lock moves into the task so it stays held until the restore is done
        let lock = self.lock.take();
        runtime.spawn(async move {
            if let Err(e) = restore_template_scheduler(cluster.as_ref(), &state, retries).await {
                error!(parent = %state.parent, "failed to restore scheduler {}: {e:?}", state.original);
            }
            if let Some(mut lock) = lock {
                lock.release_lock().await;
            }
        });
    }
}

/// Write `state.original` back if the template still uses the placeholder.
///
/// A template that no longer names the placeholder was changed by someone else
/// (or never swapped) and is left alone.
pub async fn restore_template_scheduler(
    cluster: &dyn ClusterApi,
    state: &SchedulerState,
    max_retries: u32,
) -> Result<(), Report<ClusterError>> {
    let attempts = max_retries.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let current = cluster.get_template_scheduler(&state.parent).await?;
        let current_name = effective_scheduler(current.scheduler_name.as_deref());
        if current_name != state.placeholder {
            debug!(parent = %state.parent, scheduler = current_name, "no scheduler to restore");
            return Ok(());
        }

        match cluster
            .set_template_scheduler(
                &state.parent,
                &state.original,
                current.resource_version.as_deref(),
            )
            .await
        {
            Ok(()) => {
                info!(parent = %state.parent, scheduler = %state.original, "scheduler restored");
                return Ok(());
            }
            Err(e) if e.current_context().is_conflict() && attempt < attempts => {
                warn!(parent = %state.parent, attempt, "write conflict restoring scheduler, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Delete the `Pending` pods of `parent` that use the `placeholder` scheduler.
///
/// Returns how many were deleted; individual delete failures are logged and skipped.
pub async fn clean_pending_pods(
    cluster: &dyn ClusterApi,
    parent: &ParentRef,
    placeholder: &str,
) -> Result<usize, Report<ClusterError>> {
    let kind = parent.kind.to_string();
    let pods = cluster.list_pods(&parent.namespace).await?;

    let mut deleted = 0;
    for pod in pods.iter().filter(|pod| {
        let pending = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some("Pending");
        let placeholder_scheduled = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.scheduler_name.as_deref())
            == Some(placeholder);
        pending
            && placeholder_scheduled
            && pod.metadata.deletion_timestamp.is_none()
            && is_controlled_by(pod, &kind, &parent.name)
    }) {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        match cluster.delete_pod(&parent.namespace, name).await {
            Ok(()) => {
                debug!(pod = %pod_full_name(pod), "deleted pending pod");
                deleted += 1;
            }
            Err(e) => warn!(pod = %pod_full_name(pod), "failed to delete pending pod: {e:?}"),
        }
    }
    Ok(deleted)
}
