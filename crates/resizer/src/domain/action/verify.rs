use std::time::Duration;

use error_stack::Report;
use tokio::time::sleep;
use tracing::debug;
use tracing::warn;

use super::traits::ClusterApi;
use super::types::ActionError;

/// Poll pod `namespace/name` until it is `Running`.
///
/// The first check happens immediately, then every `interval`, for at most
/// `attempts` checks. Failed lookups count as a check.
///
/// # Errors
///
/// - [`ActionError::PodDeletedDuringAction`] as soon as a deletion timestamp is seen
/// - [`ActionError::VerificationTimeout`] if the pod is not running after `attempts` checks
#[tracing::instrument(skip(cluster))]
pub async fn wait_pod_running(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    attempts: u32,
    interval: Duration,
) -> Result<(), Report<ActionError>> {
    let full_name = format!("{namespace}/{name}");
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match cluster.get_pod(namespace, name).await {
            Ok(pod) => {
                if pod.metadata.deletion_timestamp.is_some() {
                    return Err(Report::new(ActionError::PodDeletedDuringAction {
                        pod: full_name,
                    }));
                }
                let phase = pod
                    .status
                    .as_ref()
                    .and_then(|status| status.phase.as_deref())
                    .unwrap_or("Unknown");
                if phase == "Running" {
                    debug!(attempt, "pod is running");
                    return Ok(());
                }
                debug!(attempt, phase, "pod is not running yet");
            }
            Err(e) => warn!(attempt, "failed to get pod: {e:?}"),
        }
        if attempt < attempts {
            sleep(interval).await;
        }
    }
    Err(Report::new(ActionError::VerificationTimeout {
        pod: full_name,
        attempts,
    }))
}
