use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::registry::LeaseId;
use super::registry::LeaseRegistry;
use crate::domain::action::ActionError;

/// Renewal task owned by a [`LockHelper`].
struct Heartbeat {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

/// Acquire, renew and release the lease on a single key.
///
/// Dropping a helper that still holds its lease stops the heartbeat and
/// releases the lease, so the lease cannot outlive the scope that took it.
/// A lease that expired and was taken over by someone else is never released
/// on their behalf.
pub struct LockHelper {
    key: String,
    registry: Arc<LeaseRegistry>,
    lease: Option<LeaseId>,
    /// Set by the heartbeat once a renewal finds the lease gone.
    lost: Arc<AtomicBool>,
    heartbeat: Option<Heartbeat>,
}

impl LockHelper {
    pub fn new(
        key: impl Into<String>,
        registry: Arc<LeaseRegistry>,
    ) -> Result<Self, Report<ActionError>> {
        let key = key.into();
        if key.is_empty() {
            return Err(Report::new(ActionError::ValidationError {
                message: "lock key must not be empty".to_string(),
            }));
        }
        Ok(Self {
            key,
            registry,
            lease: None,
            lost: Arc::new(AtomicBool::new(false)),
            heartbeat: None,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the lease is held and no renewal has found it lost.
    pub fn is_held(&self) -> bool {
        self.lease.is_some() && !self.lost.load(Ordering::Acquire)
    }

    /// Single registration attempt.
    pub fn acquire(&mut self) -> bool {
        if !self.is_held() {
            self.stop_heartbeat();
            self.lease = self.registry.register_owned(&self.key);
            self.lost.store(false, Ordering::Release);
        }
        self.is_held()
    }

    /// Poll [`LockHelper::acquire`] every `poll_interval` until it succeeds or `timeout` elapses.
    pub async fn try_lock(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), Report<ActionError>> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if self.acquire() {
                debug!(key = %self.key, waited = ?started.elapsed(), "lock acquired");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Report::new(ActionError::LockTimeout {
                    key: self.key.clone(),
                    waited: timeout,
                }));
            }
            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Start renewing the lease at half its TTL until [`LockHelper::release_lock`].
    pub fn keep_renew_lock(&mut self) {
        let Some(id) = self.lease.filter(|_| self.is_held()) else {
            warn!(key = %self.key, "not renewing a lock that is not held");
            return;
        };
        if self.heartbeat.is_some() {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let key = self.key.clone();
        let lost = Arc::clone(&self.lost);
        let period = (registry.ttl() / 2).max(Duration::from_millis(1));
        let token = CancellationToken::new();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if !registry.renew_owned(&key, id) {
                            lost.store(true, Ordering::Release);
                            warn!(key = %key, "lease lost before renewal, stopping heartbeat");
                            break;
                        }
                    }
                }
            }
        });

        self.heartbeat = Some(Heartbeat { handle, token });
    }

    /// Stop the heartbeat, then release the lease. No-op if never acquired.
    pub async fn release_lock(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.token.cancel();
            if let Err(e) = heartbeat.handle.await {
                warn!(key = %self.key, "lease heartbeat ended abnormally: {e}");
            }
        }
        self.release_lease();
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.token.cancel();
            heartbeat.handle.abort();
        }
    }

    fn release_lease(&mut self) {
        let Some(id) = self.lease.take() else {
            return;
        };
        if self.lost.swap(false, Ordering::AcqRel) {
            warn!(key = %self.key, "lease was lost while held, not releasing");
        } else if self.registry.release_owned(&self.key, id) {
            debug!(key = %self.key, "lock released");
        } else {
            warn!(key = %self.key, "lease expired and was taken over before release");
        }
    }
}

impl Drop for LockHelper {
    fn drop(&mut self) {
        self.stop_heartbeat();
        self.release_lease();
    }
}
