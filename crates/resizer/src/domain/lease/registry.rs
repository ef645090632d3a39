//! Process-wide table of time-bounded exclusive claims keyed by string

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::interval;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

/// Identifies one grant of a lease. A key taken over after expiry gets a new id,
/// so the previous holder can no longer renew or release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(u64);

#[derive(Debug, Clone, Copy)]
struct Lease {
    id: LeaseId,
    expires_at: Instant,
}

impl Lease {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Grants at most one live lease per key.
///
/// Every operation goes through the `DashMap` entry API so that concurrent
/// callers never observe a half-updated lease. Expired leases are treated as
/// absent right away and physically removed by [`LeaseRegistry::run_sweeper`],
/// so a holder that crashed without releasing cannot block a key forever.
///
/// Construct one per process and share it behind an `Arc`.
pub struct LeaseRegistry {
    leases: DashMap<String, Lease>,
    ttl: Duration,
    next_id: AtomicU64,
}

impl LeaseRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: DashMap::new(),
            ttl,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claim `key`. Returns true iff no live lease existed.
    pub fn register(&self, key: &str) -> bool {
        self.register_owned(key).is_some()
    }

    /// Claim `key` and return the id of the new lease, or `None` if a live lease exists.
    pub fn register_owned(&self, key: &str) -> Option<LeaseId> {
        let now = Instant::now();
        let lease = Lease {
            id: LeaseId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            expires_at: now + self.ttl,
        };
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return None;
                }
                debug!(key, "taking over expired lease");
                occupied.insert(lease);
                Some(lease.id)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease);
                Some(lease.id)
            }
        }
    }

    /// Extend the lease on `key` by one TTL. Returns false if it already expired or was released.
    pub fn renew(&self, key: &str) -> bool {
        self.renew_if(key, |_| true)
    }

    /// Like [`LeaseRegistry::renew`], but only while `key` is still held under `id`.
    pub fn renew_owned(&self, key: &str, id: LeaseId) -> bool {
        self.renew_if(key, |lease| lease.id == id)
    }

    fn renew_if(&self, key: &str, owned: impl Fn(&Lease) -> bool) -> bool {
        let now = Instant::now();
        match self.leases.get_mut(key) {
            Some(mut lease) if lease.is_live(now) && owned(&*lease) => {
                lease.expires_at = now + self.ttl;
                true
            }
            _ => false,
        }
    }

    /// Drop the lease on `key`; releasing an absent key is a no-op.
    pub fn release(&self, key: &str) {
        self.leases.remove(key);
    }

    /// Drop the lease on `key` only if it is still the grant `id`.
    /// Returns false when the key was taken over or is already gone.
    pub fn release_owned(&self, key: &str, id: LeaseId) -> bool {
        self.leases
            .remove_if(key, |_, lease| lease.id == id)
            .is_some()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.leases
            .get(key)
            .is_some_and(|lease| lease.is_live(now))
    }

    /// Number of stored leases, including expired ones not swept yet.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Remove expired leases, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.leases.retain(|_, lease| {
            let live = lease.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Sweep expired leases every `period` until cancelled.
    #[tracing::instrument(skip(self, cancellation_token), fields(ttl = ?self.ttl))]
    pub async fn run_sweeper(&self, period: Duration, cancellation_token: CancellationToken) {
        info!("Starting lease sweeper");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Lease sweeper shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        debug!(removed, "swept expired leases");
                    }
                }
            }
        }
    }
}
