//! Lease-based leader election (C7)
//!
//! Grounded on the shape of `examples/elector.rs`'s `Elector`: a
//! `LeaseState { Unheld | HeldBySelf | HeldByOther }` read from the lease
//! object, and a compare-and-set `try_acquire` that only succeeds if nobody
//! else holds an unexpired lease. Ported from that example's `Api<Lease>` +
//! `entry()`/`commit()` compare-and-set onto this runtime's `ResourceClient`
//! + `Test`/`Replace` JSON Patch, the same mechanism [`crate::dispatcher`]
//! uses for finalizer edits, and restructured around client-go's
//! `lease_duration`/`renew_deadline`/`retry_period` knobs rather than
//! kube-rs's halfway-renew heuristic.

use crate::{
    client::{ClientError, Patch, ResourceClient},
    key::ObjectKey,
    object::KubeObject,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Leader-election-specific accessors for the object backing the lease,
/// plus the ability to build the `Test`+`Replace` patch that claims it.
///
/// Kept separate from [`KubeObject`] because the lease's spec fields
/// (`holderIdentity`, `leaseDurationSeconds`, ...) are wire details this
/// core has no need to know; the embedder's type speaks them.
pub trait LeaseObject: KubeObject + Clone {
    fn holder_identity(&self) -> Option<&str>;
    fn lease_duration(&self) -> Option<Duration>;
    fn renew_time(&self) -> Option<DateTime<Utc>>;

    /// Builds a patch that claims this lease for `identity`, valid for
    /// `lease_duration` starting at `now`. `new_term` is `true` when the
    /// holder is changing (a prior holder's lease expired, or it was
    /// previously unheld), so the implementation can bump whatever
    /// transition counter it tracks.
    fn claim_patch(&self, identity: &str, lease_duration: Duration, now: DateTime<Utc>, new_term: bool) -> Patch;
}

/// `lease_duration`/`renew_deadline`/`retry_period`, the client-go
/// leader-election knobs named by the spec's defaults.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionConfig {
    /// How long a held lease remains valid without renewal.
    #[serde(with = "humantime_serde")]
    pub lease_duration: Duration,
    /// How long a current leader keeps retrying a failing renewal before
    /// giving up leadership.
    #[serde(with = "humantime_serde")]
    pub renew_deadline: Duration,
    /// Delay between acquire/renew attempts.
    #[serde(with = "humantime_serde")]
    pub retry_period: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LeaseState {
    Unheld,
    HeldBySelf,
    HeldByOther { holder: String, expires_at: DateTime<Utc> },
}

fn state_of<L: LeaseObject>(lease: &L, identity: &str, now: DateTime<Utc>) -> LeaseState {
    let Some(holder) = lease.holder_identity() else {
        return LeaseState::Unheld;
    };
    let duration = lease.lease_duration().unwrap_or(Duration::ZERO);
    let renewed_at = lease.renew_time().unwrap_or(DateTime::<Utc>::MIN_UTC);
    let expires_at = renewed_at + ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::zero());
    if holder == identity {
        LeaseState::HeldBySelf
    } else if expires_at > now {
        LeaseState::HeldByOther {
            holder: holder.to_string(),
            expires_at,
        }
    } else {
        LeaseState::Unheld
    }
}

/// `true` once this replica observes itself as leader, `false` otherwise.
/// [`LeaderElector::run`] drives this; subscribers (chiefly [`crate::host`])
/// watch it to start and stop subsystems.
pub type IsLeader = watch::Receiver<bool>;

/// Runs lease-based leader election for one identity against one lease
/// object, keyed by `key`.
pub struct LeaderElector<L, C> {
    client: Arc<C>,
    key: ObjectKey,
    identity: String,
    config: LeaderElectionConfig,
    _marker: std::marker::PhantomData<fn() -> L>,
}

impl<L, C> LeaderElector<L, C>
where
    L: LeaseObject + Send + Sync + 'static,
    C: ResourceClient<L> + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(client: Arc<C>, key: ObjectKey, identity: impl Into<String>, config: LeaderElectionConfig) -> Self {
        Self {
            client,
            key,
            identity: identity.into(),
            config,
            _marker: std::marker::PhantomData,
        }
    }

    /// Runs leader election until `cancel` fires. Returns a watch channel
    /// reflecting the current leadership state; the task driving elections
    /// is spawned in the background and exits once `cancel` is observed.
    pub fn run(self: Arc<Self>, cancel: CancellationToken) -> IsLeader {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move { self.run_loop(cancel, tx).await });
        rx
    }

    async fn run_loop(&self, cancel: CancellationToken, tx: watch::Sender<bool>) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                acquired = self.acquire(&cancel) => {
                    if !acquired {
                        return;
                    }
                }
            }
            tracing::info!(identity = %self.identity, key = %self.key, "acquired leadership");
            let _ = tx.send(true);

            let lost = self.hold(&cancel).await;
            let _ = tx.send(false);
            if !lost {
                return;
            }
            tracing::warn!(identity = %self.identity, key = %self.key, "lost leadership, retrying acquisition");
        }
    }

    /// Attempts to acquire the lease every `retry_period` until it succeeds
    /// or `cancel` fires. Returns `false` only on cancellation.
    async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            if self.try_claim().await {
                return true;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(self.config.retry_period) => {}
            }
        }
    }

    /// Holds the lease, renewing every `retry_period`, until a renewal fails
    /// continuously for `renew_deadline` (leadership lost) or `cancel`
    /// fires. Returns `true` if leadership was lost and acquisition should
    /// be retried, `false` on cancellation.
    async fn hold(&self, cancel: &CancellationToken) -> bool {
        let mut first_failure: Option<tokio::time::Instant> = None;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(self.config.retry_period) => {}
            }
            if self.try_claim().await {
                first_failure = None;
                continue;
            }
            let failing_since = *first_failure.get_or_insert_with(tokio::time::Instant::now);
            if failing_since.elapsed() >= self.config.renew_deadline {
                return true;
            }
        }
    }

    /// One compare-and-set attempt: fetch, decide, patch. `true` if this
    /// replica holds (or now holds) the lease afterward.
    async fn try_claim(&self) -> bool {
        let now = Utc::now();
        let current = match self.client.get(&self.key).await {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "failed to read lease");
                return false;
            }
        };

        let (state, patch) = match &current {
            None => (LeaseState::Unheld, None),
            Some(lease) => {
                let state = state_of(lease, &self.identity, now);
                (state, Some(lease))
            }
        };

        match state {
            LeaseState::HeldByOther { holder, expires_at } => {
                tracing::debug!(key = %self.key, %holder, %expires_at, "lease held by another replica");
                false
            }
            LeaseState::HeldBySelf => {
                let lease = patch.expect("HeldBySelf implies a lease object was read");
                self.submit_claim(lease, now, false).await
            }
            LeaseState::Unheld => match patch {
                Some(lease) => self.submit_claim(lease, now, true).await,
                None => {
                    tracing::debug!(key = %self.key, "no lease object exists yet, nothing to claim");
                    false
                }
            },
        }
    }

    async fn submit_claim(&self, lease: &L, now: DateTime<Utc>, new_term: bool) -> bool {
        let patch = lease.claim_patch(&self.identity, self.config.lease_duration, now, new_term);
        match self.client.patch(&self.key, &patch).await {
            Ok(_) => true,
            Err(err) if err.is_conflict() => {
                tracing::debug!(key = %self.key, "lost race claiming lease");
                false
            }
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "failed to claim lease");
                false
            }
        }
    }
}
