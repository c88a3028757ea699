//! Reconciliation context and result types
//!
//! Grounded on `kube-runtime`'s `controller::{Context, Action}`: a
//! cheaply-clonable read-only data handle passed alongside the object, and a
//! result type describing what should happen next rather than a bare
//! `Result`.

use crate::key::ObjectKey;
use chrono::{DateTime, Utc};
use std::{error::Error as StdError, fmt, sync::Arc, time::Duration};

/// Read-only shared state threaded through to every `Reconcile` and
/// finalizer call, so a controller's callbacks can share a client handle,
/// cache, or config without a global.
pub struct Context<T>(Arc<T>);

impl<T> Context<T> {
    #[must_use]
    pub fn new(state: T) -> Self {
        Self(Arc::new(state))
    }

    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context").field(&self.0).finish()
    }
}

/// Which kind of watch event caused this dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEventType {
    Added,
    Modified,
    Deleted,
}

/// `{object, eventType, now}`, constructed fresh per dispatch.
#[derive(Debug, Clone)]
pub struct ReconcileContext<O> {
    pub object: Arc<O>,
    pub key: ObjectKey,
    pub event_type: DispatchEventType,
    pub now: DateTime<Utc>,
}

/// An opaque reconciliation failure. Carries the user's error without the
/// core needing to know its concrete type.
#[derive(Debug)]
pub struct ReconcileError(pub Box<dyn StdError + Send + Sync>);

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for ReconcileError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}

impl ReconcileError {
    pub fn new(err: impl StdError + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

/// The outcome of one `Reconcile` call.
#[derive(Debug)]
pub enum ReconcileResult {
    /// Reconciliation succeeded; wait for the next watch event.
    Ok,
    /// Reconciliation succeeded, but ask to be called again after `after`
    /// even if no watch event arrives in the meantime.
    Requeue(Duration),
    /// Reconciliation failed; re-enqueue with exponential backoff and
    /// surface to observability.
    Fail(ReconcileError),
}

impl ReconcileResult {
    #[must_use]
    pub fn requeue(after: Duration) -> Self {
        Self::Requeue(after)
    }

    pub fn fail(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Fail(ReconcileError::new(err))
    }
}
