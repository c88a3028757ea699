//! Lifecycle orchestrator tying watcher, queue, and dispatcher together (C8)
//!
//! Owns the hierarchical cancellation scope the rest of the runtime is
//! threaded through: cancelling the root token must close watch streams,
//! stop new queue pops, and propagate into in-flight `Reconcile` calls, all
//! within a bounded interval. This is built directly on the cancellation and
//! worker-pool patterns already established in [`crate::watcher`] and
//! [`crate::dispatcher`], composed into one `Start`/`Stop` lifecycle, rather
//! than on a dedicated prior lifecycle manager.

use crate::{
    client::{ResourceClient, WatchEvent},
    dispatcher::Dispatcher,
    key::{key_of, ObjectKey, ResourceKind},
    metrics::Metrics,
    object::KubeObject,
    reconcile::DispatchEventType,
    selector::LabelSelectorProvider,
    watcher::watcher,
};
use futures::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Exit status for the host process, per the spec's exit code contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Shut down cleanly on request.
    Normal,
    /// Leader election observed a permanent loss of leadership (the
    /// elector's watch channel closed) and the host gave up rather than
    /// loop forever with no subsystems running.
    LeadershipLost,
}

impl ExitStatus {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Normal => 0,
            ExitStatus::LeadershipLost => 2,
        }
    }
}

/// One controller registration: a watch over a single resource kind feeding
/// a dedicated dispatcher worker pool.
///
/// Type-erased behind [`ControllerHandle`] so [`OperatorHost`] can hold many
/// differently-typed controllers (one per CRD) in a single `Vec`.
#[async_trait::async_trait]
pub trait ControllerHandle: Send + Sync {
    /// Runs the watcher and dispatcher until `cancel` fires, then returns
    /// once both have drained.
    async fn run(&self, cancel: CancellationToken);
}

/// A [`ControllerHandle`] binding one [`crate::watcher::watcher`] stream to
/// one [`Dispatcher`].
pub struct Controller<O, C, T> {
    kind: ResourceKind,
    namespace: Option<String>,
    selector: Arc<dyn LabelSelectorProvider>,
    reconnect_max_backoff: Duration,
    client: Arc<C>,
    dispatcher: Arc<Dispatcher<O, C, T>>,
    metrics: Option<Arc<Metrics>>,
}

impl<O, C, T> Controller<O, C, T>
where
    O: KubeObject + Clone + Send + Sync + 'static,
    C: ResourceClient<O> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        kind: ResourceKind,
        namespace: Option<String>,
        selector: Arc<dyn LabelSelectorProvider>,
        reconnect_max_backoff: Duration,
        client: Arc<C>,
        dispatcher: Arc<Dispatcher<O, C, T>>,
    ) -> Self {
        Self {
            kind,
            namespace,
            selector,
            reconnect_max_backoff,
            client,
            dispatcher,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn key_for(&self, object: &O) -> ObjectKey {
        key_of(&self.kind, object)
    }
}

#[async_trait::async_trait]
impl<O, C, T> ControllerHandle for Controller<O, C, T>
where
    O: KubeObject + Clone + Send + Sync + 'static,
    C: ResourceClient<O> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    async fn run(&self, cancel: CancellationToken) {
        let dispatcher_task = {
            let dispatcher = self.dispatcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(cancel).await })
        };

        let stream = watcher(
            self.client.clone(),
            self.namespace.clone(),
            self.selector.clone(),
            self.reconnect_max_backoff,
            cancel.clone(),
            self.metrics.clone(),
        );
        tokio::pin!(stream);
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                item = stream.next() => item,
            };
            match next {
                None => break,
                Some(Ok(WatchEvent::Bookmark { .. })) => {}
                Some(Ok(WatchEvent::Added(obj))) => {
                    let key = self.key_for(&obj);
                    self.dispatcher.queue().add(key, obj, DispatchEventType::Added);
                }
                Some(Ok(WatchEvent::Modified(obj))) => {
                    let key = self.key_for(&obj);
                    self.dispatcher.queue().add(key, obj, DispatchEventType::Modified);
                }
                Some(Ok(WatchEvent::Deleted(obj))) => {
                    let key = self.key_for(&obj);
                    self.dispatcher.queue().add(key, obj, DispatchEventType::Deleted);
                }
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "watch reconnecting after error");
                }
            }
        }

        let _ = dispatcher_task.await;
    }
}

/// Tuning knobs for [`OperatorHost::run`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Upper bound `Stop` waits for in-flight reconciliations before forced
    /// termination.
    pub shutdown_grace: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Owns the hierarchical cancellation scope for a set of controllers and, if
/// leader election is enabled, gates their execution on an externally-driven
/// leadership observer.
///
/// Takes a bare `watch::Receiver<bool>` rather than a [`crate::lease::LeaderElector`]
/// directly, so the leadership signal can be injected in tests (or driven by
/// some other election mechanism entirely) without the host depending on the
/// lease machinery's concrete types.
pub struct OperatorHost {
    controllers: Vec<Arc<dyn ControllerHandle>>,
    leadership: Option<watch::Receiver<bool>>,
    config: HostConfig,
}

impl OperatorHost {
    #[must_use]
    pub fn new(controllers: Vec<Arc<dyn ControllerHandle>>, leadership: Option<watch::Receiver<bool>>, config: HostConfig) -> Self {
        Self {
            controllers,
            leadership,
            config,
        }
    }

    /// Runs until `shutdown` fires (or, with leader election enabled,
    /// leadership is permanently lost). `Start()`/`Stop(deadline)` from the
    /// spec's lifecycle map onto entering and cancelling `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) -> ExitStatus {
        match self.leadership.clone() {
            None => {
                self.run_controllers_until(shutdown).await;
                ExitStatus::Normal
            }
            Some(leadership) => self.run_with_leadership(leadership, shutdown).await,
        }
    }

    async fn run_with_leadership(&self, mut leadership: watch::Receiver<bool>, shutdown: CancellationToken) -> ExitStatus {
        loop {
            if !*leadership.borrow() {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return ExitStatus::Normal,
                    changed = leadership.changed() => {
                        if changed.is_err() {
                            tracing::error!("leader election observer closed before acquiring leadership");
                            return ExitStatus::LeadershipLost;
                        }
                        if !*leadership.borrow() {
                            continue;
                        }
                    }
                }
            }

            tracing::info!("leadership acquired, starting controllers");
            let scope = shutdown.child_token();
            let run_fut = self.run_controllers_until(scope.clone());
            tokio::pin!(run_fut);
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    scope.cancel();
                    run_fut.await;
                    return ExitStatus::Normal;
                }
                changed = leadership.changed() => {
                    scope.cancel();
                    run_fut.await;
                    if changed.is_err() {
                        tracing::error!("leader election observer closed while leading");
                        return ExitStatus::LeadershipLost;
                    }
                    tracing::warn!("leadership lost, stopping controllers");
                }
            }
        }
    }

    /// Spawns every controller under `cancel`, then waits for it to fire and
    /// gives the controllers up to `config.shutdown_grace` to wind down
    /// before aborting whatever is left.
    async fn run_controllers_until(&self, cancel: CancellationToken) {
        let handles: Vec<_> = self
            .controllers
            .iter()
            .map(|controller| {
                let controller = controller.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { controller.run(cancel).await })
            })
            .collect();

        cancel.cancelled().await;
        let abort_handles: Vec<_> = handles.iter().map(tokio::task::JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.config.shutdown_grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!(grace = ?self.config.shutdown_grace, "controllers did not shut down within grace period, forcing termination");
            for handle in abort_handles {
                handle.abort();
            }
        }
    }
}
