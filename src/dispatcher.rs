//! Pulls ready keys off the event queue and runs the reconcile pipeline (C5)
//!
//! Grounded on `kube-runtime`'s `controller::applier` loop: a pool of workers
//! each pulling one item at a time, wrapping the user callback in a tracing
//! span, and turning its result back into queue operations. This version adds
//! the deletion/finalizer gate ahead of the user callback and catches panics
//! from it the way `controller::applier` catches `Result` errors, since here
//! a wedged worker would starve the rest of that worker's share of the pool.

use crate::{
    client::ResourceClient,
    finalizer::FinalizerManager,
    key::ObjectKey,
    metrics::Metrics,
    object::KubeObject,
    queue::EventQueue,
    reconcile::{Context, DispatchEventType, ReconcileContext, ReconcileError, ReconcileResult},
};
use chrono::Utc;
use futures::FutureExt;
use std::{future::Future, panic::AssertUnwindSafe, pin::Pin, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// A user reconciler: given the current object and shared context, decide
/// what to do and report back a [`ReconcileResult`].
///
/// Implemented as a trait rather than a bare `Fn` so embedders can hold state
/// (a client handle, a cache) without threading it all through `Context`.
pub trait Reconciler<O, T>: Send + Sync {
    fn reconcile(&self, ctx: ReconcileContext<O>, shared: Context<T>) -> Pin<Box<dyn Future<Output = ReconcileResult> + Send>>;
}

impl<O, T, F, Fut> Reconciler<O, T> for F
where
    F: Fn(ReconcileContext<O>, Context<T>) -> Fut + Send + Sync,
    Fut: Future<Output = ReconcileResult> + Send + 'static,
{
    fn reconcile(&self, ctx: ReconcileContext<O>, shared: Context<T>) -> Pin<Box<dyn Future<Output = ReconcileResult> + Send>> {
        Box::pin((self)(ctx, shared))
    }
}

/// Tuning knobs for a [`Dispatcher`]'s worker pool.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    /// Upper bound for the exponential re-enqueue delay after a `Fail` result.
    pub max_retry_backoff: Duration,
    /// Wraps each user `Reconcile` call; a call that runs past this is
    /// treated the same as a `Fail` result.
    pub reconcile_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            max_retry_backoff: Duration::from_secs(32),
            reconcile_timeout: Duration::from_secs(30),
        }
    }
}

fn retry_delay(attempt: u32, max: Duration) -> Duration {
    let exp = attempt.min(5);
    Duration::from_secs(1u64 << exp).min(max)
}

/// Runs the reconcile pipeline for one controller: refresh, deletion gate,
/// finalizer registration, user callback, and turning the result back into
/// queue operations.
pub struct Dispatcher<O, C, T> {
    client: Arc<C>,
    queue: EventQueue<O>,
    finalizer: Option<FinalizerManager<O>>,
    reconciler: Arc<dyn Reconciler<O, T>>,
    shared: Context<T>,
    config: DispatcherConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<O, C, T> Dispatcher<O, C, T>
where
    O: KubeObject + Clone + Send + Sync + 'static,
    C: ResourceClient<O> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new(
        client: Arc<C>,
        queue: EventQueue<O>,
        finalizer: Option<FinalizerManager<O>>,
        reconciler: Arc<dyn Reconciler<O, T>>,
        shared: Context<T>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            client,
            queue,
            finalizer,
            reconciler,
            shared,
            config,
            metrics: None,
        }
    }

    /// Attaches a metrics sink; counters are recorded alongside the existing
    /// queue operations, never in place of them.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn queue(&self) -> &EventQueue<O> {
        &self.queue
    }

    /// Runs the worker pool until `cancel` fires, then drains the queue of
    /// items already in flight before returning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut workers = Vec::with_capacity(self.config.worker_count);
        for id in 0..self.config.worker_count {
            let this = self.clone();
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move { this.worker_loop(id, cancel).await }));
        }
        cancel.cancelled().await;
        self.queue.shutdown();
        for worker in workers {
            let _ = worker.await;
        }
    }

    async fn worker_loop(&self, worker_id: usize, cancel: CancellationToken) {
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                item = self.queue.get() => item,
            };
            let Some(item) = item else {
                return;
            };
            let span = tracing::info_span!("reconcile", worker = worker_id, key = %item.key, attempt = item.attempt);
            self.process(item.key, item.object, item.attempt).instrument(span).await;
        }
    }

    /// Re-reads the authoritative object unless it's already known to be
    /// terminating, in which case a refresh would only burn an RPC: per the
    /// spec's refresh policy, a `Deleted` observation never needs a refresh.
    async fn refresh(&self, key: &ObjectKey, observed: Option<O>) -> Result<Option<(O, DispatchEventType)>, ()> {
        let already_deleting = observed.as_ref().is_some_and(|obj| obj.deletion_timestamp().is_some());
        if already_deleting {
            return Ok(observed.map(|obj| (obj, DispatchEventType::Deleted)));
        }
        match self.client.get(key).await {
            Ok(Some(fresh)) => {
                let event_type = if fresh.deletion_timestamp().is_some() {
                    DispatchEventType::Deleted
                } else {
                    DispatchEventType::Modified
                };
                Ok(Some((fresh, event_type)))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "failed to refresh object before reconciling");
                Err(())
            }
        }
    }

    async fn process(&self, key: ObjectKey, observed: Option<O>, attempt: u32) {
        let refreshed = self.refresh(&key, observed).await;
        let (object, event_type) = match refreshed {
            Ok(Some((object, refreshed_type))) => (object, refreshed_type),
            Ok(None) => {
                tracing::debug!(key = %key, "object no longer exists, dropping");
                self.queue.done(&key);
                self.queue.forget(&key);
                return;
            }
            Err(()) => {
                let failures = self.queue.note_failure(&key);
                self.queue.done(&key);
                self.queue.add_after(key, retry_delay(failures, self.config.max_retry_backoff));
                return;
            }
        };
        let object = Arc::new(object);

        if object.deletion_timestamp().is_some() {
            self.run_deletion(&key, object, attempt).await;
            return;
        }

        if let Some(finalizer) = &self.finalizer {
            if !finalizer.is_registered(&object) {
                if let Err(err) = self.register_finalizer(&key, finalizer, &object).await {
                    tracing::warn!(key = %key, error = %err, "failed to register finalizer");
                    let failures = self.queue.note_failure(&key);
                    self.queue.done(&key);
                    self.queue.add_after(key, retry_delay(failures, self.config.max_retry_backoff));
                    return;
                }
                // The finalizer patch will itself surface as a `Modified`
                // watch event; nothing more to do on this dispatch.
                self.queue.done(&key);
                self.queue.forget(&key);
                return;
            }
        }

        let ctx = ReconcileContext {
            object: object.clone(),
            key: key.clone(),
            event_type,
            now: Utc::now(),
        };
        self.invoke_reconcile(key, ctx).await;
    }

    async fn run_deletion(&self, key: &ObjectKey, object: Arc<O>, attempt: u32) {
        let Some(finalizer) = &self.finalizer else {
            self.queue.done(key);
            self.queue.forget(key);
            return;
        };
        if !finalizer.is_registered(&object) {
            // Another finalizer (or none) is blocking deletion; nothing for
            // this controller to do.
            self.queue.done(key);
            self.queue.forget(key);
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_finalizer_run();
        }
        match AssertUnwindSafe(finalizer.finalize(object.clone())).catch_unwind().await {
            Ok(Ok(())) => {
                if let Err(err) = self.remove_finalizer(key, finalizer, &object).await {
                    tracing::warn!(key = %key, error = %err, "failed to remove finalizer after cleanup");
                    let failures = self.queue.note_failure(key);
                    self.queue.done(key);
                    self.queue.add_after(key.clone(), retry_delay(failures, self.config.max_retry_backoff));
                    return;
                }
                self.queue.done(key);
                self.queue.forget(key);
            }
            Ok(Err(err)) => {
                tracing::warn!(key = %key, attempt, error = %err, "finalizer chain failed");
                let failures = self.queue.note_failure(key);
                self.queue.done(key);
                self.queue.add_after(key.clone(), retry_delay(failures, self.config.max_retry_backoff));
            }
            Err(panic) => {
                tracing::error!(key = %key, "finalizer chain panicked");
                let failures = self.queue.note_failure(key);
                self.queue.done(key);
                self.queue.add_after(key.clone(), retry_delay(failures, self.config.max_retry_backoff));
                drop(panic);
            }
        }
    }

    /// `Test`+`Add`: fails (and is retried on the next dispatch) if another
    /// writer registered a finalizer list we didn't expect to see.
    async fn register_finalizer(&self, key: &ObjectKey, finalizer: &FinalizerManager<O>, object: &O) -> Result<(), String> {
        use json_patch::{AddOperation, PatchOperation, TestOperation};
        use jsonptr::PointerBuf;

        let list_path = PointerBuf::from_tokens(["metadata", "finalizers"]);
        let ops = if object.finalizers().is_empty() {
            vec![
                PatchOperation::Test(TestOperation {
                    path: list_path.clone(),
                    value: serde_json::Value::Null,
                }),
                PatchOperation::Add(AddOperation {
                    path: list_path,
                    value: serde_json::json!([finalizer.finalizer_id()]),
                }),
            ]
        } else {
            vec![
                PatchOperation::Test(TestOperation {
                    path: list_path.clone(),
                    value: serde_json::to_value(object.finalizers()).unwrap_or(serde_json::Value::Null),
                }),
                PatchOperation::Add(AddOperation {
                    path: PointerBuf::from_tokens(["metadata", "finalizers", "-"]),
                    value: serde_json::Value::String(finalizer.finalizer_id().to_string()),
                }),
            ]
        };
        self.client
            .patch(key, &crate::client::Patch(json_patch::Patch(ops)))
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    /// `Test`+`Remove` by index: fails if the finalizer at that slot isn't
    /// ours anymore, so a new `Cleanup` dispatch can re-resolve the index.
    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &FinalizerManager<O>, object: &O) -> Result<(), String> {
        use json_patch::{PatchOperation, RemoveOperation, TestOperation};
        use jsonptr::PointerBuf;

        let Some(index) = object.finalizers().iter().position(|f| f == finalizer.finalizer_id()) else {
            return Ok(());
        };
        let path = PointerBuf::from_tokens(["metadata".to_string(), "finalizers".to_string(), index.to_string()]);
        let ops = vec![
            PatchOperation::Test(TestOperation {
                path: path.clone(),
                value: serde_json::Value::String(finalizer.finalizer_id().to_string()),
            }),
            PatchOperation::Remove(RemoveOperation { path }),
        ];
        self.client
            .patch(key, &crate::client::Patch(json_patch::Patch(ops)))
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    async fn invoke_reconcile(&self, key: ObjectKey, ctx: ReconcileContext<O>) {
        let reconciler = self.reconciler.clone();
        let shared = self.shared.clone();
        let call = AssertUnwindSafe(reconciler.reconcile(ctx, shared)).catch_unwind();
        let result = match tokio::time::timeout(self.config.reconcile_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(key = %key, timeout = ?self.config.reconcile_timeout, "reconcile timed out");
                if let Some(metrics) = &self.metrics {
                    metrics.record_reconcile_timeout();
                }
                let failures = self.queue.note_failure(&key);
                self.queue.done(&key);
                self.queue.add_after(key, retry_delay(failures, self.config.max_retry_backoff));
                return;
            }
        };
        match result {
            Ok(ReconcileResult::Ok) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_reconcile_ok();
                }
                self.queue.done(&key);
                self.queue.forget(&key);
            }
            Ok(ReconcileResult::Requeue(after)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_reconcile_requeue();
                }
                self.queue.done(&key);
                self.queue.forget(&key);
                self.queue.add_after(key, after);
            }
            Ok(ReconcileResult::Fail(ReconcileError(err))) => {
                tracing::warn!(key = %key, error = %err, "reconcile failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_reconcile_fail();
                }
                let failures = self.queue.note_failure(&key);
                self.queue.done(&key);
                self.queue.add_after(key, retry_delay(failures, self.config.max_retry_backoff));
            }
            Err(panic) => {
                tracing::error!(key = %key, "reconcile panicked");
                if let Some(metrics) = &self.metrics {
                    metrics.record_reconcile_fail();
                }
                let failures = self.queue.note_failure(&key);
                self.queue.done(&key);
                self.queue.add_after(key, retry_delay(failures, self.config.max_retry_backoff));
                drop(panic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{ClientError, Patch, WatchEvent},
        key::ResourceKind,
        object::test_support::TestObject,
    };
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    fn setup_tracing() -> tracing::dispatcher::DefaultGuard {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish()
            .set_default()
    }

    struct FakeClient {
        objects: Mutex<HashMap<ObjectKey, TestObject>>,
        patches: Mutex<u32>,
    }

    impl FakeClient {
        fn with(objects: Vec<(ObjectKey, TestObject)>) -> Self {
            Self {
                objects: Mutex::new(objects.into_iter().collect()),
                patches: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ResourceClient<TestObject> for FakeClient {
        async fn get(&self, key: &ObjectKey) -> Result<Option<TestObject>, ClientError> {
            Ok(self.objects.lock().get(key).cloned())
        }

        async fn list(&self, _ns: Option<&str>, _sel: &str) -> Result<Vec<TestObject>, ClientError> {
            Ok(self.objects.lock().values().cloned().collect())
        }

        fn watch(
            &self,
            _namespace: Option<&str>,
            _resource_version: Option<String>,
            _selector: &str,
            _allow_bookmarks: bool,
        ) -> BoxStream<'static, Result<WatchEvent<TestObject>, ClientError>> {
            Box::pin(futures::stream::empty())
        }

        async fn patch(&self, key: &ObjectKey, _patch: &Patch) -> Result<TestObject, ClientError> {
            *self.patches.lock() += 1;
            let mut objects = self.objects.lock();
            let obj = objects.get_mut(key).ok_or(ClientError::NotFound)?;
            obj.finalizers.push("widgets.example.com/cleanup".into());
            Ok(obj.clone())
        }

        async fn delete(&self, _key: &ObjectKey) -> Result<(), ClientError> {
            Ok(())
        }

        async fn update_status(&self, object: &TestObject) -> Result<TestObject, ClientError> {
            Ok(object.clone())
        }
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(
            ResourceKind::new("example.com", "v1", "Widget", "widgets", true),
            Some("default".into()),
            name,
        )
    }

    #[tokio::test]
    async fn missing_finalizer_is_registered_before_reconcile_runs() {
        let obj = TestObject::new("a", "1");
        let client = Arc::new(FakeClient::with(vec![(key("a"), obj.clone())]));
        let queue: EventQueue<TestObject> = EventQueue::new();
        let finalizer = FinalizerManager::new("widgets.example.com/cleanup").unwrap();
        let called = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = called.clone();
        let reconciler: Arc<dyn Reconciler<TestObject, ()>> = Arc::new(
            move |_ctx: ReconcileContext<TestObject>, _shared: Context<()>| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    ReconcileResult::Ok
                }
            },
        );
        let dispatcher = Dispatcher::new(client.clone(), queue.clone(), Some(finalizer), reconciler, Context::new(()), DispatcherConfig::default());
        queue.add(key("a"), obj, DispatchEventType::Added);
        let item = queue.get().await.unwrap();
        dispatcher.process(item.key, item.object, item.attempt).await;

        assert_eq!(*client.patches.lock(), 1);
        assert_eq!(called.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_reconcile_is_recorded_in_metrics() {
        let mut obj = TestObject::new("a", "1");
        obj.finalizers.push("widgets.example.com/cleanup".into());
        let client = Arc::new(FakeClient::with(vec![(key("a"), obj.clone())]));
        let queue: EventQueue<TestObject> = EventQueue::new();
        let finalizer = FinalizerManager::new("widgets.example.com/cleanup").unwrap();
        let reconciler: Arc<dyn Reconciler<TestObject, ()>> =
            Arc::new(|_ctx: ReconcileContext<TestObject>, _shared: Context<()>| async { ReconcileResult::Ok });
        let metrics = crate::metrics::Metrics::shared();
        let dispatcher =
            Dispatcher::new(client, queue.clone(), Some(finalizer), reconciler, Context::new(()), DispatcherConfig::default())
                .with_metrics(metrics.clone());
        queue.add(key("a"), obj, DispatchEventType::Modified);
        let item = queue.get().await.unwrap();
        dispatcher.process(item.key, item.object, item.attempt).await;

        assert_eq!(metrics.reconcile.ok.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn registered_finalizer_lets_reconcile_run() {
        let mut obj = TestObject::new("a", "1");
        obj.finalizers.push("widgets.example.com/cleanup".into());
        let client = Arc::new(FakeClient::with(vec![(key("a"), obj.clone())]));
        let queue: EventQueue<TestObject> = EventQueue::new();
        let finalizer = FinalizerManager::new("widgets.example.com/cleanup").unwrap();
        let called = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = called.clone();
        let reconciler: Arc<dyn Reconciler<TestObject, ()>> = Arc::new(
            move |_ctx: ReconcileContext<TestObject>, _shared: Context<()>| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    ReconcileResult::Ok
                }
            },
        );
        let dispatcher = Dispatcher::new(client, queue.clone(), Some(finalizer), reconciler, Context::new(()), DispatcherConfig::default());
        queue.add(key("a"), obj, DispatchEventType::Modified);
        let item = queue.get().await.unwrap();
        dispatcher.process(item.key, item.object, item.attempt).await;

        assert_eq!(called.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deleted_object_runs_finalizer_then_removes_it() {
        let mut obj = TestObject::new("a", "1");
        obj.finalizers.push("widgets.example.com/cleanup".into());
        obj.deletion_timestamp = Some(Utc::now());
        let client = Arc::new(FakeClient::with(vec![(key("a"), obj.clone())]));
        let queue: EventQueue<TestObject> = EventQueue::new();
        let cleaned = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = cleaned.clone();
        let finalizer: FinalizerManager<TestObject> = FinalizerManager::new("widgets.example.com/cleanup")
            .unwrap()
            .with_step("cleanup", move |_obj| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<(), std::convert::Infallible>(())
                }
            });
        let reconciler: Arc<dyn Reconciler<TestObject, ()>> =
            Arc::new(|_ctx: ReconcileContext<TestObject>, _shared: Context<()>| async { ReconcileResult::Ok });
        let dispatcher = Dispatcher::new(client.clone(), queue.clone(), Some(finalizer), reconciler, Context::new(()), DispatcherConfig::default());
        queue.add(key("a"), obj, DispatchEventType::Modified);
        let item = queue.get().await.unwrap();
        dispatcher.process(item.key, item.object, item.attempt).await;

        assert_eq!(cleaned.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(*client.patches.lock(), 1);
    }

    #[tokio::test]
    async fn reconcile_failure_requeues_with_backoff() {
        tokio::time::pause();
        let obj = TestObject::new("a", "1");
        let mut registered = obj.clone();
        registered.finalizers.push("widgets.example.com/cleanup".into());
        let client = Arc::new(FakeClient::with(vec![(key("a"), registered.clone())]));
        let queue: EventQueue<TestObject> = EventQueue::new();
        let finalizer = FinalizerManager::new("widgets.example.com/cleanup").unwrap();
        let reconciler: Arc<dyn Reconciler<TestObject, ()>> = Arc::new(
            |_ctx: ReconcileContext<TestObject>, _shared: Context<()>| async {
                ReconcileResult::fail(std::io::Error::other("boom"))
            },
        );
        let dispatcher = Dispatcher::new(client, queue.clone(), Some(finalizer), reconciler, Context::new(()), DispatcherConfig::default());
        queue.add(key("a"), registered, DispatchEventType::Modified);
        let item = queue.get().await.unwrap();
        dispatcher.process(item.key, item.object, item.attempt).await;

        assert_eq!(queue.ready_len(), 0);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(queue.get().await.is_some());
    }

    #[tokio::test]
    async fn reconcile_exceeding_timeout_is_treated_as_failure() {
        tokio::time::pause();
        let mut obj = TestObject::new("a", "1");
        obj.finalizers.push("widgets.example.com/cleanup".into());
        let client = Arc::new(FakeClient::with(vec![(key("a"), obj.clone())]));
        let queue: EventQueue<TestObject> = EventQueue::new();
        let finalizer = FinalizerManager::new("widgets.example.com/cleanup").unwrap();
        let reconciler: Arc<dyn Reconciler<TestObject, ()>> = Arc::new(|_ctx: ReconcileContext<TestObject>, _shared: Context<()>| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ReconcileResult::Ok
        });
        let config = DispatcherConfig {
            reconcile_timeout: Duration::from_millis(100),
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(client, queue.clone(), Some(finalizer), reconciler, Context::new(()), config);
        queue.add(key("a"), obj, DispatchEventType::Modified);
        let item = queue.get().await.unwrap();
        dispatcher.process(item.key, item.object, item.attempt).await;

        assert_eq!(queue.ready_len(), 0);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(queue.get().await.is_some());
    }

    #[tokio::test]
    async fn panicking_reconcile_is_caught_and_requeued_with_backoff() {
        let _trace = setup_tracing();
        tokio::time::pause();
        let mut obj = TestObject::new("a", "1");
        obj.finalizers.push("widgets.example.com/cleanup".into());
        let client = Arc::new(FakeClient::with(vec![(key("a"), obj.clone())]));
        let queue: EventQueue<TestObject> = EventQueue::new();
        let finalizer = FinalizerManager::new("widgets.example.com/cleanup").unwrap();
        let reconciler: Arc<dyn Reconciler<TestObject, ()>> =
            Arc::new(|_ctx: ReconcileContext<TestObject>, _shared: Context<()>| async { panic!("reconciler exploded") });
        let metrics = crate::metrics::Metrics::shared();
        let dispatcher =
            Dispatcher::new(client, queue.clone(), Some(finalizer), reconciler, Context::new(()), DispatcherConfig::default())
                .with_metrics(metrics.clone());
        queue.add(key("a"), obj, DispatchEventType::Modified);
        let item = queue.get().await.unwrap();
        dispatcher.process(item.key, item.object, item.attempt).await;

        assert_eq!(queue.ready_len(), 0);
        assert_eq!(metrics.reconcile.fail.load(std::sync::atomic::Ordering::Relaxed), 1);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(queue.get().await.is_some());
    }
}
