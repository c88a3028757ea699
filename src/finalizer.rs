//! Registers finalizer strings on objects; invokes user finalizers on deletion (C6)
//!
//! Grounded on `kube-runtime`'s `finalizer()` helper, which manages a single
//! `ObjectMeta::finalizers` entry through a `Test`+`Add`/`Remove` JSON Patch.
//! Generalized here into a registry of named steps run as an ordered,
//! short-circuiting chain, per spec §4.6 ("finite sequence of handlers with
//! short-circuit on failure; expressed as an ordered list plus a fold").

use crate::object::KubeObject;
use futures::future::BoxFuture;
use std::{error::Error as StdError, fmt, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("finalizer id {0:?} is not a valid DNS subdomain / slash-separated finalizer string")]
    InvalidFinalizerId(String),
    #[error("finalizer step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Validates the Kubernetes finalizer string format: a DNS subdomain,
/// optionally namespaced with a single `/`, e.g. `widgets.example.com/cleanup`.
pub fn validate_finalizer_id(id: &str) -> Result<(), Error> {
    let is_dns_label_char = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '.';
    let valid = match id.split_once('/') {
        Some((domain, name)) => {
            !domain.is_empty()
                && !name.is_empty()
                && domain.chars().all(is_dns_label_char)
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        }
        None => !id.is_empty() && id.chars().all(is_dns_label_char),
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidFinalizerId(id.to_string()))
    }
}

type StepFn<O> =
    Arc<dyn Fn(Arc<O>) -> BoxFuture<'static, Result<(), Box<dyn StdError + Send + Sync>>> + Send + Sync>;

#[derive(Clone)]
struct Step<O> {
    name: String,
    run: StepFn<O>,
}

impl<O> fmt::Debug for Step<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Registers the finalizer string this controller owns, plus the ordered
/// chain of cleanup steps run before it is removed.
#[derive(Clone, Debug)]
pub struct FinalizerManager<O> {
    finalizer_id: String,
    steps: Vec<Step<O>>,
}

impl<O: KubeObject> FinalizerManager<O> {
    /// `finalizer_id` must be a valid Kubernetes finalizer string; see
    /// [`validate_finalizer_id`].
    pub fn new(finalizer_id: impl Into<String>) -> Result<Self, Error> {
        let finalizer_id = finalizer_id.into();
        validate_finalizer_id(&finalizer_id)?;
        Ok(Self {
            finalizer_id,
            steps: Vec::new(),
        })
    }

    /// Appends a cleanup step to the chain. Steps run in registration order;
    /// the first to fail aborts the remaining steps and the finalizer is
    /// kept (the whole chain is retried on the next reconciliation).
    #[must_use]
    pub fn with_step<F, Fut, E>(mut self, name: impl Into<String>, step: F) -> Self
    where
        F: Fn(Arc<O>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        self.steps.push(Step {
            name: name.into(),
            run: Arc::new(move |obj| Box::pin(step(obj))),
        });
        self
    }

    #[must_use]
    pub fn finalizer_id(&self) -> &str {
        &self.finalizer_id
    }

    /// `true` if this controller's finalizer string is present on `object`.
    #[must_use]
    pub fn is_registered(&self, object: &O) -> bool {
        object.finalizers().iter().any(|f| f == self.finalizer_id.as_str())
    }

    /// Runs every registered step in order against `object`. Aborts and
    /// returns the first failure without running later steps.
    pub async fn finalize(&self, object: Arc<O>) -> Result<(), Error> {
        for step in &self.steps {
            tracing::debug!(step = %step.name, finalizer = %self.finalizer_id, "running finalizer step");
            (step.run)(object.clone()).await.map_err(|source| Error::StepFailed {
                step: step.name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::test_support::TestObject;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn accepts_namespaced_dns_finalizer() {
        assert!(validate_finalizer_id("widgets.example.com/cleanup").is_ok());
    }

    #[test]
    fn rejects_finalizer_with_invalid_characters() {
        assert!(validate_finalizer_id("widgets.example.com/clean up").is_err());
        assert!(validate_finalizer_id("").is_err());
        assert!(validate_finalizer_id("/cleanup").is_err());
    }

    #[tokio::test]
    async fn chain_runs_steps_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let mgr: FinalizerManager<TestObject> = FinalizerManager::new("widgets.example.com/cleanup")
            .unwrap()
            .with_step("first", move |_obj| {
                let o = o1.clone();
                async move {
                    o.lock().push("first");
                    Ok::<(), std::convert::Infallible>(())
                }
            })
            .with_step("second", move |_obj| {
                let o = o2.clone();
                async move {
                    o.lock().push("second");
                    Ok::<(), std::convert::Infallible>(())
                }
            });

        let obj = Arc::new(TestObject::new("a", "1"));
        mgr.finalize(obj).await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn chain_short_circuits_on_first_failure() {
        let ran_second = Arc::new(AtomicU32::new(0));
        let flag = ran_second.clone();
        let mgr: FinalizerManager<TestObject> = FinalizerManager::new("widgets.example.com/cleanup")
            .unwrap()
            .with_step("first", |_obj| async move {
                Err::<(), _>(std::io::Error::other("boom"))
            })
            .with_step("second", move |_obj| {
                let flag = flag.clone();
                async move {
                    flag.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), std::convert::Infallible>(())
                }
            });

        let obj = Arc::new(TestObject::new("a", "1"));
        let err = mgr.finalize(obj).await.unwrap_err();
        assert!(matches!(err, Error::StepFailed { step, .. } if step == "first"));
        assert_eq!(ran_second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn is_registered_checks_finalizer_list() {
        let mgr: FinalizerManager<TestObject> = FinalizerManager::new("widgets.example.com/cleanup").unwrap();
        let mut obj = TestObject::new("a", "1");
        assert!(!mgr.is_registered(&obj));
        obj.finalizers_mut().push("widgets.example.com/cleanup".into());
        assert!(mgr.is_registered(&obj));
    }
}
