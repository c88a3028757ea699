//! Yields the current label-selector string (C2)
//!
//! Queried once per (re)connect, never mid-stream, so an implementation that
//! reads from a reloadable config source can rotate the filter between
//! watches without the watcher knowing or caring.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

/// Supplies the label selector a [`crate::watcher::watcher`] should use for
/// its next connection attempt.
#[async_trait]
pub trait LabelSelectorProvider: Send + Sync {
    /// Resolve the selector to use for the next watch. Cancellation-safe:
    /// implementations that perform I/O should bail out promptly if dropped.
    async fn selector(&self) -> String;
}

/// A selector that never changes.
#[derive(Debug, Clone)]
pub struct StaticSelector(String);

impl StaticSelector {
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }
}

#[async_trait]
impl LabelSelectorProvider for StaticSelector {
    async fn selector(&self) -> String {
        self.0.clone()
    }
}

/// A selector computed by an arbitrary closure, for callers whose filter
/// depends on runtime state (a feature flag, a config reload) rather than a
/// fixed string.
pub struct DynamicSelector<F>(F)
where
    F: Fn() -> Pin<Box<dyn Future<Output = String> + Send>> + Send + Sync;

impl<F> DynamicSelector<F>
where
    F: Fn() -> Pin<Box<dyn Future<Output = String> + Send>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> LabelSelectorProvider for DynamicSelector<F>
where
    F: Fn() -> Pin<Box<dyn Future<Output = String> + Send>> + Send + Sync,
{
    async fn selector(&self) -> String {
        (self.0)().await
    }
}
