//! The accessor surface the core requires from a typed object
//!
//! Mirrors `kube_core::{Resource, ResourceExt}`'s metadata accessors, narrowed
//! to exactly what the watcher, dispatcher, and finalizer manager touch. The
//! object's own fields (`spec`, `status`, ...) stay opaque to the core.

use chrono::{DateTime, Utc};

/// Capabilities the core needs from a watched object.
///
/// Implement this for your CRD's Rust type (typically alongside `Serialize`/
/// `Deserialize` derived from its wire schema) to plug it into a [`crate::watcher::watcher`]
/// or [`crate::dispatcher::Dispatcher`].
pub trait KubeObject: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn namespace(&self) -> Option<&str>;
    fn uid(&self) -> Option<&str>;
    fn resource_version(&self) -> Option<&str>;
    fn set_resource_version(&mut self, resource_version: String);
    fn deletion_timestamp(&self) -> Option<&DateTime<Utc>>;
    fn finalizers(&self) -> &[String];
    fn finalizers_mut(&mut self) -> &mut Vec<String>;

    /// Numeric comparison key used to decide which of two observations of the
    /// same object is newer. Kubernetes resource versions are opaque strings
    /// in general, but within a single API server they are safe to compare
    /// lexicographically once parsed as the same width integer; callers who
    /// need strict correctness against a real cluster should parse their own
    /// resource version format here.
    fn resource_version_ord(&self) -> Option<u64> {
        self.resource_version().and_then(|rv| rv.parse().ok())
    }
}

/// Returns `true` if `candidate` carries a resource version strictly newer
/// than `current`, used by the event queue to decide whether to replace a
/// pending item's payload.
#[must_use]
pub fn is_newer<O: KubeObject>(current: &O, candidate: &O) -> bool {
    match (current.resource_version_ord(), candidate.resource_version_ord()) {
        (Some(cur), Some(new)) => new > cur,
        // Unparseable resource versions: prefer the most recently observed one.
        _ => true,
    }
}
