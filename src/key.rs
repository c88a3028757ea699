//! Object identity used throughout the runtime

use crate::object::KubeObject;
use std::fmt;

/// Identifies one Kubernetes resource kind watched by a controller.
///
/// Immutable for the lifetime of a controller registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceKind {
    #[must_use]
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// `(namespace, name)`, scoped to a single [`ResourceKind`].
///
/// Namespace is empty for cluster-scoped kinds. This is the unit the event
/// queue deduplicates on, and the unit the dispatcher guarantees at-most-one
/// in-flight reconciliation for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(kind: ResourceKind, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind.kind, self.name),
        }
    }
}

/// Derives the [`ObjectKey`] a watched object is filed under.
#[must_use]
pub fn key_of<O: KubeObject>(kind: &ResourceKind, object: &O) -> ObjectKey {
    ObjectKey::new(kind.clone(), object.namespace().map(str::to_string), object.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind() -> ResourceKind {
        ResourceKind::new("example.com", "v1", "Widget", "widgets", true)
    }

    #[test]
    fn keys_with_same_fields_are_equal() {
        let a = ObjectKey::new(kind(), Some("ns1".into()), "foo");
        let b = ObjectKey::new(kind(), Some("ns1".into()), "foo");
        assert_eq!(a, b);
    }

    #[test]
    fn keys_differ_by_namespace() {
        let a = ObjectKey::new(kind(), Some("ns1".into()), "foo");
        let b = ObjectKey::new(kind(), Some("ns2".into()), "foo");
        assert_ne!(a, b);
    }

    #[test]
    fn display_cluster_scoped_omits_namespace() {
        let k = ObjectKey::new(kind(), None, "foo");
        assert_eq!(k.to_string(), "Widget/foo");
    }
}
