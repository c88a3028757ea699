//! Operator-wide configuration surface (§6)
//!
//! `serde`-deserializable so an embedder can load this straight from a
//! mounted ConfigMap or CLI flags the way `kube-runtime`'s consumers load
//! their own `Config` structs; every field has the documented default so a
//! partially-specified document still produces a runnable configuration.

use crate::lease::LeaderElectionConfig;
use serde::Deserialize;
use std::time::Duration;

fn default_namespace() -> NamespaceScope {
    NamespaceScope::All
}

fn default_worker_count() -> usize {
    1
}

fn default_watch_reconnect_max_backoff() -> Duration {
    Duration::from_secs(32)
}

fn default_reconcile_timeout() -> Duration {
    Duration::from_secs(30)
}

/// `namespace: string | "*"` — watch scope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl TryFrom<String> for NamespaceScope {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(if value == "*" { Self::All } else { Self::Named(value) })
    }
}

impl NamespaceScope {
    /// The namespace to pass to [`crate::watcher::watcher`], or `None` for
    /// cluster-wide.
    #[must_use]
    pub fn as_watch_namespace(&self) -> Option<&str> {
        match self {
            NamespaceScope::All => None,
            NamespaceScope::Named(ns) => Some(ns),
        }
    }
}

/// `leaderElection: {enabled, leaseName, leaseNamespace, leaseDuration, renewDeadline, retryPeriod}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionSettings {
    #[serde(default)]
    pub enabled: bool,
    pub lease_name: String,
    pub lease_namespace: String,
    #[serde(flatten)]
    pub timing: LeaderElectionConfig,
}

/// The full recognized configuration surface for one operator process.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    #[serde(default = "default_namespace")]
    pub namespace: NamespaceScope,
    #[serde(default)]
    pub label_selector: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub leader_election: Option<LeaderElectionSettings>,
    #[serde(default = "default_watch_reconnect_max_backoff", with = "humantime_serde")]
    pub watch_reconnect_max_backoff: Duration,
    #[serde(default = "default_reconcile_timeout", with = "humantime_serde")]
    pub reconcile_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: NamespaceScope::All,
            label_selector: String::new(),
            worker_count: 1,
            leader_election: None,
            watch_reconnect_max_backoff: Duration::from_secs(32),
            reconcile_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_scope_parses_wildcard_as_all() {
        let scope = NamespaceScope::try_from("*".to_string()).unwrap();
        assert_eq!(scope, NamespaceScope::All);
        assert_eq!(scope.as_watch_namespace(), None);
    }

    #[test]
    fn namespace_scope_parses_name_as_named() {
        let scope = NamespaceScope::try_from("ns1".to_string()).unwrap();
        assert_eq!(scope, NamespaceScope::Named("ns1".into()));
        assert_eq!(scope.as_watch_namespace(), Some("ns1"));
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.namespace, NamespaceScope::All);
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.watch_reconnect_max_backoff, Duration::from_secs(32));
        assert!(config.leader_election.is_none());
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{
            "namespace": "ns1",
            "labelSelector": "app=widget",
            "workerCount": 4,
            "leaderElection": {
                "enabled": true,
                "leaseName": "widget-controller",
                "leaseNamespace": "operators",
                "leaseDuration": "15s",
                "renewDeadline": "10s",
                "retryPeriod": "2s"
            },
            "watchReconnectMaxBackoff": "32s",
            "reconcileTimeout": "30s"
        }"#;
        let config: OperatorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.namespace, NamespaceScope::Named("ns1".into()));
        assert_eq!(config.worker_count, 4);
        let le = config.leader_election.unwrap();
        assert!(le.enabled);
        assert_eq!(le.lease_name, "widget-controller");
        assert_eq!(le.timing.lease_duration, Duration::from_secs(15));
    }
}
