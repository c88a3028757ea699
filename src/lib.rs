#![deny(clippy::all)]
#![deny(clippy::pedantic)]
// Triggered by many derive macros (serde, thiserror)
#![allow(clippy::default_trait_access)]
#![allow(clippy::module_name_repetitions)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod finalizer;
pub mod host;
pub mod key;
pub mod lease;
pub mod metrics;
pub mod object;
pub mod queue;
pub mod reconcile;
pub mod selector;
pub mod watcher;

pub use backoff::{Backoff, ReconnectBackoff};
pub use client::{ClientError, Patch, ResourceClient, WatchEvent};
pub use config::{LeaderElectionSettings, NamespaceScope, OperatorConfig};
pub use dispatcher::{Dispatcher, DispatcherConfig, Reconciler};
pub use finalizer::FinalizerManager;
pub use host::{Controller, ControllerHandle, ExitStatus, HostConfig, OperatorHost};
pub use key::{ObjectKey, ResourceKind};
pub use lease::{LeaderElectionConfig, LeaderElector, LeaseObject};
pub use metrics::Metrics;
pub use object::KubeObject;
pub use queue::EventQueue;
pub use reconcile::{Context, DispatchEventType, ReconcileContext, ReconcileError, ReconcileResult};
pub use selector::{LabelSelectorProvider, StaticSelector};
