//! Typed CRUD + streaming watch over one resource kind (C1)
//!
//! This is an external collaborator per the runtime's scope: the core only
//! requires the shape below, not an HTTP implementation. An embedder backs
//! [`ResourceClient`] with a real API server client (the transport layer is
//! explicitly out of scope here, the same way `kube-runtime` takes a
//! `kube_client::Api<K>` without implementing HTTP itself).

use crate::{key::ObjectKey, object::KubeObject};
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

/// A typed failure from the API server, or from reaching it.
///
/// Carries the HTTP status code when one is known, so callers can classify
/// failures structurally (`status() == Some(410)`) instead of by matching
/// on message text.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("apiserver returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to decode server response: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("object not found")]
    NotFound,
}

impl ClientError {
    /// The HTTP status code carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::NotFound => Some(404),
            ClientError::Transport(_) | ClientError::Decode(_) => None,
        }
    }

    /// `true` for a 410 Gone: the watch's resource version has expired and a
    /// relist is required.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        self.status() == Some(410)
    }

    /// `true` for a 504 Gateway Timeout: an idle watch connection was closed
    /// by an intermediary and should be resumed at the same resource version.
    #[must_use]
    pub fn is_gateway_timeout(&self) -> bool {
        self.status() == Some(504)
    }

    /// `true` for a 409 Conflict, typically from a finalizer patch racing
    /// another writer.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}

/// A JSON Patch (RFC 6902) body, opaque to the core beyond being handed to
/// [`ResourceClient::patch`] verbatim.
#[derive(Debug, Clone)]
pub struct Patch(pub json_patch::Patch);

/// A single frame from a watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent<O> {
    Added(O),
    Modified(O),
    Deleted(O),
    /// Carries only a resource version; never invokes user code.
    Bookmark { resource_version: String },
    /// A `Status` frame sent by the API server in place of an object.
    Error { status: u16, message: String },
}

impl<O> fmt::Display for WatchEvent<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEvent::Added(_) => write!(f, "Added"),
            WatchEvent::Modified(_) => write!(f, "Modified"),
            WatchEvent::Deleted(_) => write!(f, "Deleted"),
            WatchEvent::Bookmark { .. } => write!(f, "Bookmark"),
            WatchEvent::Error { status, .. } => write!(f, "Error({status})"),
        }
    }
}

/// Typed CRUD + streaming watch over one resource kind.
///
/// Implementations are expected to be cheap to clone (an `Api<K>`-style
/// handle), since the watcher and dispatcher each hold one.
#[async_trait::async_trait]
pub trait ResourceClient<O>: Send + Sync
where
    O: KubeObject + Clone,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<O>, ClientError>;

    async fn list(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<O>, ClientError>;

    /// Opens a cold watch stream. The stream begins emitting once polled and
    /// ends when the server closes the connection, the caller drops it, or an
    /// error surfaces as a stream item.
    fn watch(
        &self,
        namespace: Option<&str>,
        resource_version: Option<String>,
        selector: &str,
        allow_bookmarks: bool,
    ) -> BoxStream<'static, Result<WatchEvent<O>, ClientError>>;

    async fn patch(&self, key: &ObjectKey, patch: &Patch) -> Result<O, ClientError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError>;

    async fn update_status(&self, object: &O) -> Result<O, ClientError>;
}
