//! Long-lived watch loop per kind (C3)
//!
//! Drives the `Idle -> Connecting -> Streaming -> Backoff -> Idle` state
//! machine from the spec: opens a watch at the last known resource version,
//! forwards events, and reconnects (optionally after backoff) on any
//! disruption. Terminal only on cancellation.
//!
//! Grounded on `kube-runtime`'s `watcher.rs` trampoline and
//! `utils::stream_backoff::StreamBackoff`, reshaped as a single
//! `async_stream::stream!` generator rather than a hand-rolled `Stream` impl
//! plus a wrapping combinator, since the state here (current resource
//! version, retry count) is private to one loop rather than something other
//! combinators need to see.

use crate::{
    backoff::{Backoff, ReconnectBackoff},
    client::{ClientError, ResourceClient, WatchEvent},
    metrics::Metrics,
    object::KubeObject,
    selector::LabelSelectorProvider,
};
use async_stream::stream;
use futures::{Stream, StreamExt};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A failure surfaced by the watch loop. Transient by construction: the loop
/// always attempts to reconnect afterwards, it never terminates on these.
#[derive(Debug, Error, Clone)]
pub enum WatchError {
    #[error("resource version expired (410 Gone), relisting")]
    Gone,
    #[error("idle connection closed (504 Gateway Timeout), resuming")]
    GatewayTimeout,
    #[error("watch transport error: {0}")]
    Transport(#[source] Arc<ClientError>),
    #[error("apiserver sent error frame {status}: {message}")]
    Api { status: u16, message: String },
}

enum BreakReason {
    /// Clean end of stream, or a zero-byte response signalling "no instances
    /// of this CRD exist yet" -- reconnect immediately, no backoff.
    EmptyOrClean,
    Gone,
    GatewayTimeout,
    Backoff,
}

/// Runs the resource watcher for one kind/namespace pair until `cancel` fires.
///
/// `namespace` of `None` watches cluster-wide. The returned stream never
/// terminates except by cancellation; errors are yielded as items, not as the
/// stream's end.
pub fn watcher<O, C>(
    client: Arc<C>,
    namespace: Option<String>,
    selector: Arc<dyn LabelSelectorProvider>,
    reconnect_max_backoff: Duration,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
) -> impl Stream<Item = Result<WatchEvent<O>, WatchError>> + Send
where
    O: KubeObject + Clone + Send + Sync + 'static,
    C: ResourceClient<O> + Send + Sync + 'static,
{
    stream! {
        let mut resource_version: Option<String> = None;
        let mut backoff = ReconnectBackoff::new(reconnect_max_backoff);

        'reconnect: loop {
            if cancel.is_cancelled() {
                return;
            }

            let sel = selector.selector().await;
            tracing::debug!(?resource_version, selector = %sel, "opening watch");
            let mut stream = client.watch(namespace.as_deref(), resource_version.clone(), &sel, true);

            let mut saw_any_event = false;
            let reason = loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    item = stream.next() => item,
                };
                match next {
                    None => break BreakReason::EmptyOrClean,
                    Some(Ok(WatchEvent::Bookmark { resource_version: rv })) => {
                        resource_version = Some(rv.clone());
                        saw_any_event = true;
                        backoff.reset();
                        yield Ok(WatchEvent::Bookmark { resource_version: rv });
                    }
                    Some(Ok(WatchEvent::Added(obj))) => {
                        if let Some(rv) = obj.resource_version() {
                            resource_version = Some(rv.to_string());
                        }
                        saw_any_event = true;
                        backoff.reset();
                        yield Ok(WatchEvent::Added(obj));
                    }
                    Some(Ok(WatchEvent::Modified(obj))) => {
                        if let Some(rv) = obj.resource_version() {
                            resource_version = Some(rv.to_string());
                        }
                        saw_any_event = true;
                        backoff.reset();
                        yield Ok(WatchEvent::Modified(obj));
                    }
                    Some(Ok(WatchEvent::Deleted(obj))) => {
                        if let Some(rv) = obj.resource_version() {
                            resource_version = Some(rv.to_string());
                        }
                        saw_any_event = true;
                        backoff.reset();
                        yield Ok(WatchEvent::Deleted(obj));
                    }
                    Some(Ok(WatchEvent::Error { status, message })) => {
                        tracing::warn!(status, message, "apiserver sent error frame on watch");
                        if status == 410 {
                            resource_version = None;
                            yield Err(WatchError::Gone);
                            break BreakReason::Gone;
                        } else if status == 504 {
                            yield Err(WatchError::GatewayTimeout);
                            break BreakReason::GatewayTimeout;
                        } else {
                            yield Err(WatchError::Api { status, message });
                            break BreakReason::Backoff;
                        }
                    }
                    Some(Err(err)) => {
                        if err.is_gone() {
                            resource_version = None;
                            tracing::info!("resource version gone, forcing relist");
                            yield Err(WatchError::Gone);
                            break BreakReason::Gone;
                        } else if err.is_gateway_timeout() {
                            tracing::debug!("watch idle timeout, reconnecting");
                            yield Err(WatchError::GatewayTimeout);
                            break BreakReason::GatewayTimeout;
                        } else {
                            tracing::warn!(error = %err, "watch transport error");
                            yield Err(WatchError::Transport(Arc::new(err)));
                            break BreakReason::Backoff;
                        }
                    }
                }
            };

            if !saw_any_event && matches!(reason, BreakReason::EmptyOrClean) {
                tracing::debug!("empty watch response, treating as no instances yet");
            }

            if let Some(metrics) = &metrics {
                metrics.record_watch_reconnect();
                if matches!(reason, BreakReason::Gone) {
                    metrics.record_watch_relist();
                }
            }

            match reason {
                BreakReason::EmptyOrClean | BreakReason::Gone | BreakReason::GatewayTimeout => {
                    // Reconnect immediately: no new information to wait out.
                }
                BreakReason::Backoff => {
                    if let Some(delay) = backoff.next() {
                        tracing::debug!(?delay, "backing off before reconnect");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = cancel.cancelled() => return,
                        }
                    }
                }
            }

            if cancel.is_cancelled() {
                return;
            }
            continue 'reconnect;
        }
    }
}
