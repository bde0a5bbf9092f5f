//! Long-poll watchers for dynamic registry resources.
//!
//! Each reload cycle spawns one watcher for the resource list and one
//! per discovered resource, all bound to that cycle's cancellation
//! token. A watcher's whole job is to detect a single change: on
//! change it submits one reload request and terminates (the next
//! cycle spawns its replacement); on cancellation or fetch error it
//! terminates silently. Cancellation is cooperative and checked
//! around every blocking call, so its latency is bounded by the
//! long-poll wait.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ReloadRequest;
use crate::sources::registry::{Registry, Wait};

/// What a watcher observes: the resource list or one named resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    List,
    Resource(String),
}

impl WatchTarget {
    /// Identifier used as the reload request source.
    pub fn id(&self) -> String {
        match self {
            WatchTarget::List => "registry".to_string(),
            WatchTarget::Resource(name) => format!("registry:{name}"),
        }
    }
}

/// Last-observed value and long-poll cursor for one watcher. The
/// cursor never decreases within a generation.
#[derive(Debug, Clone)]
pub struct WatchState {
    pub fingerprint: Value,
    pub index: u64,
}

/// Structural fingerprint of a resource listing.
pub fn names_fingerprint(names: &[String]) -> Value {
    let mut sorted = names.to_vec();
    sorted.sort();
    Value::Array(sorted.into_iter().map(Value::String).collect())
}

/// A single long-poll watcher bound to one generation.
pub struct ResourceWatcher {
    registry: Arc<dyn Registry>,
    target: WatchTarget,
    state: WatchState,
    wait: Duration,
    reload_tx: mpsc::Sender<ReloadRequest>,
    token: CancellationToken,
}

impl ResourceWatcher {
    pub fn new(
        registry: Arc<dyn Registry>,
        target: WatchTarget,
        state: WatchState,
        wait: Duration,
        reload_tx: mpsc::Sender<ReloadRequest>,
        token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            target,
            state,
            wait,
            reload_tx,
            token,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        debug!(target = %self.target.id(), "watcher started");
        loop {
            if self.token.is_cancelled() {
                debug!(target = %self.target.id(), "watcher superseded");
                return;
            }

            let wait = Some(Wait {
                index: self.state.index,
                time: self.wait,
            });
            let observed = match &self.target {
                WatchTarget::List => match self.registry.list_resources(wait).await {
                    Ok(listing) => WatchState {
                        fingerprint: names_fingerprint(&listing.names),
                        index: listing.index,
                    },
                    Err(err) => {
                        debug!(target = %self.target.id(), error = %err, "watch failed, stopping for this generation");
                        return;
                    }
                },
                WatchTarget::Resource(name) => {
                    match self.registry.describe_resource(name, wait).await {
                        Ok(description) => WatchState {
                            fingerprint: description.value,
                            index: description.index,
                        },
                        Err(err) => {
                            debug!(target = %self.target.id(), error = %err, "watch failed, stopping for this generation");
                            return;
                        }
                    }
                }
            };

            // A cancellation that landed while we were blocked wins,
            // even when the fetch observed a change.
            if self.token.is_cancelled() {
                debug!(target = %self.target.id(), "watcher superseded");
                return;
            }

            if observed.fingerprint != self.state.fingerprint {
                debug!(target = %self.target.id(), "change detected");
                let request = ReloadRequest::new(self.target.id());
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = self.reload_tx.send(request) => {}
                }
                // Done either way: the next cycle spawns a successor.
                return;
            }

            self.state.index = self.state.index.max(observed.index);
        }
    }
}
