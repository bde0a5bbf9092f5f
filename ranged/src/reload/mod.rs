//! Reload trigger serialization and the build-and-publish cycle.
//!
//! All reload triggers (startup, SIGHUP, registry watchers) funnel
//! into one bounded channel drained by a single consumer task, so
//! cycles are totally ordered and never overlap. Entering a cycle
//! supersedes the previous generation: its cancellation token is
//! closed before any new watcher is spawned, guaranteeing at most one
//! active generation at any instant.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{self, MetricsConfig, ServerConfig};
use crate::logging::LogHandle;
use crate::metrics::{self, MetricsHub};
use crate::snapshot::{GROUPS_CLUSTER, SnapshotCell};
use crate::sources::registry::Registry;
use crate::sources::{Provenance, SourceRecord, files};

pub mod watcher;

use watcher::{ResourceWatcher, WatchState, WatchTarget, names_fingerprint};

/// Capacity of the reload hand-off queue. One slot keeps a burst of
/// triggers sequential: producers block in `send` until the consumer
/// frees the slot, and every accepted request gets its own full
/// cycle; pending duplicates are never coalesced.
const RELOAD_QUEUE_CAPACITY: usize = 1;

/// A request to rebuild and republish the topology snapshot. Only its
/// arrival matters; the source identifier is for logging.
#[derive(Debug, Clone)]
pub struct ReloadRequest {
    source: String,
}

impl ReloadRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Everything the reload pipeline needs at construction time.
pub struct ReloaderOptions {
    /// Config file re-read at the start of every cycle; `None` keeps
    /// the initial configuration for the process lifetime.
    pub config_path: Option<PathBuf>,
    pub config: ServerConfig,
    /// Dynamic source client; `None` disables the registry outright.
    pub registry: Option<Arc<dyn Registry>>,
    pub snapshot: Arc<SnapshotCell>,
    pub metrics: Arc<MetricsHub>,
    /// Handle for applying the configured loglevel; `None` in tests.
    pub log_handle: Option<LogHandle>,
}

/// The single-consumer reload coordinator.
pub struct Reloader {
    rx: mpsc::Receiver<ReloadRequest>,
    /// Handed to watchers so they can trigger the next cycle.
    reload_tx: mpsc::Sender<ReloadRequest>,
    config_path: Option<PathBuf>,
    config: ServerConfig,
    registry: Option<Arc<dyn Registry>>,
    snapshot: Arc<SnapshotCell>,
    metrics: Arc<MetricsHub>,
    log_handle: Option<LogHandle>,
    applied_loglevel: Option<String>,
    applied_metrics: MetricsConfig,
    generation: CancellationToken,
    first_cycle_done: Option<oneshot::Sender<u32>>,
}

impl Reloader {
    /// Returns the reloader, the trigger sender, and a receiver that
    /// yields the first completed cycle's warning count exactly once.
    pub fn new(
        options: ReloaderOptions,
    ) -> (Self, mpsc::Sender<ReloadRequest>, oneshot::Receiver<u32>) {
        let (tx, rx) = mpsc::channel(RELOAD_QUEUE_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        let reloader = Self {
            rx,
            reload_tx: tx.clone(),
            config_path: options.config_path,
            config: options.config,
            registry: options.registry,
            snapshot: options.snapshot,
            metrics: options.metrics,
            log_handle: options.log_handle,
            applied_loglevel: None,
            applied_metrics: MetricsConfig::default(),
            generation: CancellationToken::new(),
            first_cycle_done: Some(done_tx),
        };
        (reloader, tx, done_rx)
    }

    /// Drain reload requests one at a time, forever. Each dequeued
    /// request runs a full build-and-publish cycle before the next is
    /// accepted.
    pub async fn run(mut self) {
        debug!("reload serializer started");
        while let Some(request) = self.rx.recv().await {
            let started = Instant::now();
            let warnings = self.cycle(&request).await;
            self.metrics.increment("reload");
            info!(
                source = %request.source(),
                warnings,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "reload complete"
            );
            if let Some(done) = self.first_cycle_done.take() {
                let _ = done.send(warnings);
            }
        }
        debug!("reload serializer stopped");
    }

    /// One build-and-publish cycle. Returns the total warning count;
    /// nothing in a cycle is fatal.
    async fn cycle(&mut self, request: &ReloadRequest) -> u32 {
        info!(source = %request.source(), "reloading");

        // Supersede the previous generation before anything else.
        let previous = std::mem::replace(&mut self.generation, CancellationToken::new());
        previous.cancel();

        let mut warnings = self.refresh_config();

        let mut records: Vec<SourceRecord> = Vec::new();
        if self.config.registry.enabled {
            let (registry_records, fetch_warnings) = self.load_registry().await;
            records.extend(registry_records);
            warnings += fetch_warnings;
        }
        records.extend(files::load_dirs(&self.config.cluster_dirs).await);

        let (state, build_warnings) = build_state(records);
        warnings += build_warnings;
        warnings += self.snapshot.publish(state);
        warnings
    }

    /// Re-read the config file and apply loglevel/metrics changes. A
    /// re-read failure keeps the previous configuration in force.
    fn refresh_config(&mut self) -> u32 {
        let mut warnings = 0;

        if let Some(path) = &self.config_path {
            match config::load_file(path) {
                Ok(next) => self.config = next,
                Err(err) => {
                    warn!(error = %err, "config re-read failed, keeping previous config");
                    warnings += 1;
                }
            }
        }

        if self.applied_loglevel.as_deref() != Some(self.config.loglevel.as_str()) {
            if let Some(handle) = &self.log_handle {
                handle.set_level(&self.config.loglevel);
            }
            self.applied_loglevel = Some(self.config.loglevel.clone());
        }

        if self.applied_metrics != self.config.metrics {
            let (sink, sink_warnings) = metrics::build_sink(&self.config.metrics);
            warnings += sink_warnings;
            self.metrics.install(sink);
            self.applied_metrics = self.config.metrics.clone();
        }

        warnings
    }

    /// Fetch all registry records and spawn the new generation's
    /// watchers, seeded with exactly what this cycle observed.
    async fn load_registry(&mut self) -> (Vec<SourceRecord>, u32) {
        let Some(registry) = self.registry.clone() else {
            debug!("registry enabled in config but no client available");
            return (Vec::new(), 0);
        };

        let listing = match registry.list_resources(None).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, "registry list failed");
                return (Vec::new(), 1);
            }
        };

        let mut warnings = 0;
        let mut records = Vec::new();
        let mut watch_states = Vec::new();
        for name in &listing.names {
            match registry.describe_resource(name, None).await {
                Ok(description) => {
                    let (cluster, decode_warnings) =
                        crate::decode::decode_cluster(name, &description.value);
                    records.push(SourceRecord {
                        name: name.clone(),
                        cluster,
                        provenance: Provenance::Registry,
                        warnings: decode_warnings,
                    });
                    watch_states.push((
                        name.clone(),
                        WatchState {
                            fingerprint: description.value,
                            index: description.index,
                        },
                    ));
                }
                Err(err) => {
                    warn!(resource = %name, error = %err, "registry describe failed");
                    warnings += 1;
                }
            }
        }

        let wait = Duration::from_secs(self.config.registry.wait_secs);
        ResourceWatcher::new(
            registry.clone(),
            WatchTarget::List,
            WatchState {
                fingerprint: names_fingerprint(&listing.names),
                index: listing.index,
            },
            wait,
            self.reload_tx.clone(),
            self.generation.clone(),
        )
        .spawn();
        for (name, state) in watch_states {
            ResourceWatcher::new(
                registry.clone(),
                WatchTarget::Resource(name),
                state,
                wait,
                self.reload_tx.clone(),
                self.generation.clone(),
            )
            .spawn();
        }

        (records, warnings)
    }
}

/// Merge raw records into a query state. Later records replace
/// earlier same-named records wholesale; the reserved `GROUPS` name
/// becomes the default cluster; empty records are discarded with one
/// warning each.
fn build_state(records: Vec<SourceRecord>) -> (rangeql::State, u32) {
    let mut state = rangeql::State::new();
    let mut warnings = 0;

    for record in records {
        warnings += record.warnings;
        if record.cluster.is_empty() {
            warn!(cluster = %record.name, source = %record.provenance, "cluster is empty, discarding");
            warnings += 1;
            continue;
        }
        if record.name == GROUPS_CLUSTER {
            state.set_default_cluster(record.cluster);
        } else {
            state.add_cluster(record.name, record.cluster);
        }
    }

    info!(clusters = state.len(), warnings, "snapshot built");
    (state, warnings)
}
