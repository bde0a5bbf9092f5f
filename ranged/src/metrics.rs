//! Pluggable counter sinks.
//!
//! The server counts a small number of events (reloads, queries)
//! through a [`Sink`] capability with a no-op default. The statsd
//! implementations come in two variants chosen by configuration:
//! direct (one UDP datagram per increment) and buffered (counts
//! aggregated in memory and flushed on a fixed interval). Swapping
//! sinks on reconfiguration closes the old transport before the new
//! sink sees traffic.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapAny;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::MetricsConfig;

/// A counter capability.
///
/// `close` releases the underlying transport; it is idempotent and
/// increments arriving after it are dropped.
pub trait Sink: Send + Sync {
    fn increment(&self, name: &str);
    fn close(&self);
}

/// The null sink installed by default.
pub struct NoopSink;

impl Sink for NoopSink {
    fn increment(&self, _name: &str) {}
    fn close(&self) {}
}

/// Shared, swappable handle to the active sink.
///
/// Readers (query handlers, the reload loop) load the current sink
/// lock-free; the reload cycle is the only writer.
pub struct MetricsHub {
    sink: ArcSwapAny<Arc<Arc<dyn Sink>>>,
}

impl MetricsHub {
    pub fn new() -> Self {
        Self {
            sink: ArcSwapAny::new(Arc::new(Arc::new(NoopSink) as Arc<dyn Sink>)),
        }
    }

    pub fn increment(&self, name: &str) {
        self.sink.load().increment(name);
    }

    /// Install a new sink. The previous sink is closed before the new
    /// one is visible; increments landing in that window are dropped.
    pub fn install(&self, next: Arc<dyn Sink>) {
        self.sink.load().close();
        self.sink.store(Arc::new(next));
    }

    pub fn close(&self) {
        self.sink.load().close();
    }
}

impl Default for MetricsHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Direct statsd sink: one counter datagram per increment.
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
    closed: AtomicBool,
}

impl StatsdSink {
    pub fn new(host: &str, prefix: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(host)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            prefix: prefix.to_string(),
            closed: AtomicBool::new(false),
        })
    }
}

impl Sink for StatsdSink {
    fn increment(&self, name: &str) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        // UDP counters are fire-and-forget; a failed send is dropped.
        let _ = self
            .socket
            .send(counter_datagram(&self.prefix, name, 1).as_bytes());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Buffered statsd sink: counts aggregate in memory and a background
/// task flushes them every interval. `close` cancels the task, which
/// performs one final flush on the way out.
///
/// Must be created inside a tokio runtime.
pub struct BufferedStatsdSink {
    counts: Arc<Mutex<HashMap<String, u64>>>,
    token: CancellationToken,
}

impl BufferedStatsdSink {
    pub fn new(host: &str, prefix: &str, interval: Duration) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(host)?;

        let counts = Arc::new(Mutex::new(HashMap::new()));
        let token = CancellationToken::new();

        let task_counts = counts.clone();
        let task_token = token.clone();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        flush(&socket, &prefix, &task_counts);
                        break;
                    }
                    _ = ticker.tick() => {
                        flush(&socket, &prefix, &task_counts);
                    }
                }
            }
            debug!("buffered metrics flusher stopped");
        });

        Ok(Self { counts, token })
    }
}

impl Sink for BufferedStatsdSink {
    fn increment(&self, name: &str) {
        if self.token.is_cancelled() {
            return;
        }
        *self.counts.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    fn close(&self) {
        self.token.cancel();
    }
}

fn flush(socket: &UdpSocket, prefix: &str, counts: &Mutex<HashMap<String, u64>>) {
    let drained = std::mem::take(&mut *counts.lock());
    for (name, count) in drained {
        let _ = socket.send(counter_datagram(prefix, &name, count).as_bytes());
    }
}

fn counter_datagram(prefix: &str, name: &str, count: u64) -> String {
    if prefix.is_empty() {
        format!("{name}:{count}|c")
    } else {
        format!("{prefix}.{name}:{count}|c")
    }
}

/// Build the sink the configuration asks for. Construction failures
/// degrade to the no-op sink with one warning.
pub fn build_sink(config: &MetricsConfig) -> (Arc<dyn Sink>, u32) {
    let Some(host) = config.host.as_deref().filter(|host| !host.is_empty()) else {
        return (Arc::new(NoopSink), 0);
    };

    let result: std::io::Result<Arc<dyn Sink>> = if config.flush_interval_ms == 0 {
        StatsdSink::new(host, &config.prefix).map(|sink| Arc::new(sink) as Arc<dyn Sink>)
    } else {
        BufferedStatsdSink::new(
            host,
            &config.prefix,
            Duration::from_millis(config.flush_interval_ms),
        )
        .map(|sink| Arc::new(sink) as Arc<dyn Sink>)
    };

    match result {
        Ok(sink) => (sink, 0),
        Err(err) => {
            warn!(host = %host, error = %err, "could not create metrics sink, counters disabled");
            (Arc::new(NoopSink), 1)
        }
    }
}
