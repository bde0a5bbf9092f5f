//! The published topology snapshot and its atomic cell.
//!
//! `SnapshotCell` is the single piece of state shared between the
//! reload pipeline and the read path. The pipeline is its only
//! writer; readers dereference it lock-free and always observe a
//! completely built state, because `rangeql::State` has no mutation
//! API once published and the swap is a single atomic pointer
//! replace.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::warn;

/// Reserved cluster name whose record becomes the default/group
/// cluster instead of a regular cluster.
pub const GROUPS_CLUSTER: &str = "GROUPS";

/// Process-wide reference to the latest published query state.
pub struct SnapshotCell {
    inner: ArcSwap<rangeql::State>,
}

impl SnapshotCell {
    /// Start with an empty snapshot; queries answer against it until
    /// the first reload cycle publishes.
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(rangeql::State::new()),
        }
    }

    /// The currently published snapshot.
    pub fn load(&self) -> Arc<rangeql::State> {
        self.inner.load_full()
    }

    /// Prime the freshly built state and swap it in.
    ///
    /// Prime errors are surfaced as warnings and never block
    /// publication. Returns the number of warnings produced.
    pub fn publish(&self, state: rangeql::State) -> u32 {
        let errors = state.prime_cache();
        for err in &errors {
            warn!(error = %err, "priming query cache failed");
        }
        self.inner.store(Arc::new(state));
        errors.len() as u32
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangeql::Cluster;

    fn state_with(name: &str, key: &str, values: &[&str]) -> rangeql::State {
        let mut cluster = Cluster::new();
        cluster.insert(
            key.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        let mut state = rangeql::State::new();
        state.add_cluster(name, cluster);
        state
    }

    #[test]
    fn test_starts_empty() {
        let cell = SnapshotCell::new();
        assert!(cell.load().is_empty());
    }

    #[test]
    fn test_publish_replaces_wholesale() {
        let cell = SnapshotCell::new();
        assert_eq!(cell.publish(state_with("web", "CLUSTER", &["w1"])), 0);
        let first = cell.load();
        assert!(first.cluster("web").is_some());

        assert_eq!(cell.publish(state_with("db", "CLUSTER", &["d1"])), 0);
        let second = cell.load();
        assert!(second.cluster("web").is_none());
        assert!(second.cluster("db").is_some());

        // The previously loaded snapshot is unaffected by the swap.
        assert!(first.cluster("web").is_some());
    }

    #[test]
    fn test_publish_counts_prime_errors() {
        let cell = SnapshotCell::new();
        let warnings = cell.publish(state_with("broken", "CLUSTER", &["%missing"]));
        assert_eq!(warnings, 1);
        // A snapshot with prime warnings still publishes.
        assert!(cell.load().cluster("broken").is_some());
    }
}
