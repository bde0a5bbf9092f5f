//! Range expression evaluation over named clusters.
//!
//! A [`State`] is an immutable set of clusters, each mapping attribute
//! keys to ordered lists of string values, plus one designated default
//! cluster that acts as the fallback namespace for bare names. Queries
//! are small range expressions:
//!
//! - `%web`: the `CLUSTER` key of cluster `web`
//! - `%web:OWNER`: a specific key of a cluster
//! - `@dns`: a key of the default cluster
//! - `frontend`: a bare name, resolved through the default cluster if
//!   it names a key there, otherwise returned as a literal
//! - `a,b`: union, first occurrence wins
//!
//! Values may themselves be `%` or `@` references and are expanded
//! recursively up to a fixed depth. A state is built once, optionally
//! primed with [`State::prime_cache`], and then only read; nothing in
//! the query path mutates it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

/// Key expanded by a bare `%cluster` reference.
pub const CLUSTER_KEY: &str = "CLUSTER";

/// Maximum depth of nested `%`/`@` references.
const MAX_DEPTH: usize = 8;

/// A single cluster: attribute key to ordered value list.
pub type Cluster = HashMap<String, Vec<String>>;

/// Errors produced while evaluating a range expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("empty query")]
    EmptyQuery,

    #[error("malformed expression: {0}")]
    Syntax(String),

    #[error("no such cluster: {0}")]
    UnknownCluster(String),

    #[error("expansion too deep evaluating {0}")]
    TooDeep(String),
}

/// An immutable query state: clusters plus the default cluster.
///
/// Built by the reload pipeline, primed once, then shared read-only
/// with every concurrent query. There is no mutation API past the
/// builder methods, which take `&mut self` and therefore cannot be
/// reached once the state is behind an `Arc`.
#[derive(Debug, Default)]
pub struct State {
    clusters: HashMap<String, Cluster>,
    default_cluster: Cluster,
    /// Primed expansions keyed by `%name` expression text.
    cache: RwLock<HashMap<String, Arc<Vec<String>>>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a regular cluster. Replaces any existing cluster of the
    /// same name wholesale.
    pub fn add_cluster(&mut self, name: impl Into<String>, cluster: Cluster) {
        self.clusters.insert(name.into(), cluster);
    }

    /// Install the default cluster consulted for `@key` lookups and
    /// bare-name fallback.
    pub fn set_default_cluster(&mut self, cluster: Cluster) {
        self.default_cluster = cluster;
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.get(name)
    }

    pub fn clusters(&self) -> &HashMap<String, Cluster> {
        &self.clusters
    }

    pub fn default_cluster(&self) -> &Cluster {
        &self.default_cluster
    }

    /// Number of regular clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Evaluate a range expression against this state.
    ///
    /// Results preserve first-occurrence order across union terms and
    /// never contain duplicates.
    pub fn query(&self, text: &str) -> Result<Vec<String>, QueryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for term in text.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            for value in self.eval_term(term)? {
                if seen.insert(value.clone()) {
                    out.push(value);
                }
            }
        }
        Ok(out)
    }

    /// Precompute the `%name` expansion of every cluster.
    ///
    /// Returns the evaluation errors encountered; clusters that failed
    /// to expand are simply left uncached. Safe to call exactly once
    /// before the state is shared.
    pub fn prime_cache(&self) -> Vec<QueryError> {
        let mut errors = Vec::new();
        let mut names: Vec<&String> = self.clusters.keys().collect();
        names.sort();

        let mut cache = self.cache.write();
        for name in names {
            let expr = format!("%{name}");
            match self.eval_reference(&expr, 0) {
                Ok(values) => {
                    cache.insert(expr, Arc::new(values));
                }
                Err(err) => {
                    debug!(cluster = %name, error = %err, "prime failed");
                    errors.push(err);
                }
            }
        }
        errors
    }

    fn eval_term(&self, term: &str) -> Result<Vec<String>, QueryError> {
        if term.starts_with('%') || term.starts_with('@') {
            if let Some(cached) = self.cache.read().get(term) {
                return Ok(cached.as_ref().clone());
            }
            return self.eval_reference(term, 0);
        }

        // Bare name: fall back through the default cluster, otherwise
        // the name is its own (only) result.
        match self.default_cluster.get(term) {
            Some(values) => self.eval_values(values, 1),
            None => Ok(vec![term.to_string()]),
        }
    }

    fn eval_reference(&self, expr: &str, depth: usize) -> Result<Vec<String>, QueryError> {
        if depth >= MAX_DEPTH {
            return Err(QueryError::TooDeep(expr.to_string()));
        }

        let values = if let Some(rest) = expr.strip_prefix('%') {
            let (name, key) = match rest.split_once(':') {
                Some((name, key)) => (name, key),
                None => (rest, CLUSTER_KEY),
            };
            if name.is_empty() || key.is_empty() {
                return Err(QueryError::Syntax(expr.to_string()));
            }
            let cluster = self
                .clusters
                .get(name)
                .ok_or_else(|| QueryError::UnknownCluster(name.to_string()))?;
            cluster.get(key).map(Vec::as_slice).unwrap_or(&[])
        } else if let Some(key) = expr.strip_prefix('@') {
            if key.is_empty() {
                return Err(QueryError::Syntax(expr.to_string()));
            }
            self.default_cluster
                .get(key)
                .map(Vec::as_slice)
                .unwrap_or(&[])
        } else {
            return Err(QueryError::Syntax(expr.to_string()));
        };

        self.eval_values(values, depth + 1)
    }

    /// Expand a value list: `%`/`@` entries recurse, everything else
    /// passes through literally.
    fn eval_values(&self, values: &[String], depth: usize) -> Result<Vec<String>, QueryError> {
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            if value.starts_with('%') || value.starts_with('@') {
                out.extend(self.eval_reference(value, depth)?);
            } else {
                out.push(value.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(pairs: &[(&str, &[&str])]) -> Cluster {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn sample_state() -> State {
        let mut state = State::new();
        state.add_cluster(
            "web",
            cluster(&[
                ("CLUSTER", &["w1", "w2"]),
                ("OWNER", &["ops"]),
            ]),
        );
        state.add_cluster("db", cluster(&[("CLUSTER", &["d1"])]));
        state.add_cluster("all", cluster(&[("CLUSTER", &["%web", "%db"])]));
        state.set_default_cluster(cluster(&[
            ("frontend", &["%web"]),
            ("dns", &["ns1", "ns2"]),
        ]));
        state
    }

    #[test]
    fn test_cluster_expansion() {
        let state = sample_state();
        assert_eq!(state.query("%web").unwrap(), vec!["w1", "w2"]);
        assert_eq!(state.query("%web:OWNER").unwrap(), vec!["ops"]);
    }

    #[test]
    fn test_missing_key_is_empty() {
        let state = sample_state();
        assert!(state.query("%web:NOPE").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_cluster_errors() {
        let state = sample_state();
        assert_eq!(
            state.query("%nope"),
            Err(QueryError::UnknownCluster("nope".to_string()))
        );
    }

    #[test]
    fn test_nested_references() {
        let state = sample_state();
        assert_eq!(state.query("%all").unwrap(), vec!["w1", "w2", "d1"]);
    }

    #[test]
    fn test_default_cluster_lookups() {
        let state = sample_state();
        assert_eq!(state.query("@dns").unwrap(), vec!["ns1", "ns2"]);
        // Bare name resolving through the default cluster.
        assert_eq!(state.query("frontend").unwrap(), vec!["w1", "w2"]);
        // Bare name with no default entry is a literal.
        assert_eq!(state.query("standalone").unwrap(), vec!["standalone"]);
    }

    #[test]
    fn test_union_dedupes_preserving_order() {
        let state = sample_state();
        assert_eq!(
            state.query("%db, %web, %db").unwrap(),
            vec!["d1", "w1", "w2"]
        );
    }

    #[test]
    fn test_empty_query_errors() {
        let state = sample_state();
        assert_eq!(state.query("  "), Err(QueryError::EmptyQuery));
    }

    #[test]
    fn test_self_reference_hits_depth_limit() {
        let mut state = State::new();
        state.add_cluster("loop", cluster(&[("CLUSTER", &["%loop"])]));
        assert!(matches!(
            state.query("%loop"),
            Err(QueryError::TooDeep(_))
        ));
    }

    #[test]
    fn test_prime_cache_reports_dangling_references() {
        let mut state = sample_state();
        state.add_cluster("broken", cluster(&[("CLUSTER", &["%missing"])]));
        let errors = state.prime_cache();
        assert_eq!(
            errors,
            vec![QueryError::UnknownCluster("missing".to_string())]
        );
        // Healthy clusters are still primed and queryable.
        assert_eq!(state.query("%web").unwrap(), vec!["w1", "w2"]);
    }

    #[test]
    fn test_query_after_prime_uses_cache() {
        let state = sample_state();
        assert!(state.prime_cache().is_empty());
        assert_eq!(state.query("%all").unwrap(), vec!["w1", "w2", "d1"]);
    }
}
