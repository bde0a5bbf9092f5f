//! Decoding generic value trees into cluster records.
//!
//! Both source kinds (cluster files and registry descriptions) decode
//! to a `serde_json::Value` before reaching this module, so the same
//! coercion rules apply to either. Decoding is total: invalid values
//! are discarded with a warning, never an error.

use serde_json::Value;
use tracing::{debug, warn};

use rangeql::Cluster;

/// Convert one decoded value tree into a cluster record.
///
/// Coercion rules, per attribute key: null becomes an empty list;
/// string, integer and boolean scalars become singleton lists; an
/// array of those scalars is coerced element-wise in order, dropping
/// invalid elements with one warning each; any other kind drops the
/// whole key with one warning. Returns the record and the number of
/// warnings produced.
pub fn decode_cluster(name: &str, value: &Value) -> (Cluster, u32) {
    let Value::Object(attrs) = value else {
        debug!(cluster = %name, "source is not a key/value document");
        return (Cluster::new(), 0);
    };

    let mut cluster = Cluster::new();
    let mut warnings = 0;

    for (key, value) in attrs {
        match value {
            Value::Null => {
                cluster.insert(key.clone(), Vec::new());
            }
            Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match coerce_scalar(item) {
                        Some(value) => values.push(value),
                        None => {
                            warn!(cluster = %name, key = %key, value = %item, "discarding invalid value");
                            warnings += 1;
                        }
                    }
                }
                cluster.insert(key.clone(), values);
            }
            other => match coerce_scalar(other) {
                Some(value) => {
                    cluster.insert(key.clone(), vec![value]);
                }
                None => {
                    warn!(cluster = %name, key = %key, "discarding invalid key");
                    warnings += 1;
                }
            },
        }
    }

    (cluster, warnings)
}

/// Coerce one scalar to its string form; `None` for anything that is
/// not a string, integer or boolean.
fn coerce_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_u64().map(|u| u.to_string())
            }
        }
        _ => None,
    }
}
