//! Dynamic resource registry contract and HTTP client.
//!
//! The registry supports blocking ("long-poll") reads: supplying a
//! [`Wait`] asks the server to hold the request until the state
//! changes past the given cursor or the wait time elapses, then return
//! the current state and a new cursor. Omitting it requests an
//! immediate return. The reload pipeline consumes this contract
//! through the [`Registry`] trait so tests can script a registry
//! in-process.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Response header carrying the long-poll cursor.
pub const INDEX_HEADER: &str = "X-Registry-Index";

/// Extra slack on top of the long-poll bound before the HTTP client
/// gives up on a request.
const LONG_POLL_SLACK: Duration = Duration::from_secs(5);

/// Long-poll parameters: block until the state changes past `index`
/// or `time` elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub index: u64,
    pub time: Duration,
}

/// Result of listing the registry's resource names.
#[derive(Debug, Clone)]
pub struct Listing {
    pub names: Vec<String>,
    pub index: u64,
}

/// Result of describing one named resource: its raw value tree plus
/// the new cursor.
#[derive(Debug, Clone)]
pub struct Description {
    pub value: Value,
    pub index: u64,
}

/// Errors from a registry fetch. All of them are non-fatal to a
/// reload; the affected resource is simply absent until the next
/// successful cycle.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registry returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("registry payload invalid: {0}")]
    Payload(String),
}

/// The consumed registry contract.
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Names of all known resources.
    async fn list_resources(&self, wait: Option<Wait>) -> Result<Listing, RegistryError>;

    /// Raw description of one named resource.
    async fn describe_resource(
        &self,
        name: &str,
        wait: Option<Wait>,
    ) -> Result<Description, RegistryError>;
}

/// HTTP implementation of the registry contract.
///
/// `GET {base}/v1/resources` lists names as a JSON string array;
/// `GET {base}/v1/resources/{name}` returns the resource description
/// as a JSON document. Long-poll parameters travel as `index`/`wait`
/// query parameters; the cursor comes back in the
/// [`INDEX_HEADER`] response header.
pub struct HttpRegistry {
    base: String,
    client: reqwest::Client,
}

impl HttpRegistry {
    /// Build a client whose request timeout covers the long-poll wait
    /// bound plus slack, so a blocking read can complete normally.
    pub fn new(address: &str, wait_bound: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(wait_bound + LONG_POLL_SLACK)
            .build()?;
        Ok(Self {
            base: address.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn fetch(&self, url: String, wait: Option<Wait>) -> Result<(Value, u64), RegistryError> {
        let mut request = self.client.get(&url);
        if let Some(wait) = wait {
            request = request.query(&[
                ("index", wait.index.to_string()),
                ("wait", format!("{}s", wait.time.as_secs())),
            ]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status(status));
        }

        let index = parse_index(response.headers());
        let value = response.json::<Value>().await?;
        Ok((value, index))
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn list_resources(&self, wait: Option<Wait>) -> Result<Listing, RegistryError> {
        let (value, index) = self
            .fetch(format!("{}/v1/resources", self.base), wait)
            .await?;
        let Value::Array(items) = value else {
            return Err(RegistryError::Payload(
                "resource list is not an array".to_string(),
            ));
        };
        let names = items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect();
        Ok(Listing { names, index })
    }

    async fn describe_resource(
        &self,
        name: &str,
        wait: Option<Wait>,
    ) -> Result<Description, RegistryError> {
        let (value, index) = self
            .fetch(format!("{}/v1/resources/{name}", self.base), wait)
            .await?;
        Ok(Description { value, index })
    }
}

/// Cursor from the response headers; a missing or malformed header
/// reads as zero, which requests an immediate return next time.
fn parse_index(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(INDEX_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_parse_index() {
        let mut headers = HeaderMap::new();
        headers.insert(INDEX_HEADER, HeaderValue::from_static("42"));
        assert_eq!(parse_index(&headers), 42);
    }

    #[test]
    fn test_parse_index_defaults_to_zero() {
        assert_eq!(parse_index(&HeaderMap::new()), 0);

        let mut headers = HeaderMap::new();
        headers.insert(INDEX_HEADER, HeaderValue::from_static("not-a-number"));
        assert_eq!(parse_index(&headers), 0);
    }

    #[test]
    fn test_base_address_normalized() {
        let registry =
            HttpRegistry::new("http://registry.internal:8500/", Duration::from_secs(10)).unwrap();
        assert_eq!(registry.base, "http://registry.internal:8500");
    }
}
