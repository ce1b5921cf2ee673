//! Distributed key/value store client (etcd)

use crate::config::EtcdApi;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use thiserror::Error;

/// Characters escaped inside a key path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Errors that can occur while writing to the store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error writing '{key}': {source}")]
    Http {
        key: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Store rejected '{key}' with {status}: {body}")]
    Rejected {
        key: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{failed} of {total} writes failed: {first}")]
    Partial {
        failed: usize,
        total: usize,
        first: Box<StoreError>,
    },
}

/// Key/value store certificates are published to
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// etcd over its HTTP APIs
pub struct EtcdClient {
    client: reqwest::Client,
    endpoint: String,
    api: EtcdApi,
}

impl EtcdClient {
    pub fn new(endpoint: &str, api: EtcdApi) -> reqwest::Result<Self> {
        Ok(Self {
            client: crate::http::client()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api,
        })
    }

    fn v2_url(&self, key: &str) -> String {
        let path = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/v2/keys/{}", self.endpoint, path)
    }

    fn v3_url(&self) -> String {
        format!("{}/v3/kv/put", self.endpoint)
    }

    fn request(&self, key: &str, value: &str) -> reqwest::RequestBuilder {
        match self.api {
            EtcdApi::V2 => self.client.put(self.v2_url(key)).form(&[("value", value)]),
            EtcdApi::V3 => self.client.post(self.v3_url()).json(&Self::v3_body(key, value)),
        }
    }

    fn v3_body(key: &str, value: &str) -> serde_json::Value {
        serde_json::json!({
            "key": BASE64.encode(key),
            "value": BASE64.encode(value),
        })
    }
}

#[async_trait]
impl KvStore for EtcdClient {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let response = self
            .request(key, value)
            .send().await.map_err(|source| StoreError::Http {
            key: key.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                key: key.to_string(),
                status,
                body,
            });
        }

        tracing::info!(key, "Successfully wrote file to key");
        Ok(())
    }
}
