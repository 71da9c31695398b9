//! Blocking client for Pinecone's pod-based REST API.
//!
//! Control plane: `https://controller.{environment}.pinecone.io/databases`.
//! Data plane: the host reported by `describe`, cached per index.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;

use super::{IndexError, IndexService, IndexSpec, Match, VectorRecord};
use crate::config::IndexConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    status: IndexStatus,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    #[serde(rename = "upsertedCount", default)]
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

pub struct PineconeClient {
    client: Client,
    controller: String,
    hosts: Mutex<HashMap<String, String>>,
}

impl PineconeClient {
    pub fn new(api_key: &str, environment: &str) -> Result<Self, IndexError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key)
                .map_err(|e| IndexError::Config(format!("Invalid API key format: {e}")))?,
        );

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            controller: format!("https://controller.{environment}.pinecone.io"),
            hosts: Mutex::new(HashMap::new()),
        })
    }

    /// Credentials from config, falling back to PINECONE_API_KEY / PINECONE_ENV.
    pub fn from_config(config: &IndexConfig) -> Result<Self, IndexError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("PINECONE_API_KEY").ok())
            .ok_or_else(|| IndexError::Config("PINECONE_API_KEY is not set".to_string()))?;
        let environment = config
            .environment
            .clone()
            .or_else(|| std::env::var("PINECONE_ENV").ok())
            .ok_or_else(|| IndexError::Config("PINECONE_ENV is not set".to_string()))?;

        log::info!("Using Pinecone environment {environment}");
        Self::new(&api_key, &environment)
    }

    fn describe(&self, index: &str) -> Result<IndexStatus, IndexError> {
        let response = self
            .client
            .get(format!("{}/databases/{index}", self.controller))
            .send()?;
        let described: DescribeResponse = check(response)?.json()?;

        if let (true, Some(host)) = (described.status.ready, &described.status.host) {
            if let Ok(mut hosts) = self.hosts.lock() {
                hosts.insert(index.to_string(), host.clone());
            }
        }
        Ok(described.status)
    }

    fn host(&self, index: &str) -> Result<String, IndexError> {
        if let Some(host) = self.hosts.lock().ok().and_then(|h| h.get(index).cloned()) {
            return Ok(host);
        }

        match self.describe(index)? {
            IndexStatus {
                host: Some(host),
                ready: true,
            } => Ok(host),
            _ => Err(IndexError::NotReady(index.to_string())),
        }
    }
}

/// Turn non-2xx responses into [`IndexError::Api`].
fn check(response: Response) -> Result<Response, IndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().unwrap_or_default();
    log::error!("index service error {status}: {message}");
    Err(IndexError::Api {
        status: status.as_u16(),
        message,
    })
}

impl IndexService for PineconeClient {
    fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        let response = self
            .client
            .get(format!("{}/databases", self.controller))
            .send()?;
        Ok(check(response)?.json()?)
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        log::info!(
            "creating index {} ({} dims, {}, {})",
            spec.name,
            spec.dimension,
            spec.metric,
            spec.pod_type
        );
        let response = self
            .client
            .post(format!("{}/databases", self.controller))
            .json(spec)
            .send()?;
        check(response)?;
        Ok(())
    }

    fn index_ready(&self, name: &str) -> Result<bool, IndexError> {
        let status = self.describe(name)?;
        Ok(status.ready && status.host.is_some())
    }

    fn delete_index(&self, name: &str) -> Result<(), IndexError> {
        log::warn!("deleting index {name}");
        let response = self
            .client
            .delete(format!("{}/databases/{name}", self.controller))
            .send()?;
        check(response)?;

        if let Ok(mut hosts) = self.hosts.lock() {
            hosts.remove(name);
        }
        Ok(())
    }

    fn upsert(
        &self,
        index: &str,
        namespace: &str,
        vectors: &[VectorRecord],
    ) -> Result<usize, IndexError> {
        let host = self.host(index)?;
        let response = self
            .client
            .post(format!("https://{host}/vectors/upsert"))
            .json(&json!({
                "vectors": vectors,
                "namespace": namespace,
            }))
            .send()?;

        let upserted: UpsertResponse = check(response)?.json()?;
        Ok(upserted.upserted_count)
    }

    fn query(
        &self,
        index: &str,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError> {
        let host = self.host(index)?;
        let response = self
            .client
            .post(format!("https://{host}/query"))
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "namespace": namespace,
                "includeValues": false,
                "includeMetadata": false,
            }))
            .send()?;

        let result: QueryResponse = check(response)?.json()?;
        Ok(result.matches)
    }
}
