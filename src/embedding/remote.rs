//! Remote embedding backend for OpenAI-compatible APIs.
//!
//! Newlines are collapsed to spaces before sending, since they degrade
//! embedding quality. Batched calls retry transient failures according to the
//! configured [`RetryPolicy`]; single calls are attempted once.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{check_dimensions, EmbeddingError, EmbeddingProvider, RetryPolicy};
use crate::config::RemoteEmbeddingConfig;

/// Transport for the embedding endpoint.
pub trait EmbeddingApi: Send + Sync {
    /// One request; returns one vector per input text, in input order.
    fn create(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Blocking reqwest client for `POST /v1/embeddings`.
pub struct OpenAiApi {
    client: Client,
    endpoint: String,
}

impl OpenAiApi {
    pub fn new(
        endpoint: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| EmbeddingError::Config(format!("Invalid API key format: {e}")))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => log::warn!("No API key provided for {endpoint}"),
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

impl EmbeddingApi for OpenAiApi {
    fn create(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        log::debug!("embedding {} texts via {}", texts.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest { model, input: texts })
            .send()
            .map_err(|e| EmbeddingError::Transient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Transient(format!("HTTP {status}: {body}")));
        }

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|r| r.error.message)
                .unwrap_or(body);
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut data = response
            .json::<EmbeddingResponse>()
            .map_err(|e| EmbeddingError::EmbeddingFailed(format!("Failed to parse response: {e}")))?
            .data;
        data.sort_by_key(|d| d.index);

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Remote embedding provider.
pub struct RemoteEmbedder {
    api: Box<dyn EmbeddingApi>,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
    sleep: Arc<dyn Fn(Duration) + Send + Sync>,
}

impl RemoteEmbedder {
    pub fn new(
        api: Box<dyn EmbeddingApi>,
        model: &str,
        dimensions: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            api,
            model: model.to_string(),
            dimensions,
            retry,
            sleep: Arc::new(std::thread::sleep),
        }
    }

    pub fn from_config(config: &RemoteEmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        let api = OpenAiApi::new(
            &config.endpoint,
            api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )?;

        log::info!(
            "remote embeddings: endpoint={}, model={}, {} dimensions",
            config.endpoint,
            config.model,
            config.dimensions
        );

        Ok(Self::new(
            Box::new(api),
            &config.model,
            config.dimensions,
            config.retry.clone(),
        ))
    }

    /// Replace the sleep used between retries.
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Arc::new(sleep);
        self
    }

    fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let embeddings = self.api.create(&self.model, texts)?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                embeddings.len()
            )));
        }
        check_dimensions(&embeddings, self.dimensions)?;

        Ok(embeddings)
    }
}

/// Replace newlines, which the embedding API is sensitive to.
pub(crate) fn collapse_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

impl EmbeddingProvider for RemoteEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(&[collapse_newlines(text)])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let texts: Vec<String> = texts.iter().map(|t| collapse_newlines(t)).collect();

        self.retry
            .run(
                |_| self.request(&texts),
                EmbeddingError::is_transient,
                |delay| (*self.sleep)(delay),
            )
            .map_err(|failure| {
                if failure.error.is_transient() {
                    EmbeddingError::RetriesExhausted {
                        attempts: failure.attempts,
                        last: Box::new(failure.error),
                    }
                } else {
                    failure.error
                }
            })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` calls with `error`, then echoes lengths.
    struct ScriptedApi {
        failures: u32,
        calls: Arc<AtomicU32>,
        error: fn() -> EmbeddingError,
        seen: Seen,
    }

    impl EmbeddingApi for ScriptedApi {
        fn create(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(texts.to_vec());
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    type Seen = Arc<Mutex<Vec<Vec<String>>>>;

    fn embedder(
        failures: u32,
        error: fn() -> EmbeddingError,
    ) -> (RemoteEmbedder, Arc<AtomicU32>, Seen) {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(Mutex::new(vec![]));
        let api = ScriptedApi {
            failures,
            calls: calls.clone(),
            error,
            seen: seen.clone(),
        };
        let embedder = RemoteEmbedder::new(Box::new(api), "test-model", 2, RetryPolicy::default())
            .with_sleep(|_| {});
        (embedder, calls, seen)
    }

    #[test]
    fn newlines_are_collapsed() {
        assert_eq!(collapse_newlines("a\nb\r\nc\rd"), "a b c d");

        let (embedder, _, seen) = embedder(0, || EmbeddingError::Transient("x".into()));
        embedder
            .embed_many(&["In the\nbeginning".to_string()])
            .unwrap();
        embedder.embed_one("God\nsaid").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], vec!["In the beginning".to_string()]);
        assert_eq!(seen[1], vec!["God said".to_string()]);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let (embedder, calls, _) = embedder(10, || EmbeddingError::Api {
            status: 401,
            message: "bad key".into(),
        });

        let err = embedder.embed_many(&["x".to_string()]).unwrap_err();
        assert!(matches!(err, EmbeddingError::Api { status: 401, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_embeddings_are_not_retried() {
        let (embedder, calls, _) = embedder(1, || EmbeddingError::Transient("503".into()));
        assert!(embedder.embed_one("x").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrong_dimensions_are_rejected() {
        struct WideApi;
        impl EmbeddingApi for WideApi {
            fn create(&self, _: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Ok(texts.iter().map(|_| vec![0.0; 5]).collect())
            }
        }

        let embedder = RemoteEmbedder::new(Box::new(WideApi), "m", 2, RetryPolicy::default());
        let err = embedder.embed_many(&["x".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 2,
                got: 5
            }
        ));
    }

    #[test]
    fn empty_batch_skips_the_api() {
        let (embedder, calls, _) = embedder(0, || EmbeddingError::Transient("x".into()));
        assert!(embedder.embed_many(&[]).unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
