use crate::{
    search::{SearchEngine, SearchError},
    verse::{EmbeddingType, UnknownEmbeddingType, Verse},
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    engine: Arc<SearchEngine>,
}

pub fn router(engine: Arc<SearchEngine>) -> Router {
    let shared_state = Arc::new(SharedState { engine });

    Router::new()
        .route("/api/search", post(search))
        .route("/api/translations", get(translations))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

async fn start_app(engine: Arc<SearchEngine>, listen: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("listening on {listen}");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn start_daemon(engine: SearchEngine, listen: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(Arc::new(engine), listen))
}

#[derive(Debug)]
enum HttpError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            HttpError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            HttpError::Internal(message) => {
                log::error!("{message}");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        if err.is_bad_request() {
            HttpError::BadRequest(err.to_string())
        } else {
            HttpError::Internal(err.to_string())
        }
    }
}

impl From<UnknownEmbeddingType> for HttpError {
    fn from(err: UnknownEmbeddingType) -> Self {
        HttpError::BadRequest(err.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,

    /// `remote` by default
    pub embedding_type: Option<String>,

    /// Configured default translation when omitted
    pub translation: Option<String>,

    #[serde(default)]
    pub only_text: bool,

    pub k: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerseResponse {
    #[serde(flatten)]
    pub verse: Verse,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl From<Verse> for VerseResponse {
    fn from(verse: Verse) -> Self {
        Self {
            reference: verse.reference(),
            verse,
        }
    }
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Vec<VerseResponse>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let embedding_type = match payload.embedding_type.as_deref() {
        Some(name) => name.parse::<EmbeddingType>()?,
        None => EmbeddingType::Remote,
    };

    // embedding and index clients block
    let engine = state.engine.clone();
    let verses = tokio::task::spawn_blocking(move || {
        engine.search(
            &payload.query,
            embedding_type,
            payload.translation.as_deref(),
            payload.only_text,
            payload.k,
        )
    })
    .await
    .map_err(|err| HttpError::Internal(format!("search task failed: {err}")))??;

    Ok(Json(verses.into_iter().map(VerseResponse::from).collect()))
}

async fn translations(State(state): State<Arc<SharedState>>) -> Json<Vec<String>> {
    Json(state.engine.translations())
}
