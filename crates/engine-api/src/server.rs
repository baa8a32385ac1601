use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ActionResponse, ActionSubmission, ApiError, ContextResponse, EpochRequest, NamespaceId,
    RegisterActorRequest, RegisterActorResponse, ReplayResponse, ScoringSubmission, SimError,
    StatusResponse, WorldConfig,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{LiveEvent, MemoryService, Registry};

const STREAM_CHANNEL_CAPACITY: usize = 4096;
const DEADLINE_SWEEP_INTERVAL_MS: u64 = 250;

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    stream_tx: broadcast::Sender<LiveEvent>,
    memory: Arc<dyn MemoryService>,
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn status_for(err: &SimError) -> StatusCode {
        match err {
            SimError::InvalidNamespace(_)
            | SimError::InvalidConfig(_)
            | SimError::MalformedAction(_) => StatusCode::BAD_REQUEST,
            SimError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            SimError::ScopeDenied { .. } => StatusCode::FORBIDDEN,
            SimError::UnknownNamespace(_) | SimError::UnknownActor(_) => StatusCode::NOT_FOUND,
            SimError::NamespaceExists(_)
            | SimError::PhaseMismatch { .. }
            | SimError::SupertickMismatch { .. }
            | SimError::ContextHashMismatch { .. }
            | SimError::AlreadySubmitted { .. } => StatusCode::CONFLICT,
            SimError::StoreBusy => StatusCode::SERVICE_UNAVAILABLE,
            SimError::SchemaMismatch { .. } | SimError::Io(_) | SimError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SimError> for HttpApiError {
    fn from(err: SimError) -> Self {
        Self {
            status: Self::status_for(&err),
            error: err.to_api_error(),
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

pub async fn serve(
    addr: SocketAddr,
    data_dir: impl Into<std::path::PathBuf>,
    memory: Arc<dyn MemoryService>,
) -> Result<(), ServerError> {
    let (stream_tx, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
    let state = AppState {
        registry: Arc::new(Registry::new(data_dir)),
        stream_tx,
        memory,
    };
    spawn_deadline_sweeper(state.clone());

    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "monument api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/sim/{ns}/agent/{agent_id}/context", get(get_context))
        .route("/sim/{ns}/agent/{agent_id}/action", post(post_action))
        .route("/sim/{ns}/adjudicator/score", post(post_score))
        .route("/sim/{ns}/replay", get(get_replay))
        .route("/sim/{ns}/status", get(get_status))
        .route("/sim/{ns}/admin/create", post(create_namespace))
        .route("/sim/{ns}/admin/actors", post(register_actor))
        .route("/sim/{ns}/admin/epoch", post(set_epoch))
        .route("/sim/{ns}/admin/advance", post(force_advance))
        .route("/sim/{ns}/ws/live", get(stream_live))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: axum::extract::Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("*"),
    );
}

fn spawn_deadline_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(DEADLINE_SWEEP_INTERVAL_MS));
        loop {
            interval.tick().await;
            for (namespace, handle) in state.registry.open_engines().await {
                let mut engine = handle.lock().await;
                match engine.check_collect_deadline() {
                    Ok(events) => broadcast_events(&state, events),
                    Err(err) => {
                        warn!(%namespace, error = %err, "collect deadline sweep failed");
                    }
                }
            }
        }
    });
}

fn broadcast_events(state: &AppState, events: Vec<LiveEvent>) {
    for event in events {
        let _ = state.stream_tx.send(event);
    }
}

fn parse_namespace(raw: &str) -> Result<NamespaceId, HttpApiError> {
    NamespaceId::parse(raw).map_err(HttpApiError::from)
}

fn agent_secret(headers: &HeaderMap, agent_id: &str) -> Result<String, HttpApiError> {
    headers
        .get("x-agent-secret")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
        .ok_or_else(|| HttpApiError::from(SimError::AuthFailed(agent_id.to_string())))
}

async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "monument-api" }))
}

#[derive(Debug, Deserialize, Default)]
struct ContextQuery {
    history_length: Option<usize>,
    chat_length: Option<usize>,
}

async fn get_context(
    Path((ns, agent_id)): Path<(String, String)>,
    Query(query): Query<ContextQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ContextResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    let secret = agent_secret(&headers, &agent_id)?;
    let handle = state.registry.engine(&namespace).await?;
    let mut engine = handle.lock().await;
    let response = engine.context(
        &agent_id,
        &secret,
        query.history_length,
        query.chat_length,
        state.memory.as_ref(),
    )?;
    Ok(Json(response))
}

async fn post_action(
    Path((ns, agent_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<ActionSubmission>,
) -> Result<Json<ActionResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    if submission.namespace != namespace.as_str() {
        return Err(HttpApiError::from(SimError::MalformedAction(
            "namespace mismatch in URL and body".to_string(),
        )));
    }
    let secret = agent_secret(&headers, &agent_id)?;

    let handle = state.registry.engine(&namespace).await?;
    let (response, events) = {
        let mut engine = handle.lock().await;
        engine.submit_action(&agent_id, &secret, &submission)?
    };
    broadcast_events(&state, events);
    Ok(Json(response))
}

async fn post_score(
    Path(ns): Path<String>,
    State(state): State<AppState>,
    Json(submission): Json<ScoringSubmission>,
) -> Result<Json<StatusResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    let handle = state.registry.engine(&namespace).await?;
    let (status, events) = {
        let mut engine = handle.lock().await;
        let events = engine.submit_scoring(submission)?;
        (engine.status()?, events)
    };
    broadcast_events(&state, events);
    Ok(Json(status))
}

#[derive(Debug, Deserialize, Default)]
struct ReplayQuery {
    from_tick: Option<u64>,
    to_tick: Option<u64>,
}

async fn get_replay(
    Path(ns): Path<String>,
    Query(query): Query<ReplayQuery>,
    State(state): State<AppState>,
) -> Result<Json<ReplayResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    let handle = state.registry.engine(&namespace).await?;
    let engine = handle.lock().await;
    let from_tick = query.from_tick.unwrap_or(0);
    let to_tick = query
        .to_tick
        .unwrap_or_else(|| engine.world().supertick_id);
    let response = engine.replay(from_tick, to_tick)?;
    Ok(Json(response))
}

async fn get_status(
    Path(ns): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    let handle = state.registry.engine(&namespace).await?;
    let engine = handle.lock().await;
    Ok(Json(engine.status()?))
}

async fn create_namespace(
    Path(ns): Path<String>,
    State(state): State<AppState>,
    Json(config): Json<WorldConfig>,
) -> Result<Json<StatusResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    let handle = state.registry.create(&namespace, config).await?;
    let engine = handle.lock().await;
    Ok(Json(engine.status()?))
}

async fn register_actor(
    Path(ns): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<RegisterActorRequest>,
) -> Result<Json<RegisterActorResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    let handle = state.registry.engine(&namespace).await?;
    let (response, events) = {
        let mut engine = handle.lock().await;
        engine.register_actor(request)?
    };
    broadcast_events(&state, events);
    Ok(Json(response))
}

async fn set_epoch(
    Path(ns): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<EpochRequest>,
) -> Result<Json<StatusResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    let handle = state.registry.engine(&namespace).await?;
    let (status, events) = {
        let mut engine = handle.lock().await;
        let events = engine.set_epoch(request.epoch)?;
        (engine.status()?, events)
    };
    broadcast_events(&state, events);
    Ok(Json(status))
}

async fn force_advance(
    Path(ns): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    let handle = state.registry.engine(&namespace).await?;
    let (status, events) = {
        let mut engine = handle.lock().await;
        let events = engine.force_advance()?;
        (engine.status()?, events)
    };
    broadcast_events(&state, events);
    Ok(Json(status))
}

async fn stream_live(
    Path(ns): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, HttpApiError> {
    let namespace = parse_namespace(&ns)?;
    // Touch the namespace so unknown ids fail the upgrade with a 404.
    let _ = state.registry.engine(&namespace).await?;
    Ok(ws.on_upgrade(move |socket| stream_socket(socket, state, namespace)))
}

async fn stream_socket(mut socket: WebSocket, state: AppState, namespace: NamespaceId) {
    let mut rx = state.stream_tx.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        break;
                    }
                    _ => {}
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Ok(event) => {
                        if event.namespace != namespace.as_str() {
                            continue;
                        }
                        if send_live_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(namespace = %namespace, skipped, "live stream client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }
}

async fn send_live_event(socket: &mut WebSocket, event: &LiveEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}
