//! Operator HTTP surface.
//!
//!   GET  /health   liveness probe
//!   GET  /status   state, activity, digest progress, last outcome
//!   POST /sleep    force sleep at the next heartbeat boundary
//!   POST /wake     end the current digest at the next chunk boundary
//!   POST /digest   force sleep with `{"replay_ratio": r}` (optional)
//!
//! Handlers never touch the store. Commands go to the loop through a bounded
//! queue and status comes from the snapshot the loop publishes.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::validate_replay_ratio;
use crate::daemon::{Command, StatusSnapshot};

#[derive(Clone)]
pub struct ControlState {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StatusSnapshot>,
    default_replay_ratio: f64,
}

impl ControlState {
    pub fn new(
        commands: mpsc::Sender<Command>,
        status: watch::Receiver<StatusSnapshot>,
        default_replay_ratio: f64,
    ) -> Self {
        Self {
            commands,
            status,
            default_replay_ratio,
        }
    }
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/sleep", post(sleep))
        .route("/wake", post(wake))
        .route("/digest", post(digest))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: ControlState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("control API listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn status(State(state): State<ControlState>) -> Json<StatusSnapshot> {
    Json(state.status.borrow().clone())
}

async fn sleep(State(state): State<ControlState>) -> Response {
    enqueue(&state, Command::Sleep)
}

async fn wake(State(state): State<ControlState>) -> Response {
    enqueue(&state, Command::Wake)
}

#[derive(Debug, Default, Deserialize)]
struct DigestRequest {
    replay_ratio: Option<f64>,
}

async fn digest(State(state): State<ControlState>, body: Option<Json<DigestRequest>>) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let replay_ratio = request.replay_ratio.unwrap_or(state.default_replay_ratio);
    if let Err(e) = validate_replay_ratio(replay_ratio) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": e.to_string()})),
        )
            .into_response();
    }
    enqueue(&state, Command::Digest { replay_ratio })
}

fn enqueue(state: &ControlState, command: Command) -> Response {
    match state.commands.try_send(command) {
        Ok(()) => {
            tracing::info!("queued operator command {command:?}");
            (StatusCode::ACCEPTED, Json(json!({"queued": format!("{command:?}")}))).into_response()
        }
        Err(TrySendError::Full(_)) => {
            tracing::warn!("command queue full; rejecting {command:?}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "command queue full"})),
            )
                .into_response()
        }
        Err(TrySendError::Closed(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "daemon is shutting down"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::Activity;
    use serde_json::Value;

    struct Api {
        url: String,
        commands: mpsc::Receiver<Command>,
        status: watch::Sender<StatusSnapshot>,
        cancel: CancellationToken,
        server: tokio::task::JoinHandle<std::io::Result<()>>,
    }

    async fn spawn_api(queue: usize) -> Api {
        let (tx, commands) = mpsc::channel(queue);
        let (status, rx) = watch::channel(StatusSnapshot::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, ControlState::new(tx, rx, 0.15), cancel.clone()));
        Api {
            url,
            commands,
            status,
            cancel,
            server,
        }
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let api = spawn_api(4).await;
        let http = reqwest::Client::new();

        let health: Value = http
            .get(format!("{}/health", api.url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let status: Value = http
            .get(format!("{}/status", api.url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["activity"]["kind"], "starting");
        assert!(status["state"].is_null());

        api.status.send_modify(|s| {
            s.activity = Activity::Heartbeat { count: 3 };
            s.heartbeats = 7;
        });
        let status: Value = http
            .get(format!("{}/status", api.url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["activity"]["kind"], "heartbeat");
        assert_eq!(status["activity"]["count"], 3);
        assert_eq!(status["heartbeats"], 7);
    }

    #[tokio::test]
    async fn test_commands_are_queued() {
        let mut api = spawn_api(4).await;
        let http = reqwest::Client::new();

        let r = http.post(format!("{}/sleep", api.url)).send().await.unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::ACCEPTED);
        let r = http.post(format!("{}/wake", api.url)).send().await.unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::ACCEPTED);
        let r = http.post(format!("{}/digest", api.url)).send().await.unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::ACCEPTED);
        let r = http
            .post(format!("{}/digest", api.url))
            .json(&json!({"replay_ratio": 0.4}))
            .send()
            .await
            .unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::ACCEPTED);

        assert_eq!(api.commands.recv().await, Some(Command::Sleep));
        assert_eq!(api.commands.recv().await, Some(Command::Wake));
        assert_eq!(
            api.commands.recv().await,
            Some(Command::Digest { replay_ratio: 0.15 })
        );
        assert_eq!(
            api.commands.recv().await,
            Some(Command::Digest { replay_ratio: 0.4 })
        );
    }

    #[tokio::test]
    async fn test_invalid_replay_ratio_rejected() {
        let mut api = spawn_api(4).await;
        let http = reqwest::Client::new();

        let r = http
            .post(format!("{}/digest", api.url))
            .json(&json!({"replay_ratio": 1.5}))
            .send()
            .await
            .unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = r.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("1.5"));
        assert!(api.commands.try_recv().is_err(), "nothing queued");
    }

    #[tokio::test]
    async fn test_full_queue_is_503() {
        let api = spawn_api(1).await;
        let http = reqwest::Client::new();

        let r = http.post(format!("{}/sleep", api.url)).send().await.unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::ACCEPTED);
        let r = http.post(format!("{}/sleep", api.url)).send().await.unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_closed_queue_is_503() {
        let api = spawn_api(4).await;
        let Api { url, commands, .. } = api;
        drop(commands);

        let r = reqwest::Client::new()
            .post(format!("{url}/wake"))
            .send()
            .await
            .unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let api = spawn_api(4).await;
        api.cancel.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), api.server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
