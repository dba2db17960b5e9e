//! axum router: WebSocket chat endpoint plus the REST mirrors consumed by
//! collaborators.
//!
//! One tokio task per connection handles inbound messages in arrival order;
//! the reply for a message is dispatched before the next inbound message is
//! processed. A second task forwards registry deliveries to the socket so
//! alert pushes never race chat replies at the transport level.

use crate::alerts::AlertEngine;
use crate::components::PlatformInfo;
use crate::connection::{ConnectionRegistry, Delivery};
use crate::dialogue::DialogueStore;
use crate::external::{ExternalDataCache, TtlPolicy};
use crate::now_secs;
use crate::orchestrator::SessionOrchestrator;
use crate::protocol::{
    AlertCheckResponse, AlertStatusResponse, ClientMessage, SaveUserDataRequest,
    SaveUserDataResponse, ServerMessage,
};
use crate::storage::KvStore;
use crate::{AlertCategory, Config, ContextCache};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub registry: Arc<ConnectionRegistry>,
    pub alerts: Arc<AlertEngine>,
}

/// Organization scope of a user id: `org:name` connects on behalf of `org`,
/// a bare id is its own scope.
fn org_of(user_id: &str) -> &str {
    user_id.split(':').next().unwrap_or(user_id)
}

// ── Handlers ──────────────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    active_connections: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_connections: state.registry.active_connections(),
    })
}

/// HTTP mirror of the chat path; same reply shape as the WebSocket.
async fn chat_message(
    State(state): State<AppState>,
    Json(message): Json<ClientMessage>,
) -> Json<ServerMessage> {
    Json(state.orchestrator.handle_message(message).await)
}

async fn save_user_data(
    State(state): State<AppState>,
    Json(request): Json<SaveUserDataRequest>,
) -> Result<Json<SaveUserDataResponse>, (StatusCode, String)> {
    match state
        .orchestrator
        .dialogue()
        .save_user_data(&request.user_id, &request.data)
    {
        Ok(stored) => Ok(Json(SaveUserDataResponse {
            user_id: request.user_id,
            data: stored,
        })),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn trigger_alert_check(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<Json<AlertCheckResponse>, (StatusCode, String)> {
    match state.alerts.trigger_check(&org_id) {
        Ok(alerts_found) => Ok(Json(AlertCheckResponse {
            status: "success".to_string(),
            alerts_found,
        })),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn alerts_status(State(state): State<AppState>) -> Json<AlertStatusResponse> {
    Json(AlertStatusResponse {
        status: "active".to_string(),
        active_connections: state.alerts.active_connections(),
        categories: AlertCategory::all(),
        last_check: state.alerts.last_check(),
    })
}

async fn list_platforms(State(state): State<AppState>) -> Json<Vec<PlatformInfo>> {
    Json(state.orchestrator.generator().platforms().to_vec())
}

// ── WebSocket session ─────────────────────────────────────────────────────

async fn ws_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_session(socket, state, user_id))
}

async fn handle_ws_session(socket: WebSocket, state: AppState, user_id: String) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = state.registry.register(&user_id, tx);

    // Forward registry deliveries to the socket until closed or replaced.
    let forward = tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            match delivery {
                Delivery::Message { message, .. } => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(error = %e, "outbound serialization failed");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Delivery::Close => break,
            }
        }
        let _ = sink.close().await;
    });

    state.registry.send(
        &user_id,
        ServerMessage::Welcome {
            message: "مرحباً! أنا نديم، مساعدك الذكي في التسويق الرقمي 👋".to_string(),
            timestamp: now_secs(),
        },
    );

    // Alerts that arrived while the user was offline.
    for alert in state.alerts.drain_pending(org_of(&user_id)) {
        state.registry.send(&user_id, alert.to_message());
    }

    // Inbound messages in arrival order; each reply is dispatched before the
    // next message is read.
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => {
                    if message.user_id() != user_id {
                        state.registry.send(
                            &user_id,
                            ServerMessage::Error {
                                message: "user_id does not match this connection".to_string(),
                                timestamp: now_secs(),
                            },
                        );
                        continue;
                    }
                    let reply = state.orchestrator.handle_message(message).await;
                    state.registry.send(&user_id, reply);
                }
                Err(e) => {
                    // Malformed frame: report, then tear down this connection.
                    tracing::warn!(%user_id, error = %e, "malformed frame");
                    state.registry.send(
                        &user_id,
                        ServerMessage::Error {
                            message: format!("invalid message: {e}"),
                            timestamp: now_secs(),
                        },
                    );
                    break;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(&handle);
    let _ = forward.await;
    tracing::info!(%user_id, "websocket session ended");
}

// ── Router & server ──────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/:user_id", get(ws_handler))
        .route("/api/chat/message", post(chat_message))
        .route("/api/user/data", post(save_user_data))
        .route("/api/alerts/check/:org_id", post(trigger_alert_check))
        .route("/api/alerts/status", get(alerts_status))
        .route("/api/platforms", get(list_platforms))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("shutting down");
}

/// Wire up the stores, start the alert monitor, and serve until shutdown.
pub async fn run_server(host: &str, port: u16, config: Config) -> anyhow::Result<()> {
    let kv = KvStore::open(&config.data_dir)?;

    let dialogue = Arc::new(DialogueStore::with_backing(
        config.turn_window,
        kv.partition("slots")?,
    ));
    let context = Arc::new(ContextCache::with_backing(
        config.context_size_bound,
        kv.partition("context")?,
    ));
    let external = Arc::new(ExternalDataCache::new(
        TtlPolicy {
            volatile: config.volatile_ttl,
            competitive: config.competitive_ttl,
        },
        config.fetch_timeout,
    ));
    let registry = Arc::new(ConnectionRegistry::new());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        &config,
        dialogue,
        Arc::clone(&context),
        external,
    ));
    let alerts = Arc::new(
        AlertEngine::new(
            Arc::clone(&registry),
            context,
            config.crisis_sentiment_threshold,
        )
        .with_pending_store(kv.partition("pending_alerts")?),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = tokio::spawn(
        Arc::clone(&alerts).run_monitor(config.alert_check_interval, shutdown_rx),
    );

    let state = AppState {
        orchestrator,
        registry,
        alerts,
    };

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("nadim listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = monitor.await;
    Ok(())
}
