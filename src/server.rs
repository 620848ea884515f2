//! HTTP/WebSocket 라우터와 메시지 디스패치

use crate::calls::CallInitiator;
use crate::handlers;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, Identity};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderValue,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// 라우터 구성
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>Family Call Signaling Server</h1><p>WebSocket endpoint: /ws</p>")
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "family-call-signaling",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// 디버깅용 현재 통화 상태
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.calls.lock().await.snapshot();

    Json(serde_json::json!({
        "status": "running",
        "activeCall": snapshot.session,
        "participants": snapshot.participants,
        "connections": state.connections.len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 연결 처리
    let connection_id = handlers::handle_connection(&state, tx.clone());

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode server message"),
            }
        }
    });

    // 수신 처리
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match ClientMessage::parse(&text) {
                Ok(msg) => handle_client_message(&state, &connection_id, &tx, msg).await,
                Err(e) => {
                    tracing::warn!(peer_id = %connection_id, error = %e, "Invalid client message");
                    let _ = tx.send(ServerMessage::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(peer_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
            _ => {}
        }
    }

    // 연결 해제
    handlers::handle_disconnect(&state, &connection_id).await;
    send_task.abort();
}

/// 검증된 클라이언트 메시지를 핸들러로 전달
pub async fn handle_client_message(
    state: &AppState,
    connection_id: &str,
    sender: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) {
    tracing::trace!(peer_id = %connection_id, event = msg.event_name(), "Client message");

    match msg {
        ClientMessage::Heartbeat => {
            handlers::handle_heartbeat(sender);
        }
        ClientMessage::JoinFamily {
            user_id,
            family_id,
            user_name,
        } => {
            handlers::handle_join_family(
                state,
                connection_id,
                Identity {
                    user_id,
                    family_id,
                    user_name,
                },
            );
        }
        ClientMessage::StartCall {
            call_id,
            caller_id,
            caller_name,
            call_type,
            family_id,
            target_user_ids,
        } => {
            let initiator = CallInitiator {
                call_id,
                caller_id,
                caller_name,
                connection_id: connection_id.to_string(),
                target_user_ids,
            };
            handlers::handle_start_call(state, initiator, call_type, &family_id).await;
        }
        ClientMessage::AcceptCall {
            call_id,
            user_id,
            user_name,
        } => {
            handlers::handle_accept_call(state, connection_id, &call_id, &user_id, &user_name)
                .await;
        }
        ClientMessage::RejectCall { call_id, user_id } => {
            handlers::handle_reject_call(connection_id, &call_id, user_id.as_deref());
        }
        ClientMessage::LeaveCall {
            user_id,
            user_name,
            call_id,
        } => {
            handlers::handle_leave_call(state, &call_id, &user_id, &user_name).await;
        }
        ClientMessage::EndCall { call_id, user_id } => {
            handlers::handle_end_call(state, &call_id, &user_id).await;
        }
        ClientMessage::SyncCallState { call_id, user_id } => {
            handlers::handle_sync_call_state(state, connection_id, &call_id, &user_id).await;
        }
        ClientMessage::WebrtcOffer { target_id, offer } => {
            handlers::handle_offer(state, connection_id, &target_id, offer);
        }
        ClientMessage::WebrtcAnswer { target_id, answer } => {
            handlers::handle_answer(state, connection_id, &target_id, answer);
        }
        ClientMessage::WebrtcIceCandidate {
            target_id,
            candidate,
        } => {
            handlers::handle_ice_candidate(state, connection_id, &target_id, candidate);
        }
        ClientMessage::RequestTurnConfig => {
            handlers::handle_turn_config_request(state, connection_id);
        }
    }
}
