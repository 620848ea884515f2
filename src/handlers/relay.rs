//! WebRTC 시그널링 중계
//!
//! 통화 상태와 무관하게 대상 연결로 그대로 전달한다. 대상이 없으면 무시한다.

use crate::protocol::ServerMessage;
use crate::state::AppState;
use serde_json::Value;

/// Offer 처리
pub fn handle_offer(state: &AppState, from_peer_id: &str, target_id: &str, offer: Value) {
    let message = ServerMessage::WebrtcOffer {
        from: from_peer_id.to_string(),
        offer,
    };
    forward(state, from_peer_id, target_id, message, "offer");
}

/// Answer 처리
pub fn handle_answer(state: &AppState, from_peer_id: &str, target_id: &str, answer: Value) {
    let message = ServerMessage::WebrtcAnswer {
        from: from_peer_id.to_string(),
        answer,
    };
    forward(state, from_peer_id, target_id, message, "answer");
}

/// ICE Candidate 처리
pub fn handle_ice_candidate(
    state: &AppState,
    from_peer_id: &str,
    target_id: &str,
    candidate: Value,
) {
    let message = ServerMessage::WebrtcIceCandidate {
        from: from_peer_id.to_string(),
        candidate,
    };
    forward(state, from_peer_id, target_id, message, "ice-candidate");
}

fn forward(state: &AppState, from: &str, target: &str, message: ServerMessage, kind: &str) {
    if state.send_to(target, message) {
        tracing::debug!(from = %from, target = %target, kind = kind, "Relayed signal");
    } else {
        tracing::debug!(from = %from, target = %target, kind = kind, "Relay target gone, dropped");
    }
}
