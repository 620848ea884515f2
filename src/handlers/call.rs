//! 통화 시그널링 핸들러
//!
//! 모든 핸들러는 `state.calls` 락을 잡은 채로 상태를 변경하고 브로드캐스트까지
//! 마친다. 따라서 가족 방 구독자는 서버가 처리한 순서대로 이벤트를 받는다.

use crate::calls::{CallInitiator, CallStore, CallType, Rejected, Removal};
use crate::protocol::{ServerMessage, ENDED_BY_NOT_FOUND, ENDED_BY_NO_PARTICIPANTS};
use crate::state::AppState;

/// start-call 처리
pub async fn handle_start_call(
    state: &AppState,
    initiator: CallInitiator,
    call_type: CallType,
    family_id: &str,
) {
    let connection_id = initiator.connection_id.clone();
    let requested_call_id = initiator.call_id.clone();
    let mut calls = state.calls.lock().await;

    match calls.try_start_call(initiator, call_type, family_id) {
        Ok(call) => {
            let participants = calls.participants();

            state.broadcast_to_family_except(
                family_id,
                &connection_id,
                ServerMessage::IncomingCall {
                    call: call.clone(),
                    participants: participants.clone(),
                },
            );
            state.send_to(
                &connection_id,
                ServerMessage::CallParticipantsUpdated {
                    call_id: call.call_id.clone(),
                    participants,
                },
            );

            tracing::info!(
                call_id = %call.call_id,
                caller_id = %call.caller_id,
                family_id = %family_id,
                call_type = call_type.as_str(),
                "Call started"
            );
        }
        Err(rejected) => {
            tracing::warn!(
                call_id = %requested_call_id,
                family_id = %family_id,
                reason = rejected.reason(),
                "Start call blocked"
            );
            state.send_to(&connection_id, rejection_message(&requested_call_id, rejected));
        }
    }
}

/// accept-call 처리
pub async fn handle_accept_call(
    state: &AppState,
    connection_id: &str,
    call_id: &str,
    user_id: &str,
    user_name: &str,
) {
    let mut calls = state.calls.lock().await;

    let participants = match calls.try_join_call(call_id, user_id, user_name, connection_id) {
        Ok(participants) => participants,
        Err(rejected) => {
            tracing::warn!(
                call_id = %call_id,
                user_id = %user_id,
                reason = rejected.reason(),
                "Accept call rejected"
            );
            state.send_to(connection_id, rejection_message(call_id, rejected));
            return;
        }
    };

    let family_id = active_family(&calls);

    state.broadcast_to_family(
        &family_id,
        ServerMessage::UserJoinedCall {
            call_id: call_id.to_string(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            participants: participants.clone(),
        },
    );
    state.send_to(
        connection_id,
        ServerMessage::CallAccepted {
            call_id: call_id.to_string(),
            participants: participants.clone(),
        },
    );

    tracing::info!(
        call_id = %call_id,
        user_id = %user_id,
        participants = participants.len(),
        "User joined call"
    );
}

/// reject-call 처리. 거절은 권고일 뿐이라 상태를 바꾸지 않는다.
pub fn handle_reject_call(connection_id: &str, call_id: &str, user_id: Option<&str>) {
    tracing::info!(
        peer_id = %connection_id,
        call_id = %call_id,
        user_id = ?user_id,
        "Call rejected"
    );
}

/// leave-call 처리
pub async fn handle_leave_call(state: &AppState, call_id: &str, user_id: &str, user_name: &str) {
    let mut calls = state.calls.lock().await;

    if !calls.matches(call_id) {
        tracing::warn!(
            call_id = %call_id,
            active_call_id = ?calls.active_call().map(|c| c.call_id.as_str()),
            user_id = %user_id,
            "leave-call for inactive call ignored"
        );
        return;
    }

    if let Some(removal) = calls.remove_participant(user_id) {
        announce_removal(state, removal, user_id, user_name);
    }
}

/// 연결이 점유한 참가자를 제거 (disconnect 경로)
pub async fn remove_connection_participant(state: &AppState, connection_id: &str) {
    let mut calls = state.calls.lock().await;

    let (user_id, user_name) = match calls.participant_for_connection(connection_id) {
        Some(entry) => (entry.id.clone(), entry.name.clone()),
        None => return,
    };

    tracing::info!(peer_id = %connection_id, user_id = %user_id, "Participant disconnected");

    if let Some(removal) = calls.remove_participant(&user_id) {
        announce_removal(state, removal, &user_id, &user_name);
    }
}

/// end-call 처리. 활성 통화가 없거나 callId 가 다르면 아무 일도 하지 않는다.
pub async fn handle_end_call(state: &AppState, call_id: &str, user_id: &str) {
    let mut calls = state.calls.lock().await;

    if !calls.matches(call_id) {
        tracing::warn!(
            call_id = %call_id,
            active_call_id = ?calls.active_call().map(|c| c.call_id.as_str()),
            user_id = %user_id,
            "end-call for inactive call ignored"
        );
        return;
    }

    if let Some(call) = calls.end_call() {
        state.broadcast_to_family(
            &call.family_id,
            ServerMessage::CallEnded {
                call_id: call.call_id.clone(),
                ended_by: user_id.to_string(),
            },
        );
        tracing::info!(call_id = %call.call_id, ended_by = %user_id, "Call ended");
    }
}

/// sync-call-state 처리 (재접속한 클라이언트의 상태 동기화)
pub async fn handle_sync_call_state(
    state: &AppState,
    connection_id: &str,
    call_id: &str,
    user_id: &str,
) {
    let mut calls = state.calls.lock().await;

    let call = match calls.active_call() {
        Some(call) if call.call_id == call_id => call.clone(),
        _ => {
            tracing::info!(call_id = %call_id, user_id = %user_id, "Stale call state, telling client to reset");
            state.send_to(
                connection_id,
                ServerMessage::CallEnded {
                    call_id: call_id.to_string(),
                    ended_by: ENDED_BY_NOT_FOUND.to_string(),
                },
            );
            return;
        }
    };

    if calls.rebind_connection(user_id, connection_id) {
        let participants = calls.participants();
        state.send_to(
            connection_id,
            ServerMessage::CallStateSynced {
                call,
                participants: participants.clone(),
            },
        );
        state.send_to(
            connection_id,
            ServerMessage::CallParticipantsUpdated {
                call_id: call_id.to_string(),
                participants,
            },
        );
        tracing::debug!(call_id = %call_id, user_id = %user_id, "Call state synced");
    } else {
        state.send_to(
            connection_id,
            ServerMessage::IncomingCall {
                call,
                participants: calls.participants(),
            },
        );
        tracing::debug!(call_id = %call_id, user_id = %user_id, "Redelivered incoming call");
    }
}

/// user-left-call 브로드캐스트, 통화가 자동 종료되었으면 call-ended 도 전송
fn announce_removal(state: &AppState, removal: Removal, user_id: &str, user_name: &str) {
    let Some(removed) = removal.removed else {
        return;
    };

    let user_name = if user_name.is_empty() {
        removed.name
    } else {
        user_name.to_string()
    };

    state.broadcast_to_family(
        &removal.family_id,
        ServerMessage::UserLeftCall {
            call_id: removal.call_id.clone(),
            user_id: user_id.to_string(),
            user_name,
            participants: removal.remaining.clone(),
        },
    );

    tracing::info!(
        call_id = %removal.call_id,
        user_id = %user_id,
        remaining = removal.remaining.len(),
        "User left call"
    );

    if removal.auto_ended {
        state.broadcast_to_family(
            &removal.family_id,
            ServerMessage::CallEnded {
                call_id: removal.call_id.clone(),
                ended_by: ENDED_BY_NO_PARTICIPANTS.to_string(),
            },
        );
        tracing::info!(call_id = %removal.call_id, "Call ended, no participants left");
    }
}

fn active_family(calls: &CallStore) -> String {
    calls
        .active_call()
        .map(|call| call.family_id.clone())
        .unwrap_or_default()
}

fn rejection_message(call_id: &str, rejected: Rejected) -> ServerMessage {
    let reason = rejected.reason().to_string();
    match rejected {
        Rejected::CallInProgress {
            active_call_id,
            active_call_type,
        } => ServerMessage::CallBlocked {
            reason,
            message: format!(
                "A {} call is already in progress",
                active_call_type.as_str()
            ),
            active_call_id,
            active_call_type,
        },
        Rejected::InvalidOrExpiredCall => ServerMessage::CallError {
            call_id: call_id.to_string(),
            reason,
            message: "Call not found or already ended".to_string(),
        },
    }
}
