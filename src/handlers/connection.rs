//! 연결 핸들러

use crate::handlers::call::remove_connection_participant;
use crate::protocol::ServerMessage;
use crate::state::{AppState, Connection, Identity};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// 새 연결 처리
pub fn handle_connection(state: &AppState, sender: UnboundedSender<ServerMessage>) -> String {
    let connection_id = Uuid::new_v4().to_string();

    state.connections.insert(
        connection_id.clone(),
        Connection::new(connection_id.clone(), sender.clone()),
    );

    let _ = sender.send(ServerMessage::Connected {
        socket_id: connection_id.clone(),
    });

    tracing::info!(peer_id = %connection_id, "New connection established");
    connection_id
}

/// 연결 해제 처리. 통화 참가 중이었다면 leave-call 과 동일하게 처리한다.
pub async fn handle_disconnect(state: &AppState, connection_id: &str) {
    leave_family_room(state, connection_id);
    remove_connection_participant(state, connection_id).await;
    state.connections.remove(connection_id);

    tracing::info!(peer_id = %connection_id, "Connection closed");
}

/// Heartbeat 처리
pub fn handle_heartbeat(sender: &UnboundedSender<ServerMessage>) {
    let _ = sender.send(ServerMessage::HeartbeatAck);
}

/// 가족 방 참여. familyId 는 검증 없이 신뢰한다.
pub fn handle_join_family(state: &AppState, connection_id: &str, identity: Identity) {
    let family_id = identity.family_id.clone();

    let previous = state.identity_of(connection_id);
    if let Some(previous) = &previous {
        if previous.family_id != family_id {
            leave_family_room(state, connection_id);
        }
    }

    match state.connections.get_mut(connection_id) {
        Some(mut connection) => connection.identity = Some(identity.clone()),
        None => {
            tracing::warn!(peer_id = %connection_id, "join-family from unknown connection");
            return;
        }
    }

    let member_count = {
        let mut members = state.families.entry(family_id.clone()).or_default();
        members.insert(connection_id.to_string());
        members.len()
    };

    state.send_to(
        connection_id,
        ServerMessage::JoinedFamily {
            family_id: family_id.clone(),
            socket_id: connection_id.to_string(),
            member_count,
        },
    );

    tracing::info!(
        peer_id = %connection_id,
        user_id = %identity.user_id,
        family_id = %family_id,
        member_count = member_count,
        "User joined family room"
    );
}

/// 가족 방 구독 해제. 비어 있는 방은 삭제한다.
fn leave_family_room(state: &AppState, connection_id: &str) {
    let Some(identity) = state.identity_of(connection_id) else {
        return;
    };

    let now_empty = match state.families.get_mut(&identity.family_id) {
        Some(mut members) => {
            members.remove(connection_id);
            members.is_empty()
        }
        None => false,
    };

    if now_empty {
        state
            .families
            .remove_if(&identity.family_id, |_, members| members.is_empty());
        tracing::debug!(family_id = %identity.family_id, "Family room deleted");
    }
}
