//! 클라이언트-서버 메시지 프로토콜 정의
//!
//! 모든 프레임은 `{"type": "<event>", "payload": {...}}` 형태의 JSON 텍스트다.

use crate::calls::{CallSession, CallType, ParticipantEntry};
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 마지막 참가자가 나가서 서버가 통화를 종료함
pub const ENDED_BY_NO_PARTICIPANTS: &str = "system-no-participants";
/// 클라이언트가 알고 있는 통화가 서버에 없음
pub const ENDED_BY_NOT_FOUND: &str = "system-not-found";

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    // Connection
    Heartbeat,

    // Family Room
    #[serde(rename_all = "camelCase")]
    JoinFamily {
        user_id: String,
        family_id: String,
        user_name: String,
    },

    // Call Control
    #[serde(rename_all = "camelCase")]
    StartCall {
        call_id: String,
        caller_id: String,
        caller_name: String,
        call_type: CallType,
        family_id: String,
        #[serde(default)]
        target_user_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    AcceptCall {
        call_id: String,
        user_id: String,
        user_name: String,
    },
    #[serde(rename_all = "camelCase")]
    RejectCall {
        call_id: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LeaveCall {
        user_id: String,
        #[serde(default)]
        user_name: String,
        call_id: String,
    },
    #[serde(rename_all = "camelCase")]
    EndCall { call_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    SyncCallState { call_id: String, user_id: String },

    // WebRTC Relay
    #[serde(rename_all = "camelCase")]
    WebrtcOffer { target_id: String, offer: Value },
    #[serde(rename_all = "camelCase")]
    WebrtcAnswer { target_id: String, answer: Value },
    #[serde(rename_all = "camelCase")]
    WebrtcIceCandidate { target_id: String, candidate: Value },

    // TURN
    RequestTurnConfig,
}

impl ClientMessage {
    /// 텍스트 프레임 파싱 + 필수 필드 검증
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let message: ClientMessage = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::Heartbeat | ClientMessage::RequestTurnConfig => Ok(()),
            ClientMessage::JoinFamily {
                user_id, family_id, ..
            } => {
                require("userId", user_id)?;
                require("familyId", family_id)
            }
            ClientMessage::StartCall {
                call_id,
                caller_id,
                family_id,
                ..
            } => {
                require("callId", call_id)?;
                require("callerId", caller_id)?;
                require("familyId", family_id)
            }
            ClientMessage::AcceptCall {
                call_id, user_id, ..
            }
            | ClientMessage::LeaveCall {
                call_id, user_id, ..
            }
            | ClientMessage::EndCall { call_id, user_id }
            | ClientMessage::SyncCallState { call_id, user_id } => {
                require("callId", call_id)?;
                require("userId", user_id)
            }
            ClientMessage::RejectCall { call_id, .. } => require("callId", call_id),
            ClientMessage::WebrtcOffer { target_id, .. }
            | ClientMessage::WebrtcAnswer { target_id, .. }
            | ClientMessage::WebrtcIceCandidate { target_id, .. } => {
                require("targetId", target_id)
            }
        }
    }

    /// 로그용 이벤트 이름
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Heartbeat => "heartbeat",
            ClientMessage::JoinFamily { .. } => "join-family",
            ClientMessage::StartCall { .. } => "start-call",
            ClientMessage::AcceptCall { .. } => "accept-call",
            ClientMessage::RejectCall { .. } => "reject-call",
            ClientMessage::LeaveCall { .. } => "leave-call",
            ClientMessage::EndCall { .. } => "end-call",
            ClientMessage::SyncCallState { .. } => "sync-call-state",
            ClientMessage::WebrtcOffer { .. } => "webrtc-offer",
            ClientMessage::WebrtcAnswer { .. } => "webrtc-answer",
            ClientMessage::WebrtcIceCandidate { .. } => "webrtc-ice-candidate",
            ClientMessage::RequestTurnConfig => "request-turn-config",
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::MissingField(field));
    }
    Ok(())
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    // Connection
    #[serde(rename_all = "camelCase")]
    Connected { socket_id: String },
    HeartbeatAck,
    Error { code: String, message: String },

    // Family Room
    #[serde(rename_all = "camelCase")]
    JoinedFamily {
        family_id: String,
        socket_id: String,
        member_count: usize,
    },

    // Call Events
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        #[serde(flatten)]
        call: CallSession,
        participants: Vec<ParticipantEntry>,
    },
    #[serde(rename_all = "camelCase")]
    CallBlocked {
        reason: String,
        active_call_id: String,
        active_call_type: CallType,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    CallAccepted {
        call_id: String,
        participants: Vec<ParticipantEntry>,
    },
    #[serde(rename_all = "camelCase")]
    CallError {
        call_id: String,
        reason: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    UserJoinedCall {
        call_id: String,
        user_id: String,
        user_name: String,
        participants: Vec<ParticipantEntry>,
    },
    #[serde(rename_all = "camelCase")]
    UserLeftCall {
        call_id: String,
        user_id: String,
        user_name: String,
        participants: Vec<ParticipantEntry>,
    },
    #[serde(rename_all = "camelCase")]
    CallEnded { call_id: String, ended_by: String },
    #[serde(rename_all = "camelCase")]
    CallParticipantsUpdated {
        call_id: String,
        participants: Vec<ParticipantEntry>,
    },
    #[serde(rename_all = "camelCase")]
    CallStateSynced {
        #[serde(flatten)]
        call: CallSession,
        participants: Vec<ParticipantEntry>,
    },

    // WebRTC Relay
    WebrtcOffer { from: String, offer: Value },
    WebrtcAnswer { from: String, answer: Value },
    WebrtcIceCandidate { from: String, candidate: Value },

    // TURN
    TurnConfig {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<TurnConfigData>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// TURN 설정 데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnConfigData {
    pub ice_servers: Vec<IceServer>,
    pub ttl: u64,
    pub timestamp: i64,
}

/// ICE 서버 설정 (RTCIceServer 형식)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}
