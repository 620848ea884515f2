//! 통화 상태 저장소
//!
//! 프로세스 전체에서 활성 통화는 최대 하나만 존재한다. 저장소는 `AppState`가
//! 소유하며, 모든 변경은 하나의 락 안에서 순차적으로 처리된다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 통화 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Voice => "voice",
            CallType::Video => "video",
        }
    }

    pub fn has_video(&self) -> bool {
        matches!(self, CallType::Video)
    }
}

/// 통화 진행 상태 (첫 수락 전까지 ringing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Connected,
}

/// 참가자 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Caller,
    Participant,
}

/// 시그널링 관점의 통화 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Ringing,
    Active,
}

/// 활성 통화 정보
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub call_type: CallType,
    pub family_id: String,
    pub start_time: DateTime<Utc>,
    pub status: CallStatus,
    /// 발신자가 지정한 초대 대상 (비어 있으면 가족 전체)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_user_ids: Vec<String>,
}

/// 참가자 정보
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEntry {
    pub id: String,
    pub name: String,
    pub is_connected: bool,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    /// 이 참가자를 마지막으로 점유한 연결 (서버 내부용)
    #[serde(skip)]
    pub connection_id: Option<String>,
}

/// 통화 시작 요청자
#[derive(Debug, Clone)]
pub struct CallInitiator {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub connection_id: String,
    pub target_user_ids: Vec<String>,
}

/// 정책 위반으로 거절된 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    CallInProgress {
        active_call_id: String,
        active_call_type: CallType,
    },
    InvalidOrExpiredCall,
}

impl Rejected {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejected::CallInProgress { .. } => "call-in-progress",
            Rejected::InvalidOrExpiredCall => "invalid-or-expired-call",
        }
    }
}

/// 참가자 제거 결과
#[derive(Debug, Clone)]
pub struct Removal {
    pub call_id: String,
    pub family_id: String,
    pub removed: Option<ParticipantEntry>,
    pub remaining: Vec<ParticipantEntry>,
    pub auto_ended: bool,
}

/// 읽기 전용 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub session: Option<CallSession>,
    pub participants: Vec<ParticipantEntry>,
}

#[derive(Debug, Default)]
pub struct CallStore {
    active: Option<CallSession>,
    participants: HashMap<String, ParticipantEntry>,
}

impl CallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_call(&self) -> Option<&CallSession> {
        self.active.as_ref()
    }

    pub fn phase(&self) -> CallPhase {
        match &self.active {
            None => CallPhase::Idle,
            Some(call) if call.status == CallStatus::Connected || self.participants.len() > 1 => {
                CallPhase::Active
            }
            Some(_) => CallPhase::Ringing,
        }
    }

    /// 주어진 callId가 현재 활성 통화와 일치하는지
    pub fn matches(&self, call_id: &str) -> bool {
        self.active
            .as_ref()
            .map(|call| call.call_id == call_id)
            .unwrap_or(false)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.contains_key(user_id)
    }

    /// 새 통화 시작. 이미 통화가 있으면 거절하고 기존 상태는 건드리지 않는다.
    pub fn try_start_call(
        &mut self,
        initiator: CallInitiator,
        call_type: CallType,
        family_id: &str,
    ) -> Result<CallSession, Rejected> {
        if let Some(active) = &self.active {
            return Err(Rejected::CallInProgress {
                active_call_id: active.call_id.clone(),
                active_call_type: active.call_type,
            });
        }

        let now = Utc::now();
        let session = CallSession {
            call_id: initiator.call_id,
            caller_id: initiator.caller_id.clone(),
            caller_name: initiator.caller_name.clone(),
            call_type,
            family_id: family_id.to_string(),
            start_time: now,
            status: CallStatus::Ringing,
            target_user_ids: initiator.target_user_ids,
        };

        self.participants.clear();
        self.participants.insert(
            initiator.caller_id.clone(),
            ParticipantEntry {
                id: initiator.caller_id,
                name: initiator.caller_name,
                is_connected: true,
                role: ParticipantRole::Caller,
                joined_at: now,
                connection_id: Some(initiator.connection_id),
            },
        );
        self.active = Some(session.clone());

        Ok(session)
    }

    /// 통화 참여. callId가 다르거나 통화가 없으면 참가자 목록은 변하지 않는다.
    pub fn try_join_call(
        &mut self,
        call_id: &str,
        user_id: &str,
        user_name: &str,
        connection_id: &str,
    ) -> Result<Vec<ParticipantEntry>, Rejected> {
        let session = match self.active.as_mut() {
            Some(session) if session.call_id == call_id => session,
            _ => return Err(Rejected::InvalidOrExpiredCall),
        };
        session.status = CallStatus::Connected;

        // 발신자가 다시 수락해도 역할은 유지
        let role = match self.participants.get(user_id) {
            Some(existing) if existing.role == ParticipantRole::Caller => ParticipantRole::Caller,
            _ => ParticipantRole::Participant,
        };

        self.participants.insert(
            user_id.to_string(),
            ParticipantEntry {
                id: user_id.to_string(),
                name: user_name.to_string(),
                is_connected: true,
                role,
                joined_at: Utc::now(),
                connection_id: Some(connection_id.to_string()),
            },
        );

        Ok(self.participants())
    }

    /// 참가자 제거. 목록이 비면 통화도 함께 종료된다.
    pub fn remove_participant(&mut self, user_id: &str) -> Option<Removal> {
        let (call_id, family_id) = match &self.active {
            Some(session) => (session.call_id.clone(), session.family_id.clone()),
            None => return None,
        };

        let removed = self.participants.remove(user_id);
        let remaining = self.participants();
        let auto_ended = remaining.is_empty();
        if auto_ended {
            self.active = None;
        }

        Some(Removal {
            call_id,
            family_id,
            removed,
            remaining,
            auto_ended,
        })
    }

    /// 통화 종료 (이미 비어 있으면 None)
    pub fn end_call(&mut self) -> Option<CallSession> {
        self.participants.clear();
        self.active.take()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            session: self.active.clone(),
            participants: self.participants(),
        }
    }

    /// 발신자 먼저, 이후 참여 순
    pub fn participants(&self) -> Vec<ParticipantEntry> {
        let mut list: Vec<ParticipantEntry> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| {
            (a.role != ParticipantRole::Caller, a.joined_at, &a.id).cmp(&(
                b.role != ParticipantRole::Caller,
                b.joined_at,
                &b.id,
            ))
        });
        list
    }

    pub fn participant_for_connection(&self, connection_id: &str) -> Option<&ParticipantEntry> {
        self.participants
            .values()
            .find(|p| p.connection_id.as_deref() == Some(connection_id))
    }

    /// 재접속한 클라이언트가 기존 참가자 항목을 다시 점유
    pub fn rebind_connection(&mut self, user_id: &str, connection_id: &str) -> bool {
        match self.participants.get_mut(user_id) {
            Some(entry) => {
                entry.connection_id = Some(connection_id.to_string());
                entry.is_connected = true;
                true
            }
            None => false,
        }
    }
}
