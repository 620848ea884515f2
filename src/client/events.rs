//! 클라이언트 이벤트 발행/구독
//!
//! 여러 UI 컴포넌트가 같은 세션을 구독할 수 있도록 broadcast 채널을 쓴다.

use crate::calls::{CallSession, CallType, ParticipantEntry};
use crate::client::media::RemoteStream;
use crate::protocol::IceServer;
use serde_json::Value;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    IncomingCall {
        call: CallSession,
        participants: Vec<ParticipantEntry>,
    },
    CallConnected {
        call_id: String,
        participants: Vec<ParticipantEntry>,
    },
    CallEnded {
        call_id: String,
        ended_by: String,
    },
    ParticipantJoined {
        call_id: String,
        user_id: String,
        user_name: String,
        participants: Vec<ParticipantEntry>,
    },
    ParticipantLeft {
        call_id: String,
        user_id: String,
        user_name: String,
        participants: Vec<ParticipantEntry>,
    },
    ParticipantsUpdated {
        call_id: String,
        participants: Vec<ParticipantEntry>,
    },
    StreamReceived(RemoteStream),
    ConnectionStatusChanged {
        connected: bool,
    },
    CallBlocked {
        active_call_id: String,
        active_call_type: CallType,
        message: String,
    },
    CallError {
        call_id: String,
        reason: String,
        message: String,
    },
    /// 중계된 WebRTC 메시지
    Signal {
        from: String,
        kind: SignalKind,
        payload: Value,
    },
    IceServers(Vec<IceServer>),
    ServerError {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CallEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

    /// 구독자가 없으면 이벤트는 버려진다
    pub fn emit(&self, event: CallEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
