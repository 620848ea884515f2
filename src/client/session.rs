//! 클라이언트 통화 세션 파사드
//!
//! 로컬 미디어를 소유하고 start/answer/reject/leave/end/mute/video 조작을
//! 제공하며, 서버 이벤트를 `CallEvent` 로 구독자에게 전달한다.

use crate::calls::{CallSession, CallType, ParticipantEntry};
use crate::client::events::{CallEvent, EventBus, SignalKind};
use crate::client::media::{LocalStream, MediaDevices, RemoteStream, TrackKind};
use crate::client::transport::{SignalingConnector, SignalingTransport, WebSocketConnector};
use crate::error::ClientError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::Identity;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

#[derive(Clone)]
pub struct CallClient {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Option<Arc<dyn SignalingConnector>>,
    media: Arc<dyn MediaDevices>,
    transport: Mutex<Option<Arc<dyn SignalingTransport>>>,
    state: Mutex<ClientState>,
    events: EventBus,
}

#[derive(Default)]
struct ClientState {
    identity: Option<Identity>,
    socket_id: Option<String>,
    local_stream: Option<LocalStream>,
    current_call: Option<CurrentCall>,
    incoming: Option<CallSession>,
}

#[derive(Debug, Clone)]
struct CurrentCall {
    call_id: String,
    call_type: CallType,
    participants: Vec<ParticipantEntry>,
}

impl ClientState {
    fn is_current(&self, call_id: &str) -> bool {
        self.current_call
            .as_ref()
            .map(|call| call.call_id == call_id)
            .unwrap_or(false)
    }

    fn update_participants(&mut self, call_id: &str, participants: &[ParticipantEntry]) {
        if let Some(call) = self.current_call.as_mut() {
            if call.call_id == call_id {
                call.participants = participants.to_vec();
            }
        }
    }

    /// 로컬 미디어 해제 및 통화 정보 초기화
    fn reset_call(&mut self) {
        if let Some(mut stream) = self.local_stream.take() {
            stream.stop();
        }
        self.current_call = None;
    }
}

impl CallClient {
    pub fn new(server_url: impl Into<String>, media: Arc<dyn MediaDevices>) -> Self {
        Self::with_connector(Arc::new(WebSocketConnector::new(server_url)), media)
    }

    /// 끊길 때마다 connector 로 다시 연결한다
    pub fn with_connector(
        connector: Arc<dyn SignalingConnector>,
        media: Arc<dyn MediaDevices>,
    ) -> Self {
        Self::build(Some(connector), media, None)
    }

    /// 이미 연결된 전송 계층 사용. 끊기면 재접속할 수 없다.
    pub fn with_transport(
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaDevices>,
    ) -> Self {
        Self::build(None, media, Some(transport))
    }

    fn build(
        connector: Option<Arc<dyn SignalingConnector>>,
        media: Arc<dyn MediaDevices>,
        transport: Option<Arc<dyn SignalingTransport>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                media,
                transport: Mutex::new(transport),
                state: Mutex::new(ClientState::default()),
                events: EventBus::default(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    /// 서버 연결 + 가족 방 등록.
    ///
    /// 연결이 살아 있고 이미 등록되었으면 바로 반환한다. 연결이 끊겼으면
    /// 새로 연결해 join-family 를 다시 보내고, 진행 중인 통화가 있으면
    /// sync-call-state 로 서버 상태를 다시 맞춘다. 전체 과정은 전송 슬롯
    /// 잠금 아래에서 진행되어 동시 호출이 join-family 를 중복 전송하지 않는다.
    pub async fn initialize(
        &self,
        user_id: &str,
        family_id: &str,
        user_name: &str,
    ) -> Result<(), ClientError> {
        let mut slot = self.inner.transport.lock().await;

        let live = slot.clone().filter(|transport| transport.is_connected());
        let transport = match live {
            Some(transport) => {
                if self.inner.state.lock().await.identity.is_some() {
                    return Ok(());
                }
                transport
            }
            None => {
                let connector = self
                    .inner
                    .connector
                    .clone()
                    .ok_or(ClientError::NotConnected)?;
                let (transport, inbound) = connector.connect().await?;
                *slot = Some(transport.clone());
                self.spawn_inbound(inbound);
                transport
            }
        };

        if !transport.is_connected() {
            return Err(ClientError::NotConnected);
        }

        transport.send(ClientMessage::JoinFamily {
            user_id: user_id.to_string(),
            family_id: family_id.to_string(),
            user_name: user_name.to_string(),
        })?;

        let resume = {
            let mut state = self.inner.state.lock().await;
            let reconnected = state.identity.is_some();
            state.identity = Some(Identity {
                user_id: user_id.to_string(),
                family_id: family_id.to_string(),
                user_name: user_name.to_string(),
            });
            if reconnected {
                state.current_call.as_ref().map(|call| call.call_id.clone())
            } else {
                None
            }
        };

        if let Some(call_id) = resume {
            tracing::info!(call_id = %call_id, "Resyncing call after reconnect");
            transport.send(ClientMessage::SyncCallState {
                call_id,
                user_id: user_id.to_string(),
            })?;
        }

        self.inner
            .events
            .emit(CallEvent::ConnectionStatusChanged { connected: true });

        tracing::info!(user_id = %user_id, family_id = %family_id, "Call client initialized");
        Ok(())
    }

    /// 저장된 신원으로 다시 연결 (연결이 살아 있으면 아무 일도 하지 않음)
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let identity = self.identity().await?;
        self.initialize(&identity.user_id, &identity.family_id, &identity.user_name)
            .await
    }

    pub async fn is_connected(&self) -> bool {
        match self.inner.transport.lock().await.as_ref() {
            Some(transport) => transport.is_connected(),
            None => false,
        }
    }

    /// 통화 시작. 로컬 미디어를 먼저 확보한 뒤 start-call 을 보낸다.
    pub async fn start_call(
        &self,
        target_user_ids: Vec<String>,
        call_type: CallType,
        caller_name: &str,
        family_id: &str,
    ) -> Result<String, ClientError> {
        let transport = self.connected_transport().await?;
        let identity = self.identity().await?;

        let stream = self.inner.media.get_user_media(call_type.into()).await?;

        // 응답이 send 반환 전에 처리될 수 있으므로 로컬 상태를 먼저 설치
        let call_id = Uuid::new_v4().to_string();
        {
            let mut state = self.inner.state.lock().await;
            state.reset_call();
            state.local_stream = Some(stream);
            state.current_call = Some(CurrentCall {
                call_id: call_id.clone(),
                call_type,
                participants: Vec::new(),
            });
        }

        let sent = transport.send(ClientMessage::StartCall {
            call_id: call_id.clone(),
            caller_id: identity.user_id,
            caller_name: caller_name.to_string(),
            call_type,
            family_id: family_id.to_string(),
            target_user_ids,
        });
        if let Err(e) = sent {
            let mut state = self.inner.state.lock().await;
            if state.is_current(&call_id) {
                state.reset_call();
            }
            return Err(e);
        }

        tracing::info!(call_id = %call_id, call_type = call_type.as_str(), "Outgoing call started");
        Ok(call_id)
    }

    /// 수신 통화 응답. 통화 종류에 맞는 로컬 미디어를 확보한다.
    pub async fn answer_call(&self, call_id: &str) -> Result<(), ClientError> {
        let transport = self.connected_transport().await?;
        let identity = self.identity().await?;

        let call_type = match self.inner.state.lock().await.incoming.as_ref() {
            Some(call) if call.call_id == call_id => call.call_type,
            _ => return Err(ClientError::UnknownCall(call_id.to_string())),
        };

        let mut stream = self.inner.media.get_user_media(call_type.into()).await?;

        let pending = {
            let mut state = self.inner.state.lock().await;
            // 미디어 확보 중에 통화가 끝났을 수 있다
            let pending = match state.incoming.take() {
                Some(call) if call.call_id == call_id => call,
                other => {
                    state.incoming = other;
                    stream.stop();
                    return Err(ClientError::UnknownCall(call_id.to_string()));
                }
            };
            state.reset_call();
            state.local_stream = Some(stream);
            state.current_call = Some(CurrentCall {
                call_id: call_id.to_string(),
                call_type,
                participants: Vec::new(),
            });
            pending
        };

        let sent = transport.send(ClientMessage::AcceptCall {
            call_id: call_id.to_string(),
            user_id: identity.user_id,
            user_name: identity.user_name,
        });
        if let Err(e) = sent {
            let mut state = self.inner.state.lock().await;
            if state.is_current(call_id) {
                state.reset_call();
                state.incoming = Some(pending);
            }
            return Err(e);
        }

        Ok(())
    }

    pub async fn reject_call(&self, call_id: &str) -> Result<(), ClientError> {
        let transport = self.connected_transport().await?;
        let user_id = self.identity().await.ok().map(|identity| identity.user_id);

        transport.send(ClientMessage::RejectCall {
            call_id: call_id.to_string(),
            user_id,
        })?;

        let mut state = self.inner.state.lock().await;
        if state.incoming.as_ref().map(|c| c.call_id.as_str()) == Some(call_id) {
            state.incoming = None;
        }
        Ok(())
    }

    /// 통화에서 나가기. 다른 참가자의 통화는 계속된다.
    pub async fn leave_call(&self) -> Result<(), ClientError> {
        let Some(call_id) = self.current_call_id().await else {
            return Ok(());
        };
        let identity = self.identity().await?;

        let sent = match self.connected_transport().await {
            Ok(transport) => transport.send(ClientMessage::LeaveCall {
                user_id: identity.user_id,
                user_name: identity.user_name,
                call_id,
            }),
            Err(e) => Err(e),
        };

        self.inner.state.lock().await.reset_call();
        sent
    }

    /// 모두의 통화 종료. 진행 중인 통화가 없으면 아무 일도 하지 않는다.
    pub async fn end_call(&self) -> Result<(), ClientError> {
        let Some(call_id) = self.current_call_id().await else {
            return Ok(());
        };
        let identity = self.identity().await?;

        let sent = match self.connected_transport().await {
            Ok(transport) => transport.send(ClientMessage::EndCall {
                call_id,
                user_id: identity.user_id,
            }),
            Err(e) => Err(e),
        };

        self.inner.state.lock().await.reset_call();
        sent
    }

    /// 음소거 토글. 반환값은 새 음소거 상태.
    pub async fn toggle_mute(&self) -> Result<bool, ClientError> {
        self.toggle_track(TrackKind::Audio).await
    }

    /// 비디오 토글. 반환값은 비디오가 꺼졌는지 여부.
    pub async fn toggle_video(&self) -> Result<bool, ClientError> {
        self.toggle_track(TrackKind::Video).await
    }

    async fn toggle_track(&self, kind: TrackKind) -> Result<bool, ClientError> {
        let mut state = self.inner.state.lock().await;
        let stream = state.local_stream.as_mut().ok_or(ClientError::NoLocalMedia)?;

        if !stream.has(kind) {
            return Ok(true);
        }
        let now_enabled = !stream.is_enabled(kind);
        stream.set_enabled(kind, now_enabled);
        Ok(!now_enabled)
    }

    /// 재접속 후 서버와 통화 상태 동기화
    pub async fn sync_call_state(&self) -> Result<(), ClientError> {
        let call_id = self
            .current_call_id()
            .await
            .ok_or(ClientError::NoActiveCall)?;
        let identity = self.identity().await?;

        self.connected_transport()
            .await?
            .send(ClientMessage::SyncCallState {
                call_id,
                user_id: identity.user_id,
            })
    }

    pub async fn send_offer(&self, target_id: &str, offer: Value) -> Result<(), ClientError> {
        self.connected_transport()
            .await?
            .send(ClientMessage::WebrtcOffer {
                target_id: target_id.to_string(),
                offer,
            })
    }

    pub async fn send_answer(&self, target_id: &str, answer: Value) -> Result<(), ClientError> {
        self.connected_transport()
            .await?
            .send(ClientMessage::WebrtcAnswer {
                target_id: target_id.to_string(),
                answer,
            })
    }

    pub async fn send_ice_candidate(
        &self,
        target_id: &str,
        candidate: Value,
    ) -> Result<(), ClientError> {
        self.connected_transport()
            .await?
            .send(ClientMessage::WebrtcIceCandidate {
                target_id: target_id.to_string(),
                candidate,
            })
    }

    pub async fn request_ice_servers(&self) -> Result<(), ClientError> {
        self.connected_transport()
            .await?
            .send(ClientMessage::RequestTurnConfig)
    }

    /// WebRTC 계층이 원격 트랙을 받았을 때 호출
    pub fn attach_remote_stream(&self, stream: RemoteStream) {
        self.inner.events.emit(CallEvent::StreamReceived(stream));
    }

    pub async fn current_call_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .current_call
            .as_ref()
            .map(|call| call.call_id.clone())
    }

    pub async fn current_call_type(&self) -> Option<CallType> {
        self.inner
            .state
            .lock()
            .await
            .current_call
            .as_ref()
            .map(|call| call.call_type)
    }

    pub async fn participants(&self) -> Vec<ParticipantEntry> {
        self.inner
            .state
            .lock()
            .await
            .current_call
            .as_ref()
            .map(|call| call.participants.clone())
            .unwrap_or_default()
    }

    pub async fn incoming_call(&self) -> Option<CallSession> {
        self.inner.state.lock().await.incoming.clone()
    }

    pub async fn local_stream(&self) -> Option<LocalStream> {
        self.inner.state.lock().await.local_stream.clone()
    }

    /// 서버가 부여한 연결 id (relay 대상 지정에 사용)
    pub async fn socket_id(&self) -> Option<String> {
        self.inner.state.lock().await.socket_id.clone()
    }

    /// 서버 메시지를 로컬 상태에 반영하고 이벤트로 발행
    pub async fn handle_server_message(&self, msg: ServerMessage) {
        let events = &self.inner.events;
        let mut state = self.inner.state.lock().await;

        match msg {
            ServerMessage::Connected { socket_id } => {
                state.socket_id = Some(socket_id);
            }
            ServerMessage::HeartbeatAck => {}
            ServerMessage::JoinedFamily {
                family_id,
                member_count,
                ..
            } => {
                tracing::debug!(family_id = %family_id, member_count = member_count, "Joined family room");
            }
            ServerMessage::Error { code, message } => {
                tracing::warn!(code = %code, message = %message, "Server rejected message");
                events.emit(CallEvent::ServerError { code, message });
            }
            ServerMessage::IncomingCall { call, participants } => {
                let my_id = state.identity.as_ref().map(|i| i.user_id.clone());
                let invited = call.target_user_ids.is_empty()
                    || my_id
                        .as_ref()
                        .map(|id| call.target_user_ids.contains(id))
                        .unwrap_or(false);
                if my_id.as_deref() == Some(call.caller_id.as_str())
                    || state.is_current(&call.call_id)
                    || !invited
                {
                    return;
                }
                state.incoming = Some(call.clone());
                events.emit(CallEvent::IncomingCall { call, participants });
            }
            ServerMessage::CallAccepted {
                call_id,
                participants,
            } => {
                state.update_participants(&call_id, &participants);
                events.emit(CallEvent::CallConnected {
                    call_id,
                    participants,
                });
            }
            ServerMessage::UserJoinedCall {
                call_id,
                user_id,
                user_name,
                participants,
            } => {
                state.update_participants(&call_id, &participants);
                events.emit(CallEvent::ParticipantJoined {
                    call_id,
                    user_id,
                    user_name,
                    participants,
                });
            }
            ServerMessage::UserLeftCall {
                call_id,
                user_id,
                user_name,
                participants,
            } => {
                state.update_participants(&call_id, &participants);
                events.emit(CallEvent::ParticipantLeft {
                    call_id,
                    user_id,
                    user_name,
                    participants,
                });
            }
            ServerMessage::CallParticipantsUpdated {
                call_id,
                participants,
            } => {
                state.update_participants(&call_id, &participants);
                events.emit(CallEvent::ParticipantsUpdated {
                    call_id,
                    participants,
                });
            }
            ServerMessage::CallStateSynced { call, participants } => {
                if state.is_current(&call.call_id) {
                    state.update_participants(&call.call_id, &participants);
                } else {
                    state.current_call = Some(CurrentCall {
                        call_id: call.call_id.clone(),
                        call_type: call.call_type,
                        participants: participants.clone(),
                    });
                }
                events.emit(CallEvent::CallConnected {
                    call_id: call.call_id,
                    participants,
                });
            }
            ServerMessage::CallEnded { call_id, ended_by } => {
                if state.is_current(&call_id) {
                    state.reset_call();
                }
                if state.incoming.as_ref().map(|c| c.call_id.as_str()) == Some(call_id.as_str()) {
                    state.incoming = None;
                }
                events.emit(CallEvent::CallEnded { call_id, ended_by });
            }
            ServerMessage::CallBlocked {
                active_call_id,
                active_call_type,
                message,
                ..
            } => {
                state.reset_call();
                events.emit(CallEvent::CallBlocked {
                    active_call_id,
                    active_call_type,
                    message,
                });
            }
            ServerMessage::CallError {
                call_id,
                reason,
                message,
            } => {
                if state.is_current(&call_id) {
                    state.reset_call();
                }
                events.emit(CallEvent::CallError {
                    call_id,
                    reason,
                    message,
                });
            }
            ServerMessage::WebrtcOffer { from, offer } => events.emit(CallEvent::Signal {
                from,
                kind: SignalKind::Offer,
                payload: offer,
            }),
            ServerMessage::WebrtcAnswer { from, answer } => events.emit(CallEvent::Signal {
                from,
                kind: SignalKind::Answer,
                payload: answer,
            }),
            ServerMessage::WebrtcIceCandidate { from, candidate } => {
                events.emit(CallEvent::Signal {
                    from,
                    kind: SignalKind::IceCandidate,
                    payload: candidate,
                })
            }
            ServerMessage::TurnConfig {
                success,
                data,
                error,
            } => match data {
                Some(data) if success => events.emit(CallEvent::IceServers(data.ice_servers)),
                _ => tracing::warn!(error = ?error, "ICE server config unavailable"),
            },
        }
    }

    fn spawn_inbound(&self, mut inbound: mpsc::UnboundedReceiver<ServerMessage>) {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                client.handle_server_message(msg).await;
            }
            client.handle_transport_closed().await;
        });
    }

    async fn handle_transport_closed(&self) {
        // 이미 새 연결로 교체되었으면 알리지 않는다
        if self.is_connected().await {
            return;
        }
        tracing::warn!("Signaling connection lost");
        self.inner
            .events
            .emit(CallEvent::ConnectionStatusChanged { connected: false });
    }

    async fn connected_transport(&self) -> Result<Arc<dyn SignalingTransport>, ClientError> {
        let transport = self
            .inner
            .transport
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        if !transport.is_connected() {
            return Err(ClientError::NotConnected);
        }
        Ok(transport)
    }

    async fn identity(&self) -> Result<Identity, ClientError> {
        self.inner
            .state
            .lock()
            .await
            .identity
            .clone()
            .ok_or(ClientError::NotInitialized)
    }
}
