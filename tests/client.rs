use async_trait::async_trait;
use chrono::Utc;
use family_call_signaling::calls::{
    CallSession, CallStatus, CallType, ParticipantEntry, ParticipantRole,
};
use family_call_signaling::client::{
    CallClient, CallEvent, LocalStream, MediaConstraints, MediaDevices, MediaTrack,
    RemoteStream, SignalKind, SignalingConnector, SignalingLink, SignalingTransport, TrackKind,
};
use family_call_signaling::error::{ClientError, MediaAccessError};
use family_call_signaling::protocol::{ClientMessage, ServerMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<ClientMessage>>,
    down: AtomicBool,
    refuse_sends: AtomicBool,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl SignalingTransport for RecordingTransport {
    fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if self.refuse_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("write failed".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }
}

/// 새 연결마다 RecordingTransport 를 하나씩 만든다
#[derive(Default)]
struct FakeConnector {
    links: Mutex<Vec<(Arc<RecordingTransport>, mpsc::UnboundedSender<ServerMessage>)>>,
}

impl FakeConnector {
    fn transport(&self, index: usize) -> Arc<RecordingTransport> {
        self.links.lock().unwrap()[index].0.clone()
    }

    fn connections(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn connect(&self) -> Result<SignalingLink, ClientError> {
        let transport = Arc::new(RecordingTransport::default());
        let (tx, rx) = mpsc::unbounded_channel();
        self.links.lock().unwrap().push((transport.clone(), tx));
        Ok((transport, rx))
    }
}

/// send 가 반환되기 전에 서버 응답을 클라이언트에 처리시키는 전송 계층
struct EagerReplyTransport {
    client: Mutex<Option<CallClient>>,
    reply: fn(&ClientMessage) -> Option<ServerMessage>,
}

impl EagerReplyTransport {
    fn new(reply: fn(&ClientMessage) -> Option<ServerMessage>) -> Self {
        Self {
            client: Mutex::new(None),
            reply,
        }
    }
}

impl SignalingTransport for EagerReplyTransport {
    fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        let client = self.client.lock().unwrap().clone();
        if let (Some(client), Some(reply)) = (client, (self.reply)(&message)) {
            let handle = tokio::runtime::Handle::current();
            tokio::task::block_in_place(|| {
                handle.block_on(async move {
                    tokio::spawn(async move { client.handle_server_message(reply).await })
                        .await
                        .unwrap()
                })
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

async fn eager_client(
    reply: fn(&ClientMessage) -> Option<ServerMessage>,
) -> (CallClient, Arc<EagerReplyTransport>) {
    let transport = Arc::new(EagerReplyTransport::new(reply));
    let client = CallClient::with_transport(transport.clone(), Arc::new(FakeMedia::allowing()));
    client.initialize("u2", "F1", "Bob").await.unwrap();
    *transport.client.lock().unwrap() = Some(client.clone());
    (client, transport)
}

fn roster_of(user_id: &str, role: ParticipantRole) -> Vec<ParticipantEntry> {
    vec![ParticipantEntry {
        id: user_id.to_string(),
        name: user_id.to_string(),
        is_connected: true,
        role,
        joined_at: Utc::now(),
        connection_id: None,
    }]
}

struct FakeMedia {
    deny: bool,
    requests: Mutex<Vec<MediaConstraints>>,
}

impl FakeMedia {
    fn allowing() -> Self {
        Self {
            deny: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn denying() -> Self {
        Self {
            deny: true,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalStream, MediaAccessError> {
        self.requests.lock().unwrap().push(constraints);
        if self.deny {
            return Err(MediaAccessError::PermissionDenied);
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new("mic", TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(MediaTrack::new("cam", TrackKind::Video));
        }
        Ok(LocalStream::new("local", tracks))
    }
}

async fn client_with(media: FakeMedia) -> (CallClient, Arc<RecordingTransport>, Arc<FakeMedia>) {
    let transport = Arc::new(RecordingTransport::default());
    let media = Arc::new(media);
    let client = CallClient::with_transport(transport.clone(), media.clone());
    client.initialize("u2", "F1", "Bob").await.unwrap();
    (client, transport, media)
}

fn incoming(call_id: &str, call_type: CallType, targets: &[&str]) -> ServerMessage {
    let now = Utc::now();
    ServerMessage::IncomingCall {
        call: CallSession {
            call_id: call_id.to_string(),
            caller_id: "u1".to_string(),
            caller_name: "Alice".to_string(),
            call_type,
            family_id: "F1".to_string(),
            start_time: now,
            status: CallStatus::Ringing,
            target_user_ids: targets.iter().map(|t| t.to_string()).collect(),
        },
        participants: vec![ParticipantEntry {
            id: "u1".to_string(),
            name: "Alice".to_string(),
            is_connected: true,
            role: ParticipantRole::Caller,
            joined_at: now,
            connection_id: None,
        }],
    }
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let (client, transport, _) = client_with(FakeMedia::allowing()).await;
    client.initialize("u2", "F1", "Bob").await.unwrap();

    assert_eq!(
        transport.sent(),
        vec![ClientMessage::JoinFamily {
            user_id: "u2".to_string(),
            family_id: "F1".to_string(),
            user_name: "Bob".to_string(),
        }]
    );
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn start_call_fails_when_transport_is_down() {
    let (client, transport, media) = client_with(FakeMedia::allowing()).await;
    transport.down.store(true, Ordering::SeqCst);

    let result = client
        .start_call(vec![], CallType::Video, "Bob", "F1")
        .await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
    assert!(media.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn denied_media_sends_nothing() {
    let (client, transport, _) = client_with(FakeMedia::denying()).await;

    let result = client.start_call(vec![], CallType::Voice, "Bob", "F1").await;

    assert!(matches!(
        result,
        Err(ClientError::MediaAccess(MediaAccessError::PermissionDenied))
    ));
    assert_eq!(transport.sent().len(), 1);
    assert!(client.current_call_id().await.is_none());
}

#[tokio::test]
async fn start_call_acquires_media_then_signals() {
    let (client, transport, media) = client_with(FakeMedia::allowing()).await;

    let call_id = client
        .start_call(vec!["u3".to_string()], CallType::Video, "Bob", "F1")
        .await
        .unwrap();

    assert_eq!(
        media.requests.lock().unwrap().as_slice(),
        &[MediaConstraints {
            audio: true,
            video: true
        }]
    );
    match transport.sent().last() {
        Some(ClientMessage::StartCall {
            call_id: sent_id,
            caller_id,
            call_type,
            target_user_ids,
            ..
        }) => {
            assert_eq!(sent_id, &call_id);
            assert_eq!(caller_id, "u2");
            assert_eq!(*call_type, CallType::Video);
            assert_eq!(target_user_ids, &vec!["u3".to_string()]);
        }
        other => panic!("unexpected message: {:?}", other),
    }
    assert_eq!(client.current_call_id().await, Some(call_id));
    assert_eq!(client.current_call_type().await, Some(CallType::Video));
}

#[tokio::test]
async fn answer_uses_incoming_call_type() {
    let (client, transport, media) = client_with(FakeMedia::allowing()).await;
    let mut events = client.subscribe();

    client
        .handle_server_message(incoming("c1", CallType::Voice, &[]))
        .await;
    assert!(matches!(
        events.recv().await.unwrap(),
        CallEvent::IncomingCall { call, .. } if call.call_id == "c1"
    ));

    client.answer_call("c1").await.unwrap();

    assert_eq!(
        media.requests.lock().unwrap().as_slice(),
        &[MediaConstraints {
            audio: true,
            video: false
        }]
    );
    assert_eq!(
        transport.sent().last(),
        Some(&ClientMessage::AcceptCall {
            call_id: "c1".to_string(),
            user_id: "u2".to_string(),
            user_name: "Bob".to_string(),
        })
    );
    assert!(client.incoming_call().await.is_none());
    assert_eq!(client.current_call_id().await, Some("c1".to_string()));
}

#[tokio::test]
async fn answer_unknown_call_is_an_error() {
    let (client, _, media) = client_with(FakeMedia::allowing()).await;

    let result = client.answer_call("nope").await;

    assert!(matches!(result, Err(ClientError::UnknownCall(id)) if id == "nope"));
    assert!(media.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn incoming_call_for_other_invitees_is_ignored() {
    let (client, _, _) = client_with(FakeMedia::allowing()).await;

    client
        .handle_server_message(incoming("c1", CallType::Voice, &["u3"]))
        .await;
    assert!(client.incoming_call().await.is_none());

    client
        .handle_server_message(incoming("c1", CallType::Voice, &["u3", "u2"]))
        .await;
    assert!(client.incoming_call().await.is_some());

    assert!(client
        .start_call(vec![], CallType::Video, "Bob", "F1")
        .await
        .is_err());
    assert!(client.current_call_id().await.is_none());
    assert!(client.local_stream().await.is_none());
}

#[tokio::test]
async fn reject_clears_pending_call() {
    let (client, transport, _) = client_with(FakeMedia::allowing()).await;
    client
        .handle_server_message(incoming("c1", CallType::Video, &[]))
        .await;

    client.reject_call("c1").await.unwrap();

    assert_eq!(
        transport.sent().last(),
        Some(&ClientMessage::RejectCall {
            call_id: "c1".to_string(),
            user_id: Some("u2".to_string()),
        })
    );
    assert!(client.incoming_call().await.is_none());
}

#[tokio::test]
async fn toggles_report_new_state() {
    let (client, _, _) = client_with(FakeMedia::allowing()).await;
    assert!(matches!(
        client.toggle_mute().await,
        Err(ClientError::NoLocalMedia)
    ));

    client
        .start_call(vec![], CallType::Video, "Bob", "F1")
        .await
        .unwrap();

    assert!(client.toggle_mute().await.unwrap());
    assert!(!client.toggle_mute().await.unwrap());
    assert!(client.toggle_video().await.unwrap());
    assert!(!client.toggle_video().await.unwrap());

    let stream = client.local_stream().await.unwrap();
    assert!(stream.is_enabled(TrackKind::Audio));
    assert!(stream.is_enabled(TrackKind::Video));
}

#[tokio::test]
async fn voice_call_has_video_off() {
    let (client, _, _) = client_with(FakeMedia::allowing()).await;
    client
        .start_call(vec![], CallType::Voice, "Bob", "F1")
        .await
        .unwrap();

    assert!(client.toggle_video().await.unwrap());
}

#[tokio::test]
async fn end_call_signals_and_releases_media() {
    let (client, transport, _) = client_with(FakeMedia::allowing()).await;
    let call_id = client
        .start_call(vec![], CallType::Voice, "Bob", "F1")
        .await
        .unwrap();

    client.end_call().await.unwrap();

    assert_eq!(
        transport.sent().last(),
        Some(&ClientMessage::EndCall {
            call_id,
            user_id: "u2".to_string(),
        })
    );
    assert!(client.local_stream().await.is_none());
    assert!(client.current_call_id().await.is_none());

    // 두 번째 호출은 아무것도 보내지 않는다
    let sent_before = transport.sent().len();
    client.end_call().await.unwrap();
    assert_eq!(transport.sent().len(), sent_before);
}

#[tokio::test]
async fn every_subscriber_sees_server_events() {
    let (client, _, _) = client_with(FakeMedia::allowing()).await;
    let call_id = client
        .start_call(vec![], CallType::Voice, "Bob", "F1")
        .await
        .unwrap();
    let mut first = client.subscribe();
    let mut second = client.subscribe();

    client
        .handle_server_message(ServerMessage::CallEnded {
            call_id: call_id.clone(),
            ended_by: "system-no-participants".to_string(),
        })
        .await;

    let expected = CallEvent::CallEnded {
        call_id,
        ended_by: "system-no-participants".to_string(),
    };
    assert_eq!(first.recv().await.unwrap(), expected);
    assert_eq!(second.recv().await.unwrap(), expected);
    assert!(client.local_stream().await.is_none());
}

#[tokio::test]
async fn blocked_start_releases_media() {
    let (client, _, _) = client_with(FakeMedia::allowing()).await;
    client
        .start_call(vec![], CallType::Voice, "Bob", "F1")
        .await
        .unwrap();
    let mut events = client.subscribe();

    client
        .handle_server_message(ServerMessage::CallBlocked {
            reason: "call-in-progress".to_string(),
            active_call_id: "c1".to_string(),
            active_call_type: CallType::Video,
            message: "busy".to_string(),
        })
        .await;

    assert!(matches!(
        events.recv().await.unwrap(),
        CallEvent::CallBlocked { active_call_id, .. } if active_call_id == "c1"
    ));
    assert!(client.current_call_id().await.is_none());
    assert!(client.local_stream().await.is_none());
}

#[tokio::test]
async fn relayed_signals_and_remote_streams_are_published() {
    let (client, transport, _) = client_with(FakeMedia::allowing()).await;
    let mut events = client.subscribe();

    client
        .send_offer("peer-1", serde_json::json!({ "sdp": "v=0" }))
        .await
        .unwrap();
    assert!(matches!(
        transport.sent().last(),
        Some(ClientMessage::WebrtcOffer { target_id, .. }) if target_id == "peer-1"
    ));

    client
        .handle_server_message(ServerMessage::WebrtcIceCandidate {
            from: "peer-1".to_string(),
            candidate: serde_json::json!({ "candidate": "c" }),
        })
        .await;
    assert!(matches!(
        events.recv().await.unwrap(),
        CallEvent::Signal { from, kind: SignalKind::IceCandidate, .. } if from == "peer-1"
    ));

    client.attach_remote_stream(RemoteStream {
        peer_id: "peer-1".to_string(),
        stream_id: "s1".to_string(),
    });
    assert!(matches!(
        events.recv().await.unwrap(),
        CallEvent::StreamReceived(stream) if stream.stream_id == "s1"
    ));
}

#[tokio::test]
async fn participant_updates_track_current_call() {
    let (client, _, _) = client_with(FakeMedia::allowing()).await;
    let call_id = client
        .start_call(vec![], CallType::Voice, "Bob", "F1")
        .await
        .unwrap();

    let roster = match incoming(&call_id, CallType::Voice, &[]) {
        ServerMessage::IncomingCall { participants, .. } => participants,
        _ => unreachable!(),
    };
    client
        .handle_server_message(ServerMessage::UserJoinedCall {
            call_id: call_id.clone(),
            user_id: "u1".to_string(),
            user_name: "Alice".to_string(),
            participants: roster,
        })
        .await;

    assert_eq!(client.participants().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_reply_before_send_returns_releases_media() {
    let (client, _transport) = eager_client(|message| match message {
        ClientMessage::StartCall { .. } => Some(ServerMessage::CallBlocked {
            reason: "call-in-progress".to_string(),
            active_call_id: "c1".to_string(),
            active_call_type: CallType::Video,
            message: "busy".to_string(),
        }),
        _ => None,
    })
    .await;

    client
        .start_call(vec![], CallType::Video, "Bob", "F1")
        .await
        .unwrap();

    assert!(client.current_call_id().await.is_none());
    assert!(client.local_stream().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn roster_reply_before_send_returns_is_kept() {
    let (client, _transport) = eager_client(|message| match message {
        ClientMessage::StartCall { call_id, .. } => Some(ServerMessage::CallParticipantsUpdated {
            call_id: call_id.clone(),
            participants: roster_of("u2", ParticipantRole::Caller),
        }),
        ClientMessage::AcceptCall { call_id, .. } => Some(ServerMessage::CallAccepted {
            call_id: call_id.clone(),
            participants: roster_of("u1", ParticipantRole::Caller),
        }),
        _ => None,
    })
    .await;

    let call_id = client
        .start_call(vec![], CallType::Voice, "Bob", "F1")
        .await
        .unwrap();
    assert_eq!(client.current_call_id().await, Some(call_id));
    assert_eq!(client.participants().await.len(), 1);
    assert!(client.local_stream().await.is_some());

    client.end_call().await.unwrap();
    client
        .handle_server_message(incoming("c9", CallType::Voice, &[]))
        .await;
    client.answer_call("c9").await.unwrap();

    let participants = client.participants().await;
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].id, "u1");
}

#[tokio::test]
async fn failed_send_rolls_back_local_call() {
    let (client, transport, _) = client_with(FakeMedia::allowing()).await;
    client
        .handle_server_message(incoming("c1", CallType::Voice, &[]))
        .await;
    transport.refuse_sends.store(true, Ordering::SeqCst);

    assert!(matches!(
        client.answer_call("c1").await,
        Err(ClientError::Transport(_))
    ));
    assert!(client.current_call_id().await.is_none());
    assert!(client.local_stream().await.is_none());
    assert!(client.incoming_call().await.is_some());

    assert!(client
        .start_call(vec![], CallType::Video, "Bob", "F1")
        .await
        .is_err());
    assert!(client.current_call_id().await.is_none());
    assert!(client.local_stream().await.is_none());
}

#[tokio::test]
async fn reconnect_rejoins_family_and_resyncs_call() {
    let connector = Arc::new(FakeConnector::default());
    let client = CallClient::with_connector(connector.clone(), Arc::new(FakeMedia::allowing()));
    client.initialize("u2", "F1", "Bob").await.unwrap();
    let call_id = client
        .start_call(vec![], CallType::Voice, "Bob", "F1")
        .await
        .unwrap();

    connector.transport(0).down.store(true, Ordering::SeqCst);
    assert!(!client.is_connected().await);
    assert!(matches!(
        client.sync_call_state().await,
        Err(ClientError::NotConnected)
    ));

    let mut events = client.subscribe();
    client.reconnect().await.unwrap();

    assert_eq!(connector.connections(), 2);
    assert_eq!(
        connector.transport(1).sent(),
        vec![
            ClientMessage::JoinFamily {
                user_id: "u2".to_string(),
                family_id: "F1".to_string(),
                user_name: "Bob".to_string(),
            },
            ClientMessage::SyncCallState {
                call_id: call_id.clone(),
                user_id: "u2".to_string(),
            },
        ]
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CallEvent::ConnectionStatusChanged { connected: true }
    );
    assert!(client.is_connected().await);
    assert_eq!(client.current_call_id().await, Some(call_id));
    client.sync_call_state().await.unwrap();
}

#[tokio::test]
async fn reconnect_without_connector_reports_not_connected() {
    let (client, transport, _) = client_with(FakeMedia::allowing()).await;
    transport.down.store(true, Ordering::SeqCst);

    assert!(matches!(
        client.reconnect().await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn concurrent_initialize_joins_once() {
    let connector = Arc::new(FakeConnector::default());
    let client = CallClient::with_connector(connector.clone(), Arc::new(FakeMedia::allowing()));

    let (first, second) = tokio::join!(
        client.initialize("u2", "F1", "Bob"),
        client.initialize("u2", "F1", "Bob")
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(connector.connections(), 1);
    assert_eq!(connector.transport(0).sent().len(), 1);
}
