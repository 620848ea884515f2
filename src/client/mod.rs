//! 통화 클라이언트 (서버 시그널링 프로토콜의 상대편)

pub mod events;
pub mod media;
pub mod session;
pub mod transport;

pub use events::{CallEvent, EventBus, SignalKind};
pub use media::{LocalStream, MediaConstraints, MediaDevices, MediaTrack, RemoteStream, TrackKind};
pub use session::CallClient;
pub use transport::{
    SignalingConnector, SignalingLink, SignalingTransport, WebSocketConnector, WebSocketTransport,
};
