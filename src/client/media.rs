//! 로컬 미디어 추상화
//!
//! 실제 장치 접근(브라우저 getUserMedia, 네이티브 캡처 등)은 `MediaDevices`
//! 구현체가 담당한다. 시그널링은 트랙의 on/off 상태만 다룬다.

use crate::calls::CallType;
use crate::error::MediaAccessError;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub enabled: bool,
    pub stopped: bool,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
            stopped: false,
        }
    }
}

/// 요청할 트랙 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl From<CallType> for MediaConstraints {
    fn from(call_type: CallType) -> Self {
        Self {
            audio: true,
            video: call_type.has_video(),
        }
    }
}

/// 로컬 미디어 스트림
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub id: String,
    tracks: Vec<MediaTrack>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }

    /// 해당 종류의 트랙이 하나라도 켜져 있는지
    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind && t.enabled)
    }

    pub fn set_enabled(&mut self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter_mut().filter(|t| t.kind == kind) {
            track.enabled = enabled;
        }
    }

    pub fn stop(&mut self) {
        for track in &mut self.tracks {
            track.stopped = true;
            track.enabled = false;
        }
    }
}

/// 원격 피어에게서 받은 스트림
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub peer_id: String,
    pub stream_id: String,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// 카메라/마이크 획득. 권한 거부나 장치 없음은 `MediaAccessError`.
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalStream, MediaAccessError>;
}
