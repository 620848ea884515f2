//! 에러 타입 정의

use thiserror::Error;

/// 클라이언트 메시지 경계 검증 실패
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "invalid-message",
            ProtocolError::MissingField(_) => "missing-field",
        }
    }
}

/// 로컬 미디어(카메라/마이크) 획득 실패
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("permission to use camera or microphone was denied")]
    PermissionDenied,

    #[error("no {0} device found")]
    DeviceNotFound(&'static str),

    #[error("media device error: {0}")]
    Device(String),
}

/// CallClient 에러
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("signaling transport is not connected")]
    NotConnected,

    #[error("client is not initialized")]
    NotInitialized,

    #[error(transparent)]
    MediaAccess(#[from] MediaAccessError),

    #[error("no incoming call with id {0}")]
    UnknownCall(String),

    #[error("no active call")]
    NoActiveCall,

    #[error("no local media stream")]
    NoLocalMedia,

    #[error("transport error: {0}")]
    Transport(String),
}
