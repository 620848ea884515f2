//! 가족 통화 시그널링
//!
//! 가족 단위 음성/영상 그룹 통화의 시그널링 서버와 클라이언트 파사드.

pub mod calls;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod state;
