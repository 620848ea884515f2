//! 애플리케이션 상태 관리

use crate::calls::CallStore;
use crate::config::Config;
use crate::protocol::ServerMessage;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, Mutex};

/// 전역 애플리케이션 상태
pub struct AppState {
    /// 연결 정보 (connection_id -> Connection)
    pub connections: DashMap<String, Connection>,
    /// 가족 방 (family_id -> connection_id 집합)
    pub families: DashMap<String, HashSet<String>>,
    /// 통화 상태. 핸들러는 읽기-변경-브로드캐스트 전체 동안 락을 잡는다.
    pub calls: Mutex<CallStore>,
    /// 설정
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            connections: DashMap::new(),
            families: DashMap::new(),
            calls: Mutex::new(CallStore::new()),
            config: Arc::new(config),
        }
    }

    /// 특정 연결로 전송. 연결이 없으면 false.
    pub fn send_to(&self, connection_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(connection_id) {
            Some(connection) => connection.sender.send(message).is_ok(),
            None => false,
        }
    }

    pub fn family_members(&self, family_id: &str) -> Vec<String> {
        self.families
            .get(family_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 가족 방 전체에 브로드캐스트
    pub fn broadcast_to_family(&self, family_id: &str, message: ServerMessage) {
        for member in self.family_members(family_id) {
            self.send_to(&member, message.clone());
        }
    }

    /// 가족 방의 특정 연결을 제외하고 브로드캐스트
    pub fn broadcast_to_family_except(
        &self,
        family_id: &str,
        except_connection_id: &str,
        message: ServerMessage,
    ) {
        for member in self.family_members(family_id) {
            if member != except_connection_id {
                self.send_to(&member, message.clone());
            }
        }
    }

    /// 연결의 가족 정보 조회
    pub fn identity_of(&self, connection_id: &str) -> Option<Identity> {
        self.connections
            .get(connection_id)
            .and_then(|connection| connection.identity.clone())
    }
}

/// join-family 로 등록된 사용자 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub family_id: String,
    pub user_name: String,
}

/// 연결 세션 정보
pub struct Connection {
    pub id: String,
    pub identity: Option<Identity>,
    pub sender: UnboundedSender<ServerMessage>,
    #[allow(dead_code)]
    pub connected_at: Instant,
}

impl Connection {
    pub fn new(id: String, sender: UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            identity: None,
            sender,
            connected_at: Instant::now(),
        }
    }
}
