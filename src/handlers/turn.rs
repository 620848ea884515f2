//! ICE 서버(STUN/TURN) 설정 제공

use crate::config::IceConfig;
use crate::protocol::{IceServer, ServerMessage, TurnConfigData};
use crate::state::AppState;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// request-turn-config 처리
pub fn handle_turn_config_request(state: &AppState, connection_id: &str) {
    let now = chrono::Utc::now().timestamp();
    let reply = match build_turn_config(&state.config.ice, now) {
        Some(data) => ServerMessage::TurnConfig {
            success: true,
            data: Some(data),
            error: None,
        },
        None => ServerMessage::TurnConfig {
            success: false,
            data: None,
            error: Some("No ICE servers configured".to_string()),
        },
    };

    state.send_to(connection_id, reply);
    tracing::info!(peer_id = %connection_id, "TURN config sent");
}

/// STUN + (설정된 경우) 시간 제한 TURN 자격증명으로 ICE 서버 목록 생성
pub fn build_turn_config(config: &IceConfig, now: i64) -> Option<TurnConfigData> {
    let mut ice_servers: Vec<IceServer> = config
        .stun_urls
        .iter()
        .map(|url| IceServer {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        })
        .collect();

    if config.turn_enabled() {
        let username = credential_username(now, config.credential_ttl);
        match hmac_credential(&username, &config.turn_secret) {
            Some(credential) => ice_servers.push(IceServer {
                urls: turn_urls(config),
                username: Some(username),
                credential: Some(credential),
            }),
            None => tracing::error!("Failed to sign TURN credential"),
        }
    }

    if ice_servers.is_empty() {
        return None;
    }

    Some(TurnConfigData {
        ice_servers,
        ttl: config.credential_ttl,
        timestamp: now,
    })
}

/// TURN REST 형식: `<만료시각>:<임의 사용자>`
fn credential_username(now: i64, ttl: u64) -> String {
    let expiry = now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX));
    let random: u64 = rand::random();
    format!("{}:call_{:x}", expiry, random)
}

fn hmac_credential(username: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(username.as_bytes());
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

fn turn_urls(config: &IceConfig) -> Vec<String> {
    let mut urls = Vec::new();
    let hosts = std::iter::once(&config.turn_url).chain(config.fallback_servers.iter());

    for host in hosts {
        if config.enable_udp {
            urls.push(format!("turn:{}:{}?transport=udp", host, config.ports.udp));
        }
        if config.enable_tcp {
            urls.push(format!("turn:{}:{}?transport=tcp", host, config.ports.tcp));
        }
        if config.enable_tls {
            urls.push(format!("turns:{}:{}?transport=tcp", host, config.ports.tls));
        }
    }

    urls
}
