//! 환경 변수 기반 설정 관리

use std::env;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    /// `*` 이면 모든 origin 허용
    pub cors_origins: Vec<String>,
    pub ice: IceConfig,
    pub log_level: String,
}

/// STUN/TURN 서버 설정
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub stun_urls: Vec<String>,
    pub turn_url: String,
    pub turn_secret: String,
    pub enable_tls: bool,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub ports: TurnPorts,
    pub credential_ttl: u64,
    pub fallback_servers: Vec<String>,
}

/// TURN 포트 설정
#[derive(Debug, Clone)]
pub struct TurnPorts {
    pub udp: u16,
    pub tcp: u16,
    pub tls: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            ice: IceConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_url: String::new(),
            turn_secret: String::new(),
            enable_tls: false,
            enable_udp: true,
            enable_tcp: true,
            ports: TurnPorts {
                udp: 3478,
                tcp: 3478,
                tls: 443,
            },
            credential_ttl: 3600,
            fallback_servers: Vec::new(),
        }
    }
}

impl IceConfig {
    pub fn turn_enabled(&self) -> bool {
        !self.turn_url.is_empty() && !self.turn_secret.is_empty()
    }
}

impl Config {
    /// 환경 변수에서 설정 로드 (`.env` 파일 포함)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let ice = defaults.ice;

        Self {
            port: parse_var("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.cors_origins),
            ice: IceConfig {
                stun_urls: env::var("STUN_URLS")
                    .map(|v| split_list(&v))
                    .unwrap_or(ice.stun_urls),
                turn_url: env::var("TURN_SERVER_URL").unwrap_or_default(),
                turn_secret: env::var("TURN_SECRET").unwrap_or_default(),
                enable_tls: env::var("TURN_ENABLE_TLS")
                    .map(|v| v == "true")
                    .unwrap_or(ice.enable_tls),
                enable_udp: env::var("TURN_ENABLE_UDP")
                    .map(|v| v != "false")
                    .unwrap_or(ice.enable_udp),
                enable_tcp: env::var("TURN_ENABLE_TCP")
                    .map(|v| v != "false")
                    .unwrap_or(ice.enable_tcp),
                ports: TurnPorts {
                    udp: parse_var("TURN_PORT_UDP", ice.ports.udp),
                    tcp: parse_var("TURN_PORT_TCP", ice.ports.tcp),
                    tls: parse_var("TURN_PORT_TLS", ice.ports.tls),
                },
                credential_ttl: parse_var("TURN_CREDENTIAL_TTL", ice.credential_ttl),
                fallback_servers: env::var("TURN_FALLBACK_SERVERS")
                    .map(|v| split_list(&v))
                    .unwrap_or_default(),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
