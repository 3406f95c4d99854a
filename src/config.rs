//! 프로바이더 설정
//!
//! 서버 주소, URI 파싱, 그리고 직접/라우팅 프로바이더가 공유하는
//! 설정값을 정의합니다.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DriverError, DriverResult};
use crate::routing::RoutingPolicy;

/// 주소에 포트가 없을 때 사용하는 포트
pub const DEFAULT_PORT: u16 = 7687;

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 클러스터 멤버의 `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    /// 호스트 이름 또는 IP (IPv6는 대괄호 없이)
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 호스트와 포트로 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host`, `host:port`, `[v6]:port` 형식 파싱
    pub fn parse(s: &str) -> DriverResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DriverError::configuration("Empty server address"));
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                DriverError::configuration(format!("Invalid server address: {}", s))
            })?;
            let port = match tail {
                "" => DEFAULT_PORT,
                t => match t.strip_prefix(':') {
                    Some(port) => parse_port(port)?,
                    None => {
                        return Err(DriverError::configuration(format!(
                            "Invalid server address: {}",
                            s
                        )))
                    }
                },
            };
            return Ok(Self::new(host, port));
        }

        match s.split_once(':') {
            None => Ok(Self::new(s, DEFAULT_PORT)),
            Some((host, port)) if !host.is_empty() && !port.contains(':') => {
                Ok(Self::new(host, parse_port(port)?))
            }
            Some(_) => Err(DriverError::configuration(format!(
                "Invalid server address: {}",
                s
            ))),
        }
    }

    /// `TcpStream::connect`에 넘길 수 있는 주소
    pub fn to_socket_addr(&self) -> String {
        self.to_string()
    }
}

fn parse_port(port: &str) -> DriverResult<u16> {
    port.parse()
        .map_err(|_| DriverError::configuration(format!("Invalid port: {}", port)))
}

impl FromStr for ServerAddress {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// URI 스킴
// ============================================================================

/// URI가 요청하는 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// `bolt://` - 단일 서버
    Direct,
    /// `zeta4g://` - 클러스터 라우팅
    Routing,
}

/// `uri`가 라우팅 스킴인지 확인
pub fn is_routing_uri(uri: &str) -> bool {
    matches!(
        uri.split_once("://").map(|(scheme, _)| scheme),
        Some("zeta4g" | "zeta4g+s" | "zeta4g+ssc")
    )
}

struct ParsedUri {
    mode: ConnectionMode,
    encrypted: bool,
    addresses: Vec<ServerAddress>,
    routing_context: HashMap<String, String>,
}

fn parse_uri(uri: &str) -> DriverResult<ParsedUri> {
    let (scheme, rest) = uri
        .trim()
        .split_once("://")
        .ok_or_else(|| DriverError::configuration(format!("Invalid URI: {}", uri)))?;

    let (mode, encrypted) = match scheme {
        "bolt" => (ConnectionMode::Direct, false),
        "bolt+s" | "bolt+ssc" => (ConnectionMode::Direct, true),
        "zeta4g" => (ConnectionMode::Routing, false),
        "zeta4g+s" | "zeta4g+ssc" => (ConnectionMode::Routing, true),
        other => {
            return Err(DriverError::configuration(format!(
                "Unsupported URI scheme: {}",
                other
            )))
        }
    };

    let (authority, query) = match rest.split_once('?') {
        Some((authority, query)) => (authority, Some(query)),
        None => (rest, None),
    };
    let authority = authority.trim_end_matches('/');

    let addresses = authority
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ServerAddress::parse)
        .collect::<DriverResult<Vec<_>>>()?;

    if addresses.is_empty() {
        return Err(DriverError::configuration("No server address specified"));
    }
    if mode == ConnectionMode::Direct && addresses.len() > 1 {
        return Err(DriverError::configuration(format!(
            "Scheme '{}' accepts a single address",
            scheme
        )));
    }

    let mut routing_context = HashMap::new();
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        if mode == ConnectionMode::Direct {
            return Err(DriverError::configuration(format!(
                "Routing parameters are not supported with scheme '{}'",
                scheme
            )));
        }
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DriverError::configuration(format!("Invalid routing parameter: {}", pair))
            })?;
            if key.is_empty() {
                return Err(DriverError::configuration(format!(
                    "Invalid routing parameter: {}",
                    pair
                )));
            }
            if routing_context
                .insert(key.to_string(), value.to_string())
                .is_some()
            {
                return Err(DriverError::configuration(format!(
                    "Duplicated routing parameter: {}",
                    key
                )));
            }
        }
    }

    Ok(ParsedUri {
        mode,
        encrypted,
        addresses,
        routing_context,
    })
}

// ============================================================================
// RetryPolicy - 재시도 정책
// ============================================================================

/// 디스커버리 라운드 사이의 상한 있는 지수 백오프
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 첫 라운드를 포함한 총 라운드 수
    pub max_attempts: u32,
    /// 두 번째 라운드 전 대기 시간
    pub initial_delay: Duration,
    /// 대기 시간 상한
    pub max_delay: Duration,
    /// 라운드마다 곱하는 배수
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 재시도 없이 한 라운드만
    pub fn no_retry() -> Self {
        Self::default()
    }

    /// 기본 백오프로 `max_attempts` 라운드
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// 0부터 센 `attempt` 다음에 라운드가 더 있는지 여부
    pub fn has_attempt_after(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts.max(1)
    }

    /// 0부터 센 `attempt`가 실패한 뒤의 대기 시간
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

// ============================================================================
// ProviderConfig - 프로바이더 설정
// ============================================================================

/// 모든 프로바이더가 공유하는 설정
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// 직접 또는 라우팅
    pub mode: ConnectionMode,
    /// URI의 첫 주소: 직접 연결 대상 또는 첫 시드 라우터
    pub address: ServerAddress,
    /// URI의 모든 주소
    pub seed_routers: Vec<ServerAddress>,
    /// 스킴이 요구하는 TLS
    pub encrypted: bool,
    /// 연결 하나를 여는 데 걸리는 시간 제한
    pub connection_timeout: Duration,
    /// 풀 여유를 기다리는 시간 제한
    pub connection_acquisition_timeout: Duration,
    /// 라우팅 요청 하나의 시간 제한
    pub discovery_timeout: Duration,
    /// 주소별 최대 연결 수
    pub max_connection_pool_size: usize,
    /// 만료된 라우팅 테이블을 제거하기 전까지 유지하는 시간
    pub routing_table_purge_delay: Duration,
    /// 역할 내 서버 선택 정책
    pub routing_policy: RoutingPolicy,
    /// 디스커버리 라운드
    pub discovery_retry: RetryPolicy,
    /// 모든 라우팅 요청에 함께 전송
    pub routing_context: HashMap<String, String>,
    /// User Agent
    pub user_agent: String,
}

impl ProviderConfig {
    /// `uri`를 파싱하고 기본값 적용
    pub fn new(uri: &str) -> DriverResult<Self> {
        let parsed = parse_uri(uri)?;
        let address = parsed.addresses[0].clone();

        let mut routing_context = parsed.routing_context;
        if parsed.mode == ConnectionMode::Routing {
            routing_context.insert("address".to_string(), address.to_string());
        }

        let connection_timeout = Duration::from_secs(30);
        Ok(Self {
            mode: parsed.mode,
            address,
            seed_routers: parsed.addresses,
            encrypted: parsed.encrypted,
            connection_timeout,
            connection_acquisition_timeout: Duration::from_secs(60),
            discovery_timeout: connection_timeout,
            max_connection_pool_size: 100,
            routing_table_purge_delay: Duration::from_secs(30),
            routing_policy: RoutingPolicy::default(),
            discovery_retry: RetryPolicy::default(),
            routing_context,
            user_agent: format!("Zeta4G/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// `uri`로 빌더 시작
    pub fn builder(uri: &str) -> DriverResult<ProviderConfigBuilder> {
        let config = Self::new(uri)?;
        Ok(ProviderConfigBuilder {
            config,
            discovery_timeout: None,
        })
    }

    /// URI가 라우팅을 요청했는지 여부
    pub fn is_routing(&self) -> bool {
        self.mode == ConnectionMode::Routing
    }
}

// ============================================================================
// ProviderConfigBuilder - 설정 빌더
// ============================================================================

/// [`ProviderConfig`] 빌더
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
    discovery_timeout: Option<Duration>,
}

impl ProviderConfigBuilder {
    /// 스킴과 관계없이 TLS 사용 여부 지정
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.config.encrypted = encrypted;
        self
    }

    /// 주소별 최대 연결 수
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size;
        self
    }

    /// 풀 여유를 기다리는 시간 제한
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_acquisition_timeout = timeout;
        self
    }

    /// 연결 하나를 여는 데 걸리는 시간 제한. [`with_discovery_timeout`](Self::with_discovery_timeout)을
    /// 쓰지 않으면 디스커버리 제한 시간도 이 값을 따릅니다.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// 라우팅 요청 하나의 시간 제한
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    pub fn with_routing_table_purge_delay(mut self, delay: Duration) -> Self {
        self.config.routing_table_purge_delay = delay;
        self
    }

    pub fn with_routing_policy(mut self, policy: RoutingPolicy) -> Self {
        self.config.routing_policy = policy;
        self
    }

    pub fn with_discovery_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.discovery_retry = retry;
        self
    }

    /// 라우팅 컨텍스트 항목 추가
    pub fn with_routing_context_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config.routing_context.insert(key.into(), value.into());
        self
    }

    /// URI에 지정된 시드 라우터 교체
    pub fn with_seed_routers(mut self, routers: Vec<ServerAddress>) -> Self {
        self.config.seed_routers = routers;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// 검증 후 설정 생성
    pub fn build(self) -> DriverResult<ProviderConfig> {
        let mut config = self.config;
        config.discovery_timeout = self.discovery_timeout.unwrap_or(config.connection_timeout);

        if config.max_connection_pool_size == 0 {
            return Err(DriverError::configuration(
                "max_connection_pool_size must be at least 1",
            ));
        }
        if config.seed_routers.is_empty() {
            return Err(DriverError::configuration("At least one router is required"));
        }
        if config.discovery_retry.max_attempts == 0 {
            return Err(DriverError::configuration(
                "discovery_retry.max_attempts must be at least 1",
            ));
        }
        config.address = config.seed_routers[0].clone();
        Ok(config)
    }
}
