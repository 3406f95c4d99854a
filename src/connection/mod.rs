//! 연결 경계
//!
//! 프로바이더는 와이어 프로토콜을 직접 다루지 않습니다. [`Connection`]과
//! [`Connector`] 트레이트를 통해 연결을 다루며, 구현체가 소켓 열기,
//! [`crate::bolt::negotiate`] 실행, 인증, 메시지 인코딩을
//! 담당합니다.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::bolt::BoltVersion;
use crate::bookmarks::Bookmarks;
use crate::config::ServerAddress;
use crate::error::{DriverError, DriverResult};
use crate::routing::ServerRole;

#[cfg(test)]
pub(crate) mod mock;

/// 라우팅 응답에 TTL이 없을 때 적용하는 값
pub const DEFAULT_ROUTING_TTL_SECS: u64 = 300;

// ============================================================================
// 트레이트
// ============================================================================

/// 서버 하나에 대해 수립되고 인증된 연결
#[async_trait]
pub trait Connection: Send + Sync {
    /// 연결 대상 서버
    fn address(&self) -> &ServerAddress;

    /// 핸드셰이크에서 합의한 버전
    fn protocol_version(&self) -> BoltVersion;

    /// HELLO 시 서버가 알려준 에이전트 문자열
    fn server_agent(&self) -> &str;

    /// 요청을 더 보낼 수 있는지 여부
    fn is_open(&self) -> bool;

    /// 서버에 라우팅 테이블 요청
    async fn route(&mut self, request: &RouteRequest) -> DriverResult<RoutingInfo>;

    /// 연결 닫기. 두 번 닫아도 에러가 아닙니다.
    async fn close(&mut self) -> DriverResult<()>;

    /// 연결 뒤의 서버 정보
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            address: self.address().clone(),
            agent: self.server_agent().to_string(),
            protocol_version: self.protocol_version(),
        }
    }
}

/// 연결 생성기
#[async_trait]
pub trait Connector: Send + Sync {
    /// `address`로 연결을 열고 핸드셰이크와 인증을 수행합니다.
    ///
    /// `timeout`은 설정된 연결 수립 제한 시간입니다. 호출자도 반환된 future를
    /// 같은 값으로 제한하므로 구현체는 이를 무시해도 됩니다.
    async fn connect(
        &self,
        address: &ServerAddress,
        timeout: Duration,
    ) -> DriverResult<Box<dyn Connection>>;
}

// ============================================================================
// RouteRequest - 라우팅 요청
// ============================================================================

/// 라우팅 디스커버리 요청 파라미터
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteRequest {
    /// `None`이면 서버의 기본 데이터베이스
    pub database: Option<String>,
    /// 디스커버리 읽기의 인과적 일관성
    pub bookmarks: Bookmarks,
    pub impersonated_user: Option<String>,
    pub routing_context: HashMap<String, String>,
}

// ============================================================================
// RoutingInfo - 라우팅 정보
// ============================================================================

/// 파싱된 라우팅 응답
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingInfo {
    /// TTL (초)
    pub ttl: u64,
    /// 확정된 데이터베이스 이름
    pub database: Option<String>,
    /// 라우터 주소
    pub routers: Vec<ServerAddress>,
    /// 리더(읽기) 주소
    pub readers: Vec<ServerAddress>,
    /// 라이터(쓰기) 주소
    pub writers: Vec<ServerAddress>,
}

impl RoutingInfo {
    /// ROUTE 성공 응답의 `rt` 맵 파싱:
    /// `{"ttl": 300, "db": "neo4j", "servers": [{"role": "READ", "addresses": [...]}]}`.
    ///
    /// 알 수 없는 역할은 건너뜁니다. `servers` 목록이 없거나, 주소가 문자열이
    /// 아니거나, 주소를 파싱할 수 없으면 프로토콜 에러입니다.
    pub fn from_json(rt: &JsonValue) -> DriverResult<Self> {
        let rt = rt
            .as_object()
            .ok_or_else(|| DriverError::protocol("Routing table must be a map"))?;

        let ttl = match rt.get("ttl") {
            None | Some(JsonValue::Null) => DEFAULT_ROUTING_TTL_SECS,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| DriverError::protocol(format!("Invalid routing ttl: {}", v)))?,
        };

        let database = match rt.get("db") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(db)) => Some(db.clone()),
            Some(v) => {
                return Err(DriverError::protocol(format!(
                    "Invalid routing database name: {}",
                    v
                )))
            }
        };

        let servers = rt
            .get("servers")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| DriverError::protocol("Routing table has no servers list"))?;

        let mut info = Self {
            ttl,
            database,
            ..Self::default()
        };

        for server in servers {
            let role = server.get("role").and_then(JsonValue::as_str).unwrap_or("");
            let addresses = server
                .get("addresses")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| DriverError::protocol("Routing entry has no addresses"))?;

            let parsed = addresses
                .iter()
                .map(|a| {
                    a.as_str()
                        .ok_or_else(|| DriverError::protocol(format!("Invalid address: {}", a)))
                        .and_then(|s| {
                            ServerAddress::parse(s).map_err(|_| {
                                DriverError::protocol(format!("Invalid address: {}", s))
                            })
                        })
                })
                .collect::<DriverResult<Vec<_>>>()?;

            match ServerRole::parse(role) {
                Some(ServerRole::Route) => info.routers.extend(parsed),
                Some(ServerRole::Read) => info.readers.extend(parsed),
                Some(ServerRole::Write) => info.writers.extend(parsed),
                None => {}
            }
        }

        Ok(info)
    }
}

impl Default for RoutingInfo {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_ROUTING_TTL_SECS,
            database: None,
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
        }
    }
}

// ============================================================================
// ServerInfo - 서버 정보
// ============================================================================

/// 접근 가능한 서버의 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub address: ServerAddress,
    pub agent: String,
    pub protocol_version: BoltVersion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_routing_info_from_json() {
        let rt = json!({
            "ttl": 120,
            "db": "movies",
            "servers": [
                {"role": "ROUTE", "addresses": ["r1:7687", "r2:7687"]},
                {"role": "READ", "addresses": ["s1:7687", "s2"]},
                {"role": "WRITE", "addresses": ["s3:7688"]},
                {"role": "UNKNOWN", "addresses": ["x:1"]}
            ]
        });

        let info = RoutingInfo::from_json(&rt).unwrap();
        assert_eq!(info.ttl, 120);
        assert_eq!(info.database.as_deref(), Some("movies"));
        assert_eq!(info.routers.len(), 2);
        assert_eq!(info.readers[1], ServerAddress::new("s2", 7687));
        assert_eq!(info.writers, vec![ServerAddress::new("s3", 7688)]);
    }

    #[test]
    fn test_routing_info_defaults() {
        let info = RoutingInfo::from_json(&json!({"servers": []})).unwrap();
        assert_eq!(info.ttl, DEFAULT_ROUTING_TTL_SECS);
        assert!(info.database.is_none());
        assert!(info.routers.is_empty());
    }

    #[test]
    fn test_routing_info_malformed() {
        assert!(matches!(
            RoutingInfo::from_json(&json!([])),
            Err(DriverError::Protocol(_))
        ));
        assert!(RoutingInfo::from_json(&json!({"ttl": 1})).is_err());
        assert!(RoutingInfo::from_json(&json!({"ttl": -1, "servers": []})).is_err());
        assert!(RoutingInfo::from_json(&json!({
            "servers": [{"role": "READ", "addresses": [42]}]
        }))
        .is_err());
        assert!(RoutingInfo::from_json(&json!({
            "servers": [{"role": "READ", "addresses": ["host:port"]}]
        }))
        .is_err());
    }
}
