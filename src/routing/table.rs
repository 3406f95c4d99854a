//! 라우팅 테이블
//!
//! 데이터베이스 하나에 대한 클러스터 뷰: 어떤 멤버가 라우팅, 읽기, 쓰기를
//! 담당하는지와 그 뷰를 언제까지 신뢰할 수 있는지를 담습니다.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ServerAddress;
use crate::connection::RoutingInfo;
use crate::error::{DriverError, DriverResult};
use crate::provider::AccessMode;

/// 서버가 제공한 TTL에 적용하는 상한
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// 서버 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// 라우팅 테이블 제공
    Route,
    /// 쓰기 (리더)
    Write,
    /// 읽기 (팔로워 / 읽기 복제본)
    Read,
}

impl ServerRole {
    /// 라우팅 응답에 나타나는 역할 이름 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ROUTE" => Some(Self::Route),
            "WRITE" => Some(Self::Write),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }
}

/// 데이터베이스 하나의 토폴로지 스냅샷
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTable {
    /// 확정된 데이터베이스 이름 (이름 없는 기본 데이터베이스는 `None`)
    pub database: Option<String>,
    pub routers: Vec<ServerAddress>,
    pub readers: Vec<ServerAddress>,
    pub writers: Vec<ServerAddress>,
    /// 이 시점 이후에는 테이블을 갱신해야 함
    pub expiration: Instant,
}

impl RoutingTable {
    /// 이미 만료된 빈 테이블
    pub fn new(database: Option<String>) -> Self {
        Self {
            database,
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            expiration: Instant::now(),
        }
    }

    /// 라우팅 응답으로 테이블 생성
    ///
    /// 라우터나 리더가 없는 응답은 아무것도 처리할 수 없으므로 거부합니다.
    /// 라이터가 없는 것은 유효한 읽기 전용 상태입니다. 응답에 데이터베이스
    /// 이름이 없으면 `requested`를 유지합니다.
    pub fn from_routing_info(info: RoutingInfo, requested: Option<String>) -> DriverResult<Self> {
        if info.routers.is_empty() {
            return Err(DriverError::protocol("Routing table has no routers"));
        }
        if info.readers.is_empty() {
            return Err(DriverError::protocol("Routing table has no readers"));
        }

        let ttl = Duration::from_secs(info.ttl.min(MAX_TTL_SECS));
        Ok(Self {
            database: info.database.or(requested),
            routers: dedup(info.routers),
            readers: dedup(info.readers),
            writers: dedup(info.writers),
            expiration: Instant::now() + ttl,
        })
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expiration
    }

    /// `mode`를 처리하기 전에 갱신해야 하는지 여부
    pub fn is_stale_for(&self, mode: AccessMode) -> bool {
        self.is_expired() || self.routers.is_empty() || self.servers_for(mode).is_empty()
    }

    /// 만료 후 `purge_delay`가 지났는지 여부
    pub fn is_expired_for(&self, purge_delay: Duration) -> bool {
        Instant::now() >= self.expiration + purge_delay
    }

    pub fn servers_for(&self, mode: AccessMode) -> &[ServerAddress] {
        match mode {
            AccessMode::Read => &self.readers,
            AccessMode::Write => &self.writers,
        }
    }

    /// 리더와 라이터에서 `address` 제거
    pub fn forget(&mut self, address: &ServerAddress) {
        self.readers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
    }

    pub fn forget_writer(&mut self, address: &ServerAddress) {
        self.writers.retain(|a| a != address);
    }

    pub fn forget_router(&mut self, address: &ServerAddress) {
        self.routers.retain(|a| a != address);
    }

    /// 테이블을 즉시 만료시킴
    pub fn expire(&mut self) {
        self.expiration = Instant::now();
    }

    /// 모든 역할의 주소
    pub fn all_servers(&self) -> HashSet<&ServerAddress> {
        self.routers
            .iter()
            .chain(self.readers.iter())
            .chain(self.writers.iter())
            .collect()
    }
}

fn dedup(addresses: Vec<ServerAddress>) -> Vec<ServerAddress> {
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

pub(super) fn join(addresses: &[ServerAddress]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RoutingTable[database={}, expired={}, routers=[{}], readers=[{}], writers=[{}]]",
            self.database.as_deref().unwrap_or("default database"),
            self.is_expired(),
            join(&self.routers),
            join(&self.readers),
            join(&self.writers),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{addr, routing_info};

    fn table(ttl: u64) -> RoutingTable {
        RoutingTable::from_routing_info(
            routing_info(ttl, Some("movies"), &["r1:7687"], &["s1:7687", "s2:7687"], &["s3:7687"]),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_server_role_parse() {
        assert_eq!(ServerRole::parse("ROUTE"), Some(ServerRole::Route));
        assert_eq!(ServerRole::parse("route"), Some(ServerRole::Route));
        assert_eq!(ServerRole::parse("WRITE"), Some(ServerRole::Write));
        assert_eq!(ServerRole::parse("READ"), Some(ServerRole::Read));
        assert_eq!(ServerRole::parse("UNKNOWN"), None);
    }

    #[test]
    fn test_new_table_is_stale() {
        let table = RoutingTable::new(Some("movies".into()));
        assert!(table.is_stale_for(AccessMode::Read));
        assert!(table.is_stale_for(AccessMode::Write));
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_routing_info() {
        let table = table(300);
        assert_eq!(table.database.as_deref(), Some("movies"));
        assert_eq!(table.readers.len(), 2);
        assert!(!table.is_stale_for(AccessMode::Read));
        assert!(!table.is_stale_for(AccessMode::Write));
        assert_eq!(table.routers, vec![addr("r1:7687")]);
        assert_eq!(table.all_servers().len(), 4);
    }

    #[test]
    fn test_from_routing_info_keeps_requested_name() {
        let table = RoutingTable::from_routing_info(
            routing_info(300, None, &["r1:7687"], &["s1:7687"], &[]),
            Some("requested".into()),
        )
        .unwrap();
        assert_eq!(table.database.as_deref(), Some("requested"));
    }

    #[test]
    fn test_from_routing_info_rejects_unusable() {
        let no_routers = routing_info(300, None, &[], &["s1:7687"], &["s1:7687"]);
        assert!(RoutingTable::from_routing_info(no_routers, None).is_err());

        let no_readers = routing_info(300, None, &["r1:7687"], &[], &["s1:7687"]);
        assert!(RoutingTable::from_routing_info(no_readers, None).is_err());
    }

    #[test]
    fn test_no_writers_is_read_only() {
        let table = RoutingTable::from_routing_info(
            routing_info(300, None, &["r1:7687"], &["s1:7687"], &[]),
            None,
        )
        .unwrap();
        assert!(!table.is_stale_for(AccessMode::Read));
        assert!(table.is_stale_for(AccessMode::Write));
    }

    #[test]
    fn test_duplicates_collapse() {
        let table = RoutingTable::from_routing_info(
            routing_info(300, None, &["r1:7687", "r1:7687"], &["s1:7687", "s1:7687"], &[]),
            None,
        )
        .unwrap();
        assert_eq!(table.routers.len(), 1);
        assert_eq!(table.readers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_and_purge_delay() {
        let table = table(10);
        assert!(!table.is_expired());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(table.is_expired());
        assert!(table.is_stale_for(AccessMode::Read));
        assert!(!table.is_expired_for(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(table.is_expired_for(Duration::from_secs(30)));
    }

    #[test]
    fn test_huge_ttl_is_capped() {
        let table = table(u64::MAX);
        assert!(!table.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget() {
        let mut table = table(300);
        let s1 = addr("s1:7687");
        let s3 = addr("s3:7687");

        table.forget(&s1);
        assert_eq!(table.readers, vec![addr("s2:7687")]);

        table.forget_writer(&s3);
        assert!(table.writers.is_empty());
        assert!(table.is_stale_for(AccessMode::Write));
        assert!(!table.is_stale_for(AccessMode::Read));

        table.forget_router(&addr("r1:7687"));
        assert!(table.is_stale_for(AccessMode::Read));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire() {
        let mut table = table(300);
        table.expire();
        assert!(table.is_expired());
        assert!(table.is_stale_for(AccessMode::Read));
    }

    #[tokio::test(start_paused = true)]
    async fn test_display() {
        let text = table(300).to_string();
        assert!(text.contains("database=movies"));
        assert!(text.contains("readers=[s1:7687, s2:7687]"));
    }
}
