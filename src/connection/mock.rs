//! 테스트에서 프로바이더를 구동하는 스크립트 기반 인메모리 클러스터

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Connection, Connector, RouteRequest, RoutingInfo};
use crate::bolt::BoltVersion;
use crate::config::ServerAddress;
use crate::error::{DriverError, DriverResult};

pub(crate) fn addr(s: &str) -> ServerAddress {
    ServerAddress::parse(s).unwrap()
}

pub(crate) fn addrs(list: &[&str]) -> Vec<ServerAddress> {
    list.iter().map(|s| addr(s)).collect()
}

/// 지정한 멤버로 구성된 라우팅 응답
pub(crate) fn routing_info(
    ttl: u64,
    database: Option<&str>,
    routers: &[&str],
    readers: &[&str],
    writers: &[&str],
) -> RoutingInfo {
    RoutingInfo {
        ttl,
        database: database.map(str::to_string),
        routers: addrs(routers),
        readers: addrs(readers),
        writers: addrs(writers),
    }
}

#[derive(Clone)]
enum RouteAnswer {
    Table(RoutingInfo),
    Fail(DriverError),
}

struct FakeServer {
    reachable: bool,
    version: BoltVersion,
    agent: String,
    answers: HashMap<Option<String>, RouteAnswer>,
    route_delay: Duration,
    connect_delay: Duration,
}

#[derive(Default)]
struct ClusterState {
    servers: HashMap<ServerAddress, FakeServer>,
    connects: HashMap<ServerAddress, usize>,
    routes: HashMap<ServerAddress, usize>,
    closes: usize,
    route_requests: Vec<(ServerAddress, RouteRequest)>,
}

/// 발급한 모든 연결이 공유하는 가짜 서버 집합
#[derive(Clone, Default)]
pub(crate) struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 접근 가능한 서버 등록
    pub fn server(&self, address: &str, version: BoltVersion) -> &Self {
        self.state.lock().servers.insert(
            addr(address),
            FakeServer {
                reachable: true,
                version,
                agent: format!("Zeta4G/fake@{}", address),
                answers: HashMap::new(),
                route_delay: Duration::ZERO,
                connect_delay: Duration::ZERO,
            },
        );
        self
    }

    fn with_server(&self, address: &str, f: impl FnOnce(&mut FakeServer)) {
        let mut state = self.state.lock();
        let server = state
            .servers
            .get_mut(&addr(address))
            .unwrap_or_else(|| panic!("unknown fake server {}", address));
        f(server);
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        self.with_server(address, |s| s.reachable = reachable);
    }

    /// `address`에서 `database`에 대한 라우팅 요청에 `info`로 응답
    pub fn set_routing(&self, address: &str, database: Option<&str>, info: RoutingInfo) {
        self.with_server(address, |s| {
            s.answers
                .insert(database.map(str::to_string), RouteAnswer::Table(info));
        });
    }

    /// `address`에서 `database`에 대한 라우팅 요청을 `err`로 실패시킴
    pub fn set_route_failure(&self, address: &str, database: Option<&str>, err: DriverError) {
        self.with_server(address, |s| {
            s.answers
                .insert(database.map(str::to_string), RouteAnswer::Fail(err));
        });
    }

    pub fn set_route_delay(&self, address: &str, delay: Duration) {
        self.with_server(address, |s| s.route_delay = delay);
    }

    pub fn set_connect_delay(&self, address: &str, delay: Duration) {
        self.with_server(address, |s| s.connect_delay = delay);
    }

    pub fn connect_count(&self, address: &str) -> usize {
        self.state.lock().connects.get(&addr(address)).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.state.lock().connects.values().sum()
    }

    pub fn route_count(&self, address: &str) -> usize {
        self.state.lock().routes.get(&addr(address)).copied().unwrap_or(0)
    }

    pub fn total_routes(&self) -> usize {
        self.state.lock().routes.values().sum()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn last_route_request(&self) -> Option<(ServerAddress, RouteRequest)> {
        self.state.lock().route_requests.last().cloned()
    }
}

#[async_trait]
impl Connector for FakeCluster {
    async fn connect(
        &self,
        address: &ServerAddress,
        _timeout: Duration,
    ) -> DriverResult<Box<dyn Connection>> {
        let (delay, reachable) = {
            let mut state = self.state.lock();
            *state.connects.entry(address.clone()).or_insert(0) += 1;
            match state.servers.get(address) {
                Some(server) => (server.connect_delay, server.reachable),
                None => (Duration::ZERO, false),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !reachable {
            return Err(DriverError::connection(format!(
                "Connection refused: {}",
                address
            )));
        }

        let state = self.state.lock();
        let server = state
            .servers
            .get(address)
            .ok_or_else(|| DriverError::connection(format!("Connection refused: {}", address)))?;
        Ok(Box::new(FakeConnection {
            address: address.clone(),
            version: server.version,
            agent: server.agent.clone(),
            open: true,
            state: self.state.clone(),
        }))
    }
}

pub(crate) struct FakeConnection {
    address: ServerAddress,
    version: BoltVersion,
    agent: String,
    open: bool,
    state: Arc<Mutex<ClusterState>>,
}

#[async_trait]
impl Connection for FakeConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn protocol_version(&self) -> BoltVersion {
        self.version
    }

    fn server_agent(&self) -> &str {
        &self.agent
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn route(&mut self, request: &RouteRequest) -> DriverResult<RoutingInfo> {
        let delay = {
            let mut state = self.state.lock();
            *state.routes.entry(self.address.clone()).or_insert(0) += 1;
            state
                .route_requests
                .push((self.address.clone(), request.clone()));
            state
                .servers
                .get(&self.address)
                .map(|s| s.route_delay)
                .unwrap_or_default()
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        let server = match state.servers.get(&self.address) {
            Some(server) if server.reachable => server,
            _ => {
                return Err(DriverError::connection(format!(
                    "Connection reset: {}",
                    self.address
                )))
            }
        };

        match server.answers.get(&request.database) {
            Some(RouteAnswer::Table(info)) => Ok(info.clone()),
            Some(RouteAnswer::Fail(err)) => Err(err.clone()),
            None => Err(DriverError::server(
                crate::error::codes::DATABASE_NOT_FOUND,
                format!("Database {:?} not found", request.database),
            )),
        }
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.open {
            self.open = false;
            self.state.lock().closes += 1;
        }
        Ok(())
    }
}
