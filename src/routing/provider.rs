//! 라우팅 프로바이더
//!
//! `zeta4g://` 시드 라우터를 통해 클러스터에 연결합니다. 요청된 데이터베이스마다
//! 라우팅 테이블을 하나씩 유지하고, 만료되면 라우터에서 갱신하며,
//! 각 획득 요청을 해당 역할의 멤버로 보냅니다.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::{RoutingPolicy, ServerSelector};
use super::table::{join, RoutingTable};
use crate::bolt::BoltVersion;
use crate::bookmarks::Bookmarks;
use crate::config::{ProviderConfig, ServerAddress};
use crate::connection::{Connector, RouteRequest, RoutingInfo, ServerInfo};
use crate::error::{DriverError, DriverResult};
use crate::pool::{connect_with_timeout, ConnectionPools, ErrorHandler, PoolConfig, PooledConnection};
use crate::provider::{
    unless_closed, AccessMode, AcquireOptions, Capabilities, CapabilityCache,
    ConnectionProvider, VerifyOptions,
};
use crate::timeout::with_timeout;

type SharedRefresh = Shared<BoxFuture<'static, DriverResult<RoutingTable>>>;

fn database_label(key: &Option<String>) -> &str {
    key.as_deref().unwrap_or("default database")
}

/// `zeta4g://host1:port1,host2:port2` URI용 프로바이더
///
/// 테이블과 풀은 모든 획득 요청이 공유합니다. 제공한 연결은
/// [`PooledConnection::handle_error`]로 실패를 보고하며, 세션이 에러를 보기
/// 전에 테이블이 갱신됩니다.
pub struct RoutingProvider {
    inner: Arc<RoutingInner>,
}

struct RoutingInner {
    config: ProviderConfig,
    pools: ConnectionPools,
    /// 호출자가 요청한 데이터베이스별 테이블
    tables: RwLock<HashMap<Option<String>, RoutingTable>>,
    /// 진행 중인 갱신 (키마다 최대 하나)
    refreshes: Mutex<HashMap<Option<String>, SharedRefresh>>,
    selector: ServerSelector,
    capabilities: CapabilityCache,
    last_success: RwLock<Option<ServerAddress>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl RoutingProvider {
    pub fn new(config: ProviderConfig, connector: Arc<dyn Connector>) -> Self {
        let pools = ConnectionPools::new(PoolConfig::from(&config), connector);
        let selector = ServerSelector::new(config.routing_policy);
        Self {
            inner: Arc::new(RoutingInner {
                config,
                pools,
                tables: RwLock::new(HashMap::new()),
                refreshes: Mutex::new(HashMap::new()),
                selector,
                capabilities: CapabilityCache::new(),
                last_success: RwLock::new(None),
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    pub fn seed_routers(&self) -> &[ServerAddress] {
        &self.inner.config.seed_routers
    }

    pub fn routing_policy(&self) -> RoutingPolicy {
        self.inner.selector.policy()
    }

    /// `database`의 현재 테이블 (기본 데이터베이스는 `None`)
    pub fn routing_table(&self, database: Option<&str>) -> Option<RoutingTable> {
        self.inner
            .tables
            .read()
            .get(&database.map(str::to_string))
            .cloned()
    }

    pub fn metrics(&self) -> RoutingProviderMetrics {
        let mut metrics = RoutingProviderMetrics {
            routing_table_count: self.inner.tables.read().len(),
            ..Default::default()
        };
        for pool in self.inner.pools.metrics() {
            metrics.pool_count += 1;
            metrics.total_pool_size += pool.size;
            metrics.total_idle_connections += pool.idle;
            metrics.total_in_use_connections += pool.in_use;
        }
        metrics
    }
}

impl RoutingInner {
    async fn acquire(self: &Arc<Self>, options: AcquireOptions) -> DriverResult<PooledConnection> {
        let AcquireOptions {
            access_mode,
            database: key,
            bookmarks,
            impersonated_user,
            on_database_name_resolved,
        } = options;

        if impersonated_user.is_some() && !self.capabilities().await?.user_impersonation {
            return Err(DriverError::unsupported(
                "Impersonation requires a server that supports Bolt 4.4 or newer",
            ));
        }

        let mut table = self
            .fresh_table(&key, access_mode, &bookmarks, impersonated_user.as_deref(), false)
            .await?;

        if let (Some(callback), Some(name)) = (on_database_name_resolved, table.database.as_deref()) {
            callback(Some(name));
        }

        let mut attempted: Vec<ServerAddress> = Vec::new();
        let mut busy: Option<DriverError> = None;
        let mut refreshed = false;

        loop {
            let candidates: Vec<ServerAddress> = table
                .servers_for(access_mode)
                .iter()
                .filter(|a| !attempted.contains(a))
                .cloned()
                .collect();
            let selected = self
                .selector
                .select(access_mode, &candidates, |a| self.pools.in_use_count(a))
                .cloned();

            let Some(address) = selected else {
                // 풀이 가득 찼을 뿐 서버는 살아 있음
                if let Some(timeout) = busy {
                    return Err(timeout);
                }
                if refreshed {
                    break;
                }
                refreshed = true;
                debug!(database = database_label(&key), mode = %access_mode, "no candidate left, forcing refresh");
                table = self
                    .fresh_table(&key, access_mode, &bookmarks, impersonated_user.as_deref(), true)
                    .await?;
                continue;
            };

            attempted.push(address.clone());
            let pool = self.pools.get_or_create(&address);
            match pool.acquire().await {
                Ok(connection) => {
                    debug!(%address, mode = %access_mode, "acquired connection");
                    *self.last_success.write() = Some(address);
                    return Ok(connection.with_error_handler(self.error_handler(key)));
                }
                Err(e @ DriverError::Timeout { .. }) => {
                    debug!(%address, error = %e, "no connection available, trying another server");
                    busy = Some(e);
                }
                Err(e) if e.is_connection_failure() => {
                    warn!(%address, error = %e, "server unreachable, removing it from routing tables");
                    self.forget(&address);
                    table.forget(&address);
                }
                // 동시 토폴로지 변경으로 풀이 제거됨
                Err(DriverError::Closed(_)) if !self.shutdown.is_cancelled() => {}
                Err(e) => return Err(e),
            }
        }

        Err(DriverError::service_unavailable(format!(
            "Failed to obtain a connection to a {} server for {}; tried [{}]",
            access_mode,
            database_label(&key),
            join(&attempted)
        )))
    }

    fn usable_table(&self, key: &Option<String>, mode: AccessMode) -> Option<RoutingTable> {
        self.tables
            .read()
            .get(key)
            .filter(|table| !table.is_stale_for(mode))
            .cloned()
    }

    /// `mode`를 처리할 수 있는 테이블 (만료됐거나 `force`면 먼저 갱신)
    async fn fresh_table(
        self: &Arc<Self>,
        key: &Option<String>,
        mode: AccessMode,
        bookmarks: &Bookmarks,
        impersonated_user: Option<&str>,
        force: bool,
    ) -> DriverResult<RoutingTable> {
        if !force {
            if let Some(table) = self.usable_table(key, mode) {
                return Ok(table);
            }
        }

        let refresh = {
            let mut refreshes = self.refreshes.lock();
            match refreshes.get(key) {
                Some(in_flight) => in_flight.clone(),
                None => {
                    // 첫 확인 이후 갱신이 끝났을 수 있음
                    if !force {
                        if let Some(table) = self.usable_table(key, mode) {
                            return Ok(table);
                        }
                    }
                    let request = RouteRequest {
                        database: key.clone(),
                        bookmarks: bookmarks.clone(),
                        impersonated_user: impersonated_user.map(str::to_string),
                        routing_context: self.config.routing_context.clone(),
                    };
                    let refresh = self.clone().refresh(key.clone(), request);
                    refreshes.insert(key.clone(), refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    fn refresh(self: Arc<Self>, key: Option<String>, request: RouteRequest) -> SharedRefresh {
        async move {
            debug!(database = database_label(&key), "refreshing routing table");
            let result = self.discover(&key, request).await;
            if let Ok(table) = &result {
                self.update_table(&key, table.clone());
            }
            self.refreshes.lock().remove(&key);
            result
        }
        .boxed()
        .shared()
    }

    /// 재시도 정책이 제한하는 라운드 안에서 라우터에 테이블 요청
    async fn discover(&self, key: &Option<String>, request: RouteRequest) -> DriverResult<RoutingTable> {
        let retry = &self.config.discovery_retry;
        let mut tried: Vec<ServerAddress> = Vec::new();
        let mut attempt = 0;

        loop {
            for router in self.routers_for(key) {
                if let Some(table) = self.discover_via(key, &router, &request).await? {
                    return Ok(table);
                }
                if !tried.contains(&router) {
                    tried.push(router);
                }
            }

            if !retry.has_attempt_after(attempt) {
                break;
            }
            let delay = retry.delay_for(attempt);
            debug!(
                database = database_label(key),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "no router answered, retrying discovery"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }

        Err(DriverError::service_unavailable(format!(
            "Could not perform discovery for {}: no routing server available, tried [{}]",
            database_label(key),
            join(&tried)
        )))
    }

    /// 라우터 하나의 응답. `Ok(None)`이면 다음 라우터로 넘어감
    async fn discover_via(
        &self,
        key: &Option<String>,
        router: &ServerAddress,
        request: &RouteRequest,
    ) -> DriverResult<Option<RoutingTable>> {
        let info = match with_timeout(self.config.discovery_timeout, self.route_via(router, request)).await {
            Ok(info) => info,
            Err(e) if e.is_database_not_found() => {
                return Err(DriverError::routing(format!(
                    "Unable to get a routing table for {}: {}",
                    database_label(key),
                    e
                )))
            }
            Err(DriverError::Protocol(message)) => {
                return Err(DriverError::routing(format!(
                    "Malformed routing response from {}: {}",
                    router, message
                )))
            }
            Err(DriverError::Closed(_)) if !self.shutdown.is_cancelled() => return Ok(None),
            Err(e) if e.is_fatal_during_discovery() => return Err(e),
            Err(e) => {
                warn!(%router, database = database_label(key), error = %e, "routing discovery failed");
                if e.is_connection_failure() {
                    self.forget_router(key, router);
                }
                return Ok(None);
            }
        };

        match RoutingTable::from_routing_info(info, key.clone()) {
            Ok(table) => Ok(Some(table)),
            Err(e) => {
                warn!(%router, error = %e, "router returned an unusable routing table");
                Ok(None)
            }
        }
    }

    async fn route_via(&self, router: &ServerAddress, request: &RouteRequest) -> DriverResult<RoutingInfo> {
        let pool = self.pools.get_or_create(router);
        let mut connection = pool.acquire().await?;
        match connection.route(request).await {
            Ok(info) => Ok(info),
            Err(e) => Err(connection.handle_error(e)),
        }
    }

    /// `key`의 현재 라우터, 그다음 그 안에 없는 시드 라우터
    fn routers_for(&self, key: &Option<String>) -> Vec<ServerAddress> {
        let mut routers = self
            .tables
            .read()
            .get(key)
            .map(|table| table.routers.clone())
            .unwrap_or_default();
        for seed in &self.config.seed_routers {
            if !routers.contains(seed) {
                routers.push(seed.clone());
            }
        }
        routers
    }

    /// 갱신된 테이블을 저장하고, 오래된 테이블과 어느 테이블에도 없는
    /// 서버의 풀을 제거
    fn update_table(&self, key: &Option<String>, table: RoutingTable) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(database = database_label(key), %table, "updated routing table");

        let live: HashSet<ServerAddress> = {
            let mut tables = self.tables.write();
            tables.insert(key.clone(), table);
            let purge_delay = self.config.routing_table_purge_delay;
            tables.retain(|k, t| {
                let keep = k == key || !t.is_expired_for(purge_delay);
                if !keep {
                    debug!(database = database_label(k), "purging routing table");
                }
                keep
            });
            tables
                .values()
                .flat_map(|t| t.all_servers())
                .cloned()
                .collect()
        };

        let seeds = &self.config.seed_routers;
        self.pools
            .retain(|address| live.contains(address) || seeds.contains(address));
    }

    /// 모든 테이블의 리더와 라이터에서 `address`를 제거하고 풀을 닫음
    fn forget(&self, address: &ServerAddress) {
        for table in self.tables.write().values_mut() {
            table.forget(address);
        }
        self.pools.purge(address);
    }

    fn forget_router(&self, key: &Option<String>, router: &ServerAddress) {
        if let Some(table) = self.tables.write().get_mut(key) {
            table.forget_router(router);
        }
        self.pools.purge(router);
    }

    fn error_handler(self: &Arc<Self>, key: Option<String>) -> ErrorHandler {
        let inner = Arc::downgrade(self);
        Arc::new(move |address: &ServerAddress, err: DriverError| match inner.upgrade() {
            Some(inner) => inner.handle_error(&key, address, err),
            None => err,
        })
    }

    fn handle_error(&self, key: &Option<String>, address: &ServerAddress, err: DriverError) -> DriverError {
        if err.is_not_a_leader() {
            warn!(%address, database = database_label(key), "server is no longer a writer");
            if let Some(table) = self.tables.write().get_mut(key) {
                table.forget_writer(address);
                table.expire();
            }
            return DriverError::session_expired(format!(
                "Server at {} no longer accepts writes",
                address
            ));
        }
        if err.is_connection_failure() {
            warn!(%address, error = %err, "lost connection, removing server from routing tables");
            self.forget(address);
            return DriverError::session_expired(format!(
                "Server at {} is no longer available: {}",
                address, err
            ));
        }
        err
    }

    async fn probe_version(&self) -> DriverResult<BoltVersion> {
        let address = self
            .last_success
            .read()
            .clone()
            .unwrap_or_else(|| self.config.address.clone());
        let connection = self.pools.get_or_create(&address).acquire().await?;
        Ok(connection.protocol_version())
    }

    async fn capabilities(&self) -> DriverResult<Capabilities> {
        unless_closed(
            &self.shutdown,
            self.capabilities.get_or_probe(|| self.probe_version()),
        )
        .await
    }

    async fn verify(self: &Arc<Self>, options: VerifyOptions) -> DriverResult<ServerInfo> {
        let VerifyOptions {
            database: key,
            access_mode,
        } = options;
        let table = self
            .fresh_table(&key, access_mode, &Bookmarks::empty(), None, false)
            .await?;
        let servers = table.servers_for(access_mode);
        if servers.is_empty() {
            return Err(DriverError::service_unavailable(format!(
                "No {} server known for {}",
                access_mode,
                database_label(&key)
            )));
        }

        let results = join_all(servers.iter().map(|address| async move {
            let connection = self.pools.get_or_create(address).acquire().await?;
            Ok::<_, DriverError>(connection.server_info())
        }))
        .await;

        let mut failures = Vec::new();
        for (address, result) in servers.iter().zip(results) {
            match result {
                Ok(info) => return Ok(info),
                Err(e) => failures.push(format!("{}: {}", address, e)),
            }
        }
        Err(DriverError::service_unavailable(format!(
            "Could not reach any {} server for {}: {}",
            access_mode,
            database_label(&key),
            failures.join("; ")
        )))
    }

    async fn negotiated_protocol_version(self: &Arc<Self>) -> DriverResult<BoltVersion> {
        let table = self
            .fresh_table(&None, AccessMode::Read, &Bookmarks::empty(), None, false)
            .await?;
        let address = self
            .selector
            .select(AccessMode::Read, &table.readers, |a| self.pools.in_use_count(a))
            .cloned()
            .ok_or_else(|| DriverError::service_unavailable("No reader available"))?;

        let mut connection = connect_with_timeout(
            self.pools.connector(),
            &address,
            self.pools.connection_timeout(),
        )
        .await?;
        let version = connection.protocol_version();
        if let Err(e) = connection.close().await {
            debug!(%address, error = %e, "failed to close probe connection");
        }
        Ok(version)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.refreshes.lock().clear();
        self.tables.write().clear();
        self.pools.close_all().await;
        info!(seed_routers = self.config.seed_routers.len(), "routing provider closed");
    }
}

#[async_trait]
impl ConnectionProvider for RoutingProvider {
    async fn acquire_connection(&self, options: AcquireOptions) -> DriverResult<PooledConnection> {
        unless_closed(&self.inner.shutdown, self.inner.acquire(options)).await
    }

    async fn supports_multi_db(&self) -> DriverResult<bool> {
        Ok(self.inner.capabilities().await?.multi_db)
    }

    async fn supports_transaction_config(&self) -> DriverResult<bool> {
        Ok(self.inner.capabilities().await?.transaction_config)
    }

    async fn supports_user_impersonation(&self) -> DriverResult<bool> {
        Ok(self.inner.capabilities().await?.user_impersonation)
    }

    async fn verify_connectivity_and_get_server_info(
        &self,
        options: VerifyOptions,
    ) -> DriverResult<ServerInfo> {
        unless_closed(&self.inner.shutdown, self.inner.verify(options)).await
    }

    async fn get_negotiated_protocol_version(&self) -> DriverResult<BoltVersion> {
        unless_closed(&self.inner.shutdown, self.inner.negotiated_protocol_version()).await
    }

    async fn close(&self) -> DriverResult<()> {
        self.inner.close().await;
        Ok(())
    }
}

impl Drop for RoutingProvider {
    fn drop(&mut self) {
        // 중단된 갱신이 내부 상태를 잡고 있음
        self.inner.shutdown.cancel();
        self.inner.refreshes.lock().clear();
    }
}

impl fmt::Debug for RoutingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingProvider")
            .field("seed_routers", &self.inner.config.seed_routers)
            .field("routing_policy", &self.inner.selector.policy())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// 특정 시점의 라우팅 프로바이더 카운터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingProviderMetrics {
    pub pool_count: usize,
    pub total_pool_size: usize,
    pub total_idle_connections: usize,
    pub total_in_use_connections: usize,
    pub routing_table_count: usize,
}
