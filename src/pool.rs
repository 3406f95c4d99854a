//! 연결 풀
//!
//! 서버 주소마다 풀 하나를 둡니다. 풀은 [`PooledConnection`]을 빌려주고,
//! 반환된 연결을 재사용하며, 동시에 사용 중인 연결 수를 제한합니다.

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ProviderConfig, ServerAddress};
use crate::connection::{Connection, Connector};
use crate::error::{DriverError, DriverResult};
use crate::timeout::with_timeout;

/// 세션이 풀링된 연결에서 관찰한 실패를 받아
/// 세션에 노출할 에러를 반환합니다.
pub(crate) type ErrorHandler = Arc<dyn Fn(&ServerAddress, DriverError) -> DriverError + Send + Sync>;

// ============================================================================
// PoolConfig - 풀 설정
// ============================================================================

/// 주소별 풀 설정
///
/// | 필드 | 기본값 |
/// |-------|---------|
/// | `max_size` | 100 |
/// | `connection_timeout` | 30 s |
/// | `acquisition_timeout` | 60 s |
/// | `max_lifetime` | 1 h |
/// | `idle_timeout` | 5 min |
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 동시에 사용 가능한 최대 연결 수
    pub max_size: usize,
    /// 연결 하나를 여는 데 걸리는 시간 제한
    pub connection_timeout: Duration,
    /// 풀 여유를 기다리는 시간 제한
    pub acquisition_timeout: Duration,
    /// 이보다 오래된 연결은 재사용하지 않음
    pub max_lifetime: Duration,
    /// 이 시간 이상 유휴 상태인 연결은 재사용하지 않음
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            connection_timeout: Duration::from_secs(30),
            acquisition_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&ProviderConfig> for PoolConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_size: config.max_connection_pool_size,
            connection_timeout: config.connection_timeout,
            acquisition_timeout: config.connection_acquisition_timeout,
            ..Self::default()
        }
    }
}

/// 풀 밖에서 `timeout` 제한으로 연결을 엽니다.
///
/// 연결 수립 중 시간이 초과되면 연결 실패로 취급합니다.
pub async fn connect_with_timeout(
    connector: &dyn Connector,
    address: &ServerAddress,
    timeout: Duration,
) -> DriverResult<Box<dyn Connection>> {
    with_timeout(timeout, connector.connect(address, timeout))
        .await
        .map_err(|e| match e {
            DriverError::Timeout { duration } => DriverError::connection(format!(
                "Could not connect to {} within {} ms",
                address,
                duration.as_millis()
            )),
            e => e,
        })
}

/// 기다리지 않고 연결 닫기
fn close_in_background(mut connection: Box<dyn Connection>) {
    if !connection.is_open() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = connection.close().await {
                    debug!(address = %connection.address(), error = %e, "error while closing connection");
                }
            });
        }
        Err(_) => debug!(address = %connection.address(), "no runtime, dropping connection unclosed"),
    }
}

// ============================================================================
// PooledConnection - 풀링된 연결
// ============================================================================

/// 풀에서 빌린 연결
///
/// 내부 [`Connection`]으로 Deref됩니다. [`release`](Self::release) 또는 drop 시
/// 풀로 반환되며, 빌려 있는 동안 닫히거나 실패한 연결은
/// 반환하지 않고 버립니다.
pub struct PooledConnection {
    id: u64,
    connection: Option<Box<dyn Connection>>,
    created_at: Instant,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
    error_handler: Option<ErrorHandler>,
    broken: bool,
}

impl PooledConnection {
    /// 풀 내에서 고유한 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// 이 연결을 사용하다 관찰한 실패를 보고합니다.
    ///
    /// 연결을 소유한 프로바이더가 클러스터 정보를 갱신하고 노출할 에러를
    /// 반환하며, `err`와 다를 수 있습니다. 연결 실패나 중단된 작업이 있으면
    /// 이 연결은 재사용하지 않습니다.
    pub fn handle_error(&mut self, err: DriverError) -> DriverError {
        if err.is_connection_failure() || matches!(err, DriverError::Timeout { .. }) {
            self.broken = true;
        }
        let address = self.pool.address().clone();
        match &self.error_handler {
            Some(handler) => handler(&address, err),
            None => err,
        }
    }

    /// 연결을 풀로 반환
    pub fn release(self) {
        drop(self)
    }

    pub(crate) fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_deref()
            .expect("connection is only taken on drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_deref_mut()
            .expect("connection is only taken on drop")
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("address", self.pool.address())
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.give_back(self.id, connection, self.created_at, self.broken);
        }
    }
}

// ============================================================================
// PoolMetrics - 풀 메트릭
// ============================================================================

/// 특정 시점의 풀 카운터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// 유휴 또는 사용 중인 살아 있는 연결 수
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub total_acquisitions: u64,
    pub total_created: u64,
    pub total_closed: u64,
}

// ============================================================================
// ConnectionPool - 연결 풀
// ============================================================================

struct IdleConnection {
    id: u64,
    connection: Box<dyn Connection>,
    created_at: Instant,
    idle_since: Instant,
}

/// 서버 하나에 대한 연결 풀
pub struct ConnectionPool {
    address: ServerAddress,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    idle: Mutex<VecDeque<IdleConnection>>,
    semaphore: Arc<Semaphore>,
    size: AtomicUsize,
    in_use: AtomicUsize,
    total_created: AtomicU64,
    total_acquisitions: AtomicU64,
    total_closed: AtomicU64,
    next_id: AtomicU64,
    open: AtomicBool,
}

impl ConnectionPool {
    pub fn new(address: ServerAddress, config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size.max(1)));
        Self {
            address,
            config,
            connector,
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            size: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            total_acquisitions: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// 연결 획득 (가능하면 유휴 연결 재사용)
    ///
    /// 풀 여유는 최대 `acquisition_timeout`, 새 연결 수립은 최대
    /// `connection_timeout`까지 기다립니다.
    pub async fn acquire(self: &Arc<Self>) -> DriverResult<PooledConnection> {
        if !self.is_open() {
            return Err(self.closed_error());
        }

        let semaphore = self.semaphore.clone();
        let permit = with_timeout(self.config.acquisition_timeout, async move {
            semaphore
                .acquire_owned()
                .await
                .map_err(|_| DriverError::closed("Connection pool is closed"))
        })
        .await?;

        if !self.is_open() {
            return Err(self.closed_error());
        }

        let (id, connection, created_at) = match self.take_idle() {
            Some(idle) => (idle.id, idle.connection, idle.created_at),
            None => {
                let connection = connect_with_timeout(
                    self.connector.as_ref(),
                    &self.address,
                    self.config.connection_timeout,
                )
                .await?;
                if !self.is_open() {
                    close_in_background(connection);
                    return Err(self.closed_error());
                }
                self.size.fetch_add(1, Ordering::Relaxed);
                self.total_created.fetch_add(1, Ordering::Relaxed);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                debug!(address = %self.address, id, "opened connection");
                (id, connection, Instant::now())
            }
        };

        self.in_use.fetch_add(1, Ordering::Relaxed);
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);

        Ok(PooledConnection {
            id,
            connection: Some(connection),
            created_at,
            pool: self.clone(),
            _permit: permit,
            error_handler: None,
            broken: false,
        })
    }

    fn take_idle(&self) -> Option<IdleConnection> {
        let mut stale = Vec::new();
        let found = {
            let mut idle = self.idle.lock();
            let mut found = None;
            while let Some(entry) = idle.pop_front() {
                if self.is_reusable(entry.connection.as_ref(), entry.created_at, Some(entry.idle_since)) {
                    found = Some(entry);
                    break;
                }
                stale.push(entry.connection);
            }
            found
        };

        for connection in stale {
            self.discard(connection);
        }
        found
    }

    fn is_reusable(
        &self,
        connection: &dyn Connection,
        created_at: Instant,
        idle_since: Option<Instant>,
    ) -> bool {
        connection.is_open()
            && created_at.elapsed() < self.config.max_lifetime
            && idle_since.map_or(true, |t| t.elapsed() < self.config.idle_timeout)
    }

    fn discard(&self, connection: Box<dyn Connection>) {
        self.size.fetch_sub(1, Ordering::Relaxed);
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        close_in_background(connection);
    }

    fn give_back(&self, id: u64, connection: Box<dyn Connection>, created_at: Instant, broken: bool) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);

        if broken || !self.is_open() || !self.is_reusable(connection.as_ref(), created_at, None) {
            self.discard(connection);
            return;
        }

        self.idle.lock().push_back(IdleConnection {
            id,
            connection,
            created_at,
            idle_since: Instant::now(),
        });
    }

    fn closed_error(&self) -> DriverError {
        DriverError::closed(format!("Connection pool for {} is closed", self.address))
    }

    fn shut(&self) -> Option<Vec<Box<dyn Connection>>> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.semaphore.close();

        let drained: Vec<_> = self.idle.lock().drain(..).map(|e| e.connection).collect();
        self.size.fetch_sub(drained.len(), Ordering::Relaxed);
        self.total_closed.fetch_add(drained.len() as u64, Ordering::Relaxed);
        Some(drained)
    }

    /// 유휴 연결을 닫고 이후 획득을 거부합니다. 빌려 간 연결은 반환될 때
    /// 닫힙니다. 두 번 닫아도 아무 일도 일어나지 않습니다.
    pub async fn close(&self) {
        let Some(drained) = self.shut() else {
            return;
        };
        for mut connection in drained {
            if let Err(e) = connection.close().await {
                warn!(address = %self.address, error = %e, "failed to close connection");
            }
        }
        debug!(address = %self.address, "pool closed");
    }

    /// [`close`](Self::close)와 같지만 연결이 닫히기를 기다리지 않음
    pub fn purge(&self) {
        if let Some(drained) = self.shut() {
            drained.into_iter().for_each(close_in_background);
            debug!(address = %self.address, "pool purged");
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            size: self.size.load(Ordering::Relaxed),
            idle: self.idle_count(),
            in_use: self.in_use_count(),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
        }
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// 빌려 간 연결 수 (최소 연결 선택에 사용)
    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("size", &self.size())
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use_count())
            .finish()
    }
}

// ============================================================================
// ConnectionPools - 풀 레지스트리
// ============================================================================

/// 서버 주소별 풀 (처음 사용할 때 생성)
pub(crate) struct ConnectionPools {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    pools: RwLock<HashMap<ServerAddress, Arc<ConnectionPool>>>,
}

impl ConnectionPools {
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn connection_timeout(&self) -> Duration {
        self.config.connection_timeout
    }

    pub fn get_or_create(&self, address: &ServerAddress) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.read().get(address) {
            return pool.clone();
        }

        let mut pools = self.pools.write();
        pools
            .entry(address.clone())
            .or_insert_with(|| {
                Arc::new(ConnectionPool::new(
                    address.clone(),
                    self.config.clone(),
                    self.connector.clone(),
                ))
            })
            .clone()
    }

    /// `address`로 빌려 간 연결 수 (풀이 없으면 0)
    pub fn in_use_count(&self, address: &ServerAddress) -> usize {
        self.pools
            .read()
            .get(address)
            .map_or(0, |pool| pool.in_use_count())
    }

    /// `address`의 풀을 제거하고 유휴 연결을 닫음
    pub fn purge(&self, address: &ServerAddress) {
        let removed = self.pools.write().remove(address);
        if let Some(pool) = removed {
            pool.purge();
        }
    }

    /// `keep`을 만족하지 않는 주소의 풀을 모두 제거
    pub fn retain(&self, keep: impl Fn(&ServerAddress) -> bool) {
        let removed: Vec<_> = {
            let mut pools = self.pools.write();
            let gone: Vec<ServerAddress> = pools.keys().filter(|a| !keep(a)).cloned().collect();
            gone.iter().filter_map(|a| pools.remove(a)).collect()
        };
        for pool in removed {
            debug!(address = %pool.address(), "purging pool of departed server");
            pool.purge();
        }
    }

    pub fn metrics(&self) -> Vec<PoolMetrics> {
        self.pools.read().values().map(|pool| pool.metrics()).collect()
    }

    pub async fn close_all(&self) {
        let pools: Vec<_> = self.pools.write().drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.close().await;
        }
    }
}

// ============================================================================
// 테스트
// ============================================================================
