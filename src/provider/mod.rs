//! 연결 프로바이더
//!
//! 프로바이더는 논리 작업에 연결을 제공합니다. [`DirectProvider`]는
//! 항상 서버 하나와 통신하고, [`RoutingProvider`]는 데이터베이스별로
//! 클러스터 토폴로지를 따릅니다. [`create_provider`]가 URI 스킴에 따라 선택합니다.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bolt::BoltVersion;
use crate::bookmarks::Bookmarks;
use crate::config::{ConnectionMode, ProviderConfig};
use crate::connection::{Connector, ServerInfo};
use crate::error::{DriverError, DriverResult};
use crate::pool::PooledConnection;
use crate::routing::RoutingProvider;

mod capabilities;
mod direct;

pub use capabilities::Capabilities;
pub(crate) use capabilities::CapabilityCache;
pub use direct::DirectProvider;

// ============================================================================
// AccessMode - 접근 모드
// ============================================================================

/// 접근 모드 (읽기/쓰기)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    #[default]
    Read,
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// 옵션
// ============================================================================

/// 기본 데이터베이스에 대해 라우팅이 확정한 이름을 받는 콜백
pub type DatabaseNameCallback = Box<dyn FnOnce(Option<&str>) + Send>;

/// 연결 획득 옵션
#[derive(Default)]
pub struct AcquireOptions {
    pub access_mode: AccessMode,
    /// `None`이면 서버의 기본 데이터베이스
    pub database: Option<String>,
    /// 라우팅 디스커버리에만 전달
    pub bookmarks: Bookmarks,
    pub impersonated_user: Option<String>,
    /// 획득이 끝나기 전 최대 한 번 호출
    pub on_database_name_resolved: Option<DatabaseNameCallback>,
}

impl AcquireOptions {
    pub fn new(access_mode: AccessMode) -> Self {
        Self {
            access_mode,
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_bookmarks(mut self, bookmarks: Bookmarks) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.impersonated_user = Some(user.into());
        self
    }

    pub fn on_database_name_resolved(
        mut self,
        callback: impl FnOnce(Option<&str>) + Send + 'static,
    ) -> Self {
        self.on_database_name_resolved = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for AcquireOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireOptions")
            .field("access_mode", &self.access_mode)
            .field("database", &self.database)
            .field("bookmarks", &self.bookmarks)
            .field("impersonated_user", &self.impersonated_user)
            .field(
                "on_database_name_resolved",
                &self.on_database_name_resolved.is_some(),
            )
            .finish()
    }
}

/// 연결 확인 대상 서버
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    pub database: Option<String>,
    pub access_mode: AccessMode,
}

// ============================================================================
// ConnectionProvider - 연결 프로바이더
// ============================================================================

/// 세션에 연결을 제공하는 프로바이더
///
/// [`close`](Self::close) 이후 다른 모든 메서드는 네트워크에 접근하지 않고
/// [`DriverError::Closed`]로 실패합니다.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// `options`에 맞는 연결 획득
    async fn acquire_connection(&self, options: AcquireOptions) -> DriverResult<PooledConnection>;

    /// 요청에 데이터베이스를 지정할 수 있는지 여부
    async fn supports_multi_db(&self) -> DriverResult<bool>;

    /// 트랜잭션 메타데이터와 타임아웃 지원 여부
    async fn supports_transaction_config(&self) -> DriverResult<bool>;

    /// 다른 사용자 권한으로 요청을 실행할 수 있는지 여부
    async fn supports_user_impersonation(&self) -> DriverResult<bool>;

    /// `options`에 해당하는 모든 서버에 접속해 처음 응답한 서버 정보를 반환
    async fn verify_connectivity_and_get_server_info(
        &self,
        options: VerifyOptions,
    ) -> DriverResult<ServerInfo>;

    /// 새로 연 연결의 프로토콜 버전
    async fn get_negotiated_protocol_version(&self) -> DriverResult<BoltVersion>;

    /// 모든 연결 해제. 두 번 닫아도 아무 일도 일어나지 않습니다.
    async fn close(&self) -> DriverResult<()>;
}

/// 설정된 URI 스킴에 맞는 프로바이더 생성
pub fn create_provider(
    config: ProviderConfig,
    connector: Arc<dyn Connector>,
) -> Arc<dyn ConnectionProvider> {
    match config.mode {
        ConnectionMode::Direct => Arc::new(DirectProvider::new(config, connector)),
        ConnectionMode::Routing => Arc::new(RoutingProvider::new(config, connector)),
    }
}

pub(crate) fn closed_error() -> DriverError {
    DriverError::closed("Connection provider is closed")
}

/// `shutdown`이 먼저 발생하지 않으면 `operation` 실행
pub(crate) async fn unless_closed<T, F>(shutdown: &CancellationToken, operation: F) -> DriverResult<T>
where
    F: Future<Output = DriverResult<T>>,
{
    if shutdown.is_cancelled() {
        return Err(closed_error());
    }
    tokio::select! {
        biased;

        _ = shutdown.cancelled() => Err(closed_error()),
        result = operation => result,
    }
}
