//! 단일 서버 프로바이더

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    closed_error, unless_closed, AcquireOptions, CapabilityCache, ConnectionProvider,
    VerifyOptions,
};
use crate::bolt::BoltVersion;
use crate::config::{ProviderConfig, ServerAddress};
use crate::connection::{Connector, ServerInfo};
use crate::error::{DriverError, DriverResult};
use crate::pool::{connect_with_timeout, ConnectionPool, PoolConfig, PooledConnection};

/// 모든 연결은 설정된 주소로 갑니다. 접근 모드와 데이터베이스는
/// 그대로 받아 서버에 맡깁니다.
pub struct DirectProvider {
    address: ServerAddress,
    config: ProviderConfig,
    connector: Arc<dyn Connector>,
    pool: Arc<ConnectionPool>,
    capabilities: CapabilityCache,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl DirectProvider {
    pub fn new(config: ProviderConfig, connector: Arc<dyn Connector>) -> Self {
        let address = config.address.clone();
        let pool = Arc::new(ConnectionPool::new(
            address.clone(),
            PoolConfig::from(&config),
            connector.clone(),
        ));
        Self {
            address,
            config,
            connector,
            pool,
            capabilities: CapabilityCache::new(),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    async fn probe_version(&self) -> DriverResult<BoltVersion> {
        let connection = self.pool.acquire().await?;
        Ok(connection.protocol_version())
    }

    async fn capabilities(&self) -> DriverResult<super::Capabilities> {
        unless_closed(
            &self.shutdown,
            self.capabilities.get_or_probe(|| self.probe_version()),
        )
        .await
    }
}

#[async_trait]
impl ConnectionProvider for DirectProvider {
    async fn acquire_connection(&self, options: AcquireOptions) -> DriverResult<PooledConnection> {
        if self.shutdown.is_cancelled() {
            return Err(closed_error());
        }
        if options.impersonated_user.is_some() && !self.capabilities().await?.user_impersonation {
            return Err(DriverError::unsupported(
                "Impersonation requires a server that supports Bolt 4.4 or newer",
            ));
        }
        unless_closed(&self.shutdown, self.pool.acquire()).await
    }

    async fn supports_multi_db(&self) -> DriverResult<bool> {
        Ok(self.capabilities().await?.multi_db)
    }

    async fn supports_transaction_config(&self) -> DriverResult<bool> {
        Ok(self.capabilities().await?.transaction_config)
    }

    async fn supports_user_impersonation(&self) -> DriverResult<bool> {
        Ok(self.capabilities().await?.user_impersonation)
    }

    async fn verify_connectivity_and_get_server_info(
        &self,
        _options: VerifyOptions,
    ) -> DriverResult<ServerInfo> {
        unless_closed(&self.shutdown, async {
            let connection = self.pool.acquire().await?;
            Ok(connection.server_info())
        })
        .await
    }

    async fn get_negotiated_protocol_version(&self) -> DriverResult<BoltVersion> {
        unless_closed(&self.shutdown, async {
            let mut connection = connect_with_timeout(
                self.connector.as_ref(),
                &self.address,
                self.config.connection_timeout,
            )
            .await?;
            let version = connection.protocol_version();
            if let Err(e) = connection.close().await {
                debug!(address = %self.address, error = %e, "failed to close probe connection");
            }
            Ok(version)
        })
        .await
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.cancel();
        self.pool.close().await;
        debug!(address = %self.address, "direct provider closed");
        Ok(())
    }
}

impl std::fmt::Debug for DirectProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectProvider")
            .field("address", &self.address)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
