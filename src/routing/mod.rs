//! 라우팅 모듈
//!
//! 클러스터 환경에서 데이터베이스별 라우팅을 지원합니다.
//!
//! # 개요
//!
//! 라우팅 프로바이더는 `zeta4g://` 시드 라우터를 통해 클러스터에 연결합니다.
//! 읽기 작업은 리더로, 쓰기 작업은 라이터로 보내며, 데이터베이스마다
//! 라우팅 테이블을 따로 유지합니다.
//!
//! # 예시
//!
//! ```ignore
//! use zeta4g_routing::provider::{AccessMode, AcquireOptions, ConnectionProvider};
//! use zeta4g_routing::routing::{RoutingPolicy, RoutingProvider};
//! use zeta4g_routing::ProviderConfig;
//!
//! // 라우팅 프로바이더 생성
//! let config = ProviderConfig::builder("zeta4g://server1:7687,server2:7687")?
//!     .with_routing_policy(RoutingPolicy::LeastConnections)
//!     .build()?;
//! let provider = RoutingProvider::new(config, connector);
//!
//! // 읽기 연결 (리더로 라우팅)
//! let reader = provider
//!     .acquire_connection(AcquireOptions::new(AccessMode::Read).with_database("movies"))
//!     .await?;
//!
//! provider.close().await?;
//! ```

mod policy;
mod provider;
mod table;

pub use policy::{RoutingPolicy, ServerSelector};
pub use provider::{RoutingProvider, RoutingProviderMetrics};
pub use table::{RoutingTable, ServerRole};
