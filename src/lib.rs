//! # Zeta4G Routing
//!
//! Connection providers for the [Zeta4G](https://github.com/zeta9044/zeta4g)
//! driver: where a session's connection comes from, how a cluster's topology
//! is discovered and kept current, and how bookmarks chain transactions.
//!
//! ## Features
//!
//! - **Direct and routing providers** - `bolt://` talks to one server,
//!   `zeta4g://` follows the cluster per database
//! - **Single-flight discovery** - concurrent callers share one routing refresh
//! - **Connection pooling** - one bounded pool per server address
//! - **Bookmarks** - immutable, de-duplicated causal-consistency tokens
//!
//! ## Basic Usage
//!
//! The wire protocol is supplied by a [`Connector`]; the provider decides
//! which server each connection goes to.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zeta4g_routing::{create_provider, AccessMode, AcquireOptions, Connector, ProviderConfig};
//!
//! # async fn example(connector: Arc<dyn Connector>) -> zeta4g_routing::DriverResult<()> {
//! let config = ProviderConfig::new("zeta4g://server1:7687,server2:7687")?;
//! let provider = create_provider(config, connector);
//!
//! let connection = provider
//!     .acquire_connection(AcquireOptions::new(AccessMode::Write).with_database("movies"))
//!     .await?;
//! println!("writing through {}", connection.address());
//! connection.release();
//!
//! provider.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Bookmarks
//!
//! ```rust
//! use zeta4g_routing::Bookmarks;
//!
//! let first = Bookmarks::from("bm:1");
//! let both = first.merge(&Bookmarks::new(["bm:2", "bm:1"]));
//! assert_eq!(both.len(), 2);
//! ```
//!
//! ## Modules
//!
//! - [`provider`] - Provider contract and the direct provider
//! - [`routing`] - Routing provider, routing tables and selection policies
//! - [`pool`] - Per-address connection pools
//! - [`bolt`] - Protocol versions and the opening handshake

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod bookmarks;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod provider;
pub mod routing;
pub mod timeout;

// Re-exports for convenience
pub use bolt::BoltVersion;
pub use bookmarks::{BeginTransactionParameters, Bookmarks};
pub use config::{ConnectionMode, ProviderConfig, ProviderConfigBuilder, RetryPolicy, ServerAddress};
pub use connection::{Connection, Connector, RouteRequest, RoutingInfo, ServerInfo};
pub use error::{DriverError, DriverResult};
pub use pool::{ConnectionPool, PoolConfig, PoolMetrics, PooledConnection};
pub use provider::{
    create_provider, AccessMode, AcquireOptions, ConnectionProvider, DirectProvider, VerifyOptions,
};
pub use routing::{RoutingPolicy, RoutingProvider, RoutingTable};
pub use timeout::{promise_or_timeout, with_timeout};
