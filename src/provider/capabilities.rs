//! 프로토콜 기능 플래그 (프로바이더마다 한 번 결정)

use std::future::Future;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::bolt::BoltVersion;
use crate::error::{DriverError, DriverResult};

/// 클러스터 프로토콜 버전이 허용하는 기능
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub multi_db: bool,
    pub transaction_config: bool,
    pub user_impersonation: bool,
}

impl Capabilities {
    pub fn from_version(version: BoltVersion) -> Self {
        Self {
            multi_db: version.supports_multi_database(),
            transaction_config: version.supports_transaction_config(),
            user_impersonation: version.supports_user_impersonation(),
        }
    }
}

/// 첫 번째 성공한 조회 결과를 캐시합니다.
///
/// 동시 호출자는 이미 실행 중인 조회를 기다립니다. 조회가 실패하면
/// 캐시가 비어 있으므로 다음 호출자가 다시 조회합니다.
#[derive(Debug, Default)]
pub(crate) struct CapabilityCache {
    cell: OnceCell<Capabilities>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Capabilities> {
        self.cell.get().copied()
    }

    /// 캐시된 플래그, 또는 `probe`로 협상한 버전의 플래그
    pub async fn get_or_probe<F, Fut>(&self, probe: F) -> DriverResult<Capabilities>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DriverResult<BoltVersion>>,
    {
        self.cell
            .get_or_try_init(|| async move {
                let version = probe().await?;
                let capabilities = Capabilities::from_version(version);
                debug!(%version, ?capabilities, "resolved protocol capabilities");
                Ok::<_, DriverError>(capabilities)
            })
            .await
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_capabilities_from_version() {
        let caps = Capabilities::from_version(BoltVersion::V3_0);
        assert!(caps.transaction_config);
        assert!(!caps.multi_db);
        assert!(!caps.user_impersonation);

        let caps = Capabilities::from_version(BoltVersion::V4_4);
        assert!(caps.multi_db && caps.transaction_config && caps.user_impersonation);
    }

    #[tokio::test]
    async fn test_probe_runs_once() {
        let cache = CapabilityCache::new();
        let probes = AtomicUsize::new(0);

        for _ in 0..3 {
            let caps = cache
                .get_or_probe(|| async {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Ok(BoltVersion::V4_0)
                })
                .await
                .unwrap();
            assert!(caps.multi_db);
        }
        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(), Some(Capabilities::from_version(BoltVersion::V4_0)));
    }

    #[tokio::test]
    async fn test_failed_probe_is_retried() {
        let cache = CapabilityCache::new();

        let err = cache
            .get_or_probe(|| async { Err(DriverError::connection("refused")) })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
        assert!(cache.get().is_none());

        let caps = cache
            .get_or_probe(|| async { Ok(BoltVersion::V5_0) })
            .await
            .unwrap();
        assert!(caps.user_impersonation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_probe() {
        let cache = Arc::new(CapabilityCache::new());
        let probes = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                let probes = probes.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_probe(|| async move {
                            probes.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(BoltVersion::V4_3)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().unwrap().multi_db);
        }
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }
}
