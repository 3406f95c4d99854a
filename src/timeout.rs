//! 타임아웃 경쟁
//!
//! 연결 수립, 핸드셰이크, 디스커버리 요청의 시간을 제한합니다.
//! 제한 시간은 호출자마다 지정합니다.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{DriverError, DriverResult};

/// `operation`을 `timeout` 타이머와 경쟁시킵니다.
///
/// 먼저 끝난 쪽이 결과를 결정합니다. 타이머가 이기면 `on_timeout`이 정확히
/// 한 번 호출되고, 작업은 진행 중인 I/O와 함께 drop되며, 제한 시간을 담은
/// [`DriverError::Timeout`]이 반환됩니다. 작업이 이기면 타이머도 함께
/// drop되어 다시는 발동하지 않습니다.
pub async fn promise_or_timeout<T, F, C>(
    timeout: Duration,
    operation: F,
    on_timeout: Option<C>,
) -> DriverResult<T>
where
    F: Future<Output = DriverResult<T>>,
    C: FnOnce(),
{
    tokio::select! {
        biased;

        result = operation => result,
        _ = tokio::time::sleep(timeout) => {
            if let Some(callback) = on_timeout {
                callback();
            }
            debug!(timeout_ms = timeout.as_millis() as u64, "operation abandoned after timeout");
            Err(DriverError::timeout(timeout))
        }
    }
}

/// 타임아웃 콜백 없는 [`promise_or_timeout`]
pub async fn with_timeout<T, F>(timeout: Duration, operation: F) -> DriverResult<T>
where
    F: Future<Output = DriverResult<T>>,
{
    promise_or_timeout(timeout, operation, None::<fn()>).await
}
