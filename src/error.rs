//! 드라이버 에러 타입
//!
//! 연결 프로바이더, 라우팅, 북마크 처리에서 발생하는 에러를 정의합니다.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// 서버 에러 코드
// ============================================================================

/// 연결 계층이 반응하는 서버 에러 코드
pub mod codes {
    /// 요청한 데이터베이스가 존재하지 않음
    pub const DATABASE_NOT_FOUND: &str = "Neo.ClientError.Database.DatabaseNotFound";
    /// 해당 데이터베이스의 리더가 아님
    pub const NOT_A_LEADER: &str = "Neo.ClientError.Cluster.NotALeader";
    /// 읽기 전용 멤버에 쓰기 시도
    pub const FORBIDDEN_ON_READ_ONLY_DATABASE: &str =
        "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase";
    /// 서버가 북마크를 해석하지 못함
    pub const INVALID_BOOKMARK: &str = "Neo.ClientError.Transaction.InvalidBookmark";
    /// 여러 데이터베이스의 북마크가 섞여 전달됨
    pub const INVALID_BOOKMARK_MIXTURE: &str =
        "Neo.ClientError.Transaction.InvalidBookmarkMixture";
    /// 잘못된 요청 인자 (예: 잘못된 데이터베이스 이름)
    pub const INVALID_ARGUMENT: &str = "Neo.ClientError.Statement.ArgumentError";
    /// 일시적 에러 코드 접두사
    pub const TRANSIENT_PREFIX: &str = "Neo.TransientError";
    /// 보안 에러 코드 접두사
    pub const SECURITY_PREFIX: &str = "Neo.ClientError.Security";
}

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
///
/// 공유된 라우팅 갱신 하나의 결과를 대기 중인 모든 호출자에게 전달할 수
/// 있도록 Clone을 구현합니다.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// 요청한 역할/데이터베이스에 접근 가능한 서버 없음
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 기존 서버를 해당 역할로 더 이상 사용할 수 없음
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 데이터베이스가 없거나 디스커버리 응답이 잘못됨
    #[error("Routing error: {0}")]
    Routing(String),

    /// 잘못된 북마크 입력
    #[error("Invalid bookmark: {0}")]
    InvalidBookmark(String),

    /// 타임아웃 에러
    #[error("Operation timed out in {} ms.", .duration.as_millis())]
    Timeout {
        /// 초과된 제한 시간
        duration: Duration,
    },

    /// 연결 수립 또는 전송 실패
    #[error("Connection error: {0}")]
    Connection(String),

    /// 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 서버 에러
    #[error("Server error: {code} - {message}")]
    Server {
        /// 상태 코드, `Neo.{Classification}.{Category}.{Title}`
        code: String,
        /// 메시지
        message: String,
    },

    /// 협상된 프로토콜에서 지원하지 않는 기능
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// 프로바이더가 닫힘
    #[error("Closed: {0}")]
    Closed(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl DriverError {
    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// 세션 만료 에러 생성
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// 라우팅 에러 생성
    pub fn routing(msg: impl Into<String>) -> Self {
        Self::Routing(msg.into())
    }

    /// 북마크 에러 생성
    pub fn invalid_bookmark(msg: impl Into<String>) -> Self {
        Self::InvalidBookmark(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 서버 에러 생성
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 미지원 기능 에러 생성
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// 닫힘 에러 생성
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 서버 에러인 경우 상태 코드
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            _ => None,
        }
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServiceUnavailable(_)
            | Self::SessionExpired(_)
            | Self::Timeout { .. }
            | Self::Connection(_)
            | Self::Io(_) => true,
            Self::Server { code, .. } => is_retryable_code(code),
            _ => false,
        }
    }

    /// 클라이언트 에러 여부 (재시도하지 않음)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidBookmark(_)
                | Self::Configuration(_)
                | Self::Unsupported(_)
                | Self::Closed(_)
        )
    }

    /// 서버가 요청을 거부한 것이 아니라 연결 자체가 실패했는지 여부
    ///
    /// [`DriverError::Timeout`]은 해당하지 않습니다. 서버가 바쁠 수 있습니다.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_) | Self::ServiceUnavailable(_))
    }

    /// 라우팅 요청의 데이터베이스가 존재하지 않음
    pub fn is_database_not_found(&self) -> bool {
        self.code() == Some(codes::DATABASE_NOT_FOUND)
    }

    /// 서버가 더 이상 쓰기를 받지 않음
    pub fn is_not_a_leader(&self) -> bool {
        matches!(
            self.code(),
            Some(codes::NOT_A_LEADER) | Some(codes::FORBIDDEN_ON_READ_ONLY_DATABASE)
        )
    }

    /// 다음 라우터로 넘어가지 않고 디스커버리를 중단하는 에러
    pub fn is_fatal_during_discovery(&self) -> bool {
        match self {
            Self::Server { code, .. } => {
                code == codes::DATABASE_NOT_FOUND
                    || code == codes::INVALID_BOOKMARK
                    || code == codes::INVALID_BOOKMARK_MIXTURE
                    || code == codes::INVALID_ARGUMENT
                    || code.starts_with(codes::SECURITY_PREFIX)
            }
            Self::Routing(_)
            | Self::InvalidBookmark(_)
            | Self::Unsupported(_)
            | Self::Closed(_)
            | Self::Configuration(_) => true,
            _ => false,
        }
    }
}

fn is_retryable_code(code: &str) -> bool {
    code.starts_with(codes::TRANSIENT_PREFIX)
        || code == codes::NOT_A_LEADER
        || code == codes::FORBIDDEN_ON_READ_ONLY_DATABASE
}

// ============================================================================
// Result 타입
// ============================================================================

/// 드라이버 Result 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// 테스트
// ============================================================================
