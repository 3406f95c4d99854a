//! 북마크
//!
//! 커밋된 트랜잭션마다 서버가 발급하는 인과적 일관성 토큰입니다.
//! 세션은 현재 `Bookmarks`를 들고 있다가 쓰기가 성공할 때마다 새 값으로
//! 교체합니다. 값 자체는 변하지 않습니다.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::{DriverError, DriverResult};

static EMPTY_BOOKMARKS: Lazy<Bookmarks> = Lazy::new(|| Bookmarks {
    values: Arc::from(Vec::<String>::new()),
});

// ============================================================================
// Bookmarks - 북마크 집합
// ============================================================================

/// 중복 없는, 순서와 무관한 북마크 토큰 집합
///
/// 토큰은 공유 슬라이스에 있으므로 복제 비용이 낮습니다. 순서와 상관없이
/// 같은 토큰을 가지면 같은 값입니다.
#[derive(Clone, Deserialize)]
#[serde(try_from = "JsonValue")]
pub struct Bookmarks {
    values: Arc<[String]>,
}

impl Bookmarks {
    /// 토큰 시퀀스로부터 생성
    ///
    /// 중복은 하나로 합쳐지고 빈 토큰은 버려집니다. `values()`는 처음 나온
    /// 순서를 유지합니다.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut collected = Vec::new();
        for value in values {
            let value = value.into();
            if !value.is_empty() && seen.insert(value.clone()) {
                collected.push(value);
            }
        }
        Self::from_unique(collected)
    }

    /// 공유 빈 인스턴스
    pub fn empty() -> Self {
        EMPTY_BOOKMARKS.clone()
    }

    /// 느슨한 타입의 입력으로부터 생성: `null`, 문자열, 또는 임의로 중첩된
    /// 문자열 배열. null은 어디에 있든 무시하고, 그 밖의 원소 타입은
    /// 거부합니다.
    pub fn from_json(value: &JsonValue) -> DriverResult<Self> {
        match value {
            JsonValue::Null => Ok(Self::empty()),
            JsonValue::String(token) => Ok(Self::new([token.as_str()])),
            JsonValue::Array(items) => {
                let mut flattened = Vec::new();
                flatten_into(items, &mut flattened)?;
                Ok(Self::new(flattened))
            }
            other => Err(DriverError::invalid_bookmark(format!(
                "Bookmarks should either be a string or a string array, given: '{}'",
                other
            ))),
        }
    }

    fn from_unique(values: Vec<String>) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        Self {
            values: Arc::from(values),
        }
    }

    /// 서버에 보낼 토큰이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 서로 다른 토큰 수
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 전체 토큰
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// 토큰 순회
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.values.iter()
    }

    /// `token` 포함 여부
    pub fn contains(&self, token: &str) -> bool {
        self.values.iter().any(|v| v == token)
    }

    /// 두 집합의 합집합을 새 값으로 반환
    pub fn merge(&self, other: &Bookmarks) -> Bookmarks {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Self::new(self.iter().chain(other.iter()).cloned())
    }

    /// 여러 트랜잭션에서 모은 북마크를 하나의 집합으로 합침
    pub fn merge_all<I>(all: I) -> Bookmarks
    where
        I: IntoIterator<Item = Bookmarks>,
    {
        let mut tokens = Vec::new();
        for bookmarks in all {
            tokens.extend(bookmarks.values.iter().cloned());
        }
        Self::new(tokens)
    }

    /// 트랜잭션 시작 파라미터
    ///
    /// 토큰이 없으면 필드 자체를 생략합니다.
    pub fn as_begin_transaction_parameters(&self) -> BeginTransactionParameters {
        if self.is_empty() {
            return BeginTransactionParameters::default();
        }
        BeginTransactionParameters {
            bookmarks: Some(self.values.to_vec()),
        }
    }

    /// 공유 빈 인스턴스인지 여부
    pub(crate) fn is_shared_empty(&self) -> bool {
        Arc::ptr_eq(&self.values, &EMPTY_BOOKMARKS.values)
    }
}

fn flatten_into(items: &[JsonValue], out: &mut Vec<String>) -> DriverResult<()> {
    for item in items {
        match item {
            JsonValue::Null => {}
            JsonValue::String(token) => out.push(token.clone()),
            JsonValue::Array(nested) => flatten_into(nested, out)?,
            other => {
                return Err(DriverError::invalid_bookmark(format!(
                    "Bookmark value should be a string, given: '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

impl Default for Bookmarks {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Bookmarks {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mine: HashSet<&str> = self.iter().map(String::as_str).collect();
        other.iter().all(|v| mine.contains(v.as_str()))
    }
}

impl Eq for Bookmarks {}

impl fmt::Debug for Bookmarks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.iter()).finish()
    }
}

impl Serialize for Bookmarks {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.values.iter())
    }
}

impl TryFrom<JsonValue> for Bookmarks {
    type Error = DriverError;

    fn try_from(value: JsonValue) -> DriverResult<Self> {
        Self::from_json(&value)
    }
}

impl From<&str> for Bookmarks {
    fn from(token: &str) -> Self {
        Self::new([token])
    }
}

impl From<String> for Bookmarks {
    fn from(token: String) -> Self {
        Self::new([token])
    }
}

impl From<Option<String>> for Bookmarks {
    fn from(token: Option<String>) -> Self {
        token.map(Self::from).unwrap_or_default()
    }
}

impl From<Vec<String>> for Bookmarks {
    fn from(tokens: Vec<String>) -> Self {
        Self::new(tokens)
    }
}

impl From<Vec<&str>> for Bookmarks {
    fn from(tokens: Vec<&str>) -> Self {
        Self::new(tokens)
    }
}

impl<S: Into<String>> FromIterator<S> for Bookmarks {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a Bookmarks {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

// ============================================================================
// BeginTransactionParameters - 트랜잭션 시작 파라미터
// ============================================================================

/// 트랜잭션 시작 메타데이터의 북마크 부분
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BeginTransactionParameters {
    /// 전체 토큰 목록 (북마크가 없으면 생략)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmarks: Option<Vec<String>>,
}

impl BeginTransactionParameters {
    /// 내보낼 필드가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_none()
    }
}

// ============================================================================
// 테스트
// ============================================================================
