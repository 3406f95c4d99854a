//! 라우팅 정책
//!
//! 역할별 서버 목록에서 서버 하나를 고르는 방법을 정의합니다.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::config::ServerAddress;
use crate::provider::AccessMode;

/// 라우팅 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// 라운드 로빈 (기본값)
    #[default]
    RoundRobin,
    /// 최소 연결 (동률이면 라운드 로빈)
    LeastConnections,
    /// 랜덤
    Random,
}

/// 읽기와 쓰기를 따로 순환하는 서버 선택기
#[derive(Debug)]
pub struct ServerSelector {
    policy: RoutingPolicy,
    readers_index: AtomicUsize,
    writers_index: AtomicUsize,
}

impl ServerSelector {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self {
            policy,
            readers_index: AtomicUsize::new(0),
            writers_index: AtomicUsize::new(0),
        }
    }

    fn index(&self, mode: AccessMode) -> &AtomicUsize {
        match mode {
            AccessMode::Read => &self.readers_index,
            AccessMode::Write => &self.writers_index,
        }
    }

    /// `mode`에 맞는 서버를 `servers`에서 하나 선택
    ///
    /// `in_use`는 주소별로 빌려 간 연결 수를 알려주며
    /// [`RoutingPolicy::LeastConnections`]에서만 사용합니다.
    pub fn select<'a, F>(
        &self,
        mode: AccessMode,
        servers: &'a [ServerAddress],
        in_use: F,
    ) -> Option<&'a ServerAddress>
    where
        F: Fn(&ServerAddress) -> usize,
    {
        if servers.is_empty() {
            return None;
        }

        match self.policy {
            RoutingPolicy::RoundRobin => {
                let index = self.index(mode).fetch_add(1, Ordering::Relaxed);
                Some(&servers[index % servers.len()])
            }
            RoutingPolicy::Random => {
                let index = rand::thread_rng().gen_range(0..servers.len());
                Some(&servers[index])
            }
            RoutingPolicy::LeastConnections => {
                let start = self.index(mode).fetch_add(1, Ordering::Relaxed) % servers.len();
                (0..servers.len())
                    .map(|offset| &servers[(start + offset) % servers.len()])
                    .min_by_key(|s| in_use(s))
            }
        }
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn servers() -> Vec<ServerAddress> {
        vec![
            ServerAddress::new("server1", 7687),
            ServerAddress::new("server2", 7687),
            ServerAddress::new("server3", 7687),
        ]
    }

    fn idle(_: &ServerAddress) -> usize {
        0
    }

    #[test]
    fn test_round_robin_selection() {
        let selector = ServerSelector::new(RoutingPolicy::RoundRobin);
        let servers = servers();

        let picked: Vec<_> = (0..4)
            .map(|_| selector.select(AccessMode::Read, &servers, idle).unwrap().host.clone())
            .collect();
        assert_eq!(picked, vec!["server1", "server2", "server3", "server1"]);
    }

    #[test]
    fn test_round_robin_per_access_mode() {
        let selector = ServerSelector::new(RoutingPolicy::RoundRobin);
        let servers = servers();

        selector.select(AccessMode::Read, &servers, idle);
        selector.select(AccessMode::Read, &servers, idle);

        // 라이터는 리더와 별도로 순환
        let writer = selector.select(AccessMode::Write, &servers, idle).unwrap();
        assert_eq!(writer.host, "server1");
        let reader = selector.select(AccessMode::Read, &servers, idle).unwrap();
        assert_eq!(reader.host, "server3");
    }

    #[test]
    fn test_empty_servers() {
        let selector = ServerSelector::new(RoutingPolicy::RoundRobin);
        assert!(selector.select(AccessMode::Read, &[], idle).is_none());
        assert!(ServerSelector::new(RoutingPolicy::Random).select(AccessMode::Read, &[], idle).is_none());
        assert!(ServerSelector::new(RoutingPolicy::LeastConnections)
            .select(AccessMode::Read, &[], idle)
            .is_none());
    }

    #[test]
    fn test_random_selection() {
        let selector = ServerSelector::new(RoutingPolicy::Random);
        let servers = servers();

        for _ in 0..10 {
            let selected = selector.select(AccessMode::Write, &servers, idle).unwrap();
            assert!(servers.contains(selected));
        }
    }

    #[test]
    fn test_least_connections_selection() {
        let selector = ServerSelector::new(RoutingPolicy::LeastConnections);
        let servers = servers();
        let mut counts: HashMap<ServerAddress, usize> = HashMap::new();
        counts.insert(servers[0].clone(), 2);
        counts.insert(servers[1].clone(), 1);

        let in_use = |s: &ServerAddress| counts.get(s).copied().unwrap_or(0);
        assert_eq!(selector.select(AccessMode::Read, &servers, in_use).unwrap().host, "server3");

        counts.insert(servers[2].clone(), 3);
        let in_use = |s: &ServerAddress| counts.get(s).copied().unwrap_or(0);
        assert_eq!(selector.select(AccessMode::Read, &servers, in_use).unwrap().host, "server2");
    }

    #[test]
    fn test_least_connections_ties_rotate() {
        let selector = ServerSelector::new(RoutingPolicy::LeastConnections);
        let servers = servers();

        let picked: Vec<_> = (0..3)
            .map(|_| selector.select(AccessMode::Read, &servers, idle).unwrap().host.clone())
            .collect();
        assert_eq!(picked, vec!["server1", "server2", "server3"]);
    }

    #[test]
    fn test_selector_policy() {
        assert_eq!(ServerSelector::new(RoutingPolicy::default()).policy(), RoutingPolicy::RoundRobin);
        assert_eq!(
            ServerSelector::new(RoutingPolicy::LeastConnections).policy(),
            RoutingPolicy::LeastConnections
        );
        assert_eq!(ServerSelector::new(RoutingPolicy::Random).policy(), RoutingPolicy::Random);
    }
}
