//! Bolt protocol version definitions and the capabilities each version implies.

use std::fmt;

/// Bolt protocol versions understood by the connection layer.
///
/// Discriminants order versions as `major << 16 | minor`, so the derived
/// ordering matches protocol age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum BoltVersion {
    /// Bolt 3.0 - transaction metadata and timeouts
    V3_0 = 0x0003_0000,
    /// Bolt 4.0 - multiple databases
    V4_0 = 0x0004_0000,
    /// Bolt 4.1 - routing context in HELLO
    V4_1 = 0x0004_0001,
    /// Bolt 4.2
    V4_2 = 0x0004_0002,
    /// Bolt 4.3 - ROUTE message
    V4_3 = 0x0004_0003,
    /// Bolt 4.4 - user impersonation
    V4_4 = 0x0004_0004,
    /// Bolt 5.0 - element ids
    V5_0 = 0x0005_0000,
    /// Bolt 5.1 - LOGON/LOGOFF
    V5_1 = 0x0005_0001,
    /// Bolt 5.2 - notification filters
    V5_2 = 0x0005_0002,
    /// Bolt 5.3 - bolt agent
    V5_3 = 0x0005_0003,
    /// Bolt 5.4 - TELEMETRY
    V5_4 = 0x0005_0004,
}

impl BoltVersion {
    /// All versions, newest first.
    pub const ALL: [BoltVersion; 11] = [
        BoltVersion::V5_4,
        BoltVersion::V5_3,
        BoltVersion::V5_2,
        BoltVersion::V5_1,
        BoltVersion::V5_0,
        BoltVersion::V4_4,
        BoltVersion::V4_3,
        BoltVersion::V4_2,
        BoltVersion::V4_1,
        BoltVersion::V4_0,
        BoltVersion::V3_0,
    ];

    /// Look up a version by its numbers.
    pub fn from_parts(major: u8, minor: u8) -> Option<Self> {
        Self::from_u32(((major as u32) << 16) | minor as u32)
    }

    /// Create a BoltVersion from its raw `major << 16 | minor` value.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_u32() == value)
    }

    /// Raw `major << 16 | minor` value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Major version number.
    pub fn major(self) -> u8 {
        ((self as u32) >> 16) as u8
    }

    /// Minor version number.
    pub fn minor(self) -> u8 {
        ((self as u32) & 0xFF) as u8
    }

    /// Handshake encoding: `[0, range, minor, major]`.
    pub fn to_handshake_bytes(self, range: u8) -> [u8; 4] {
        [0, range, self.minor(), self.major()]
    }

    /// Decode a server's handshake answer. The range byte is ignored.
    pub fn from_handshake_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::from_parts(bytes[3], bytes[2])
    }

    /// BEGIN/RUN accept transaction metadata and timeouts.
    pub fn supports_transaction_config(self) -> bool {
        self >= BoltVersion::V3_0
    }

    /// Requests may name a database.
    pub fn supports_multi_database(self) -> bool {
        self >= BoltVersion::V4_0
    }

    /// Requests may run on behalf of another user.
    pub fn supports_user_impersonation(self) -> bool {
        self >= BoltVersion::V4_4
    }

    /// Routing tables are fetched with the ROUTE message instead of a procedure call.
    pub fn supports_route(self) -> bool {
        self >= BoltVersion::V4_3
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parts() {
        assert_eq!(BoltVersion::V4_3.major(), 4);
        assert_eq!(BoltVersion::V4_3.minor(), 3);
        assert_eq!(BoltVersion::from_parts(5, 0), Some(BoltVersion::V5_0));
        assert_eq!(BoltVersion::from_parts(2, 0), None);
        assert_eq!(BoltVersion::from_u32(0x0004_0004), Some(BoltVersion::V4_4));
    }

    #[test]
    fn test_handshake_bytes() {
        assert_eq!(BoltVersion::V4_4.to_handshake_bytes(2), [0, 2, 4, 4]);
        assert_eq!(
            BoltVersion::from_handshake_bytes([0, 0, 3, 4]),
            Some(BoltVersion::V4_3)
        );
        assert_eq!(BoltVersion::from_handshake_bytes([0, 0, 0, 0]), None);
    }

    #[test]
    fn test_version_ordering() {
        assert!(BoltVersion::V5_0 > BoltVersion::V4_4);
        assert!(BoltVersion::V4_0 > BoltVersion::V3_0);
        let mut sorted = BoltVersion::ALL.to_vec();
        sorted.sort();
        sorted.reverse();
        assert_eq!(sorted, BoltVersion::ALL.to_vec());
    }

    #[test]
    fn test_capabilities() {
        assert!(BoltVersion::V3_0.supports_transaction_config());
        assert!(!BoltVersion::V3_0.supports_multi_database());
        assert!(BoltVersion::V4_0.supports_multi_database());
        assert!(!BoltVersion::V4_3.supports_user_impersonation());
        assert!(BoltVersion::V4_4.supports_user_impersonation());
        assert!(!BoltVersion::V4_2.supports_route());
        assert!(BoltVersion::V4_3.supports_route());
    }

    #[test]
    fn test_version_display() {
        assert_eq!(BoltVersion::V3_0.to_string(), "3.0");
        assert_eq!(BoltVersion::V5_4.to_string(), "5.4");
    }
}
