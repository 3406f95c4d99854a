//! Client side of the Bolt version handshake.
//!
//! Works over any byte stream so `Connector` implementations can run it right
//! after the transport is up. Message framing is not handled here.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DriverError, DriverResult};

use super::version::BoltVersion;

/// Bolt magic preamble.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the server's answer.
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

/// Size of the client's opening message: magic plus four proposals.
pub const HANDSHAKE_REQUEST_SIZE: usize = 20;

/// "HTTP" read as a version: the client reached an HTTP endpoint.
const HTTP_MAGIC: [u8; 4] = *b"HTTP";

/// One slot of the handshake: a version plus how many minor versions below it
/// are also acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionProposal {
    /// Highest version of the slot.
    pub version: BoltVersion,
    /// Number of preceding minor versions also accepted.
    pub range: u8,
}

impl VersionProposal {
    /// Proposal for exactly one version.
    pub const fn exact(version: BoltVersion) -> Self {
        Self { version, range: 0 }
    }

    /// Proposal for `version` and the `range` minor versions below it.
    pub const fn with_range(version: BoltVersion, range: u8) -> Self {
        Self { version, range }
    }

    /// Whether `version` falls inside this slot.
    pub fn accepts(&self, version: BoltVersion) -> bool {
        version.major() == self.version.major()
            && version.minor() <= self.version.minor()
            && version.minor() >= self.version.minor().saturating_sub(self.range)
    }
}

/// Proposals sent by default, highest first.
pub const DEFAULT_PROPOSALS: [VersionProposal; 4] = [
    VersionProposal::with_range(BoltVersion::V5_4, 4),
    VersionProposal::with_range(BoltVersion::V4_4, 2),
    VersionProposal::exact(BoltVersion::V4_1),
    VersionProposal::exact(BoltVersion::V3_0),
];

/// Build the opening message. At most four proposals fit; unused slots stay zero.
pub fn build_handshake(proposals: &[VersionProposal]) -> DriverResult<[u8; HANDSHAKE_REQUEST_SIZE]> {
    if proposals.is_empty() || proposals.len() > 4 {
        return Err(DriverError::configuration(format!(
            "Between 1 and 4 version proposals are required, got {}",
            proposals.len()
        )));
    }

    let mut buf = [0u8; HANDSHAKE_REQUEST_SIZE];
    buf[0..4].copy_from_slice(&BOLT_MAGIC);
    for (i, proposal) in proposals.iter().enumerate() {
        let offset = 4 + i * 4;
        buf[offset..offset + 4].copy_from_slice(&proposal.version.to_handshake_bytes(proposal.range));
    }
    Ok(buf)
}

/// Interpret the server's answer against what was proposed.
pub fn parse_handshake_response(
    response: [u8; HANDSHAKE_RESPONSE_SIZE],
    proposals: &[VersionProposal],
) -> DriverResult<BoltVersion> {
    if response == HTTP_MAGIC {
        return Err(DriverError::protocol(
            "Server responded HTTP. Make sure you are not trying to connect to the http endpoint",
        ));
    }
    if response == [0, 0, 0, 0] {
        return Err(DriverError::protocol(
            "Server does not support any proposed Bolt version",
        ));
    }

    let version = BoltVersion::from_handshake_bytes(response).ok_or_else(|| {
        DriverError::protocol(format!(
            "Unknown Bolt version: {}.{}",
            response[3], response[2]
        ))
    })?;

    if !proposals.iter().any(|p| p.accepts(version)) {
        return Err(DriverError::protocol(format!(
            "Server chose Bolt {} which was not proposed",
            version
        )));
    }
    Ok(version)
}

/// Run the handshake on `stream` and return the agreed version.
pub async fn negotiate<S>(stream: &mut S, proposals: &[VersionProposal]) -> DriverResult<BoltVersion>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_handshake(proposals)?;
    stream
        .write_all(&request)
        .await
        .map_err(|e| DriverError::connection(format!("Handshake write failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| DriverError::connection(format!("Handshake flush failed: {}", e)))?;

    let mut response = [0u8; HANDSHAKE_RESPONSE_SIZE];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| DriverError::connection(format!("Handshake read failed: {}", e)))?;

    parse_handshake_response(response, proposals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_handshake() {
        let buf = build_handshake(&DEFAULT_PROPOSALS).unwrap();
        assert_eq!(&buf[0..4], &BOLT_MAGIC);
        assert_eq!(&buf[4..8], &[0, 4, 4, 5]);
        assert_eq!(&buf[8..12], &[0, 2, 4, 4]);
        assert_eq!(&buf[12..16], &[0, 0, 1, 4]);
        assert_eq!(&buf[16..20], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_build_handshake_pads_unused_slots() {
        let buf = build_handshake(&[VersionProposal::exact(BoltVersion::V4_4)]).unwrap();
        assert_eq!(&buf[4..8], &[0, 0, 4, 4]);
        assert!(buf[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_build_handshake_rejects_bad_proposal_count() {
        assert!(build_handshake(&[]).is_err());
        let five = [VersionProposal::exact(BoltVersion::V3_0); 5];
        assert!(build_handshake(&five).is_err());
    }

    #[test]
    fn test_proposal_range() {
        let proposal = VersionProposal::with_range(BoltVersion::V4_4, 2);
        assert!(proposal.accepts(BoltVersion::V4_4));
        assert!(proposal.accepts(BoltVersion::V4_2));
        assert!(!proposal.accepts(BoltVersion::V4_1));
        assert!(!proposal.accepts(BoltVersion::V5_0));

        let wide = VersionProposal::with_range(BoltVersion::V5_4, u8::MAX);
        assert!(wide.accepts(BoltVersion::V5_0));
        assert!(wide.accepts(BoltVersion::V5_4));
        assert!(!wide.accepts(BoltVersion::V4_4));
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(
            parse_handshake_response([0, 0, 3, 4], &DEFAULT_PROPOSALS).unwrap(),
            BoltVersion::V4_3
        );
        assert!(parse_handshake_response([0, 0, 0, 0], &DEFAULT_PROPOSALS).is_err());
        let err = parse_handshake_response(*b"HTTP", &DEFAULT_PROPOSALS).unwrap_err();
        assert!(err.to_string().contains("HTTP"));
        // 4.0 is not covered by the default proposals
        assert!(parse_handshake_response([0, 0, 0, 4], &DEFAULT_PROPOSALS).is_err());
    }

    #[tokio::test]
    async fn test_negotiate_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let server_task = tokio::spawn(async move {
            let mut request = [0u8; HANDSHAKE_REQUEST_SIZE];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[0..4], &BOLT_MAGIC);
            server.write_all(&[0, 0, 4, 4]).await.unwrap();
        });

        let version = negotiate(&mut client, &DEFAULT_PROPOSALS).await.unwrap();
        assert_eq!(version, BoltVersion::V4_4);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_negotiate_server_hangs_up() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let err = negotiate(&mut client, &DEFAULT_PROPOSALS).await.unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
    }
}
