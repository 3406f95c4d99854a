//! Bolt protocol pieces the connection layer needs on its own: version
//! identities, the capabilities they imply, and the opening handshake.
//!
//! Message encoding lives with the `Connector` implementation.

pub mod handshake;
pub mod version;

pub use handshake::{
    negotiate, VersionProposal, BOLT_MAGIC, DEFAULT_PROPOSALS, HANDSHAKE_RESPONSE_SIZE,
};
pub use version::BoltVersion;
