use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a protocol run or registry operation can surface.
///
/// Protocol entry points never return partial results: the first violated
/// check aborts the run with exactly one of these.
#[derive(Debug, Error)]
pub enum Error {
    #[error("chain link broken: block expects prev {found}, ledger tip is {expected}")]
    ChainLink { expected: String, found: String },

    #[error("replay rejected at {hop}: {reason}")]
    Replay { hop: String, reason: String },

    #[error("{principal} holds no key usable for {peer}")]
    MissingKey { principal: String, peer: String },

    #[error("signature check failed: {0}")]
    Signature(String),

    #[error("{0} is blacklisted")]
    Blacklisted(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("credential {0} is already revoked")]
    AlreadyRevoked(String),

    #[error("invalid merkle tree: {0}")]
    InvalidTree(String),

    #[error("block {0} is a tombstone, not a certification")]
    PayloadKind(String),

    #[error("authentication failed for {student} at {university}")]
    AuthenticationFailed { student: String, university: String },

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("credential schema violation: {0}")]
    Schema(String),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn replay(hop: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Replay {
            hop: hop.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_key(principal: &str, peer: &str) -> Self {
        Self::MissingKey {
            principal: principal.to_string(),
            peer: peer.to_string(),
        }
    }
}
