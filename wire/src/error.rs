//! Wire format error types.

use thiserror::Error;

/// IPFIX framing errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Message version is not 10
    #[error("unsupported version {0}")]
    InvalidVersion(u16),

    /// Buffer shorter than a declared length
    #[error("truncated message")]
    Truncated,

    /// Set id in the reserved range 4..=255
    #[error("reserved set id {0}")]
    ReservedSetId(u16),

    /// Template record runs past the set boundary or is otherwise invalid
    #[error("malformed template record")]
    MalformedTemplate,

    /// Data record runs past the set boundary or carries an invalid value
    #[error("malformed data record")]
    MalformedDataRecord,
}
