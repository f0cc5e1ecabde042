//! Message and set headers.
//!
//! The message header is the fixed 16-byte preamble of every IPFIX message;
//! set headers delimit the template and data sets that follow it.

use bytes::{Buf, Bytes};

use crate::WireError;

/// Protocol version carried by every IPFIX message
pub const IPFIX_VERSION: u16 = 10;

/// Set id announcing template records
pub const TEMPLATE_SET_ID: u16 = 2;

/// Set id announcing options template records
pub const OPTIONS_TEMPLATE_SET_ID: u16 = 3;

/// Lowest set id that refers to a template (data sets)
pub const MIN_DATA_SET_ID: u16 = 256;

/// Message header (RFC 7011 section 3.1)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Version Number          |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Export Time                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Sequence Number                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Observation Domain ID                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol version, must be 10
    pub version: u16,
    /// Total message length in octets, header included
    pub length: u16,
    /// Seconds since the UNIX epoch at which the message left the exporter
    pub export_time: u32,
    /// Running count of data records sent by this observation domain
    pub sequence_number: u32,
    /// Namespace for the template ids carried in this message
    pub observation_domain_id: u32,
}

impl MessageHeader {
    /// Encoded size in bytes
    pub const SIZE: usize = 16;

    /// Decode the message header from the front of `buf` (big-endian).
    ///
    /// Validates the version and that `buf` holds the full declared message
    /// length.
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let available = buf.remaining();
        if available < Self::SIZE {
            return Err(WireError::Truncated);
        }

        let version = buf.get_u16();
        if version != IPFIX_VERSION {
            return Err(WireError::InvalidVersion(version));
        }

        let length = buf.get_u16();
        if (length as usize) < Self::SIZE || (length as usize) > available {
            return Err(WireError::Truncated);
        }

        Ok(Self {
            version,
            length,
            export_time: buf.get_u32(),
            sequence_number: buf.get_u32(),
            observation_domain_id: buf.get_u32(),
        })
    }
}

/// Set header (RFC 7011 section 3.3.2)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Set ID               |          Length               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetHeader {
    /// Set id; see the set id constants on this module
    pub set_id: u16,
    /// Total set length in octets, this header and padding included
    pub length: u16,
}

impl SetHeader {
    /// Encoded size in bytes
    pub const SIZE: usize = 4;

    /// Decode a set header from the front of `buf`.
    ///
    /// `buf` must be bounded to the enclosing message, so the declared set
    /// length can be validated against the remaining message bytes.
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < Self::SIZE {
            return Err(WireError::Truncated);
        }

        let set_id = buf.get_u16();
        let length = buf.get_u16();
        if (length as usize) < Self::SIZE || (length as usize) - Self::SIZE > buf.remaining() {
            return Err(WireError::Truncated);
        }

        Ok(Self { set_id, length })
    }

    /// Set content length, the header itself excluded
    pub fn body_len(&self) -> usize {
        self.length as usize - Self::SIZE
    }
}
