//! Information element descriptors and typed field value decoding.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, Bytes};

use crate::WireError;

/// Field length marking RFC 7011 section 7 variable-length encoding
pub const VARIABLE_LENGTH: u16 = 65535;

/// Abstract data types of RFC 7011 section 6.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Unsigned 8-bit integer
    Unsigned8,
    /// Unsigned 16-bit integer
    Unsigned16,
    /// Unsigned 32-bit integer
    Unsigned32,
    /// Unsigned 64-bit integer
    Unsigned64,
    /// Signed 8-bit integer
    Signed8,
    /// Signed 16-bit integer
    Signed16,
    /// Signed 32-bit integer
    Signed32,
    /// Signed 64-bit integer
    Signed64,
    /// IEEE 754 single precision
    Float32,
    /// IEEE 754 double precision
    Float64,
    /// Single octet, 1 = true, 2 = false
    Boolean,
    /// 6-octet MAC address
    MacAddress,
    /// Raw octets
    OctetArray,
    /// UTF-8 string
    String,
    /// Seconds since the UNIX epoch, 4 octets
    DateTimeSeconds,
    /// Milliseconds since the UNIX epoch, 8 octets
    DateTimeMilliseconds,
    /// Microseconds since the UNIX epoch, 8 octets
    DateTimeMicroseconds,
    /// Nanoseconds since the UNIX epoch, 8 octets
    DateTimeNanoseconds,
    /// IPv4 address, 4 octets
    Ipv4Address,
    /// IPv6 address, 16 octets
    Ipv6Address,
    /// RFC 6313 basicList, kept opaque
    BasicList,
    /// RFC 6313 subTemplateList, kept opaque
    SubTemplateList,
    /// RFC 6313 subTemplateMultiList, kept opaque
    SubTemplateMultiList,
}

/// Descriptor of one information element: the unit of the IPFIX data model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationElement {
    /// Element name, e.g. `sourceIPv4Address`
    pub name: String,
    /// Element id within the enterprise namespace
    pub element_id: u16,
    /// Private enterprise number, 0 for IANA elements
    pub enterprise_id: u32,
    /// Abstract data type governing value decoding
    pub data_type: DataType,
    /// Canonical encoded length in octets, or 65535 for variable-length
    pub length: u16,
}

impl InformationElement {
    /// Create a descriptor
    pub fn new(
        name: &str,
        element_id: u16,
        enterprise_id: u32,
        data_type: DataType,
        length: u16,
    ) -> Self {
        Self {
            name: name.to_string(),
            element_id,
            enterprise_id,
            data_type,
            length,
        }
    }
}

/// A decoded field value, representation dictated by [`DataType`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Unsigned 8-bit integer
    Unsigned8(u8),
    /// Unsigned 16-bit integer
    Unsigned16(u16),
    /// Unsigned 32-bit integer
    Unsigned32(u32),
    /// Unsigned 64-bit integer
    Unsigned64(u64),
    /// Signed 8-bit integer
    Signed8(i8),
    /// Signed 16-bit integer
    Signed16(i16),
    /// Signed 32-bit integer
    Signed32(i32),
    /// Signed 64-bit integer
    Signed64(i64),
    /// IEEE 754 single precision
    Float32(f32),
    /// IEEE 754 double precision
    Float64(f64),
    /// Boolean
    Boolean(bool),
    /// MAC address
    MacAddress([u8; 6]),
    /// Raw octets: octetArray, unknown elements, and the list types
    Octets(Bytes),
    /// UTF-8 string
    String(String),
    /// Seconds since the UNIX epoch
    DateTimeSeconds(u32),
    /// Milliseconds since the UNIX epoch
    DateTimeMilliseconds(u64),
    /// Microseconds since the UNIX epoch
    DateTimeMicroseconds(u64),
    /// Nanoseconds since the UNIX epoch
    DateTimeNanoseconds(u64),
    /// IPv4 address
    Ipv4Address(Ipv4Addr),
    /// IPv6 address
    Ipv6Address(Ipv6Addr),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Unsigned8(v) => v.fmt(f),
            FieldValue::Unsigned16(v) => v.fmt(f),
            FieldValue::Unsigned32(v) => v.fmt(f),
            FieldValue::Unsigned64(v) => v.fmt(f),
            FieldValue::Signed8(v) => v.fmt(f),
            FieldValue::Signed16(v) => v.fmt(f),
            FieldValue::Signed32(v) => v.fmt(f),
            FieldValue::Signed64(v) => v.fmt(f),
            FieldValue::Float32(v) => v.fmt(f),
            FieldValue::Float64(v) => v.fmt(f),
            FieldValue::Boolean(v) => v.fmt(f),
            FieldValue::MacAddress(m) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                m[0], m[1], m[2], m[3], m[4], m[5]
            ),
            FieldValue::Octets(b) => {
                for byte in b.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            FieldValue::String(s) => s.fmt(f),
            FieldValue::DateTimeSeconds(v) => v.fmt(f),
            FieldValue::DateTimeMilliseconds(v) => v.fmt(f),
            FieldValue::DateTimeMicroseconds(v) => v.fmt(f),
            FieldValue::DateTimeNanoseconds(v) => v.fmt(f),
            FieldValue::Ipv4Address(a) => a.fmt(f),
            FieldValue::Ipv6Address(a) => a.fmt(f),
        }
    }
}

/// Read a variable-length field's length prefix from the front of `buf`.
///
/// One octet holds lengths below 255; the escape value 255 is followed by
/// the real length in two octets.
pub fn read_variable_length(buf: &mut Bytes) -> Result<usize, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::MalformedDataRecord);
    }
    let short = buf.get_u8();
    if short < 255 {
        return Ok(short as usize);
    }
    if buf.remaining() < 2 {
        return Err(WireError::MalformedDataRecord);
    }
    Ok(buf.get_u16() as usize)
}

/// Read one field value from the front of `buf`.
///
/// `length` is the field length declared by the template; 65535 selects
/// variable-length encoding. Fixed-length integers may use the RFC 7011
/// section 6.2 reduced-size encoding.
pub fn read_field(
    buf: &mut Bytes,
    length: u16,
    data_type: DataType,
) -> Result<FieldValue, WireError> {
    let len = if length == VARIABLE_LENGTH {
        read_variable_length(buf)?
    } else {
        length as usize
    };

    if buf.remaining() < len {
        return Err(WireError::MalformedDataRecord);
    }
    let data = buf.split_to(len);
    decode_value(data_type, data)
}

fn decode_value(data_type: DataType, data: Bytes) -> Result<FieldValue, WireError> {
    let value = match data_type {
        DataType::Unsigned8 => FieldValue::Unsigned8(be_uint(&data, 1)? as u8),
        DataType::Unsigned16 => FieldValue::Unsigned16(be_uint(&data, 2)? as u16),
        DataType::Unsigned32 => FieldValue::Unsigned32(be_uint(&data, 4)? as u32),
        DataType::Unsigned64 => FieldValue::Unsigned64(be_uint(&data, 8)?),
        DataType::Signed8 => FieldValue::Signed8(be_int(&data, 1)? as i8),
        DataType::Signed16 => FieldValue::Signed16(be_int(&data, 2)? as i16),
        DataType::Signed32 => FieldValue::Signed32(be_int(&data, 4)? as i32),
        DataType::Signed64 => FieldValue::Signed64(be_int(&data, 8)?),
        DataType::Float32 => {
            let bytes: [u8; 4] = data
                .as_ref()
                .try_into()
                .map_err(|_| WireError::MalformedDataRecord)?;
            FieldValue::Float32(f32::from_be_bytes(bytes))
        }
        DataType::Float64 => {
            let bytes: [u8; 8] = data
                .as_ref()
                .try_into()
                .map_err(|_| WireError::MalformedDataRecord)?;
            FieldValue::Float64(f64::from_be_bytes(bytes))
        }
        DataType::Boolean => match data.as_ref() {
            [1] => FieldValue::Boolean(true),
            [2] => FieldValue::Boolean(false),
            _ => return Err(WireError::MalformedDataRecord),
        },
        DataType::MacAddress => {
            let mac: [u8; 6] = data
                .as_ref()
                .try_into()
                .map_err(|_| WireError::MalformedDataRecord)?;
            FieldValue::MacAddress(mac)
        }
        DataType::OctetArray
        | DataType::BasicList
        | DataType::SubTemplateList
        | DataType::SubTemplateMultiList => FieldValue::Octets(data),
        DataType::String => FieldValue::String(String::from_utf8_lossy(&data).into_owned()),
        DataType::DateTimeSeconds => FieldValue::DateTimeSeconds(be_uint(&data, 4)? as u32),
        DataType::DateTimeMilliseconds => FieldValue::DateTimeMilliseconds(be_uint(&data, 8)?),
        DataType::DateTimeMicroseconds => FieldValue::DateTimeMicroseconds(be_uint(&data, 8)?),
        DataType::DateTimeNanoseconds => FieldValue::DateTimeNanoseconds(be_uint(&data, 8)?),
        DataType::Ipv4Address => {
            let octets: [u8; 4] = data
                .as_ref()
                .try_into()
                .map_err(|_| WireError::MalformedDataRecord)?;
            FieldValue::Ipv4Address(Ipv4Addr::from(octets))
        }
        DataType::Ipv6Address => {
            let octets: [u8; 16] = data
                .as_ref()
                .try_into()
                .map_err(|_| WireError::MalformedDataRecord)?;
            FieldValue::Ipv6Address(Ipv6Addr::from(octets))
        }
    };
    Ok(value)
}

fn be_uint(data: &[u8], max_len: usize) -> Result<u64, WireError> {
    if data.is_empty() || data.len() > max_len {
        return Err(WireError::MalformedDataRecord);
    }
    let mut value = 0u64;
    for &byte in data {
        value = (value << 8) | u64::from(byte);
    }
    Ok(value)
}

fn be_int(data: &[u8], max_len: usize) -> Result<i64, WireError> {
    if data.is_empty() || data.len() > max_len {
        return Err(WireError::MalformedDataRecord);
    }
    // Sign-extend from the most significant encoded bit.
    let mut value: i64 = if data[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in data {
        value = (value << 8) | i64::from(byte);
    }
    Ok(value)
}
