//! IPFIX (RFC 7011) wire format: message framing, template records, and
//! typed field values.
//!
//! This crate provides the low-level parsing primitives for the IPFIX
//! protocol: the 16-byte message header, set headers, template and options
//! template records, field specifiers with enterprise numbers, and the
//! decoding of field values into their abstract data types.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | Message Header (16B) | version, length, times, id |
//! +----------------------+----------------------------+
//! | Set Header (4B)      | set id + set length        |
//! +----------------------+----------------------------+
//! | records...           | template or data records   |
//! +----------------------+----------------------------+
//! | Set Header (4B)      | next set, until length     |
//! +----------------------+----------------------------+
//! | ...                  |                            |
//! +----------------------+----------------------------+
//! ```
//!
//! Set ids: `2` = template set, `3` = options template set, `256..` = data
//! set referencing a previously announced template id, `4..=255` reserved.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod message;
pub mod template;
pub mod types;

pub use error::WireError;
pub use message::{
    MessageHeader, SetHeader, IPFIX_VERSION, MIN_DATA_SET_ID, OPTIONS_TEMPLATE_SET_ID,
    TEMPLATE_SET_ID,
};
pub use template::{FieldSpecifier, TemplateRecord, ENTERPRISE_BIT, MIN_TEMPLATE_ID};
pub use types::{
    read_field, read_variable_length, DataType, FieldValue, InformationElement, VARIABLE_LENGTH,
};
