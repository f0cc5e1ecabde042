//! Template and options template records.
//!
//! Template records announce the field layout of later data sets. A record
//! with a field count of zero withdraws the template id instead.

use bytes::{Buf, Bytes};

use crate::WireError;

/// High bit of a field specifier's element id, set when an enterprise
/// number follows
pub const ENTERPRISE_BIT: u16 = 0x8000;

/// Lowest template id an exporter may assign; lower values are reserved
pub const MIN_TEMPLATE_ID: u16 = 256;

/// One field specifier of a template record (RFC 7011 section 3.2)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |E|  Information Element ident. |        Field Length           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Enterprise Number (if E set)             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpecifier {
    /// Information element id, enterprise bit already masked off
    pub element_id: u16,
    /// Encoded field length in octets; 65535 marks variable-length encoding
    pub length: u16,
    /// Private enterprise number, 0 for IANA elements
    pub enterprise_id: u32,
}

impl FieldSpecifier {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 4 {
            return Err(WireError::MalformedTemplate);
        }

        let raw_id = buf.get_u16();
        let length = buf.get_u16();

        let enterprise_id = if raw_id & ENTERPRISE_BIT != 0 {
            if buf.remaining() < 4 {
                return Err(WireError::MalformedTemplate);
            }
            buf.get_u32()
        } else {
            0
        };

        Ok(Self {
            element_id: raw_id & !ENTERPRISE_BIT,
            length,
            enterprise_id,
        })
    }
}

/// A parsed template or options template record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRecord {
    /// Template id in the range 256..=65535
    pub template_id: u16,
    /// Number of leading fields that are scope fields; 0 for plain templates
    pub scope_field_count: u16,
    /// Ordered field specifiers; empty for a withdrawal
    pub fields: Vec<FieldSpecifier>,
}

impl TemplateRecord {
    /// Whether this record withdraws its template id (field count zero)
    pub fn is_withdrawal(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode one record from the front of `buf`.
    ///
    /// `options` selects the options template layout, which carries an
    /// extra scope field count after the record header. Scope semantics are
    /// transparent to decoding; the scope count is only retained.
    pub fn decode(buf: &mut Bytes, options: bool) -> Result<Self, WireError> {
        if buf.remaining() < 4 {
            return Err(WireError::MalformedTemplate);
        }

        let template_id = buf.get_u16();
        if template_id < MIN_TEMPLATE_ID {
            return Err(WireError::MalformedTemplate);
        }

        let field_count = buf.get_u16();
        if field_count == 0 {
            // Withdrawal: no scope count and no specifiers follow.
            return Ok(Self {
                template_id,
                scope_field_count: 0,
                fields: Vec::new(),
            });
        }

        let scope_field_count = if options {
            if buf.remaining() < 2 {
                return Err(WireError::MalformedTemplate);
            }
            let scope = buf.get_u16();
            if scope > field_count {
                return Err(WireError::MalformedTemplate);
            }
            scope
        } else {
            0
        };

        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(FieldSpecifier::decode(buf)?);
        }

        Ok(Self {
            template_id,
            scope_field_count,
            fields,
        })
    }

    /// Decode every record in a template set body.
    ///
    /// Up to three trailing padding octets are ignored.
    pub fn decode_set(mut body: Bytes, options: bool) -> Result<Vec<Self>, WireError> {
        let mut records = Vec::new();
        while body.remaining() > 3 {
            records.push(Self::decode(&mut body, options)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Body of the canonical template set: template 256 with
    // sourceIPv4Address, destinationIPv4Address, and an enterprise
    // variable-length field (pen 55829, element 105).
    const TEMPLATE_BODY: [u8; 20] = [
        1, 0, 0, 3, 0, 8, 0, 4, 0, 12, 0, 4, 128, 101, 255, 255, 0, 0, 220, 186,
    ];

    #[test]
    fn test_template_record_decode() {
        let mut buf = Bytes::from(TEMPLATE_BODY.to_vec());
        let record = TemplateRecord::decode(&mut buf, false).unwrap();

        assert_eq!(record.template_id, 256);
        assert_eq!(record.fields.len(), 3);
        assert!(!record.is_withdrawal());

        assert_eq!(record.fields[0].element_id, 8);
        assert_eq!(record.fields[0].length, 4);
        assert_eq!(record.fields[0].enterprise_id, 0);

        assert_eq!(record.fields[1].element_id, 12);

        assert_eq!(record.fields[2].element_id, 105);
        assert_eq!(record.fields[2].length, 65535);
        assert_eq!(record.fields[2].enterprise_id, 55829);

        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_template_record_truncated_mid_field() {
        // Enterprise bit set on the last field but only two of the four
        // enterprise number octets present.
        let mut buf = Bytes::from(TEMPLATE_BODY[..18].to_vec());
        assert!(matches!(
            TemplateRecord::decode(&mut buf, false),
            Err(WireError::MalformedTemplate)
        ));
    }

    #[test]
    fn test_template_record_rejects_reserved_id() {
        let mut buf = Bytes::from(vec![0, 255, 0, 1, 0, 8, 0, 4]);
        assert!(matches!(
            TemplateRecord::decode(&mut buf, false),
            Err(WireError::MalformedTemplate)
        ));
    }

    #[test]
    fn test_template_withdrawal() {
        let mut buf = Bytes::from(vec![1, 0, 0, 0]);
        let record = TemplateRecord::decode(&mut buf, false).unwrap();
        assert_eq!(record.template_id, 256);
        assert!(record.is_withdrawal());
    }

    #[test]
    fn test_options_template_scope_count() {
        // Options template 257: 2 fields, 1 scope field.
        let mut buf = Bytes::from(vec![1, 1, 0, 2, 0, 1, 0, 149, 0, 4, 0, 41, 0, 8]);
        let record = TemplateRecord::decode(&mut buf, true).unwrap();

        assert_eq!(record.template_id, 257);
        assert_eq!(record.scope_field_count, 1);
        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.fields[0].element_id, 149);
        assert_eq!(record.fields[1].element_id, 41);
    }

    #[test]
    fn test_decode_set_ignores_padding() {
        let mut body = TEMPLATE_BODY.to_vec();
        body.extend_from_slice(&[0, 0]);
        let records = TemplateRecord::decode_set(Bytes::from(body), false).unwrap();
        assert_eq!(records.len(), 1);
    }
}
