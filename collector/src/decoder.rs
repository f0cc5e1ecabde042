//! Message decoding.
//!
//! Turns one length-delimited IPFIX message into a [`Message`] of typed
//! sets, consulting the template store for data sets and updating it from
//! template sets. Template records become visible to data sets later in
//! the same message.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Buf, Bytes};
use ipfix_wire::{
    read_field, DataType, FieldSpecifier, FieldValue, InformationElement, MessageHeader, SetHeader,
    TemplateRecord, WireError, MIN_DATA_SET_ID, OPTIONS_TEMPLATE_SET_ID, TEMPLATE_SET_ID,
    VARIABLE_LENGTH,
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::session::Transport;
use crate::store::TemplateStore;

/// Decoding failures; logged per message and never forwarded downstream
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Framing failure from the wire codec
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A data set referenced a template that is not in the store
    #[error("no template {template_id} known for observation domain {obs_domain_id}")]
    UnknownTemplate {
        /// Observation domain the data set belongs to
        obs_domain_id: u32,
        /// The referenced template id
        template_id: u16,
    },

    /// A template declared an element the registry does not know
    /// (strict mode only)
    #[error("unknown information element {element_id} in enterprise {enterprise_id}")]
    UnknownElement {
        /// Element id from the field specifier
        element_id: u16,
        /// Private enterprise number, 0 for IANA
        enterprise_id: u32,
    },
}

/// Decoder behavior toggles
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    /// Fail on elements missing from the registry instead of decoding them
    /// as opaque octets
    pub strict_elements: bool,
}

/// An element descriptor paired with its decoded value
#[derive(Debug, Clone, PartialEq)]
pub struct InformationElementWithValue {
    /// The element descriptor from the governing template
    pub element: InformationElement,
    /// The decoded value
    pub value: FieldValue,
}

/// One data record: an ordered sequence of element/value pairs following a
/// template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Fields in template order
    pub fields: Vec<InformationElementWithValue>,
}

impl Record {
    /// Find a field by element name
    pub fn get(&self, name: &str) -> Option<&InformationElementWithValue> {
        self.fields.iter().find(|f| f.element.name == name)
    }
}

/// A decoded set
#[derive(Debug, Clone, PartialEq)]
pub enum Set {
    /// Template set (set id 2)
    Template {
        /// The announced (or withdrawn) template records
        records: Vec<TemplateRecord>,
    },
    /// Options template set (set id 3)
    OptionsTemplate {
        /// The announced (or withdrawn) options template records
        records: Vec<TemplateRecord>,
    },
    /// Data set (set id >= 256)
    Data {
        /// The template id the set was decoded against
        template_id: u16,
        /// Decoded records
        records: Vec<Record>,
    },
}

/// A fully decoded IPFIX message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The validated message header (`version == 10` always holds)
    pub header: MessageHeader,
    /// Sets in wire order
    pub sets: Vec<Set>,
}

impl Message {
    /// Number of data records across all sets of this message
    pub fn record_count(&self) -> usize {
        self.sets
            .iter()
            .map(|set| match set {
                Set::Data { records, .. } => records.len(),
                _ => 0,
            })
            .sum()
    }
}

/// Decode one complete message from `buf`.
///
/// `peer` only informs logging. Template sets mutate `store`; whether an
/// entry gets a TTL follows `transport`. A failure anywhere aborts the
/// whole message and leaves no partially decoded sets visible to the
/// caller, though templates from earlier, fully parsed records remain
/// installed.
pub async fn decode_message(
    mut buf: Bytes,
    peer: SocketAddr,
    transport: Transport,
    store: &TemplateStore,
    options: &DecoderOptions,
) -> Result<Message, DecodeError> {
    let header = MessageHeader::decode(&mut buf)?;
    let mut body = buf.split_to(header.length as usize - MessageHeader::SIZE);
    let now = Instant::now();

    let mut sets = Vec::new();
    while body.has_remaining() {
        let set_header = SetHeader::decode(&mut body)?;
        let set_body = body.split_to(set_header.body_len());

        let set = match set_header.set_id {
            TEMPLATE_SET_ID => {
                decode_template_set(set_body, false, &header, transport, store, options, now)
                    .await?
            }
            OPTIONS_TEMPLATE_SET_ID => {
                decode_template_set(set_body, true, &header, transport, store, options, now)
                    .await?
            }
            id if id >= MIN_DATA_SET_ID => {
                decode_data_set(set_body, id, &header, store, now).await?
            }
            id => return Err(WireError::ReservedSetId(id).into()),
        };
        sets.push(set);
    }

    trace!(
        "decoded message from {}: domain {}, {} sets, {} data records",
        peer,
        header.observation_domain_id,
        sets.len(),
        sets.iter()
            .map(|s| match s {
                Set::Data { records, .. } => records.len(),
                _ => 0,
            })
            .sum::<usize>()
    );

    Ok(Message { header, sets })
}

async fn decode_template_set(
    body: Bytes,
    options_set: bool,
    header: &MessageHeader,
    transport: Transport,
    store: &TemplateStore,
    options: &DecoderOptions,
    now: Instant,
) -> Result<Set, DecodeError> {
    let records = TemplateRecord::decode_set(body, options_set)?;

    for record in &records {
        if record.is_withdrawal() {
            store
                .remove(header.observation_domain_id, record.template_id)
                .await;
            debug!(
                "withdrew template {} from domain {}",
                record.template_id, header.observation_domain_id
            );
            continue;
        }

        let elements = resolve_elements(&record.fields, options)?;
        store
            .add(
                header.observation_domain_id,
                record.template_id,
                elements,
                transport == Transport::Udp,
                now,
            )
            .await;
    }

    Ok(if options_set {
        Set::OptionsTemplate { records }
    } else {
        Set::Template { records }
    })
}

/// Map field specifiers to element descriptors via the registry.
///
/// The length declared by the template overrides the registry's canonical
/// length, so reduced-size and variable-length encodings decode correctly.
fn resolve_elements(
    fields: &[FieldSpecifier],
    options: &DecoderOptions,
) -> Result<Vec<InformationElement>, DecodeError> {
    let registry = ipfix_registry::global();
    fields
        .iter()
        .map(|spec| match registry.lookup(spec.element_id, spec.enterprise_id) {
            Some(element) => {
                let mut element = element.clone();
                element.length = spec.length;
                Ok(element)
            }
            None if options.strict_elements => Err(DecodeError::UnknownElement {
                element_id: spec.element_id,
                enterprise_id: spec.enterprise_id,
            }),
            None => {
                debug!(
                    "element {} of enterprise {} is not in the registry, decoding as octets",
                    spec.element_id, spec.enterprise_id
                );
                Ok(InformationElement::new(
                    &format!("unknown_{}_{}", spec.enterprise_id, spec.element_id),
                    spec.element_id,
                    spec.enterprise_id,
                    DataType::OctetArray,
                    spec.length,
                ))
            }
        })
        .collect()
}

async fn decode_data_set(
    mut body: Bytes,
    set_id: u16,
    header: &MessageHeader,
    store: &TemplateStore,
    now: Instant,
) -> Result<Set, DecodeError> {
    let elements = store
        .get(header.observation_domain_id, set_id, now)
        .await
        .ok_or(DecodeError::UnknownTemplate {
            obs_domain_id: header.observation_domain_id,
            template_id: set_id,
        })?;

    let min_len = min_record_len(&elements);
    let mut records = Vec::new();
    while body.has_remaining() {
        // A trailing run of up to three zero octets aligns the set: it is
        // padding even when a shorter record would fit in it.
        if body.remaining() <= 3 && body.iter().all(|&b| b == 0) {
            break;
        }
        // A nonzero remainder shorter than a record is a truncated record.
        if body.remaining() < min_len {
            return Err(WireError::MalformedDataRecord.into());
        }

        let mut fields = Vec::with_capacity(elements.len());
        for element in &elements {
            let value = read_field(&mut body, element.length, element.data_type)?;
            fields.push(InformationElementWithValue {
                element: element.clone(),
                value,
            });
        }
        records.push(Record { fields });
    }

    Ok(Set::Data {
        template_id: set_id,
        records,
    })
}

/// Smallest possible encoded record size for a template; variable-length
/// fields contribute their one-octet length prefix.
fn min_record_len(elements: &[InformationElement]) -> usize {
    let len: usize = elements
        .iter()
        .map(|e| {
            if e.length == VARIABLE_LENGTH {
                1
            } else {
                e.length as usize
            }
        })
        .sum();
    len.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    // Template announcement for template 256 of observation domain 1:
    // sourceIPv4Address, destinationIPv4Address, destinationNodeName
    // (enterprise 55829, variable-length).
    const TEMPLATE_PACKET: [u8; 40] = [
        0, 10, 0, 40, 95, 154, 107, 127, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, 0, 24, 1, 0, 0, 3, 0, 8, 0,
        4, 0, 12, 0, 4, 128, 101, 255, 255, 0, 0, 220, 186,
    ];

    // Data record for template 256: 1.2.3.4 -> 5.6.7.8, node name "pod1".
    const DATA_PACKET: [u8; 33] = [
        0, 10, 0, 33, 95, 154, 108, 18, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 17, 1, 2, 3, 4, 5, 6, 7,
        8, 4, 112, 111, 100, 49,
    ];

    fn peer() -> SocketAddr {
        "127.0.0.1:4739".parse().unwrap()
    }

    async fn decode(
        bytes: &[u8],
        transport: Transport,
        store: &TemplateStore,
    ) -> Result<Message, DecodeError> {
        decode_message(
            Bytes::from(bytes.to_vec()),
            peer(),
            transport,
            store,
            &DecoderOptions::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_decode_template_message() {
        let store = TemplateStore::new(Duration::ZERO);
        let message = decode(&TEMPLATE_PACKET, Transport::Tcp, &store)
            .await
            .unwrap();

        assert_eq!(message.header.version, 10);
        assert_eq!(message.header.observation_domain_id, 1);
        assert_eq!(message.sets.len(), 1);

        match &message.sets[0] {
            Set::Template { records } => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].template_id, 256);
                assert_eq!(records[0].fields.len(), 3);
            }
            other => panic!("expected template set, got {:?}", other),
        }

        let elements = store.get(1, 256, Instant::now()).await.unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].name, "sourceIPv4Address");
        assert_eq!(elements[1].name, "destinationIPv4Address");
        assert_eq!(elements[2].name, "destinationNodeName");
        assert_eq!(elements[2].enterprise_id, 55829);
        assert_eq!(elements[2].length, 65535);
    }

    #[tokio::test]
    async fn test_decode_rejects_version_9() {
        let store = TemplateStore::new(Duration::ZERO);
        let mut bytes = TEMPLATE_PACKET;
        bytes[1] = 9;

        let err = decode(&bytes, Transport::Tcp, &store).await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Wire(WireError::InvalidVersion(9))
        ));
    }

    #[tokio::test]
    async fn test_malformed_template_leaves_store_unchanged() {
        let store = TemplateStore::new(Duration::ZERO);

        // Well-framed message whose template record cuts the enterprise
        // number of the last field short by two octets.
        let mut bytes = TEMPLATE_PACKET[..38].to_vec();
        bytes[2..4].copy_from_slice(&38u16.to_be_bytes()); // message length
        bytes[18..20].copy_from_slice(&22u16.to_be_bytes()); // set length

        let err = decode(&bytes, Transport::Tcp, &store).await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Wire(WireError::MalformedTemplate)
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_message_shorter_than_declared_length() {
        let store = TemplateStore::new(Duration::ZERO);
        // Declares 40 octets but ends at 38.
        let err = decode(&TEMPLATE_PACKET[..38], Transport::Tcp, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::Wire(WireError::Truncated)));
    }

    #[tokio::test]
    async fn test_data_record_without_template() {
        let store = TemplateStore::new(Duration::ZERO);
        let err = decode(&DATA_PACKET, Transport::Tcp, &store)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DecodeError::UnknownTemplate {
                obs_domain_id: 1,
                template_id: 256
            }
        ));
    }

    #[tokio::test]
    async fn test_decode_data_record() {
        let store = TemplateStore::new(Duration::ZERO);
        decode(&TEMPLATE_PACKET, Transport::Tcp, &store)
            .await
            .unwrap();
        let message = decode(&DATA_PACKET, Transport::Tcp, &store).await.unwrap();

        assert_eq!(message.record_count(), 1);
        let record = match &message.sets[0] {
            Set::Data {
                template_id,
                records,
            } => {
                assert_eq!(*template_id, 256);
                &records[0]
            }
            other => panic!("expected data set, got {:?}", other),
        };

        assert_eq!(
            record.get("sourceIPv4Address").unwrap().value,
            FieldValue::Ipv4Address(Ipv4Addr::new(1, 2, 3, 4))
        );
        assert_eq!(
            record.get("destinationIPv4Address").unwrap().value,
            FieldValue::Ipv4Address(Ipv4Addr::new(5, 6, 7, 8))
        );
        assert_eq!(
            record.get("destinationNodeName").unwrap().value,
            FieldValue::String("pod1".to_string())
        );
    }

    #[tokio::test]
    async fn test_set_padding_not_decoded_as_records() {
        let store = TemplateStore::new(Duration::ZERO);

        // Template 256: a single protocolIdentifier, one octet per record.
        let template = [
            0u8, 10, 0, 28, 95, 154, 107, 127, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, 0, 12, 1, 0, 0, 1,
            0, 4, 0, 1,
        ];
        decode(&template, Transport::Tcp, &store).await.unwrap();

        // One record plus three zero octets aligning the set: one record,
        // not four.
        let padded = [
            0u8, 10, 0, 24, 95, 154, 108, 18, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 8, 6, 0, 0, 0,
        ];
        let message = decode(&padded, Transport::Tcp, &store).await.unwrap();
        assert_eq!(message.record_count(), 1);
        match &message.sets[0] {
            Set::Data { records, .. } => {
                assert_eq!(records[0].fields[0].value, FieldValue::Unsigned8(6));
            }
            other => panic!("expected data set, got {:?}", other),
        }

        // Four nonzero octets are four records, not padding.
        let packed = [
            0u8, 10, 0, 24, 95, 154, 108, 18, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 8, 5, 6, 7, 8,
        ];
        let message = decode(&packed, Transport::Tcp, &store).await.unwrap();
        assert_eq!(message.record_count(), 4);
    }

    #[tokio::test]
    async fn test_template_visible_to_data_set_in_same_message() {
        let store = TemplateStore::new(Duration::ZERO);

        // One message holding the template set followed by its data set.
        let mut bytes = TEMPLATE_PACKET.to_vec();
        bytes.extend_from_slice(&DATA_PACKET[16..]);
        let total = bytes.len() as u16;
        bytes[2..4].copy_from_slice(&total.to_be_bytes());

        let message = decode(&bytes, Transport::Tcp, &store).await.unwrap();
        assert_eq!(message.sets.len(), 2);
        assert_eq!(message.record_count(), 1);
    }

    #[tokio::test]
    async fn test_withdrawal_removes_template() {
        let store = TemplateStore::new(Duration::ZERO);
        decode(&TEMPLATE_PACKET, Transport::Tcp, &store)
            .await
            .unwrap();
        assert!(!store.is_empty().await);

        // Template set holding a single withdrawal record for id 256.
        let mut bytes = vec![0, 10, 0, 24, 95, 154, 108, 18, 0, 0, 0, 0, 0, 0, 0, 1];
        bytes.extend_from_slice(&[0, 2, 0, 8, 1, 0, 0, 0]);

        let message = decode(&bytes, Transport::Tcp, &store).await.unwrap();
        match &message.sets[0] {
            Set::Template { records } => assert!(records[0].is_withdrawal()),
            other => panic!("expected template set, got {:?}", other),
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_reserved_set_id() {
        let store = TemplateStore::new(Duration::ZERO);
        // Set id 100 is in the reserved range.
        let bytes = [
            0u8, 10, 0, 20, 95, 154, 108, 18, 0, 0, 0, 0, 0, 0, 0, 1, 0, 100, 0, 4,
        ];

        let err = decode(&bytes, Transport::Tcp, &store).await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Wire(WireError::ReservedSetId(100))
        ));
    }

    #[tokio::test]
    async fn test_unknown_element_decodes_as_octets() {
        let store = TemplateStore::new(Duration::ZERO);

        // Template 256 with a single element the registry does not know:
        // IANA id 9999, 2 octets.
        let bytes = [
            0u8, 10, 0, 28, 95, 154, 107, 127, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, 0, 12, 1, 0, 0, 1,
            39, 15, 0, 2,
        ];
        decode(&bytes, Transport::Tcp, &store).await.unwrap();

        let elements = store.get(1, 256, Instant::now()).await.unwrap();
        assert_eq!(elements[0].data_type, DataType::OctetArray);
        assert_eq!(elements[0].element_id, 9999);

        // Data record carrying the two opaque octets.
        let data = [
            0u8, 10, 0, 22, 95, 154, 108, 18, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 6, 0xca, 0xfe,
        ];
        let message = decode(&data, Transport::Tcp, &store).await.unwrap();
        match &message.sets[0] {
            Set::Data { records, .. } => {
                assert_eq!(
                    records[0].fields[0].value,
                    FieldValue::Octets(Bytes::from_static(&[0xca, 0xfe]))
                );
            }
            other => panic!("expected data set, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_unknown_element() {
        let store = TemplateStore::new(Duration::ZERO);
        let bytes = [
            0u8, 10, 0, 28, 95, 154, 107, 127, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, 0, 12, 1, 0, 0, 1,
            39, 15, 0, 2,
        ];

        let options = DecoderOptions {
            strict_elements: true,
        };
        let err = decode_message(
            Bytes::from(bytes.to_vec()),
            peer(),
            Transport::Tcp,
            &store,
            &options,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            DecodeError::UnknownElement {
                element_id: 9999,
                enterprise_id: 0
            }
        ));
    }
}
