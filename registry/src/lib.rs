//! Static information-element registry.
//!
//! Maps `(enterprise id, element id)` pairs to [`InformationElement`]
//! descriptors. The registry covers the commonly exported IANA flow
//! elements plus the Kubernetes flow elements of private enterprise 55829,
//! is built once on first access, and is read-only afterwards.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::HashMap;

use ipfix_wire::DataType::*;
use ipfix_wire::{DataType, InformationElement};
use once_cell::sync::Lazy;

/// Private enterprise number of the Kubernetes flow elements
pub const KUBERNETES_PEN: u32 = 55829;

// (element id, name, data type, canonical encoded length)
#[rustfmt::skip]
const IANA_ELEMENTS: &[(u16, &str, DataType, u16)] = &[
    (1,   "octetDeltaCount",             Unsigned64,           8),
    (2,   "packetDeltaCount",            Unsigned64,           8),
    (4,   "protocolIdentifier",          Unsigned8,            1),
    (5,   "ipClassOfService",            Unsigned8,            1),
    (6,   "tcpControlBits",              Unsigned16,           2),
    (7,   "sourceTransportPort",         Unsigned16,           2),
    (8,   "sourceIPv4Address",           Ipv4Address,          4),
    (9,   "sourceIPv4PrefixLength",      Unsigned8,            1),
    (10,  "ingressInterface",            Unsigned32,           4),
    (11,  "destinationTransportPort",    Unsigned16,           2),
    (12,  "destinationIPv4Address",      Ipv4Address,          4),
    (13,  "destinationIPv4PrefixLength", Unsigned8,            1),
    (14,  "egressInterface",             Unsigned32,           4),
    (15,  "ipNextHopIPv4Address",        Ipv4Address,          4),
    (16,  "bgpSourceAsNumber",           Unsigned32,           4),
    (17,  "bgpDestinationAsNumber",      Unsigned32,           4),
    (21,  "flowEndSysUpTime",            Unsigned32,           4),
    (22,  "flowStartSysUpTime",          Unsigned32,           4),
    (23,  "postOctetDeltaCount",         Unsigned64,           8),
    (24,  "postPacketDeltaCount",        Unsigned64,           8),
    (27,  "sourceIPv6Address",           Ipv6Address,          16),
    (28,  "destinationIPv6Address",      Ipv6Address,          16),
    (29,  "sourceIPv6PrefixLength",      Unsigned8,            1),
    (30,  "destinationIPv6PrefixLength", Unsigned8,            1),
    (31,  "flowLabelIPv6",               Unsigned32,           4),
    (32,  "icmpTypeCodeIPv4",            Unsigned16,           2),
    (33,  "igmpType",                    Unsigned8,            1),
    (34,  "samplingInterval",            Unsigned32,           4),
    (36,  "flowActiveTimeout",           Unsigned16,           2),
    (37,  "flowIdleTimeout",             Unsigned16,           2),
    (40,  "exportedOctetTotalCount",     Unsigned64,           8),
    (41,  "exportedMessageTotalCount",   Unsigned64,           8),
    (42,  "exportedFlowRecordTotalCount", Unsigned64,          8),
    (56,  "sourceMacAddress",            MacAddress,           6),
    (57,  "postDestinationMacAddress",   MacAddress,           6),
    (58,  "vlanId",                      Unsigned16,           2),
    (60,  "ipVersion",                   Unsigned8,            1),
    (61,  "flowDirection",               Unsigned8,            1),
    (62,  "ipNextHopIPv6Address",        Ipv6Address,          16),
    (80,  "destinationMacAddress",       MacAddress,           6),
    (81,  "postSourceMacAddress",        MacAddress,           6),
    (82,  "interfaceName",               String,               65535),
    (83,  "interfaceDescription",        String,               65535),
    (85,  "octetTotalCount",             Unsigned64,           8),
    (86,  "packetTotalCount",            Unsigned64,           8),
    (130, "exporterIPv4Address",         Ipv4Address,          4),
    (131, "exporterIPv6Address",         Ipv6Address,          16),
    (136, "flowEndReason",               Unsigned8,            1),
    (138, "observationPointId",          Unsigned64,           8),
    (143, "meteringProcessId",           Unsigned32,           4),
    (144, "exportingProcessId",          Unsigned32,           4),
    (145, "templateId",                  Unsigned16,           2),
    (148, "flowId",                      Unsigned64,           8),
    (149, "observationDomainId",         Unsigned32,           4),
    (150, "flowStartSeconds",            DateTimeSeconds,      4),
    (151, "flowEndSeconds",              DateTimeSeconds,      4),
    (152, "flowStartMilliseconds",       DateTimeMilliseconds, 8),
    (153, "flowEndMilliseconds",         DateTimeMilliseconds, 8),
    (154, "flowStartMicroseconds",       DateTimeMicroseconds, 8),
    (155, "flowEndMicroseconds",         DateTimeMicroseconds, 8),
    (156, "flowStartNanoseconds",        DateTimeNanoseconds,  8),
    (157, "flowEndNanoseconds",          DateTimeNanoseconds,  8),
    (160, "systemInitTimeMilliseconds",  DateTimeMilliseconds, 8),
    (161, "flowDurationMilliseconds",    Unsigned32,           4),
    (176, "icmpTypeIPv4",                Unsigned8,            1),
    (177, "icmpCodeIPv4",                Unsigned8,            1),
    (184, "tcpSequenceNumber",           Unsigned32,           4),
    (185, "tcpAcknowledgementNumber",    Unsigned32,           4),
    (186, "tcpWindowSize",               Unsigned16,           2),
    (189, "ipHeaderLength",              Unsigned8,            1),
    (192, "ipTTL",                       Unsigned8,            1),
    (210, "paddingOctets",               OctetArray,           65535),
    (211, "collectorIPv4Address",        Ipv4Address,          4),
    (212, "collectorIPv6Address",        Ipv6Address,          16),
    (224, "ipTotalLength",               Unsigned64,           8),
    (291, "basicList",                   BasicList,            65535),
    (292, "subTemplateList",             SubTemplateList,      65535),
    (293, "subTemplateMultiList",        SubTemplateMultiList, 65535),
];

#[rustfmt::skip]
const KUBERNETES_ELEMENTS: &[(u16, &str, DataType, u16)] = &[
    (100, "sourcePodNamespace",      String,      65535),
    (101, "sourcePodName",           String,      65535),
    (102, "destinationPodNamespace", String,      65535),
    (103, "destinationPodName",      String,      65535),
    (104, "sourceNodeName",          String,      65535),
    (105, "destinationNodeName",     String,      65535),
    (106, "destinationClusterIPv4",  Ipv4Address, 4),
    (107, "destinationServicePort",  Unsigned16,  2),
];

/// Read-only lookup of information-element descriptors
#[derive(Debug)]
pub struct Registry {
    by_key: HashMap<(u32, u16), InformationElement>,
}

impl Registry {
    fn build() -> Self {
        let mut by_key = HashMap::new();
        for &(id, name, data_type, length) in IANA_ELEMENTS {
            by_key.insert(
                (0, id),
                InformationElement::new(name, id, 0, data_type, length),
            );
        }
        for &(id, name, data_type, length) in KUBERNETES_ELEMENTS {
            by_key.insert(
                (KUBERNETES_PEN, id),
                InformationElement::new(name, id, KUBERNETES_PEN, data_type, length),
            );
        }
        Self { by_key }
    }

    /// Look up an element by id within an enterprise namespace (0 = IANA).
    pub fn lookup(&self, element_id: u16, enterprise_id: u32) -> Option<&InformationElement> {
        self.by_key.get(&(enterprise_id, element_id))
    }

    /// Number of registered elements
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::build);

/// The process-wide registry, built on first access
pub fn global() -> &'static Registry {
    &GLOBAL
}
