// src/agents/diameter/dictionary.rs
//! Built-in AVP dictionary: RFC 6733 base, RFC 4006 Credit-Control and the
//! 3GPP TS 32.299 service information subset used for IMS charging.

pub const VENDOR_3GPP: u32 = 10415;

pub const APP_ID_BASE: u32 = 0;
pub const APP_ID_CREDIT_CONTROL: u32 = 4;

pub const CMD_CAPABILITIES_EXCHANGE: u32 = 257;
pub const CMD_CREDIT_CONTROL: u32 = 272;
pub const CMD_DEVICE_WATCHDOG: u32 = 280;
pub const CMD_DISCONNECT_PEER: u32 = 282;

pub const DIAMETER_SUCCESS: u32 = 2001;
pub const DIAMETER_LIMITED_SUCCESS: u32 = 2002;
pub const DIAMETER_UNABLE_TO_COMPLY: u32 = 5012;
/// Vendor specific result of a failed rating attempt.
pub const DIAMETER_RATING_FAILED: u32 = 5031;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvpType {
    OctetString,
    Integer32,
    Integer64,
    Unsigned32,
    Unsigned64,
    Float32,
    Float64,
    Grouped,
    Address,
    Time,
    Utf8String,
    DiameterIdentity,
    DiameterUri,
    Enumerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvpDef {
    pub code: u32,
    pub vendor_id: u32,
    pub name: &'static str,
    pub avp_type: AvpType,
    pub mandatory: bool,
}

const fn def(code: u32, name: &'static str, avp_type: AvpType) -> AvpDef {
    AvpDef {
        code,
        vendor_id: 0,
        name,
        avp_type,
        mandatory: true,
    }
}

const fn def_3gpp(code: u32, name: &'static str, avp_type: AvpType) -> AvpDef {
    AvpDef {
        code,
        vendor_id: VENDOR_3GPP,
        name,
        avp_type,
        mandatory: true,
    }
}

use AvpType::*;

static DEFINITIONS: &[AvpDef] = &[
    // RFC 6733
    def(1, "User-Name", Utf8String),
    def(55, "Event-Timestamp", Time),
    def(257, "Host-IP-Address", Address),
    def(258, "Auth-Application-Id", Unsigned32),
    def(259, "Acct-Application-Id", Unsigned32),
    def(260, "Vendor-Specific-Application-Id", Grouped),
    def(263, "Session-Id", Utf8String),
    def(264, "Origin-Host", DiameterIdentity),
    def(265, "Supported-Vendor-Id", Unsigned32),
    def(266, "Vendor-Id", Unsigned32),
    def(267, "Firmware-Revision", Unsigned32),
    def(268, "Result-Code", Unsigned32),
    def(269, "Product-Name", Utf8String),
    def(273, "Disconnect-Cause", Enumerated),
    def(278, "Origin-State-Id", Unsigned32),
    def(281, "Error-Message", Utf8String),
    def(283, "Destination-Realm", DiameterIdentity),
    def(293, "Destination-Host", DiameterIdentity),
    def(295, "Termination-Cause", Enumerated),
    def(296, "Origin-Realm", DiameterIdentity),
    def(299, "Inband-Security-Id", Unsigned32),
    // RFC 4006
    def(411, "CC-Correlation-Id", OctetString),
    def(412, "CC-Input-Octets", Unsigned64),
    def(413, "CC-Money", Grouped),
    def(414, "CC-Output-Octets", Unsigned64),
    def(415, "CC-Request-Number", Unsigned32),
    def(416, "CC-Request-Type", Enumerated),
    def(417, "CC-Service-Specific-Units", Unsigned64),
    def(418, "CC-Session-Failover", Enumerated),
    def(420, "CC-Time", Unsigned32),
    def(421, "CC-Total-Octets", Unsigned64),
    def(425, "Currency-Code", Unsigned32),
    def(430, "Final-Unit-Indication", Grouped),
    def(431, "Granted-Service-Unit", Grouped),
    def(432, "Rating-Group", Unsigned32),
    def(436, "Requested-Action", Enumerated),
    def(437, "Requested-Service-Unit", Grouped),
    def(439, "Service-Identifier", Unsigned32),
    def(443, "Subscription-Id", Grouped),
    def(444, "Subscription-Id-Data", Utf8String),
    def(445, "Unit-Value", Grouped),
    def(446, "Used-Service-Unit", Grouped),
    def(447, "Value-Digits", Integer64),
    def(448, "Validity-Time", Unsigned32),
    def(449, "Final-Unit-Action", Enumerated),
    def(450, "Subscription-Id-Type", Enumerated),
    def(455, "Multiple-Services-Indicator", Enumerated),
    def(456, "Multiple-Services-Credit-Control", Grouped),
    def(458, "User-Equipment-Info", Grouped),
    def(459, "User-Equipment-Info-Type", Enumerated),
    def(460, "User-Equipment-Info-Value", OctetString),
    def(461, "Service-Context-Id", Utf8String),
    // 3GPP TS 32.299
    def_3gpp(823, "Event-Type", Grouped),
    def_3gpp(824, "SIP-Method", Utf8String),
    def_3gpp(825, "Event", Utf8String),
    def_3gpp(829, "Role-Of-Node", Enumerated),
    def_3gpp(831, "Calling-Party-Address", Utf8String),
    def_3gpp(832, "Called-Party-Address", Utf8String),
    def_3gpp(833, "Time-Stamps", Grouped),
    def_3gpp(834, "SIP-Request-Timestamp", Time),
    def_3gpp(835, "SIP-Response-Timestamp", Time),
    def_3gpp(838, "Inter-Operator-Identifier", Grouped),
    def_3gpp(839, "Originating-IOI", Utf8String),
    def_3gpp(840, "Terminating-IOI", Utf8String),
    def_3gpp(841, "IMS-Charging-Identifier", Utf8String),
    def_3gpp(862, "Node-Functionality", Enumerated),
    def_3gpp(873, "Service-Information", Grouped),
    def_3gpp(874, "PS-Information", Grouped),
    def_3gpp(876, "IMS-Information", Grouped),
    def_3gpp(1250, "Called-Asserted-Identity", Utf8String),
    def_3gpp(2023, "Carrier-Select-Routing-Information", Utf8String),
];

pub fn by_name(name: &str) -> Option<&'static AvpDef> {
    DEFINITIONS.iter().find(|d| d.name == name)
}

pub fn by_code(code: u32, vendor_id: u32) -> Option<&'static AvpDef> {
    DEFINITIONS
        .iter()
        .find(|d| d.code == code && d.vendor_id == vendor_id)
}

/// Name of a command code for logging.
pub fn command_name(code: u32) -> &'static str {
    match code {
        CMD_CAPABILITIES_EXCHANGE => "Capabilities-Exchange",
        CMD_CREDIT_CONTROL => "Credit-Control",
        CMD_DEVICE_WATCHDOG => "Device-Watchdog",
        CMD_DISCONNECT_PEER => "Disconnect-Peer",
        _ => "Unknown",
    }
}
