// src/utils/consts.rs
// Field names of the generic event and the CDR projection.
pub const EVENT_NAME: &str = "EventName";
pub const TOR: &str = "ToR";
pub const ACCID: &str = "OriginID";
pub const CGRID: &str = "CGRID";
pub const RUN_ID: &str = "RunID";
pub const DIRECTION: &str = "Direction";
pub const ACCOUNT: &str = "Account";
pub const SUBJECT: &str = "Subject";
pub const TENANT: &str = "Tenant";
pub const CATEGORY: &str = "Category";
pub const DESTINATION: &str = "Destination";
pub const REQTYPE: &str = "RequestType";
pub const SETUP_TIME: &str = "SetupTime";
pub const ANSWER_TIME: &str = "AnswerTime";
pub const USAGE: &str = "Usage";
pub const LAST_USED: &str = "LastUsed";
pub const PDD: &str = "PDD";
pub const SUPPLIER: &str = "Supplier";
pub const DISCONNECT_CAUSE: &str = "DisconnectCause";
pub const CDRHOST: &str = "OriginHost";
pub const CDRSOURCE: &str = "Source";
pub const COST: &str = "Cost";
pub const PARTIAL: &str = "Partial";
pub const INITIAL_ORIGIN_ID: &str = "InitialOriginID";
pub const ORIGIN_ID_PREFIX: &str = "OriginIDPrefix";
pub const SESSION_TTL: &str = "SessionTTL";
pub const SESSION_TTL_LAST_USED: &str = "SessionTTLLastUsed";
pub const SESSION_TTL_USAGE: &str = "SessionTTLUsage";
pub const CGR_FLAGS: &str = "CGRFlags";

pub const PRIMARY_CDR_FIELDS: &[&str] = &[
    CGRID, TOR, ACCID, CDRHOST, CDRSOURCE, REQTYPE, DIRECTION, TENANT, CATEGORY, ACCOUNT,
    SUBJECT, DESTINATION, SETUP_TIME, PDD, ANSWER_TIME, USAGE, SUPPLIER, DISCONNECT_CAUSE,
    COST, RUN_ID, PARTIAL,
];

// Event names.
pub const AUTHORIZATION: &str = "AUTHORIZATION";
pub const LCR: &str = "LCR";

// Types of record.
pub const VOICE: &str = "*voice";
pub const DATA: &str = "*data";
pub const SMS: &str = "*sms";
pub const MMS: &str = "*mms";

// Request types.
pub const META_PREPAID: &str = "*prepaid";
pub const META_POSTPAID: &str = "*postpaid";
pub const META_PSEUDOPREPAID: &str = "*pseudoprepaid";
pub const META_RATED: &str = "*rated";
pub const META_NONE: &str = "*none";

pub const META_DEFAULT: &str = "*default";
pub const META_ANY: &str = "*any";
pub const META_OUT: &str = "*out";
pub const META_USERS: &str = "*users";
pub const META_EMPTY: &str = "*empty";
pub const NOT_AVAILABLE: &str = "n/a";
pub const OK: &str = "OK";

// Session manager identity.
pub const SESSION_MANAGER_SOURCE: &str = "SMR";
pub const SMG_ID: &str = "CGR-DA";
pub const UNIT_TEST: &str = "UNIT_TEST";

// Disconnect reasons sent to clients.
pub const INSUFFICIENT_FUNDS: &str = "INSUFFICIENT_FUNDS";
pub const SYSTEM_ERROR: &str = "SYSTEM_ERROR";

// FreeSWITCH unpark notifications.
pub const FS_AUTH_OK: &str = "+AUTH_OK";
pub const FS_INSUFFICIENT_FUNDS: &str = "-INSUFFICIENT_FUNDS";
pub const FS_SYSTEM_ERROR: &str = "-SYSTEM_ERROR";
pub const FS_MISSING_PARAMETER: &str = "-MISSING_PARAMETER";

pub const INFIELD_SEP: &str = ";";
pub const HIERARCHY_SEP: &str = ">";
pub const STATIC_VALUE_PREFIX: &str = "^";
pub const REGEXP_PREFIX: &str = "~";

pub const ROUNDING_DECIMALS: u32 = 10;
