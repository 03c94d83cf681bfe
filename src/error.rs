// src/error.rs
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Error kinds travelling between the session core, the rating engine and the agents.
///
/// The `Display` form of each variant is its wire string, so errors coming back
/// from a remote peer can be matched against it by suffix.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChargingError {
    #[error("NOT_FOUND")]
    NotFound,

    #[error("SERVER_ERROR: {0}")]
    ServerError(String),

    #[error("MANDATORY_IE_MISSING")]
    MandatoryIeMissing,

    #[error("EXISTS")]
    Exists,

    #[error("INSUFFICIENT_CREDIT")]
    InsufficientCredit,

    #[error("UNAUTHORIZED_DESTINATION")]
    UnauthorizedDestination,

    #[error("RATING_PLAN_NOT_FOUND")]
    RatingPlanNotFound,

    #[error("ACCOUNT_NOT_FOUND")]
    AccountNotFound,

    #[error("USER_NOT_FOUND")]
    UserNotFound,

    #[error("ACCOUNT_DISABLED")]
    AccountDisabled,

    #[error("RESOURCE_UNAVAILABLE")]
    ResourceUnavailable,

    #[error("NO_ACTIVE_SESSION")]
    NoActiveSession,

    #[error("ACTIVE_DEBIT_LOOP")]
    ActiveDebitLoop,

    #[error("TIMED_OUT")]
    TimedOut,

    #[error("PARTIALLY_EXECUTED")]
    PartiallyExecuted,

    #[error("UNSUPPORTED_SERVICE_METHOD")]
    UnsupportedServiceMethod,

    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    #[error("PARSER_ERROR: {0}")]
    ParserError(String),

    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),

    #[error("malformed decimal: {0}")]
    MalformedDecimal(String),

    #[error("DIVISION_BY_ZERO")]
    DivisionByZero,

    #[error("CONNECTION_ERROR: {0}")]
    Connection(String),

    #[error("IO_ERROR: {0}")]
    Io(String),

    #[error("CONFIG_ERROR: {0}")]
    Config(String),
}

// Order matters: longer wire strings that embed shorter ones come first.
const KNOWN_TAILS: &[&str] = &[
    "RATING_PLAN_NOT_FOUND",
    "ACCOUNT_NOT_FOUND",
    "USER_NOT_FOUND",
    "NOT_FOUND",
    "MANDATORY_IE_MISSING",
    "EXISTS",
    "INSUFFICIENT_CREDIT",
    "UNAUTHORIZED_DESTINATION",
    "ACCOUNT_DISABLED",
    "RESOURCE_UNAVAILABLE",
    "NO_ACTIVE_SESSION",
    "ACTIVE_DEBIT_LOOP",
    "TIMED_OUT",
    "PARTIALLY_EXECUTED",
    "UNSUPPORTED_SERVICE_METHOD",
];

fn from_tail(tail: &str) -> Option<ChargingError> {
    let err = match tail {
        "RATING_PLAN_NOT_FOUND" => ChargingError::RatingPlanNotFound,
        "ACCOUNT_NOT_FOUND" => ChargingError::AccountNotFound,
        "USER_NOT_FOUND" => ChargingError::UserNotFound,
        "NOT_FOUND" => ChargingError::NotFound,
        "MANDATORY_IE_MISSING" => ChargingError::MandatoryIeMissing,
        "EXISTS" => ChargingError::Exists,
        "INSUFFICIENT_CREDIT" => ChargingError::InsufficientCredit,
        "UNAUTHORIZED_DESTINATION" => ChargingError::UnauthorizedDestination,
        "ACCOUNT_DISABLED" => ChargingError::AccountDisabled,
        "RESOURCE_UNAVAILABLE" => ChargingError::ResourceUnavailable,
        "NO_ACTIVE_SESSION" => ChargingError::NoActiveSession,
        "ACTIVE_DEBIT_LOOP" => ChargingError::ActiveDebitLoop,
        "TIMED_OUT" => ChargingError::TimedOut,
        "PARTIALLY_EXECUTED" => ChargingError::PartiallyExecuted,
        "UNSUPPORTED_SERVICE_METHOD" => ChargingError::UnsupportedServiceMethod,
        _ => return None,
    };
    Some(err)
}

impl ChargingError {
    /// Maps an error string received from a remote peer back onto a known kind.
    ///
    /// Matching is done on the tail of the message, the same way the peer
    /// wraps errors (`SERVER_ERROR: INSUFFICIENT_CREDIT`). Anything unknown
    /// becomes a `ServerError` carrying the original text.
    pub fn from_rpc_message(msg: &str) -> Self {
        let trimmed = msg.trim();
        for tail in KNOWN_TAILS {
            if trimmed.ends_with(tail) {
                if let Some(err) = from_tail(tail) {
                    return err;
                }
            }
        }
        let detail = trimmed
            .strip_prefix("SERVER_ERROR: ")
            .unwrap_or(trimmed)
            .to_string();
        ChargingError::ServerError(detail)
    }

    /// Textual form used at the RPC boundary.
    pub fn to_rpc_string(&self) -> String {
        match self {
            ChargingError::NotFound | ChargingError::ServerError(_) => self.to_string(),
            other => format!("SERVER_ERROR: {}", other),
        }
    }

    /// Errors the debit loop reports to the client with their own reason.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ChargingError::UnauthorizedDestination
                | ChargingError::RatingPlanNotFound
                | ChargingError::AccountDisabled
        )
    }

    fn error_code(&self) -> &str {
        match self {
            ChargingError::NotFound => "not_found",
            ChargingError::ServerError(_) => "server_error",
            ChargingError::MandatoryIeMissing => "mandatory_ie_missing",
            ChargingError::Exists => "exists",
            ChargingError::InsufficientCredit => "insufficient_credit",
            ChargingError::UnauthorizedDestination => "unauthorized_destination",
            ChargingError::RatingPlanNotFound => "rating_plan_not_found",
            ChargingError::AccountNotFound => "account_not_found",
            ChargingError::UserNotFound => "user_not_found",
            ChargingError::AccountDisabled => "account_disabled",
            ChargingError::ResourceUnavailable => "resource_unavailable",
            ChargingError::NoActiveSession => "no_active_session",
            ChargingError::ActiveDebitLoop => "active_debit_loop",
            ChargingError::TimedOut => "timed_out",
            ChargingError::PartiallyExecuted => "partially_executed",
            ChargingError::UnsupportedServiceMethod => "unsupported_service_method",
            ChargingError::InvalidArgument(_) => "invalid_argument",
            ChargingError::ParserError(_) => "parser_error",
            ChargingError::Unsupported(_) => "unsupported",
            ChargingError::MalformedDecimal(_) => "malformed_decimal",
            ChargingError::DivisionByZero => "division_by_zero",
            ChargingError::Connection(_) => "connection_error",
            ChargingError::Io(_) => "io_error",
            ChargingError::Config(_) => "config_error",
        }
    }
}

impl From<std::io::Error> for ChargingError {
    fn from(e: std::io::Error) -> Self {
        ChargingError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ChargingError {
    fn from(e: serde_json::Error) -> Self {
        ChargingError::ParserError(e.to_string())
    }
}

impl ResponseError for ChargingError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        HttpResponse::build(status_code).json(json!({
            "error": self.error_code(),
            "message": self.to_rpc_string(),
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ChargingError::NotFound | ChargingError::NoActiveSession => StatusCode::NOT_FOUND,
            ChargingError::MandatoryIeMissing
            | ChargingError::InvalidArgument(_)
            | ChargingError::ParserError(_)
            | ChargingError::MalformedDecimal(_) => StatusCode::BAD_REQUEST,
            ChargingError::InsufficientCredit
            | ChargingError::UnauthorizedDestination
            | ChargingError::AccountDisabled => StatusCode::FORBIDDEN,
            ChargingError::UnsupportedServiceMethod | ChargingError::Unsupported(_) => {
                StatusCode::NOT_IMPLEMENTED
            }
            ChargingError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            ChargingError::Exists => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
