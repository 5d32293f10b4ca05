//! QMI runtime errors
//!
//! One flat enum covering framing, transport, and per-call failures, in the
//! teacher's `TransportError` style: rich variants with constructor helpers
//! rather than opaque strings, so a caller can match on the failure kind
//! without parsing a message.

use thiserror::Error;

/// Errors raised by the QMUX framer, the device transport, and generated
/// message codecs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QmiError {
    /// First envelope byte was not the QMUX marker `0x01`
    #[error("bad QMUX marker: expected 0x01, got {actual:#04x}")]
    BadMarker { actual: u8 },

    /// The envelope's declared qmux-length exceeds the bytes actually available
    #[error("short frame: qmux-length {declared} exceeds available {available} bytes")]
    ShortFrame { declared: usize, available: usize },

    /// Envelope named a service id with no registered message table
    #[error("unknown service id {service_id}")]
    UnknownService { service_id: u8 },

    /// Envelope named a message id absent from its service's message table
    #[error("unknown message id {message_id} for service {service_id}")]
    UnknownMessage { service_id: u8, message_id: u16 },

    /// A response lacked the mandatory Operation Result TLV (tag 2)
    #[error("response for service {service_id} message {message_id} is missing the Operation Result TLV")]
    MissingOperationResult { service_id: u8, message_id: u16 },

    /// The remote reported a nonzero operation status
    #[error("QMI error {code} ({description})")]
    QmiError { code: u16, description: String },

    /// Operation attempted on a transport that has already been shut down
    #[error("transport is already closed")]
    AlreadyClosed,

    /// CTL refused to allocate a client id for a service
    #[error("CTL refused to allocate a client id for service {service_id}: {reason}")]
    AllocateCidFailed { service_id: u8, reason: String },

    /// Underlying device read/write failure; stored as the transport's terminal error
    #[error("device I/O error: {message}")]
    Io { message: String },

    /// A pending slot was already occupied at the computed correlation id
    ///
    /// Only possible if the transaction-id counter wrapped around while a
    /// call using the same id was still outstanding. Treated as a
    /// programming/capacity error, not a recoverable one.
    #[error("correlation id {correlation_id:#x} is already in flight")]
    CorrelationCollision { correlation_id: u32 },

    /// The reader delivered a message whose concrete type didn't match what
    /// the waiting caller asked for — only possible if a schema's registry
    /// was populated with the wrong factory for a (service, message) pair.
    #[error("decoded message type did not match the expected output type")]
    TypeMismatch,
}

/// Result type alias for QMI runtime operations
pub type QmiResult<T> = std::result::Result<T, QmiError>;

impl QmiError {
    pub fn bad_marker(actual: u8) -> Self {
        Self::BadMarker { actual }
    }

    pub fn short_frame(declared: usize, available: usize) -> Self {
        Self::ShortFrame { declared, available }
    }

    pub fn unknown_service(service_id: u8) -> Self {
        Self::UnknownService { service_id }
    }

    pub fn unknown_message(service_id: u8, message_id: u16) -> Self {
        Self::UnknownMessage {
            service_id,
            message_id,
        }
    }

    pub fn missing_operation_result(service_id: u8, message_id: u16) -> Self {
        Self::MissingOperationResult {
            service_id,
            message_id,
        }
    }

    pub fn qmi_error(code: u16) -> Self {
        Self::QmiError {
            code,
            description: describe_error_code(code).to_string(),
        }
    }

    pub fn allocate_cid_failed(service_id: u8, reason: impl Into<String>) -> Self {
        Self::AllocateCidFailed {
            service_id,
            reason: reason.into(),
        }
    }

    pub fn io(source: &std::io::Error) -> Self {
        Self::Io {
            message: source.to_string(),
        }
    }
}

impl From<std::io::Error> for QmiError {
    fn from(source: std::io::Error) -> Self {
        QmiError::io(&source)
    }
}

/// Human description table for QMI operation-result error codes.
///
/// Not exhaustive — covers the common cellular-modem codes; unrecognized
/// codes fall back to a generic description rather than failing lookup.
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        0 => "SUCCESS",
        1 => "MALFORMED_MSG",
        2 => "NO_MEMORY",
        3 => "INTERNAL",
        5 => "FAULT",
        6 => "INVALID_ARG",
        8 => "ARG_TOO_LONG",
        13 => "MISSING_ARG",
        14 => "CALL_FAILED",
        26 => "INVALID_TRANSACTION_ID",
        29 => "ENCODING",
        31 => "AUTHENTICATION_FAILED",
        41 => "OP_DEVICE_UNSUPPORTED",
        58 => "EXTENDED_INTERNAL",
        69 => "NO_EFFECT",
        _ => "UNKNOWN_QMI_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qmi_error_attaches_known_description() {
        let err = QmiError::qmi_error(14);
        match err {
            QmiError::QmiError { code, description } => {
                assert_eq!(code, 14);
                assert_eq!(description, "CALL_FAILED");
            }
            _ => panic!("expected QmiError variant"),
        }
    }

    #[test]
    fn unknown_code_falls_back() {
        assert_eq!(describe_error_code(9999), "UNKNOWN_QMI_ERROR");
    }
}
