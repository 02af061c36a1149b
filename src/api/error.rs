//! Typed failures surfaced by the console core.
//!
//! Connection and I/O errors reach the operator as status notifications;
//! publish errors stay inside the telemetry publisher.
use derive_more::{Display, Error};

use crate::protocol::channel::{ChannelParseError, DigitalArea};

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ConnError {
    /// The device rejected the session or could not be reached.
    #[display("connection to {host} refused: {reason}")]
    Refused { host: String, reason: String },
    /// No answer within the transport's connect bound.
    #[display("connection to {host} timed out after {timeout_ms} ms")]
    Timeout { host: String, timeout_ms: u64 },
    #[display("invalid endpoint: {reason}")]
    InvalidEndpoint { reason: String },
    /// Releasing the handle reported an error; the session is disconnected regardless.
    #[display("release failed: {reason}")]
    Release { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum IoError {
    #[display("not connected")]
    NotConnected,
    /// The device refused the request; the session stays usable.
    #[display("device fault: {reason}")]
    DeviceFault { reason: String },
    /// The transport broke and the session handle was dropped.
    #[display("connection lost: {reason}")]
    ConnectionLost { reason: String },
    #[display("{len} byte(s) at offset {offset} exceed the {area} area")]
    OutOfRange {
        area: DigitalArea,
        offset: u16,
        len: u16,
    },
    #[display("the {area} area is read only")]
    ReadOnlyArea { area: DigitalArea },
    #[display("{_0}")]
    InvalidChannel(ChannelParseError),
}

impl From<ChannelParseError> for IoError {
    fn from(err: ChannelParseError) -> Self {
        IoError::InvalidChannel(err)
    }
}

impl IoError {
    /// Whether the session has been invalidated by this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IoError::ConnectionLost { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum PublishError {
    #[display("network error: {reason}")]
    Network { reason: String },
    #[display("collector answered HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[display("request timed out")]
    Timeout,
    #[display("invalid telemetry URL: {reason}")]
    InvalidUrl { reason: String },
}
