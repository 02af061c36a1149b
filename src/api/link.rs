/// Device link traits - the seam between the session and a concrete transport
///
/// A [`Connector`] opens a [`DeviceLink`] to an [`Endpoint`]. The S7 client in
/// `protocol::s7` and the in-memory [`SimulatedPlc`](super::sim::SimulatedPlc)
/// both implement these traits, so everything above the session is transport
/// agnostic.
use async_trait::async_trait;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use super::error::ConnError;
use crate::protocol::channel::DigitalArea;

/// Highest rack number addressable through a TSAP.
pub const MAX_RACK: u8 = 7;
/// Highest slot number addressable through a TSAP.
pub const MAX_SLOT: u8 = 31;

/// Network address of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "ip")]
    pub host: String,
    pub rack: u8,
    pub slot: u8,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, rack: u8, slot: u8) -> Self {
        Self {
            host: host.into(),
            rack,
            slot,
        }
    }

    pub fn validate(&self) -> Result<(), ConnError> {
        if self.host.trim().is_empty() {
            return Err(ConnError::InvalidEndpoint {
                reason: "host is empty".to_string(),
            });
        }
        if self.rack > MAX_RACK {
            return Err(ConnError::InvalidEndpoint {
                reason: format!("rack {} is above {MAX_RACK}", self.rack),
            });
        }
        if self.slot > MAX_SLOT {
            return Err(ConnError::InvalidEndpoint {
                reason: format!("slot {} is above {MAX_SLOT}", self.slot),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (rack {}, slot {})", self.host, self.rack, self.slot)
    }
}

/// Failure reported by a transport while a link is open.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum LinkError {
    /// The byte stream is broken or out of sync; the link must be dropped.
    #[display("transport failure: {reason}")]
    Transport { reason: String },
    /// The device answered and refused the request.
    #[display("request rejected: {reason}")]
    Rejected { reason: String },
    #[display("no reply within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

impl LinkError {
    /// Whether the link can no longer be used after this error.
    pub fn breaks_link(&self) -> bool {
        !matches!(self, LinkError::Rejected { .. })
    }
}

/// An open connection to one device.
///
/// Offsets and lengths are in bytes relative to the start of `area`; callers
/// have already checked them against the area bounds.
#[async_trait]
pub trait DeviceLink: Send {
    async fn read_area(
        &mut self,
        area: DigitalArea,
        offset: u16,
        len: u16,
    ) -> Result<Vec<u8>, LinkError>;

    async fn write_area(
        &mut self,
        area: DigitalArea,
        offset: u16,
        data: &[u8],
    ) -> Result<(), LinkError>;

    /// Release the device handle. The link is unusable afterwards whatever the result.
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// Opens links to devices.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn DeviceLink>, ConnError>;
}
