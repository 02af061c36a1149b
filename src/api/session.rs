/// Device Session - sole owner of the device link
///
/// All device traffic goes through the four operations here. Every call checks
/// the connection state and the area bounds before touching the link, and a
/// transport break drops the link so the session falls back to disconnected.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use super::{
    error::{ConnError, IoError},
    link::{Connector, DeviceLink, Endpoint, LinkError},
};
use crate::protocol::channel::DigitalArea;

pub struct Session {
    connector: Arc<dyn Connector>,
    endpoint: Option<Endpoint>,
    link: Option<Box<dyn DeviceLink>>,
    connected: Arc<AtomicBool>,
}

impl Session {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            endpoint: None,
            link: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Lock-free view of the connection state for tasks that must not wait on the session.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Endpoint of the current link, if any.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub async fn connect(&mut self, endpoint: Endpoint) -> Result<(), ConnError> {
        if self.is_connected() {
            if let Err(err) = self.disconnect().await {
                log::warn!("Releasing previous link before reconnect failed: {err}");
            }
        }

        let link = self.connector.open(&endpoint).await?;
        log::info!("Session connected to {endpoint}");
        self.link = Some(link);
        self.endpoint = Some(endpoint);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Release the link. The session ends up disconnected even when the release fails.
    pub async fn disconnect(&mut self) -> Result<(), ConnError> {
        let Some(mut link) = self.link.take() else {
            return Ok(());
        };
        self.connected.store(false, Ordering::Release);
        let endpoint = self.endpoint.take();

        match link.close().await {
            Ok(()) => {
                if let Some(endpoint) = endpoint {
                    log::info!("Session disconnected from {endpoint}");
                }
                Ok(())
            }
            Err(err) => {
                log::warn!("Link release reported an error: {err}");
                Err(ConnError::Release {
                    reason: err.to_string(),
                })
            }
        }
    }

    pub async fn read_area(
        &mut self,
        area: DigitalArea,
        offset: u16,
        len: u16,
    ) -> Result<Vec<u8>, IoError> {
        let link = self.link.as_mut().ok_or(IoError::NotConnected)?;
        if !area.contains(offset, len) {
            return Err(IoError::OutOfRange { area, offset, len });
        }

        let result = link.read_area(area, offset, len).await;
        match result {
            Ok(bytes) if bytes.len() == len as usize => Ok(bytes),
            Ok(bytes) => Err(IoError::DeviceFault {
                reason: format!("expected {len} byte(s) from {area}, got {}", bytes.len()),
            }),
            Err(err) => Err(self.on_link_error(err)),
        }
    }

    pub async fn write_area(
        &mut self,
        area: DigitalArea,
        offset: u16,
        data: &[u8],
    ) -> Result<(), IoError> {
        let link = self.link.as_mut().ok_or(IoError::NotConnected)?;
        if !area.is_writable() {
            return Err(IoError::ReadOnlyArea { area });
        }
        let len = u16::try_from(data.len()).unwrap_or(u16::MAX);
        if !area.contains(offset, len) {
            return Err(IoError::OutOfRange { area, offset, len });
        }

        let result = link.write_area(area, offset, data).await;
        result.map_err(|err| self.on_link_error(err))
    }

    fn on_link_error(&mut self, err: LinkError) -> IoError {
        if err.breaks_link() {
            log::error!("Device link broke: {err}");
            self.link = None;
            self.endpoint = None;
            self.connected.store(false, Ordering::Release);
            IoError::ConnectionLost {
                reason: err.to_string(),
            }
        } else {
            IoError::DeviceFault {
                reason: err.to_string(),
            }
        }
    }
}
