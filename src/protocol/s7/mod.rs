//! Minimal S7comm client over ISO-on-TCP.
//!
//! Only what the console needs: COTP connect, Setup Communication, and
//! single-item ReadVar / WriteVar on the process-image areas.
pub mod frame;

use async_trait::async_trait;
use bytes::BytesMut;
use std::{io, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use self::frame::FrameError;
use crate::{
    api::{
        error::ConnError,
        link::{Connector, DeviceLink, Endpoint, LinkError},
    },
    protocol::channel::DigitalArea,
};

/// ISO-on-TCP port.
pub const DEFAULT_PORT: u16 = 102;
/// PDU length proposed during Setup Communication.
pub const DEFAULT_PDU_SIZE: u16 = 480;
/// Local TSAP of a programming-device connection.
pub const LOCAL_TSAP: u16 = 0x0100;

const CONNECTION_TYPE_PG: u16 = 0x01;
/// ReadVar/WriteVar overhead inside a PDU.
const RW_OVERHEAD: usize = 18;

/// Remote TSAP addressing the CPU at `rack`/`slot`.
pub fn remote_tsap(rack: u8, slot: u8) -> u16 {
    (CONNECTION_TYPE_PG << 8) | (u16::from(rack) * 0x20 + u16::from(slot))
}

impl From<FrameError> for LinkError {
    fn from(err: FrameError) -> Self {
        if err.is_rejection() {
            LinkError::Rejected {
                reason: err.to_string(),
            }
        } else {
            LinkError::Transport {
                reason: err.to_string(),
            }
        }
    }
}

/// Opens [`S7Link`]s.
#[derive(Debug, Clone)]
pub struct S7Connector {
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
    pdu_size: u16,
}

impl Default for S7Connector {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_millis(3000),
            io_timeout: Duration::from_millis(1000),
            pdu_size: DEFAULT_PDU_SIZE,
        }
    }
}

impl S7Connector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bound for TCP connect plus both handshake round trips.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Bound for each request/reply exchange on an open link.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    async fn establish(&self, endpoint: &Endpoint) -> Result<S7Link, LinkError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), self.port))
            .await
            .map_err(transport)?;
        stream.set_nodelay(true).map_err(transport)?;

        let mut link = S7Link {
            stream,
            io_timeout: self.io_timeout,
            pdu_ref: 0,
            pdu_length: self.pdu_size,
        };
        link.handshake(remote_tsap(endpoint.rack, endpoint.slot), self.pdu_size)
            .await?;
        Ok(link)
    }
}

#[async_trait]
impl Connector for S7Connector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn DeviceLink>, ConnError> {
        endpoint.validate()?;
        log::debug!(
            "Opening S7 link to {}:{} (rack {}, slot {})",
            endpoint.host,
            self.port,
            endpoint.rack,
            endpoint.slot
        );

        match timeout(self.connect_timeout, self.establish(endpoint)).await {
            Ok(Ok(link)) => {
                log::info!(
                    "S7 link to {} established, PDU length {}",
                    endpoint.host,
                    link.pdu_length
                );
                Ok(Box::new(link))
            }
            Ok(Err(err)) => Err(ConnError::Refused {
                host: endpoint.host.clone(),
                reason: err.to_string(),
            }),
            Err(_) => Err(ConnError::Timeout {
                host: endpoint.host.clone(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            }),
        }
    }
}

fn transport(err: io::Error) -> LinkError {
    LinkError::Transport {
        reason: err.to_string(),
    }
}

/// An open S7 connection.
#[derive(Debug)]
pub struct S7Link {
    stream: TcpStream,
    io_timeout: Duration,
    pdu_ref: u16,
    pdu_length: u16,
}

impl S7Link {
    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1).max(1);
        self.pdu_ref
    }

    async fn handshake(&mut self, remote_tsap: u16, pdu_size: u16) -> Result<(), LinkError> {
        let reply = self
            .exchange(&frame::connection_request(LOCAL_TSAP, remote_tsap))
            .await?;
        frame::parse_connection_confirm(&reply)?;

        let pdu_ref = self.next_ref();
        let reply = self
            .exchange(&frame::data_telegram(&frame::setup_communication(
                pdu_ref, pdu_size,
            )))
            .await?;
        self.pdu_length = frame::parse_setup_response(&reply, pdu_ref)?.min(pdu_size);
        Ok(())
    }

    /// Send one telegram and wait for the reply, returning it without its TPKT header.
    async fn exchange(&mut self, telegram: &[u8]) -> Result<BytesMut, LinkError> {
        let timeout_ms = self.io_timeout.as_millis() as u64;
        let stream = &mut self.stream;
        let round_trip = async move {
            stream.write_all(telegram).await?;
            read_telegram(stream).await
        };
        timeout(self.io_timeout, round_trip)
            .await
            .map_err(|_| LinkError::Timeout { timeout_ms })?
            .map_err(transport)
    }

    fn check_fits(&self, len: usize) -> Result<(), LinkError> {
        if len + RW_OVERHEAD > self.pdu_length as usize {
            return Err(LinkError::Rejected {
                reason: format!(
                    "{len} bytes do not fit the negotiated PDU length {}",
                    self.pdu_length
                ),
            });
        }
        Ok(())
    }
}

async fn read_telegram(stream: &mut TcpStream) -> io::Result<BytesMut> {
    let mut header = [0u8; frame::TPKT_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    if header[0] != frame::TPKT_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected TPKT version 0x{:02X}", header[0]),
        ));
    }
    let total = u16::from_be_bytes([header[2], header[3]]) as usize;
    if total <= frame::TPKT_HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("TPKT length {total} is too short"),
        ));
    }
    let mut body = BytesMut::zeroed(total - frame::TPKT_HEADER_LEN);
    stream.read_exact(&mut body).await?;
    Ok(body)
}

#[async_trait]
impl DeviceLink for S7Link {
    async fn read_area(
        &mut self,
        area: DigitalArea,
        offset: u16,
        len: u16,
    ) -> Result<Vec<u8>, LinkError> {
        self.check_fits(len as usize)?;
        let pdu_ref = self.next_ref();
        let reply = self
            .exchange(&frame::data_telegram(&frame::read_var(
                pdu_ref, area, offset, len,
            )))
            .await?;
        Ok(frame::parse_read_response(&reply, pdu_ref, len as usize)?)
    }

    async fn write_area(
        &mut self,
        area: DigitalArea,
        offset: u16,
        data: &[u8],
    ) -> Result<(), LinkError> {
        self.check_fits(data.len())?;
        let pdu_ref = self.next_ref();
        let reply = self
            .exchange(&frame::data_telegram(&frame::write_var(
                pdu_ref, area, offset, data,
            )))
            .await?;
        Ok(frame::parse_write_response(&reply, pdu_ref)?)
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.stream.shutdown().await.map_err(transport)
    }
}
