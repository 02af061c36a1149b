//! Telegram layout for the small S7comm subset the console needs.
//!
//! ```text
//! TPKT  (RFC 1006)   03 00 LL LL
//! COTP  (ISO 8073)   CR/CC: LI E0|D0 ...   DT: 02 F0 80
//! S7    header       32 ROSCTR 00 00 REF REF PLEN PLEN DLEN DLEN [ECLASS ECODE]
//! ```
//!
//! Builders return only the S7 part for jobs; [`data_telegram`] wraps it into
//! TPKT + COTP DT. Parsers take the bytes that follow the 4-byte TPKT header.
use bytes::{BufMut, Bytes, BytesMut};
use derive_more::{Display, Error};

use crate::protocol::channel::DigitalArea;

pub const TPKT_VERSION: u8 = 0x03;
pub const TPKT_HEADER_LEN: usize = 4;

const COTP_CR: u8 = 0xE0;
const COTP_CC: u8 = 0xD0;
const COTP_DT: u8 = 0xF0;
const COTP_EOT: u8 = 0x80;
const COTP_DT_HEADER: [u8; 3] = [0x02, COTP_DT, COTP_EOT];

const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;
const JOB_HEADER_LEN: usize = 10;
const ACK_HEADER_LEN: usize = 12;

const FN_SETUP_COMMUNICATION: u8 = 0xF0;
const FN_READ_VAR: u8 = 0x04;
const FN_WRITE_VAR: u8 = 0x05;

const VAR_SPEC: u8 = 0x12;
const VAR_SPEC_LEN: u8 = 0x0A;
const SYNTAX_ID_ANY: u8 = 0x10;
const WORDLEN_BYTE: u8 = 0x02;

const TRANSPORT_BIT: u8 = 0x03;
const TRANSPORT_BYTE: u8 = 0x04;
const RETURN_SUCCESS: u8 = 0xFF;

/// Wire code of a digital area (`PE` / `PA`).
pub fn area_code(area: DigitalArea) -> u8 {
    match area {
        DigitalArea::Inputs => 0x81,
        DigitalArea::Outputs => 0x82,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum FrameError {
    #[display("telegram truncated: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
    #[display("invalid telegram header: {reason}")]
    InvalidHeader { reason: &'static str },
    #[display("unexpected PDU: expected 0x{expected:02X}, found 0x{found:02X}")]
    UnexpectedPdu { expected: u8, found: u8 },
    #[display("device reported error class 0x{class:02X} code 0x{code:02X}")]
    ErrorClass { class: u8, code: u8 },
    #[display("data item rejected with return code 0x{code:02X}")]
    ItemFailed { code: u8 },
    #[display("unexpected data length: expected {expected} bytes, found {found}")]
    UnexpectedLength { expected: usize, found: usize },
    /// The reply answers another job; the stream is out of sync.
    #[display("reply carries PDU reference {found}, expected {expected}")]
    ReferenceMismatch { expected: u16, found: u16 },
}

impl FrameError {
    /// The device understood the request and refused it; the stream is still in sync.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FrameError::ErrorClass { .. } | FrameError::ItemFailed { .. }
        )
    }
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), FrameError> {
    if bytes.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

/// COTP connection request carrying the TSAP pair, TPDU size 1024.
pub fn connection_request(local_tsap: u16, remote_tsap: u16) -> Bytes {
    let mut cotp = BytesMut::with_capacity(18);
    cotp.put_u8(0x11); // length indicator
    cotp.put_u8(COTP_CR);
    cotp.put_u16(0x0000); // destination reference
    cotp.put_u16(0x0001); // source reference
    cotp.put_u8(0x00); // class 0
    cotp.put_slice(&[0xC0, 0x01, 0x0A]);
    cotp.put_slice(&[0xC1, 0x02]);
    cotp.put_u16(local_tsap);
    cotp.put_slice(&[0xC2, 0x02]);
    cotp.put_u16(remote_tsap);

    let mut out = BytesMut::with_capacity(TPKT_HEADER_LEN + cotp.len());
    put_tpkt(&mut out, TPKT_HEADER_LEN + cotp.len());
    out.put_slice(&cotp);
    out.freeze()
}

/// Wrap an S7 PDU into TPKT + COTP DT.
pub fn data_telegram(s7: &[u8]) -> Bytes {
    let total = TPKT_HEADER_LEN + COTP_DT_HEADER.len() + s7.len();
    let mut out = BytesMut::with_capacity(total);
    put_tpkt(&mut out, total);
    out.put_slice(&COTP_DT_HEADER);
    out.put_slice(s7);
    out.freeze()
}

fn put_tpkt(dst: &mut BytesMut, total_len: usize) {
    dst.put_u8(TPKT_VERSION);
    dst.put_u8(0x00);
    dst.put_u16(total_len as u16);
}

fn job(pdu_ref: u16, param: &[u8], data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(JOB_HEADER_LEN + param.len() + data.len());
    out.put_u8(S7_PROTOCOL_ID);
    out.put_u8(ROSCTR_JOB);
    out.put_u16(0x0000);
    out.put_u16(pdu_ref);
    out.put_u16(param.len() as u16);
    out.put_u16(data.len() as u16);
    out.put_slice(param);
    out.put_slice(data);
    out.freeze()
}

/// Setup Communication job requesting `pdu_len` with one parallel job each way.
pub fn setup_communication(pdu_ref: u16, pdu_len: u16) -> Bytes {
    let mut param = BytesMut::with_capacity(8);
    param.put_u8(FN_SETUP_COMMUNICATION);
    param.put_u8(0x00);
    param.put_u16(1);
    param.put_u16(1);
    param.put_u16(pdu_len);
    job(pdu_ref, &param, &[])
}

fn put_any_pointer(dst: &mut BytesMut, area: DigitalArea, start: u16, count: u16) {
    dst.put_u8(VAR_SPEC);
    dst.put_u8(VAR_SPEC_LEN);
    dst.put_u8(SYNTAX_ID_ANY);
    dst.put_u8(WORDLEN_BYTE);
    dst.put_u16(count);
    dst.put_u16(0); // DB number, unused outside data blocks
    dst.put_u8(area_code(area));
    let bit_address = u32::from(start) << 3;
    dst.put_u8(((bit_address >> 16) & 0xFF) as u8);
    dst.put_u8(((bit_address >> 8) & 0xFF) as u8);
    dst.put_u8((bit_address & 0xFF) as u8);
}

/// ReadVar job for `len` bytes of `area` starting at byte `start`.
pub fn read_var(pdu_ref: u16, area: DigitalArea, start: u16, len: u16) -> Bytes {
    let mut param = BytesMut::with_capacity(14);
    param.put_u8(FN_READ_VAR);
    param.put_u8(1);
    put_any_pointer(&mut param, area, start, len);
    job(pdu_ref, &param, &[])
}

/// WriteVar job storing `data` into `area` starting at byte `start`.
pub fn write_var(pdu_ref: u16, area: DigitalArea, start: u16, data: &[u8]) -> Bytes {
    let mut param = BytesMut::with_capacity(14);
    param.put_u8(FN_WRITE_VAR);
    param.put_u8(1);
    put_any_pointer(&mut param, area, start, data.len() as u16);

    let mut item = BytesMut::with_capacity(4 + data.len());
    item.put_u8(0x00);
    item.put_u8(TRANSPORT_BYTE);
    item.put_u16((data.len() as u16) << 3);
    item.put_slice(data);
    job(pdu_ref, &param, &item)
}

/// Check a COTP connection confirm.
pub fn parse_connection_confirm(cotp: &[u8]) -> Result<(), FrameError> {
    ensure_len(cotp, 2)?;
    let pdu_type = cotp[1] & 0xF0;
    if pdu_type != COTP_CC {
        return Err(FrameError::UnexpectedPdu {
            expected: COTP_CC,
            found: cotp[1],
        });
    }
    Ok(())
}

/// Parameter and data sections of an AckData PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckData<'a> {
    pub param: &'a [u8],
    pub data: &'a [u8],
}

/// Strip COTP DT and validate the S7 AckData header against the job's `pdu_ref`.
pub fn parse_ack_data(cotp: &[u8], pdu_ref: u16) -> Result<AckData<'_>, FrameError> {
    ensure_len(cotp, COTP_DT_HEADER.len())?;
    if cotp[1] != COTP_DT {
        return Err(FrameError::UnexpectedPdu {
            expected: COTP_DT,
            found: cotp[1],
        });
    }
    let cotp_len = cotp[0] as usize + 1;
    ensure_len(cotp, cotp_len)?;
    let s7 = &cotp[cotp_len..];

    ensure_len(s7, ACK_HEADER_LEN)?;
    if s7[0] != S7_PROTOCOL_ID {
        return Err(FrameError::InvalidHeader {
            reason: "protocol id is not 0x32",
        });
    }
    if s7[1] != ROSCTR_ACK_DATA {
        return Err(FrameError::UnexpectedPdu {
            expected: ROSCTR_ACK_DATA,
            found: s7[1],
        });
    }
    let found = u16::from_be_bytes([s7[4], s7[5]]);
    if found != pdu_ref {
        return Err(FrameError::ReferenceMismatch {
            expected: pdu_ref,
            found,
        });
    }
    let param_len = u16::from_be_bytes([s7[6], s7[7]]) as usize;
    let data_len = u16::from_be_bytes([s7[8], s7[9]]) as usize;
    let (class, code) = (s7[10], s7[11]);
    if class != 0 || code != 0 {
        return Err(FrameError::ErrorClass { class, code });
    }

    let body = &s7[ACK_HEADER_LEN..];
    ensure_len(body, param_len + data_len)?;
    Ok(AckData {
        param: &body[..param_len],
        data: &body[param_len..param_len + data_len],
    })
}

fn expect_function(param: &[u8], function: u8) -> Result<(), FrameError> {
    ensure_len(param, 2)?;
    if param[0] != function {
        return Err(FrameError::UnexpectedPdu {
            expected: function,
            found: param[0],
        });
    }
    Ok(())
}

/// Negotiated PDU length from a Setup Communication reply.
pub fn parse_setup_response(cotp: &[u8], pdu_ref: u16) -> Result<u16, FrameError> {
    let ack = parse_ack_data(cotp, pdu_ref)?;
    expect_function(ack.param, FN_SETUP_COMMUNICATION)?;
    ensure_len(ack.param, 8)?;
    let pdu_len = u16::from_be_bytes([ack.param[6], ack.param[7]]);
    if pdu_len == 0 {
        return Err(FrameError::InvalidHeader {
            reason: "negotiated PDU length is zero",
        });
    }
    Ok(pdu_len)
}

/// Data bytes of a single-item ReadVar reply.
pub fn parse_read_response(
    cotp: &[u8],
    pdu_ref: u16,
    expected_len: usize,
) -> Result<Vec<u8>, FrameError> {
    let ack = parse_ack_data(cotp, pdu_ref)?;
    expect_function(ack.param, FN_READ_VAR)?;
    ensure_len(ack.data, 1)?;
    if ack.data[0] != RETURN_SUCCESS {
        return Err(FrameError::ItemFailed { code: ack.data[0] });
    }
    ensure_len(ack.data, 4)?;
    let raw_len = u16::from_be_bytes([ack.data[2], ack.data[3]]) as usize;
    let byte_len = match ack.data[1] {
        // lengths of bit/byte transports are counted in bits
        TRANSPORT_BIT | TRANSPORT_BYTE => raw_len.div_ceil(8),
        _ => raw_len,
    };
    if byte_len != expected_len {
        return Err(FrameError::UnexpectedLength {
            expected: expected_len,
            found: byte_len,
        });
    }
    let payload = &ack.data[4..];
    ensure_len(payload, byte_len)?;
    Ok(payload[..byte_len].to_vec())
}

/// Check a single-item WriteVar reply.
pub fn parse_write_response(cotp: &[u8], pdu_ref: u16) -> Result<(), FrameError> {
    let ack = parse_ack_data(cotp, pdu_ref)?;
    expect_function(ack.param, FN_WRITE_VAR)?;
    ensure_len(ack.data, 1)?;
    if ack.data[0] != RETURN_SUCCESS {
        return Err(FrameError::ItemFailed { code: ack.data[0] });
    }
    Ok(())
}
