//! JTAGICE3 packet envelope.
//!
//! A request, once reassembled from EDBG fragments, is laid out as
//!
//! | offset | field                        |
//! |--------|------------------------------|
//! | 0      | token                        |
//! | 1      | reserved                     |
//! | 2..4   | sequence number (LE)         |
//! | 4      | scope                        |
//! | 5      | command                      |
//! | 6..    | command specific body        |
//!
//! and the reply goes back as token, sequence, scope, a 16-bit result code
//! and the reply data.

/// Token byte that opens every reply frame.
pub const TOKEN: u8 = 0x0E;

/// Largest request the reassembler accepts: 9 fragments of 60 bytes.
pub const MAX_REQUEST_LEN: usize = 540;

/// Largest reply frame: 15 fragments of 60 bytes.
pub const MAX_REPLY_LEN: usize = 900;

/// Reply data area available to command handlers, including the
/// trailing status byte.
pub const MAX_REPLY_DATA: usize = 513;

const REQUEST_HEADER_LEN: usize = 6;

/// Command codes understood by the scope handlers.
pub mod command {
    /// `CMD3_SET_PARAMETER`
    pub const SET_PARAMETER: u8 = 0x01;
    /// `CMD3_GET_PARAMETER`
    pub const GET_PARAMETER: u8 = 0x02;
    /// `CMD3_SIGN_ON`
    pub const SIGN_ON: u8 = 0x10;
    /// `CMD3_SIGN_OFF`
    pub const SIGN_OFF: u8 = 0x11;
    /// `CMD3_ENTER_PROGMODE`
    pub const ENTER_PROGMODE: u8 = 0x15;
    /// `CMD3_LEAVE_PROGMODE`
    pub const LEAVE_PROGMODE: u8 = 0x16;
    /// `CMD3_ERASE_MEMORY`
    pub const ERASE_MEMORY: u8 = 0x20;
    /// `CMD3_READ_MEMORY`
    pub const READ_MEMORY: u8 = 0x21;
    /// `CMD3_WRITE_MEMORY`
    pub const WRITE_MEMORY: u8 = 0x23;
}

/// Command space selector.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Programmer-level commands: sign on/off, identity, target voltage.
    General = 0x01,
    /// AVR core commands, further split by the selected architecture.
    AvrCore = 0x12,
    /// EDBG hardware capabilities.
    Edbg = 0x20,
}

impl Scope {
    /// Maps a raw scope byte, `None` for scopes this device does not serve.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Scope::General),
            0x12 => Some(Scope::AvrCore),
            0x20 => Some(Scope::Edbg),
            _ => None,
        }
    }
}

/// 16-bit result code placed after the scope byte of a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseCode(pub u16);

impl ResponseCode {
    /// `RSP3_OK`
    pub const OK: ResponseCode = ResponseCode(0x0080);
    /// `RSP3_DATA`, followed by the requested length of data.
    pub const DATA: ResponseCode = ResponseCode(0x0184);
    /// `RSP3_DATA` with a zero second byte, used by the UPDI sign-on reply.
    pub const DATA_RAW: ResponseCode = ResponseCode(0x0084);
    /// `RSP3_FAILED`
    pub const FAILED: ResponseCode = ResponseCode(0x00A0);
}

/// `GET_PARAMETER` / `SET_PARAMETER` body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterAccess<'a> {
    /// Parameter context (config, physical, device, ...).
    pub section: u8,
    /// Parameter index inside the section.
    pub index: u8,
    /// Requested (get) or supplied (set) value length.
    pub length: u8,
    /// Value bytes that actually arrived, at most `length` of them.
    pub value: &'a [u8],
}

impl ParameterAccess<'_> {
    /// Low byte of the value, zero when no value was sent.
    pub fn byte(&self) -> u8 {
        self.value.first().copied().unwrap_or(0)
    }
}

/// `READ_MEMORY` / `WRITE_MEMORY` body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryAccess<'a> {
    /// Memory type code (`MTYPE_*`).
    pub mem_type: u8,
    /// Address as sent by the host. Only the low 16 bits are used.
    pub address: u32,
    /// Declared transfer length.
    pub length: u32,
    /// Write payload that actually arrived.
    pub data: &'a [u8],
}

impl MemoryAccess<'_> {
    /// The significant part of the address.
    pub fn address16(&self) -> u16 {
        self.address as u16
    }
}

/// `ERASE_MEMORY` body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EraseRequest {
    /// Erase type code (`XMEGA_ERASE_*`).
    pub erase_type: u8,
    /// Page address. Only the low 16 bits are used.
    pub page_address: u32,
}

/// Command body, decoded according to the command code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Parameter get/set.
    Parameter(ParameterAccess<'a>),
    /// Memory read/write.
    Memory(MemoryAccess<'a>),
    /// Page erase.
    Erase(EraseRequest),
    /// Any other command, body left as raw bytes.
    Raw(&'a [u8]),
}

/// A reassembled request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request<'a> {
    /// Token byte as sent by the host.
    pub token: u8,
    /// Sequence number, echoed in the reply.
    pub sequence: u16,
    /// Raw scope selector.
    pub scope: u8,
    /// Command code.
    pub command: u8,
    /// Decoded body.
    pub payload: Payload<'a>,
}

fn byte_at(buf: &[u8], offset: usize) -> u8 {
    buf.get(offset).copied().unwrap_or(0)
}

fn le16_at(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([byte_at(buf, offset), byte_at(buf, offset + 1)])
}

fn le32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        byte_at(buf, offset),
        byte_at(buf, offset + 1),
        byte_at(buf, offset + 2),
        byte_at(buf, offset + 3),
    ])
}

fn tail(buf: &[u8], offset: usize) -> &[u8] {
    buf.get(offset..).unwrap_or(&[])
}

impl<'a> Request<'a> {
    /// Decodes a reassembled packet.
    ///
    /// Fields that lie past the end of a short packet read as zero, so
    /// decoding never fails; a packet too short to carry a scope simply
    /// lands in no known scope.
    pub fn decode(buf: &'a [u8]) -> Self {
        let command = byte_at(buf, 5);
        let body = tail(buf, REQUEST_HEADER_LEN);

        let payload = match command {
            command::SET_PARAMETER | command::GET_PARAMETER => {
                // body: reserved, section, index, length, value...
                let length = byte_at(body, 3);
                let value = tail(body, 4);
                let value = &value[..value.len().min(length as usize)];
                Payload::Parameter(ParameterAccess {
                    section: byte_at(body, 1),
                    index: byte_at(body, 2),
                    length,
                    value,
                })
            }
            command::READ_MEMORY | command::WRITE_MEMORY => {
                // body: reserved, type, address[4], length[4], reserved, data...
                Payload::Memory(MemoryAccess {
                    mem_type: byte_at(body, 1),
                    address: le32_at(body, 2),
                    length: le32_at(body, 6),
                    data: tail(body, 11),
                })
            }
            command::ERASE_MEMORY => Payload::Erase(EraseRequest {
                erase_type: byte_at(body, 1),
                page_address: le32_at(body, 2),
            }),
            _ => Payload::Raw(body),
        };

        Request {
            token: byte_at(buf, 0),
            sequence: le16_at(buf, 2),
            scope: byte_at(buf, 4),
            command,
            payload,
        }
    }

    /// Result code left in place when a handler does not touch the reply:
    /// the command byte, with the high byte cleared by the end-of-transfer
    /// marker.
    pub fn passthrough_code(&self) -> ResponseCode {
        ResponseCode(self.command as u16)
    }
}

/// Header of a reply frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Sequence number copied from the request.
    pub sequence: u16,
    /// Scope copied from the request.
    pub scope: u8,
    /// Result code.
    pub code: ResponseCode,
}

impl ReplyHeader {
    /// Encoded size of the header.
    pub const LEN: usize = 6;

    /// Writes the header into the first [`LEN`](ReplyHeader::LEN) bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        let sequence = self.sequence.to_le_bytes();
        let code = self.code.0.to_le_bytes();
        buf[..Self::LEN].copy_from_slice(&[
            TOKEN,
            sequence[0],
            sequence[1],
            self.scope,
            code[0],
            code[1],
        ]);
    }
}
