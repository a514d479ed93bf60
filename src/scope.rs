//! Scope router: runs one reassembled request and produces the reply.

use core::cmp::min;
use log::{debug, info, warn};

use crate::board::Board;
use crate::nvm::{NVMBackend, Programmer};
use crate::packet::{command, ParameterAccess, Payload, Request, ResponseCode, Scope};
use crate::session::{Architecture, Session};

/// Parameter contexts (`SET_GET_CTXT_*`).
mod section {
    pub const CONFIG: u8 = 0x00;
    pub const PHYSICAL: u8 = 0x01;
    pub const DEVICE: u8 = 0x02;
}

/// Parameter indexes (`PARM3_*`).
mod param {
    pub const ARCH: u8 = 0x00;
    pub const CONNECTION: u8 = 0x00;
    pub const DEVICE_DESC: u8 = 0x00;
    pub const VTARGET: u8 = 0x00;
    pub const ANALOG_A_VTARGET: u8 = 0x20;
    pub const CLK_XMEGA_PDI: u8 = 0x31;
}

/// Result of running a request: the code for the reply header and the
/// number of data bytes written after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Result code.
    pub code: ResponseCode,
    /// Reply data length, including the trailing status byte if any.
    pub len: usize,
}

impl Reply {
    /// `RSP3_OK` without data.
    pub const fn ok() -> Self {
        Reply {
            code: ResponseCode::OK,
            len: 0,
        }
    }

    /// `RSP3_OK` followed by the status byte.
    pub const fn ok_status() -> Self {
        Reply {
            code: ResponseCode::OK,
            len: 1,
        }
    }

    /// `RSP3_DATA` carrying `len` bytes.
    pub const fn data(len: usize) -> Self {
        Reply {
            code: ResponseCode::DATA,
            len,
        }
    }

    /// `RSP3_FAILED`
    pub const fn failed() -> Self {
        Reply {
            code: ResponseCode::FAILED,
            len: 0,
        }
    }

    /// Leaves the request's command byte in place of the result code.
    pub fn passthrough(request: &Request) -> Self {
        Reply {
            code: request.passthrough_code(),
            len: 0,
        }
    }
}

/// Runs `request` and writes the reply data to `data`.
///
/// `data` is cleared first, so whatever a handler does not write reads
/// as zero.
pub fn dispatch<M: NVMBackend, H: Board>(
    request: &Request,
    session: &mut Session,
    nvm: &mut Programmer<M>,
    board: &mut H,
    data: &mut [u8],
) -> Reply {
    data.fill(0);
    debug!(
        "seq={} scope={:#04x} cmd={:#04x}",
        request.sequence, request.scope, request.command
    );

    let reply = match Scope::from_u8(request.scope) {
        Some(Scope::General) => general(request, session, board, data),
        Some(Scope::AvrCore) => avr_core(request, session, nvm, &H::SIB, data),
        Some(Scope::Edbg) => edbg(request, data),
        None => {
            debug!("unknown scope {:#04x}", request.scope);
            Reply::passthrough(request)
        }
    };

    Reply {
        code: reply.code,
        len: min(reply.len, data.len()),
    }
}

// GET_PARAMETER replies carry the requested length plus the status byte
fn parameter_reply(p: &ParameterAccess, data: &[u8]) -> Reply {
    Reply::data(min(p.length as usize + 1, data.len()))
}

fn put_u16(data: &mut [u8], value: u16) {
    let bytes = value.to_le_bytes();
    let n = min(data.len(), 2);
    data[..n].copy_from_slice(&bytes[..n]);
}

fn general<H: Board>(
    request: &Request,
    session: &mut Session,
    board: &mut H,
    data: &mut [u8],
) -> Reply {
    match (request.command, &request.payload) {
        (command::GET_PARAMETER, Payload::Parameter(p)) => {
            match p.section {
                section::CONFIG => {
                    let version = &H::FIRMWARE_VERSION;
                    let from = min(p.index as usize, version.len());
                    let n = min(min(p.length as usize, version.len() - from), data.len());
                    data[..n].copy_from_slice(&version[from..from + n]);
                }
                section::PHYSICAL
                    if p.index == param::VTARGET || p.index == param::ANALOG_A_VTARGET =>
                {
                    let mv = board.target_voltage();
                    debug!("vtarget={}mV", mv);
                    put_u16(data, mv);
                }
                _ => {}
            }
            parameter_reply(p, data)
        }
        (command::SIGN_ON, _) => {
            session.sign_on();
            Reply::ok()
        }
        (command::SIGN_OFF, _) => {
            session.sign_off();
            Reply::ok()
        }
        _ => Reply::passthrough(request),
    }
}

fn edbg(request: &Request, data: &mut [u8]) -> Reply {
    match (request.command, &request.payload) {
        (command::SET_PARAMETER, _) => Reply::ok(),
        (command::GET_PARAMETER, Payload::Parameter(p)) => parameter_reply(p, data),
        _ => Reply::passthrough(request),
    }
}

fn avr_core<M: NVMBackend>(
    request: &Request,
    session: &mut Session,
    nvm: &mut Programmer<M>,
    sib: &[u8],
    data: &mut [u8],
) -> Reply {
    match (request.command, &request.payload) {
        (command::SET_PARAMETER, Payload::Parameter(p)) => {
            match (p.section, p.index) {
                (section::CONFIG, param::ARCH) => {
                    session.set_architecture(Architecture::from(p.byte()))
                }
                (section::PHYSICAL, param::CONNECTION) => session.set_connection(p.byte()),
                (section::DEVICE, param::DEVICE_DESC) => session.set_descriptor(p.value),
                (s, i) => debug!("set parameter {}:{:#04x} ignored", s, i),
            }
            Reply::ok()
        }
        (command::GET_PARAMETER, Payload::Parameter(p)) => {
            match (p.section, p.index) {
                (section::CONFIG, param::ARCH) => data[0] = session.architecture().into(),
                (section::PHYSICAL, param::CONNECTION) => data[0] = session.connection(),
                (section::PHYSICAL, param::CLK_XMEGA_PDI) => {
                    put_u16(data, session.boot_size() as u16)
                }
                _ => {}
            }
            parameter_reply(p, data)
        }
        _ if session.is_updi() => updi(request, session, nvm, sib, data),
        _ => {
            warn!("cmd {:#04x} refused, arch={:?}", request.command, session.architecture());
            Reply::failed()
        }
    }
}

fn updi<M: NVMBackend>(
    request: &Request,
    session: &mut Session,
    nvm: &mut Programmer<M>,
    sib: &[u8],
    data: &mut [u8],
) -> Reply {
    match (request.command, &request.payload) {
        (command::SIGN_ON, _) => {
            info!("UPDI sign on");
            data[..4].copy_from_slice(&sib[..4]);
            Reply {
                code: ResponseCode::DATA_RAW,
                len: 5,
            }
        }
        (command::SIGN_OFF, _) => {
            info!("UPDI sign off, descriptor {} bytes", session.descriptor().as_bytes().len());
            Reply::ok_status()
        }
        (command::ENTER_PROGMODE, _) | (command::LEAVE_PROGMODE, _) => Reply::ok_status(),
        (command::ERASE_MEMORY, Payload::Erase(e)) => {
            debug!("erase type={:#04x} page={:#08x}", e.erase_type, e.page_address);
            let outcome = nvm.erase(e);
            debug!("erase: {:?}", outcome);
            Reply::ok_status()
        }
        (command::READ_MEMORY, Payload::Memory(m)) => {
            debug!("read type={:#04x} addr={:#08x} len={}", m.mem_type, m.address, m.length);
            Reply::data(nvm.read(m, sib, data))
        }
        (command::WRITE_MEMORY, Payload::Memory(m)) => {
            debug!("write type={:#04x} addr={:#08x} len={}", m.mem_type, m.address, m.length);
            let outcome = nvm.write(m);
            debug!("write: {:?}", outcome);
            Reply::ok_status()
        }
        _ => Reply::failed(),
    }
}
