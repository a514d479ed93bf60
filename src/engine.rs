//! Report classifier and the single engine context.
//!
//! Every 64-byte report received from the host is answered by exactly one
//! 64-byte report, built from a copy of the request. Reports whose first
//! byte is a CMSIS-DAP standard command are answered here directly, the
//! EDBG vendor commands feed the fragment layer and, once a packet is
//! complete, the scope router.

use log::{debug, info, trace, warn};

use crate::board::Board;
use crate::fragment::{Chunk, Fragmenter, Reassembler, Report};
use crate::nvm::{NVMBackend, Programmer};
use crate::packet::{ReplyHeader, Request, MAX_REPLY_DATA};
use crate::scope;
use crate::session::Session;

/// CMSIS-DAP command bytes handled by the classifier.
pub mod dap {
    /// `DAP_Info`
    pub const INFO: u8 = 0x00;
    /// `DAP_HostStatus`
    pub const HOST_STATUS: u8 = 0x01;
    /// `DAP_Connect`
    pub const CONNECT: u8 = 0x02;
    /// `DAP_Disconnect`
    pub const DISCONNECT: u8 = 0x03;
    /// EDBG vendor command: host to device packet chunk.
    pub const EDBG_AVR_CMD: u8 = 0x80;
    /// EDBG vendor command: device to host packet pull.
    pub const EDBG_AVR_RSP: u8 = 0x81;

    /// `DAP_Info` id: capabilities.
    pub const INFO_CAPABILITIES: u8 = 0xF1;
    /// `DAP_Info` id: UART receive buffer size.
    pub const INFO_UART_RX_BUFFER: u8 = 0xFB;
    /// `DAP_Info` id: UART transmit buffer size.
    pub const INFO_UART_TX_BUFFER: u8 = 0xFC;
    /// `DAP_Info` id: packet size.
    pub const INFO_PACKET_SIZE: u8 = 0xFF;

    /// `DAP_HostStatus` type: connect indicator.
    pub const HOST_STATUS_CONNECT: u8 = 0x00;

    /// Chunk accepted.
    pub const EDBG_RSP_OK: u8 = 0x01;
    /// Chunk refused, the host has to resend the packet.
    pub const EDBG_RSP_FAIL: u8 = 0x00;
}

/// The protocol engine.
///
/// Owns the packet buffers, fragmentation cursors, session state, the NVM
/// executor and the board hooks. Nothing else mutates them.
pub struct Engine<M: NVMBackend, H: Board> {
    rx: Reassembler,
    tx: Fragmenter,
    session: Session,
    nvm: Programmer<M>,
    board: H,
    reset_armed: bool,
}

impl<M: NVMBackend, H: Board> Engine<M, H> {
    /// Creates an engine. The boot-protected size is read from `mem` here.
    pub fn new(mem: M, board: H) -> Self {
        let nvm = Programmer::new(mem);
        Self {
            rx: Reassembler::new(),
            tx: Fragmenter::new(),
            session: Session::new(nvm.boot_size()),
            nvm,
            board,
            reset_armed: false,
        }
    }

    /// Handles one report from the host and fills the report to send back.
    ///
    /// Returns `true` if the report completed a vendor packet, which was
    /// then executed and its reply queued.
    pub fn process_report(&mut self, request: &Report, response: &mut Report) -> bool {
        let cmd = request[0];
        let sub = request[1];
        trace!("DAP={:02x} SUB={:02x}", cmd, sub);

        response.copy_from_slice(request);

        match cmd {
            dap::EDBG_AVR_CMD => match self.rx.accept(request) {
                Ok(Chunk::Partial) => {
                    response[1] = dap::EDBG_RSP_OK;
                    false
                }
                Ok(Chunk::Complete) => {
                    response[1] = dap::EDBG_RSP_OK;
                    self.execute();
                    true
                }
                Err(e) => {
                    warn!("chunk refused: {:?}", e);
                    response[1] = dap::EDBG_RSP_FAIL;
                    false
                }
            },
            dap::EDBG_AVR_RSP => {
                self.tx.next_fragment(response);
                trace!("PI={:02x?}", &response[..4 + response[3] as usize]);
                false
            }
            dap::INFO => {
                match sub {
                    dap::INFO_PACKET_SIZE | dap::INFO_UART_RX_BUFFER | dap::INFO_UART_TX_BUFFER => {
                        response[1..4].copy_from_slice(&[0x02, 0x40, 0x00]);
                    }
                    dap::INFO_CAPABILITIES => {
                        response[1..4].copy_from_slice(&[0x02, 0x00, 0x00]);
                    }
                    _ => {}
                }
                false
            }
            dap::HOST_STATUS if sub == dap::HOST_STATUS_CONNECT => {
                self.board.host_status(request[2] != 0);
                false
            }
            dap::CONNECT => false,
            dap::DISCONNECT => {
                info!("disconnect, reset armed");
                self.reset_armed = true;
                self.board.arm_reset();
                false
            }
            _ => {
                response[1] = 0;
                false
            }
        }
    }

    fn execute(&mut self) {
        self.tx.clear();

        let request = Request::decode(self.rx.packet());
        let data = &mut self.tx.data_mut()[..MAX_REPLY_DATA];
        let reply = scope::dispatch(
            &request,
            &mut self.session,
            &mut self.nvm,
            &mut self.board,
            data,
        );
        debug!("reply code={:#06x} len={}", reply.code.0, reply.len);

        self.tx.queue(
            ReplyHeader {
                sequence: request.sequence,
                scope: request.scope,
                code: reply.code,
            },
            reply.len,
        );
    }

    /// Feeds the board watchdog, unless a disconnect asked for a reset.
    ///
    /// Call once per main loop iteration, whether or not the bus is busy.
    pub fn service_watchdog(&mut self) {
        if !self.reset_armed {
            self.board.feed_watchdog();
        }
    }

    /// Forgets all per-attachment state, including a reset armed by
    /// `DAP_Disconnect`. Called on USB bus reset.
    pub fn reset(&mut self) {
        debug!("engine reset");
        self.reset_armed = false;
        self.rx.reset();
        self.tx.clear();
        self.session.reset();
        self.board.usb_reset();
    }

    /// `true` after `DAP_Disconnect`; the watchdog is no longer fed.
    pub fn reset_armed(&self) -> bool {
        self.reset_armed
    }

    /// `true` while reply fragments wait to be pulled.
    pub fn reply_pending(&self) -> bool {
        self.tx.is_pending()
    }

    /// Current session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// NVM executor.
    pub fn programmer(&self) -> &Programmer<M> {
        &self.nvm
    }

    /// Memory backend.
    pub fn backend(&self) -> &M {
        self.nvm.backend()
    }

    /// Mutable memory backend.
    pub fn backend_mut(&mut self) -> &mut M {
        self.nvm.backend_mut()
    }

    /// Board hooks.
    pub fn board(&self) -> &H {
        &self.board
    }

    /// Mutable board hooks.
    pub fn board_mut(&mut self) -> &mut H {
        &mut self.board
    }
}
