#![allow(dead_code)]
use std::cmp::min;

use usb_device::class::UsbClass;
use usbd_class_tester::prelude::*;

use usbd_edbg::engine::Engine;
use usbd_edbg::fragment::{Report, REPORT_SIZE};
use usbd_edbg::nvm::{NVMBackend, NVMCommand, Region};
use usbd_edbg::Board;

// Scopes
pub const SCOPE_GENERAL: u8 = 0x01;
pub const SCOPE_AVR: u8 = 0x12;
pub const SCOPE_EDBG: u8 = 0x20;

// Commands
pub const CMD_SET_PARAMETER: u8 = 0x01;
pub const CMD_GET_PARAMETER: u8 = 0x02;
pub const CMD_SIGN_ON: u8 = 0x10;
pub const CMD_SIGN_OFF: u8 = 0x11;
pub const CMD_ENTER_PROGMODE: u8 = 0x15;
pub const CMD_LEAVE_PROGMODE: u8 = 0x16;
pub const CMD_ERASE_MEMORY: u8 = 0x20;
pub const CMD_READ_MEMORY: u8 = 0x21;
pub const CMD_WRITE_MEMORY: u8 = 0x23;

// Result codes
pub const RSP_OK: u16 = 0x0080;
pub const RSP_DATA: u16 = 0x0184;
pub const RSP_DATA_RAW: u16 = 0x0084;
pub const RSP_FAILED: u16 = 0x00A0;

// Memory types
pub const MTYPE_SRAM: u8 = 0x20;
pub const MTYPE_EEPROM: u8 = 0x22;
pub const MTYPE_FLASH_PAGE: u8 = 0xB0;
pub const MTYPE_FUSE: u8 = 0xB2;
pub const MTYPE_LOCK: u8 = 0xB3;
pub const MTYPE_FLASH: u8 = 0xC0;
pub const MTYPE_EEPROM_XMEGA: u8 = 0xC4;
pub const MTYPE_USERSIG: u8 = 0xC5;
pub const MTYPE_SIB: u8 = 0xD3;

pub const ARCH_UPDI: u8 = 5;
pub const ARCH_PDI: u8 = 3;

pub const SIB: &[u8; 32] = b"AVR     P:4D:1-3M2 (EDBG.Boot.)\0";
pub const FW_VERSION: [u8; 5] = [52, 3, 72, 48, 0];

pub const BOOT_SIZE: u32 = 0x1000;
pub const USERROW: u16 = 0x1080;
pub const EEPROM: u16 = 0x1400;

const FLASH_SIZE: usize = 0x10000;
const DATA_SIZE: usize = 0x10000;
const FLASH_PAGE: usize = 512;
const USERROW_PAGE: usize = 512;

/// Everything the backend was asked to do, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Command(NVMCommand),
    Read(Region, u16, usize),
    Write(Region, u16, usize),
}

/// NVM controller model: page erase sets a page to 0xFF, flash write can
/// only clear bits, EEPROM write replaces bytes. Stores without a command
/// change nothing.
pub struct SimNVM {
    pub boot_size: u32,
    pub flash: Vec<u8>,
    pub data: Vec<u8>,
    pub ops: Vec<Op>,
    current: NVMCommand,
}

impl SimNVM {
    pub fn new(boot_size: u32) -> Self {
        let mut flash = vec![0u8; FLASH_SIZE];
        for (i, v) in flash.iter_mut().enumerate() {
            *v = (i & 0xff) as u8 ^ (i >> 8) as u8;
        }
        Self {
            boot_size,
            flash,
            data: vec![0x5A; DATA_SIZE],
            ops: Vec::new(),
            current: NVMCommand::NoCommand,
        }
    }

    pub fn writes(&self) -> Vec<Op> {
        self.ops
            .iter()
            .copied()
            .filter(|op| matches!(op, Op::Write(..)))
            .collect()
    }

    fn flash_offset(region: Region, address: u16) -> Option<usize> {
        match region {
            Region::FlashLow => Some((address & 0x7FFF) as usize),
            Region::FlashHigh => Some(0x8000 + (address & 0x7FFF) as usize),
            _ => None,
        }
    }

    fn page(&mut self, region: Region, address: u16) -> Option<(&mut Vec<u8>, usize, usize)> {
        if let Some(off) = Self::flash_offset(region, address) {
            let base = off & !(FLASH_PAGE - 1);
            return Some((&mut self.flash, base, FLASH_PAGE));
        }
        match region {
            // user row and boot row are single pages
            Region::UserRow => Some((&mut self.data, address as usize, USERROW_PAGE)),
            _ => None,
        }
    }
}

impl NVMBackend for SimNVM {
    fn boot_size(&self) -> u32 {
        self.boot_size
    }

    fn command(&mut self, cmd: NVMCommand) {
        self.ops.push(Op::Command(cmd));
        self.current = cmd;
    }

    fn read(&mut self, region: Region, address: u16, buf: &mut [u8]) {
        self.ops.push(Op::Read(region, address, buf.len()));
        let src = match region {
            Region::Program => &self.flash,
            _ => &self.data,
        };
        let from = address as usize;
        let len = min(buf.len(), src.len() - from);
        buf[..len].copy_from_slice(&src[from..from + len]);
        buf[len..].fill(0);
    }

    fn write(&mut self, region: Region, address: u16, data: &[u8]) {
        self.ops.push(Op::Write(region, address, data.len()));
        match self.current {
            NVMCommand::NoCommand => {}
            NVMCommand::FlashPageErase => {
                if let Some((mem, base, size)) = self.page(region, address) {
                    mem[base..base + size].fill(0xFF);
                }
            }
            NVMCommand::FlashWrite => {
                let (mem, from) = match Self::flash_offset(region, address) {
                    Some(off) => (&mut self.flash, off),
                    None => (&mut self.data, address as usize),
                };
                let len = min(data.len(), mem.len() - from);
                for (m, d) in mem[from..from + len].iter_mut().zip(data) {
                    *m &= *d;
                }
            }
            NVMCommand::EepromEraseWrite => {
                let from = address as usize;
                let len = min(data.len(), self.data.len() - from);
                self.data[from..from + len].copy_from_slice(&data[..len]);
            }
        }
    }
}

#[derive(Default)]
pub struct TestBoard {
    pub millivolts: u16,
    pub host_status: Vec<bool>,
    pub watchdog_feeds: usize,
    pub reset_armed: bool,
    pub usb_resets: usize,
}

impl Board for TestBoard {
    fn target_voltage(&mut self) -> u16 {
        self.millivolts
    }

    fn host_status(&mut self, connected: bool) {
        self.host_status.push(connected);
    }

    fn feed_watchdog(&mut self) {
        self.watchdog_feeds += 1;
    }

    fn arm_reset(&mut self) {
        self.reset_armed = true;
    }

    fn usb_reset(&mut self) {
        self.usb_resets += 1;
    }
}

pub fn test_board() -> TestBoard {
    TestBoard {
        millivolts: 3300,
        ..Default::default()
    }
}

// Request bodies

pub fn param(section: u8, index: u8, length: u8, value: &[u8]) -> Vec<u8> {
    let mut v = vec![0, section, index, length];
    v.extend_from_slice(value);
    v
}

pub fn mem(mtype: u8, address: u32, length: u32, data: &[u8]) -> Vec<u8> {
    let mut v = vec![0, mtype];
    v.extend_from_slice(&address.to_le_bytes());
    v.extend_from_slice(&length.to_le_bytes());
    v.push(0);
    v.extend_from_slice(data);
    v
}

pub fn erase(etype: u8, address: u32) -> Vec<u8> {
    let mut v = vec![0, etype];
    v.extend_from_slice(&address.to_le_bytes());
    v
}

pub fn packet(sequence: u16, scope: u8, cmd: u8, body: &[u8]) -> Vec<u8> {
    let seq = sequence.to_le_bytes();
    let mut v = vec![0x0E, 0, seq[0], seq[1], scope, cmd];
    v.extend_from_slice(body);
    v
}

/// Splits a packet into `0x80` chunk reports.
pub fn chunk_reports(packet: &[u8]) -> Vec<Report> {
    let chunks: Vec<&[u8]> = packet.chunks(60).collect();
    let end = chunks.len() as u8;
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut r = [0u8; REPORT_SIZE];
            r[0] = 0x80;
            r[1] = (((i + 1) as u8) << 4) | (end & 0x0F);
            r[3] = c.len() as u8;
            r[4..4 + c.len()].copy_from_slice(c);
            r
        })
        .collect()
}

pub fn report(bytes: &[u8]) -> Report {
    let mut r = [0u8; REPORT_SIZE];
    r[..bytes.len()].copy_from_slice(bytes);
    r
}

pub fn pull_report() -> Report {
    report(&[0x81])
}

/// A decoded reply frame.
#[derive(Debug)]
pub struct Reply {
    pub sequence: u16,
    pub scope: u8,
    pub code: u16,
    pub data: Vec<u8>,
    pub fragments: u8,
}

impl Reply {
    pub fn parse(frame: &[u8], fragments: u8) -> Self {
        assert!(frame.len() >= 6, "short frame {:02x?}", frame);
        assert_eq!(frame[0], 0x0E);
        Self {
            sequence: u16::from_le_bytes([frame[1], frame[2]]),
            scope: frame[3],
            code: u16::from_le_bytes([frame[4], frame[5]]),
            data: frame[6..].to_vec(),
            fragments,
        }
    }
}

/// Host side of the protocol, talking to an [`Engine`] report by report.
pub struct Host {
    pub engine: Engine<SimNVM, TestBoard>,
    sequence: u16,
}

impl Host {
    pub fn new() -> Self {
        Self::with_boot_size(BOOT_SIZE)
    }

    pub fn with_boot_size(boot_size: u32) -> Self {
        Self {
            engine: Engine::new(SimNVM::new(boot_size), test_board()),
            sequence: 0x100,
        }
    }

    pub fn nvm(&self) -> &SimNVM {
        self.engine.backend()
    }

    pub fn exchange(&mut self, request: &Report) -> Report {
        let mut response = [0u8; REPORT_SIZE];
        self.engine.process_report(request, &mut response);
        response
    }

    /// Sends a packet, returns the chunk status of every fragment.
    pub fn send(&mut self, packet: &[u8]) -> Vec<u8> {
        chunk_reports(packet)
            .iter()
            .map(|r| {
                let resp = self.exchange(r);
                assert_eq!(resp[0], 0x80);
                resp[1]
            })
            .collect()
    }

    /// Pulls fragments until the declared last one, returns the frame.
    pub fn pull(&mut self) -> (Vec<u8>, u8) {
        let mut frame = Vec::new();
        let mut expected = 1u8;
        loop {
            let resp = self.exchange(&pull_report());
            assert_eq!(resp[0], 0x81);
            assert_eq!(resp[2], 0);
            let index = resp[1] >> 4;
            let end = resp[1] & 0x0F;
            assert_eq!(index, expected, "fragment order");
            frame.extend_from_slice(&resp[4..4 + resp[3] as usize]);
            if index == end {
                return (frame, end);
            }
            expected += 1;
        }
    }

    pub fn command(&mut self, scope: u8, cmd: u8, body: &[u8]) -> Reply {
        self.sequence = self.sequence.wrapping_add(1);
        let pkt = packet(self.sequence, scope, cmd, body);
        let status = self.send(&pkt);
        assert!(status.iter().all(|s| *s == 1), "chunks refused: {:?}", status);
        let (frame, fragments) = self.pull();
        let reply = Reply::parse(&frame, fragments);
        assert_eq!(reply.sequence, self.sequence);
        assert_eq!(reply.scope, scope);
        reply
    }

    /// SIGN_ON, select UPDI, UPDI SIGN_ON.
    pub fn sign_on_updi(&mut self) {
        assert_eq!(self.command(SCOPE_GENERAL, CMD_SIGN_ON, &[0]).code, RSP_OK);
        let r = self.command(SCOPE_AVR, CMD_SET_PARAMETER, &param(0, 0, 1, &[ARCH_UPDI]));
        assert_eq!(r.code, RSP_OK);
        let r = self.command(SCOPE_AVR, CMD_SIGN_ON, &[0]);
        assert_eq!(r.code, RSP_DATA_RAW);
    }
}

pub trait DeviceExt<C> {
    fn class_read(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> AnyResult<Vec<u8>>;
    fn class_write(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
        data: &[u8],
    ) -> AnyResult<Vec<u8>>;
    fn interface_descriptor(
        &mut self,
        cls: &mut C,
        dtype: u8,
        index: u16,
        length: u16,
    ) -> AnyResult<Vec<u8>>;
}

impl<'a, C, M> DeviceExt<C> for Device<'a, C, M>
where
    C: UsbClass<EmulatedUsbBus>,
    M: UsbDeviceCtx<C<'a> = C>,
{
    fn class_read(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> AnyResult<Vec<u8>> {
        self.control_read(
            cls,
            CtrRequestType::to_host().class().interface(),
            req,
            value,
            index,
            length,
        )
    }

    fn class_write(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
        data: &[u8],
    ) -> AnyResult<Vec<u8>> {
        self.control_write(
            cls,
            CtrRequestType::to_device().class().interface(),
            req,
            value,
            index,
            length,
            data,
        )
    }

    fn interface_descriptor(
        &mut self,
        cls: &mut C,
        dtype: u8,
        index: u16,
        length: u16,
    ) -> AnyResult<Vec<u8>> {
        self.control_read(
            cls,
            CtrRequestType::to_host().standard().interface(),
            0x06,
            (dtype as u16) << 8,
            index,
            length,
        )
    }
}
