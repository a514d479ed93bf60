//! NVM programming executor.
//!
//! The target is an NVM controller without a page buffer: a command is
//! issued, exactly one qualifying memory access performs it, and a
//! "no command" leaves the controller idle again. Page memories (flash,
//! user row, boot row) are erased right before every write, EEPROM is
//! rewritten in place.
//!
//! Nothing below the boot-protected size is ever written, and there is no
//! way to erase the chip or touch fuses and lock bits: such requests are
//! accepted and do nothing.

use core::cmp::min;
use log::{debug, warn};

use crate::packet::{EraseRequest, MemoryAccess};

/// Longest read served in one request.
pub const MAX_READ_LEN: usize = 512;

/// Bytes in one flash mapping section.
pub const FLASH_SECTION_SIZE: u32 = 0x8000;

/// Flash page size of the target.
pub const FLASH_PAGE_SIZE: u32 = 512;

/// Converts the `BOOTSIZE` fuse (in 512-byte pages) to bytes.
pub const fn boot_size_from_fuse(fuse: u8) -> u32 {
    fuse as u32 * FLASH_PAGE_SIZE
}

/// Memory type codes (`MTYPE_*`) this device distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryType {
    /// `MTYPE_SIB`, the fixed identity string.
    Sib,
    /// `MTYPE_FLASH_PAGE`, flash addressed by its offset.
    FlashPage,
    /// `MTYPE_FLASH`, flash as seen through the data space window.
    Flash,
    /// `MTYPE_EEPROM`
    Eeprom,
    /// `MTYPE_EEPROM_XMEGA`
    EepromXmega,
    /// `MTYPE_USERSIG`, covers user row and boot row.
    UserSignature,
    /// Fuses, lock bits, SRAM, signature and anything else.
    Other(u8),
}

impl From<u8> for MemoryType {
    fn from(value: u8) -> Self {
        match value {
            0xD3 => MemoryType::Sib,
            0xB0 => MemoryType::FlashPage,
            0xC0 => MemoryType::Flash,
            0x22 => MemoryType::Eeprom,
            0xC4 => MemoryType::EepromXmega,
            0xC5 => MemoryType::UserSignature,
            v => MemoryType::Other(v),
        }
    }
}

/// Erase type codes (`XMEGA_ERASE_*`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EraseType {
    /// Whole chip. Never performed.
    Chip,
    /// User signature page (user row, boot row).
    UserSignature,
    /// Application, boot, EEPROM sections or pages. Not needed, the write
    /// path erases what it writes.
    Other(u8),
}

impl From<u8> for EraseType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => EraseType::Chip,
            0x07 => EraseType::UserSignature,
            v => EraseType::Other(v),
        }
    }
}

/// NVM controller commands used by the executor.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NVMCommand {
    /// Controller idle.
    NoCommand = 0x00,
    /// Flash (and user row) write.
    FlashWrite = 0x02,
    /// Flash page erase, triggered by a write anywhere in the page.
    FlashPageErase = 0x08,
    /// EEPROM erase and write.
    EepromEraseWrite = 0x13,
}

/// Half of the flash visible through the data space window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashSection {
    /// Offsets `0x0000..0x8000`.
    Low,
    /// Offsets `0x8000..0x10000`.
    High,
}

impl FlashSection {
    fn of_offset(offset: u16) -> Self {
        if offset & 0x8000 != 0 {
            FlashSection::High
        } else {
            FlashSection::Low
        }
    }

    fn base(self) -> u32 {
        match self {
            FlashSection::Low => 0,
            FlashSection::High => FLASH_SECTION_SIZE,
        }
    }

    fn region(self) -> Region {
        match self {
            FlashSection::Low => Region::FlashLow,
            FlashSection::High => Region::FlashHigh,
        }
    }
}

/// Memory regions a backend has to reach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    /// Program memory, addressed as the code space sees it. Read only.
    Program,
    /// Data space, addressed as is. Read only.
    Data,
    /// Lower flash section; addresses are offsets inside the section.
    FlashLow,
    /// Upper flash section; addresses are offsets inside the section.
    FlashHigh,
    /// EEPROM, data space addresses.
    Eeprom,
    /// User row and boot row, data space addresses.
    UserRow,
}

/// Trait that describes the abstraction used to access the memories of
/// the device. The [`Programmer`] decides what to issue and in which
/// order, the backend only carries it out.
pub trait NVMBackend {
    /// Bytes at the start of flash holding the resident code.
    ///
    /// Read once when the engine is created, see [`boot_size_from_fuse()`].
    fn boot_size(&self) -> u32;

    /// Issue an NVM controller command.
    fn command(&mut self, cmd: NVMCommand);

    /// Copy `buf.len()` bytes starting at `address` of `region` into `buf`.
    fn read(&mut self, region: Region, address: u16, buf: &mut [u8]);

    /// Store `data` at `address` of `region`. What the store does depends
    /// on the last [`command()`](NVMBackend::command).
    fn write(&mut self, region: Region, address: u16, data: &[u8]);

    /// Erase the page holding `address`.
    ///
    /// A page erase is a single zero byte stored into the page while the
    /// page erase command is active.
    fn erase_page(&mut self, region: Region, address: u16) {
        self.command(NVMCommand::FlashPageErase);
        self.write(region, address, &[0]);
    }
}

/// What a write or erase request ended up doing.
///
/// All of these are reported to the host as success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Memory was changed.
    Done,
    /// Refused, the target lies in the boot-protected region.
    Protected,
    /// Nothing this device can or needs to do.
    Ignored,
}

/// Executes memory commands against an [`NVMBackend`].
pub struct Programmer<M: NVMBackend> {
    mem: M,
    boot_size: u32,
    window: FlashSection,
}

impl<M: NVMBackend> Programmer<M> {
    /// Wraps a backend. The boot-protected size is sampled here, once.
    pub fn new(mem: M) -> Self {
        let boot_size = mem.boot_size();
        debug!("boot size {:#06x}", boot_size);
        Self {
            mem,
            boot_size,
            // reset default: the last section is mapped
            window: FlashSection::High,
        }
    }

    /// Boot-protected size in bytes.
    pub fn boot_size(&self) -> u32 {
        self.boot_size
    }

    /// Flash section currently mapped into the data space window.
    pub fn flash_window(&self) -> FlashSection {
        self.window
    }

    /// Shared access to the backend.
    pub fn backend(&self) -> &M {
        &self.mem
    }

    /// Exclusive access to the backend.
    pub fn backend_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// `READ_MEMORY`: fills `out` and returns the wire length (bytes read
    /// plus the status byte).
    ///
    /// Reads are not bounds checked beyond the size of `out`.
    pub fn read(&mut self, access: &MemoryAccess, sib: &[u8], out: &mut [u8]) -> usize {
        let len = min(access.length as usize, min(MAX_READ_LEN, out.len().saturating_sub(1)));
        let address = access.address16();
        let buf = &mut out[..len];

        match MemoryType::from(access.mem_type) {
            MemoryType::Sib => {
                let n = min(len, sib.len());
                buf[..n].copy_from_slice(&sib[..n]);
                buf[n..].fill(0);
            }
            MemoryType::FlashPage | MemoryType::Flash => {
                self.mem.read(Region::Program, address, buf);
            }
            _ => {
                self.mem.read(Region::Data, address, buf);
            }
        }

        len + 1
    }

    /// `WRITE_MEMORY`
    pub fn write(&mut self, access: &MemoryAccess) -> Outcome {
        let address = access.address16();
        let len = min(access.length as usize, access.data.len());
        let data = &access.data[..len];

        if (address as u32) < self.boot_size {
            warn!("write refused: {:#06x} is inside the boot section", address);
            return Outcome::Protected;
        }

        match MemoryType::from(access.mem_type) {
            MemoryType::FlashPage => {
                self.window = FlashSection::of_offset(address);
                self.program_page(self.window.region(), address & 0x7FFF, data);
                Outcome::Done
            }
            MemoryType::Flash => {
                if address & 0x8000 == 0 {
                    debug!("flash alias {:#06x} outside the mapped window", address);
                    return Outcome::Ignored;
                }
                let offset = address & 0x7FFF;
                if self.window.base() + (offset as u32) < self.boot_size {
                    warn!(
                        "write refused: window offset {:#06x} maps into the boot section",
                        offset
                    );
                    return Outcome::Protected;
                }
                self.program_page(self.window.region(), offset, data);
                Outcome::Done
            }
            MemoryType::Eeprom | MemoryType::EepromXmega => {
                self.mem.command(NVMCommand::EepromEraseWrite);
                self.mem.write(Region::Eeprom, address, data);
                self.mem.command(NVMCommand::NoCommand);
                Outcome::Done
            }
            MemoryType::UserSignature => {
                self.program_page(Region::UserRow, address, data);
                Outcome::Done
            }
            MemoryType::Sib | MemoryType::Other(_) => {
                debug!("write to memory type {:#04x} ignored", access.mem_type);
                Outcome::Ignored
            }
        }
    }

    /// `ERASE_MEMORY`. Only user signature pages are erased.
    pub fn erase(&mut self, request: &EraseRequest) -> Outcome {
        let address = request.page_address as u16;

        match EraseType::from(request.erase_type) {
            EraseType::UserSignature => {
                if (address as u32) < self.boot_size {
                    warn!("erase refused: {:#06x} is inside the boot section", address);
                    return Outcome::Protected;
                }
                self.mem.erase_page(Region::UserRow, address);
                self.mem.command(NVMCommand::NoCommand);
                Outcome::Done
            }
            EraseType::Chip => {
                warn!("chip erase is not supported");
                Outcome::Ignored
            }
            EraseType::Other(t) => {
                debug!("erase type {:#04x} ignored", t);
                Outcome::Ignored
            }
        }
    }

    // page memories have no page buffer: erase, then write
    fn program_page(&mut self, region: Region, address: u16, data: &[u8]) {
        self.mem.erase_page(region, address);
        self.mem.command(NVMCommand::FlashWrite);
        self.mem.write(region, address, data);
        self.mem.command(NVMCommand::NoCommand);
    }
}
