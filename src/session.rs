//! Per-attachment session state.

use log::{debug, info};

/// Size of the stored device descriptor.
pub const DEVICE_DESCRIPTOR_SIZE: usize = 64;

/// `PARM3_ARCH` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Architecture {
    /// Nothing selected since the last sign-on.
    Unset,
    /// Classic AVR8 (debugWIRE, ISP, JTAG megaAVR).
    Avr8,
    /// AVR32.
    Avr32,
    /// XMEGA, programmed over PDI.
    Xmega,
    /// Parts programmed over UPDI. The only family this device serves.
    Updi,
    /// A value this device does not know.
    Other(u8),
}

impl From<u8> for Architecture {
    fn from(value: u8) -> Self {
        match value {
            0 => Architecture::Unset,
            1 => Architecture::Avr8,
            2 => Architecture::Avr32,
            3 => Architecture::Xmega,
            5 => Architecture::Updi,
            v => Architecture::Other(v),
        }
    }
}

impl From<Architecture> for u8 {
    fn from(arch: Architecture) -> Self {
        match arch {
            Architecture::Unset => 0,
            Architecture::Avr8 => 1,
            Architecture::Avr32 => 2,
            Architecture::Xmega => 3,
            Architecture::Updi => 5,
            Architecture::Other(v) => v,
        }
    }
}

/// Device descriptor blob set by the host (`PARM3_DEVICEDESC`).
///
/// Kept verbatim; only diagnostics look inside.
#[derive(Clone, Copy)]
pub struct DeviceDescriptor {
    raw: [u8; DEVICE_DESCRIPTOR_SIZE],
    len: usize,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            raw: [0; DEVICE_DESCRIPTOR_SIZE],
            len: 0,
        }
    }
}

impl DeviceDescriptor {
    /// Replaces the stored blob, truncating to 64 bytes.
    pub fn store(&mut self, data: &[u8]) {
        let len = data.len().min(DEVICE_DESCRIPTOR_SIZE);
        self.raw[..len].copy_from_slice(&data[..len]);
        self.raw[len..].fill(0);
        self.len = len;
    }

    /// Bytes stored by the last [`store()`](DeviceDescriptor::store).
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.len]
    }

    /// Interprets the blob as a UPDI device descriptor.
    pub fn updi(&self) -> UPDIDeviceDescriptor {
        UPDIDeviceDescriptor::parse(&self.raw)
    }
}

/// Memory layout constants from a UPDI device descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UPDIDeviceDescriptor {
    /// Flash base in the UPDI address space, 24-bit.
    pub prog_base: u32,
    /// Flash page size in bytes.
    pub flash_page_size: u16,
    /// EEPROM page size in bytes.
    pub eeprom_page_size: u8,
    /// NVM controller base address.
    pub nvm_base_addr: u16,
    /// OCD base address.
    pub ocd_base_addr: u16,
    /// Flash size in bytes.
    pub flash_bytes: u32,
    /// EEPROM size in bytes.
    pub eeprom_bytes: u16,
    /// User signature (user row) size in bytes.
    pub user_sig_bytes: u16,
    /// Number of fuse bytes.
    pub fuses_bytes: u8,
    /// EEPROM base address.
    pub eeprom_base: u16,
    /// User signature base address.
    pub user_sig_base: u16,
    /// Signature row base address.
    pub signature_base: u16,
    /// Fuses base address.
    pub fuses_base: u16,
    /// Lock bits base address.
    pub lockbits_base: u16,
    /// Last two bytes of the device ID.
    pub device_id: u16,
    /// `0` for 16-bit, `1` for 24-bit UPDI addressing.
    pub address_mode: u8,
    /// High-voltage UPDI variant.
    pub hvupdi_variant: u8,
}

impl UPDIDeviceDescriptor {
    fn parse(raw: &[u8; DEVICE_DESCRIPTOR_SIZE]) -> Self {
        let u16_at = |o: usize| u16::from_le_bytes([raw[o], raw[o + 1]]);
        let u32_at = |o: usize| u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]);

        Self {
            prog_base: u16_at(0) as u32 | ((raw[44] as u32) << 16),
            flash_page_size: raw[2] as u16 | ((raw[45] as u16) << 8),
            eeprom_page_size: raw[3],
            nvm_base_addr: u16_at(4),
            ocd_base_addr: u16_at(6),
            // 8..18: voltages and PDI clock, kit-only
            flash_bytes: u32_at(18),
            eeprom_bytes: u16_at(22),
            user_sig_bytes: u16_at(24),
            fuses_bytes: raw[26],
            // 27..32: SYSCFG masks
            eeprom_base: u16_at(32),
            user_sig_base: u16_at(34),
            signature_base: u16_at(36),
            fuses_base: u16_at(38),
            lockbits_base: u16_at(40),
            device_id: u16_at(42),
            address_mode: raw[46],
            hvupdi_variant: raw[47],
        }
    }
}

/// Negotiated identifiers, alive for one USB attachment.
#[derive(Clone, Copy)]
pub struct Session {
    arch: Architecture,
    connection: u8,
    boot_size: u32,
    descriptor: DeviceDescriptor,
}

impl Session {
    /// Starts an unsigned session. `boot_size` is the protected size of
    /// the resident code, fixed for the life of the device.
    pub fn new(boot_size: u32) -> Self {
        Self {
            arch: Architecture::Unset,
            connection: 0,
            boot_size,
            descriptor: DeviceDescriptor::default(),
        }
    }

    /// Clears every negotiated field. Used on USB bus reset.
    pub fn reset(&mut self) {
        *self = Self::new(self.boot_size);
    }

    /// `SIGN_ON`: forget the architecture.
    pub fn sign_on(&mut self) {
        info!("sign on");
        self.arch = Architecture::Unset;
    }

    /// `SIGN_OFF`: back to unsigned, memory commands refused until the
    /// architecture is set again.
    pub fn sign_off(&mut self) {
        info!("sign off");
        self.arch = Architecture::Unset;
    }

    /// Selected architecture.
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    /// Selects the architecture (`PARM3_ARCH`).
    pub fn set_architecture(&mut self, arch: Architecture) {
        info!("arch={:?}", arch);
        self.arch = arch;
    }

    /// `true` when memory commands may run.
    pub fn is_updi(&self) -> bool {
        self.arch == Architecture::Updi
    }

    /// Connection type (`PARM3_CONNECTION`).
    pub fn connection(&self) -> u8 {
        self.connection
    }

    /// Stores the connection type.
    pub fn set_connection(&mut self, connection: u8) {
        debug!("connection={:#04x}", connection);
        self.connection = connection;
    }

    /// Size of the write-protected resident code region, in bytes.
    pub fn boot_size(&self) -> u32 {
        self.boot_size
    }

    /// Stored device descriptor.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Stores the device descriptor sent by the host.
    pub fn set_descriptor(&mut self, data: &[u8]) {
        self.descriptor.store(data);
        if self.is_updi() {
            let d = self.descriptor.updi();
            debug!(
                "UPDI descriptor: prog_base={:#08x} page={} flash={:#x} mode={}",
                d.prog_base,
                d.flash_page_size,
                d.flash_bytes,
                d.address_mode
            );
            debug!(
                "eeprom={:#x}@{:#06x} user_sig={:#x}@{:#06x} fuses={}@{:#06x}",
                d.eeprom_bytes,
                d.eeprom_base,
                d.user_sig_bytes,
                d.user_sig_base,
                d.fuses_bytes,
                d.fuses_base
            );
        } else {
            debug!("device descriptor: {} bytes", self.descriptor.as_bytes().len());
        }
    }
}
