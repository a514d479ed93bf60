#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//!
//! Implements an EDBG (CMSIS-DAP vendor extension) in-system memory
//! programmer for a `usb-device` device.
//!
//! ## About
//!
//! Host programming tools such as AVRDUDE talk to Microchip EDBG debuggers
//! with JTAGICE3 packets. The packets travel inside 64-byte CMSIS-DAP HID
//! reports, split into fragments of up to 60 bytes. This library turns a
//! microcontroller into such a debugger for *itself*: the device answers the
//! UPDI programming commands by reading and writing its own memories, so it
//! can be used as a USB bootloader that needs no host-side driver.
//!
//! This library is a protocol implementation only, the code that actually
//! touches the NVM controller is not a part of the library and is expected
//! to be provided by the library user through [`NVMBackend`].
//!
//! ### Supported operations
//!
//! * Read of every memory (flash, EEPROM, user row, boot row, fuses,
//!   lock bits, signature, SRAM, SIB)
//! * Write of flash, EEPROM, user row and boot row
//! * User row page erase
//!
//! ### Not supported operations
//!
//! * Chip erase, fuse and lock bit writes. These are accepted and do nothing.
//! * Writes below the boot-protected size. The resident code can't be
//!   overwritten; such writes are also accepted and do nothing.
//!
//! ### Limitations
//!
//! * One request at a time. Requests are at most 540 bytes (9 fragments),
//!   replies at most 900 bytes (15 fragments).
//! * Memory reads are limited to 512 bytes per request.
//!
//! ## Example
//!
//! The example below tries to focus on [`EDBGClass`], parts related to a
//! target controller initialization and configuration (USB, clocks,
//! watchdog, etc.) are not in the scope of the example.
//!
//! ```no_run
//! use usb_device::prelude::*;
//! use usb_device::bus::{UsbBus, UsbBusAllocator};
//! use usb_device::LangID;
//! use usbd_edbg::*;
//!
//! // The NVM controller of the chip. EDBGClass decides what to issue and in
//! // which order, this only performs the accesses.
//! struct MyNVM {
//!     memory: [u8; 0x10000],
//! }
//!
//! impl NVMBackend for MyNVM {
//!     fn boot_size(&self) -> u32 {
//!         // BOOTSIZE fuse, in 512-byte pages
//!         boot_size_from_fuse(2)
//!     }
//!
//!     fn command(&mut self, _cmd: NVMCommand) {
//!         // write NVMCTRL.CTRLA
//!     }
//!
//!     fn read(&mut self, _region: Region, address: u16, buf: &mut [u8]) {
//!         let from = address as usize;
//!         let len = buf.len().min(self.memory.len() - from);
//!         buf[..len].copy_from_slice(&self.memory[from..from + len]);
//!     }
//!
//!     fn write(&mut self, _region: Region, address: u16, data: &[u8]) {
//!         let from = address as usize;
//!         let len = data.len().min(self.memory.len() - from);
//!         self.memory[from..from + len].copy_from_slice(&data[..len]);
//!     }
//! }
//!
//! // Board hooks. Only the supply voltage is mandatory.
//! struct MyBoard;
//!
//! impl Board for MyBoard {
//!     fn target_voltage(&mut self) -> u16 {
//!         3300
//!     }
//! }
//!
//! fn run<B: UsbBus>(usb_bus_alloc: &UsbBusAllocator<B>) -> ! {
//!     let mut edbg = EDBGClass::new(
//!         usb_bus_alloc,
//!         MyNVM { memory: [0xff; 0x10000] },
//!         MyBoard,
//!     );
//!
//!     let mut usb_dev = UsbDeviceBuilder::new(usb_bus_alloc, UsbVidPid(USB_VID, USB_PID))
//!         .strings(&[StringDescriptors::new(LangID::EN_US).product(PRODUCT_STRING)])
//!         .unwrap()
//!         .build();
//!
//!     // usb_dev.poll() must be called periodically. The watchdog is fed
//!     // separately, on every pass, until the host sends DAP_Disconnect.
//!     loop {
//!         usb_dev.poll(&mut [&mut edbg]);
//!         edbg.service_watchdog();
//!     }
//! }
//! ```
//!
//! [`Engine`] can also be driven without USB, one report at a time, with
//! [`Engine::process_report()`].
//!

/// USB class: HID interface and endpoints
pub mod class;

pub mod engine;

pub mod board;
pub mod fragment;
pub mod nvm;
pub mod packet;
pub mod scope;
pub mod session;

#[doc(inline)]
pub use crate::board::Board;
#[doc(inline)]
pub use crate::class::{EDBGClass, PRODUCT_STRING, USB_PID, USB_VID};
#[doc(inline)]
pub use crate::engine::Engine;
#[doc(inline)]
pub use crate::nvm::{boot_size_from_fuse, NVMBackend, NVMCommand, Outcome, Region};
