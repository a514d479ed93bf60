use log::warn;
use usb_device::{class_prelude::*, control::Request, LangID, UsbError};

use crate::board::Board;
use crate::engine::Engine;
use crate::fragment::{Report, REPORT_SIZE};
use crate::nvm::NVMBackend;

/// Default vendor ID (Microchip).
pub const USB_VID: u16 = 0x04D8;
/// Default product ID.
pub const USB_PID: u16 = 0x0B12;

/// Product string for the device descriptor. Host tools recognize the
/// probe by the `CMSIS-DAP` substring.
pub const PRODUCT_STRING: &str = "CMSIS-DAP:EDBG";

const USB_CLASS_HID: u8 = 0x03;
const USB_SUBCLASS_NONE: u8 = 0x00;
const USB_PROTOCOL_NONE: u8 = 0x00;

const HID_GET_REPORT: u8 = 0x01;
const HID_GET_IDLE: u8 = 0x02;
const HID_GET_PROTOCOL: u8 = 0x03;
const HID_SET_IDLE: u8 = 0x0A;
const HID_SET_PROTOCOL: u8 = 0x0B;

const DESC_DESCTYPE_HID: u8 = 0x21;
const DESC_DESCTYPE_HID_REPORT: u8 = 0x22;

/// Vendor page HID report descriptor: one 64-byte input report, one
/// 64-byte output report and a 4-byte feature report.
pub const REPORT_DESCRIPTOR: [u8; 35] = [
    0x06, 0x00, 0xFF, // Usage Page (Vendor Defined 0xFF00)
    0x09, 0x01, // Usage (0x01)
    0xA1, 0x01, // Collection (Application)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x96, 0x40, 0x00, //   Report Count (64)
    0x09, 0x01, //   Usage (0x01)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x96, 0x40, 0x00, //   Report Count (64)
    0x09, 0x01, //   Usage (0x01)
    0x91, 0x02, //   Output (Data,Var,Abs)
    0x95, 0x04, //   Report Count (4)
    0x09, 0x01, //   Usage (0x01)
    0xB1, 0x02, //   Feature (Data,Var,Abs)
    0xC0, // End Collection
];

/// CMSIS-DAP (HID) USB class carrying the EDBG protocol, for the
/// usb-device library.
///
/// Reports are exchanged on an interrupt OUT/IN endpoint pair. A report
/// is taken from the OUT endpoint only while no response waits to be
/// written, so the host sees NAKs instead of lost replies. A response is
/// written only after the host took the previous one from the IN endpoint.
///
/// The watchdog is not serviced from USB callbacks, see
/// [`service_watchdog()`](EDBGClass::service_watchdog).
pub struct EDBGClass<'a, B: UsbBus, M: NVMBackend, H: Board> {
    if_num: InterfaceNumber,
    interface_string: StringIndex,
    ep_out: EndpointOut<'a, B>,
    ep_in: EndpointIn<'a, B>,
    engine: Engine<M, H>,
    request: Report,
    request_pending: bool,
    response: Report,
    response_pending: bool,
    in_flight: bool,
    idle_rate: u8,
    protocol: u8,
}

impl<B: UsbBus, M: NVMBackend, H: Board> UsbClass<B> for EDBGClass<'_, B, M, H> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface_alt(
            self.if_num,
            0,
            USB_CLASS_HID,
            USB_SUBCLASS_NONE,
            USB_PROTOCOL_NONE,
            Some(self.interface_string),
        )?;

        writer.write(DESC_DESCTYPE_HID, &Self::hid_descriptor())?;

        writer.endpoint(&self.ep_out)?;
        writer.endpoint(&self.ep_in)?;

        Ok(())
    }

    fn get_string(&self, index: StringIndex, _lang_id: LangID) -> Option<&str> {
        if index == self.interface_string {
            return Some(PRODUCT_STRING);
        }
        None
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();

        if req.recipient != control::Recipient::Interface {
            return;
        }

        if req.index != u8::from(self.if_num) as u16 {
            return;
        }

        match req.request_type {
            control::RequestType::Standard if req.request == Request::GET_DESCRIPTOR => {
                self.get_descriptor(xfer, req);
            }
            control::RequestType::Class => match req.request {
                HID_GET_REPORT => {
                    xfer.accept_with(&self.response).ok();
                }
                HID_GET_IDLE => {
                    xfer.accept_with(&[self.idle_rate]).ok();
                }
                HID_GET_PROTOCOL => {
                    xfer.accept_with(&[self.protocol]).ok();
                }
                _ => {
                    xfer.reject().ok();
                }
            },
            _ => {}
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();

        if req.request_type != control::RequestType::Class {
            return;
        }

        if req.recipient != control::Recipient::Interface {
            return;
        }

        if req.index != u8::from(self.if_num) as u16 {
            return;
        }

        match req.request {
            HID_SET_IDLE => {
                self.idle_rate = (req.value >> 8) as u8;
                xfer.accept().ok();
            }
            HID_SET_PROTOCOL => {
                self.protocol = req.value as u8;
                xfer.accept().ok();
            }
            _ => {
                xfer.reject().ok();
            }
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr == self.ep_out.address() {
            self.read_request();
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr == self.ep_in.address() {
            self.in_flight = false;
            self.write_response();
        }
    }

    fn reset(&mut self) {
        self.request_pending = false;
        self.response_pending = false;
        self.in_flight = false;
        self.idle_rate = 0;
        self.protocol = 1;
        self.engine.reset();
    }

    fn poll(&mut self) {
        // an OUT report may have arrived while the previous reply was queued
        self.read_request();

        if self.request_pending && !self.response_pending {
            self.engine.process_report(&self.request, &mut self.response);
            self.request_pending = false;
            self.response_pending = true;
        }

        self.write_response();
    }
}

impl<'a, B: UsbBus, M: NVMBackend, H: Board> EDBGClass<'a, B, M, H> {
    /// Creates a new EDBGClass with the provided UsbBus, memory backend
    /// and board hooks.
    pub fn new(alloc: &'a UsbBusAllocator<B>, mem: M, board: H) -> Self {
        Self {
            if_num: alloc.interface(),
            interface_string: alloc.string(),
            ep_out: alloc.interrupt(REPORT_SIZE as u16, 1),
            ep_in: alloc.interrupt(REPORT_SIZE as u16, 1),
            engine: Engine::new(mem, board),
            request: [0; REPORT_SIZE],
            request_pending: false,
            response: [0; REPORT_SIZE],
            response_pending: false,
            in_flight: false,
            idle_rate: 0,
            protocol: 1,
        }
    }

    /// Feeds the board watchdog unless `DAP_Disconnect` armed a reset.
    ///
    /// `usb-device` only calls into the class when there is bus activity,
    /// so this has to be called from the main loop, next to
    /// `usb_dev.poll()`.
    pub fn service_watchdog(&mut self) {
        self.engine.service_watchdog();
    }

    /// The protocol engine.
    pub fn engine(&self) -> &Engine<M, H> {
        &self.engine
    }

    /// The protocol engine, mutable.
    pub fn engine_mut(&mut self) -> &mut Engine<M, H> {
        &mut self.engine
    }

    fn hid_descriptor() -> [u8; 7] {
        let len = (REPORT_DESCRIPTOR.len() as u16).to_le_bytes();
        [
            // bcdHID 1.10
            0x10,
            0x01,
            // bCountryCode
            0x00,
            // bNumDescriptors
            0x01,
            // bDescriptorType, wDescriptorLength
            DESC_DESCTYPE_HID_REPORT,
            len[0],
            len[1],
        ]
    }

    fn get_descriptor(&mut self, xfer: ControlIn<B>, req: control::Request) {
        match (req.value >> 8) as u8 {
            DESC_DESCTYPE_HID_REPORT => {
                xfer.accept_with(&REPORT_DESCRIPTOR).ok();
            }
            DESC_DESCTYPE_HID => {
                let mut desc = [0u8; 9];
                desc[0] = desc.len() as u8;
                desc[1] = DESC_DESCTYPE_HID;
                desc[2..].copy_from_slice(&Self::hid_descriptor());
                xfer.accept_with(&desc).ok();
            }
            _ => {
                xfer.reject().ok();
            }
        }
    }

    fn read_request(&mut self) {
        if self.request_pending {
            return;
        }
        match self.ep_out.read(&mut self.request) {
            Ok(n) => {
                // short reports are padded, every request is 64 bytes
                self.request[n..].fill(0);
                self.request_pending = true;
            }
            Err(UsbError::WouldBlock) => {}
            Err(e) => {
                warn!("OUT endpoint read failed: {:?}", e);
            }
        }
    }

    fn write_response(&mut self) {
        if !self.response_pending || self.in_flight {
            return;
        }
        match self.ep_in.write(&self.response) {
            Ok(_) => {
                self.response_pending = false;
                self.in_flight = true;
            }
            Err(UsbError::WouldBlock) => {}
            Err(e) => {
                warn!("IN endpoint write failed: {:?}", e);
                self.response_pending = false;
            }
        }
    }
}
