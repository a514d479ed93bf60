//! Board collaborators: supply voltage, status LED, watchdog.

/// Board-level collaborators of the protocol engine and the identity it
/// reports to the host.
///
/// Only [`target_voltage()`](Board::target_voltage) has to be provided,
/// everything else has a default suitable for a board without a status LED
/// or watchdog.
pub trait Board {
    /// Answer to General scope `GET_PARAMETER` section 0:
    /// hardware version, firmware major, firmware minor, firmware release (LE).
    ///
    /// Defaults to `52, 3, 72, 48, 0`, which AVRDUDE accepts from an EDBG kit.
    const FIRMWARE_VERSION: [u8; 5] = [52, 3, 72, 48, 0];

    /// System information block returned for `MTYPE_SIB` reads. The first
    /// four bytes also answer the UPDI sign-on.
    const SIB: [u8; 32] = *b"AVR     P:4D:1-3M2 (EDBG.Boot.)\0";

    /// Own supply voltage in millivolts (`PARM3_VTARGET`).
    ///
    /// Called from `usb_dev.poll([])` while a request is dispatched.
    fn target_voltage(&mut self) -> u16;

    /// `DAP_HostStatus` connect indication from the host.
    fn host_status(&mut self, _connected: bool) {}

    /// Called from [`EDBGClass::service_watchdog()`](crate::EDBGClass::service_watchdog)
    /// on every main loop pass while the device should stay alive.
    fn feed_watchdog(&mut self) {}

    /// `DAP_Disconnect` was received. The board should make the watchdog
    /// expire soon; it will not be fed again.
    fn arm_reset(&mut self) {}

    /// Called every time USB is reset.
    fn usb_reset(&mut self) {}
}
