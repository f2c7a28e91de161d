//! Named interfaces to the collaborators spec.md §1 calls out as external:
//! GPIO, edge-triggered interrupts, a one-shot hardware timer, a
//! free-running microsecond counter, a busy-wait, and the USB HID report
//! sink. The core never names a concrete MCU register; `main.rs` is the
//! only place these are wired to `rp2040_hal`.

/// A GPIO pin read as a boolean level. The line engine always reads
/// through the bus inversion described in spec.md §4.1 ("reading a GPIO
/// pin as HIGH means the bus line is LOW"); this trait is the raw,
/// uninverted level.
pub trait InputPin {
    fn is_high(&mut self) -> bool;
}

/// A GPIO pin driven to a boolean level. Driving HIGH forces the 5V bus
/// line LOW (spec.md §4.1/§6).
pub trait OutputPin {
    fn set_high(&mut self);
    fn set_low(&mut self);
}

/// Edge-triggered interrupt control for CLK_IN.
pub trait EdgeIrq {
    fn enable_rising(&mut self);
    fn enable_falling(&mut self);
    fn disable(&mut self);
    fn acknowledge(&mut self);
}

/// A one-shot hardware timer with a callback that fires once, `micros`
/// after `start` is called. `cancel` must be idempotent: calling it when
/// no timer is pending is a no-op (spec.md §5, "each active one-shot
/// timer must be cancelled on every state transition that would leave it
/// stale").
pub trait OneShotTimer {
    fn start(&mut self, micros: u32);
    fn cancel(&mut self);
}

/// A free-running microsecond counter, a busy-wait primitive, and the
/// CPU idle instruction used by the main loop between interrupts.
pub trait Clock {
    fn micros(&self) -> u32;
    fn busy_wait_micros(&self, micros: u32);
    fn wait_for_interrupt(&self);
}

/// The USB HID report sink (spec.md §6). Only responsible for pushing
/// bytes out; report-mode selection and idle-rate live in
/// `report::ReportAssembler`.
pub trait HidSink {
    fn send_report(&mut self, report: &[u8]) -> Result<(), crate::error::Error>;
}

/// Requests the microcontroller's mass-storage bootloader (spec.md §4.3
/// "Bootloader escape"). Never returns.
pub trait BootRom {
    fn reset_to_usb_boot(&self) -> !;
}
