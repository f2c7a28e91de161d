//! Board wiring for the RP2040 Pico: GPIO pins, the USB HID device, and
//! the interrupt handlers that drive `picoatxt`'s core state machines.
//! Everything protocol-specific lives in the library crate; this binary
//! only implements the `hal` traits against `rp2040_hal` and owns the
//! shared state behind `critical_section::Mutex`.

#![no_std]
#![no_main]

use core::cell::RefCell;

use cortex_m::delay::Delay;
use critical_section::Mutex;
use defmt_rtt as _;
use fugit::{ExtU32, RateExtU32};
use panic_probe as _;

use rp2040_hal as hal;
use hal::gpio::{FunctionSio, Interrupt as GpioInterrupt, PullNone, PullUp, SioInput, SioOutput};
use hal::pac;
use hal::pac::interrupt;
use hal::timer::{Alarm, Alarm0, Alarm1};
use hal::Clock as _;

use usb_device::class_prelude::*;
use usb_device::prelude::*;
use usbd_hid::hid_class::HIDClass;

use picoatxt::hal::{BootRom, Clock as CoreClock, EdgeIrq, HidSink, InputPin, OneShotTimer, OutputPin};
use picoatxt::line::{Command, LineEngine};
use picoatxt::report::{Action, LedState, ReportAssembler};
use picoatxt::{Error, Protocol};

#[link_section = ".boot2"]
#[used]
pub static BOOT2_FIRMWARE: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

/// Matches the USB-IDs-for-free generic-HID range used by small hobby
/// boards that do not want to buy a dedicated VID/PID pair.
const VID: u16 = 0x16c0;
const PID: u16 = 0x27db;

const XOSC_CRYSTAL_FREQ: u32 = 12_000_000;

/// CLK_IN / DATA_IN / CLK_OUT / DATA_OUT, spec.md §6.
type ClkIn = hal::gpio::Pin<hal::gpio::bank0::Gpio21, FunctionSio<SioInput>, PullNone>;
type DataIn = hal::gpio::Pin<hal::gpio::bank0::Gpio20, FunctionSio<SioInput>, PullNone>;
type ClkOut = hal::gpio::Pin<hal::gpio::bank0::Gpio11, FunctionSio<SioOutput>, PullNone>;
type DataOut = hal::gpio::Pin<hal::gpio::bank0::Gpio10, FunctionSio<SioOutput>, PullNone>;

/// Thin wrapper so `picoatxt::hal::InputPin`/`OutputPin` can be
/// implemented on `rp2040_hal` pin types without an orphan-rule clash.
struct InPin<P>(P);
struct OutPin<P>(P);

impl<P: hal::gpio::PinId> InputPin for InPin<hal::gpio::Pin<P, FunctionSio<SioInput>, PullNone>> {
    fn is_high(&mut self) -> bool {
        self.0.is_high().unwrap_or(false)
    }
}

impl<P: hal::gpio::PinId> OutputPin for OutPin<hal::gpio::Pin<P, FunctionSio<SioOutput>, PullNone>> {
    fn set_high(&mut self) {
        let _ = self.0.set_high();
    }
    fn set_low(&mut self) {
        let _ = self.0.set_low();
    }
}

/// CLK_IN is GPIO21 (spec.md §6). `IO_BANK0`'s interrupt registers are
/// banked in groups of 8 GPIOs, 4 status/enable bits per pin within each
/// bank register (bit0 LEVEL_LOW, bit1 LEVEL_HIGH, bit2 EDGE_LOW, bit3
/// EDGE_HIGH at `(gpio % 8) * 4`).
const CLK_IN_GPIO: u8 = 21;

/// CLK_IN's edge interrupt, switched between rising/falling by the line
/// engine as spec.md §4.1 requires.
struct ClkEdgeIrq {
    gpio: u8,
}

impl ClkEdgeIrq {
    fn bank(&self) -> usize {
        (self.gpio / 8) as usize
    }

    fn offset(&self) -> u32 {
        (self.gpio % 8) as u32 * 4
    }
}

impl EdgeIrq for ClkEdgeIrq {
    fn enable_rising(&mut self) {
        let io = unsafe { &(*pac::IO_BANK0::ptr()) };
        let (bank, offset) = (self.bank(), self.offset());
        let all_four = 0b1111u32 << offset;
        let edge_high = 0b1000u32 << offset;
        io.intr[bank].write(|w| unsafe { w.bits(all_four) }); // w1c: clear stale status for this pin only
        io.proc0_inte[bank].modify(|r, w| unsafe { w.bits((r.bits() & !all_four) | edge_high) });
    }

    fn enable_falling(&mut self) {
        let io = unsafe { &(*pac::IO_BANK0::ptr()) };
        let (bank, offset) = (self.bank(), self.offset());
        let all_four = 0b1111u32 << offset;
        let edge_low = 0b0100u32 << offset;
        io.intr[bank].write(|w| unsafe { w.bits(all_four) });
        io.proc0_inte[bank].modify(|r, w| unsafe { w.bits((r.bits() & !all_four) | edge_low) });
    }

    fn disable(&mut self) {
        let io = unsafe { &(*pac::IO_BANK0::ptr()) };
        let (bank, offset) = (self.bank(), self.offset());
        let all_four = 0b1111u32 << offset;
        io.proc0_inte[bank].modify(|r, w| unsafe { w.bits(r.bits() & !all_four) });
    }

    fn acknowledge(&mut self) {
        let io = unsafe { &(*pac::IO_BANK0::ptr()) };
        let all_four = 0b1111u32 << self.offset();
        io.intr[self.bank()].write(|w| unsafe { w.bits(all_four) });
    }
}

/// The frame-timeout / BAT-safety / reset-pulse one-shot (spec.md §4.1),
/// backed by hardware Alarm0.
struct FrameTimer {
    alarm: Alarm0,
}

impl OneShotTimer for FrameTimer {
    fn start(&mut self, micros: u32) {
        let _ = self.alarm.schedule(micros.micros());
        self.alarm.enable_interrupt();
    }

    fn cancel(&mut self) {
        self.alarm.disable_interrupt();
        let _ = self.alarm.clear_interrupt();
    }
}

/// Free-running counter, busy-wait, and WFI, backed by the RP2040's
/// always-on microsecond timer.
struct SystemClock {
    timer: hal::Timer,
}

impl CoreClock for SystemClock {
    fn micros(&self) -> u32 {
        self.timer.get_counter_low()
    }

    fn busy_wait_micros(&self, micros: u32) {
        self.timer.delay_us(micros);
    }

    fn wait_for_interrupt(&self) {
        cortex_m::asm::wfi();
    }
}

/// Pushes a finished report out the USB HID endpoint.
struct UsbHid;

impl HidSink for UsbHid {
    fn send_report(&mut self, report: &[u8]) -> Result<(), Error> {
        critical_section::with(|cs| {
            if let Some(hid) = HID_CLASS.borrow(cs).borrow_mut().as_mut() {
                match hid.push_raw_input(report) {
                    Ok(_) | Err(UsbError::WouldBlock) => Ok(()),
                    Err(_) => Err(Error::UsbSend),
                }
            } else {
                Ok(())
            }
        })
    }
}

struct RomBootSel;

impl BootRom for RomBootSel {
    fn reset_to_usb_boot(&self) -> ! {
        hal::rom_data::reset_to_usb_boot(0, 0);
        loop {
            cortex_m::asm::nop();
        }
    }
}

type Engine = LineEngine<InPin<ClkIn>, InPin<DataIn>, OutPin<ClkOut>, OutPin<DataOut>, ClkEdgeIrq, FrameTimer, SystemClock>;

static LINE_ENGINE: Mutex<RefCell<Option<Engine>>> = Mutex::new(RefCell::new(None));
static REPORT_ASSEMBLER: Mutex<RefCell<Option<ReportAssembler>>> = Mutex::new(RefCell::new(None));
static TICK_ALARM: Mutex<RefCell<Option<Alarm1>>> = Mutex::new(RefCell::new(None));
static USB_DEVICE: Mutex<RefCell<Option<UsbDevice<'static, hal::usb::UsbBus>>>> = Mutex::new(RefCell::new(None));
static HID_CLASS: Mutex<RefCell<Option<HIDClass<'static, hal::usb::UsbBus>>>> = Mutex::new(RefCell::new(None));

/// Raw 22-byte-report HID descriptor: usage 0x04..=0xAB as a 168-bit
/// array (spec.md §3 `KeyBitmap`'s first 21 bytes), then an 8-bit
/// modifier bitmap (usage 0xE0..=0xE7), then a 3-bit LED output report.
#[rustfmt::skip]
const HID_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01,       // Usage Page (Generic Desktop)
    0x09, 0x06,       // Usage (Keyboard)
    0xA1, 0x01,       // Collection (Application)
    0x05, 0x07,       //   Usage Page (Keyboard/Keypad)
    0x19, 0x04,       //   Usage Minimum (0x04)
    0x29, 0xAB,       //   Usage Maximum (0xAB)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x01,       //   Logical Maximum (1)
    0x75, 0x01,       //   Report Size (1)
    0x95, 0xA8,       //   Report Count (168)
    0x81, 0x02,       //   Input (Data, Variable, Absolute)
    0x19, 0xE0,       //   Usage Minimum (0xE0)
    0x29, 0xE7,       //   Usage Maximum (0xE7)
    0x95, 0x08,       //   Report Count (8)
    0x81, 0x02,       //   Input (Data, Variable, Absolute)
    0x05, 0x08,       //   Usage Page (LEDs)
    0x19, 0x01,       //   Usage Minimum (Num Lock)
    0x29, 0x03,       //   Usage Maximum (Scroll Lock)
    0x95, 0x03,       //   Report Count (3)
    0x91, 0x02,       //   Output (Data, Variable, Absolute)
    0x95, 0x05,       //   Report Count (5) - padding
    0x91, 0x01,       //   Output (Constant)
    0xC0,             // End Collection
];

#[cortex_m_rt::entry]
fn main() -> ! {
    let mut pac = pac::Peripherals::take().unwrap();
    let core = pac::CorePeripherals::take().unwrap();
    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let clocks = hal::clocks::init_clocks_and_plls(
        XOSC_CRYSTAL_FREQ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    let mut delay = Delay::new(core.SYST, clocks.system_clock.freq().to_Hz());
    let sio = hal::Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(pac.IO_BANK0, pac.PADS_BANK0, sio.gpio_bank0, &mut pac.RESETS);

    let clk_in: ClkIn = pins.gpio21.into_floating_input();
    let data_in: DataIn = pins.gpio20.into_floating_input();
    let mut clk_out: ClkOut = pins.gpio11.into_push_pull_output();
    let mut data_out: DataOut = pins.gpio10.into_push_pull_output();
    clk_out.set_low().unwrap(); // released: bus CLK idle-high.
    data_out.set_low().unwrap(); // released: bus DATA idle-high.

    clk_in.set_interrupt_enabled(GpioInterrupt::EdgeHigh, true);

    let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let mut frame_alarm = timer.alarm_0().unwrap();
    frame_alarm.enable_interrupt();
    let mut tick_alarm = timer.alarm_1().unwrap();
    tick_alarm.schedule(1.millis()).unwrap();
    tick_alarm.enable_interrupt();

    let mut engine = LineEngine::new(
        InPin(clk_in),
        InPin(data_in),
        OutPin(clk_out),
        OutPin(data_out),
        ClkEdgeIrq { gpio: CLK_IN_GPIO },
        FrameTimer { alarm: frame_alarm },
        SystemClock { timer },
    );

    defmt::info!("picoatxt: awaiting BAT");
    let protocol = match engine.init() {
        Ok(p) => p,
        Err(e) => {
            defmt::error!("BAT detection failed: {:?}", e);
            // Fall back to AT framing so the report assembler has
            // something to decode; the line stays inhibited either way.
            Protocol::At
        }
    };
    defmt::info!("picoatxt: detected {:?}", protocol);

    critical_section::with(|cs| {
        LINE_ENGINE.borrow(cs).replace(Some(engine));
        REPORT_ASSEMBLER.borrow(cs).replace(Some(ReportAssembler::new(protocol)));
        TICK_ALARM.borrow(cs).replace(Some(tick_alarm));
    });

    static mut USB_BUS: Option<UsbBusAllocator<hal::usb::UsbBus>> = None;
    let usb_bus = unsafe {
        USB_BUS = Some(UsbBusAllocator::new(hal::usb::UsbBus::new(
            pac.USBCTRL_REGS,
            pac.USBCTRL_DPRAM,
            clocks.usb_clock,
            true,
            &mut pac.RESETS,
        )));
        USB_BUS.as_ref().unwrap()
    };

    let hid_class = HIDClass::new(usb_bus, HID_REPORT_DESCRIPTOR, 10);
    let usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(VID, PID))
        .manufacturer("picoatxt")
        .product("PC/XT-AT Keyboard Converter")
        .serial_number(env!("CARGO_PKG_VERSION"))
        .device_class(0)
        .build();

    critical_section::with(|cs| {
        HID_CLASS.borrow(cs).replace(Some(hid_class));
        USB_DEVICE.borrow(cs).replace(Some(usb_dev));
    });

    unsafe {
        pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0);
        pac::NVIC::unmask(pac::Interrupt::TIMER_IRQ_0);
        pac::NVIC::unmask(pac::Interrupt::TIMER_IRQ_1);
        pac::NVIC::unmask(pac::Interrupt::USBCTRL_IRQ);
    }

    loop {
        drain_packets();
        delay.delay_ms(1);
    }
}

/// Drains every ring-buffered packet, feeding it through command
/// orchestration, then acts on whatever `Action` comes back. Called from
/// both the main loop (idle draining) and the tick ISR.
fn drain_packets() {
    loop {
        let action = critical_section::with(|cs| {
            let mut engine_ref = LINE_ENGINE.borrow(cs).borrow_mut();
            let engine = match engine_ref.as_mut() {
                Some(e) => e,
                None => return None,
            };
            let packet = engine.get_packet()?;
            let mut ra_ref = REPORT_ASSEMBLER.borrow(cs).borrow_mut();
            let ra = ra_ref.as_mut().expect("report assembler initialised with the engine");
            Some(ra.handle_packet(packet.data, packet.last_command))
        });
        let Some(action) = action else { break };
        apply_action(action);
    }
}

fn apply_action(action: Action) {
    match action {
        Action::None => {}
        Action::Command(cmd) => send_command(cmd),
        Action::RawByte(byte) => send_raw_byte(byte),
    }
}

fn send_command(cmd: Command) {
    critical_section::with(|cs| {
        if let Some(engine) = LINE_ENGINE.borrow(cs).borrow_mut().as_mut() {
            if let Err(e) = engine.send_command(cmd) {
                defmt::warn!("picoatxt: send_command {:?} rejected: {:?}", cmd, e);
            }
        }
    });
}

/// Sends a raw AT byte: either a resend of the last command byte
/// (§4.3 Resend/framing-error path) or the lock-light state byte
/// queued right after `SetLockLights` acks.
fn send_raw_byte(byte: u8) {
    critical_section::with(|cs| {
        if let Some(engine) = LINE_ENGINE.borrow(cs).borrow_mut().as_mut() {
            if let Err(e) = engine.send_at_command(byte) {
                defmt::warn!("picoatxt: send_at_command 0x{:x} rejected: {:?}", byte, e);
            }
        }
    });
}

/// CLK_IN edge — dispatches into the line engine's rising/falling
/// handlers (spec.md §4.1).
#[interrupt]
fn IO_IRQ_BANK0() {
    critical_section::with(|cs| {
        if let Some(engine) = LINE_ENGINE.borrow(cs).borrow_mut().as_mut() {
            let io = unsafe { &(*pac::IO_BANK0::ptr()) };
            let bank = (CLK_IN_GPIO / 8) as usize;
            let offset = (CLK_IN_GPIO % 8) as u32 * 4;
            let status = io.intr[bank].read().bits();
            if status & (0b1000 << offset) != 0 {
                engine.on_rising_edge();
            } else if status & (0b0100 << offset) != 0 {
                engine.on_falling_edge();
            }
        }
    });
}

/// Frame timeout / BAT safety / reset-pulse one-shot.
#[interrupt]
fn TIMER_IRQ_0() {
    critical_section::with(|cs| {
        if let Some(engine) = LINE_ENGINE.borrow(cs).borrow_mut().as_mut() {
            engine.on_timer_fired();
        }
    });
}

/// 1ms tick: Pause decrement, bootloader escape, HID report emission
/// (spec.md §4.3). Reschedules itself.
#[interrupt]
fn TIMER_IRQ_1() {
    critical_section::with(|cs| {
        if let Some(alarm) = TICK_ALARM.borrow(cs).borrow_mut().as_mut() {
            alarm.clear_interrupt();
            let _ = alarm.schedule(1.millis());
        }
    });

    drain_packets();

    critical_section::with(|cs| {
        let mut ra_ref = REPORT_ASSEMBLER.borrow(cs).borrow_mut();
        if let Some(ra) = ra_ref.as_mut() {
            if let Err(e) = ra.tick_1ms(&mut UsbHid, &RomBootSel) {
                defmt::warn!("picoatxt: report tick failed: {:?}", e);
            }
        }
    });

    let action = critical_section::with(|cs| {
        REPORT_ASSEMBLER
            .borrow(cs)
            .borrow()
            .as_ref()
            .map(|ra| ra.poll_idle())
    });
    if let Some(action) = action {
        apply_action(action);
    }
}

#[interrupt]
fn USBCTRL_IRQ() {
    critical_section::with(|cs| {
        let mut dev_ref = USB_DEVICE.borrow(cs).borrow_mut();
        let mut hid_ref = HID_CLASS.borrow(cs).borrow_mut();
        if let (Some(dev), Some(hid)) = (dev_ref.as_mut(), hid_ref.as_mut()) {
            if dev.poll(&mut [hid]) {
                let mut buf = [0u8; 1];
                if hid.pull_raw_output(&mut buf).is_ok() {
                    let leds = LedState {
                        num: buf[0] & 0x01 != 0,
                        caps: buf[0] & 0x02 != 0,
                        scroll: buf[0] & 0x04 != 0,
                    };
                    let mut ra_ref = REPORT_ASSEMBLER.borrow(cs).borrow_mut();
                    if let Some(ra) = ra_ref.as_mut() {
                        ra.set_leds_from_host(leds);
                    }
                }
            }
        }
    });
}
