//! C1 — the bit-serial line engine (spec.md §4.1).
//!
//! `LineEngine` is generic over the four bus pins and the three
//! hardware collaborators named in spec.md §1 (edge IRQ, one-shot timer,
//! free-running clock/busy-wait). Every transition in spec.md's receive
//! state machine and BAT sub-protocol is one of the `on_*` methods below,
//! dispatched from a single `match` on `self.phase` — the tagged-enum
//! reimplementation of the function-pointer dispatch spec.md §9 calls
//! out.
//!
//! The real firmware (`main.rs`) holds one `LineEngine` behind a
//! `critical_section::Mutex<RefCell<_>>` and calls these `on_*` methods
//! from inside `critical_section::with` in the GPIO and timer interrupt
//! handlers, and from the main loop for `get_packet`/`send_command`. That
//! satisfies spec.md §5's "interrupts masked ⇒ exclusive access"
//! discipline at the integration layer while keeping this type a plain
//! `&mut self`-based state machine that tests can drive directly.

mod command;
mod frame;

pub use command::Command;
use command::OutFrame;
pub use frame::{num_cycles, validate_frame, FrameRing, ShiftRegister};

use crate::error::Error;
use crate::hal::{Clock, EdgeIrq, InputPin, OneShotTimer, OutputPin};
use crate::Protocol;

const XT_DEBOUNCE_US: u32 = 60;
const LEGACY_GLITCH_US: u32 = 20;
const WRITE_CLK_HOLD_US: u32 = 60;
const WRITE_START_SETUP_US: u32 = 10;
const WRITE_BIT_DELAY_US: u32 = 10;
const XT_RESET_HOLD_US: u32 = 12_500;
const BAT_SAFETY_US: u32 = 2_500_000;
const FRAME_TIMEOUT_TICK_US: u32 = 100;

const fn frame_timeout_us(cycles: u8) -> u32 {
    4 * cycles as u32 * FRAME_TIMEOUT_TICK_US
}

/// A delivered byte, optionally tagged as the reply to an outstanding
/// command (spec.md §3 `LastCommand`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub data: Option<u8>,
    pub last_command: Option<u8>,
}

/// Receive-side state machine (spec.md §4.1). `Writing` and
/// `WritingRequestDelay` are reused for both halves of the AT write
/// handshake (bit-shifting, then the ack-check edge) and, for XT, as the
/// one-shot 12.5ms reset-pulse hold — the two protocols never share a
/// session so the dual meaning never collides at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Idle,
    Framing,
    Fail,
    WritingRequestDelay,
    Writing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatState {
    AwaitingEdge,
    Clocking,
    LegacyResetPulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bat(BatState),
    Online(LineState),
}

/// C1's public contract plus the ISR-callable transition methods.
pub struct LineEngine<CI, DI, CO, DO, IRQ, TMR, CLK> {
    clk_in: CI,
    data_in: DI,
    clk_out: CO,
    data_out: DO,
    irq: IRQ,
    timer: TMR,
    clock: CLK,

    phase: Phase,
    protocol: Option<Protocol>,
    legacy: bool,
    retry_used: bool,

    ring: FrameRing,
    shreg: ShiftRegister,
    final_edge_time: u32,

    last_command: Option<u8>,
    pending_write: Option<u8>,
    out: Option<OutFrame>,
    pending_error: Option<Error>,
    detect_error: Option<Error>,
}

impl<CI, DI, CO, DO, IRQ, TMR, CLK> LineEngine<CI, DI, CO, DO, IRQ, TMR, CLK>
where
    CI: InputPin,
    DI: InputPin,
    CO: OutputPin,
    DO: OutputPin,
    IRQ: EdgeIrq,
    TMR: OneShotTimer,
    CLK: Clock,
{
    pub fn new(clk_in: CI, data_in: DI, clk_out: CO, data_out: DO, irq: IRQ, timer: TMR, clock: CLK) -> Self {
        LineEngine {
            clk_in,
            data_in,
            clk_out,
            data_out,
            irq,
            timer,
            clock,
            phase: Phase::Bat(BatState::AwaitingEdge),
            protocol: None,
            legacy: false,
            retry_used: false,
            ring: FrameRing::new(),
            shreg: ShiftRegister::new(),
            final_edge_time: 0,
            last_command: None,
            pending_write: None,
            out: None,
            pending_error: None,
            detect_error: None,
        }
    }

    fn force_idle(&mut self) {
        self.clk_out.set_low();
        self.data_out.set_low();
    }

    fn force_inhibit(&mut self) {
        self.clk_out.set_high();
        self.data_out.set_high();
    }

    /// The logical bit the keyboard is driving: the level shifter
    /// inverts the 5V bus onto the GPIO pin, so a driven (logical 0)
    /// bus line reads as GPIO-high (spec.md §4.1).
    fn data_bit(&mut self) -> bool {
        !self.data_in.is_high()
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    // ---- BAT detection (spec.md §4.1 "BAT detection (power-on)") ----

    /// Arms the detection sub-protocol. Call once before entering the
    /// `init()` wait loop.
    pub fn begin_detect(&mut self) {
        self.phase = Phase::Bat(BatState::AwaitingEdge);
        self.protocol = None;
        self.shreg.reset();
        self.irq.enable_rising();
        self.timer.start(BAT_SAFETY_US);
    }

    /// Blocks until BAT detection resolves. The real firmware's `clock`
    /// implementation parks in `wait_for_interrupt` between edges; tests
    /// instead drive `on_rising_edge`/`on_falling_edge`/`on_timer_fired`
    /// directly and never call `init`.
    pub fn init(&mut self) -> Result<Protocol, Error> {
        self.begin_detect();
        loop {
            if let Some(protocol) = self.protocol {
                self.start_running();
                return Ok(protocol);
            }
            if let Some(err) = self.detect_error.take() {
                return Err(err);
            }
            self.clock.wait_for_interrupt();
        }
    }

    fn finish_detect(&mut self, protocol: Protocol) {
        self.timer.cancel();
        self.irq.disable();
        self.force_inhibit();
        self.protocol = Some(protocol);
        // Lines stay inhibited until `start_running` — spec.md §4.1 step 5.
        self.phase = Phase::Online(LineState::Fail);
    }

    /// Releases the bus and starts normal operation after a successful
    /// `init()` (or after recovering from a runtime `Fail`).
    pub fn start_running(&mut self) {
        self.force_idle();
        self.final_edge_time = self.clock.micros();
        self.irq.enable_rising();
        self.phase = Phase::Online(LineState::Idle);
    }

    // ---- Main-loop public contract ----

    /// Must be called with interrupts masked (spec.md §4.1).
    pub fn get_packet(&mut self) -> Option<Packet> {
        if self.ring.take_fail() {
            return Some(Packet {
                data: None,
                last_command: self.last_command.take(),
            });
        }
        let data = self.ring.pop()?;
        Some(Packet {
            data: Some(data),
            last_command: self.last_command.take(),
        })
    }

    /// Surfaces the redesigned "missing ACK" failure (spec.md §9) without
    /// panicking. `None` when the last write (if any) acked cleanly.
    pub fn take_pending_error(&mut self) -> Option<Error> {
        self.pending_error.take()
    }

    fn preconditions_ok(&self, at_only: bool) -> Result<(), Error> {
        if at_only && self.protocol == Some(Protocol::Xt) {
            return Err(Error::AtXt);
        }
        if !self.ring.is_empty() {
            return Err(Error::RingBufferNotEmpty);
        }
        if self.last_command.is_some() {
            return Err(Error::Contention);
        }
        match self.phase {
            Phase::Online(LineState::Idle) | Phase::Online(LineState::Fail) => Ok(()),
            Phase::Online(LineState::Framing) if self.shreg.clocked_bits() > 8 => Err(Error::Clocking),
            _ => Err(Error::Contention),
        }
    }

    pub fn send_command(&mut self, cmd: Command) -> Result<(), Error> {
        self.preconditions_ok(cmd.at_only())?;
        match self.protocol {
            Some(Protocol::At) => self.send_at_command(cmd.code()),
            Some(Protocol::Xt) => {
                // Only `Reset` survives the AtXt check above.
                self.irq.disable();
                self.clk_out.set_high();
                self.timer.start(XT_RESET_HOLD_US);
                self.last_command = Some(cmd.code());
                self.phase = Phase::Online(LineState::WritingRequestDelay);
                Ok(())
            }
            None => Err(Error::Contention),
        }
    }

    /// The AT request-to-send handshake (spec.md §4.1). Performs the
    /// short (<100us) synchronous preamble; the remaining bit-shifting
    /// and ack check happen asynchronously from `on_falling_edge` as the
    /// keyboard's own clock pulses arrive.
    pub fn send_at_command(&mut self, byte: u8) -> Result<(), Error> {
        self.preconditions_ok(true)?;
        self.irq.disable();
        self.clk_out.set_high(); // force bus CLK low
        self.clock.busy_wait_micros(WRITE_CLK_HOLD_US);
        self.data_out.set_high(); // force bus DATA low: the start bit
        self.clock.busy_wait_micros(WRITE_START_SETUP_US);
        self.clk_out.set_low(); // release CLK; keyboard resumes clocking

        self.out = None;
        self.pending_write = Some(byte);
        self.last_command = Some(byte);
        self.irq.enable_falling();
        self.phase = Phase::Online(LineState::Writing);
        Ok(())
    }

    // ---- ISR entry points ----

    pub fn on_rising_edge(&mut self) {
        match self.phase {
            Phase::Bat(BatState::AwaitingEdge) => {
                self.timer.cancel();
                self.timer.start(frame_timeout_us(num_cycles(Protocol::At)));
                self.irq.enable_falling();
                self.shreg.reset();
                self.phase = Phase::Bat(BatState::Clocking);
            }
            Phase::Online(LineState::Idle) => {
                let debounced = self.protocol == Some(Protocol::Xt)
                    && self.clock.micros().wrapping_sub(self.final_edge_time) < XT_DEBOUNCE_US;
                if !debounced {
                    self.shreg.reset();
                    self.irq.enable_falling();
                    let cycles = num_cycles(self.protocol.expect("protocol set once online"));
                    self.timer.start(frame_timeout_us(cycles));
                    self.phase = Phase::Online(LineState::Framing);
                }
                // else: debounced, the keyboard's spurious second idle edge — stay Idle.
            }
            _ => {}
        }
        self.irq.acknowledge();
    }

    pub fn on_falling_edge(&mut self) {
        match self.phase {
            Phase::Bat(BatState::Clocking) => self.on_falling_detect(),
            Phase::Online(LineState::Framing) => self.on_falling_framing(),
            Phase::Online(LineState::Writing) => self.on_falling_writing(),
            Phase::Online(LineState::WritingRequestDelay) if self.protocol == Some(Protocol::At) => {
                self.on_falling_await_ack()
            }
            _ => {}
        }
        self.irq.acknowledge();
    }

    fn on_falling_detect(&mut self) {
        let bit = self.data_bit();
        self.shreg.push_bit(bit);
        let bits = self.shreg.bits();
        match self.shreg.clocked_bits() {
            9 if bits & 1 == 1 => {
                if validate_frame(Protocol::Xt, bits).is_some() {
                    self.finish_detect(Protocol::Xt);
                }
            }
            11 => {
                if validate_frame(Protocol::At, bits).is_some() {
                    self.finish_detect(Protocol::At);
                } else {
                    self.timer.cancel();
                    self.irq.disable();
                    self.detect_error = Some(Error::FailedToReadBat);
                }
            }
            _ => {}
        }
    }

    fn on_falling_framing(&mut self) {
        let bit = self.data_bit();
        if self.legacy && self.protocol == Some(Protocol::Xt) {
            self.clock.busy_wait_micros(LEGACY_GLITCH_US);
            if self.clk_in.is_high() {
                return; // runt pulse from a legacy keyboard; do not advance.
            }
        }
        self.shreg.push_bit(bit);
        let protocol = self.protocol.expect("protocol set once online");
        if self.shreg.clocked_bits() != num_cycles(protocol) {
            return;
        }
        self.timer.cancel();
        self.irq.enable_rising();
        self.final_edge_time = self.clock.micros();
        match validate_frame(protocol, self.shreg.bits()) {
            Some(byte) => {
                self.ring.push(byte);
                self.phase = Phase::Online(LineState::Idle);
            }
            None => {
                self.ring.latch_fail();
                self.force_inhibit();
                self.phase = Phase::Online(LineState::Fail);
            }
        }
    }

    fn on_falling_writing(&mut self) {
        self.clock.busy_wait_micros(WRITE_BIT_DELAY_US);
        if let Some(byte) = self.pending_write.take() {
            // This edge samples the pre-set start bit; nothing to drive.
            self.out = Some(OutFrame::new(byte));
            return;
        }
        if let Some(out) = self.out.as_mut() {
            if let Some(bit) = out.shift_out() {
                if bit {
                    self.data_out.set_high();
                } else {
                    self.data_out.set_low();
                }
                return;
            }
        }
        self.out = None;
        self.data_out.set_low(); // release DATA for the stop bit.
        self.phase = Phase::Online(LineState::WritingRequestDelay);
    }

    fn on_falling_await_ack(&mut self) {
        self.clock.busy_wait_micros(WRITE_BIT_DELAY_US);
        let acked = !self.data_bit();
        self.irq.enable_rising();
        self.phase = Phase::Online(LineState::Idle);
        if !acked {
            self.pending_error = Some(Error::BatAckTimeout);
            self.last_command = None;
        }
    }

    pub fn on_timer_fired(&mut self) {
        match self.phase {
            Phase::Bat(BatState::AwaitingEdge) => {
                if !self.retry_used {
                    self.retry_used = true;
                    self.clk_out.set_high();
                    self.timer.start(XT_RESET_HOLD_US);
                    self.phase = Phase::Bat(BatState::LegacyResetPulse);
                } else {
                    self.detect_error = Some(Error::FailedToGetXtBat);
                }
            }
            Phase::Bat(BatState::LegacyResetPulse) => {
                self.clk_out.set_low();
                self.legacy = true;
                self.shreg.reset();
                self.irq.enable_rising();
                self.timer.start(BAT_SAFETY_US);
                self.phase = Phase::Bat(BatState::AwaitingEdge);
            }
            Phase::Bat(BatState::Clocking) => {
                self.irq.disable();
                self.detect_error = Some(Error::FailedToReadBat);
            }
            Phase::Online(LineState::Framing) => {
                self.ring.latch_fail();
                self.force_inhibit();
                self.phase = Phase::Online(LineState::Fail);
            }
            Phase::Online(LineState::WritingRequestDelay) if self.protocol == Some(Protocol::Xt) => {
                self.clk_out.set_low();
                self.irq.enable_rising();
                self.phase = Phase::Online(LineState::Idle);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockClock, MockEdgeIrq, MockPin, MockTimer};

    type TestEngine<'a> = LineEngine<&'a MockPin, &'a MockPin, &'a MockPin, &'a MockPin, &'a MockEdgeIrq, &'a MockTimer, MockClock>;

    fn new_engine<'a>(clk_in: &'a MockPin, data_in: &'a MockPin, clk_out: &'a MockPin, data_out: &'a MockPin, irq: &'a MockEdgeIrq, timer: &'a MockTimer) -> TestEngine<'a> {
        LineEngine::new(clk_in, data_in, clk_out, data_out, irq, timer, MockClock)
    }

    fn clock_bits(engine: &mut TestEngine, data_in: &MockPin, bits: &[bool]) {
        for &bit in bits {
            data_in.high.set(!bit); // data_bit() = !is_high(); want push_bit(bit).
            engine.on_falling_edge();
        }
    }

    #[test]
    fn xt_bat_detection() {
        let (clk_in, data_in, clk_out, data_out, irq, timer) =
            (MockPin::default(), MockPin::default(), MockPin::default(), MockPin::default(), MockEdgeIrq::default(), MockTimer::default());
        let mut engine = new_engine(&clk_in, &data_in, &clk_out, &data_out, &irq, &timer);
        engine.begin_detect();
        engine.on_rising_edge();
        // wire: 1 01010101 (start=1, then 0xAA LSB-first).
        clock_bits(&mut engine, &data_in, &[true, false, true, false, true, false, true, false, true]);
        assert_eq!(engine.protocol(), Some(Protocol::Xt));
        assert!(!engine.is_legacy());
    }

    #[test]
    fn at_bat_detection() {
        let (clk_in, data_in, clk_out, data_out, irq, timer) =
            (MockPin::default(), MockPin::default(), MockPin::default(), MockPin::default(), MockEdgeIrq::default(), MockTimer::default());
        let mut engine = new_engine(&clk_in, &data_in, &clk_out, &data_out, &irq, &timer);
        engine.begin_detect();
        engine.on_rising_edge();
        // wire: 0 01010101 1 1
        clock_bits(
            &mut engine,
            &data_in,
            &[false, false, true, false, true, false, true, false, true, true, true],
        );
        assert_eq!(engine.protocol(), Some(Protocol::At));
    }

    #[test]
    fn legacy_xt_retries_after_safety_timeout() {
        let (clk_in, data_in, clk_out, data_out, irq, timer) =
            (MockPin::default(), MockPin::default(), MockPin::default(), MockPin::default(), MockEdgeIrq::default(), MockTimer::default());
        let mut engine = new_engine(&clk_in, &data_in, &clk_out, &data_out, &irq, &timer);
        engine.begin_detect();
        engine.on_timer_fired(); // 2.5s safety timeout, no edge seen yet.
        assert!(clk_out.high.get(), "reset pulse should force CLK low");
        engine.on_timer_fired(); // 12.5ms reset pulse elapses.
        assert!(!clk_out.high.get(), "CLK released after the reset pulse");
        engine.on_rising_edge();
        clock_bits(&mut engine, &data_in, &[true, false, true, false, true, false, true, false, true]);
        assert_eq!(engine.protocol(), Some(Protocol::Xt));
        assert!(engine.is_legacy());
    }

    #[test]
    fn ring_ordering_across_good_and_failed_frames() {
        let (clk_in, data_in, clk_out, data_out, irq, timer) =
            (MockPin::default(), MockPin::default(), MockPin::default(), MockPin::default(), MockEdgeIrq::default(), MockTimer::default());
        let mut engine = new_engine(&clk_in, &data_in, &clk_out, &data_out, &irq, &timer);
        engine.begin_detect();
        engine.on_rising_edge();
        clock_bits(&mut engine, &data_in, &[true, false, true, false, true, false, true, false, true]);
        assert_eq!(engine.protocol(), Some(Protocol::Xt));
        engine.start_running();

        // Deliver one good XT frame for byte 0x1E (A make).
        engine.on_rising_edge();
        let mut bits = std::vec![true];
        for i in 0..8 {
            bits.push((0x1E >> i) & 1 != 0);
        }
        clock_bits(&mut engine, &data_in, &bits);
        let packet = engine.get_packet().unwrap();
        assert_eq!(packet.data, Some(0x1E));

        // Now a bad frame (start bit 0 on XT): goes to Fail, data=None exactly once.
        engine.start_running();
        engine.on_rising_edge();
        let mut bad_bits = std::vec![false];
        bad_bits.extend(std::iter::repeat(false).take(8));
        clock_bits(&mut engine, &data_in, &bad_bits);
        let packet = engine.get_packet().unwrap();
        assert_eq!(packet.data, None);
        assert!(engine.get_packet().is_none());
    }
}
