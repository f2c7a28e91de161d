//! C3 — report assembler & policy (spec.md §4.3).

use crate::hal::{BootRom, HidSink};
use crate::line::Command;
use crate::translate::{Event, Translator};
use crate::usage;
use crate::{Error, Protocol};

/// The 22-byte dense key bitmap (spec.md §3 `KeyBitmap`).
#[derive(Clone, Copy)]
struct KeyBitmap {
    bytes: [u8; 22],
}

impl KeyBitmap {
    const fn new() -> Self {
        KeyBitmap { bytes: [0; 22] }
    }

    fn bit_pos(usage: u8) -> (usize, u8) {
        if usage >= 0xE0 {
            (21, usage & 0x07)
        } else {
            let offset = usage - usage::MIN_KEY;
            ((offset / 8) as usize, offset % 8)
        }
    }

    fn get(&self, usage: u8) -> bool {
        let (idx, bit) = Self::bit_pos(usage);
        self.bytes[idx] & (1 << bit) != 0
    }

    /// Returns whether the bit actually changed (spec.md §4.3 item 4).
    fn set(&mut self, usage: u8, held: bool) -> bool {
        let (idx, bit) = Self::bit_pos(usage);
        let mask = 1u8 << bit;
        let was = self.bytes[idx] & mask != 0;
        if was == held {
            return false;
        }
        if held {
            self.bytes[idx] |= mask;
        } else {
            self.bytes[idx] &= !mask;
        }
        true
    }

    fn clear(&mut self) {
        self.bytes = [0; 22];
    }
}

/// LED state as last set by the USB host (spec.md §3 `LEDState`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedState {
    pub scroll: bool,
    pub num: bool,
    pub caps: bool,
}

impl LedState {
    fn to_wire_byte(self) -> u8 {
        (self.scroll as u8) | ((self.num as u8) << 1) | ((self.caps as u8) << 2)
    }
}

/// What the main loop should do with the line engine after a packet or
/// an idle poll (spec.md §4.3 "Command orchestration").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Command(Command),
    RawByte(u8),
}

/// Physical-key -> alternate-logical-key macro pairs (spec.md §4.3 item
/// 1). `F9`/`F10` swap with `F11`/`F12` under Scroll Lock; the keypad
/// digit cluster swaps with the navigation cluster under Num Lock off.
const MACRO_PAIRS: &[(u8, u8)] = &[
    (usage::F9, usage::F11),
    (usage::F10, usage::F12),
    (usage::KP_7, usage::HOME),
    (usage::KP_8, usage::UP),
    (usage::KP_9, usage::PAGE_UP),
    (usage::KP_4, usage::LEFT),
    (usage::KP_6, usage::RIGHT),
    (usage::KP_1, usage::END),
    (usage::KP_2, usage::DOWN),
    (usage::KP_3, usage::PAGE_DOWN),
    (usage::KP_0, usage::INSERT),
    (usage::KP_PERIOD, usage::DELETE),
];

pub struct ReportAssembler {
    protocol: Protocol,
    translator: Translator,
    keys: KeyBitmap,
    leds: LedState,
    change_leds: bool,
    pause_tick: u8,
    duplicate_report: bool,
    inhibit_duplicates: bool,
    boot_mode: bool,
    reboot_to_bootsel: bool,
    waiting_for_bat: bool,
}

impl ReportAssembler {
    pub fn new(protocol: Protocol) -> Self {
        ReportAssembler {
            protocol,
            translator: Translator::new(protocol),
            keys: KeyBitmap::new(),
            leds: LedState::default(),
            change_leds: false,
            pause_tick: 0,
            duplicate_report: false,
            inhibit_duplicates: false,
            boot_mode: false,
            reboot_to_bootsel: false,
            waiting_for_bat: false,
        }
    }

    pub fn set_boot_mode(&mut self, boot: bool) {
        self.boot_mode = boot;
    }

    /// `Set_Idle(rate)`; rate 0 disables duplicate suppression.
    pub fn set_idle_rate(&mut self, rate: u8) {
        self.inhibit_duplicates = rate == 0;
    }

    pub fn set_leds_from_host(&mut self, leds: LedState) {
        self.leds = leds;
        self.change_leds = true;
    }

    fn macro_pair(usage: u8) -> Option<(u8, u8)> {
        MACRO_PAIRS.iter().copied().find(|&(physical, _)| physical == usage)
    }

    fn macro_active(&self, physical: u8) -> bool {
        match physical {
            usage::F9 | usage::F10 => self.leds.scroll,
            _ => !self.leds.num,
        }
    }

    fn apply_key(&mut self, usage: u8, make: bool) {
        if usage == usage::PAUSE {
            if make {
                self.pause_tick = 33;
                if self.keys.set(usage::PAUSE, true) {
                    self.duplicate_report = false;
                }
            }
            return;
        }
        if let Some((physical, alt)) = Self::macro_pair(usage) {
            let changed = if make {
                if self.macro_active(physical) {
                    self.keys.set(alt, true) | self.keys.set(physical, false)
                } else {
                    self.keys.set(physical, true) | self.keys.set(alt, false)
                }
            } else {
                // Both halves of the pair are forced released: the lock
                // state may have flipped while the key was held.
                self.keys.set(physical, false) | self.keys.set(alt, false)
            };
            if changed {
                self.duplicate_report = false;
            }
            return;
        }
        if self.keys.set(usage, make) {
            self.duplicate_report = false;
        }
    }

    fn apply_event(&mut self, event: Event) {
        match event {
            Event::None => {}
            Event::Overrun => self.clear_bitmap(),
            Event::Key { usage, make } => self.apply_key(usage, make),
        }
    }

    fn clear_bitmap(&mut self) {
        self.keys.clear();
        self.pause_tick = 0;
        self.duplicate_report = false;
    }

    fn on_reset_complete(&mut self) {
        self.clear_bitmap();
        self.translator = Translator::new(self.protocol);
        if self.leds.scroll || self.leds.num || self.leds.caps {
            self.change_leds = true;
        }
    }

    fn framing_recovery(&self) -> Action {
        match self.protocol {
            Protocol::At => Action::Command(Command::Resend),
            Protocol::Xt => Action::Command(Command::Reset),
        }
    }

    /// Feeds one dequeued packet through command orchestration and, for
    /// ordinary data, the translator and bitmap update.
    pub fn handle_packet(&mut self, data: Option<u8>, last_command: Option<u8>) -> Action {
        if self.waiting_for_bat {
            self.waiting_for_bat = false;
            if data == Some(0xAA) {
                self.on_reset_complete();
                return Action::None;
            }
            return self.framing_recovery();
        }

        if let Some(cmd_byte) = last_command {
            if data.is_none() || data == Some(0xFE) {
                return Action::RawByte(cmd_byte);
            }
            if cmd_byte == Command::Reset.code() {
                return match self.protocol {
                    Protocol::At => {
                        self.waiting_for_bat = true;
                        Action::None
                    }
                    Protocol::Xt => {
                        if data == Some(0xAA) {
                            self.on_reset_complete();
                            Action::None
                        } else {
                            Action::Command(Command::Reset)
                        }
                    }
                };
            }
            if cmd_byte == Command::SetLockLights.code() {
                return Action::RawByte(self.leds.to_wire_byte());
            }
            if cmd_byte & 0x80 == 0 && data == Some(0xFA) {
                self.change_leds = false;
            }
            return Action::None;
        }

        match data {
            None => self.framing_recovery(),
            Some(byte) => {
                let event = self.translator.decode(byte);
                self.apply_event(event);
                Action::None
            }
        }
    }

    /// Called by the main loop when the ring is empty and no command is
    /// outstanding (spec.md §4.3 "Command orchestration", last bullet).
    pub fn poll_idle(&self) -> Action {
        if self.change_leds {
            Action::Command(Command::SetLockLights)
        } else {
            Action::None
        }
    }

    fn bootsel_combo_held(&self) -> bool {
        self.keys.get(usage::SCROLL_LOCK) && self.keys.get(usage::KP_MINUS) && self.keys.get(usage::RIGHT_SHIFT)
    }

    fn boot_report_bytes(&self) -> [u8; 8] {
        let mut report = [0u8; 8];
        report[0] = self.keys.bytes[21];
        let mut count = 0usize;
        let mut overran = false;
        'scan: for byte_idx in 0..21 {
            let byte = self.keys.bytes[byte_idx];
            for bit in 0..8u8 {
                if byte & (1 << bit) != 0 {
                    if count >= 6 {
                        overran = true;
                        break 'scan;
                    }
                    report[2 + count] = usage::MIN_KEY + (byte_idx as u8) * 8 + bit;
                    count += 1;
                }
            }
        }
        if overran {
            for slot in report.iter_mut().skip(2) {
                *slot = usage::OVERRUN;
            }
        }
        report
    }

    fn full_report_bytes(&self) -> [u8; 22] {
        self.keys.bytes
    }

    /// Runs the 1 ms tick: Pause decrement, bootloader-escape detection,
    /// and HID report emission (spec.md §4.3 "HID reporting").
    pub fn tick_1ms(&mut self, hid: &mut impl HidSink, boot_rom: &impl BootRom) -> Result<(), Error> {
        if self.pause_tick > 0 {
            self.pause_tick -= 1;
        } else if self.keys.get(usage::PAUSE) {
            self.keys.set(usage::PAUSE, false);
        }

        if !self.reboot_to_bootsel && self.bootsel_combo_held() {
            self.reboot_to_bootsel = true;
            self.clear_bitmap();
        }

        if self.reboot_to_bootsel {
            self.emit_report(hid)?;
            boot_rom.reset_to_usb_boot();
        }

        if self.duplicate_report && self.inhibit_duplicates {
            return Ok(());
        }
        self.emit_report(hid)?;
        self.duplicate_report = true;
        Ok(())
    }

    fn emit_report(&self, hid: &mut impl HidSink) -> Result<(), Error> {
        if self.boot_mode {
            hid.send_report(&self.boot_report_bytes())
        } else {
            hid.send_report(&self.full_report_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockHid;

    struct MockBoot;
    impl BootRom for MockBoot {
        fn reset_to_usb_boot(&self) -> ! {
            panic!("bootsel reset requested");
        }
    }

    #[test]
    fn overrun_clears_bitmap_regardless_of_prior_state() {
        let mut ra = ReportAssembler::new(Protocol::At);
        ra.handle_packet(Some(0x1C), None); // A make
        assert!(ra.keys.get(usage::A));
        ra.handle_packet(Some(0x00), None); // overrun code
        assert!(!ra.keys.get(usage::A));
    }

    #[test]
    fn f9_f11_macro_coherence_and_forced_release() {
        let mut ra = ReportAssembler::new(Protocol::Xt);
        // F9 make while Scroll Lock is off -> F9 held, F11 untouched.
        ra.handle_packet(Some(0x43), None); // XT F9 make
        assert!(ra.keys.get(usage::F9));
        assert!(!ra.keys.get(usage::F11));

        // Scroll Lock toggles on mid-hold (host pushes new LED state).
        ra.set_leds_from_host(LedState { scroll: true, num: false, caps: false });

        // F9 break: both halves of the pair must end up released.
        ra.handle_packet(Some(0xC3), None); // XT F9 break (0x43 | 0x80)
        assert!(!ra.keys.get(usage::F9));
        assert!(!ra.keys.get(usage::F11));
    }

    #[test]
    fn pause_one_shot_clears_after_33_ticks() {
        let mut ra = ReportAssembler::new(Protocol::At);
        ra.handle_packet(Some(0xE1), None);
        ra.handle_packet(Some(0x14), None);
        ra.handle_packet(Some(0x77), None);
        assert!(ra.keys.get(usage::PAUSE));

        let mut hid = MockHid::default();
        let boot = MockBoot;
        for _ in 0..33 {
            ra.tick_1ms(&mut hid, &boot).unwrap();
            assert!(ra.keys.get(usage::PAUSE));
        }
        ra.tick_1ms(&mut hid, &boot).unwrap();
        assert!(!ra.keys.get(usage::PAUSE));
    }

    #[test]
    fn duplicate_suppression_with_idle_rate_zero() {
        let mut ra = ReportAssembler::new(Protocol::At);
        ra.set_idle_rate(0);
        let mut hid = MockHid::default();
        let boot = MockBoot;
        ra.tick_1ms(&mut hid, &boot).unwrap();
        ra.tick_1ms(&mut hid, &boot).unwrap();
        assert_eq!(hid.reports.len(), 1);

        ra.handle_packet(Some(0x1C), None); // A make changes the bitmap
        ra.tick_1ms(&mut hid, &boot).unwrap();
        assert_eq!(hid.reports.len(), 2);
    }

    #[test]
    fn xt_release_via_bit7_round_trip() {
        let mut ra = ReportAssembler::new(Protocol::Xt);
        ra.handle_packet(Some(0x1E), None); // A make
        assert!(ra.keys.get(usage::A));
        ra.handle_packet(Some(0x9E), None); // A break
        assert!(!ra.keys.get(usage::A));
    }
}
