//! C2 — the scan-code translator (spec.md §4.2).

use crate::tables::{AT_TABLES, XT_TABLES};
use crate::Protocol;

/// Selects among the four tables per protocol. Distinct from the Shift
/// *key* on the keyboard itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftState {
    Normal,
    Extended,
    Pause,
    PauseNext,
    /// Swallowing the remainder of a Pause burst after its one-shot make
    /// has already been emitted. Real hardware sends Pause's make and
    /// break as a single fixed byte burst with no later break ever sent;
    /// the trailing bytes must not reach the Normal table (one of them,
    /// AT's `0x14`, is also the genuine Left Control make code, so a
    /// naive four-state walk leaves Left Control stuck held).
    PauseTail(u8),
}

/// One cell of a scan table (spec.md §3 `ScanTable`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    None,
    Overrun,
    BreakNext,
    Extended(ShiftState),
    BreakCode,
    Usage(u8),
}

pub type Table = [ScanAction; 256];

/// A decoded event handed to the report assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Key { usage: u8, make: bool },
    Overrun,
    None,
}

pub struct Translator {
    tables: &'static [Table; 4],
    protocol: Protocol,
    shift: ShiftState,
    is_break: bool,
}

impl Translator {
    pub fn new(protocol: Protocol) -> Self {
        let tables = match protocol {
            Protocol::Xt => &XT_TABLES,
            Protocol::At => &AT_TABLES,
        };
        Translator {
            tables,
            protocol,
            shift: ShiftState::Normal,
            is_break: false,
        }
    }

    /// Length of the fixed tail that follows Pause's one-shot make byte
    /// on the wire: AT sends `E1 F0 14 F0 77` (5 bytes), XT sends
    /// `E1 9D C5` (3 bytes); neither is a real break and both must be
    /// swallowed without touching the Normal table.
    fn pause_tail_len(&self) -> u8 {
        match self.protocol {
            Protocol::At => 5,
            Protocol::Xt => 3,
        }
    }

    fn table(&self) -> &'static Table {
        match self.shift {
            ShiftState::Normal => &self.tables[0],
            ShiftState::Extended => &self.tables[1],
            ShiftState::Pause => &self.tables[2],
            ShiftState::PauseNext => &self.tables[3],
            // Never actually indexed: `decode` intercepts PauseTail before
            // any table lookup.
            ShiftState::PauseTail(_) => &self.tables[0],
        }
    }

    /// Decodes one wire byte, updating internal shift/break state
    /// (spec.md §4.2's per-byte dispatch table).
    pub fn decode(&mut self, byte: u8) -> Event {
        if let ShiftState::PauseTail(remaining) = self.shift {
            self.shift = if remaining <= 1 {
                ShiftState::Normal
            } else {
                ShiftState::PauseTail(remaining - 1)
            };
            return Event::None;
        }
        match self.table()[byte as usize] {
            ScanAction::None => {
                self.shift = ShiftState::Normal;
                self.is_break = false;
                Event::None
            }
            ScanAction::Overrun => {
                self.shift = ShiftState::Normal;
                self.is_break = false;
                Event::Overrun
            }
            ScanAction::BreakNext => {
                self.is_break = true;
                Event::None
            }
            ScanAction::Extended(next) => {
                self.shift = next;
                Event::None
            }
            ScanAction::BreakCode => {
                let resolved = self.table()[(byte & 0x7F) as usize];
                self.shift = ShiftState::Normal;
                self.is_break = false;
                match resolved {
                    ScanAction::Usage(usage) => Event::Key { usage, make: false },
                    _ => Event::None,
                }
            }
            ScanAction::Usage(usage) => {
                let make = !self.is_break;
                self.is_break = false;
                self.shift = if usage == crate::usage::PAUSE {
                    ShiftState::PauseTail(self.pause_tail_len())
                } else {
                    ShiftState::Normal
                };
                Event::Key { usage, make }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage;

    #[test]
    fn xt_round_trip_make_and_break() {
        let mut t = Translator::new(Protocol::Xt);
        assert_eq!(t.decode(0x1E), Event::Key { usage: usage::A, make: true });
        assert_eq!(t.decode(0x9E), Event::Key { usage: usage::A, make: false });
    }

    #[test]
    fn at_break_prefix_releases_a() {
        let mut t = Translator::new(Protocol::At);
        assert_eq!(t.decode(0xF0), Event::None);
        assert_eq!(t.decode(0x1C), Event::Key { usage: usage::A, make: false });
    }

    #[test]
    fn shift_state_resets_on_none() {
        let mut t = Translator::new(Protocol::At);
        assert_eq!(t.decode(0xF0), Event::None);
        // 0x08 is unmapped in AT_normal -> None (spec.md §8 property 3), which must clear is_break too.
        assert_eq!(t.decode(0x08), Event::None);
        assert_eq!(t.decode(0x1C), Event::Key { usage: usage::A, make: true });
    }

    #[test]
    fn overrun_on_00_and_ff_both_protocols() {
        let mut xt = Translator::new(Protocol::Xt);
        assert_eq!(xt.decode(0x00), Event::Overrun);
        assert_eq!(xt.decode(0xFF), Event::Overrun);
        let mut at = Translator::new(Protocol::At);
        assert_eq!(at.decode(0x00), Event::Overrun);
        assert_eq!(at.decode(0xFF), Event::Overrun);
    }

    #[test]
    fn at_pause_sequence_emits_single_make() {
        let mut t = Translator::new(Protocol::At);
        assert_eq!(t.decode(0xE1), Event::None);
        assert_eq!(t.decode(0x14), Event::None);
        assert_eq!(t.decode(0x77), Event::Key { usage: usage::PAUSE, make: true });
    }

    #[test]
    fn xt_pause_sequence_emits_single_make() {
        let mut t = Translator::new(Protocol::Xt);
        assert_eq!(t.decode(0xE1), Event::None);
        assert_eq!(t.decode(0x1D), Event::None);
        assert_eq!(t.decode(0x45), Event::Key { usage: usage::PAUSE, make: true });
    }

    /// Real AT hardware sends Pause's whole make as one burst and never
    /// sends a separate break; the tail must not leak a phantom Left
    /// Control make (AT 0x14 is genuinely LeftCtrl in the Normal table).
    #[test]
    fn at_pause_burst_tail_does_not_stick_left_control() {
        let mut t = Translator::new(Protocol::At);
        for byte in [0xE1, 0x14, 0x77] {
            let _ = t.decode(byte);
        }
        for byte in [0xE1, 0xF0, 0x14, 0xF0, 0x77] {
            assert_eq!(t.decode(byte), Event::None, "pause burst tail byte 0x{byte:02x} must be swallowed");
        }
        // Translator is back to Normal and a real Left Control make still works.
        assert_eq!(t.decode(0x14), Event::Key { usage: usage::LEFT_CONTROL, make: true });
    }

    #[test]
    fn xt_pause_burst_tail_is_swallowed() {
        let mut t = Translator::new(Protocol::Xt);
        for byte in [0xE1, 0x1D, 0x45] {
            let _ = t.decode(byte);
        }
        for byte in [0xE1, 0x9D, 0xC5] {
            assert_eq!(t.decode(byte), Event::None, "pause burst tail byte 0x{byte:02x} must be swallowed");
        }
        assert_eq!(t.decode(0x1E), Event::Key { usage: usage::A, make: true });
    }
}
