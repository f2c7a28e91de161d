//! The four 256-entry scan tables per protocol (spec.md §4.2), built at
//! compile time per spec.md §9's "comptime-generated scan tables" note.
//! Cell contents follow the IBM PC/XT Scan Code Set 1 and PC/AT Scan
//! Code Set 2 assignments; they are reference data, not policy.

use crate::translate::{ScanAction, ShiftState, Table};
use crate::usage;

const fn filled(action: ScanAction) -> Table {
    [action; 256]
}

const fn put(mut table: Table, code: u8, action: ScanAction) -> Table {
    table[code as usize] = action;
    table
}

const fn put_usages(mut table: Table, entries: &[(u8, u8)]) -> Table {
    let mut i = 0;
    while i < entries.len() {
        let (code, u) = entries[i];
        table[code as usize] = ScanAction::Usage(u);
        i += 1;
    }
    table
}

/// Every entry 0x80..=0xFE is a break of the matching make code; 0x00 and
/// 0xFF are the shared overrun codes (spec.md §8 property 4).
const fn with_xt_break_range(mut table: Table) -> Table {
    let mut code: u16 = 0x80;
    while code <= 0xFE {
        table[code as usize] = ScanAction::BreakCode;
        code += 1;
    }
    table[0x00] = ScanAction::Overrun;
    table[0xFF as usize] = ScanAction::Overrun;
    table
}

const XT_NORMAL_USAGES: &[(u8, u8)] = &[
    (0x01, usage::ESCAPE),
    (0x02, usage::N1),
    (0x03, usage::N2),
    (0x04, usage::N3),
    (0x05, usage::N4),
    (0x06, usage::N5),
    (0x07, usage::N6),
    (0x08, usage::N7),
    (0x09, usage::N8),
    (0x0A, usage::N9),
    (0x0B, usage::N0),
    (0x0C, usage::MINUS),
    (0x0D, usage::EQUAL),
    (0x0E, usage::BACKSPACE),
    (0x0F, usage::TAB),
    (0x10, usage::Q),
    (0x11, usage::W),
    (0x12, usage::E),
    (0x13, usage::R),
    (0x14, usage::T),
    (0x15, usage::Y),
    (0x16, usage::U),
    (0x17, usage::I),
    (0x18, usage::O),
    (0x19, usage::P),
    (0x1A, usage::LEFT_BRACKET),
    (0x1B, usage::RIGHT_BRACKET),
    (0x1C, usage::ENTER),
    (0x1D, usage::LEFT_CONTROL),
    (0x1E, usage::A),
    (0x1F, usage::S),
    (0x20, usage::D),
    (0x21, usage::F),
    (0x22, usage::G),
    (0x23, usage::H),
    (0x24, usage::J),
    (0x25, usage::K),
    (0x26, usage::L),
    (0x27, usage::SEMICOLON),
    (0x28, usage::APOSTROPHE),
    (0x29, usage::GRAVE),
    (0x2A, usage::LEFT_SHIFT),
    (0x2B, usage::BACKSLASH),
    (0x2C, usage::Z),
    (0x2D, usage::X),
    (0x2E, usage::C),
    (0x2F, usage::V),
    (0x30, usage::B),
    (0x31, usage::N),
    (0x32, usage::M),
    (0x33, usage::COMMA),
    (0x34, usage::PERIOD),
    (0x35, usage::SLASH),
    (0x36, usage::RIGHT_SHIFT),
    (0x37, usage::KP_ASTERISK),
    (0x38, usage::LEFT_ALT),
    (0x39, usage::SPACE),
    (0x3A, usage::CAPS_LOCK),
    (0x3B, usage::F1),
    (0x3C, usage::F2),
    (0x3D, usage::F3),
    (0x3E, usage::F4),
    (0x3F, usage::F5),
    (0x40, usage::F6),
    (0x41, usage::F7),
    (0x42, usage::F8),
    (0x43, usage::F9),
    (0x44, usage::F10),
    (0x45, usage::NUM_LOCK),
    (0x46, usage::SCROLL_LOCK),
    (0x47, usage::KP_7),
    (0x48, usage::KP_8),
    (0x49, usage::KP_9),
    (0x4A, usage::KP_MINUS),
    (0x4B, usage::KP_4),
    (0x4C, usage::KP_5),
    (0x4D, usage::KP_6),
    (0x4E, usage::KP_PLUS),
    (0x4F, usage::KP_1),
    (0x50, usage::KP_2),
    (0x51, usage::KP_3),
    (0x52, usage::KP_0),
    (0x53, usage::KP_PERIOD),
    (0x57, usage::F11),
    (0x58, usage::F12),
];

const fn build_xt_normal() -> Table {
    let table = filled(ScanAction::None);
    let table = with_xt_break_range(table);
    let table = put_usages(table, XT_NORMAL_USAGES);
    let table = put(table, 0xE0, ScanAction::Extended(ShiftState::Extended));
    put(table, 0xE1, ScanAction::Extended(ShiftState::Pause))
}

const XT_EXTENDED_USAGES: &[(u8, u8)] = &[
    (0x1C, usage::KP_ENTER),
    (0x1D, usage::RIGHT_CONTROL),
    (0x35, usage::KP_SLASH),
    (0x38, usage::RIGHT_ALT),
    (0x47, usage::HOME),
    (0x48, usage::UP),
    (0x49, usage::PAGE_UP),
    (0x4B, usage::LEFT),
    (0x4D, usage::RIGHT),
    (0x4F, usage::END),
    (0x50, usage::DOWN),
    (0x51, usage::PAGE_DOWN),
    (0x52, usage::INSERT),
    (0x53, usage::DELETE),
    (0x5B, usage::LEFT_GUI),
    (0x5C, usage::RIGHT_GUI),
    (0x5D, usage::APPLICATION),
];

const fn build_xt_extended() -> Table {
    let table = filled(ScanAction::None);
    let table = with_xt_break_range(table);
    put_usages(table, XT_EXTENDED_USAGES)
}

/// XT Pause make sequence: `E1 1D 45`. The full burst also sends a
/// `E1 9D C5` tail with no real break event behind it; `Translator`
/// swallows that tail itself via `ShiftState::PauseTail`, so these two
/// tables only need to recognize the make.
const fn build_xt_pause() -> Table {
    let table = filled(ScanAction::None);
    put(table, 0x1D, ScanAction::Extended(ShiftState::PauseNext))
}

const fn build_xt_pause_next() -> Table {
    let table = filled(ScanAction::None);
    put(table, 0x45, ScanAction::Usage(usage::PAUSE))
}

pub static XT_TABLES: [Table; 4] = [
    build_xt_normal(),
    build_xt_extended(),
    build_xt_pause(),
    build_xt_pause_next(),
];

const AT_NORMAL_USAGES: &[(u8, u8)] = &[
    (0x1C, usage::A),
    (0x32, usage::B),
    (0x21, usage::C),
    (0x23, usage::D),
    (0x24, usage::E),
    (0x2B, usage::F),
    (0x34, usage::G),
    (0x33, usage::H),
    (0x43, usage::I),
    (0x3B, usage::J),
    (0x42, usage::K),
    (0x4B, usage::L),
    (0x3A, usage::M),
    (0x31, usage::N),
    (0x44, usage::O),
    (0x4D, usage::P),
    (0x15, usage::Q),
    (0x2D, usage::R),
    (0x1B, usage::S),
    (0x2C, usage::T),
    (0x3C, usage::U),
    (0x2A, usage::V),
    (0x1D, usage::W),
    (0x22, usage::X),
    (0x35, usage::Y),
    (0x1A, usage::Z),
    (0x45, usage::N0),
    (0x16, usage::N1),
    (0x1E, usage::N2),
    (0x26, usage::N3),
    (0x25, usage::N4),
    (0x2E, usage::N5),
    (0x36, usage::N6),
    (0x3D, usage::N7),
    (0x3E, usage::N8),
    (0x46, usage::N9),
    (0x0E, usage::GRAVE),
    (0x4E, usage::MINUS),
    (0x55, usage::EQUAL),
    (0x66, usage::BACKSPACE),
    (0x0D, usage::TAB),
    (0x54, usage::LEFT_BRACKET),
    (0x5B, usage::RIGHT_BRACKET),
    (0x5D, usage::BACKSLASH),
    (0x4C, usage::SEMICOLON),
    (0x52, usage::APOSTROPHE),
    (0x41, usage::COMMA),
    (0x49, usage::PERIOD),
    (0x4A, usage::SLASH),
    (0x29, usage::SPACE),
    (0x58, usage::CAPS_LOCK),
    (0x05, usage::F1),
    (0x06, usage::F2),
    (0x04, usage::F3),
    (0x0C, usage::F4),
    (0x03, usage::F5),
    (0x0B, usage::F6),
    (0x83, usage::F7),
    (0x0A, usage::F8),
    (0x01, usage::F9),
    (0x09, usage::F10),
    (0x78, usage::F11),
    (0x07, usage::F12),
    (0x76, usage::ESCAPE),
    (0x7E, usage::SCROLL_LOCK),
    (0x14, usage::LEFT_CONTROL),
    (0x12, usage::LEFT_SHIFT),
    (0x11, usage::LEFT_ALT),
    (0x59, usage::RIGHT_SHIFT),
    (0x5A, usage::ENTER),
    (0x77, usage::NUM_LOCK),
    (0x7C, usage::KP_ASTERISK),
    (0x7B, usage::KP_MINUS),
    (0x79, usage::KP_PLUS),
    (0x71, usage::KP_PERIOD),
    (0x70, usage::KP_0),
    (0x69, usage::KP_1),
    (0x72, usage::KP_2),
    (0x7A, usage::KP_3),
    (0x6B, usage::KP_4),
    (0x73, usage::KP_5),
    (0x74, usage::KP_6),
    (0x6C, usage::KP_7),
    (0x75, usage::KP_8),
    (0x7D, usage::KP_9),
];

const fn build_at_normal() -> Table {
    let table = filled(ScanAction::None);
    let table = put_usages(table, AT_NORMAL_USAGES);
    let table = put(table, 0xF0, ScanAction::BreakNext);
    let table = put(table, 0x00, ScanAction::Overrun);
    let table = put(table, 0xFF, ScanAction::Overrun);
    let table = put(table, 0xE0, ScanAction::Extended(ShiftState::Extended));
    put(table, 0xE1, ScanAction::Extended(ShiftState::Pause))
}

const AT_EXTENDED_USAGES: &[(u8, u8)] = &[
    (0x11, usage::RIGHT_ALT),
    (0x14, usage::RIGHT_CONTROL),
    (0x1F, usage::LEFT_GUI),
    (0x27, usage::RIGHT_GUI),
    (0x2F, usage::APPLICATION),
    (0x4A, usage::KP_SLASH),
    (0x5A, usage::KP_ENTER),
    (0x70, usage::INSERT),
    (0x6C, usage::HOME),
    (0x7D, usage::PAGE_UP),
    (0x71, usage::DELETE),
    (0x69, usage::END),
    (0x7A, usage::PAGE_DOWN),
    (0x75, usage::UP),
    (0x6B, usage::LEFT),
    (0x72, usage::DOWN),
    (0x74, usage::RIGHT),
];

const fn build_at_extended() -> Table {
    let table = filled(ScanAction::None);
    let table = put_usages(table, AT_EXTENDED_USAGES);
    put(table, 0xF0, ScanAction::BreakNext)
}

/// AT Pause make sequence: `E1 14 77`. The full burst also sends a
/// `E1 F0 14 F0 77` tail with no real break event behind it (and `0x14`
/// there would otherwise be mistaken for Left Control); `Translator`
/// swallows that tail itself via `ShiftState::PauseTail`, so these two
/// tables only need to recognize the make.
const fn build_at_pause() -> Table {
    let table = filled(ScanAction::None);
    put(table, 0x14, ScanAction::Extended(ShiftState::PauseNext))
}

const fn build_at_pause_next() -> Table {
    let table = filled(ScanAction::None);
    put(table, 0x77, ScanAction::Usage(usage::PAUSE))
}

pub static AT_TABLES: [Table; 4] = [
    build_at_normal(),
    build_at_extended(),
    build_at_pause(),
    build_at_pause_next(),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xt_table_a_make_and_break_range() {
        assert_eq!(XT_TABLES[0][0x1E], ScanAction::Usage(usage::A));
        assert_eq!(XT_TABLES[0][0x9E], ScanAction::BreakCode);
    }

    #[test]
    fn xt_table_overrun_codes() {
        assert_eq!(XT_TABLES[0][0x00], ScanAction::Overrun);
        assert_eq!(XT_TABLES[0][0xFF], ScanAction::Overrun);
    }

    #[test]
    fn at_table_break_prefix_and_none() {
        assert_eq!(AT_TABLES[0][0xF0], ScanAction::BreakNext);
        assert_eq!(AT_TABLES[0][0x08], ScanAction::None);
    }
}
