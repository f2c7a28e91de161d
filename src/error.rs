//! Error kinds surfaced at the core boundary (spec.md §7).

/// Recoverable and terminal failures the line engine and report assembler
/// can report to the board layer.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Error {
    /// A write was attempted while more than 8 bits of an incoming frame
    /// had already been clocked in.
    Clocking,
    /// A command was queued while the frame ring still held undelivered
    /// bytes.
    RingBufferNotEmpty,
    /// An AT-only command was requested on an XT-detected keyboard.
    AtXt,
    /// A command is already outstanding, or a write is already in
    /// progress.
    Contention,
    /// BAT auto-detection gave up after the legacy retry.
    FailedToReadBat,
    /// The legacy-XT retry after a 2.5s safety timeout also failed.
    FailedToGetXtBat,
    /// The keyboard did not pull DATA low to ACK a written frame before
    /// the final falling edge. Redesigned per spec.md §9 from the
    /// source's panic into a recoverable error that triggers
    /// re-detection (see DESIGN.md, "panic on missing ACK").
    BatAckTimeout,
    /// The USB stack rejected a HID report push (not a line-engine
    /// condition; kept distinct from `Clocking`).
    UsbSend,
}
