// SPDX-License-Identifier: MPL-2.0

use bitflags::bitflags;

bitflags! {
    /// The status of an IRQ descriptor.
    pub struct IrqStatus: u32 {
        /// The line is enabled: its handlers are started and its depth is balanced.
        const ENABLED =     1 << 0;
        /// A handler chain walk is running on the line.
        const IN_PROGRESS = 1 << 1;
        /// The line is armed for autodetection.
        const AUTODETECT =  1 << 2;
        /// The line is armed and has not fired since it was armed.
        const WAITING =     1 << 3;
        /// The line fired while it was disabled or while its chain was being
        /// walked elsewhere.
        const PENDING =     1 << 4;
    }
}

bitflags! {
    /// Flags of a registered handler.
    ///
    /// The dispatcher also uses this type to report the union of the flags
    /// of all handlers it has invoked.
    pub struct IrqFlags: u32 {
        /// Deferred (bottom-half) work is pending.
        const DEFERRED_WORK = 1 << 0;
        /// The handler runs with local IRQs kept disabled.
        const FAST_PATH =     1 << 1;
        /// The handler may share its line with other handlers.
        const SHARED =        1 << 2;
        /// The firing of the handler feeds the entropy pool.
        const ENTROPY =       1 << 3;
        /// The handler was registered on a legacy line and
        /// expects to be called with the legacy number.
        const LEGACY_REMAP =  1 << 4;
    }
}
