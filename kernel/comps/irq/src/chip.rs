// SPDX-License-Identifier: MPL-2.0

//! Interrupt controllers.

use crate::{flags::IrqFlags, layout::IrqNum, prelude::*};

/// The walk over the handler chain of a line, handed to [`IrqChip::handle`].
///
/// Calling it invokes every handler on the line and returns the union of
/// their flags.
pub type ChainWalk<'a> = &'a mut dyn FnMut() -> IrqFlags;

/// An interrupt controller, as seen by one IRQ descriptor.
///
/// This abstracts the hardware that routes, masks and acknowledges an IRQ
/// line. Different lines of one table may be driven by different chips.
///
/// The lifecycle methods are called with the table lock held and local
/// IRQs disabled; they must neither block nor call back into the table.
pub trait IrqChip: Send + Sync {
    /// Returns a human-readable name of the chip.
    fn name(&self) -> &'static str;

    /// Starts the line up when its first handler is registered,
    /// or when it is armed for autodetection.
    fn startup(&self, line: IrqNum);

    /// Shuts the line down when its last handler is removed,
    /// or when it is disarmed after autodetection.
    fn shutdown(&self, line: IrqNum);

    /// Unmasks the line.
    fn enable(&self, line: IrqNum);

    /// Masks the line.
    fn disable(&self, line: IrqNum);

    /// Acknowledges an interrupt on the line before its handlers run.
    fn ack(&self, _line: IrqNum) {}

    /// Ends the handling of an interrupt on the line, e.g., by an EOI.
    fn end(&self, _line: IrqNum) {}

    /// Handles an interrupt on the line.
    ///
    /// An implementation must perform whatever acknowledgement the hardware
    /// needs and must call `walk` to run the handlers of the line.
    fn handle(&self, line: IrqNum, walk: ChainWalk<'_>) -> IrqFlags {
        self.ack(line);
        let flags = walk();
        self.end(line);
        flags
    }
}

/// The chip of lines that no controller has been bound to.
///
/// Any interrupt on such a line is unexpected; it is reported and dropped.
#[derive(Debug, Default)]
pub struct NoIrqChip;

impl IrqChip for NoIrqChip {
    fn name(&self) -> &'static str {
        "none"
    }

    fn startup(&self, line: IrqNum) {
        debug!("[IRQ]: starting up line {:#x} without a controller", line);
    }

    fn shutdown(&self, _line: IrqNum) {}

    fn enable(&self, _line: IrqNum) {}

    fn disable(&self, _line: IrqNum) {}

    fn ack(&self, line: IrqNum) {
        error!("[IRQ]: unexpected interrupt on line {:#x}", line);
    }

    fn handle(&self, line: IrqNum, _walk: ChainWalk<'_>) -> IrqFlags {
        self.ack(line);
        IrqFlags::empty()
    }
}

/// The chip of per-CPU lines that are always on, e.g., the timer and IPIs.
///
/// These lines are delivered by the CPU itself and cannot be masked
/// individually, so every lifecycle method is a no-op.
#[derive(Debug, Default)]
pub struct InternalIrqChip;

impl IrqChip for InternalIrqChip {
    fn name(&self) -> &'static str {
        "internal"
    }

    fn startup(&self, _line: IrqNum) {}

    fn shutdown(&self, _line: IrqNum) {}

    fn enable(&self, _line: IrqNum) {}

    fn disable(&self, _line: IrqNum) {}
}

/// Returns the chip bound to lines at initialization.
pub(crate) fn no_irq_chip() -> Arc<dyn IrqChip> {
    Arc::new(NoIrqChip)
}
