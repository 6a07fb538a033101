// SPDX-License-Identifier: MPL-2.0

use core::time::Duration;

use crate::layout::IrqNum;

/// The services an [`IrqTable`] needs from the platform underneath.
///
/// All methods must be callable from interrupt context and must never block.
///
/// [`IrqTable`]: crate::IrqTable
pub trait Platform: Send + Sync {
    /// The register state saved by the trap entry code.
    type TrapFrame;

    /// Enables IRQs on the current CPU.
    fn enable_local(&self);

    /// Disables IRQs on the current CPU.
    fn disable_local(&self);

    /// Returns whether IRQs are enabled on the current CPU.
    fn is_local_enabled(&self) -> bool;

    /// Marks the current CPU as entering interrupt handling, one level deeper.
    fn irq_enter(&self);

    /// Marks the current CPU as leaving one level of interrupt handling.
    fn irq_exit(&self);

    /// Returns whether the current CPU is handling an interrupt.
    fn in_interrupt(&self) -> bool;

    /// Returns the index of the current CPU.
    fn current_cpu(&self) -> usize;

    /// Returns a monotonic timestamp.
    ///
    /// Used to time busy-wait delay loops, so it must advance
    /// even with local IRQs disabled.
    fn now(&self) -> Duration;

    /// Feeds the firing of `line` into the entropy pool.
    fn add_entropy(&self, _line: IrqNum) {}

    /// Returns the number of bytes left on the current stack, if known.
    fn stack_remaining(&self) -> Option<usize> {
        None
    }
}
