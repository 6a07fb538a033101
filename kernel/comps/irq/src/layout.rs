// SPDX-License-Identifier: MPL-2.0

//! Build-time constants describing the IRQ numbering of a platform.

/// An IRQ number in the numbering space of an [`IrqTable`].
///
/// [`IrqTable`]: crate::IrqTable
pub type IrqNum = usize;

/// The IRQ layout of a platform.
///
/// These are constants supplied by the platform when the table is built.
/// The table never changes them afterwards.
#[derive(Clone, Copy, Debug)]
pub struct IrqLayout {
    /// The number of IRQ descriptors.
    pub nr_irqs: usize,
    /// The vector each legacy line is translated to.
    ///
    /// Legacy line `i` maps to `legacy_vectors[i]`;
    /// the length of the slice is the size of the legacy range.
    pub legacy_vectors: &'static [IrqNum],
    /// The vector reserved for spurious interrupts.
    pub spurious_vector: IrqNum,
    /// The vector of the system timer, whose handler record is preallocated.
    pub timer_vector: IrqNum,
    /// The vector of inter-processor interrupts, whose handler record is preallocated.
    pub ipi_vector: IrqNum,
    /// The number of CPUs that statistics are kept for.
    pub nr_cpus: usize,
}

/// ISA IRQs 0..16 as routed by the IA-64 I/O SAPIC.
const IA64_ISA_VECTORS: [IrqNum; 16] = [
    0x2f, 0x20, 0x2e, 0x2d, 0x2c, 0x2b, 0x2a, 0x29, 0x28, 0x27, 0x26, 0x25, 0x24, 0x23, 0x22, 0x21,
];

impl IrqLayout {
    /// The layout of an IA-64 machine.
    pub const IA64: Self = Self {
        nr_irqs: 256,
        legacy_vectors: &IA64_ISA_VECTORS,
        spurious_vector: 0x0f,
        timer_vector: 0xef,
        ipi_vector: 0xfe,
        nr_cpus: 64,
    };

    /// Returns the size of the legacy range, which is also the first vectored line.
    pub const fn nr_legacy(&self) -> usize {
        self.legacy_vectors.len()
    }
}

impl Default for IrqLayout {
    fn default() -> Self {
        Self::IA64
    }
}
