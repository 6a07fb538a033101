// SPDX-License-Identifier: MPL-2.0

//! Interrupt statistics.

use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{layout::IrqNum, platform::Platform, prelude::*, table::IrqTable};

/// Per-CPU interrupt counters of every line.
///
/// Updating a counter is a relaxed atomic add on the current CPU's slot.
/// Reading sums across CPUs and may be inaccurate while other CPUs are
/// taking interrupts.
pub struct IrqStats {
    nr_cpus: usize,
    nr_irqs: usize,
    counters: Box<[AtomicUsize]>,
}

impl IrqStats {
    pub(crate) fn new(nr_cpus: usize, nr_irqs: usize) -> Self {
        let nr_cpus = nr_cpus.max(1);
        Self {
            nr_cpus,
            nr_irqs,
            counters: (0..nr_cpus * nr_irqs)
                .map(|_| AtomicUsize::new(0))
                .collect(),
        }
    }

    /// Counts one interrupt on `line` taken by `cpu`.
    pub(crate) fn add_on_cpu(&self, cpu: usize, line: IrqNum) {
        if let Some(counter) = self.counter(cpu, line) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the number of CPUs that counters are kept for.
    pub fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    /// Returns the number of interrupts on `line` taken by `cpu`.
    pub fn get_on_cpu(&self, cpu: usize, line: IrqNum) -> usize {
        self.counter(cpu, line)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Returns the number of interrupts on `line` across all CPUs.
    pub fn sum_all_cpus(&self, line: IrqNum) -> usize {
        (0..self.nr_cpus)
            .map(|cpu| self.get_on_cpu(cpu, line))
            .fold(0, usize::wrapping_add)
    }

    fn counter(&self, cpu: usize, line: IrqNum) -> Option<&AtomicUsize> {
        if cpu >= self.nr_cpus || line >= self.nr_irqs {
            return None;
        }
        self.counters.get(cpu * self.nr_irqs + line)
    }
}

/// A report of the lines with handlers, in the format of `/proc/interrupts`.
///
/// Each row shows the line, its per-CPU counts, the name of its controller
/// and the labels of its handlers:
///
/// ```text
///            CPU0       CPU1
///  48:          2          0      none  A, B
/// ```
pub struct InterruptsReport<'a, P: Platform> {
    table: &'a IrqTable<P>,
}

impl<P: Platform> IrqTable<P> {
    /// Returns a printable report of the lines that have handlers.
    pub fn interrupts(&self) -> InterruptsReport<'_, P> {
        InterruptsReport { table: self }
    }
}

impl<P: Platform> fmt::Display for InterruptsReport<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.table.stats;

        write!(f, "    ")?;
        for cpu in 0..stats.nr_cpus() {
            write!(f, " {:>10}", alloc::format!("CPU{}", cpu))?;
        }
        writeln!(f)?;

        let state = self.table.lock();
        for (line, desc) in state.descs.iter().enumerate() {
            let mut chain = state.actions.chain(desc.head).peekable();
            if chain.peek().is_none() {
                continue;
            }

            write!(f, "{:>3}:", line)?;
            for cpu in 0..stats.nr_cpus() {
                write!(f, " {:>10}", stats.get_on_cpu(cpu, line))?;
            }
            write!(f, " {:>9} ", desc.chip.name())?;
            for (i, (_, action)) in chain.enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, " {}", action.label)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
