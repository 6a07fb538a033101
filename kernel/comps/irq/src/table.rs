// SPDX-License-Identifier: MPL-2.0

//! The IRQ descriptor table.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::{
    action::{ActionArena, ActionId},
    chip::{InternalIrqChip, IrqChip, no_irq_chip},
    flags::IrqStatus,
    layout::{IrqLayout, IrqNum},
    legacy::LegacyMap,
    platform::Platform,
    prelude::*,
    stats::IrqStats,
    sync::{IrqSafeGuard, IrqSafeLock},
};

/// The depth of a descriptor that has never been started up.
///
/// A line starts out disabled once, so that the first enable balances it.
pub(crate) const INITIAL_DEPTH: u32 = 1;

/// The state of one IRQ line that is protected by the table lock.
pub(crate) struct IrqDesc {
    /// The status bits, except `IN_PROGRESS`, which lives outside the lock.
    pub(crate) status: IrqStatus,
    /// The number of disables not yet matched by enables.
    pub(crate) depth: u32,
    /// The first handler of the chain.
    pub(crate) head: Option<ActionId>,
    pub(crate) chip: Arc<dyn IrqChip>,
}

impl IrqDesc {
    fn new(chip: Arc<dyn IrqChip>) -> Self {
        Self {
            status: IrqStatus::empty(),
            depth: INITIAL_DEPTH,
            head: None,
            chip,
        }
    }
}

/// Everything that the table lock protects.
pub(crate) struct TableState<F> {
    pub(crate) descs: Box<[IrqDesc]>,
    pub(crate) actions: ActionArena<F>,
}

pub(crate) type StateGuard<'a, P> = IrqSafeGuard<'a, TableState<<P as Platform>::TrapFrame>, P>;

/// A table of IRQ descriptors, one per line.
///
/// Micro-access to the controllers is serialized over the whole table by a
/// single lock. Only the in-progress flags of the lines are kept outside it.
pub struct IrqTable<P: Platform> {
    pub(crate) platform: P,
    pub(crate) layout: IrqLayout,
    pub(crate) legacy: LegacyMap,
    pub(crate) state: IrqSafeLock<TableState<P::TrapFrame>>,
    pub(crate) in_progress: Box<[AtomicBool]>,
    pub(crate) stats: IrqStats,
    /// Consecutive dispatches that found the stack nearly exhausted.
    pub(crate) stack_warnings: AtomicU8,
}

/// A snapshot of the state of one IRQ descriptor.
#[derive(Clone, Copy, Debug)]
pub struct IrqDescInfo {
    /// The status bits, including whether a chain walk is in progress.
    pub status: IrqStatus,
    /// The number of disables not yet matched by enables.
    pub depth: u32,
    /// The number of registered handlers.
    pub nr_handlers: usize,
    /// The name of the controller bound to the line.
    pub chip_name: &'static str,
}

impl<P: Platform> IrqTable<P> {
    /// Builds the descriptor table of `layout`.
    ///
    /// Every line starts out disabled, without handlers, and bound to
    /// [`NoIrqChip`]; the spurious, timer and IPI vectors are bound to
    /// [`InternalIrqChip`].
    ///
    /// # Panics
    ///
    /// This function panics if `layout` is inconsistent,
    /// e.g., if a reserved vector lies beyond `nr_irqs`.
    ///
    /// [`NoIrqChip`]: crate::NoIrqChip
    pub fn new(layout: IrqLayout, platform: P) -> Self {
        assert!(layout.nr_irqs > 0, "an IRQ table needs at least one line");
        for (name, vector) in [
            ("spurious", layout.spurious_vector),
            ("timer", layout.timer_vector),
            ("IPI", layout.ipi_vector),
        ] {
            assert!(
                vector < layout.nr_irqs,
                "the {} vector {:#x} lies beyond {} IRQs",
                name,
                vector,
                layout.nr_irqs
            );
        }

        let legacy = LegacyMap::new(&layout);

        let default_chip = no_irq_chip();
        let mut descs: Box<[IrqDesc]> = (0..layout.nr_irqs)
            .map(|_| IrqDesc::new(default_chip.clone()))
            .collect();
        let internal_chip: Arc<dyn IrqChip> = Arc::new(InternalIrqChip);
        for vector in [
            layout.spurious_vector,
            layout.timer_vector,
            layout.ipi_vector,
        ] {
            descs[vector].chip = internal_chip.clone();
        }

        let in_progress = (0..layout.nr_irqs)
            .map(|_| AtomicBool::new(false))
            .collect();

        debug!(
            "[IRQ]: initialized {} descriptors, {} legacy lines",
            layout.nr_irqs,
            layout.nr_legacy()
        );

        Self {
            stats: IrqStats::new(layout.nr_cpus, layout.nr_irqs),
            platform,
            layout,
            legacy,
            state: IrqSafeLock::new(TableState {
                descs,
                actions: ActionArena::new(),
            }),
            in_progress,
            stack_warnings: AtomicU8::new(0),
        }
    }

    /// Returns the layout the table was built with.
    pub fn layout(&self) -> &IrqLayout {
        &self.layout
    }

    /// Returns the platform the table runs on.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Returns the legacy translation of the table.
    pub fn legacy_map(&self) -> &LegacyMap {
        &self.legacy
    }

    /// Translates a line number supplied by a caller into a vector.
    ///
    /// Legacy lines are translated; all other lines are returned unchanged.
    pub fn map_legacy(&self, line: IrqNum) -> IrqNum {
        self.legacy.to_vector(line)
    }

    /// Returns the statistics table of the dispatcher.
    pub fn stats(&self) -> &IrqStats {
        &self.stats
    }

    /// Binds `chip` to a line.
    ///
    /// This is meant to be called while the platform brings up its
    /// controllers, before handlers are registered on the line.
    pub fn set_chip(&self, line: IrqNum, chip: Arc<dyn IrqChip>) {
        let Some(line) = self.resolve(line) else {
            return;
        };
        let mut state = self.lock();
        let desc = &mut state.descs[line];
        if desc.head.is_some() {
            warn!(
                "[IRQ]: rebinding line {:#x} from {} to {} while it has handlers",
                line,
                desc.chip.name(),
                chip.name()
            );
        }
        desc.chip = chip;
    }

    /// Returns a snapshot of the descriptor of a line.
    pub fn desc_info(&self, line: IrqNum) -> Option<IrqDescInfo> {
        let line = self.legacy.to_vector(line);
        if line >= self.layout.nr_irqs {
            return None;
        }

        let state = self.lock();
        let desc = &state.descs[line];
        let mut status = desc.status;
        if self.in_progress[line].load(Ordering::Acquire) {
            status |= IrqStatus::IN_PROGRESS;
        }
        Some(IrqDescInfo {
            status,
            depth: desc.depth,
            nr_handlers: state.actions.chain(desc.head).count(),
            chip_name: desc.chip.name(),
        })
    }

    pub(crate) fn lock(&self) -> StateGuard<'_, P> {
        self.state.lock(&self.platform)
    }

    /// Translates a caller-supplied line and checks that it is in range.
    pub(crate) fn resolve(&self, line: IrqNum) -> Option<IrqNum> {
        let vector = self.legacy.to_vector(line);
        if vector >= self.layout.nr_irqs {
            error!("[IRQ]: line {:#x} is out of range", line);
            return None;
        }
        Some(vector)
    }

    /// Spins until no chain walk is in progress on `line`.
    pub(crate) fn wait_quiescent(&self, line: IrqNum) {
        while self.in_progress[line].load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }
}
