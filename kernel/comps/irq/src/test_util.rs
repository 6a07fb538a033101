// SPDX-License-Identifier: MPL-2.0

//! A host platform and a recording controller for unit tests.

use core::{
    cell::Cell,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::{thread_local, time::Instant};

use crate::{
    action::{IrqContext, IrqRequest},
    chip::IrqChip,
    layout::{IrqLayout, IrqNum},
    platform::Platform,
    prelude::*,
    table::IrqTable,
};

const TEST_LEGACY_VECTORS: [IrqNum; 8] = [0x30, 1, 2, 3, 4, 5, 6, 7];

/// A small layout: legacy line 0 is remapped to 0x30, the other legacy
/// lines are identity-mapped, and 0x20..0x2e are free vectored lines.
pub(crate) const TEST_LAYOUT: IrqLayout = IrqLayout {
    nr_irqs: 64,
    legacy_vectors: &TEST_LEGACY_VECTORS,
    spurious_vector: 0x0f,
    timer_vector: 0x3e,
    ipi_vector: 0x3f,
    nr_cpus: 2,
};

thread_local! {
    static LOCAL_ENABLED: Cell<bool> = const { Cell::new(true) };
    static IRQ_NESTING: Cell<usize> = const { Cell::new(0) };
}

const UNKNOWN_STACK: usize = usize::MAX;

/// A platform whose CPU is the current test thread.
pub(crate) struct MockPlatform {
    boot: Instant,
    stack_remaining: AtomicUsize,
    pub(crate) entropy: spin::Mutex<Vec<IrqNum>>,
}

impl MockPlatform {
    pub(crate) fn new() -> Self {
        Self {
            boot: Instant::now(),
            stack_remaining: AtomicUsize::new(UNKNOWN_STACK),
            entropy: spin::Mutex::new(Vec::new()),
        }
    }

    /// Returns whether IRQs are enabled on the calling thread.
    pub(crate) fn local_enabled() -> bool {
        LOCAL_ENABLED.with(Cell::get)
    }

    pub(crate) fn set_stack_remaining(&self, remaining: Option<usize>) {
        self.stack_remaining
            .store(remaining.unwrap_or(UNKNOWN_STACK), Ordering::Relaxed);
    }
}

impl Platform for MockPlatform {
    type TrapFrame = ();

    fn enable_local(&self) {
        LOCAL_ENABLED.with(|enabled| enabled.set(true));
    }

    fn disable_local(&self) {
        LOCAL_ENABLED.with(|enabled| enabled.set(false));
    }

    fn is_local_enabled(&self) -> bool {
        Self::local_enabled()
    }

    fn irq_enter(&self) {
        IRQ_NESTING.with(|nesting| nesting.set(nesting.get() + 1));
    }

    fn irq_exit(&self) {
        IRQ_NESTING.with(|nesting| nesting.set(nesting.get() - 1));
    }

    fn in_interrupt(&self) -> bool {
        IRQ_NESTING.with(Cell::get) > 0
    }

    fn current_cpu(&self) -> usize {
        0
    }

    fn now(&self) -> Duration {
        self.boot.elapsed()
    }

    fn add_entropy(&self, line: IrqNum) {
        self.entropy.lock().push(line);
    }

    fn stack_remaining(&self) -> Option<usize> {
        match self.stack_remaining.load(Ordering::Relaxed) {
            UNKNOWN_STACK => None,
            remaining => Some(remaining),
        }
    }
}

pub(crate) fn new_table() -> IrqTable<MockPlatform> {
    IrqTable::new(TEST_LAYOUT, MockPlatform::new())
}

pub(crate) fn nop_handler(_line: IrqNum, _context: IrqContext, _frame: &()) {}

pub(crate) fn request(line: IrqNum) -> IrqRequest<()> {
    IrqRequest::new(line)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ChipCall {
    Startup(IrqNum),
    Shutdown(IrqNum),
    Enable(IrqNum),
    Disable(IrqNum),
    Ack(IrqNum),
    End(IrqNum),
}

/// A chip that records every call made to it.
#[derive(Default)]
pub(crate) struct RecordingChip {
    calls: spin::Mutex<Vec<ChipCall>>,
}

impl RecordingChip {
    /// Binds a new recording chip to `line` of `table`.
    pub(crate) fn bind(table: &IrqTable<MockPlatform>, line: IrqNum) -> Arc<Self> {
        let chip = Arc::new(Self::default());
        table.set_chip(line, chip.clone());
        chip
    }

    pub(crate) fn count(&self, call: ChipCall) -> usize {
        self.calls.lock().iter().filter(|&&c| c == call).count()
    }

    fn record(&self, call: ChipCall) {
        self.calls.lock().push(call);
    }
}

impl IrqChip for RecordingChip {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn startup(&self, line: IrqNum) {
        self.record(ChipCall::Startup(line));
    }

    fn shutdown(&self, line: IrqNum) {
        self.record(ChipCall::Shutdown(line));
    }

    fn enable(&self, line: IrqNum) {
        self.record(ChipCall::Enable(line));
    }

    fn disable(&self, line: IrqNum) {
        self.record(ChipCall::Disable(line));
    }

    fn ack(&self, line: IrqNum) {
        self.record(ChipCall::Ack(line));
    }

    fn end(&self, line: IrqNum) {
        self.record(ChipCall::End(line));
    }
}
