// SPDX-License-Identifier: MPL-2.0

//! Dispatching of interrupts to handler chains.

use core::sync::atomic::Ordering;

use smallvec::SmallVec;

use crate::{
    action::IrqAction,
    flags::{IrqFlags, IrqStatus},
    layout::IrqNum,
    platform::Platform,
    prelude::*,
    table::{IrqTable, StateGuard},
};

/// The number of bytes of stack below which a dispatch is in danger.
const STACK_DANGER_BYTES: usize = 1024;

/// The number of consecutive dangerous dispatches tolerated before panicking.
const MAX_STACK_WARNINGS: u8 = 5;

/// The number of handlers a chain snapshot holds without allocating.
const INLINE_ACTIONS: usize = 4;

type ActionSnapshot<F> = SmallVec<[IrqAction<F>; INLINE_ACTIONS]>;

/// The outcome of dispatching an interrupt.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DispatchResult {
    /// The interrupt was not delivered to any handler:
    /// the line was out of range or the spurious vector.
    Spurious,
    /// The interrupt was handled.
    ///
    /// The flags are the union of the flags of the handlers that ran.
    /// [`IrqFlags::DEFERRED_WORK`] is always set, so the caller must always
    /// check for pending bottom-half work.
    Handled(IrqFlags),
}

impl DispatchResult {
    /// Returns whether the caller should run pending deferred work.
    pub fn has_deferred_work(&self) -> bool {
        match self {
            Self::Spurious => false,
            Self::Handled(flags) => flags.contains(IrqFlags::DEFERRED_WORK),
        }
    }
}

impl<P: Platform> IrqTable<P> {
    /// Dispatches an interrupt on `line` to its handlers.
    ///
    /// This is called by the trap entry code, once per interrupt, with
    /// local IRQs disabled and `line` already translated into a vector.
    ///
    /// The controller bound to the line acknowledges the interrupt and
    /// runs the handler chain. Unless the first handler asks for
    /// [`IrqFlags::FAST_PATH`], local IRQs are re-enabled while the
    /// handlers run.
    ///
    /// # Panics
    ///
    /// This method panics if the stack is found nearly exhausted more than
    /// a few times in a row, which means interrupts are nesting without bound.
    pub fn dispatch(&self, line: IrqNum, frame: &P::TrapFrame) -> DispatchResult {
        if line >= self.layout.nr_irqs {
            error!("[IRQ]: dispatch on invalid line {:#x}", line);
            return DispatchResult::Spurious;
        }
        self.check_stack(line);

        self.platform.irq_enter();
        let result = self.dispatch_in_irq(line, frame);
        self.platform.irq_exit();
        result
    }

    fn dispatch_in_irq(&self, line: IrqNum, frame: &P::TrapFrame) -> DispatchResult {
        self.stats.add_on_cpu(self.platform.current_cpu(), line);

        if line == self.layout.spurious_vector {
            debug!("[IRQ]: spurious interrupt on CPU {}", self.platform.current_cpu());
            return DispatchResult::Spurious;
        }

        let chip = {
            let mut state = self.lock();
            let desc = &mut state.descs[line];
            // Any interrupt on an armed line counts as a fire for autodetection.
            if desc.status.contains(IrqStatus::AUTODETECT) {
                desc.status -= IrqStatus::WAITING;
            }
            desc.chip.clone()
        };

        let flags = chip.handle(line, &mut || self.walk_chain(line, frame));
        DispatchResult::Handled(flags | IrqFlags::DEFERRED_WORK)
    }

    /// Runs the handler chain of `line`, marking the line as in progress.
    ///
    /// If the chain is already being walked on another CPU, the interrupt
    /// is left pending for that CPU, which walks the chain once more before
    /// it clears the in-progress mark. An interrupt on a disabled line is
    /// only marked pending; no handler sees it.
    fn walk_chain(&self, line: IrqNum, frame: &P::TrapFrame) -> IrqFlags {
        let mut actions = {
            let mut state = self.lock();
            let desc = &mut state.descs[line];
            if self.in_progress[line].load(Ordering::Acquire)
                || !desc.status.contains(IrqStatus::ENABLED)
            {
                desc.status |= IrqStatus::PENDING;
                return IrqFlags::empty();
            }
            desc.status -= IrqStatus::PENDING;
            let actions = Self::snapshot(&state, line);
            if actions.is_empty() {
                return IrqFlags::empty();
            }
            self.in_progress[line].store(true, Ordering::Release);
            actions
        };

        let mut flags = IrqFlags::empty();
        loop {
            flags |= self.run_actions(line, &actions, frame);

            let mut state = self.lock();
            let desc = &mut state.descs[line];
            // A pending interrupt on a line disabled meanwhile stays pending.
            if !desc.status.contains(IrqStatus::PENDING)
                || !desc.status.contains(IrqStatus::ENABLED)
            {
                self.in_progress[line].store(false, Ordering::Release);
                break;
            }
            desc.status -= IrqStatus::PENDING;
            actions = Self::snapshot(&state, line);
            if actions.is_empty() {
                self.in_progress[line].store(false, Ordering::Release);
                break;
            }
        }
        flags
    }

    fn snapshot(state: &StateGuard<'_, P>, line: IrqNum) -> ActionSnapshot<P::TrapFrame> {
        state
            .actions
            .chain(state.descs[line].head)
            .map(|(_, action)| *action)
            .collect()
    }

    /// Invokes `actions` in order and returns the union of their flags.
    fn run_actions(
        &self,
        line: IrqNum,
        actions: &[IrqAction<P::TrapFrame>],
        frame: &P::TrapFrame,
    ) -> IrqFlags {
        let Some(head) = actions.first() else {
            return IrqFlags::empty();
        };
        if !head.flags.contains(IrqFlags::FAST_PATH) {
            self.platform.enable_local();
        }

        let mut flags = IrqFlags::empty();
        for action in actions {
            let handler_line = if action.flags.contains(IrqFlags::LEGACY_REMAP) {
                self.legacy.to_legacy(line)
            } else {
                line
            };
            trace!("[IRQ]: line {:#x} -> {}", line, action.label);
            (action.handler)(handler_line, action.context, frame);
            flags |= action.flags;
        }
        if flags.contains(IrqFlags::ENTROPY) {
            self.platform.add_entropy(line);
        }

        self.platform.disable_local();
        flags
    }

    /// Checks that the stack has room for another level of interrupts.
    fn check_stack(&self, line: IrqNum) {
        let Some(remaining) = self.platform.stack_remaining() else {
            return;
        };
        if remaining >= STACK_DANGER_BYTES {
            self.stack_warnings.store(0, Ordering::Relaxed);
            return;
        }

        let warnings = self.stack_warnings.fetch_add(1, Ordering::Relaxed) + 1;
        if warnings > MAX_STACK_WARNINGS {
            panic!(
                "IRQ stack exhausted: {} bytes left on CPU {} in line {:#x}",
                remaining,
                self.platform.current_cpu(),
                line
            );
        }
        warn!(
            "[IRQ]: DANGER: only {} bytes of stack left in line {:#x}",
            remaining, line
        );
    }
}

#[cfg(test)]
mod test {
    use core::sync::atomic::{AtomicBool, AtomicUsize};
    use std::{sync::Arc, thread};

    use super::*;
    use crate::{
        action::{IrqContext, IrqRequest},
        test_util::{ChipCall, MockPlatform, RecordingChip, TEST_LAYOUT, new_table, nop_handler},
    };

    fn request(line: IrqNum, flags: IrqFlags, label: &'static str, ctx: usize) -> IrqRequest<()> {
        IrqRequest::new(line)
            .flags(flags)
            .label(label)
            .context(IrqContext::new(ctx))
    }

    static ORDER: spin::Mutex<Vec<(&'static str, IrqNum)>> = spin::Mutex::new(Vec::new());

    fn record_a(line: IrqNum, _context: IrqContext, _frame: &()) {
        ORDER.lock().push(("A", line));
    }

    fn record_b(line: IrqNum, _context: IrqContext, _frame: &()) {
        ORDER.lock().push(("B", line));
    }

    fn record_c(line: IrqNum, _context: IrqContext, _frame: &()) {
        ORDER.lock().push(("C", line));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let table = new_table();
        RecordingChip::bind(&table, 0x24);
        for (handler, label, ctx) in [
            (record_a as fn(IrqNum, IrqContext, &()), "A", 1),
            (record_b, "B", 2),
            (record_c, "C", 3),
        ] {
            table
                .register(request(0x24, IrqFlags::SHARED, label, ctx).handler(handler))
                .unwrap();
        }

        ORDER.lock().clear();
        let result = table.dispatch(0x24, &());
        assert!(result.has_deferred_work());
        assert_eq!(*ORDER.lock(), [("A", 0x24), ("B", 0x24), ("C", 0x24)]);
    }

    static SCENARIO: spin::Mutex<Vec<(&'static str, IrqNum)>> = spin::Mutex::new(Vec::new());

    fn scenario_a(line: IrqNum, _context: IrqContext, _frame: &()) {
        SCENARIO.lock().push(("A", line));
    }

    fn scenario_b(line: IrqNum, _context: IrqContext, _frame: &()) {
        SCENARIO.lock().push(("B", line));
    }

    #[test]
    fn legacy_handlers_see_their_legacy_line() {
        let table = new_table();
        let chip = RecordingChip::bind(&table, 0x30);

        table
            .register(request(0, IrqFlags::SHARED, "A", 0xa).handler(scenario_a))
            .unwrap();
        assert_eq!(chip.count(ChipCall::Startup(0x30)), 1);
        assert_eq!(table.desc_info(0x30).unwrap().depth, 0);
        table
            .register(request(0, IrqFlags::SHARED, "B", 0xb).handler(scenario_b))
            .unwrap();
        assert_eq!(chip.count(ChipCall::Startup(0x30)), 1);

        table.dispatch(0x30, &());
        assert_eq!(*SCENARIO.lock(), [("A", 0), ("B", 0)]);

        table.remove(0, IrqContext::new(0xa));
        assert_eq!(table.desc_info(0x30).unwrap().nr_handlers, 1);
        assert_eq!(chip.count(ChipCall::Shutdown(0x30)), 0);

        table.remove(0, IrqContext::new(0xb));
        assert_eq!(chip.count(ChipCall::Shutdown(0x30)), 1);
        assert!(!table.desc_info(0x30).unwrap().status.contains(IrqStatus::ENABLED));
    }

    #[test]
    fn deferred_work_is_always_reported() {
        let table = new_table();
        RecordingChip::bind(&table, 0x25);
        table
            .register(request(0x25, IrqFlags::SHARED, "quiet", 1).handler(nop_handler))
            .unwrap();

        let result = table.dispatch(0x25, &());
        assert_eq!(
            result,
            DispatchResult::Handled(IrqFlags::SHARED | IrqFlags::DEFERRED_WORK)
        );
    }

    #[test]
    fn invalid_and_spurious_lines_are_dropped() {
        let table = new_table();
        assert_eq!(
            table.dispatch(TEST_LAYOUT.nr_irqs, &()),
            DispatchResult::Spurious
        );
        assert_eq!(
            table.dispatch(TEST_LAYOUT.spurious_vector, &()),
            DispatchResult::Spurious
        );
        assert!(!DispatchResult::Spurious.has_deferred_work());

        // Spurious interrupts are still counted; invalid ones cannot be.
        assert_eq!(table.stats().sum_all_cpus(TEST_LAYOUT.spurious_vector), 1);
        assert!(!table.platform().in_interrupt());
    }

    static FAST_SAW_ENABLED: AtomicUsize = AtomicUsize::new(0);
    static SLOW_SAW_ENABLED: AtomicUsize = AtomicUsize::new(0);

    fn fast_handler(_line: IrqNum, _context: IrqContext, _frame: &()) {
        if MockPlatform::local_enabled() {
            FAST_SAW_ENABLED.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn slow_handler(_line: IrqNum, _context: IrqContext, _frame: &()) {
        if MockPlatform::local_enabled() {
            SLOW_SAW_ENABLED.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn only_slow_chains_run_with_irqs_enabled() {
        let table = new_table();
        RecordingChip::bind(&table, 0x26);
        RecordingChip::bind(&table, 0x27);
        table
            .register(request(0x26, IrqFlags::FAST_PATH, "fast", 1).handler(fast_handler))
            .unwrap();
        table
            .register(request(0x27, IrqFlags::empty(), "slow", 1).handler(slow_handler))
            .unwrap();

        table.platform().disable_local();
        table.dispatch(0x26, &());
        table.dispatch(0x27, &());

        assert_eq!(FAST_SAW_ENABLED.load(Ordering::SeqCst), 0);
        assert_eq!(SLOW_SAW_ENABLED.load(Ordering::SeqCst), 1);
        assert!(!table.platform().is_local_enabled());
    }

    #[test]
    fn entropy_is_fed_once_per_dispatch() {
        let table = new_table();
        RecordingChip::bind(&table, 0x28);
        for ctx in 1..=3 {
            table
                .register(
                    request(0x28, IrqFlags::SHARED | IrqFlags::ENTROPY, "rng", ctx)
                        .handler(nop_handler),
                )
                .unwrap();
        }
        RecordingChip::bind(&table, 0x29);
        table
            .register(request(0x29, IrqFlags::empty(), "plain", 1).handler(nop_handler))
            .unwrap();

        table.dispatch(0x28, &());
        table.dispatch(0x29, &());
        table.dispatch(0x28, &());

        assert_eq!(*table.platform().entropy.lock(), [0x28, 0x28]);
    }

    #[test]
    fn dispatch_goes_through_the_chip() {
        let table = new_table();
        let chip = RecordingChip::bind(&table, 0x2a);
        table
            .register(request(0x2a, IrqFlags::empty(), "dev", 1).handler(nop_handler))
            .unwrap();

        table.dispatch(0x2a, &());
        table.dispatch(0x2a, &());
        assert_eq!(chip.count(ChipCall::Ack(0x2a)), 2);
        assert_eq!(chip.count(ChipCall::End(0x2a)), 2);
        assert_eq!(table.stats().sum_all_cpus(0x2a), 2);
        assert!(!table.desc_info(0x2a).unwrap().status.contains(IrqStatus::IN_PROGRESS));
    }

    #[test]
    fn low_stack_is_tolerated_a_few_times() {
        let table = new_table();
        table.platform().set_stack_remaining(Some(512));
        for _ in 0..MAX_STACK_WARNINGS {
            table.dispatch(0x2b, &());
        }

        // A healthy dispatch resets the budget.
        table.platform().set_stack_remaining(Some(8192));
        table.dispatch(0x2b, &());
        table.platform().set_stack_remaining(Some(512));
        for _ in 0..MAX_STACK_WARNINGS {
            table.dispatch(0x2b, &());
        }
    }

    #[test]
    #[should_panic(expected = "IRQ stack exhausted")]
    fn exhausted_stack_is_fatal() {
        let table = new_table();
        table.platform().set_stack_remaining(Some(512));
        for _ in 0..=MAX_STACK_WARNINGS {
            table.dispatch(0x2b, &());
        }
    }

    static DISABLED_LINE_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn count_disabled_line(_line: IrqNum, _context: IrqContext, _frame: &()) {
        DISABLED_LINE_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn disabled_lines_do_not_reach_handlers() {
        let table = new_table();
        let chip = RecordingChip::bind(&table, 0x2d);
        table
            .register(request(0x2d, IrqFlags::empty(), "dev", 1).handler(count_disabled_line))
            .unwrap();

        table.disable(0x2d);
        // The chip does not mask, so the interrupt still arrives.
        let result = table.dispatch(0x2d, &());
        assert!(result.has_deferred_work());
        assert_eq!(DISABLED_LINE_CALLS.load(Ordering::SeqCst), 0);
        assert_eq!(chip.count(ChipCall::Ack(0x2d)), 1);
        let status = table.desc_info(0x2d).unwrap().status;
        assert!(status.contains(IrqStatus::PENDING));
        assert!(!status.contains(IrqStatus::IN_PROGRESS));

        table.enable(0x2d);
        table.dispatch(0x2d, &());
        assert_eq!(DISABLED_LINE_CALLS.load(Ordering::SeqCst), 1);
        assert!(!table.desc_info(0x2d).unwrap().status.contains(IrqStatus::PENDING));
    }

    static REPLAY_CALLS: AtomicUsize = AtomicUsize::new(0);
    static REPLAY_ENTERED: AtomicBool = AtomicBool::new(false);
    static REPLAY_RELEASE: AtomicBool = AtomicBool::new(false);

    fn blocking_once(_line: IrqNum, _context: IrqContext, _frame: &()) {
        if REPLAY_CALLS.fetch_add(1, Ordering::SeqCst) == 0 {
            REPLAY_ENTERED.store(true, Ordering::SeqCst);
            while !REPLAY_RELEASE.load(Ordering::SeqCst) {
                core::hint::spin_loop();
            }
        }
    }

    #[test]
    fn interrupts_during_a_walk_are_replayed() {
        let table = Arc::new(new_table());
        RecordingChip::bind(&table, 0x2e);
        table
            .register(request(0x2e, IrqFlags::empty(), "dev", 1).handler(blocking_once))
            .unwrap();

        let first = {
            let table = table.clone();
            thread::spawn(move || table.dispatch(0x2e, &()))
        };
        while !REPLAY_ENTERED.load(Ordering::SeqCst) {
            core::hint::spin_loop();
        }

        // The line is busy on the other thread: this one only leaves it pending.
        let second = table.dispatch(0x2e, &());
        assert_eq!(second, DispatchResult::Handled(IrqFlags::DEFERRED_WORK));
        assert_eq!(REPLAY_CALLS.load(Ordering::SeqCst), 1);
        let status = table.desc_info(0x2e).unwrap().status;
        assert!(status.contains(IrqStatus::PENDING | IrqStatus::IN_PROGRESS));

        REPLAY_RELEASE.store(true, Ordering::SeqCst);
        let first = first.join().unwrap();
        assert!(first.has_deferred_work());

        assert_eq!(REPLAY_CALLS.load(Ordering::SeqCst), 2);
        let status = table.desc_info(0x2e).unwrap().status;
        assert!(!status.intersects(IrqStatus::PENDING | IrqStatus::IN_PROGRESS));
    }
}
