// SPDX-License-Identifier: MPL-2.0

//! Registration of handlers and enabling/disabling of lines.

use core::panic::Location;

use crate::{
    action::{ActionId, IrqAction, IrqContext, IrqRequest},
    flags::{IrqFlags, IrqStatus},
    layout::IrqNum,
    platform::Platform,
    prelude::*,
    table::{INITIAL_DEPTH, IrqTable, StateGuard},
};

impl<P: Platform> IrqTable<P> {
    /// Registers a handler.
    ///
    /// The line of `request` may be a legacy line or a vector. A handler
    /// registered on a legacy line is called with the legacy number.
    ///
    /// If the line has no handlers yet, it is started up and enabled.
    /// Otherwise the handler is appended to the chain of the line, which
    /// requires both the first handler of the chain and the new one to
    /// carry [`IrqFlags::SHARED`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgs`] if the request has no handler or the line is out of range;
    /// - [`Error::Busy`] if the line cannot be shared;
    /// - [`Error::NoMemory`] if no handler record can be allocated.
    pub fn register(&self, request: IrqRequest<P::TrapFrame>) -> Result<()> {
        let Some(handler) = request.handler else {
            return Err(Error::InvalidArgs);
        };
        let line = self.legacy.to_vector(request.line);
        if line >= self.layout.nr_irqs {
            return Err(Error::InvalidArgs);
        }

        let mut flags = request.flags;
        if flags.contains(IrqFlags::SHARED) && request.context.is_none() {
            warn!(
                "[IRQ]: \"{}\" requests shared line {:#x} without a context",
                request.label, request.line
            );
        }
        if line != request.line {
            flags |= IrqFlags::LEGACY_REMAP;
        }

        let action = IrqAction {
            handler,
            flags,
            label: request.label,
            context: request.context,
        };

        let mut state = self.lock();
        let id = self.store_action(&mut state, line, action)?;
        let result = self.setup_action(&mut state, line, id);
        if result.is_err() {
            state.actions.release(id);
        }
        result
    }

    /// Puts `action` into a preallocated slot if `line` has one, or into a
    /// dynamically allocated slot otherwise.
    fn store_action(
        &self,
        state: &mut StateGuard<'_, P>,
        line: IrqNum,
        action: IrqAction<P::TrapFrame>,
    ) -> Result<ActionId> {
        let static_slot = if line == self.layout.timer_vector {
            Some(state.actions.timer_slot())
        } else {
            self.ipi_slot(state, line)
        };

        // A second handler on a line with a preallocated slot falls back
        // to dynamic storage.
        if let Some(id) = static_slot.and_then(|slot| state.actions.fill_static(slot, action)) {
            return Ok(id);
        }
        state.actions.alloc(action)
    }

    #[cfg(feature = "smp")]
    fn ipi_slot(&self, state: &StateGuard<'_, P>, line: IrqNum) -> Option<ActionId> {
        (line == self.layout.ipi_vector).then(|| state.actions.ipi_slot())
    }

    #[cfg(not(feature = "smp"))]
    fn ipi_slot(&self, _state: &StateGuard<'_, P>, _line: IrqNum) -> Option<ActionId> {
        None
    }

    /// Links a stored action into the chain of `line`.
    fn setup_action(
        &self,
        state: &mut StateGuard<'_, P>,
        line: IrqNum,
        id: ActionId,
    ) -> Result<()> {
        let new_flags = state.actions.get(id).flags;

        let Some(head) = state.descs[line].head else {
            let desc = &mut state.descs[line];
            desc.head = Some(id);
            desc.depth = 0;
            desc.status |= IrqStatus::ENABLED;
            desc.status -= IrqStatus::AUTODETECT | IrqStatus::WAITING | IrqStatus::PENDING;
            desc.chip.startup(line);
            debug!("[IRQ]: line {:#x} started up by {}", line, desc.chip.name());
            return Ok(());
        };

        // The head stands for the whole chain.
        let head_flags = state.actions.get(head).flags;
        if !head_flags.contains(IrqFlags::SHARED) || !new_flags.contains(IrqFlags::SHARED) {
            return Err(Error::Busy);
        }

        let mut tail = head;
        while let Some(next) = state.actions.next(tail) {
            tail = next;
        }
        state.actions.set_next(tail, Some(id));
        Ok(())
    }

    /// Removes the first handler of `line` whose context is `context`.
    ///
    /// If it was the last handler, the line is disabled and shut down.
    /// On multi-processor systems, the handler may still be running on
    /// another CPU; this method spins until the line is quiescent before
    /// it gives up the storage of the handler.
    ///
    /// Removing a handler that is not registered is reported and ignored.
    pub fn remove(&self, line: IrqNum, context: IrqContext) {
        let Some(line) = self.resolve(line) else {
            return;
        };

        let mut state = self.lock();
        let Some(id) = Self::unlink(&mut state, line, context) else {
            drop(state);
            warn!(
                "[IRQ]: trying to free line {:#x} with no handler for context {:#x}",
                line,
                context.as_raw()
            );
            return;
        };

        let desc = &mut state.descs[line];
        if desc.head.is_none() {
            desc.status -= IrqStatus::ENABLED;
            desc.depth = INITIAL_DEPTH;
            desc.chip.shutdown(line);
            debug!("[IRQ]: line {:#x} shut down", line);
        }
        drop(state);

        // The lock must be released before waiting: a walk in progress on
        // another CPU takes it again to finish.
        if cfg!(feature = "smp") {
            self.wait_quiescent(line);
        }

        self.lock().actions.release(id);
    }

    /// Unlinks the first action with `context` from the chain of `line`.
    fn unlink(
        state: &mut StateGuard<'_, P>,
        line: IrqNum,
        context: IrqContext,
    ) -> Option<ActionId> {
        let head = state.descs[line].head;
        let mut prev = None;
        let mut found = None;
        for (id, action) in state.actions.chain(head) {
            if action.context == context {
                found = Some(id);
                break;
            }
            prev = Some(id);
        }

        let id = found?;
        let next = state.actions.next(id);
        match prev {
            Some(prev) => state.actions.set_next(prev, next),
            None => state.descs[line].head = next,
        }
        state.actions.set_next(id, None);
        Some(id)
    }

    /// Disables a line without waiting for its running handlers.
    ///
    /// Disables nest: the line is masked by the first disable and unmasked
    /// again only by the matching number of [`enable`]s.
    ///
    /// [`enable`]: Self::enable
    pub fn disable_nosync(&self, line: IrqNum) {
        let Some(line) = self.resolve(line) else {
            return;
        };

        let mut state = self.lock();
        let desc = &mut state.descs[line];
        desc.depth += 1;
        if desc.depth == 1 {
            desc.status -= IrqStatus::ENABLED;
            desc.chip.disable(line);
        }
    }

    /// Disables a line and waits until its handlers have finished running.
    ///
    /// When called from interrupt context, this does not wait, since the
    /// handler it would wait for may be the caller.
    pub fn disable(&self, line: IrqNum) {
        self.disable_nosync(line);
        let line = self.legacy.to_vector(line);
        if line < self.layout.nr_irqs && !self.platform.in_interrupt() {
            self.wait_quiescent(line);
        }
    }

    /// Undoes one [`disable`] or [`disable_nosync`].
    ///
    /// The line is unmasked when the last outstanding disable is undone.
    /// Enabling a line that is not disabled is reported and ignored.
    ///
    /// [`disable`]: Self::disable
    /// [`disable_nosync`]: Self::disable_nosync
    #[track_caller]
    pub fn enable(&self, line: IrqNum) {
        let caller = Location::caller();
        let Some(line) = self.resolve(line) else {
            return;
        };

        let mut state = self.lock();
        let desc = &mut state.descs[line];
        match desc.depth {
            0 => {
                drop(state);
                warn!(
                    "[IRQ]: unbalanced enable of line {:#x} from {}",
                    line, caller
                );
            }
            1 => {
                desc.status |= IrqStatus::ENABLED;
                desc.chip.enable(line);
                desc.depth = 0;
            }
            _ => desc.depth -= 1,
        }
    }

    /// Waits until no handler of a line is running.
    pub fn synchronize(&self, line: IrqNum) {
        if let Some(line) = self.resolve(line) {
            self.wait_quiescent(line);
        }
    }

    /// Returns how many dynamically allocated handler records have been
    /// freed since the table was built.
    pub fn nr_freed_handlers(&self) -> usize {
        self.lock().actions.nr_released()
    }
}
