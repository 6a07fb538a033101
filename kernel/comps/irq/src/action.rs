// SPDX-License-Identifier: MPL-2.0

//! Handler records and the arena that stores them.

use core::fmt;

use crate::{flags::IrqFlags, layout::IrqNum, prelude::*};

/// The type of IRQ handler functions.
///
/// A handler receives the line number it was registered with, its context
/// and the trap frame of the interrupted code.
pub type IrqHandler<F> = fn(IrqNum, IrqContext, &F);

/// An opaque value passed unchanged to a handler.
///
/// A context identifies a handler when it is removed. Two contexts are
/// the same if their raw values are, which for contexts made from pointers
/// means pointer identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct IrqContext(usize);

impl IrqContext {
    /// The empty context.
    pub const NONE: Self = Self(0);

    /// Creates a context from a raw value.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Creates a context from the address of `ptr`.
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Returns the raw value.
    pub const fn as_raw(&self) -> usize {
        self.0
    }

    /// Returns whether this is the empty context.
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// A request to register an IRQ handler.
///
/// # Example
///
/// ```
/// use aster_irq::{IrqContext, IrqFlags, IrqRequest};
///
/// fn on_irq(_line: usize, _context: IrqContext, _frame: &()) {}
///
/// let request: IrqRequest<()> = IrqRequest::new(5)
///     .handler(on_irq)
///     .flags(IrqFlags::SHARED)
///     .label("serial")
///     .context(IrqContext::new(0x1000));
/// ```
pub struct IrqRequest<F> {
    pub(crate) line: IrqNum,
    pub(crate) handler: Option<IrqHandler<F>>,
    pub(crate) flags: IrqFlags,
    pub(crate) label: &'static str,
    pub(crate) context: IrqContext,
}

impl<F> IrqRequest<F> {
    /// Creates a request for `line`, which may be a legacy line or a vector.
    pub fn new(line: IrqNum) -> Self {
        Self {
            line,
            handler: None,
            flags: IrqFlags::empty(),
            label: "",
            context: IrqContext::NONE,
        }
    }

    /// Sets the handler function. A request without one is rejected.
    pub fn handler(mut self, handler: IrqHandler<F>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Sets the handler flags.
    pub fn flags(mut self, flags: IrqFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the name shown in diagnostics.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Sets the context passed to the handler.
    pub fn context(mut self, context: IrqContext) -> Self {
        self.context = context;
        self
    }
}

/// A registered handler.
pub(crate) struct IrqAction<F> {
    pub(crate) handler: IrqHandler<F>,
    pub(crate) flags: IrqFlags,
    pub(crate) label: &'static str,
    pub(crate) context: IrqContext,
}

impl<F> Clone for IrqAction<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for IrqAction<F> {}

impl<F> fmt::Debug for IrqAction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqAction")
            .field("flags", &self.flags)
            .field("label", &self.label)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// The index of a slot in an [`ActionArena`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct ActionId(usize);

/// Where the storage of a slot comes from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Storage {
    /// Reserved when the arena is built, before dynamic allocation is
    /// available. Such a slot is vacated but never released.
    Static,
    /// Allocated on demand and released when its handler is removed.
    Dynamic,
}

struct Slot<F> {
    action: Option<IrqAction<F>>,
    next: Option<ActionId>,
    storage: Storage,
}

/// The storage of all handler records, chained per line by index.
pub(crate) struct ActionArena<F> {
    slots: Vec<Slot<F>>,
    free: Vec<ActionId>,
    timer: ActionId,
    #[cfg(feature = "smp")]
    ipi: ActionId,
    nr_released: usize,
    #[cfg(test)]
    alloc_fails: bool,
}

impl<F> ActionArena<F> {
    pub(crate) fn new() -> Self {
        let mut arena = Self {
            slots: Vec::new(),
            free: Vec::new(),
            timer: ActionId(0),
            #[cfg(feature = "smp")]
            ipi: ActionId(0),
            nr_released: 0,
            #[cfg(test)]
            alloc_fails: false,
        };
        arena.timer = arena.push_static();
        #[cfg(feature = "smp")]
        {
            arena.ipi = arena.push_static();
        }
        arena
    }

    fn push_static(&mut self) -> ActionId {
        self.slots.push(Slot {
            action: None,
            next: None,
            storage: Storage::Static,
        });
        ActionId(self.slots.len() - 1)
    }

    /// Returns the preallocated slot of the timer handler.
    pub(crate) fn timer_slot(&self) -> ActionId {
        self.timer
    }

    /// Returns the preallocated slot of the IPI handler.
    #[cfg(feature = "smp")]
    pub(crate) fn ipi_slot(&self) -> ActionId {
        self.ipi
    }

    /// Stores `action` in a static slot if it is vacant.
    pub(crate) fn fill_static(&mut self, id: ActionId, action: IrqAction<F>) -> Option<ActionId> {
        let slot = &mut self.slots[id.0];
        debug_assert_eq!(slot.storage, Storage::Static);
        if slot.action.is_some() {
            return None;
        }
        slot.action = Some(action);
        slot.next = None;
        Some(id)
    }

    /// Allocates a dynamic slot for `action`.
    pub(crate) fn alloc(&mut self, action: IrqAction<F>) -> Result<ActionId> {
        if let Some(id) = self.free.pop() {
            let slot = &mut self.slots[id.0];
            slot.action = Some(action);
            slot.next = None;
            return Ok(id);
        }

        #[cfg(test)]
        if self.alloc_fails {
            return Err(Error::NoMemory);
        }

        // Reserve room on the free list as well,
        // so that releasing the slot later never allocates.
        self.slots.try_reserve(1).map_err(|_| Error::NoMemory)?;
        self.free
            .try_reserve(self.slots.len() + 1 - self.free.len())
            .map_err(|_| Error::NoMemory)?;
        self.slots.push(Slot {
            action: Some(action),
            next: None,
            storage: Storage::Dynamic,
        });
        Ok(ActionId(self.slots.len() - 1))
    }

    /// Gives up the storage of a slot that is no longer chained.
    ///
    /// Static slots are only vacated; dynamic slots return to the free list.
    pub(crate) fn release(&mut self, id: ActionId) {
        let slot = &mut self.slots[id.0];
        slot.action = None;
        slot.next = None;
        if slot.storage == Storage::Dynamic {
            self.free.push(id);
            self.nr_released += 1;
        }
    }

    /// Makes every allocation that needs new memory fail.
    #[cfg(test)]
    pub(crate) fn fail_allocs(&mut self, fail: bool) {
        self.alloc_fails = fail;
    }

    /// Returns how many dynamic slots have been released so far.
    pub(crate) fn nr_released(&self) -> usize {
        self.nr_released
    }

    pub(crate) fn get(&self, id: ActionId) -> &IrqAction<F> {
        self.slots[id.0]
            .action
            .as_ref()
            .expect("chained slot must hold an action")
    }

    pub(crate) fn next(&self, id: ActionId) -> Option<ActionId> {
        self.slots[id.0].next
    }

    pub(crate) fn set_next(&mut self, id: ActionId, next: Option<ActionId>) {
        self.slots[id.0].next = next;
    }

    /// Iterates over a chain starting from `head`, in chain order.
    pub(crate) fn chain(&self, head: Option<ActionId>) -> ChainIter<'_, F> {
        ChainIter {
            arena: self,
            cursor: head,
        }
    }
}

pub(crate) struct ChainIter<'a, F> {
    arena: &'a ActionArena<F>,
    cursor: Option<ActionId>,
}

impl<'a, F> Iterator for ChainIter<'a, F> {
    type Item = (ActionId, &'a IrqAction<F>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.arena.next(id);
        Some((id, self.arena.get(id)))
    }
}
