// SPDX-License-Identifier: MPL-2.0

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::platform::Platform;

/// A spin lock that is always held with local IRQs disabled.
///
/// The lock may be taken both from task context and from interrupt
/// context, so an IRQ arriving on the CPU that holds it must not be
/// able to spin on it.
pub(crate) struct IrqSafeLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSafeLock<T> {
    pub(crate) const fn new(val: T) -> Self {
        Self {
            inner: Mutex::new(val),
        }
    }

    /// Acquires the lock after disabling local IRQs through `platform`.
    ///
    /// This method runs in a busy loop until the lock can be acquired.
    pub(crate) fn lock<'a, P: Platform>(&'a self, platform: &'a P) -> IrqSafeGuard<'a, T, P> {
        let irq_guard = DisabledLocalIrqGuard::new(platform);
        IrqSafeGuard {
            guard: self.inner.lock(),
            _irq_guard: irq_guard,
        }
    }
}

/// The guard of an [`IrqSafeLock`].
///
/// The lock is released before local IRQs are restored,
/// following the declaration order of the fields.
#[clippy::has_significant_drop]
#[must_use]
pub(crate) struct IrqSafeGuard<'a, T, P: Platform> {
    guard: MutexGuard<'a, T>,
    _irq_guard: DisabledLocalIrqGuard<'a, P>,
}

impl<T, P: Platform> Deref for IrqSafeGuard<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, P: Platform> DerefMut for IrqSafeGuard<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// A guard for disabled local IRQs.
///
/// Local IRQs are re-enabled on drop only if they were enabled
/// when the guard was created, so guards nest correctly.
#[clippy::has_significant_drop]
#[must_use]
pub(crate) struct DisabledLocalIrqGuard<'a, P: Platform> {
    platform: &'a P,
    was_enabled: bool,
}

impl<'a, P: Platform> DisabledLocalIrqGuard<'a, P> {
    pub(crate) fn new(platform: &'a P) -> Self {
        let was_enabled = platform.is_local_enabled();
        if was_enabled {
            platform.disable_local();
        }
        Self {
            platform,
            was_enabled,
        }
    }
}

impl<P: Platform> Drop for DisabledLocalIrqGuard<'_, P> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.platform.enable_local();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::MockPlatform;

    #[test]
    fn lock_disables_and_restores_local_irqs() {
        let platform = MockPlatform::new();
        let lock = IrqSafeLock::new(0u32);

        platform.enable_local();
        {
            let mut guard = lock.lock(&platform);
            *guard += 1;
            assert!(!platform.is_local_enabled());
        }
        assert!(platform.is_local_enabled());
        assert_eq!(*lock.lock(&platform), 1);
    }

    #[test]
    fn nested_guards_keep_irqs_disabled() {
        let platform = MockPlatform::new();
        platform.enable_local();

        let outer = DisabledLocalIrqGuard::new(&platform);
        {
            let _inner = DisabledLocalIrqGuard::new(&platform);
        }
        assert!(!platform.is_local_enabled());
        drop(outer);
        assert!(platform.is_local_enabled());
    }

    #[test]
    fn guard_leaves_disabled_irqs_disabled() {
        let platform = MockPlatform::new();
        platform.disable_local();
        {
            let _guard = DisabledLocalIrqGuard::new(&platform);
        }
        assert!(!platform.is_local_enabled());
    }
}
