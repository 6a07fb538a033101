// SPDX-License-Identifier: MPL-2.0

//! IRQ autodetection.
//!
//! A driver that does not know which line its device is wired to can find
//! out as follows:
//!
//! 1. call [`IrqTable::probe_on`], which arms every free line;
//! 2. make the device raise an interrupt;
//! 3. call [`IrqTable::probe_off`], which disarms the lines and reports
//!    the one that fired.
//!
//! Lines that fire on their own while being armed are filtered out as
//! spurious before `probe_on` returns.

use core::time::Duration;

use crate::{flags::IrqStatus, layout::IrqNum, platform::Platform, prelude::*, table::IrqTable};

/// How long armed lines are given to fire spuriously.
const PROBE_SETTLE: Duration = Duration::from_millis(100);

const PROBE_MAGIC: usize = 0x7072_6f62;

/// The token returned by [`IrqTable::probe_on`].
///
/// It carries no information; [`IrqTable::probe_off`] only checks that it
/// came from `probe_on`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[must_use]
pub struct ProbeToken(usize);

impl ProbeToken {
    /// Creates a token from a raw value.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub const fn as_raw(&self) -> usize {
        self.0
    }
}

/// The outcome of an autodetection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProbeResult {
    /// No armed line fired.
    None,
    /// Exactly one armed line fired.
    Found(IrqNum),
    /// Several armed lines fired; the first of them is given.
    Ambiguous(IrqNum),
}

impl ProbeResult {
    /// Encodes the result as an integer: `0` if no line fired, the line if
    /// exactly one did, and the negated first line if several did.
    pub fn as_raw(&self) -> isize {
        match *self {
            Self::None => 0,
            Self::Found(line) => line as isize,
            Self::Ambiguous(line) => -(line as isize),
        }
    }
}

impl<P: Platform> IrqTable<P> {
    /// Starts an autodetection.
    ///
    /// Every vectored line without handlers is armed and started up. After
    /// a settle period, lines that have already fired are considered
    /// spurious: they are disarmed and shut down again. The remaining lines
    /// stay armed until [`probe_off`].
    ///
    /// The settle period is a busy-wait, so this can be used while the
    /// system is still being brought up.
    ///
    /// [`probe_off`]: Self::probe_off
    pub fn probe_on(&self) -> ProbeToken {
        let mut nr_armed = 0;
        {
            let mut state = self.lock();
            for line in self.probe_lines() {
                let desc = &mut state.descs[line];
                if desc.head.is_some() {
                    continue;
                }
                desc.status |= IrqStatus::AUTODETECT | IrqStatus::WAITING;
                desc.chip.startup(line);
                nr_armed += 1;
            }
        }
        debug!("[IRQ]: probing {} lines", nr_armed);

        let deadline = self.platform.now() + PROBE_SETTLE;
        while self.platform.now() < deadline {
            core::hint::spin_loop();
        }

        let mut state = self.lock();
        for line in self.probe_lines() {
            let desc = &mut state.descs[line];
            if desc.status.contains(IrqStatus::AUTODETECT)
                && !desc.status.contains(IrqStatus::WAITING)
            {
                desc.status -= IrqStatus::AUTODETECT;
                desc.chip.shutdown(line);
                debug!("[IRQ]: line {:#x} fired spuriously while probing", line);
            }
        }

        ProbeToken(PROBE_MAGIC)
    }

    /// Finishes an autodetection started by [`probe_on`].
    ///
    /// All armed lines are disarmed and shut down. The lines that fired
    /// since `probe_on` returned are the candidates.
    ///
    /// [`probe_on`]: Self::probe_on
    pub fn probe_off(&self, token: ProbeToken) -> ProbeResult {
        if token.0 != PROBE_MAGIC {
            warn!("[IRQ]: probe_off called with a bad token {:#x}", token.0);
        }

        let mut nr_fired = 0;
        let mut first = None;
        let mut state = self.lock();
        for line in self.probe_lines() {
            let desc = &mut state.descs[line];
            if !desc.status.contains(IrqStatus::AUTODETECT) {
                continue;
            }
            if !desc.status.contains(IrqStatus::WAITING) {
                first.get_or_insert(line);
                nr_fired += 1;
            }
            desc.status -= IrqStatus::AUTODETECT | IrqStatus::WAITING;
            desc.chip.shutdown(line);
        }
        drop(state);

        match (nr_fired, first) {
            (1, Some(line)) => ProbeResult::Found(line),
            (_, Some(line)) => ProbeResult::Ambiguous(line),
            _ => ProbeResult::None,
        }
    }

    /// Returns the lines autodetection may arm.
    ///
    /// Legacy lines are reached through their vectors, and the spurious
    /// vector never carries a device.
    fn probe_lines(&self) -> impl Iterator<Item = IrqNum> {
        let spurious = self.layout.spurious_vector;
        (self.legacy.first_vectored()..self.layout.nr_irqs).filter(move |&line| line != spurious)
    }
}
