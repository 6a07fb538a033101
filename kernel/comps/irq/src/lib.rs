// SPDX-License-Identifier: MPL-2.0

//! Management of IRQ descriptors and their handler chains.
//!
//! # Overview
//!
//! Every IRQ line owns a descriptor in a fixed-size [`IrqTable`].
//! A descriptor records the status of the line, a nesting depth for
//! disabling and enabling it, the chain of handlers registered on it,
//! and the controller ([`IrqChip`]) that drives the line on hardware.
//!
//! Drivers register handlers with [`IrqTable::register`].
//! Several handlers may share one line if all of them agree to share it.
//! When the trap entry code receives an interrupt,
//! it calls [`IrqTable::dispatch`], which lets the controller acknowledge
//! the interrupt and then walks the handler chain of the line.
//!
//! Legacy drivers that do not know their line can discover it with the
//! two-phase autodetection protocol, [`IrqTable::probe_on`] and
//! [`IrqTable::probe_off`].
//!
//! # Locking
//!
//! All structural changes to descriptors (chains, depth and status bits)
//! are serialized by one table-wide lock, taken with local IRQs disabled.
//! Handlers are never invoked with the lock held.
//! Whether a chain walk is in progress is tracked outside the lock,
//! so that removing a handler or disabling a line can spin until the line
//! becomes quiescent.
//!
//! # Platform
//!
//! The crate does not touch hardware. Everything architecture-specific,
//! from masking local IRQs to reading the clock, is reached through the
//! [`Platform`] trait.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod action;
mod chip;
mod dispatch;
mod error;
mod flags;
mod layout;
mod legacy;
mod manage;
mod platform;
pub mod prelude;
mod probe;
mod stats;
mod sync;
mod table;

#[cfg(test)]
mod test_util;

pub use self::{
    action::{IrqContext, IrqHandler, IrqRequest},
    chip::{ChainWalk, InternalIrqChip, IrqChip, NoIrqChip},
    dispatch::DispatchResult,
    error::Error,
    flags::{IrqFlags, IrqStatus},
    layout::{IrqLayout, IrqNum},
    legacy::LegacyMap,
    platform::Platform,
    prelude::Result,
    probe::{ProbeResult, ProbeToken},
    stats::{InterruptsReport, IrqStats},
    table::{IrqDescInfo, IrqTable},
};
