// SPDX-License-Identifier: MPL-2.0

use core::fmt;

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The line number is out of range, or no handler was supplied.
    InvalidArgs,
    /// The line is taken by a handler that refuses to share it.
    Busy,
    /// No memory is left for a new handler record.
    NoMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidArgs => "invalid arguments",
            Error::Busy => "IRQ line busy",
            Error::NoMemory => "out of memory",
        };
        f.write_str(msg)
    }
}
