// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session kinds and the operations each one may perform.

use super::{Result, TransportError};
use std::fmt;

/// How a transport was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Session {
    /// Sole owner of the device: full control, reset on open.
    Exclusive,
    /// Observer attached next to an exclusive owner: no reset on open, no
    /// acknowledge, no configuration changes.
    Debug,
}

/// Operations subject to the session check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Status,
    Reset,
    IoRead,
    IoWrite,
    Wait,
    Read,
    Acknowledge,
    Send,
    EnableReceive,
    EnableErrorPackets,
    EnableOldPackets,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Status => "status",
            Self::Reset => "reset",
            Self::IoRead => "io_read",
            Self::IoWrite => "io_write",
            Self::Wait => "wait_for_data",
            Self::Read => "read",
            Self::Acknowledge => "advance_consumer",
            Self::Send => "send",
            Self::EnableReceive => "enable_receive",
            Self::EnableErrorPackets => "enable_error_packets",
            Self::EnableOldPackets => "enable_old_packets",
        };
        f.write_str(s)
    }
}

impl Session {
    #[must_use]
    pub const fn allows(self, op: Operation) -> bool {
        match self {
            Self::Exclusive => true,
            Self::Debug => matches!(
                op,
                Operation::Status
                    | Operation::Reset
                    | Operation::IoRead
                    | Operation::IoWrite
                    | Operation::Wait
                    | Operation::Read
            ),
        }
    }

    /// # Errors
    ///
    /// [`TransportError::NotPermitted`] when `op` is not allowed.
    pub fn check(self, op: Operation) -> Result<()> {
        if self.allows(op) {
            Ok(())
        } else {
            log::debug!("[dta] {} refused in {:?} session", op, self);
            Err(TransportError::NotPermitted(op))
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_session_permissions() {
        let s = Session::Debug;
        for op in [Operation::Status, Operation::Reset, Operation::Read, Operation::Wait] {
            assert!(s.check(op).is_ok());
        }
        for op in [Operation::Send, Operation::Acknowledge, Operation::EnableReceive] {
            assert!(matches!(s.check(op), Err(TransportError::NotPermitted(o)) if o == op));
        }
        assert!(Session::Exclusive.check(Operation::EnableOldPackets).is_ok());
    }
}
