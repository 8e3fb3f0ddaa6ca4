// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Alignment helpers shared by the ring, the emulation layer and the framer.

use std::fmt;

/// Granularity every ring index and frame length is a multiple of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
pub enum AlignUnit {
    /// 4-byte units (client library, socket simulator, hardware queues).
    Four,
    /// 8-byte units (packet framing).
    Eight,
}

impl AlignUnit {
    /// Unit size in bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Build from a byte count, `None` for anything but 4 or 8.
    #[must_use]
    pub const fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            4 => Some(Self::Four),
            8 => Some(Self::Eight),
            _ => None,
        }
    }
}

impl fmt::Display for AlignUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.bytes())
    }
}

/// Round `x` up to the next multiple of `unit`.
#[inline]
#[must_use]
pub const fn align_up(x: usize, unit: usize) -> usize {
    x.div_ceil(unit) * unit
}

/// Round `x` down to the previous multiple of `unit`.
#[inline]
#[must_use]
pub const fn align_down(x: usize, unit: usize) -> usize {
    x - x % unit
}

/// True when `x` is a multiple of `unit`.
#[inline]
#[must_use]
pub const fn is_aligned(x: usize, unit: usize) -> bool {
    x % unit == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_idempotent() {
        for unit in [4usize, 8] {
            for x in 0..200 {
                let once = align_up(x, unit);
                assert_eq!(align_up(once, unit), once);
                assert!(is_aligned(once, unit));
            }
        }
    }

    #[test]
    fn test_align_bounds() {
        for unit in [4usize, 8] {
            for x in 0..200 {
                let lo = align_down(x, unit);
                let hi = align_up(x, unit);
                assert!(lo <= x && x <= hi);
                assert!(hi < lo + 2 * unit);
            }
        }
    }

    #[test]
    fn test_unit_from_bytes() {
        assert_eq!(AlignUnit::from_bytes(4), Some(AlignUnit::Four));
        assert_eq!(AlignUnit::from_bytes(8), Some(AlignUnit::Eight));
        assert_eq!(AlignUnit::from_bytes(2), None);
    }
}
