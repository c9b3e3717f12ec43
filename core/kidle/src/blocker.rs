// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! External conditions that cap how deep the cores may sleep.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Reasons a deep transition is currently blocked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockReason: u32 {
        /// The debug console is transmitting.
        const DEBUG_CONSOLE = 1 << 0;
        /// The radio/modem link is active.
        const RADIO         = 1 << 1;
        /// Charging or voltage protection is in progress.
        const CHARGER       = 1 << 2;
    }
}

/// What an active blocker limits the selector to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    /// Nothing blocked.
    None,
    /// No state that powers a shared domain off.
    NoSharedOff,
    /// Plain wait-for-interrupt only.
    WfiOnly,
}

/// Blocker toggles written by drivers and read on every selection.
pub struct Blockers {
    active: AtomicU32,
    wfi_only: BlockReason,
}

impl Blockers {
    pub const fn new(wfi_only: BlockReason) -> Self {
        Self {
            active: AtomicU32::new(0),
            wfi_only,
        }
    }

    /// Raises or clears `reason`.
    pub fn set(&self, reason: BlockReason, active: bool) {
        if active {
            self.active.fetch_or(reason.bits(), Ordering::AcqRel);
        } else {
            self.active.fetch_and(!reason.bits(), Ordering::AcqRel);
        }
    }

    #[inline]
    pub fn active(&self) -> BlockReason {
        BlockReason::from_bits_truncate(self.active.load(Ordering::Acquire))
    }

    /// Ceiling implied by `active`.
    pub fn ceiling_for(&self, active: BlockReason) -> Ceiling {
        if active.intersects(self.wfi_only) {
            Ceiling::WfiOnly
        } else if !active.is_empty() {
            Ceiling::NoSharedOff
        } else {
            Ceiling::None
        }
    }
}
