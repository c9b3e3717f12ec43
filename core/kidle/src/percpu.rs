// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Per-core idle bookkeeping.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Scheduled-wake value meaning "nothing scheduled".
pub const FAR_FUTURE: u64 = u64::MAX;

/// State one core publishes about its current idle period.
///
/// Owned by its core; other cores read it while holding the shared lock.
pub struct PerCoreRecord {
    governor_depth: AtomicUsize,
    scheduled_wake: AtomicU64,
    core_restore_owed: AtomicBool,
    aux_restore_owed: AtomicBool,
    /// Register file stored for this idle period.
    context_saved: AtomicBool,
    /// Shared-transition epoch seen when this core went idle.
    entry_epoch: AtomicU64,
}

impl PerCoreRecord {
    pub const fn new() -> Self {
        Self {
            governor_depth: AtomicUsize::new(0),
            scheduled_wake: AtomicU64::new(FAR_FUTURE),
            core_restore_owed: AtomicBool::new(false),
            aux_restore_owed: AtomicBool::new(false),
            context_saved: AtomicBool::new(false),
            entry_epoch: AtomicU64::new(0),
        }
    }

    /// Publishes the governor's depth (clamped to `deepest_allowed`) and
    /// the absolute wake instant for this idle period.
    pub fn prepare(&self, now_us: u64, sleep_length_us: Option<u64>, depth: usize, deepest_allowed: usize) {
        let wake = sleep_length_us.map_or(FAR_FUTURE, |len| now_us.saturating_add(len));
        self.governor_depth
            .store(depth.min(deepest_allowed), Ordering::Relaxed);
        self.scheduled_wake.store(wake, Ordering::Release);
    }

    /// Clears the scheduled wake and drops any unused saved context after
    /// the core is running again.
    pub fn reset(&self) {
        self.scheduled_wake.store(FAR_FUTURE, Ordering::Release);
        self.context_saved.store(false, Ordering::Release);
    }

    #[inline]
    pub fn governor_depth(&self) -> usize {
        self.governor_depth.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn scheduled_wake(&self) -> u64 {
        self.scheduled_wake.load(Ordering::Acquire)
    }

    pub fn mark_core_restore(&self) {
        self.core_restore_owed.store(true, Ordering::Release);
    }

    /// Clears the core-domain restore flag, returning whether it was set.
    pub fn take_core_restore(&self) -> bool {
        self.core_restore_owed.swap(false, Ordering::AcqRel)
    }

    pub fn mark_context_saved(&self) {
        self.context_saved.store(true, Ordering::Release);
    }

    /// Whether this core's register file is saved and may be lost.
    #[inline]
    pub fn context_saved(&self) -> bool {
        self.context_saved.load(Ordering::Acquire)
    }

    pub fn mark_aux_restore(&self) {
        self.aux_restore_owed.store(true, Ordering::Release);
    }

    pub fn take_aux_restore(&self) -> bool {
        self.aux_restore_owed.swap(false, Ordering::AcqRel)
    }

    pub fn restore_owed(&self) -> bool {
        self.core_restore_owed.load(Ordering::Acquire) || self.aux_restore_owed.load(Ordering::Acquire)
    }

    pub(crate) fn set_entry_epoch(&self, epoch: u64) {
        self.entry_epoch.store(epoch, Ordering::Relaxed);
    }

    pub(crate) fn entry_epoch(&self) -> u64 {
        self.entry_epoch.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_clamps_depth() {
        let rec = PerCoreRecord::new();
        rec.prepare(1_000, Some(500), 9, 3);
        assert_eq!(rec.governor_depth(), 3);
        assert_eq!(rec.scheduled_wake(), 1_500);

        rec.prepare(1_000, Some(500), 2, 5);
        assert_eq!(rec.governor_depth(), 2);
    }

    #[test]
    fn test_unknown_sleep_length_is_far_future() {
        let rec = PerCoreRecord::new();
        rec.prepare(10, None, 1, 5);
        assert_eq!(rec.scheduled_wake(), FAR_FUTURE);
        rec.prepare(10, Some(u64::MAX), 1, 5);
        assert_eq!(rec.scheduled_wake(), FAR_FUTURE);
    }

    #[test]
    fn test_reset_after_exit() {
        let rec = PerCoreRecord::new();
        rec.prepare(0, Some(40), 1, 5);
        rec.reset();
        assert_eq!(rec.scheduled_wake(), FAR_FUTURE);
    }

    #[test]
    fn test_saved_context_dropped_on_reset() {
        let rec = PerCoreRecord::new();
        rec.mark_context_saved();
        assert!(rec.context_saved());
        assert!(!rec.restore_owed());
        rec.reset();
        assert!(!rec.context_saved());
    }

    #[test]
    fn test_restore_flags_taken_once() {
        let rec = PerCoreRecord::new();
        rec.mark_core_restore();
        rec.mark_aux_restore();
        assert!(rec.restore_owed());
        assert!(rec.take_core_restore());
        assert!(!rec.take_core_restore());
        assert!(rec.take_aux_restore());
        assert!(!rec.restore_owed());
    }
}
