// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Process-wide coordination state shared by every core.
//!
//! The idle counter and the election counter are lock-free; everything
//! that must be observed together with a saved shared context lives behind
//! one spin lock.

use core::sync::atomic::{AtomicUsize, Ordering, fence};

use spin::{Mutex, MutexGuard};

use crate::percpu::FAR_FUTURE;

const NO_MASTER: usize = usize::MAX;

/// Fields read and written only under the shared lock.
#[derive(Debug)]
pub struct SharedInner {
    shared_domain_restore_owed: bool,
    core_domain_restore_owed: bool,
    shared_domain_off: bool,
    distributor_decoupled: bool,
    next_shared_wake: u64,
    /// Bumped every time a shared-domain-off request is accepted.
    epoch: u64,
    /// State index of the most recent accepted shared transition.
    epoch_state: usize,
}

impl SharedInner {
    const fn new() -> Self {
        Self {
            shared_domain_restore_owed: false,
            core_domain_restore_owed: false,
            shared_domain_off: false,
            distributor_decoupled: false,
            next_shared_wake: FAR_FUTURE,
            epoch: 0,
            epoch_state: 0,
        }
    }

    /// Records an accepted shared-domain-off request.
    pub fn mark_shared_off(&mut self, state: usize, next_wake: u64, core_off: bool) {
        fence(Ordering::Release);
        self.shared_domain_off = true;
        self.shared_domain_restore_owed = true;
        self.core_domain_restore_owed |= core_off;
        self.next_shared_wake = next_wake;
        self.epoch += 1;
        self.epoch_state = state;
        fence(Ordering::SeqCst);
    }

    /// Clears the shared-domain restore flag, returning whether this core
    /// must perform the restore.
    pub fn take_shared_restore(&mut self) -> bool {
        fence(Ordering::Acquire);
        if !self.shared_domain_restore_owed {
            return false;
        }
        assert!(
            self.shared_domain_off,
            "shared restore owed while the shared domain is powered"
        );
        self.shared_domain_restore_owed = false;
        self.shared_domain_off = false;
        self.next_shared_wake = FAR_FUTURE;
        fence(Ordering::SeqCst);
        true
    }

    pub fn take_core_domain_restore(&mut self) -> bool {
        fence(Ordering::Acquire);
        let owed = core::mem::replace(&mut self.core_domain_restore_owed, false);
        fence(Ordering::SeqCst);
        owed
    }

    pub fn set_decoupled(&mut self, decoupled: bool) {
        self.distributor_decoupled = decoupled;
    }

    /// Clears the decoupled flag, returning whether it was set.
    pub fn take_decoupled(&mut self) -> bool {
        core::mem::replace(&mut self.distributor_decoupled, false)
    }

    #[inline]
    pub fn shared_restore_owed(&self) -> bool {
        self.shared_domain_restore_owed
    }

    #[inline]
    pub fn core_domain_restore_owed(&self) -> bool {
        self.core_domain_restore_owed
    }

    #[inline]
    pub fn shared_domain_off(&self) -> bool {
        self.shared_domain_off
    }

    #[inline]
    pub fn distributor_decoupled(&self) -> bool {
        self.distributor_decoupled
    }

    #[inline]
    pub fn next_shared_wake(&self) -> u64 {
        self.next_shared_wake
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn epoch_state(&self) -> usize {
        self.epoch_state
    }
}

pub struct SharedCoordinationState {
    idle_count: AtomicUsize,
    election: AtomicUsize,
    master: AtomicUsize,
    /// Bit per core currently polling as "last idle core".
    pollers: AtomicUsize,
    inner: Mutex<SharedInner>,
}

impl SharedCoordinationState {
    pub const fn new() -> Self {
        Self {
            idle_count: AtomicUsize::new(0),
            election: AtomicUsize::new(0),
            master: AtomicUsize::new(NO_MASTER),
            pollers: AtomicUsize::new(0),
            inner: Mutex::new(SharedInner::new()),
        }
    }

    /// Counts the calling core as idle and returns the new idle count.
    pub fn idle_enter(&self) -> usize {
        self.idle_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn idle_exit(&self) {
        let prev = self.idle_count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "idle core count underflow");
    }

    #[inline]
    pub fn idle_count(&self) -> usize {
        self.idle_count.load(Ordering::SeqCst)
    }

    /// Attempts the 0 -> 1 election increment. Exactly one caller wins
    /// until the winner calls [`Self::release`].
    pub fn try_elect(&self, cpu: usize) -> bool {
        fence(Ordering::SeqCst);
        if self
            .election
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.master.store(cpu, Ordering::Release);
        fence(Ordering::SeqCst);
        true
    }

    pub fn release(&self, cpu: usize) {
        fence(Ordering::SeqCst);
        let owner = self.master.swap(NO_MASTER, Ordering::AcqRel);
        assert_eq!(owner, cpu, "election released by a core that does not hold it");
        self.election.store(0, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn election(&self) -> usize {
        self.election.load(Ordering::Acquire)
    }

    pub fn master(&self) -> Option<usize> {
        match self.master.load(Ordering::Acquire) {
            NO_MASTER => None,
            cpu => Some(cpu),
        }
    }

    /// Registers `cpu` as polling for the other cores' wait point.
    pub(crate) fn begin_poll(&self, cpu: usize) {
        self.pollers.fetch_or(1 << cpu, Ordering::SeqCst);
    }

    pub(crate) fn end_poll(&self, cpu: usize) {
        self.pollers.fetch_and(!(1 << cpu), Ordering::SeqCst);
    }

    /// Whether a lower-numbered core is also polling; the lowest keeps going.
    pub(crate) fn lower_poller(&self, cpu: usize) -> bool {
        self.pollers.load(Ordering::SeqCst) & ((1 << cpu) - 1) != 0
    }

    /// Takes the shared lock.
    pub fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock()
    }
}
