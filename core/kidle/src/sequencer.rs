// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! One core's idle transition, from interrupt masking to the matching
//! wake-side restore.
//!
//! ```text
//!  Start ──► Electing ──► Preparing ──► Waiting ──► Restoring ──► Done
//!    │                        │            │
//!    └────────► Aborted ◄─────┴────────────┘
//! ```
//!
//! Every exit path, aborted or not, releases the election, drops the idle
//! count and unmasks local interrupts before returning.

use strum::{Display, IntoStaticStr};

use crate::{
    coordinator::IdleCoordinator,
    cstate::{CoreLevel, SwitchLevel, WFI},
    hw::HardwareGateway,
    percpu::PerCoreRecord,
    select::Selection,
    telemetry::{AbortReason, LatencySample},
};

/// What the OS idle loop knows when a core runs out of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleRequest {
    /// Depth suggested by the OS idle governor.
    pub governor_depth: usize,
    /// Time until the next scheduled timer event, if any.
    pub sleep_length_us: Option<u64>,
}

impl IdleRequest {
    pub const fn new(governor_depth: usize, sleep_length_us: Option<u64>) -> Self {
        Self {
            governor_depth,
            sleep_length_us,
        }
    }
}

/// Result handed back to the idle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleOutcome {
    /// Best-effort depth reached.
    pub state: usize,
    pub elapsed_us: u64,
    /// This core drove the shared-domain transition.
    pub master: bool,
    pub aborted: Option<AbortReason>,
    /// The power controller refused the shared request.
    pub vetoed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
enum Phase {
    Start,
    Electing,
    Preparing,
    Waiting,
    Restoring,
    Aborted(AbortReason),
    Done,
}

/// Book-keeping for one pass through [`IdleEntrySequencer::enter`].
struct Transition {
    entry_us: u64,
    scheduled_wake: u64,
    target: usize,
    reached: usize,
    wait_level: CoreLevel,
    master: bool,
    vetoed: bool,
    aborted: Option<AbortReason>,
    next_shared_wake: u64,
    wait_us: u64,
    woke_us: u64,
}

pub struct IdleEntrySequencer<'a, H: HardwareGateway> {
    coord: &'a IdleCoordinator<H>,
    cpu: usize,
}

impl<'a, H: HardwareGateway> IdleEntrySequencer<'a, H> {
    pub(crate) fn new(coord: &'a IdleCoordinator<H>, cpu: usize) -> Self {
        Self { coord, cpu }
    }

    #[inline]
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Idles this core and returns once it is running again.
    pub fn enter(&self, request: IdleRequest) -> IdleOutcome {
        let c = self.coord;
        let rec = self.record();

        let flags = c.hw.save_disable(self.cpu);
        let entry_us = c.hw.now_us();
        rec.prepare(
            entry_us,
            request.sleep_length_us,
            request.governor_depth,
            c.admin.deepest_allowed(),
        );
        rec.set_entry_epoch(c.shared.lock().epoch());
        c.shared.idle_enter();

        let mut t = Transition {
            entry_us,
            scheduled_wake: rec.scheduled_wake(),
            target: WFI,
            reached: WFI,
            wait_level: CoreLevel::On,
            master: false,
            vetoed: false,
            aborted: None,
            next_shared_wake: 0,
            wait_us: entry_us,
            woke_us: entry_us,
        };

        let mut phase = Phase::Start;
        loop {
            trace!("cpu{}: cpuidle {}", self.cpu, phase);
            phase = match phase {
                Phase::Start => self.start(&mut t),
                Phase::Electing => self.elect(&mut t),
                Phase::Preparing => self.prepare(&mut t),
                Phase::Waiting => self.wait(&mut t),
                Phase::Restoring => self.restore(&mut t),
                Phase::Aborted(reason) => {
                    self.abort(&mut t, reason);
                    break;
                }
                Phase::Done => break,
            };
        }
        self.finish(t, flags)
    }

    fn record(&self) -> &PerCoreRecord {
        &self.coord.cores[self.cpu]
    }

    fn start(&self, t: &mut Transition) -> Phase {
        match self.coord.selector().select(self.cpu) {
            Selection::Enter(index) => t.target = index,
            Selection::Abort(reason) => return Phase::Aborted(reason),
            Selection::TimedOut => t.target = WFI,
        }
        if self.coord.table.state(t.target).powers_down_shared() {
            Phase::Electing
        } else {
            Phase::Preparing
        }
    }

    fn elect(&self, t: &mut Transition) -> Phase {
        t.master = self.coord.shared.try_elect(self.cpu);
        if t.master {
            debug!("cpu{}: elected for {}", self.cpu, self.coord.table.state(t.target).name);
        }
        Phase::Preparing
    }

    fn prepare(&self, t: &mut Transition) -> Phase {
        if t.master {
            if let Err(reason) = self.freeze_and_revalidate(t) {
                return Phase::Aborted(reason);
            }
            if let Err(reason) = self.arm_shared_wake(t) {
                self.unfreeze();
                return Phase::Aborted(reason);
            }
        }
        self.save_core(t);
        Phase::Waiting
    }

    /// Freezes the interrupt distributor, then checks nothing moved while
    /// it was being frozen.
    fn freeze_and_revalidate(&self, t: &Transition) -> Result<(), AbortReason> {
        let c = self.coord;
        c.hw.decouple_distributor();
        c.hw.mirror_routing_to_shared_controller();
        c.shared.lock().set_decoupled(true);

        let verdict = match c.selector().revalidate(self.cpu) {
            Selection::Enter(index) if index == t.target => Ok(()),
            Selection::Enter(_) | Selection::TimedOut => Err(AbortReason::TargetChanged),
            Selection::Abort(reason) => Err(reason),
        }
        .and_then(|()| {
            if c.hw.is_local_irq_pending(self.cpu) {
                Err(AbortReason::LocalIrq)
            } else if c.hw.is_shared_irq_pending(self.cpu) {
                Err(AbortReason::SharedIrq)
            } else {
                Ok(())
            }
        });
        if verdict.is_err() {
            self.unfreeze();
        }
        verdict
    }

    /// Programs the shared wake timer and saves the shared context.
    fn arm_shared_wake(&self, t: &mut Transition) -> Result<(), AbortReason> {
        let c = self.coord;
        let selector = c.selector();
        let now = c.hw.now_us();
        let quiet = selector.quiet_time_us(now).ok_or(AbortReason::NoQuietTime)?;

        let levels = c.table.state(t.target).levels;
        let mut budget = quiet;
        if levels.aux_pll == SwitchLevel::Off {
            budget = budget.saturating_sub(c.config.pll_restart_latency_us);
        }
        budget = budget.saturating_sub(c.config.min_wake_latency_us);
        if budget == 0 {
            return Err(AbortReason::NoQuietTime);
        }

        c.hw.arm_wake_timer(budget);
        c.hw.route_wake_irq_to(selector.earliest_waker());
        c.hw.save_shared_context();
        if levels.core == CoreLevel::Off {
            c.hw.save_cluster_context();
        }
        t.next_shared_wake = now.saturating_add(budget);
        Ok(())
    }

    fn save_core(&self, t: &mut Transition) {
        let c = self.coord;
        let rec = self.record();
        t.wait_level = c.table.state(t.target).levels.core;
        if t.wait_level != CoreLevel::Off && self.may_lose_core() {
            t.wait_level = CoreLevel::Off;
        }
        match t.wait_level {
            CoreLevel::On => {}
            CoreLevel::Retained => {
                c.hw.save_irq_routing(self.cpu);
                rec.mark_aux_restore();
            }
            CoreLevel::Off => {
                let inner = c.shared.lock();
                c.hw.save_core_context(self.cpu);
                rec.mark_context_saved();
                // Core domain already requested off: this wait loses it too.
                if inner.core_domain_restore_owed() {
                    rec.mark_core_restore();
                }
            }
        }
    }

    /// Whether another core could take the core domain down while this one
    /// waits.
    fn may_lose_core(&self) -> bool {
        let c = self.coord;
        c.selector().online() > 1 && c.table.state(c.table.deepest()).levels.core == CoreLevel::Off
    }

    /// Last check before the shared request: every sibling must still be
    /// idle and parked, with its context saved if the core domain goes off.
    fn confirm_quiescent(&self, core_off: bool) -> Result<(), AbortReason> {
        let c = self.coord;
        let online = c.selector().online();
        let parked = (0..online)
            .filter(|&other| other != self.cpu)
            .all(|other| c.hw.cpu_in_wfi(other) && (!core_off || c.cores[other].context_saved()));
        if c.shared.idle_count() != online || !parked {
            Err(AbortReason::CoreWoke)
        } else if c.hw.is_local_irq_pending(self.cpu) {
            Err(AbortReason::LocalIrq)
        } else if c.hw.is_shared_irq_pending(self.cpu) {
            Err(AbortReason::SharedIrq)
        } else {
            Ok(())
        }
    }

    /// Backs out of a prepared shared transition that was never accepted.
    fn cancel_shared(&self) {
        let c = self.coord;
        c.hw.disarm_wake_timer();
        self.unfreeze();
        let rec = self.record();
        rec.take_core_restore();
        rec.take_aux_restore();
    }

    fn wait(&self, t: &mut Transition) -> Phase {
        let c = self.coord;
        t.reached = t.target;
        if t.master {
            let levels = c.table.state(t.target).levels;
            let core_off = levels.core == CoreLevel::Off;
            let mut inner = c.shared.lock();
            if let Err(reason) = self.confirm_quiescent(core_off) {
                drop(inner);
                self.cancel_shared();
                return Phase::Aborted(reason);
            }
            match c.hw.request_state(self.cpu, &levels) {
                Ok(()) => {
                    inner.mark_shared_off(t.target, t.next_shared_wake, core_off);
                    if core_off {
                        c.cores[..c.selector().online()]
                            .iter()
                            .filter(|rec| rec.context_saved())
                            .for_each(PerCoreRecord::mark_core_restore);
                    }
                }
                Err(veto) => {
                    drop(inner);
                    warn!(
                        "cpu{}: controller refused {} (status {:#x})",
                        self.cpu,
                        c.table.state(t.target).name,
                        veto.status
                    );
                    c.telemetry.on_vetoed(self.cpu, t.target, veto.status);
                    // Nothing was powered down.
                    self.cancel_shared();
                    t.vetoed = true;
                    t.reached = WFI;
                    t.wait_level = CoreLevel::On;
                }
            }
        }

        t.wait_us = c.hw.now_us();
        c.telemetry.on_state_entered(self.cpu, t.reached, t.wait_us);
        c.hw.wait_for_interrupt(self.cpu, t.wait_level);
        t.woke_us = c.hw.now_us();
        Phase::Restoring
    }

    fn restore(&self, t: &mut Transition) -> Phase {
        let c = self.coord;
        let rec = self.record();
        let mut inner = c.shared.lock();

        if rec.take_core_restore() {
            assert!(rec.context_saved(), "cpu{} core restore owed without a saved context", self.cpu);
            c.hw.restore_core_context(self.cpu);
        }
        if inner.take_core_domain_restore() {
            c.hw.restore_cluster_context();
        }
        if rec.take_aux_restore() {
            c.hw.restore_irq_routing(self.cpu);
        }
        if inner.take_shared_restore() {
            c.hw.restore_shared_context();
            c.hw.force_io_signals();
            c.hw.disarm_wake_timer();
            if inner.take_decoupled() {
                c.hw.recouple_distributor();
            }
            debug!("cpu{}: restored shared domain", self.cpu);
        }

        if inner.epoch() != rec.entry_epoch() {
            t.reached = t.reached.max(inner.epoch_state());
        }
        Phase::Done
    }

    fn abort(&self, t: &mut Transition, reason: AbortReason) {
        debug!("cpu{}: idle entry aborted: {}", self.cpu, reason);
        self.coord.telemetry.on_aborted(self.cpu, reason);
        t.aborted = Some(reason);
        t.reached = WFI;
    }

    /// Re-couples the distributor if this transition decoupled it.
    fn unfreeze(&self) {
        let c = self.coord;
        if c.shared.lock().take_decoupled() {
            c.hw.recouple_distributor();
        }
    }

    fn finish(&self, t: Transition, flags: usize) -> IdleOutcome {
        let c = self.coord;
        let rec = self.record();

        if t.master {
            c.shared.release(self.cpu);
        }
        c.shared.idle_exit();
        rec.reset();
        assert!(!rec.restore_owed(), "cpu{} left idle with a restore owed", self.cpu);

        let exit_us = c.hw.now_us();
        if t.aborted.is_none() {
            c.telemetry.on_state_exited(self.cpu, t.reached, exit_us, t.woke_us);
            if c.admin.latency_measurement() {
                c.telemetry.on_latency(self.cpu, t.reached, LatencySample {
                    enter_us: t.wait_us.saturating_sub(t.entry_us),
                    exit_us: exit_us.saturating_sub(t.woke_us),
                    wake_us: t.woke_us.saturating_sub(t.scheduled_wake),
                });
            }
        }
        c.hw.restore(self.cpu, flags);

        IdleOutcome {
            state: t.reached,
            elapsed_us: exit_us.saturating_sub(t.entry_us),
            master: t.master,
            aborted: t.aborted,
            vetoed: t.vetoed,
        }
    }
}
