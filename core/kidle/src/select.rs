// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Deepest-permissible-state selection.

use crate::{
    admin::AdminControls,
    blocker::{BlockReason, Blockers, Ceiling},
    cstate::{CstateTable, WFI},
    hw::HardwareGateway,
    percpu::{FAR_FUTURE, PerCoreRecord},
    shared::SharedCoordinationState,
    telemetry::{AbortReason, TelemetryHooks},
};

/// Result of one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Enter the state at this index (never below [`WFI`]).
    Enter(usize),
    /// Interrupts showed up while polling; the whole transition is off.
    Abort(AbortReason),
    /// The sibling poll hit its ceiling. Callers fall back to [`WFI`].
    TimedOut,
}

/// Walks from `start` down to [`WFI`] and returns the first state whose
/// residency fits into `quiet_us` and that no blocker rules out.
pub fn walk_depth(
    table: &CstateTable,
    start: usize,
    quiet_us: u64,
    no_shared_off: bool,
    disabled: impl Fn(usize) -> bool,
) -> usize {
    let start = start.min(table.deepest());
    (WFI..=start)
        .rev()
        .find(|&index| {
            let state = table.state(index);
            !disabled(index)
                && u64::from(state.residency_threshold_us) <= quiet_us
                && !(no_shared_off && state.powers_down_shared())
        })
        .unwrap_or(WFI)
}

pub struct SleepStateSelector<'a, H: HardwareGateway> {
    pub(crate) hw: &'a H,
    pub(crate) table: &'a CstateTable,
    pub(crate) cores: &'a [PerCoreRecord],
    pub(crate) shared: &'a SharedCoordinationState,
    pub(crate) blockers: &'a Blockers,
    pub(crate) admin: &'a AdminControls,
    pub(crate) telemetry: &'a dyn TelemetryHooks,
    pub(crate) poll_timeout_us: u64,
}

impl<H: HardwareGateway> SleepStateSelector<'_, H> {
    /// Picks the deepest state `cpu` may enter right now.
    pub fn select(&self, cpu: usize) -> Selection {
        self.pick(cpu, true)
    }

    /// Repeats the selection after the master froze the distributor.
    /// Blockers were already reported by the first pass.
    pub(crate) fn revalidate(&self, cpu: usize) -> Selection {
        self.pick(cpu, false)
    }

    fn pick(&self, cpu: usize, report_blocked: bool) -> Selection {
        let online = self.online();
        if self.shared.idle_count() != online {
            return Selection::Enter(WFI);
        }
        if let Err(selection) = self.wait_for_siblings(cpu, online) {
            return selection;
        }

        let Some(quiet_us) = self.quiet_time_us(self.hw.now_us()) else {
            return Selection::Enter(WFI);
        };

        let mut blocked = self.blockers.active();
        if self.telemetry.deep_sleep_vetoed() {
            blocked |= BlockReason::DEBUG_CONSOLE;
        }
        if report_blocked && !blocked.is_empty() {
            self.telemetry.on_blocked(cpu, blocked);
        }
        let ceiling = self.blockers.ceiling_for(blocked);
        if ceiling == Ceiling::WfiOnly {
            return Selection::Enter(WFI);
        }

        let index = walk_depth(
            self.table,
            self.start_depth(online),
            quiet_us,
            ceiling == Ceiling::NoSharedOff,
            |i| self.admin.is_disabled(i),
        );
        Selection::Enter(index.max(WFI))
    }

    /// Minimum time until any online core has work, or `None` if unknown
    /// or already due.
    pub fn quiet_time_us(&self, now_us: u64) -> Option<u64> {
        let wake = self.online_cores().iter().map(PerCoreRecord::scheduled_wake).min()?;
        if wake == FAR_FUTURE {
            return None;
        }
        match wake.saturating_sub(now_us) {
            0 => None,
            quiet => Some(quiet),
        }
    }

    /// The online core with the earliest scheduled wake.
    pub fn earliest_waker(&self) -> usize {
        self.online_cores()
            .iter()
            .enumerate()
            .min_by_key(|(_, rec)| rec.scheduled_wake())
            .map_or(0, |(cpu, _)| cpu)
    }

    /// Shallowest per-core ceiling across the idle cores.
    fn start_depth(&self, online: usize) -> usize {
        let governor = self.cores[..online]
            .iter()
            .map(PerCoreRecord::governor_depth)
            .min()
            .unwrap_or(WFI);
        governor.min(self.admin.deepest_allowed())
    }

    /// Busy-polls until every other online core sits in its wait
    /// instruction.
    fn wait_for_siblings(&self, cpu: usize, online: usize) -> Result<(), Selection> {
        self.shared.begin_poll(cpu);
        let start = self.hw.now_us();
        let result = loop {
            if self.hw.is_local_irq_pending(cpu) {
                break Err(Selection::Abort(AbortReason::LocalIrq));
            }
            if self.hw.is_shared_irq_pending(cpu) {
                break Err(Selection::Abort(AbortReason::SharedIrq));
            }
            if self.shared.idle_count() != online || self.shared.lower_poller(cpu) {
                break Err(Selection::Enter(WFI));
            }
            if (0..online).filter(|&other| other != cpu).all(|other| self.hw.cpu_in_wfi(other)) {
                break Ok(());
            }
            if self.hw.now_us().saturating_sub(start) >= self.poll_timeout_us {
                error!(
                    "cpu{cpu}: siblings did not reach wfi within {}us",
                    self.poll_timeout_us
                );
                self.telemetry.on_poll_timeout(cpu);
                break Err(Selection::TimedOut);
            }
            core::hint::spin_loop();
        };
        self.shared.end_poll(cpu);
        result
    }

    pub(crate) fn online(&self) -> usize {
        self.hw.online_cpus().min(self.cores.len())
    }

    fn online_cores(&self) -> &[PerCoreRecord] {
        &self.cores[..self.online()]
    }
}
