// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Lifecycle notifications and the statistics collector behind them.
//!
//! The coordinator works identically with [`NoopTelemetry`]; hooks only
//! observe, except for [`TelemetryHooks::deep_sleep_vetoed`].

use alloc::vec::Vec;

use spin::Mutex;
use strum::{Display, IntoStaticStr};

use crate::{blocker::BlockReason, cstate::CstateTable};

/// Why an idle entry fell back without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum AbortReason {
    /// A core-local interrupt is pending.
    LocalIrq,
    /// An interrupt is pending at the shared controller.
    SharedIrq,
    /// A sibling left its wait point before the shared request went out.
    CoreWoke,
    /// The state picked before the distributor freeze no longer holds.
    TargetChanged,
    /// No usable quiet time was left for the shared wake timer.
    NoQuietTime,
}

/// Measured latencies of one idle period, in µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencySample {
    /// From entry to issuing the wait instruction.
    pub enter_us: u64,
    /// From leaving the wait instruction to returning.
    pub exit_us: u64,
    /// How late the core woke relative to its scheduled wake.
    pub wake_us: u64,
}

pub trait TelemetryHooks: Send + Sync {
    fn on_state_entered(&self, _cpu: usize, _state: usize, _enter_us: u64) {}
    fn on_state_exited(&self, _cpu: usize, _state: usize, _exit_us: u64, _woke_us: u64) {}
    fn on_blocked(&self, _cpu: usize, _reasons: BlockReason) {}
    fn on_aborted(&self, _cpu: usize, _reason: AbortReason) {}
    fn on_vetoed(&self, _cpu: usize, _state: usize, _status: u32) {}
    fn on_poll_timeout(&self, _cpu: usize) {}
    fn on_latency(&self, _cpu: usize, _state: usize, _sample: LatencySample) {}

    /// Veto deep sleep, e.g. while the debug console is transmitting.
    fn deep_sleep_vetoed(&self) -> bool {
        false
    }
}

/// Telemetry that records nothing.
pub struct NoopTelemetry;

impl TelemetryHooks for NoopTelemetry {}

/// Counters of one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateStats {
    pub usage: u64,
    /// Residency in µs, only accumulated for time-valid states.
    pub time_us: u64,
    /// Transitions the controller refused.
    pub failed: u64,
    pub enter_latency_total_us: u64,
    pub exit_latency_total_us: u64,
    pub wake_latency_max_us: u64,
    pub latency_samples: u64,
}

/// Collector-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdleCounters {
    pub aborts: u64,
    pub poll_timeouts: u64,
    pub blocked_debug_console: u64,
    pub blocked_radio: u64,
    pub blocked_charger: u64,
}

struct StatsInner {
    states: Vec<StateStats>,
    /// Entry timestamp of the state each cpu is in.
    entered: Vec<Option<(usize, u64)>>,
    counters: IdleCounters,
}

/// Statistics collector for state durations, latencies and blockers.
pub struct IdleStats {
    time_valid: Vec<bool>,
    inner: Mutex<StatsInner>,
}

impl IdleStats {
    pub fn new(table: &CstateTable, cpu_count: usize) -> Self {
        Self {
            time_valid: table.iter().map(|s| s.is_time_valid).collect(),
            inner: Mutex::new(StatsInner {
                states: alloc::vec![StateStats::default(); table.len()],
                entered: alloc::vec![None; cpu_count],
                counters: IdleCounters::default(),
            }),
        }
    }

    pub fn state(&self, index: usize) -> Option<StateStats> {
        self.inner.lock().states.get(index).copied()
    }

    pub fn snapshot(&self) -> Vec<StateStats> {
        self.inner.lock().states.clone()
    }

    pub fn counters(&self) -> IdleCounters {
        self.inner.lock().counters
    }
}

impl TelemetryHooks for IdleStats {
    fn on_state_entered(&self, cpu: usize, state: usize, enter_us: u64) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.entered.get_mut(cpu) {
            *slot = Some((state, enter_us));
        }
        if let Some(stats) = inner.states.get_mut(state) {
            stats.usage += 1;
        }
    }

    fn on_state_exited(&self, cpu: usize, state: usize, _exit_us: u64, woke_us: u64) {
        let mut inner = self.inner.lock();
        let Some((entered_state, enter_us)) = inner.entered.get_mut(cpu).and_then(Option::take) else {
            return;
        };
        // A participant that slept through a shared transition reports the
        // deeper state it reached.
        debug_assert!(state >= entered_state);
        if !self.time_valid.get(state).copied().unwrap_or(false) {
            return;
        }
        if let Some(stats) = inner.states.get_mut(state) {
            stats.time_us += woke_us.saturating_sub(enter_us);
        }
    }

    fn on_blocked(&self, _cpu: usize, reasons: BlockReason) {
        let mut inner = self.inner.lock();
        if reasons.contains(BlockReason::DEBUG_CONSOLE) {
            inner.counters.blocked_debug_console += 1;
        }
        if reasons.contains(BlockReason::RADIO) {
            inner.counters.blocked_radio += 1;
        }
        if reasons.contains(BlockReason::CHARGER) {
            inner.counters.blocked_charger += 1;
        }
    }

    fn on_aborted(&self, _cpu: usize, _reason: AbortReason) {
        self.inner.lock().counters.aborts += 1;
    }

    fn on_vetoed(&self, _cpu: usize, state: usize, _status: u32) {
        if let Some(stats) = self.inner.lock().states.get_mut(state) {
            stats.failed += 1;
        }
    }

    fn on_poll_timeout(&self, _cpu: usize) {
        self.inner.lock().counters.poll_timeouts += 1;
    }

    fn on_latency(&self, _cpu: usize, state: usize, sample: LatencySample) {
        if let Some(stats) = self.inner.lock().states.get_mut(state) {
            stats.enter_latency_total_us += sample.enter_us;
            stats.exit_latency_total_us += sample.exit_us;
            stats.wake_latency_max_us = stats.wake_latency_max_us.max(sample.wake_us);
            stats.latency_samples += 1;
        }
    }
}
