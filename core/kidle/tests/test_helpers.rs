// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Simulated SoC backing the integration tests.
//!
//! Every core is a host thread. Waiting cores block on a condvar until a
//! wake source applies:
//! - a raised local interrupt
//! - the core's local timer, but only while the shared domain is powered
//! - the shared wake timer, if it is routed to that core

#![allow(unused)]

use std::{
    sync::{
        Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use kidle::{
    CoreLevel, DomainLevels, HardwareGateway, HwVeto, IdleConfig, IdleCoordinator, IdleOutcome,
    IdleRequest,
};

/// Longest a simulated wait may last before the core is kicked awake.
const WAIT_CAP: Duration = Duration::from_secs(2);
/// Offset so the simulated clock never reads zero.
const CLOCK_BASE_US: u64 = 1_000_000;

/// Every gateway call the coordinator made.
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    pub core_saves: usize,
    pub core_restores: usize,
    pub routing_saves: usize,
    pub routing_restores: usize,
    pub cluster_saves: usize,
    pub cluster_restores: usize,
    pub shared_saves: usize,
    pub shared_restores: usize,
    pub io_forces: usize,
    pub decouples: usize,
    pub recouples: usize,
    /// Decouple while the distributor was already decoupled.
    pub double_master: usize,
    pub requests: Vec<(usize, DomainLevels)>,
    pub armed: Vec<u64>,
    pub routed: Vec<usize>,
    /// Waits that only ended through [`WAIT_CAP`].
    pub stalls: usize,
}

struct SocState {
    local_deadline: Vec<Option<u64>>,
    local_raised: Vec<bool>,
    in_wfi: Vec<bool>,
    irq_masked: Vec<bool>,
    shared_off: bool,
    decoupled: bool,
    wake_deadline: Option<u64>,
    wake_target: usize,
    veto_next: Option<u32>,
    kick_on_arm: Option<usize>,
    log: CallLog,
}

pub struct SimSoc {
    start: Instant,
    cpus: usize,
    sticky_local_irq: Vec<AtomicBool>,
    shared_irq_when_decoupled: AtomicBool,
    state: Mutex<SocState>,
    wake: Condvar,
}

impl SimSoc {
    pub fn new(cpus: usize) -> Self {
        Self {
            start: Instant::now(),
            cpus,
            sticky_local_irq: (0..cpus).map(|_| AtomicBool::new(false)).collect(),
            shared_irq_when_decoupled: AtomicBool::new(false),
            state: Mutex::new(SocState {
                local_deadline: vec![None; cpus],
                local_raised: vec![false; cpus],
                in_wfi: vec![false; cpus],
                irq_masked: vec![false; cpus],
                shared_off: false,
                decoupled: false,
                wake_deadline: None,
                wake_target: 0,
                veto_next: None,
                kick_on_arm: None,
                log: CallLog::default(),
            }),
            wake: Condvar::new(),
        }
    }

    /// Programs `cpu`'s local timer to fire `after_us` from now.
    pub fn set_local_timer(&self, cpu: usize, after_us: u64) {
        let deadline = self.now_us() + after_us;
        self.state.lock().unwrap().local_deadline[cpu] = Some(deadline);
    }

    /// One-shot interrupt that wakes `cpu` out of its wait.
    pub fn raise_local_irq(&self, cpu: usize) {
        self.state.lock().unwrap().local_raised[cpu] = true;
        self.wake.notify_all();
    }

    /// Interrupt that stays pending on `cpu` until cleared.
    pub fn set_local_irq_pending(&self, cpu: usize, pending: bool) {
        self.sticky_local_irq[cpu].store(pending, Ordering::SeqCst);
        self.wake.notify_all();
    }

    /// Raises a shared-controller interrupt as soon as the distributor is
    /// decoupled.
    pub fn set_shared_irq_when_decoupled(&self, pending: bool) {
        self.shared_irq_when_decoupled.store(pending, Ordering::SeqCst);
    }

    /// The next shared request is refused with `status`.
    pub fn veto_next(&self, status: u32) {
        self.state.lock().unwrap().veto_next = Some(status);
    }

    /// Wakes `cpu` when the shared wake timer is next armed and returns
    /// from the arm only after `cpu` has left its wait.
    pub fn kick_on_arm(&self, cpu: usize) {
        self.state.lock().unwrap().kick_on_arm = Some(cpu);
    }

    /// Blocks until `cpu` sits in its wait instruction.
    pub fn wait_until_in_wfi(&self, cpu: usize) {
        let mut st = self.state.lock().unwrap();
        while !st.in_wfi[cpu] {
            st = self.wake.wait_timeout(st, Duration::from_millis(1)).unwrap().0;
        }
    }

    pub fn log(&self) -> CallLog {
        self.state.lock().unwrap().log.clone()
    }

    pub fn shared_off(&self) -> bool {
        self.state.lock().unwrap().shared_off
    }

    pub fn decoupled(&self) -> bool {
        self.state.lock().unwrap().decoupled
    }

    pub fn any_irq_masked(&self) -> bool {
        self.state.lock().unwrap().irq_masked.iter().any(|&m| m)
    }

    fn wake_source(&self, st: &mut SocState, cpu: usize, now: u64) -> bool {
        if std::mem::take(&mut st.local_raised[cpu]) {
            return true;
        }
        if self.sticky_local_irq[cpu].load(Ordering::SeqCst) {
            return true;
        }
        if !st.shared_off && st.local_deadline[cpu].is_some_and(|d| now >= d) {
            st.local_deadline[cpu] = None;
            return true;
        }
        if st.wake_target == cpu && st.wake_deadline.is_some_and(|d| now >= d) {
            st.wake_deadline = None;
            return true;
        }
        false
    }

    fn next_deadline(st: &SocState, cpu: usize) -> Option<u64> {
        let local = st.local_deadline[cpu].filter(|_| !st.shared_off);
        let shared = st.wake_deadline.filter(|_| st.wake_target == cpu);
        match (local, shared) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl HardwareGateway for SimSoc {
    fn now_us(&self) -> u64 {
        CLOCK_BASE_US + self.start.elapsed().as_micros() as u64
    }

    fn online_cpus(&self) -> usize {
        self.cpus
    }

    fn save_disable(&self, cpu: usize) -> usize {
        let mut st = self.state.lock().unwrap();
        let was_masked = std::mem::replace(&mut st.irq_masked[cpu], true);
        was_masked as usize
    }

    fn restore(&self, cpu: usize, flags: usize) {
        self.state.lock().unwrap().irq_masked[cpu] = flags != 0;
    }

    fn is_local_irq_pending(&self, cpu: usize) -> bool {
        self.sticky_local_irq[cpu].load(Ordering::SeqCst)
    }

    fn is_shared_irq_pending(&self, _cpu: usize) -> bool {
        self.shared_irq_when_decoupled.load(Ordering::SeqCst) && self.decoupled()
    }

    fn cpu_in_wfi(&self, cpu: usize) -> bool {
        self.state.lock().unwrap().in_wfi[cpu]
    }

    fn decouple_distributor(&self) {
        let mut st = self.state.lock().unwrap();
        if st.decoupled {
            st.log.double_master += 1;
        }
        st.decoupled = true;
        st.log.decouples += 1;
    }

    fn recouple_distributor(&self) {
        let mut st = self.state.lock().unwrap();
        st.decoupled = false;
        st.log.recouples += 1;
    }

    fn mirror_routing_to_shared_controller(&self) {}

    fn request_state(&self, cpu: usize, levels: &DomainLevels) -> Result<(), HwVeto> {
        let mut st = self.state.lock().unwrap();
        if let Some(status) = st.veto_next.take() {
            return Err(HwVeto { status });
        }
        if levels.powers_down_shared() {
            st.shared_off = true;
        }
        st.log.requests.push((cpu, *levels));
        Ok(())
    }

    fn save_core_context(&self, _cpu: usize) {
        self.state.lock().unwrap().log.core_saves += 1;
    }

    fn restore_core_context(&self, _cpu: usize) {
        self.state.lock().unwrap().log.core_restores += 1;
    }

    fn save_irq_routing(&self, _cpu: usize) {
        self.state.lock().unwrap().log.routing_saves += 1;
    }

    fn restore_irq_routing(&self, _cpu: usize) {
        self.state.lock().unwrap().log.routing_restores += 1;
    }

    fn save_cluster_context(&self) {
        self.state.lock().unwrap().log.cluster_saves += 1;
    }

    fn restore_cluster_context(&self) {
        self.state.lock().unwrap().log.cluster_restores += 1;
    }

    fn save_shared_context(&self) {
        self.state.lock().unwrap().log.shared_saves += 1;
    }

    fn restore_shared_context(&self) {
        let mut st = self.state.lock().unwrap();
        st.shared_off = false;
        st.log.shared_restores += 1;
        drop(st);
        self.wake.notify_all();
    }

    fn force_io_signals(&self) {
        self.state.lock().unwrap().log.io_forces += 1;
    }

    fn arm_wake_timer(&self, duration_us: u64) {
        let deadline = self.now_us() + duration_us;
        let mut st = self.state.lock().unwrap();
        st.wake_deadline = Some(deadline);
        st.log.armed.push(duration_us);
        if let Some(victim) = st.kick_on_arm.take() {
            st.local_raised[victim] = true;
            self.wake.notify_all();
            while st.in_wfi[victim] {
                st = self.wake.wait_timeout(st, Duration::from_millis(1)).unwrap().0;
            }
        }
    }

    fn disarm_wake_timer(&self) {
        self.state.lock().unwrap().wake_deadline = None;
    }

    fn route_wake_irq_to(&self, cpu: usize) {
        let mut st = self.state.lock().unwrap();
        st.wake_target = cpu;
        st.log.routed.push(cpu);
    }

    fn wait_for_interrupt(&self, cpu: usize, _level: CoreLevel) {
        let give_up = Instant::now() + WAIT_CAP;
        let mut st = self.state.lock().unwrap();
        st.in_wfi[cpu] = true;
        self.wake.notify_all();
        loop {
            let now = self.now_us();
            if self.wake_source(&mut st, cpu, now) {
                break;
            }
            let left = give_up.saturating_duration_since(Instant::now());
            if left.is_zero() {
                st.log.stalls += 1;
                break;
            }
            let timeout = match Self::next_deadline(&st, cpu) {
                Some(deadline) => Duration::from_micros(deadline.saturating_sub(now)).min(left),
                None => left,
            };
            // Bounded so a missed notify only costs a millisecond.
            let timeout = timeout.min(Duration::from_millis(1));
            st = self.wake.wait_timeout(st, timeout).unwrap().0;
        }
        st.in_wfi[cpu] = false;
        self.wake.notify_all();
    }
}

/// Installs the test logger once per binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sim_coordinator(config: IdleConfig) -> IdleCoordinator<SimSoc> {
    init_logger();
    let cpus = config.cpu_count;
    IdleCoordinator::new(config, SimSoc::new(cpus)).expect("valid idle config")
}

pub fn config_with_cpus(cpu_count: usize) -> IdleConfig {
    IdleConfig {
        cpu_count,
        ..IdleConfig::default()
    }
}

/// Idles `cpu` with its local timer due in `quiet_us`.
pub fn idle(coord: &IdleCoordinator<SimSoc>, cpu: usize, quiet_us: u64) -> IdleOutcome {
    coord.hw().set_local_timer(cpu, quiet_us);
    coord.enter(cpu, IdleRequest::new(usize::MAX, Some(quiet_us)))
}

/// Checks nothing is left owed or held after every core returned.
pub fn assert_quiescent(coord: &IdleCoordinator<SimSoc>) {
    assert_eq!(coord.shared().idle_count(), 0);
    assert_eq!(coord.shared().election(), 0);
    assert_eq!(coord.shared().master(), None);
    for cpu in 0..coord.config().cpu_count {
        assert!(!coord.core(cpu).restore_owed(), "cpu{cpu} owes a restore");
    }
    let inner = coord.shared().lock();
    assert!(!inner.shared_restore_owed());
    assert!(!inner.core_domain_restore_owed());
    assert!(!inner.distributor_decoupled());
    drop(inner);
    let hw = coord.hw();
    assert!(!hw.shared_off());
    assert!(!hw.decoupled());
    assert!(!hw.any_irq_masked());
}
