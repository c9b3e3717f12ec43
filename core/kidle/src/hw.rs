// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Hardware gateway consumed by the coordinator.
//!
//! The platform implements this once per SoC: register-level state
//! requests, interrupt queries, context save/restore and the shared wake
//! timer. Methods taking `cpu` are always called *from* that cpu.

use crate::cstate::{CoreLevel, DomainLevels};

/// The power controller did not accept a requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwVeto {
    /// Controller status read back after the request.
    pub status: u32,
}

pub trait HardwareGateway: Send + Sync {
    /// Monotonic time in microseconds.
    fn now_us(&self) -> u64;
    /// Number of cores currently online.
    fn online_cpus(&self) -> usize;

    /// Masks local interrupt delivery and returns the previous state.
    fn save_disable(&self, cpu: usize) -> usize;
    fn restore(&self, cpu: usize, flags: usize);

    fn is_local_irq_pending(&self, cpu: usize) -> bool;
    /// Pending interrupt visible to the shared controller on behalf of `cpu`.
    fn is_shared_irq_pending(&self, cpu: usize) -> bool;
    /// Whether `cpu` is parked in its wait-for-interrupt instruction.
    fn cpu_in_wfi(&self, cpu: usize) -> bool;

    fn decouple_distributor(&self);
    fn recouple_distributor(&self);
    fn mirror_routing_to_shared_controller(&self);

    /// Writes the shared-domain request and reads back the controller status.
    fn request_state(&self, cpu: usize, levels: &DomainLevels) -> Result<(), HwVeto>;

    /// Full core register file.
    fn save_core_context(&self, cpu: usize);
    fn restore_core_context(&self, cpu: usize);
    /// Volatile interrupt routing of a retained core.
    fn save_irq_routing(&self, cpu: usize);
    fn restore_irq_routing(&self, cpu: usize);
    /// Shared core-side state (cluster caches, snoop control).
    fn save_cluster_context(&self);
    fn restore_cluster_context(&self);
    fn save_shared_context(&self);
    fn restore_shared_context(&self);
    /// Reasserts I/O signal forcing after the shared domain comes back.
    fn force_io_signals(&self);

    fn arm_wake_timer(&self, duration_us: u64);
    fn disarm_wake_timer(&self);
    fn route_wake_irq_to(&self, cpu: usize);

    /// Executes the core's wait instruction at `level`.
    ///
    /// For [`CoreLevel::Off`] the platform stores the context into retained
    /// memory before waiting. Returns once the core is running again.
    fn wait_for_interrupt(&self, cpu: usize, level: CoreLevel);
}
