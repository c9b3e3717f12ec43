// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The process-lifetime object every core's idle loop goes through.

use alloc::{sync::Arc, vec::Vec};

use crate::{
    admin::AdminControls,
    blocker::Blockers,
    config::IdleConfig,
    cstate::CstateTable,
    error::{IdleError, IdleResult},
    hw::HardwareGateway,
    percpu::PerCoreRecord,
    select::SleepStateSelector,
    sequencer::{IdleEntrySequencer, IdleOutcome, IdleRequest},
    shared::SharedCoordinationState,
    telemetry::{NoopTelemetry, TelemetryHooks},
};

/// Owns the state table, per-core records and shared coordination state.
///
/// Built once at boot and shared by reference with every core.
pub struct IdleCoordinator<H: HardwareGateway> {
    pub(crate) config: IdleConfig,
    pub(crate) table: CstateTable,
    pub(crate) cores: Vec<PerCoreRecord>,
    pub(crate) shared: SharedCoordinationState,
    pub(crate) blockers: Blockers,
    pub(crate) admin: AdminControls,
    pub(crate) telemetry: Arc<dyn TelemetryHooks>,
    pub(crate) hw: H,
}

impl<H: HardwareGateway> IdleCoordinator<H> {
    /// Builds a coordinator with the table `config` selects.
    pub fn new(config: IdleConfig, hw: H) -> IdleResult<Self> {
        let table = config.build_table();
        Self::with_table(config, table, hw)
    }

    /// Builds a coordinator around a platform-specific table.
    pub fn with_table(config: IdleConfig, table: CstateTable, hw: H) -> IdleResult<Self> {
        config.validate()?;
        let admin = AdminControls::new(&table, config.deepest_allowed)?;
        info!(
            "cpuidle: {} cpus, {} states, deepest allowed {}",
            config.cpu_count,
            table.len(),
            table.state(admin.deepest_allowed()).name
        );
        Ok(Self {
            cores: (0..config.cpu_count).map(|_| PerCoreRecord::new()).collect(),
            shared: SharedCoordinationState::new(),
            blockers: Blockers::new(config.wfi_only_blockers),
            telemetry: Arc::new(NoopTelemetry),
            admin,
            table,
            config,
            hw,
        })
    }

    /// Installs a telemetry collector.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryHooks>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Returns the idle entry sequencer for `cpu`.
    pub fn sequencer(&self, cpu: usize) -> IdleResult<IdleEntrySequencer<'_, H>> {
        if cpu >= self.cores.len() {
            return Err(IdleError::InvalidCpuId(cpu));
        }
        Ok(IdleEntrySequencer::new(self, cpu))
    }

    /// Runs one idle period on `cpu`.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` has no per-core record.
    pub fn enter(&self, cpu: usize, request: IdleRequest) -> IdleOutcome {
        assert!(cpu < self.cores.len(), "cpu{cpu} is not managed by cpuidle");
        IdleEntrySequencer::new(self, cpu).enter(request)
    }

    pub fn selector(&self) -> SleepStateSelector<'_, H> {
        SleepStateSelector {
            hw: &self.hw,
            table: &self.table,
            cores: &self.cores,
            shared: &self.shared,
            blockers: &self.blockers,
            admin: &self.admin,
            telemetry: self.telemetry.as_ref(),
            poll_timeout_us: self.config.poll_timeout_us,
        }
    }

    #[inline]
    pub fn config(&self) -> &IdleConfig {
        &self.config
    }

    #[inline]
    pub fn table(&self) -> &CstateTable {
        &self.table
    }

    #[inline]
    pub fn core(&self, cpu: usize) -> &PerCoreRecord {
        &self.cores[cpu]
    }

    #[inline]
    pub fn shared(&self) -> &SharedCoordinationState {
        &self.shared
    }

    #[inline]
    pub fn blockers(&self) -> &Blockers {
        &self.blockers
    }

    #[inline]
    pub fn admin(&self) -> &AdminControls {
        &self.admin
    }

    #[inline]
    pub fn hw(&self) -> &H {
        &self.hw
    }
}
