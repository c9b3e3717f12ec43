// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Boot-time configuration of the idle coordinator.

use crate::{
    blocker::BlockReason,
    cstate::CstateTable,
    error::{IdleError, IdleResult},
};

/// Upper bound on managed cpus (one bit each in the poller mask).
pub const MAX_CPUS: usize = usize::BITS as usize;

/// Ceiling on the "other cores reached their wait point" poll, in µs.
pub const DEFAULT_POLL_TIMEOUT_US: u64 = 100_000;

#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// Number of physical cores with a per-core record.
    pub cpu_count: usize,
    /// Include the deep-sleep row that also powers off fast memory.
    pub deep_idle: bool,
    /// Initial ceiling for every core; `None` means the deepest table row.
    pub deepest_allowed: Option<usize>,
    pub poll_timeout_us: u64,
    /// Fixed latency subtracted from the shared wake timer.
    pub min_wake_latency_us: u64,
    /// Auxiliary PLL relock time, subtracted when the PLL goes down.
    pub pll_restart_latency_us: u64,
    /// Blockers that force plain wait-for-interrupt instead of only
    /// forbidding shared-domain-off states.
    pub wfi_only_blockers: BlockReason,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            cpu_count: 2,
            deep_idle: true,
            deepest_allowed: None,
            poll_timeout_us: DEFAULT_POLL_TIMEOUT_US,
            min_wake_latency_us: 1110,
            pll_restart_latency_us: 8000,
            wfi_only_blockers: BlockReason::CHARGER,
        }
    }
}

impl IdleConfig {
    pub fn validate(&self) -> IdleResult<()> {
        if self.cpu_count == 0 || self.cpu_count > MAX_CPUS {
            return Err(IdleError::InvalidCpuCount(self.cpu_count));
        }
        if self.poll_timeout_us == 0 {
            return Err(IdleError::InvalidPollTimeout);
        }
        Ok(())
    }

    /// Builds the state table this configuration selects.
    pub fn build_table(&self) -> CstateTable {
        CstateTable::reference(self.deep_idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IdleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.build_table().deepest(), 5);
    }

    #[test]
    fn test_invalid_cpu_count() {
        let mut config = IdleConfig::default();
        config.cpu_count = 0;
        assert_eq!(config.validate(), Err(IdleError::InvalidCpuCount(0)));
        config.cpu_count = MAX_CPUS + 1;
        assert_eq!(config.validate(), Err(IdleError::InvalidCpuCount(MAX_CPUS + 1)));
    }

    #[test]
    fn test_zero_poll_timeout_rejected() {
        let config = IdleConfig {
            poll_timeout_us: 0,
            ..IdleConfig::default()
        };
        assert_eq!(config.validate(), Err(IdleError::InvalidPollTimeout));
    }

    #[test]
    fn test_deep_idle_off_drops_row() {
        let config = IdleConfig {
            deep_idle: false,
            ..IdleConfig::default()
        };
        assert_eq!(config.build_table().deepest(), 4);
    }
}
