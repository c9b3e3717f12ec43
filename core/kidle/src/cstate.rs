// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Candidate idle states and the power-domain levels each one requires.

use alloc::vec::Vec;

use strum::{Display, IntoStaticStr};

use crate::error::{IdleError, IdleResult};

/// Per-core power domain level.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoStaticStr)]
pub enum CoreLevel {
    On       = 0,
    /// Registers preserved, logic minimally powered.
    Retained = 1,
    /// Full context loss.
    Off      = 2,
}

/// Level of an on/off shared domain (analog/bus domain, auxiliary PLL).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoStaticStr)]
pub enum SwitchLevel {
    On  = 0,
    Off = 1,
}

/// Level of the fast on-chip memory.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoStaticStr)]
pub enum MemLevel {
    Retained = 0,
    Off      = 1,
}

/// Minimum capability level a state needs from every power domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainLevels {
    pub core: CoreLevel,
    pub shared: SwitchLevel,
    pub aux_pll: SwitchLevel,
    pub fast_mem: MemLevel,
}

impl DomainLevels {
    /// Everything powered, fast memory retained.
    pub const RUNNING: Self = Self::new(CoreLevel::On, SwitchLevel::On, SwitchLevel::On, MemLevel::Retained);

    pub const fn new(core: CoreLevel, shared: SwitchLevel, aux_pll: SwitchLevel, fast_mem: MemLevel) -> Self {
        Self {
            core,
            shared,
            aux_pll,
            fast_mem,
        }
    }

    /// Whether entering these levels powers down a domain shared by all cores.
    ///
    /// Only one elected core may drive such a transition.
    pub const fn powers_down_shared(&self) -> bool {
        matches!(self.shared, SwitchLevel::Off)
            || matches!(self.aux_pll, SwitchLevel::Off)
            || matches!(self.fast_mem, MemLevel::Off)
    }

    /// `true` if every domain is at least as "off" as in `other`.
    pub fn at_least_as_deep(&self, other: &Self) -> bool {
        self.core >= other.core
            && self.shared >= other.shared
            && self.aux_pll >= other.aux_pll
            && self.fast_mem >= other.fast_mem
    }
}

/// One row of the state table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerState {
    pub name: &'static str,
    pub levels: DomainLevels,
    pub enter_latency_us: u32,
    pub exit_latency_us: u32,
    /// Minimum guaranteed idle time that makes the state worth entering.
    pub residency_threshold_us: u32,
    pub relative_power_cost: u32,
    /// Whether residency accounting applies to this state.
    pub is_time_valid: bool,
}

impl PowerState {
    const fn row(
        name: &'static str,
        levels: DomainLevels,
        enter_latency_us: u32,
        exit_latency_us: u32,
        residency_threshold_us: u32,
        relative_power_cost: u32,
    ) -> Self {
        Self {
            name,
            levels,
            enter_latency_us,
            exit_latency_us,
            residency_threshold_us,
            relative_power_cost,
            is_time_valid: true,
        }
    }

    /// The running pseudo-state that heads every table. Never entered.
    pub const fn running() -> Self {
        Self {
            name: "running",
            levels: DomainLevels::RUNNING,
            enter_latency_us: 0,
            exit_latency_us: 0,
            residency_threshold_us: 0,
            relative_power_cost: 1000,
            is_time_valid: false,
        }
    }

    #[inline]
    pub const fn powers_down_shared(&self) -> bool {
        self.levels.powers_down_shared()
    }
}

/// Index of the shallowest real sleep state (plain wait-for-interrupt).
pub const WFI: usize = 1;

/// Largest table the coordinator accepts.
pub const MAX_STATES: usize = u64::BITS as usize;

/// Ordered list of candidate states, shallowest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CstateTable {
    states: Vec<PowerState>,
}

impl CstateTable {
    /// Builds a table after checking its ordering invariants.
    pub fn new(states: Vec<PowerState>) -> IdleResult<Self> {
        let first = states.first().ok_or(IdleError::EmptyTable)?;
        if first.is_time_valid || first.levels != DomainLevels::RUNNING {
            return Err(IdleError::MissingRunningState);
        }
        if states.len() <= WFI {
            return Err(IdleError::EmptyTable);
        }
        if states.len() > MAX_STATES {
            return Err(IdleError::TooManyStates(states.len()));
        }
        for (i, pair) in states.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if !next.levels.at_least_as_deep(&prev.levels)
                || next.residency_threshold_us < prev.residency_threshold_us
            {
                return Err(IdleError::TableOrder(i + 1));
            }
        }
        Ok(Self { states })
    }

    /// The reference two-cluster SoC table.
    ///
    /// `deep_idle` adds the deep-sleep row that also drops fast memory.
    pub fn reference(deep_idle: bool) -> Self {
        use CoreLevel as C;
        use MemLevel as M;
        use SwitchLevel as S;

        let mut states = alloc::vec![
            PowerState::running(),
            PowerState::row("wfi", DomainLevels::new(C::On, S::On, S::On, M::Retained), 1, 1, 0, 800),
            PowerState::row(
                "ap-idle",
                DomainLevels::new(C::Retained, S::On, S::On, M::Retained),
                100,
                160,
                260,
                400,
            ),
            PowerState::row(
                "ap-sleep",
                DomainLevels::new(C::Off, S::Off, S::On, M::Retained),
                800,
                1110,
                1910,
                150,
            ),
            PowerState::row(
                "ap-sleep-pll-off",
                DomainLevels::new(C::Off, S::Off, S::Off, M::Retained),
                800,
                9110,
                9910,
                100,
            ),
        ];
        if deep_idle {
            states.push(PowerState::row(
                "ap-deep-sleep",
                DomainLevels::new(C::Off, S::Off, S::Off, M::Off),
                1000,
                9140,
                10140,
                50,
            ));
        }
        Self { states }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Index of the deepest state in the table.
    #[inline]
    pub fn deepest(&self) -> usize {
        self.states.len() - 1
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&PowerState> {
        self.states.get(index)
    }

    /// Returns the state at `index`.
    ///
    /// Callers clamp indices against [`Self::deepest`] first, so an
    /// out-of-range index is a programming error.
    #[inline]
    pub fn state(&self, index: usize) -> &PowerState {
        &self.states[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PowerState> {
        self.states.iter()
    }

    /// Checks that `index` names a selectable sleep state.
    pub fn check_selectable(&self, index: usize) -> IdleResult<()> {
        if index >= self.states.len() {
            return Err(IdleError::StateOutOfRange {
                index,
                count: self.states.len(),
            });
        }
        if index < WFI {
            return Err(IdleError::RunningNotSelectable);
        }
        Ok(())
    }
}
