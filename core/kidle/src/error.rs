// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Error types for idle-state configuration and administration.
//!
//! Nothing on the idle entry path returns these: aborts, polling timeouts
//! and controller vetoes are handled inside the sequencer and reported
//! through telemetry.

/// Errors raised while building or administering the idle coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleError {
    /// The configured cpu count is zero or above [`crate::MAX_CPUS`].
    InvalidCpuCount(usize),
    /// The polling ceiling must be non-zero.
    InvalidPollTimeout,
    /// The state table has no real sleep state after the running row.
    EmptyTable,
    /// Row 0 must be the non-time-valid running pseudo-state.
    MissingRunningState,
    /// More rows than the per-state disable mask can track.
    TooManyStates(usize),
    /// A row is shallower than the row before it.
    TableOrder(usize),
    /// A state index does not exist in the table.
    StateOutOfRange { index: usize, count: usize },
    /// The running pseudo-state cannot be used as a sleep target.
    RunningNotSelectable,
    /// The cpu id is not managed by this coordinator.
    InvalidCpuId(usize),
}

impl core::fmt::Display for IdleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IdleError::InvalidCpuCount(n) => write!(f, "invalid cpu count {n}"),
            IdleError::InvalidPollTimeout => write!(f, "poll timeout must be non-zero"),
            IdleError::EmptyTable => write!(f, "state table has no sleep state"),
            IdleError::MissingRunningState => {
                write!(f, "state table must start with the running state")
            }
            IdleError::TooManyStates(n) => write!(f, "state table has {n} rows"),
            IdleError::TableOrder(i) => write!(f, "state {i} is shallower than its predecessor"),
            IdleError::StateOutOfRange { index, count } => {
                write!(f, "state {index} out of range (table has {count} states)")
            }
            IdleError::RunningNotSelectable => write!(f, "running state is not a sleep target"),
            IdleError::InvalidCpuId(cpu) => write!(f, "invalid cpu id {cpu}"),
        }
    }
}

/// Convenience alias for results carrying [`IdleError`].
pub type IdleResult<T> = Result<T, IdleError>;
