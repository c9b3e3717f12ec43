// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Operations-console controls.
//!
//! Kept apart from [`crate::shared::SharedCoordinationState`] so nothing
//! here can disturb an in-flight transition; the hot path only reads these.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::{
    cstate::CstateTable,
    error::{IdleError, IdleResult},
};

pub struct AdminControls {
    deepest_allowed: AtomicUsize,
    latency_measurement: AtomicBool,
    disabled: AtomicU64,
    table_len: usize,
}

impl AdminControls {
    pub fn new(table: &CstateTable, deepest_allowed: Option<usize>) -> IdleResult<Self> {
        let deepest = match deepest_allowed {
            Some(index) => {
                table.check_selectable(index)?;
                index
            }
            None => table.deepest(),
        };
        Ok(Self {
            deepest_allowed: AtomicUsize::new(deepest),
            latency_measurement: AtomicBool::new(false),
            disabled: AtomicU64::new(0),
            table_len: table.len(),
        })
    }

    #[inline]
    pub fn deepest_allowed(&self) -> usize {
        self.deepest_allowed.load(Ordering::Acquire)
    }

    pub fn set_deepest_allowed(&self, index: usize) -> IdleResult<()> {
        self.check(index)?;
        self.deepest_allowed.store(index, Ordering::Release);
        info!("cpuidle: deepest allowed state set to {index}");
        Ok(())
    }

    #[inline]
    pub fn latency_measurement(&self) -> bool {
        self.latency_measurement.load(Ordering::Relaxed)
    }

    pub fn set_latency_measurement(&self, enabled: bool) {
        self.latency_measurement.store(enabled, Ordering::Relaxed);
    }

    /// Disables or re-enables one state. Wait-for-interrupt is always usable.
    pub fn set_state_disabled(&self, index: usize, disabled: bool) -> IdleResult<()> {
        self.check(index)?;
        if index == crate::cstate::WFI {
            return Ok(());
        }
        if disabled {
            self.disabled.fetch_or(1 << index, Ordering::AcqRel);
        } else {
            self.disabled.fetch_and(!(1 << index), Ordering::AcqRel);
        }
        Ok(())
    }

    #[inline]
    pub fn is_disabled(&self, index: usize) -> bool {
        index < u64::BITS as usize && self.disabled.load(Ordering::Acquire) & (1 << index) != 0
    }

    fn check(&self, index: usize) -> IdleResult<()> {
        if index >= self.table_len {
            return Err(IdleError::StateOutOfRange {
                index,
                count: self.table_len,
            });
        }
        if index < crate::cstate::WFI {
            return Err(IdleError::RunningNotSelectable);
        }
        Ok(())
    }
}
