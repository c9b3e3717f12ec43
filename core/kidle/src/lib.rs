// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Multi-core CPU idle power-state coordination.
//!
//! Whenever a core has nothing to run, the OS idle loop calls
//! [`IdleCoordinator::enter`]. The coordinator picks the deepest state all
//! cores can tolerate, elects a single master when a shared power domain
//! has to go down, drives the [`HardwareGateway`] through the transition
//! and restores everything on the way out.
//!
//! Shared-domain states are only ever attempted while every online core is
//! idle, and at most one core owns the shared domain, wake timer and
//! interrupt distributor at a time.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

pub mod admin;
pub mod blocker;
pub mod config;
pub mod coordinator;
pub mod cstate;
pub mod error;
pub mod hw;
pub mod percpu;
pub mod select;
pub mod sequencer;
pub mod shared;
pub mod telemetry;

pub use crate::{
    admin::AdminControls,
    blocker::{BlockReason, Blockers, Ceiling},
    config::{IdleConfig, MAX_CPUS},
    coordinator::IdleCoordinator,
    cstate::{
        CoreLevel, CstateTable, DomainLevels, MAX_STATES, MemLevel, PowerState, SwitchLevel, WFI,
    },
    error::{IdleError, IdleResult},
    hw::{HardwareGateway, HwVeto},
    percpu::{FAR_FUTURE, PerCoreRecord},
    select::{Selection, SleepStateSelector, walk_depth},
    sequencer::{IdleEntrySequencer, IdleOutcome, IdleRequest},
    shared::{SharedCoordinationState, SharedInner},
    telemetry::{
        AbortReason, IdleCounters, IdleStats, LatencySample, NoopTelemetry, StateStats,
        TelemetryHooks,
    },
};
