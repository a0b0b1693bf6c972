//! VCU state machine (SPEC_FULL.md §4.2): the states a VCU Component cycles
//! through, and the runtime data a VCU node carries beyond a plain
//! Component (its two pingers and current state).

use serde::{Deserialize, Serialize};

use crate::config::VcuConfig;
use crate::pinger::PingerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VcuState {
    PowerOff,
    Booting,
    Idle,
    Command,
    Recovery,
    Offline,
}

impl VcuState {
    pub fn as_str(self) -> &'static str {
        match self {
            VcuState::PowerOff => "power_off",
            VcuState::Booting => "booting",
            VcuState::Idle => "idle",
            VcuState::Command => "command",
            VcuState::Recovery => "recovery",
            VcuState::Offline => "offline",
        }
    }
}

/// Per-VCU runtime state: its place in the state machine plus the two
/// liveness pingers that drive `booting <-> idle` transitions. `sga_pinger`
/// and `hpa_pinger` are `None` until the VCU is powered on (`enable`
/// spins them up; `power_off`/`bring_offline` tear them down).
pub struct VcuRuntime {
    pub state: VcuState,
    pub config: VcuConfig,
    pub sga_pinger: Option<PingerHandle>,
    pub hpa_pinger: Option<PingerHandle>,
}

impl VcuRuntime {
    pub fn new(config: VcuConfig) -> Self {
        Self {
            state: VcuState::PowerOff,
            config,
            sga_pinger: None,
            hpa_pinger: None,
        }
    }

    /// Both remote-shell endpoints report connected, per the latest pinger
    /// snapshot. Used by `booting -> idle` and `idle -> booting` transitions.
    pub fn both_endpoints_connected(&self) -> bool {
        let sga = self.sga_pinger.as_ref().is_some_and(|p| p.snapshot().connected);
        let hpa = self.hpa_pinger.as_ref().is_some_and(|p| p.snapshot().connected);
        sga && hpa
    }
}
