//! Per-vendor debug-sequence hooks (bring-up/reset quirks that are not part
//! of the generic ADIv5/ADIv6 state machine).
//!
//! Most parts need nothing beyond the generic DP/AP bring-up in
//! [`super::dp::DebugPort::connect_swd`]; a handful of vendors need extra
//! steps (unlocking debug while the core is stopped/sleeping, holding a
//! watchdog off during Flash operations). Grounded on `probe-rs`'s
//! `ArmDebugSequence` trait and its `Stm32fSeries` implementation in
//! `architecture/arm/sequences/stm32f_series.rs`: a default no-op impl plus
//! small per-family overrides.

use super::ap::AccessPort;
use super::dp::DebugPort;
use crate::error::DpError;

/// Hooks a vendor probe function may install on a [`crate::target::Target`]
/// to customize bring-up/teardown beyond the generic ADIv5 sequence.
pub trait ArmDebugSequence: Send + Sync {
    /// Run once after the DP/AP are up and the core has been identified,
    /// before the core driver attaches. Default: no-op.
    fn debug_device_unlock(
        &self,
        _ap: &mut AccessPort,
        _dp: &mut DebugPort,
    ) -> Result<(), DpError> {
        Ok(())
    }

    /// Run when debugging stops (detach/disconnect). Default: no-op.
    fn debug_core_stop(&self, _ap: &mut AccessPort, _dp: &mut DebugPort) -> Result<(), DpError> {
        Ok(())
    }
}

/// The sequence used when a part has no vendor-specific quirks.
pub struct DefaultArmSequence;

impl ArmDebugSequence for DefaultArmSequence {}
