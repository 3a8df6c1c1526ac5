//! The `Target` data model and the attach/probe lifecycle built on top
//! of it.
//!
//! A `Target` is deliberately thin: it owns its region lists, its feature
//! flags, and a name/identification tuple, but it only *weakly* references
//! the AP/DP pair it was discovered through — those live in the owning
//! [`crate::session::Session`] arena, not here, so that an AP shared by
//! several targets never has two owners.

pub mod memory_map;
pub mod registry;

use std::any::Any;

use bitflags::bitflags;

use crate::core::CoreAccess;
use crate::core::CoreKind;
use crate::error::DebugError;
use crate::flashing::region::FlashRegion;
use crate::target::memory_map::RamRegion;

bitflags! {
    /// Per-target feature flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TargetFeatures: u32 {
        /// Never drive nRST low for this part (e.g. boards where it is tied
        /// to a reset supervisor that would brown the debug link out).
        const INHIBIT_NRST = 1 << 0;
        /// The Flash controller only accepts full 32-bit-wide writes.
        const WRITE_32_ONLY = 1 << 1;
        /// Mass-erase and other destructive commands are allowed.
        const UNSAFE_OPS_ENABLED = 1 << 2;
    }
}

/// A registered `monitor`-style command.
pub struct Command {
    pub name: &'static str,
    pub help: &'static str,
    pub handler: fn(&mut Target, &mut dyn CoreAccess, &[&str]) -> Result<String, DebugError>,
}

/// Optional per-target overrides of the default attach/reset sequencing.
#[derive(Default)]
pub struct TargetHooks {
    pub reset: Option<fn(&mut Target, &mut dyn CoreAccess) -> Result<(), DebugError>>,
    pub extended_reset: Option<fn(&mut Target, &mut dyn CoreAccess) -> Result<(), DebugError>>,
    pub attach: Option<fn(&mut Target, &mut dyn CoreAccess) -> Result<(), DebugError>>,
    pub detach: Option<fn(&mut Target, &mut dyn CoreAccess) -> Result<(), DebugError>>,
    pub halt_resume: Option<fn(&mut Target, &mut dyn CoreAccess, bool) -> Result<(), DebugError>>,
    pub mass_erase: Option<fn(&mut Target, &mut dyn CoreAccess) -> Result<(), DebugError>>,
}

/// One debug-visible core on a part.
pub struct Target {
    pub driver_name: String,
    pub part_id: u32,
    pub cpuid: u32,
    pub core_kind: CoreKind,
    /// Opaque per-driver state.
    pub priv_state: Box<dyn Any + Send>,
    pub ram_regions: Vec<RamRegion>,
    pub flash_regions: Vec<FlashRegion>,
    pub features: TargetFeatures,
    pub hooks: TargetHooks,
    pub commands: Vec<Command>,
}

impl Target {
    pub fn new(driver_name: impl Into<String>, core_kind: CoreKind) -> Self {
        Target {
            driver_name: driver_name.into(),
            part_id: 0,
            cpuid: 0,
            core_kind,
            priv_state: Box::new(()),
            ram_regions: Vec::new(),
            flash_regions: Vec::new(),
            features: TargetFeatures::empty(),
            hooks: TargetHooks::default(),
            commands: Vec::new(),
        }
    }

    /// Downcast the opaque per-driver state. Mirrors the `void* priv` cast
    /// every vendor probe performs, but fails closed instead of trusting
    /// the caller.
    pub fn priv_state<T: 'static>(&self) -> Option<&T> {
        self.priv_state.downcast_ref::<T>()
    }

    pub fn priv_state_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.priv_state.downcast_mut::<T>()
    }

    #[tracing::instrument(name = "target_attach", skip(self, core), fields(driver = %self.driver_name))]
    pub fn attach(&mut self, core: &mut dyn CoreAccess) -> Result<(), DebugError> {
        core.attach()?;
        if let Some(attach) = self.hooks.attach {
            tracing::debug!("running driver-specific attach hook");
            attach(self, core)?;
        }
        Ok(())
    }

    #[tracing::instrument(name = "target_detach", skip(self, core), fields(driver = %self.driver_name))]
    pub fn detach(&mut self, core: &mut dyn CoreAccess) -> Result<(), DebugError> {
        if let Some(detach) = self.hooks.detach {
            detach(self, core)?;
        }
        core.detach()?;
        Ok(())
    }

    #[tracing::instrument(name = "target_reset", skip(self, core), fields(driver = %self.driver_name))]
    pub fn reset(&mut self, core: &mut dyn CoreAccess) -> Result<(), DebugError> {
        if let Some(reset) = self.hooks.reset {
            tracing::debug!("running driver-specific reset hook");
            return reset(self, core);
        }
        core.halt()?;
        core.resume()?;
        Ok(())
    }

    pub fn halt_resume(&mut self, core: &mut dyn CoreAccess, step: bool) -> Result<(), DebugError> {
        if let Some(halt_resume) = self.hooks.halt_resume {
            return halt_resume(self, core, step);
        }
        if step {
            core.step()?;
        } else {
            core.resume()?;
        }
        Ok(())
    }

    /// Run a registered command by name, string-dispatched as the firmware
    /// does.
    pub fn run_command(
        &mut self,
        core: &mut dyn CoreAccess,
        name: &str,
        args: &[&str],
    ) -> Result<String, DebugError> {
        let handler = self
            .commands
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.handler)
            .ok_or(DebugError::Logic("no such command registered on this target"))?;
        handler(self, core, args)
    }
}
