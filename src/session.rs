//! A `Session` owns the one physical debug-link arena a host actually has:
//! one [`DebugPort`], the [`AccessPort`]s discovered on it, and the
//! [`Target`]s found behind those APs.
//!
//! The description of an AP shared by several targets, and of a Flash
//! region's engine reaching back through a target to its AP/DP, is
//! naturally cyclic if each level holds an owning reference to the next.
//! This owns the DP and every AP in flat `Vec`s and has targets hold plain
//! indices into those vectors instead — the arena-of-indices pattern,
//! rather than `Rc<RefCell<_>>` or unsafe aliasing, breaks the cycle.

use crate::architecture::arm::{AccessPort, ApAddress, DebugPort};
use crate::core::cortex_a::CortexA;
use crate::core::cortex_m::{is_cortex_m, CortexM};
use crate::core::riscv::Riscv;
use crate::core::{Architecture, CoreAccess, CoreKind};
use crate::error::DebugError;
use crate::probe::jtag::JtagTap;
use crate::probe::rvswd::RvswdLine;
use crate::probe::swd::SwdLine;
use crate::target::registry::Registry;
use crate::target::Target;

/// Index of an [`AccessPort`] within [`Session::aps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApIndex(pub usize);

/// Index of a [`Target`] within [`Session::targets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetIndex(pub usize);

/// One physical debug-link arena: a DP, the APs discovered on it, and the
/// targets found behind those APs.
pub struct Session<'t> {
    dp: DebugPort<'t>,
    aps: Vec<AccessPort>,
    /// Which AP each target was discovered through.
    target_ap: Vec<ApIndex>,
    targets: Vec<Target>,
    registry: Registry,
}

impl<'t> Session<'t> {
    pub fn connect_swd(line: &'t mut dyn SwdLine) -> Result<Self, DebugError> {
        Ok(Session {
            dp: DebugPort::connect_swd(line)?,
            aps: Vec::new(),
            target_ap: Vec::new(),
            targets: Vec::new(),
            registry: Registry::new(),
        })
    }

    pub fn connect_jtag(tap: &'t mut dyn JtagTap) -> Result<Self, DebugError> {
        Ok(Session {
            dp: DebugPort::connect_jtag(tap)?,
            aps: Vec::new(),
            target_ap: Vec::new(),
            targets: Vec::new(),
            registry: Registry::new(),
        })
    }

    /// Probe and register the AP at `address`, returning its index.
    pub fn add_ap(&mut self, address: ApAddress) -> Result<ApIndex, DebugError> {
        let ap = AccessPort::new(&mut self.dp, address)?;
        self.aps.push(ap);
        Ok(ApIndex(self.aps.len() - 1))
    }

    pub fn ap_count(&self) -> usize {
        self.aps.len()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target_mut(&mut self, index: TargetIndex) -> &mut Target {
        &mut self.targets[index.0]
    }

    /// Run the core driver for `core_kind` against the AP at `ap_index`,
    /// hand it to the vendor registry to identify the part, and append the
    /// resulting `Target` on success.
    ///
    /// Registering an [`RvswdLine`] DMI backend instead of a DP-backed AP
    /// is not modeled here: RISC-V cores reached over RVSWD bypass the
    /// ADIv5 AP entirely, so they are attached through
    /// [`Session::attach_riscv_over_rvswd`] instead.
    #[tracing::instrument(name = "session_attach_arm", skip(self), fields(ap = ap_index.0))]
    pub fn attach_arm(&mut self, ap_index: ApIndex, core_kind: CoreKind) -> Result<TargetIndex, DebugError> {
        debug_assert_eq!(core_kind.architecture(), Architecture::Arm);
        let ap = &mut self.aps[ap_index.0];
        let dp = &mut self.dp;

        let mut target = Target::new("unidentified", core_kind);
        if is_cortex_m(core_kind) {
            let mut core = CortexM::new(ap, dp, core_kind);
            core.attach()?;
            self.registry.probe(&mut target, &mut core)?;
        } else {
            let debug_base = ap.base_address as u32;
            let mut core = CortexA::new(ap, dp, debug_base, core_kind);
            core.attach()?;
            self.registry.probe(&mut target, &mut core)?;
        }

        self.targets.push(target);
        self.target_ap.push(ap_index);
        Ok(TargetIndex(self.targets.len() - 1))
    }

    /// Attach a RISC-V core reached directly over RVSWD, with no ADIv5 AP
    /// involved.
    pub fn attach_riscv_over_rvswd(&mut self, line: &mut dyn RvswdLine, hart_index: u32) -> Result<Target, DebugError> {
        use crate::architecture::riscv::dmi::{Dmi, DmiBackend};
        let dmi = Dmi::new(DmiBackend::Rvswd(line));
        let mut core = Riscv::new(dmi, hart_index);
        core.attach()?;
        let mut target = Target::new("unidentified", CoreKind::Riscv32);
        self.registry.probe(&mut target, &mut core)?;
        Ok(target)
    }

    /// Re-run `f` with the core driver re-materialized for an already
    /// attached target, so callers can drive halt/resume/Flash operations
    /// without the session handing out a stored `&mut dyn CoreAccess`
    /// (which would have to outlive the borrow of both `self.dp` and
    /// `self.aps`).
    pub fn with_core<R>(
        &mut self,
        index: TargetIndex,
        f: impl FnOnce(&mut Target, &mut dyn CoreAccess) -> Result<R, DebugError>,
    ) -> Result<R, DebugError> {
        let ap_index = self.target_ap[index.0];
        let core_kind = self.targets[index.0].core_kind;
        let ap = &mut self.aps[ap_index.0];
        let dp = &mut self.dp;
        let target = &mut self.targets[index.0];

        if is_cortex_m(core_kind) {
            let mut core = CortexM::new(ap, dp, core_kind);
            f(target, &mut core)
        } else {
            let debug_base = ap.base_address as u32;
            let mut core = CortexA::new(ap, dp, debug_base, core_kind);
            f(target, &mut core)
        }
    }
}
