//! Target registry: an ordered list of vendor probe functions tried
//! in turn against a freshly attached core until one claims it.
//!
//! Probe functions MUST be idempotent and side-effect-free on failure: a
//! probe that returns `Ok(false)` must not have pushed Flash-region
//! entries, retained allocations in `priv_state`, or otherwise mutated the
//! target in a way the next probe would observe.

use crate::core::CoreAccess;
use crate::error::DebugError;
use crate::flashing::vendor;

use super::Target;

/// A vendor probe: given a target already filled in with DP/AP/CPUID,
/// inspect MMIO to identify the part and, on match, install Flash/RAM
/// regions and hooks, returning `true`.
pub type ProbeFn = fn(&mut Target, &mut dyn CoreAccess) -> Result<bool, DebugError>;

/// The shared, immutable probe order.
pub struct Registry {
    probes: Vec<ProbeFn>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            probes: vendor::all_probes(),
        }
    }

    /// Append a probe function, for hosts that register additional vendor
    /// drivers beyond the built-in set.
    pub fn register(&mut self, probe: ProbeFn) {
        self.probes.push(probe);
    }

    /// Try every registered probe in order; the first to claim the target
    /// stops enumeration for this core. `ProbeFailure` is returned, not
    /// propagated mid-scan, so the caller can try the next AP.
    #[tracing::instrument(name = "probe_target", skip(self, target, core))]
    pub fn probe(&self, target: &mut Target, core: &mut dyn CoreAccess) -> Result<(), DebugError> {
        for (i, probe_fn) in self.probes.iter().enumerate() {
            tracing::trace!(probe = i, "trying vendor probe");
            if probe_fn(target, core)? {
                tracing::debug!(driver = %target.driver_name, "vendor probe claimed target");
                return Ok(());
            }
        }
        tracing::warn!("no vendor probe claimed this target");
        Err(DebugError::ProbeFailure)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreKind;

    fn always_claims(target: &mut Target, _core: &mut dyn CoreAccess) -> Result<bool, DebugError> {
        target.driver_name = "claimed".into();
        Ok(true)
    }

    fn never_claims(_target: &mut Target, _core: &mut dyn CoreAccess) -> Result<bool, DebugError> {
        Ok(false)
    }

    struct NullCore;
    impl CoreAccess for NullCore {
        fn attach(&mut self) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn detach(&mut self) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn halt(&mut self) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn resume(&mut self) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn step(&mut self) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn status(&mut self) -> Result<crate::core::CoreStatus, crate::error::CoreError> {
            Ok(crate::core::CoreStatus::Halted)
        }
        fn read_core_reg(
            &mut self,
            _addr: crate::core::CoreRegisterAddress,
        ) -> Result<u32, crate::error::CoreError> {
            Ok(0)
        }
        fn write_core_reg(
            &mut self,
            _addr: crate::core::CoreRegisterAddress,
            _value: u32,
        ) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn read_memory(&mut self, _addr: u32, _data: &mut [u8]) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn write_memory(&mut self, _addr: u32, _data: &[u8]) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn set_breakpoint(&mut self, _addr: u32) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn clear_breakpoint(&mut self, _addr: u32) -> Result<(), crate::error::CoreError> {
            Ok(())
        }
        fn registers(&self) -> &dyn crate::core::CoreRegisters {
            struct Regs;
            impl crate::core::CoreRegisters for Regs {
                fn program_counter(&self) -> crate::core::CoreRegisterAddress {
                    crate::core::CoreRegisterAddress(0)
                }
                fn stack_pointer(&self) -> crate::core::CoreRegisterAddress {
                    crate::core::CoreRegisterAddress(0)
                }
                fn return_address(&self) -> crate::core::CoreRegisterAddress {
                    crate::core::CoreRegisterAddress(0)
                }
                fn argument_register(&self, _index: u8) -> crate::core::CoreRegisterAddress {
                    crate::core::CoreRegisterAddress(0)
                }
            }
            &Regs
        }
    }

    #[test]
    fn first_success_claims_and_stops_enumeration() {
        let mut registry = Registry { probes: vec![] };
        registry.register(never_claims);
        registry.register(always_claims);
        registry.register(never_claims);

        let mut target = Target::new("unidentified", CoreKind::CortexM4);
        let mut core = NullCore;
        registry.probe(&mut target, &mut core).unwrap();
        assert_eq!(target.driver_name, "claimed");
    }

    #[test]
    fn no_probe_claims_yields_probe_failure() {
        let mut registry = Registry { probes: vec![] };
        registry.register(never_claims);
        let mut target = Target::new("unidentified", CoreKind::CortexM4);
        let mut core = NullCore;
        assert!(matches!(
            registry.probe(&mut target, &mut core),
            Err(DebugError::ProbeFailure)
        ));
    }
}
