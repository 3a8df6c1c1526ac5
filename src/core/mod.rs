//! Core drivers: Cortex-M, Cortex-A, RISC-V.
//!
//! Grounded on the `Core` trait of `probe-rs`'s early `ocd/src/target/mod.rs`
//! (halt/run/step/register access over a single trait, independent of
//! architecture) generalized to Cortex-M, Cortex-A, and RISC-V.

pub mod breakpoints;
pub mod cortex_a;
pub mod cortex_m;
pub mod riscv;

use crate::error::CoreError;

/// The core kind tag carried on a [`crate::target::Target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreKind {
    CortexM0,
    CortexM0Plus,
    CortexM3,
    CortexM4,
    CortexM7,
    CortexM23,
    CortexM33,
    CortexA5,
    CortexA7,
    CortexA8,
    CortexA9,
    Riscv32,
    Riscv64,
}

/// Broad architecture family, used to pick the core driver and the
/// [`crate::architecture::arm::sequences::ArmDebugSequence`] vs. RISC-V DMI
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Arm,
    Riscv,
}

impl CoreKind {
    pub fn architecture(self) -> Architecture {
        use CoreKind::*;
        match self {
            Riscv32 | Riscv64 => Architecture::Riscv,
            _ => Architecture::Arm,
        }
    }
}

/// Address of a core register, architecture-specific encoding left to the
/// driver (DCRSR selector for Cortex-M, GPR index for RISC-V, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRegisterAddress(pub u16);

/// Registers common to every architecture this core drives, so the Flash
/// engine's stub-calling convention can be written
/// once.
pub trait CoreRegisters {
    fn program_counter(&self) -> CoreRegisterAddress;
    fn stack_pointer(&self) -> CoreRegisterAddress;
    fn return_address(&self) -> CoreRegisterAddress;
    fn argument_register(&self, index: u8) -> CoreRegisterAddress;
}

/// Whether the core is halted or running, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreStatus {
    Halted,
    Running,
    Unknown,
}

/// The architecture-independent surface the Flash engine and the
/// target-facing contract are built on: halt/resume/step, register and
/// memory I/O, breakpoints, and stub execution.
pub trait CoreAccess {
    fn attach(&mut self) -> Result<(), CoreError>;
    fn detach(&mut self) -> Result<(), CoreError>;

    fn halt(&mut self) -> Result<(), CoreError>;
    fn resume(&mut self) -> Result<(), CoreError>;
    fn step(&mut self) -> Result<(), CoreError>;
    fn status(&mut self) -> Result<CoreStatus, CoreError>;

    fn read_core_reg(&mut self, addr: CoreRegisterAddress) -> Result<u32, CoreError>;
    fn write_core_reg(&mut self, addr: CoreRegisterAddress, value: u32) -> Result<(), CoreError>;

    fn read_memory(&mut self, addr: u32, data: &mut [u8]) -> Result<(), CoreError>;
    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), CoreError>;

    fn set_breakpoint(&mut self, addr: u32) -> Result<(), CoreError>;
    fn clear_breakpoint(&mut self, addr: u32) -> Result<(), CoreError>;

    fn registers(&self) -> &dyn CoreRegisters;

    /// Load `blob` at `load_address`, set `r0..=r3`, point PC/SP at the
    /// stub, let it run to its own internal breakpoint, and read back a
    /// status word from `r0`. The default
    /// implementation composes the primitives above; Cortex-M overrides it
    /// to add the Thumb-mode `+1` PC adjustment.
    fn run_stub(
        &mut self,
        load_address: u32,
        blob: &[u8],
        sp: u32,
        args: [u32; 4],
    ) -> Result<u32, CoreError> {
        self.write_memory(load_address, blob)?;
        for (i, arg) in args.iter().enumerate() {
            let reg = self.registers().argument_register(i as u8);
            self.write_core_reg(reg, *arg)?;
        }
        let sp_reg = self.registers().stack_pointer();
        self.write_core_reg(sp_reg, sp)?;
        let pc_reg = self.registers().program_counter();
        self.write_core_reg(pc_reg, load_address)?;
        self.resume()?;

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if self.status()? == CoreStatus::Halted {
                break;
            }
            if std::time::Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
        let r0 = self.registers().argument_register(0);
        self.read_core_reg(r0)
    }
}
