//! Cortex-M core driver: DHCSR/DCRSR/DCRDR debug registers, FPB hardware
//! breakpoints, DWT enable, and the Thumb-aware stub-calling convention.
//!
//! Register layouts follow the ARMv7-M Architecture Reference Manual,
//! C1.6 ("Debug register support in the SCS"); the halt/step/resume
//! sequencing mirrors `probe-rs`'s `architecture/arm/core/cortex_m.rs`.

use bitfield::bitfield;
use std::time::{Duration, Instant};

use super::breakpoints::UnitTable;
use super::{Architecture, CoreAccess, CoreKind, CoreRegisterAddress, CoreRegisters, CoreStatus};
use crate::architecture::arm::ap::AccessPort;
use crate::architecture::arm::dp::DebugPort;
use crate::architecture::arm::memory::{mem_read, mem_write, Align};
use crate::error::CoreError;

const DHCSR: u32 = 0xE000_EDF0;
const DCRSR: u32 = 0xE000_EDF4;
const DCRDR: u32 = 0xE000_EDF8;
const DEMCR: u32 = 0xE000_EDFC;
const FP_CTRL: u32 = 0xE000_2000;
const FP_COMP0: u32 = 0xE000_2008;

const DHCSR_DBGKEY: u32 = 0xA05F_0000;

bitfield! {
    #[derive(Clone, Copy)]
    struct Dhcsr(u32);
    impl Debug;
    s_reset_st, _: 25;
    s_retire_st, _: 24;
    s_lockup, _: 19;
    s_sleep, _: 18;
    s_halt, _: 17;
    s_regrdy, _: 16;
    c_maskints, set_c_maskints: 3;
    c_step, set_c_step: 2;
    c_halt, set_c_halt: 1;
    c_debugen, set_c_debugen: 0;
}

bitfield! {
    #[derive(Clone, Copy)]
    struct Dcrsr(u32);
    impl Debug;
    regwnr, set_regwnr: 16;
    u8, regsel, set_regsel: 6, 0;
}

bitfield! {
    #[derive(Clone, Copy)]
    struct Demcr(u32);
    impl Debug;
    trcena, set_trcena: 24;
    vc_harderr, set_vc_harderr: 10;
    vc_corereset, set_vc_corereset: 0;
}

bitfield! {
    #[derive(Clone, Copy)]
    struct FpCtrl(u32);
    impl Debug;
    u8, num_code_hi, _: 14, 12;
    u8, num_code_lo, _: 7, 4;
    key, set_key: 1;
    enable, set_enable: 0;
}

/// DCRSR register-select codes for the registers the stub-calling
/// convention and a GDB front-end need.
mod regsel {
    pub const R0: u16 = 0;
    pub const SP: u16 = 13;
    pub const LR: u16 = 14;
    pub const PC: u16 = 15;
    pub const XPSR: u16 = 16;
}

const POLL_DEADLINE: Duration = Duration::from_millis(500);

pub struct CortexMRegisters;

impl CoreRegisters for CortexMRegisters {
    fn program_counter(&self) -> CoreRegisterAddress {
        CoreRegisterAddress(regsel::PC)
    }
    fn stack_pointer(&self) -> CoreRegisterAddress {
        CoreRegisterAddress(regsel::SP)
    }
    fn return_address(&self) -> CoreRegisterAddress {
        CoreRegisterAddress(regsel::LR)
    }
    fn argument_register(&self, index: u8) -> CoreRegisterAddress {
        CoreRegisterAddress(regsel::R0 + index as u16)
    }
}

/// A Cortex-M core reached through one MEM-AP.
pub struct CortexM<'a, 'p> {
    ap: &'a mut AccessPort,
    dp: &'a mut DebugPort<'p>,
    kind: CoreKind,
    units: UnitTable,
    regs: CortexMRegisters,
}

impl<'a, 'p> CortexM<'a, 'p> {
    pub fn new(ap: &'a mut AccessPort, dp: &'a mut DebugPort<'p>, kind: CoreKind) -> Self {
        CortexM {
            ap,
            dp,
            kind,
            units: UnitTable::new(0),
            regs: CortexMRegisters,
        }
    }

    fn read32(&mut self, addr: u32) -> Result<u32, CoreError> {
        let mut buf = [0u8; 4];
        mem_read(self.ap, self.dp, &mut buf, addr)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<(), CoreError> {
        mem_write(self.ap, self.dp, addr, &value.to_le_bytes(), Align::Bits32)?;
        Ok(())
    }

    fn wait_regrdy(&mut self) -> Result<(), CoreError> {
        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            let dhcsr = Dhcsr(self.read32(DHCSR)?);
            if dhcsr.s_regrdy() {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }

    fn discover_fpb(&mut self) -> Result<(), CoreError> {
        let ctrl = FpCtrl(self.read32(FP_CTRL)?);
        let count = ctrl.num_code_lo() | (ctrl.num_code_hi() << 4);
        self.units = UnitTable::new(count);
        let mut enable = ctrl;
        enable.set_key(true);
        enable.set_enable(true);
        self.write32(FP_CTRL, enable.0)
    }
}

impl<'a, 'p> CoreAccess for CortexM<'a, 'p> {
    fn attach(&mut self) -> Result<(), CoreError> {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        self.write32(DHCSR, DHCSR_DBGKEY | (dhcsr.0 & 0xFFFF))?;

        let mut demcr = Demcr(self.read32(DEMCR)?);
        demcr.set_trcena(true);
        self.write32(DEMCR, demcr.0)?;

        self.discover_fpb()
    }

    fn detach(&mut self) -> Result<(), CoreError> {
        let mut dhcsr = Dhcsr(self.read32(DHCSR)? & 0xFFFF);
        dhcsr.set_c_debugen(false);
        dhcsr.set_c_halt(false);
        self.write32(DHCSR, DHCSR_DBGKEY | (dhcsr.0 & 0xFFFF))
    }

    fn halt(&mut self) -> Result<(), CoreError> {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_halt(true);
        self.write32(DHCSR, DHCSR_DBGKEY | (dhcsr.0 & 0xFFFF))?;

        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            if Dhcsr(self.read32(DHCSR)?).s_halt() {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }

    fn resume(&mut self) -> Result<(), CoreError> {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        self.write32(DHCSR, DHCSR_DBGKEY | (dhcsr.0 & 0xFFFF))
    }

    fn step(&mut self) -> Result<(), CoreError> {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_step(true);
        dhcsr.set_c_maskints(true);
        self.write32(DHCSR, DHCSR_DBGKEY | (dhcsr.0 & 0xFFFF))?;

        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            if Dhcsr(self.read32(DHCSR)?).s_halt() {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }

    fn status(&mut self) -> Result<CoreStatus, CoreError> {
        let dhcsr = Dhcsr(self.read32(DHCSR)?);
        Ok(if dhcsr.s_lockup() {
            CoreStatus::Unknown
        } else if dhcsr.s_halt() {
            CoreStatus::Halted
        } else {
            CoreStatus::Running
        })
    }

    fn read_core_reg(&mut self, addr: CoreRegisterAddress) -> Result<u32, CoreError> {
        let mut sel = Dcrsr(0);
        sel.set_regsel(addr.0 as u8 & 0x7F);
        sel.set_regwnr(false);
        self.write32(DCRSR, sel.0)?;
        self.wait_regrdy()?;
        self.read32(DCRDR)
    }

    fn write_core_reg(&mut self, addr: CoreRegisterAddress, value: u32) -> Result<(), CoreError> {
        self.write32(DCRDR, value)?;
        let mut sel = Dcrsr(0);
        sel.set_regsel(addr.0 as u8 & 0x7F);
        sel.set_regwnr(true);
        self.write32(DCRSR, sel.0)?;
        self.wait_regrdy()
    }

    fn read_memory(&mut self, addr: u32, data: &mut [u8]) -> Result<(), CoreError> {
        mem_read(self.ap, self.dp, data, addr)?;
        Ok(())
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), CoreError> {
        mem_write(self.ap, self.dp, addr, data, Align::Bits32)?;
        Ok(())
    }

    fn set_breakpoint(&mut self, addr: u32) -> Result<(), CoreError> {
        let index = self.units.set(addr)?;
        let comp = (addr & !0x1) | 1;
        self.write32(FP_COMP0 + 4 * index as u32, comp)
    }

    fn clear_breakpoint(&mut self, addr: u32) -> Result<(), CoreError> {
        if let Some(index) = self.units.clear(addr) {
            self.write32(FP_COMP0 + 4 * index as u32, 0)?;
        }
        Ok(())
    }

    fn registers(&self) -> &dyn CoreRegisters {
        &self.regs
    }

    /// Cortex-M requires the LSB of a branch target to be set to select
    /// Thumb state; the default stub convention writes the raw
    /// `load_address` into PC, which would fault, so this override sets
    /// bit 0 before writing PC.
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
        self.write_core_reg(pc_reg, load_address | 1)?;
        let xpsr_reg = CoreRegisterAddress(regsel::XPSR);
        self.write_core_reg(xpsr_reg, 1 << 24)?; // T-bit

        self.resume()?;

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if self.status()? == CoreStatus::Halted {
                break;
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
        let r0 = self.registers().argument_register(0);
        self.read_core_reg(r0)
    }
}

/// Cortex-M variants' relation to [`CoreKind`], used by target attach to
/// pick this driver.
pub fn is_cortex_m(kind: CoreKind) -> bool {
    matches!(
        kind,
        CoreKind::CortexM0
            | CoreKind::CortexM0Plus
            | CoreKind::CortexM3
            | CoreKind::CortexM4
            | CoreKind::CortexM7
            | CoreKind::CortexM23
            | CoreKind::CortexM33
    ) && kind.architecture() == Architecture::Arm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dhcsr_debugen_and_halt_bits() {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_halt(true);
        assert_eq!(dhcsr.0, 0b11);
    }

    #[test]
    fn fp_comp_enable_bit_set() {
        let addr: u32 = 0x2000_0100;
        let comp = (addr & !0x1) | 1;
        assert_eq!(comp, 0x2000_0101);
    }

    #[test]
    fn dcrsr_regwnr_write_path() {
        let mut sel = Dcrsr(0);
        sel.set_regsel(regsel::PC as u8);
        sel.set_regwnr(true);
        assert_eq!(sel.regsel(), 15);
        assert!(sel.regwnr());
    }
}
