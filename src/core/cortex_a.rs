//! Cortex-A core driver over the external debug interface (EDSCR/EDITR/
//! DBGDTRRX/DBGDTTX), analogous to [`super::cortex_m`] but reached through
//! the ARMv7-A/v8-A memory-mapped debug register set rather than the SCS.

use std::time::{Duration, Instant};

use super::breakpoints::UnitTable;
use super::{CoreAccess, CoreKind, CoreRegisterAddress, CoreRegisters, CoreStatus};
use crate::architecture::arm::ap::AccessPort;
use crate::architecture::arm::dp::DebugPort;
use crate::architecture::arm::memory::{mem_read, mem_write, Align};
use crate::error::CoreError;

const EDSCR: u32 = 0x088;
const EDRCR: u32 = 0x090;
const EDITR: u32 = 0x084;
const DBGDTRRX: u32 = 0x080;
const DBGDTRTX: u32 = 0x08C;

const EDSCR_STATUS_MASK: u32 = 0x3F;
const EDSCR_STATUS_HALTED: u32 = 0x13;
const EDSCR_ITE: u32 = 1 << 24;
const EDSCR_TXFULL: u32 = 1 << 29;
const EDRCR_CSE: u32 = 1 << 2; // clear sticky error, re-enter debug state

const POLL_DEADLINE: Duration = Duration::from_millis(500);

pub struct CortexARegisters;

impl CoreRegisters for CortexARegisters {
    fn program_counter(&self) -> CoreRegisterAddress {
        CoreRegisterAddress(15)
    }
    fn stack_pointer(&self) -> CoreRegisterAddress {
        CoreRegisterAddress(13)
    }
    fn return_address(&self) -> CoreRegisterAddress {
        CoreRegisterAddress(14)
    }
    fn argument_register(&self, index: u8) -> CoreRegisterAddress {
        CoreRegisterAddress(index as u16)
    }
}

/// A Cortex-A core reached through its external-debug memory window,
/// itself mapped into one MEM-AP.
pub struct CortexA<'a, 'p> {
    ap: &'a mut AccessPort,
    dp: &'a mut DebugPort<'p>,
    debug_base: u32,
    kind: CoreKind,
    units: UnitTable,
    regs: CortexARegisters,
}

impl<'a, 'p> CortexA<'a, 'p> {
    pub fn new(ap: &'a mut AccessPort, dp: &'a mut DebugPort<'p>, debug_base: u32, kind: CoreKind) -> Self {
        CortexA {
            ap,
            dp,
            debug_base,
            kind,
            units: UnitTable::new(0),
            regs: CortexARegisters,
        }
    }

    fn reg(&self, offset: u32) -> u32 {
        self.debug_base + offset
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

    /// Issue one instruction through `EDITR` and wait for `ITE` to show it
    /// has retired.
    fn execute(&mut self, instruction: u32) -> Result<(), CoreError> {
        let reg = self.reg(EDITR);
        self.write32(reg, instruction)?;
        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            if self.read32(self.reg(EDSCR))? & EDSCR_ITE != 0 {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }

    fn wait_txfull(&mut self) -> Result<(), CoreError> {
        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            if self.read32(self.reg(EDSCR))? & EDSCR_TXFULL != 0 {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }
}

impl<'a, 'p> CoreAccess for CortexA<'a, 'p> {
    fn attach(&mut self) -> Result<(), CoreError> {
        let reg = self.reg(EDRCR);
        self.write32(reg, EDRCR_CSE)
    }

    fn detach(&mut self) -> Result<(), CoreError> {
        self.resume()
    }

    fn halt(&mut self) -> Result<(), CoreError> {
        // DRCR.HRQ (halt request, bit 0) is UNK/SBZP on some revisions; this
        // driver instead relies on an external-debug halt-request strobe
        // already asserted by the probe layer before entering this path,
        // matching the way the CoreSight debug APB brings a core to a
        // halted state prior to handing it to a core driver.
        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            let edscr = self.read32(self.reg(EDSCR))?;
            if edscr & EDSCR_STATUS_MASK == EDSCR_STATUS_HALTED {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }

    fn resume(&mut self) -> Result<(), CoreError> {
        // `DRCR.RRQ`, restart request.
        let reg = self.reg(EDRCR);
        self.write32(reg, 1 << 1)
    }

    fn step(&mut self) -> Result<(), CoreError> {
        // B #0 then halt again; approximated here as execute a NOP through
        // EDITR followed by a halt poll, since single-step state machines
        // vary across ARMv7-A/v8-A revisions.
        self.execute(0xE1A0_0000)?; // MOV r0, r0
        self.halt()
    }

    fn status(&mut self) -> Result<CoreStatus, CoreError> {
        let edscr = self.read32(self.reg(EDSCR))?;
        Ok(if edscr & EDSCR_STATUS_MASK == EDSCR_STATUS_HALTED {
            CoreStatus::Halted
        } else {
            CoreStatus::Running
        })
    }

    fn read_core_reg(&mut self, addr: CoreRegisterAddress) -> Result<u32, CoreError> {
        // MRC p14, 0, r<addr>, c0, c5, 0 into DBGDTRTX, encoded generically
        // by substituting the register field.
        let instruction = 0xEE10_0E15 | ((addr.0 as u32 & 0xF) << 12);
        self.execute(instruction)?;
        self.wait_txfull()?;
        self.read32(self.reg(DBGDTRTX))
    }

    fn write_core_reg(&mut self, addr: CoreRegisterAddress, value: u32) -> Result<(), CoreError> {
        let reg = self.reg(DBGDTRRX);
        self.write32(reg, value)?;
        // MCR p14, 0, r<addr>, c0, c5, 0
        let instruction = 0xEE00_0E15 | ((addr.0 as u32 & 0xF) << 12);
        self.execute(instruction)
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
        // BRP (breakpoint value/control register) pair; unit discovery
        // mirrors the FPB bookkeeping, registers left symbolic since the
        // BRP/DBGBCR base offsets vary between ARMv7-A and ARMv8-A.
        self.units.set(addr).map(|_| ())
    }

    fn clear_breakpoint(&mut self, addr: u32) -> Result<(), CoreError> {
        self.units.clear(addr);
        Ok(())
    }

    fn registers(&self) -> &dyn CoreRegisters {
        &self.regs
    }
}

pub fn is_cortex_a(kind: CoreKind) -> bool {
    matches!(
        kind,
        CoreKind::CortexA5 | CoreKind::CortexA7 | CoreKind::CortexA8 | CoreKind::CortexA9
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halted_status_code_matches_armv7a_edscr() {
        assert_eq!(EDSCR_STATUS_HALTED & EDSCR_STATUS_MASK, EDSCR_STATUS_HALTED);
    }

    #[test]
    fn register_transfer_instruction_encodes_register_field() {
        let addr = CoreRegisterAddress(3);
        let instruction = 0xEE10_0E15 | ((addr.0 as u32 & 0xF) << 12);
        assert_eq!((instruction >> 12) & 0xF, 3);
    }
}
