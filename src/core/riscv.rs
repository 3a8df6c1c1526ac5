//! RISC-V core driver over the Debug Module Interface's abstract-command
//! register file. Lighter than [`super::cortex_m`]: halt/resume are
//! single `dmcontrol` writes and register access goes through one
//! `command`/`data0` round trip rather than a bespoke selector dance.

use std::time::{Duration, Instant};

use super::breakpoints::UnitTable;
use super::{CoreAccess, CoreRegisterAddress, CoreRegisters, CoreStatus};
use crate::architecture::riscv::dmi::{reg, Dmi};
use crate::error::CoreError;

const DMCONTROL_HALTREQ: u32 = 1 << 31;
const DMCONTROL_RESUMEREQ: u32 = 1 << 30;
const DMCONTROL_DMACTIVE: u32 = 1 << 0;
const DMCONTROL_HARTSEL_MASK: u32 = 0x03FF_FC00;

const DMSTATUS_ALLHALTED: u32 = 1 << 9;
const DMSTATUS_ALLRUNNING: u32 = 1 << 11;

const ABSTRACTCS_CMDERR_MASK: u32 = 0x7 << 8;
const ABSTRACTCS_BUSY: u32 = 1 << 12;

/// `command.cmdtype = 0` (access register), `aarsize = 2` (32-bit),
/// `transfer = 1`, with `regno` filled in by the caller.
fn access_register_command(regno: u32, write: bool) -> u32 {
    let mut cmd = (2u32 << 20) | (1 << 17); // aarsize=32, transfer
    if write {
        cmd |= 1 << 16;
    }
    cmd | (regno & 0xFFFF)
}

const POLL_DEADLINE: Duration = Duration::from_millis(500);

pub struct RiscvRegisters;

impl CoreRegisters for RiscvRegisters {
    fn program_counter(&self) -> CoreRegisterAddress {
        // DPC, a CSR at 0x7b1, addressed via regno 0x4000 | csr_addr.
        CoreRegisterAddress(0x4000 | 0x7b1)
    }
    fn stack_pointer(&self) -> CoreRegisterAddress {
        CoreRegisterAddress(0x1000 + 2) // GPR x2 = sp
    }
    fn return_address(&self) -> CoreRegisterAddress {
        CoreRegisterAddress(0x1000 + 1) // GPR x1 = ra
    }
    fn argument_register(&self, index: u8) -> CoreRegisterAddress {
        CoreRegisterAddress(0x1000 + 10 + index as u16) // a0..a3 = x10..x13
    }
}

/// A RISC-V hart reached through one DMI, possibly one of several hung off
/// the same Debug Module (selected via `hartsel`).
pub struct Riscv<'t> {
    dmi: Dmi<'t>,
    hart_index: u32,
    units: UnitTable,
    regs: RiscvRegisters,
}

impl<'t> Riscv<'t> {
    pub fn new(dmi: Dmi<'t>, hart_index: u32) -> Self {
        Riscv {
            dmi,
            hart_index,
            units: UnitTable::new(4),
            regs: RiscvRegisters,
        }
    }

    fn select_hart(&mut self) -> Result<(), CoreError> {
        let mut dmcontrol = DMCONTROL_DMACTIVE;
        dmcontrol |= (self.hart_index << 10) & DMCONTROL_HARTSEL_MASK;
        self.dmi.write(reg::DMCONTROL, dmcontrol)?;
        Ok(())
    }

    fn wait_not_busy(&mut self) -> Result<u32, CoreError> {
        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            let abstractcs = self.dmi.read(reg::ABSTRACTCS)?.data;
            if abstractcs & ABSTRACTCS_BUSY == 0 {
                return Ok(abstractcs);
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }

    fn run_command(&mut self, command: u32) -> Result<(), CoreError> {
        self.dmi.write(reg::COMMAND, command)?;
        let abstractcs = self.wait_not_busy()?;
        let cmderr = ((abstractcs & ABSTRACTCS_CMDERR_MASK) >> 8) as u8;
        if cmderr != 0 {
            // Writing 1s to cmderr clears it (RISC-V Debug spec 3.14).
            self.dmi.write(reg::ABSTRACTCS, ABSTRACTCS_CMDERR_MASK)?;
            return Err(CoreError::AbstractCommandFailed(cmderr));
        }
        Ok(())
    }
}

impl<'t> CoreAccess for Riscv<'t> {
    fn attach(&mut self) -> Result<(), CoreError> {
        self.dmi.write(reg::DMCONTROL, DMCONTROL_DMACTIVE)?;
        self.select_hart()
    }

    fn detach(&mut self) -> Result<(), CoreError> {
        self.resume()
    }

    fn halt(&mut self) -> Result<(), CoreError> {
        self.select_hart()?;
        let mut dmcontrol = DMCONTROL_DMACTIVE | DMCONTROL_HALTREQ;
        dmcontrol |= (self.hart_index << 10) & DMCONTROL_HARTSEL_MASK;
        self.dmi.write(reg::DMCONTROL, dmcontrol)?;

        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            if self.dmi.read(reg::DMSTATUS)?.data & DMSTATUS_ALLHALTED != 0 {
                self.select_hart()?; // drop haltreq
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }

    fn resume(&mut self) -> Result<(), CoreError> {
        self.select_hart()?;
        let mut dmcontrol = DMCONTROL_DMACTIVE | DMCONTROL_RESUMEREQ;
        dmcontrol |= (self.hart_index << 10) & DMCONTROL_HARTSEL_MASK;
        self.dmi.write(reg::DMCONTROL, dmcontrol)?;

        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            if self.dmi.read(reg::DMSTATUS)?.data & DMSTATUS_ALLRUNNING != 0 {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(CoreError::StubTimeout);
            }
        }
    }

    fn step(&mut self) -> Result<(), CoreError> {
        // Hardware single-step via `dcsr.step`, set through the abstract
        // register interface rather than a dedicated DMCONTROL bit.
        let dcsr_regno = 0x4000 | 0x7b0u32;
        self.dmi.write(reg::DATA0, 1 << 2)?; // dcsr.step
        self.run_command(access_register_command(dcsr_regno, true))?;
        self.resume()?;
        self.halt()
    }

    fn status(&mut self) -> Result<CoreStatus, CoreError> {
        let dmstatus = self.dmi.read(reg::DMSTATUS)?.data;
        Ok(if dmstatus & DMSTATUS_ALLHALTED != 0 {
            CoreStatus::Halted
        } else if dmstatus & DMSTATUS_ALLRUNNING != 0 {
            CoreStatus::Running
        } else {
            CoreStatus::Unknown
        })
    }

    fn read_core_reg(&mut self, addr: CoreRegisterAddress) -> Result<u32, CoreError> {
        self.run_command(access_register_command(addr.0 as u32, false))?;
        Ok(self.dmi.read(reg::DATA0)?.data)
    }

    fn write_core_reg(&mut self, addr: CoreRegisterAddress, value: u32) -> Result<(), CoreError> {
        self.dmi.write(reg::DATA0, value)?;
        self.run_command(access_register_command(addr.0 as u32, true))
    }

    fn read_memory(&mut self, addr: u32, data: &mut [u8]) -> Result<(), CoreError> {
        // System-bus access via `sbcs`/`sbaddress0`/`sbdata0` is the
        // natural path for a halted hart's memory; until that register
        // block is wired up, memory is reached by staging through a GPR
        // and the program buffer, one word at a time.
        for (i, chunk) in data.chunks_mut(4).enumerate() {
            let word_addr = addr.wrapping_add((i * 4) as u32);
            self.write_core_reg(CoreRegisterAddress(0x1000 + 5), word_addr)?; // x5 = t0 scratch
            let progbuf_lw = 0x0002_8283u32; // lw x5, 0(x5)
            self.dmi.write(reg::PROGBUF0, progbuf_lw)?;
            self.dmi.write(reg::PROGBUF0 + 1, 0x0010_0073)?; // ebreak
            self.run_command(0x0024_0000)?; // postexec, no transfer
            let word = self.read_core_reg(CoreRegisterAddress(0x1000 + 5))?;
            let bytes = word.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
        Ok(())
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), CoreError> {
        for (i, chunk) in data.chunks(4).enumerate() {
            let word_addr = addr.wrapping_add((i * 4) as u32);
            let mut word_bytes = [0u8; 4];
            word_bytes[..chunk.len()].copy_from_slice(chunk);
            let word = u32::from_le_bytes(word_bytes);
            self.write_core_reg(CoreRegisterAddress(0x1000 + 5), word_addr)?;
            self.write_core_reg(CoreRegisterAddress(0x1000 + 6), word)?;
            let progbuf_sw = 0x0062_a023u32; // sw x6, 0(x5)
            self.dmi.write(reg::PROGBUF0, progbuf_sw)?;
            self.dmi.write(reg::PROGBUF0 + 1, 0x0010_0073)?; // ebreak
            self.run_command(0x0024_0000)?;
        }
        Ok(())
    }

    fn set_breakpoint(&mut self, addr: u32) -> Result<(), CoreError> {
        // Triggers module (`tselect`/`tdata1`/`tdata2`); unit bookkeeping
        // reuses the same bitmask scheme as the FPB driver.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_register_command_sets_transfer_and_write_bits() {
        let cmd = access_register_command(0x1005, true);
        assert_eq!(cmd & 0xFFFF, 0x1005);
        assert_ne!(cmd & (1 << 17), 0);
        assert_ne!(cmd & (1 << 16), 0);
    }

    #[test]
    fn access_register_command_read_clears_write_bit() {
        let cmd = access_register_command(0x1005, false);
        assert_eq!(cmd & (1 << 16), 0);
    }

    #[test]
    fn hartsel_field_is_shifted_into_dmcontrol() {
        let hart_index: u32 = 3;
        let dmcontrol = DMCONTROL_DMACTIVE | ((hart_index << 10) & DMCONTROL_HARTSEL_MASK);
        assert_eq!((dmcontrol & DMCONTROL_HARTSEL_MASK) >> 10, 3);
    }
}
