//! RISC-V Debug Module Interface, polymorphic over a JTAG-DTM or an
//! RVSWD-DMI backend.

use crate::error::TransportError;
use crate::probe::jtag::JtagTap;
use crate::probe::rvswd::{RvswdLine, RvswdOp};

/// DMI register addresses used by the core driver (RISC-V Debug spec 0.13).
pub mod reg {
    pub const DMCONTROL: u8 = 0x10;
    pub const DMSTATUS: u8 = 0x11;
    pub const HARTINFO: u8 = 0x12;
    pub const ABSTRACTCS: u8 = 0x16;
    pub const COMMAND: u8 = 0x17;
    pub const DATA0: u8 = 0x04;
    pub const PROGBUF0: u8 = 0x20;
}

/// Result of a DMI operation: `(data, op_status)`.
#[derive(Debug, Clone, Copy)]
pub struct DmiResult {
    pub data: u32,
    pub failed: bool,
}

/// A DMI transport: either JTAG-DTM (`DTMCS`/`DMI` IR/DR shifts) or the
/// vendor RVSWD-DMI two-wire bus.
pub enum DmiBackend<'t> {
    Jtag(&'t mut dyn JtagTap),
    Rvswd(&'t mut dyn RvswdLine),
}

/// Reads/writes a 7-bit DMI address across whichever backend is active.
pub struct Dmi<'t> {
    backend: DmiBackend<'t>,
    /// "Log and continue" vs hard failure on an RVSWD parity mismatch.
    pub strict_parity: bool,
}

impl<'t> Dmi<'t> {
    pub fn new(backend: DmiBackend<'t>) -> Self {
        Dmi {
            backend,
            strict_parity: false,
        }
    }

    pub fn read(&mut self, addr: u8) -> Result<DmiResult, TransportError> {
        self.transact(addr, 0, false)
    }

    pub fn write(&mut self, addr: u8, data: u32) -> Result<(), TransportError> {
        self.transact(addr, data, true)?;
        Ok(())
    }

    fn transact(&mut self, addr: u8, data: u32, write: bool) -> Result<DmiResult, TransportError> {
        match &mut self.backend {
            DmiBackend::Jtag(tap) => {
                // DMI over JTAG: a 41-bit DR shift, LSB first: bits[1:0] op,
                // bits[33:2] data, bits[40:34] address, assuming IR already
                // selects the DMI register.
                let op = if write { 0b10u64 } else { 0b01u64 };
                let mut dr_out = 0u64;
                let payload = op | ((data as u64) << 2) | ((addr as u64) << 34);
                tap.tdi_tdo_seq(&mut dr_out, true, payload, 41)?;
                let result_op = (dr_out & 0b11) as u8;
                let result_data = ((dr_out >> 2) & 0xFFFF_FFFF) as u32;
                Ok(DmiResult {
                    data: result_data,
                    failed: result_op != 0,
                })
            }
            DmiBackend::Rvswd(line) => {
                let op = if write { RvswdOp::Write } else { RvswdOp::Read };
                let result = line.dmi_transaction(addr, data, op, self.strict_parity)?;
                Ok(DmiResult {
                    data: result.data,
                    failed: !result.parity_ok && self.strict_parity,
                })
            }
        }
    }
}
