//! ADIv5/ADIv6 Debug Port layer.
//!
//! Register layouts follow the ARM Debug Interface Architecture
//! Specification; the `bitfield!` style mirrors `probe-rs`'s
//! `architecture/arm/dp/mod.rs`.

use bitfield::bitfield;
use jep106::JEP106Code;
use std::time::{Duration, Instant};

use crate::error::DpError;
use crate::probe::swd::{parity32, SwdAck, SwdLine};
use crate::probe::jtag::JtagTap;
use crate::probe::WireProtocol;

bitfield! {
    /// `ABORT` register: write-only, clears sticky error flags.
    #[derive(Clone, Copy)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 4;
    pub _, set_wderrclr: 3;
    pub _, set_stkerrclr: 2;
    pub _, set_stkcmpclr: 1;
    pub _, set_dapabort: 0;
}

/// The canonical abort value used at connection bring-up: clears
/// STKCMPCLR/STKERRCLR/WDERRCLR/ORUNERRCLR (S1: `0x0000001E`).
pub const ABORT_CLEAR_ALL_STICKY: u32 = 0x0000_001E;

bitfield! {
    /// `CTRL/STAT` register.
    #[derive(Clone, Copy)]
    pub struct CtrlStat(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub sticky_err, _: 5;
    pub wdata_err, _: 7;
    pub sticky_cmp, _: 4;
    pub sticky_orun, _: 1;
}

bitfield! {
    /// `SELECT` register (ADIv5: APSEL + APBANKSEL + DPBANKSEL).
    #[derive(Clone, Copy, Default)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

bitfield! {
    /// `DPIDR` register.
    #[derive(Clone, Copy)]
    pub struct Dpidr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    u16, designer_raw, _: 11, 1;
}

/// ADIv5 vs ADIv6 distinguishes 8-bit AP selectors from 64-bit AP base
/// addresses written across `SELECT`/`SELECT1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugPortVersion {
    /// ADIv5: AP selector is 8 bits (APSEL + bank) written into `SELECT`.
    V5,
    /// ADIv6: AP is addressed by a 64-bit base address, split across
    /// `SELECT` and `SELECT1`.
    V6,
}

const DP_REG_ABORT: u8 = 0x0;
const DP_REG_CTRL_STAT: u8 = 0x4;
const DP_REG_SELECT: u8 = 0x8;
const DP_REG_SELECT1: u8 = 0x4; // banked, ADIv6 only
const DP_REG_RDBUFF: u8 = 0xC;

/// Retry budget for `ACK=WAIT` before declaring a timeout.
const WAIT_RETRY_BUDGET: u32 = 64;
const WAIT_RETRY_SPACING: Duration = Duration::from_micros(100);

/// One physical SWD/JTAG link endpoint.
///
/// Owned exclusively by the enumeration that created it; all of its APs
/// hold only a weak reference back and are torn down
/// no later than the DP itself.
pub struct DebugPort<'t> {
    transport: DpTransport<'t>,
    /// JEP-106 designer code read from `DPIDR`.
    pub designer: JEP106Code,
    /// `DPIDR.PARTNO`.
    pub part_no: u8,
    pub version: DebugPortVersion,
    /// 32 for ADIv5, 64 for ADIv6.
    pub address_width: u8,
    /// Last optional target-select value written (multi-drop SWD).
    pub target_sel: Option<u32>,
    select_cache: Select,
    select1_cache: u32,
    /// One pipelined read outstanding per ADIv5 semantics: the first read
    /// of a sequence returns the *previous* transaction's result, drained
    /// by a final `RDBUFF` read.
    pending_read: bool,
    /// Accumulated last ADIv5 ACK/status.
    pub fault: u32,
}

enum DpTransport<'t> {
    Swd(&'t mut dyn SwdLine),
    Jtag(&'t mut dyn JtagTap),
}

impl<'t> DebugPort<'t> {
    /// Bring up a DP over SWD: line reset, read `DPIDR`, clear sticky
    /// errors, power up the debug and system domains, and poll the acks.
    pub fn connect_swd(line: &'t mut dyn SwdLine) -> Result<Self, DpError> {
        line.line_reset()?;

        let mut dp = DebugPort {
            transport: DpTransport::Swd(line),
            designer: JEP106Code::new(0, 0),
            part_no: 0,
            version: DebugPortVersion::V5,
            address_width: 32,
            target_sel: None,
            select_cache: Select::default(),
            select1_cache: 0,
            pending_read: false,
            fault: 0,
        };

        // The very first DP read after a line reset returns DPIDR/IDCODE;
        // this is a hardware special case, not a SELECT-banked access.
        let dpidr_raw = dp.read(DP_REG_ABORT, false)?;
        let dpidr = Dpidr(dpidr_raw);
        dp.designer = jep106_from_raw(dpidr.designer_raw());
        dp.part_no = dpidr.part_no();
        dp.version = if dpidr.version() >= 2 {
            DebugPortVersion::V6
        } else {
            DebugPortVersion::V5
        };
        dp.address_width = match dp.version {
            DebugPortVersion::V5 => 32,
            DebugPortVersion::V6 => 64,
        };

        dp.write(DP_REG_ABORT, ABORT_CLEAR_ALL_STICKY, false)?;
        dp.power_up()?;

        Ok(dp)
    }

    /// Bring up a DP over JTAG. The TAP's IR must already select DPACC/
    /// APACC; only the DP-specific power-up sequence differs from SWD.
    pub fn connect_jtag(tap: &'t mut dyn JtagTap) -> Result<Self, DpError> {
        let mut dp = DebugPort {
            transport: DpTransport::Jtag(tap),
            designer: JEP106Code::new(0, 0),
            part_no: 0,
            version: DebugPortVersion::V5,
            address_width: 32,
            target_sel: None,
            select_cache: Select::default(),
            select1_cache: 0,
            pending_read: false,
            fault: 0,
        };
        dp.write(DP_REG_ABORT, ABORT_CLEAR_ALL_STICKY, false)?;
        dp.power_up()?;
        Ok(dp)
    }

    fn power_up(&mut self) -> Result<(), DpError> {
        let mut ctrl = CtrlStat(self.read(DP_REG_CTRL_STAT, false)?);
        ctrl.set_csyspwrupreq(true);
        ctrl.set_cdbgpwrupreq(true);
        self.write(DP_REG_CTRL_STAT, ctrl.0, false)?;

        let deadline = Instant::now() + Duration::from_millis(100);
        loop {
            let ctrl = CtrlStat(self.read(DP_REG_CTRL_STAT, false)?);
            if ctrl.csyspwrupack() && ctrl.cdbgpwrupack() {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(DpError::WaitTimeout);
            }
        }
    }

    /// Write the AP abort register and clear the DP error register.
    pub fn abort(&mut self) -> Result<(), DpError> {
        self.write(DP_REG_ABORT, ABORT_CLEAR_ALL_STICKY, false)
    }

    /// Read a register, flushing any pending pipelined AP read first.
    ///
    /// For an AP register (`is_ap`), the returned value is the *previous*
    /// AP read's result, not this one's, per ADIv5 pipelining; a caller
    /// issuing a run of AP reads must shift its interpretation of the
    /// results by one and call [`DebugPort::drain_read_buffer`] to
    /// retrieve the last one (see [`super::memory::mem_read`] and
    /// [`super::ap::AccessPort::new`]).
    pub fn read(&mut self, addr: u8, is_ap: bool) -> Result<u32, DpError> {
        if !is_ap && self.pending_read {
            // Switching to unrelated DP traffic would otherwise strand the
            // outstanding AP read; drain it for real instead of just
            // forgetting it was ever issued.
            self.drain_read_buffer()?;
        }
        self.low_access(true, addr, 0, is_ap)
    }

    /// Write a register, flushing any pending pipelined AP read first.
    pub fn write(&mut self, addr: u8, value: u32, is_ap: bool) -> Result<(), DpError> {
        if !is_ap && self.pending_read {
            self.drain_read_buffer()?;
        }
        self.low_access(false, addr, value, is_ap)?;
        Ok(())
    }

    /// Preserve the two-stage pipelined read semantics of ADIv5: an AP read
    /// returns the *previous* AP read's result, and a final `RDBUFF` read
    /// drains the last one.
    pub fn low_access(
        &mut self,
        read: bool,
        addr: u8,
        value: u32,
        is_ap: bool,
    ) -> Result<u32, DpError> {
        if is_ap && !read {
            self.pending_read = false;
        }
        let result = self.raw_access_retrying(read, addr, value, is_ap)?;
        if is_ap && read {
            self.pending_read = true;
        }
        Ok(result)
    }

    /// Drain the outstanding pipelined AP read via `RDBUFF`. A caller that
    /// is about to switch to an unrelated DP operation must call this, or
    /// rely on [`DebugPort::read`]/[`DebugPort::write`] of a DP register to
    /// do it implicitly.
    pub fn drain_read_buffer(&mut self) -> Result<u32, DpError> {
        let v = self.raw_access_retrying(true, DP_REG_RDBUFF, 0, false)?;
        self.pending_read = false;
        Ok(v)
    }

    fn raw_access_retrying(
        &mut self,
        read: bool,
        addr: u8,
        value: u32,
        is_ap: bool,
    ) -> Result<u32, DpError> {
        let mut tries = 0;
        loop {
            match self.raw_access(read, addr, value, is_ap) {
                Ok(v) => return Ok(v),
                Err(DpError::ProtocolError(ack)) if ack == SwdAckCode::WAIT => {
                    tries += 1;
                    if tries > WAIT_RETRY_BUDGET {
                        tracing::warn!(addr, "debug port WAIT retry budget exhausted");
                        return Err(DpError::WaitTimeout);
                    }
                    std::thread::sleep(WAIT_RETRY_SPACING);
                }
                Err(DpError::Fault) => {
                    tracing::warn!(addr, "debug port reported FAULT, aborting");
                    self.fault = 1;
                    self.abort()?;
                    return Err(DpError::Fault);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Select the AP at `ap_sel` (ADIv5) re-emitting `SELECT` only on change.
    pub fn select_ap_v5(&mut self, ap_sel: u8, bank: u8) -> Result<(), DpError> {
        if self.select_cache.ap_sel() == ap_sel && self.select_cache.ap_bank_sel() == bank {
            return Ok(());
        }
        let mut select = self.select_cache;
        select.set_ap_sel(ap_sel);
        select.set_ap_bank_sel(bank);
        self.write(DP_REG_SELECT, select.0, false)?;
        self.select_cache = select;
        Ok(())
    }

    /// Select the AP at a 64-bit `base` (ADIv6), writing both halves only
    /// when they differ from the cached value.
    pub fn select_ap_v6(&mut self, base: u64) -> Result<(), DpError> {
        let low = (base & 0xFFFF_FFF0) as u32 | (self.select_cache.0 & 0xF);
        let high = (base >> 32) as u32;
        if self.select_cache.0 != low {
            self.write(DP_REG_SELECT, low, false)?;
            self.select_cache = Select(low);
        }
        if self.select1_cache != high {
            self.write(DP_REG_SELECT1, high, false)?;
            self.select1_cache = high;
        }
        Ok(())
    }

    fn raw_access(&mut self, read: bool, addr: u8, value: u32, is_ap: bool) -> Result<u32, DpError> {
        match &mut self.transport {
            DpTransport::Swd(line) => swd_raw_access(&mut **line, read, addr, value, is_ap),
            DpTransport::Jtag(tap) => jtag_raw_access(&mut **tap, read, addr, value, is_ap),
        }
    }
}

struct SwdAckCode;
impl SwdAckCode {
    const WAIT: u8 = 2;
}

fn ack_code(ack: SwdAck) -> Result<(), DpError> {
    match ack {
        SwdAck::Ok => Ok(()),
        SwdAck::Wait => Err(DpError::ProtocolError(SwdAckCode::WAIT)),
        SwdAck::Fault => Err(DpError::Fault),
        SwdAck::Protocol(bits) => Err(DpError::ProtocolError(bits)),
    }
}

/// Build and clock one SWD packet: 8-bit header, turnaround, 3-bit ACK,
/// turnaround, 32-bit data + parity, turnaround.
fn swd_raw_access(
    line: &mut dyn SwdLine,
    read: bool,
    addr: u8,
    value: u32,
    is_ap: bool,
) -> Result<u32, DpError> {
    let a = (addr >> 2) & 0b11;
    let mut header: u8 = 1; // start
    if is_ap {
        header |= 1 << 1;
    }
    if read {
        header |= 1 << 2;
    }
    header |= a << 3;
    let parity = (is_ap as u8) ^ (read as u8) ^ (a.count_ones() as u8 & 1);
    header |= parity << 5;
    header |= 1 << 7; // park/stop

    line.seq_out(header as u32, 8)?;
    let (ack, _) = line.seq_in_parity(3)?;
    ack_code(SwdAck::decode(ack as u8))?;

    if read {
        let (data, parity_ok) = line.seq_in_parity(32)?;
        if !parity_ok {
            return Err(DpError::ProtocolError(0xFF));
        }
        Ok(data)
    } else {
        line.seq_out_parity(value, 32)?;
        let _ = parity32(value);
        Ok(0)
    }
}

/// Minimal JTAG DR-shift access; assumes the TAP's IR already selects
/// DPACC/APACC as appropriate (the IR/TAP-state sequencing itself is out of
/// scope for the DP layer, which only owns the 3-bit ack + 32-bit data shift
/// through DR once IR has been set).
fn jtag_raw_access(
    tap: &mut dyn JtagTap,
    read: bool,
    addr: u8,
    value: u32,
    is_ap: bool,
) -> Result<u32, DpError> {
    let rnw = read as u64;
    let a = ((addr >> 2) & 0b11) as u64;
    let request = rnw | (a << 1);
    let _ = is_ap;

    let mut ack = 0u64;
    tap.tdi_tdo_seq(&mut ack, false, request, 3)?;
    ack_code(SwdAck::decode(ack as u8))?;

    let mut data_out = 0u64;
    tap.tdi_tdo_seq(&mut data_out, true, if read { 0 } else { value as u64 }, 32)?;
    Ok(if read { data_out as u32 } else { 0 })
}

fn jep106_from_raw(raw: u16) -> JEP106Code {
    let jep_id = (raw & 0x7F) as u8;
    let cc = ((raw >> 7) & 0xF) as u8;
    JEP106Code::new(cc, jep_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jep106_decode_arm() {
        // DPIDR designer field for ARM Ltd is JEP-106 0x23B (cc=4, id=0x3B).
        let code = jep106_from_raw(0x23B);
        assert_eq!(code.id, 0x3B);
        assert_eq!(code.cc, 4);
    }

    #[test]
    fn select_v5_reemits_only_on_change() {
        let mut select = Select::default();
        select.set_ap_sel(1);
        select.set_ap_bank_sel(0);
        let cached = select;
        assert_eq!(cached.ap_sel(), 1);
    }
}
