//! JTAG TAP sequencer.
//!
//! Generic implementations loop bit-by-bit; accelerated hosts may override
//! [`JtagTap::tdi_seq`]/[`JtagTap::tdi_tdo_seq`] with bulk transfers. The
//! contract in all cases: `final_tms` only takes effect on the last clock
//! cycle of the sequence, matching real TAP state-machine semantics (it
//! lets a caller fold the TAP's `Exit1-IR`/`Exit1-DR` transition into the
//! last data bit instead of issuing a separate TMS cycle).

use crate::error::TransportError;

/// Primitive bit-level operations of a JTAG TAP controller.
pub trait JtagTap: Send {
    /// Clock `count` bits of `tms_bits` into TMS, advancing the TAP state
    /// machine; TDI is held low throughout.
    fn tms_seq(&mut self, tms_bits: u32, count: usize) -> Result<(), TransportError>;

    /// Clock `bits` bits of `din` into TDI with TMS held low, except that on
    /// the final cycle TMS is driven to `final_tms`. `din`/`dout` are `u64`
    /// so a single shift can carry wider-than-32-bit DRs (e.g. the 41-bit
    /// RISC-V DMI register) without splitting the transaction.
    fn tdi_seq(&mut self, final_tms: bool, din: u64, bits: usize) -> Result<(), TransportError> {
        let mut out = 0u64;
        self.tdi_tdo_seq(&mut out, final_tms, din, bits)
    }

    /// As [`JtagTap::tdi_seq`], additionally capturing TDO into `*dout`.
    fn tdi_tdo_seq(
        &mut self,
        dout: &mut u64,
        final_tms: bool,
        din: u64,
        bits: usize,
    ) -> Result<(), TransportError> {
        let mut result = 0u64;
        for i in 0..bits {
            let tms = final_tms && i + 1 == bits;
            let tdi = (din >> i) & 1 != 0;
            let tdo = self.next(tms, tdi)?;
            if tdo {
                result |= 1 << i;
            }
        }
        *dout = result;
        Ok(())
    }

    /// Clock a single TCK cycle with the given TMS/TDI values, returning TDO.
    fn next(&mut self, tms: bool, tdi: bool) -> Result<bool, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// A fake TAP that shifts a fixed data-register contents back out,
    /// recording the TMS/TDI sequence it was driven with.
    struct FakeTap {
        dr: VecDeque<bool>,
        tms_log: Vec<bool>,
        tdi_log: Vec<bool>,
    }

    impl JtagTap for FakeTap {
        fn tms_seq(&mut self, _tms_bits: u32, _count: usize) -> Result<(), TransportError> {
            Ok(())
        }

        fn next(&mut self, tms: bool, tdi: bool) -> Result<bool, TransportError> {
            self.tms_log.push(tms);
            self.tdi_log.push(tdi);
            Ok(self.dr.pop_front().unwrap_or(false))
        }
    }

    #[test]
    fn final_tms_only_on_last_cycle() {
        let mut tap = FakeTap {
            dr: VecDeque::new(),
            tms_log: vec![],
            tdi_log: vec![],
        };
        tap.tdi_seq(true, 0b101, 3).unwrap();
        assert_eq!(tap.tms_log, vec![false, false, true]);
        assert_eq!(tap.tdi_log, vec![true, false, true]);
    }

    #[test]
    fn tdo_is_captured_lsb_first() {
        let mut tap = FakeTap {
            dr: VecDeque::from(vec![true, false, true, true]),
            tms_log: vec![],
            tdi_log: vec![],
        };
        let mut out = 0;
        tap.tdi_tdo_seq(&mut out, false, 0, 4).unwrap();
        assert_eq!(out, 0b1101);
    }
}
