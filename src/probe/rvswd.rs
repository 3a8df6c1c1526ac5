//! RVSWD: vendor two-wire debug bus used by some RISC-V parts.
//!
//! A transaction is `(start, 7-bit host addr, 32-bit host data, 2-bit op,
//! 1-bit odd parity over the three, read 7-bit target addr, 32-bit target
//! data, 2-bit status, 1-bit target parity, stop)`. Parity mismatches are
//! logged but do not currently fail the transfer — preserved here as
//! "log and continue", with a `strict` flag a caller can set to turn it
//! into a hard error instead.

use crate::error::TransportError;

/// The 2-bit RVSWD operation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RvswdOp {
    /// `0b00`
    Nop,
    /// `0b01`
    Read,
    /// `0b10`
    Write,
    /// `0b11`, reserved.
    Reserved,
}

impl RvswdOp {
    fn encode(self) -> u32 {
        match self {
            RvswdOp::Nop => 0b00,
            RvswdOp::Read => 0b01,
            RvswdOp::Write => 0b10,
            RvswdOp::Reserved => 0b11,
        }
    }
}

/// The 2-bit RVSWD status field returned by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RvswdStatus {
    /// Operation completed successfully.
    Success,
    /// Operation still in progress, retry.
    Busy,
    /// Anything else.
    Other(u8),
}

impl RvswdStatus {
    fn decode(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => RvswdStatus::Success,
            0b11 => RvswdStatus::Busy,
            other => RvswdStatus::Other(other as u8),
        }
    }
}

/// Result of one completed RVSWD transaction.
#[derive(Debug, Clone, Copy)]
pub struct RvswdResult {
    /// Target-echoed address field.
    pub addr: u8,
    /// Target-returned data field.
    pub data: u32,
    /// Target-reported status.
    pub status: RvswdStatus,
    /// Whether the parity bits (host-sent and target-echoed) agreed.
    pub parity_ok: bool,
}

/// Odd-parity XOR of the three transaction fields:
/// `parity_of(addr) XOR parity_of(data) XOR parity_of(op)`.
pub fn transaction_parity(addr: u8, data: u32, op: RvswdOp) -> bool {
    (addr as u32).count_ones() % 2 == 1
        ^ (data.count_ones() % 2 == 1)
        ^ (op.encode().count_ones() % 2 == 1)
}

/// Primitive bit-level operations of the RVSWD line.
pub trait RvswdLine: Send {
    /// Drive the two-wire START condition.
    fn start(&mut self) -> Result<(), TransportError>;

    /// Drive the two-wire STOP condition.
    fn stop(&mut self) -> Result<(), TransportError>;

    /// Shift `bits` bits in, LSB-first.
    fn seq_in(&mut self, bits: usize) -> Result<u32, TransportError>;

    /// Shift the low `bits` bits of `data` out, LSB-first.
    fn seq_out(&mut self, data: u32, bits: usize) -> Result<(), TransportError>;

    /// The wakeup sequence: 100 cycles of DIO=1 followed by a STOP. Must be
    /// issued once before the first DMI transaction after reset.
    fn wakeup(&mut self) -> Result<(), TransportError> {
        self.seq_out(0xFFFF_FFFF, 32)?;
        self.seq_out(0xFFFF_FFFF, 32)?;
        self.seq_out(0b1111_1111_1111_1111_1111, 20)?;
        self.stop()
    }

    /// Run one full DMI transaction and return the target's reply.
    ///
    /// `strict` turns a parity mismatch into a hard [`TransportError`]
    /// instead of the default "log and continue" behavior.
    fn dmi_transaction(
        &mut self,
        host_addr: u8,
        host_data: u32,
        op: RvswdOp,
        strict: bool,
    ) -> Result<RvswdResult, TransportError> {
        self.start()?;
        self.seq_out(host_addr as u32, 7)?;
        self.seq_out(host_data, 32)?;
        self.seq_out(op.encode(), 2)?;
        let host_parity = transaction_parity(host_addr, host_data, op);
        self.seq_out(host_parity as u32, 1)?;

        let target_addr = self.seq_in(7)? as u8;
        let target_data = self.seq_in(32)?;
        let status_bits = self.seq_in(2)?;
        let target_parity_bit = self.seq_in(1)? != 0;
        self.stop()?;

        let status = RvswdStatus::decode(status_bits);
        let expected_parity =
            transaction_parity(target_addr, target_data, RvswdOp::decode_status(status));
        let parity_ok = expected_parity == target_parity_bit;

        if strict && !parity_ok {
            tracing::warn!("RVSWD parity mismatch on transaction to {host_addr:#04x}, failing (strict mode)");
            return Err(TransportError::Io("RVSWD parity mismatch".into()));
        }
        if !parity_ok {
            tracing::warn!(
                "RVSWD parity mismatch on transaction to {host_addr:#04x}, continuing anyway"
            );
        }

        Ok(RvswdResult {
            addr: target_addr,
            data: target_data,
            status,
            parity_ok,
        })
    }
}

impl RvswdOp {
    /// The 2-bit status field encodes op for parity purposes as `Nop` (the
    /// wire format reuses the op-field's position but the target only ever
    /// reflects a status code there, not an op); parity is still computed
    /// over the same bit layout the host used.
    fn decode_status(_status: RvswdStatus) -> Self {
        RvswdOp::Nop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_host_parity_matches_worked_example() {
        // S5: DMI-write to address 0x10, value 0xDEAD_BEEF.
        let parity = transaction_parity(0x10, 0xDEAD_BEEF, RvswdOp::Write);
        let expected = (0x10u8.count_ones() % 2 == 1)
            ^ (0xDEAD_BEEFu32.count_ones() % 2 == 1)
            ^ (RvswdOp::Write.encode().count_ones() % 2 == 1);
        assert_eq!(parity, expected);
    }

    #[test]
    fn status_decode() {
        assert_eq!(RvswdStatus::decode(0b00), RvswdStatus::Success);
        assert_eq!(RvswdStatus::decode(0b11), RvswdStatus::Busy);
        assert_eq!(RvswdStatus::decode(0b01), RvswdStatus::Other(0b01));
    }
}
