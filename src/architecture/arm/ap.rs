//! Access-Port layer.
//!
//! An [`AccessPort`] is a handle within a [`super::dp::DebugPort`]; it
//! exclusively references its DP (the DP outlives all its APs) and is
//! shared by zero or more targets through a refcount.

use bitfield::bitfield;

use super::dp::DebugPort;
use crate::error::DpError;

/// How an AP is addressed: an 8-bit selector for ADIv5, or a 64-bit base
/// address for ADIv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApAddress {
    /// ADIv5 `APSEL`.
    V5(u8),
    /// ADIv6 64-bit AP base address.
    V6(u64),
}

bitfield! {
    /// `IDR` — identifies the AP class/type/designer.
    #[derive(Clone, Copy)]
    pub struct Idr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u16, designer, _: 27, 17;
    pub u8, class, _: 16, 13;
    pub u8, variant, _: 7, 4;
    pub u8, ap_type, _: 3, 0;
}

bitfield! {
    /// `CSW` — Control/Status Word for a MEM-AP.
    #[derive(Clone, Copy, Default)]
    pub struct Csw(u32);
    impl Debug;
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    pub u8, prot, set_prot: 30, 24;
    pub spiden, set_spiden: 23;
    pub u8, mode, set_mode: 11, 8;
    pub addr_inc, set_addr_inc: 5, 4;
    pub device_en, _: 6;
    pub u8, size, set_size: 2, 0;
}

/// MEM-AP `CSW.Size` field values.
pub const CSW_SIZE_8: u8 = 0b000;
pub const CSW_SIZE_16: u8 = 0b001;
pub const CSW_SIZE_32: u8 = 0b010;

/// MEM-AP `CSW.AddrInc` field values.
pub const CSW_ADDRINC_OFF: u8 = 0b00;
pub const CSW_ADDRINC_SINGLE: u8 = 0b01;
pub const CSW_ADDRINC_PACKED: u8 = 0b10;

const AP_REG_CSW: u8 = 0x00;
const AP_REG_TAR: u8 = 0x04;
const AP_REG_DRW: u8 = 0x0C;
const AP_REG_IDR: u8 = 0xFC;
const AP_REG_BASE: u8 = 0xF8;

/// A handle within a DP.
pub struct AccessPort {
    pub address: ApAddress,
    pub idr: Idr,
    pub csw_cache: Csw,
    pub base_address: u64,
    pub cfg: u32,
    refcount: u32,
}

impl AccessPort {
    /// Probe and construct the AP at `address`, reading `IDR`, `CSW`, and
    /// `BASE`.
    pub fn new(dp: &mut DebugPort, address: ApAddress) -> Result<Self, DpError> {
        select(dp, address)?;
        // ADIv5 pipelines AP reads: the data phase of a read carries the
        // *previous* read's result, not this one's. These three reads are
        // shifted by one accordingly, with the last retrieved through an
        // explicit RDBUFF drain.
        dp.read(AP_REG_IDR, true)?;
        let idr = Idr(dp.read(AP_REG_CSW, true)?);
        let csw = Csw(dp.read(AP_REG_BASE, true)?);
        let base_lo = dp.drain_read_buffer()?;
        let base_address = base_lo as u64 & 0xFFFF_F000;

        Ok(AccessPort {
            address,
            idr,
            csw_cache: csw,
            base_address,
            cfg: 0,
            refcount: 0,
        })
    }

    /// Increment the reference count. Called whenever a [`crate::target::Target`]
    /// starts sharing this AP.
    pub fn acquire(&mut self) {
        self.refcount += 1;
    }

    /// Decrement the reference count, returning `true` if it reached zero
    /// (the AP may now be torn down, but only once the owning DP itself is
    /// torn down).
    pub fn release(&mut self) -> bool {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount == 0
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Raw, unauthenticated register read on this AP.
    pub fn read_register(&self, dp: &mut DebugPort, reg: u8) -> Result<u32, DpError> {
        select(dp, self.address)?;
        dp.read(reg, true)
    }

    /// Raw, unauthenticated register write on this AP.
    pub fn write_register(&mut self, dp: &mut DebugPort, reg: u8, value: u32) -> Result<(), DpError> {
        select(dp, self.address)?;
        dp.write(reg, value, true)
    }

    /// Program `CSW` once for a run of memory accesses (size + auto-
    /// increment), caching the value so repeated calls with the same
    /// settings are a no-op.
    pub fn set_csw(&mut self, dp: &mut DebugPort, size: u8, addr_inc: u8) -> Result<(), DpError> {
        let mut csw = self.csw_cache;
        if csw.size() == size && csw.addr_inc() == addr_inc {
            return Ok(());
        }
        csw.set_size(size);
        csw.set_addr_inc(addr_inc);
        self.write_register(dp, AP_REG_CSW, csw.0)?;
        self.csw_cache = csw;
        Ok(())
    }

    pub fn set_tar(&mut self, dp: &mut DebugPort, addr: u32) -> Result<(), DpError> {
        self.write_register(dp, AP_REG_TAR, addr)
    }

    pub fn read_drw(&mut self, dp: &mut DebugPort) -> Result<u32, DpError> {
        self.read_register(dp, AP_REG_DRW)
    }

    pub fn write_drw(&mut self, dp: &mut DebugPort, value: u32) -> Result<(), DpError> {
        self.write_register(dp, AP_REG_DRW, value)
    }
}

fn select(dp: &mut DebugPort, address: ApAddress) -> Result<(), DpError> {
    match address {
        ApAddress::V5(sel) => dp.select_ap_v5(sel, 0),
        ApAddress::V6(base) => dp.select_ap_v6(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csw_size_roundtrip() {
        let mut csw = Csw::default();
        csw.set_size(CSW_SIZE_32);
        csw.set_addr_inc(CSW_ADDRINC_SINGLE);
        assert_eq!(csw.size(), CSW_SIZE_32);
        assert_eq!(csw.addr_inc(), CSW_ADDRINC_SINGLE);
    }

    #[test]
    fn refcount_release_at_zero() {
        let mut ap = AccessPort {
            address: ApAddress::V5(0),
            idr: Idr(0),
            csw_cache: Csw::default(),
            base_address: 0,
            cfg: 0,
            refcount: 0,
        };
        ap.acquire();
        ap.acquire();
        assert!(!ap.release());
        assert!(ap.release());
    }
}
