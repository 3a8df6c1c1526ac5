//! JEDEC SFDP parsing for external SPI-NOR Flash.
//!
//! Given a host-supplied `spi_read` callback, reads the SFDP header at
//! offset 0, finds the Basic SPI Parameter Table (ID `0xFF00`), and
//! derives `{capacity_bytes, page_size, sector_size, sector_erase_opcode}`.

use crate::error::{CoreError, SfdpError};

const SFDP_MAGIC: [u8; 4] = *b"SFDP";
const BASIC_TABLE_ID: u8 = 0xFF;

/// Derived SPI-NOR geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfdpDescriptor {
    pub capacity_bytes: u64,
    pub page_size: u32,
    pub sector_size: u32,
    pub sector_erase_opcode: u8,
}

/// A host callback bridging SFDP/SPI-NOR reads to whatever bus (QSPI MMIO,
/// bit-banged SPI, ...) the target exposes.
pub trait SpiRead {
    fn spi_read(&mut self, cmd: u8, addr: u32, buf: &mut [u8]) -> Result<(), CoreError>;
}

const SFDP_READ_CMD: u8 = 0x5A;

/// Parse the SFDP table behind `spi`, picking the JEDEC Basic Parameter
/// Table if more than one vendor-specific table is present.
pub fn parse(spi: &mut dyn SpiRead) -> Result<SfdpDescriptor, SfdpError> {
    let mut header = [0u8; 8];
    spi.spi_read(SFDP_READ_CMD, 0, &mut header)?;
    if header[0..4] != SFDP_MAGIC {
        return Err(SfdpError::BadMagic);
    }
    let minor_version = header[4];
    let num_param_headers = header[6] as u32 + 1;

    let mut basic_table_ptr = None;
    for i in 0..num_param_headers {
        let mut param_header = [0u8; 8];
        spi.spi_read(SFDP_READ_CMD, 8 + i * 8, &mut param_header)?;
        let id_lsb = param_header[0];
        let id_msb = param_header[7];
        if id_lsb == BASIC_TABLE_ID && id_msb == 0xFF {
            let table_pointer =
                u32::from_le_bytes([param_header[4], param_header[5], param_header[6], 0]);
            basic_table_ptr = Some(table_pointer);
            break;
        }
    }
    let table_ptr = basic_table_ptr.ok_or(SfdpError::BasicTableNotFound)?;

    let mut table = [0u8; 36];
    spi.spi_read(SFDP_READ_CMD, table_ptr, &mut table)?;

    let dword2 = u32::from_le_bytes([table[4], table[5], table[6], table[7]]);

    let capacity_bytes = if dword2 & 0x8000_0000 != 0 {
        let n = dword2 & 0x7FFF_FFFF;
        1u64 << n
    } else {
        (dword2 as u64 + 1) / 8
    };

    // Erase type 1 is the smallest-granularity erase, conventionally the
    // 4 KiB sector erase; its opcode and size-exponent live in dword8.
    let dword8 = u32::from_le_bytes([table[28], table[29], table[30], table[31]]);
    let sector_size_exp = (dword8 & 0xFF) as u32;
    let sector_erase_opcode = ((dword8 >> 8) & 0xFF) as u8;
    let sector_size = if sector_size_exp == 0 {
        4096
    } else {
        1u32 << sector_size_exp
    };

    // The page-size field lives in dword11, added to the Basic Parameter
    // Table by JESD216A; this 36-byte (9-dword) read predates it, so page
    // size is always the pre-JESD216A default of 256 bytes here.
    let _ = minor_version;
    let page_size = 256;

    Ok(SfdpDescriptor {
        capacity_bytes,
        page_size,
        sector_size,
        sector_erase_opcode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A fake SPI-NOR backed by a byte buffer, mimicking a flat memory-
    /// mapped SFDP read.
    struct FakeFlash {
        data: Vec<u8>,
    }

    impl SpiRead for FakeFlash {
        fn spi_read(&mut self, _cmd: u8, addr: u32, buf: &mut [u8]) -> Result<(), CoreError> {
            let addr = addr as usize;
            buf.copy_from_slice(&self.data[addr..addr + buf.len()]);
            Ok(())
        }
    }

    /// Build a minimal, canonical SFDP image describing a Winbond-class
    /// 2 MiB part: 4 KiB sectors erased with `0x20`, 256-byte pages.
    fn winbond_like_sfdp() -> Vec<u8> {
        let mut data = vec![0u8; 16 + 36];
        data[0..4].copy_from_slice(b"SFDP");
        data[4] = 0x00; // minor version (pre-JESD216A in this fixture)
        data[5] = 0x01; // major version
        data[6] = 0x00; // NPH = 0 -> one parameter header

        // Parameter header at offset 8: JEDEC basic table, 9 DWORDs,
        // pointer = 16.
        data[8] = 0xFF; // id lsb
        data[15] = 0xFF; // id msb

        let table_ptr = 16u32;
        data[12] = (table_ptr & 0xFF) as u8;
        data[13] = ((table_ptr >> 8) & 0xFF) as u8;
        data[14] = ((table_ptr >> 16) & 0xFF) as u8;

        // Basic table dword2: capacity = 2 MiB - 1 bits (N such that size
        // = N+1 bits) when high bit is clear.
        let capacity_bits: u32 = 2 * 1024 * 1024 * 8 - 1;
        data[16 + 4..16 + 8].copy_from_slice(&capacity_bits.to_le_bytes());

        // dword8 (offset 16+28): sector erase opcode 0x20, size exponent
        // 12 (4096 bytes).
        let dword8 = (0x20u32 << 8) | 12;
        data[16 + 28..16 + 32].copy_from_slice(&dword8.to_le_bytes());

        data
    }

    #[test]
    fn s6_sfdp_parse_yields_winbond_geometry() {
        let mut flash = FakeFlash { data: winbond_like_sfdp() };
        let descriptor = parse(&mut flash).unwrap();
        assert_eq!(descriptor.capacity_bytes, 2 * 1024 * 1024);
        assert_eq!(descriptor.page_size, 256);
        assert_eq!(descriptor.sector_size, 4096);
        assert_eq!(descriptor.sector_erase_opcode, 0x20);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut flash = FakeFlash { data: vec![0u8; 64] };
        assert!(matches!(parse(&mut flash), Err(SfdpError::BadMagic)));
    }
}
