//! MEM-AP memory interface: `mem_read`/`mem_write` with auto-increment and
//! TAR rearm.

use super::ap::{AccessPort, CSW_ADDRINC_SINGLE, CSW_SIZE_16, CSW_SIZE_32, CSW_SIZE_8};
use super::dp::DebugPort;
use crate::error::DpError;

/// The auto-increment window: `TAR` must be rearmed whenever a streamed
/// transfer would cross this boundary.
const AUTO_INCREMENT_WINDOW: u64 = 0x400;

/// Transfer size / in-lane byte alignment for a MEM-AP access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Bits8,
    Bits16,
    Bits32,
    /// Two consecutive 32-bit lanes; not a native CSW size, decomposed into
    /// two 32-bit transfers by the caller.
    Bits64,
}

impl Align {
    fn csw_size(self) -> u8 {
        match self {
            Align::Bits8 => CSW_SIZE_8,
            Align::Bits16 => CSW_SIZE_16,
            Align::Bits32 | Align::Bits64 => CSW_SIZE_32,
        }
    }

    fn byte_len(self) -> u32 {
        match self {
            Align::Bits8 => 1,
            Align::Bits16 => 2,
            Align::Bits32 => 4,
            Align::Bits64 => 8,
        }
    }
}

/// Read `len` bytes from `src_addr`, streaming through `DRW` with `CSW`
/// programmed once and `TAR` rearmed at each 1 KiB window crossing.
///
/// ADIv5 pipelines AP reads: the data phase of a `DRW` read carries the
/// *previous* issued read's result, not the one just requested. This loop
/// issues one `DRW` read per word and stores each returned value one word
/// behind the request that produced it, then drains the last outstanding
/// read via `RDBUFF` to recover the final word.
pub fn mem_read(
    ap: &mut AccessPort,
    dp: &mut DebugPort,
    dest: &mut [u8],
    src_addr: u32,
) -> Result<(), DpError> {
    if dest.is_empty() {
        return Ok(());
    }
    ap.set_csw(dp, CSW_SIZE_32, CSW_ADDRINC_SINGLE)?;

    let mut addr = src_addr as u64;
    ap.set_tar(dp, addr as u32)?;

    let word_count = dest.len().div_ceil(4);
    let store = |dest: &mut [u8], word_index: usize, word: u32| {
        let offset = word_index * 4;
        let chunk = &mut dest[offset..(offset + 4).min(dest.len())];
        chunk.copy_from_slice(&word.to_le_bytes()[..chunk.len()]);
    };

    for i in 0..word_count {
        if i != 0 && addr % AUTO_INCREMENT_WINDOW == 0 {
            ap.set_tar(dp, addr as u32)?;
        }
        let word = ap.read_drw(dp)?;
        if i > 0 {
            store(dest, i - 1, word);
        }
        addr += 4;
    }
    let last_word = dp.drain_read_buffer()?;
    store(dest, word_count - 1, last_word);
    Ok(())
}

/// Write `src` to `dest_addr`, honoring `align` for transfer size and
/// in-lane byte position on non-32-bit writes.
pub fn mem_write(
    ap: &mut AccessPort,
    dp: &mut DebugPort,
    dest_addr: u32,
    src: &[u8],
    align: Align,
) -> Result<(), DpError> {
    ap.set_csw(dp, align.csw_size(), CSW_ADDRINC_SINGLE)?;

    let step = align.byte_len().max(4) as usize;
    let mut addr = dest_addr as u64;
    let mut offset = 0usize;
    ap.set_tar(dp, addr as u32)?;

    while offset < src.len() {
        if addr % AUTO_INCREMENT_WINDOW == 0 && offset != 0 {
            ap.set_tar(dp, addr as u32)?;
        }
        let mut word = [0u8; 4];
        let n = step.min(4).min(src.len() - offset);
        word[..n].copy_from_slice(&src[offset..offset + n]);
        // For sub-word transfers the byte lane within the 32-bit word is
        // selected by the low bits of TAR, which the AP hardware honors
        // automatically once CSW.Size is set to a sub-word size.
        ap.write_drw(dp, u32::from_le_bytes(word))?;
        offset += n.max(1);
        addr += n.max(1) as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_byte_lengths() {
        assert_eq!(Align::Bits8.byte_len(), 1);
        assert_eq!(Align::Bits16.byte_len(), 2);
        assert_eq!(Align::Bits32.byte_len(), 4);
        assert_eq!(Align::Bits64.byte_len(), 8);
    }
}
