//! Flash region data model and the state machine's
//! per-region bookkeeping.

use crate::core::CoreAccess;
use crate::error::FlashError;

/// The operation a region is currently prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOperation {
    Idle,
    Read,
    Write,
    Erase,
    MassErase,
}

/// The staged write-in-progress block for a region: at most one may be
/// outstanding at a time.
#[derive(Debug, Clone)]
pub struct StagedBlock {
    pub block_start: u32,
    pub buffer: Vec<u8>,
    /// Bitmask (one bit per byte, up to 64 covered directly; beyond that a
    /// plain `Vec<bool>` would be used) is overkill here — the engine
    /// tracks "has this byte been written" with a parallel `Vec<bool>`
    /// since `writesize` varies per controller and can exceed 64 bytes.
    pub touched: Vec<bool>,
}

impl StagedBlock {
    fn new(block_start: u32, buffer: Vec<u8>) -> Self {
        let touched = vec![false; buffer.len()];
        StagedBlock {
            block_start,
            buffer,
            touched,
        }
    }
}

/// The four driver callbacks a Flash controller implements.
pub trait FlashController: std::any::Any {
    /// Downcast-safe accessor for test harnesses and diagnostics that need
    /// the concrete controller back; never cast a `dyn FlashController`
    /// through a raw pointer.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    fn prepare(&mut self, core: &mut dyn CoreAccess, region: &FlashRegion) -> Result<(), FlashError>;
    fn erase(
        &mut self,
        core: &mut dyn CoreAccess,
        region: &FlashRegion,
        sector_addr: u32,
    ) -> Result<(), FlashError>;
    fn write(
        &mut self,
        core: &mut dyn CoreAccess,
        region: &FlashRegion,
        addr: u32,
        data: &[u8],
    ) -> Result<(), FlashError>;
    fn done(&mut self, core: &mut dyn CoreAccess, region: &FlashRegion) -> Result<(), FlashError>;

    /// Read back existing contents so a partial-block write can preserve
    /// the bytes it does not touch. Flash is normally readable as
    /// ordinary memory over the debug bus regardless of programming
    /// lock state, so the default goes straight through the core; a
    /// controller whose part is not memory-mapped while unlocked may
    /// override this.
    fn read(
        &mut self,
        core: &mut dyn CoreAccess,
        _region: &FlashRegion,
        addr: u32,
        data: &mut [u8],
    ) -> Result<(), FlashError> {
        core.read_memory(addr, data)?;
        Ok(())
    }

    /// Not all controllers support a fast whole-region erase; absent an
    /// override the engine falls back to sector-by-sector `erase`.
    fn mass_erase(&mut self, _core: &mut dyn CoreAccess, _region: &FlashRegion) -> Result<bool, FlashError> {
        Ok(false)
    }

    /// Size in bytes of the physical sector containing `addr`, for
    /// vendors whose erase granularity is not uniform across a region
    /// (e.g. STM32F4's mixed 16/64/128 KiB sectors). Defaults to the
    /// region's nominal `blocksize`.
    fn sector_size(&self, region: &FlashRegion, _addr: u32) -> u32 {
        region.blocksize
    }
}

/// Contiguous Flash address range belonging to a target.
pub struct FlashRegion {
    pub start: u32,
    pub length: u32,
    pub blocksize: u32,
    pub writesize: u32,
    pub erased: u8,
    pub operation: FlashOperation,
    staged: Option<StagedBlock>,
    pub controller: Option<Box<dyn FlashController + Send>>,
}

impl std::fmt::Debug for FlashRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashRegion")
            .field("start", &self.start)
            .field("length", &self.length)
            .field("blocksize", &self.blocksize)
            .field("writesize", &self.writesize)
            .field("operation", &self.operation)
            .finish()
    }
}

impl FlashRegion {
    /// Construct a region with no controller attached yet; a probe
    /// function fills in `controller` after identifying the part.
    ///
    /// # Panics
    /// Panics if the region's alignment invariants do not hold:
    /// `blocksize % writesize == 0` and `length % blocksize == 0`.
    pub fn new(start: u32, length: u32, blocksize: u32, writesize: u32, erased: u8) -> Self {
        assert_eq!(blocksize % writesize, 0, "blocksize must be a multiple of writesize");
        assert_eq!(length % blocksize, 0, "length must be a multiple of blocksize");
        FlashRegion {
            start,
            length,
            blocksize,
            writesize,
            erased,
            operation: FlashOperation::Idle,
            staged: None,
            controller: None,
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.start.wrapping_add(self.length)
    }

    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    pub fn sector_base(&self, addr: u32) -> u32 {
        self.start + ((addr - self.start) / self.blocksize) * self.blocksize
    }

    /// Size of the real physical sector at `addr`, via the controller's
    /// [`FlashController::sector_size`] override when the region's erase
    /// granularity is not uniform.
    pub fn sector_size(&self, addr: u32) -> u32 {
        match &self.controller {
            Some(c) => c.sector_size(self, addr),
            None => self.blocksize,
        }
    }

    pub fn block_base(&self, addr: u32) -> u32 {
        self.start + ((addr - self.start) / self.writesize) * self.writesize
    }

    /// Run a controller callback without aliasing `&mut self`: the
    /// controller is taken out of its `Option` for the duration of the
    /// call and always restored, even on error.
    fn with_controller<R>(
        &mut self,
        f: impl FnOnce(&mut dyn FlashController, &Self) -> Result<R, FlashError>,
    ) -> Result<Option<R>, FlashError> {
        let mut controller = match self.controller.take() {
            Some(c) => c,
            None => return Ok(None),
        };
        let result = f(controller.as_mut(), self);
        self.controller = Some(controller);
        result.map(Some)
    }

    /// Idempotent prepare: a repeated `prepare(op)` without an
    /// intervening `done` is a no-op; a transition between two non-`Idle`
    /// operations is driven through `done` first.
    pub fn prepare(&mut self, core: &mut dyn CoreAccess, op: FlashOperation) -> Result<(), FlashError> {
        if self.operation == op {
            return Ok(());
        }
        if self.operation != FlashOperation::Idle {
            self.done(core)?;
        }
        self.with_controller(|controller, region| controller.prepare(&mut *core, region))?;
        self.operation = op;
        Ok(())
    }

    /// Flush any staged block and return the region to `Idle`. Safe to call repeatedly.
    pub fn done(&mut self, core: &mut dyn CoreAccess) -> Result<(), FlashError> {
        self.flush_staged(core)?;
        if self.operation == FlashOperation::Idle {
            return Ok(());
        }
        self.with_controller(|controller, region| controller.done(&mut *core, region))?;
        self.operation = FlashOperation::Idle;
        Ok(())
    }

    fn flush_staged(&mut self, core: &mut dyn CoreAccess) -> Result<(), FlashError> {
        let block = match self.staged.take() {
            Some(block) => block,
            None => return Ok(()),
        };
        if !block.touched.iter().any(|&t| t) {
            // Nothing was ever written into this block; shipping it would
            // just be a no-op program cycle of the read-back contents.
            return Ok(());
        }
        self.with_controller(|controller, region| {
            controller.write(&mut *core, region, block.block_start, &block.buffer)
        })?;
        Ok(())
    }

    /// Stage `data` at `addr`, flushing the previously staged block first
    /// if `addr` falls in a different `writesize`-aligned block. A freshly
    /// staged block is seeded with the block's existing contents (read
    /// back through the controller), so a partial write preserves every
    /// byte it does not itself touch.
    pub fn stage_write(&mut self, core: &mut dyn CoreAccess, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let block_start = self.block_base(addr);
        let needs_new_block = match &self.staged {
            Some(block) => block.block_start != block_start,
            None => true,
        };
        if needs_new_block {
            self.flush_staged(core)?;
            let mut buffer = vec![self.erased; self.writesize as usize];
            self.with_controller(|controller, region| controller.read(&mut *core, region, block_start, &mut buffer))?;
            self.staged = Some(StagedBlock::new(block_start, buffer));
        }
        let block = self.staged.as_mut().expect("just ensured present");
        let offset = (addr - block_start) as usize;
        for (i, byte) in data.iter().enumerate() {
            if offset + i >= block.buffer.len() {
                break;
            }
            block.buffer[offset + i] = *byte;
            block.touched[offset + i] = true;
        }
        Ok(())
    }

    pub fn has_staged_block(&self) -> bool {
        self.staged.is_some()
    }

    pub fn erase_sector(&mut self, core: &mut dyn CoreAccess, sector_addr: u32) -> Result<(), FlashError> {
        self.with_controller(|controller, region| controller.erase(&mut *core, region, sector_addr))?;
        Ok(())
    }

    /// Attempt the controller's fast whole-region erase. Returns
    /// `false` when the controller has no such override, leaving the
    /// sector-by-sector fallback to the caller.
    pub fn try_mass_erase(&mut self, core: &mut dyn CoreAccess) -> Result<bool, FlashError> {
        self.prepare(core, FlashOperation::MassErase)?;
        let handled = self
            .with_controller(|controller, region| controller.mass_erase(&mut *core, region))?
            .unwrap_or(false);
        self.done(core)?;
        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn rejects_writesize_not_dividing_blocksize() {
        FlashRegion::new(0x0800_0000, 0x10_0000, 0x400, 0x300, 0xFF);
    }

    #[test]
    #[should_panic]
    fn rejects_blocksize_not_dividing_length() {
        FlashRegion::new(0x0800_0000, 0x10_0300, 0x400, 0x100, 0xFF);
    }

    #[test]
    fn block_base_aligns_down_to_writesize() {
        let region = FlashRegion::new(0x0800_0000, 0x10_0000, 0x400, 0x100, 0xFF);
        assert_eq!(region.block_base(0x0800_0142), 0x0800_0100);
    }

    #[test]
    fn sector_base_aligns_down_to_blocksize() {
        let region = FlashRegion::new(0x0800_0000, 0x10_0000, 0x400, 0x100, 0xFF);
        assert_eq!(region.sector_base(0x0800_0550), 0x0800_0400);
    }
}
