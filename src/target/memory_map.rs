//! Memory-map assembler: drivers call `add_ram`/`add_flash` during
//! probe, and this module also produces the GDB XML memory-map string a
//! front-end wants at attach time.

use std::fmt::Write as _;

use super::Target;
use crate::flashing::region::FlashRegion;

/// A contiguous RAM range.
#[derive(Debug, Clone, Copy)]
pub struct RamRegion {
    pub start: u32,
    pub length: u32,
}

/// Append a RAM region to the target's list.
pub fn add_ram(target: &mut Target, base: u32, len: u32) {
    target.ram_regions.push(RamRegion { start: base, length: len });
}

/// Append a Flash region to the target's list.
pub fn add_flash(target: &mut Target, region: FlashRegion) {
    target.flash_regions.push(region);
}

/// Build the `<memory-map>` XML GDB expects from `qXfer:memory-map:read`.
///
/// This does not participate in any hard invariant; it only reads the
/// region lists the probe layer already assembled.
pub fn gdb_memory_map_xml(target: &Target) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?><memory-map>");
    for ram in &target.ram_regions {
        let _ = write!(
            xml,
            "<memory type=\"ram\" start=\"{:#x}\" length=\"{:#x}\"/>",
            ram.start, ram.length
        );
    }
    for flash in &target.flash_regions {
        let _ = write!(
            xml,
            "<memory type=\"flash\" start=\"{:#x}\" length=\"{:#x}\"><property name=\"blocksize\">{:#x}</property></memory>",
            flash.start, flash.length, flash.blocksize
        );
    }
    xml.push_str("</memory-map>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreKind;
    use crate::flashing::region::{FlashOperation, FlashRegion};

    #[test]
    fn memory_map_lists_ram_and_flash_entries() {
        let mut target = Target::new("test", CoreKind::CortexM4);
        add_ram(&mut target, 0x2000_0000, 0x1_0000);
        add_flash(
            &mut target,
            FlashRegion::new(0x0800_0000, 0x10_0000, 0x400, 0x100, 0xFF),
        );
        let xml = gdb_memory_map_xml(&target);
        assert!(xml.contains("type=\"ram\""));
        assert!(xml.contains("type=\"flash\""));
        assert!(xml.contains("0x20000000"));
        let _ = FlashOperation::Idle;
    }
}
