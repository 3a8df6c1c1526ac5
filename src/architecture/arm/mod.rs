//! ADIv5/ADIv6 Debug Port + Access Port layer.

pub mod ap;
pub mod dp;
pub mod memory;
pub mod rom_table;
pub mod sequences;

pub use ap::{AccessPort, ApAddress};
pub use dp::{DebugPort, DebugPortVersion};
