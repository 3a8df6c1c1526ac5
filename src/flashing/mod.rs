//! The Flash-programming engine: region/controller data model, the
//! per-target erase/write/complete driver, RAM-resident stub execution,
//! JEDEC SFDP parsing, and the vendor controllers built on top of it all.

pub mod engine;
pub mod region;
pub mod sfdp;
pub mod stub;
pub mod vendor;

pub use engine::{target_flash_complete, target_flash_erase, target_flash_mass_erase, target_flash_write};
pub use region::{FlashController, FlashOperation, FlashRegion};
pub use stub::Stub;
