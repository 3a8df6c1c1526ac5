//! RISC-V Debug Module Interface.

pub mod dmi;
