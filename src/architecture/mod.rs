//! Architecture-specific transport layers: ARM ADIv5/ADIv6 and RISC-V DMI.

pub mod arm;
pub mod riscv;
