//! Debug-transport stack and target Flash-programming engine for an
//! on-probe ARM/RISC-V debugger: SWD/JTAG/RVSWD transport plumbing, the
//! ADIv5/ADIv6 DP/AP layer, Cortex-M/Cortex-A/RISC-V core drivers, and a
//! vendor-agnostic Flash engine with per-family controllers.
//!
//! This crate is the on-probe core: it owns no GPIO, USB, or network I/O
//! itself (see [`probe::TargetTransport`]) and exposes no GDB server; a
//! host platform supplies the transport and the wire protocol the core
//! talks over it.

pub mod architecture;
pub mod core;
pub mod error;
pub mod flashing;
pub mod probe;
pub mod session;
pub mod target;

pub use error::{DebugError, ErrorKind};
pub use session::Session;
pub use target::Target;
