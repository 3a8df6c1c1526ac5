//! Bit-level transport and the host-to-probe plug-in boundary.
//!
//! This module only describes *what a host platform must supply*; it holds
//! no GPIO or USB code itself (that lives behind the platform, out of
//! scope here). The shape mirrors `probe-rs`'s own `DebugProbe` / `SwdSequence`
//! split in `probe.rs` and `architecture/arm/communication_interface.rs`,
//! but collapsed to the three wire transports this core actually drives.

pub mod jtag;
pub mod rvswd;
pub mod swd;

pub use jtag::JtagTap;
pub use rvswd::RvswdLine;
pub use swd::SwdLine;

use crate::error::TransportError;

/// The wire protocol currently active on a given [`crate::architecture::arm::dp::DebugPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    /// Serial Wire Debug.
    Swd,
    /// JTAG.
    Jtag,
}

/// Everything a firmware platform (or a host-side commercial-probe driver)
/// must implement to let this core drive a target: `swd_line`, `jtag_tap`,
/// `rvswd_line`, plus the out-of-band pins.
///
/// Platforms implement this against GPIO/peripherals; host builds implement
/// it against a commercial probe's USB protocol. Neither is part of the
/// core.
pub trait TargetTransport: Send {
    /// Borrow the SWD line driver, if the probe currently speaks SWD.
    fn swd_line(&mut self) -> Option<&mut dyn SwdLine>;

    /// Borrow the JTAG TAP sequencer, if the probe currently speaks JTAG.
    fn jtag_tap(&mut self) -> Option<&mut dyn JtagTap>;

    /// Borrow the RVSWD line driver, if the probe supports the vendor
    /// two-wire RISC-V bus.
    fn rvswd_line(&mut self) -> Option<&mut dyn RvswdLine>;

    /// Switch the currently active wire protocol, if the probe is dual-mode.
    fn select_protocol(&mut self, protocol: WireProtocol) -> Result<(), TransportError>;

    /// Enable or disable the target clock output pin.
    fn target_clk_output_enable(&mut self, enable: bool) -> Result<(), TransportError>;

    /// Drive nRST low (`true`) or let it float/high (`false`).
    fn nrst_set(&mut self, asserted: bool) -> Result<(), TransportError>;

    /// Read back the current state of nRST.
    fn nrst_get(&mut self) -> Result<bool, TransportError>;

    /// Measured target supply voltages, in volts, if the probe can sense them.
    fn voltage_targets(&mut self) -> Result<Vec<f32>, TransportError>;
}
