//! Error taxonomy for the debug-transport stack and Flash engine.
//!
//! Every layer gets its own error enum, composed upward into [`DebugError`].
//! This mirrors the way `probe-rs` layers `DapError` -> `ArmError` -> `Error`:
//! transport-layer errors propagate unchanged, higher layers add context.

use crate::flashing::region::FlashOperation;

/// The five-member exception taxonomy (kind-class, used by a GDB
/// front-end to pick an `E` response code; the core itself never matches
/// on this, only the caller does).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A polled wait exceeded its deadline.
    Timeout,
    /// MEM-AP fault or DP `ACK=FAULT`.
    BusFault,
    /// Unexpected ACK, bad IDR, malformed ROM table, parity mismatch.
    ProtocolError,
    /// The target Flash controller or core reported a failure.
    TargetError,
    /// An internal invariant was violated.
    LogicError,
}

/// Errors from the bit-level transport: SWD line, JTAG TAP, RVSWD.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum TransportError {
    /// the transport did not produce a response before the deadline
    Timeout,
    /// the underlying host I/O failed: {0}
    Io(String),
}

/// Errors from the Debug Port layer.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum DpError {
    /// the debug port did not leave WAIT state within the retry budget
    WaitTimeout,
    /// the debug port reported a FAULT acknowledgement
    Fault,
    /// the debug port reported an acknowledgement that is neither OK, WAIT nor FAULT: {0:#05b}
    ProtocolError(u8),
    /// the transport layer failed: {0}
    Transport(#[from] TransportError),
}

/// Errors from the Access Port layer and ROM-table walker.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum ApError {
    /// the debug port reported an error: {0}
    Dp(#[from] DpError),
    /// the ROM table at {0:#010x} is not a valid CoreSight component
    NotARomTable(u64),
    /// the ROM walker exceeded its recursion-depth bound of {0}
    RecursionLimitExceeded(u8),
    /// a power-requestable ROM table entry never asserted DBGPSR after DBGPCR was set
    PowerUpTimeout,
}

/// Errors from a core driver: Cortex-M, Cortex-A, RISC-V.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum CoreError {
    /// the access port layer failed: {0}
    Ap(#[from] ApError),
    /// no breakpoint/watchpoint unit is free
    NoResource,
    /// the RAM-resident stub did not signal completion before the deadline
    StubTimeout,
    /// the stub signalled completion with a non-zero status word: {0:#010x}
    StubFailed(u32),
    /// the RISC-V Debug Module Interface failed: {0}
    Dmi(#[from] TransportError),
    /// the RISC-V abstract command reported a nonzero `cmderr`: {0}
    AbstractCommandFailed(u8),
}

/// Errors from the Flash-programming engine.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum FlashError {
    /// address range {0:#010x}..{1:#010x} is not covered by any Flash region
    OutOfRange(u32, u32),
    /// erase of sector at {0:#010x} failed
    Erase(u32),
    /// programming of block at {0:#010x} failed
    Program(u32),
    /// verification of block at {0:#010x} failed
    Verify(u32),
    /// the Flash region at {0:#010x} is locked and no unlock sequence is registered
    Locked(u32),
    /// a region was asked to perform {0:?} without ever receiving `prepare`
    RegionNotPrepared(FlashOperation),
    /// the region's controller failed: {0}
    Core(#[from] CoreError),
}

/// Errors from SFDP parsing and external SPI-NOR access.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum SfdpError {
    /// the SFDP header did not start with the "SFDP" magic
    BadMagic,
    /// no JEDEC Basic SPI Parameter Table (ID 0xFF00) was found among the parameter headers
    BasicTableNotFound,
    /// the basic parameter table was too short to contain the fields this core reads
    TableTooShort,
    /// the SPI read callback failed
    SpiRead(#[from] CoreError),
}

/// The single top-level error type the public contract returns.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum DebugError {
    /// {0}
    Transport(#[from] TransportError),
    /// {0}
    Dp(#[from] DpError),
    /// {0}
    Ap(#[from] ApError),
    /// {0}
    Core(#[from] CoreError),
    /// {0}
    Flash(#[from] FlashError),
    /// {0}
    Sfdp(#[from] SfdpError),
    /// no vendor probe function claimed this part
    ProbeFailure,
    /// {0}
    Logic(&'static str),
}

impl From<DpError> for CoreError {
    fn from(err: DpError) -> Self {
        CoreError::Ap(ApError::Dp(err))
    }
}

impl DpError {
    fn kind(&self) -> ErrorKind {
        match self {
            DpError::WaitTimeout => ErrorKind::Timeout,
            DpError::Fault => ErrorKind::BusFault,
            DpError::ProtocolError(_) => ErrorKind::ProtocolError,
            DpError::Transport(_) => ErrorKind::ProtocolError,
        }
    }
}

impl CoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Ap(_) => ErrorKind::ProtocolError,
            CoreError::NoResource => ErrorKind::LogicError,
            CoreError::StubTimeout => ErrorKind::Timeout,
            CoreError::StubFailed(_) => ErrorKind::TargetError,
            CoreError::Dmi(TransportError::Timeout) => ErrorKind::Timeout,
            CoreError::Dmi(TransportError::Io(_)) => ErrorKind::ProtocolError,
            CoreError::AbstractCommandFailed(_) => ErrorKind::TargetError,
        }
    }
}

impl DebugError {
    /// Classify this error into the five-member kind taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DebugError::Transport(TransportError::Timeout) => ErrorKind::Timeout,
            DebugError::Transport(TransportError::Io(_)) => ErrorKind::ProtocolError,
            DebugError::Dp(e) => e.kind(),
            DebugError::Ap(ApError::Dp(e)) => e.kind(),
            DebugError::Ap(_) => ErrorKind::ProtocolError,
            DebugError::Core(e) => e.kind(),
            DebugError::Flash(_) => ErrorKind::TargetError,
            DebugError::Sfdp(_) => ErrorKind::ProtocolError,
            DebugError::ProbeFailure => ErrorKind::ProtocolError,
            DebugError::Logic(_) => ErrorKind::LogicError,
        }
    }
}
