//! RAM-resident Flash stubs: pre-assembled Thumb
//! blobs the engine loads into SRAM and runs through
//! [`CoreAccess::run_stub`] for controllers where MMIO programming from
//! the host is too slow (bulk STM32F1/F4 writes).
//!
//! The core only stores and runs these blobs; it never assembles them.

use crate::core::CoreAccess;
use crate::error::CoreError;

/// A stub blob plus the load address and stack it expects.
pub struct Stub {
    pub blob: &'static [u8],
    pub load_address: u32,
    pub stack_pointer: u32,
}

impl Stub {
    /// Run the stub with up to four arguments (destination, source,
    /// length, and a controller-specific fourth word), returning its
    /// status word.
    pub fn run(&self, core: &mut dyn CoreAccess, args: [u32; 4]) -> Result<u32, CoreError> {
        let status = core.run_stub(self.load_address, self.blob, self.stack_pointer, args)?;
        if status != 0 {
            return Err(CoreError::StubFailed(status));
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CoreRegisterAddress, CoreRegisters, CoreStatus};

    struct FakeCore {
        memory: [u8; 256],
        regs: [u32; 32],
        halted: bool,
    }

    struct FakeRegisters;
    impl CoreRegisters for FakeRegisters {
        fn program_counter(&self) -> CoreRegisterAddress {
            CoreRegisterAddress(15)
        }
        fn stack_pointer(&self) -> CoreRegisterAddress {
            CoreRegisterAddress(13)
        }
        fn return_address(&self) -> CoreRegisterAddress {
            CoreRegisterAddress(14)
        }
        fn argument_register(&self, index: u8) -> CoreRegisterAddress {
            CoreRegisterAddress(index as u16)
        }
    }

    impl CoreAccess for FakeCore {
        fn attach(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
        fn detach(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
        fn halt(&mut self) -> Result<(), CoreError> {
            self.halted = true;
            Ok(())
        }
        fn resume(&mut self) -> Result<(), CoreError> {
            // The stub "completes" as soon as it is resumed, simulating a
            // successful run without a real core behind it.
            self.halted = true;
            self.regs[0] = 0;
            Ok(())
        }
        fn step(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
        fn status(&mut self) -> Result<CoreStatus, CoreError> {
            Ok(if self.halted { CoreStatus::Halted } else { CoreStatus::Running })
        }
        fn read_core_reg(&mut self, addr: CoreRegisterAddress) -> Result<u32, CoreError> {
            Ok(self.regs[addr.0 as usize])
        }
        fn write_core_reg(&mut self, addr: CoreRegisterAddress, value: u32) -> Result<(), CoreError> {
            self.regs[addr.0 as usize] = value;
            Ok(())
        }
        fn read_memory(&mut self, addr: u32, data: &mut [u8]) -> Result<(), CoreError> {
            data.copy_from_slice(&self.memory[addr as usize..addr as usize + data.len()]);
            Ok(())
        }
        fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), CoreError> {
            self.memory[addr as usize..addr as usize + data.len()].copy_from_slice(data);
            Ok(())
        }
        fn set_breakpoint(&mut self, _addr: u32) -> Result<(), CoreError> {
            Ok(())
        }
        fn clear_breakpoint(&mut self, _addr: u32) -> Result<(), CoreError> {
            Ok(())
        }
        fn registers(&self) -> &dyn CoreRegisters {
            &FakeRegisters
        }
    }

    #[test]
    fn stub_runs_and_reports_success_status() {
        let mut core = FakeCore {
            memory: [0; 256],
            regs: [0; 32],
            halted: false,
        };
        let stub = Stub {
            blob: &[0x00, 0xBF], // NOP; never actually executed by the fake
            load_address: 0x10,
            stack_pointer: 0x80,
        };
        let status = stub.run(&mut core, [1, 2, 3, 4]).unwrap();
        assert_eq!(status, 0);
        assert_eq!(&core.memory[0x10..0x12], stub.blob);
    }

    #[test]
    fn nonzero_status_is_reported_as_stub_failed() {
        let stub = Stub {
            blob: &[0x00, 0xBF],
            load_address: 0x10,
            stack_pointer: 0x80,
        };
        // A core whose r0 settles on a nonzero value once halted.
        struct AlwaysFails;
        impl CoreAccess for AlwaysFails {
            fn attach(&mut self) -> Result<(), CoreError> {
                Ok(())
            }
            fn detach(&mut self) -> Result<(), CoreError> {
                Ok(())
            }
            fn halt(&mut self) -> Result<(), CoreError> {
                Ok(())
            }
            fn resume(&mut self) -> Result<(), CoreError> {
                Ok(())
            }
            fn step(&mut self) -> Result<(), CoreError> {
                Ok(())
            }
            fn status(&mut self) -> Result<CoreStatus, CoreError> {
                Ok(CoreStatus::Halted)
            }
            fn read_core_reg(&mut self, _addr: CoreRegisterAddress) -> Result<u32, CoreError> {
                Ok(0xDEAD_BEEF)
            }
            fn write_core_reg(&mut self, _addr: CoreRegisterAddress, _value: u32) -> Result<(), CoreError> {
                Ok(())
            }
            fn read_memory(&mut self, _addr: u32, _data: &mut [u8]) -> Result<(), CoreError> {
                Ok(())
            }
            fn write_memory(&mut self, _addr: u32, _data: &[u8]) -> Result<(), CoreError> {
                Ok(())
            }
            fn set_breakpoint(&mut self, _addr: u32) -> Result<(), CoreError> {
                Ok(())
            }
            fn clear_breakpoint(&mut self, _addr: u32) -> Result<(), CoreError> {
                Ok(())
            }
            fn registers(&self) -> &dyn CoreRegisters {
                &FakeRegisters
            }
        }
        let mut core = AlwaysFails;
        let err = stub.run(&mut core, [0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CoreError::StubFailed(0xDEAD_BEEF)));
    }
}
