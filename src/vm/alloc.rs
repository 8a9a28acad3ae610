//! Compile-time model of the VM's scratch register bank.
//!
//! Register 0 is the accumulator and never passes through the allocator.
//! The 255 scratch registers 1..=255 are tracked as a bitset; bit `i`
//! stands for register `i + 1`.

use super::CompileError;

/// Number of scratch registers available to the compiler.
pub const SCRATCH_REGISTERS: usize = 255;

const WORDS: usize = SCRATCH_REGISTERS.div_ceil(64);

#[derive(Debug, Clone, Default)]
pub struct RegisterAllocator {
    used: [u64; WORDS],
}

impl RegisterAllocator {
    pub fn new() -> Self {
        RegisterAllocator { used: [0; WORDS] }
    }

    /// Claim the lowest free scratch register.
    pub fn allocate(&mut self) -> Result<u8, CompileError> {
        for (w, word) in self.used.iter_mut().enumerate() {
            let bit = (!*word).trailing_zeros() as usize;
            if bit == 64 {
                continue;
            }
            let slot = w * 64 + bit;
            if slot >= SCRATCH_REGISTERS {
                break;
            }
            *word |= 1 << bit;
            return Ok((slot + 1) as u8);
        }
        Err(CompileError::NoFreeRegisters)
    }

    /// Return a register obtained from [`allocate`](Self::allocate).
    ///
    /// Releasing a register that is not in use means the compiler lost
    /// track of its own allocations.
    pub fn release(&mut self, register: u8) -> Result<(), CompileError> {
        if register == 0 {
            debug_assert!(false, "accumulator released through the allocator");
            return Err(CompileError::RegisterNotAllocated { register });
        }
        if !self.is_allocated(register) {
            debug_assert!(false, "register r{register} released twice or never allocated");
            return Err(CompileError::RegisterNotAllocated { register });
        }
        let slot = register as usize - 1;
        self.used[slot / 64] &= !(1 << (slot % 64));
        Ok(())
    }

    pub fn is_allocated(&self, register: u8) -> bool {
        if register == 0 {
            return false;
        }
        let slot = register as usize - 1;
        self.used[slot / 64] & (1 << (slot % 64)) != 0
    }

    /// Registers currently held.
    pub fn in_use(&self) -> usize {
        self.used.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True when every scratch register has been released.
    pub fn is_clear(&self) -> bool {
        self.used.iter().all(|w| *w == 0)
    }
}
