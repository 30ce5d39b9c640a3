//! YM2151 register shadow.
//!
//! Every value sent to the chip is recorded here first so that partial
//! updates (for example changing CON while keeping the RL output bits of
//! register `0x20+ch`) can read back what was last written.

/// Number of addressable chip registers.
pub const REGISTER_COUNT: usize = 256;

/// Something that accepts chip register writes and can read them back.
pub trait RegisterBus {
    /// Write `value` to register `addr`.
    fn write(&mut self, addr: u8, value: u8);

    /// Last value written to register `addr`.
    fn read(&self, addr: u8) -> u8;
}

/// Flat array of the 256 chip registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterFile {
    regs: [u8; REGISTER_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    /// Create a register file with every register cleared.
    pub fn new() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
        }
    }

    /// Clear every register to zero.
    pub fn reset(&mut self) {
        self.regs = [0; REGISTER_COUNT];
    }

    /// Raw view of all registers.
    pub fn as_slice(&self) -> &[u8] {
        &self.regs
    }
}

impl RegisterBus for RegisterFile {
    #[inline]
    fn write(&mut self, addr: u8, value: u8) {
        self.regs[addr as usize] = value;
    }

    #[inline]
    fn read(&self, addr: u8) -> u8 {
        self.regs[addr as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_back() {
        let mut regs = RegisterFile::new();
        regs.write(0x20, 0xC4);
        regs.write(0xFF, 0x7F);
        assert_eq!(regs.read(0x20), 0xC4);
        assert_eq!(regs.read(0xFF), 0x7F);
        assert_eq!(regs.read(0x21), 0);

        regs.reset();
        assert!(regs.as_slice().iter().all(|&r| r == 0));
    }
}
