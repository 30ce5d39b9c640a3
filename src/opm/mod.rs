// Copyright 2025 Tyler Neely (tylerneely@gmail.com).
// Copyright 2021 Emilie Gillet (emilie.o.gillet@gmail.com)
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.
//
// See http://creativecommons.org/licenses/MIT/ for more information.

//! FM chip boundary.
//!
//! The engine only talks to the chip through [`OpmBackend`]: register
//! writes in, per channel stereo samples out. [`Ym2151`] is the bundled
//! software implementation. [`OpmBus`] pairs a backend with the register
//! shadow so that every write is recorded before it reaches the chip.

mod chip;
mod envelope;
mod lfo;
mod tables;

pub use chip::Ym2151;
pub use envelope::{Envelope, EnvelopeParams, EnvelopePhase};
pub use lfo::{Lfo, LfoWaveform};

use log::trace;

use crate::registers::{RegisterBus, RegisterFile};

/// Physical voices (channels) on the chip.
pub const CHANNELS: usize = 8;

/// Operators per channel.
pub const OPERATORS: usize = 4;

/// Interface every FM chip implementation provides to the engine.
///
/// Operators are addressed in register order M1, M2, C1, C2
/// (`base + channel + 8 * op`).
pub trait OpmBackend: Send {
    /// Return to power-on state: all keys off, all registers cleared.
    fn reset(&mut self);

    /// Write one chip register.
    fn write_register(&mut self, addr: u8, value: u8);

    /// Keyed operators of a channel in key-on bit order (bit 0 = M1,
    /// 1 = C1, 2 = M2, 3 = C2), i.e. bits 6..3 of register 0x08 shifted down.
    fn key_on_mask(&self, channel: usize) -> u8;

    /// Advance one output sample and return the (left, right) contribution of
    /// each channel.
    fn clock(&mut self) -> [(i32, i32); CHANNELS];

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Fill `out` with consecutive frames.
    fn generate_into(&mut self, out: &mut [[(i32, i32); CHANNELS]]) {
        for frame in out.iter_mut() {
            *frame = self.clock();
        }
    }
}

/// A chip together with its register shadow.
#[derive(Clone, Debug)]
pub struct OpmBus<C: OpmBackend> {
    shadow: RegisterFile,
    chip: C,
}

impl<C: OpmBackend> OpmBus<C> {
    /// Wrap a chip with an empty shadow.
    pub fn new(chip: C) -> Self {
        Self {
            shadow: RegisterFile::new(),
            chip,
        }
    }

    /// Reset both the chip and the shadow.
    pub fn reset(&mut self) {
        self.shadow.reset();
        self.chip.reset();
    }

    /// Register shadow.
    pub fn registers(&self) -> &RegisterFile {
        &self.shadow
    }

    /// Underlying chip.
    pub fn chip(&self) -> &C {
        &self.chip
    }

    /// Mutable access to the underlying chip, for rendering.
    pub fn chip_mut(&mut self) -> &mut C {
        &mut self.chip
    }
}

impl<C: OpmBackend> RegisterBus for OpmBus<C> {
    fn write(&mut self, addr: u8, value: u8) {
        self.shadow.write(addr, value);
        trace!("OPM: write {:#04x} = {:#04x}", addr, value);
        self.chip.write_register(addr, value);
    }

    fn read(&self, addr: u8) -> u8 {
        self.shadow.read(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that records every write, used to check shadow ordering.
    #[derive(Default)]
    struct Recorder {
        writes: Vec<(u8, u8)>,
    }

    impl OpmBackend for Recorder {
        fn reset(&mut self) {
            self.writes.clear();
        }
        fn write_register(&mut self, addr: u8, value: u8) {
            self.writes.push((addr, value));
        }
        fn key_on_mask(&self, _channel: usize) -> u8 {
            0
        }
        fn clock(&mut self) -> [(i32, i32); CHANNELS] {
            [(0, 0); CHANNELS]
        }
        fn sample_rate(&self) -> u32 {
            44100
        }
    }

    #[test]
    fn test_bus_shadows_every_write() {
        let mut bus = OpmBus::new(Recorder::default());
        bus.write(0x20, 0xC7);
        bus.write(0x28, 0x4A);
        assert_eq!(bus.read(0x20), 0xC7);
        assert_eq!(bus.registers().read(0x28), 0x4A);
        assert_eq!(bus.chip().writes, vec![(0x20, 0xC7), (0x28, 0x4A)]);

        bus.reset();
        assert_eq!(bus.read(0x20), 0);
        assert!(bus.chip().writes.is_empty());
    }

    #[test]
    fn test_generate_into_fills_frames() {
        let mut chip = Ym2151::new(4_000_000, 44100);
        let mut frames = vec![[(1, 1); CHANNELS]; 16];
        chip.generate_into(&mut frames);
        assert!(frames.iter().all(|f| f.iter().all(|&s| s == (0, 0))));
    }
}
