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

//! Shared low frequency oscillator.
//!
//! A single LFO drives pitch and amplitude modulation for all eight channels.
//! Its rate comes from LFRQ (register 0x18), the waveform from the low bits of
//! register 0x1B, and depths from AMD/PMD (register 0x19).

/// LFO waveform selected by register 0x1B bits 1..0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LfoWaveform {
    /// Falling sawtooth.
    Sawtooth = 0,
    /// Square.
    Square = 1,
    /// Triangle.
    Triangle = 2,
    /// Sample and hold noise.
    Noise = 3,
}

impl From<u8> for LfoWaveform {
    fn from(value: u8) -> Self {
        match value & 3 {
            0 => LfoWaveform::Sawtooth,
            1 => LfoWaveform::Square,
            2 => LfoWaveform::Triangle,
            _ => LfoWaveform::Noise,
        }
    }
}

/// Lowest LFO frequency (LFRQ = 0), in Hz.
const LFO_MIN_HZ: f32 = 0.008;

/// Highest LFO frequency (LFRQ = 255), in Hz.
const LFO_MAX_HZ: f32 = 52.9;

/// Frequency in Hz for an LFRQ register value. The curve is exponential.
pub fn lfrq_to_hz(lfrq: u8) -> f32 {
    let span = (LFO_MAX_HZ / LFO_MIN_HZ).ln();
    LFO_MIN_HZ * (span * lfrq as f32 / 255.0).exp()
}

/// LFO state.
#[derive(Clone, Debug)]
pub struct Lfo {
    phase: f32,
    delta: f32,
    waveform: LfoWaveform,
    /// Amplitude modulation depth, 0..127.
    pub amd: u8,
    /// Phase modulation depth, 0..127.
    pub pmd: u8,
    held: bool,
    rand_state: u32,
    noise: f32,
    sample_rate: f32,
}

impl Lfo {
    /// New LFO at LFRQ 0 with a sawtooth wave.
    pub fn new(sample_rate: f32) -> Self {
        let mut lfo = Self {
            phase: 0.0,
            delta: 0.0,
            waveform: LfoWaveform::Sawtooth,
            amd: 0,
            pmd: 0,
            held: false,
            rand_state: 0x21,
            noise: 0.0,
            sample_rate,
        };
        lfo.set_rate(0);
        lfo
    }

    /// Set the rate from an LFRQ register value.
    pub fn set_rate(&mut self, lfrq: u8) {
        self.delta = lfrq_to_hz(lfrq) / self.sample_rate;
    }

    /// Select the waveform.
    pub fn set_waveform(&mut self, waveform: LfoWaveform) {
        self.waveform = waveform;
    }

    /// Currently selected waveform.
    pub fn waveform(&self) -> LfoWaveform {
        self.waveform
    }

    /// Hold the LFO at phase zero while `held` is set (test register bit 1).
    pub fn set_reset(&mut self, held: bool) {
        self.held = held;
        if held {
            self.phase = 0.0;
        }
    }

    fn next_random(&mut self) -> f32 {
        self.rand_state = self
            .rand_state
            .wrapping_mul(1664525)
            .wrapping_add(1013904223);
        (self.rand_state >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Advance one sample.
    pub fn tick(&mut self) {
        if self.held {
            return;
        }
        self.phase += self.delta;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
            self.noise = self.next_random();
        }
    }

    /// Unipolar value in [0, 1] used for amplitude modulation.
    pub fn unipolar(&self) -> f32 {
        match self.waveform {
            LfoWaveform::Sawtooth => 1.0 - self.phase,
            LfoWaveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            LfoWaveform::Triangle => {
                if self.phase < 0.5 {
                    self.phase * 2.0
                } else {
                    2.0 - self.phase * 2.0
                }
            }
            LfoWaveform::Noise => self.noise,
        }
    }

    /// Bipolar value in [-1, 1] used for pitch modulation.
    pub fn bipolar(&self) -> f32 {
        self.unipolar() * 2.0 - 1.0
    }

    /// Amplitude modulation, scaled by AMD, in [0, 1].
    pub fn am(&self) -> f32 {
        self.unipolar() * self.amd as f32 / 127.0
    }

    /// Pitch modulation, scaled by PMD, in [-1, 1].
    pub fn pm(&self) -> f32 {
        self.bipolar() * self.pmd as f32 / 127.0
    }
}
