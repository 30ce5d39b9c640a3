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

//! Four phase operator envelope (attack, first decay, second decay, release).
//!
//! Level is an attenuation in 0.09375 dB steps, 0 = loudest and
//! [`ATTENUATION_MAX`] = silent. Rates follow the chip's 0..63 effective rate
//! scale, where each step of 4 doubles the speed.

use super::tables::ATTENUATION_MAX;

/// Time for a full 96 dB decay at effective rate 60, in seconds.
const DECAY_TIME_RATE_60: f32 = 0.0082;

/// Attack is this much faster than a decay of the same rate.
const ATTACK_SPEEDUP: f32 = 6.0;

/// Offset used to shape the exponential attack curve.
const ATTACK_BIAS: f32 = 16.0;

/// Envelope phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopePhase {
    /// Rising toward full level.
    Attack,
    /// Falling toward the sustain level.
    Decay1,
    /// Falling from the sustain level while the key is held.
    Decay2,
    /// Falling after key off.
    Release,
    /// Silent.
    Off,
}

/// Envelope rates and sustain level as written to the chip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvelopeParams {
    /// Attack rate, 0..31.
    pub ar: u8,
    /// First decay rate, 0..31.
    pub d1r: u8,
    /// Second decay rate, 0..31.
    pub d2r: u8,
    /// Release rate, 0..15.
    pub rr: u8,
    /// First decay level, 0..15 (3 dB steps, 15 = silent).
    pub d1l: u8,
    /// Key scaling, 0..3.
    pub ks: u8,
}

/// Per operator envelope generator.
#[derive(Clone, Debug)]
pub struct Envelope {
    phase: EnvelopePhase,
    level: f32,
    sample_rate: f32,
}

/// Chip effective rate for a raw register rate, applying key scaling.
///
/// `raw` is already doubled for the 5-bit rates; `keycode` is the 5-bit
/// octave/note code of the channel.
pub fn effective_rate(raw: u32, ks: u8, keycode: u8) -> u32 {
    if raw == 0 {
        return 0;
    }
    let scaled = (keycode as u32) >> (3 - ks.min(3) as u32);
    (raw + scaled).min(63)
}

/// Seconds for a full-scale decay at the given effective rate.
fn decay_seconds(rate: u32) -> f32 {
    DECAY_TIME_RATE_60 * 2f32.powf((60.0 - rate as f32) / 4.0)
}

impl Envelope {
    /// New silent envelope.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            phase: EnvelopePhase::Off,
            level: ATTENUATION_MAX as f32,
            sample_rate,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> EnvelopePhase {
        self.phase
    }

    /// Current attenuation in 0.09375 dB steps.
    pub fn attenuation(&self) -> u32 {
        self.level as u32
    }

    /// Restart from the current level (the chip does not reset the level).
    pub fn key_on(&mut self) {
        self.phase = EnvelopePhase::Attack;
    }

    /// Enter release.
    pub fn key_off(&mut self) {
        if self.phase != EnvelopePhase::Off {
            self.phase = EnvelopePhase::Release;
        }
    }

    /// Force silence.
    pub fn reset(&mut self) {
        self.phase = EnvelopePhase::Off;
        self.level = ATTENUATION_MAX as f32;
    }

    fn decay_step(&self, rate: u32) -> f32 {
        if rate == 0 {
            return 0.0;
        }
        ATTENUATION_MAX as f32 / (decay_seconds(rate) * self.sample_rate)
    }

    /// Advance one sample.
    pub fn tick(&mut self, params: &EnvelopeParams, keycode: u8) {
        let max = ATTENUATION_MAX as f32;
        match self.phase {
            EnvelopePhase::Attack => {
                let rate = effective_rate(params.ar as u32 * 2, params.ks, keycode);
                if rate >= 62 {
                    self.level = 0.0;
                } else if rate > 0 {
                    let seconds = decay_seconds(rate) / ATTACK_SPEEDUP;
                    let span = ((max + ATTACK_BIAS) / ATTACK_BIAS).ln();
                    let k = 1.0 - (-span / (seconds * self.sample_rate)).exp();
                    self.level -= (self.level + ATTACK_BIAS) * k;
                }
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.phase = EnvelopePhase::Decay1;
                }
            }
            EnvelopePhase::Decay1 => {
                let sustain = if params.d1l >= 15 {
                    max
                } else {
                    params.d1l as f32 * 32.0
                };
                let rate = effective_rate(params.d1r as u32 * 2, params.ks, keycode);
                self.level += self.decay_step(rate);
                if self.level >= sustain {
                    self.level = sustain;
                    self.phase = EnvelopePhase::Decay2;
                }
            }
            EnvelopePhase::Decay2 => {
                let rate = effective_rate(params.d2r as u32 * 2, params.ks, keycode);
                self.level = (self.level + self.decay_step(rate)).min(max);
            }
            EnvelopePhase::Release => {
                let rate = effective_rate(params.rr as u32 * 4 + 2, params.ks, keycode);
                self.level += self.decay_step(rate);
                if self.level >= max {
                    self.level = max;
                    self.phase = EnvelopePhase::Off;
                }
            }
            EnvelopePhase::Off => {}
        }
    }
}
