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

//! YM2151 (OPM) emulation.
//!
//! Models the register map, the eight connection algorithms, M1 feedback,
//! the four phase envelope and the shared LFO. Output is per channel so that
//! the mixer can apply per instrument pan. Timing is sample based rather than
//! cycle exact.

use log::trace;

use super::envelope::{Envelope, EnvelopeParams, EnvelopePhase};
use super::lfo::{Lfo, LfoWaveform};
use super::tables::{attenuation_to_gain, sin_cycles, ATTENUATION_MAX};
use super::{OpmBackend, CHANNELS, OPERATORS};

/// Reference clock at which key code A4 is exactly 440 Hz.
const REFERENCE_CLOCK: f64 = 3_579_545.0;

/// Semitone offset inside the octave for each 4-bit note code. Codes 3, 7,
/// 11 and 15 are unused on the chip and alias their lower neighbour.
const NOTE_CODE_SEMITONE: [u8; 16] = [0, 1, 2, 2, 3, 4, 5, 5, 6, 7, 8, 8, 9, 10, 11, 11];

/// Note code semitone index of A within the octave.
const A_SEMITONE: i32 = 8;

/// Coarse detune (DT2) in cents.
const DT2_CENTS: [f32; 4] = [0.0, 600.0, 781.0, 950.0];

/// Fine detune (DT1) per step in cents, sign taken from bit 2.
const DT1_CENTS_PER_STEP: f32 = 1.7;

/// PM sensitivity (PMS) in cents at full LFO depth.
const PMS_CENTS: [f32; 8] = [0.0, 5.0, 10.0, 20.0, 50.0, 100.0, 400.0, 700.0];

/// AM sensitivity (AMS) in attenuation steps at full LFO depth.
const AMS_STEPS: [f32; 4] = [0.0, 128.0, 256.0, 512.0];

/// Key-on bit (register 0x08) for each operator in register order M1, M2,
/// C1, C2.
const KEY_ON_BIT: [u8; OPERATORS] = [3, 5, 4, 6];

/// Phase offset in cycles produced by a full scale modulator.
const MODULATION_SCALE: f32 = 1.0;

/// Output amplitude of one channel at full level.
const CHANNEL_AMPLITUDE: f32 = 8191.0;

#[derive(Clone, Debug)]
struct Operator {
    dt1: u8,
    mul: u8,
    tl: u8,
    ame: bool,
    dt2: u8,
    env_params: EnvelopeParams,
    envelope: Envelope,
    phase: f32,
    key_on: bool,
}

impl Operator {
    fn new(sample_rate: f32) -> Self {
        Self {
            dt1: 0,
            mul: 0,
            tl: 0,
            ame: false,
            dt2: 0,
            env_params: EnvelopeParams::default(),
            envelope: Envelope::new(sample_rate),
            phase: 0.0,
            key_on: false,
        }
    }

    fn set_key(&mut self, on: bool) {
        if on && !self.key_on {
            self.phase = 0.0;
            self.envelope.key_on();
        } else if !on && self.key_on {
            self.envelope.key_off();
        }
        self.key_on = on;
    }

    fn ratio(&self) -> f32 {
        let mul = if self.mul == 0 { 0.5 } else { self.mul as f32 };
        let dt1_steps = (self.dt1 & 3) as f32;
        let dt1 = if self.dt1 & 4 != 0 { -dt1_steps } else { dt1_steps };
        let cents = DT2_CENTS[self.dt2 as usize & 3] + dt1 * DT1_CENTS_PER_STEP;
        mul * 2f32.powf(cents / 1200.0)
    }

    /// Produce one sample, modulated by `modulation` cycles of phase offset.
    fn output(&self, modulation: f32, am_steps: f32) -> f32 {
        if self.envelope.phase() == EnvelopePhase::Off {
            return 0.0;
        }
        let am = if self.ame { am_steps } else { 0.0 };
        let att = self.envelope.attenuation() as f32 + self.tl as f32 * 8.0 + am;
        if att >= ATTENUATION_MAX as f32 {
            return 0.0;
        }
        sin_cycles(self.phase + modulation) * attenuation_to_gain(att as u32)
    }
}

#[derive(Clone, Debug)]
struct Channel {
    con: u8,
    fl: u8,
    left: bool,
    right: bool,
    kc: u8,
    kf: u8,
    pms: u8,
    ams: u8,
    ops: [Operator; OPERATORS],
    feedback: [f32; 2],
}

impl Channel {
    fn new(sample_rate: f32) -> Self {
        Self {
            con: 0,
            fl: 0,
            left: false,
            right: false,
            kc: 0,
            kf: 0,
            pms: 0,
            ams: 0,
            ops: std::array::from_fn(|_| Operator::new(sample_rate)),
            feedback: [0.0; 2],
        }
    }

    /// 5-bit key code used for envelope key scaling.
    fn keyscale_code(&self) -> u8 {
        ((self.kc >> 4) & 7) << 2 | (self.kc & 0x0F) >> 2
    }

    /// Fundamental of this channel in Hz for a given master clock.
    fn base_frequency(&self, clock: f64) -> f64 {
        let octave = ((self.kc >> 4) & 7) as i32;
        let note = NOTE_CODE_SEMITONE[(self.kc & 0x0F) as usize] as i32;
        let semis = (octave - 4) * 12 + note - A_SEMITONE;
        let fraction = self.kf as f64 / 64.0;
        440.0 * (clock / REFERENCE_CLOCK) * 2f64.powf((semis as f64 + fraction) / 12.0)
    }

    fn is_silent(&self) -> bool {
        self.ops
            .iter()
            .all(|op| op.envelope.phase() == EnvelopePhase::Off)
    }
}

/// Software YM2151.
#[derive(Clone, Debug)]
pub struct Ym2151 {
    clock_hz: u32,
    sample_rate: u32,
    channels: [Channel; CHANNELS],
    lfo: Lfo,
    noise: u8,
}

impl Ym2151 {
    /// Create a chip clocked at `clock_hz` producing `sample_rate` samples
    /// per second.
    pub fn new(clock_hz: u32, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            clock_hz,
            sample_rate,
            channels: std::array::from_fn(|_| Channel::new(sr)),
            lfo: Lfo::new(sr),
            noise: 0,
        }
    }

    /// Master clock in Hz.
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Frequency in Hz that a channel's key code currently selects.
    pub fn channel_frequency(&self, channel: usize) -> f64 {
        self.channels[channel % CHANNELS].base_frequency(self.clock_hz as f64)
    }

    /// Last value written to the noise register.
    pub fn noise_register(&self) -> u8 {
        self.noise
    }

    /// Current LFO waveform.
    pub fn lfo_waveform(&self) -> LfoWaveform {
        self.lfo.waveform()
    }

    /// True while any operator of `channel` is still producing sound.
    pub fn channel_active(&self, channel: usize) -> bool {
        !self.channels[channel % CHANNELS].is_silent()
    }

    fn write_operator(&mut self, addr: u8, value: u8) {
        let index = (addr & 0x1F) as usize;
        let ch = index & 7;
        let op_index = index >> 3;
        let op = &mut self.channels[ch].ops[op_index];
        match addr & 0xE0 {
            0x40 => {
                op.dt1 = (value >> 4) & 7;
                op.mul = value & 0x0F;
            }
            0x60 => op.tl = value & 0x7F,
            0x80 => {
                op.env_params.ks = value >> 6;
                op.env_params.ar = value & 0x1F;
            }
            0xA0 => {
                op.ame = value & 0x80 != 0;
                op.env_params.d1r = value & 0x1F;
            }
            0xC0 => {
                op.dt2 = value >> 6;
                op.env_params.d2r = value & 0x1F;
            }
            _ => {
                op.env_params.d1l = value >> 4;
                op.env_params.rr = value & 0x0F;
            }
        }
    }

    fn write_key_on(&mut self, value: u8) {
        let ch = (value & 7) as usize;
        for (op, bit) in self.channels[ch].ops.iter_mut().zip(KEY_ON_BIT) {
            op.set_key(value & (1 << bit) != 0);
        }
        trace!("OPM: key ch={} mask={:#04x}", ch, value >> 3);
    }

    fn render_channel(&mut self, ch: usize, pm: f32, am: f32) -> f32 {
        let clock = self.clock_hz as f64;
        let sample_rate = self.sample_rate as f32;
        let channel = &mut self.channels[ch];

        let base = channel.base_frequency(clock) as f32;
        let pitch = if channel.pms > 0 {
            2f32.powf(PMS_CENTS[channel.pms as usize] * pm / 1200.0)
        } else {
            1.0
        };
        let am_steps = AMS_STEPS[channel.ams as usize] * am;
        let keycode = channel.keyscale_code();

        for op in channel.ops.iter_mut() {
            op.envelope.tick(&op.env_params, keycode);
        }

        let fb = if channel.fl == 0 {
            0.0
        } else {
            (channel.feedback[0] + channel.feedback[1]) * 0.5 * (1u32 << channel.fl) as f32
                / 256.0
        };

        let [m1_op, m2_op, c1_op, c2_op] = &channel.ops;
        let m1 = m1_op.output(fb, am_steps);
        let s = MODULATION_SCALE;
        let out = match channel.con & 7 {
            0 => {
                let c1 = c1_op.output(m1 * s, am_steps);
                let m2 = m2_op.output(c1 * s, am_steps);
                c2_op.output(m2 * s, am_steps)
            }
            1 => {
                let c1 = c1_op.output(0.0, am_steps);
                let m2 = m2_op.output((m1 + c1) * s, am_steps);
                c2_op.output(m2 * s, am_steps)
            }
            2 => {
                let c1 = c1_op.output(0.0, am_steps);
                let m2 = m2_op.output(c1 * s, am_steps);
                c2_op.output((m1 + m2) * s, am_steps)
            }
            3 => {
                let c1 = c1_op.output(m1 * s, am_steps);
                let m2 = m2_op.output(0.0, am_steps);
                c2_op.output((c1 + m2) * s, am_steps)
            }
            4 => {
                let c1 = c1_op.output(m1 * s, am_steps);
                let m2 = m2_op.output(0.0, am_steps);
                c1 + c2_op.output(m2 * s, am_steps)
            }
            5 => {
                c1_op.output(m1 * s, am_steps)
                    + m2_op.output(m1 * s, am_steps)
                    + c2_op.output(m1 * s, am_steps)
            }
            6 => {
                c1_op.output(m1 * s, am_steps)
                    + m2_op.output(0.0, am_steps)
                    + c2_op.output(0.0, am_steps)
            }
            _ => {
                m1 + m2_op.output(0.0, am_steps)
                    + c1_op.output(0.0, am_steps)
                    + c2_op.output(0.0, am_steps)
            }
        };

        channel.feedback = [channel.feedback[1], m1];

        for op in channel.ops.iter_mut() {
            let inc = base * pitch * op.ratio() / sample_rate;
            op.phase += inc;
            op.phase -= op.phase.floor();
        }

        out
    }
}

impl OpmBackend for Ym2151 {
    fn reset(&mut self) {
        *self = Ym2151::new(self.clock_hz, self.sample_rate);
    }

    fn write_register(&mut self, addr: u8, value: u8) {
        match addr {
            0x01 => self.lfo.set_reset(value & 0x02 != 0),
            0x08 => self.write_key_on(value),
            0x0F => self.noise = value,
            0x18 => self.lfo.set_rate(value),
            0x19 => {
                if value & 0x80 != 0 {
                    self.lfo.pmd = value & 0x7F;
                } else {
                    self.lfo.amd = value & 0x7F;
                }
            }
            0x1B => self.lfo.set_waveform(LfoWaveform::from(value & 3)),
            0x20..=0x27 => {
                let ch = &mut self.channels[(addr & 7) as usize];
                ch.right = value & 0x80 != 0;
                ch.left = value & 0x40 != 0;
                ch.fl = (value >> 3) & 7;
                ch.con = value & 7;
            }
            0x28..=0x2F => self.channels[(addr & 7) as usize].kc = value & 0x7F,
            0x30..=0x37 => self.channels[(addr & 7) as usize].kf = value >> 2,
            0x38..=0x3F => {
                let ch = &mut self.channels[(addr & 7) as usize];
                ch.pms = (value >> 4) & 7;
                ch.ams = value & 3;
            }
            0x40..=0xFF => self.write_operator(addr, value),
            _ => trace!("OPM: ignored write {:#04x} = {:#04x}", addr, value),
        }
    }

    fn key_on_mask(&self, channel: usize) -> u8 {
        let ch = &self.channels[channel % CHANNELS];
        ch.ops
            .iter()
            .zip(KEY_ON_BIT)
            .filter(|(op, _)| op.key_on)
            .fold(0u8, |mask, (_, bit)| mask | 1 << (bit - 3))
    }

    fn clock(&mut self) -> [(i32, i32); CHANNELS] {
        self.lfo.tick();
        let pm = self.lfo.pm();
        let am = self.lfo.am();

        let mut out = [(0, 0); CHANNELS];
        for (ch, frame) in out.iter_mut().enumerate() {
            let sample = (self.render_channel(ch, pm, am) * CHANNEL_AMPLITUDE) as i32;
            let channel = &self.channels[ch];
            *frame = (
                if channel.left { sample } else { 0 },
                if channel.right { sample } else { 0 },
            );
        }
        out
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FB01_CLOCK: u32 = 4_000_000;

    fn sine_patch(chip: &mut Ym2151, ch: u8) {
        chip.write_register(0x20 + ch, 0xC7); // both outputs, no feedback, algorithm 7
        for op in 0..4u8 {
            let slot = ch + op * 8;
            chip.write_register(0x40 + slot, 0x01); // MUL 1
            chip.write_register(0x60 + slot, if op == 3 { 0 } else { 127 });
            chip.write_register(0x80 + slot, 0x1F); // AR 31
            chip.write_register(0xA0 + slot, 0x00);
            chip.write_register(0xC0 + slot, 0x00);
            chip.write_register(0xE0 + slot, 0x0F); // D1L 0, RR 15
        }
    }

    #[test]
    fn test_key_code_frequency() {
        let mut chip = Ym2151::new(REFERENCE_CLOCK as u32, 44100);
        chip.write_register(0x28, 0x4A); // octave 4, note A
        assert_relative_eq!(chip.channel_frequency(0), 440.0, max_relative = 1e-3);

        // Half a semitone of KF.
        chip.write_register(0x30, 32 << 2);
        assert_relative_eq!(
            chip.channel_frequency(0),
            440.0 * 2f64.powf(0.5 / 12.0),
            max_relative = 1e-3
        );
    }

    #[test]
    fn test_faster_clock_raises_pitch() {
        let mut chip = Ym2151::new(FB01_CLOCK, 44100);
        chip.write_register(0x28, 0x4A);
        assert_relative_eq!(
            chip.channel_frequency(0),
            440.0 * FB01_CLOCK as f64 / REFERENCE_CLOCK,
            max_relative = 1e-3
        );
    }

    #[test]
    fn test_key_on_mask_follows_register() {
        let mut chip = Ym2151::new(FB01_CLOCK, 44100);
        chip.write_register(0x08, 0x78 | 2);
        assert_eq!(chip.key_on_mask(2), 0x0F);
        assert_eq!(chip.key_on_mask(0), 0);

        // Only C2 (bit 6).
        chip.write_register(0x08, 0x40 | 2);
        assert_eq!(chip.key_on_mask(2), 0x08);

        chip.write_register(0x08, 2);
        assert_eq!(chip.key_on_mask(2), 0);
    }

    #[test]
    fn test_keyed_channel_produces_sound_on_enabled_sides() {
        let mut chip = Ym2151::new(FB01_CLOCK, 44100);
        sine_patch(&mut chip, 1);
        chip.write_register(0x28 + 1, 0x4A);
        chip.write_register(0x08, 0x78 | 1);

        let mut peak = 0;
        for _ in 0..1000 {
            let frame = chip.clock();
            assert_eq!(frame[0], (0, 0));
            assert_eq!(frame[1].0, frame[1].1);
            peak = peak.max(frame[1].0.abs());
        }
        assert!(peak > 4000, "peak {}", peak);

        // Left only.
        chip.write_register(0x21, 0x47);
        let frames: Vec<_> = (0..200).map(|_| chip.clock()[1]).collect();
        assert!(frames.iter().all(|&(_, r)| r == 0));
        assert!(frames.iter().any(|&(l, _)| l != 0));
    }

    #[test]
    fn test_release_goes_silent() {
        let mut chip = Ym2151::new(FB01_CLOCK, 44100);
        sine_patch(&mut chip, 0);
        chip.write_register(0x28, 0x4A);
        chip.write_register(0x08, 0x78);
        for _ in 0..100 {
            chip.clock();
        }
        assert!(chip.channel_active(0));

        chip.write_register(0x08, 0x00);
        for _ in 0..44100 {
            chip.clock();
        }
        assert!(!chip.channel_active(0));
        assert_eq!(chip.clock()[0], (0, 0));
    }

    #[test]
    fn test_lfo_registers() {
        let mut chip = Ym2151::new(FB01_CLOCK, 44100);
        chip.write_register(0x1B, 0x02);
        assert_eq!(chip.lfo_waveform(), LfoWaveform::Triangle);
        chip.write_register(0x19, 0x80 | 100);
        chip.write_register(0x19, 9);
        assert_eq!(chip.lfo.pmd, 100);
        assert_eq!(chip.lfo.amd, 9);
    }
}
