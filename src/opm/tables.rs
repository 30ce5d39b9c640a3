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

//! Lookup tables shared by the operator kernels.
//!
//! The sine table covers one full cycle and is interpolated linearly. The
//! gain table maps envelope attenuation steps (0.09375 dB each) to linear
//! amplitude.

use std::sync::OnceLock;

const SIN_LG_N: usize = 12;
const SIN_N: usize = 1 << SIN_LG_N;

/// Attenuation step in decibels.
pub const ATTENUATION_STEP_DB: f32 = 0.09375;

/// Largest meaningful attenuation; anything at or beyond it is silent.
pub const ATTENUATION_MAX: u32 = 1023;

/// Gain table length: envelope plus TL plus AM can exceed the envelope range.
const GAIN_N: usize = 4096;

struct Tables {
    sin: Vec<f32>,
    gain: Vec<f32>,
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(|| {
        // One guard point so interpolation at the last index needs no wrap.
        let sin = (0..=SIN_N)
            .map(|i| (2.0 * std::f64::consts::PI * i as f64 / SIN_N as f64).sin() as f32)
            .collect();
        let gain = (0..GAIN_N)
            .map(|att| {
                if att as u32 >= ATTENUATION_MAX {
                    0.0
                } else {
                    10f32.powf(-(att as f32) * ATTENUATION_STEP_DB / 20.0)
                }
            })
            .collect();
        Tables { sin, gain }
    })
}

/// Sine of a phase expressed in cycles (1.0 = one full turn).
#[inline]
pub fn sin_cycles(phase: f32) -> f32 {
    let t = tables();
    let p = phase - phase.floor();
    let pos = p * SIN_N as f32;
    let i = (pos as usize).min(SIN_N - 1);
    let frac = pos - i as f32;
    t.sin[i] + (t.sin[i + 1] - t.sin[i]) * frac
}

/// Linear gain for an attenuation expressed in 0.09375 dB steps.
#[inline]
pub fn attenuation_to_gain(att: u32) -> f32 {
    let t = tables();
    t.gain[(att as usize).min(GAIN_N - 1)]
}
