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

//! Operator-indexed voice parameters and the built-in voice set.
//!
//! [`VoiceData`] is the internal form the allocator loads into chip
//! registers. Operators are kept in chip register order (M1, M2, C1, C2),
//! which is also the order used by the voice parameter file and by the
//! packed SysEx voice layout in [`crate::bank`].

use serde::{Deserialize, Serialize};

use crate::opm::OPERATORS;

/// Voices per bank.
pub const VOICES_PER_BANK: usize = 48;

/// Banks addressable by configuration and SysEx.
pub const BANK_COUNT: usize = 7;

/// Size of the tone table addressed by Program Change and instrument
/// bank/voice selection.
pub const MAX_TONES: usize = BANK_COUNT * VOICES_PER_BANK;

/// Longest voice name carried by the packed layout.
pub const VOICE_NAME_LEN: usize = 7;

/// Parameters of one FM operator, at chip register widths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorData {
    /// Fine detune, 3 bits (bit 2 = negative).
    pub dt1: u8,
    /// Coarse detune, 2 bits.
    pub dt2: u8,
    /// Frequency multiple, 4 bits (0 = x0.5).
    pub mul: u8,
    /// Total level, 7 bits (higher is quieter).
    pub tl: u8,
    /// Key scale, 2 bits.
    pub ks: u8,
    /// Attack rate, 5 bits.
    pub ar: u8,
    /// Amplitude modulation enable, 1 bit.
    pub ame: u8,
    /// First decay rate, 5 bits.
    pub d1r: u8,
    /// Second decay (sustain) rate, 5 bits.
    pub d2r: u8,
    /// Release rate, 4 bits.
    pub rr: u8,
    /// Sustain (first decay) level, 4 bits.
    pub sl: u8,
}

impl OperatorData {
    /// Build an operator from values in voice-file order:
    /// AR D1R D2R RR SL TL KS MUL DT1 DT2 AME.
    #[allow(clippy::too_many_arguments)]
    pub const fn from_file_order(
        ar: u8,
        d1r: u8,
        d2r: u8,
        rr: u8,
        sl: u8,
        tl: u8,
        ks: u8,
        mul: u8,
        dt1: u8,
        dt2: u8,
        ame: u8,
    ) -> Self {
        Self {
            dt1,
            dt2,
            mul,
            tl,
            ks,
            ar,
            ame,
            d1r,
            d2r,
            rr,
            sl,
        }
    }

    /// Mask every field to its register width.
    pub fn masked(self) -> Self {
        Self {
            dt1: self.dt1 & 7,
            dt2: self.dt2 & 3,
            mul: self.mul & 0x0F,
            tl: self.tl & 0x7F,
            ks: self.ks & 3,
            ar: self.ar & 0x1F,
            ame: self.ame & 1,
            d1r: self.d1r & 0x1F,
            d2r: self.d2r & 0x1F,
            rr: self.rr & 0x0F,
            sl: self.sl & 0x0F,
        }
    }
}

/// Register bytes of one operator as written to the chip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperatorRegisters {
    /// `0x40`: DT1 (6..4) / MUL (3..0).
    pub dt1_mul: u8,
    /// `0x60`: TL.
    pub tl: u8,
    /// `0x80`: KS (7..6) / AR (4..0).
    pub ks_ar: u8,
    /// `0xA0`: AME (7) / D1R (4..0).
    pub ame_d1r: u8,
    /// `0xC0`: DT2 (7..6) / D2R (4..0).
    pub dt2_d2r: u8,
    /// `0xE0`: D1L (7..4) / RR (3..0).
    pub sl_rr: u8,
}

impl From<&OperatorData> for OperatorRegisters {
    fn from(op: &OperatorData) -> Self {
        let op = op.masked();
        Self {
            dt1_mul: op.dt1 << 4 | op.mul,
            tl: op.tl,
            ks_ar: op.ks << 6 | op.ar,
            ame_d1r: op.ame << 7 | op.d1r,
            dt2_d2r: op.dt2 << 6 | op.d2r,
            sl_rr: op.sl << 4 | op.rr,
        }
    }
}

impl From<&OperatorRegisters> for OperatorData {
    fn from(r: &OperatorRegisters) -> Self {
        Self {
            dt1: (r.dt1_mul >> 4) & 7,
            mul: r.dt1_mul & 0x0F,
            tl: r.tl & 0x7F,
            ks: r.ks_ar >> 6,
            ar: r.ks_ar & 0x1F,
            ame: r.ame_d1r >> 7,
            d1r: r.ame_d1r & 0x1F,
            dt2: r.dt2_d2r >> 6,
            d2r: r.dt2_d2r & 0x1F,
            sl: r.sl_rr >> 4,
            rr: r.sl_rr & 0x0F,
        }
    }
}

/// One FM patch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceData {
    /// Display name, at most [`VOICE_NAME_LEN`] characters survive packing.
    pub name: String,
    /// Connection (algorithm), 3 bits.
    pub con: u8,
    /// M1 self-feedback level, 3 bits.
    pub fl: u8,
    /// Operators to key on, 4 bits in key-on order (M1, C1, M2, C2).
    pub slot_mask: u8,
    /// Operators in register order M1, M2, C1, C2.
    pub ops: [OperatorData; OPERATORS],
}

impl Default for VoiceData {
    fn default() -> Self {
        Self::default_set().swap_remove(0)
    }
}

impl VoiceData {
    /// Channel register `0x20` low bits: FL (5..3) / CON (2..0).
    pub fn fl_con(&self) -> u8 {
        (self.fl & 7) << 3 | (self.con & 7)
    }

    /// Register bytes for every operator.
    pub fn operator_registers(&self) -> [OperatorRegisters; OPERATORS] {
        std::array::from_fn(|i| OperatorRegisters::from(&self.ops[i]))
    }

    /// Rebuild a voice from register bytes.
    pub fn from_registers(
        name: &str,
        fl_con: u8,
        slot_mask: u8,
        regs: &[OperatorRegisters; OPERATORS],
    ) -> Self {
        Self {
            name: name.to_string(),
            con: fl_con & 7,
            fl: (fl_con >> 3) & 7,
            slot_mask: slot_mask & 0x0F,
            ops: std::array::from_fn(|i| OperatorData::from(&regs[i])),
        }
    }

    /// The eight built-in voices. Tone `i` of the startup table uses entry
    /// `i % 8`.
    pub fn default_set() -> Vec<VoiceData> {
        use OperatorData as Op;
        let voice = |name: &str, con, fl, ops| VoiceData {
            name: name.to_string(),
            con,
            fl,
            slot_mask: 0x0F,
            ops,
        };
        vec![
            // Same shape as the sample voice shipped with the card's utilities.
            voice(
                "Sample",
                4,
                7,
                [
                    Op::from_file_order(31, 0, 7, 0, 4, 32, 3, 1, 2, 0, 0),
                    Op::from_file_order(31, 0, 7, 0, 4, 28, 3, 3, 7, 0, 0),
                    Op::from_file_order(22, 7, 3, 7, 3, 10, 2, 1, 4, 0, 0),
                    Op::from_file_order(22, 7, 3, 7, 3, 10, 2, 1, 1, 0, 0),
                ],
            ),
            voice(
                "EPiano",
                4,
                3,
                [
                    Op::from_file_order(31, 12, 4, 6, 6, 38, 2, 14, 3, 0, 0),
                    Op::from_file_order(31, 10, 2, 6, 4, 30, 1, 1, 5, 0, 0),
                    Op::from_file_order(31, 9, 3, 7, 5, 0, 1, 1, 3, 0, 0),
                    Op::from_file_order(31, 8, 2, 7, 4, 0, 1, 1, 0, 0, 0),
                ],
            ),
            voice(
                "Brass",
                3,
                5,
                [
                    Op::from_file_order(18, 8, 0, 8, 2, 30, 1, 1, 0, 0, 0),
                    Op::from_file_order(16, 10, 0, 8, 3, 34, 1, 1, 3, 0, 0),
                    Op::from_file_order(17, 6, 0, 8, 2, 28, 1, 1, 7, 0, 0),
                    Op::from_file_order(16, 5, 0, 8, 1, 0, 1, 1, 0, 0, 0),
                ],
            ),
            voice(
                "Strings",
                2,
                4,
                [
                    Op::from_file_order(14, 4, 0, 6, 1, 36, 0, 1, 2, 0, 0),
                    Op::from_file_order(15, 4, 0, 6, 1, 40, 0, 2, 6, 0, 0),
                    Op::from_file_order(14, 3, 0, 6, 1, 30, 0, 1, 1, 0, 0),
                    Op::from_file_order(13, 2, 0, 6, 1, 0, 0, 1, 0, 0, 0),
                ],
            ),
            voice(
                "Organ",
                7,
                0,
                [
                    Op::from_file_order(31, 0, 0, 10, 0, 10, 0, 1, 0, 0, 0),
                    Op::from_file_order(31, 0, 0, 10, 0, 14, 0, 2, 0, 0, 0),
                    Op::from_file_order(31, 0, 0, 10, 0, 18, 0, 4, 0, 0, 0),
                    Op::from_file_order(31, 0, 0, 10, 0, 22, 0, 8, 0, 0, 0),
                ],
            ),
            voice(
                "Bell",
                5,
                2,
                [
                    Op::from_file_order(31, 6, 2, 4, 6, 24, 0, 7, 0, 0, 0),
                    Op::from_file_order(31, 5, 2, 4, 5, 6, 0, 1, 3, 0, 0),
                    Op::from_file_order(31, 4, 1, 4, 5, 8, 0, 3, 5, 1, 0),
                    Op::from_file_order(31, 4, 1, 4, 5, 4, 0, 1, 0, 0, 0),
                ],
            ),
            voice(
                "Bass",
                0,
                6,
                [
                    Op::from_file_order(31, 14, 6, 8, 8, 26, 2, 0, 0, 0, 0),
                    Op::from_file_order(31, 12, 5, 8, 6, 32, 2, 1, 0, 0, 0),
                    Op::from_file_order(31, 10, 4, 8, 5, 24, 2, 1, 0, 0, 0),
                    Op::from_file_order(31, 8, 3, 9, 3, 0, 2, 1, 0, 0, 0),
                ],
            ),
            voice(
                "Flute",
                6,
                1,
                [
                    Op::from_file_order(20, 4, 0, 8, 2, 44, 0, 1, 0, 0, 1),
                    Op::from_file_order(18, 2, 0, 8, 1, 6, 0, 1, 2, 0, 0),
                    Op::from_file_order(18, 2, 0, 8, 1, 8, 0, 2, 0, 0, 0),
                    Op::from_file_order(18, 2, 0, 8, 1, 127, 0, 1, 0, 0, 0),
                ],
            ),
        ]
    }

    /// Startup tone table of [`MAX_TONES`] entries.
    pub fn default_tones() -> Vec<VoiceData> {
        let set = Self::default_set();
        (0..MAX_TONES).map(|i| set[i % set.len()].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_packing() {
        let op = OperatorData {
            dt1: 5,
            dt2: 2,
            mul: 11,
            tl: 100,
            ks: 3,
            ar: 29,
            ame: 1,
            d1r: 17,
            d2r: 9,
            rr: 12,
            sl: 6,
        };
        let regs = OperatorRegisters::from(&op);
        assert_eq!(regs.dt1_mul, 0x5B);
        assert_eq!(regs.tl, 100);
        assert_eq!(regs.ks_ar, 0xC0 | 29);
        assert_eq!(regs.ame_d1r, 0x80 | 17);
        assert_eq!(regs.dt2_d2r, 0x80 | 9);
        assert_eq!(regs.sl_rr, 0x6C);
        assert_eq!(OperatorData::from(&regs), op);
    }

    #[test]
    fn test_oversized_fields_are_masked() {
        let op = OperatorData {
            mul: 0x1F,
            ar: 0xFF,
            ..OperatorData::default()
        };
        let regs = OperatorRegisters::from(&op);
        assert_eq!(regs.dt1_mul, 0x0F);
        assert_eq!(regs.ks_ar, 0x1F);
    }

    #[test]
    fn test_default_tables() {
        let set = VoiceData::default_set();
        assert_eq!(set.len(), 8);
        let sample = &set[0];
        assert_eq!(sample.fl_con(), 7 << 3 | 4);
        assert_eq!(sample.ops[1].dt1, 7);
        assert_eq!(sample.ops[2].ar, 22);
        assert_eq!(VoiceData::default(), set[0]);

        let tones = VoiceData::default_tones();
        assert_eq!(tones.len(), MAX_TONES);
        assert_eq!(tones[5], set[5]);
        assert_eq!(tones[13], set[5]);
        assert_ne!(tones[5], tones[0]);
    }

    #[test]
    fn test_voice_from_registers() {
        let voice = VoiceData::default_set().swap_remove(3);
        let rebuilt = VoiceData::from_registers(
            &voice.name,
            voice.fl_con(),
            voice.slot_mask,
            &voice.operator_registers(),
        );
        assert_eq!(rebuilt, voice);
    }
}
