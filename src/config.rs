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

//! Instrument configurations.
//!
//! A [`Configuration`] bundles eight [`Instrument`]s with the shared LFO
//! settings. Its byte form is 160 bytes: a 32 byte common block followed by
//! one 16 byte block per instrument, indexed by the same parameter numbers
//! that instrument parameter change messages use.

use serde::{Deserialize, Serialize};

/// Instruments per configuration.
pub const INSTRUMENTS: usize = 8;

/// Physical voices shared by all instruments.
pub const TOTAL_VOICES: usize = 8;

/// Bytes in a serialized configuration.
pub const CONFIG_LEN: usize = 160;

/// Stored configurations besides the active one.
pub const STORED_CONFIGS: usize = 16;

const COMMON_LEN: usize = 32;
const INSTRUMENT_BLOCK_LEN: usize = 16;
const NAME_LEN: usize = 8;

/// Which note numbers an instrument accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyReceiveMode {
    /// Every note.
    #[default]
    All,
    /// Even note numbers only.
    Even,
    /// Odd note numbers only.
    Odd,
}

impl KeyReceiveMode {
    /// True if `note` passes this filter.
    pub fn accepts(self, note: u8) -> bool {
        match self {
            KeyReceiveMode::All => true,
            KeyReceiveMode::Even => note % 2 == 0,
            KeyReceiveMode::Odd => note % 2 == 1,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            1 => KeyReceiveMode::Even,
            2 => KeyReceiveMode::Odd,
            _ => KeyReceiveMode::All,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            KeyReceiveMode::All => 0,
            KeyReceiveMode::Even => 1,
            KeyReceiveMode::Odd => 2,
        }
    }
}

/// Engine reaction required after an instrument parameter changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamEffect {
    /// Voice ranges must be recomputed.
    Reallocate,
    /// The instrument's voice must be reloaded into its registers.
    ReloadVoice,
    /// Pitch related settings changed; copy them into the runtime map.
    Retune,
    /// Pan or output level changed.
    Mix,
    /// Nothing beyond storing the value.
    None,
}

/// Instrument parameter numbers (the offset inside the instrument block).
pub mod param {
    /// Polyphony owned by the instrument.
    pub const NOTE_COUNT: u8 = 0x00;
    /// MIDI receive channel.
    pub const MIDI_CHANNEL: u8 = 0x01;
    /// Highest accepted note.
    pub const KEY_HIGH: u8 = 0x02;
    /// Lowest accepted note.
    pub const KEY_LOW: u8 = 0x03;
    /// Voice bank.
    pub const VOICE_BANK: u8 = 0x04;
    /// Voice within the bank.
    pub const VOICE: u8 = 0x05;
    /// Fine detune.
    pub const DETUNE: u8 = 0x06;
    /// Octave transpose, stored with an offset of 2.
    pub const OCTAVE_TRANSPOSE: u8 = 0x07;
    /// Output level.
    pub const OUTPUT_LEVEL: u8 = 0x08;
    /// Pan.
    pub const PAN: u8 = 0x09;
    /// LFO enable.
    pub const LFO_ENABLE: u8 = 0x0A;
    /// Portamento time.
    pub const PORTAMENTO_TIME: u8 = 0x0B;
    /// Pitch bend range in semitones.
    pub const PITCH_BEND_RANGE: u8 = 0x0C;
    /// Mono (1) / poly (0).
    pub const MONO: u8 = 0x0D;
    /// Controller routed to pitch modulation depth.
    pub const INPUT_CONTROLLER: u8 = 0x0E;
}

/// One logical instrument.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Physical voices owned.
    pub note_count: u8,
    /// Receive channel, 0..15.
    pub midi_channel: u8,
    /// Highest note accepted.
    pub key_high: u8,
    /// Lowest note accepted.
    pub key_low: u8,
    /// Voice bank, 0..6.
    pub voice_bank: u8,
    /// Voice within the bank, 0..47.
    pub voice: u8,
    /// Fine detune in 1/64 semitone.
    pub detune: i8,
    /// Octave transpose, -2..=2.
    pub octave_transpose: i8,
    /// Output level, 0..127.
    pub output_level: u8,
    /// Pan, 0 = left, 64 = centre, 127 = right.
    pub pan: u8,
    /// LFO applies to this instrument.
    pub lfo_enable: bool,
    /// Portamento time, 0 = off.
    pub portamento_time: u8,
    /// Pitch bend range in semitones.
    pub pitch_bend_range: u8,
    /// Monophonic mode.
    pub mono: bool,
    /// Controller assigned to modulation depth.
    pub input_controller: u8,
}

impl Instrument {
    /// Default instrument `index`: its own channel, voice `index` of bank 0.
    pub fn new(index: usize) -> Self {
        Self {
            note_count: 1,
            midi_channel: index as u8 & 0x0F,
            key_high: 127,
            key_low: 0,
            voice_bank: 0,
            voice: index as u8,
            detune: 0,
            octave_transpose: 0,
            output_level: 127,
            pan: 64,
            lfo_enable: true,
            portamento_time: 0,
            pitch_bend_range: 2,
            mono: false,
            input_controller: 0,
        }
    }

    /// True if this instrument should play `note` arriving on `channel`.
    pub fn accepts(&self, channel: u8, note: u8) -> bool {
        self.midi_channel == channel && (self.key_low..=self.key_high).contains(&note)
    }

    /// Flat tone table index for the selected bank and voice.
    pub fn tone_index(&self) -> usize {
        self.voice_bank as usize * crate::voice::VOICES_PER_BANK + self.voice as usize
    }

    /// Write one parameter by number. Values are masked to their field width.
    pub fn set_param(&mut self, index: u8, value: u8) -> ParamEffect {
        match index {
            param::NOTE_COUNT => {
                self.note_count = value.min(TOTAL_VOICES as u8);
                ParamEffect::Reallocate
            }
            param::MIDI_CHANNEL => {
                self.midi_channel = value & 0x0F;
                ParamEffect::None
            }
            param::KEY_HIGH => {
                self.key_high = value & 0x7F;
                ParamEffect::None
            }
            param::KEY_LOW => {
                self.key_low = value & 0x7F;
                ParamEffect::None
            }
            param::VOICE_BANK => {
                self.voice_bank = value.min(crate::voice::BANK_COUNT as u8 - 1);
                ParamEffect::ReloadVoice
            }
            param::VOICE => {
                self.voice = value.min(crate::voice::VOICES_PER_BANK as u8 - 1);
                ParamEffect::ReloadVoice
            }
            param::DETUNE => {
                self.detune = (value & 0x7F) as i8 - 64;
                ParamEffect::Retune
            }
            param::OCTAVE_TRANSPOSE => {
                self.octave_transpose = value.min(4) as i8 - 2;
                ParamEffect::Retune
            }
            param::OUTPUT_LEVEL => {
                self.output_level = value & 0x7F;
                ParamEffect::Mix
            }
            param::PAN => {
                self.pan = value & 0x7F;
                ParamEffect::Mix
            }
            param::LFO_ENABLE => {
                self.lfo_enable = value != 0;
                ParamEffect::None
            }
            param::PORTAMENTO_TIME => {
                self.portamento_time = value & 0x7F;
                ParamEffect::Retune
            }
            param::PITCH_BEND_RANGE => {
                self.pitch_bend_range = value & 0x0F;
                ParamEffect::Retune
            }
            param::MONO => {
                self.mono = value != 0;
                ParamEffect::None
            }
            param::INPUT_CONTROLLER => {
                self.input_controller = value & 0x7F;
                ParamEffect::None
            }
            _ => ParamEffect::None,
        }
    }

    /// Read one parameter by number in its stored byte form.
    pub fn param(&self, index: u8) -> u8 {
        match index {
            param::NOTE_COUNT => self.note_count,
            param::MIDI_CHANNEL => self.midi_channel,
            param::KEY_HIGH => self.key_high,
            param::KEY_LOW => self.key_low,
            param::VOICE_BANK => self.voice_bank,
            param::VOICE => self.voice,
            param::DETUNE => (self.detune as i16 + 64) as u8,
            param::OCTAVE_TRANSPOSE => (self.octave_transpose + 2) as u8,
            param::OUTPUT_LEVEL => self.output_level,
            param::PAN => self.pan,
            param::LFO_ENABLE => self.lfo_enable as u8,
            param::PORTAMENTO_TIME => self.portamento_time,
            param::PITCH_BEND_RANGE => self.pitch_bend_range,
            param::MONO => self.mono as u8,
            param::INPUT_CONTROLLER => self.input_controller,
            _ => 0,
        }
    }
}

/// Eight instruments plus shared settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration name, up to 8 characters.
    pub name: String,
    /// Combine mode flag.
    pub combine: u8,
    /// LFO speed (LFRQ).
    pub lfo_speed: u8,
    /// LFO amplitude modulation depth.
    pub amd: u8,
    /// LFO pitch modulation depth.
    pub pmd: u8,
    /// LFO waveform, 0..3.
    pub lfo_waveform: u8,
    /// Note parity filter.
    pub key_receive_mode: KeyReceiveMode,
    /// The instruments.
    pub instruments: [Instrument; INSTRUMENTS],
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "single".to_string(),
            combine: 1,
            lfo_speed: 0,
            amd: 0,
            pmd: 0,
            lfo_waveform: 0,
            key_receive_mode: KeyReceiveMode::All,
            instruments: std::array::from_fn(Instrument::new),
        }
    }
}

impl Configuration {
    /// Sum of note counts.
    pub fn total_notes(&self) -> usize {
        self.instruments.iter().map(|i| i.note_count as usize).sum()
    }

    /// Serialize to the 160 byte form. All bytes are 7-bit clean.
    pub fn to_bytes(&self) -> [u8; CONFIG_LEN] {
        let mut out = [0u8; CONFIG_LEN];
        let mut name = self.name.bytes().filter(|b| (0x20..0x7F).contains(b));
        for slot in out[..NAME_LEN].iter_mut() {
            *slot = name.next().unwrap_or(b' ');
        }
        out[8] = self.combine & 0x7F;
        out[9] = self.lfo_speed & 0x7F;
        out[10] = self.amd & 0x7F;
        out[11] = self.pmd & 0x7F;
        out[12] = self.lfo_waveform & 3;
        out[13] = self.key_receive_mode.to_byte();
        for (i, inst) in self.instruments.iter().enumerate() {
            let block = &mut out[COMMON_LEN + i * INSTRUMENT_BLOCK_LEN..][..INSTRUMENT_BLOCK_LEN];
            for (p, b) in block.iter_mut().enumerate().take(param::INPUT_CONTROLLER as usize + 1) {
                *b = inst.param(p as u8) & 0x7F;
            }
        }
        out
    }

    /// Parse the 160 byte form. Short input leaves the remaining fields at
    /// their defaults.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = Self::default().to_bytes();
        let n = bytes.len().min(CONFIG_LEN);
        raw[..n].copy_from_slice(&bytes[..n]);

        let name = String::from_utf8_lossy(&raw[..NAME_LEN]).trim_end().to_string();
        let instruments = std::array::from_fn(|i| {
            let block = &raw[COMMON_LEN + i * INSTRUMENT_BLOCK_LEN..][..INSTRUMENT_BLOCK_LEN];
            let mut inst = Instrument::new(i);
            for p in 0..=param::INPUT_CONTROLLER {
                inst.set_param(p, block[p as usize]);
            }
            inst
        });
        Self {
            name,
            combine: raw[8],
            lfo_speed: raw[9],
            amd: raw[10],
            pmd: raw[11],
            lfo_waveform: raw[12] & 3,
            key_receive_mode: KeyReceiveMode::from_byte(raw[13]),
            instruments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();
        assert_eq!(config.name, "single");
        assert_eq!(config.total_notes(), TOTAL_VOICES);
        for (i, inst) in config.instruments.iter().enumerate() {
            assert_eq!(inst.midi_channel as usize, i);
            assert_eq!(inst.voice as usize, i);
            assert_eq!(inst.pan, 64);
            assert!(inst.accepts(i as u8, 0) && inst.accepts(i as u8, 127));
        }
    }

    #[test]
    fn test_param_effects() {
        let mut inst = Instrument::new(0);
        assert_eq!(inst.set_param(param::NOTE_COUNT, 5), ParamEffect::Reallocate);
        assert_eq!(inst.note_count, 5);
        assert_eq!(inst.set_param(param::NOTE_COUNT, 40), ParamEffect::Reallocate);
        assert_eq!(inst.note_count, 8);
        assert_eq!(inst.set_param(param::VOICE, 12), ParamEffect::ReloadVoice);
        assert_eq!(inst.set_param(param::VOICE_BANK, 1), ParamEffect::ReloadVoice);
        assert_eq!(inst.tone_index(), 60);
        assert_eq!(inst.set_param(param::PAN, 0), ParamEffect::Mix);
        assert_eq!(inst.set_param(0x3F, 1), ParamEffect::None);

        inst.set_param(param::DETUNE, 70);
        assert_eq!(inst.detune, 6);
        assert_eq!(inst.param(param::DETUNE), 70);
        inst.set_param(param::OCTAVE_TRANSPOSE, 0);
        assert_eq!(inst.octave_transpose, -2);
    }

    #[test]
    fn test_key_range_and_receive_mode() {
        let mut inst = Instrument::new(3);
        inst.key_low = 48;
        inst.key_high = 59;
        assert!(inst.accepts(3, 48));
        assert!(inst.accepts(3, 59));
        assert!(!inst.accepts(3, 60));
        assert!(!inst.accepts(2, 50));

        assert!(KeyReceiveMode::Even.accepts(60));
        assert!(!KeyReceiveMode::Even.accepts(61));
        assert!(KeyReceiveMode::Odd.accepts(61));
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut config = Configuration::default();
        config.name = "Split".to_string();
        config.lfo_speed = 100;
        config.key_receive_mode = KeyReceiveMode::Odd;
        config.instruments[0].note_count = 6;
        config.instruments[1].note_count = 2;
        config.instruments[1].octave_transpose = -1;
        config.instruments[1].detune = -10;
        for inst in &mut config.instruments[2..] {
            inst.note_count = 0;
        }

        let bytes = config.to_bytes();
        assert!(bytes.iter().all(|&b| b < 0x80));
        assert_eq!(Configuration::from_bytes(&bytes), config);
    }
}
