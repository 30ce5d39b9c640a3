//! Packed (wire layout) voices and voice banks.
//!
//! A packed voice is 64 bytes:
//!
//! | offset | contents |
//! |---|---|
//! | 0..7 | name |
//! | 8 | LFO speed |
//! | 9 | AMD |
//! | 10 | PMD |
//! | 11 | operator enable, bits 6..3 |
//! | 12 | FL (5..3) / CON (2..0) |
//! | 13 | PMS (6..4) / AMS (1..0) |
//! | 14 | LFO waveform (6..5) |
//! | 15 | transpose |
//! | 16 + 8k | operator block k (M1, M2, C1, C2) |
//!
//! Each operator block holds TL at offset 0 and the chip register bytes
//! DT1/MUL, KS/AR, AME/D1R, DT2/D2R, SL/RR at offsets 2..=6.
//!
//! A bank is a 32 byte header (name in the first 8 bytes) followed by 48
//! packed voices.

use crate::opm::OPERATORS;
use crate::voice::{OperatorRegisters, VoiceData, VOICES_PER_BANK, VOICE_NAME_LEN};

/// Bytes in one packed voice.
pub const PACKED_VOICE_LEN: usize = 64;

/// Bytes in a bank header.
pub const BANK_HEADER_LEN: usize = 32;

/// Bank name length inside the header.
pub const BANK_NAME_LEN: usize = 8;

/// Bytes in a full bank (header plus voices).
pub const BANK_LEN: usize = BANK_HEADER_LEN + VOICES_PER_BANK * PACKED_VOICE_LEN;

const OP_BLOCK_START: usize = 16;
const OP_BLOCK_LEN: usize = 8;

/// One voice in wire layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedVoice(pub [u8; PACKED_VOICE_LEN]);

impl Default for PackedVoice {
    fn default() -> Self {
        PackedVoice::from_voice(&VoiceData::default())
    }
}

fn read_name(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { ' ' })
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn write_name(name: &str, out: &mut [u8]) {
    let mut chars = name.bytes().filter(|b| (0x20..0x7F).contains(b));
    for slot in out.iter_mut() {
        *slot = chars.next().unwrap_or(b' ');
    }
}

impl PackedVoice {
    /// Copy a voice out of a buffer, zero filling a short tail.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; PACKED_VOICE_LEN];
        let n = bytes.len().min(PACKED_VOICE_LEN);
        raw[..n].copy_from_slice(&bytes[..n]);
        PackedVoice(raw)
    }

    /// Pack a voice. LFO and transpose bytes are left at zero.
    pub fn from_voice(voice: &VoiceData) -> Self {
        let mut raw = [0u8; PACKED_VOICE_LEN];
        write_name(&voice.name, &mut raw[..VOICE_NAME_LEN]);
        raw[11] = (voice.slot_mask & 0x0F) << 3;
        raw[12] = voice.fl_con();
        for (k, regs) in voice.operator_registers().iter().enumerate() {
            let block = &mut raw[OP_BLOCK_START + k * OP_BLOCK_LEN..][..OP_BLOCK_LEN];
            block[0] = regs.tl;
            block[2] = regs.dt1_mul;
            block[3] = regs.ks_ar;
            block[4] = regs.ame_d1r;
            block[5] = regs.dt2_d2r;
            block[6] = regs.sl_rr;
        }
        PackedVoice(raw)
    }

    /// Unpack into the operator-indexed form.
    pub fn to_voice(&self) -> VoiceData {
        let raw = &self.0;
        let regs: [OperatorRegisters; OPERATORS] = std::array::from_fn(|k| {
            let block = &raw[OP_BLOCK_START + k * OP_BLOCK_LEN..][..OP_BLOCK_LEN];
            OperatorRegisters {
                tl: block[0] & 0x7F,
                dt1_mul: block[2],
                ks_ar: block[3],
                ame_d1r: block[4],
                dt2_d2r: block[5],
                sl_rr: block[6],
            }
        });
        VoiceData::from_registers(&self.name(), raw[12], raw[11] >> 3, &regs)
    }

    /// Voice name.
    pub fn name(&self) -> String {
        read_name(&self.0[..VOICE_NAME_LEN])
    }

    /// LFO speed byte.
    pub fn lfo_speed(&self) -> u8 {
        self.0[8]
    }

    /// Amplitude modulation depth.
    pub fn amd(&self) -> u8 {
        self.0[9] & 0x7F
    }

    /// Pitch modulation depth.
    pub fn pmd(&self) -> u8 {
        self.0[10] & 0x7F
    }

    /// LFO waveform, 0..3.
    pub fn lfo_waveform(&self) -> u8 {
        (self.0[14] >> 5) & 3
    }

    /// Transpose byte as stored.
    pub fn transpose(&self) -> i8 {
        self.0[15] as i8
    }
}

/// Named set of 48 packed voices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceBank {
    header: [u8; BANK_HEADER_LEN],
    voices: Vec<PackedVoice>,
}

impl VoiceBank {
    /// Build a bank from unpacked voices, padding with the default voice.
    pub fn from_voices(name: &str, voices: &[VoiceData]) -> Self {
        let mut header = [0u8; BANK_HEADER_LEN];
        write_name(name, &mut header[..BANK_NAME_LEN]);
        let voices = (0..VOICES_PER_BANK)
            .map(|i| {
                voices
                    .get(i)
                    .map(PackedVoice::from_voice)
                    .unwrap_or_default()
            })
            .collect();
        Self { header, voices }
    }

    /// Parse a bank from raw bytes. Short input is zero filled.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut header = [0u8; BANK_HEADER_LEN];
        let n = bytes.len().min(BANK_HEADER_LEN);
        header[..n].copy_from_slice(&bytes[..n]);
        let body = bytes.get(BANK_HEADER_LEN..).unwrap_or(&[]);
        let voices = (0..VOICES_PER_BANK)
            .map(|i| PackedVoice::from_slice(body.get(i * PACKED_VOICE_LEN..).unwrap_or(&[])))
            .collect();
        Self { header, voices }
    }

    /// Serialize header and voices.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BANK_LEN);
        out.extend_from_slice(&self.header);
        for voice in &self.voices {
            out.extend_from_slice(&voice.0);
        }
        out
    }

    /// Header bytes.
    pub fn header(&self) -> &[u8; BANK_HEADER_LEN] {
        &self.header
    }

    /// Bank name.
    pub fn name(&self) -> String {
        read_name(&self.header[..BANK_NAME_LEN])
    }

    /// Packed voice `i`, if in range.
    pub fn voice(&self, i: usize) -> Option<&PackedVoice> {
        self.voices.get(i)
    }

    /// Replace packed voice `i`. Out of range indices are ignored.
    pub fn set_voice(&mut self, i: usize, voice: PackedVoice) {
        if let Some(slot) = self.voices.get_mut(i) {
            *slot = voice;
        }
    }

    /// All voices in order.
    pub fn voices(&self) -> &[PackedVoice] {
        &self.voices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode_type_a, encode_type_a};
    use crate::voice::OperatorData;

    fn unusual_voice() -> VoiceData {
        VoiceData {
            name: "Odd1".to_string(),
            con: 6,
            fl: 5,
            slot_mask: 0b1011,
            ops: std::array::from_fn(|k| OperatorData {
                dt1: (k as u8 + 5) & 7,
                dt2: k as u8 & 3,
                mul: 15 - k as u8,
                tl: 127 - 9 * k as u8,
                ks: 3 - k as u8,
                ar: 31 - 2 * k as u8,
                ame: (k as u8) & 1,
                d1r: 17 + k as u8,
                d2r: 4 * k as u8,
                rr: 15 - 3 * k as u8,
                sl: 2 + 4 * k as u8,
            }),
        }
    }

    #[test]
    fn test_pack_unpack_is_exact() {
        let voice = unusual_voice();
        let packed = PackedVoice::from_voice(&voice);
        assert_eq!(packed.0[12], 5 << 3 | 6);
        assert_eq!(packed.0[11], 0b1011 << 3);
        assert_eq!(packed.to_voice(), voice);
    }

    #[test]
    fn test_voice_survives_type_a_transport() {
        let voice = unusual_voice();
        let wire = encode_type_a(&PackedVoice::from_voice(&voice).0);
        let packet = decode_type_a(&wire).unwrap();
        assert!(packet.checksum_ok);
        let back = PackedVoice::from_slice(&packet.data).to_voice();
        assert_eq!(back.ops, voice.ops);
        assert_eq!((back.con, back.fl, back.slot_mask), (6, 5, 0b1011));
    }

    #[test]
    fn test_bank_layout() {
        let voices = VoiceData::default_set();
        let bank = VoiceBank::from_voices("Preset1", &voices);
        assert_eq!(bank.name(), "Preset1");
        let bytes = bank.to_bytes();
        assert_eq!(bytes.len(), BANK_LEN);
        assert_eq!(bytes.len(), 3104);

        let parsed = VoiceBank::from_bytes(&bytes);
        assert_eq!(parsed, bank);
        assert_eq!(parsed.voice(2).map(|v| v.to_voice()), Some(voices[2].clone()));
        // Padding voices are the default voice.
        assert_eq!(parsed.voice(47), Some(&PackedVoice::default()));
        assert!(parsed.voice(48).is_none());
    }

    #[test]
    fn test_short_bank_is_zero_filled() {
        let bank = VoiceBank::from_bytes(b"Short");
        assert_eq!(bank.name(), "Short");
        assert_eq!(bank.voices().len(), VOICES_PER_BANK);
        assert_eq!(bank.voice(0), Some(&PackedVoice([0; PACKED_VOICE_LEN])));
    }
}
