//! Per-tick pitch and volume computation.
//!
//! Runs over every slot of an instrument's [`MidiMap`] and writes the key
//! code, key fraction, key-on and carrier total level registers.
//!
//! Pitch is carried in 1/64 semitone units and split into (octave, note
//! code, key fraction) with Euclidean division, so carries between the three
//! radix levels are always normalized.

use log::trace;

use crate::allocator::{MidiMap, NoteState};
use crate::opm::OPERATORS;
use crate::registers::RegisterBus;

/// Note number subtracted before decomposition. Together with the 4 MHz
/// chip clock this puts note 69 at roughly 440 Hz.
pub const NOTE_OFFSET: i32 = 15;

/// Key fraction steps per semitone.
pub const KF_PER_SEMITONE: i32 = 64;

/// Chip note code for each semitone of the octave, starting at C#.
pub const YM2151_NOTE: [u8; 12] = [0, 1, 2, 4, 5, 6, 8, 9, 10, 12, 13, 14];

/// Which operators (register order M1, M2, C1, C2) are carriers for each
/// connection.
pub const IS_VOL_SET: [[bool; OPERATORS]; 8] = [
    [false, false, false, true],
    [false, false, false, true],
    [false, false, false, true],
    [false, false, false, true],
    [false, false, true, true],
    [false, true, true, true],
    [false, true, true, true],
    [true, true, true, true],
];

/// Linear volume (0..127) to total level attenuation, roughly
/// `-40 * log10(v / 127) / 0.75`.
pub const VOL_TABLE: [u8; 128] = [
    127, 109, 99, 91, 85, 81, 76, 73, 70, 67, 65, 62, 60, 58, 57, 55, //
    53, 52, 50, 49, 48, 46, 45, 44, 43, 42, 41, 40, 39, 38, 37, 37, //
    36, 35, 34, 34, 33, 32, 31, 31, 30, 30, 29, 28, 28, 27, 27, 26, //
    25, 25, 24, 24, 23, 23, 22, 22, 22, 21, 21, 20, 20, 19, 19, 18, //
    18, 18, 17, 17, 16, 16, 16, 15, 15, 15, 14, 14, 14, 13, 13, 13, //
    12, 12, 12, 11, 11, 11, 10, 10, 10, 10, 9, 9, 9, 8, 8, 8, //
    8, 7, 7, 7, 7, 6, 6, 6, 5, 5, 5, 5, 5, 4, 4, 4, //
    4, 3, 3, 3, 3, 2, 2, 2, 2, 2, 1, 1, 1, 1, 0, 0,
];

/// Attenuation written for an operator that receives no computed volume.
pub const SILENT_LEVEL: u8 = 127;

/// Decomposed pitch ready for registers 0x28 and 0x30.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyCode {
    /// Octave, 0..=7.
    pub octave: u8,
    /// Chip note code from [`YM2151_NOTE`].
    pub note: u8,
    /// Key fraction, 0..64.
    pub fraction: u8,
}

impl KeyCode {
    /// Register 0x28 value.
    pub fn kc(&self) -> u8 {
        self.octave << 4 | self.note
    }

    /// Register 0x30 value.
    pub fn kf(&self) -> u8 {
        self.fraction << 2
    }
}

/// Split a pitch in 1/64 semitone units into chip key code fields. The
/// octave saturates at 0 and 7.
pub fn decompose(units: i32) -> KeyCode {
    let fraction = units.rem_euclid(KF_PER_SEMITONE);
    let semitones = units.div_euclid(KF_PER_SEMITONE);
    let scale = semitones.rem_euclid(12);
    let octave = semitones.div_euclid(12).clamp(0, 7);
    KeyCode {
        octave: octave as u8,
        note: YM2151_NOTE[scale as usize],
        fraction: fraction as u8,
    }
}

/// Pitch bend offset in 1/64 semitone units.
pub fn bend_units(bend: i16, sense_semitones: u8, sense_cents: u8) -> i32 {
    let bend = bend as i32;
    let coarse = sense_semitones as i32 * KF_PER_SEMITONE * bend / 8192;
    let fine = sense_cents as i32 * KF_PER_SEMITONE * bend / (100 * 8192);
    coarse + fine
}

/// Remaining portamento offset in 1/64 semitone units.
///
/// The glide starts at the distance between the previous and the new note and
/// shrinks linearly by `rate * step / 256` until it reaches zero.
pub fn portamento_units(from: u8, to: u8, rate: u32, step: u32) -> i32 {
    let span = (from as i32 - to as i32) * KF_PER_SEMITONE;
    let travelled = (rate as u64 * step as u64 / 256).min(i32::MAX as u64) as i32;
    if span > 0 {
        (span - travelled).max(0)
    } else {
        (span + travelled).min(0)
    }
}

/// Total pitch of slot `s` in 1/64 semitone units.
pub fn pitch_units(map: &MidiMap, s: usize) -> i32 {
    let slot = &map.slots[s];
    let mut units = (slot.note as i32 - NOTE_OFFSET).max(0) * KF_PER_SEMITONE;
    units += map.transpose as i32 * 12 * KF_PER_SEMITONE;
    units += map.detune as i32;
    units += bend_units(map.bend, map.bend_sense_m, map.bend_sense_l);
    if let (Some(rate), Some(from)) = (map.portamento_rate(), slot.glide_from) {
        units += portamento_units(from, slot.note, rate, slot.step);
    }
    units
}

/// Velocity scaled into the upper half of the range; 0 stays silent.
pub fn velocity_term(velocity: u8) -> u32 {
    if velocity == 0 {
        0
    } else {
        velocity as u32 / 2 + 63
    }
}

/// Linear volume (0..=127) of a carrier before the attenuation table.
pub fn linear_volume(
    master_volume: u8,
    expression: u8,
    velocity: u8,
    total_level: u8,
    system_volume: u8,
) -> u8 {
    let vol = master_volume as u32 * expression as u32 * velocity_term(velocity) * total_level as u32
        / 127
        / 127
        / 127;
    let vol = vol * system_volume as u32 / 127;
    num_traits::clamp(vol, 0, 127) as u8
}

/// Attenuation for every operator of slot `s`. Non-carriers get
/// [`SILENT_LEVEL`]: they never take part in volume scaling.
pub fn operator_levels(map: &MidiMap, s: usize, system_volume: u8) -> [u8; OPERATORS] {
    let carriers = IS_VOL_SET[(map.algorithm & 7) as usize];
    let velocity = map.slots[s].velocity;
    std::array::from_fn(|op| {
        if carriers[op] {
            let vol = linear_volume(
                map.master_volume,
                map.expression,
                velocity,
                map.total_level[op],
                system_volume,
            );
            VOL_TABLE[vol as usize]
        } else {
            SILENT_LEVEL
        }
    })
}

/// Advance every slot one tick and write pitch and key-on registers.
pub fn freq_write(map: &mut MidiMap, bus: &mut impl RegisterBus) {
    for s in 0..map.note_count {
        let ch = (map.base_voice + s) as u8;
        map.slots[s].step = map.slots[s].step.saturating_add(1);
        let key = decompose(pitch_units(map, s));

        let slot = &mut map.slots[s];
        let keyed = match slot.state {
            NoteState::Pressed => {
                // Key off first so the envelope restarts.
                bus.write(0x08, ch);
                slot.state = NoteState::Sounding;
                true
            }
            NoteState::Sounding => true,
            NoteState::Released if map.hold => true,
            NoteState::Released | NoteState::Idle => {
                slot.state = NoteState::Idle;
                false
            }
        };

        bus.write(0x28 + ch, key.kc());
        bus.write(0x30 + ch, key.kf());
        let mask = if keyed { (map.slot_mask & 0x0F) << 3 } else { 0 };
        bus.write(0x08, mask | ch);
        trace!(
            "SYNTH: ch={} kc={:#04x} kf={} keyed={}",
            ch,
            key.kc(),
            key.fraction,
            keyed
        );
    }
}

/// Write carrier total levels for every slot.
pub fn volume_write(map: &MidiMap, system_volume: u8, bus: &mut impl RegisterBus) {
    let carriers = IS_VOL_SET[(map.algorithm & 7) as usize];
    for s in 0..map.note_count {
        let ch = (map.base_voice + s) as u8;
        let levels = operator_levels(map, s, system_volume);
        for op in (0..OPERATORS).filter(|&op| carriers[op]) {
            bus.write(0x60 + ch + op as u8 * 8, levels[op]);
        }
    }
}
