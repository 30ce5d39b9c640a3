//! Voice allocator and per-instrument runtime state.
//!
//! Each of the eight instruments owns a contiguous run of physical chip
//! channels `[base_voice, base_voice + note_count)`. Within that run, note
//! on picks a slot by priority: a free slot, then a slot already playing the
//! same note, then the slot held longest.

use std::cmp::Reverse;

use log::{debug, trace};

use crate::config::{Configuration, Instrument, INSTRUMENTS, TOTAL_VOICES};
use crate::opm::OPERATORS;
use crate::registers::RegisterBus;
use crate::synthesis::{self, IS_VOL_SET, SILENT_LEVEL};
use crate::voice::VoiceData;

/// PMS/AMS value written for modulation wheel vibrato (PMS 7, AMS 0).
const MODULATION_PMS_AMS: u8 = 0x70;

/// LFO rate used while the modulation wheel is active.
const MODULATION_LFRQ: u8 = 212;

/// AMD used while the modulation wheel is active.
const MODULATION_AMD: u8 = 9;

/// Key state of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum NoteState {
    /// Not sounding; key is off.
    Idle = -1,
    /// Note off received; stays keyed only while hold is on.
    Released = 0,
    /// Keyed.
    Sounding = 1,
    /// Note on received; retriggers on the next tick.
    Pressed = 2,
}

/// One physical voice slot of an instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Note number.
    pub note: u8,
    /// Key state.
    pub state: NoteState,
    /// Note on velocity.
    pub velocity: u8,
    /// Ticks since note on.
    pub step: u32,
    /// Note on order within the instrument; breaks ties between equal steps.
    pub sequence: u64,
    /// Previous note of the instrument, start point of a portamento glide.
    pub glide_from: Option<u8>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            note: 0,
            state: NoteState::Idle,
            velocity: 0,
            step: 0,
            sequence: 0,
            glide_from: None,
        }
    }
}

/// Runtime state of one instrument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MidiMap {
    /// First physical channel owned.
    pub base_voice: usize,
    /// Physical channels owned.
    pub note_count: usize,
    /// Slot state; only the first `note_count` entries are live.
    pub slots: [Slot; TOTAL_VOICES],
    /// Pitch bend, -8192..=8191.
    pub bend: i16,
    /// Bend range, semitones.
    pub bend_sense_m: u8,
    /// Bend range, cents.
    pub bend_sense_l: u8,
    /// Portamento time, 0 = none.
    pub portamento_time: u8,
    /// Portamento switch.
    pub portamento_on: bool,
    /// Sustain pedal.
    pub hold: bool,
    /// 127 minus the voice TL of each operator.
    pub total_level: [u8; OPERATORS],
    /// Connection of the loaded voice.
    pub algorithm: u8,
    /// Operators keyed on.
    pub slot_mask: u8,
    /// Channel volume.
    pub master_volume: u8,
    /// Expression.
    pub expression: u8,
    /// Loaded tone.
    pub tone: usize,
    /// Fine detune, 1/64 semitone.
    pub detune: i8,
    /// Octave transpose.
    pub transpose: i8,
    /// Pan, 0 = left, 64 = centre, 127 = right.
    pub pan: u8,
    /// Output level.
    pub output_level: u8,
    /// One slot only.
    pub mono: bool,
    /// LFO vibrato allowed.
    pub lfo_enable: bool,
    last_note: Option<u8>,
    next_sequence: u64,
}

impl MidiMap {
    /// Defaults for a map whose first channel is `base_voice`.
    pub fn new(base_voice: usize) -> Self {
        Self {
            base_voice,
            note_count: 0,
            slots: [Slot::default(); TOTAL_VOICES],
            bend: 0,
            bend_sense_m: 2,
            bend_sense_l: 0,
            portamento_time: 0,
            portamento_on: false,
            hold: false,
            total_level: [0, 0, 0, 127],
            algorithm: 0,
            slot_mask: 0,
            master_volume: 127,
            expression: 127,
            tone: 0,
            detune: 0,
            transpose: 0,
            pan: 64,
            output_level: 127,
            mono: false,
            lfo_enable: true,
            last_note: None,
            next_sequence: 0,
        }
    }

    /// Restore controller defaults and free every slot. Allocation and the
    /// loaded voice are kept.
    pub fn reset_runtime(&mut self) {
        *self = Self {
            base_voice: self.base_voice,
            note_count: self.note_count,
            total_level: self.total_level,
            algorithm: self.algorithm,
            slot_mask: self.slot_mask,
            tone: self.tone,
            detune: self.detune,
            transpose: self.transpose,
            pan: self.pan,
            output_level: self.output_level,
            mono: self.mono,
            lfo_enable: self.lfo_enable,
            ..Self::new(self.base_voice)
        };
    }

    /// Portamento rate per tick when portamento is active.
    pub fn portamento_rate(&self) -> Option<u32> {
        if self.portamento_on && self.portamento_time > 0 {
            Some(128 - self.portamento_time.min(127) as u32)
        } else {
            None
        }
    }

    /// Copy the pitch and mix related instrument settings.
    pub fn apply_instrument(&mut self, inst: &Instrument) {
        self.pan = inst.pan;
        self.output_level = inst.output_level;
        self.detune = inst.detune;
        self.transpose = inst.octave_transpose;
        self.portamento_time = inst.portamento_time;
        self.bend_sense_m = inst.pitch_bend_range;
        self.mono = inst.mono;
        self.lfo_enable = inst.lfo_enable;
    }

    /// Physical channels owned.
    pub fn channels(&self) -> std::ops::Range<usize> {
        self.base_voice..self.base_voice + self.note_count
    }

    /// Live slots.
    pub fn live_slots(&self) -> &[Slot] {
        &self.slots[..self.note_count]
    }

    /// True if any live slot is not idle.
    pub fn is_active(&self) -> bool {
        self.live_slots().iter().any(|s| s.state != NoteState::Idle)
    }
}

/// All eight instruments' runtime state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrumentMap {
    maps: [MidiMap; INSTRUMENTS],
}

impl Default for InstrumentMap {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentMap {
    /// Maps with no voices allocated.
    pub fn new() -> Self {
        Self {
            maps: std::array::from_fn(|_| MidiMap::new(0)),
        }
    }

    /// Runtime state of instrument `i`.
    pub fn get(&self, i: usize) -> &MidiMap {
        &self.maps[i]
    }

    /// Mutable runtime state of instrument `i`.
    pub fn get_mut(&mut self, i: usize) -> &mut MidiMap {
        &mut self.maps[i]
    }

    /// Iterate over all maps.
    pub fn iter(&self) -> impl Iterator<Item = &MidiMap> {
        self.maps.iter()
    }

    /// Reset every map to defaults, keeping nothing.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Recompute every instrument's channel range as a running sum of note
    /// counts.
    ///
    /// If the counts exceed the physical voices, instruments are shrunk from
    /// the last one down, sparing `keep` (the instrument whose count was just
    /// set). Instruments whose range changed are keyed off and their slots
    /// freed; their indices are returned so the caller can reload voices.
    pub fn allocate_base_voices(
        &mut self,
        config: &mut Configuration,
        keep: Option<usize>,
        bus: &mut impl RegisterBus,
    ) -> Vec<usize> {
        let mut excess = config.total_notes().saturating_sub(TOTAL_VOICES);
        for i in (0..INSTRUMENTS).rev() {
            if excess == 0 {
                break;
            }
            if Some(i) == keep {
                continue;
            }
            let inst = &mut config.instruments[i];
            let cut = excess.min(inst.note_count as usize);
            inst.note_count -= cut as u8;
            excess -= cut;
            if cut > 0 {
                debug!("ALLOC: instrument {} shrunk by {} to fit", i, cut);
            }
        }
        if excess > 0 {
            if let Some(k) = keep {
                config.instruments[k].note_count -= excess as u8;
            }
        }

        let mut moved = Vec::new();
        let mut base = 0;
        for (i, inst) in config.instruments.iter().enumerate() {
            let count = inst.note_count as usize;
            let map = &mut self.maps[i];
            // An empty range moving is not a change.
            let changed = map.note_count != count || (count > 0 && map.base_voice != base);
            if changed {
                for ch in map.channels() {
                    bus.write(0x08, ch as u8);
                }
                map.note_count = count;
                map.slots = [Slot::default(); TOTAL_VOICES];
                moved.push(i);
            }
            map.base_voice = base;
            base += count;
        }
        if !moved.is_empty() {
            debug!("ALLOC: reallocated instruments {:?}", moved);
        }
        moved
    }

    /// Start `note` on instrument `i`. Returns the slot used.
    pub fn note_on(
        &mut self,
        i: usize,
        note: u8,
        velocity: u8,
        bus: &mut impl RegisterBus,
    ) -> Option<usize> {
        let map = &mut self.maps[i];
        let n = if map.mono {
            map.note_count.min(1)
        } else {
            map.note_count
        };
        if n == 0 {
            trace!("ALLOC: instrument {} has no voices", i);
            return None;
        }
        let slots = &map.slots[..n];
        let slot = slots
            .iter()
            .position(|s| s.state <= NoteState::Released)
            .or_else(|| slots.iter().position(|s| s.note == note))
            .unwrap_or_else(|| {
                // Notes started within one tick share a step; the earliest
                // sequence number goes first.
                (0..n)
                    .min_by_key(|&s| (Reverse(slots[s].step), slots[s].sequence))
                    .unwrap_or(0)
            });

        map.next_sequence += 1;
        map.slots[slot] = Slot {
            note,
            state: NoteState::Pressed,
            velocity,
            step: 0,
            sequence: map.next_sequence,
            glide_from: map.last_note,
        };
        map.last_note = Some(note);

        // LFO sync pulse.
        bus.write(0x01, 0x02);
        bus.write(0x01, 0x00);
        trace!("ALLOC: note on inst={} note={} slot={}", i, note, slot);
        Some(slot)
    }

    /// Release every slot of instrument `i` holding `note`.
    pub fn note_off(&mut self, i: usize, note: u8) {
        let map = &mut self.maps[i];
        let n = map.note_count;
        for slot in map.slots[..n].iter_mut() {
            if slot.note == note && slot.state > NoteState::Released {
                slot.state = NoteState::Released;
            }
        }
    }

    /// Release every slot of instrument `i` and key its channels off.
    pub fn all_note_off(&mut self, i: usize, bus: &mut impl RegisterBus) {
        let map = &mut self.maps[i];
        let n = map.note_count;
        for slot in map.slots[..n].iter_mut() {
            if slot.state != NoteState::Idle {
                slot.state = NoteState::Released;
            }
        }
        for ch in map.channels() {
            bus.write(0x08, ch as u8);
        }
    }

    /// Load `tone` into every channel of instrument `i`. An out of range tone
    /// falls back to tone 0.
    pub fn set_voice(
        &mut self,
        i: usize,
        tone: usize,
        tones: &[VoiceData],
        bus: &mut impl RegisterBus,
    ) {
        let tone = if tone < tones.len() { tone } else { 0 };
        let Some(voice) = tones.get(tone) else {
            return;
        };
        let map = &mut self.maps[i];
        map.tone = tone;
        map.algorithm = voice.con & 7;
        map.slot_mask = voice.slot_mask & 0x0F;

        let regs = voice.operator_registers();
        for (level, r) in map.total_level.iter_mut().zip(regs.iter()) {
            *level = 127 - r.tl;
        }
        let carriers = IS_VOL_SET[map.algorithm as usize];
        for ch in map.channels() {
            let ch = ch as u8;
            let lr = bus.read(0x20 + ch) & 0xC0;
            bus.write(0x20 + ch, lr | voice.fl_con());
            for (op, r) in regs.iter().enumerate() {
                let addr = ch + op as u8 * 8;
                bus.write(0x40 + addr, r.dt1_mul);
                bus.write(0x60 + addr, if carriers[op] { SILENT_LEVEL } else { r.tl });
                bus.write(0x80 + addr, r.ks_ar);
                bus.write(0xA0 + addr, r.ame_d1r);
                bus.write(0xC0 + addr, r.dt2_d2r);
                bus.write(0xE0 + addr, r.sl_rr);
            }
        }
        debug!("ALLOC: instrument {} voice {} '{}'", i, tone, voice.name);
    }

    /// Set pitch bend from a 14-bit value centred at 8192.
    pub fn set_bend(&mut self, i: usize, value: u16) {
        self.maps[i].bend = (value as i32 - 8192).clamp(-8192, 8191) as i16;
    }

    /// Sustain pedal; values above 64 engage.
    pub fn set_hold(&mut self, i: usize, value: u8) {
        self.maps[i].hold = value > 64;
    }

    /// Portamento time.
    pub fn set_portamento_time(&mut self, i: usize, value: u8) {
        self.maps[i].portamento_time = value & 0x7F;
    }

    /// Portamento switch; values above 64 engage.
    pub fn set_portamento_on(&mut self, i: usize, value: u8) {
        self.maps[i].portamento_on = value > 64;
    }

    /// Channel volume.
    pub fn set_master_volume(&mut self, i: usize, value: u8) {
        self.maps[i].master_volume = value & 0x7F;
    }

    /// Expression.
    pub fn set_expression(&mut self, i: usize, value: u8) {
        self.maps[i].expression = value & 0x7F;
    }

    /// Bend range in semitones and cents.
    pub fn set_bend_sensitivity(&mut self, i: usize, semitones: Option<u8>, cents: Option<u8>) {
        let map = &mut self.maps[i];
        if let Some(m) = semitones {
            map.bend_sense_m = m & 0x7F;
        }
        if let Some(l) = cents {
            map.bend_sense_l = l & 0x7F;
        }
    }

    /// Modulation wheel: drive vibrato through the shared LFO.
    pub fn set_modulation_depth(&mut self, i: usize, value: u8, bus: &mut impl RegisterBus) {
        let map = &self.maps[i];
        bus.write(0x1B, 0x02);
        bus.write(0x18, MODULATION_LFRQ);
        bus.write(0x19, (value & 0x7F) | 0x80);
        bus.write(0x19, MODULATION_AMD);
        let pms = if map.lfo_enable { MODULATION_PMS_AMS } else { 0 };
        for ch in map.channels() {
            bus.write(0x38 + ch as u8, pms);
        }
    }

    /// Hold off, expression full, bend centred.
    pub fn reset_controllers(&mut self, i: usize) {
        let map = &mut self.maps[i];
        map.hold = false;
        map.expression = 127;
        map.bend = 0;
    }

    /// One synthesis tick for every instrument.
    pub fn refresh(&mut self, system_volume: u8, bus: &mut impl RegisterBus) {
        for map in self.maps.iter_mut() {
            synthesis::freq_write(map, bus);
            synthesis::volume_write(map, system_volume, bus);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterFile;

    fn allocated(counts: [u8; INSTRUMENTS]) -> (InstrumentMap, Configuration, RegisterFile) {
        let mut config = Configuration::default();
        for (inst, &c) in config.instruments.iter_mut().zip(counts.iter()) {
            inst.note_count = c;
        }
        let mut map = InstrumentMap::new();
        let mut regs = RegisterFile::new();
        map.allocate_base_voices(&mut config, None, &mut regs);
        (map, config, regs)
    }

    #[test]
    fn test_allocation_ranges_do_not_overlap() {
        let cases: [[u8; INSTRUMENTS]; 5] = [
            [1; 8],
            [8, 0, 0, 0, 0, 0, 0, 0],
            [0, 0, 3, 0, 2, 0, 0, 3],
            [2, 2, 2, 2, 0, 0, 0, 0],
            [0; 8],
        ];
        for counts in cases {
            let (map, _, _) = allocated(counts);
            let mut next = 0;
            for (i, m) in map.iter().enumerate() {
                assert_eq!(m.note_count, counts[i] as usize);
                assert_eq!(m.base_voice, next);
                next += m.note_count;
            }
            assert!(next <= TOTAL_VOICES);
        }
    }

    #[test]
    fn test_allocation_is_idempotent() {
        let (mut map, mut config, mut regs) = allocated([2, 2, 2, 2, 0, 0, 0, 0]);
        assert!(map.allocate_base_voices(&mut config, None, &mut regs).is_empty());
    }

    #[test]
    fn test_growing_one_instrument_shrinks_the_last() {
        let (mut map, mut config, mut regs) = allocated([1; 8]);
        config.instruments[0].note_count = 5;
        let moved = map.allocate_base_voices(&mut config, Some(0), &mut regs);
        let counts: Vec<u8> = config.instruments.iter().map(|i| i.note_count).collect();
        assert_eq!(counts, vec![5, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(config.total_notes(), TOTAL_VOICES);
        assert_eq!(moved, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(map.get(1).base_voice, 5);
        assert_eq!(map.get(3).channels(), 7..8);
    }

    #[test]
    fn test_moved_instruments_are_silenced() {
        let (mut map, mut config, mut regs) = allocated([2, 2, 0, 0, 0, 0, 0, 0]);
        map.note_on(1, 60, 100, &mut regs);
        map.refresh(127, &mut regs);
        assert_eq!(map.get(1).slots[0].state, NoteState::Sounding);

        config.instruments[0].note_count = 1;
        let moved = map.allocate_base_voices(&mut config, Some(0), &mut regs);
        assert_eq!(moved, vec![0, 1]);
        assert_eq!(map.get(1).base_voice, 1);
        assert!(!map.get(1).is_active());
    }

    #[test]
    fn test_note_on_prefers_free_slot() {
        let (mut map, _, mut regs) = allocated([3, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(map.note_on(0, 60, 100, &mut regs), Some(0));
        assert_eq!(map.note_on(0, 62, 100, &mut regs), Some(1));
        map.note_off(0, 60);
        assert_eq!(map.get(0).slots[0].state, NoteState::Released);
        // Released counts as free.
        assert_eq!(map.note_on(0, 64, 100, &mut regs), Some(0));
        // LFO sync pulse ends with the reset bit clear.
        assert_eq!(regs.read(0x01), 0);
    }

    #[test]
    fn test_same_note_retriggers_its_slot() {
        let (mut map, _, mut regs) = allocated([2, 0, 0, 0, 0, 0, 0, 0]);
        map.note_on(0, 60, 100, &mut regs);
        map.note_on(0, 62, 100, &mut regs);
        map.refresh(127, &mut regs);
        assert_eq!(map.note_on(0, 62, 90, &mut regs), Some(1));
        assert_eq!(map.get(0).slots[1].velocity, 90);
    }

    #[test]
    fn test_voice_stealing_takes_the_oldest() {
        let (mut map, _, mut regs) = allocated([2, 0, 0, 0, 0, 0, 0, 0]);
        map.note_on(0, 60, 100, &mut regs);
        map.refresh(127, &mut regs);
        map.note_on(0, 64, 100, &mut regs);
        map.refresh(127, &mut regs);
        assert_eq!(map.note_on(0, 67, 100, &mut regs), Some(0));
        assert_eq!(map.get(0).slots[0].note, 67);
        assert_eq!(map.get(0).slots[1].note, 64);
    }

    #[test]
    fn test_voice_stealing_without_ticks() {
        let (mut map, _, mut regs) = allocated([2, 0, 0, 0, 0, 0, 0, 0]);
        map.note_on(0, 60, 100, &mut regs);
        map.note_on(0, 64, 100, &mut regs);
        assert_eq!(map.note_on(0, 67, 100, &mut regs), Some(0));
        assert_eq!(map.get(0).slots[1].note, 64);
    }

    #[test]
    fn test_voice_stealing_within_one_tick_keeps_newest() {
        let (mut map, _, mut regs) = allocated([2, 0, 0, 0, 0, 0, 0, 0]);
        for note in [60, 62, 64, 65] {
            map.note_on(0, note, 100, &mut regs);
        }
        assert_eq!(map.get(0).slots[0].note, 64);
        assert_eq!(map.get(0).slots[1].note, 65);
    }

    #[test]
    fn test_empty_instrument_ignores_notes() {
        let (mut map, _, mut regs) = allocated([0, 8, 0, 0, 0, 0, 0, 0]);
        assert_eq!(map.note_on(0, 60, 100, &mut regs), None);
        assert!(!map.get(1).is_active());
    }

    #[test]
    fn test_hold_keeps_released_notes_keyed() {
        let (mut map, _, mut regs) = allocated([1, 0, 0, 0, 0, 0, 0, 0]);
        map.get_mut(0).slot_mask = 0x0F;
        map.set_hold(0, 127);
        map.note_on(0, 60, 100, &mut regs);
        map.refresh(127, &mut regs);
        assert_eq!(regs.read(0x08), 0x78);

        map.note_off(0, 60);
        map.refresh(127, &mut regs);
        assert_eq!(regs.read(0x08), 0x78);
        assert_eq!(map.get(0).slots[0].state, NoteState::Released);

        map.set_hold(0, 0);
        map.refresh(127, &mut regs);
        assert_eq!(regs.read(0x08), 0x00);
        assert_eq!(map.get(0).slots[0].state, NoteState::Idle);
    }

    #[test]
    fn test_set_voice_loads_registers() {
        let (mut map, _, mut regs) = allocated([0, 2, 0, 0, 0, 0, 0, 0]);
        let tones = VoiceData::default_tones();
        regs.write(0x20, 0x40);
        regs.write(0x21, 0x40);
        map.set_voice(1, 5, &tones, &mut regs);

        let voice = &tones[5];
        let expect = voice.operator_registers();
        for ch in 0..2u8 {
            assert_eq!(regs.read(0x20 + ch), 0x40 | voice.fl_con());
            for op in 0..4u8 {
                let r = &expect[op as usize];
                let addr = ch + op * 8;
                assert_eq!(regs.read(0x40 + addr), r.dt1_mul);
                assert_eq!(regs.read(0x80 + addr), r.ks_ar);
                assert_eq!(regs.read(0xE0 + addr), r.sl_rr);
                let carrier = IS_VOL_SET[voice.con as usize][op as usize];
                assert_eq!(regs.read(0x60 + addr), if carrier { 127 } else { r.tl });
            }
        }
        assert_eq!(map.get(1).tone, 5);
        assert_eq!(map.get(1).total_level[3], 127 - voice.ops[3].tl);
        // Channel 2 belongs to nobody and is untouched.
        assert_eq!(regs.read(0x42), 0);
    }

    #[test]
    fn test_out_of_range_tone_uses_tone_zero() {
        let (mut map, _, mut regs) = allocated([1, 0, 0, 0, 0, 0, 0, 0]);
        let tones = VoiceData::default_tones();
        map.set_voice(0, 10_000, &tones, &mut regs);
        assert_eq!(map.get(0).tone, 0);
        assert_eq!(regs.read(0x40), tones[0].operator_registers()[0].dt1_mul);
    }

    #[test]
    fn test_bend_is_centred_and_clamped() {
        let mut map = InstrumentMap::new();
        map.set_bend(0, 8192);
        assert_eq!(map.get(0).bend, 0);
        map.set_bend(0, 0);
        assert_eq!(map.get(0).bend, -8192);
        map.set_bend(0, 0x3FFF);
        assert_eq!(map.get(0).bend, 8191);
        map.set_bend(0, u16::MAX);
        assert_eq!(map.get(0).bend, 8191);
    }

    #[test]
    fn test_all_note_off_keys_off_channels() {
        let (mut map, _, mut regs) = allocated([0, 0, 2, 0, 0, 0, 0, 0]);
        map.get_mut(2).slot_mask = 0x0F;
        map.note_on(2, 60, 100, &mut regs);
        map.refresh(127, &mut regs);
        map.all_note_off(2, &mut regs);
        assert_eq!(regs.read(0x08), 0x01);
        assert_eq!(map.get(2).slots[0].state, NoteState::Released);
        map.refresh(127, &mut regs);
        assert!(!map.get(2).is_active());
    }

    #[test]
    fn test_reset_runtime_keeps_allocation() {
        let (mut map, _, mut regs) = allocated([0, 3, 0, 0, 0, 0, 0, 0]);
        map.note_on(1, 60, 100, &mut regs);
        map.set_expression(1, 10);
        map.set_hold(1, 127);
        map.get_mut(1).reset_runtime();
        let m = map.get(1);
        assert_eq!((m.base_voice, m.note_count), (0, 3));
        assert_eq!(m.expression, 127);
        assert!(!m.hold);
        assert!(!m.is_active());
    }
}
