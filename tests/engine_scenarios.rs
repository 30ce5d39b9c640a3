use fb01emu::config::param;
use fb01emu::registers::RegisterBus;
use fb01emu::sysex::native_voice_message;
use fb01emu::{MidiEvent, NoteState, OpmBackend};

mod common;
use common::{note_off, note_on, sine_voice, synth};

fn instrument_param(instrument: u8, param: u8, value: u8) -> Vec<u8> {
    vec![0xF0, 0x43, 0x75, 0x00, 0x18 | instrument, param, value, 0xF7]
}

fn ranges(synth: &fb01emu::Fb01Synth) -> Vec<(usize, usize)> {
    synth
        .instrument_map()
        .iter()
        .map(|m| (m.base_voice, m.note_count))
        .collect()
}

#[test]
fn program_change_then_note_keys_one_voice() {
    let mut synth = synth();
    synth.play_event_now(&MidiEvent::ProgramChange {
        channel: 0,
        program: 5,
    });
    synth.play_event_now(&note_on(0, 60, 100));

    let keyed: Vec<usize> = (0..8).filter(|&ch| synth.chip().key_on_mask(ch) != 0).collect();
    assert_eq!(keyed, vec![0]);

    let tone = synth.tone(5).unwrap().clone();
    let regs = synth.registers();
    for (op, r) in tone.operator_registers().iter().enumerate() {
        let slot = 8 * op as u8;
        assert_eq!(regs.read(0x40 + slot), r.dt1_mul, "op {}", op);
        assert_eq!(regs.read(0x80 + slot), r.ks_ar, "op {}", op);
        assert_eq!(regs.read(0xA0 + slot), r.ame_d1r, "op {}", op);
        assert_eq!(regs.read(0xC0 + slot), r.dt2_d2r, "op {}", op);
        assert_eq!(regs.read(0xE0 + slot), r.sl_rr, "op {}", op);
    }
    assert_eq!(regs.read(0x20) & 0x3F, tone.fl_con());

    let before: Vec<_> = synth.instrument_map().iter().skip(1).cloned().collect();
    synth.apply_event(&note_off(0, 60));
    let map = synth.instrument_map().get(0);
    assert_eq!(map.slots[0].state, NoteState::Released);
    let after: Vec<_> = synth.instrument_map().iter().skip(1).cloned().collect();
    assert_eq!(before, after);
}

#[test]
fn note_count_change_reallocates() {
    let mut synth = synth();
    synth
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x18, 0x00, 0x05, 0xF7])
        .unwrap();
    assert_eq!(synth.configuration().instruments[0].note_count, 5);
    assert_eq!(synth.configuration().total_notes(), 8);
    assert_eq!(ranges(&synth)[0], (0, 5));
    assert_eq!(ranges(&synth)[1], (5, 1));
}

#[test]
fn allocation_ranges_stay_ordered_and_disjoint() {
    let mut synth = synth();
    let mut seed = 0x1234_5678u32;
    for _ in 0..200 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        let instrument = ((seed >> 16) % 8) as u8;
        let count = ((seed >> 8) % 9) as u8;
        synth
            .play_sysex(&instrument_param(instrument, param::NOTE_COUNT, count))
            .unwrap();

        let mut next = 0;
        for (base, count) in ranges(&synth) {
            if count > 0 {
                assert!(base >= next, "range starting at {} overlaps", base);
                next = base + count;
            }
        }
        assert!(next <= 8);
        assert!(synth.configuration().total_notes() <= 8);
    }
}

#[test]
fn oldest_note_is_stolen() {
    let mut synth = synth();
    synth
        .play_sysex(&instrument_param(0, param::NOTE_COUNT, 2))
        .unwrap();
    for note in [60, 62, 64] {
        synth.play_event_now(&note_on(0, note, 100));
    }
    let map = synth.instrument_map().get(0);
    assert_eq!(map.slots[0].note, 64);
    assert_eq!(map.slots[1].note, 62);
    assert!(map.live_slots().iter().all(|s| s.state == NoteState::Sounding));
}

#[test]
fn notes_in_one_event_list_steal_the_oldest() {
    let mut synth = synth();
    synth
        .play_sysex(&instrument_param(0, param::NOTE_COUNT, 2))
        .unwrap();
    synth
        .play_sysex(&[
            0xF0, 0x43, 0x75, 0x00, 0x70, //
            0x10, 60, 100, //
            0x10, 62, 100, //
            0x10, 64, 100, //
            0x10, 65, 100, //
            0xF7,
        ])
        .unwrap();
    let map = synth.instrument_map().get(0);
    let notes: Vec<u8> = map.live_slots().iter().map(|s| s.note).collect();
    assert_eq!(notes, vec![64, 65]);
}

#[test]
fn key_ranges_split_one_channel() {
    let mut synth = synth();
    for msg in [
        instrument_param(1, param::MIDI_CHANNEL, 0),
        instrument_param(0, param::KEY_HIGH, 59),
        instrument_param(1, param::KEY_LOW, 60),
    ] {
        synth.play_sysex(&msg).unwrap();
    }
    synth.play_event_now(&note_on(0, 50, 100));
    assert!(synth.instrument_map().get(0).is_active());
    assert!(!synth.instrument_map().get(1).is_active());

    synth.play_event_now(&note_on(0, 70, 100));
    assert_eq!(synth.instrument_map().get(1).slots[0].note, 70);
    assert_eq!(synth.instrument_map().get(0).slots[0].note, 50);
}

#[test]
fn hold_pedal_sustains_until_released() {
    let mut synth = synth();
    let hold = |value| MidiEvent::ControlChange {
        channel: 2,
        controller: 0x40,
        value,
    };
    synth.play_event_now(&hold(127));
    synth.play_event_now(&note_on(2, 60, 100));
    synth.play_event_now(&note_off(2, 60));
    synth.refresh();
    assert_ne!(synth.chip().key_on_mask(2), 0);

    synth.play_event_now(&hold(0));
    assert_eq!(synth.chip().key_on_mask(2), 0);
    assert!(!synth.instrument_map().get(2).is_active());
}

#[test]
fn modulator_levels_ignore_velocity() {
    for con in 0..8u8 {
        let mut synth = synth();
        let mut voice = sine_voice();
        voice.con = con;
        for (i, op) in voice.ops.iter_mut().enumerate() {
            op.tl = 10 + i as u8;
        }
        synth.set_tone(0, voice);

        let mut levels = Vec::new();
        for velocity in [1, 127] {
            synth.play_event_now(&note_on(0, 60, velocity));
            levels.push((0..4u8).map(|op| synth.registers().read(0x60 + 8 * op)).collect::<Vec<_>>());
        }
        let carriers = fb01emu::synthesis::IS_VOL_SET[con as usize];
        for op in 0..4 {
            if carriers[op] {
                assert!(levels[0][op] > levels[1][op], "con {} op {}", con, op);
            } else {
                assert_eq!(levels[0][op], 10 + op as u8, "con {} op {}", con, op);
                assert_eq!(levels[1][op], 10 + op as u8, "con {} op {}", con, op);
            }
        }
    }
}

#[test]
fn event_list_plays_embedded_messages() {
    let mut synth = synth();
    synth
        .play_sysex(&[
            0xF0, 0x43, 0x75, 0x00, 0x70, //
            0x73, 0x09, 0x10, // instrument 3 pan
            0x11, 60, 100, // key on, channel 1
            0xF7,
        ])
        .unwrap();
    synth.refresh();
    assert_eq!(synth.configuration().instruments[3].pan, 0x10);
    assert!(synth.instrument_map().get(1).is_active());
}

#[test]
fn native_voice_load_replaces_tone_in_use() {
    let mut synth = synth();
    let voice = sine_voice();
    synth.play_sysex(&native_voice_message(3, &voice)).unwrap();
    assert_eq!(synth.tone(3).unwrap().ops, voice.ops);
    assert_eq!(synth.registers().read(0x23) & 7, 7);
    assert_eq!(synth.bank(0).unwrap().voice(3).unwrap().to_voice().ops, voice.ops);
}

#[test]
fn configuration_store_and_recall() {
    let mut synth = synth();
    synth
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x40, 0x02, 0xF7])
        .unwrap();
    synth
        .play_sysex(&instrument_param(4, param::PAN, 3))
        .unwrap();
    assert_eq!(synth.configuration().instruments[4].pan, 3);

    synth
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x10, 0x21, 0x02, 0xF7])
        .unwrap();
    assert_eq!(synth.configuration().instruments[4].pan, 64);
}

#[test]
fn gm_mode_on_resets() {
    let mut synth = synth();
    synth
        .play_sysex(&instrument_param(0, param::NOTE_COUNT, 4))
        .unwrap();
    synth.play_event_now(&note_on(0, 60, 100));
    synth
        .play_sysex(&[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7])
        .unwrap();
    assert_eq!(synth.configuration().instruments[0].note_count, 1);
    assert!(!synth.instrument_map().get(0).is_active());
}

#[test]
fn unknown_sysex_is_ignored() {
    let mut synth = synth();
    let before = synth.registers().clone();
    synth
        .play_sysex(&[0xF0, 0x41, 0x10, 0x42, 0x12, 0xF7])
        .unwrap();
    assert_eq!(synth.registers(), &before);
}
