use fb01emu::config::param;
use fb01emu::sysex::voice_dump;
use fb01emu::{PackedVoice, RegisterBus};

mod common;
use common::{capture_midi_out, sine_voice, synth};

#[test]
fn bank_dump_replays_into_another_unit() {
    let mut source = synth();
    let out = capture_midi_out(&mut source);

    // Single voice store into instrument 0, whose tone lives in bank 0.
    let packed = PackedVoice::from_voice(&sine_voice());
    source.play_sysex(&voice_dump(0, 0, &packed)).unwrap();
    assert_eq!(source.tone(0).unwrap().ops, sine_voice().ops);

    source
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x00, 0x00, 0xF7])
        .unwrap();
    let dump = out.try_recv().unwrap();
    assert_eq!(dump.first(), Some(&0xF0));
    assert_eq!(dump.last(), Some(&0xF7));

    let mut target = synth();
    assert_ne!(target.tone(0), source.tone(0));
    target.play_sysex(&dump).unwrap();
    assert_eq!(target.tone(0), source.tone(0));
    assert_eq!(
        target.bank(0).unwrap().to_bytes(),
        source.bank(0).unwrap().to_bytes()
    );
    // Instrument 0 picked the new voice up.
    assert_eq!(target.registers().read(0x20), 0xC7);
}

#[test]
fn voice_dump_replays_as_single_voice_store() {
    let mut source = synth();
    let out = capture_midi_out(&mut source);
    source
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x2A, 0x40, 0x00, 0xF7])
        .unwrap();
    let dump = out.try_recv().unwrap();

    let mut target = synth();
    // Load instrument 2's voice into instrument 4's tone.
    let mut replay = dump.clone();
    replay[4] = 0x08 | 4;
    target.play_sysex(&replay).unwrap();
    assert_eq!(target.tone(4).unwrap().ops, source.tone(2).unwrap().ops);
}

#[test]
fn configuration_dump_replays() {
    let mut source = synth();
    let out = capture_midi_out(&mut source);
    for (instrument, p, value) in [
        (0u8, param::NOTE_COUNT, 3u8),
        (2, param::PAN, 10),
        (1, param::DETUNE, 70),
        (5, param::KEY_LOW, 36),
    ] {
        source
            .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x18 | instrument, p, value, 0xF7])
            .unwrap();
    }
    source
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x01, 0x00, 0xF7])
        .unwrap();
    let dump = out.try_recv().unwrap();

    let mut target = synth();
    target.play_sysex(&dump).unwrap();
    assert_eq!(
        target.configuration().to_bytes(),
        source.configuration().to_bytes()
    );
    let bases = |s: &fb01emu::Fb01Synth| -> Vec<(usize, usize)> {
        s.instrument_map()
            .iter()
            .map(|m| (m.base_voice, m.note_count))
            .collect()
    };
    assert_eq!(bases(&target), bases(&source));
}

#[test]
fn all_configurations_dump_replays() {
    let mut source = synth();
    let out = capture_midi_out(&mut source);
    source
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x18, param::PAN, 5, 0xF7])
        .unwrap();
    source
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x40, 0x07, 0xF7])
        .unwrap();
    source
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x03, 0x00, 0xF7])
        .unwrap();
    let dump = out.try_recv().unwrap();

    let mut target = synth();
    target.play_sysex(&dump).unwrap();
    let stored = target.stored_configuration(7).unwrap();
    assert_eq!(stored.instruments[0].pan, 5);
    assert_eq!(
        stored.to_bytes(),
        source.stored_configuration(7).unwrap().to_bytes()
    );
}

#[test]
fn dumps_without_midi_out_are_dropped() {
    let mut synth = synth();
    synth
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x04, 0x00, 0xF7])
        .unwrap();

    let out = capture_midi_out(&mut synth);
    synth
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x04, 0x00, 0xF7])
        .unwrap();
    assert_eq!(
        out.try_recv().unwrap(),
        vec![0xF0, 0x43, 0x75, 0x00, 0x20, 0x04, 0x00, 0x00, 0xF7]
    );
    assert!(out.try_recv().is_err());
}

#[test]
fn bank_dump_with_bad_checksum_is_still_stored() {
    let mut source = synth();
    let out = capture_midi_out(&mut source);
    let packed = PackedVoice::from_voice(&sine_voice());
    source.play_sysex(&voice_dump(0, 0, &packed)).unwrap();
    source
        .play_sysex(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x00, 0x00, 0xF7])
        .unwrap();
    let mut dump = out.try_recv().unwrap();
    // Last packet checksum, just before F7.
    let at = dump.len() - 2;
    dump[at] ^= 0x01;

    let mut target = synth();
    target.play_sysex(&dump).unwrap();
    assert_eq!(target.tone(0), source.tone(0));
    assert_eq!(
        target.bank(0).unwrap().to_bytes(),
        source.bank(0).unwrap().to_bytes()
    );
}

#[test]
fn single_voice_with_bad_checksum_is_still_stored() {
    let mut synth = synth();
    let mut message = voice_dump(0, 0, &PackedVoice::from_voice(&sine_voice()));
    let at = message.len() - 2;
    message[at] ^= 0x01;
    synth.play_sysex(&message).unwrap();
    assert_eq!(synth.tone(0).unwrap().ops, sine_voice().ops);
}
