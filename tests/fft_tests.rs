use approx::assert_relative_eq;

mod common;
use common::{dominant_frequency, note_off, note_on, render_mono, sine_voice, synth, SAMPLE_RATE};

const FFT_LEN: usize = 16384;

fn rendered_pitch(note: u8) -> (f64, f32) {
    let mut synth = synth();
    synth.set_tone(0, sine_voice());
    synth.play_event_now(&note_on(0, note, 127));

    // Skip the attack.
    render_mono(&mut synth, 2048);
    let samples = render_mono(&mut synth, FFT_LEN);
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.01, "note {} rendered silence", note);

    (
        synth.chip().channel_frequency(0),
        dominant_frequency(&samples, SAMPLE_RATE),
    )
}

#[test]
fn a4_renders_near_438_hz() {
    let (programmed, measured) = rendered_pitch(69);
    assert_relative_eq!(programmed, 438.04, max_relative = 2e-3);
    // One FFT bin is about 2.7 Hz.
    assert!(
        (measured - 438.0).abs() < 6.0,
        "dominant frequency {} Hz",
        measured
    );
}

#[test]
fn octave_up_doubles_frequency() {
    let (low, _) = rendered_pitch(57);
    let (high, measured) = rendered_pitch(69);
    assert_relative_eq!(high / low, 2.0, max_relative = 1e-3);
    assert!((measured as f64 - high).abs() < 6.0);
}

#[test]
fn released_note_fades_out() {
    let mut synth = synth();
    synth.set_tone(0, sine_voice());
    synth.play_event_now(&note_on(0, 69, 127));
    render_mono(&mut synth, 4096);
    synth.play_event_now(&note_off(0, 69));

    // RR 15 is the fastest release.
    render_mono(&mut synth, SAMPLE_RATE as usize / 2);
    let tail = render_mono(&mut synth, 1024);
    let peak = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak < 1e-3, "tail peak {}", peak);
    assert!(!synth.is_active());
}
