#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver};

use rustfft::{num_complex::Complex, FftPlanner};

use fb01emu::voice::OperatorData;
use fb01emu::{EngineConfig, Fb01Synth, MidiEvent, VoiceData};

pub const SAMPLE_RATE: u32 = 44100;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine with default settings.
pub fn synth() -> Fb01Synth {
    init_logging();
    Fb01Synth::new(EngineConfig::default()).unwrap()
}

/// Attach a MIDI out that forwards every message to the returned receiver.
pub fn capture_midi_out(synth: &mut Fb01Synth) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    synth.set_midi_out(move |message: &[u8]| {
        let _ = tx.send(message.to_vec());
    });
    rx
}

pub fn note_on(channel: u8, note: u8, velocity: u8) -> MidiEvent {
    MidiEvent::NoteOn {
        channel,
        note,
        velocity,
    }
}

pub fn note_off(channel: u8, note: u8) -> MidiEvent {
    MidiEvent::NoteOff {
        channel,
        note,
        velocity: 0,
    }
}

/// Four identical carriers at MUL 1 with full sustain: a plain sine.
pub fn sine_voice() -> VoiceData {
    let op = OperatorData::from_file_order(31, 0, 0, 15, 0, 0, 0, 1, 0, 0, 0);
    VoiceData {
        name: "SINE".to_string(),
        con: 7,
        fl: 0,
        slot_mask: 0x0F,
        ops: [op; 4],
    }
}

/// Render `frames` frames and return the mono mix as floats.
pub fn render_mono(synth: &mut Fb01Synth, frames: usize) -> Vec<f32> {
    let mut pcm = vec![0i16; frames * 2];
    synth.render(&mut pcm);
    pcm.chunks_exact(2)
        .map(|f| (f[0] as f32 + f[1] as f32) / 2.0 / 32768.0)
        .collect()
}

/// Frequency of the strongest FFT bin.
pub fn dominant_frequency(samples: &[f32], sample_rate: u32) -> f32 {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(samples.len());

    let mut buffer: Vec<Complex<f32>> = samples
        .iter()
        .map(|&s| Complex { re: s, im: 0.0 })
        .collect();
    fft.process(&mut buffer);

    let bin_width = sample_rate as f32 / samples.len() as f32;
    let (bin, _) = buffer
        .iter()
        .take(buffer.len() / 2)
        .enumerate()
        .skip(1)
        .map(|(i, c)| (i, c.norm()))
        .fold((0, 0.0f32), |best, x| if x.1 > best.1 { x } else { best });
    bin as f32 * bin_width
}
