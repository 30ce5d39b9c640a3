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

//! Emulator of the Yamaha FB-01 / IBM Music Feature Card sound module.
//!
//! MIDI and SysEx messages drive eight instruments that share the eight
//! channels of a YM2151 (OPM) FM chip. The crate decodes the messages,
//! allocates chip channels to instruments, turns notes into register writes
//! and renders the chip output to PCM.
//!
//! ```no_run
//! use fb01emu::{EngineConfig, Fb01Synth};
//!
//! let mut synth = Fb01Synth::new(EngineConfig::default()).unwrap();
//! synth.play_msg(0x64_45_90, None); // note on, A4
//! let mut pcm = vec![0i16; 2 * 44100];
//! synth.render(&mut pcm);
//! ```

#![warn(missing_docs)]

pub mod allocator;
pub mod bank;
pub mod config;
pub mod error;
pub mod midi;
pub mod mixer;
pub mod opm;
pub mod packet;
pub mod queue;
pub mod registers;
pub mod synth;
pub mod synthesis;
pub mod sysex;
pub mod voice;
pub mod voice_file;
pub mod wav;

pub use allocator::{InstrumentMap, MidiMap, NoteState};
pub use bank::{PackedVoice, VoiceBank};
pub use config::{Configuration, Instrument};
pub use error::{Error, Result};
pub use midi::{MidiEvent, MidiStreamParser};
pub use mixer::OutputFormat;
pub use opm::{OpmBackend, Ym2151};
pub use queue::MidiDelayMode;
pub use registers::{RegisterBus, RegisterFile};
pub use synth::{EngineConfig, Fb01Synth, SharedSynth};
pub use sysex::MidiOut;
pub use voice::VoiceData;
