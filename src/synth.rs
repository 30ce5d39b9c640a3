//! The emulator engine.
//!
//! [`Fb01Synth`] ties the pieces together: MIDI and SysEx decoding mutate
//! the configuration and the per-instrument [`InstrumentMap`], each tick the
//! synthesis pass turns that state into chip register writes, and rendering
//! clocks the chip and mixes its channels into PCM.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::allocator::InstrumentMap;
use crate::bank::{PackedVoice, VoiceBank, BANK_HEADER_LEN, PACKED_VOICE_LEN};
use crate::config::{
    Configuration, ParamEffect, CONFIG_LEN, INSTRUMENTS, STORED_CONFIGS,
};
use crate::error::{Error, Result};
use crate::midi::{Controller, MidiEvent};
use crate::mixer::{self, Mixer, OutputFormat, MAX_VOLUME};
use crate::opm::{OpmBackend, OpmBus, Ym2151, CHANNELS};
use crate::packet::{decode_type_a, decode_type_a_stream, decode_type_b};
use crate::queue::{EventQueue, MidiDelayMode};
use crate::registers::{RegisterBus, RegisterFile};
use crate::sysex::{self, ListEvent, MidiOut, SysexCommand};
use crate::voice::{VoiceData, BANK_COUNT, VOICES_PER_BANK};
use crate::voice_file::load_voice_file;

/// Frames between synthesis ticks.
pub const TICK_FRAMES: usize = 64;

/// Banks that accept SysEx stores. The rest are built at startup.
pub const RAM_BANKS: usize = 2;

/// Highest sample rate accepted.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// No RPN/NRPN selected.
const PARAM_NONE: u16 = 0xFFFF;

/// RPN 0: pitch bend sensitivity.
const RPN_BEND_SENSITIVITY: u16 = 0;

/// LFRQ written at reset.
const RESET_LFRQ: u8 = 196;

/// Triangle LFO waveform in register 0x1B.
const LFO_TRIANGLE: u8 = 0x02;

/// Engine settings, loadable from JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Chip master clock in Hz.
    pub opm_clock: u32,
    /// Mixer master volume, 0..=127.
    pub master_volume: u8,
    /// PCM layout produced by [`Fb01Synth::render_bytes`].
    pub output_format: OutputFormat,
    /// Queued events before `play_msg` starts rejecting.
    pub queue_capacity: usize,
    /// MIDI interface transfer delay.
    pub midi_delay_mode: MidiDelayMode,
    /// Voice parameter file to load over the built-in tones.
    pub voice_file: Option<PathBuf>,
    /// SysEx system channel, 0..15.
    pub system_channel: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            opm_clock: 4_000_000,
            master_volume: MAX_VOLUME,
            output_format: OutputFormat::Stereo16,
            queue_capacity: 1024,
            midi_delay_mode: MidiDelayMode::default(),
            voice_file: None,
            system_channel: 0,
        }
    }
}

impl EngineConfig {
    /// Read settings from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(Error::InvalidSampleRate(self.sample_rate));
        }
        if self.opm_clock == 0 {
            return Err(Error::Config("opm_clock must be non-zero".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be non-zero".to_string()));
        }
        if self.master_volume > MAX_VOLUME {
            return Err(Error::Config(format!(
                "master_volume {} exceeds {}",
                self.master_volume, MAX_VOLUME
            )));
        }
        if self.system_channel > 15 {
            return Err(Error::Config(format!(
                "system_channel {} out of range",
                self.system_channel
            )));
        }
        Ok(())
    }
}

/// The emulated sound module.
pub struct Fb01Synth<C: OpmBackend = Ym2151> {
    settings: EngineConfig,
    bus: OpmBus<C>,
    maps: InstrumentMap,
    tones: Vec<VoiceData>,
    banks: Vec<VoiceBank>,
    config: Configuration,
    stored: Vec<Configuration>,
    system_volume: u8,
    master_detune: i8,
    rpn: [u16; 16],
    nrpn: [u16; 16],
    mixer: Mixer,
    midi_out: Option<Box<dyn MidiOut>>,
    queue: EventQueue,
    position: u64,
    next_tick: u64,
}

impl Fb01Synth<Ym2151> {
    /// Create an engine with the built-in chip model.
    ///
    /// # Arguments
    /// * `settings` - Engine settings; validated before anything is built
    pub fn new(settings: EngineConfig) -> Result<Self> {
        settings.validate()?;
        let chip = Ym2151::new(settings.opm_clock, settings.sample_rate);
        Self::with_backend(settings, chip)
    }
}

impl<C: OpmBackend> Fb01Synth<C> {
    /// Create an engine around any chip backend.
    ///
    /// # Arguments
    /// * `settings` - Engine settings
    /// * `chip` - Chip backend receiving register writes
    pub fn with_backend(settings: EngineConfig, chip: C) -> Result<Self> {
        settings.validate()?;

        let mut tones = VoiceData::default_tones();
        if let Some(path) = &settings.voice_file {
            match load_voice_file(path) {
                Ok(file) => {
                    if file.failures > 0 {
                        warn!(
                            "SYNTH: {} malformed entries in {}",
                            file.failures,
                            path.display()
                        );
                    }
                    file.apply(&mut tones);
                }
                Err(e) => {
                    warn!(
                        "SYNTH: voice file {} unusable ({}), using built-in tones",
                        path.display(),
                        e
                    );
                }
            }
        }
        let banks = (0..BANK_COUNT)
            .map(|b| {
                let start = b * VOICES_PER_BANK;
                VoiceBank::from_voices(
                    &format!("Bank{}", b + 1),
                    &tones[start..start + VOICES_PER_BANK],
                )
            })
            .collect();

        let queue = EventQueue::new(
            settings.queue_capacity,
            settings.sample_rate,
            settings.midi_delay_mode,
        );
        let mut synth = Self {
            bus: OpmBus::new(chip),
            maps: InstrumentMap::new(),
            tones,
            banks,
            config: Configuration::default(),
            stored: vec![Configuration::default(); STORED_CONFIGS],
            system_volume: MAX_VOLUME,
            master_detune: 0,
            rpn: [PARAM_NONE; 16],
            nrpn: [PARAM_NONE; 16],
            mixer: Mixer::new(settings.master_volume),
            midi_out: None,
            queue,
            position: 0,
            next_tick: 0,
            settings,
        };
        synth.reset();
        Ok(synth)
    }

    /// Return chip and instrument state to power-on defaults. Queued events
    /// and the render position are kept.
    pub fn reset(&mut self) {
        self.bus.reset();
        let bus = &mut self.bus;
        for ch in 0..CHANNELS as u8 {
            bus.write(0x08, ch);
        }
        bus.write(0x01, 0x00);
        bus.write(0x0F, 0x00);
        bus.write(0x18, RESET_LFRQ);
        bus.write(0x19, 0x00);
        bus.write(0x19, 0x80);
        bus.write(0x1B, LFO_TRIANGLE);
        for ch in 0..CHANNELS as u8 {
            bus.write(0x20 + ch, 0xC0);
            bus.write(0x28 + ch, 0x00);
            bus.write(0x30 + ch, 0x00);
            bus.write(0x38 + ch, 0x00);
        }
        for addr in 0x40..=0xFFu8 {
            bus.write(addr, 0x00);
        }

        self.config = Configuration::default();
        self.maps.reset();
        self.rpn = [PARAM_NONE; 16];
        self.nrpn = [PARAM_NONE; 16];
        self.master_detune = 0;
        self.maps
            .allocate_base_voices(&mut self.config, None, &mut self.bus);
        for i in 0..INSTRUMENTS {
            self.reload_instrument(i);
        }
        self.system_volume = MAX_VOLUME;
        self.sync_mixer();
        debug!("SYNTH: reset");
    }

    /// Attach the receiver for outbound dumps.
    pub fn set_midi_out(&mut self, out: impl MidiOut + 'static) {
        self.midi_out = Some(Box::new(out));
    }

    /// Detach the outbound receiver.
    pub fn clear_midi_out(&mut self) {
        self.midi_out = None;
    }

    // Direct API

    /// Apply one event to engine state without ticking.
    pub fn apply_event(&mut self, event: &MidiEvent) {
        trace!("MIDI: {:?}", event);
        match *event {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } if velocity > 0 => {
                for i in self.instruments_for_note(channel, note) {
                    self.maps.note_on(i, note, velocity, &mut self.bus);
                }
            }
            MidiEvent::NoteOn { channel, note, .. } | MidiEvent::NoteOff { channel, note, .. } => {
                for i in self.instruments_for_note(channel, note) {
                    self.maps.note_off(i, note);
                }
            }
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => self.control_change(channel, controller, value),
            MidiEvent::ProgramChange { channel, program } => {
                let tone = program as usize;
                for i in self.instruments_on(channel) {
                    let inst = &mut self.config.instruments[i];
                    inst.voice_bank = (tone / VOICES_PER_BANK) as u8;
                    inst.voice = (tone % VOICES_PER_BANK) as u8;
                    self.maps.set_voice(i, tone, &self.tones, &mut self.bus);
                }
            }
            MidiEvent::PitchBend { channel, value } => {
                for i in self.instruments_on(channel) {
                    self.maps.set_bend(i, value);
                }
            }
            MidiEvent::ChannelPressure { channel, pressure } => {
                debug!("MIDI: channel pressure ch={} value={} ignored", channel, pressure);
            }
            MidiEvent::PolyPressure {
                channel,
                note,
                pressure,
            } => {
                debug!(
                    "MIDI: poly pressure ch={} note={} value={} ignored",
                    channel, note, pressure
                );
            }
            MidiEvent::SysEx(ref bytes) => {
                if let Err(e) = self.play_sysex(bytes) {
                    warn!("SYSEX: {}", e);
                }
            }
        }
    }

    /// One synthesis tick: pitch, key and volume registers for every
    /// instrument.
    pub fn refresh(&mut self) {
        self.maps.refresh(self.system_volume, &mut self.bus);
        self.sync_mixer();
    }

    /// Apply an event and tick immediately.
    pub fn play_event_now(&mut self, event: &MidiEvent) {
        self.apply_event(event);
        self.refresh();
    }

    /// Decode and execute a complete SysEx message (`F0 .. F7`).
    ///
    /// Only framing problems are errors. Unknown messages, bad checksums and
    /// messages for another system channel are logged and ignored.
    pub fn play_sysex(&mut self, message: &[u8]) -> Result<()> {
        let body = sysex::body(message)?;
        let Some(route) = sysex::route(body) else {
            debug!(
                "SYSEX: unrecognized message {:02x?}",
                &body[..body.len().min(8)]
            );
            return Ok(());
        };
        if route.command.uses_system_channel() && body[2] & 0x0F != self.settings.system_channel {
            debug!(
                "SYSEX: {} for system channel {} ignored",
                route.name,
                body[2] & 0x0F
            );
            return Ok(());
        }
        debug!("SYSEX: {}", route.name);
        self.execute(route.command, body);
        Ok(())
    }

    // Queued API

    /// Queue a packed short message (status in the low byte).
    ///
    /// # Arguments
    /// * `msg` - Status, data 1 and data 2 in bytes 0, 1 and 2
    /// * `timestamp` - Frame at which to apply it; `None` means now
    ///
    /// Returns false if the message could not be queued.
    pub fn play_msg(&mut self, msg: u32, timestamp: Option<u32>) -> bool {
        let Some(event) = MidiEvent::from_packed(msg) else {
            debug!("MIDI: undecodable message {:#010x}", msg);
            return false;
        };
        self.queue
            .push(event, timestamp.map(u64::from), self.position)
    }

    /// Queue a complete SysEx message. Returns false if it is malformed or
    /// the queue is full.
    pub fn play_sysex_at(&mut self, message: &[u8], timestamp: Option<u32>) -> bool {
        if let Err(e) = sysex::body(message) {
            warn!("SYSEX: {}", e);
            return false;
        }
        self.queue.push(
            MidiEvent::SysEx(message.to_vec()),
            timestamp.map(u64::from),
            self.position,
        )
    }

    /// Queue an already decoded event.
    pub fn queue_event(&mut self, event: MidiEvent, timestamp: Option<u64>) -> Result<()> {
        if self.queue.push(event, timestamp, self.position) {
            Ok(())
        } else {
            Err(Error::QueueFull)
        }
    }

    /// Drop every queued event. Returns how many were dropped.
    pub fn flush_midi_queue(&mut self) -> usize {
        let dropped = self.queue.flush();
        if dropped > 0 {
            debug!("MIDI: flushed {} queued events", dropped);
        }
        dropped
    }

    /// True while any slot is keyed or releasing, or events are queued.
    pub fn is_active(&self) -> bool {
        self.maps.iter().any(|m| m.is_active()) || !self.queue.is_empty()
    }

    /// Frames rendered so far.
    pub fn render_position(&self) -> u64 {
        self.position
    }

    /// Render interleaved stereo 16-bit frames into `out`.
    pub fn render(&mut self, out: &mut [i16]) {
        let frames = out.len() / 2;
        let mut at = 0;
        self.render_frames(frames, &mut |(l, r)| {
            out[at] = l as i16;
            out[at + 1] = r as i16;
            at += 2;
        });
    }

    /// Render `frames` frames in the configured output format, appending to
    /// `out`.
    pub fn render_bytes(&mut self, frames: usize, out: &mut Vec<u8>) {
        let format = self.settings.output_format;
        out.reserve(frames * format.bytes_per_frame());
        self.render_frames(frames, &mut |frame| mixer::encode(frame, format, out));
    }

    fn render_frames(&mut self, frames: usize, sink: &mut impl FnMut((i32, i32))) {
        let mut done = 0usize;
        while done < frames {
            let mut applied = false;
            while let Some(event) = self.queue.pop_due(self.position) {
                self.apply_event(&event);
                applied = true;
            }
            if applied || self.position >= self.next_tick {
                self.refresh();
                self.next_tick = self.position + TICK_FRAMES as u64;
            }

            let mut span = ((frames - done) as u64).min(self.next_tick - self.position);
            if let Some(due) = self.queue.next_due() {
                if due > self.position {
                    span = span.min(due - self.position);
                }
            }
            let span = span.max(1);
            for _ in 0..span {
                let channels = self.bus.chip_mut().clock();
                sink(self.mixer.mix(&channels));
            }
            self.position += span;
            done += span as usize;
        }
    }

    // Inspection

    /// Engine settings.
    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    /// Active configuration.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Stored configuration `i`.
    pub fn stored_configuration(&self, i: usize) -> Option<&Configuration> {
        self.stored.get(i)
    }

    /// Runtime instrument state.
    pub fn instrument_map(&self) -> &InstrumentMap {
        &self.maps
    }

    /// Register shadow.
    pub fn registers(&self) -> &RegisterFile {
        self.bus.registers()
    }

    /// Chip backend.
    pub fn chip(&self) -> &C {
        self.bus.chip()
    }

    /// Tone `i` of the tone table.
    pub fn tone(&self, i: usize) -> Option<&VoiceData> {
        self.tones.get(i)
    }

    /// Replace tone `i` and reload it into every instrument using it.
    pub fn set_tone(&mut self, i: usize, voice: VoiceData) {
        if i >= self.tones.len() {
            warn!("SYNTH: tone {} out of range", i);
            return;
        }
        self.tones[i] = voice;
        self.reload_tone_users(i);
    }

    /// Voice bank `i`.
    pub fn bank(&self, i: usize) -> Option<&VoiceBank> {
        self.banks.get(i)
    }

    /// Volume applied after every other volume stage, 0..=127.
    pub fn system_volume(&self) -> u8 {
        self.system_volume
    }

    /// Mixer state.
    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    // Internals

    fn instruments_on(&self, channel: u8) -> Vec<usize> {
        (0..INSTRUMENTS)
            .filter(|&i| self.config.instruments[i].midi_channel == channel)
            .collect()
    }

    fn instruments_for_note(&self, channel: u8, note: u8) -> Vec<usize> {
        if !self.config.key_receive_mode.accepts(note) {
            return Vec::new();
        }
        (0..INSTRUMENTS)
            .filter(|&i| self.config.instruments[i].accepts(channel, note))
            .collect()
    }

    fn sync_mixer(&mut self) {
        for map in self.maps.iter() {
            for ch in map.channels() {
                self.mixer.set_channel(ch, map.pan, map.output_level);
            }
        }
    }

    /// Copy instrument `i`'s settings into its map and load its voice.
    fn reload_instrument(&mut self, i: usize) {
        let inst = &self.config.instruments[i];
        let tone = inst.tone_index();
        let map = self.maps.get_mut(i);
        map.apply_instrument(inst);
        map.detune = inst.detune.saturating_add(self.master_detune);
        self.maps.set_voice(i, tone, &self.tones, &mut self.bus);
    }

    fn retune_instrument(&mut self, i: usize) {
        let inst = &self.config.instruments[i];
        let map = self.maps.get_mut(i);
        map.apply_instrument(inst);
        map.detune = inst.detune.saturating_add(self.master_detune);
    }

    fn reload_tone_users(&mut self, tone: usize) {
        for i in 0..INSTRUMENTS {
            if self.maps.get(i).tone == tone {
                self.maps.set_voice(i, tone, &self.tones, &mut self.bus);
            }
        }
    }

    fn set_instrument_param(&mut self, i: usize, param: u8, value: u8) {
        let effect = self.config.instruments[i].set_param(param, value);
        trace!(
            "SYSEX: instrument {} param {:#04x} = {} ({:?})",
            i,
            param,
            value,
            effect
        );
        match effect {
            ParamEffect::Reallocate => {
                let moved = self
                    .maps
                    .allocate_base_voices(&mut self.config, Some(i), &mut self.bus);
                for m in moved {
                    self.reload_instrument(m);
                }
            }
            ParamEffect::ReloadVoice => self.reload_instrument(i),
            ParamEffect::Retune | ParamEffect::Mix | ParamEffect::None => {
                self.retune_instrument(i)
            }
        }
    }

    fn write_lfo(&mut self, speed: u8, amd: u8, pmd: u8, waveform: u8) {
        self.bus.write(0x18, speed);
        self.bus.write(0x19, amd & 0x7F);
        self.bus.write(0x19, pmd | 0x80);
        self.bus.write(0x1B, waveform & 3);
    }

    fn activate_configuration(&mut self, config: Configuration) {
        for i in 0..INSTRUMENTS {
            self.maps.all_note_off(i, &mut self.bus);
        }
        self.config = config;
        let (speed, amd, pmd, w) = (
            self.config.lfo_speed,
            self.config.amd,
            self.config.pmd,
            self.config.lfo_waveform,
        );
        self.write_lfo(speed, amd, pmd, w);
        self.maps
            .allocate_base_voices(&mut self.config, None, &mut self.bus);
        for i in 0..INSTRUMENTS {
            self.reload_instrument(i);
        }
        self.sync_mixer();
        debug!("SYNTH: configuration '{}' active", self.config.name);
    }

    fn send(&mut self, message: Vec<u8>) {
        match self.midi_out.as_mut() {
            Some(out) => out.send(&message),
            None => info!(
                "SYSEX: no midi out attached, dropping {} byte dump",
                message.len()
            ),
        }
    }

    fn store_bank(&mut self, b: usize, bank: VoiceBank) {
        if b >= RAM_BANKS {
            warn!("SYSEX: bank {} is read only, store rejected", b);
            return;
        }
        let start = b * VOICES_PER_BANK;
        for (v, packed) in bank.voices().iter().enumerate() {
            self.tones[start + v] = packed.to_voice();
        }
        debug!("SYSEX: bank {} '{}' stored", b, bank.name());
        self.banks[b] = bank;
        for i in 0..INSTRUMENTS {
            let tone = self.maps.get(i).tone;
            if (start..start + VOICES_PER_BANK).contains(&tone) {
                self.maps.set_voice(i, tone, &self.tones, &mut self.bus);
            }
        }
    }

    fn store_bank_stream(&mut self, b: usize, stream: &[u8]) {
        match decode_type_a_stream(stream) {
            Ok((data, _)) if data.len() < BANK_HEADER_LEN + PACKED_VOICE_LEN => {
                warn!("SYSEX: bank {} payload of {} bytes too short", b, data.len())
            }
            Ok((data, checksum_ok)) => {
                if !checksum_ok {
                    warn!("SYSEX: bank {} checksum mismatch, storing anyway", b);
                }
                self.store_bank(b, VoiceBank::from_bytes(&data));
            }
            Err(e) => warn!("SYSEX: bank {}: {}", b, e),
        }
    }

    fn type_b_payload(&self, stream: &[u8], what: &str) -> Option<Vec<u8>> {
        match decode_type_b(stream) {
            Ok(p) => {
                if !p.checksum_ok {
                    warn!("SYSEX: {} checksum mismatch, storing anyway", what);
                }
                Some(p.data)
            }
            Err(e) => {
                warn!("SYSEX: {}: {}", what, e);
                None
            }
        }
    }

    fn execute(&mut self, command: SysexCommand, body: &[u8]) {
        let s = self.settings.system_channel;
        let at = |i: usize| body.get(i).copied().unwrap_or(0);
        match command {
            SysexCommand::EventList => {
                for item in sysex::parse_event_list(&body[4..]) {
                    match item {
                        ListEvent::Midi(event) => self.apply_event(&event),
                        ListEvent::InstrumentParam {
                            instrument,
                            param,
                            value,
                        } => self.set_instrument_param(instrument, param, value),
                    }
                }
            }
            SysexCommand::InstrumentParam => {
                let i = (body[3] & 7) as usize;
                let param = at(4);
                match sysex::param_value(param, body.get(5..).unwrap_or(&[])) {
                    Some(value) => self.set_instrument_param(i, param & 0x3F, value),
                    None => warn!("SYSEX: truncated instrument parameter change"),
                }
            }
            SysexCommand::SystemParam => self.system_param(at(4), at(5)),
            SysexCommand::BankDumpRequest => {
                let b = at(5) as usize;
                match self.banks.get(b) {
                    Some(bank) => {
                        let message = sysex::bank_dump(s, b as u8, bank);
                        self.send(message);
                    }
                    None => warn!("SYSEX: dump of bank {} out of range", b),
                }
            }
            SysexCommand::CurrentConfigDumpRequest => {
                let message = sysex::config_dump(s, 0x01, 0x00, &self.config.to_bytes());
                self.send(message);
            }
            SysexCommand::ConfigDumpRequest => {
                let x = at(5) as usize;
                match self.stored.get(x) {
                    Some(config) => {
                        let message = sysex::config_dump(s, 0x02, x as u8, &config.to_bytes());
                        self.send(message);
                    }
                    None => warn!("SYSEX: dump of configuration {} out of range", x),
                }
            }
            SysexCommand::AllConfigDumpRequest => {
                let data: Vec<u8> = self.stored.iter().flat_map(|c| c.to_bytes()).collect();
                let message = sysex::config_dump(s, 0x03, 0x00, &data);
                self.send(message);
            }
            SysexCommand::UnitIdDumpRequest => self.send(sysex::unit_id_dump(s)),
            SysexCommand::ConfigStore => {
                let x = (at(5) & 0x0F) as usize;
                self.stored[x] = self.config.clone();
                debug!("SYSEX: configuration stored to slot {}", x);
            }
            SysexCommand::VoiceDumpRequest => {
                let i = (body[3] & 7) as usize;
                let tone = self.maps.get(i).tone;
                let voice = PackedVoice::from_voice(&self.tones[tone]);
                self.send(sysex::voice_dump(s, i, &voice));
            }
            SysexCommand::StoreVoiceRam => {
                let i = (body[3] & 7) as usize;
                let d = at(5) as usize;
                if d >= VOICES_PER_BANK {
                    warn!("SYSEX: voice ram slot {} out of range", d);
                    return;
                }
                let voice = self.tones[self.maps.get(i).tone].clone();
                self.banks[0].set_voice(d, PackedVoice::from_voice(&voice));
                self.tones[d] = voice;
                self.reload_tone_users(d);
            }
            SysexCommand::BankStore => {
                let b = at(5) as usize;
                self.store_bank_stream(b, body.get(6..).unwrap_or(&[]));
            }
            SysexCommand::CurrentConfigStore => {
                if let Some(data) = self.type_b_payload(body.get(6..).unwrap_or(&[]), "configuration")
                {
                    self.activate_configuration(Configuration::from_bytes(&data));
                }
            }
            SysexCommand::ConfigMemoryStore => {
                let x = (at(5) & 0x0F) as usize;
                if let Some(data) = self.type_b_payload(body.get(6..).unwrap_or(&[]), "configuration")
                {
                    self.stored[x] = Configuration::from_bytes(&data);
                }
            }
            SysexCommand::AllConfigStore => {
                if let Some(data) =
                    self.type_b_payload(body.get(6..).unwrap_or(&[]), "16 configurations")
                {
                    for (slot, chunk) in self.stored.iter_mut().zip(data.chunks(CONFIG_LEN)) {
                        *slot = Configuration::from_bytes(chunk);
                    }
                }
            }
            SysexCommand::SingleVoiceStore => {
                let i = (body[3] & 7) as usize;
                match decode_type_a(body.get(6..).unwrap_or(&[])) {
                    Ok(p) => {
                        if !p.checksum_ok {
                            warn!("SYSEX: voice checksum mismatch, storing anyway");
                        }
                        self.store_single_voice(i, PackedVoice::from_slice(&p.data));
                    }
                    Err(e) => warn!("SYSEX: voice: {}", e),
                }
            }
            SysexCommand::Ram1DumpRequest => {
                let message = sysex::legacy_bank_dump(body[1] & 0x0F, &self.banks[0]);
                self.send(message);
            }
            SysexCommand::Ram1Store => self.store_bank_stream(0, body.get(3..).unwrap_or(&[])),
            SysexCommand::ChannelParam => {
                let channel = body[1] & 0x0F;
                let param = at(3);
                match sysex::param_value(param, body.get(4..).unwrap_or(&[])) {
                    Some(value) => {
                        for i in self.instruments_on(channel) {
                            self.set_instrument_param(i, param & 0x3F, value);
                        }
                    }
                    None => warn!("SYSEX: truncated channel parameter change"),
                }
            }
            SysexCommand::GmModeOn => self.reset(),
            SysexCommand::MasterVolume => self.system_volume = at(5) & 0x7F,
            SysexCommand::NativeVoiceLoad => match sysex::parse_native_voice(&body[2..]) {
                Some((tone, voice)) => {
                    if tone < RAM_BANKS * VOICES_PER_BANK {
                        let (b, v) = (tone / VOICES_PER_BANK, tone % VOICES_PER_BANK);
                        self.banks[b].set_voice(v, PackedVoice::from_voice(&voice));
                    }
                    debug!("SYSEX: native voice load into tone {}", tone);
                    self.set_tone(tone, voice);
                }
                None => warn!("SYSEX: malformed native voice load"),
            },
        }
    }

    fn system_param(&mut self, param: u8, value: u8) {
        match param {
            0x21 => match self.stored.get(value as usize) {
                Some(config) => {
                    let config = config.clone();
                    self.activate_configuration(config);
                }
                None => warn!("SYSEX: recall of configuration {} out of range", value),
            },
            0x22 => {
                self.master_detune = (value & 0x7F) as i8 - 64;
                for i in 0..INSTRUMENTS {
                    self.retune_instrument(i);
                }
            }
            0x24 => self.system_volume = value & 0x7F,
            _ => debug!("SYSEX: system parameter {:#04x} ignored", param),
        }
    }

    fn store_single_voice(&mut self, i: usize, packed: PackedVoice) {
        let tone = self.maps.get(i).tone;
        if tone < RAM_BANKS * VOICES_PER_BANK {
            let (b, v) = (tone / VOICES_PER_BANK, tone % VOICES_PER_BANK);
            self.banks[b].set_voice(v, packed);
        }
        if packed.0[10] & 0x80 != 0 {
            self.write_lfo(packed.lfo_speed(), packed.amd(), packed.pmd(), packed.lfo_waveform());
        }
        debug!("SYSEX: voice '{}' stored into tone {}", packed.name(), tone);
        self.set_tone(tone, packed.to_voice());
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        let targets = self.instruments_on(channel);
        let ch = (channel & 0x0F) as usize;
        let Some(cc) = Controller::from_number(controller) else {
            self.assigned_controller(&targets, controller, value);
            return;
        };
        match cc {
            Controller::Modulation => {
                for &i in &targets {
                    self.maps.set_modulation_depth(i, value, &mut self.bus);
                }
            }
            Controller::PortamentoTime => {
                for &i in &targets {
                    self.maps.set_portamento_time(i, value);
                }
            }
            Controller::DataEntryMsb | Controller::DataEntryLsb => {
                if self.rpn[ch] != RPN_BEND_SENSITIVITY {
                    debug!(
                        "MIDI: data entry for rpn {:#06x} / nrpn {:#06x} ignored",
                        self.rpn[ch], self.nrpn[ch]
                    );
                    return;
                }
                let (m, l) = if cc == Controller::DataEntryMsb {
                    (Some(value), None)
                } else {
                    (None, Some(value))
                };
                for &i in &targets {
                    self.maps.set_bend_sensitivity(i, m, l);
                }
            }
            Controller::Volume => {
                for &i in &targets {
                    self.maps.set_master_volume(i, value);
                }
            }
            Controller::Pan => {
                for &i in &targets {
                    self.config.instruments[i].pan = value & 0x7F;
                    self.maps.get_mut(i).pan = value & 0x7F;
                }
            }
            Controller::Expression => {
                for &i in &targets {
                    self.maps.set_expression(i, value);
                }
            }
            Controller::Hold1 | Controller::Hold2 => {
                for &i in &targets {
                    self.maps.set_hold(i, value);
                }
            }
            Controller::PortamentoOn => {
                for &i in &targets {
                    self.maps.set_portamento_on(i, value);
                }
            }
            Controller::NrpnLsb | Controller::NrpnMsb => {
                self.nrpn[ch] = latch(self.nrpn[ch], cc == Controller::NrpnMsb, value);
                self.rpn[ch] = PARAM_NONE;
            }
            Controller::RpnLsb | Controller::RpnMsb => {
                self.rpn[ch] = latch(self.rpn[ch], cc == Controller::RpnMsb, value);
                self.nrpn[ch] = PARAM_NONE;
            }
            Controller::AllSoundOff => {
                for &i in &targets {
                    self.maps.all_note_off(i, &mut self.bus);
                    self.maps.reset_controllers(i);
                }
            }
            Controller::ResetAllControllers => {
                for &i in &targets {
                    self.maps.reset_controllers(i);
                }
                self.rpn[ch] = PARAM_NONE;
                self.nrpn[ch] = PARAM_NONE;
            }
            Controller::AllNotesOff => {
                for &i in &targets {
                    self.maps.all_note_off(i, &mut self.bus);
                }
            }
            _ => self.assigned_controller(&targets, controller, value),
        }
    }

    /// Controllers picked as an instrument's input controller drive its
    /// modulation depth.
    fn assigned_controller(&mut self, targets: &[usize], controller: u8, value: u8) {
        let mut used = false;
        for &i in targets {
            let assigned = self.config.instruments[i].input_controller;
            if assigned != 0 && assigned == controller {
                self.maps.set_modulation_depth(i, value, &mut self.bus);
                used = true;
            }
        }
        if !used {
            debug!("MIDI: controller {} = {} ignored", controller, value);
        }
    }
}

/// Update one 7-bit half of a 14-bit parameter number. Selecting 0x3FFF
/// (the null parameter) clears the latch.
fn latch(current: u16, msb: bool, value: u8) -> u16 {
    let base = if current == PARAM_NONE { 0 } else { current };
    let value = (value & 0x7F) as u16;
    let next = if msb {
        value << 7 | (base & 0x7F)
    } else {
        (base & 0x3F80) | value
    };
    if next == 0x3FFF {
        PARAM_NONE
    } else {
        next
    }
}

/// An engine shared between a MIDI input thread and a render thread.
pub struct SharedSynth<C: OpmBackend = Ym2151> {
    inner: Arc<Mutex<Fb01Synth<C>>>,
}

impl<C: OpmBackend> Clone for SharedSynth<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: OpmBackend> SharedSynth<C> {
    /// Wrap an engine.
    pub fn new(synth: Fb01Synth<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(synth)),
        }
    }

    /// Queue a packed short message.
    pub fn play_msg(&self, msg: u32, timestamp: Option<u32>) -> bool {
        self.inner.lock().play_msg(msg, timestamp)
    }

    /// Queue a SysEx message.
    pub fn play_sysex(&self, message: &[u8], timestamp: Option<u32>) -> bool {
        self.inner.lock().play_sysex_at(message, timestamp)
    }

    /// Render in the configured output format.
    pub fn render_bytes(&self, frames: usize, out: &mut Vec<u8>) {
        self.inner.lock().render_bytes(frames, out)
    }

    /// Lock the engine for direct access.
    pub fn lock(&self) -> MutexGuard<'_, Fb01Synth<C>> {
        self.inner.lock()
    }
}
