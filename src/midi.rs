//! MIDI message types and byte stream tokenizer.

use log::{trace, warn};

/// Status nibble of Note Off.
pub const NOTE_OFF: u8 = 0x80;
/// Status nibble of Note On.
pub const NOTE_ON: u8 = 0x90;
/// Status nibble of Polyphonic Key Pressure.
pub const POLY_PRESSURE: u8 = 0xA0;
/// Status nibble of Control Change.
pub const CONTROL_CHANGE: u8 = 0xB0;
/// Status nibble of Program Change.
pub const PROGRAM_CHANGE: u8 = 0xC0;
/// Status nibble of Channel Pressure.
pub const CHANNEL_PRESSURE: u8 = 0xD0;
/// Status nibble of Pitch Bend.
pub const PITCH_BEND: u8 = 0xE0;
/// Start of exclusive.
pub const SYSEX_START: u8 = 0xF0;
/// End of exclusive.
pub const SYSEX_END: u8 = 0xF7;

/// Pitch bend centre value.
pub const PITCH_BEND_CENTER: u16 = 0x2000;

/// One decoded MIDI message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    /// Key released.
    NoteOff {
        /// Channel, 0..15.
        channel: u8,
        /// Note number.
        note: u8,
        /// Release velocity.
        velocity: u8,
    },
    /// Key pressed. Velocity 0 is treated as Note Off by the engine.
    NoteOn {
        /// Channel, 0..15.
        channel: u8,
        /// Note number.
        note: u8,
        /// Velocity.
        velocity: u8,
    },
    /// Polyphonic key pressure.
    PolyPressure {
        /// Channel, 0..15.
        channel: u8,
        /// Note number.
        note: u8,
        /// Pressure.
        pressure: u8,
    },
    /// Control Change.
    ControlChange {
        /// Channel, 0..15.
        channel: u8,
        /// Controller number.
        controller: u8,
        /// Value.
        value: u8,
    },
    /// Program Change.
    ProgramChange {
        /// Channel, 0..15.
        channel: u8,
        /// Program number.
        program: u8,
    },
    /// Channel pressure.
    ChannelPressure {
        /// Channel, 0..15.
        channel: u8,
        /// Pressure.
        pressure: u8,
    },
    /// Pitch bend.
    PitchBend {
        /// Channel, 0..15.
        channel: u8,
        /// 14-bit value, centre 0x2000.
        value: u16,
    },
    /// Complete System Exclusive message including F0 and F7.
    SysEx(Vec<u8>),
}

/// Length in bytes of a channel message with the given status byte, or 0
/// for anything that is not a channel message.
pub fn short_message_len(status: u8) -> usize {
    match status & 0xF0 {
        PROGRAM_CHANGE | CHANNEL_PRESSURE => 2,
        NOTE_OFF | NOTE_ON | POLY_PRESSURE | CONTROL_CHANGE | PITCH_BEND => 3,
        _ => 0,
    }
}

impl MidiEvent {
    /// Decode a channel message from its bytes. Missing data bytes read as 0.
    pub fn from_short(bytes: &[u8]) -> Option<MidiEvent> {
        let status = *bytes.first()?;
        let channel = status & 0x0F;
        let d1 = bytes.get(1).copied().unwrap_or(0) & 0x7F;
        let d2 = bytes.get(2).copied().unwrap_or(0) & 0x7F;
        let event = match status & 0xF0 {
            NOTE_OFF => MidiEvent::NoteOff {
                channel,
                note: d1,
                velocity: d2,
            },
            NOTE_ON => MidiEvent::NoteOn {
                channel,
                note: d1,
                velocity: d2,
            },
            POLY_PRESSURE => MidiEvent::PolyPressure {
                channel,
                note: d1,
                pressure: d2,
            },
            CONTROL_CHANGE => MidiEvent::ControlChange {
                channel,
                controller: d1,
                value: d2,
            },
            PROGRAM_CHANGE => MidiEvent::ProgramChange {
                channel,
                program: d1,
            },
            CHANNEL_PRESSURE => MidiEvent::ChannelPressure {
                channel,
                pressure: d1,
            },
            PITCH_BEND => MidiEvent::PitchBend {
                channel,
                value: (d2 as u16) << 7 | d1 as u16,
            },
            _ => return None,
        };
        Some(event)
    }

    /// Decode a packed short message: status in the low byte, then data 1
    /// and data 2.
    pub fn from_packed(msg: u32) -> Option<MidiEvent> {
        let bytes = msg.to_le_bytes();
        let len = short_message_len(bytes[0]);
        if len == 0 {
            return None;
        }
        MidiEvent::from_short(&bytes[..len])
    }

    /// Bytes on the wire, used for transfer time.
    pub fn wire_len(&self) -> usize {
        match self {
            MidiEvent::ProgramChange { .. } | MidiEvent::ChannelPressure { .. } => 2,
            MidiEvent::SysEx(bytes) => bytes.len(),
            _ => 3,
        }
    }

    /// Encode back to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            } => vec![NOTE_OFF | channel, note, velocity],
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => vec![NOTE_ON | channel, note, velocity],
            MidiEvent::PolyPressure {
                channel,
                note,
                pressure,
            } => vec![POLY_PRESSURE | channel, note, pressure],
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => vec![CONTROL_CHANGE | channel, controller, value],
            MidiEvent::ProgramChange { channel, program } => vec![PROGRAM_CHANGE | channel, program],
            MidiEvent::ChannelPressure { channel, pressure } => {
                vec![CHANNEL_PRESSURE | channel, pressure]
            }
            MidiEvent::PitchBend { channel, value } => vec![
                PITCH_BEND | channel,
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
            MidiEvent::SysEx(ref bytes) => bytes.clone(),
        }
    }
}

/// Control Change numbers the engine recognizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Controller {
    /// 0x00
    BankSelectMsb,
    /// 0x01
    Modulation,
    /// 0x02
    Breath,
    /// 0x04
    Foot,
    /// 0x05
    PortamentoTime,
    /// 0x06
    DataEntryMsb,
    /// 0x07
    Volume,
    /// 0x08
    Balance,
    /// 0x0A
    Pan,
    /// 0x0B
    Expression,
    /// 0x20
    BankSelectLsb,
    /// 0x26
    DataEntryLsb,
    /// 0x40
    Hold1,
    /// 0x41
    PortamentoOn,
    /// 0x42
    Sostenuto,
    /// 0x43
    SoftPedal,
    /// 0x45
    Hold2,
    /// 0x5B..=0x5F, effect depth 1..5.
    Effect(u8),
    /// 0x60
    DataIncrement,
    /// 0x61
    DataDecrement,
    /// 0x62
    NrpnLsb,
    /// 0x63
    NrpnMsb,
    /// 0x64
    RpnLsb,
    /// 0x65
    RpnMsb,
    /// 0x78
    AllSoundOff,
    /// 0x79
    ResetAllControllers,
    /// 0x7A
    LocalControl,
    /// 0x7B
    AllNotesOff,
    /// 0x7C
    OmniOff,
    /// 0x7D
    OmniOn,
    /// 0x7E
    MonoOn,
    /// 0x7F
    PolyOn,
}

impl Controller {
    /// Map a controller number.
    pub fn from_number(n: u8) -> Option<Controller> {
        use Controller::*;
        Some(match n {
            0x00 => BankSelectMsb,
            0x01 => Modulation,
            0x02 => Breath,
            0x04 => Foot,
            0x05 => PortamentoTime,
            0x06 => DataEntryMsb,
            0x07 => Volume,
            0x08 => Balance,
            0x0A => Pan,
            0x0B => Expression,
            0x20 => BankSelectLsb,
            0x26 => DataEntryLsb,
            0x40 => Hold1,
            0x41 => PortamentoOn,
            0x42 => Sostenuto,
            0x43 => SoftPedal,
            0x45 => Hold2,
            0x5B..=0x5F => Effect(n - 0x5B + 1),
            0x60 => DataIncrement,
            0x61 => DataDecrement,
            0x62 => NrpnLsb,
            0x63 => NrpnMsb,
            0x64 => RpnLsb,
            0x65 => RpnMsb,
            0x78 => AllSoundOff,
            0x79 => ResetAllControllers,
            0x7A => LocalControl,
            0x7B => AllNotesOff,
            0x7C => OmniOff,
            0x7D => OmniOn,
            0x7E => MonoOn,
            0x7F => PolyOn,
            _ => return None,
        })
    }
}

/// Default maximum SysEx length accepted by the stream parser.
pub const DEFAULT_SYSEX_LIMIT: usize = 8192;

/// Tokenizes a raw MIDI byte stream into [`MidiEvent`]s.
///
/// Handles running status, accumulates SysEx between F0 and F7, ignores
/// realtime bytes wherever they occur and drops system common messages.
#[derive(Debug)]
pub struct MidiStreamParser {
    running_status: Option<u8>,
    data: [u8; 2],
    data_len: usize,
    sysex: Option<Vec<u8>>,
    sysex_overflow: bool,
    sysex_limit: usize,
}

impl Default for MidiStreamParser {
    fn default() -> Self {
        Self::new(DEFAULT_SYSEX_LIMIT)
    }
}

impl MidiStreamParser {
    /// New parser accepting SysEx messages up to `sysex_limit` bytes.
    pub fn new(sysex_limit: usize) -> Self {
        Self {
            running_status: None,
            data: [0; 2],
            data_len: 0,
            sysex: None,
            sysex_overflow: false,
            sysex_limit,
        }
    }

    /// Feed one byte; returns a completed event if this byte finished one.
    pub fn push(&mut self, byte: u8) -> Option<MidiEvent> {
        if byte >= 0xF8 {
            trace!("MIDI: realtime {:#04x} ignored", byte);
            return None;
        }

        if let Some(buf) = self.sysex.as_mut() {
            if byte == SYSEX_END {
                let mut buf = self.sysex.take().unwrap_or_default();
                if self.sysex_overflow {
                    warn!("MIDI: sysex longer than {} bytes dropped", self.sysex_limit);
                    return None;
                }
                buf.push(SYSEX_END);
                return Some(MidiEvent::SysEx(buf));
            }
            if byte < 0x80 {
                if buf.len() < self.sysex_limit {
                    buf.push(byte);
                } else {
                    self.sysex_overflow = true;
                }
                return None;
            }
            // Any other status byte aborts the exclusive message.
            warn!("MIDI: sysex interrupted by status {:#04x}", byte);
            self.sysex = None;
        }

        if byte == SYSEX_START {
            self.sysex = Some(vec![SYSEX_START]);
            self.sysex_overflow = false;
            self.running_status = None;
            return None;
        }

        if byte >= 0x80 {
            self.data_len = 0;
            if short_message_len(byte) > 0 {
                self.running_status = Some(byte);
            } else {
                trace!("MIDI: system common {:#04x} dropped", byte);
                self.running_status = None;
            }
            return None;
        }

        let status = self.running_status?;
        self.data[self.data_len] = byte;
        self.data_len += 1;
        if self.data_len + 1 < short_message_len(status) {
            return None;
        }
        self.data_len = 0;
        let bytes = [status, self.data[0], self.data[1]];
        MidiEvent::from_short(&bytes[..short_message_len(status)])
    }

    /// Feed a slice, collecting every completed event.
    pub fn push_slice(&mut self, bytes: &[u8]) -> Vec<MidiEvent> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}
