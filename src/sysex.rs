//! System Exclusive routing and framing.
//!
//! Incoming messages are classified by a first-match table over the message
//! body (the bytes between `F0` and `F7`). The engine executes the matched
//! [`SysexCommand`]. Outbound dumps are framed here so that every dump the
//! engine sends is accepted back by the corresponding store command.

use log::debug;

use crate::bank::{PackedVoice, VoiceBank};
use crate::error::{Error, Result};
use crate::midi::{MidiEvent, SYSEX_END, SYSEX_START};
use crate::packet::{encode_type_a, encode_type_b};
use crate::voice::{OperatorData, VoiceData, MAX_TONES};

/// Yamaha manufacturer ID.
pub const YAMAHA_ID: u8 = 0x43;
/// Sub-status byte of the unit's own message group.
pub const FB01_GROUP: u8 = 0x75;
/// Non-commercial ID used for the native voice load.
pub const NATIVE_ID: u8 = 0x7D;
/// Universal non-realtime.
pub const UNIVERSAL_NON_REALTIME: u8 = 0x7E;
/// Universal realtime.
pub const UNIVERSAL_REALTIME: u8 = 0x7F;

/// Bytes after `7D 0A` in a native voice load.
pub const NATIVE_VOICE_LEN: usize = 50;

/// One byte test: `body[index] & mask == value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Byte offset into the body.
    pub index: usize,
    /// Bits compared.
    pub mask: u8,
    /// Expected value after masking.
    pub value: u8,
}

const fn eq(index: usize, value: u8) -> Match {
    Match {
        index,
        mask: 0xFF,
        value,
    }
}

const fn masked(index: usize, mask: u8, value: u8) -> Match {
    Match { index, mask, value }
}

/// What a matched message asks for. Fields are read from the body by the
/// engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysexCommand {
    /// `43 75 s 70 ...`: embedded event list.
    EventList,
    /// `43 75 s 18+i p d [d2]`.
    InstrumentParam,
    /// `43 75 s 10 p d`.
    SystemParam,
    /// `43 75 s 20 00 b`.
    BankDumpRequest,
    /// `43 75 s 20 01 00`.
    CurrentConfigDumpRequest,
    /// `43 75 s 20 02 x`.
    ConfigDumpRequest,
    /// `43 75 s 20 03 00`.
    AllConfigDumpRequest,
    /// `43 75 s 20 04 00`.
    UnitIdDumpRequest,
    /// `43 75 s 20 40 x`.
    ConfigStore,
    /// `43 75 s 28+i 40 00`.
    VoiceDumpRequest,
    /// `43 75 s 28+i 00 d`.
    StoreVoiceRam,
    /// `43 75 s 00 00 b ...` and `43 75 s 00 06 b ...`.
    BankStore,
    /// `43 75 s 00 01 00 ...`.
    CurrentConfigStore,
    /// `43 75 s 00 02 x ...`.
    ConfigMemoryStore,
    /// `43 75 s 00 03 00 ...`.
    AllConfigStore,
    /// `43 75 s 08+i 00 00 ...`.
    SingleVoiceStore,
    /// `43 2s 0C`.
    Ram1DumpRequest,
    /// `43 0s 0C ...`.
    Ram1Store,
    /// `43 1n 15 p d [d2]`.
    ChannelParam,
    /// `7E xx 09 01`.
    GmModeOn,
    /// `7F xx 04 01 lsb msb`.
    MasterVolume,
    /// `7D 0A ...`.
    NativeVoiceLoad,
}

impl SysexCommand {
    /// True for messages addressed by system channel in byte 2.
    pub fn uses_system_channel(self) -> bool {
        !matches!(
            self,
            SysexCommand::Ram1DumpRequest
                | SysexCommand::Ram1Store
                | SysexCommand::ChannelParam
                | SysexCommand::GmModeOn
                | SysexCommand::MasterVolume
                | SysexCommand::NativeVoiceLoad
        )
    }
}

/// A named body pattern.
#[derive(Debug)]
pub struct SysexRoute {
    /// Name used in logs.
    pub name: &'static str,
    /// Every test must pass.
    pub pattern: &'static [Match],
    /// Command to run.
    pub command: SysexCommand,
}

const FB01: [Match; 3] = [eq(0, YAMAHA_ID), eq(1, FB01_GROUP), masked(2, 0xF0, 0x00)];

macro_rules! fb01 {
    ($($m:expr),*) => {
        &[FB01[0], FB01[1], FB01[2], $($m),*]
    };
}

/// Dispatch table, first match wins.
pub static ROUTES: &[SysexRoute] = &[
    SysexRoute {
        name: "event list",
        pattern: fb01!(eq(3, 0x70)),
        command: SysexCommand::EventList,
    },
    SysexRoute {
        name: "instrument parameter change",
        pattern: fb01!(masked(3, 0xF8, 0x18)),
        command: SysexCommand::InstrumentParam,
    },
    SysexRoute {
        name: "system parameter change",
        pattern: fb01!(eq(3, 0x10)),
        command: SysexCommand::SystemParam,
    },
    SysexRoute {
        name: "voice bank dump request",
        pattern: fb01!(eq(3, 0x20), eq(4, 0x00)),
        command: SysexCommand::BankDumpRequest,
    },
    SysexRoute {
        name: "current configuration dump request",
        pattern: fb01!(eq(3, 0x20), eq(4, 0x01), eq(5, 0x00)),
        command: SysexCommand::CurrentConfigDumpRequest,
    },
    SysexRoute {
        name: "configuration dump request",
        pattern: fb01!(eq(3, 0x20), eq(4, 0x02)),
        command: SysexCommand::ConfigDumpRequest,
    },
    SysexRoute {
        name: "16 configuration dump request",
        pattern: fb01!(eq(3, 0x20), eq(4, 0x03), eq(5, 0x00)),
        command: SysexCommand::AllConfigDumpRequest,
    },
    SysexRoute {
        name: "unit id dump request",
        pattern: fb01!(eq(3, 0x20), eq(4, 0x04), eq(5, 0x00)),
        command: SysexCommand::UnitIdDumpRequest,
    },
    SysexRoute {
        name: "configuration store",
        pattern: fb01!(eq(3, 0x20), eq(4, 0x40)),
        command: SysexCommand::ConfigStore,
    },
    SysexRoute {
        name: "voice bulk dump request",
        pattern: fb01!(masked(3, 0xF8, 0x28), eq(4, 0x40), eq(5, 0x00)),
        command: SysexCommand::VoiceDumpRequest,
    },
    SysexRoute {
        name: "store into voice ram",
        pattern: fb01!(masked(3, 0xF8, 0x28), eq(4, 0x00)),
        command: SysexCommand::StoreVoiceRam,
    },
    SysexRoute {
        name: "voice bank store",
        pattern: fb01!(eq(3, 0x00), eq(4, 0x00)),
        command: SysexCommand::BankStore,
    },
    SysexRoute {
        name: "current configuration store",
        pattern: fb01!(eq(3, 0x00), eq(4, 0x01), eq(5, 0x00)),
        command: SysexCommand::CurrentConfigStore,
    },
    SysexRoute {
        name: "configuration memory store",
        pattern: fb01!(eq(3, 0x00), eq(4, 0x02)),
        command: SysexCommand::ConfigMemoryStore,
    },
    SysexRoute {
        name: "16 configuration store",
        pattern: fb01!(eq(3, 0x00), eq(4, 0x03), eq(5, 0x00)),
        command: SysexCommand::AllConfigStore,
    },
    SysexRoute {
        name: "configuration-2 node message",
        pattern: fb01!(eq(3, 0x00), eq(4, 0x06)),
        command: SysexCommand::BankStore,
    },
    SysexRoute {
        name: "single voice store",
        pattern: fb01!(masked(3, 0xF8, 0x08), eq(4, 0x00), eq(5, 0x00)),
        command: SysexCommand::SingleVoiceStore,
    },
    SysexRoute {
        name: "voice ram1 dump request",
        pattern: &[eq(0, YAMAHA_ID), masked(1, 0xF0, 0x20), eq(2, 0x0C)],
        command: SysexCommand::Ram1DumpRequest,
    },
    SysexRoute {
        name: "voice ram1 bulk store",
        pattern: &[eq(0, YAMAHA_ID), masked(1, 0xF0, 0x00), eq(2, 0x0C)],
        command: SysexCommand::Ram1Store,
    },
    SysexRoute {
        name: "channel parameter change",
        pattern: &[eq(0, YAMAHA_ID), masked(1, 0xF0, 0x10), eq(2, 0x15)],
        command: SysexCommand::ChannelParam,
    },
    SysexRoute {
        name: "gm mode on",
        pattern: &[eq(0, UNIVERSAL_NON_REALTIME), eq(2, 0x09), eq(3, 0x01)],
        command: SysexCommand::GmModeOn,
    },
    SysexRoute {
        name: "master volume",
        pattern: &[eq(0, UNIVERSAL_REALTIME), eq(2, 0x04), eq(3, 0x01)],
        command: SysexCommand::MasterVolume,
    },
    SysexRoute {
        name: "native voice load",
        pattern: &[eq(0, NATIVE_ID), eq(1, 0x0A)],
        command: SysexCommand::NativeVoiceLoad,
    },
];

/// First route whose pattern matches `body`. Bytes past the end never match.
pub fn route(body: &[u8]) -> Option<&'static SysexRoute> {
    ROUTES.iter().find(|r| {
        r.pattern
            .iter()
            .all(|m| body.get(m.index).is_some_and(|&b| b & m.mask == m.value))
    })
}

/// Strip `F0`/`F7` and return the body.
pub fn body(message: &[u8]) -> Result<&[u8]> {
    match message {
        [SYSEX_START, inner @ .., SYSEX_END] if !inner.is_empty() => Ok(inner),
        [SYSEX_START, SYSEX_END] => Err(Error::InvalidSysex("empty body".to_string())),
        [SYSEX_START, ..] => Err(Error::InvalidSysex("missing F7".to_string())),
        _ => Err(Error::InvalidSysex("missing F0".to_string())),
    }
}

/// Receiver of outbound SysEx messages (dumps).
pub trait MidiOut: Send {
    /// Deliver one complete message including `F0` and `F7`.
    fn send(&mut self, message: &[u8]);
}

impl<F: FnMut(&[u8]) + Send> MidiOut for F {
    fn send(&mut self, message: &[u8]) {
        self(message)
    }
}

fn framed(head: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(head.len() + payload.len() + 2);
    out.push(SYSEX_START);
    out.extend_from_slice(head);
    out.extend_from_slice(payload);
    out.push(SYSEX_END);
    out
}

fn type_a_bank(bank: &VoiceBank) -> Vec<u8> {
    let mut payload = encode_type_a(&bank.header()[..]);
    for voice in bank.voices() {
        payload.extend_from_slice(&encode_type_a(&voice.0));
    }
    payload
}

/// `F0 43 75 s 08+i 00 00 <type A voice> F7`, the single voice store of
/// instrument `i`.
pub fn voice_dump(system_channel: u8, instrument: usize, voice: &PackedVoice) -> Vec<u8> {
    framed(
        &[
            YAMAHA_ID,
            FB01_GROUP,
            system_channel & 0x0F,
            0x08 | (instrument as u8 & 7),
            0x00,
            0x00,
        ],
        &encode_type_a(&voice.0),
    )
}

/// `F0 43 75 s 00 00 b <type A header> <48 type A voices> F7`.
pub fn bank_dump(system_channel: u8, bank_index: u8, bank: &VoiceBank) -> Vec<u8> {
    framed(
        &[YAMAHA_ID, FB01_GROUP, system_channel & 0x0F, 0x00, 0x00, bank_index],
        &type_a_bank(bank),
    )
}

/// `F0 43 0s 0C <type A header> <48 type A voices> F7`.
pub fn legacy_bank_dump(system_channel: u8, bank: &VoiceBank) -> Vec<u8> {
    framed(&[YAMAHA_ID, system_channel & 0x0F, 0x0C], &type_a_bank(bank))
}

/// `F0 43 75 s 00 <kind> <index> <type B data> F7`.
pub fn config_dump(system_channel: u8, kind: u8, index: u8, data: &[u8]) -> Vec<u8> {
    framed(
        &[YAMAHA_ID, FB01_GROUP, system_channel & 0x0F, 0x00, kind, index],
        &encode_type_b(data),
    )
}

/// `F0 43 75 s 20 04 00 <id> F7`.
pub fn unit_id_dump(system_channel: u8) -> Vec<u8> {
    framed(
        &[YAMAHA_ID, FB01_GROUP, system_channel & 0x0F, 0x20, 0x04, 0x00],
        &[system_channel & 0x0F],
    )
}

/// Decode a 1- or 2-byte parameter value. Two bytes carry the low then high
/// nibble.
pub fn param_value(param: u8, data: &[u8]) -> Option<u8> {
    let lo = *data.first()?;
    if param & 0x40 != 0 {
        let hi = *data.get(1)?;
        Some((lo & 0x0F) | (hi & 0x0F) << 4)
    } else {
        Some(lo)
    }
}

/// One entry of an event list message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListEvent {
    /// A channel message.
    Midi(MidiEvent),
    /// Instrument parameter change on instrument `instrument`.
    InstrumentParam {
        /// Instrument, 0..7.
        instrument: usize,
        /// Parameter number.
        param: u8,
        /// Value.
        value: u8,
    },
}

/// Decode the sub-messages of an event list (the bytes after `43 75 s 70`).
/// Decoding stops at the first unknown or truncated entry.
pub fn parse_event_list(mut bytes: &[u8]) -> Vec<ListEvent> {
    let mut out = Vec::new();
    while let Some(&head) = bytes.first() {
        let n = head & 0x0F;
        let len = match head >> 4 {
            0 | 4 | 5 => 2,
            1 | 3 | 7 => 3,
            6 | 8 => 4,
            2 => 5,
            _ => {
                debug!("SYSEX: unknown event list entry {:#04x}", head);
                break;
            }
        };
        let Some(entry) = bytes.get(..len) else {
            debug!("SYSEX: truncated event list entry {:#04x}", head);
            break;
        };
        let d = |i: usize| entry[i] & 0x7F;
        let event = match head >> 4 {
            0 => ListEvent::Midi(MidiEvent::NoteOff {
                channel: n,
                note: d(1),
                velocity: 0,
            }),
            1 => ListEvent::Midi(MidiEvent::NoteOn {
                channel: n,
                note: d(1),
                velocity: d(2),
            }),
            2 => {
                debug!(
                    "SYSEX: key on with duration {} ignored",
                    (d(3) as u16) << 7 | d(4) as u16
                );
                ListEvent::Midi(MidiEvent::NoteOn {
                    channel: n,
                    note: d(1),
                    velocity: d(2),
                })
            }
            3 => ListEvent::Midi(MidiEvent::ControlChange {
                channel: n,
                controller: d(1),
                value: d(2),
            }),
            4 => ListEvent::Midi(MidiEvent::ProgramChange {
                channel: n,
                program: d(1),
            }),
            5 => ListEvent::Midi(MidiEvent::ChannelPressure {
                channel: n,
                pressure: d(1),
            }),
            6 => ListEvent::Midi(MidiEvent::PitchBend {
                channel: n,
                value: (d(2) as u16) << 7 | d(1) as u16,
            }),
            7 => ListEvent::InstrumentParam {
                instrument: (n & 7) as usize,
                param: d(1) & 0x3F,
                value: d(2),
            },
            _ => ListEvent::InstrumentParam {
                instrument: (n & 7) as usize,
                param: d(1) & 0x3F,
                value: (d(2) & 0x0F) | (d(3) & 0x0F) << 4,
            },
        };
        out.push(event);
        bytes = &bytes[len..];
    }
    out
}

/// Decode a native voice load payload (the bytes after `7D 0A`).
///
/// Layout: tone MSB, tone LSB, 11 values per operator in voice-file order,
/// CON, FL, slot mask, checksum. All bytes sum to 0 modulo 128. Returns
/// `None` when the length, checksum or tone number is wrong.
pub fn parse_native_voice(payload: &[u8]) -> Option<(usize, VoiceData)> {
    let e = payload.get(..NATIVE_VOICE_LEN)?;
    let sum = e.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum & 0x7F != 0 {
        return None;
    }
    let tone = (e[0] as usize & 0x7F) << 7 | e[1] as usize & 0x7F;
    if tone >= MAX_TONES {
        return None;
    }
    let op = |k: usize, i: usize| e[2 + k * 11 + i];
    let ops = std::array::from_fn(|k| {
        OperatorData::from_file_order(
            op(k, 0),
            op(k, 1),
            op(k, 2),
            op(k, 3),
            op(k, 4),
            op(k, 5),
            op(k, 6),
            op(k, 7),
            op(k, 8),
            op(k, 9),
            op(k, 10),
        )
        .masked()
    });
    Some((
        tone,
        VoiceData {
            name: format!("V{:03}", tone),
            con: e[46] & 7,
            fl: e[47] & 7,
            slot_mask: e[48] & 0x0F,
            ops,
        },
    ))
}

/// Build a native voice load message for `voice` at `tone`.
pub fn native_voice_message(tone: usize, voice: &VoiceData) -> Vec<u8> {
    let mut e = Vec::with_capacity(NATIVE_VOICE_LEN);
    e.push(((tone >> 7) & 0x7F) as u8);
    e.push((tone & 0x7F) as u8);
    for op in voice.ops.iter().map(|op| op.masked()) {
        e.extend_from_slice(&[
            op.ar, op.d1r, op.d2r, op.rr, op.sl, op.tl, op.ks, op.mul, op.dt1, op.dt2, op.ame,
        ]);
    }
    e.extend_from_slice(&[voice.con & 7, voice.fl & 7, voice.slot_mask & 0x0F]);
    let sum = e.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    e.push(sum.wrapping_neg() & 0x7F);
    framed(&[NATIVE_ID, 0x0A], &e)
}
