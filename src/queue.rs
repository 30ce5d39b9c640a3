//! Timestamped MIDI event queue with MIDI interface transfer delay.

use crossbeam_queue::ArrayQueue;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::midi::MidiEvent;

/// MIDI wire rate in bits per second.
const MIDI_BAUD: f64 = 31250.0;

/// How queued events are delayed by the serial MIDI interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiDelayMode {
    /// Events apply at their timestamp.
    Immediate,
    /// Short messages wait for the previous message's transfer; SysEx does not.
    #[default]
    DelayShortMessagesOnly,
    /// Every message waits for the previous message's transfer.
    DelayAll,
}

/// An event due at a render position (in frames).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedEvent {
    /// Frame at which the event applies.
    pub timestamp: u64,
    /// The event.
    pub event: MidiEvent,
}

/// Bounded FIFO of [`TimedEvent`]s. Timestamps leaving the queue never go
/// backwards.
pub struct EventQueue {
    queue: ArrayQueue<TimedEvent>,
    pending: Option<TimedEvent>,
    mode: MidiDelayMode,
    frames_per_byte: f64,
    busy_until: f64,
    last_timestamp: u64,
}

impl EventQueue {
    /// Queue holding up to `capacity` events.
    ///
    /// # Arguments
    /// * `capacity` - Maximum queued events, at least 1
    /// * `sample_rate` - Render rate used to convert transfer time to frames
    /// * `mode` - Interface delay mode
    pub fn new(capacity: usize, sample_rate: u32, mode: MidiDelayMode) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            pending: None,
            mode,
            frames_per_byte: sample_rate as f64 / MIDI_BAUD * 8.0,
            busy_until: 0.0,
            last_timestamp: 0,
        }
    }

    /// Delay mode.
    pub fn mode(&self) -> MidiDelayMode {
        self.mode
    }

    /// Frames one byte occupies on the wire.
    pub fn frames_per_byte(&self) -> f64 {
        self.frames_per_byte
    }

    /// Queue `event` at `timestamp`, or at `now` when none is given.
    /// Returns false if the queue is full.
    pub fn push(&mut self, event: MidiEvent, timestamp: Option<u64>, now: u64) -> bool {
        let requested = timestamp.unwrap_or(now).max(self.last_timestamp);
        let delayed = match self.mode {
            MidiDelayMode::Immediate => false,
            MidiDelayMode::DelayShortMessagesOnly => !matches!(event, MidiEvent::SysEx(_)),
            MidiDelayMode::DelayAll => true,
        };
        let at = if delayed {
            let start = (requested as f64).max(self.busy_until);
            start.ceil() as u64
        } else {
            requested
        };
        let transfer = event.wire_len() as f64 * self.frames_per_byte;

        if let Err(rejected) = self.queue.push(TimedEvent {
            timestamp: at,
            event,
        }) {
            warn!(
                "MIDI: queue full, dropping event at frame {}",
                rejected.timestamp
            );
            return false;
        }
        if delayed {
            self.busy_until = (at as f64).max(self.busy_until) + transfer;
        }
        self.last_timestamp = at;
        true
    }

    /// Next event due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<MidiEvent> {
        if self.pending.is_none() {
            self.pending = self.queue.pop();
        }
        match &self.pending {
            Some(e) if e.timestamp <= now => self.pending.take().map(|e| e.event),
            _ => None,
        }
    }

    /// Timestamp of the next event, if any.
    pub fn next_due(&mut self) -> Option<u64> {
        if self.pending.is_none() {
            self.pending = self.queue.pop();
        }
        self.pending.as_ref().map(|e| e.timestamp)
    }

    /// Queued events.
    pub fn len(&self) -> usize {
        self.queue.len() + self.pending.is_some() as usize
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued event and reset the interface timing.
    pub fn flush(&mut self) -> usize {
        let mut dropped = self.pending.take().is_some() as usize;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        self.busy_until = 0.0;
        self.last_timestamp = 0;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(note: u8) -> MidiEvent {
        MidiEvent::NoteOn {
            channel: 0,
            note,
            velocity: 100,
        }
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut q = EventQueue::new(2, 44100, MidiDelayMode::Immediate);
        assert!(q.push(note_on(60), None, 0));
        assert!(q.push(note_on(61), None, 0));
        assert!(!q.push(note_on(62), None, 0));
        assert_eq!(q.len(), 2);
        assert_eq!(q.flush(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_events_wait_for_their_timestamp() {
        let mut q = EventQueue::new(8, 44100, MidiDelayMode::Immediate);
        q.push(note_on(60), Some(100), 0);
        assert_eq!(q.pop_due(99), None);
        assert_eq!(q.next_due(), Some(100));
        assert_eq!(q.pop_due(100), Some(note_on(60)));
        assert_eq!(q.pop_due(1000), None);
    }

    #[test]
    fn test_transfer_delay_spaces_short_messages() {
        let mut q = EventQueue::new(8, 31250, MidiDelayMode::DelayShortMessagesOnly);
        assert_eq!(q.frames_per_byte(), 8.0);
        q.push(note_on(60), Some(0), 0);
        q.push(note_on(61), Some(0), 0);
        q.push(MidiEvent::SysEx(vec![0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]), Some(0), 0);
        assert_eq!(q.next_due(), Some(0));
        q.pop_due(0);
        // Three bytes at eight frames each.
        assert_eq!(q.next_due(), Some(24));
        q.pop_due(24);
        // SysEx is not delayed but never overtakes queued events.
        assert_eq!(q.next_due(), Some(24));
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut q = EventQueue::new(8, 44100, MidiDelayMode::Immediate);
        q.push(note_on(60), Some(500), 0);
        q.push(note_on(61), Some(10), 0);
        q.pop_due(500);
        assert_eq!(q.next_due(), Some(500));
    }
}
